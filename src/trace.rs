/*! Line-oriented ASCII trace outputs.

Two record kinds leave the core: flow completions and PFC events. The line
formats are fixed and consumed by the downstream analysis scripts, so they
are centralised here and covered by tests.
*/

use std::io::{self, Write};

use crate::rate::Rate;
use crate::time::{Duration, Instant};

/// One completed flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowRecord {
    pub sip: u32,
    pub dip: u32,
    pub sport: u16,
    pub dport: u16,
    /// Payload bytes transferred.
    pub size: u64,
    pub start: Instant,
    pub finish: Instant,
    /// What the flow would have taken alone on an idle path.
    pub standalone_fct: Duration,
}

/// `sip dip sport dport size start_ns fct_ns standalone_fct_ns`, addresses
/// in zero-padded hex.
pub fn write_flow_completion<W: Write>(w: &mut W, rec: &FlowRecord) -> io::Result<()> {
    writeln!(
        w,
        "{:08x} {:08x} {} {} {} {} {} {}",
        rec.sip,
        rec.dip,
        rec.sport,
        rec.dport,
        rec.size,
        rec.start.total_nanos(),
        (rec.finish - rec.start).total_nanos(),
        rec.standalone_fct.total_nanos()
    )
}

/// Ideal completion time of `size` payload bytes over a path of bandwidth
/// `bw` and baseline RTT `base_rtt`, counting `header_overhead` bytes per
/// MTU-sized packet (the whole header minus the telemetry area).
pub fn standalone_fct(
    size: u64,
    mtu: u32,
    header_overhead: u32,
    base_rtt: Duration,
    bw: Rate,
) -> Duration {
    let packets = (size.saturating_sub(1)) / mtu as u64 + 1;
    let total_bytes = size + packets * header_overhead as u64;
    base_rtt + bw.tx_time(total_bytes.min(u32::MAX as u64) as u32)
}

/// `time_ns node node_type if_idx kind` for one PFC pause/resume event.
pub fn write_pfc_event<W: Write>(
    w: &mut W,
    time: Instant,
    node: u32,
    node_type: u32,
    if_idx: u32,
    kind: u32,
) -> io::Result<()> {
    writeln!(
        w,
        "{} {} {} {} {}",
        time.total_nanos(),
        node,
        node_type,
        if_idx,
        kind
    )
}
