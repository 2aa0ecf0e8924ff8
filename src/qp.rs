/*! Per-flow connection state.

A [QueuePair] is the sender side of one flow: the transfer bounds, the
reliability cursors, the pacing state, and the congestion-control substate
for whichever algorithm the host runs. An [RxQueuePair] is the receiver
side: the cumulative sequence tracker and the NACK throttle. Both are owned
by the host in hash maps keyed by the packed five-tuple keys below.
*/

use crate::cc::CcState;
use crate::rate::Rate;
use crate::time::{Duration, Instant};

/// Sender-side flow key: `(dst_ip, src_port, priority group)` packed into
/// one word. Unique within a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QpKey(u64);

impl QpKey {
    pub fn new(dip: u32, sport: u16, pg: u16) -> QpKey {
        QpKey((dip as u64) << 32 | (sport as u64) << 16 | pg as u64)
    }

    pub fn dip(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn sport(&self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn pg(&self) -> u16 {
        self.0 as u16
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Receiver-side flow key: `(peer ip, peer port, priority group)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RxKey(u64);

impl RxKey {
    pub fn new(dip: u32, dport: u16, pg: u16) -> RxKey {
        RxKey((dip as u64) << 32 | (pg as u64) << 16 | dport as u64)
    }
}

/// The flow's five-tuple, as stamped into every packet it sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowTuple {
    pub sip: u32,
    pub dip: u32,
    pub sport: u16,
    pub dport: u16,
    pub pg: u16,
}

impl FlowTuple {
    /// Stable per-flow hash used for ECMP NIC selection. FNV-1a over the
    /// address/port four-tuple.
    pub fn hash(&self) -> u32 {
        let mut h: u32 = 0x811c_9dc5;
        for b in self
            .sip
            .to_be_bytes()
            .into_iter()
            .chain(self.dip.to_be_bytes())
            .chain(self.sport.to_be_bytes())
            .chain(self.dport.to_be_bytes())
        {
            h ^= b as u32;
            h = h.wrapping_mul(0x0100_0193);
        }
        h
    }
}

/// Transport-level sender state shared by every congestion-control
/// algorithm: sequence cursors, rate and window bounds, and the send
/// pacing cursor.
#[derive(Debug, Clone)]
pub struct Transport {
    /// Total payload bytes this flow transfers.
    pub size: u64,
    /// Next sequence to send.
    pub snd_nxt: u64,
    /// Highest cumulatively acknowledged sequence.
    pub snd_una: u64,
    /// IP identification counter for outgoing data packets.
    pub ipid: u16,
    /// Current sending rate.
    pub rate: Rate,
    /// NIC line rate; the ceiling for every update.
    pub max_rate: Rate,
    /// On-the-fly cap in bytes; 0 disables windowing.
    pub win: u64,
    /// Recompute the effective window from the current rate and base RTT.
    pub var_win: bool,
    /// Path baseline RTT.
    pub base_rtt: Duration,
    /// Earliest virtual time the next packet may be handed to the link.
    pub next_avail: Instant,
    /// Size of the most recently sent packet, for rate-change shifts.
    pub last_pkt_size: u32,
    /// Swift sub-window pacing interval; zero when window-bound.
    pub pacing_delay: Duration,
}

impl Transport {
    pub fn new(size: u64, win: u64, var_win: bool, base_rtt: Duration, max_rate: Rate) -> Transport {
        Transport {
            size,
            snd_nxt: 0,
            snd_una: 0,
            ipid: 0,
            rate: max_rate,
            max_rate,
            win,
            var_win,
            base_rtt,
            next_avail: Instant::ZERO,
            last_pkt_size: 0,
            pacing_delay: Duration::ZERO,
        }
    }

    pub fn bytes_left(&self) -> u64 {
        self.size.saturating_sub(self.snd_nxt)
    }

    /// Unacknowledged bytes in flight.
    pub fn on_the_fly(&self) -> u64 {
        self.snd_nxt - self.snd_una
    }

    /// The effective window: the configured byte cap, or, with variable
    /// windowing on, one bandwidth-delay product at the *current* rate
    /// (never below one byte). 0 when windowing is disabled.
    pub fn window(&self) -> u64 {
        if self.win == 0 {
            0
        } else if self.var_win {
            self.rate.bdp_bytes(self.base_rtt).max(1)
        } else {
            self.win
        }
    }

    pub fn is_win_bound(&self) -> bool {
        let w = self.window();
        w > 0 && self.on_the_fly() >= w
    }

    /// Advance the cumulative acknowledgment cursor; never moves backward.
    pub fn acknowledge(&mut self, seq: u64) {
        if seq > self.snd_una {
            self.snd_una = seq;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.snd_una >= self.size
    }

    pub fn set_win(&mut self, win: u64) {
        self.win = win;
    }

    /// Switch to `new_rate`, shifting the already scheduled next send by
    /// the difference in serialisation time of the last packet so the
    /// change takes effect from the very next packet. A rate increase pulls
    /// the send earlier, a decrease pushes it later.
    pub fn change_rate(&mut self, new_rate: Rate) {
        let old_t = self.rate.tx_time(self.last_pkt_size);
        let new_t = new_rate.tx_time(self.last_pkt_size);
        if new_t >= old_t {
            self.next_avail += new_t - old_t;
        } else {
            self.next_avail = self.next_avail - (old_t - new_t);
        }
        self.rate = new_rate;
    }
}

/// Sender-side queue pair.
pub struct QueuePair {
    pub flow: FlowTuple,
    pub start_time: Instant,
    /// Scheduled termination; [Instant::FAR_FUTURE] for run-forever flows.
    pub stop_time: Instant,
    /// Never-ending incast member, tagged at creation.
    pub incast_flow: bool,
    pub tx: Transport,
    pub cc: CcState,
}

impl QueuePair {
    pub fn key(&self) -> QpKey {
        QpKey::new(self.flow.dip, self.flow.sport, self.flow.pg)
    }

    /// Stable per-flow hash used for ECMP NIC selection.
    pub fn hash(&self) -> u32 {
        self.flow.hash()
    }
}

/// ECN bookkeeping feeding the legacy CNP fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct EcnAccount {
    pub ecnbits: u8,
    pub qfb: u16,
    pub total: u16,
}

/// Receiver-side queue pair. Addressing is for the ACK direction:
/// `sip`/`sport` are local, `dip`/`dport` are the sender's.
#[derive(Debug, Clone)]
pub struct RxQueuePair {
    pub sip: u32,
    pub dip: u32,
    pub sport: u16,
    pub dport: u16,
    pub pg: u16,
    /// Cumulative next expected sequence.
    pub next_expected: u64,
    /// Next ACK milestone in bytes.
    pub milestone: u64,
    /// No NACK for the same expected sequence before this time.
    pub nack_timer: Instant,
    /// Expected sequence the last NACK reported.
    pub last_nack: u64,
    /// IP identification counter for outgoing ACKs.
    pub ipid: u16,
    pub ecn: EcnAccount,
}

impl RxQueuePair {
    pub fn new(sip: u32, dip: u32, sport: u16, dport: u16, pg: u16, ack_interval: u32) -> Self {
        RxQueuePair {
            sip,
            dip,
            sport,
            dport,
            pg,
            next_expected: 0,
            milestone: ack_interval as u64,
            nack_timer: Instant::ZERO,
            last_nack: 0,
            ipid: 0,
            ecn: EcnAccount::default(),
        }
    }

    pub fn key(&self) -> RxKey {
        RxKey::new(self.dip, self.dport, self.pg)
    }

    /// Stable hash for ECMP NIC selection, mirroring [QueuePair::hash].
    pub fn hash(&self) -> u32 {
        FlowTuple {
            sip: self.sip,
            dip: self.dip,
            sport: self.sport,
            dport: self.dport,
            pg: self.pg,
        }
        .hash()
    }
}
