/*! The congestion-control algorithm family.

Every queue pair runs exactly one algorithm, selected at creation from the
host configuration and never changed. All algorithms implement the same
small reaction interface, [Congestion], and keep their private state in
one variant of the [CcState] enum, so only the active algorithm's state is
materialised per QP and the dispatcher never mixes substates.

Rate-based algorithms end every reaction in `Transport::change_rate`, which
clamps into `[min_rate, max_rate]` at each call site; window-based ones end
in `Transport::set_win`. The host attempts a transmit after every dispatch.
*/

pub(crate) mod dctcp;
pub(crate) mod hpcc;
pub(crate) mod mlx;
pub(crate) mod pint;
pub(crate) mod qcn;
pub(crate) mod swift;
pub(crate) mod timely;
pub(crate) mod ufcc;

pub use self::dctcp::Dctcp;
pub use self::hpcc::{Hpcc, PowerTcp};
pub use self::mlx::Dcqcn;
pub use self::pint::HpccPint;
pub use self::qcn::{PowerQcn, RttQcn};
pub use self::swift::Swift;
pub use self::timely::{PatchedTimely, Timely};
pub use self::ufcc::{Ufcc, UfccCwnd};

use crate::config::Config;
use crate::qp::{QpKey, Transport};
use crate::rate::Rate;
use crate::sim::Scheduler;
use crate::time::Instant;
use crate::wire::{IntHeader, IntMode};

/// Stable numeric identifiers of the algorithm family, as they appear in
/// configuration files. PowerTCP and theta-PowerTCP share [CcMode::Hpcc]'s
/// number and are selected by the `powertcp`/`powertcp_delay` flags; the
/// pair `(cc_mode, powertcp flags)` is the true selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CcMode {
    MlxCnp = 1,
    Hpcc = 3,
    Timely = 7,
    Dctcp = 8,
    HpccPint = 10,
    PatchedTimely = 11,
    Swift = 12,
    RttQcn = 13,
    PowerQcn = 14,
    Ufcc = 15,
    UfccCwnd = 16,
}

impl CcMode {
    pub fn from_u32(value: u32) -> Option<CcMode> {
        Some(match value {
            1 => CcMode::MlxCnp,
            3 => CcMode::Hpcc,
            7 => CcMode::Timely,
            8 => CcMode::Dctcp,
            10 => CcMode::HpccPint,
            11 => CcMode::PatchedTimely,
            12 => CcMode::Swift,
            13 => CcMode::RttQcn,
            14 => CcMode::PowerQcn,
            15 => CcMode::Ufcc,
            16 => CcMode::UfccCwnd,
            _ => return None,
        })
    }

    pub fn as_u32(&self) -> u32 {
        *self as u32
    }
}

/// One acknowledgment's worth of feedback, handed to the active algorithm.
pub struct Feedback<'a> {
    /// The ACK's cumulative sequence.
    pub seq: u64,
    /// Congestion-notification flag (echoed ECN).
    pub cnp: bool,
    /// The echoed telemetry header.
    pub int: &'a IntHeader,
    /// Virtual time of processing.
    pub now: Instant,
}

impl Feedback<'_> {
    /// RTT sample against the echoed send timestamp, for the delay-based
    /// algorithms running in TS mode.
    pub fn rtt(&self) -> u64 {
        (self.now.total_nanos() as u64).saturating_sub(self.int.ts())
    }
}

/// The common reaction interface. A default implementation reacts to a
/// NACK like an ACK, ignores CNPs, and does not watch sent packets.
pub trait Congestion {
    fn on_ack(
        &mut self,
        tx: &mut Transport,
        fb: &Feedback<'_>,
        cfg: &Config,
        sched: &mut dyn Scheduler,
    );

    fn on_nack(
        &mut self,
        tx: &mut Transport,
        fb: &Feedback<'_>,
        cfg: &Config,
        sched: &mut dyn Scheduler,
    ) {
        self.on_ack(tx, fb, cfg, sched);
    }

    fn on_cnp(
        &mut self,
        _tx: &mut Transport,
        _cfg: &Config,
        _key: QpKey,
        _sched: &mut dyn Scheduler,
    ) {
    }

    /// Called once per transmitted packet with the post-increment
    /// `snd_nxt`, for algorithms that keep a send-time log.
    fn on_pkt_sent(&mut self, _seq: u64, _now: Instant) {}
}

/// The per-QP algorithm substate. Exactly one variant is active for the
/// lifetime of the queue pair.
pub enum CcState {
    Mlx(Dcqcn),
    Hpcc(Hpcc),
    PowerTcp(PowerTcp),
    Timely(Timely),
    PatchedTimely(PatchedTimely),
    Dctcp(Dctcp),
    HpccPint(HpccPint),
    Swift(Swift),
    RttQcn(RttQcn),
    PowerQcn(PowerQcn),
    Ufcc(Ufcc),
    UfccCwnd(UfccCwnd),
}

impl CcState {
    /// Build the substate for a new queue pair. Panics when the configured
    /// telemetry mode cannot feed the selected algorithm; that mismatch is
    /// a startup error, not a runtime one.
    pub fn new(cfg: &Config, key: QpKey, max_rate: Rate, win: u64) -> CcState {
        let state = match cfg.cc_mode {
            CcMode::MlxCnp => CcState::Mlx(Dcqcn::new(max_rate)),
            CcMode::Hpcc => {
                if cfg.hpcc.powertcp || cfg.hpcc.powertcp_delay {
                    CcState::PowerTcp(PowerTcp::new(max_rate, cfg.hpcc.powertcp_delay))
                } else {
                    CcState::Hpcc(Hpcc::new(max_rate))
                }
            }
            CcMode::Timely => CcState::Timely(Timely::new(max_rate)),
            CcMode::PatchedTimely => CcState::PatchedTimely(PatchedTimely::new(max_rate)),
            CcMode::Dctcp => CcState::Dctcp(Dctcp::new()),
            CcMode::HpccPint => CcState::HpccPint(HpccPint::new(
                max_rate,
                cfg.random_seed ^ key.raw(),
            )),
            CcMode::Swift => CcState::Swift(Swift::new(win as f64)),
            CcMode::RttQcn => CcState::RttQcn(RttQcn::new(win as f64, cfg.random_seed ^ key.raw())),
            CcMode::PowerQcn => {
                CcState::PowerQcn(PowerQcn::new(win as f64, cfg.random_seed ^ key.raw()))
            }
            CcMode::Ufcc => CcState::Ufcc(Ufcc::new(cfg.min_rate, max_rate)),
            CcMode::UfccCwnd => CcState::UfccCwnd(UfccCwnd::new(cfg.min_rate, max_rate)),
        };
        if let Some(required) = state.required_int_mode() {
            assert!(
                cfg.int.mode() == required,
                "cc mode {:?} requires INT mode {:?}, configured {:?}",
                cfg.cc_mode,
                required,
                cfg.int.mode()
            );
        }
        state
    }

    /// The telemetry mode this algorithm reads, if any.
    fn required_int_mode(&self) -> Option<IntMode> {
        match self {
            CcState::Mlx(_) | CcState::Dctcp(_) => None,
            CcState::Hpcc(_) | CcState::PowerTcp(_) => Some(IntMode::Normal),
            CcState::Timely(_) | CcState::PatchedTimely(_) => Some(IntMode::Ts),
            CcState::HpccPint(_) => Some(IntMode::Pint),
            CcState::Swift(_) => Some(IntMode::Swift),
            CcState::RttQcn(_) | CcState::PowerQcn(_) => Some(IntMode::Ts),
            CcState::Ufcc(_) | CcState::UfccCwnd(_) => Some(IntMode::Ts),
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Congestion {
        match self {
            CcState::Mlx(inner) => inner,
            CcState::Hpcc(inner) => inner,
            CcState::PowerTcp(inner) => inner,
            CcState::Timely(inner) => inner,
            CcState::PatchedTimely(inner) => inner,
            CcState::Dctcp(inner) => inner,
            CcState::HpccPint(inner) => inner,
            CcState::Swift(inner) => inner,
            CcState::RttQcn(inner) => inner,
            CcState::PowerQcn(inner) => inner,
            CcState::Ufcc(inner) => inner,
            CcState::UfccCwnd(inner) => inner,
        }
    }

    /// Cancel any timers the substate owns; called on QP teardown.
    pub fn cancel_timers(&mut self, sched: &mut dyn Scheduler) {
        if let CcState::Mlx(mlx) = self {
            mlx.cancel_timers(sched);
        }
    }

    #[cfg(test)]
    pub(crate) fn none_for_test() -> CcState {
        CcState::Dctcp(Dctcp::new())
    }
}

impl Congestion for CcState {
    fn on_ack(
        &mut self,
        tx: &mut Transport,
        fb: &Feedback<'_>,
        cfg: &Config,
        sched: &mut dyn Scheduler,
    ) {
        self.inner_mut().on_ack(tx, fb, cfg, sched)
    }

    fn on_nack(
        &mut self,
        tx: &mut Transport,
        fb: &Feedback<'_>,
        cfg: &Config,
        sched: &mut dyn Scheduler,
    ) {
        self.inner_mut().on_nack(tx, fb, cfg, sched)
    }

    fn on_cnp(
        &mut self,
        tx: &mut Transport,
        cfg: &Config,
        key: QpKey,
        sched: &mut dyn Scheduler,
    ) {
        self.inner_mut().on_cnp(tx, cfg, key, sched)
    }

    fn on_pkt_sent(&mut self, seq: u64, now: Instant) {
        self.inner_mut().on_pkt_sent(seq, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_numbers_are_fixed() {
        assert_eq!(CcMode::MlxCnp.as_u32(), 1);
        assert_eq!(CcMode::Hpcc.as_u32(), 3);
        assert_eq!(CcMode::Timely.as_u32(), 7);
        assert_eq!(CcMode::Dctcp.as_u32(), 8);
        assert_eq!(CcMode::HpccPint.as_u32(), 10);
        assert_eq!(CcMode::PatchedTimely.as_u32(), 11);
        assert_eq!(CcMode::Swift.as_u32(), 12);
        assert_eq!(CcMode::RttQcn.as_u32(), 13);
        assert_eq!(CcMode::PowerQcn.as_u32(), 14);
        assert_eq!(CcMode::Ufcc.as_u32(), 15);
        assert_eq!(CcMode::UfccCwnd.as_u32(), 16);
        assert_eq!(CcMode::from_u32(3), Some(CcMode::Hpcc));
        assert_eq!(CcMode::from_u32(2), None);
        assert_eq!(CcMode::from_u32(9), None);
    }

    #[test]
    fn powertcp_flags_select_the_variant() {
        use crate::wire::{IntCodec, IntMode};
        let mut cfg = Config {
            cc_mode: CcMode::Hpcc,
            int: IntCodec::new(IntMode::Normal, 2, 1),
            ..Config::default()
        };
        let key = QpKey::new(1, 2, 3);
        let rate = Rate::from_gbps(100);
        assert!(matches!(
            CcState::new(&cfg, key, rate, 0),
            CcState::Hpcc(_)
        ));
        cfg.hpcc.powertcp = true;
        assert!(matches!(
            CcState::new(&cfg, key, rate, 0),
            CcState::PowerTcp(_)
        ));
        cfg.hpcc.powertcp = false;
        cfg.hpcc.powertcp_delay = true;
        assert!(matches!(
            CcState::new(&cfg, key, rate, 0),
            CcState::PowerTcp(_)
        ));
    }

    #[test]
    #[should_panic(expected = "requires INT mode")]
    fn int_mode_mismatch_is_fatal_at_creation() {
        use crate::wire::{IntCodec, IntMode};
        let cfg = Config {
            cc_mode: CcMode::Timely,
            int: IntCodec::new(IntMode::Normal, 2, 1),
            ..Config::default()
        };
        CcState::new(&cfg, QpKey::new(1, 2, 3), Rate::from_gbps(100), 0);
    }
}
