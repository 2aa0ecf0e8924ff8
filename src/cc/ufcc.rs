/*! UFCC: a bracketing three-state controller.

The sender keeps a `[low_rate, high_rate]` bracket around the fair share
and probes inside it, steered only by echoed-timestamp RTT samples. INIT
walks the rate up or down and tightens the bracket from the probe history;
once the bracket converges the controller oscillates in STEADY between the
bracket edges; an RTT excursion past the burst threshold drops it into
BURST, which floors the rate and re-widens the bracket on recovery. The
RELEASE and PREEMPT states are reserved.

`UFCC_CWND` runs the identical state machine but applies the resulting
rate as a window over the base RTT instead of touching the pacing rate.
*/

use crate::config::Config;
use crate::qp::Transport;
use crate::rate::Rate;
use crate::sim::Scheduler;

use super::{Congestion, Feedback};

/// RTT headroom constants over the observed minimum, in nanoseconds.
const LOW_RTT: u64 = 1000;
const HIGH_RTT: u64 = 1500;
const BURST_RTT: u64 = 6000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UfccPhase {
    Init,
    Steady,
    Burst,
    Release,
    Preempt,
}

pub struct Ufcc {
    pub phase: UfccPhase,
    /// Rate bracket around the believed fair share.
    pub high_rate: Rate,
    pub low_rate: Rate,
    /// Probe step sizes, recomputed from the bracket each update window.
    pub up_rate: Rate,
    pub down_rate: Rate,
    /// Working rate, the state machine's own view of the sending rate.
    pub cur_rate: Rate,
    /// Working rate at the close of the previous update window.
    pub last_rate: Rate,
    pub avg_rtt: u64,
    pub min_rtt: u64,
    pub last_rtt: u64,
    pub state_count: u32,
    pub last_update_seq: u64,
    /// Bracket-move arms; cleared by the probe directions taken.
    high_flag: bool,
    low_flag: bool,
}

impl Ufcc {
    pub fn new(min_rate: Rate, max_rate: Rate) -> Ufcc {
        Ufcc {
            phase: UfccPhase::Init,
            high_rate: max_rate,
            low_rate: min_rate,
            up_rate: Rate::ZERO,
            down_rate: Rate::ZERO,
            cur_rate: max_rate,
            last_rate: max_rate,
            avg_rtt: 0,
            min_rtt: 0,
            last_rtt: 0,
            state_count: 0,
            last_update_seq: 0,
            high_flag: false,
            low_flag: false,
        }
    }

    /// `1000 * rate / bytes-sent-in-window`, the probe step scaling.
    fn per_window(rate: Rate, window_bytes: u64) -> Rate {
        Rate::from_bps(1000 * rate.bits_per_sec() / window_bytes.max(1))
    }

    /// Process one RTT sample. Returns the new working rate, or `None` on
    /// the seeding sample.
    fn step(&mut self, tx: &Transport, ack_seq: u64, rtt: u64, cfg: &Config) -> Option<Rate> {
        if self.last_rtt == 0 {
            self.avg_rtt = rtt;
            self.min_rtt = rtt.min(cfg.timely.min_rtt.total_nanos());
            self.last_rtt = rtt;
            self.last_update_seq = tx.snd_nxt;
            return None;
        }
        self.min_rtt = self.min_rtt.min(rtt);
        if rtt > self.min_rtt + BURST_RTT {
            self.phase = UfccPhase::Burst;
        }
        if ack_seq > self.last_update_seq {
            self.major_update(tx, rtt, cfg);
        } else {
            self.fast_update(tx, rtt, cfg);
        }
        Some(self.cur_rate)
    }

    /// Probe within the bracket in the direction the RTT sample suggests.
    fn probe(&mut self, rtt: u64) {
        if rtt <= self.last_rtt {
            self.high_flag = false;
            self.cur_rate = (self.cur_rate + self.up_rate).min(self.high_rate);
        } else {
            self.low_flag = false;
            self.cur_rate = (self.cur_rate - self.down_rate).max(self.low_rate);
        }
    }

    /// The STEADY policy, identical on the fast and major paths.
    fn steady(&mut self, tx: &Transport, rtt: u64, window_bytes: u64) {
        self.cur_rate = if rtt <= self.avg_rtt {
            self.high_rate
        } else {
            self.low_rate
        };
        if self.avg_rtt > self.min_rtt + HIGH_RTT && rtt > self.avg_rtt {
            self.cur_rate = self.low_rate * 0.95;
        }
        if self.avg_rtt < self.min_rtt + (7 * (LOW_RTT + HIGH_RTT)) / 10 {
            self.cur_rate = (self.high_rate * 1.05).min(tx.max_rate);
        }

        // a clearly idle path confirms the bracket is too low
        if rtt < self.min_rtt + LOW_RTT / 4 && self.cur_rate != tx.max_rate {
            self.state_count += 1;
        } else {
            self.state_count = 0;
        }
        if self.state_count >= 1 {
            self.high_rate = tx.max_rate;
            self.cur_rate = self.high_rate;
            self.up_rate = Rate::ZERO;
            self.down_rate = Self::per_window((self.cur_rate - self.low_rate) * 0.5, window_bytes);
            self.low_flag = false;
            self.high_flag = false;
            self.state_count = 0;
            self.phase = UfccPhase::Init;
        }
    }

    fn fast_update(&mut self, tx: &Transport, rtt: u64, cfg: &Config) {
        let window_bytes = tx.snd_nxt - self.last_update_seq.min(tx.snd_nxt);
        match self.phase {
            UfccPhase::Init => self.probe(rtt),
            UfccPhase::Steady => self.steady(tx, rtt, window_bytes),
            UfccPhase::Burst => {
                self.cur_rate = (self.low_rate * 0.3).max(cfg.min_rate);
                if rtt <= self.min_rtt + BURST_RTT {
                    self.cur_rate = ((self.low_rate * 0.9 + self.high_rate) * 0.5)
                        .min(self.low_rate * 1.8);
                }
            }
            UfccPhase::Release | UfccPhase::Preempt => {}
        }
    }

    fn major_update(&mut self, tx: &Transport, rtt: u64, cfg: &Config) {
        let window_bytes = tx.snd_nxt - self.last_update_seq.min(tx.snd_nxt);
        match self.phase {
            UfccPhase::Init => {
                self.probe(rtt);

                // an un-cleared arm means the whole window probed the other
                // direction: move that bracket edge to the closing rate
                if self.low_flag {
                    self.low_rate = self.last_rate;
                }
                if self.high_flag {
                    self.high_rate = self.last_rate;
                }
                self.low_flag = true;
                self.high_flag = true;

                if self.low_rate >= self.high_rate * 0.95 {
                    // bracket converged
                    if self.avg_rtt <= self.min_rtt + (LOW_RTT + HIGH_RTT) / 2 {
                        self.state_count = 0;
                        self.phase = UfccPhase::Steady;
                    } else if self.avg_rtt > self.min_rtt + HIGH_RTT {
                        self.state_count += 3;
                    } else {
                        self.state_count += 1;
                    }
                    if self.state_count >= 5 {
                        self.cur_rate = (self.low_rate - cfg.min_rate * 0.1).max(cfg.min_rate);
                        self.low_rate = self.cur_rate;
                        self.state_count = 0;
                    }
                }

                self.cur_rate = self.cur_rate.max(self.low_rate).min(self.high_rate);
                self.up_rate = Self::per_window(
                    ((self.high_rate - self.cur_rate) * 0.5).min(self.high_rate),
                    window_bytes,
                );
                self.down_rate =
                    Self::per_window((self.cur_rate - self.low_rate) * 0.5, window_bytes);
            }
            UfccPhase::Steady => self.steady(tx, rtt, window_bytes),
            UfccPhase::Burst => {
                if rtt <= self.min_rtt + BURST_RTT {
                    // recovered: re-widen the bracket and restart probing
                    if self.low_rate >= self.high_rate * 0.8 {
                        self.high_rate = (tx.max_rate + self.high_rate) * 0.5;
                    } else {
                        self.high_rate = (self.low_rate + self.high_rate) * 0.5;
                    }
                    self.low_rate = (self.low_rate * 0.9).max(cfg.min_rate);
                    self.cur_rate = ((self.low_rate + self.high_rate) * 0.5)
                        .min(self.low_rate * 2.0);
                    self.up_rate = Self::per_window(
                        ((self.high_rate - self.cur_rate) * 0.5).min(self.high_rate),
                        window_bytes,
                    );
                    self.down_rate = Rate::ZERO;
                    self.low_flag = false;
                    self.high_flag = false;
                    self.state_count = 0;
                    self.phase = UfccPhase::Init;
                }
            }
            UfccPhase::Release | UfccPhase::Preempt => {}
        }

        self.last_rate = self.cur_rate;
        self.avg_rtt = (0.3 * self.avg_rtt as f64 + 0.7 * rtt as f64) as u64;
        self.last_update_seq = tx.snd_nxt;
        self.last_rtt = rtt;
    }
}

impl Congestion for Ufcc {
    fn on_ack(
        &mut self,
        tx: &mut Transport,
        fb: &Feedback<'_>,
        cfg: &Config,
        _sched: &mut dyn Scheduler,
    ) {
        let rtt = fb.rtt();
        if let Some(new_rate) = self.step(tx, fb.seq, rtt, cfg) {
            tx.change_rate(new_rate.max(cfg.min_rate).min(tx.max_rate));
        }
    }
}

/// The window-applying variant: identical transitions, but the resulting
/// rate becomes an on-the-fly cap of one base-RTT's worth of bytes.
pub struct UfccCwnd {
    pub inner: Ufcc,
}

impl UfccCwnd {
    pub fn new(min_rate: Rate, max_rate: Rate) -> UfccCwnd {
        UfccCwnd {
            inner: Ufcc::new(min_rate, max_rate),
        }
    }
}

impl Congestion for UfccCwnd {
    fn on_ack(
        &mut self,
        tx: &mut Transport,
        fb: &Feedback<'_>,
        cfg: &Config,
        _sched: &mut dyn Scheduler,
    ) {
        let rtt = fb.rtt();
        if let Some(new_rate) = self.inner.step(tx, fb.seq, rtt, cfg) {
            let clamped = new_rate.max(cfg.min_rate).min(tx.max_rate);
            tx.set_win(clamped.bdp_bytes(tx.base_rtt).max(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::EventQueue;
    use crate::time::{Duration, Instant};
    use crate::wire::IntHeader;

    fn fixture() -> (Config, Transport) {
        let cfg = Config {
            int: crate::wire::IntCodec::new(crate::wire::IntMode::Ts, 2, 1),
            ..Config::default()
        };
        let tx = Transport::new(
            10_000_000,
            0,
            false,
            Duration::from_micros(10),
            Rate::from_gbps(100),
        );
        (cfg, tx)
    }

    fn drive(alg: &mut dyn Congestion, tx: &mut Transport, cfg: &Config, seq: u64, rtt_ns: u64) {
        let now = Instant::from_millis(5);
        let int = IntHeader::Ts {
            ts: now.total_nanos() as u64 - rtt_ns,
        };
        let fb = Feedback {
            seq,
            cnp: false,
            int: &int,
            now,
        };
        let mut sched = EventQueue::new();
        alg.on_ack(tx, &fb, cfg, &mut sched);
    }

    #[test]
    fn first_sample_only_seeds() {
        let (cfg, mut tx) = fixture();
        let mut ufcc = Ufcc::new(cfg.min_rate, tx.max_rate);
        tx.snd_nxt = 50_000;
        drive(&mut ufcc, &mut tx, &cfg, 1_000, 20_000);
        assert_eq!(ufcc.min_rtt, 20_000);
        assert_eq!(ufcc.avg_rtt, 20_000);
        assert_eq!(ufcc.last_update_seq, 50_000);
        assert_eq!(tx.rate, Rate::from_gbps(100));
        assert_eq!(ufcc.phase, UfccPhase::Init);
    }

    #[test]
    fn burst_rtt_forces_the_burst_state() {
        let (cfg, mut tx) = fixture();
        let mut ufcc = Ufcc::new(cfg.min_rate, tx.max_rate);
        tx.snd_nxt = 50_000;
        drive(&mut ufcc, &mut tx, &cfg, 1_000, 20_000);
        // 30us > 20us + 6us: unconditional transition, rate floored
        drive(&mut ufcc, &mut tx, &cfg, 2_000, 30_000);
        assert_eq!(ufcc.phase, UfccPhase::Burst);
        assert_eq!(tx.rate, cfg.min_rate);
    }

    #[test]
    fn init_probes_up_on_improving_rtt() {
        let (cfg, mut tx) = fixture();
        let mut ufcc = Ufcc::new(cfg.min_rate, tx.max_rate);
        tx.snd_nxt = 50_000;
        drive(&mut ufcc, &mut tx, &cfg, 1_000, 20_000);
        ufcc.cur_rate = Rate::from_gbps(50);
        ufcc.up_rate = Rate::from_gbps(1);
        ufcc.down_rate = Rate::from_gbps(2);
        // improving RTT on the fast path: one up step, capped by the bracket
        drive(&mut ufcc, &mut tx, &cfg, 2_000, 19_000);
        assert_eq!(tx.rate, Rate::from_gbps(51));
        // worsening RTT steps down
        drive(&mut ufcc, &mut tx, &cfg, 3_000, 21_000);
        assert_eq!(tx.rate, Rate::from_gbps(49));
    }

    #[test]
    fn major_update_moves_the_bracket_and_recomputes_steps() {
        let (cfg, mut tx) = fixture();
        let mut ufcc = Ufcc::new(cfg.min_rate, tx.max_rate);
        tx.snd_nxt = 50_000;
        drive(&mut ufcc, &mut tx, &cfg, 1_000, 20_000);
        ufcc.cur_rate = Rate::from_gbps(50);
        ufcc.last_rate = Rate::from_gbps(50);
        ufcc.up_rate = Rate::from_gbps(1);
        ufcc.low_flag = true;
        ufcc.high_flag = true;
        tx.snd_nxt = 100_000;
        // full window elapsed, improving RTT: up-probe clears high_flag, the
        // surviving low_flag hoists low_rate to last_rate
        drive(&mut ufcc, &mut tx, &cfg, 60_000, 19_000);
        assert_eq!(ufcc.low_rate, Rate::from_gbps(50));
        assert_eq!(ufcc.high_rate, tx.max_rate);
        assert!(ufcc.low_flag && ufcc.high_flag);
        assert_eq!(ufcc.last_rate, ufcc.cur_rate);
        assert_eq!(ufcc.last_update_seq, 100_000);
        assert_eq!(ufcc.last_rtt, 19_000);
        assert!(ufcc.up_rate.bits_per_sec() > 0);
        assert!(ufcc.down_rate.bits_per_sec() > 0);
    }

    #[test]
    fn converged_bracket_enters_steady() {
        let (cfg, mut tx) = fixture();
        let mut ufcc = Ufcc::new(cfg.min_rate, tx.max_rate);
        tx.snd_nxt = 50_000;
        drive(&mut ufcc, &mut tx, &cfg, 1_000, 20_000);
        ufcc.low_rate = Rate::from_gbps(96);
        ufcc.high_rate = Rate::from_gbps(100);
        ufcc.cur_rate = Rate::from_gbps(98);
        ufcc.last_rate = Rate::from_gbps(98);
        tx.snd_nxt = 100_000;
        // avg_rtt is at min + 0: well under the steady threshold
        drive(&mut ufcc, &mut tx, &cfg, 60_000, 20_100);
        assert_eq!(ufcc.phase, UfccPhase::Steady);
    }

    #[test]
    fn burst_recovery_rewidens_and_returns_to_init() {
        let (cfg, mut tx) = fixture();
        let mut ufcc = Ufcc::new(cfg.min_rate, tx.max_rate);
        tx.snd_nxt = 50_000;
        drive(&mut ufcc, &mut tx, &cfg, 1_000, 20_000);
        ufcc.phase = UfccPhase::Burst;
        ufcc.low_rate = Rate::from_gbps(10);
        ufcc.high_rate = Rate::from_gbps(40);
        tx.snd_nxt = 100_000;
        // RTT back inside the burst threshold on a major boundary
        drive(&mut ufcc, &mut tx, &cfg, 60_000, 21_000);
        assert_eq!(ufcc.phase, UfccPhase::Init);
        // bracket narrowed toward low: (10+40)/2
        assert_eq!(ufcc.high_rate, Rate::from_gbps(25));
        assert_eq!(ufcc.low_rate, Rate::from_gbps(9));
        // midpoint capped by twice the low rate
        assert_eq!(tx.rate, Rate::from_gbps(17));
        assert_eq!(ufcc.down_rate, Rate::ZERO);
    }

    #[test]
    fn cwnd_variant_adjusts_the_window_not_the_rate() {
        let (cfg, mut tx) = fixture();
        let mut ufcc = UfccCwnd::new(cfg.min_rate, tx.max_rate);
        tx.snd_nxt = 50_000;
        drive(&mut ufcc, &mut tx, &cfg, 1_000, 20_000);
        let rate_before = tx.rate;
        drive(&mut ufcc, &mut tx, &cfg, 2_000, 30_000);
        assert_eq!(ufcc.inner.phase, UfccPhase::Burst);
        assert_eq!(tx.rate, rate_before);
        // min_rate over a 10us base RTT
        assert_eq!(tx.win, cfg.min_rate.bdp_bytes(tx.base_rtt).max(1));
    }
}
