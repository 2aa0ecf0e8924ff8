/*! RTT-QCN and PowerQCN: window control on sender-side probabilistic marks.

No switch support needed beyond the echoed timestamp: the sender draws its
own "ECN" marks with a probability that ramps linearly between an RTT floor
and ceiling, then nudges a fractional window. PowerQCN layers a second draw
on the RTT gradient and uses it to pick more or less aggressive step sizes.
*/

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::Config;
use crate::qp::Transport;
use crate::sim::Scheduler;

use super::{Congestion, Feedback};

/// Linear-ramp Bernoulli: certain above `t_max`, never below `t_min`.
fn ramp_mark(rng: &mut StdRng, value: f64, t_min: f64, t_max: f64) -> bool {
    if value <= t_min {
        false
    } else if value <= t_max {
        let thresh = (value - t_min) * 1000.0 / (t_max - t_min);
        (rng.gen_range(0..1000) as f64) < thresh
    } else {
        true
    }
}

/// Shared window update. Below one MTU the window moves multiplicatively
/// down and additively up; above it, by the configured per-ACK steps.
fn update_win(cfg: &Config, cwnd: f64, marked: bool, dec_step: f64, inc_step: f64) -> f64 {
    let mtu = cfg.mtu as f64;
    if cwnd < mtu {
        if marked {
            cwnd * (1.0 - cfg.qcn.beta)
        } else {
            cwnd + cfg.qcn.alpha * mtu
        }
    } else if marked {
        cwnd - dec_step * mtu
    } else {
        cwnd + mtu * inc_step / cwnd
    }
}

pub struct RttQcn {
    /// Fractional window in bytes.
    pub cwnd: f64,
    rng: StdRng,
}

impl RttQcn {
    pub fn new(initial_cwnd: f64, seed: u64) -> RttQcn {
        RttQcn {
            cwnd: initial_cwnd,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Congestion for RttQcn {
    fn on_ack(
        &mut self,
        tx: &mut Transport,
        fb: &Feedback<'_>,
        cfg: &Config,
        _sched: &mut dyn Scheduler,
    ) {
        let rtt = fb.rtt() as f64;
        let marked = ramp_mark(
            &mut self.rng,
            rtt,
            cfg.qcn.t_min.total_nanos() as f64,
            cfg.qcn.t_max.total_nanos() as f64,
        );
        self.cwnd = update_win(cfg, self.cwnd, marked, 0.5, 10.0).max(1.0);
        tx.set_win(self.cwnd as u64);
    }
}

pub struct PowerQcn {
    pub cwnd: f64,
    /// Previous RTT sample for the gradient.
    pub prev_rtt: u64,
    /// Time of the last gradient refresh.
    pub last_update: u64,
    rng: StdRng,
}

impl PowerQcn {
    pub fn new(initial_cwnd: f64, seed: u64) -> PowerQcn {
        PowerQcn {
            cwnd: initial_cwnd,
            prev_rtt: 0,
            last_update: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Congestion for PowerQcn {
    fn on_ack(
        &mut self,
        tx: &mut Transport,
        fb: &Feedback<'_>,
        cfg: &Config,
        _sched: &mut dyn Scheduler,
    ) {
        let rtt = fb.rtt();
        let prev_rtt = if self.prev_rtt == 0 { rtt } else { self.prev_rtt };
        if self.prev_rtt < fb.int.ts() {
            self.prev_rtt = rtt;
            self.last_update = fb.now.total_nanos() as u64;
        }
        let gradient = (rtt as i64 - prev_rtt as i64) as f64 / cfg.qcn.t_min.total_nanos() as f64;

        let rtt_marked = ramp_mark(
            &mut self.rng,
            rtt as f64,
            cfg.qcn.t_min.total_nanos() as f64,
            cfg.qcn.t_max.total_nanos() as f64,
        );
        let grad_marked = ramp_mark(&mut self.rng, gradient, cfg.qcn.grad_min, cfg.qcn.grad_max);

        // the gradient modulates how hard each direction steps
        let dec_step = if grad_marked { 0.7 } else { 0.5 };
        let inc_step = if grad_marked { 8.0 } else { 20.0 };
        self.cwnd = update_win(cfg, self.cwnd, rtt_marked, dec_step, inc_step).max(1.0);
        tx.set_win(self.cwnd as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qp::Transport;
    use crate::rate::Rate;
    use crate::sim::EventQueue;
    use crate::time::{Duration, Instant};
    use crate::wire::{IntCodec, IntHeader, IntMode};

    fn fixture(cwnd: f64) -> (Config, Transport) {
        let cfg = Config {
            int: IntCodec::new(IntMode::Ts, 2, 1),
            ..Config::default()
        };
        let tx = Transport::new(
            10_000_000,
            cwnd as u64,
            false,
            Duration::from_micros(10),
            Rate::from_gbps(100),
        );
        (cfg, tx)
    }

    fn drive(alg: &mut dyn Congestion, tx: &mut Transport, cfg: &Config, rtt_ns: u64) {
        let now = Instant::from_millis(5);
        let int = IntHeader::Ts {
            ts: now.total_nanos() as u64 - rtt_ns,
        };
        let fb = Feedback {
            seq: 1,
            cnp: false,
            int: &int,
            now,
        };
        let mut sched = EventQueue::new();
        alg.on_ack(tx, &fb, cfg, &mut sched);
    }

    #[test]
    fn short_rtt_never_marks_long_rtt_always_marks() {
        let (cfg, mut tx) = fixture(4_000.0);
        let mut qcn = RttQcn::new(4_000.0, 1);
        // rtt below t_min (3000ns): additive increase, never a cut
        drive(&mut qcn, &mut tx, &cfg, 1_000);
        assert_eq!(qcn.cwnd, 4_000.0 + 1000.0 * 10.0 / 4_000.0);
        // rtt above t_max (5000ns): always a cut of half an MTU
        let before = qcn.cwnd;
        drive(&mut qcn, &mut tx, &cfg, 9_000);
        assert_eq!(qcn.cwnd, before - 500.0);
        assert_eq!(tx.win, qcn.cwnd as u64);
    }

    #[test]
    fn sub_mtu_window_uses_the_small_regime() {
        let (cfg, mut tx) = fixture(400.0);
        let mut qcn = RttQcn::new(400.0, 1);
        drive(&mut qcn, &mut tx, &cfg, 1_000);
        assert_eq!(qcn.cwnd, 400.0 + cfg.qcn.alpha * 1000.0);
        let before = qcn.cwnd;
        drive(&mut qcn, &mut tx, &cfg, 9_000);
        assert_eq!(qcn.cwnd, before * (1.0 - cfg.qcn.beta));
    }

    #[test]
    fn window_never_collapses_below_one() {
        let (cfg, mut tx) = fixture(2.0);
        let mut qcn = RttQcn::new(2.0, 1);
        for _ in 0..50 {
            drive(&mut qcn, &mut tx, &cfg, 50_000);
        }
        assert!(qcn.cwnd >= 1.0);
        assert!(tx.win >= 1);
    }

    #[test]
    fn powerqcn_gradient_picks_the_step_sizes() {
        let (cfg, mut tx) = fixture(4_000.0);
        let mut qcn = PowerQcn::new(4_000.0, 1);
        // steady short RTT: gradient 0, below grad_max ramp start? grad 0 is
        // inside (-0.2, 0.6) but the rtt mark is off, so the window grows
        drive(&mut qcn, &mut tx, &cfg, 1_000);
        assert!(qcn.cwnd > 4_000.0);

        // a huge RTT with a strongly positive gradient: both marks certain,
        // cut by 0.7 MTU
        qcn.prev_rtt = 1_000;
        let before = qcn.cwnd;
        drive(&mut qcn, &mut tx, &cfg, 50_000);
        assert_eq!(qcn.cwnd, before - 0.7 * 1000.0);
    }

    #[test]
    fn powerqcn_negative_gradient_steps_gently() {
        let (cfg, mut tx) = fixture(4_000.0);
        let mut qcn = PowerQcn::new(4_000.0, 1);
        // falling RTT: gradient far below grad_min, no gradient mark;
        // short RTT: no rtt mark; increase uses the 20x step
        qcn.prev_rtt = 2_900_000;
        let before = qcn.cwnd;
        drive(&mut qcn, &mut tx, &cfg, 1_000);
        assert_eq!(qcn.cwnd, before + 1000.0 * 20.0 / before);
    }
}
