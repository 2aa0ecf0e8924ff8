/*! TIMELY and its patched variant.

Delay-based: the data packet carries a send timestamp, the ACK echoes it,
and the sender steers on the RTT and its gradient. Classic TIMELY uses the
additive-increase / gradient-scaled-decrease ladder; the patched variant
blends increase and decrease continuously through a gradient-derived weight
against an RTT setpoint.
*/

use crate::config::Config;
use crate::qp::Transport;
use crate::rate::Rate;
use crate::sim::Scheduler;

use super::{Congestion, Feedback};

/// Increase stages spent at `rai` before switching to `rhai`-sized steps.
const HAI_AFTER_STAGES: u32 = 5;

pub struct Timely {
    pub last_update_seq: u64,
    pub cur_rate: Rate,
    pub inc_stage: u32,
    pub last_rtt: u64,
    pub rtt_diff: f64,
}

impl Timely {
    pub fn new(max_rate: Rate) -> Timely {
        Timely {
            last_update_seq: 0,
            cur_rate: max_rate,
            inc_stage: 0,
            last_rtt: 0,
            rtt_diff: 0.0,
        }
    }

    fn update(&mut self, tx: &mut Transport, fb: &Feedback<'_>, cfg: &Config) {
        let next_seq = tx.snd_nxt;
        let rtt = fb.rtt();
        if self.last_update_seq != 0 {
            let new_rtt_diff = rtt as i64 - self.last_rtt as i64;
            let rtt_diff =
                (1.0 - cfg.timely.alpha) * self.rtt_diff + cfg.timely.alpha * new_rtt_diff as f64;
            let gradient = rtt_diff / cfg.timely.min_rtt.total_nanos() as f64;

            let t_low = cfg.timely.t_low.total_nanos();
            let t_high = cfg.timely.t_high.total_nanos();
            let (inc, c) = if rtt < t_low {
                (true, 0.0)
            } else if rtt > t_high {
                (false, 1.0 - cfg.timely.beta * (1.0 - t_high as f64 / rtt as f64))
            } else if gradient <= 0.0 {
                (true, 0.0)
            } else {
                (false, (1.0 - cfg.timely.beta * gradient).max(0.0))
            };

            if inc {
                let step = if self.inc_stage < HAI_AFTER_STAGES {
                    cfg.rai
                } else {
                    cfg.rhai
                };
                let new_rate = (self.cur_rate + step).min(tx.max_rate);
                tx.change_rate(new_rate);
                self.cur_rate = new_rate;
                self.inc_stage += 1;
            } else {
                let new_rate = (self.cur_rate * c).max(cfg.min_rate);
                tx.change_rate(new_rate);
                self.cur_rate = new_rate;
                self.inc_stage = 0;
            }
            self.rtt_diff = rtt_diff;
        }
        if next_seq > self.last_update_seq {
            self.last_update_seq = next_seq;
            self.last_rtt = rtt;
        }
    }
}

impl Congestion for Timely {
    fn on_ack(
        &mut self,
        tx: &mut Transport,
        fb: &Feedback<'_>,
        cfg: &Config,
        _sched: &mut dyn Scheduler,
    ) {
        // only full-RTT feedback moves TIMELY; there is no fast react
        if fb.seq > self.last_update_seq {
            self.update(tx, fb, cfg);
        }
    }
}

pub struct PatchedTimely {
    pub last_update_seq: u64,
    pub cur_rate: Rate,
    pub last_rtt: u64,
    pub rtt_diff: f64,
}

impl PatchedTimely {
    pub fn new(max_rate: Rate) -> PatchedTimely {
        PatchedTimely {
            last_update_seq: 0,
            cur_rate: max_rate,
            last_rtt: 0,
            rtt_diff: 0.0,
        }
    }

    fn update(&mut self, tx: &mut Transport, fb: &Feedback<'_>, cfg: &Config) {
        let next_seq = tx.snd_nxt;
        let rtt = fb.rtt();
        if self.last_update_seq != 0 {
            let new_rtt_diff = rtt as i64 - self.last_rtt as i64;
            self.last_rtt = rtt;
            let rtt_diff =
                (1.0 - cfg.timely.alpha) * self.rtt_diff + cfg.timely.alpha * new_rtt_diff as f64;
            let gradient = rtt_diff / cfg.timely.min_rtt.total_nanos() as f64;

            let t_low = cfg.timely.t_low.total_nanos();
            let t_high = cfg.timely.t_high.total_nanos();
            let new_rate = if rtt < t_low {
                self.cur_rate + cfg.rai
            } else if rtt > t_high {
                self.cur_rate * (1.0 - cfg.timely.beta * (1.0 - t_high as f64 / rtt as f64))
            } else {
                // blend an additive step and a setpoint correction by the
                // gradient-derived weight
                let weight = ((gradient + 0.25) / 0.5).clamp(0.0, 1.0);
                let rtt_ref = cfg.timely.patched_rtt_ref.total_nanos() as f64;
                let error = (rtt as f64 - rtt_ref) / rtt_ref;
                cfg.rai * (1.0 - weight)
                    + self.cur_rate * (1.0 - cfg.timely.patched_beta * error * weight)
            };
            let new_rate = new_rate.max(cfg.min_rate).min(tx.max_rate);
            self.cur_rate = new_rate;
            tx.change_rate(new_rate);
            self.rtt_diff = rtt_diff;
        }
        if next_seq > self.last_update_seq {
            self.last_update_seq = next_seq;
            self.last_rtt = rtt;
        }
    }
}

impl Congestion for PatchedTimely {
    fn on_ack(
        &mut self,
        tx: &mut Transport,
        fb: &Feedback<'_>,
        cfg: &Config,
        _sched: &mut dyn Scheduler,
    ) {
        if fb.seq > self.last_update_seq {
            self.update(tx, fb, cfg);
        }
    }
}
