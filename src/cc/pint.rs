/*! HPCC over PINT: probabilistic, 1-2 byte telemetry.

Instead of full per-hop records, the switch stamps a log-quantised
utilization power into one or two bytes. The sender decodes it back into a
utilization estimate and runs the single-rate HPCC control law on it,
processing only a sampled subset of ACKs.
*/

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::Config;
use crate::qp::Transport;
use crate::rate::Rate;
use crate::sim::Scheduler;

use super::{Congestion, Feedback};

/// Encode a utilization into a PINT power: `round(log_base(u))`, biased so
/// one sits mid-range, clamped into the byte width.
pub fn encode_u(u: f64, log_base: f64, pint_bytes: u8) -> u16 {
    let (bias, max) = bias_and_max(pint_bytes);
    if u <= 0.0 {
        return 0;
    }
    let power = (u.ln() / log_base.ln()).round() as i64 + bias;
    power.clamp(0, max) as u16
}

/// Invert [encode_u] up to one quantisation step.
pub fn decode_u(power: u16, log_base: f64, pint_bytes: u8) -> f64 {
    let (bias, _) = bias_and_max(pint_bytes);
    log_base.powi((power as i64 - bias) as i32)
}

fn bias_and_max(pint_bytes: u8) -> (i64, i64) {
    if pint_bytes == 1 {
        (127, u8::MAX as i64)
    } else {
        (32_767, u16::MAX as i64)
    }
}

pub struct HpccPint {
    pub last_update_seq: u64,
    pub cur_rate: Rate,
    pub inc_stage: u32,
    rng: StdRng,
}

impl HpccPint {
    pub fn new(max_rate: Rate, seed: u64) -> HpccPint {
        HpccPint {
            last_update_seq: 0,
            cur_rate: max_rate,
            inc_stage: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn update(&mut self, tx: &mut Transport, fb: &Feedback<'_>, cfg: &Config, fast_react: bool) {
        let next_seq = tx.snd_nxt;
        if self.last_update_seq == 0 {
            self.last_update_seq = next_seq;
            return;
        }

        let u = decode_u(fb.int.power(), cfg.pint.log_base, cfg.int.pint_bytes());
        let max_c = u / cfg.hpcc.target_util;
        let (new_rate, new_inc) = if max_c >= 1.0 || self.inc_stage >= cfg.hpcc.mi_thresh {
            (self.cur_rate / max_c + cfg.rai, 0)
        } else {
            (self.cur_rate + cfg.rai, self.inc_stage + 1)
        };
        let new_rate = new_rate.max(cfg.min_rate).min(tx.max_rate);
        tx.change_rate(new_rate);
        if !fast_react {
            self.cur_rate = new_rate;
            self.inc_stage = new_inc;
            if next_seq > self.last_update_seq {
                self.last_update_seq = next_seq;
            }
        }
    }
}

impl Congestion for HpccPint {
    fn on_ack(
        &mut self,
        tx: &mut Transport,
        fb: &Feedback<'_>,
        cfg: &Config,
        _sched: &mut dyn Scheduler,
    ) {
        // process each ACK with probability smpl_thresh / 65536
        if self.rng.gen_range(0..65536u32) >= cfg.pint.smpl_thresh {
            return;
        }
        if fb.seq > self.last_update_seq {
            self.update(tx, fb, cfg, false);
        } else {
            self.update(tx, fb, cfg, true);
        }
    }
}
