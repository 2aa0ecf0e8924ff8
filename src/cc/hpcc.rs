/*! High-precision CC and its PowerTCP descendants.

Both read per-hop telemetry. HPCC derives each hop's utilization from the
transmitted-byte delta and the queue backlog and steers toward a target
utilization with per-RTT multiplicative correction and per-ACK fast
reaction. PowerTCP replaces the utilization estimate with a power term,
built from INT state or, in the theta (delay) variant, from locally
measured RTT samples, and blends the corrected rate with the previous one.
*/

use std::collections::BTreeMap;

use crate::config::Config;
use crate::qp::Transport;
use crate::rate::Rate;
use crate::sim::Scheduler;
use crate::time::{Duration, Instant};
use crate::wire::{IntHeader, IntHop, INT_MAX_HOP};

use super::{Congestion, Feedback};

/// Per-hop reference state for multi-rate HPCC.
#[derive(Debug, Clone, Copy)]
pub struct HopState {
    pub u: f64,
    pub rc: Rate,
    pub inc_stage: u32,
}

pub struct Hpcc {
    /// Sequence that closes the current update window.
    pub last_update_seq: u64,
    /// Reference rate carried between full updates.
    pub cur_rate: Rate,
    /// Consecutive additive increases.
    pub inc_stage: u32,
    /// Smoothed utilization (single-rate mode).
    pub u: f64,
    /// Last seen telemetry, per hop.
    hop: [IntHop; INT_MAX_HOP],
    hop_state: [HopState; INT_MAX_HOP],
}

impl Hpcc {
    pub fn new(max_rate: Rate) -> Hpcc {
        Hpcc {
            last_update_seq: 0,
            cur_rate: max_rate,
            inc_stage: 0,
            u: 1.0,
            hop: [IntHop::default(); INT_MAX_HOP],
            hop_state: [HopState {
                u: 1.0,
                rc: max_rate,
                inc_stage: 0,
            }; INT_MAX_HOP],
        }
    }

    fn clamp(rate: Rate, tx: &Transport, cfg: &Config) -> Rate {
        rate.max(cfg.min_rate).min(tx.max_rate)
    }

    fn update(&mut self, tx: &mut Transport, fb: &Feedback<'_>, cfg: &Config, fast_react: bool) {
        let next_seq = tx.snd_nxt;
        let multi = cfg.int.multi();

        if self.last_update_seq == 0 {
            // first RTT: remember the telemetry baseline
            if let IntHeader::Normal { hops, nhop } = *fb.int {
                let n = (nhop as usize).min(INT_MAX_HOP);
                self.hop[..n].copy_from_slice(&hops[..n]);
            }
            self.last_update_seq = next_seq;
            return;
        }

        let IntHeader::Normal { hops, nhop } = *fb.int else {
            return;
        };
        let nhop = (nhop as usize).min(INT_MAX_HOP);
        let base = tx.base_rtt.total_nanos();

        let mut updated = [false; INT_MAX_HOP];
        let mut updated_any = false;
        let mut max_u = 0.0f64;
        let mut dt = 0u64;
        for i in 0..nhop {
            if cfg.hpcc.sample_feedback && hops[i].qlen(multi) == 0 && fast_react {
                continue;
            }
            updated[i] = true;
            updated_any = true;

            let tau = hops[i].time_delta(&self.hop[i]);
            let duration = tau.max(1) as f64 * 1e-9;
            let tx_rate = hops[i].bytes_delta(&self.hop[i], multi) as f64 * 8.0 / duration;
            let line_rate = hops[i].line_rate() as f64;
            let qterm = if tx.win > 0 {
                hops[i].qlen(multi).min(self.hop[i].qlen(multi)) as f64
                    * tx.max_rate.bits_per_sec() as f64
                    / (line_rate * tx.win as f64)
            } else {
                0.0
            };
            let u = tx_rate / line_rate + qterm;

            if !cfg.hpcc.multi_rate {
                if u > max_u {
                    max_u = u;
                    dt = tau;
                }
            } else {
                let tau = tau.min(base);
                self.hop_state[i].u =
                    (self.hop_state[i].u * (base - tau) as f64 + u * tau as f64) / base as f64;
            }
            self.hop[i] = hops[i];
        }

        let mut new_rate = self.cur_rate;
        let mut new_inc = self.inc_stage;
        let mut per_hop_rate = [tx.max_rate; INT_MAX_HOP];
        let mut per_hop_inc = [0u32; INT_MAX_HOP];
        if !cfg.hpcc.multi_rate {
            if updated_any {
                let dt = dt.min(base);
                self.u = (self.u * (base - dt) as f64 + max_u * dt as f64) / base as f64;
                let max_c = self.u / cfg.hpcc.target_util;
                if max_c >= 1.0 || self.inc_stage >= cfg.hpcc.mi_thresh {
                    new_rate = self.cur_rate / max_c + cfg.rai;
                    new_inc = 0;
                } else {
                    new_rate = self.cur_rate + cfg.rai;
                    new_inc = self.inc_stage + 1;
                }
                new_rate = Self::clamp(new_rate, tx, cfg);
            }
        } else {
            // the chosen rate is the minimum over all hops' references
            new_rate = tx.max_rate;
            for i in 0..nhop {
                if updated[i] {
                    let c = self.hop_state[i].u / cfg.hpcc.target_util;
                    if c >= 1.0 || self.hop_state[i].inc_stage >= cfg.hpcc.mi_thresh {
                        per_hop_rate[i] = self.hop_state[i].rc / c + cfg.rai;
                        per_hop_inc[i] = 0;
                    } else {
                        per_hop_rate[i] = self.hop_state[i].rc + cfg.rai;
                        per_hop_inc[i] = self.hop_state[i].inc_stage + 1;
                    }
                    per_hop_rate[i] = Self::clamp(per_hop_rate[i], tx, cfg);
                    if per_hop_rate[i] < new_rate {
                        new_rate = per_hop_rate[i];
                    }
                } else if self.hop_state[i].rc < new_rate {
                    new_rate = self.hop_state[i].rc;
                }
            }
        }

        if updated_any {
            tx.change_rate(new_rate);
        }
        if !fast_react {
            if updated_any {
                self.cur_rate = new_rate;
                if !cfg.hpcc.multi_rate {
                    self.inc_stage = new_inc;
                }
            }
            if cfg.hpcc.multi_rate {
                for i in 0..nhop {
                    if updated[i] {
                        self.hop_state[i].rc = per_hop_rate[i];
                        self.hop_state[i].inc_stage = per_hop_inc[i];
                    }
                }
            }
            if next_seq > self.last_update_seq {
                self.last_update_seq = next_seq;
            }
        }
    }
}

impl Congestion for Hpcc {
    fn on_ack(
        &mut self,
        tx: &mut Transport,
        fb: &Feedback<'_>,
        cfg: &Config,
        _sched: &mut dyn Scheduler,
    ) {
        if fb.seq > self.last_update_seq {
            // a full RTT of feedback is in: do a persistent update
            self.update(tx, fb, cfg, false);
        } else if cfg.fast_react {
            self.update(tx, fb, cfg, true);
        }
    }
}

const POWER_ADD: Rate = Rate::from_mbps(150);

pub struct PowerTcp {
    /// theta-PowerTCP: derive power from local RTT samples instead of INT.
    delay_mode: bool,
    pub last_update_seq: u64,
    pub cur_rate: Rate,
    pub u: f64,
    hop: [IntHop; INT_MAX_HOP],
    prev_rtt: f64,
    prev_completion: f64,
    /// Send timestamps by post-increment sequence, consumed on ACK.
    sent_at: BTreeMap<u64, Instant>,
}

impl PowerTcp {
    pub fn new(max_rate: Rate, delay_mode: bool) -> PowerTcp {
        PowerTcp {
            delay_mode,
            last_update_seq: 0,
            cur_rate: max_rate,
            u: 1.0,
            hop: [IntHop::default(); INT_MAX_HOP],
            prev_rtt: 0.0,
            prev_completion: 0.0,
            sent_at: BTreeMap::new(),
        }
    }

    fn update(&mut self, tx: &mut Transport, fb: &Feedback<'_>, cfg: &Config, fast_react: bool) {
        let next_seq = tx.snd_nxt;
        let multi = cfg.int.multi();
        let now_ns = fb.now.total_nanos() as f64;

        let mut rtt_sample = tx.base_rtt.total_nanos() as f64;
        let completion_sample = now_ns;
        if let Some(sent) = self.sent_at.remove(&fb.seq) {
            rtt_sample = now_ns - sent.total_nanos() as f64;
            if self.delay_mode {
                let rtt = Duration::from_nanos(rtt_sample.max(0.0) as u64);
                if rtt < tx.base_rtt {
                    tx.base_rtt = rtt;
                }
            }
            // earlier unconsumed timestamps are dead: cumulative ACK
            self.sent_at = self.sent_at.split_off(&fb.seq);
        }

        if self.last_update_seq == 0 && !self.delay_mode {
            self.prev_rtt = rtt_sample;
            self.prev_completion = now_ns;
            self.last_update_seq = next_seq;
            if let IntHeader::Normal { hops, nhop } = *fb.int {
                let n = (nhop as usize).min(INT_MAX_HOP);
                self.hop[..n].copy_from_slice(&hops[..n]);
            }
            return;
        }

        let IntHeader::Normal { hops, nhop } = *fb.int else {
            return;
        };
        let nhop = (nhop as usize).min(INT_MAX_HOP);
        let base = tx.base_rtt.total_nanos();
        let base_sec = base as f64 * 1e-9;

        let mut updated_any = false;
        let mut max_u = 0.0f64;
        let mut dt = 0u64;
        for i in 0..nhop {
            if cfg.hpcc.sample_feedback && hops[i].qlen(multi) == 0 && fast_react {
                continue;
            }
            updated_any = true;

            let tau = hops[i].time_delta(&self.hop[i]);
            let duration = tau.max(1) as f64 * 1e-9;
            let rx_rate = hops[i].bytes_delta(&self.hop[i], multi) as f64 * 8.0 / duration;
            let line_rate = hops[i].line_rate() as f64;

            let u = if !self.delay_mode {
                let power = rx_rate * (hops[i].qlen(multi) as f64 * 8.0 + line_rate * base_sec);
                power / (line_rate * (line_rate * base_sec))
            } else {
                let slope =
                    (rtt_sample - self.prev_rtt) / (completion_sample - self.prev_completion) + 1.0;
                let power = slope.max(0.5) * rtt_sample;
                power / (1.05 * base as f64)
            };
            if u > max_u {
                max_u = u;
                dt = if self.delay_mode {
                    (completion_sample - self.prev_completion).max(0.0) as u64
                } else {
                    tau
                };
            }
            self.hop[i] = hops[i];
        }

        if updated_any {
            let dt = dt.min(base);
            if max_u < 0.0 {
                max_u = self.u;
            }
            self.u = (self.u * (base - dt) as f64 + max_u * dt as f64) / base as f64;
            let new_rate = if !self.delay_mode {
                let max_c = self.u / cfg.hpcc.target_util;
                (self.cur_rate / max_c + POWER_ADD) * 0.9 + self.cur_rate * 0.1
            } else {
                (self.cur_rate / self.u + POWER_ADD) * 0.7 + self.cur_rate * 0.3
            };
            let new_rate = new_rate.max(cfg.min_rate).min(tx.max_rate);
            self.prev_rtt = rtt_sample;
            self.prev_completion = now_ns;
            tx.change_rate(new_rate);
            if !fast_react {
                self.cur_rate = new_rate;
            }
        } else {
            self.prev_rtt = rtt_sample;
            self.prev_completion = now_ns;
        }
        if !fast_react && next_seq > self.last_update_seq {
            self.last_update_seq = next_seq;
        }
    }
}

impl Congestion for PowerTcp {
    fn on_ack(
        &mut self,
        tx: &mut Transport,
        fb: &Feedback<'_>,
        cfg: &Config,
        _sched: &mut dyn Scheduler,
    ) {
        if fb.seq > self.last_update_seq {
            self.update(tx, fb, cfg, false);
        } else if cfg.fast_react {
            self.update(tx, fb, cfg, true);
        }
    }

    fn on_pkt_sent(&mut self, seq: u64, now: Instant) {
        self.sent_at.insert(seq, now);
    }
}
