/*! Swift: delay-targeted window control.

The ACK echoes the send timestamp, the receiver-side queueing delay, and
the hop count. The sender splits the RTT into fabric and endpoint parts and
derives a per-part target delay; the fabric target scales with the hop
count and, through flow scaling, with the inverse square root of the
window. The fractional window then moves toward whichever part is more
congested. Below one packet the window turns into a pacing interval.
*/

use crate::config::Config;
use crate::qp::Transport;
use crate::sim::Scheduler;
use crate::time::{Duration, Instant};
use crate::wire::IntHeader;

use super::{Congestion, Feedback};

pub struct Swift {
    /// Fractional congestion window in bytes.
    pub cwnd: f64,
    /// Most recent multiplicative decrease, for the once-per-RTT guard.
    pub t_last_decrease: Instant,
    pub retransmit_cnt: u16,
}

impl Swift {
    pub fn new(initial_cwnd: f64) -> Swift {
        Swift {
            cwnd: initial_cwnd,
            t_last_decrease: Instant::ZERO,
            retransmit_cnt: 0,
        }
    }

    /// Fabric target delay: base plus per-hop scaling plus the flow-scaling
    /// term `clamp(α·cwnd^-1/2 + β, 0, fs_range)`.
    fn target_fabric_delay(&self, cfg: &Config, nhop: u64) -> f64 {
        let fs = &cfg.swift;
        let alpha = fs.fs_range / (fs.fs_min_cwnd.powf(-0.5) - fs.fs_max_cwnd.powf(-0.5));
        let beta = -alpha / fs.fs_max_cwnd.sqrt();
        cfg.swift.base_target.total_nanos() as f64
            + nhop as f64 * fs.hop_scale
            + (alpha * self.cwnd.powf(-0.5) + beta).clamp(0.0, fs.fs_range)
    }

    /// One AIMD step of the window against a delay target.
    fn step_cwnd(&self, cfg: &Config, target: f64, curr: f64, can_decrease: bool) -> f64 {
        let cwnd = self.cwnd;
        let mtu = cfg.mtu as f64;
        let ai = cfg.swift.ai as f64;
        if curr < target {
            if cwnd >= 1.0 {
                cwnd + ai * (mtu / cwnd)
            } else {
                cwnd + ai * mtu
            }
        } else if can_decrease {
            let factor = (1.0 - cfg.swift.beta * (curr - target) / curr).max(1.0 - cfg.swift.max_mdf);
            factor * cwnd
        } else {
            cwnd
        }
    }
}

impl Congestion for Swift {
    fn on_ack(
        &mut self,
        tx: &mut Transport,
        fb: &Feedback<'_>,
        cfg: &Config,
        _sched: &mut dyn Scheduler,
    ) {
        let IntHeader::Swift {
            remote_delay,
            ts,
            nhop,
        } = *fb.int
        else {
            return;
        };
        let rtt = (fb.now.total_nanos() as u64).saturating_sub(ts);
        let fabric_delay = rtt.saturating_sub(remote_delay);

        self.retransmit_cnt = 0;
        // decreases are limited to once per round trip: only an ACK for a
        // packet sent after the last decrease may shrink the window again
        let can_decrease = ts > self.t_last_decrease.total_nanos() as u64;

        let target_fab = self.target_fabric_delay(cfg, nhop);
        let fab_cwnd = self.step_cwnd(cfg, target_fab, fabric_delay as f64, can_decrease);
        let endpoint_cwnd = self.step_cwnd(
            cfg,
            cfg.swift.target_endpoint_delay.total_nanos() as f64,
            remote_delay as f64,
            can_decrease,
        );
        let cwnd = fab_cwnd
            .min(endpoint_cwnd)
            .clamp(cfg.swift.min_cwnd, cfg.swift.max_cwnd);

        if cwnd < tx.win as f64 {
            self.t_last_decrease = fb.now;
        }
        if cwnd < 1.0 {
            // pacing-bound: open the window and space packets by rtt/cwnd
            tx.pacing_delay = Duration::from_nanos((rtt as f64 / cwnd) as u64);
            tx.set_win(u32::MAX as u64);
        } else {
            tx.pacing_delay = Duration::ZERO;
            tx.set_win(cwnd as u64);
        }
        self.cwnd = cwnd;
    }
}
