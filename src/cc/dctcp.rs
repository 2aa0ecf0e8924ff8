/*! DCTCP, rate-based rendition.

The receiver echoes ECN marks per ACK; the sender counts them per batch
(one batch ≈ one RTT of packets), folds the marked fraction into `alpha`,
and on a fresh mark outside congestion-window-reduced state cuts the rate
by `alpha/2`. Each new batch in normal state earns one additive increase.
*/

use crate::config::Config;
use crate::qp::Transport;
use crate::sim::Scheduler;

use super::{Congestion, Feedback};

const CA_NORMAL: u32 = 0;
const CA_CWR: u32 = 1;

pub struct Dctcp {
    pub last_update_seq: u64,
    /// Congestion-avoidance state: normal or CWR.
    pub ca_state: u32,
    /// Sequence that must be acknowledged to leave CWR.
    pub high_seq: u64,
    /// EWMA of the marked fraction.
    pub alpha: f64,
    /// Marks seen in the current batch.
    pub ecn_cnt: u32,
    /// Packets per batch, re-measured every batch.
    pub batch_size: u32,
}

impl Dctcp {
    pub fn new() -> Dctcp {
        Dctcp {
            last_update_seq: 0,
            ca_state: CA_NORMAL,
            high_seq: 0,
            alpha: 1.0,
            ecn_cnt: 0,
            batch_size: 1,
        }
    }
}

impl Congestion for Dctcp {
    fn on_ack(
        &mut self,
        tx: &mut Transport,
        fb: &Feedback<'_>,
        cfg: &Config,
        _sched: &mut dyn Scheduler,
    ) {
        let mut new_batch = false;
        self.ecn_cnt += fb.cnp as u32;

        if fb.seq > self.last_update_seq {
            new_batch = true;
            if self.last_update_seq == 0 {
                // first RTT: only size the batch
                self.last_update_seq = tx.snd_nxt;
                self.batch_size = (tx.snd_nxt / cfg.mtu as u64) as u32 + 1;
            } else {
                let frac = (self.ecn_cnt as f64 / self.batch_size as f64).min(1.0);
                self.alpha = (1.0 - cfg.ewma_gain) * self.alpha + cfg.ewma_gain * frac;
                self.last_update_seq = tx.snd_nxt;
                self.ecn_cnt = 0;
                self.batch_size = ((tx.snd_nxt - fb.seq) / cfg.mtu as u64) as u32 + 1;
            }
        }

        if self.ca_state == CA_CWR && fb.seq > self.high_seq {
            self.ca_state = CA_NORMAL;
        }

        if fb.cnp && self.ca_state == CA_NORMAL {
            let new_rate = (tx.rate * (1.0 - self.alpha / 2.0)).max(cfg.min_rate);
            tx.change_rate(new_rate);
            self.ca_state = CA_CWR;
            self.high_seq = tx.snd_nxt;
        }

        if self.ca_state == CA_NORMAL && new_batch {
            let new_rate = (tx.rate + cfg.dctcp.rai).min(tx.max_rate);
            tx.change_rate(new_rate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qp::Transport;
    use crate::rate::Rate;
    use crate::sim::EventQueue;
    use crate::time::{Duration, Instant};
    use crate::wire::IntHeader;

    fn fixture() -> (Config, Transport, Dctcp, EventQueue) {
        let cfg = Config::default();
        let tx = Transport::new(
            10_000_000,
            0,
            false,
            Duration::from_micros(8),
            Rate::from_gbps(100),
        );
        (cfg, tx, Dctcp::new(), EventQueue::new())
    }

    fn ack(alg: &mut Dctcp, tx: &mut Transport, cfg: &Config, seq: u64, cnp: bool) {
        let int = IntHeader::None;
        let fb = Feedback {
            seq,
            cnp,
            int: &int,
            now: Instant::ZERO,
        };
        let mut sched = EventQueue::new();
        alg.on_ack(tx, &fb, cfg, &mut sched);
    }

    #[test]
    fn alpha_follows_the_marked_fraction() {
        let (cfg, mut tx, mut dctcp, _) = fixture();
        // batch 1: 100 packets outstanding
        tx.snd_nxt = 100_000;
        ack(&mut dctcp, &mut tx, &cfg, 1_000, false);
        assert_eq!(dctcp.batch_size, 101);
        let alpha_prev = dctcp.alpha;

        // 40 of the next batch's ACKs carry marks
        for i in 0..40 {
            ack(&mut dctcp, &mut tx, &cfg, 1_000 + i, true);
        }
        // CWR from the first mark swallowed the rate cut; now close the batch
        tx.snd_nxt = 200_000;
        ack(&mut dctcp, &mut tx, &cfg, 150_000, false);
        let g = cfg.ewma_gain;
        let frac = 40.0 / 101.0;
        assert!((dctcp.alpha - ((1.0 - g) * alpha_prev + g * frac)).abs() < 1e-12);
        assert_eq!(dctcp.ecn_cnt, 0);
    }

    #[test]
    fn mark_cuts_once_per_window() {
        let (cfg, mut tx, mut dctcp, _) = fixture();
        tx.snd_nxt = 100_000;
        ack(&mut dctcp, &mut tx, &cfg, 1_000, false); // seed
        dctcp.alpha = 0.5;

        ack(&mut dctcp, &mut tx, &cfg, 2_000, true);
        // rate cut by alpha/2 = 25%
        assert_eq!(tx.rate, Rate::from_gbps(75));
        assert_eq!(dctcp.ca_state, CA_CWR);
        assert_eq!(dctcp.high_seq, 100_000);

        // further marks inside the same window do nothing
        ack(&mut dctcp, &mut tx, &cfg, 3_000, true);
        assert_eq!(tx.rate, Rate::from_gbps(75));

        // acknowledging past high_seq leaves CWR
        tx.snd_nxt = 150_000;
        ack(&mut dctcp, &mut tx, &cfg, 100_001, false);
        assert_eq!(dctcp.ca_state, CA_NORMAL);
    }

    #[test]
    fn new_batch_in_normal_state_gets_additive_increase() {
        let (cfg, mut tx, mut dctcp, _) = fixture();
        tx.rate = Rate::from_gbps(10);
        tx.snd_nxt = 100_000;
        ack(&mut dctcp, &mut tx, &cfg, 1_000, false); // seed: increase applies
        assert_eq!(tx.rate, Rate::from_gbps(10) + cfg.dctcp.rai);

        // same batch: no further increase
        ack(&mut dctcp, &mut tx, &cfg, 50_000, false);
        assert_eq!(tx.rate, Rate::from_gbps(10) + cfg.dctcp.rai);

        // next batch: one more step, clamped at the line rate eventually
        tx.snd_nxt = 200_000;
        ack(&mut dctcp, &mut tx, &cfg, 150_000, false);
        assert_eq!(tx.rate, Rate::from_gbps(12));
    }
}
