/*! Mellanox-style DCQCN.

Rate-based and purely ECN-driven: the receiver echoes congestion marks as
CNP-flagged ACKs and the sender reacts with a multiplicative cut, then
recovers through timer-driven fast recovery, active increase and hyper
increase stages. This is the only algorithm in the family that owns timers;
all three are scheduled through the kernel seam and cancelled when the
queue pair completes.
*/

use crate::config::Config;
use crate::qp::{QpKey, Transport};
use crate::rate::Rate;
use crate::sim::{Event, EventHandle, Scheduler};
use crate::time::Duration;

use super::{Congestion, Feedback};

pub struct Dcqcn {
    /// Recovery target; increases walk the current rate toward it.
    pub target_rate: Rate,
    /// Congestion estimate, EWMA of the per-slot CNP indicator.
    pub alpha: f64,
    /// CNP seen since the last alpha update.
    alpha_cnp_arrived: bool,
    /// CNP seen since the last decrease check.
    decrease_cnp_arrived: bool,
    /// No CNP processed yet.
    first_cnp: bool,
    /// Increase stage since the last decrease.
    rp_stage: u32,
    ev_alpha: Option<EventHandle>,
    ev_decrease: Option<EventHandle>,
    ev_rp: Option<EventHandle>,
}

impl Dcqcn {
    pub fn new(max_rate: Rate) -> Dcqcn {
        Dcqcn {
            target_rate: max_rate,
            alpha: 1.0,
            alpha_cnp_arrived: false,
            decrease_cnp_arrived: false,
            first_cnp: true,
            rp_stage: 0,
            ev_alpha: None,
            ev_decrease: None,
            ev_rp: None,
        }
    }

    pub fn cancel_timers(&mut self, sched: &mut dyn Scheduler) {
        for handle in [
            self.ev_alpha.take(),
            self.ev_decrease.take(),
            self.ev_rp.take(),
        ]
        .into_iter()
        .flatten()
        {
            sched.cancel(handle);
        }
    }

    /// Periodic alpha update: blend in whether a CNP arrived this slot.
    pub fn update_alpha(&mut self, cfg: &Config, key: QpKey, sched: &mut dyn Scheduler) {
        if self.alpha_cnp_arrived {
            self.alpha = (1.0 - cfg.ewma_gain) * self.alpha + cfg.ewma_gain;
        } else {
            self.alpha = (1.0 - cfg.ewma_gain) * self.alpha;
        }
        self.alpha_cnp_arrived = false;
        self.ev_alpha = Some(sched.schedule(cfg.mlx.alpha_resume_interval, Event::MlxUpdateAlpha(key)));
    }

    /// Periodic decrease check: if a CNP arrived in the window, cut the
    /// rate by `alpha/2` and restart the increase ladder.
    pub fn check_rate_decrease(
        &mut self,
        tx: &mut Transport,
        cfg: &Config,
        key: QpKey,
        sched: &mut dyn Scheduler,
    ) {
        self.ev_decrease = Some(sched.schedule(
            cfg.mlx.rate_decrease_interval,
            Event::MlxCheckRateDecrease(key),
        ));
        if !self.decrease_cnp_arrived {
            return;
        }
        let clamp = cfg.mlx.clamp_target_rate || self.rp_stage != 0;
        if clamp {
            self.target_rate = tx.rate;
        }
        let new_rate = tx.rate * (1.0 - self.alpha / 2.0);
        tx.change_rate(new_rate.max(cfg.min_rate));
        self.rp_stage = 0;
        self.decrease_cnp_arrived = false;
        if let Some(handle) = self.ev_rp.take() {
            sched.cancel(handle);
        }
        self.ev_rp = Some(sched.schedule(cfg.mlx.rp_timer, Event::MlxRateIncrease(key)));
    }

    /// Periodic increase: fast recovery below the stage threshold, active
    /// increase at it, hyper increase beyond it.
    pub fn rate_increase_event(
        &mut self,
        tx: &mut Transport,
        cfg: &Config,
        key: QpKey,
        sched: &mut dyn Scheduler,
    ) {
        self.ev_rp = Some(sched.schedule(cfg.mlx.rp_timer, Event::MlxRateIncrease(key)));
        if self.rp_stage < cfg.mlx.fast_recovery_times {
            self.fast_recovery(tx);
        } else if self.rp_stage == cfg.mlx.fast_recovery_times {
            self.active_increase(tx, cfg.rai);
        } else {
            self.active_increase(tx, cfg.rhai);
        }
        self.rp_stage += 1;
    }

    fn fast_recovery(&mut self, tx: &mut Transport) {
        tx.change_rate(tx.rate * 0.5 + self.target_rate * 0.5);
    }

    fn active_increase(&mut self, tx: &mut Transport, step: Rate) {
        self.target_rate = self.target_rate + step;
        if self.target_rate > tx.max_rate {
            self.target_rate = tx.max_rate;
        }
        tx.change_rate(tx.rate * 0.5 + self.target_rate * 0.5);
    }
}

impl Congestion for Dcqcn {
    /// Cumulative acknowledgment is handled by the dispatcher; DCQCN only
    /// reacts to congestion notifications and its own timers.
    fn on_ack(
        &mut self,
        _tx: &mut Transport,
        _fb: &Feedback<'_>,
        _cfg: &Config,
        _sched: &mut dyn Scheduler,
    ) {
    }

    fn on_nack(
        &mut self,
        _tx: &mut Transport,
        _fb: &Feedback<'_>,
        _cfg: &Config,
        _sched: &mut dyn Scheduler,
    ) {
    }

    fn on_cnp(
        &mut self,
        tx: &mut Transport,
        cfg: &Config,
        key: QpKey,
        sched: &mut dyn Scheduler,
    ) {
        self.alpha_cnp_arrived = true;
        self.decrease_cnp_arrived = true;
        if !self.first_cnp {
            return;
        }
        self.first_cnp = false;
        // seed the estimate and start the recurring timers
        self.alpha = 1.0;
        self.alpha_cnp_arrived = false;
        self.ev_alpha = Some(sched.schedule(
            cfg.mlx.alpha_resume_interval,
            Event::MlxUpdateAlpha(key),
        ));
        // the decrease check trails the alpha update by one nanosecond
        self.ev_decrease = Some(sched.schedule(
            cfg.mlx.rate_decrease_interval + Duration::from_nanos(1),
            Event::MlxCheckRateDecrease(key),
        ));
        self.ev_rp = Some(sched.schedule(cfg.mlx.rp_timer, Event::MlxRateIncrease(key)));
        let cut = (tx.rate * cfg.mlx.rate_on_first_cnp).max(cfg.min_rate);
        self.target_rate = cut;
        tx.change_rate(cut);
    }
}
