/*! Configuration surface of the congestion-control core.

Every knob the hardware model recognises, grouped by the component that
reads it, with the stock defaults. A [Config] is built once at startup and
shared read-only by all receive and transmit paths; the telemetry mode
inside it is likewise fixed for the lifetime of the process.
*/

use crate::cc::CcMode;
use crate::rate::Rate;
use crate::time::Duration;
use crate::wire::{IntCodec, IntMode};

/// Upper bound on ECMP next-hops kept per destination.
pub const MAX_ECMP_PATHS: usize = 16;

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Floor for every rate-based algorithm.
    pub min_rate: Rate,
    /// Payload bytes per data packet.
    pub mtu: u32,
    /// Which congestion-control algorithm newly created QPs run.
    pub cc_mode: CcMode,
    /// Minimum spacing between NACKs for the same expected sequence.
    pub nack_interval: Duration,
    /// L2 chunk size; 0 disables chunk-based acknowledgment.
    pub chunk: u32,
    /// Cumulative-ACK milestone spacing in bytes; 0 acknowledges every
    /// in-order packet.
    pub ack_interval: u32,
    /// Go-back-to-chunk-boundary recovery.
    pub back_to_zero: bool,
    /// Scale the window with the current rate.
    pub var_win: bool,
    /// React to per-ACK feedback between full-RTT updates.
    pub fast_react: bool,
    /// Bound packet spacing by the current rate (otherwise by line rate).
    pub rate_bound: bool,
    /// Feedback weight shared by the DCQCN and DCTCP alpha updates.
    pub ewma_gain: f64,
    /// Additive-increase step shared by DCQCN, HPCC, TIMELY and PINT.
    pub rai: Rate,
    /// Hyper-additive-increase step.
    pub rhai: Rate,
    /// Seed for every randomized decision (PINT sampling, QCN marking).
    pub random_seed: u64,
    /// The process-wide telemetry layout.
    pub int: IntCodec,
    pub mlx: MlxConfig,
    pub hpcc: HpccConfig,
    pub timely: TimelyConfig,
    pub dctcp: DctcpConfig,
    pub pint: PintConfig,
    pub swift: SwiftConfig,
    pub qcn: QcnConfig,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            min_rate: Rate::from_mbps(100),
            mtu: 1000,
            cc_mode: CcMode::Hpcc,
            nack_interval: Duration::from_micros(500),
            chunk: 0,
            ack_interval: 0,
            back_to_zero: false,
            var_win: false,
            fast_react: true,
            rate_bound: true,
            ewma_gain: 1.0 / 16.0,
            rai: Rate::from_mbps(5),
            rhai: Rate::from_mbps(50),
            random_seed: 0,
            int: IntCodec::new(IntMode::Normal, 2, 1),
            mlx: MlxConfig::default(),
            hpcc: HpccConfig::default(),
            timely: TimelyConfig::default(),
            dctcp: DctcpConfig::default(),
            pint: PintConfig::default(),
            swift: SwiftConfig::default(),
            qcn: QcnConfig::default(),
        }
    }
}

/// Mellanox DCQCN knobs.
#[derive(Debug, Clone)]
pub struct MlxConfig {
    /// Fraction of the current rate kept on the first CNP.
    pub rate_on_first_cnp: f64,
    /// Pin the target rate to the current rate on every decrease.
    pub clamp_target_rate: bool,
    /// Rate-increase timer period.
    pub rp_timer: Duration,
    /// Rate-decrease check period.
    pub rate_decrease_interval: Duration,
    /// Increase stages spent in fast recovery before active increase.
    pub fast_recovery_times: u32,
    /// Alpha-update timer period.
    pub alpha_resume_interval: Duration,
}

impl Default for MlxConfig {
    fn default() -> MlxConfig {
        MlxConfig {
            rate_on_first_cnp: 1.0,
            clamp_target_rate: false,
            rp_timer: Duration::from_micros(1500),
            rate_decrease_interval: Duration::from_micros(4),
            fast_recovery_times: 5,
            alpha_resume_interval: Duration::from_micros(55),
        }
    }
}

/// HPCC and PowerTCP knobs.
#[derive(Debug, Clone)]
pub struct HpccConfig {
    /// Target utilization of the bottleneck.
    pub target_util: f64,
    /// Upper utilization bound.
    pub util_high: f64,
    /// Consecutive additive increases before a multiplicative one.
    pub mi_thresh: u32,
    /// Keep one reference rate per hop instead of a single one.
    pub multi_rate: bool,
    /// During fast react, skip hops whose queue is empty.
    pub sample_feedback: bool,
    /// Run PowerTCP instead of plain HPCC (same mode number).
    pub powertcp: bool,
    /// PowerTCP delay mode (theta-PowerTCP): locally measured RTT, no INT power.
    pub powertcp_delay: bool,
}

impl Default for HpccConfig {
    fn default() -> HpccConfig {
        HpccConfig {
            target_util: 0.95,
            util_high: 0.98,
            mi_thresh: 5,
            multi_rate: true,
            sample_feedback: false,
            powertcp: false,
            powertcp_delay: false,
        }
    }
}

/// TIMELY and patched-TIMELY knobs.
#[derive(Debug, Clone)]
pub struct TimelyConfig {
    /// RTT-difference EWMA weight.
    pub alpha: f64,
    /// Multiplicative-decrease strength.
    pub beta: f64,
    /// Below this RTT, always increase.
    pub t_low: Duration,
    /// Above this RTT, always decrease.
    pub t_high: Duration,
    /// RTT normaliser for the gradient.
    pub min_rtt: Duration,
    /// Patched variant's RTT setpoint.
    pub patched_rtt_ref: Duration,
    /// Patched variant's error gain.
    pub patched_beta: f64,
}

impl Default for TimelyConfig {
    fn default() -> TimelyConfig {
        TimelyConfig {
            alpha: 0.875,
            beta: 0.8,
            t_low: Duration::from_micros(50),
            t_high: Duration::from_micros(500),
            min_rtt: Duration::from_micros(20),
            patched_rtt_ref: Duration::from_micros(500),
            patched_beta: 0.008,
        }
    }
}

/// DCTCP knobs.
#[derive(Debug, Clone)]
pub struct DctcpConfig {
    /// Additive increase applied once per batch.
    pub rai: Rate,
}

impl Default for DctcpConfig {
    fn default() -> DctcpConfig {
        DctcpConfig {
            rai: Rate::from_mbps(1000),
        }
    }
}

/// HPCC-PINT knobs.
#[derive(Debug, Clone)]
pub struct PintConfig {
    /// ACK sampling threshold out of 65536.
    pub smpl_thresh: u32,
    /// Base of the power encoding's logarithm.
    pub log_base: f64,
}

impl Default for PintConfig {
    fn default() -> PintConfig {
        PintConfig {
            smpl_thresh: 65536,
            log_base: 1.05,
        }
    }
}

/// Swift knobs.
#[derive(Debug, Clone)]
pub struct SwiftConfig {
    /// Additive increment.
    pub ai: u32,
    /// Multiplicative-decrease constant.
    pub beta: f64,
    /// Maximum multiplicative-decrease factor.
    pub max_mdf: f64,
    /// Base fabric target delay.
    pub base_target: Duration,
    /// Per-hop target scaling, in nanoseconds per hop.
    pub hop_scale: f64,
    /// Flow-scaling window range.
    pub fs_max_cwnd: f64,
    pub fs_min_cwnd: f64,
    pub fs_range: f64,
    /// Hard window bounds.
    pub min_cwnd: f64,
    pub max_cwnd: f64,
    /// Target endpoint (host) delay.
    pub target_endpoint_delay: Duration,
}

impl Default for SwiftConfig {
    fn default() -> SwiftConfig {
        SwiftConfig {
            ai: 1000,
            beta: 0.8,
            max_mdf: 0.5,
            base_target: Duration::from_micros(60),
            hop_scale: 30_000.0,
            fs_max_cwnd: 100.0,
            fs_min_cwnd: 0.1,
            fs_range: 0.000_300,
            min_cwnd: 0.001,
            max_cwnd: 800_000.0,
            target_endpoint_delay: Duration::from_millis(1),
        }
    }
}

/// RTT-QCN and PowerQCN knobs.
#[derive(Debug, Clone)]
pub struct QcnConfig {
    /// Below this RTT, never mark.
    pub t_min: Duration,
    /// Above this RTT, always mark.
    pub t_max: Duration,
    /// Additive increase (in MTUs) while the window is below one MTU.
    pub alpha: f64,
    /// Multiplicative decrease while the window is below one MTU.
    pub beta: f64,
    /// PowerQCN gradient marking thresholds.
    pub grad_min: f64,
    pub grad_max: f64,
}

impl Default for QcnConfig {
    fn default() -> QcnConfig {
        QcnConfig {
            t_min: Duration::from_nanos(3000),
            t_max: Duration::from_nanos(5000),
            alpha: 0.5,
            beta: 0.25,
            grad_min: -0.2,
            grad_max: 0.6,
        }
    }
}
