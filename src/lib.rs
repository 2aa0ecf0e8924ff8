/*! rocesim - packet-level model of an RDMA NIC's congestion-control plane.

The crate implements the sender/receiver state machines of a RoCE host as
they exist in datacenter CC research: per-flow queue pairs, go-back-N
reliability with ACK batching and NACK throttling, the in-band telemetry
codec, and a family of congestion-control algorithms (DCQCN, HPCC,
PowerTCP, TIMELY, DCTCP, HPCC-PINT, Swift, RTT-QCN, PowerQCN, UFCC)
sharing one reaction interface.

Everything runs on a virtual clock. The event kernel, the links and
switches, and the traffic driver are external: they feed frames into
[host::RdmaHost::receive], pull them out through the NIC port surface, and
fire the core's timers through the [sim::Scheduler] seam. [sim::EventQueue]
is a minimal kernel for tests and demos.
*/

#[macro_use]
mod macros;

pub mod cc;
pub mod config;
pub mod host;
pub mod nic;
pub mod qp;
pub mod rate;
pub mod sim;
pub mod time;
pub mod trace;
pub mod wire;

pub use crate::cc::CcMode;
pub use crate::config::Config;
pub use crate::host::RdmaHost;
pub use crate::rate::Rate;
pub use crate::time::{Duration, Instant};
