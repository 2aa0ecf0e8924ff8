//! Incast demo: N flows from one host converge on one receiver over an
//! ideal constant-delay link, under a selectable congestion-control mode.
//!
//!     cargo run --example incast -- --cc 7 --flows 8 --size 200000
//!
//! Prints one flow-completion line per flow in the standard trace format.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use rocesim::cc::CcMode;
use rocesim::host::RdmaHost;
use rocesim::qp::QpKey;
use rocesim::sim::{EventQueue, Scheduler};
use rocesim::trace::{self, FlowRecord};
use rocesim::wire::{IntCodec, IntMode};
use rocesim::{Config, Duration, Instant, Rate};

const SENDER_IP: u32 = 0x0b00_0101;
const RECEIVER_IP: u32 = 0x0b00_0201;
const LINK_DELAY: Duration = Duration::from_micros(2);
const IFG: Duration = Duration::from_nanos(1);

struct InFlight {
    deliver_at: Instant,
    to_receiver: bool,
    frame: Vec<u8>,
}

fn int_mode_for(cc: CcMode) -> IntMode {
    match cc {
        CcMode::Hpcc => IntMode::Normal,
        CcMode::Timely
        | CcMode::PatchedTimely
        | CcMode::RttQcn
        | CcMode::PowerQcn
        | CcMode::Ufcc
        | CcMode::UfccCwnd => IntMode::Ts,
        CcMode::HpccPint => IntMode::Pint,
        CcMode::Swift => IntMode::Swift,
        CcMode::MlxCnp | CcMode::Dctcp => IntMode::None,
    }
}

fn main() -> io::Result<()> {
    env_logger::init();

    let mut opts = getopts::Options::new();
    opts.optopt("c", "cc", "congestion-control mode number", "MODE");
    opts.optopt("n", "flows", "number of incast flows", "N");
    opts.optopt("s", "size", "bytes per flow", "BYTES");
    let args: Vec<String> = std::env::args().skip(1).collect();
    let matches = match opts.parse(&args) {
        Ok(m) => m,
        Err(err) => {
            eprintln!("{}", opts.usage(&format!("{err}")));
            std::process::exit(1);
        }
    };
    let cc_mode = matches
        .opt_str("cc")
        .map(|s| s.parse::<u32>().expect("numeric cc mode"))
        .map(|v| CcMode::from_u32(v).expect("unknown cc mode"))
        .unwrap_or(CcMode::Timely);
    let flows: u16 = matches
        .opt_str("flows")
        .map(|s| s.parse().expect("numeric flow count"))
        .unwrap_or(4);
    let size: u64 = matches
        .opt_str("size")
        .map(|s| s.parse().expect("numeric size"))
        .unwrap_or(100_000);

    let cfg = Config {
        cc_mode,
        int: IntCodec::new(int_mode_for(cc_mode), 2, 1),
        ack_interval: 1000,
        ..Config::default()
    };

    let line_rate = Rate::from_gbps(100);
    let base_rtt = LINK_DELAY * 2 + Duration::from_micros(1);
    let win = line_rate.bdp_bytes(base_rtt);

    let mut sender = RdmaHost::new(cfg.clone());
    sender.add_nic(line_rate);
    sender.add_route(RECEIVER_IP, 0);
    let mut receiver = RdmaHost::new(cfg.clone());
    receiver.add_nic(line_rate);
    receiver.add_route(SENDER_IP, 0);

    let completions: Rc<RefCell<Vec<FlowRecord>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = completions.clone();
    sender.on_qp_complete(move |qp, now| {
        sink.borrow_mut().push(FlowRecord {
            sip: qp.flow.sip,
            dip: qp.flow.dip,
            sport: qp.flow.sport,
            dport: qp.flow.dport,
            size: qp.tx.size,
            start: qp.start_time,
            finish: now,
            standalone_fct: trace::standalone_fct(qp.tx.size, cfg.mtu, 23, base_rtt, line_rate),
        });
    });

    let mut sched = EventQueue::new();
    let mut keys: Vec<QpKey> = Vec::new();
    for i in 0..flows {
        keys.push(sender.add_queue_pair(
            size,
            3,
            SENDER_IP,
            RECEIVER_IP,
            10_000 + i,
            100,
            win,
            base_rtt,
            Instant::ZERO,
            Instant::FAR_FUTURE,
        ));
    }

    let mut wire: VecDeque<InFlight> = VecDeque::new();
    while completions.borrow().len() < flows as usize {
        let now = sched.now();

        // 1. pump every flow that is allowed to transmit right now
        while let Some(key) = sender.next_ready_qp(0, now) {
            let Some(frame) = sender.next_packet(key, now) else {
                break;
            };
            let len = frame.len() as u32;
            sender.on_packet_sent(key, len, IFG, now);
            wire.push_back(InFlight {
                deliver_at: now + LINK_DELAY,
                to_receiver: true,
                frame,
            });
        }
        // 2. ACKs and NACKs leave on the high-priority path immediately
        while let Some(frame) = receiver.nic_mut(0).pop_high_prio() {
            wire.push_back(InFlight {
                deliver_at: now + LINK_DELAY,
                to_receiver: false,
                frame,
            });
        }

        // 3. advance to whatever happens first
        let next_delivery = wire.iter().map(|p| p.deliver_at).min();
        let next_timer = sched.next_fire_at();
        let next_send = keys
            .iter()
            .filter_map(|k| sender.qp(*k))
            .filter(|qp| qp.tx.bytes_left() > 0 && !qp.tx.is_win_bound())
            .map(|qp| qp.tx.next_avail.max(now))
            .min();
        let Some(at) = [next_delivery, next_timer, next_send]
            .into_iter()
            .flatten()
            .min()
        else {
            break;
        };

        if next_timer == Some(at) {
            let (_, event) = sched.advance().expect("timer disappeared");
            sender.handle_event(event, &mut sched);
            continue;
        }
        sched.advance_to(at);
        let mut rest = VecDeque::new();
        while let Some(pkt) = wire.pop_front() {
            if pkt.deliver_at <= at {
                let host = if pkt.to_receiver { &mut receiver } else { &mut sender };
                host.receive(&pkt.frame, &mut sched).expect("malformed frame");
            } else {
                rest.push_back(pkt);
            }
        }
        wire = rest;
    }

    let mut out = io::stdout().lock();
    for rec in completions.borrow().iter() {
        trace::write_flow_completion(&mut out, rec)?;
    }
    Ok(())
}
