/*! The congestion-control dispatcher.

[RdmaHost] is the per-host hub everything in this crate hangs off: it owns
the sender and receiver queue-pair maps, the ECMP route table, and the port
models, and it implements the receive paths. Data packets run the receiver
sequence check and may produce an ACK or NACK with the telemetry echoed
verbatim; ACKs and NACKs advance the sender's cumulative state, drive loss
recovery, and are then handed to the queue pair's congestion-control
algorithm. The external device model pulls outgoing packets through
[RdmaHost::next_ready_qp] / [RdmaHost::next_packet] and reports completed
transmissions through [RdmaHost::on_packet_sent].
*/

use std::collections::HashMap;

use crate::cc::{CcState, Congestion, Feedback};
use crate::config::{Config, MAX_ECMP_PATHS};
use crate::nic::NicPort;
use crate::qp::{FlowTuple, QpKey, QueuePair, RxKey, RxQueuePair, Transport};
use crate::rate::Rate;
use crate::sim::{Event, Scheduler};
use crate::time::{Duration, Instant};
use crate::wire::{
    IntHeader, IntMode, QbbPacket, QbbRepr, Result, PROTO_ACK, PROTO_CNP, PROTO_NACK, PROTO_UDP,
};

/// Outcome of the receiver's sequence check for one data packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqAction {
    /// In order and at an ACK boundary: acknowledge.
    Ack,
    /// A gap opened and the NACK throttle allows reporting it.
    Nack,
    /// Duplicate of already-delivered data: drop silently.
    DropDup,
    /// A gap, but the same loss was NACKed too recently.
    SuppressNack,
    /// In order, no boundary crossed: absorb without a reply.
    Batch,
}

type EcmpPaths = heapless::Vec<u8, MAX_ECMP_PATHS>;

pub struct RdmaHost {
    cfg: Config,
    nics: Vec<NicPort>,
    qps: HashMap<QpKey, QueuePair>,
    rx_qps: HashMap<RxKey, RxQueuePair>,
    /// Destination ip to candidate egress ports.
    routes: HashMap<u32, EcmpPaths>,
    on_complete: Option<Box<dyn FnMut(&QueuePair, Instant)>>,
}

impl RdmaHost {
    pub fn new(cfg: Config) -> RdmaHost {
        RdmaHost {
            cfg,
            nics: Vec::new(),
            qps: HashMap::new(),
            rx_qps: HashMap::new(),
            routes: HashMap::new(),
            on_complete: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn add_nic(&mut self, data_rate: Rate) -> usize {
        self.nics.push(NicPort::new(data_rate));
        self.nics.len() - 1
    }

    pub fn nic(&self, idx: usize) -> &NicPort {
        &self.nics[idx]
    }

    pub fn nic_mut(&mut self, idx: usize) -> &mut NicPort {
        &mut self.nics[idx]
    }

    pub fn add_route(&mut self, dip: u32, nic_idx: usize) {
        let paths = self.routes.entry(dip).or_default();
        if paths.push(nic_idx as u8).is_err() {
            net_debug!("host: route table full for {:08x}", dip);
        }
    }

    pub fn clear_routes(&mut self) {
        self.routes.clear();
    }

    /// Register the completion callback; fired exactly once per queue pair
    /// at the moment `snd_una` reaches the flow size.
    pub fn on_qp_complete(&mut self, cb: impl FnMut(&QueuePair, Instant) + 'static) {
        self.on_complete = Some(Box::new(cb));
    }

    /// ECMP pick among the live ports routing toward `dip`.
    fn nic_idx_of(&self, dip: u32, hash: u32) -> usize {
        let paths = self
            .routes
            .get(&dip)
            .unwrap_or_else(|| panic!("no route toward {:08x}", dip));
        let alive: Vec<usize> = paths
            .iter()
            .map(|&i| i as usize)
            .filter(|&i| self.nics[i].is_alive())
            .collect();
        assert!(!alive.is_empty(), "at least one NIC must be alive");
        alive[hash as usize % alive.len()]
    }

    /// Create a sender queue pair for a new flow. The window is a byte cap
    /// (pass the BDP for window-based algorithms, 0 to disable windowing);
    /// with `var_win` on, the effective cap is always one bandwidth-delay
    /// product at the flow's current rate.
    #[allow(clippy::too_many_arguments)]
    pub fn add_queue_pair(
        &mut self,
        size: u64,
        pg: u16,
        sip: u32,
        dip: u32,
        sport: u16,
        dport: u16,
        win: u64,
        base_rtt: Duration,
        now: Instant,
        stop_time: Instant,
    ) -> QpKey {
        let key = QpKey::new(dip, sport, pg);
        let flow = FlowTuple {
            sip,
            dip,
            sport,
            dport,
            pg,
        };
        let nic_idx = self.nic_idx_of(dip, flow.hash());
        // transmission starts at the line rate of the homing port
        let line_rate = self.nics[nic_idx].data_rate();
        let tx = Transport::new(size, win, self.cfg.var_win, base_rtt, line_rate);
        let cc = CcState::new(&self.cfg, key, line_rate, win);
        self.nics[nic_idx].add_qp(key);
        let qp = QueuePair {
            flow,
            start_time: now,
            stop_time,
            incast_flow: stop_time == Instant::FAR_FUTURE,
            tx,
            cc,
        };
        net_trace!(
            "host: new qp {:08x}:{} -> {:08x}:{} pg={} size={}",
            sip,
            sport,
            dip,
            dport,
            pg,
            size
        );
        self.qps.insert(key, qp);
        key
    }

    pub fn qp(&self, key: QpKey) -> Option<&QueuePair> {
        self.qps.get(&key)
    }

    pub fn qp_mut(&mut self, key: QpKey) -> Option<&mut QueuePair> {
        self.qps.get_mut(&key)
    }

    pub fn rx_qp(&self, key: RxKey) -> Option<&RxQueuePair> {
        self.rx_qps.get(&key)
    }

    /// Tear down the receiver-side state of a completed flow.
    pub fn delete_rx_qp(&mut self, dip: u32, dport: u16, pg: u16) {
        self.rx_qps.remove(&RxKey::new(dip, dport, pg));
    }

    /// Entry point for every frame the device model delivers to this host.
    pub fn receive(&mut self, frame: &[u8], sched: &mut dyn Scheduler) -> Result<()> {
        let packet = QbbPacket::new_checked(frame, &self.cfg.int)?;
        let repr = QbbRepr::parse(&packet, &self.cfg.int)?;
        let payload_len = packet.payload(&self.cfg.int).len() as u32;
        match repr.proto {
            PROTO_UDP => self.receive_data(&repr, payload_len, sched),
            PROTO_ACK | PROTO_NACK => self.receive_ack(&repr, sched),
            PROTO_CNP => self.receive_cnp(&repr),
            other => net_debug!("host: dropping unknown l3 proto 0x{:02x}", other),
        }
        Ok(())
    }

    /// Receiver path: sequence-check the payload and reply when warranted.
    fn receive_data(&mut self, repr: &QbbRepr, payload_size: u32, sched: &mut dyn Scheduler) {
        let cfg = &self.cfg;
        let key = RxKey::new(repr.sip, repr.sport, repr.pg);
        let rxq = self.rx_qps.entry(key).or_insert_with(|| {
            RxQueuePair::new(
                repr.dip,
                repr.sip,
                repr.dport,
                repr.sport,
                repr.pg,
                cfg.ack_interval,
            )
        });
        if repr.ecn != 0 {
            rxq.ecn.ecnbits |= repr.ecn;
            rxq.ecn.qfb += 1;
        }
        rxq.ecn.total += 1;

        let action = Self::check_seq(cfg, rxq, repr.seq as u64, payload_size, sched.now());
        let proto = match action {
            SeqAction::Ack => PROTO_ACK,
            SeqAction::Nack => PROTO_NACK,
            SeqAction::DropDup | SeqAction::SuppressNack | SeqAction::Batch => return,
        };
        let ipid = rxq.ipid;
        rxq.ipid = rxq.ipid.wrapping_add(1);
        let ack = QbbRepr {
            proto,
            ecn: 0,
            sip: rxq.sip,
            dip: rxq.dip,
            sport: rxq.sport,
            dport: rxq.dport,
            pg: rxq.pg,
            seq: rxq.next_expected as u32,
            ipid,
            // congestion is echoed whenever the data carried ECN marks
            cnp: repr.ecn != 0,
            unsched: false,
            int: repr.int,
        };
        let (peer_ip, rx_hash) = (rxq.dip, rxq.hash());

        let mut frame = vec![0u8; QbbRepr::ack_len(&self.cfg.int)];
        ack.emit(
            &mut QbbPacket::new_unchecked(&mut frame[..]),
            &self.cfg.int,
        );
        let nic_idx = self.nic_idx_of(peer_ip, rx_hash);
        self.nics[nic_idx].enqueue_high_prio(frame);
    }

    /// The receiver sequence check.
    fn check_seq(
        cfg: &Config,
        q: &mut RxQueuePair,
        seq: u64,
        size: u32,
        now: Instant,
    ) -> SeqAction {
        let expected = q.next_expected;
        if seq == expected {
            q.next_expected = expected + size as u64;
            // with ack_interval 0 the milestone stays pinned at zero and
            // every in-order packet acknowledges
            if q.next_expected >= q.milestone {
                q.milestone += cfg.ack_interval as u64;
                SeqAction::Ack
            } else if cfg.chunk > 0 && q.next_expected % cfg.chunk as u64 == 0 {
                SeqAction::Ack
            } else {
                SeqAction::Batch
            }
        } else if seq > expected {
            if now >= q.nack_timer || q.last_nack != expected {
                q.nack_timer = now + cfg.nack_interval;
                q.last_nack = expected;
                if cfg.back_to_zero && cfg.chunk > 0 {
                    q.next_expected = q.next_expected / cfg.chunk as u64 * cfg.chunk as u64;
                }
                SeqAction::Nack
            } else {
                SeqAction::SuppressNack
            }
        } else {
            SeqAction::DropDup
        }
    }

    /// Sender path for ACKs and NACKs.
    fn receive_ack(&mut self, repr: &QbbRepr, sched: &mut dyn Scheduler) {
        let cfg = &self.cfg;
        let key = QpKey::new(repr.sip, repr.dport, repr.pg);
        let Some(qp) = self.qps.get_mut(&key) else {
            net_debug!(
                "host: {} for unknown qp {:08x}:{}",
                if repr.proto == PROTO_NACK { "nack" } else { "ack" },
                repr.sip,
                repr.dport
            );
            return;
        };
        let seq = if cfg.back_to_zero && cfg.chunk > 0 {
            repr.seq as u64 / cfg.chunk as u64 * cfg.chunk as u64
        } else {
            repr.seq as u64
        };
        qp.tx.acknowledge(seq);

        if qp.tx.is_finished() {
            self.complete_qp(key, sched);
            return;
        }

        if repr.proto == PROTO_NACK {
            // go-back-N
            qp.tx.snd_nxt = qp.tx.snd_una;
        }

        let fb = Feedback {
            seq: repr.seq as u64,
            cnp: repr.cnp,
            int: &repr.int,
            now: sched.now(),
        };
        let QueuePair {
            ref mut tx,
            ref mut cc,
            ..
        } = *qp;
        if repr.cnp {
            cc.on_cnp(tx, cfg, key, sched);
        }
        if repr.proto == PROTO_NACK {
            cc.on_nack(tx, &fb, cfg, sched);
        } else {
            cc.on_ack(tx, &fb, cfg, sched);
        }
    }

    /// Legacy NIC-CNP path. The lookup is preserved but no rate changes
    /// here; DCQCN reacts to the CNP flag on ACKs instead.
    fn receive_cnp(&mut self, repr: &QbbRepr) {
        if repr.pg == 1 {
            // DCTCP's marking travels on ACKs
            return;
        }
        let key = QpKey::new(repr.sip, repr.dport, repr.pg);
        if !self.qps.contains_key(&key) {
            net_debug!("host: cnp for unknown qp {:08x}:{}", repr.sip, repr.dport);
        }
    }

    fn complete_qp(&mut self, key: QpKey, sched: &mut dyn Scheduler) {
        let Some(mut qp) = self.qps.remove(&key) else {
            return;
        };
        qp.cc.cancel_timers(sched);
        for nic in &mut self.nics {
            nic.remove_qp(key);
        }
        net_trace!(
            "host: qp {:08x}:{} complete at {}",
            qp.flow.sip,
            qp.flow.sport,
            sched.now()
        );
        if let Some(mut cb) = self.on_complete.take() {
            cb(&qp, sched.now());
            self.on_complete = Some(cb);
        }
    }

    /// Timer event fired by the kernel; stale events for completed queue
    /// pairs are ignored.
    pub fn handle_event(&mut self, event: Event, sched: &mut dyn Scheduler) {
        let key = match event {
            Event::MlxUpdateAlpha(key)
            | Event::MlxCheckRateDecrease(key)
            | Event::MlxRateIncrease(key) => key,
        };
        let cfg = &self.cfg;
        let Some(qp) = self.qps.get_mut(&key) else {
            return;
        };
        let QueuePair {
            ref mut tx,
            ref mut cc,
            ..
        } = *qp;
        if let CcState::Mlx(mlx) = cc {
            match event {
                Event::MlxUpdateAlpha(_) => mlx.update_alpha(cfg, key, sched),
                Event::MlxCheckRateDecrease(_) => mlx.check_rate_decrease(tx, cfg, key, sched),
                Event::MlxRateIncrease(_) => mlx.rate_increase_event(tx, cfg, key, sched),
            }
        }
    }

    /// Which flow on `nic_idx` may transmit at `now`, if any.
    pub fn next_ready_qp(&mut self, nic_idx: usize, now: Instant) -> Option<QpKey> {
        self.nics[nic_idx].next_ready_qp(&self.qps, now)
    }

    /// Build the next data packet of a flow and advance its send cursor.
    pub fn next_packet(&mut self, key: QpKey, now: Instant) -> Option<Vec<u8>> {
        let nic_rate = {
            let qp = self.qps.get(&key)?;
            let idx = self.nic_idx_of(qp.flow.dip, qp.hash());
            self.nics[idx].data_rate()
        };
        let cfg = &self.cfg;
        let qp = self.qps.get_mut(&key)?;
        if qp.tx.bytes_left() == 0 {
            return None;
        }
        let payload = qp.tx.bytes_left().min(cfg.mtu as u64) as u32;
        let sent_bytes = qp.tx.size - qp.tx.bytes_left();
        let bdp = nic_rate.bdp_bytes(qp.tx.base_rtt);

        // seed the telemetry area: delay-based modes carry the send time
        let now_ns = now.total_nanos() as u64;
        let int = match cfg.int.mode() {
            IntMode::Ts => IntHeader::Ts { ts: now_ns },
            IntMode::Swift => IntHeader::Swift {
                remote_delay: 0,
                ts: now_ns,
                nhop: 0,
            },
            _ => cfg.int.empty(),
        };
        let repr = QbbRepr {
            proto: PROTO_UDP,
            ecn: 0,
            sip: qp.flow.sip,
            dip: qp.flow.dip,
            sport: qp.flow.sport,
            dport: qp.flow.dport,
            pg: qp.flow.pg,
            seq: qp.tx.snd_nxt as u32,
            ipid: qp.tx.ipid,
            cnp: false,
            unsched: sent_bytes <= bdp,
            int,
        };
        let mut frame = vec![0u8; QbbRepr::buffer_len(&cfg.int, payload as usize)];
        repr.emit(&mut QbbPacket::new_unchecked(&mut frame[..]), &cfg.int);

        qp.tx.snd_nxt += payload as u64;
        qp.tx.ipid = qp.tx.ipid.wrapping_add(1);
        Some(frame)
    }

    /// Account a transmitted packet: remember its size, log the send time
    /// for algorithms that need it, and push `next_avail` forward by the
    /// interframe gap plus the serialisation (or pacing) interval.
    pub fn on_packet_sent(&mut self, key: QpKey, pkt_size: u32, ifg: Duration, now: Instant) {
        let cfg = &self.cfg;
        let Some(qp) = self.qps.get_mut(&key) else {
            return;
        };
        qp.tx.last_pkt_size = pkt_size;
        let QueuePair {
            ref mut tx,
            ref mut cc,
            ..
        } = *qp;
        cc.on_pkt_sent(tx.snd_nxt, now);

        let effective = if cfg.rate_bound { tx.rate } else { tx.max_rate };
        let interval = if tx.pacing_delay > Duration::ZERO {
            ifg + tx.pacing_delay
        } else {
            ifg + effective.tx_time(pkt_size)
        };
        let candidate = now + interval;
        if candidate > tx.next_avail {
            tx.next_avail = candidate;
        }
    }

    /// Mark a port dead. Routing is owned by the setup layer; after it
    /// rebuilds the table, call [RdmaHost::redistribute_qps].
    pub fn set_link_down(&mut self, nic_idx: usize) {
        net_debug!("host: link down on nic {}", nic_idx);
        self.nics[nic_idx].set_down();
    }

    /// Re-home every queue pair onto the surviving ports by flow hash,
    /// preserving all connection state.
    pub fn redistribute_qps(&mut self) {
        let assignments: Vec<(QpKey, usize)> = self
            .qps
            .iter()
            .map(|(key, qp)| (*key, self.nic_idx_of(qp.flow.dip, qp.hash())))
            .collect();
        for nic in &mut self.nics {
            nic.clear_qps();
        }
        for (key, idx) in assignments {
            self.nics[idx].add_qp(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cc::CcMode;
    use crate::sim::EventQueue;
    use crate::wire::IntCodec;
    use std::cell::RefCell;
    use std::rc::Rc;

    const SENDER_IP: u32 = 0x0b00_0101;
    const RECEIVER_IP: u32 = 0x0b00_0201;

    fn ts_config() -> Config {
        Config {
            cc_mode: CcMode::Timely,
            int: IntCodec::new(IntMode::Ts, 2, 1),
            ack_interval: 1000,
            ..Config::default()
        }
    }

    /// A sender/receiver pair wired through one NIC each.
    fn hosts(cfg: Config) -> (RdmaHost, RdmaHost) {
        let mut sender = RdmaHost::new(cfg.clone());
        sender.add_nic(Rate::from_gbps(100));
        sender.add_route(RECEIVER_IP, 0);
        sender.add_route(SENDER_IP, 0);
        let mut receiver = RdmaHost::new(cfg);
        receiver.add_nic(Rate::from_gbps(100));
        receiver.add_route(SENDER_IP, 0);
        receiver.add_route(RECEIVER_IP, 0);
        (sender, receiver)
    }

    fn new_flow(sender: &mut RdmaHost, size: u64) -> QpKey {
        sender.add_queue_pair(
            size,
            3,
            SENDER_IP,
            RECEIVER_IP,
            10_000,
            100,
            0,
            Duration::from_micros(8),
            Instant::ZERO,
            Instant::FAR_FUTURE,
        )
    }

    fn data_frame(cfg: &Config, seq: u32, payload: usize, ecn: u8, ts: u64) -> Vec<u8> {
        let repr = QbbRepr {
            proto: PROTO_UDP,
            ecn,
            sip: SENDER_IP,
            dip: RECEIVER_IP,
            sport: 10_000,
            dport: 100,
            pg: 3,
            seq,
            ipid: 0,
            cnp: false,
            unsched: false,
            int: IntHeader::Ts { ts },
        };
        let mut frame = vec![0u8; QbbRepr::buffer_len(&cfg.int, payload)];
        repr.emit(&mut QbbPacket::new_unchecked(&mut frame[..]), &cfg.int);
        frame
    }

    #[test]
    fn in_order_data_acks_at_milestones() {
        let cfg = ts_config();
        let (_, mut receiver) = hosts(cfg.clone());
        let mut sched = EventQueue::new();
        // 500-byte packets against a 1000-byte milestone: every second
        // packet crosses it
        receiver
            .receive(&data_frame(&cfg, 0, 500, 0, 7), &mut sched)
            .unwrap();
        assert!(!receiver.nic(0).has_high_prio());
        receiver
            .receive(&data_frame(&cfg, 500, 500, 0, 7), &mut sched)
            .unwrap();
        let ack = receiver.nic_mut(0).pop_high_prio().unwrap();
        let packet = QbbPacket::new_unchecked(&ack[..]);
        assert_eq!(packet.proto(), PROTO_ACK);
        assert_eq!(packet.seq(), 1000);
        assert_eq!(ack.len(), QbbRepr::ack_len(&cfg.int));
    }

    #[test]
    fn every_packet_acks_when_interval_is_zero() {
        let mut cfg = ts_config();
        cfg.ack_interval = 0;
        let (_, mut receiver) = hosts(cfg.clone());
        let mut sched = EventQueue::new();
        for seq in [0u32, 500, 1000] {
            receiver
                .receive(&data_frame(&cfg, seq, 500, 0, 7), &mut sched)
                .unwrap();
            let ack = receiver.nic_mut(0).pop_high_prio().unwrap();
            let packet = QbbPacket::new_unchecked(&ack[..]);
            assert_eq!(packet.proto(), PROTO_ACK);
            assert_eq!(packet.seq(), seq + 500);
        }
    }

    #[test]
    fn ack_echoes_the_telemetry_verbatim() {
        let cfg = ts_config();
        let (_, mut receiver) = hosts(cfg.clone());
        let mut sched = EventQueue::new();
        let data = data_frame(&cfg, 0, 1000, 0x03, 0xDEAD_BEEF);
        receiver.receive(&data, &mut sched).unwrap();
        let ack = receiver.nic_mut(0).pop_high_prio().unwrap();

        let data_packet = QbbPacket::new_unchecked(&data[..]);
        let ack_packet = QbbPacket::new_unchecked(&ack[..]);
        assert_eq!(
            data_packet.int_bytes(&cfg.int),
            ack_packet.int_bytes(&cfg.int)
        );
        // ECN on the data turns into the congestion flag on the ACK
        assert!(ack_packet.cnp());
        // and the reply runs sender-ward
        assert_eq!(ack_packet.sip(), RECEIVER_IP);
        assert_eq!(ack_packet.dip(), SENDER_IP);
        assert_eq!(ack_packet.sport(), 100);
        assert_eq!(ack_packet.dport(), 10_000);
    }

    #[test]
    fn gap_nacks_are_throttled() {
        let cfg = ts_config();
        let (_, mut receiver) = hosts(cfg.clone());
        let mut sched = EventQueue::new();
        // deliver a gap: expected 0, got 5000, repeatedly
        receiver
            .receive(&data_frame(&cfg, 5_000, 1000, 0, 7), &mut sched)
            .unwrap();
        let first = receiver.nic_mut(0).pop_high_prio().unwrap();
        assert_eq!(QbbPacket::new_unchecked(&first[..]).proto(), PROTO_NACK);
        assert_eq!(QbbPacket::new_unchecked(&first[..]).seq(), 0);

        // inside the nack interval, for the same expected seq: suppressed
        for _ in 0..5 {
            receiver
                .receive(&data_frame(&cfg, 6_000, 1000, 0, 7), &mut sched)
                .unwrap();
        }
        assert!(!receiver.nic(0).has_high_prio());

        // after the interval elapses the NACK repeats
        sched.advance_to(Instant::ZERO + cfg.nack_interval);
        receiver
            .receive(&data_frame(&cfg, 6_000, 1000, 0, 7), &mut sched)
            .unwrap();
        assert!(receiver.nic(0).has_high_prio());
    }

    #[test]
    fn duplicates_change_nothing() {
        let cfg = ts_config();
        let (_, mut receiver) = hosts(cfg.clone());
        let mut sched = EventQueue::new();
        receiver
            .receive(&data_frame(&cfg, 0, 1000, 0, 7), &mut sched)
            .unwrap();
        receiver.nic_mut(0).pop_high_prio();
        let before = receiver
            .rx_qp(RxKey::new(SENDER_IP, 10_000, 3))
            .unwrap()
            .clone();
        // replay the same packet
        receiver
            .receive(&data_frame(&cfg, 0, 1000, 0, 7), &mut sched)
            .unwrap();
        let after = receiver.rx_qp(RxKey::new(SENDER_IP, 10_000, 3)).unwrap();
        assert_eq!(after.next_expected, before.next_expected);
        assert_eq!(after.milestone, before.milestone);
        assert_eq!(after.ipid, before.ipid);
        assert!(!receiver.nic(0).has_high_prio());
    }

    #[test]
    fn back_to_zero_snaps_to_chunk_boundaries() {
        let mut cfg = ts_config();
        cfg.back_to_zero = true;
        cfg.chunk = 4_000;
        let (mut sender, mut receiver) = hosts(cfg.clone());
        let mut sched = EventQueue::new();

        // receiver took 5 packets in order, then sees a gap
        for seq in [0u32, 1000, 2000, 3000, 4000] {
            receiver
                .receive(&data_frame(&cfg, seq, 1000, 0, 7), &mut sched)
                .unwrap();
            receiver.nic_mut(0).pop_high_prio();
        }
        receiver
            .receive(&data_frame(&cfg, 9_000, 1000, 0, 7), &mut sched)
            .unwrap();
        let rxq = receiver.rx_qp(RxKey::new(SENDER_IP, 10_000, 3)).unwrap();
        // 5000 snapped down to the chunk boundary
        assert_eq!(rxq.next_expected, 4_000);

        // sender side: the acknowledged sequence snaps too
        let key = new_flow(&mut sender, 100_000);
        sender.qp_mut(key).unwrap().tx.snd_nxt = 10_000;
        let ack = QbbRepr {
            proto: PROTO_ACK,
            ecn: 0,
            sip: RECEIVER_IP,
            dip: SENDER_IP,
            sport: 100,
            dport: 10_000,
            pg: 3,
            seq: 7_000,
            ipid: 0,
            cnp: false,
            unsched: false,
            int: IntHeader::Ts { ts: 0 },
        };
        let mut frame = vec![0u8; QbbRepr::ack_len(&cfg.int)];
        ack.emit(&mut QbbPacket::new_unchecked(&mut frame[..]), &cfg.int);
        sender.receive(&frame, &mut sched).unwrap();
        assert_eq!(sender.qp(key).unwrap().tx.snd_una, 4_000);
    }

    fn ack_frame(cfg: &Config, proto: u8, seq: u32, cnp: bool) -> Vec<u8> {
        let repr = QbbRepr {
            proto,
            ecn: 0,
            sip: RECEIVER_IP,
            dip: SENDER_IP,
            sport: 100,
            dport: 10_000,
            pg: 3,
            seq,
            ipid: 0,
            cnp,
            unsched: false,
            int: IntHeader::Ts { ts: 0 },
        };
        let mut frame = vec![0u8; QbbRepr::ack_len(&cfg.int)];
        repr.emit(&mut QbbPacket::new_unchecked(&mut frame[..]), &cfg.int);
        frame
    }

    #[test]
    fn nack_triggers_go_back_n() {
        let cfg = ts_config();
        let (mut sender, _) = hosts(cfg.clone());
        let mut sched = EventQueue::new();
        let key = new_flow(&mut sender, 100_000);
        {
            let tx = &mut sender.qp_mut(key).unwrap().tx;
            tx.snd_nxt = 50_000;
            tx.snd_una = 10_000;
        }
        sender
            .receive(&ack_frame(&cfg, PROTO_NACK, 20_000, false), &mut sched)
            .unwrap();
        let tx = &sender.qp(key).unwrap().tx;
        assert_eq!(tx.snd_una, 20_000);
        assert_eq!(tx.snd_nxt, 20_000);
    }

    #[test]
    fn completion_fires_exactly_once() {
        let cfg = ts_config();
        let (mut sender, _) = hosts(cfg.clone());
        let mut sched = EventQueue::new();
        let key = new_flow(&mut sender, 10_000);
        sender.qp_mut(key).unwrap().tx.snd_nxt = 10_000;

        let fired = Rc::new(RefCell::new(0u32));
        let fired_cb = fired.clone();
        sender.on_qp_complete(move |qp, _| {
            assert_eq!(qp.tx.snd_una, qp.tx.size);
            *fired_cb.borrow_mut() += 1;
        });

        sender
            .receive(&ack_frame(&cfg, PROTO_ACK, 10_000, false), &mut sched)
            .unwrap();
        assert_eq!(*fired.borrow(), 1);
        assert!(sender.qp(key).is_none());
        // a duplicate completion ACK finds no QP and is dropped
        sender
            .receive(&ack_frame(&cfg, PROTO_ACK, 10_000, false), &mut sched)
            .unwrap();
        assert_eq!(*fired.borrow(), 1);
    }

    #[test]
    fn completion_cancels_mlx_timers() {
        let mut cfg = ts_config();
        cfg.cc_mode = CcMode::MlxCnp;
        cfg.mlx.rate_on_first_cnp = 0.5;
        let (mut sender, _) = hosts(cfg.clone());
        let mut sched = EventQueue::new();
        let key = new_flow(&mut sender, 10_000);
        sender.qp_mut(key).unwrap().tx.snd_nxt = 5_000;

        // a CNP-flagged ACK arms all three timers
        sender
            .receive(&ack_frame(&cfg, PROTO_ACK, 1_000, true), &mut sched)
            .unwrap();
        assert_eq!(sched.len(), 3);
        assert_eq!(
            sender.qp(key).unwrap().tx.rate,
            Rate::from_gbps(50)
        );

        sender.qp_mut(key).unwrap().tx.snd_nxt = 10_000;
        sender
            .receive(&ack_frame(&cfg, PROTO_ACK, 10_000, false), &mut sched)
            .unwrap();
        assert!(sender.qp(key).is_none());
        assert_eq!(sched.len(), 0);
    }

    #[test]
    fn mlx_timer_events_drive_the_ladder() {
        let mut cfg = ts_config();
        cfg.cc_mode = CcMode::MlxCnp;
        cfg.mlx.rate_on_first_cnp = 0.5;
        let (mut sender, _) = hosts(cfg.clone());
        let mut sched = EventQueue::new();
        let key = new_flow(&mut sender, 10_000_000);
        sender
            .receive(&ack_frame(&cfg, PROTO_ACK, 1_000, true), &mut sched)
            .unwrap();
        // first the decrease check cuts by alpha/2, then the ladder recovers
        for _ in 0..500 {
            let Some((_, event)) = sched.advance() else { break };
            sender.handle_event(event, &mut sched);
        }
        let rate = sender.qp(key).unwrap().tx.rate;
        assert!(rate > Rate::from_gbps(25));
        assert!(rate <= Rate::from_gbps(100));
    }

    #[test]
    fn next_packet_stamps_and_advances() {
        let cfg = ts_config();
        let (mut sender, _) = hosts(cfg.clone());
        let key = new_flow(&mut sender, 2_500);
        let now = Instant::from_micros(3);

        let frame = sender.next_packet(key, now).unwrap();
        let packet = QbbPacket::new_unchecked(&frame[..]);
        assert_eq!(packet.proto(), PROTO_UDP);
        assert_eq!(packet.seq(), 0);
        assert_eq!(packet.ipid(), 0);
        assert!(packet.unsched());
        assert_eq!(packet.payload(&cfg.int).len(), 1000);
        let parsed = QbbRepr::parse(&packet, &cfg.int).unwrap();
        assert_eq!(
            parsed.int,
            IntHeader::Ts {
                ts: now.total_nanos() as u64
            }
        );

        sender.next_packet(key, now).unwrap();
        // the tail packet carries the leftover 500 bytes
        let frame = sender.next_packet(key, now).unwrap();
        let packet = QbbPacket::new_unchecked(&frame[..]);
        assert_eq!(packet.seq(), 2_000);
        assert_eq!(packet.ipid(), 2);
        assert_eq!(packet.payload(&cfg.int).len(), 500);
        assert!(sender.next_packet(key, now).is_none());
    }

    #[test]
    fn pkt_sent_never_moves_next_avail_backward() {
        let cfg = ts_config();
        let (mut sender, _) = hosts(cfg.clone());
        let key = new_flow(&mut sender, 1_000_000);
        let ifg = Duration::from_nanos(10);

        sender.on_packet_sent(key, 1000, ifg, Instant::from_micros(1));
        let first = sender.qp(key).unwrap().tx.next_avail;
        // 80ns serialisation at 100G plus the gap
        assert_eq!(first, Instant::from_nanos(1_090));
        // an earlier accounting cannot pull it back
        sender.on_packet_sent(key, 1000, ifg, Instant::ZERO);
        assert_eq!(sender.qp(key).unwrap().tx.next_avail, first);
    }

    #[test]
    fn link_down_redistributes_to_survivors() {
        let cfg = ts_config();
        let mut sender = RdmaHost::new(cfg);
        sender.add_nic(Rate::from_gbps(100));
        sender.add_nic(Rate::from_gbps(100));
        sender.add_route(RECEIVER_IP, 0);
        sender.add_route(RECEIVER_IP, 1);
        for sport in 0..8u16 {
            sender.add_queue_pair(
                100_000,
                3,
                SENDER_IP,
                RECEIVER_IP,
                10_000 + sport,
                100,
                0,
                Duration::from_micros(8),
                Instant::ZERO,
                Instant::FAR_FUTURE,
            );
        }
        let spread = sender.nic(0).qp_count();
        assert_eq!(spread + sender.nic(1).qp_count(), 8);

        sender.set_link_down(0);
        sender.redistribute_qps();
        assert_eq!(sender.nic(0).qp_count(), 0);
        assert_eq!(sender.nic(1).qp_count(), 8);
    }

    #[test]
    fn unknown_protocols_are_dropped() {
        let cfg = ts_config();
        let (_, mut receiver) = hosts(cfg.clone());
        let mut sched = EventQueue::new();
        let mut frame = data_frame(&cfg, 0, 100, 0, 7);
        frame[0] = 0x2A;
        receiver.receive(&frame, &mut sched).unwrap();
        assert!(!receiver.nic(0).has_high_prio());
        // truncated frames are a parse error, not a panic
        assert!(receiver.receive(&frame[..10], &mut sched).is_err());
    }
}
