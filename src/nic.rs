/*! NIC port model.

The link and PFC machinery live outside the core; what the core keeps per
port is the line rate, liveness, the high-priority queue that ACKs and
NACKs jump into ahead of data, and the round-robin cursor over the queue
pairs homed on the port. The external device model drains the high-priority
queue first and otherwise asks [NicPort::next_ready_qp] which flow may
transmit now.
*/

use std::collections::{HashMap, VecDeque};

use crate::qp::{QpKey, QueuePair};
use crate::rate::Rate;
use crate::time::Instant;

pub struct NicPort {
    data_rate: Rate,
    alive: bool,
    high_prio: VecDeque<Vec<u8>>,
    qps: Vec<QpKey>,
    rr_last: usize,
}

impl NicPort {
    pub fn new(data_rate: Rate) -> NicPort {
        NicPort {
            data_rate,
            alive: true,
            high_prio: VecDeque::new(),
            qps: Vec::new(),
            rr_last: 0,
        }
    }

    pub fn data_rate(&self) -> Rate {
        self.data_rate
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub(crate) fn set_down(&mut self) {
        self.alive = false;
    }

    pub(crate) fn enqueue_high_prio(&mut self, frame: Vec<u8>) {
        self.high_prio.push_back(frame);
    }

    /// Drain one control frame; the device sends these before any data.
    pub fn pop_high_prio(&mut self) -> Option<Vec<u8>> {
        self.high_prio.pop_front()
    }

    pub fn has_high_prio(&self) -> bool {
        !self.high_prio.is_empty()
    }

    pub(crate) fn add_qp(&mut self, key: QpKey) {
        self.qps.push(key);
    }

    pub(crate) fn remove_qp(&mut self, key: QpKey) {
        self.qps.retain(|k| *k != key);
    }

    pub(crate) fn clear_qps(&mut self) {
        self.qps.clear();
        self.rr_last = 0;
    }

    pub fn qp_count(&self) -> usize {
        self.qps.len()
    }

    /// Round-robin pick of the next flow allowed to put a packet on the
    /// wire: it must have bytes left, its pacing time must have arrived,
    /// and its window must be open. The scan resumes after the flow served
    /// last time.
    pub fn next_ready_qp(
        &mut self,
        qps: &HashMap<QpKey, QueuePair>,
        now: Instant,
    ) -> Option<QpKey> {
        if self.qps.is_empty() {
            return None;
        }
        let n = self.qps.len();
        for offset in 1..=n {
            let idx = (self.rr_last + offset) % n;
            let key = self.qps[idx];
            let Some(qp) = qps.get(&key) else { continue };
            if qp.tx.bytes_left() == 0 {
                continue;
            }
            if qp.tx.next_avail > now || qp.tx.is_win_bound() {
                continue;
            }
            if now >= qp.stop_time {
                continue;
            }
            self.rr_last = idx;
            return Some(key);
        }
        None
    }
}
