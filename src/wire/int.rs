/*! In-band network telemetry (INT) records.

Every data packet carries a fixed-size telemetry area stamped by the
switches it traverses and echoed verbatim on the acknowledgment. The area
has one of several mutually exclusive layouts (per-hop records, a bare
timestamp, a PINT power byte, or the Swift delay triple), selected once per
process and never changed afterwards. [IntCodec] captures that choice
together with the PINT width and the queue scaling factor; every packet
builder and parser receives the codec explicitly instead of consulting a
global.

All multi-byte INT fields are little-endian on the wire, matching the
layout the switch-side stampers write.
*/

use byteorder::{ByteOrder, LittleEndian};

use super::{Error, Result};

/// Maximum number of per-hop records in a [IntMode::Normal] header.
pub const INT_MAX_HOP: usize = 5;

/// One switch hop's telemetry, bit-packed into a 64-bit word.
///
/// Field allocation, least significant bit first:
/// `line_rate_idx:3, time:24, bytes:20, qlen:17`. Byte counts are stored in
/// 128-byte units and queue lengths in 80-byte units, both additionally
/// scaled by the codec's `multi` factor. Timestamps are nanoseconds
/// truncated to 24 bits; the delta accessors undo the wraparound.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IntHop(u64);

const RATE_SHIFT: u32 = 0;
const TIME_SHIFT: u32 = 3;
const BYTES_SHIFT: u32 = 27;
const QLEN_SHIFT: u32 = 47;

impl IntHop {
    pub const TIME_WIDTH: u32 = 24;
    pub const BYTES_WIDTH: u32 = 20;
    pub const QLEN_WIDTH: u32 = 17;
    pub const RATE_WIDTH: u32 = 64 - Self::TIME_WIDTH - Self::BYTES_WIDTH - Self::QLEN_WIDTH;

    pub const BYTE_UNIT: u64 = 128;
    pub const QLEN_UNIT: u64 = 80;

    /// Line rates representable in the 3-bit index. Index 5 is the zero
    /// marker and index 6 is a legacy alias for it.
    const LINE_RATE_VALUES: [u64; 8] = [
        25_000_000_000,
        50_000_000_000,
        100_000_000_000,
        200_000_000_000,
        400_000_000_000,
        0,
        0,
        40_000_000_000,
    ];

    fn get(&self, shift: u32, width: u32) -> u64 {
        (self.0 >> shift) & ((1 << width) - 1)
    }

    fn set(&mut self, shift: u32, width: u32, value: u64) {
        let mask = ((1u64 << width) - 1) << shift;
        self.0 = (self.0 & !mask) | ((value << shift) & mask);
    }

    /// Stamp this hop with the switch's current state. `bytes` and `qlen`
    /// are divided down into their wire units; `rate` must be one of the
    /// representable line rates, otherwise the zero marker is stored.
    pub fn stamp(&mut self, time: u64, bytes: u64, qlen: u64, rate: u64, multi: u32) {
        self.set(TIME_SHIFT, Self::TIME_WIDTH, time);
        self.set(
            BYTES_SHIFT,
            Self::BYTES_WIDTH,
            bytes / (Self::BYTE_UNIT * multi as u64),
        );
        self.set(
            QLEN_SHIFT,
            Self::QLEN_WIDTH,
            qlen / (Self::QLEN_UNIT * multi as u64),
        );
        let idx = match rate {
            25_000_000_000 => 0,
            50_000_000_000 => 1,
            100_000_000_000 => 2,
            200_000_000_000 => 3,
            400_000_000_000 => 4,
            0 => 5,
            40_000_000_000 => 7,
            other => {
                net_debug!("int: unrepresentable line rate {}", other);
                5
            }
        };
        self.set(RATE_SHIFT, Self::RATE_WIDTH, idx);
    }

    pub fn line_rate_idx(&self) -> u8 {
        self.get(RATE_SHIFT, Self::RATE_WIDTH) as u8
    }

    /// Line rate in bits per second.
    pub fn line_rate(&self) -> u64 {
        Self::LINE_RATE_VALUES[self.line_rate_idx() as usize]
    }

    /// Raw 24-bit timestamp.
    pub fn time(&self) -> u64 {
        self.get(TIME_SHIFT, Self::TIME_WIDTH)
    }

    /// Cumulative transmitted bytes, descaled.
    pub fn bytes(&self, multi: u32) -> u64 {
        self.get(BYTES_SHIFT, Self::BYTES_WIDTH) * Self::BYTE_UNIT * multi as u64
    }

    /// Queue length in bytes, descaled.
    pub fn qlen(&self, multi: u32) -> u64 {
        self.get(QLEN_SHIFT, Self::QLEN_WIDTH) * Self::QLEN_UNIT * multi as u64
    }

    /// `self.bytes - prev.bytes` modulo the field width, descaled.
    pub fn bytes_delta(&self, prev: &IntHop, multi: u32) -> u64 {
        let a = self.get(BYTES_SHIFT, Self::BYTES_WIDTH);
        let b = prev.get(BYTES_SHIFT, Self::BYTES_WIDTH);
        let delta = if a >= b {
            a - b
        } else {
            a + (1 << Self::BYTES_WIDTH) - b
        };
        delta * Self::BYTE_UNIT * multi as u64
    }

    /// `self.time - prev.time` modulo the field width.
    pub fn time_delta(&self, prev: &IntHop) -> u64 {
        let a = self.time();
        let b = prev.time();
        if a >= b {
            a - b
        } else {
            a + (1 << Self::TIME_WIDTH) - b
        }
    }

    fn to_words(self) -> (u32, u32) {
        (self.0 as u32, (self.0 >> 32) as u32)
    }

    fn from_words(lo: u32, hi: u32) -> IntHop {
        IntHop((hi as u64) << 32 | lo as u64)
    }
}

/// The process-wide telemetry layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntMode {
    /// Per-hop records plus a hop count.
    Normal,
    /// A bare 64-bit send timestamp (TIMELY, RTT-QCN, UFCC).
    Ts,
    /// One or two bytes of log-encoded utilization power.
    Pint,
    /// Swift's (remote_delay, ts, nhop) triple.
    Swift,
    /// No telemetry area at all.
    None,
}

/// Parsed telemetry area. Exactly one variant is in use per process,
/// matching the codec's mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntHeader {
    Normal {
        hops: [IntHop; INT_MAX_HOP],
        nhop: u16,
    },
    Ts {
        ts: u64,
    },
    Pint {
        power: u16,
    },
    /// Logical field order. On the wire the three words appear in the
    /// *reverse* order `(nhop, ts, remote_delay)`; see [IntCodec::emit].
    Swift {
        remote_delay: u64,
        ts: u64,
        nhop: u64,
    },
    None,
}

impl IntHeader {
    /// The echoed send timestamp, or 0 when the mode does not carry one.
    pub fn ts(&self) -> u64 {
        match *self {
            IntHeader::Ts { ts } => ts,
            _ => 0,
        }
    }

    /// The PINT power value, or 0 outside PINT mode.
    pub fn power(&self) -> u16 {
        match *self {
            IntHeader::Pint { power } => power,
            _ => 0,
        }
    }

    pub fn set_power(&mut self, value: u16) {
        if let IntHeader::Pint { power } = self {
            *power = value;
        }
    }

    /// Append a hop record, as a switch would. Past [INT_MAX_HOP] the
    /// records wrap around while the count keeps growing.
    pub fn push_hop(&mut self, time: u64, bytes: u64, qlen: u64, rate: u64, multi: u32) {
        if let IntHeader::Normal { hops, nhop } = self {
            let idx = *nhop as usize % INT_MAX_HOP;
            hops[idx].stamp(time, bytes, qlen, rate, multi);
            *nhop += 1;
        }
    }

    /// Bump the Swift hop count.
    pub fn increment_hop(&mut self) {
        if let IntHeader::Swift { nhop, .. } = self {
            *nhop += 1;
        }
    }
}

/// The immutable telemetry configuration handle.
///
/// Created once at startup and passed explicitly to every packet-builder
/// path; the mode and PINT width must match on sender, switches, and
/// receiver for the layouts to interoperate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntCodec {
    mode: IntMode,
    pint_bytes: u8,
    multi: u32,
}

impl IntCodec {
    pub fn new(mode: IntMode, pint_bytes: u8, multi: u32) -> IntCodec {
        assert!(
            pint_bytes == 1 || pint_bytes == 2,
            "pint_bytes must be 1 or 2"
        );
        assert!(multi >= 1, "multi must be at least 1");
        IntCodec {
            mode,
            pint_bytes,
            multi,
        }
    }

    pub fn mode(&self) -> IntMode {
        self.mode
    }

    pub fn pint_bytes(&self) -> u8 {
        self.pint_bytes
    }

    pub fn multi(&self) -> u32 {
        self.multi
    }

    /// The exact number of bytes [IntCodec::emit] writes. This is the only
    /// authoritative size; header-length math everywhere derives from it.
    pub fn static_size(&self) -> usize {
        match self.mode {
            IntMode::Normal => INT_MAX_HOP * 8 + 2,
            IntMode::Ts => 8,
            IntMode::Pint => self.pint_bytes as usize,
            IntMode::Swift => 24,
            IntMode::None => 0,
        }
    }

    /// A zeroed header of the codec's mode, the state a sender stamps
    /// before the packet leaves the host.
    pub fn empty(&self) -> IntHeader {
        match self.mode {
            IntMode::Normal => IntHeader::Normal {
                hops: [IntHop::default(); INT_MAX_HOP],
                nhop: 0,
            },
            IntMode::Ts => IntHeader::Ts { ts: 0 },
            IntMode::Pint => IntHeader::Pint { power: 0 },
            IntMode::Swift => IntHeader::Swift {
                remote_delay: 0,
                ts: 0,
                nhop: 0,
            },
            IntMode::None => IntHeader::None,
        }
    }

    /// Serialize `header` into `buf`, which must hold at least
    /// [IntCodec::static_size] bytes. A header whose variant does not match
    /// the codec's mode serializes as the zeroed layout of the mode.
    pub fn emit(&self, header: &IntHeader, buf: &mut [u8]) {
        match self.mode {
            IntMode::Normal => {
                let (hops, nhop) = match *header {
                    IntHeader::Normal { hops, nhop } => (hops, nhop),
                    _ => ([IntHop::default(); INT_MAX_HOP], 0),
                };
                for (i, hop) in hops.iter().enumerate() {
                    let (lo, hi) = hop.to_words();
                    LittleEndian::write_u32(&mut buf[i * 8..], lo);
                    LittleEndian::write_u32(&mut buf[i * 8 + 4..], hi);
                }
                LittleEndian::write_u16(&mut buf[INT_MAX_HOP * 8..], nhop);
            }
            IntMode::Ts => {
                LittleEndian::write_u64(buf, header.ts());
            }
            IntMode::Pint => {
                let power = header.power();
                if self.pint_bytes == 1 {
                    buf[0] = power as u8;
                } else {
                    LittleEndian::write_u16(buf, power);
                }
            }
            IntMode::Swift => {
                // The Swift triple goes out in reverse field order: the
                // wire layout is (nhop, ts, remote_delay).
                let (remote_delay, ts, nhop) = match *header {
                    IntHeader::Swift {
                        remote_delay,
                        ts,
                        nhop,
                    } => (remote_delay, ts, nhop),
                    _ => (0, 0, 0),
                };
                LittleEndian::write_u64(&mut buf[0..], nhop);
                LittleEndian::write_u64(&mut buf[8..], ts);
                LittleEndian::write_u64(&mut buf[16..], remote_delay);
            }
            IntMode::None => {}
        }
    }

    /// Parse the telemetry area at the front of `buf`.
    pub fn parse(&self, buf: &[u8]) -> Result<IntHeader> {
        if buf.len() < self.static_size() {
            return Err(Error);
        }
        Ok(match self.mode {
            IntMode::Normal => {
                let mut hops = [IntHop::default(); INT_MAX_HOP];
                for (i, hop) in hops.iter_mut().enumerate() {
                    let lo = LittleEndian::read_u32(&buf[i * 8..]);
                    let hi = LittleEndian::read_u32(&buf[i * 8 + 4..]);
                    *hop = IntHop::from_words(lo, hi);
                }
                let nhop = LittleEndian::read_u16(&buf[INT_MAX_HOP * 8..]);
                IntHeader::Normal { hops, nhop }
            }
            IntMode::Ts => IntHeader::Ts {
                ts: LittleEndian::read_u64(buf),
            },
            IntMode::Pint => IntHeader::Pint {
                power: if self.pint_bytes == 1 {
                    buf[0] as u16
                } else {
                    LittleEndian::read_u16(buf)
                },
            },
            IntMode::Swift => IntHeader::Swift {
                nhop: LittleEndian::read_u64(&buf[0..]),
                ts: LittleEndian::read_u64(&buf[8..]),
                remote_delay: LittleEndian::read_u64(&buf[16..]),
            },
            IntMode::None => IntHeader::None,
        })
    }
}
