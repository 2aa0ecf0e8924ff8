/*! The custom L3 header carried by every simulated packet.

One header layout serves all four packet kinds (UDP data, ACK, NACK and
CNP), distinguished by the protocol byte, the way the hardware model parses
whole frames into a single flat header. The five-tuple, sequence number,
flag bits and the telemetry area all live here; a data packet's payload
follows the telemetry area and is plain filler.
*/

use byteorder::{ByteOrder, NetworkEndian};
use core::fmt;

use super::int::{IntCodec, IntHeader};
use super::{Error, Result};

mod field {
    #![allow(non_snake_case)]

    use crate::wire::field::*;

    pub const PROTO: usize = 0;
    pub const ECN: usize = 1;
    pub const SIP: Field = 2..6;
    pub const DIP: Field = 6..10;
    pub const SPORT: Field = 10..12;
    pub const DPORT: Field = 12..14;
    pub const PG: Field = 14..16;
    pub const SEQ: Field = 16..20;
    pub const IPID: Field = 20..22;
    pub const FLAGS: usize = 22;

    pub const fn INT(int_size: usize) -> Field {
        23..(23 + int_size)
    }

    pub const fn PAYLOAD(int_size: usize) -> Rest {
        (23 + int_size)..
    }
}

/// Header length excluding the mode-dependent telemetry area.
pub const BASE_HEADER_LEN: usize = 23;

/// UDP data packet.
pub const PROTO_UDP: u8 = 0x11;
/// Cumulative acknowledgment.
pub const PROTO_ACK: u8 = 0xFC;
/// Negative acknowledgment (go-back-N trigger).
pub const PROTO_NACK: u8 = 0xFD;
/// Legacy congestion notification packet.
pub const PROTO_CNP: u8 = 0xFF;

/// Flag bit: congestion experienced (set on ACKs echoing IP-ECN marks).
pub const FLAG_CNP: u8 = 0;
/// Flag bit: sent while cumulative bytes were within one BDP.
pub const FLAG_UNSCHED: u8 = 1;

/// Minimum L3 frame length. The physical minimum Ethernet frame is 60
/// bytes of which 14 are L1 overhead; ACKs are padded up to the remainder.
pub const MIN_L3_FRAME: usize = 46;

/// A read/write wrapper around a qbb packet buffer.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    /// Imbue a raw octet buffer with qbb packet structure.
    pub const fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    /// Shorthand for a combination of [new_unchecked] and [check_len].
    ///
    /// [new_unchecked]: #method.new_unchecked
    /// [check_len]: #method.check_len
    pub fn new_checked(buffer: T, codec: &IntCodec) -> Result<Packet<T>> {
        let packet = Self::new_unchecked(buffer);
        packet.check_len(codec)?;
        Ok(packet)
    }

    /// Ensure that no accessor method will panic if called.
    /// Returns `Err(Error)` if the buffer is shorter than the base header
    /// plus the codec's telemetry area.
    pub fn check_len(&self, codec: &IntCodec) -> Result<()> {
        if self.buffer.as_ref().len() < BASE_HEADER_LEN + codec.static_size() {
            Err(Error)
        } else {
            Ok(())
        }
    }

    /// Consume the packet, returning the underlying buffer.
    pub fn into_inner(self) -> T {
        self.buffer
    }

    /// Return the protocol byte.
    #[inline]
    pub fn proto(&self) -> u8 {
        self.buffer.as_ref()[field::PROTO]
    }

    /// Return the IP-ECN bits.
    #[inline]
    pub fn ecn(&self) -> u8 {
        self.buffer.as_ref()[field::ECN]
    }

    /// Return the source address.
    #[inline]
    pub fn sip(&self) -> u32 {
        NetworkEndian::read_u32(&self.buffer.as_ref()[field::SIP])
    }

    /// Return the destination address.
    #[inline]
    pub fn dip(&self) -> u32 {
        NetworkEndian::read_u32(&self.buffer.as_ref()[field::DIP])
    }

    /// Return the source port.
    #[inline]
    pub fn sport(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::SPORT])
    }

    /// Return the destination port.
    #[inline]
    pub fn dport(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::DPORT])
    }

    /// Return the priority group.
    #[inline]
    pub fn pg(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::PG])
    }

    /// Return the sequence number. For ACKs this is the receiver's
    /// cumulative next-expected sequence.
    #[inline]
    pub fn seq(&self) -> u32 {
        NetworkEndian::read_u32(&self.buffer.as_ref()[field::SEQ])
    }

    /// Return the IP identification counter.
    #[inline]
    pub fn ipid(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::IPID])
    }

    /// Return the flags byte.
    #[inline]
    pub fn flags(&self) -> u8 {
        self.buffer.as_ref()[field::FLAGS]
    }

    /// Return the congestion-notification flag.
    #[inline]
    pub fn cnp(&self) -> bool {
        (self.flags() >> FLAG_CNP) & 1 != 0
    }

    /// Return the unscheduled tag.
    #[inline]
    pub fn unsched(&self) -> bool {
        (self.flags() >> FLAG_UNSCHED) & 1 != 0
    }

    /// Return the raw telemetry area.
    #[inline]
    pub fn int_bytes(&self, codec: &IntCodec) -> &[u8] {
        &self.buffer.as_ref()[field::INT(codec.static_size())]
    }

    /// Return the payload following the telemetry area.
    #[inline]
    pub fn payload(&self, codec: &IntCodec) -> &[u8] {
        &self.buffer.as_ref()[field::PAYLOAD(codec.static_size())]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    /// Set the protocol byte.
    #[inline]
    pub fn set_proto(&mut self, value: u8) {
        self.buffer.as_mut()[field::PROTO] = value;
    }

    /// Set the IP-ECN bits.
    #[inline]
    pub fn set_ecn(&mut self, value: u8) {
        self.buffer.as_mut()[field::ECN] = value;
    }

    /// Set the source address.
    #[inline]
    pub fn set_sip(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::SIP], value)
    }

    /// Set the destination address.
    #[inline]
    pub fn set_dip(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::DIP], value)
    }

    /// Set the source port.
    #[inline]
    pub fn set_sport(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::SPORT], value)
    }

    /// Set the destination port.
    #[inline]
    pub fn set_dport(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::DPORT], value)
    }

    /// Set the priority group.
    #[inline]
    pub fn set_pg(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::PG], value)
    }

    /// Set the sequence number.
    #[inline]
    pub fn set_seq(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::SEQ], value)
    }

    /// Set the IP identification counter.
    #[inline]
    pub fn set_ipid(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::IPID], value)
    }

    /// Set the flags byte.
    #[inline]
    pub fn set_flags(&mut self, value: u8) {
        self.buffer.as_mut()[field::FLAGS] = value;
    }

    /// Return a mutable view of the telemetry area.
    #[inline]
    pub fn int_bytes_mut(&mut self, codec: &IntCodec) -> &mut [u8] {
        &mut self.buffer.as_mut()[field::INT(codec.static_size())]
    }

    /// Return a mutable view of the payload.
    #[inline]
    pub fn payload_mut(&mut self, codec: &IntCodec) -> &mut [u8] {
        &mut self.buffer.as_mut()[field::PAYLOAD(codec.static_size())]
    }
}

impl<T: AsRef<[u8]>> AsRef<[u8]> for Packet<T> {
    fn as_ref(&self) -> &[u8] {
        self.buffer.as_ref()
    }
}

/// A high-level representation of a qbb packet header.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    pub proto: u8,
    pub ecn: u8,
    pub sip: u32,
    pub dip: u32,
    pub sport: u16,
    pub dport: u16,
    pub pg: u16,
    pub seq: u32,
    pub ipid: u16,
    pub cnp: bool,
    pub unsched: bool,
    pub int: IntHeader,
}

impl Repr {
    /// Parse a qbb packet and return a high-level representation.
    pub fn parse<T: AsRef<[u8]> + ?Sized>(
        packet: &Packet<&T>,
        codec: &IntCodec,
    ) -> Result<Repr> {
        packet.check_len(codec)?;
        Ok(Repr {
            proto: packet.proto(),
            ecn: packet.ecn(),
            sip: packet.sip(),
            dip: packet.dip(),
            sport: packet.sport(),
            dport: packet.dport(),
            pg: packet.pg(),
            seq: packet.seq(),
            ipid: packet.ipid(),
            cnp: packet.cnp(),
            unsched: packet.unsched(),
            int: codec.parse(packet.int_bytes(codec))?,
        })
    }

    /// Return the length of the header that will be emitted from this
    /// high-level representation.
    pub fn header_len(codec: &IntCodec) -> usize {
        BASE_HEADER_LEN + codec.static_size()
    }

    /// Total buffer length for a packet with `payload_len` payload bytes.
    pub fn buffer_len(codec: &IntCodec, payload_len: usize) -> usize {
        Self::header_len(codec) + payload_len
    }

    /// Buffer length of an ACK/NACK: the header, padded up to the minimum
    /// L2 frame (IP + PPP + qbb totalling at least 60 bytes on the wire).
    pub fn ack_len(codec: &IntCodec) -> usize {
        Self::header_len(codec).max(MIN_L3_FRAME)
    }

    /// Emit a high-level representation into a qbb packet.
    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]>>(&self, packet: &mut Packet<T>, codec: &IntCodec) {
        packet.set_proto(self.proto);
        packet.set_ecn(self.ecn);
        packet.set_sip(self.sip);
        packet.set_dip(self.dip);
        packet.set_sport(self.sport);
        packet.set_dport(self.dport);
        packet.set_pg(self.pg);
        packet.set_seq(self.seq);
        packet.set_ipid(self.ipid);
        let mut flags = 0u8;
        if self.cnp {
            flags |= 1 << FLAG_CNP;
        }
        if self.unsched {
            flags |= 1 << FLAG_UNSCHED;
        }
        packet.set_flags(flags);
        codec.emit(&self.int, packet.int_bytes_mut(codec));
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> fmt::Display for Packet<&'a T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "qbb proto=0x{:02x} {:08x}:{}->{:08x}:{} pg={} seq={}",
            self.proto(),
            self.sip(),
            self.sport(),
            self.dip(),
            self.dport(),
            self.pg(),
            self.seq()
        )
    }
}
