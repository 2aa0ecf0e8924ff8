/*! Low-level packet access and construction.

The `wire` module deals with the packet *representation*. It provides two
levels of functionality.

 * First, it provides functions to extract fields from sequences of octets,
   and to insert fields into sequences of octets. This happens through the
   `Packet` family of structures, e.g. [QbbPacket].
 * Second, it provides a compact, high-level representation of packet data
   that can be parsed from and emitted into a sequence of octets. This
   happens through the `Repr` family of structs, e.g. [QbbRepr].

The in-band telemetry record that rides on every data packet and is echoed
on every acknowledgment lives in [int]: the bit-packed per-hop record
[IntHop], the multi-mode header [IntHeader], and the [IntCodec] handle that
fixes the process-wide telemetry mode at startup.

The `Packet::new_checked` method is a shorthand for a combination of
`Packet::new_unchecked` and `Packet::check_len`. When parsing input received
from the link, it is *necessary* to use `Packet::new_checked`; so long as
the buffer is not modified, no accessor will fail.

[QbbPacket]: struct.QbbPacket.html
[QbbRepr]: struct.QbbRepr.html
[IntHop]: struct.IntHop.html
[IntHeader]: enum.IntHeader.html
[IntCodec]: struct.IntCodec.html
*/

mod field {
    pub type Field = ::core::ops::Range<usize>;
    pub type Rest = ::core::ops::RangeFrom<usize>;
}

use core::fmt;

pub(crate) mod int;
pub use self::int::{IntCodec, IntHeader, IntHop, IntMode, INT_MAX_HOP};

pub(crate) mod qbb;
pub use self::qbb::{
    Packet as QbbPacket, Repr as QbbRepr, BASE_HEADER_LEN as QBB_BASE_HEADER_LEN, FLAG_CNP,
    FLAG_UNSCHED, MIN_L3_FRAME, PROTO_ACK, PROTO_CNP, PROTO_NACK, PROTO_UDP,
};

/// Parsing a packet failed.
///
/// Either it is malformed, or it is not supported by rocesim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error;

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wire::Error")
    }
}

pub type Result<T> = core::result::Result<T, Error>;
