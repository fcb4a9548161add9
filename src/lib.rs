//! A CoAP (RFC 7252) client engine for memory constrained endpoints
//!
//! This crate implements the client half of a CoAP conversation for devices
//! with tens of kilobytes of RAM: the wire codec (header, options with delta
//! compression, payload), the confirmable message reliability layer with
//! retransmission, the variable length framing used by CoAP over TCP
//! (RFC 8323) and a block-wise (RFC 7959) download driver.
//!
//! There's no IO in this crate. The byte transport, the blocking primitive
//! used while waiting for a datagram, message-ID / token generation and the
//! PDU buffer pool are all supplied by the host through the
//! [`Platform`](client::Platform) trait; see its documentation for the
//! contract of each role.
//!
//! # Examples
//!
//! Encoding and decoding an option list:
//!
//! ```
//! use tinycoap::opts::{self, Opt};
//!
//! let mut buf = [0; 32];
//!
//! // options must be sorted by ascending number
//! let list = [Opt::new(11u16, b"config"), Opt::new(23u16, &[0x0a])];
//! let len = opts::encode(&mut buf, &list);
//!
//! let region = &buf[..len as usize];
//! let scan = opts::scan(region, 0).unwrap();
//! assert_eq!(scan.count, 2);
//!
//! let mut decoded = opts::Options::new(region);
//! let uri_path = decoded.next().unwrap();
//! assert_eq!(uri_path.number, 11);
//! assert_eq!(uri_path.value, b"config");
//! ```
//!
//! Issuing a request is a single blocking call; see
//! [`Handle::send`](client::Handle::send) and the `get` example for a
//! complete client over `std`'s `UdpSocket`.

#![deny(missing_docs)]
#![deny(rust_2018_compatibility)]
#![deny(rust_2018_idioms)]
#![deny(warnings)]
#![no_std]

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;

pub use as_slice::{AsMutSlice, AsSlice};

#[macro_use]
mod macros;

pub mod block;
pub mod client;
pub mod msg;
pub mod opts;
pub mod tcp;
pub mod udp;

/// CoAP default port, both for UDP and TCP
pub const PORT: u16 = 5683;

/// CoAP default port when running over DTLS / TLS
pub const SECURE_PORT: u16 = 5684;

/// Maximum size of a PDU, in bytes
///
/// Both buffers obtained through
/// [`Platform::alloc_block`](client::Platform::alloc_block) must hold at
/// least this many bytes; the engine never assembles nor accepts a larger
/// datagram.
pub const MAX_PDU_SIZE: usize = 96;

/// Errors reported by the public operations of this crate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// A send is already in progress on this handle
    Busy,
    /// Invalid argument, e.g. an empty code combined with a nonzero token
    /// length
    Param,
    /// The host buffer pool is empty
    NoFreeMem,
    /// The host wait primitive timed out
    Timeout,
    /// The peer answered with a reset message
    NrstAnswer,
    /// A confirmable send exhausted its retransmissions without a valid
    /// acknowledgement
    NoAck,
    /// The separate response never arrived or failed validation
    NoResp,
    /// Incoming bytes exceeded the maximum PDU size
    RxBufferFull,
    /// Bytes were fed to a receiver that is not accepting them
    WrongState,
    /// The response carries no options; informational, not a failure
    NoOptions,
    /// The option region contains a reserved nibble or is truncated
    WrongOptions,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Error::Busy => "request already in progress",
            Error::Param => "invalid argument",
            Error::NoFreeMem => "buffer pool empty",
            Error::Timeout => "timed out waiting for the peer",
            Error::NrstAnswer => "peer reset the exchange",
            Error::NoAck => "no acknowledgement received",
            Error::NoResp => "no valid response received",
            Error::RxBufferFull => "incoming PDU exceeds the maximum size",
            Error::WrongState => "receiver is not accepting bytes",
            Error::NoOptions => "response carries no options",
            Error::WrongOptions => "malformed option region",
        };

        f.write_str(s)
    }
}

/// Lifecycle events reported to the host through
/// [`Platform::tx_signal`](client::Platform::tx_signal)
///
/// This is a closed set; hosts typically map these onto log lines, LEDs or
/// RTOS event groups.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// The assembled request is about to be written to the transport
    PacketWillStart,
    /// The request routine finished, successfully or not
    PacketDidFinish,
    /// A confirmable request is about to be retransmitted
    TxRetransmit,
    /// An empty acknowledgement for a separate response is about to be sent
    TxAck,
    /// A valid acknowledgement arrived
    AckReceived,
    /// A reset message arrived
    ResetReceived,
    /// An incoming PDU failed validation
    WrongPacketReceived,
    /// One byte of the response was accepted
    ResponseByteReceived,
    /// The incoming PDU did not fit the response buffer
    ResponseTooLong,
    /// A complete response datagram was accepted
    ResponseReceived,
}

/// Classification of an incoming PDU
///
/// Produced by [`udp::parse`] and [`tcp::parse`]. Individual findings are
/// or-ed together, except for [`RespMask::INVALID`] which is returned alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RespMask(u32);

impl RespMask {
    /// Nothing classified yet
    pub const EMPTY: Self = RespMask(0);
    /// The PDU acknowledges our confirmable request
    pub const ACK: Self = RespMask(1 << 0);
    /// The acknowledgement carries the response itself
    pub const PIGGYBACKED: Self = RespMask(1 << 1);
    /// The peer reset the exchange
    pub const NRST: Self = RespMask(1 << 2);
    /// The PDU is a response in its own message
    pub const SEPARATE: Self = RespMask(1 << 3);
    /// The response code class is 2.xx
    pub const SUCCESS_CODE: Self = RespMask(1 << 4);
    /// The response code class is 4.xx or 5.xx
    pub const FAILURE_CODE: Self = RespMask(1 << 5);
    /// The response code class is 7.xx (TCP signaling)
    pub const SIGNAL_CODE: Self = RespMask(1 << 6);
    /// The separate confirmable response must be acknowledged
    pub const NEED_SEND_ACK: Self = RespMask(1 << 8);
    /// The PDU failed validation
    pub const INVALID: Self = RespMask(1 << 31);

    /// Checks whether any bit of `other` is set in `self`
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub(crate) fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}
