//! Request driver: buffer management, transport dispatch, the confirmable
//! message reliability loop and the byte-stream receiver
//!
//! A [`Handle`] represents one endpoint. [`Handle::send`] is a blocking
//! call: it assembles the request into a buffer obtained from the host,
//! writes it to the transport, waits for the acknowledgement (retransmitting
//! confirmable requests with a growing back-off), waits for the response,
//! decodes it and invokes the request callback, all before returning. The
//! only suspension points are [`Platform::tx_data`] and
//! [`Platform::wait_event`]; the engine itself never consults a clock and
//! spawns nothing.

use cast::{u16, usize};
use log::{debug, trace};

use crate::msg::{Code, Type};
use crate::opts::{self, Opt, Options};
use crate::{tcp, udp, AsMutSlice, AsSlice, Error, RespMask, Signal, MAX_PDU_SIZE};

/* Transmission parameters */
/// Base wait for the first acknowledgement, in milliseconds
pub const ACK_TIMEOUT_MS: u32 = 5_000;

/// Retransmission back-off multiplier, in fixed-point hundredths
pub const ACK_RANDOM_FACTOR: u32 = 130;

/// Retransmissions allowed after the initial transmission
pub const MAX_RETRANSMIT: u32 = 3;

/// Maximum wait for a separate response, in milliseconds
pub const RESP_TIMEOUT_MS: u32 = 9_000;

/// Transport an endpoint is reached over
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    /// CoAP over UDP (RFC 7252)
    Udp,
    /// CoAP over TCP (RFC 8323)
    Tcp,
    /// Reserved; requests over it are rejected with [`Error::Param`]
    Sms,
}

#[derive(Clone, Copy, PartialEq)]
enum State {
    Idle,
    Sending,
}

/// The host environment of the engine
///
/// | role | contract |
/// |---|---|
/// | `alloc_block` / `free_block` | PDU sized buffer pool; at most two blocks live per send |
/// | `tx_data` | write raw bytes to the wire; blocking allowed |
/// | `wait_event` | block until the receive path completes a datagram or the timeout fires |
/// | `tx_signal` | lifecycle notifications, see [`Signal`] |
/// | `message_id` | fresh 16-bit message ID, ideally monotonic per destination |
/// | `fill_token` | unique token bytes |
pub trait Platform {
    /// Buffer handed out by the pool; must hold at least [`MAX_PDU_SIZE`]
    /// bytes
    type Chunk: AsSlice<Element = u8> + AsMutSlice<Element = u8>;

    /// Obtains a buffer from the pool, or `None` when it is exhausted
    fn alloc_block(&mut self) -> Option<Self::Chunk>;

    /// Returns a buffer to the pool
    fn free_block(&mut self, chunk: Self::Chunk);

    /// Writes raw bytes to the transport
    fn tx_data(&mut self, buf: &[u8]) -> Result<(), Error>;

    /// Blocks until the receive path completes a datagram or `timeout_ms`
    /// expires
    ///
    /// While blocked, the host feeds arriving data into `rx` with
    /// [`Receiver::byte`] or [`Receiver::packet`]. Return `Ok` once
    /// [`Receiver::is_complete`] reports a whole datagram (byte-stream hosts
    /// detect the end of a packet themselves, e.g. with an inter-byte
    /// timeout) and `Err(`[`Error::Timeout`]`)` when the timeout fired
    /// first. Returning `Ok` without having fed any bytes is treated as an
    /// invalid reception by the driver.
    fn wait_event(&mut self, rx: &mut Receiver<'_>, timeout_ms: u32) -> Result<(), Error>;

    /// Notifies the host of a lifecycle event
    fn tx_signal(&mut self, signal: Signal);

    /// Returns a fresh message ID
    fn message_id(&mut self) -> u16;

    /// Fills `token` with unique bytes
    fn fill_token(&mut self, token: &mut [u8]);
}

/// A request descriptor
///
/// The descriptor is not modified during the send; the mutable borrow
/// exists only so the callback can capture state.
pub struct Request<'a> {
    /// [`Type::Confirmable`] or [`Type::NonConfirmable`]
    pub ty: Type,
    /// Request code, usually one of [`crate::msg::Method`]
    pub code: Code,
    /// Token length in bytes, `0..=8`
    pub tkl: u8,
    /// Payload; an empty slice is not serialized
    pub payload: &'a [u8],
    /// Options, sorted by ascending number
    pub options: &'a [Opt<'a>],
    /// Invoked with the decoded response; everything it borrows dies when
    /// it returns
    pub callback: Option<&'a mut dyn FnMut(&Response<'_>)>,
}

/// A decoded response, handed to the request callback
pub struct Response<'a> {
    /// Response code
    pub code: Code,
    /// Payload; empty when the response carries none
    pub payload: &'a [u8],
    opts: &'a [u8],
}

impl<'a> Response<'a> {
    /// Returns an iterator over the options of the response
    pub fn options(&self) -> Options<'a> {
        Options::new(self.opts)
    }
}

/// Accumulates one incoming PDU while the driver waits for it
///
/// A receiver only exists for the duration of a [`Platform::wait_event`]
/// call; bytes arriving outside a wait have nowhere to go, which is exactly
/// the intent. Once a whole datagram has been accepted further input is
/// refused with [`Error::WrongState`].
pub struct Receiver<'a> {
    buf: &'a mut [u8],
    len: u16,
    complete: bool,
}

impl<'a> Receiver<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Receiver {
            buf,
            len: 0,
            complete: false,
        }
    }

    /// Appends one received byte
    ///
    /// Fails with [`Error::RxBufferFull`] (and signals
    /// [`Signal::ResponseTooLong`]) when the byte does not fit the PDU
    /// buffer, and with [`Error::WrongState`] after a completed datagram.
    /// The end of a byte-streamed packet is detected by the host, typically
    /// through an inter-byte timeout.
    pub fn byte<P>(&mut self, p: &mut P, byte: u8) -> Result<(), Error>
    where
        P: Platform,
    {
        if self.complete {
            return Err(Error::WrongState);
        }

        if usize(self.len) >= self.buf.len() {
            p.tx_signal(Signal::ResponseTooLong);
            return Err(Error::RxBufferFull);
        }

        self.buf[usize(self.len)] = byte;
        self.len += 1;
        p.tx_signal(Signal::ResponseByteReceived);

        Ok(())
    }

    /// Accepts a whole datagram and completes the reception
    ///
    /// Data beyond the PDU buffer is truncated and reported as
    /// [`Error::RxBufferFull`] (with [`Signal::ResponseTooLong`]). A second
    /// datagram is refused with [`Error::WrongState`].
    pub fn packet<P>(&mut self, p: &mut P, data: &[u8]) -> Result<(), Error>
    where
        P: Platform,
    {
        if self.complete {
            return Err(Error::WrongState);
        }

        let n = core::cmp::min(data.len(), self.buf.len());
        self.buf[..n].copy_from_slice(&data[..n]);
        self.len = u16(n).unwrap();

        if data.len() > self.buf.len() {
            p.tx_signal(Signal::ResponseTooLong);
            return Err(Error::RxBufferFull);
        }

        self.complete = true;
        p.tx_signal(Signal::ResponseReceived);

        Ok(())
    }

    /// Whether a whole datagram has been received
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Number of bytes received so far
    pub fn len(&self) -> u16 {
        self.len
    }

    /// Whether no bytes have been received yet
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Per endpoint state
pub struct Handle {
    name: &'static str,
    transport: Transport,
    state: State,
}

impl Handle {
    /// Creates a handle for an endpoint reached over `transport`
    ///
    /// The name only shows up in log output.
    pub fn new(name: &'static str, transport: Transport) -> Self {
        Handle {
            name,
            transport,
            state: State::Idle,
        }
    }

    /// Returns the name of this handle
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the transport of this handle
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Sends a request and drives it to completion
    ///
    /// Blocks until the whole exchange is over: assembly, transmission, the
    /// acknowledgement phase with retransmissions (confirmable requests over
    /// UDP), the response wait and the callback. Only one request can be in
    /// flight per handle; a reentrant call fails with [`Error::Busy`].
    ///
    /// A response buffer is only allocated when one can arrive, i.e. for
    /// confirmable requests or when a callback is registered. Both buffers
    /// are returned to the pool before this method returns, whatever the
    /// outcome; [`Signal::PacketDidFinish`] is always the last signal of a
    /// send.
    ///
    /// # Errors
    ///
    /// - [`Error::Param`]: token longer than 8 bytes, an empty code with a
    ///   token, a type other than CON / NON, or the reserved transport
    /// - [`Error::NoFreeMem`]: the buffer pool ran dry
    /// - [`Error::NoAck`]: retransmissions exhausted, or the
    ///   acknowledgement failed validation
    /// - [`Error::NrstAnswer`]: the peer reset the exchange
    /// - [`Error::Timeout`], [`Error::NoResp`]: the separate response timed
    ///   out, never arrived or failed validation
    /// - [`Error::WrongOptions`]: the response options are malformed
    ///
    /// # Panics
    ///
    /// Panics if token, options and payload assemble to more than
    /// [`MAX_PDU_SIZE`] bytes.
    pub fn send<P>(&mut self, p: &mut P, req: &mut Request<'_>) -> Result<(), Error>
    where
        P: Platform,
    {
        if self.state == State::Sending {
            return Err(Error::Busy);
        }
        self.state = State::Sending;

        let res = self.run(p, req);

        self.state = State::Idle;
        p.tx_signal(Signal::PacketDidFinish);

        res
    }

    fn run<P>(&mut self, p: &mut P, req: &mut Request<'_>) -> Result<(), Error>
    where
        P: Platform,
    {
        if req.tkl > 8 {
            return Err(Error::Param);
        }
        if req.code == Code::EMPTY && req.tkl != 0 {
            return Err(Error::Param);
        }
        match req.ty {
            Type::Confirmable | Type::NonConfirmable => {}
            _ => return Err(Error::Param),
        }

        let mut request = match p.alloc_block() {
            Some(chunk) => chunk,
            None => return Err(Error::NoFreeMem),
        };

        // a response can only arrive for a confirmable request or when the
        // caller wants one
        let mut response = if req.ty == Type::Confirmable || req.callback.is_some() {
            match p.alloc_block() {
                Some(chunk) => Some(chunk),
                None => {
                    p.free_block(request);
                    return Err(Error::NoFreeMem);
                }
            }
        } else {
            None
        };

        let res = {
            let req_buf = &mut request.as_mut_slice()[..MAX_PDU_SIZE];
            let resp_buf = response
                .as_mut()
                .map(|chunk| &mut chunk.as_mut_slice()[..MAX_PDU_SIZE]);

            match self.transport {
                Transport::Udp => self.run_udp(p, req, req_buf, resp_buf),
                Transport::Tcp => self.run_tcp(p, req, req_buf, resp_buf),
                Transport::Sms => Err(Error::Param),
            }
        };

        if let Some(chunk) = response {
            p.free_block(chunk);
        }
        p.free_block(request);

        res
    }

    fn run_udp<P>(
        &self,
        p: &mut P,
        req: &mut Request<'_>,
        req_buf: &mut [u8],
        mut resp: Option<&mut [u8]>,
    ) -> Result<(), Error>
    where
        P: Platform,
    {
        let req_len = usize(udp::assemble(p, req_buf, req));
        trace!("{}: >> {:x?}", self.name, &req_buf[..req_len]);

        p.tx_signal(Signal::PacketWillStart);
        p.tx_data(&req_buf[..req_len])?;

        let mut mask = RespMask::EMPTY;
        let mut resp_len = 0;

        /* acknowledgement phase */
        if req.ty == Type::Confirmable {
            if let Some(resp_buf) = resp.as_deref_mut() {
                resp_len = wait_ack(p, &req_buf[..req_len], resp_buf, self.name)?;
                trace!("{}: << {:x?}", self.name, &resp_buf[..resp_len]);

                mask = udp::parse(&req_buf[..req_len], &resp_buf[..resp_len]);

                if mask.contains(RespMask::ACK) {
                    p.tx_signal(Signal::AckReceived);
                } else if mask.contains(RespMask::NRST) {
                    p.tx_signal(Signal::ResetReceived);
                    return Err(Error::NrstAnswer);
                } else if mask.contains(RespMask::INVALID) {
                    p.tx_signal(Signal::WrongPacketReceived);
                    return Err(Error::NoAck);
                }
                // a separate response that raced the acknowledgement is
                // handled by the response phase below
            }
        }

        /* response phase */
        if let Some(callback) = req.callback.as_deref_mut() {
            if let Some(resp_buf) = resp.as_deref_mut() {
                if req.ty != Type::Confirmable || !mask.contains(RespMask::PIGGYBACKED) {
                    let mut rx = Receiver::new(&mut resp_buf[..]);
                    p.wait_event(&mut rx, RESP_TIMEOUT_MS)?;
                    resp_len = usize(rx.len());

                    trace!("{}: << {:x?}", self.name, &resp_buf[..resp_len]);

                    mask = udp::parse(&req_buf[..req_len], &resp_buf[..resp_len]);

                    if mask.contains(RespMask::INVALID) {
                        p.tx_signal(Signal::WrongPacketReceived);
                        return Err(Error::NoResp);
                    } else if mask.contains(RespMask::NRST) {
                        p.tx_signal(Signal::ResetReceived);
                        return Err(Error::NrstAnswer);
                    }
                }

                let response = &resp_buf[..resp_len];
                let code = Code(response[1]);
                deliver(self.name, response, udp::options_start(response), code, callback)?;

                /* acknowledge a separate confirmable response */
                if mask.contains(RespMask::NEED_SEND_ACK) {
                    let ack_len = usize(udp::assemble_ack(req_buf, response));
                    p.tx_signal(Signal::TxAck);
                    p.tx_data(&req_buf[..ack_len])?;
                }
            }
        }

        Ok(())
    }

    fn run_tcp<P>(
        &self,
        p: &mut P,
        req: &mut Request<'_>,
        req_buf: &mut [u8],
        mut resp: Option<&mut [u8]>,
    ) -> Result<(), Error>
    where
        P: Platform,
    {
        let req_len = usize(tcp::assemble(p, req_buf, req)?);
        trace!("{}: >> {:x?}", self.name, &req_buf[..req_len]);

        p.tx_signal(Signal::PacketWillStart);
        p.tx_data(&req_buf[..req_len])?;

        if let Some(callback) = req.callback.as_deref_mut() {
            if let Some(resp_buf) = resp.as_deref_mut() {
                let mut rx = Receiver::new(&mut resp_buf[..]);
                p.wait_event(&mut rx, RESP_TIMEOUT_MS)?;
                let resp_len = usize(rx.len());

                trace!("{}: << {:x?}", self.name, &resp_buf[..resp_len]);

                let (mask, opt_start) = tcp::parse(&req_buf[..req_len], &resp_buf[..resp_len]);

                if mask.contains(RespMask::INVALID) {
                    p.tx_signal(Signal::WrongPacketReceived);
                    return Err(Error::NoResp);
                }

                let response = &resp_buf[..resp_len];
                let code = tcp::code(response, opt_start);
                deliver(self.name, response, opt_start, code, callback)?;
            }
        }

        Ok(())
    }
}

// The confirmable retransmission loop. The wait before giving up on
// transmission attempt k grows linearly:
// k * (ACK_TIMEOUT_MS * ACK_RANDOM_FACTOR / 100) + ACK_TIMEOUT_MS
fn wait_ack<P>(
    p: &mut P,
    request: &[u8],
    response: &mut [u8],
    name: &str,
) -> Result<usize, Error>
where
    P: Platform,
{
    let mut retransmission = 0;
    let mut rx = Receiver::new(response);

    loop {
        let timeout = retransmission * (ACK_TIMEOUT_MS * ACK_RANDOM_FACTOR / 100) + ACK_TIMEOUT_MS;

        match p.wait_event(&mut rx, timeout) {
            Ok(()) => return Ok(usize(rx.len())),
            Err(Error::Timeout) => {
                if retransmission < MAX_RETRANSMIT {
                    p.tx_signal(Signal::TxRetransmit);
                    trace!("{}: retr >> {:x?}", name, request);

                    retransmission += 1;
                    p.tx_data(request)?;
                } else {
                    return Err(Error::NoAck);
                }
            }
            Err(e) => return Err(e),
        }
    }
}

// Decodes the options of a validated response and hands the result to the
// callback. The borrowed payload and option values die when the callback
// returns.
fn deliver(
    name: &str,
    response: &[u8],
    opt_start: u16,
    code: Code,
    callback: &mut dyn FnMut(&Response<'_>),
) -> Result<(), Error> {
    let (opts_region, payload_start) = match opts::scan(response, opt_start) {
        Ok(scan) => (&response[usize(opt_start)..], usize(scan.payload_start)),
        Err(Error::NoOptions) => {
            let payload_start = core::cmp::min(usize(opt_start) + 1, response.len());
            (&[][..], payload_start)
        }
        Err(e) => return Err(e),
    };

    let result = Response {
        code,
        payload: &response[payload_start..],
        opts: opts_region,
    };

    debug!(
        "{}: {} with {} byte payload",
        name,
        result.code,
        result.payload.len()
    );

    callback(&result);

    Ok(())
}
