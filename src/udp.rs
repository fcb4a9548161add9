//! CoAP over UDP: 4 byte header assembly and response classification
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Ver| T |  TKL  |      Code     |          Message ID           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Token (if any, TKL bytes) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Options (if any) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |1 1 1 1 1 1 1 1|    Payload (if any) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use core::ops::Range;

use byteorder::{ByteOrder, NetworkEndian as NE};
use cast::{u16, usize};

use crate::client::{Platform, Request};
use crate::msg::{Code, Type};
use crate::{opts, RespMask};

/* Message format */
const VER_T_TKL: usize = 0;

mod tkl {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: u8 = 0;
    pub const SIZE: u8 = 4;
}

mod t {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: u8 = super::tkl::OFFSET + super::tkl::SIZE;
    pub const SIZE: u8 = 2;
}

mod ver {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: u8 = super::t::OFFSET + super::t::SIZE;
    pub const SIZE: u8 = 2;
}

const CODE: usize = 1;
const MESSAGE_ID: Range<usize> = 2..4;

/// Index at which the token starts
pub const TOKEN_START: usize = MESSAGE_ID.end;

/// Size of the CoAP over UDP header
pub const HEADER_SIZE: u16 = 4;

/// Assembles a request PDU into `buf` and returns its length
///
/// The message ID and the token bytes are obtained from the platform. The
/// header is written last, once the variable length parts are in place.
///
/// # Panics
///
/// Panics if the assembled PDU does not fit in `buf`.
pub fn assemble<P>(p: &mut P, buf: &mut [u8], req: &Request<'_>) -> u16
where
    P: Platform,
{
    let tkl = usize(req.tkl);
    let mut len = usize(HEADER_SIZE);

    /* token */
    if req.tkl != 0 {
        p.fill_token(&mut buf[len..len + tkl]);
        len += tkl;
    }

    /* options */
    if !req.options.is_empty() {
        len += usize(opts::encode(&mut buf[len..], req.options));
    }

    /* payload */
    if !req.payload.is_empty() {
        buf[len] = opts::PAYLOAD_MARKER;
        buf[len + 1..len + 1 + req.payload.len()].copy_from_slice(req.payload);
        len += req.payload.len() + 1;
    }

    /* header */
    buf[VER_T_TKL] = 0;
    set!(buf[VER_T_TKL], ver, 1);
    set!(buf[VER_T_TKL], t, u8::from(req.ty));
    set!(buf[VER_T_TKL], tkl, req.tkl);
    buf[CODE] = req.code.0;
    NE::write_u16(&mut buf[MESSAGE_ID], p.message_id());

    u16(len).unwrap()
}

/// Classifies an incoming PDU against the request it may answer
///
/// Implements the checks of RFC 7252 section 4.2: an acknowledgement must
/// echo our message ID and either carry a piggybacked response or be empty;
/// a reset must be empty; a separate response arrives in its own exchange
/// (fresh message ID) but must echo our token. Any violation collapses the
/// result to [`RespMask::INVALID`].
pub fn parse(request: &[u8], response: &[u8]) -> RespMask {
    if response.len() < usize(HEADER_SIZE) {
        return RespMask::INVALID;
    }

    let resp_b0 = response[VER_T_TKL];
    let req_b0 = request[VER_T_TKL];

    if get!(resp_b0, ver) != get!(req_b0, ver) {
        return RespMask::INVALID;
    }

    let resp_tkl = get!(resp_b0, tkl);
    let resp_code = Code(response[CODE]);
    let resp_mid = NE::read_u16(&response[MESSAGE_ID]);
    let req_mid = NE::read_u16(&request[MESSAGE_ID]);

    let mut mask = RespMask::EMPTY;
    match Type::from_bits(get!(resp_b0, t)) {
        Type::Acknowledgement => {
            mask.insert(RespMask::ACK);

            if resp_mid != req_mid {
                return RespMask::INVALID;
            }

            if resp_code != Code::EMPTY {
                mask.insert(RespMask::PIGGYBACKED);
            } else if resp_tkl == 0 && response.len() == usize(HEADER_SIZE) {
                // empty acknowledgement; the response comes later
                return mask;
            } else {
                return RespMask::INVALID;
            }
        }
        Type::Confirmable => {
            mask.insert(RespMask::SEPARATE);
            mask.insert(RespMask::NEED_SEND_ACK);
        }
        Type::NonConfirmable => {
            mask.insert(RespMask::SEPARATE);
        }
        Type::Reset => {
            return if resp_code == Code::EMPTY
                && resp_tkl == 0
                && response.len() == usize(HEADER_SIZE)
            {
                mask.insert(RespMask::NRST);
                mask
            } else {
                RespMask::INVALID
            };
        }
    }

    // a separate response lives in a fresh exchange; an echoed message ID
    // means we are not looking at a response at all
    if !mask.contains(RespMask::ACK) && resp_mid == req_mid {
        return RespMask::INVALID;
    }

    if resp_tkl != get!(req_b0, tkl) {
        return RespMask::INVALID;
    }

    if response.len() < TOKEN_START + usize(resp_tkl) {
        return RespMask::INVALID;
    }

    if response[TOKEN_START..TOKEN_START + usize(resp_tkl)]
        != request[TOKEN_START..TOKEN_START + usize(resp_tkl)]
    {
        return RespMask::INVALID;
    }

    match resp_code.class() {
        2 => mask.insert(RespMask::SUCCESS_CODE),
        4 | 5 => mask.insert(RespMask::FAILURE_CODE),
        _ => return RespMask::INVALID,
    }

    mask
}

/// Returns the index at which the options of `response` start
pub fn options_start(response: &[u8]) -> u16 {
    HEADER_SIZE + u16(get!(response[VER_T_TKL], tkl))
}

/// Assembles an empty acknowledgement echoing the message ID of `response`
///
/// Returns the length of the acknowledgement, which is always
/// [`HEADER_SIZE`].
pub fn assemble_ack(buf: &mut [u8], response: &[u8]) -> u16 {
    buf[VER_T_TKL] = 0;
    set!(buf[VER_T_TKL], ver, 1);
    set!(buf[VER_T_TKL], t, u8::from(Type::Acknowledgement));
    buf[CODE] = Code::EMPTY.0;

    let mid = NE::read_u16(&response[MESSAGE_ID]);
    NE::write_u16(&mut buf[MESSAGE_ID], mid);

    HEADER_SIZE
}

#[cfg(test)]
mod tests {
    use as_slice::{AsMutSlice, AsSlice};

    use crate::client::{Platform, Receiver, Request};
    use crate::msg::{Method, OptionNumber, Type};
    use crate::opts::Opt;
    use crate::{udp, Error, RespMask, Signal};

    struct Fake;

    struct NoChunk;

    impl AsSlice for NoChunk {
        type Element = u8;

        fn as_slice(&self) -> &[u8] {
            &[]
        }
    }

    impl AsMutSlice for NoChunk {
        fn as_mut_slice(&mut self) -> &mut [u8] {
            &mut []
        }
    }

    impl Platform for Fake {
        type Chunk = NoChunk;

        fn alloc_block(&mut self) -> Option<NoChunk> {
            None
        }

        fn free_block(&mut self, _chunk: NoChunk) {}

        fn tx_data(&mut self, _buf: &[u8]) -> Result<(), Error> {
            Ok(())
        }

        fn wait_event(
            &mut self,
            _rx: &mut Receiver<'_>,
            _timeout_ms: u32,
        ) -> Result<(), Error> {
            Err(Error::Timeout)
        }

        fn tx_signal(&mut self, _signal: Signal) {}

        fn message_id(&mut self) -> u16 {
            0xbeef
        }

        fn fill_token(&mut self, token: &mut [u8]) {
            token.copy_from_slice(&[0x12, 0x34][..token.len()]);
        }
    }

    fn request() -> [u8; 13] {
        let options = [Opt::new(OptionNumber::UriPath, b"config")];
        let req = Request {
            ty: Type::Confirmable,
            code: Method::Get.into(),
            tkl: 2,
            payload: &[],
            options: &options,
            callback: None,
        };

        let mut buf = [0; 32];
        let len = udp::assemble(&mut Fake, &mut buf, &req);
        assert_eq!(len, 13);

        let mut out = [0; 13];
        out.copy_from_slice(&buf[..13]);
        out
    }

    #[test]
    fn assemble() {
        let bytes = request();

        // Ver 1, CON, TKL 2 | GET | message ID | token | Uri-Path "config"
        assert_eq!(bytes[0], 0x42);
        assert_eq!(bytes[1], 0x01);
        assert_eq!(&bytes[2..4], &[0xbe, 0xef][..]);
        assert_eq!(&bytes[4..6], &[0x12, 0x34][..]);
        assert_eq!(bytes[6], 0xb6);
        assert_eq!(&bytes[7..], b"config");
    }

    #[test]
    fn assemble_with_payload() {
        let req = Request {
            ty: Type::NonConfirmable,
            code: Method::Put.into(),
            tkl: 0,
            payload: b"on",
            options: &[],
            callback: None,
        };

        let mut buf = [0; 32];
        let len = udp::assemble(&mut Fake, &mut buf, &req);

        assert_eq!(&buf[..len as usize], &[0x50, 0x03, 0xbe, 0xef, 0xff, b'o', b'n'][..]);
    }

    #[test]
    fn classify_piggybacked() {
        let request = request();
        let response = [0x62, 0x45, 0xbe, 0xef, 0x12, 0x34, 0xff, b'h', b'i'];

        let mask = udp::parse(&request, &response);
        assert!(mask.contains(RespMask::ACK));
        assert!(mask.contains(RespMask::PIGGYBACKED));
        assert!(mask.contains(RespMask::SUCCESS_CODE));
        assert!(!mask.contains(RespMask::INVALID));
    }

    #[test]
    fn classify_empty_ack() {
        let request = request();

        let mask = udp::parse(&request, &[0x60, 0x00, 0xbe, 0xef]);
        assert!(mask.contains(RespMask::ACK));
        assert!(!mask.contains(RespMask::PIGGYBACKED));
    }

    #[test]
    fn classify_reset() {
        let request = request();

        let mask = udp::parse(&request, &[0x70, 0x00, 0xbe, 0xef]);
        assert!(mask.contains(RespMask::NRST));

        // a reset must be empty
        let mask = udp::parse(&request, &[0x70, 0x45, 0xbe, 0xef]);
        assert_eq!(mask, RespMask::INVALID);
    }

    #[test]
    fn classify_separate() {
        let request = request();

        // fresh message ID, echoed token, confirmable: must be acknowledged
        let response = [0x42, 0x45, 0x12, 0x77, 0x12, 0x34, 0xff, b'h', b'i'];
        let mask = udp::parse(&request, &response);
        assert!(mask.contains(RespMask::SEPARATE));
        assert!(mask.contains(RespMask::NEED_SEND_ACK));

        // an echoed message ID on a separate response is nonsense
        let response = [0x42, 0x45, 0xbe, 0xef, 0x12, 0x34, 0xff, b'h', b'i'];
        assert_eq!(udp::parse(&request, &response), RespMask::INVALID);
    }

    #[test]
    fn classify_rejects() {
        let request = request();

        // token mismatch
        let response = [0x62, 0x45, 0xbe, 0xef, 0x12, 0x35, 0xff, b'h', b'i'];
        assert_eq!(udp::parse(&request, &response), RespMask::INVALID);

        // message ID mismatch on an acknowledgement
        let response = [0x62, 0x45, 0xbe, 0xf0, 0x12, 0x34, 0xff, b'h', b'i'];
        assert_eq!(udp::parse(&request, &response), RespMask::INVALID);

        // request class in a response
        let response = [0x62, 0x01, 0xbe, 0xef, 0x12, 0x34, 0xff, b'h', b'i'];
        assert_eq!(udp::parse(&request, &response), RespMask::INVALID);

        // version mismatch
        let response = [0xa2, 0x45, 0xbe, 0xef, 0x12, 0x34, 0xff, b'h', b'i'];
        assert_eq!(udp::parse(&request, &response), RespMask::INVALID);

        // runt
        assert_eq!(udp::parse(&request, &[0x62, 0x45, 0xbe]), RespMask::INVALID);
    }

    #[test]
    fn ack() {
        let response = [0x42, 0x45, 0x12, 0x77, 0x12, 0x34, 0xff, b'h', b'i'];

        let mut buf = [0; 8];
        let len = udp::assemble_ack(&mut buf, &response);

        assert_eq!(&buf[..len as usize], &[0x60, 0x00, 0x12, 0x77][..]);
    }
}
