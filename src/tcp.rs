//! CoAP over TCP (RFC 8323): variable length framing
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Len=15 |  TKL  | Extended Length (32 bits)
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!                 |    Code       |  Token (if any, TKL bytes) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Options (if any) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |1 1 1 1 1 1 1 1|    Payload (if any) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The `Len` nibble encodes the length of everything after the Code byte and
//! may spill into 1, 2 or 4 extension bytes, so the size of the header is a
//! function of the amount of data it frames.

use byteorder::{ByteOrder, NetworkEndian as NE};
use cast::{u16, u8, usize};

use crate::client::{Platform, Request};
use crate::msg::Code;
use crate::{opts, Error, RespMask};

const MIN_HEADER_LEN: usize = 2;

// length of options + payload continues in an 8 / 16 / 32-bit extension
const LEN8: u8 = 13;
const LEN16: u8 = 14;
const LEN32: u8 = 15;

// offset to add to the extension field
const OFFSET8: usize = 13;
const OFFSET16: usize = 269;
const OFFSET32: usize = 65805;

mod tkl {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: u8 = 0;
    pub const SIZE: u8 = 4;
}

mod len {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: u8 = super::tkl::OFFSET + super::tkl::SIZE;
    pub const SIZE: u8 = 4;
}

/// Assembles a request PDU into `buf` and returns its length
///
/// The width of the length field depends on the amount of data it frames,
/// which is only known after the options are encoded. The assembler guesses
/// a minimal `2 + TKL` byte prefix (one more when the payload alone pushes
/// the length into the extended tier), encodes the options at the guessed
/// offset, then picks the real header and shifts the encoded options in
/// place when the guess was off.
///
/// Fails with [`Error::Param`] when options and payload would need the
/// 32-bit extended length; such a PDU cannot fit a buffer pool sized for
/// constrained targets.
///
/// # Panics
///
/// Panics if the assembled PDU does not fit in `buf`.
pub fn assemble<P>(p: &mut P, buf: &mut [u8], req: &Request<'_>) -> Result<u16, Error>
where
    P: Platform,
{
    let tkl = usize(req.tkl);

    let mut guess = MIN_HEADER_LEN + tkl;
    if req.payload.len() > 10 {
        guess += 1;
    }

    let options_len = if req.options.is_empty() {
        0
    } else {
        usize(opts::encode(&mut buf[guess..], req.options))
    };

    let data_len = options_len
        + if req.payload.is_empty() {
            0
        } else {
            req.payload.len() + 1
        };

    let (nibble, ext) = if data_len < OFFSET8 {
        (u8(data_len).unwrap(), 0)
    } else if data_len < OFFSET16 {
        (LEN8, 1)
    } else if data_len < OFFSET32 {
        (LEN16, 2)
    } else {
        return Err(Error::Param);
    };

    let header = MIN_HEADER_LEN + ext;
    let target = header + tkl;

    if target != guess {
        // the guessed prefix was wrong; move the encoded options over
        buf.copy_within(guess..guess + options_len, target);
    }

    buf[0] = 0;
    set!(buf[0], len, nibble);
    set!(buf[0], tkl, req.tkl);

    match ext {
        1 => buf[1] = u8(data_len - OFFSET8).unwrap(),
        2 => NE::write_u16(&mut buf[1..3], u16(data_len - OFFSET16).unwrap()),
        _ => {}
    }
    buf[header - 1] = req.code.0;

    let mut total = header;

    if req.tkl != 0 {
        p.fill_token(&mut buf[total..total + tkl]);
        total += tkl;
    }

    total += options_len;

    if !req.payload.is_empty() {
        buf[total] = opts::PAYLOAD_MARKER;
        buf[total + 1..total + 1 + req.payload.len()].copy_from_slice(req.payload);
        total += req.payload.len() + 1;
    }

    Ok(u16(total).unwrap())
}

/// Parses an incoming PDU against the request it answers
///
/// Validates the framed length, the code class (responses plus 7.xx
/// signaling) and the echoed token. Returns the classification and the index
/// at which the option region starts; the index is zero when the PDU is
/// invalid.
pub fn parse(request: &[u8], response: &[u8]) -> (RespMask, u16) {
    const INVALID: (RespMask, u16) = (RespMask::INVALID, 0);

    if response.len() < MIN_HEADER_LEN {
        return INVALID;
    }

    let resp_b0 = response[0];
    let req_b0 = request[0];

    let tkl = get!(resp_b0, tkl);
    if tkl != get!(req_b0, tkl) {
        return INVALID;
    }

    let (data_len, resp_ext) = match extract_data_len(get!(resp_b0, len), &response[1..]) {
        Some(pair) => pair,
        None => return INVALID,
    };
    let req_ext = match extract_data_len(get!(req_b0, len), &request[1..]) {
        Some((_, ext)) => ext,
        None => return INVALID,
    };

    let code_idx = 1 + resp_ext;

    // length byte(s) + code + token + data must all be present
    if data_len + usize(tkl) + code_idx + 1 > response.len() {
        return INVALID;
    }

    let code = Code(response[code_idx]);
    match code.class() {
        2 | 4 | 5 | 7 => {}
        _ => return INVALID,
    }

    if tkl != 0 {
        let resp_token = &response[code_idx + 1..code_idx + 1 + usize(tkl)];
        let req_code_idx = 1 + req_ext;
        let req_token = &request[req_code_idx + 1..req_code_idx + 1 + usize(tkl)];

        if resp_token != req_token {
            return INVALID;
        }
    }

    let mut mask = RespMask::SEPARATE;
    match code.class() {
        2 => mask.insert(RespMask::SUCCESS_CODE),
        7 => mask.insert(RespMask::SIGNAL_CODE),
        _ => mask.insert(RespMask::FAILURE_CODE),
    }

    (mask, u16(response.len() - data_len).unwrap())
}

/// Returns the code of a parsed response
///
/// `opt_start` is the index reported by [`parse`]; the code byte sits right
/// before the token.
pub fn code(response: &[u8], opt_start: u16) -> Code {
    let tkl = usize(get!(response[0], tkl));

    Code(response[usize(opt_start) - tkl - 1])
}

// Decodes the length nibble and its extension bytes; yields the data length
// and the number of extension bytes, or `None` when the field is truncated.
fn extract_data_len(nibble: u8, buf: &[u8]) -> Option<(usize, usize)> {
    Some(match nibble {
        LEN8 => (usize(*buf.first()?) + OFFSET8, 1),
        LEN16 => {
            if buf.len() < 2 {
                return None;
            }

            (usize(NE::read_u16(&buf[..2])) + OFFSET16, 2)
        }
        LEN32 => {
            if buf.len() < 4 {
                return None;
            }

            (NE::read_u32(&buf[..4]) as usize + OFFSET32, 4)
        }
        _ => (usize(nibble), 0),
    })
}
