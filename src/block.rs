//! Block-wise transfers (RFC 7959): the Block2 descriptor and a download
//! driver
//!
//! A Block2 option value is a 1-3 byte big endian integer laid out as
//! `[NUM | M(1) | SZX(3)]`: the block number, a "more blocks follow" flag
//! and a size exponent (block size = `2^(szx + 4)` bytes, so 16 to 1024).

use crate::client::{Handle, Platform, Request, Response, Transport};
use crate::msg::{Method, OptionNumber, Type};
use crate::opts::Opt;
use crate::Error;

/// A Block2 option value
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Block2 {
    /// Block number
    pub num: u32,
    /// More blocks follow this one
    pub more: bool,
    /// Size exponent; `7` is reserved
    pub szx: u8,
}

impl Block2 {
    /// Encodes this descriptor into the smallest sufficient width and
    /// returns the used prefix of `scratch`
    pub fn encode<'a>(&self, scratch: &'a mut [u8; 3]) -> &'a [u8] {
        debug_assert!(self.num < 1 << 20);

        let val = (self.num << 4) | (u32::from(self.more) << 3) | u32::from(self.szx & 0b111);

        if val < 1 << 8 {
            scratch[0] = val as u8;
            &scratch[..1]
        } else if val < 1 << 16 {
            scratch[0] = (val >> 8) as u8;
            scratch[1] = val as u8;
            &scratch[..2]
        } else {
            scratch[0] = (val >> 16) as u8;
            scratch[1] = (val >> 8) as u8;
            scratch[2] = val as u8;
            &scratch[..3]
        }
    }

    /// Extracts a descriptor from a Block2 option
    ///
    /// Fails with [`Error::WrongOptions`] when the value is wider than 3
    /// bytes or carries the reserved size exponent.
    pub fn extract(opt: &Opt<'_>) -> Result<Self, Error> {
        if opt.value.len() > 3 {
            return Err(Error::WrongOptions);
        }

        let mut val: u32 = 0;
        for byte in opt.value {
            val = (val << 8) | u32::from(*byte);
        }

        let szx = (val & 0b111) as u8;
        if szx == 7 {
            return Err(Error::WrongOptions);
        }

        Ok(Block2 {
            num: val >> 4,
            more: val & 0b1000 != 0,
            szx,
        })
    }
}

/// Returns the block size in bytes for a size exponent
///
/// The reserved exponent `7` maps to 0.
pub fn block_size(szx: u8) -> u16 {
    match szx {
        0..=6 => 16 << szx,
        _ => 0,
    }
}

/// Downloads a resource block by block
///
/// Issues GET requests carrying a Block2 option and follows the
/// server-provided descriptor: after each block the next request asks for
/// `num + 1` until a block arrives with the more-flag cleared. `write`
/// receives every block payload together with its byte offset into the
/// resource. A success response without a Block2 option is treated as the
/// whole resource in one piece.
///
/// `options` go out with every request; they must be sorted and may only
/// use numbers below Block2 (23). Requests are confirmable over UDP and
/// non-confirmable elsewhere, and carry a token of `tkl` bytes.
///
/// A non 2.xx response, or a success response without a payload, ends the
/// transfer without an error at whichever block it arrives; `write` is
/// simply never invoked for the missing blocks.
pub fn download<P, F>(
    handle: &mut Handle,
    p: &mut P,
    options: &[Opt<'_>],
    tkl: u8,
    szx: u8,
    write: &mut F,
) -> Result<(), Error>
where
    P: Platform,
    F: FnMut(u32, &[u8]),
{
    const MAX_OPTIONS: usize = 8;

    if szx > 6 || options.len() >= MAX_OPTIONS {
        return Err(Error::Param);
    }
    if options
        .iter()
        .any(|opt| opt.number >= u16::from(OptionNumber::Block2))
    {
        return Err(Error::Param);
    }

    let ty = match handle.transport() {
        Transport::Udp => Type::Confirmable,
        _ => Type::NonConfirmable,
    };

    let mut cur: u32 = 0;
    let mut next: u32 = 0;

    loop {
        let mut scratch = [0; 3];
        let value = Block2 {
            num: next,
            more: false,
            szx,
        }
        .encode(&mut scratch);

        let mut all = [Opt::default(); MAX_OPTIONS];
        all[..options.len()].copy_from_slice(options);
        all[options.len()] = Opt::new(OptionNumber::Block2, value);
        let all = &all[..options.len() + 1];

        let mut on_response = |resp: &Response<'_>| {
            if resp.code.class() != 2 || resp.payload.is_empty() {
                // a failed block ends the transfer
                cur = next;
                return;
            }

            match resp.options().find_number(OptionNumber::Block2) {
                Some(opt) => {
                    if let Ok(block) = Block2::extract(&opt) {
                        cur = block.num;
                        if block.more {
                            next = block.num + 1;
                        }

                        write(cur * u32::from(block_size(block.szx)), resp.payload);
                    }
                }
                None => {
                    // the server ignored the Block2 option and sent the
                    // resource in one piece
                    write(0, resp.payload);
                    cur = 0;
                    next = 0;
                }
            }
        };

        let mut req = Request {
            ty,
            code: Method::Get.into(),
            tkl,
            payload: &[],
            options: all,
            callback: Some(&mut on_response),
        };

        handle.send(p, &mut req)?;

        if cur == next {
            return Ok(());
        }
    }
}
