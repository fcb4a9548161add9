//! Option codec: delta compression of option numbers
//!
//! Each option on the wire is a head byte holding a 4-bit *delta* (the
//! difference to the previous option number) and a 4-bit *length*, each of
//! which may overflow into 1 or 2 extension bytes, followed by the value.
//!
//! # References
//!
//! - [RFC 7252: The Constrained Application Protocol (CoAP)][rfc], section 3.1
//!
//! [rfc]: https://tools.ietf.org/html/rfc7252

use byteorder::{ByteOrder, NetworkEndian as NE};
use cast::{u16, u8, usize};

use crate::Error;

// This marks the end of the options
pub(crate) const PAYLOAD_MARKER: u8 = 0xff;

// The option delta and option length nibbles can never be this value
const RESERVED: u8 = 0b1111;

// Offset to add to the option delta / length when they don't fit in a nibble
const OFFSET8: u16 = 13;
const OFFSET16: u16 = 269;

// Option delta / length continues in an 8-bit extension field
const EXT8: u8 = 13;

// Option delta / length continues in a 16-bit extension field
const EXT16: u8 = 14;

/// A single CoAP option
///
/// When decoded from a PDU the `value` borrows from the buffer holding the
/// PDU and is only valid while that buffer is.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Opt<'a> {
    /// Option number
    pub number: u16,
    /// Raw option value
    pub value: &'a [u8],
}

impl<'a> Opt<'a> {
    /// Creates an option record
    pub fn new<N>(number: N, value: &'a [u8]) -> Self
    where
        N: Into<u16>,
    {
        Opt {
            number: number.into(),
            value,
        }
    }
}

impl Default for Opt<'_> {
    fn default() -> Self {
        Opt {
            number: 0,
            value: &[],
        }
    }
}

/// Encodes `options` into `buf` and returns the number of bytes written
///
/// `options` MUST be sorted by ascending number; the encoder keeps a running
/// sum of deltas and silently produces an invalid PDU for unsorted input
/// (asserted in debug builds).
///
/// # Panics
///
/// Panics if the encoded options do not fit in `buf`.
pub fn encode(buf: &mut [u8], options: &[Opt<'_>]) -> u16 {
    let mut idx = 0;
    let mut delta_sum = 0;

    for opt in options {
        debug_assert!(opt.number >= delta_sum);

        let head = idx;
        idx += 1;

        let delta = opt.number.wrapping_sub(delta_sum);
        delta_sum = delta_sum.wrapping_add(delta);

        if delta < OFFSET8 {
            buf[head] = u8(delta).unwrap() << 4;
        } else if delta < OFFSET16 {
            buf[head] = EXT8 << 4;
            buf[idx] = u8(delta - OFFSET8).unwrap();
            idx += 1;
        } else {
            buf[head] = EXT16 << 4;
            NE::write_u16(&mut buf[idx..idx + 2], delta - OFFSET16);
            idx += 2;
        }

        let len = u16(opt.value.len()).unwrap();
        if len < OFFSET8 {
            buf[head] |= u8(len).unwrap();
        } else if len < OFFSET16 {
            buf[head] |= EXT8;
            buf[idx] = u8(len - OFFSET8).unwrap();
            idx += 1;
        } else {
            buf[head] |= EXT16;
            NE::write_u16(&mut buf[idx..idx + 2], len - OFFSET16);
            idx += 2;
        }

        buf[idx..idx + opt.value.len()].copy_from_slice(opt.value);
        idx += opt.value.len();
    }

    u16(idx).unwrap()
}

/// Outcome of validating an option region
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Scan {
    /// Index of the first payload byte; equals the PDU length when the PDU
    /// carries no payload
    pub payload_start: u16,
    /// Number of options found
    pub count: u16,
}

/// Validates the option region of `bytes`, which starts at index `start`
///
/// On success the returned [`Scan`] locates the payload; the options
/// themselves are consumed through [`Options`].
///
/// Fails with [`Error::NoOptions`] when the byte at `start` is already the
/// payload marker, or when the PDU ends at `start` — a success indicator,
/// not a failure: the payload (if any) then starts at `start + 1`. Fails
/// with [`Error::WrongOptions`] when a reserved nibble is found or an
/// option runs past the end of the PDU.
///
/// A region that ends exactly at an option boundary with no payload marker
/// is a valid end of options with no payload.
pub fn scan(bytes: &[u8], start: u16) -> Result<Scan, Error> {
    let len = bytes.len();
    let mut cursor = usize(start);

    if cursor >= len || bytes[cursor] == PAYLOAD_MARKER {
        return Err(Error::NoOptions);
    }

    let mut count = 0u16;
    while cursor < len {
        let head = bytes[cursor];
        cursor += 1;

        if head == PAYLOAD_MARKER {
            return Ok(Scan {
                payload_start: u16(cursor).unwrap(),
                count,
            });
        }

        let delta4 = head >> 4;
        let len4 = head & 0x0f;

        if delta4 == RESERVED || len4 == RESERVED {
            return Err(Error::WrongOptions);
        }

        // the scan doesn't need the delta value, only its width
        cursor += match delta4 {
            EXT8 => 1,
            EXT16 => 2,
            _ => 0,
        };

        let value_len = match len4 {
            EXT8 => {
                let byte = *bytes.get(cursor).ok_or(Error::WrongOptions)?;
                cursor += 1;

                usize(byte) + usize(OFFSET8)
            }
            EXT16 => {
                if cursor + 2 > len {
                    return Err(Error::WrongOptions);
                }
                let halfword = NE::read_u16(&bytes[cursor..cursor + 2]);
                cursor += 2;

                usize(halfword) + usize(OFFSET16)
            }
            _ => usize(len4),
        };

        cursor += value_len;
        if cursor > len {
            return Err(Error::WrongOptions);
        }

        count += 1;
    }

    Ok(Scan {
        payload_start: u16(len).unwrap(),
        count,
    })
}

/// Iterator over the options of a PDU
///
/// The region handed to [`Options::new`] must have been validated with
/// [`scan`] first; the iterator itself only debug-asserts well-formedness.
pub struct Options<'a> {
    /// Number of the previous option
    number: u16,
    bytes: &'a [u8],
}

impl<'a> Options<'a> {
    /// Creates an iterator over the option region `bytes`
    ///
    /// `bytes` starts at the first option head byte; iteration ends at the
    /// payload marker or at the end of the slice.
    pub fn new(bytes: &'a [u8]) -> Self {
        Options { number: 0, bytes }
    }

    /// Returns the first option with the given number
    pub fn find_number<N>(mut self, number: N) -> Option<Opt<'a>>
    where
        N: Into<u16>,
    {
        let number = number.into();
        self.find(|opt| opt.number == number)
    }
}

impl<'a> Iterator for Options<'a> {
    type Item = Opt<'a>;

    fn next(&mut self) -> Option<Opt<'a>> {
        let bytes = self.bytes;
        let head = *bytes.first()?;

        if head == PAYLOAD_MARKER {
            return None;
        }

        let delta4 = head >> 4;
        let len4 = head & 0x0f;

        // `scan` rejected these before the iterator was built
        debug_assert!(delta4 != RESERVED);
        debug_assert!(len4 != RESERVED);

        let mut cursor = 1;
        self.number += match delta4 {
            EXT8 => {
                let byte = bytes[cursor];
                cursor += 1;

                u16(byte) + OFFSET8
            }
            EXT16 => {
                let halfword = NE::read_u16(&bytes[cursor..cursor + 2]);
                cursor += 2;

                halfword + OFFSET16
            }
            _ => u16(delta4),
        };

        let len = match len4 {
            EXT8 => {
                let byte = bytes[cursor];
                cursor += 1;

                u16(byte) + OFFSET8
            }
            EXT16 => {
                let halfword = NE::read_u16(&bytes[cursor..cursor + 2]);
                cursor += 2;

                halfword + OFFSET16
            }
            _ => u16(len4),
        };

        let value = &bytes[cursor..cursor + usize(len)];
        self.bytes = &bytes[cursor + usize(len)..];

        Some(Opt {
            number: self.number,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::opts::{self, Opt, Scan};
    use crate::Error;

    #[test]
    fn delta_boundaries() {
        // deltas 4, 13 and 269 exercise the three encoding tiers
        let list = [Opt::new(4u16, &[]), Opt::new(17u16, &[]), Opt::new(286u16, &[])];

        let mut buf = [0; 16];
        let len = opts::encode(&mut buf, &list);

        assert_eq!(
            &buf[..len as usize],
            &[0x40, 0xd0, 0x00, 0xe0, 0x00, 0x00][..]
        );
    }

    #[test]
    fn roundtrip() {
        let long = [0x55; 20];
        let list = [
            Opt::new(1u16, b"x"),
            Opt::new(11u16, b"config"),
            Opt::new(11u16, b"current"),
            Opt::new(17u16, &long),
            Opt::new(300u16, &[1, 2, 3]),
        ];

        let mut buf = [0; 64];
        let len = opts::encode(&mut buf, &list) as usize;
        let region = &buf[..len];

        let scan = opts::scan(region, 0).unwrap();
        assert_eq!(
            scan,
            Scan {
                payload_start: len as u16,
                count: 5
            }
        );

        let decoded = opts::Options::new(region);
        for (before, after) in list.iter().zip(decoded) {
            assert_eq!(before.number, after.number);
            assert_eq!(before.value, after.value);
        }
    }

    #[test]
    fn scan_no_options() {
        assert_eq!(opts::scan(&[0xff, b'h', b'i'], 0), Err(Error::NoOptions));
        // PDU ends right where the options would start
        assert_eq!(opts::scan(&[0x40, 0x01], 2), Err(Error::NoOptions));
    }

    #[test]
    fn scan_terminated_by_marker() {
        let bytes = [0xb1, b'x', 0xff, b'h', b'i'];
        assert_eq!(
            opts::scan(&bytes, 0),
            Ok(Scan {
                payload_start: 3,
                count: 1
            })
        );
    }

    #[test]
    fn scan_rejects_reserved_nibble() {
        assert_eq!(opts::scan(&[0xf0], 0), Err(Error::WrongOptions));
        assert_eq!(opts::scan(&[0x1f], 0), Err(Error::WrongOptions));
    }

    #[test]
    fn scan_rejects_truncated_option() {
        // length nibble promises 2 value bytes; only one present
        assert_eq!(opts::scan(&[0x12, 0xaa], 0), Err(Error::WrongOptions));
        // extension byte missing entirely
        assert_eq!(opts::scan(&[0xd0], 0), Err(Error::WrongOptions));
    }

    #[test]
    fn find_number() {
        let list = [Opt::new(11u16, b"cfg"), Opt::new(23u16, &[0x12])];

        let mut buf = [0; 16];
        let len = opts::encode(&mut buf, &list) as usize;

        let block2 = opts::Options::new(&buf[..len]).find_number(23u16);
        assert_eq!(block2, Some(Opt::new(23u16, &[0x12][..])));

        assert_eq!(opts::Options::new(&buf[..len]).find_number(4u16), None);
    }
}
