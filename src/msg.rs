//! Message level vocabulary: types, codes and option numbers
//!
//! # References
//!
//! - [RFC 7252: The Constrained Application Protocol (CoAP)][rfc]
//!
//! [rfc]: https://tools.ietf.org/html/rfc7252

use core::fmt;

/// CoAP message type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Type {
    /// Confirmable message; requires an acknowledgement or a reset
    Confirmable,
    /// Non-confirmable message; one-shot
    NonConfirmable,
    /// Acknowledges a confirmable message
    Acknowledgement,
    /// Indicates that a received message could not be processed
    Reset,
}

impl Type {
    pub(crate) fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Type::Confirmable,
            0b01 => Type::NonConfirmable,
            0b10 => Type::Acknowledgement,
            _ => Type::Reset,
        }
    }
}

impl From<Type> for u8 {
    fn from(ty: Type) -> u8 {
        match ty {
            Type::Confirmable => 0,
            Type::NonConfirmable => 1,
            Type::Acknowledgement => 2,
            Type::Reset => 3,
        }
    }
}

/// CoAP code: a 3-bit class and a 5-bit detail
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Code(pub(crate) u8);

mod detail {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: u8 = 0;
    pub const SIZE: u8 = 5;
}

mod class {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: u8 = 5;
    pub const SIZE: u8 = 3;
}

impl Code {
    /// Empty message
    pub const EMPTY: Self = Code(0b000_00000);

    /// Builds a code from its class and detail
    pub fn new(class: u8, detail: u8) -> Self {
        Code::from_parts(class, detail)
    }

    /// Returns the class of this code
    pub fn class(&self) -> u8 {
        get!(self.0, class)
    }

    /// Returns the detail of this code
    pub fn detail(&self) -> u8 {
        get!(self.0, detail)
    }

    /// Checks if this is a request code
    pub fn is_request(&self) -> bool {
        self.class() == 0 && self.detail() != 0
    }

    /// Checks if this is a response code
    pub fn is_response(&self) -> bool {
        match self.class() {
            2..=5 => true,
            _ => false,
        }
    }

    /// Checks if this is a TCP signaling code (7.xx)
    pub fn is_signaling(&self) -> bool {
        self.class() == 7
    }

    /* Private */
    fn from_parts(class: u8, detail: u8) -> Self {
        let mut code = 0;
        set!(code, class, class);
        set!(code, detail, detail);

        Code(code)
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Code(0b{:03b}_{:05b})", self.class(), self.detail())
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

code!(
    /// CoAP method codes
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Method {
        /// GET
        Get = (0, 1),
        /// POST
        Post = (0, 2),
        /// PUT
        Put = (0, 3),
        /// DELETE
        Delete = (0, 4),
    }
);

code!(
    /// CoAP response codes
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Response {
        // Success
        /// Created
        Created = (2, 1),
        /// Deleted
        Deleted = (2, 2),
        /// Valid
        Valid = (2, 3),
        /// Changed
        Changed = (2, 4),
        /// Content
        Content = (2, 5),

        // Client error
        /// Bad Request
        BadRequest = (4, 0),
        /// Unauthorized
        Unauthorized = (4, 1),
        /// Bad Option
        BadOption = (4, 2),
        /// Forbidden
        Forbidden = (4, 3),
        /// Not Found
        NotFound = (4, 4),
        /// Method Not Allowed
        MethodNotAllowed = (4, 5),
        /// Not Acceptable
        NotAcceptable = (4, 6),
        /// Precondition Failed
        PreconditionFailed = (4, 12),
        /// Request Entity Too Large
        RequestEntityTooLarge = (4, 13),
        /// Unsupported Content-Format
        UnsupportedContentFormat = (4, 15),

        // Server error
        /// Internal Server Error
        InternalServerError = (5, 0),
        /// Not Implemented
        NotImplemented = (5, 1),
        /// Bad Gateway
        BadGateway = (5, 2),
        /// Service Unavailable
        ServiceUnavailable = (5, 3),
        /// Gateway Timeout
        GatewayTimeout = (5, 4),
        /// Proxying Not Supported
        ProxyingNotSupported = (5, 5),
    }
);

code!(
    /// CoAP over TCP signaling codes (RFC 8323)
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Signaling {
        /// Capabilities and Settings Message
        Csm = (7, 1),
        /// Ping
        Ping = (7, 2),
        /// Pong
        Pong = (7, 3),
        /// Release
        Release = (7, 4),
        /// Abort
        Abort = (7, 5),
    }
);

full_range!(
    u16,
    /// CoAP option numbers
    #[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
    pub enum OptionNumber {
        /// If-Match
        IfMatch = 1,
        /// Uri-Host
        UriHost = 3,
        /// ETag
        ETag = 4,
        /// If-None-Match
        IfNoneMatch = 5,
        /// Uri-Port
        UriPort = 7,
        /// Location-Path
        LocationPath = 8,
        /// Uri-Path
        UriPath = 11,
        /// Content-Format
        ContentFormat = 12,
        /// Max-Age
        MaxAge = 14,
        /// Uri-Query
        UriQuery = 15,
        /// Accept
        Accept = 17,
        /// Location-Query
        LocationQuery = 20,
        /// Block2, server to client block-wise transfer
        Block2 = 23,
        /// Block1, client to server block-wise transfer
        Block1 = 27,
        /// Proxy-Uri
        ProxyUri = 35,
        /// Proxy-Scheme
        ProxyScheme = 39,
        /// Size1
        Size1 = 60,
    }
);

impl OptionNumber {
    /// Is this a critical option?
    pub fn is_critical(&self) -> bool {
        // odd option numbers are critical
        u16::from(*self) % 2 == 1
    }

    /// Is this an elective option?
    pub fn is_elective(&self) -> bool {
        // even option numbers are elective
        !self.is_critical()
    }

    /// Is this option UnSafe to forward?
    pub fn is_unsafe(&self) -> bool {
        u16::from(*self) & 2 != 0
    }
}

full_range!(
    u16,
    /// CoAP Content-Formats
    pub enum ContentFormat {
        /// text/plain; charset=utf-8
        TextPlain = 0,
        /// application/link-format
        ApplicationLinkFormat = 40,
        /// application/xml
        ApplicationXml = 41,
        /// application/octet-stream
        ApplicationOctetStream = 42,
        /// application/exi
        ApplicationExi = 47,
        /// application/json
        ApplicationJson = 50,
        /// application/cbor
        ApplicationCbor = 60,
    }
);

#[cfg(test)]
mod tests {
    use core::convert::TryFrom;

    use crate::msg::{Code, Method, Response, Type};

    #[test]
    fn code_parts() {
        let content: Code = Response::Content.into();
        assert_eq!(content.class(), 2);
        assert_eq!(content.detail(), 5);
        assert!(content.is_response());

        let get: Code = Method::Get.into();
        assert!(get.is_request());
        assert_eq!(Method::try_from(get), Ok(Method::Get));

        assert_eq!(Code::EMPTY.class(), 0);
        assert_eq!(Code::EMPTY.detail(), 0);
        assert!(!Code::EMPTY.is_request());
    }

    #[test]
    fn type_bits() {
        for ty in &[
            Type::Confirmable,
            Type::NonConfirmable,
            Type::Acknowledgement,
            Type::Reset,
        ] {
            assert_eq!(Type::from_bits(u8::from(*ty)), *ty);
        }
    }
}
