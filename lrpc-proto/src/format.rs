//! Numeric representations and the capability-negotiation header.
//!
//! Each peer advertises its [`NativeFormat`] (byte order, width and kind of
//! its numbers). The server reconciles both into one [`WireFormat`] that is
//! used for every length prefix and number on that connection.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Magic bytes opening every handshake header.
pub const MAGIC: [u8; 4] = *b"LRPC";

/// Protocol version; a mismatch is a hard incompatibility.
pub const PROTOCOL_VERSION: u8 = 3;

/// Size of the handshake header in bytes.
pub const HEADER_LEN: usize = 8;

/// Representation of numbers on one side of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum NumberKind {
    /// IEEE-754 floating point (4 or 8 bytes).
    #[default]
    Float = 0,
    /// Two's-complement signed integer (1, 2, 4 or 8 bytes).
    Integer = 1,
}

impl NumberKind {
    /// Parses the handshake byte.
    pub const fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Float),
            1 => Some(Self::Integer),
            _ => None,
        }
    }
}

/// Checks a `(width, kind)` pair advertised by a peer or a config file.
fn check_width(width: u8, kind: NumberKind) -> Result<()> {
    match (kind, width) {
        (NumberKind::Integer, 1 | 2 | 4 | 8) | (NumberKind::Float, 4 | 8) => Ok(()),
        _ => Err(Error::Header(format!(
            "unsupported {kind:?} width of {width} bytes"
        ))),
    }
}

/// The format a process uses for numbers internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FormatRepr", into = "FormatRepr")]
pub struct NativeFormat {
    /// Byte order of multi-byte fields.
    little_endian: bool,
    /// Number width in bytes.
    width: u8,
    /// Number representation.
    kind: NumberKind,
}

/// Serde shape of [`NativeFormat`]; validated on the way in.
#[derive(Serialize, Deserialize)]
struct FormatRepr {
    /// Byte order of multi-byte fields.
    little_endian: bool,
    /// Number width in bytes.
    width: u8,
    /// Number representation.
    kind: NumberKind,
}

impl TryFrom<FormatRepr> for NativeFormat {
    type Error = Error;

    fn try_from(r: FormatRepr) -> Result<Self> {
        Self::new(r.little_endian, r.width, r.kind)
    }
}

impl From<NativeFormat> for FormatRepr {
    fn from(f: NativeFormat) -> Self {
        Self {
            little_endian: f.little_endian,
            width: f.width,
            kind: f.kind,
        }
    }
}

impl Default for NativeFormat {
    fn default() -> Self {
        Self::host()
    }
}

impl NativeFormat {
    /// Creates a format, rejecting widths the codec cannot represent.
    pub fn new(little_endian: bool, width: u8, kind: NumberKind) -> Result<Self> {
        check_width(width, kind)?;
        Ok(Self {
            little_endian,
            width,
            kind,
        })
    }

    /// The format of this process: target byte order, 8-byte floats.
    pub const fn host() -> Self {
        Self {
            little_endian: cfg!(target_endian = "little"),
            width: 8,
            kind: NumberKind::Float,
        }
    }

    /// Returns `true` for little-endian byte order.
    pub const fn little_endian(&self) -> bool {
        self.little_endian
    }

    /// Number width in bytes.
    pub const fn width(&self) -> u8 {
        self.width
    }

    /// Number representation.
    pub const fn kind(&self) -> NumberKind {
        self.kind
    }

    /// The header a client sends to advertise this format.
    pub const fn header(&self) -> Header {
        Header {
            version: PROTOCOL_VERSION,
            little_endian: self.little_endian,
            width: self.width,
            kind: self.kind,
        }
    }

    /// Server-side reconciliation of this (local) format with a peer's.
    ///
    /// Differing byte orders settle on big-endian, the width is the smaller
    /// of the two, and an integer-only side forces integers on both.
    pub fn reconcile(&self, peer: &Header) -> WireFormat {
        let little_endian = if peer.little_endian == self.little_endian {
            self.little_endian
        } else {
            false
        };
        let kind = if peer.kind == self.kind {
            self.kind
        } else {
            NumberKind::Integer
        };
        WireFormat {
            little_endian,
            width: self.width.min(peer.width),
            kind,
        }
    }
}

/// The format agreed for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireFormat {
    /// Byte order of multi-byte fields.
    little_endian: bool,
    /// Number width in bytes.
    width: u8,
    /// Number representation.
    kind: NumberKind,
}

impl From<NativeFormat> for WireFormat {
    fn from(f: NativeFormat) -> Self {
        Self {
            little_endian: f.little_endian,
            width: f.width,
            kind: f.kind,
        }
    }
}

impl Default for WireFormat {
    fn default() -> Self {
        NativeFormat::host().into()
    }
}

impl WireFormat {
    /// Creates a format, rejecting widths the codec cannot represent.
    pub fn new(little_endian: bool, width: u8, kind: NumberKind) -> Result<Self> {
        NativeFormat::new(little_endian, width, kind).map(Into::into)
    }

    /// Returns `true` for little-endian byte order.
    pub const fn little_endian(&self) -> bool {
        self.little_endian
    }

    /// Number width in bytes.
    pub const fn width(&self) -> u8 {
        self.width
    }

    /// Number representation.
    pub const fn kind(&self) -> NumberKind {
        self.kind
    }

    /// The header that announces this format to the peer.
    pub const fn header(&self) -> Header {
        Header {
            version: PROTOCOL_VERSION,
            little_endian: self.little_endian,
            width: self.width,
            kind: self.kind,
        }
    }

    /// Serializes a `u32` in this byte order.
    pub const fn u32_bytes(&self, v: u32) -> [u8; 4] {
        if self.little_endian {
            v.to_le_bytes()
        } else {
            v.to_be_bytes()
        }
    }

    /// Parses a `u32` in this byte order.
    pub const fn u32_from(&self, b: [u8; 4]) -> u32 {
        if self.little_endian {
            u32::from_le_bytes(b)
        } else {
            u32::from_be_bytes(b)
        }
    }

    /// Serializes `n` into `buf`, returning the used prefix.
    ///
    /// Narrowing to an integer width truncates toward zero and saturates
    /// at the bounds of the target type.
    #[allow(clippy::cast_possible_truncation)]
    pub fn number_bytes(self, n: f64, buf: &mut [u8; 8]) -> &[u8] {
        let w = usize::from(self.width);
        match (self.kind, self.width) {
            (NumberKind::Integer, 1) => buf[..1].copy_from_slice(&(n as i8).to_le_bytes()),
            (NumberKind::Integer, 2) => buf[..2].copy_from_slice(&(n as i16).to_le_bytes()),
            (NumberKind::Integer, 4) => buf[..4].copy_from_slice(&(n as i32).to_le_bytes()),
            (NumberKind::Integer, _) => buf[..8].copy_from_slice(&(n as i64).to_le_bytes()),
            (NumberKind::Float, 4) => buf[..4].copy_from_slice(&(n as f32).to_le_bytes()),
            (NumberKind::Float, _) => buf[..8].copy_from_slice(&n.to_le_bytes()),
        }
        let out = &mut buf[..w];
        if !self.little_endian {
            out.reverse();
        }
        out
    }

    /// Parses a number of exactly [`width`](Self::width) bytes.
    #[allow(clippy::cast_precision_loss)]
    pub fn number_from(self, bytes: &[u8]) -> f64 {
        let mut le = [0u8; 8];
        let w = bytes.len().min(8);
        le[..w].copy_from_slice(&bytes[..w]);
        if !self.little_endian {
            le[..w].reverse();
        }
        match (self.kind, w) {
            (NumberKind::Integer, 1) => f64::from(i8::from_le_bytes([le[0]])),
            (NumberKind::Integer, 2) => f64::from(i16::from_le_bytes([le[0], le[1]])),
            (NumberKind::Integer, 4) => f64::from(i32::from_le_bytes([le[0], le[1], le[2], le[3]])),
            (NumberKind::Integer, _) => i64::from_le_bytes(le) as f64,
            (NumberKind::Float, 4) => f64::from(f32::from_le_bytes([le[0], le[1], le[2], le[3]])),
            (NumberKind::Float, _) => f64::from_le_bytes(le),
        }
    }
}

/// The 8-byte handshake header.
///
/// Wire format: `['L','R','P','C', version, little_endian, width, kind]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol version.
    pub version: u8,
    /// Sender's byte order (`true` = little-endian).
    pub little_endian: bool,
    /// Sender's number width in bytes.
    pub width: u8,
    /// Sender's number representation.
    pub kind: NumberKind,
}

impl Header {
    /// Encodes the header to bytes.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[..4].copy_from_slice(&MAGIC);
        buf[4] = self.version;
        buf[5] = u8::from(self.little_endian);
        buf[6] = self.width;
        buf[7] = self.kind as u8;
        buf
    }

    /// Decodes and validates a header.
    ///
    /// A wrong magic, a different protocol version or an unusable number
    /// format yields a fatal [`Error::Header`].
    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Result<Self> {
        if bytes[..4] != MAGIC {
            return Err(Error::Header(format!("bad magic {:02x?}", &bytes[..4])));
        }
        if bytes[4] != PROTOCOL_VERSION {
            return Err(Error::Header(format!(
                "peer speaks protocol v{}, this side v{PROTOCOL_VERSION}",
                bytes[4]
            )));
        }
        let kind = NumberKind::from_u8(bytes[7])
            .ok_or_else(|| Error::Header(format!("unknown number kind {}", bytes[7])))?;
        check_width(bytes[6], kind)?;
        Ok(Self {
            version: bytes[4],
            little_endian: bytes[5] != 0,
            width: bytes[6],
            kind,
        })
    }

    /// The negotiated format this header announces.
    pub const fn format(&self) -> WireFormat {
        WireFormat {
            little_endian: self.little_endian,
            width: self.width,
            kind: self.kind,
        }
    }
}
