//! Single-byte command, status and value-tag discriminants.

/// Leading byte of every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Invoke a remote function.
    Call = 1,
    /// Read a remote value.
    Get = 2,
    /// (Re)negotiate the wire format.
    Connect = 3,
    /// Assign a remote value.
    Set = 4,
}

impl Command {
    /// Parses a command byte.
    pub const fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Call),
            2 => Some(Self::Get),
            3 => Some(Self::Connect),
            4 => Some(Self::Set),
            _ => None,
        }
    }

    /// Returns the wire byte.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Handshake bytes the server sends around a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    /// The server accepted the command and waits for its payload.
    Ready = 64,
    /// The command byte was not understood.
    UnsupportedCommand = 65,
    /// Reserved completion marker.
    Done = 66,
}

impl Status {
    /// Returns the wire byte.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Type tag preceding every encoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    /// No payload.
    Nil = 0,
    /// Number in the negotiated format.
    Number = 1,
    /// One byte, 0 or 1.
    Boolean = 2,
    /// `u32` length and bytes.
    String = 3,
    /// Key/value pairs up to [`Tag::TableEnd`].
    Table = 4,
    /// Closes a table.
    TableEnd = 5,
    /// An encoded string holding opaque host bytes, then [`Tag::BlobEnd`].
    Blob = 6,
    /// Closes a blob.
    BlobEnd = 7,
    /// `u32` length and a dotted path on the receiving side.
    Remote = 8,
}

impl Tag {
    /// Parses a tag byte.
    pub const fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Nil),
            1 => Some(Self::Number),
            2 => Some(Self::Boolean),
            3 => Some(Self::String),
            4 => Some(Self::Table),
            5 => Some(Self::TableEnd),
            6 => Some(Self::Blob),
            7 => Some(Self::BlobEnd),
            8 => Some(Self::Remote),
            _ => None,
        }
    }

    /// Returns the wire byte.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}
