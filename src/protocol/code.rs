use std::fmt;

/// Which side of an exchange a frame belongs to.
///
/// Requests travel from the controller to an agent and carry a params field,
/// responses travel back and do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    /// Number of delimited fields a frame of this direction holds.
    pub fn field_count(self) -> usize {
        match self {
            Direction::Request => 3,
            Direction::Response => 2,
        }
    }
}

/// One-byte operation code carried at the head of every frame.
///
/// Decoding never rejects an unknown byte, so the code is kept as a raw byte
/// and the known values are exposed as associated constants.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Code(u8);

impl Code {
    pub const GET_INFO: Code = Code(0x01);
    pub const PWD: Code = Code(0x02);
    pub const DOWNLOAD: Code = Code(0x05);
    pub const UPLOAD: Code = Code(0x06);
    pub const CMD: Code = Code(0x07);

    pub const SUCCESS: Code = Code(b'2');
    pub const ERROR: Code = Code(b'4');

    const REQUEST: [Code; 5] = [
        Code::GET_INFO,
        Code::PWD,
        Code::DOWNLOAD,
        Code::UPLOAD,
        Code::CMD,
    ];
    const RESPONSE: [Code; 2] = [Code::SUCCESS, Code::ERROR];

    pub const fn from_byte(byte: u8) -> Self {
        Code(byte)
    }

    pub const fn as_byte(self) -> u8 {
        self.0
    }

    pub fn is_request(self) -> bool {
        Self::REQUEST.contains(&self)
    }

    pub fn is_response(self) -> bool {
        Self::RESPONSE.contains(&self)
    }

    /// Whether this code may head a frame travelling in `direction`.
    pub fn allowed(self, direction: Direction) -> bool {
        match direction {
            Direction::Request => self.is_request(),
            Direction::Response => self.is_response(),
        }
    }

    fn name(self) -> Option<&'static str> {
        let name = match self {
            Code::GET_INFO => "GET_INFO",
            Code::PWD => "PWD",
            Code::DOWNLOAD => "DOWNLOAD",
            Code::UPLOAD => "UPLOAD",
            Code::CMD => "CMD",
            Code::SUCCESS => "SUCCESS",
            Code::ERROR => "ERROR",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "Code({:#04x})", self.0),
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Transport-level control tokens.
///
/// These never appear inside a codec frame. They are exchanged as raw 8-byte
/// big-endian values over the length-prefixed transport, and their values do
/// not overlap with any [`Code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Orderly close notice.
    Exit,
    /// Handshake acknowledgement, written after every received payload.
    Ack,
    /// Liveness probe.
    Syn,
}

impl Control {
    pub const fn value(self) -> u64 {
        match self {
            Control::Exit => 0x18,
            Control::Ack => 0x1a,
            Control::Syn => 0x16,
        }
    }
}
