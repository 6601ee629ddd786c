//! Hand-rolled error taxonomy (manual `Display`/`std::error::Error`, no
//! derive-macro crate). None of these types are meant to carry the program
//! across a panic boundary; they are plain values returned up to the
//! boundary that produced them.

use std::fmt;

/// Bad magic, oversized payload, or a short read on the wire protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    BadMagic(u32),
    UnsupportedVersion { major: u16, minor: u16 },
    PayloadTooLarge(u32),
    ShortRead { wanted: usize, got: usize },
    UnknownMessageType(u16),
    Truncated { what: &'static str },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::BadMagic(m) => write!(f, "bad packet magic 0x{:08X}", m),
            ProtocolError::UnsupportedVersion { major, minor } => {
                write!(f, "unsupported protocol version {}.{}", major, minor)
            }
            ProtocolError::PayloadTooLarge(n) => write!(f, "payload size {} exceeds 8 MiB cap", n),
            ProtocolError::ShortRead { wanted, got } => {
                write!(f, "short read: wanted {} bytes, got {}", wanted, got)
            }
            ProtocolError::UnknownMessageType(t) => write!(f, "unknown message type {}", t),
            ProtocolError::Truncated { what } => write!(f, "truncated payload: {}", what),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Firmware container/HEX rejection. Kept alive: the session stays up and an
/// `Error` message is emitted with one of these codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    BufferTooSmall = 1,
    BadContainerMagic = 2,
    SectionTableOutOfBounds = 3,
    MissingTextSection = 4,
    SectionOutOfBounds = 5,
    HexMissingColon = 6,
    HexBadChecksum = 7,
    HexTruncated = 8,
    TooLargeForFlash = 9,
    DataSectionTooLargeForSram = 10,
}

impl LoadError {
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            LoadError::BufferTooSmall => "container smaller than its own header",
            LoadError::BadContainerMagic => "container magic mismatch",
            LoadError::SectionTableOutOfBounds => "section table extends past buffer",
            LoadError::MissingTextSection => "no .text section in container",
            LoadError::SectionOutOfBounds => ".text section extends past buffer",
            LoadError::HexMissingColon => "Intel HEX line missing leading ':'",
            LoadError::HexBadChecksum => "Intel HEX checksum mismatch",
            LoadError::HexTruncated => "Intel HEX record truncated",
            LoadError::TooLargeForFlash => "image exceeds application flash region",
            LoadError::DataSectionTooLargeForSram => ".data section exceeds SRAM",
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for LoadError {}

/// STK500 bridge framing/programming failures; these never propagate as Rust
/// errors across the bridge boundary, they are turned into wire replies
/// (`NOSYNC` / `FAILED`) by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stk500Error {
    Framing,
    WriteFailure,
}

impl fmt::Display for Stk500Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stk500Error::Framing => write!(f, "STK500 framing error"),
            Stk500Error::WriteFailure => write!(f, "STK500 programming failure"),
        }
    }
}

impl std::error::Error for Stk500Error {}

/// Crate-level error, grouping the three kinds above behind one type so
/// library code never has to invent an ad-hoc `Box<dyn Error>` at call
/// boundaries that cross module lines. The CLI binary is the only place
/// that wraps this in `anyhow::Error` for top-level reporting.
#[derive(Debug, Clone, PartialEq)]
pub enum EmulatorError {
    Protocol(ProtocolError),
    Load(LoadError),
    Stk500(Stk500Error),
    Io(String),
}

impl fmt::Display for EmulatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmulatorError::Protocol(e) => write!(f, "protocol error: {}", e),
            EmulatorError::Load(e) => write!(f, "firmware load error: {}", e),
            EmulatorError::Stk500(e) => write!(f, "STK500 error: {}", e),
            EmulatorError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for EmulatorError {}

impl From<ProtocolError> for EmulatorError {
    fn from(e: ProtocolError) -> Self {
        EmulatorError::Protocol(e)
    }
}

impl From<LoadError> for EmulatorError {
    fn from(e: LoadError) -> Self {
        EmulatorError::Load(e)
    }
}

impl From<Stk500Error> for EmulatorError {
    fn from(e: Stk500Error) -> Self {
        EmulatorError::Stk500(e)
    }
}

impl From<std::io::Error> for EmulatorError {
    fn from(e: std::io::Error) -> Self {
        EmulatorError::Io(e.to_string())
    }
}
