//! Error kinds shared by the bus, the MMR facades and the TCP bridge.
//!
//! Lower layers (the state machine, the FIFOs, the shift registers) never
//! return `Result`: a stalled SM or a full FIFO is normal hardware behaviour,
//! latched as a debug bit rather than surfaced as an error. `EmuError` only
//! appears at the seams that talk to a caller outside the emulated silicon.

/// A [`DecodeError`] is latched on the state machine as a fatal stall; the
/// offending word is preserved for the extended facade to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("reserved encoding in instruction word {word:#06x} at pc {pc}")]
pub struct DecodeError {
    pub word: u16,
    pub pc: u8,
}

/// The kind of malformed bridge request, mapped 1:1 to the 400..404 response
/// codes of the line protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolErrorKind {
    #[error("unknown command")]
    UnknownCommand,
    #[error("missing operand")]
    MissingOperand,
    #[error("unparsed input")]
    UnparsedInput,
    #[error("number expected")]
    NumberExpected,
    #[error("unexpected")]
    Unexpected,
}

impl ProtocolErrorKind {
    /// The response code for this protocol error.
    pub const fn code(self) -> u32 {
        match self {
            ProtocolErrorKind::UnknownCommand => 400,
            ProtocolErrorKind::MissingOperand => 401,
            ProtocolErrorKind::UnparsedInput => 402,
            ProtocolErrorKind::NumberExpected => 403,
            ProtocolErrorKind::Unexpected => 404,
        }
    }
}

/// Top-level error returned by the [`crate::bus::AddressBus`] and the
/// register bridge.
#[derive(Debug, thiserror::Error)]
pub enum EmuError {
    #[error("no facade provides address {0:#010x}")]
    UnmappedAddress(u32),

    #[error("{0}")]
    Protocol(#[from] ProtocolErrorKind),

    #[error("wait exhausted its cycle/wall-clock budget")]
    Timeout,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type EmuResult<T> = Result<T, EmuError>;
