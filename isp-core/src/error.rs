//! Error types for the ISP protocol engine and flash-write pipeline.

use crate::return_code::ReturnCode;
use thiserror::Error;

/// What kind of address range a preflight check was validating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeKind {
    Flash,
    Ram,
}

/// What kind of alignment a preflight check required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentKind {
    Word,
    Page,
}

/// Which stage of the flash-write pipeline a CRC mismatch was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcStage {
    Ram,
    Flash,
}

/// The single error type for everything that can go wrong talking to an
/// ISP bootloader or driving the flash-write pipeline.
///
/// See spec.md §7 for the propagation policy: preflight errors
/// (`RangeViolation`, `Alignment`, `CapacityExceeded`) never touch the
/// wire and are never retried; `Sync`/`Verify` close the underlying
/// channel; `ReturnCode` failures abort the current operation but leave
/// the session usable.
#[derive(Debug, Error)]
pub enum IspError {
    #[error("synchronization failed: device did not respond with the expected sync string")]
    Sync,

    #[error("verification failed: device did not confirm the sync handshake with OK")]
    Verify,

    #[error("{call} failed with return code {code}")]
    ReturnCode { code: ReturnCode, call: String },

    #[error("{call} timed out waiting for a response")]
    NoResponse { call: String },

    #[error("{kind:?} range violation: address {addr:#x} length {len} is not legal")]
    RangeViolation {
        kind: RangeKind,
        addr: u32,
        len: u32,
    },

    #[error("{kind:?} alignment violation: address {addr:#x} is not aligned")]
    Alignment { kind: AlignmentKind, addr: u32 },

    #[error("image needs {need} sectors but the chip only has {have}")]
    CapacityExceeded { need: u32, have: u32 },

    #[error("{stage:?} CRC mismatch: expected {expected:#x}, got {got:#x}")]
    CrcMismatch {
        expected: u32,
        got: u32,
        stage: CrcStage,
    },

    #[error("flash does not match RAM staging buffer after copy")]
    VerifyReadback,

    #[error("{call} returned non-decimal response {raw:?}")]
    ParseResponse { call: String, raw: String },

    #[error("byte channel is closed")]
    IoClosed,

    #[error("retry budget ({count}) exhausted calling {call}")]
    RetryExceeded { call: String, count: u32 },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Failures parsing a parts-catalog file (spec.md §6's external
/// collaborator, implemented concretely so the CLI has a working
/// loader — see SPEC_FULL.md §3).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("line {line}: expected {expected} comma-separated columns, found {found}")]
    ColumnCount {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: column {column} ({text:?}) is not a valid integer")]
    InvalidInteger {
        line: usize,
        column: &'static str,
        text: String,
    },

    #[error("part id {part_id:#x} not found in catalog")]
    PartNotFound { part_id: u32 },

    #[error("chip description invariant violated: {0}")]
    InvalidDescription(String),
}
