use std::io;

use thiserror::Error;

/// Faults raised while turning source into a [`Program`](crate::instruction::Program).
/// A `CompileError` means the program never ran.
///
/// Allocation failure is not represented here: it aborts the process.
#[derive(Debug, Error)]
pub enum CompileError {
    /// A `]` without an open `[`, or a `[` still open at end of source.
    #[error("unbalanced bracket at offset {position}")]
    UnbalancedBracket { position: usize },

    /// The source stream failed mid-scan.
    #[error("failed to read source at offset {position}: {source}")]
    ReadFault {
        position: usize,
        #[source]
        source: io::Error,
    },
}

impl CompileError {
    /// Byte offset into the source where the fault was detected.
    pub fn position(&self) -> usize {
        match self {
            CompileError::UnbalancedBracket { position } => *position,
            CompileError::ReadFault { position, .. } => *position,
        }
    }
}

/// Faults raised while executing a program against a tape; the program ran
/// and stopped early.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("tape overflow: cannot move {count} forward from cell {cursor} (capacity {capacity})")]
    TapeOverflow {
        cursor: usize,
        count: usize,
        capacity: usize,
    },

    #[error("tape underflow: cannot move {count} backward from cell {cursor}")]
    TapeUnderflow { cursor: usize, count: usize },

    /// The input source or output sink failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The program violates a guarantee the compiler always upholds.
    #[error("internal inconsistency: {detail}")]
    InternalInconsistency { detail: String },
}

impl RuntimeError {
    /// True for faults that indicate a broken program structure rather than
    /// something the interpreted program did.
    pub fn is_internal(&self) -> bool {
        matches!(self, RuntimeError::InternalInconsistency { .. })
    }
}
