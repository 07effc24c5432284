//! Session errors and status codes.

use std::collections::TryReserveError;

use chorus_crypto::{CipherError, StreamId};
use thiserror::Error;

use crate::{context::SessionState, engine::EngineError, roster::MemberId};

/// Numeric status codes reported across the session boundary.
///
/// Grouped by range: `1..` resource and state, `10..` engine, `100..` media
/// frames, `1000..` commit handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    /// Operation succeeded
    Success = 0,
    /// An allocation failed
    OutOfMemory = 1,
    /// Operation not valid in the current lifecycle state
    InvalidState = 2,
    /// Frame exceeds the configured maximum size
    FrameTooLarge = 3,
    /// Group key-agreement engine failure
    EngineFailure = 10,
    /// Frame encryption failed
    EncryptionFailure = 100,
    /// Frame decryption failed
    DecryptionFailure = 101,
    /// No decryptor exists for the sender
    UnknownMember = 102,
    /// Commit was rejected and the session must be reset
    CommitResetRequired = 1000,
    /// Commit was skipped and can be safely ignored
    CommitIgnorable = 1001,
}

impl StatusCode {
    /// Wire value of this code.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Errors returned by [`crate::SessionContext`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Operation called in the wrong lifecycle state
    #[error("{operation} not allowed in state {state:?}")]
    InvalidState {
        /// Current state
        state: SessionState,
        /// Rejected operation
        operation: &'static str,
    },

    /// Engine reported a failure
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// No decryptor for the sending member
    #[error("no decryptor for member {0}")]
    UnknownMember(MemberId),

    /// Frame larger than the configured limit
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Frame length
        len: usize,
        /// Configured limit
        max: usize,
    },

    /// Frame from a member failed to decrypt
    #[error("decrypting frame from member {member_id}: {source}")]
    Decryption {
        /// Sender
        member_id: MemberId,
        /// Underlying cipher error
        source: CipherError,
    },

    /// Outgoing frame failed to encrypt
    #[error("encrypting frame on stream {stream_id}: {source}")]
    Encryption {
        /// Outgoing stream
        stream_id: StreamId,
        /// Underlying cipher error
        source: CipherError,
    },

    /// Allocation failure while copying session state
    #[error("out of memory: {0}")]
    OutOfMemory(#[from] TryReserveError),
}

impl SessionError {
    /// Status code reported for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidState { .. } => StatusCode::InvalidState,
            Self::Engine(_) => StatusCode::EngineFailure,
            Self::UnknownMember(_) => StatusCode::UnknownMember,
            Self::FrameTooLarge { .. } => StatusCode::FrameTooLarge,
            Self::Decryption { .. } => StatusCode::DecryptionFailure,
            Self::Encryption { .. } => StatusCode::EncryptionFailure,
            Self::OutOfMemory(_) => StatusCode::OutOfMemory,
        }
    }
}
