//! Cipher unit errors.

use thiserror::Error;

use super::ratchet::KeyGeneration;

/// Errors from binding, encrypting or decrypting media frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    /// No key ratchet has been bound to the cipher unit.
    #[error("no key ratchet bound")]
    MissingKeyRatchet,

    /// The caller's output buffer cannot hold the result.
    #[error("output buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes required for the result
        needed: usize,
        /// Bytes the caller provided
        available: usize,
    },

    /// Frame is too short to carry a tag and trailer.
    #[error("frame too short: {len} bytes")]
    FrameTooShort {
        /// Length of the rejected frame
        len: usize,
    },

    /// Trailer does not end with the frame magic marker.
    #[error("frame magic marker missing")]
    MissingMagicMarker,

    /// Every nonce of every key generation has been used.
    #[error("key generations exhausted")]
    GenerationExhausted,

    /// The ratchet could not produce a key for this generation.
    #[error("key derivation failed for generation {generation}")]
    KeyDerivation {
        /// Requested key generation
        generation: KeyGeneration,
    },

    /// The AEAD refused to seal the frame.
    #[error("frame encryption failed")]
    EncryptionFailed,

    /// Tag verification failed: wrong key, wrong media type or tampering.
    #[error("frame authentication failed (generation {generation})")]
    AuthenticationFailed {
        /// Key generation named by the frame trailer
        generation: KeyGeneration,
    },
}
