//! Encrypted frame layout.
//!
//! ```text
//! ┌────────────────┬──────────┬────────────────┬─────────────┬────────┐
//! │ ciphertext (n) │ tag (16) │ generation (4) │ counter (4) │ 0xFAFA │
//! └────────────────┴──────────┴────────────────┴─────────────┴────────┘
//! ```
//!
//! Integers are big-endian. The trailer is authenticated implicitly: it feeds
//! the nonce, so any change to it fails tag verification.

use super::{error::CipherError, ratchet::KeyGeneration};

/// Poly1305 tag size.
pub const TAG_SIZE: usize = 16;

/// Trailer size: generation, counter, magic marker.
pub const TRAILER_SIZE: usize = 4 + 4 + 2;

/// Bytes an encrypted frame adds on top of its plaintext.
pub const FRAME_OVERHEAD: usize = TAG_SIZE + TRAILER_SIZE;

/// Marker closing every encrypted frame.
pub const MAGIC_MARKER: u16 = 0xFAFA;

/// XChaCha20 nonce size.
pub const NONCE_SIZE: usize = 24;

/// Generation and counter carried at the end of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTrailer {
    /// Ratchet generation the frame key comes from
    pub generation: KeyGeneration,
    /// Nonce counter within the generation
    pub counter: u32,
}

impl FrameTrailer {
    /// Split a 64-bit encryptor sequence into generation (high) and counter
    /// (low).
    pub fn from_sequence(sequence: u64) -> Self {
        Self { generation: (sequence >> 32) as KeyGeneration, counter: sequence as u32 }
    }

    /// Nonce for this frame: generation and counter, zero padded.
    pub fn nonce(&self) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[0..4].copy_from_slice(&self.generation.to_be_bytes());
        nonce[4..8].copy_from_slice(&self.counter.to_be_bytes());
        nonce
    }

    /// Serialize into exactly [`TRAILER_SIZE`] bytes.
    pub fn to_bytes(&self) -> [u8; TRAILER_SIZE] {
        let mut bytes = [0u8; TRAILER_SIZE];
        bytes[0..4].copy_from_slice(&self.generation.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.counter.to_be_bytes());
        bytes[8..10].copy_from_slice(&MAGIC_MARKER.to_be_bytes());
        bytes
    }

    /// Split an encrypted frame into `(ciphertext, tag, trailer)`.
    pub fn split(frame: &[u8]) -> Result<(&[u8], &[u8], Self), CipherError> {
        if frame.len() < FRAME_OVERHEAD {
            return Err(CipherError::FrameTooShort { len: frame.len() });
        }

        let (sealed, trailer) = frame.split_at(frame.len() - TRAILER_SIZE);
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_SIZE);

        if u16::from_be_bytes([trailer[8], trailer[9]]) != MAGIC_MARKER {
            return Err(CipherError::MissingMagicMarker);
        }

        let generation = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let counter = u32::from_be_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);

        Ok((ciphertext, tag, Self { generation, counter }))
    }
}

/// Encrypted size of a plaintext of `plaintext_len` bytes.
pub fn ciphertext_size(plaintext_len: usize) -> usize {
    plaintext_len + FRAME_OVERHEAD
}
