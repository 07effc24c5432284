//! Session configuration.

/// Default upper bound for a single media frame (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Largest media payload accepted for encryption or produced by
    /// decryption. Encrypted frames may exceed it by the frame overhead.
    /// Real-time media frames are a few kilobytes; anything bigger is a caller
    /// bug.
    pub max_frame_size: usize,
    /// Keep each decryptor's previous ratchet after a key change so frames
    /// in flight across a commit still decrypt.
    pub retain_previous_ratchet: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { max_frame_size: DEFAULT_MAX_FRAME_SIZE, retain_previous_ratchet: true }
    }
}
