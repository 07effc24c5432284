//! Media frame encryption bound to per-member key ratchets.
//!
//! Separates the control plane (group key agreement) from the data plane
//! (media frames). The key-agreement engine is too slow to touch every audio
//! packet at 50 frames per second per speaker. Instead, every epoch it hands us
//! one ratchet per member, and each frame is sealed with a key derived from
//! that ratchet for the frame's generation.
//!
//! A frame on the wire is `ciphertext || tag || generation || counter ||
//! magic`. The generation selects the ratchet key, generation and counter
//! together form the nonce.
//!
//! # Security
//!
//! Nonces never repeat under one key: the encryptor's sequence is monotonic
//! and restarts only when a new ratchet is bound. A decryptor keeps the
//! previous ratchet around so frames sent just before a commit still open.

mod cipher;
pub mod decryptor;
pub mod encryptor;
pub mod error;
pub mod frame;
pub mod media;
pub mod ratchet;

pub use decryptor::Decryptor;
pub use encryptor::{Encryptor, StreamId};
pub use error::CipherError;
pub use frame::{FRAME_OVERHEAD, FrameTrailer};
pub use media::MediaType;
pub use ratchet::{
    FrameKey, HashKeyRatchet, KeyGeneration, KeyRatchet, SharedKeyRatchet, same_ratchet,
};
