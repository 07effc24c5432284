//! Chorus Cryptographic Primitives
//!
//! Key ratchets and per-frame cipher units for end-to-end encrypted group
//! media.
//!
//! # Design
//!
//! A group key-agreement engine hands out one key ratchet per member. Cipher
//! units ([`Encryptor`], [`Decryptor`]) are bound to a ratchet and re-bound
//! whenever the engine rotates it, without being recreated. Frames carry their
//! key generation and nonce counter in a small trailer so the receiving side can
//! derive the matching key without any shared sequence state.
//!
//! Random bytes are never drawn here. Key material comes from the ratchet and
//! nonces come from the encryptor's monotonic sequence.
//!
//! # Security Properties
//!
//! - Sender Isolation: each member's ratchet is salted with its member id
//! - Key Rotation: a new epoch hands out new ratchets, old keys are dropped
//! - Integrity: XChaCha20-Poly1305 with the media type as associated data

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod media_keys;

pub use media_keys::{
    CipherError, Decryptor, Encryptor, FRAME_OVERHEAD, FrameKey, FrameTrailer, HashKeyRatchet,
    KeyGeneration, KeyRatchet, MediaType, SharedKeyRatchet, StreamId, same_ratchet,
};
