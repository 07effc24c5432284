//! AEAD instance cached per key generation.

use chacha20poly1305::{Key, KeyInit, XChaCha20Poly1305};

use super::{
    error::CipherError,
    ratchet::{KeyGeneration, KeyRatchet},
};

/// XChaCha20-Poly1305 keyed for a single generation.
pub(crate) struct GenerationCipher {
    generation: KeyGeneration,
    aead: XChaCha20Poly1305,
}

/// Cipher for `generation`, deriving a fresh key from `ratchet` when the
/// cached one belongs to another generation.
pub(crate) fn cipher_for<'a>(
    slot: &'a mut Option<GenerationCipher>,
    ratchet: &dyn KeyRatchet,
    generation: KeyGeneration,
) -> Result<&'a XChaCha20Poly1305, CipherError> {
    let stale = slot.as_ref().is_none_or(|cached| cached.generation != generation);

    if stale {
        let key = ratchet.frame_key(generation)?;
        let aead = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        *slot = Some(GenerationCipher { generation, aead });
    }

    slot.as_ref().map(|cached| &cached.aead).ok_or(CipherError::KeyDerivation { generation })
}
