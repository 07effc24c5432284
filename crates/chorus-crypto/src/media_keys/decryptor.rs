//! Inbound frame decryption for one remote member.

use std::fmt;

use chacha20poly1305::{Tag, XNonce, aead::AeadInPlace};
use tracing::{debug, trace};

use super::{
    cipher::{GenerationCipher, cipher_for},
    error::CipherError,
    frame::FrameTrailer,
    media::MediaType,
    ratchet::{SharedKeyRatchet, same_ratchet},
};

/// A ratchet binding plus its cached per-generation cipher.
struct Binding {
    ratchet: SharedKeyRatchet,
    cipher: Option<GenerationCipher>,
}

impl Binding {
    fn new(ratchet: SharedKeyRatchet) -> Self {
        Self { ratchet, cipher: None }
    }

    /// Open `ciphertext` into the front of `out`. Caller checked capacity.
    fn open(
        &mut self,
        media: MediaType,
        ciphertext: &[u8],
        tag: &[u8],
        trailer: FrameTrailer,
        out: &mut [u8],
    ) -> Result<usize, CipherError> {
        let aead = cipher_for(&mut self.cipher, &*self.ratchet, trailer.generation)?;

        let buffer = &mut out[..ciphertext.len()];
        buffer.copy_from_slice(ciphertext);

        aead.decrypt_in_place_detached(
            XNonce::from_slice(&trailer.nonce()),
            &[media.as_byte()],
            buffer,
            Tag::from_slice(tag),
        )
        .map_err(|_| CipherError::AuthenticationFailed { generation: trailer.generation })?;

        Ok(ciphertext.len())
    }
}

/// Decrypts frames sent by one remote member.
///
/// Created lazily when the member first appears in the roster and re-bound on
/// every key change. When a new ratchet is bound the previous one is retained
/// (unless disabled) and used as a fallback, so frames encrypted just before a
/// commit landed still open.
pub struct Decryptor {
    current: Option<Binding>,
    previous: Option<Binding>,
    retain_previous: bool,
    frames_decrypted: u64,
    failures: u64,
}

impl Decryptor {
    /// Decryptor with no ratchet, retaining one previous ratchet on rebind.
    pub fn new() -> Self {
        Self::with_ratchet_retention(true)
    }

    /// Decryptor with no ratchet and explicit fallback policy.
    pub fn with_ratchet_retention(retain_previous: bool) -> Self {
        Self { current: None, previous: None, retain_previous, frames_decrypted: 0, failures: 0 }
    }

    /// Bind a new ratchet (or clear the binding with `None`).
    ///
    /// Re-binding the ratchet already in use changes nothing, which keeps
    /// repeated syncs idempotent. Clearing the binding keeps the last ratchet
    /// as the fallback, so in-flight frames still open while unbound.
    pub fn transition_to_key_ratchet(&mut self, ratchet: Option<SharedKeyRatchet>) {
        let current = self.current.as_ref().map(|binding| &binding.ratchet);
        if same_ratchet(current, ratchet.as_ref()) {
            return;
        }

        let replaced = std::mem::replace(&mut self.current, ratchet.map(Binding::new));
        if !self.retain_previous {
            self.previous = None;
        } else if replaced.is_some() {
            self.previous = replaced;
        }

        debug!(retained_previous = self.previous.is_some(), "decryptor transitioned key ratchet");
    }

    /// Currently bound ratchet.
    pub fn key_ratchet(&self) -> Option<&SharedKeyRatchet> {
        self.current.as_ref().map(|binding| &binding.ratchet)
    }

    /// Ratchet retained from before the last transition.
    pub fn previous_key_ratchet(&self) -> Option<&SharedKeyRatchet> {
        self.previous.as_ref().map(|binding| &binding.ratchet)
    }

    /// Frames successfully decrypted.
    pub fn frames_decrypted(&self) -> u64 {
        self.frames_decrypted
    }

    /// Frames that failed to decrypt.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Decrypt `encrypted` into `out`, returning the number of bytes written.
    pub fn decrypt(
        &mut self,
        media: MediaType,
        encrypted: &[u8],
        out: &mut [u8],
    ) -> Result<usize, CipherError> {
        let result = self.open(media, encrypted, out);

        match &result {
            Ok(len) => {
                self.frames_decrypted += 1;
                trace!(len, "decrypted frame");
            },
            Err(err) => {
                self.failures += 1;
                trace!(%err, "frame decryption failed");
            },
        }

        result
    }

    fn open(
        &mut self,
        media: MediaType,
        encrypted: &[u8],
        out: &mut [u8],
    ) -> Result<usize, CipherError> {
        let (ciphertext, tag, trailer) = FrameTrailer::split(encrypted)?;

        if out.len() < ciphertext.len() {
            return Err(CipherError::BufferTooSmall {
                needed: ciphertext.len(),
                available: out.len(),
            });
        }

        let Some(current) = self.current.as_mut() else {
            return match self.previous.as_mut() {
                Some(previous) => previous.open(media, ciphertext, tag, trailer, out),
                None => Err(CipherError::MissingKeyRatchet),
            };
        };

        match current.open(media, ciphertext, tag, trailer, out) {
            Err(CipherError::AuthenticationFailed { generation }) => match self.previous.as_mut() {
                Some(previous) => previous
                    .open(media, ciphertext, tag, trailer, out)
                    .map_err(|_| CipherError::AuthenticationFailed { generation }),
                None => Err(CipherError::AuthenticationFailed { generation }),
            },
            result => result,
        }
    }
}

impl Default for Decryptor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Decryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decryptor")
            .field("ratchet", &self.key_ratchet())
            .field("previous", &self.previous_key_ratchet())
            .field("frames_decrypted", &self.frames_decrypted)
            .field("failures", &self.failures)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media_keys::{Encryptor, HashKeyRatchet};

    fn seal(ratchet: &SharedKeyRatchet, media: MediaType, plaintext: &[u8]) -> Vec<u8> {
        let mut encryptor = Encryptor::new();
        encryptor.set_key_ratchet(Some(ratchet.clone()));
        let mut out = vec![0u8; Encryptor::max_ciphertext_size(plaintext.len())];
        let n = encryptor.encrypt(media, 1, plaintext, &mut out).unwrap();
        out.truncate(n);
        out
    }

    #[test]
    fn decrypt_without_ratchet_fails() {
        let ratchet = HashKeyRatchet::shared(b"secret", 2);
        let frame = seal(&ratchet, MediaType::Audio, b"hello");
        let mut decryptor = Decryptor::new();
        let mut out = [0u8; 32];

        assert_eq!(
            decryptor.decrypt(MediaType::Audio, &frame, &mut out),
            Err(CipherError::MissingKeyRatchet)
        );
        assert_eq!(decryptor.failures(), 1);
    }

    #[test]
    fn tampered_frame_fails_authentication() {
        let ratchet = HashKeyRatchet::shared(b"secret", 2);
        let mut frame = seal(&ratchet, MediaType::Audio, b"hello");
        frame[0] ^= 0x01;

        let mut decryptor = Decryptor::new();
        decryptor.transition_to_key_ratchet(Some(ratchet));
        let mut out = [0u8; 32];

        assert_eq!(
            decryptor.decrypt(MediaType::Audio, &frame, &mut out),
            Err(CipherError::AuthenticationFailed { generation: 0 })
        );
        assert_eq!(decryptor.frames_decrypted(), 0);
    }

    #[test]
    fn media_type_is_authenticated() {
        let ratchet = HashKeyRatchet::shared(b"secret", 2);
        let frame = seal(&ratchet, MediaType::Audio, b"hello");

        let mut decryptor = Decryptor::new();
        decryptor.transition_to_key_ratchet(Some(ratchet));
        let mut out = [0u8; 32];

        assert!(decryptor.decrypt(MediaType::Video, &frame, &mut out).is_err());
        assert_eq!(decryptor.decrypt(MediaType::Audio, &frame, &mut out), Ok(5));
    }

    #[test]
    fn small_output_buffer_is_rejected() {
        let ratchet = HashKeyRatchet::shared(b"secret", 2);
        let frame = seal(&ratchet, MediaType::Audio, b"hello");

        let mut decryptor = Decryptor::new();
        decryptor.transition_to_key_ratchet(Some(ratchet));
        let mut out = [0u8; 4];

        assert_eq!(
            decryptor.decrypt(MediaType::Audio, &frame, &mut out),
            Err(CipherError::BufferTooSmall { needed: 5, available: 4 })
        );
    }

    #[test]
    fn previous_ratchet_opens_in_flight_frames() {
        let old = HashKeyRatchet::shared(b"epoch 1", 2);
        let new = HashKeyRatchet::shared(b"epoch 2", 2);
        let in_flight = seal(&old, MediaType::Audio, b"late");

        let mut decryptor = Decryptor::new();
        decryptor.transition_to_key_ratchet(Some(old));
        decryptor.transition_to_key_ratchet(Some(new.clone()));

        let mut out = [0u8; 32];
        assert_eq!(decryptor.decrypt(MediaType::Audio, &in_flight, &mut out), Ok(4));
        assert_eq!(&out[..4], b"late");

        let fresh = seal(&new, MediaType::Audio, b"fresh");
        assert_eq!(decryptor.decrypt(MediaType::Audio, &fresh, &mut out), Ok(5));
    }

    #[test]
    fn retention_disabled_drops_previous_ratchet() {
        let old = HashKeyRatchet::shared(b"epoch 1", 2);
        let new = HashKeyRatchet::shared(b"epoch 2", 2);
        let in_flight = seal(&old, MediaType::Audio, b"late");

        let mut decryptor = Decryptor::with_ratchet_retention(false);
        decryptor.transition_to_key_ratchet(Some(old));
        decryptor.transition_to_key_ratchet(Some(new));
        assert!(decryptor.previous_key_ratchet().is_none());

        let mut out = [0u8; 32];
        assert!(decryptor.decrypt(MediaType::Audio, &in_flight, &mut out).is_err());
    }

    #[test]
    fn rebinding_same_ratchet_keeps_previous() {
        let old = HashKeyRatchet::shared(b"epoch 1", 2);
        let new = HashKeyRatchet::shared(b"epoch 2", 2);

        let mut decryptor = Decryptor::new();
        decryptor.transition_to_key_ratchet(Some(old.clone()));
        decryptor.transition_to_key_ratchet(Some(new.clone()));
        decryptor.transition_to_key_ratchet(Some(new.clone()));

        assert!(same_ratchet(decryptor.key_ratchet(), Some(&new)));
        assert!(same_ratchet(decryptor.previous_key_ratchet(), Some(&old)));
    }

    #[test]
    fn unbound_decryptor_still_opens_in_flight_frames() {
        let old = HashKeyRatchet::shared(b"epoch 1", 2);
        let in_flight = seal(&old, MediaType::Audio, b"late");

        let mut decryptor = Decryptor::new();
        decryptor.transition_to_key_ratchet(Some(old.clone()));
        decryptor.transition_to_key_ratchet(None);

        assert!(decryptor.key_ratchet().is_none());
        assert!(same_ratchet(decryptor.previous_key_ratchet(), Some(&old)));

        let mut out = [0u8; 32];
        assert_eq!(decryptor.decrypt(MediaType::Audio, &in_flight, &mut out), Ok(4));
        assert_eq!(&out[..4], b"late");
    }

    #[test]
    fn rebinding_after_unbind_keeps_last_real_ratchet() {
        let old = HashKeyRatchet::shared(b"epoch 1", 2);
        let new = HashKeyRatchet::shared(b"epoch 2", 2);
        let in_flight = seal(&old, MediaType::Audio, b"late");

        let mut decryptor = Decryptor::new();
        decryptor.transition_to_key_ratchet(Some(old.clone()));
        decryptor.transition_to_key_ratchet(None);
        decryptor.transition_to_key_ratchet(Some(new));

        assert!(same_ratchet(decryptor.previous_key_ratchet(), Some(&old)));

        let mut out = [0u8; 32];
        assert_eq!(decryptor.decrypt(MediaType::Audio, &in_flight, &mut out), Ok(4));
    }
}
