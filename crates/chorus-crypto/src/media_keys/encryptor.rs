//! Outbound frame encryption for the local member.

use std::{collections::HashMap, fmt};

use chacha20poly1305::{XNonce, aead::AeadInPlace};
use tracing::trace;

use super::{
    cipher::{GenerationCipher, cipher_for},
    error::CipherError,
    frame::{FrameTrailer, TAG_SIZE, ciphertext_size},
    media::MediaType,
    ratchet::{SharedKeyRatchet, same_ratchet},
};

/// Identifies one local output line, e.g. an RTP SSRC.
pub type StreamId = u32;

/// Encrypts frames sent by the local member.
///
/// One encryptor serves every local stream. The nonce sequence is shared
/// across streams so two streams can never reuse a nonce under one key.
///
/// # Invariants
///
/// - The sequence never restarts. Rebinding (to a new ratchet, to `None`, or
///   back to an earlier one) continues it, so no (key, nonce) pair repeats for
///   the lifetime of the encryptor
/// - A sequence number is consumed only once the output buffer is known to fit
pub struct Encryptor {
    ratchet: Option<SharedKeyRatchet>,
    cipher: Option<GenerationCipher>,
    /// Next sequence to use. `None` once every generation is spent.
    next_sequence: Option<u64>,
    frames_per_stream: HashMap<StreamId, u64>,
}

impl Encryptor {
    /// Encryptor with no ratchet bound.
    pub fn new() -> Self {
        Self { ratchet: None, cipher: None, next_sequence: Some(0), frames_per_stream: HashMap::new() }
    }

    /// Bind a new ratchet (or clear the binding with `None`).
    ///
    /// The nonce sequence carries over. Two handles wrapping the same secret
    /// are indistinguishable here, so restarting it could repeat a nonce.
    pub fn set_key_ratchet(&mut self, ratchet: Option<SharedKeyRatchet>) {
        if same_ratchet(self.ratchet.as_ref(), ratchet.as_ref()) {
            return;
        }

        self.ratchet = ratchet;
        self.cipher = None;
    }

    /// Currently bound ratchet.
    pub fn key_ratchet(&self) -> Option<&SharedKeyRatchet> {
        self.ratchet.as_ref()
    }

    /// Whether a ratchet is bound.
    pub fn has_key_ratchet(&self) -> bool {
        self.ratchet.is_some()
    }

    /// Frames encrypted for `stream_id` since creation.
    pub fn frames_encrypted(&self, stream_id: StreamId) -> u64 {
        self.frames_per_stream.get(&stream_id).copied().unwrap_or(0)
    }

    /// Output capacity needed to encrypt `plaintext_len` bytes.
    pub fn max_ciphertext_size(plaintext_len: usize) -> usize {
        ciphertext_size(plaintext_len)
    }

    /// Encrypt `plaintext` into `out`, returning the number of bytes written.
    pub fn encrypt(
        &mut self,
        media: MediaType,
        stream_id: StreamId,
        plaintext: &[u8],
        out: &mut [u8],
    ) -> Result<usize, CipherError> {
        let ratchet = self.ratchet.clone().ok_or(CipherError::MissingKeyRatchet)?;

        let needed = ciphertext_size(plaintext.len());
        if out.len() < needed {
            return Err(CipherError::BufferTooSmall { needed, available: out.len() });
        }

        let sequence = self.next_sequence.ok_or(CipherError::GenerationExhausted)?;
        let trailer = FrameTrailer::from_sequence(sequence);
        let aead = cipher_for(&mut self.cipher, &*ratchet, trailer.generation)?;

        let (body, rest) = out.split_at_mut(plaintext.len());
        body.copy_from_slice(plaintext);

        let tag = aead
            .encrypt_in_place_detached(
                XNonce::from_slice(&trailer.nonce()),
                &[media.as_byte()],
                body,
            )
            .map_err(|_| CipherError::EncryptionFailed)?;

        rest[..TAG_SIZE].copy_from_slice(&tag);
        rest[TAG_SIZE..needed - plaintext.len()].copy_from_slice(&trailer.to_bytes());

        self.next_sequence = sequence.checked_add(1);
        *self.frames_per_stream.entry(stream_id).or_insert(0) += 1;

        trace!(
            stream_id,
            generation = trailer.generation,
            counter = trailer.counter,
            len = needed,
            "encrypted frame"
        );

        Ok(needed)
    }
}

impl Default for Encryptor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encryptor")
            .field("ratchet", &self.ratchet)
            .field("next_sequence", &self.next_sequence)
            .field("streams", &self.frames_per_stream.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media_keys::{
        Decryptor,
        frame::{FRAME_OVERHEAD, TRAILER_SIZE},
        ratchet::HashKeyRatchet,
    };

    fn bound_encryptor(member_id: u64) -> (Encryptor, SharedKeyRatchet) {
        let ratchet = HashKeyRatchet::shared(b"encryptor test secret", member_id);
        let mut encryptor = Encryptor::new();
        encryptor.set_key_ratchet(Some(ratchet.clone()));
        (encryptor, ratchet)
    }

    fn trailer_of(frame: &[u8]) -> FrameTrailer {
        FrameTrailer::split(frame).unwrap().2
    }

    #[test]
    fn encrypt_without_ratchet_fails() {
        let mut encryptor = Encryptor::new();
        let mut out = [0u8; 64];

        let result = encryptor.encrypt(MediaType::Audio, 1, b"hi", &mut out);
        assert_eq!(result, Err(CipherError::MissingKeyRatchet));
    }

    #[test]
    fn encrypt_writes_plaintext_plus_overhead() {
        let (mut encryptor, _) = bound_encryptor(1);
        let mut out = [0u8; 128];

        let written = encryptor.encrypt(MediaType::Audio, 1, b"opus frame", &mut out).unwrap();
        assert_eq!(written, b"opus frame".len() + FRAME_OVERHEAD);
        assert_ne!(&out[..10], b"opus frame");
    }

    #[test]
    fn small_buffer_is_rejected_without_consuming_nonce() {
        let (mut encryptor, _) = bound_encryptor(1);
        let mut tiny = [0u8; 8];

        let result = encryptor.encrypt(MediaType::Audio, 1, b"opus frame", &mut tiny);
        assert_eq!(
            result,
            Err(CipherError::BufferTooSmall { needed: 10 + FRAME_OVERHEAD, available: 8 })
        );

        let mut out = [0u8; 64];
        let written = encryptor.encrypt(MediaType::Audio, 1, b"opus frame", &mut out).unwrap();
        assert_eq!(trailer_of(&out[..written]), FrameTrailer { generation: 0, counter: 0 });
    }

    #[test]
    fn counter_rolls_into_next_generation() {
        let (mut encryptor, _) = bound_encryptor(1);
        encryptor.next_sequence = Some(u64::from(u32::MAX));
        let mut out = [0u8; 64];

        let n = encryptor.encrypt(MediaType::Audio, 1, b"a", &mut out).unwrap();
        assert_eq!(trailer_of(&out[..n]), FrameTrailer { generation: 0, counter: u32::MAX });

        let n = encryptor.encrypt(MediaType::Audio, 1, b"b", &mut out).unwrap();
        assert_eq!(trailer_of(&out[..n]), FrameTrailer { generation: 1, counter: 0 });
    }

    #[test]
    fn exhausted_sequence_is_an_error() {
        let (mut encryptor, _) = bound_encryptor(1);
        encryptor.next_sequence = Some(u64::MAX);
        let mut out = [0u8; 64];

        assert!(encryptor.encrypt(MediaType::Audio, 1, b"last", &mut out).is_ok());
        assert_eq!(
            encryptor.encrypt(MediaType::Audio, 1, b"one more", &mut out),
            Err(CipherError::GenerationExhausted)
        );
    }

    #[test]
    fn rebinding_same_ratchet_keeps_sequence() {
        let (mut encryptor, ratchet) = bound_encryptor(1);
        let mut out = [0u8; 64];
        encryptor.encrypt(MediaType::Audio, 1, b"a", &mut out).unwrap();

        encryptor.set_key_ratchet(Some(ratchet));

        let n = encryptor.encrypt(MediaType::Audio, 1, b"b", &mut out).unwrap();
        assert_eq!(trailer_of(&out[..n]).counter, 1);
    }

    #[test]
    fn binding_new_ratchet_continues_sequence() {
        let (mut encryptor, _) = bound_encryptor(1);
        let mut out = [0u8; 64];
        encryptor.encrypt(MediaType::Audio, 1, b"a", &mut out).unwrap();

        encryptor.set_key_ratchet(Some(HashKeyRatchet::shared(b"next epoch", 1)));

        let n = encryptor.encrypt(MediaType::Audio, 1, b"b", &mut out).unwrap();
        assert_eq!(trailer_of(&out[..n]).counter, 1);
    }

    #[test]
    fn unbinding_and_rebinding_same_ratchet_never_repeats_a_nonce() {
        let (mut encryptor, ratchet) = bound_encryptor(1);
        let mut out = [0u8; 64];
        let n = encryptor.encrypt(MediaType::Audio, 1, b"a", &mut out).unwrap();
        let first = trailer_of(&out[..n]);

        encryptor.set_key_ratchet(None);
        encryptor.set_key_ratchet(Some(ratchet));

        let n = encryptor.encrypt(MediaType::Audio, 1, b"b", &mut out).unwrap();
        assert_ne!(trailer_of(&out[..n]), first);
    }

    #[test]
    fn rewrapped_secret_never_repeats_a_nonce() {
        let (mut encryptor, _) = bound_encryptor(1);
        let mut out = [0u8; 64];
        let n = encryptor.encrypt(MediaType::Audio, 1, b"a", &mut out).unwrap();
        let first = trailer_of(&out[..n]);

        // Same secret and member as `bound_encryptor`, but a fresh handle.
        encryptor.set_key_ratchet(Some(HashKeyRatchet::shared(b"encryptor test secret", 1)));

        let n = encryptor.encrypt(MediaType::Audio, 1, b"b", &mut out).unwrap();
        assert_ne!(trailer_of(&out[..n]), first);
    }

    #[test]
    fn streams_share_one_nonce_sequence() {
        let (mut encryptor, _) = bound_encryptor(1);
        let mut out = [0u8; 64];

        let n = encryptor.encrypt(MediaType::Audio, 100, b"a", &mut out).unwrap();
        assert_eq!(trailer_of(&out[..n]).counter, 0);
        let n = encryptor.encrypt(MediaType::Audio, 200, b"b", &mut out).unwrap();
        assert_eq!(trailer_of(&out[..n]).counter, 1);

        assert_eq!(encryptor.frames_encrypted(100), 1);
        assert_eq!(encryptor.frames_encrypted(200), 1);
        assert_eq!(encryptor.frames_encrypted(300), 0);
    }

    #[test]
    fn frames_open_with_matching_decryptor() {
        let (mut encryptor, ratchet) = bound_encryptor(9);
        let mut decryptor = Decryptor::new();
        decryptor.transition_to_key_ratchet(Some(ratchet));

        let mut sealed = [0u8; 64];
        let n = encryptor.encrypt(MediaType::Video, 3, b"keyframe", &mut sealed).unwrap();
        assert_eq!(&sealed[n - 2..n], &[0xFA, 0xFA]);
        assert_eq!(n - TRAILER_SIZE - TAG_SIZE, 8);

        let mut opened = [0u8; 64];
        let m = decryptor.decrypt(MediaType::Video, &sealed[..n], &mut opened).unwrap();
        assert_eq!(&opened[..m], b"keyframe");
    }
}
