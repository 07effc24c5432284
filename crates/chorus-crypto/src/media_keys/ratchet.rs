//! Per-member key ratchets.
//!
//! A ratchet maps a key generation to a frame key. The group engine owns the
//! ratchets and hands out shared handles; cipher units hold a handle until the
//! next rebind.

use std::{fmt, sync::Arc};

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::CipherError;

/// Key generation selected by a frame trailer.
pub type KeyGeneration = u32;

/// Shared handle to a member's key ratchet.
pub type SharedKeyRatchet = Arc<dyn KeyRatchet>;

/// Frame key size (XChaCha20-Poly1305 key).
pub const FRAME_KEY_SIZE: usize = 32;

/// HKDF info label (domain separation).
const FRAME_KEY_LABEL: &[u8] = b"chorus frame key v1";

/// Symmetric key for all frames of one generation.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct FrameKey([u8; FRAME_KEY_SIZE]);

impl FrameKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; FRAME_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; FRAME_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for FrameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FrameKey(..)")
    }
}

/// Source of frame keys for one member.
///
/// Implementations must be deterministic: the same generation always yields
/// the same key for the lifetime of the ratchet, on every member's side.
pub trait KeyRatchet: Send + Sync + fmt::Debug {
    /// Key for frames of the given generation.
    fn frame_key(&self, generation: KeyGeneration) -> Result<FrameKey, CipherError>;
}

/// Whether two optional bindings refer to the same ratchet instance.
pub fn same_ratchet(a: Option<&SharedKeyRatchet>, b: Option<&SharedKeyRatchet>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// HKDF-SHA256 ratchet over an exported epoch secret.
///
/// The member id is the HKDF salt, so every member gets an independent key
/// schedule from the same epoch secret. Keys are random-access by generation.
#[derive(Clone)]
pub struct HashKeyRatchet {
    member_id: u64,
    hkdf: Hkdf<Sha256>,
}

impl HashKeyRatchet {
    /// Ratchet for `member_id` keyed by `base_secret`.
    pub fn new(base_secret: &[u8], member_id: u64) -> Self {
        let hkdf = Hkdf::<Sha256>::new(Some(&member_id.to_be_bytes()), base_secret);
        Self { member_id, hkdf }
    }

    /// Same as [`Self::new`], wrapped in a shared handle.
    pub fn shared(base_secret: &[u8], member_id: u64) -> SharedKeyRatchet {
        Arc::new(Self::new(base_secret, member_id))
    }

    /// Member this ratchet belongs to.
    pub fn member_id(&self) -> u64 {
        self.member_id
    }
}

impl KeyRatchet for HashKeyRatchet {
    fn frame_key(&self, generation: KeyGeneration) -> Result<FrameKey, CipherError> {
        let generation_bytes = generation.to_be_bytes();
        let info: [&[u8]; 2] = [FRAME_KEY_LABEL, &generation_bytes];

        let mut okm = [0u8; FRAME_KEY_SIZE];
        self.hkdf
            .expand_multi_info(&info, &mut okm)
            .map_err(|_| CipherError::KeyDerivation { generation })?;

        let key = FrameKey::from_bytes(okm);
        okm.zeroize();
        Ok(key)
    }
}

impl fmt::Debug for HashKeyRatchet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashKeyRatchet").field("member_id", &self.member_id).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"epoch secret for ratchet tests!!";

    #[test]
    fn same_inputs_give_same_key() {
        let a = HashKeyRatchet::new(SECRET, 7);
        let b = HashKeyRatchet::new(SECRET, 7);

        let ka = a.frame_key(3).unwrap();
        let kb = b.frame_key(3).unwrap();
        assert_eq!(ka.as_bytes(), kb.as_bytes());
    }

    #[test]
    fn members_get_independent_keys() {
        let a = HashKeyRatchet::new(SECRET, 1).frame_key(0).unwrap();
        let b = HashKeyRatchet::new(SECRET, 2).frame_key(0).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn generations_get_independent_keys() {
        let ratchet = HashKeyRatchet::new(SECRET, 1);
        let g0 = ratchet.frame_key(0).unwrap();
        let g1 = ratchet.frame_key(1).unwrap();
        assert_ne!(g0.as_bytes(), g1.as_bytes());
    }

    #[test]
    fn debug_does_not_leak_key_bytes() {
        let key = FrameKey::from_bytes([0xAB; FRAME_KEY_SIZE]);
        assert_eq!(format!("{key:?}"), "FrameKey(..)");
    }

    #[test]
    fn same_ratchet_compares_instances() {
        let a = HashKeyRatchet::shared(SECRET, 1);
        let b = HashKeyRatchet::shared(SECRET, 1);

        assert!(same_ratchet(Some(&a), Some(&a.clone())));
        assert!(!same_ratchet(Some(&a), Some(&b)));
        assert!(!same_ratchet(Some(&a), None));
        assert!(same_ratchet(None, None));
    }
}
