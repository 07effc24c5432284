//! Property tests for media frame encryption.
//!
//! Frames sealed by an encryptor must open with a decryptor bound to the same
//! ratchet, and must not open under any other member's ratchet.

use chorus_crypto::{
    CipherError, Decryptor, Encryptor, FRAME_OVERHEAD, HashKeyRatchet, MediaType,
};
use proptest::prelude::*;

fn media_type() -> impl Strategy<Value = MediaType> {
    prop_oneof![Just(MediaType::Audio), Just(MediaType::Video)]
}

proptest! {
    #[test]
    fn sealed_frames_open_with_bound_ratchet(
        secret in prop::collection::vec(any::<u8>(), 1..64),
        member_id in any::<u64>(),
        media in media_type(),
        frames in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..512), 1..8),
    ) {
        let ratchet = HashKeyRatchet::shared(&secret, member_id);
        let mut encryptor = Encryptor::new();
        encryptor.set_key_ratchet(Some(ratchet.clone()));
        let mut decryptor = Decryptor::new();
        decryptor.transition_to_key_ratchet(Some(ratchet));

        for plaintext in &frames {
            let mut sealed = vec![0u8; plaintext.len() + FRAME_OVERHEAD];
            let n = encryptor.encrypt(media, 7, plaintext, &mut sealed).unwrap();
            prop_assert_eq!(n, sealed.len());

            let mut opened = vec![0u8; plaintext.len()];
            let m = decryptor.decrypt(media, &sealed, &mut opened).unwrap();
            prop_assert_eq!(&opened[..m], plaintext.as_slice());
        }

        prop_assert_eq!(decryptor.frames_decrypted(), frames.len() as u64);
    }

    #[test]
    fn other_members_ratchet_cannot_open(
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
        sender in any::<u64>(),
    ) {
        let receiver_view = sender.wrapping_add(1);
        let mut encryptor = Encryptor::new();
        encryptor.set_key_ratchet(Some(HashKeyRatchet::shared(b"shared epoch", sender)));
        let mut decryptor = Decryptor::new();
        decryptor.transition_to_key_ratchet(Some(HashKeyRatchet::shared(b"shared epoch", receiver_view)));

        let mut sealed = vec![0u8; plaintext.len() + FRAME_OVERHEAD];
        encryptor.encrypt(MediaType::Audio, 1, &plaintext, &mut sealed).unwrap();

        let mut opened = vec![0u8; plaintext.len()];
        let result = decryptor.decrypt(MediaType::Audio, &sealed, &mut opened);
        prop_assert_eq!(result, Err(CipherError::AuthenticationFailed { generation: 0 }));
    }
}
