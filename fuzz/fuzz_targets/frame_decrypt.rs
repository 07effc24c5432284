//! Arbitrary bytes fed to a bound decryptor must fail cleanly, never panic
//! or write past the output buffer.

#![no_main]

use chorus_crypto::{Decryptor, HashKeyRatchet, MediaType};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut decryptor = Decryptor::new();
    decryptor.transition_to_key_ratchet(Some(HashKeyRatchet::shared(b"fuzz secret", 7)));

    let (media, frame) = match data.split_first() {
        Some((flag, rest)) if flag & 1 == 1 => (MediaType::Video, rest),
        Some((_, rest)) => (MediaType::Audio, rest),
        None => (MediaType::Audio, data),
    };

    let mut out = vec![0u8; frame.len()];
    if let Ok(written) = decryptor.decrypt(media, frame, &mut out) {
        assert!(written <= frame.len());
    }
});
