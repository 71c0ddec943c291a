//! Cipher: authenticated encryption of opaque byte blobs under a passphrase.
//!
//! Spec contract (spec.md §4.2): deterministic key derivation, a fresh random nonce per
//! call, and decryption that distinguishably fails on truncation, bit-flip, or wrong
//! passphrase. The Design Notes in spec.md §9 flag that the source used CBC with no MAC
//! and call that out as unsound; this rewrite uses AES-256-GCM, a real AEAD, so any
//! single-byte modification of the ciphertext is detected by construction rather than
//! "probabilistically, via a parse failure downstream."

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use sha2::{Digest, Sha256};

use crate::error::CipherError;

/// Length in bytes of the random nonce prefixed to every ciphertext.
pub const NONCE_LEN: usize = 12;

/// Length in bytes of the AES-GCM authentication tag appended to every ciphertext,
/// independent of plaintext length (including empty plaintext).
const TAG_LEN: usize = 16;

/// One-way derivation from a passphrase to a 256-bit symmetric key.
///
/// Spec.md §9's Design Note: "the source computes the AES key by hashing the passphrase
/// once with SHA-256. This is not a password-based KDF." The Open Question of whether to
/// upgrade it is resolved in SPEC_FULL.md §5: kept as the default, behind a seam (`Kdf`)
/// that would let a slower KDF be swapped in without touching the state-file format.
pub trait Kdf {
    fn derive(&self, passphrase: &[u8]) -> [u8; 32];
}

/// The default KDF: single-shot SHA-256, matching the source's behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Kdf;

impl Kdf for Sha256Kdf {
    fn derive(&self, passphrase: &[u8]) -> [u8; 32] {
        Sha256::digest(passphrase).into()
    }
}

/// Authenticated encryption of arbitrary byte payloads under a passphrase.
///
/// `Cipher` is stateless with respect to any particular plaintext: it borrows key
/// material and byte buffers only for the duration of a call, matching the ownership
/// note in spec.md §3 ("the Cipher is stateless with respect to `State`").
pub struct Cipher<K: Kdf = Sha256Kdf> {
    kdf: K,
}

impl Default for Cipher<Sha256Kdf> {
    fn default() -> Self {
        Cipher { kdf: Sha256Kdf }
    }
}

impl<K: Kdf> Cipher<K> {
    pub fn with_kdf(kdf: K) -> Self {
        Cipher { kdf }
    }

    fn key_for(&self, passphrase: &[u8]) -> Key<Aes256Gcm> {
        Key::<Aes256Gcm>::from(self.kdf.derive(passphrase))
    }

    /// Encrypt `plaintext` under `passphrase`, returning `nonce || ciphertext_and_tag`.
    ///
    /// Two calls with the same plaintext and passphrase produce different outputs with
    /// overwhelming probability, since the nonce is freshly sampled every time. Empty
    /// plaintext is supported as a distinguished case (spec.md §4.2): it still samples a
    /// nonce and authenticates a zero-length body.
    pub fn encrypt(&self, passphrase: &[u8], plaintext: &[u8]) -> Vec<u8> {
        let key = self.key_for(passphrase);
        let cipher = Aes256Gcm::new(&key);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        // AES-GCM authenticates an empty plaintext just fine; there is nothing to unify
        // here beyond calling `encrypt` with an empty slice.
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .expect("AES-256-GCM encryption cannot fail for in-memory buffers");

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        out
    }

    /// Decrypt a blob produced by [`Cipher::encrypt`].
    ///
    /// Fails with [`CipherError::TooShort`] if `blob` is shorter than the nonce prefix,
    /// and with [`CipherError::AuthFailure`] for any bit-flip, truncation of the
    /// ciphertext body, or wrong passphrase — AES-GCM's tag check makes these
    /// indistinguishable from each other, which is exactly the property spec.md §4.2
    /// requires ("any single-byte modification... must be detected").
    pub fn decrypt(&self, passphrase: &[u8], blob: &[u8]) -> Result<Vec<u8>, CipherError> {
        if blob.len() < NONCE_LEN {
            return Err(CipherError::TooShort);
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);

        let key = self.key_for(passphrase);
        let cipher = Aes256Gcm::new(&key);

        let nonce = Nonce::from_slice(nonce_bytes);
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CipherError::AuthFailure)
    }
}

#[cfg(test)]
mod t_cipher {
    use rstest::rstest;

    use super::*;

    // P3/P4: a single-byte flip anywhere in the blob, or a truncation of any length,
    // must be detected. Table-tested across offsets/lengths rather than one spot check.
    #[rstest]
    #[case::flip_nonce_first_byte(0)]
    #[case::flip_nonce_last_byte(NONCE_LEN - 1)]
    #[case::flip_ciphertext_first_byte(NONCE_LEN)]
    #[case::flip_tag_last_byte(usize::MAX)]
    fn rejects_bit_flip_at_offset(#[case] offset: usize) {
        let cipher = Cipher::default();
        let mut blob = cipher.encrypt(b"hunter2", b"a reasonably sized payload");
        let offset = if offset == usize::MAX { blob.len() - 1 } else { offset };
        blob[offset] ^= 0x01;
        let err = cipher.decrypt(b"hunter2", &blob).unwrap_err();
        assert_eq!(err, CipherError::AuthFailure);
    }

    #[rstest]
    #[case::one_byte(1)]
    #[case::half(10)]
    #[case::all_but_nonce(19)]
    fn rejects_truncation_by(#[case] bytes_removed: usize) {
        let cipher = Cipher::default();
        let mut blob = cipher.encrypt(b"hunter2", b"a reasonably sized payload");
        blob.truncate(blob.len() - bytes_removed);
        let err = cipher.decrypt(b"hunter2", &blob).unwrap_err();
        assert_eq!(err, CipherError::AuthFailure);
    }

    #[test]
    fn round_trips() {
        let cipher = Cipher::default();
        let blob = cipher.encrypt(b"hunter2", b"remaining_ms=3600000");
        let plaintext = cipher.decrypt(b"hunter2", &blob).unwrap();
        assert_eq!(plaintext, b"remaining_ms=3600000");
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let cipher = Cipher::default();
        let blob = cipher.encrypt(b"hunter2", b"");
        // A GCM ciphertext is always plaintext length plus the tag, even for empty input.
        assert_eq!(blob.len(), NONCE_LEN + TAG_LEN);
        let plaintext = cipher.decrypt(b"hunter2", &blob).unwrap();
        assert!(plaintext.is_empty());
    }

    #[test]
    fn two_encryptions_of_same_plaintext_differ() {
        let cipher = Cipher::default();
        let a = cipher.encrypt(b"hunter2", b"payload");
        let b = cipher.encrypt(b"hunter2", b"payload");
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_too_short_input() {
        let cipher = Cipher::default();
        let err = cipher.decrypt(b"hunter2", &[0u8; NONCE_LEN - 1]).unwrap_err();
        assert_eq!(err, CipherError::TooShort);
    }

    #[test]
    fn rejects_bit_flip() {
        let cipher = Cipher::default();
        let mut blob = cipher.encrypt(b"hunter2", b"payload");
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        let err = cipher.decrypt(b"hunter2", &blob).unwrap_err();
        assert_eq!(err, CipherError::AuthFailure);
    }

    #[test]
    fn rejects_truncation() {
        let cipher = Cipher::default();
        let mut blob = cipher.encrypt(b"hunter2", b"payload");
        blob.truncate(blob.len() - 1);
        let err = cipher.decrypt(b"hunter2", &blob).unwrap_err();
        assert_eq!(err, CipherError::AuthFailure);
    }

    #[test]
    fn rejects_wrong_passphrase() {
        let cipher = Cipher::default();
        let blob = cipher.encrypt(b"hunter2", b"payload");
        let err = cipher.decrypt(b"wrong", &blob).unwrap_err();
        assert_eq!(err, CipherError::AuthFailure);
    }

    #[test]
    fn same_passphrase_derives_same_key_different_passphrases_dont() {
        let cipher = Cipher::default();
        let blob = cipher.encrypt(b"same", b"payload");
        assert!(cipher.decrypt(b"same", &blob).is_ok());
        assert!(cipher.decrypt(b"different", &blob).is_err());
    }
}
