//! Key material for the tunnel channel.
//!
//! Both secrets of a session derive from the shared password: the AES-256-GCM key is the raw
//! SHA-256 digest, and the masquerade username is the digest's first hex characters behind a
//! player-like prefix. Nothing else is negotiated on the wire.

use crate::error::Error;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// The AEAD nonce width in bytes.
pub(crate) const NONCE_LENGTH: usize = 12;

/// The AEAD authentication tag width in bytes.
pub(crate) const TAG_LENGTH: usize = 16;

const USERNAME_PREFIX: &str = "Player";
const USERNAME_DIGEST_CHARS: usize = 8;

/// Derives the session cipher from the shared password.
pub(crate) fn derive_cipher(password: &str) -> Aes256Gcm {
    let digest = Sha256::digest(password.as_bytes());
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&digest))
}

/// Derives the masquerade username from the shared password.
///
/// The name has to look like an ordinary player name and has to be identical on both ends, so it
/// reuses the key digest: `Player` followed by the first eight lowercase hex characters.
pub(crate) fn derive_username(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    let encoded = hex::encode(digest);
    format!("{USERNAME_PREFIX}{}", &encoded[..USERNAME_DIGEST_CHARS])
}

/// Seals one write-buffer worth of plaintext into a plugin-message body.
///
/// The nonce is drawn fresh from the OS for every flush and transmitted in front of the
/// ciphertext. There is no counter fallback: the 96-bit random space is relied on not to repeat
/// within one session, which holds because sessions are short-lived.
pub(crate) fn seal(cipher: &Aes256Gcm, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
    let mut nonce = [0u8; NONCE_LENGTH];
    OsRng.fill_bytes(&mut nonce);

    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| Error::SealFailed)?;

    let mut body = Vec::with_capacity(NONCE_LENGTH + sealed.len());
    body.extend_from_slice(&nonce);
    body.extend_from_slice(&sealed);
    Ok(body)
}

/// Recovers plaintext from an inbound payload of `nonce ‖ ciphertext ‖ tag` shape.
///
/// Returns [`None`] when the payload does not authenticate. That is the expected outcome for any
/// genuine chunk payload that happens to pass the length checks, so the caller drops it silently.
pub(crate) fn open(cipher: &Aes256Gcm, payload: &[u8]) -> Option<Vec<u8>> {
    if payload.len() < NONCE_LENGTH {
        return None;
    }

    let (nonce, sealed) = payload.split_at(NONCE_LENGTH);
    cipher.decrypt(Nonce::from_slice(nonce), sealed).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_documented_username() {
        assert_eq!(derive_username("hunter2"), "Playerf52fbd32");
    }

    #[test]
    fn seal_open_roundtrip() {
        let cipher = derive_cipher("hunter2");
        let body = seal(&cipher, b"payload").expect("seal failed");

        assert_eq!(body.len(), NONCE_LENGTH + b"payload".len() + TAG_LENGTH);
        assert_eq!(open(&cipher, &body).expect("open failed"), b"payload");
    }

    #[test]
    fn open_rejects_wrong_key() {
        let cipher = derive_cipher("hunter2");
        let body = seal(&cipher, b"payload").expect("seal failed");

        let other = derive_cipher("hunter3");
        assert!(open(&other, &body).is_none());
    }

    #[test]
    fn open_rejects_tampered_body() {
        let cipher = derive_cipher("hunter2");
        let mut body = seal(&cipher, b"payload").expect("seal failed");
        let last = body.len() - 1;
        body[last] ^= 0x01;

        assert!(open(&cipher, &body).is_none());
    }

    #[test]
    fn open_rejects_short_payload() {
        let cipher = derive_cipher("hunter2");
        assert!(open(&cipher, &[0u8; NONCE_LENGTH - 1]).is_none());
    }

    #[test]
    fn nonces_differ_between_flushes() {
        let cipher = derive_cipher("hunter2");
        let first = seal(&cipher, b"payload").expect("seal failed");
        let second = seal(&cipher, b"payload").expect("seal failed");

        assert_ne!(first[..NONCE_LENGTH], second[..NONCE_LENGTH]);
    }
}
