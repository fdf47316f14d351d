use ring::aead::{AES_256_GCM, Aad, LessSafeKey, Nonce, NONCE_LEN, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

/// Authenticated encryption for provider tokens at rest.
///
/// Envelope format: `hex(nonce):hex(tag):hex(ciphertext)`. Any tampering with
/// the envelope fails the AEAD tag check on open.
pub struct SecretBox {
    key: LessSafeKey,
    rng: SystemRandom,
}

#[derive(Debug, Error)]
pub enum SecretBoxError {
    #[error("encryption key must be 32 bytes of hex, got {0} bytes")]
    KeyLength(usize),
    #[error("encryption key is not valid hex")]
    KeyEncoding,
    #[error("malformed ciphertext envelope")]
    MalformedEnvelope,
    #[error("ciphertext failed integrity check")]
    Integrity,
    #[error("decrypted value is not valid utf-8")]
    Utf8,
    #[error("system randomness unavailable")]
    Rng,
}

impl SecretBox {
    /// Build a box from a 32-byte hex-encoded key.
    pub fn from_hex_key(hex_key: &str) -> Result<Self, SecretBoxError> {
        let key_bytes = hex::decode(hex_key.trim()).map_err(|_| SecretBoxError::KeyEncoding)?;
        if key_bytes.len() != 32 {
            return Err(SecretBoxError::KeyLength(key_bytes.len()));
        }
        let unbound =
            UnboundKey::new(&AES_256_GCM, &key_bytes).map_err(|_| SecretBoxError::KeyEncoding)?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, SecretBoxError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| SecretBoxError::Rng)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.as_bytes().to_vec();
        let tag = self
            .key
            .seal_in_place_separate_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| SecretBoxError::Integrity)?;

        Ok(format!(
            "{}:{}:{}",
            hex::encode(nonce_bytes),
            hex::encode(tag.as_ref()),
            hex::encode(&in_out)
        ))
    }

    pub fn decrypt(&self, envelope: &str) -> Result<String, SecretBoxError> {
        let mut parts = envelope.splitn(3, ':');
        let nonce_hex = parts.next().ok_or(SecretBoxError::MalformedEnvelope)?;
        let tag_hex = parts.next().ok_or(SecretBoxError::MalformedEnvelope)?;
        let ciphertext_hex = parts.next().ok_or(SecretBoxError::MalformedEnvelope)?;

        let nonce_bytes =
            hex::decode(nonce_hex).map_err(|_| SecretBoxError::MalformedEnvelope)?;
        let tag = hex::decode(tag_hex).map_err(|_| SecretBoxError::MalformedEnvelope)?;
        let ciphertext =
            hex::decode(ciphertext_hex).map_err(|_| SecretBoxError::MalformedEnvelope)?;

        let nonce_bytes: [u8; NONCE_LEN] = nonce_bytes
            .try_into()
            .map_err(|_| SecretBoxError::MalformedEnvelope)?;
        if tag.len() != AES_256_GCM.tag_len() {
            return Err(SecretBoxError::MalformedEnvelope);
        }

        let mut in_out = ciphertext;
        in_out.extend_from_slice(&tag);
        let plaintext = self
            .key
            .open_in_place(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| SecretBoxError::Integrity)?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| SecretBoxError::Utf8)
    }
}
