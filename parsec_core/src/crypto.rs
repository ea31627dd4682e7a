//! Cryptographic primitives used by Parsec clients.
//!
//! - [`SecretKey`]: XChaCha20-Poly1305, output is `nonce (24 bytes) || ciphertext`
//! - [`SigningKey`] / [`VerifyKey`]: Ed25519 detached signatures
//! - [`PrivateKey`] / [`PublicKey`]: X25519 sealed boxes, used for data a
//!   user encrypts for themselves (the user manifest)
//!
//! Key material never implements `Display`, and `Debug` is redacted.

use chacha20poly1305::{
    XChaCha20Poly1305,
    aead::{Aead, KeyInit},
};
use ed25519_dalek::{Signer, Verifier};
use minicbor::{Decode, Decoder, Encode, Encoder, decode, encode};
use rand::Rng;
use std::fmt;
use thiserror::Error;
use zeroize::Zeroize;

const NONCE_LEN: usize = 24;
const SEAL_KDF_CONTEXT: &str = "parsec 2026-01 sealed box xchacha20poly1305 key";

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length: expected 32 bytes")]
    InvalidKeyLength,
    #[error("Data too short: expected at least {0} bytes")]
    DataTooShort(usize),
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,
    #[error("Signature verification failed")]
    BadSignature,
    #[error("Invalid public key")]
    InvalidPublicKey,
}

pub type CryptoResult<T> = Result<T, CryptoError>;

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::rng().fill(&mut bytes[..]);
    bytes
}

fn encrypt_with(key: &[u8; 32], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(&(*key).into());
    let nonce: [u8; NONCE_LEN] = random_bytes();
    let ciphertext = cipher
        .encrypt(&nonce.into(), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn decrypt_with(key: &[u8; 32], data: &[u8]) -> CryptoResult<Vec<u8>> {
    if data.len() < NONCE_LEN {
        return Err(CryptoError::DataTooShort(NONCE_LEN));
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    let nonce: [u8; NONCE_LEN] = nonce
        .try_into()
        .map_err(|_| CryptoError::DataTooShort(NONCE_LEN))?;
    let cipher = XChaCha20Poly1305::new(&(*key).into());
    cipher
        .decrypt(&nonce.into(), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Symmetric key for blocks and vlob blobs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    pub fn generate() -> Self {
        Self(random_bytes())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn try_from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength)?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        encrypt_with(&self.0, plaintext)
    }

    pub fn decrypt(&self, data: &[u8]) -> CryptoResult<Vec<u8>> {
        decrypt_with(&self.0, data)
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Encoded as a plain CBOR byte string.
impl<C> Encode<C> for SecretKey {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut C,
    ) -> Result<(), encode::Error<W::Error>> {
        e.bytes(&self.0)?;
        Ok(())
    }
}

impl<'b, C> Decode<'b, C> for SecretKey {
    fn decode(d: &mut Decoder<'b>, _ctx: &mut C) -> Result<Self, decode::Error> {
        Self::try_from_slice(d.bytes()?)
            .map_err(|_| decode::Error::message("secret key must be 32 bytes"))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(***)")
    }
}

/// Ed25519 signing key.
#[derive(Clone)]
pub struct SigningKey(ed25519_dalek::SigningKey);

impl SigningKey {
    pub fn generate() -> Self {
        let mut seed: [u8; 32] = random_bytes();
        let key = ed25519_dalek::SigningKey::from_bytes(&seed);
        seed.zeroize();
        Self(key)
    }

    pub fn from_bytes(seed: &[u8; 32]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(seed))
    }

    pub fn verify_key(&self) -> VerifyKey {
        VerifyKey(self.0.verifying_key())
    }

    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        self.0.sign(data).to_bytes()
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SigningKey")
            .field(&self.verify_key())
            .finish()
    }
}

/// Ed25519 verification key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct VerifyKey(ed25519_dalek::VerifyingKey);

impl VerifyKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> CryptoResult<Self> {
        ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    pub fn verify(&self, data: &[u8], signature: &[u8; 64]) -> CryptoResult<()> {
        let signature = ed25519_dalek::Signature::from_bytes(signature);
        self.0
            .verify(data, &signature)
            .map_err(|_| CryptoError::BadSignature)
    }
}

impl fmt::Debug for VerifyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = data_encoding::HEXLOWER.encode(&self.0.as_bytes()[..5]);
        write!(f, "VerifyKey({hex})")
    }
}

/// X25519 private key used to open sealed boxes.
#[derive(Clone)]
pub struct PrivateKey(x25519_dalek::StaticSecret);

impl PrivateKey {
    pub fn generate() -> Self {
        Self(x25519_dalek::StaticSecret::from(random_bytes::<32>()))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::StaticSecret::from(bytes))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0))
    }

    /// Opens a box produced by [`PublicKey::seal`] for this key.
    pub fn open(&self, sealed: &[u8]) -> CryptoResult<Vec<u8>> {
        if sealed.len() < 32 + NONCE_LEN {
            return Err(CryptoError::DataTooShort(32 + NONCE_LEN));
        }
        let (ephemeral, data) = sealed.split_at(32);
        let ephemeral: [u8; 32] = ephemeral
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        let ephemeral = x25519_dalek::PublicKey::from(ephemeral);
        let shared = self.0.diffie_hellman(&ephemeral);
        let mut key = seal_key(shared.as_bytes(), ephemeral.as_bytes(), self.public_key().0.as_bytes());
        let result = decrypt_with(&key, data);
        key.zeroize();
        result
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(***)")
    }
}

/// X25519 public key used to seal boxes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(x25519_dalek::PublicKey);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::PublicKey::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Encrypts `plaintext` so that only the matching [`PrivateKey`] can open it.
    ///
    /// Layout: `ephemeral public key (32) || nonce (24) || ciphertext`.
    pub fn seal(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let ephemeral = x25519_dalek::StaticSecret::from(random_bytes::<32>());
        let ephemeral_public = x25519_dalek::PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&self.0);
        let mut key = seal_key(shared.as_bytes(), ephemeral_public.as_bytes(), self.0.as_bytes());
        let body = encrypt_with(&key, plaintext);
        key.zeroize();

        let body = body?;
        let mut out = Vec::with_capacity(32 + body.len());
        out.extend_from_slice(ephemeral_public.as_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = data_encoding::HEXLOWER.encode(&self.0.as_bytes()[..5]);
        write!(f, "PublicKey({hex})")
    }
}

fn seal_key(shared: &[u8; 32], ephemeral: &[u8; 32], recipient: &[u8; 32]) -> [u8; 32] {
    let mut material = [0u8; 96];
    material[..32].copy_from_slice(shared);
    material[32..64].copy_from_slice(ephemeral);
    material[64..].copy_from_slice(recipient);
    let key = blake3::derive_key(SEAL_KDF_CONTEXT, &material);
    material.zeroize();
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_roundtrip_and_tamper() {
        let key = SecretKey::generate();
        let mut sealed = key.encrypt(b"hello parsec").unwrap();
        assert_eq!(key.decrypt(&sealed).unwrap(), b"hello parsec");

        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(
            key.decrypt(&sealed),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn symmetric_wrong_key_fails() {
        let sealed = SecretKey::generate().encrypt(b"data").unwrap();
        assert!(SecretKey::generate().decrypt(&sealed).is_err());
        assert!(matches!(
            SecretKey::generate().decrypt(&[0u8; 3]),
            Err(CryptoError::DataTooShort(24))
        ));
    }

    #[test]
    fn secret_key_is_a_cbor_byte_string() {
        let key = SecretKey::generate();
        let encoded = minicbor::to_vec(&key).unwrap();
        assert_eq!(encoded, minicbor::to_vec(<&minicbor::bytes::ByteSlice>::from(&key.as_bytes()[..])).unwrap());
        let decoded: SecretKey = minicbor::decode(&encoded).unwrap();
        assert_eq!(decoded, key);

        let short = minicbor::to_vec(<&minicbor::bytes::ByteSlice>::from(&[7u8; 31][..])).unwrap();
        assert!(minicbor::decode::<SecretKey>(&short).is_err());
    }

    #[test]
    fn signatures_verify_only_for_signed_data() {
        let key = SigningKey::generate();
        let verify = key.verify_key();
        let sig = key.sign(b"manifest");
        verify.verify(b"manifest", &sig).unwrap();
        assert!(verify.verify(b"manifesT", &sig).is_err());

        let other = SigningKey::generate().verify_key();
        assert!(other.verify(b"manifest", &sig).is_err());
    }

    #[test]
    fn sealed_box_roundtrip() {
        let private = PrivateKey::generate();
        let sealed = private.public_key().seal(b"user manifest").unwrap();
        assert_eq!(private.open(&sealed).unwrap(), b"user manifest");
        assert!(PrivateKey::generate().open(&sealed).is_err());
    }

    #[test]
    fn debug_does_not_leak_key_material() {
        let key = SecretKey::from_bytes([7u8; 32]);
        assert_eq!(format!("{key:?}"), "SecretKey(***)");
        assert_eq!(format!("{:?}", PrivateKey::generate()), "PrivateKey(***)");
    }
}
