/// Crypto service for the road stack.
///
/// Long-term identity: Ed25519 signing keypair (32-byte seed) and an X25519
/// box keypair. Boxing: X25519 Diffie-Hellman between own secret and peer
/// public, HKDF-SHA256, then XChaCha20-Poly1305 with a random 24-byte nonce.
/// Because DH is symmetric, both ends of a pair seal and open with
/// `(own secret, peer public)`.
use std::fmt;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519Secret};

use crate::RoadError;

/// HKDF info string for domain separation.
const HKDF_INFO: &[u8] = b"road-protocol-box-xchacha20poly1305-v1";

/// Ed25519 identity keypair.
#[derive(Clone)]
pub struct SigningKeypair {
    seed: [u8; 32],
    verify_key: [u8; 32],
}

impl SigningKeypair {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let verify_key = SigningKey::from_bytes(&seed).verifying_key().to_bytes();
        Self { seed, verify_key }
    }

    pub fn seed(&self) -> &[u8; 32] {
        &self.seed
    }

    pub fn verify_key(&self) -> [u8; 32] {
        self.verify_key
    }
}

impl fmt::Debug for SigningKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeypair")
            .field("verify_key", &hex(&self.verify_key))
            .finish_non_exhaustive()
    }
}

/// X25519 keypair, long-term or ephemeral.
#[derive(Clone)]
pub struct BoxKeypair {
    secret: [u8; 32],
    public: [u8; 32],
}

impl BoxKeypair {
    pub fn from_secret(secret: [u8; 32]) -> Self {
        let public = X25519PublicKey::from(&X25519Secret::from(secret)).to_bytes();
        Self { secret, public }
    }

    pub fn secret(&self) -> &[u8; 32] {
        &self.secret
    }

    pub fn public(&self) -> [u8; 32] {
        self.public
    }
}

impl fmt::Debug for BoxKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxKeypair")
            .field("public", &hex(&self.public))
            .finish_non_exhaustive()
    }
}

/// Boxed payload: nonce plus AEAD ciphertext (16-byte tag included).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sealed {
    pub nonce: [u8; 24],
    pub ciphertext: Vec<u8>,
}

/// Signing and boxing primitives consumed by the stack.
///
/// Only key generation, nonces and challenges draw randomness; everything
/// else is deterministic.
pub trait CryptoService: Send + Sync {
    fn signing_keypair(&self) -> SigningKeypair;

    fn box_keypair(&self) -> BoxKeypair;

    /// 32 random bytes for challenges.
    fn challenge(&self) -> [u8; 32];

    fn sign(&self, seed: &[u8; 32], message: &[u8]) -> Vec<u8>;

    fn verify(&self, verify_key: &[u8; 32], message: &[u8], signature: &[u8])
        -> Result<(), RoadError>;

    fn seal(
        &self,
        secret: &[u8; 32],
        peer_public: &[u8; 32],
        plaintext: &[u8],
    ) -> Result<Sealed, RoadError>;

    fn open(
        &self,
        secret: &[u8; 32],
        peer_public: &[u8; 32],
        sealed: &Sealed,
    ) -> Result<Vec<u8>, RoadError>;
}

/// [`CryptoService`] over the dalek curves and XChaCha20-Poly1305.
#[derive(Debug, Clone, Copy, Default)]
pub struct DalekCrypto;

impl DalekCrypto {
    fn cipher(secret: &[u8; 32], peer_public: &[u8; 32]) -> Result<XChaCha20Poly1305, RoadError> {
        let shared = X25519Secret::from(*secret).diffie_hellman(&X25519PublicKey::from(*peer_public));
        let hkdf = Hkdf::<Sha256>::new(None, shared.as_bytes());
        let mut key = [0u8; 32];
        hkdf.expand(HKDF_INFO, &mut key)
            .map_err(|e| RoadError::Crypto(format!("key derivation failed: {e}")))?;
        Ok(XChaCha20Poly1305::new(&key.into()))
    }
}

fn random_32() -> [u8; 32] {
    use chacha20poly1305::aead::rand_core::{OsRng, RngCore};
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

impl CryptoService for DalekCrypto {
    fn signing_keypair(&self) -> SigningKeypair {
        SigningKeypair::from_seed(random_32())
    }

    fn box_keypair(&self) -> BoxKeypair {
        use chacha20poly1305::aead::rand_core::OsRng;
        let secret = X25519Secret::random_from_rng(OsRng);
        BoxKeypair::from_secret(secret.to_bytes())
    }

    fn challenge(&self) -> [u8; 32] {
        random_32()
    }

    fn sign(&self, seed: &[u8; 32], message: &[u8]) -> Vec<u8> {
        SigningKey::from_bytes(seed).sign(message).to_bytes().to_vec()
    }

    fn verify(
        &self,
        verify_key: &[u8; 32],
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), RoadError> {
        let key = VerifyingKey::from_bytes(verify_key).map_err(|_| RoadError::InvalidSignature)?;
        let sig = ed25519_dalek::Signature::from_slice(signature)
            .map_err(|_| RoadError::InvalidSignature)?;
        // Strict verification rejects non-canonical signatures
        key.verify_strict(message, &sig)
            .map_err(|_| RoadError::InvalidSignature)
    }

    fn seal(
        &self,
        secret: &[u8; 32],
        peer_public: &[u8; 32],
        plaintext: &[u8],
    ) -> Result<Sealed, RoadError> {
        use chacha20poly1305::aead::rand_core::{OsRng, RngCore};

        let cipher = Self::cipher(secret, peer_public)?;
        let mut nonce = [0u8; 24];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(&XNonce::from(nonce), plaintext)
            .map_err(|e| RoadError::Crypto(format!("encryption failed: {e}")))?;
        Ok(Sealed { nonce, ciphertext })
    }

    fn open(
        &self,
        secret: &[u8; 32],
        peer_public: &[u8; 32],
        sealed: &Sealed,
    ) -> Result<Vec<u8>, RoadError> {
        let cipher = Self::cipher(secret, peer_public)?;
        cipher
            .decrypt(&XNonce::from(sealed.nonce), sealed.ciphertext.as_ref())
            .map_err(|_| RoadError::Crypto("decryption failed: authentication error".into()))
    }
}

/// Short hex rendering for logs and debug output.
pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_box(seed: u8) -> BoxKeypair {
        BoxKeypair::from_secret([seed; 32])
    }

    #[test]
    fn sign_verify_roundtrip() {
        let crypto = DalekCrypto;
        let signer = SigningKeypair::from_seed([7; 32]);
        let sig = crypto.sign(signer.seed(), b"road");
        assert_eq!(sig.len(), 64);
        assert!(crypto.verify(&signer.verify_key(), b"road", &sig).is_ok());
    }

    #[test]
    fn verify_rejects_wrong_message_and_key() {
        let crypto = DalekCrypto;
        let signer = SigningKeypair::from_seed([7; 32]);
        let other = SigningKeypair::from_seed([8; 32]);
        let sig = crypto.sign(signer.seed(), b"road");
        assert!(matches!(
            crypto.verify(&signer.verify_key(), b"path", &sig),
            Err(RoadError::InvalidSignature)
        ));
        assert!(crypto.verify(&other.verify_key(), b"road", &sig).is_err());
        assert!(crypto.verify(&signer.verify_key(), b"road", &sig[..10]).is_err());
    }

    #[test]
    fn seal_open_is_symmetric_across_pair() {
        let crypto = DalekCrypto;
        let a = seeded_box(1);
        let b = seeded_box(2);
        let sealed = crypto.seal(a.secret(), &b.public(), b"challenge").unwrap();
        let opened = crypto.open(b.secret(), &a.public(), &sealed).unwrap();
        assert_eq!(opened, b"challenge");
    }

    #[test]
    fn open_with_wrong_key_fails() {
        let crypto = DalekCrypto;
        let a = seeded_box(1);
        let b = seeded_box(2);
        let c = seeded_box(3);
        let sealed = crypto.seal(a.secret(), &b.public(), b"secret").unwrap();
        assert!(crypto.open(c.secret(), &a.public(), &sealed).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let crypto = DalekCrypto;
        let a = seeded_box(1);
        let b = seeded_box(2);
        let mut sealed = crypto.seal(a.secret(), &b.public(), b"secret").unwrap();
        sealed.ciphertext[0] ^= 0xFF;
        assert!(crypto.open(b.secret(), &a.public(), &sealed).is_err());
    }

    #[test]
    fn generated_keys_differ() {
        let crypto = DalekCrypto;
        assert_ne!(
            crypto.signing_keypair().verify_key(),
            crypto.signing_keypair().verify_key()
        );
        assert_ne!(crypto.box_keypair().public(), crypto.box_keypair().public());
        assert_ne!(crypto.challenge(), crypto.challenge());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let signer = SigningKeypair::from_seed([0xAB; 32]);
        let rendered = format!("{signer:?}");
        assert!(!rendered.contains("abababababababababab"));
    }
}
