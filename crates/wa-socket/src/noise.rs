//! Noise-style handshake and the transport cipher it yields.
//!
//! Only the [`crate::web`] transport's peers understand this exchange; the
//! client-finish payload is not WhatsApp's protobuf handshake message.
//! The handshake mixes both ephemeral keys and the shared secret into a
//! running SHA-256 hash, then splits two AES-256-GCM keys out of it with
//! HKDF. Nonces are 96-bit with the big-endian frame counter in the low
//! eight bytes.

use crate::auth::AuthCreds;
use crate::error::{WhatsAppError, WhatsAppResult};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey};

/// Protocol name mixed into the initial hash.
pub const NOISE_PROLOGUE: &[u8] = b"Noise_XX_25519_AESGCM_SHA256\x00\x00\x00\x00";

/// Client side of the handshake.
pub struct NoiseHandshake {
    hash: [u8; 32],
    salt: [u8; 32],
    ephemeral: Option<EphemeralSecret>,
    shared: Option<[u8; 32]>,
}

impl std::fmt::Debug for NoiseHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoiseHandshake")
            .field("has_shared_secret", &self.shared.is_some())
            .finish_non_exhaustive()
    }
}

impl NoiseHandshake {
    pub fn new() -> Self {
        let hash: [u8; 32] = Sha256::digest(NOISE_PROLOGUE).into();
        Self {
            hash,
            salt: hash,
            ephemeral: None,
            shared: None,
        }
    }

    /// First message: 2-byte length prefix + our ephemeral public key.
    pub fn client_hello(&mut self) -> Vec<u8> {
        let ephemeral = EphemeralSecret::random_from_rng(rand::thread_rng());
        let public = PublicKey::from(&ephemeral);
        self.mix_into_hash(public.as_bytes());
        self.ephemeral = Some(ephemeral);

        let mut frame = Vec::with_capacity(34);
        frame.extend_from_slice(&[0x00, 0x20]);
        frame.extend_from_slice(public.as_bytes());
        frame
    }

    /// Absorb the server's ephemeral key and compute the shared secret.
    pub fn process_server_hello(&mut self, data: &[u8]) -> WhatsAppResult<()> {
        let server_key: [u8; 32] = data
            .get(..32)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| WhatsAppError::handshake("server hello too short"))?;
        let ephemeral = self
            .ephemeral
            .take()
            .ok_or_else(|| WhatsAppError::handshake("server hello before client hello"))?;

        self.mix_into_hash(&server_key);
        let shared = ephemeral.diffie_hellman(&PublicKey::from(server_key));
        self.mix_into_hash(shared.as_bytes());
        self.shared = Some(*shared.as_bytes());
        Ok(())
    }

    /// Final message: our static noise key plus the registration payload.
    pub fn client_finish(&mut self, creds: &AuthCreds) -> WhatsAppResult<Vec<u8>> {
        if self.shared.is_none() {
            return Err(WhatsAppError::handshake("client finish before server hello"));
        }
        let mut payload = Vec::with_capacity(32 + 34 + 6);
        payload.extend_from_slice(&creds.noise_key.public);
        payload.push(0x0A);
        payload.push(32);
        payload.extend_from_slice(&creds.signed_identity_key.public);
        payload.push(0x12);
        payload.push(4);
        payload.extend_from_slice(&creds.registration_id.to_le_bytes());
        self.mix_into_hash(&payload);
        Ok(payload)
    }

    /// Derive the send/receive transport keys.
    pub fn split(self) -> WhatsAppResult<TransportCipher> {
        let shared = self
            .shared
            .ok_or_else(|| WhatsAppError::handshake("handshake not complete"))?;
        let hk = Hkdf::<Sha256>::new(Some(&self.salt), &[self.hash, shared].concat());
        let mut okm = [0u8; 64];
        hk.expand(b"transport_keys", &mut okm)
            .map_err(|_| WhatsAppError::handshake("HKDF expand failed"))?;

        let mut encrypt_key = [0u8; 32];
        let mut decrypt_key = [0u8; 32];
        encrypt_key.copy_from_slice(&okm[..32]);
        decrypt_key.copy_from_slice(&okm[32..]);
        Ok(TransportCipher::new(encrypt_key, decrypt_key))
    }

    fn mix_into_hash(&mut self, data: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.hash);
        hasher.update(data);
        self.hash = hasher.finalize().into();
    }
}

impl Default for NoiseHandshake {
    fn default() -> Self {
        Self::new()
    }
}

/// Post-handshake frame cipher with independent counters per direction.
pub struct TransportCipher {
    encrypt_key: [u8; 32],
    decrypt_key: [u8; 32],
    encrypt_counter: u64,
    decrypt_counter: u64,
}

impl std::fmt::Debug for TransportCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportCipher")
            .field("encrypt_counter", &self.encrypt_counter)
            .field("decrypt_counter", &self.decrypt_counter)
            .finish_non_exhaustive()
    }
}

impl TransportCipher {
    pub fn new(encrypt_key: [u8; 32], decrypt_key: [u8; 32]) -> Self {
        Self {
            encrypt_key,
            decrypt_key,
            encrypt_counter: 0,
            decrypt_counter: 0,
        }
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> WhatsAppResult<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(&self.encrypt_key)
            .map_err(|e| WhatsAppError::internal(format!("AES init: {}", e)))?;
        let nonce = counter_nonce(self.encrypt_counter);
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| WhatsAppError::internal("frame encryption failed"))?;
        self.encrypt_counter += 1;
        Ok(sealed)
    }

    pub fn decrypt(&mut self, ciphertext: &[u8]) -> WhatsAppResult<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(&self.decrypt_key)
            .map_err(|e| WhatsAppError::internal(format!("AES init: {}", e)))?;
        let nonce = counter_nonce(self.decrypt_counter);
        let plain = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| WhatsAppError::internal("frame decryption failed"))?;
        self.decrypt_counter += 1;
        Ok(plain)
    }
}

fn counter_nonce(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_hello_shape() {
        let mut hs = NoiseHandshake::new();
        let hello = hs.client_hello();
        assert_eq!(hello.len(), 34);
        assert_eq!(&hello[..2], &[0x00, 0x20]);
    }

    #[test]
    fn test_short_server_hello_rejected() {
        let mut hs = NoiseHandshake::new();
        hs.client_hello();
        assert!(hs.process_server_hello(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_finish_requires_server_hello() {
        let mut hs = NoiseHandshake::new();
        hs.client_hello();
        assert!(hs.client_finish(&AuthCreds::generate()).is_err());
    }

    #[test]
    fn test_full_handshake_yields_cipher() {
        let server = PublicKey::from(&EphemeralSecret::random_from_rng(rand::thread_rng()));
        let mut hs = NoiseHandshake::new();
        hs.client_hello();
        hs.process_server_hello(server.as_bytes()).unwrap();
        let finish = hs.client_finish(&AuthCreds::generate()).unwrap();
        assert_eq!(finish.len(), 32 + 34 + 6);
        assert!(hs.split().is_ok());
    }

    #[test]
    fn test_cipher_pair_roundtrip_with_counters() {
        let a = [7u8; 32];
        let b = [9u8; 32];
        let mut client = TransportCipher::new(a, b);
        let mut server = TransportCipher::new(b, a);

        for body in [&b"first frame that is long enough"[..], b"second"] {
            let sealed = client.encrypt(body).unwrap();
            assert_eq!(server.decrypt(&sealed).unwrap(), body);
        }
        assert_eq!(client.encrypt_counter, 2);
        assert_eq!(server.decrypt_counter, 2);
    }

    #[test]
    fn test_tampered_frame_rejected() {
        let mut client = TransportCipher::new([1u8; 32], [2u8; 32]);
        let mut server = TransportCipher::new([2u8; 32], [1u8; 32]);
        let mut sealed = client.encrypt(b"hello").unwrap();
        sealed[0] ^= 0xFF;
        assert!(server.decrypt(&sealed).is_err());
        assert_eq!(server.decrypt_counter, 0);
    }
}
