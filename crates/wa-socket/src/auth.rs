//! Device credentials and their on-disk store.
//!
//! Credentials live in a directory, one JSON file per entry, starting with
//! `creds.json`. A directory that does not exist yet is created on open.
//! Fresh credentials are generated in memory and only hit the disk once the
//! socket reports a creds update (i.e. after pairing).

use crate::error::{WhatsAppError, WhatsAppResult};
use crate::types::UserIdentity;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use log::{debug, info};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use x25519_dalek::{PublicKey, StaticSecret};

const CREDS_FILE: &str = "creds.json";

/// Serde adapter storing byte vectors as standard base64 strings.
pub mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

/// A Curve25519 key pair.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair {
    #[serde(with = "b64")]
    pub public: Vec<u8>,
    #[serde(with = "b64")]
    pub private: Vec<u8>,
}

impl KeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::thread_rng());
        let public = PublicKey::from(&secret);
        Self {
            public: public.as_bytes().to_vec(),
            private: secret.as_bytes().to_vec(),
        }
    }
}

/// Signed pre-key published at registration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPreKey {
    pub key_id: u32,
    pub key_pair: KeyPair,
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
}

/// Everything needed to resume a paired session.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCreds {
    pub noise_key: KeyPair,
    pub signed_identity_key: KeyPair,
    pub signed_pre_key: SignedPreKey,
    pub registration_id: u32,
    #[serde(with = "b64")]
    pub adv_secret_key: Vec<u8>,
    /// Set once the phone confirms pairing.
    #[serde(default)]
    pub me: Option<UserIdentity>,
    #[serde(default)]
    pub registered: bool,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for AuthCreds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthCreds")
            .field("registration_id", &self.registration_id)
            .field("me", &self.me)
            .field("registered", &self.registered)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl AuthCreds {
    /// Generate a fresh, unpaired set of credentials.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();

        let noise_key = KeyPair::generate();
        let signed_identity_key = KeyPair::generate();
        let pre_key = KeyPair::generate();
        let signature = sign_pre_key(&signed_identity_key.private, &pre_key.public);

        let mut reg_id_bytes = [0u8; 4];
        rng.fill_bytes(&mut reg_id_bytes);
        let registration_id = u32::from_le_bytes(reg_id_bytes) & 0x3FFF;

        let mut adv_secret_key = vec![0u8; 32];
        rng.fill_bytes(&mut adv_secret_key);

        Self {
            noise_key,
            signed_identity_key,
            signed_pre_key: SignedPreKey {
                key_id: 1,
                key_pair: pre_key,
                signature,
            },
            registration_id,
            adv_secret_key,
            me: None,
            registered: false,
            created_at: Utc::now(),
        }
    }
}

/// MAC of the pre-key under the identity key (stands in for XEdDSA).
fn sign_pre_key(identity_private: &[u8], pre_key_public: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = match <Hmac<Sha256> as Mac>::new_from_slice(identity_private) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(pre_key_public);
    mac.finalize().into_bytes().to_vec()
}

// ─── Store ──────────────────────────────────────────────────────────────

/// Directory-backed credential store, one file per entry.
#[derive(Debug, Clone)]
pub struct MultiFileAuthStore {
    dir: PathBuf,
}

impl MultiFileAuthStore {
    /// Open (and create if needed) the store directory.
    pub async fn open(dir: impl AsRef<Path>) -> WhatsAppResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if !meta.is_dir() => {
                return Err(WhatsAppError::storage(format!(
                    "auth path {} exists and is not a directory",
                    dir.display()
                )));
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&dir).await?;
                info!("Created auth directory {}", dir.display());
            }
            Err(e) => return Err(e.into()),
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read persisted credentials, if any.
    pub async fn load_creds(&self) -> WhatsAppResult<Option<AuthCreds>> {
        let path = self.path_for(CREDS_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let creds: AuthCreds = serde_json::from_slice(&bytes).map_err(|e| {
                    WhatsAppError::from(e).with_details(path.display().to_string())
                })?;
                debug!("Loaded credentials from {}", path.display());
                Ok(Some(creds))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persisted credentials, or a freshly generated unpaired set.
    pub async fn load_or_init_creds(&self) -> WhatsAppResult<AuthCreds> {
        match self.load_creds().await? {
            Some(creds) => Ok(creds),
            None => {
                info!("No stored credentials in {}, starting unpaired", self.dir.display());
                Ok(AuthCreds::generate())
            }
        }
    }

    /// Write credentials atomically (temp file + rename).
    pub async fn save_creds(&self, creds: &AuthCreds) -> WhatsAppResult<()> {
        let bytes = serde_json::to_vec_pretty(creds)?;
        let path = self.path_for(CREDS_FILE);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Saved credentials to {}", path.display());
        Ok(())
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(sanitize_file_name(name))
    }
}

/// Make an entry name safe as a single path component.
pub fn sanitize_file_name(name: &str) -> String {
    name.replace('/', "__").replace(':', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_creds() {
        let creds = AuthCreds::generate();
        assert_eq!(creds.noise_key.public.len(), 32);
        assert_eq!(creds.noise_key.private.len(), 32);
        assert_eq!(creds.signed_identity_key.public.len(), 32);
        assert_eq!(creds.adv_secret_key.len(), 32);
        assert!(creds.registration_id <= 0x3FFF);
        assert!(!creds.signed_pre_key.signature.is_empty());
        assert!(creds.me.is_none());
        assert!(!creds.registered);
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("pre-key/1:2"), "pre-key__1-2");
        assert_eq!(sanitize_file_name("creds.json"), "creds.json");
    }

    #[tokio::test]
    async fn test_open_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("auth");
        let store = MultiFileAuthStore::open(&dir).await.unwrap();
        assert!(store.dir().is_dir());
    }

    #[tokio::test]
    async fn test_open_rejects_file_path() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = MultiFileAuthStore::open(file.path()).await.unwrap_err();
        assert_eq!(err.code, crate::error::WhatsAppErrorCode::StorageError);
    }

    #[tokio::test]
    async fn test_missing_creds_generates_unsaved() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MultiFileAuthStore::open(tmp.path()).await.unwrap();
        assert!(store.load_creds().await.unwrap().is_none());

        let creds = store.load_or_init_creds().await.unwrap();
        assert!(!creds.registered);
        // Generating does not write anything.
        assert!(!tmp.path().join(CREDS_FILE).exists());
    }

    #[tokio::test]
    async fn test_saved_creds_are_reloaded() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MultiFileAuthStore::open(tmp.path()).await.unwrap();

        let mut creds = AuthCreds::generate();
        creds.registered = true;
        creds.me = Some(UserIdentity {
            id: "15551234567:4@s.whatsapp.net".into(),
            name: Some("Ada".into()),
        });
        store.save_creds(&creds).await.unwrap();

        let loaded = store.load_or_init_creds().await.unwrap();
        assert!(loaded.registered);
        assert_eq!(loaded.me, creds.me);
        assert_eq!(loaded.noise_key.private, creds.noise_key.private);
        assert_eq!(loaded.adv_secret_key, creds.adv_secret_key);
        assert!(!tmp.path().join("creds.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_creds_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CREDS_FILE), b"{not json").unwrap();
        let store = MultiFileAuthStore::open(tmp.path()).await.unwrap();
        let err = store.load_creds().await.unwrap_err();
        assert_eq!(err.code, crate::error::WhatsAppErrorCode::SerializationError);
    }
}
