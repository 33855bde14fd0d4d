use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// How long a stored access token is trusted before we ask for a new login
pub const DEFAULT_TOKEN_VALIDITY_DAYS: u64 = 30;

/// On-disk store for backend access tokens, keyed by backend host
///
/// Tokens are XOR'd with a machine-specific key so the file isn't plain text
/// if it gets copied around. This is obfuscation, not encryption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialStore {
    tokens: HashMap<String, StoredToken>,
    #[serde(skip)]
    path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    /// Obfuscated token value
    encrypted_value: Vec<u8>,
    /// When this token was stored (Unix timestamp)
    stored_at: u64,
    /// Token validity duration in seconds
    valid_for_seconds: u64,
}

impl CredentialStore {
    /// Create an empty store that will be saved at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            tokens: HashMap::new(),
            path: path.into(),
        }
    }

    /// Load the store from `path`, empty if the file doesn't exist yet
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let mut store: CredentialStore = serde_json::from_str(&contents).map_err(|e| {
                crate::Error::ConfigError(format!("Failed to parse credential store: {}", e))
            })?;
            store.path = path.to_path_buf();
            Ok(store)
        } else {
            Ok(Self::new(path))
        }
    }

    pub fn save(&self) -> crate::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store a token with expiration
    pub fn set_token(&mut self, host: &str, token: &str, valid_for_days: u64) {
        let encrypted = self.encrypt(token);

        self.tokens.insert(
            host.to_string(),
            StoredToken {
                encrypted_value: encrypted,
                stored_at: now_secs(),
                valid_for_seconds: valid_for_days * 24 * 60 * 60,
            },
        );
    }

    /// Get a token if it exists and hasn't expired
    pub fn get_token(&self, host: &str) -> Option<String> {
        let stored = self.tokens.get(host)?;

        if now_secs().saturating_sub(stored.stored_at) >= stored.valid_for_seconds {
            return None;
        }

        Some(self.decrypt(&stored.encrypted_value))
    }

    pub fn has_valid_token(&self, host: &str) -> bool {
        self.get_token(host).is_some()
    }

    pub fn remove_token(&mut self, host: &str) -> bool {
        self.tokens.remove(host).is_some()
    }

    fn encrypt(&self, data: &str) -> Vec<u8> {
        let key = machine_key();
        data.bytes()
            .enumerate()
            .map(|(i, b)| b ^ key[i % key.len()])
            .collect()
    }

    fn decrypt(&self, data: &[u8]) -> String {
        let key = machine_key();
        let decrypted: Vec<u8> = data
            .iter()
            .enumerate()
            .map(|(i, &b)| b ^ key[i % key.len()])
            .collect();
        String::from_utf8_lossy(&decrypted).to_string()
    }
}

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// 32-byte key seeded from hostname + username
fn machine_key() -> Vec<u8> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let hostname = hostname::get()
        .unwrap_or_else(|_| std::ffi::OsString::from("unknown"))
        .to_string_lossy()
        .to_string();

    let username = whoami::username();
    let seed = format!("medalert-{}-{}", hostname, username);

    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    let hash = hasher.finish();

    let mut key = Vec::with_capacity(32);
    let mut val = hash;
    for _ in 0..4 {
        key.extend_from_slice(&val.to_le_bytes());
        val = val.wrapping_mul(1103515245).wrapping_add(12345);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "sap.protofylabs.web.id";

    #[test]
    fn test_token_obfuscation() {
        let store = CredentialStore::new("unused.json");
        let original = "eyJhbGciOiJIUzI1NiJ9.payload.sig";

        let encrypted = store.encrypt(original);
        assert_ne!(encrypted, original.as_bytes());
        assert_eq!(store.decrypt(&encrypted), original);
    }

    #[test]
    fn test_token_storage() {
        let mut store = CredentialStore::new("unused.json");

        store.set_token(HOST, "jwt-token", DEFAULT_TOKEN_VALIDITY_DAYS);
        assert!(store.has_valid_token(HOST));
        assert_eq!(store.get_token(HOST), Some("jwt-token".to_string()));
        assert_eq!(store.get_token("other.host"), None);
    }

    #[test]
    fn test_zero_validity_expires_immediately() {
        let mut store = CredentialStore::new("unused.json");
        store.set_token(HOST, "jwt", 0);
        assert!(!store.has_valid_token(HOST));
    }

    #[test]
    fn test_token_removal() {
        let mut store = CredentialStore::new("unused.json");
        store.set_token(HOST, "jwt", 30);

        assert!(store.remove_token(HOST));
        assert!(!store.has_valid_token(HOST));
        assert!(!store.remove_token(HOST));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medalert").join("credentials.json");

        let mut store = CredentialStore::load(&path).unwrap();
        store.set_token(HOST, "persisted-jwt", 30);
        store.save().unwrap();

        let reloaded = CredentialStore::load(&path).unwrap();
        assert_eq!(reloaded.get_token(HOST), Some("persisted-jwt".to_string()));
        assert_eq!(reloaded.path(), path.as_path());

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("persisted-jwt"));
    }
}
