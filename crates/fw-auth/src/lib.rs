//! Component B: the token validator (spec §4.B).
//!
//! Opaque bearer tokens are issued as an access/refresh pair bound to a
//! `(device_id, api_key)` identity. Validation resolves an access token to a
//! device id; refresh atomically rotates the pair, invalidating the prior
//! refresh token (single-use). Revocation purges every outstanding token for
//! a device. The backing store is a key-value cache with per-key TTL —
//! Redis in production, an in-process map in tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("token expired")]
    TokenExpired,
    #[error("token revoked")]
    TokenRevoked,
    #[error("backing store unavailable: {0}")]
    StoreUnavailable(String),
}

const REVOKED_SENTINEL: &str = "\0REVOKED\0";

/// Minimal key-value contract the validator needs from its backing store.
/// Implemented for Redis in production and an in-memory map in tests.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), AuthError>;
    async fn get(&self, key: &str) -> Result<Option<String>, AuthError>;
    async fn del(&self, key: &str) -> Result<(), AuthError>;
    async fn sadd(&self, set_key: &str, member: &str) -> Result<(), AuthError>;
    async fn smembers(&self, set_key: &str) -> Result<Vec<String>, AuthError>;
    async fn del_set(&self, set_key: &str) -> Result<(), AuthError>;
}

/// The identity record the validator consults at issuance time. Device
/// onboarding/admin state lives outside this crate; callers supply a
/// [`DeviceDirectory`] implementation backed by whatever owns that state.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn lookup(&self, device_id: &str) -> Option<DeviceRecord>;
}

#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub api_key: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: i64,
    pub refresh_expires_at: i64,
}

pub struct TokenValidatorConfig {
    pub access_ttl_seconds: u64,
    pub refresh_ttl_seconds: u64,
}

impl Default for TokenValidatorConfig {
    fn default() -> Self {
        Self {
            access_ttl_seconds: 300,
            refresh_ttl_seconds: 86_400,
        }
    }
}

pub struct TokenValidator<S: TokenStore, D: DeviceDirectory> {
    store: S,
    directory: D,
    config: TokenValidatorConfig,
}

impl<S: TokenStore, D: DeviceDirectory> TokenValidator<S, D> {
    pub fn new(store: S, directory: D, config: TokenValidatorConfig) -> Self {
        Self {
            store,
            directory,
            config,
        }
    }

    pub async fn issue(&self, device_id: &str, api_key: &str) -> Result<TokenPair, AuthError> {
        let record = self
            .directory
            .lookup(device_id)
            .await
            .ok_or(AuthError::InvalidCredentials)?;
        if !record.enabled || record.api_key != api_key {
            return Err(AuthError::InvalidCredentials);
        }
        self.issue_unchecked(device_id).await
    }

    async fn issue_unchecked(&self, device_id: &str) -> Result<TokenPair, AuthError> {
        let access_token = random_token();
        let refresh_token = random_token();
        let now = now_epoch_seconds();

        let access_hash = hash_token(&access_token);
        let refresh_hash = hash_token(&refresh_token);

        self.store
            .set_ex(
                &access_key(&access_hash),
                device_id,
                self.config.access_ttl_seconds,
            )
            .await?;
        self.store
            .set_ex(
                &refresh_key(&refresh_hash),
                device_id,
                self.config.refresh_ttl_seconds,
            )
            .await?;
        self.store
            .sadd(&device_tokens_key(device_id), &access_key(&access_hash))
            .await?;
        self.store
            .sadd(&device_tokens_key(device_id), &refresh_key(&refresh_hash))
            .await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            access_expires_at: now + self.config.access_ttl_seconds as i64,
            refresh_expires_at: now + self.config.refresh_ttl_seconds as i64,
        })
    }

    /// `validate(access) -> device_id | nil` (spec §4.B).
    pub async fn validate(&self, access_token: &str) -> Result<String, AuthError> {
        let key = access_key(&hash_token(access_token));
        match self.store.get(&key).await? {
            None => Err(AuthError::TokenExpired),
            Some(v) if v == REVOKED_SENTINEL => Err(AuthError::TokenRevoked),
            Some(device_id) => Ok(device_id),
        }
    }

    /// Rotates the refresh token, invalidating the prior one (single-use).
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let key = refresh_key(&hash_token(refresh_token));
        let device_id = match self.store.get(&key).await? {
            None => return Err(AuthError::TokenExpired),
            Some(v) if v == REVOKED_SENTINEL => return Err(AuthError::TokenRevoked),
            Some(device_id) => device_id,
        };
        self.store.del(&key).await?;
        self.issue_unchecked(&device_id).await
    }

    /// Purges all outstanding access/refresh tokens for a device. Tokens are
    /// marked with a revocation sentinel (rather than deleted outright) so a
    /// subsequent lookup can distinguish `TokenRevoked` from `TokenExpired`.
    pub async fn revoke_device(&self, device_id: &str) -> Result<(), AuthError> {
        let set_key = device_tokens_key(device_id);
        let members = self.store.smembers(&set_key).await?;
        for member in members {
            self.store
                .set_ex(&member, REVOKED_SENTINEL, self.config.refresh_ttl_seconds)
                .await?;
        }
        self.store.del_set(&set_key).await?;
        Ok(())
    }
}

fn access_key(hash: &str) -> String {
    format!("token:access:{hash}")
}

fn refresh_key(hash: &str) -> String {
    format!("token:refresh:{hash}")
}

fn device_tokens_key(device_id: &str) -> String {
    format!("device:tokens:{device_id}")
}

fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(digest)
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_secs() as i64
}

/// Redis-backed [`TokenStore`], used in production services.
pub mod redis_store {
    use super::{AuthError, TokenStore};
    use async_trait::async_trait;
    use redis::aio::ConnectionManager;
    use redis::AsyncCommands;

    #[derive(Clone)]
    pub struct RedisTokenStore {
        conn: ConnectionManager,
    }

    impl RedisTokenStore {
        pub async fn connect(redis_url: &str) -> Result<Self, AuthError> {
            let client = redis::Client::open(redis_url)
                .map_err(|e| AuthError::StoreUnavailable(e.to_string()))?;
            let conn = client
                .get_connection_manager()
                .await
                .map_err(|e| AuthError::StoreUnavailable(e.to_string()))?;
            Ok(Self { conn })
        }
    }

    #[async_trait]
    impl TokenStore for RedisTokenStore {
        async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), AuthError> {
            let mut conn = self.conn.clone();
            conn.set_ex::<_, _, ()>(key, value, ttl_seconds)
                .await
                .map_err(|e| AuthError::StoreUnavailable(e.to_string()))
        }

        async fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
            let mut conn = self.conn.clone();
            conn.get(key)
                .await
                .map_err(|e| AuthError::StoreUnavailable(e.to_string()))
        }

        async fn del(&self, key: &str) -> Result<(), AuthError> {
            let mut conn = self.conn.clone();
            conn.del::<_, ()>(key)
                .await
                .map_err(|e| AuthError::StoreUnavailable(e.to_string()))
        }

        async fn sadd(&self, set_key: &str, member: &str) -> Result<(), AuthError> {
            let mut conn = self.conn.clone();
            conn.sadd::<_, _, ()>(set_key, member)
                .await
                .map_err(|e| AuthError::StoreUnavailable(e.to_string()))
        }

        async fn smembers(&self, set_key: &str) -> Result<Vec<String>, AuthError> {
            let mut conn = self.conn.clone();
            conn.smembers(set_key)
                .await
                .map_err(|e| AuthError::StoreUnavailable(e.to_string()))
        }

        async fn del_set(&self, set_key: &str) -> Result<(), AuthError> {
            self.del(set_key).await
        }
    }
}

/// In-process [`TokenStore`], used by tests and the single-binary dev build.
#[derive(Default)]
pub struct InMemoryTokenStore {
    entries: Mutex<HashMap<String, String>>,
    sets: Mutex<HashMap<String, Vec<String>>>,
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn set_ex(&self, key: &str, value: &str, _ttl_seconds: u64) -> Result<(), AuthError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn del(&self, key: &str) -> Result<(), AuthError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn sadd(&self, set_key: &str, member: &str) -> Result<(), AuthError> {
        self.sets
            .lock()
            .unwrap()
            .entry(set_key.to_string())
            .or_default()
            .push(member.to_string());
        Ok(())
    }

    async fn smembers(&self, set_key: &str) -> Result<Vec<String>, AuthError> {
        Ok(self
            .sets
            .lock()
            .unwrap()
            .get(set_key)
            .cloned()
            .unwrap_or_default())
    }

    async fn del_set(&self, set_key: &str) -> Result<(), AuthError> {
        self.sets.lock().unwrap().remove(set_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeDirectory(HashMap<String, DeviceRecord>);

    #[async_trait]
    impl DeviceDirectory for FakeDirectory {
        async fn lookup(&self, device_id: &str) -> Option<DeviceRecord> {
            self.0.get(device_id).cloned()
        }
    }

    fn validator() -> TokenValidator<InMemoryTokenStore, FakeDirectory> {
        let mut devices = HashMap::new();
        devices.insert(
            "device-1".to_string(),
            DeviceRecord {
                api_key: "secret".to_string(),
                enabled: true,
            },
        );
        devices.insert(
            "device-disabled".to_string(),
            DeviceRecord {
                api_key: "secret".to_string(),
                enabled: false,
            },
        );
        TokenValidator::new(
            InMemoryTokenStore::default(),
            FakeDirectory(devices),
            TokenValidatorConfig::default(),
        )
    }

    #[tokio::test]
    async fn issue_then_validate_resolves_device_id() {
        let v = validator();
        let pair = v.issue("device-1", "secret").await.unwrap();
        let device_id = v.validate(&pair.access_token).await.unwrap();
        assert_eq!(device_id, "device-1");
    }

    #[tokio::test]
    async fn issue_rejects_bad_api_key_or_disabled_device() {
        let v = validator();
        assert_eq!(
            v.issue("device-1", "wrong").await.unwrap_err(),
            AuthError::InvalidCredentials
        );
        assert_eq!(
            v.issue("device-disabled", "secret").await.unwrap_err(),
            AuthError::InvalidCredentials
        );
        assert_eq!(
            v.issue("no-such-device", "secret").await.unwrap_err(),
            AuthError::InvalidCredentials
        );
    }

    #[tokio::test]
    async fn validate_unknown_token_is_expired() {
        let v = validator();
        assert_eq!(
            v.validate("not-a-real-token").await.unwrap_err(),
            AuthError::TokenExpired
        );
    }

    #[tokio::test]
    async fn refresh_rotates_pair_and_invalidates_prior_refresh_token() {
        let v = validator();
        let pair = v.issue("device-1", "secret").await.unwrap();
        let rotated = v.refresh(&pair.refresh_token).await.unwrap();

        assert_ne!(rotated.access_token, pair.access_token);
        assert_ne!(rotated.refresh_token, pair.refresh_token);
        assert_eq!(
            v.validate(&rotated.access_token).await.unwrap(),
            "device-1"
        );

        // Single-use: replaying the original refresh token fails.
        assert_eq!(
            v.refresh(&pair.refresh_token).await.unwrap_err(),
            AuthError::TokenExpired
        );
    }

    #[tokio::test]
    async fn revoke_device_invalidates_access_and_refresh_pair() {
        let v = validator();
        let pair = v.issue("device-1", "secret").await.unwrap();
        v.revoke_device("device-1").await.unwrap();

        assert_eq!(
            v.validate(&pair.access_token).await.unwrap_err(),
            AuthError::TokenRevoked
        );
        assert_eq!(
            v.refresh(&pair.refresh_token).await.unwrap_err(),
            AuthError::TokenRevoked
        );
    }
}
