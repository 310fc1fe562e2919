// riskgate/src/store.rs
//
// Record store seam: users, API keys, risk logs, settings. The core only
// depends on the trait; the in-memory implementation backs tests and the
// standalone daemon. Risk logs are append-only and idempotent per
// (user_id, request_id); key usage increments atomically against the limit.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::GatewayError;
use crate::events::RiskLogRecord;

// ── Records ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id:              String,
    pub email:           String,
    pub full_name:       Option<String>,
    pub hashed_password: String,
    pub is_active:       bool,
    pub created_at:      DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id:           String,
    pub user_id:      String,
    pub key_hash:     String,
    pub name:         String,
    pub usage_count:  u64,
    pub usage_limit:  Option<u64>,
    pub is_active:    bool,
    pub created_at:   DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskStatistics {
    pub total_requests:  u64,
    pub avg_risk_score:  f64,
    pub blocked_count:   u64,
    pub sanitized_count: u64,
}

/// SHA-256 of the presented key material; keys are only ever stored hashed.
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Mint fresh key material: prefix + base64url of `len` random bytes. The
/// plaintext is shown once to the caller; only its hash is persisted.
pub fn generate_api_key(prefix: &str, len: usize) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use rand::RngCore;

    let mut material = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut material);
    format!("{prefix}{}", URL_SAFE_NO_PAD.encode(material))
}

// ── Trait ─────────────────────────────────────────────────────────────────────

pub trait RecordStore: Send + Sync {
    fn create_user(&self, user: UserRecord) -> Result<(), GatewayError>;
    fn get_user_by_email(&self, email: &str) -> Option<UserRecord>;
    fn get_user_by_id(&self, id: &str) -> Option<UserRecord>;
    fn update_user(&self, user: UserRecord) -> bool;

    fn create_api_key(&self, key: ApiKeyRecord) -> Result<(), GatewayError>;
    fn get_api_key_by_hash(&self, key_hash: &str) -> Option<ApiKeyRecord>;
    fn list_keys_by_user(&self, user_id: &str) -> Vec<ApiKeyRecord>;
    /// Atomic read-increment-check against the stored limit. Returns the new
    /// usage count, or UsageLimit when the key is already at its limit.
    fn increment_key_usage(&self, key_id: &str) -> Result<u64, GatewayError>;
    fn update_key(&self, key: ApiKeyRecord) -> bool;
    fn soft_delete_key(&self, key_id: &str) -> bool;

    /// Idempotent by (user_id, request_id): replays do not duplicate rows.
    /// Returns true when a row was actually inserted.
    fn create_risk_log(&self, record: RiskLogRecord) -> bool;
    fn list_risk_logs(&self, user_id: &str, limit: usize, offset: usize) -> Vec<RiskLogRecord>;
    fn get_risk_statistics(&self, user_id: &str, days: i64) -> RiskStatistics;

    fn get_user_settings(&self, user_id: &str) -> Option<serde_json::Value>;
    fn upsert_user_settings(&self, user_id: &str, settings: serde_json::Value);
}

// ── In-memory implementation ──────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryRecordStore {
    users:     DashMap<String, UserRecord>,
    keys:      DashMap<String, ApiKeyRecord>,
    risk_logs: DashMap<String, Vec<RiskLogRecord>>,
    seen_logs: DashMap<(String, String), ()>,
    settings:  DashMap<String, serde_json::Value>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn create_user(&self, user: UserRecord) -> Result<(), GatewayError> {
        if self.users.iter().any(|u| u.email == user.email) {
            return Err(GatewayError::Validation(format!("email {} already registered", user.email)));
        }
        self.users.insert(user.id.clone(), user);
        Ok(())
    }

    fn get_user_by_email(&self, email: &str) -> Option<UserRecord> {
        self.users.iter().find(|u| u.email == email).map(|u| u.clone())
    }

    fn get_user_by_id(&self, id: &str) -> Option<UserRecord> {
        self.users.get(id).map(|u| u.clone())
    }

    fn update_user(&self, user: UserRecord) -> bool {
        self.users.insert(user.id.clone(), user).is_some()
    }

    fn create_api_key(&self, key: ApiKeyRecord) -> Result<(), GatewayError> {
        self.keys.insert(key.id.clone(), key);
        Ok(())
    }

    fn get_api_key_by_hash(&self, key_hash: &str) -> Option<ApiKeyRecord> {
        self.keys.iter().find(|k| k.key_hash == key_hash).map(|k| k.clone())
    }

    fn list_keys_by_user(&self, user_id: &str) -> Vec<ApiKeyRecord> {
        self.keys.iter().filter(|k| k.user_id == user_id).map(|k| k.clone()).collect()
    }

    fn increment_key_usage(&self, key_id: &str) -> Result<u64, GatewayError> {
        let mut key = self
            .keys
            .get_mut(key_id)
            .ok_or_else(|| GatewayError::Auth(format!("unknown api key {key_id}")))?;
        if !key.is_active {
            return Err(GatewayError::Auth("api key revoked".into()));
        }
        if let Some(limit) = key.usage_limit {
            if key.usage_count >= limit {
                return Err(GatewayError::UsageLimit { used: key.usage_count, limit });
            }
        }
        key.usage_count += 1;
        key.last_used_at = Some(Utc::now());
        Ok(key.usage_count)
    }

    fn update_key(&self, key: ApiKeyRecord) -> bool {
        self.keys.insert(key.id.clone(), key).is_some()
    }

    fn soft_delete_key(&self, key_id: &str) -> bool {
        match self.keys.get_mut(key_id) {
            Some(mut key) => {
                key.is_active = false;
                true
            }
            None => false,
        }
    }

    fn create_risk_log(&self, record: RiskLogRecord) -> bool {
        let dedup_key = (record.user_id.clone(), record.request_id.clone());
        // Entry lock makes the seen-check and insert atomic per key.
        match self.seen_logs.entry(dedup_key) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                self.risk_logs.entry(record.user_id.clone()).or_default().push(record);
                true
            }
        }
    }

    fn list_risk_logs(&self, user_id: &str, limit: usize, offset: usize) -> Vec<RiskLogRecord> {
        self.risk_logs
            .get(user_id)
            .map(|logs| logs.iter().rev().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default()
    }

    fn get_risk_statistics(&self, user_id: &str, days: i64) -> RiskStatistics {
        let cutoff = Utc::now() - Duration::days(days);
        let Some(logs) = self.risk_logs.get(user_id) else {
            return RiskStatistics::default();
        };
        let recent: Vec<&RiskLogRecord> = logs.iter().filter(|l| l.created_at >= cutoff).collect();
        if recent.is_empty() {
            return RiskStatistics::default();
        }
        RiskStatistics {
            total_requests: recent.len() as u64,
            avg_risk_score: recent.iter().map(|l| l.risk_score).sum::<f64>() / recent.len() as f64,
            blocked_count: recent.iter().filter(|l| l.blocked).count() as u64,
            sanitized_count: recent
                .iter()
                .filter(|l| l.input_sanitized || l.output_sanitized)
                .count() as u64,
        }
    }

    fn get_user_settings(&self, user_id: &str) -> Option<serde_json::Value> {
        self.settings.get(user_id).map(|s| s.clone())
    }

    fn upsert_user_settings(&self, user_id: &str, settings: serde_json::Value) {
        self.settings.insert(user_id.to_string(), settings);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RiskLevel;

    fn log(user: &str, request: &str, score: f64) -> RiskLogRecord {
        RiskLogRecord {
            user_id: user.into(),
            request_id: request.into(),
            risk_score: score,
            risk_level: RiskLevel::Low,
            risks_detected: vec![],
            input_sanitized: false,
            output_sanitized: false,
            blocked: false,
            llm_provider: None,
            processing_ms: 1.0,
            created_at: Utc::now(),
        }
    }

    fn key(id: &str, limit: Option<u64>) -> ApiKeyRecord {
        ApiKeyRecord {
            id: id.into(),
            user_id: "u1".into(),
            key_hash: hash_api_key(id),
            name: "test".into(),
            usage_count: 0,
            usage_limit: limit,
            is_active: true,
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    #[test]
    fn risk_log_is_idempotent_per_request_id() {
        let store = MemoryRecordStore::new();
        assert!(store.create_risk_log(log("u1", "req-1", 3.0)));
        assert!(!store.create_risk_log(log("u1", "req-1", 9.0)));
        assert!(store.create_risk_log(log("u1", "req-2", 3.0)));
        assert_eq!(store.list_risk_logs("u1", 10, 0).len(), 2);
    }

    #[test]
    fn same_request_id_for_different_users_both_insert() {
        let store = MemoryRecordStore::new();
        assert!(store.create_risk_log(log("u1", "req-1", 3.0)));
        assert!(store.create_risk_log(log("u2", "req-1", 3.0)));
    }

    #[test]
    fn key_usage_increments_until_limit() {
        let store = MemoryRecordStore::new();
        store.create_api_key(key("k1", Some(2))).unwrap();
        assert_eq!(store.increment_key_usage("k1").unwrap(), 1);
        assert_eq!(store.increment_key_usage("k1").unwrap(), 2);
        match store.increment_key_usage("k1") {
            Err(GatewayError::UsageLimit { used, limit }) => {
                assert_eq!((used, limit), (2, 2));
            }
            other => panic!("expected usage limit error, got {other:?}"),
        }
    }

    #[test]
    fn unlimited_key_never_hits_limit() {
        let store = MemoryRecordStore::new();
        store.create_api_key(key("k1", None)).unwrap();
        for _ in 0..100 {
            store.increment_key_usage("k1").unwrap();
        }
    }

    #[test]
    fn soft_deleted_key_rejects_usage() {
        let store = MemoryRecordStore::new();
        store.create_api_key(key("k1", None)).unwrap();
        assert!(store.soft_delete_key("k1"));
        assert!(matches!(store.increment_key_usage("k1"), Err(GatewayError::Auth(_))));
    }

    #[test]
    fn statistics_average_over_window() {
        let store = MemoryRecordStore::new();
        store.create_risk_log(log("u1", "r1", 2.0));
        store.create_risk_log(log("u1", "r2", 4.0));
        let stats = store.get_risk_statistics("u1", 30);
        assert_eq!(stats.total_requests, 2);
        assert!((stats.avg_risk_score - 3.0).abs() < 1e-9);
    }

    #[test]
    fn generated_keys_carry_prefix_and_unique_material() {
        let a = generate_api_key("rsk_", 32);
        let b = generate_api_key("rsk_", 32);
        assert!(a.starts_with("rsk_"));
        assert_ne!(a, b);
        // 32 bytes base64url without padding is 43 characters.
        assert_eq!(a.len(), 4 + 43);
        assert_eq!(hash_api_key(&a).len(), 64);
    }

    #[test]
    fn duplicate_email_rejected() {
        let store = MemoryRecordStore::new();
        let user = UserRecord {
            id: "u1".into(),
            email: "a@b.com".into(),
            full_name: None,
            hashed_password: "h".into(),
            is_active: true,
            created_at: Utc::now(),
        };
        store.create_user(user.clone()).unwrap();
        let mut dup = user;
        dup.id = "u2".into();
        assert!(store.create_user(dup).is_err());
    }
}
