// riskgate/src/vault/mod.rs
//
// Reversible token vault: stores encrypted originals keyed by their
// human-readable masked value. Rows live in sharded maps for the request
// path and are persisted as append-only JSONL (last row per token id wins
// on replay). Expiry is lazy on access and eager in sweep_expired; both
// compare expires_at against the same clock value.

pub mod crypto;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::events::{PiiKind, TokenAccessLog, TokenMapping, TokenOp, TokenStatus};
use crate::sanitizer;

const TOKENS_FILE: &str = "tokens.jsonl";
const ACCESS_LOG_FILE: &str = "access_log.jsonl";

#[derive(Debug, Clone, serde::Serialize)]
pub struct VaultStats {
    pub total_tokens:     usize,
    pub tokens_by_kind:   HashMap<String, usize>,
    pub tokens_by_status: HashMap<String, usize>,
    pub total_accesses:   u64,
    pub accesses_24h:     usize,
}

pub struct TokenVault {
    master_key: String,
    tokens:     DashMap<Uuid, TokenMapping>,
    /// masked value → token ids in insertion order. A colliding mask
    /// resolves to the earliest stored row.
    masked_idx: DashMap<String, Vec<Uuid>>,
    data_dir:   Option<PathBuf>,
    total_accesses: AtomicU64,
    recent_accesses: Mutex<VecDeque<DateTime<Utc>>>,
}

impl TokenVault {
    pub fn in_memory(master_key: impl Into<String>) -> Self {
        Self {
            master_key: master_key.into(),
            tokens: DashMap::new(),
            masked_idx: DashMap::new(),
            data_dir: None,
            total_accesses: AtomicU64::new(0),
            recent_accesses: Mutex::new(VecDeque::new()),
        }
    }

    /// Open a file-backed vault, replaying any existing row log.
    pub async fn open(dir: impl Into<PathBuf>, master_key: impl Into<String>) -> Result<Self, GatewayError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| GatewayError::Vault(format!("create vault dir: {e}")))?;

        let vault = Self { data_dir: Some(dir.clone()), ..Self::in_memory(master_key) };

        let path = dir.join(TOKENS_FILE);
        if let Ok(content) = tokio::fs::read_to_string(&path).await {
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                match serde_json::from_str::<TokenMapping>(line) {
                    Ok(row) => vault.index_row(row),
                    Err(e) => warn!("skipping corrupt vault row: {e}"),
                }
            }
            debug!("vault replayed {} tokens", vault.tokens.len());
        }
        Ok(vault)
    }

    fn index_row(&self, row: TokenMapping) {
        let id = row.token_id;
        let masked = row.masked_value.clone();
        let fresh = self.tokens.insert(id, row).is_none();
        if fresh {
            self.masked_idx.entry(masked).or_default().push(id);
        }
    }

    // ── Store ─────────────────────────────────────────────────────────────────

    pub async fn store(
        &self,
        original: &str,
        kind: PiiKind,
        ttl: Duration,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<String, GatewayError> {
        self.store_at(original, kind, ttl, metadata, Utc::now()).await
    }

    pub async fn store_at(
        &self,
        original: &str,
        kind: PiiKind,
        ttl: Duration,
        metadata: Option<HashMap<String, serde_json::Value>>,
        now: DateTime<Utc>,
    ) -> Result<String, GatewayError> {
        let salt = crypto::generate_salt();
        let row = TokenMapping {
            token_id:           Uuid::new_v4(),
            hashed_original:    crypto::hash_original(original, &salt),
            masked_value:       sanitizer::partial_mask(original, kind),
            kind,
            status:             TokenStatus::Active,
            created_at:         now,
            expires_at:         now + ttl,
            access_count:       0,
            last_accessed_at:   None,
            encrypted_original: crypto::encrypt(&self.master_key, &salt, original)?,
            salt,
            metadata:           metadata.unwrap_or_default(),
        };
        let masked = row.masked_value.clone();
        let token_id = row.token_id;

        // The row is durably appended before it becomes visible to lookups.
        self.persist_row(&row).await?;
        self.index_row(row);
        self.log_access(Some(token_id), TokenOp::Store, true, now).await;
        Ok(masked)
    }

    // ── Lookup helpers ────────────────────────────────────────────────────────

    /// First stored row for a masked value, optionally restricted by kind.
    fn first_row(&self, masked: &str, kind: Option<PiiKind>) -> Option<Uuid> {
        let ids = self.masked_idx.get(masked)?;
        ids.iter()
            .find(|id| match (kind, self.tokens.get(id)) {
                (Some(k), Some(row)) => row.kind == k,
                (None, Some(_)) => true,
                _ => false,
            })
            .copied()
    }

    /// Lazy-expiry check; transitions an overdue Active row. Returns the
    /// row's usable status.
    fn check_usable(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), &'static str> {
        let mut row = self.tokens.get_mut(&id).ok_or("missing")?;
        if row.expires_at < now {
            if row.status == TokenStatus::Active {
                row.status = TokenStatus::Expired;
            }
            return Err("expired");
        }
        match row.status {
            TokenStatus::Active => Ok(()),
            TokenStatus::Revoked => Err("revoked"),
            TokenStatus::Expired => Err("expired"),
            TokenStatus::Archived => Err("archived"),
        }
    }

    // ── Retrieve / validate / revoke ──────────────────────────────────────────

    pub async fn retrieve(&self, masked: &str, kind: Option<PiiKind>) -> Option<String> {
        self.retrieve_at(masked, kind, Utc::now()).await
    }

    pub async fn retrieve_at(
        &self,
        masked: &str,
        kind: Option<PiiKind>,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let Some(id) = self.first_row(masked, kind) else {
            self.log_access(None, TokenOp::Retrieve, false, now).await;
            return None;
        };

        if let Err(reason) = self.check_usable(id, now) {
            debug!(%id, reason, "token retrieve refused");
            self.persist_current(id).await;
            self.log_access(Some(id), TokenOp::Retrieve, false, now).await;
            return None;
        }

        // Decrypt, then bump the access bookkeeping under the row's entry
        // lock so count and timestamp move together.
        let original = {
            let mut row = self.tokens.get_mut(&id)?;
            match crypto::decrypt(&self.master_key, &row.salt, &row.encrypted_original) {
                Ok(v) => {
                    row.access_count += 1;
                    row.last_accessed_at = Some(now);
                    v
                }
                Err(e) => {
                    warn!(%id, "vault decryption failed: {e}");
                    drop(row);
                    self.log_access(Some(id), TokenOp::Retrieve, false, now).await;
                    return None;
                }
            }
        };

        self.persist_current(id).await;
        self.log_access(Some(id), TokenOp::Retrieve, true, now).await;
        Some(original)
    }

    pub async fn validate(&self, masked: &str, kind: Option<PiiKind>) -> bool {
        self.validate_at(masked, kind, Utc::now()).await
    }

    pub async fn validate_at(&self, masked: &str, kind: Option<PiiKind>, now: DateTime<Utc>) -> bool {
        let Some(id) = self.first_row(masked, kind) else {
            self.log_access(None, TokenOp::Validate, false, now).await;
            return false;
        };
        let usable = self.check_usable(id, now).is_ok();
        if !usable {
            self.persist_current(id).await;
        }
        self.log_access(Some(id), TokenOp::Validate, usable, now).await;
        usable
    }

    pub async fn revoke(&self, masked: &str) -> bool {
        let now = Utc::now();
        let Some(id) = self.first_row(masked, None) else {
            self.log_access(None, TokenOp::Revoke, false, now).await;
            return false;
        };
        if let Some(mut row) = self.tokens.get_mut(&id) {
            row.status = TokenStatus::Revoked;
        }
        self.persist_current(id).await;
        self.log_access(Some(id), TokenOp::Revoke, true, now).await;
        true
    }

    // ── Sweep & stats ─────────────────────────────────────────────────────────

    /// Bulk-transition overdue Active rows. Returns how many expired.
    pub async fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now()).await
    }

    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut expired = Vec::new();
        for mut entry in self.tokens.iter_mut() {
            if entry.status == TokenStatus::Active && entry.expires_at < now {
                entry.status = TokenStatus::Expired;
                expired.push(entry.token_id);
            }
        }
        for id in &expired {
            self.persist_current(*id).await;
        }
        if !expired.is_empty() {
            debug!("vault sweep expired {} tokens", expired.len());
        }
        expired.len()
    }

    pub fn statistics(&self) -> VaultStats {
        let mut by_kind: HashMap<String, usize> = HashMap::new();
        let mut by_status: HashMap<String, usize> = HashMap::new();
        for row in self.tokens.iter() {
            *by_kind.entry(row.kind.to_string()).or_default() += 1;
            let status = serde_json::to_value(row.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            *by_status.entry(status).or_default() += 1;
        }
        let cutoff = Utc::now() - Duration::hours(24);
        let accesses_24h = self.recent_accesses.lock().iter().filter(|t| **t >= cutoff).count();
        VaultStats {
            total_tokens: self.tokens.len(),
            tokens_by_kind: by_kind,
            tokens_by_status: by_status,
            total_accesses: self.total_accesses.load(Ordering::Relaxed),
            accesses_24h,
        }
    }

    pub fn token_info(&self, masked: &str) -> Option<TokenMapping> {
        let id = self.first_row(masked, None)?;
        self.tokens.get(&id).map(|r| r.clone())
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    async fn persist_row(&self, row: &TokenMapping) -> Result<(), GatewayError> {
        let Some(dir) = &self.data_dir else { return Ok(()) };
        let line = serde_json::to_string(row)
            .map_err(|e| GatewayError::Vault(format!("serialize row: {e}")))?;
        append_line(dir.join(TOKENS_FILE), &line)
            .await
            .map_err(|e| GatewayError::Vault(format!("persist row: {e}")))
    }

    /// Best-effort re-append of a row's current state after a mutation.
    async fn persist_current(&self, id: Uuid) {
        let Some(row) = self.tokens.get(&id).map(|r| r.clone()) else { return };
        if let Err(e) = self.persist_row(&row).await {
            warn!(%id, "vault persist failed: {e}");
        }
    }

    async fn log_access(&self, token_id: Option<Uuid>, op: TokenOp, success: bool, now: DateTime<Utc>) {
        self.total_accesses.fetch_add(1, Ordering::Relaxed);
        {
            let cutoff = now - Duration::hours(24);
            let mut recent = self.recent_accesses.lock();
            recent.push_back(now);
            while recent.front().map(|t| *t < cutoff).unwrap_or(false) {
                recent.pop_front();
            }
        }

        let Some(dir) = &self.data_dir else { return };
        let entry = TokenAccessLog {
            log_id: Uuid::new_v4(),
            token_id,
            at: now,
            op,
            success,
            actor: None,
            metadata: HashMap::new(),
        };
        if let Ok(line) = serde_json::to_string(&entry) {
            if let Err(e) = append_line(dir.join(ACCESS_LOG_FILE), &line).await {
                warn!("vault access log write failed: {e}");
            }
        }
    }
}

async fn append_line(path: PathBuf, line: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    Ok(())
}
