// riskgate/src/alerts.rs
//
// Threshold alerts with per-(actor, kind) wall-clock cool-down. Rules are a
// default set per actor until overridden. Dispatch is best-effort: email
// goes through an injected sink, webhooks POST JSON with a 10-second
// timeout, and failures never propagate to the request path.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::events::{AlertChannel, AlertEvent, AlertKind, AlertRule, EscalationLevel, RiskLogRecord};
use crate::store::RecordStore;

const WEBHOOK_TIMEOUT_SECS: u64 = 10;
const ANOMALY_SPIKE_FACTOR: f64 = 2.0;

// ── Email sink ────────────────────────────────────────────────────────────────

/// Email delivery seam. The daemon installs a tracing-backed sink; the outer
/// service wires a real provider.
pub trait EmailSink: Send + Sync {
    fn send(&self, to: &str, event: &AlertEvent);
}

pub struct LogEmailSink;

impl EmailSink for LogEmailSink {
    fn send(&self, to: &str, event: &AlertEvent) {
        info!(to, kind = %event.kind, severity = ?event.severity, "email alert: {}", event.message);
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

pub struct AlertEngine {
    rules:   DashMap<String, Vec<AlertRule>>,
    history: DashMap<(String, AlertKind), DateTime<Utc>>,
    email:   Arc<dyn EmailSink>,
    http:    reqwest::Client,
    default_webhook: String,
}

impl AlertEngine {
    pub fn new(default_webhook: impl Into<String>, email: Arc<dyn EmailSink>) -> Self {
        Self {
            rules: DashMap::new(),
            history: DashMap::new(),
            email,
            http: reqwest::Client::new(),
            default_webhook: default_webhook.into(),
        }
    }

    /// Default rule set applied to any actor without overrides.
    pub fn default_rules(&self) -> Vec<AlertRule> {
        vec![
            AlertRule {
                kind: AlertKind::HighRisk,
                threshold: 7.0,
                channel: AlertChannel::Email,
                target: "admin@example.com".into(),
                cooldown_minutes: 60,
                active: true,
            },
            AlertRule {
                kind: AlertKind::Blocked,
                threshold: 1.0,
                channel: AlertChannel::Webhook,
                target: self.default_webhook.clone(),
                cooldown_minutes: 30,
                active: true,
            },
            AlertRule {
                kind: AlertKind::UsageLimit,
                threshold: 90.0,
                channel: AlertChannel::Email,
                target: "admin@example.com".into(),
                cooldown_minutes: 360,
                active: true,
            },
            AlertRule {
                kind: AlertKind::Anomaly,
                threshold: ANOMALY_SPIKE_FACTOR,
                channel: AlertChannel::Both,
                target: "admin@example.com".into(),
                cooldown_minutes: 720,
                active: true,
            },
        ]
    }

    pub fn set_rules(&self, actor_id: &str, rules: Vec<AlertRule>) {
        self.rules.insert(actor_id.to_string(), rules);
    }

    fn rules_for(&self, actor_id: &str) -> Vec<AlertRule> {
        self.rules
            .get(actor_id)
            .map(|r| r.clone())
            .unwrap_or_else(|| self.default_rules())
    }

    /// Cool-down gate. The entry lock makes the check-and-stamp atomic per
    /// (actor, kind) key; at most one caller wins a given window.
    fn should_dispatch(&self, actor_id: &str, kind: AlertKind, cooldown_minutes: i64, now: DateTime<Utc>) -> bool {
        let key = (actor_id.to_string(), kind);
        match self.history.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                if now - *slot.get() < Duration::minutes(cooldown_minutes) {
                    false
                } else {
                    slot.insert(now);
                    true
                }
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    // ── Triggers ──────────────────────────────────────────────────────────────

    pub async fn process_risk_alert(
        &self,
        actor_id: &str,
        risk_score: f64,
        risk_log: &RiskLogRecord,
    ) -> Vec<AlertEvent> {
        self.process_risk_alert_at(actor_id, risk_score, risk_log, Utc::now()).await
    }

    pub async fn process_risk_alert_at(
        &self,
        actor_id: &str,
        risk_score: f64,
        risk_log: &RiskLogRecord,
        now: DateTime<Utc>,
    ) -> Vec<AlertEvent> {
        let mut dispatched = Vec::new();

        for rule in self.rules_for(actor_id) {
            if !rule.active {
                continue;
            }
            let event = match rule.kind {
                AlertKind::HighRisk if risk_score >= rule.threshold => AlertEvent {
                    kind: AlertKind::HighRisk,
                    actor_id: actor_id.to_string(),
                    severity: severity_from_score(risk_score),
                    message: format!("High risk detected: {risk_score:.2}/10"),
                    details: HashMap::from([
                        ("risk_score".to_string(), json!(risk_score)),
                        ("request_id".to_string(), json!(risk_log.request_id)),
                        ("risks_detected".to_string(), json!(risk_log.risks_detected)),
                        ("llm_provider".to_string(), json!(risk_log.llm_provider)),
                    ]),
                    at: now,
                    threshold: rule.threshold,
                    actual: risk_score,
                },
                AlertKind::Blocked if risk_log.blocked => AlertEvent {
                    kind: AlertKind::Blocked,
                    actor_id: actor_id.to_string(),
                    severity: EscalationLevel::Medium,
                    message: "Request blocked due to high risk content".into(),
                    details: HashMap::from([
                        ("risk_score".to_string(), json!(risk_score)),
                        ("request_id".to_string(), json!(risk_log.request_id)),
                    ]),
                    at: now,
                    threshold: rule.threshold,
                    actual: 1.0,
                },
                _ => continue,
            };

            if self.should_dispatch(actor_id, rule.kind, rule.cooldown_minutes, now) {
                self.dispatch(&event, &rule).await;
                dispatched.push(event);
            }
        }
        dispatched
    }

    pub async fn process_usage_alert(
        &self,
        actor_id: &str,
        key_id: &str,
        usage: u64,
        limit: Option<u64>,
    ) -> Vec<AlertEvent> {
        self.process_usage_alert_at(actor_id, key_id, usage, limit, Utc::now()).await
    }

    pub async fn process_usage_alert_at(
        &self,
        actor_id: &str,
        key_id: &str,
        usage: u64,
        limit: Option<u64>,
        now: DateTime<Utc>,
    ) -> Vec<AlertEvent> {
        let Some(limit) = limit.filter(|l| *l > 0) else {
            return Vec::new();
        };
        let pct = usage as f64 / limit as f64 * 100.0;
        let mut dispatched = Vec::new();

        for rule in self.rules_for(actor_id) {
            if rule.kind != AlertKind::UsageLimit || !rule.active || pct < rule.threshold {
                continue;
            }
            let event = AlertEvent {
                kind: AlertKind::UsageLimit,
                actor_id: actor_id.to_string(),
                severity: if pct < 95.0 { EscalationLevel::Medium } else { EscalationLevel::High },
                message: format!("API key usage at {pct:.1}%"),
                details: HashMap::from([
                    ("api_key_id".to_string(), json!(key_id)),
                    ("current_usage".to_string(), json!(usage)),
                    ("usage_limit".to_string(), json!(limit)),
                ]),
                at: now,
                threshold: rule.threshold,
                actual: pct,
            };
            if self.should_dispatch(actor_id, rule.kind, rule.cooldown_minutes, now) {
                self.dispatch(&event, &rule).await;
                dispatched.push(event);
            }
        }
        dispatched
    }

    /// Recent day's average risk at twice the 30-day average flags an
    /// anomaly. A fresh actor (no history) never trips this.
    pub async fn check_anomalies(&self, actor_id: &str, store: &dyn RecordStore) -> Vec<AlertEvent> {
        self.check_anomalies_at(actor_id, store, Utc::now()).await
    }

    pub async fn check_anomalies_at(
        &self,
        actor_id: &str,
        store: &dyn RecordStore,
        now: DateTime<Utc>,
    ) -> Vec<AlertEvent> {
        let recent = store.get_risk_statistics(actor_id, 1);
        let historical = store.get_risk_statistics(actor_id, 30);
        if historical.avg_risk_score <= 0.0
            || recent.avg_risk_score < historical.avg_risk_score * ANOMALY_SPIKE_FACTOR
        {
            return Vec::new();
        }
        let spike = recent.avg_risk_score / historical.avg_risk_score;

        let mut dispatched = Vec::new();
        for rule in self.rules_for(actor_id) {
            if rule.kind != AlertKind::Anomaly || !rule.active {
                continue;
            }
            let event = AlertEvent {
                kind: AlertKind::Anomaly,
                actor_id: actor_id.to_string(),
                severity: EscalationLevel::Medium,
                message: "Anomalous risk spike detected".into(),
                details: HashMap::from([
                    ("recent_avg_risk".to_string(), json!(recent.avg_risk_score)),
                    ("historical_avg_risk".to_string(), json!(historical.avg_risk_score)),
                    ("spike_multiplier".to_string(), json!(spike)),
                ]),
                at: now,
                threshold: rule.threshold,
                actual: spike,
            };
            if self.should_dispatch(actor_id, rule.kind, rule.cooldown_minutes, now) {
                self.dispatch(&event, &rule).await;
                dispatched.push(event);
            }
        }
        dispatched
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    async fn dispatch(&self, event: &AlertEvent, rule: &AlertRule) {
        if rule.target.is_empty() {
            warn!(kind = %event.kind, "no notification target configured, alert not dispatched");
            return;
        }
        if matches!(rule.channel, AlertChannel::Email | AlertChannel::Both) {
            self.email.send(&rule.target, event);
        }
        if matches!(rule.channel, AlertChannel::Webhook | AlertChannel::Both) {
            self.send_webhook(&rule.target, event).await;
        }
    }

    async fn send_webhook(&self, url: &str, event: &AlertEvent) {
        let result = self
            .http
            .post(url)
            .timeout(std::time::Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .json(event)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                info!(url, status = %resp.status(), "webhook alert sent");
            }
            Ok(resp) => warn!(url, status = %resp.status(), "webhook alert rejected"),
            Err(e) => warn!(url, "webhook alert failed: {e}"),
        }
    }
}

fn severity_from_score(score: f64) -> EscalationLevel {
    if score >= 9.0 {
        EscalationLevel::Critical
    } else if score >= 7.0 {
        EscalationLevel::High
    } else if score >= 5.0 {
        EscalationLevel::Medium
    } else {
        EscalationLevel::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RiskLevel;
    use crate::store::MemoryRecordStore;

    fn engine() -> AlertEngine {
        AlertEngine::new("", Arc::new(LogEmailSink))
    }

    fn risk_log(request: &str, blocked: bool) -> RiskLogRecord {
        RiskLogRecord {
            user_id: "actor-a".into(),
            request_id: request.into(),
            risk_score: 8.0,
            risk_level: RiskLevel::High,
            risks_detected: vec!["pii".into()],
            input_sanitized: true,
            output_sanitized: false,
            blocked,
            llm_provider: Some("openai".into()),
            processing_ms: 3.0,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn cooldown_suppresses_second_alert_in_window() {
        let e = engine();
        let t0 = Utc::now();
        let log = risk_log("r1", false);

        let first = e.process_risk_alert_at("actor-a", 7.5, &log, t0).await;
        assert_eq!(first.len(), 1);

        let second = e.process_risk_alert_at("actor-a", 8.1, &log, t0 + Duration::minutes(5)).await;
        assert!(second.is_empty());

        let third = e.process_risk_alert_at("actor-a", 9.0, &log, t0 + Duration::minutes(70)).await;
        assert_eq!(third.len(), 1);
    }

    #[tokio::test]
    async fn cooldown_is_per_actor_and_kind() {
        let e = engine();
        let t0 = Utc::now();
        let log = risk_log("r1", false);
        assert_eq!(e.process_risk_alert_at("actor-a", 7.5, &log, t0).await.len(), 1);
        assert_eq!(e.process_risk_alert_at("actor-b", 7.5, &log, t0).await.len(), 1);
    }

    #[tokio::test]
    async fn below_threshold_never_alerts() {
        let e = engine();
        let log = risk_log("r1", false);
        assert!(e.process_risk_alert_at("actor-a", 6.9, &log, Utc::now()).await.is_empty());
    }

    #[tokio::test]
    async fn empty_webhook_target_is_skipped_not_fatal() {
        // Blocked rule targets the default webhook, which is empty here.
        let e = engine();
        let log = risk_log("r1", true);
        let events = e.process_risk_alert_at("actor-a", 8.0, &log, Utc::now()).await;
        // HighRisk (email) and Blocked (webhook, empty target) both pass the
        // trigger; the Blocked dispatch is a warn-and-skip but still counts
        // as consumed for cool-down purposes.
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn usage_alert_fires_at_ninety_percent() {
        let e = engine();
        let t = Utc::now();
        assert!(e.process_usage_alert_at("actor-a", "k1", 89, Some(100), t).await.is_empty());
        let events = e.process_usage_alert_at("actor-a", "k1", 95, Some(100), t).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, EscalationLevel::High);
    }

    #[tokio::test]
    async fn usage_alert_without_limit_is_noop() {
        let e = engine();
        assert!(e.process_usage_alert_at("actor-a", "k1", 10_000, None, Utc::now()).await.is_empty());
    }

    #[tokio::test]
    async fn anomaly_requires_history() {
        let e = engine();
        let store = MemoryRecordStore::new();
        // No logs at all: no anomaly.
        assert!(e.check_anomalies_at("actor-a", &store, Utc::now()).await.is_empty());
    }

    #[tokio::test]
    async fn severity_bands_from_score() {
        assert_eq!(severity_from_score(9.5), EscalationLevel::Critical);
        assert_eq!(severity_from_score(7.5), EscalationLevel::High);
        assert_eq!(severity_from_score(5.5), EscalationLevel::Medium);
        assert_eq!(severity_from_score(2.0), EscalationLevel::Low);
    }

    #[tokio::test]
    async fn custom_rules_override_defaults() {
        let e = engine();
        e.set_rules(
            "actor-a",
            vec![AlertRule {
                kind: AlertKind::HighRisk,
                threshold: 3.0,
                channel: AlertChannel::Email,
                target: "ops@example.com".into(),
                cooldown_minutes: 1,
                active: true,
            }],
        );
        let log = risk_log("r1", false);
        let events = e.process_risk_alert_at("actor-a", 3.5, &log, Utc::now()).await;
        assert_eq!(events.len(), 1);
    }
}
