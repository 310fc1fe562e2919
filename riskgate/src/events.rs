// riskgate/src/events.rs
//
// Shared domain types flowing through the risk pipeline: detections, the
// aggregated assessment, sanitization records, vault rows, and alert events.
// Spans are half-open character (Unicode scalar) offsets into the exact text
// handed to the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ── Spans ─────────────────────────────────────────────────────────────────────

/// Half-open character span over the analyzed text.
/// Invariant: 0 <= start < end <= text.chars().count().
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub start:         usize,
    pub end:           usize,
    pub original_text: String,
}

impl TextSpan {
    pub fn overlaps(&self, other: &TextSpan) -> bool {
        self.start < other.end && self.end > other.start
    }
}

// ── Severity / risk tiers ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity { Low, Medium, High, Critical }

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low      => write!(f, "low"),
            Self::Medium   => write!(f, "medium"),
            Self::High     => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel { Safe, Low, Medium, High, Critical }

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Safe     => write!(f, "safe"),
            Self::Low      => write!(f, "low"),
            Self::Medium   => write!(f, "medium"),
            Self::High     => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

// ── PII ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    Email,
    Phone,
    Ssn,
    CreditCard,
    Iban,
    Ip,
    Date,
    Location,
    Person,
    Organization,
    Address,
    Url,
    Financial,
    Name,
    ApiKey,
    DbConn,
    Jwt,
    SshKey,
    Password,
    SecretKey,
    AccessToken,
    PrivateKey,
    SessionId,
    UserId,
}

impl PiiKind {
    /// Placeholder label used by the placeholder sanitization strategy.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Email        => "EMAIL",
            Self::Phone        => "PHONE",
            Self::Ssn          => "SSN",
            Self::CreditCard   => "CREDIT_CARD",
            Self::Iban         => "IBAN",
            Self::Ip           => "IP_ADDRESS",
            Self::Date         => "DATE",
            Self::Location     => "LOCATION",
            Self::Person       => "PERSON",
            Self::Organization => "ORGANIZATION",
            Self::Address      => "ADDRESS",
            Self::Url          => "URL",
            Self::Financial    => "FINANCIAL",
            Self::Name         => "NAME",
            Self::ApiKey       => "API_KEY",
            Self::DbConn       => "DB_CONNECTION",
            Self::Jwt          => "JWT_TOKEN",
            Self::SshKey       => "SSH_KEY",
            Self::Password     => "PASSWORD",
            Self::SecretKey    => "SECRET_KEY",
            Self::AccessToken  => "ACCESS_TOKEN",
            Self::PrivateKey   => "PRIVATE_KEY",
            Self::SessionId    => "SESSION_ID",
            Self::UserId       => "USER_ID",
        }
    }
}

impl PiiKind {
    /// Relative scoring weight of the kind, on the 0–10 scale.
    pub fn risk_weight(&self) -> f64 {
        match self {
            Self::Ssn        => 10.0,
            Self::CreditCard => 9.0,
            Self::Financial  => 8.0,
            Self::Email      => 6.0,
            Self::Phone      => 5.0,
            Self::Address    => 4.0,
            Self::Ip         => 3.0,
            Self::Date | Self::Url => 2.0,
            Self::Name       => 1.0,
            _                => 1.0,
        }
    }

    /// Kinds whose exposure is treated as high-risk by the decision table.
    pub fn is_high_risk(&self) -> bool {
        matches!(self, Self::Ssn | Self::CreditCard | Self::Financial)
    }
}

impl std::fmt::Display for PiiKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label().to_lowercase())
    }
}

/// Which detection layer produced an entity. Priority for overlap
/// tie-breaking: Regex > Pattern (statistical validators) > Ner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DetectorSource { Pattern, Ner, Regex }

impl DetectorSource {
    pub fn priority(&self) -> u8 {
        match self {
            Self::Regex   => 2,
            Self::Pattern => 1,
            Self::Ner     => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiEntity {
    pub span:       TextSpan,
    pub kind:       PiiKind,
    pub confidence: f64,
    pub detector:   DetectorSource,
    pub risk_class: Severity,
}

// ── Bias ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BiasKind {
    Gender,
    Racial,
    Age,
    Religious,
    Nationality,
    Stereotyping,
    HateSpeech,
    Discrimination,
    Cultural,
    Occupational,
}

impl BiasKind {
    /// Severity is fixed by kind, not by pattern.
    pub fn severity(&self) -> Severity {
        match self {
            Self::HateSpeech | Self::Discrimination => Severity::Critical,
            Self::Racial | Self::Gender             => Severity::High,
            Self::Stereotyping | Self::Cultural     => Severity::Medium,
            _                                       => Severity::Low,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiasDetection {
    pub span:       TextSpan,
    pub kind:       BiasKind,
    pub severity:   Severity,
    pub confidence: f64,
    pub indicators: Vec<String>,
}

// ── Adversarial ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AdvKind {
    PromptInjection,
    Jailbreak,
    RolePlay,
    SystemPromptLeak,
    RateAbuse,
    TokenOverflow,
    ContextPoisoning,
    SocialEngineering,
    TextFooler,
    GradientAttack,
}

impl AdvKind {
    pub fn severity(&self) -> Severity {
        match self {
            Self::Jailbreak | Self::SystemPromptLeak   => Severity::Critical,
            Self::PromptInjection | Self::RolePlay     => Severity::High,
            Self::TextFooler | Self::GradientAttack    => Severity::Medium,
            _                                          => Severity::Low,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdversarialDetection {
    pub span:       TextSpan,
    pub kind:       AdvKind,
    pub severity:   Severity,
    pub confidence: f64,
    pub indicators: Vec<String>,
}

// ── Risk assessment ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub overall_score:           f64,
    pub level:                   RiskLevel,
    pub pii_score:               f64,
    pub bias_score:              f64,
    pub adversarial_score:       f64,
    pub content_score:           f64,
    pub context_score:           f64,
    pub pii_entities:            Vec<PiiEntity>,
    pub bias_detections:         Vec<BiasDetection>,
    pub adversarial_detections:  Vec<AdversarialDetection>,
    pub risk_factors:            Vec<String>,
    pub suggestions:             Vec<String>,
    pub text_length:             usize,
    pub processing_ms:           f64,
    pub confidence:              f64,
}

// ── Sanitization ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MaskStrategy { Placeholder, FullMask, PartialMask, Hash, Remove }

impl std::fmt::Display for MaskStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Placeholder => write!(f, "placeholder"),
            Self::FullMask    => write!(f, "full_mask"),
            Self::PartialMask => write!(f, "partial_mask"),
            Self::Hash        => write!(f, "hash"),
            Self::Remove      => write!(f, "remove"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp:   DateTime<Utc>,
    pub entity_kind: PiiKind,
    pub original:    String,
    pub replacement: String,
    pub confidence:  f64,
    pub start:       usize,
    pub end:         usize,
    pub strategy:    MaskStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizationResult {
    pub original_text:   String,
    pub sanitized_text:  String,
    pub masked_entities: Vec<PiiEntity>,
    pub audit_trail:     Vec<AuditEntry>,
    pub risk_reduced:    f64,
}

// ── Pipeline result ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub original_text:  String,
    pub sanitized_text: String,
    pub assessment:     RiskAssessment,
    pub sanitization:   Option<SanitizationResult>,
    pub is_safe:        bool,
    pub should_block:   bool,
    pub warnings:       Vec<String>,
    pub metadata:       HashMap<String, serde_json::Value>,
}

// ── Mitigation ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MitigationAction {
    Allow, Block, Sanitize, Escalate, Quarantine, Redact, Mask, LogOnly,
}

impl std::fmt::Display for MitigationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow      => write!(f, "allow"),
            Self::Block      => write!(f, "block"),
            Self::Sanitize   => write!(f, "sanitize"),
            Self::Escalate   => write!(f, "escalate"),
            Self::Quarantine => write!(f, "quarantine"),
            Self::Redact     => write!(f, "redact"),
            Self::Mask       => write!(f, "mask"),
            Self::LogOnly    => write!(f, "log_only"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel { Low, Medium, High, Critical, Emergency }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MitigationResult {
    pub original_content:    String,
    pub mitigated_content:   String,
    pub actions:             Vec<MitigationAction>,
    pub risk_reduction:      f64,
    pub processing_ms:       f64,
    pub warnings:            Vec<String>,
    pub escalation_required: bool,
    pub escalation_level:    Option<EscalationLevel>,
    pub audit_trail:         Vec<serde_json::Value>,
}

// ── Token vault ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus { Active, Expired, Revoked, Archived }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenMapping {
    pub token_id:           Uuid,
    pub hashed_original:    String,
    pub masked_value:       String,
    pub kind:               PiiKind,
    pub status:             TokenStatus,
    pub created_at:         DateTime<Utc>,
    pub expires_at:         DateTime<Utc>,
    pub access_count:       u64,
    pub last_accessed_at:   Option<DateTime<Utc>>,
    pub encrypted_original: String,
    pub salt:               String,
    pub metadata:           HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenOp { Store, Retrieve, Validate, Revoke }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenAccessLog {
    pub log_id:   Uuid,
    pub token_id: Option<Uuid>,
    pub at:       DateTime<Utc>,
    pub op:       TokenOp,
    pub success:  bool,
    pub actor:    Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

// ── Alerts ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind { HighRisk, Blocked, UsageLimit, Anomaly }

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HighRisk   => write!(f, "high_risk"),
            Self::Blocked    => write!(f, "blocked"),
            Self::UsageLimit => write!(f, "usage_limit"),
            Self::Anomaly    => write!(f, "anomaly"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertChannel { Email, Webhook, Both }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub kind:             AlertKind,
    pub threshold:        f64,
    pub channel:          AlertChannel,
    pub target:           String,
    pub cooldown_minutes: i64,
    pub active:           bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub kind:      AlertKind,
    pub actor_id:  String,
    pub severity:  EscalationLevel,
    pub message:   String,
    pub details:   HashMap<String, serde_json::Value>,
    pub at:        DateTime<Utc>,
    pub threshold: f64,
    pub actual:    f64,
}

// ── Hallucination ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HallucinationKind {
    FactualInaccuracy,
    SourceMisattribution,
    DataInconsistency,
    UnverifiableClaim,
    ContradictoryInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HallucinationDetection {
    pub kind:        HallucinationKind,
    pub severity:    Severity,
    pub confidence:  f64,
    pub description: String,
    pub conflicting: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HallucinationAssessment {
    pub score:               f64,
    pub level:               RiskLevel,
    pub detections:          Vec<HallucinationDetection>,
    pub factual_accuracy:    f64,
    pub verifiable_claims:   usize,
    pub unverifiable_claims: usize,
    pub confidence:          f64,
    pub processing_ms:       f64,
}

// ── Risk log record (audit) ───────────────────────────────────────────────────

/// Append-only record of one pipeline run. Idempotent per (user_id,
/// request_id) at the record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLogRecord {
    pub user_id:          String,
    pub request_id:       String,
    pub risk_score:       f64,
    pub risk_level:       RiskLevel,
    pub risks_detected:   Vec<String>,
    pub input_sanitized:  bool,
    pub output_sanitized: bool,
    pub blocked:          bool,
    pub llm_provider:     Option<String>,
    pub processing_ms:    f64,
    pub created_at:       DateTime<Utc>,
}
