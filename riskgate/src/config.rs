// riskgate/src/config.rs
//
// Gateway configuration (closed env-key set) plus the per-mode tuning values
// handed to the pipeline. Mode tuning is an immutable value passed per call —
// detectors are never reconfigured in place, so concurrent requests in
// different modes cannot bleed into each other.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::GatewayError;

// ── Processing modes ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode { Strict, Balanced, Permissive }

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strict     => write!(f, "strict"),
            Self::Balanced   => write!(f, "balanced"),
            Self::Permissive => write!(f, "permissive"),
        }
    }
}

// ── Scorer tuning ─────────────────────────────────────────────────────────────

/// Component weights for the overall risk score. Must sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScorerWeights {
    pub pii:         f64,
    pub bias:        f64,
    pub adversarial: f64,
    pub content:     f64,
    pub context:     f64,
}

impl ScorerWeights {
    pub fn for_mode(mode: ProcessingMode) -> Self {
        match mode {
            ProcessingMode::Strict => Self {
                pii: 0.25, bias: 0.25, adversarial: 0.30, content: 0.15, context: 0.05,
            },
            ProcessingMode::Balanced => Self {
                pii: 0.25, bias: 0.25, adversarial: 0.25, content: 0.15, context: 0.10,
            },
            ProcessingMode::Permissive => Self {
                pii: 0.25, bias: 0.25, adversarial: 0.20, content: 0.20, context: 0.10,
            },
        }
    }
}

/// Ascending level boundaries: safe < `safe`, low < `low`, medium < `medium`,
/// high < `high`, critical otherwise.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LevelThresholds {
    pub safe:   f64,
    pub low:    f64,
    pub medium: f64,
    pub high:   f64,
}

impl Default for LevelThresholds {
    fn default() -> Self {
        Self { safe: 2.0, low: 4.0, medium: 6.0, high: 8.0 }
    }
}

impl LevelThresholds {
    /// Levels must be a strictly monotonic function of the thresholds.
    pub fn validate(&self) -> Result<(), GatewayError> {
        let seq = [self.safe, self.low, self.medium, self.high];
        if seq.windows(2).all(|w| w[0] < w[1]) && self.safe > 0.0 {
            Ok(())
        } else {
            Err(GatewayError::Validation(format!(
                "level thresholds must be strictly ascending and positive, got {seq:?}"
            )))
        }
    }
}

// ── Detector tuning ───────────────────────────────────────────────────────────

/// Immutable per-call detector configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub confidence_threshold: f64,
    /// Strict mode lowers adversarial thresholds by 0.2 across the board.
    pub strict_mode:          bool,
    /// Enables the NER-style layer (person/organization/location/date).
    pub enable_ner:           bool,
    /// Enables the statistical validators (Luhn, mod-97, octet range, ...).
    pub enable_stats:         bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self { confidence_threshold: 0.7, strict_mode: false, enable_ner: true, enable_stats: true }
    }
}

impl DetectorConfig {
    /// Effective adversarial threshold after the strict-mode reduction.
    pub fn adversarial_threshold(&self) -> f64 {
        if self.strict_mode {
            (self.confidence_threshold - 0.2).max(0.0)
        } else {
            self.confidence_threshold
        }
    }
}

// ── Agent configuration ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub mode:                         ProcessingMode,
    pub pii_confidence_threshold:     f64,
    pub bias_confidence_threshold:    f64,
    pub sanitize_confidence_threshold: f64,
    pub enable_pii_detection:         bool,
    pub enable_bias_detection:        bool,
    pub enable_adversarial_detection: bool,
    pub enable_sanitization:          bool,
    pub max_text_length:              usize,
    pub thresholds:                   LevelThresholds,
}

impl AgentConfig {
    pub fn for_mode(mode: ProcessingMode) -> Self {
        Self {
            mode,
            pii_confidence_threshold:      0.7,
            bias_confidence_threshold:     0.7,
            sanitize_confidence_threshold: 0.7,
            enable_pii_detection:          true,
            enable_bias_detection:         true,
            enable_adversarial_detection:  true,
            enable_sanitization:           true,
            max_text_length:               50_000,
            thresholds:                    LevelThresholds::default(),
        }
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            confidence_threshold: self.pii_confidence_threshold,
            strict_mode:          self.mode == ProcessingMode::Strict,
            ..DetectorConfig::default()
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self { Self::for_mode(ProcessingMode::Balanced) }
}

// ── Gateway configuration (env-backed) ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub project_name:            String,
    pub host:                    String,
    pub port:                    u16,
    pub allowed_origins:         Vec<String>,
    pub jwt_secret_key:          String,
    pub jwt_algorithm:           String,
    pub jwt_expiration_hours:    i64,
    pub api_key_prefix:          String,
    pub api_key_length:          usize,
    pub default_rate_limit:      u64,
    pub rate_limit_window_hours: i64,
    pub default_risk_threshold:  f64,
    pub max_input_length:        usize,
    pub default_llm_provider:    String,
    pub provider_api_keys:       HashMap<String, String>,
    pub vault_master_key:        String,
    pub alert_webhook_url:       String,
    pub detector_enable_pii:         bool,
    pub detector_enable_ner:         bool,
    pub detector_enable_bias:        bool,
    pub detector_enable_adversarial: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            project_name:            "riskgate".into(),
            host:                    "0.0.0.0".into(),
            port:                    8000,
            allowed_origins:         vec!["http://localhost:3000".into()],
            jwt_secret_key:          String::new(),
            jwt_algorithm:           "HS256".into(),
            jwt_expiration_hours:    24,
            api_key_prefix:          "rsk_".into(),
            api_key_length:          32,
            default_rate_limit:      1000,
            rate_limit_window_hours: 1,
            default_risk_threshold:  5.0,
            max_input_length:        50_000,
            default_llm_provider:    "openai".into(),
            provider_api_keys:       HashMap::new(),
            vault_master_key:        String::new(),
            alert_webhook_url:       String::new(),
            detector_enable_pii:         true,
            detector_enable_ner:         true,
            detector_enable_bias:        true,
            detector_enable_adversarial: true,
        }
    }
}

impl GatewayConfig {
    /// Build from the process environment. Unset keys fall back to defaults.
    pub fn from_env() -> Self {
        fn var(key: &str) -> Option<String> {
            std::env::var(key).ok().filter(|v| !v.is_empty())
        }
        fn parse<T: std::str::FromStr>(key: &str, default: T) -> T {
            var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        }

        let d = Self::default();
        let mut provider_api_keys = HashMap::new();
        for (provider, key) in [
            ("openai",    "OPENAI_API_KEY"),
            ("anthropic", "ANTHROPIC_API_KEY"),
            ("groq",      "GROQ_API_KEY"),
        ] {
            if let Some(v) = var(key) {
                provider_api_keys.insert(provider.to_string(), v);
            }
        }

        Self {
            project_name:            var("PROJECT_NAME").unwrap_or(d.project_name),
            host:                    var("HOST").unwrap_or(d.host),
            port:                    parse("PORT", d.port),
            allowed_origins:         var("ALLOWED_ORIGINS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(d.allowed_origins),
            jwt_secret_key:          var("JWT_SECRET_KEY").unwrap_or_default(),
            jwt_algorithm:           var("JWT_ALGORITHM").unwrap_or(d.jwt_algorithm),
            jwt_expiration_hours:    parse("JWT_EXPIRATION_HOURS", d.jwt_expiration_hours),
            api_key_prefix:          var("API_KEY_PREFIX").unwrap_or(d.api_key_prefix),
            api_key_length:          parse("API_KEY_LENGTH", d.api_key_length),
            default_rate_limit:     parse("DEFAULT_RATE_LIMIT", d.default_rate_limit),
            rate_limit_window_hours: parse("RATE_LIMIT_WINDOW_HOURS", d.rate_limit_window_hours),
            default_risk_threshold:  parse("DEFAULT_RISK_THRESHOLD", d.default_risk_threshold),
            max_input_length:        parse("MAX_INPUT_LENGTH", d.max_input_length),
            default_llm_provider:    var("DEFAULT_LLM_PROVIDER").unwrap_or(d.default_llm_provider),
            provider_api_keys,
            vault_master_key:        var("VAULT_MASTER_KEY").unwrap_or_default(),
            alert_webhook_url:       var("ALERT_WEBHOOK_URL").unwrap_or_default(),
            detector_enable_pii:         parse("DETECTOR_ENABLE_PII", true),
            detector_enable_ner:         parse("DETECTOR_ENABLE_NER", true),
            detector_enable_bias:        parse("DETECTOR_ENABLE_BIAS", true),
            detector_enable_adversarial: parse("DETECTOR_ENABLE_ADVERSARIAL", true),
        }
    }
}
