// riskgate/src/error.rs
//
// Error taxonomy for the gateway core. Validation and auth errors propagate
// to the caller immediately; pipeline failures are collapsed into a fallback
// ProcessingResult at the orchestrator boundary and never surface as Err.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed request payload, over-length input, unknown mode.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Missing/bad credentials, revoked or expired key.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Key usage reached the stored limit.
    #[error("usage limit reached: {used}/{limit}")]
    UsageLimit { used: u64, limit: u64 },

    /// Content blocked by detector/mitigator policy.
    #[error("content blocked by policy (risk {risk_score:.2}, max {max_allowed:.2})")]
    PolicyBlock {
        risk_score:   f64,
        max_allowed:  f64,
        risk_factors: Vec<String>,
    },

    /// Upstream LLM provider returned >= 400 or timed out.
    #[error("upstream provider {provider} failed: {message}")]
    Upstream { provider: String, message: String },

    /// Vault decryption failure or missing row. Internal only — retrieve
    /// returns None to callers and logs the failure.
    #[error("vault error: {0}")]
    Vault(String),

    /// Uncaught failure inside a pipeline stage.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status the outer surface maps this error to.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_)     => 400,
            Self::Auth(_)           => 401,
            Self::UsageLimit { .. } => 429,
            Self::PolicyBlock { .. } => 400,
            Self::Upstream { .. }   => 502,
            Self::Vault(_)          => 500,
            Self::Internal(_)       => 500,
        }
    }
}
