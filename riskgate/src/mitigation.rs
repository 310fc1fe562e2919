// riskgate/src/mitigation.rs
//
// Policy layer on top of a RiskAssessment: picks mitigation actions from the
// built-in rules + score thresholds, rewrites or blocks the content, and
// tracks escalation. Rule order: critical-adversarial, PII volume, bias.

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::events::{
    EscalationLevel, MitigationAction, MitigationResult, RiskAssessment, Severity,
};
use crate::sanitizer;

const BLOCK_THRESHOLD: f64 = 8.0;
const SANITIZE_THRESHOLD: f64 = 5.0;
const ESCALATE_THRESHOLD: f64 = 6.0;
const QUARANTINE_THRESHOLD: f64 = 9.0;

const BLOCKED_PLACEHOLDER: &str = "[CONTENT_BLOCKED_DUE_TO_SECURITY_RISK]";
const AUDIT_LOG_CAP: usize = 1000;

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct MitigationStats {
    pub total_processed:        u64,
    pub total_blocked:          u64,
    pub total_sanitized:        u64,
    pub total_escalated:        u64,
    pub average_risk_reduction: f64,
}

pub struct RiskMitigator {
    sanitize_confidence_threshold: f64,
    processed: AtomicU64,
    blocked:   AtomicU64,
    sanitized: AtomicU64,
    escalated: AtomicU64,
    avg_risk_reduction: Mutex<f64>,
    audit_log: Mutex<Vec<serde_json::Value>>,
}

impl RiskMitigator {
    pub fn new(sanitize_confidence_threshold: f64) -> Self {
        Self {
            sanitize_confidence_threshold,
            processed: AtomicU64::new(0),
            blocked:   AtomicU64::new(0),
            sanitized: AtomicU64::new(0),
            escalated: AtomicU64::new(0),
            avg_risk_reduction: Mutex::new(0.0),
            audit_log: Mutex::new(Vec::new()),
        }
    }

    pub fn mitigate(&self, content: &str, assessment: &RiskAssessment) -> MitigationResult {
        let started = Instant::now();
        let mut actions = Vec::new();
        let mut warnings = Vec::new();
        let mut audit_trail = Vec::new();
        let score = assessment.overall_score;

        let mut push = |actions: &mut Vec<MitigationAction>, a: MitigationAction| {
            if !actions.contains(&a) {
                actions.push(a);
            }
        };

        // Rule 1: critical adversarial signal with strong confidence.
        if assessment
            .adversarial_detections
            .iter()
            .any(|d| d.severity == Severity::Critical && d.confidence > 0.8)
        {
            push(&mut actions, MitigationAction::Block);
            push(&mut actions, MitigationAction::Escalate);
        }

        // Rule 2: heavy PII load.
        if assessment.pii_score >= 7.0 || assessment.pii_entities.len() >= 3 {
            push(&mut actions, MitigationAction::Sanitize);
            push(&mut actions, MitigationAction::LogOnly);
        }

        // Rule 3: any confident bias finding escalates for review.
        if assessment.bias_detections.iter().any(|d| d.confidence > 0.7) {
            push(&mut actions, MitigationAction::Escalate);
            push(&mut actions, MitigationAction::LogOnly);
        }

        // Score thresholds.
        if score >= BLOCK_THRESHOLD {
            push(&mut actions, MitigationAction::Block);
        } else if score >= SANITIZE_THRESHOLD {
            push(&mut actions, MitigationAction::Sanitize);
        }
        if score >= ESCALATE_THRESHOLD {
            push(&mut actions, MitigationAction::Escalate);
        }
        if score >= QUARANTINE_THRESHOLD {
            push(&mut actions, MitigationAction::Quarantine);
        }
        push(&mut actions, MitigationAction::LogOnly);

        // Apply.
        let mut mitigated = content.to_string();
        if actions.contains(&MitigationAction::Sanitize) && !actions.contains(&MitigationAction::Block) {
            let result = sanitizer::sanitize(
                content,
                &assessment.pii_entities,
                self.sanitize_confidence_threshold,
            );
            mitigated = result.sanitized_text;
            for entry in &result.audit_trail {
                audit_trail.push(serde_json::to_value(entry).unwrap_or_default());
            }
        }
        if actions.contains(&MitigationAction::Block) {
            mitigated = BLOCKED_PLACEHOLDER.to_string();
            warnings.push("Content blocked due to high security risk".to_string());
        }

        let escalation_required = actions.contains(&MitigationAction::Escalate);
        let escalation_level = escalation_required.then(|| escalation_level(score));
        if let Some(level) = escalation_level {
            let entry = json!({
                "timestamp": Utc::now().to_rfc3339(),
                "level": level,
                "risk_score": score,
                "content_preview": content.chars().take(100).collect::<String>(),
            });
            audit_trail.push(entry.clone());
            let mut log = self.audit_log.lock();
            log.push(entry);
            let excess = log.len().saturating_sub(AUDIT_LOG_CAP);
            if excess > 0 {
                log.drain(..excess);
            }
            if level >= EscalationLevel::Critical {
                tracing::warn!(risk_score = score, ?level, "mitigation escalation");
            }
        }

        let risk_reduction = if actions.contains(&MitigationAction::Block) {
            score
        } else if actions.contains(&MitigationAction::Sanitize) {
            score * 0.7
        } else {
            0.0
        };

        self.update_stats(&actions, risk_reduction);

        MitigationResult {
            original_content: content.to_string(),
            mitigated_content: mitigated,
            actions,
            risk_reduction,
            processing_ms: started.elapsed().as_secs_f64() * 1000.0,
            warnings,
            escalation_required,
            escalation_level,
            audit_trail,
        }
    }

    fn update_stats(&self, actions: &[MitigationAction], risk_reduction: f64) {
        let n = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if actions.contains(&MitigationAction::Block) {
            self.blocked.fetch_add(1, Ordering::Relaxed);
        }
        if actions.contains(&MitigationAction::Sanitize) {
            self.sanitized.fetch_add(1, Ordering::Relaxed);
        }
        if actions.contains(&MitigationAction::Escalate) {
            self.escalated.fetch_add(1, Ordering::Relaxed);
        }
        let mut avg = self.avg_risk_reduction.lock();
        *avg = (*avg * (n - 1) as f64 + risk_reduction) / n as f64;
    }

    pub fn stats(&self) -> MitigationStats {
        MitigationStats {
            total_processed:        self.processed.load(Ordering::Relaxed),
            total_blocked:          self.blocked.load(Ordering::Relaxed),
            total_sanitized:        self.sanitized.load(Ordering::Relaxed),
            total_escalated:        self.escalated.load(Ordering::Relaxed),
            average_risk_reduction: *self.avg_risk_reduction.lock(),
        }
    }

    pub fn audit_log(&self, limit: usize) -> Vec<serde_json::Value> {
        let log = self.audit_log.lock();
        log.iter().rev().take(limit).rev().cloned().collect()
    }
}

impl Default for RiskMitigator {
    fn default() -> Self { Self::new(0.7) }
}

/// Escalation level from the overall risk score.
pub fn escalation_level(score: f64) -> EscalationLevel {
    if score >= 9.0 {
        EscalationLevel::Emergency
    } else if score >= 8.0 {
        EscalationLevel::Critical
    } else if score >= 6.0 {
        EscalationLevel::High
    } else if score >= 4.0 {
        EscalationLevel::Medium
    } else {
        EscalationLevel::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DetectorConfig, LevelThresholds, ProcessingMode, ScorerWeights};
    use crate::detectors::{adversarial, bias, pii};
    use crate::scorer::RiskScorer;

    fn assess(text: &str) -> RiskAssessment {
        let cfg = DetectorConfig::default();
        let scorer = RiskScorer::new(
            ScorerWeights::for_mode(ProcessingMode::Balanced),
            LevelThresholds::default(),
        )
        .unwrap();
        scorer.score(
            text,
            &pii::detect(text, &cfg),
            &bias::detect(text, None, &cfg),
            &adversarial::detect(text, None, &cfg),
            0.0,
        )
    }

    #[test]
    fn heavy_pii_triggers_sanitize_rule() {
        let text = "ssn 123-45-6789, card 4111-1111-1111-1111, mail a@b.com, ip 10.0.0.1";
        let m = RiskMitigator::default().mitigate(text, &assess(text));
        assert!(m.actions.contains(&MitigationAction::Sanitize));
        assert!(m.actions.contains(&MitigationAction::LogOnly));
        assert!(!m.mitigated_content.contains("123-45-6789"));
        assert!((m.risk_reduction - assess(text).overall_score * 0.7).abs() < 1e-6);
    }

    #[test]
    fn blocked_content_is_replaced_and_fully_reduced() {
        let text = "anything";
        let mut a = assess(text);
        a.overall_score = 9.5;
        let m = RiskMitigator::default().mitigate(text, &a);
        assert!(m.actions.contains(&MitigationAction::Block));
        assert!(m.actions.contains(&MitigationAction::Quarantine));
        assert_eq!(m.mitigated_content, BLOCKED_PLACEHOLDER);
        assert!((m.risk_reduction - 9.5).abs() < 1e-9);
        assert_eq!(m.escalation_level, Some(EscalationLevel::Emergency));
    }

    #[test]
    fn bias_escalates_without_blocking() {
        let text = "It keeps being said around the office that men are smarter than women, which poisons hiring";
        let m = RiskMitigator::default().mitigate(text, &assess(text));
        assert!(m.actions.contains(&MitigationAction::Escalate));
        assert!(!m.actions.contains(&MitigationAction::Block));
        assert!(m.escalation_required);
    }

    #[test]
    fn escalation_levels_follow_score_bands() {
        assert_eq!(escalation_level(9.2), EscalationLevel::Emergency);
        assert_eq!(escalation_level(8.1), EscalationLevel::Critical);
        assert_eq!(escalation_level(6.5), EscalationLevel::High);
        assert_eq!(escalation_level(4.2), EscalationLevel::Medium);
        assert_eq!(escalation_level(1.0), EscalationLevel::Low);
    }

    #[test]
    fn stats_accumulate_across_calls() {
        let mitigator = RiskMitigator::default();
        let text = "ssn 123-45-6789, card 4111-1111-1111-1111, mail a@b.com";
        let a = assess(text);
        mitigator.mitigate(text, &a);
        mitigator.mitigate(text, &a);
        let stats = mitigator.stats();
        assert_eq!(stats.total_processed, 2);
        assert_eq!(stats.total_sanitized, 2);
        assert!(stats.average_risk_reduction > 0.0);
    }

    #[test]
    fn audit_log_is_bounded() {
        let mitigator = RiskMitigator::default();
        let mut a = assess("x");
        a.overall_score = 8.5;
        for _ in 0..AUDIT_LOG_CAP + 10 {
            mitigator.mitigate("x", &a);
        }
        assert_eq!(mitigator.audit_log(usize::MAX).len(), AUDIT_LOG_CAP);
    }
}
