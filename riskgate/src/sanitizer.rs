// riskgate/src/sanitizer.rs
//
// Rewrites detected PII spans by per-kind strategy. Replacements are spliced
// in descending start order so offsets to the left of each splice stay valid;
// the audit trail records entries in splicing order, one per masked entity.

use chrono::Utc;

use crate::detectors::byte_offset;
use crate::events::{AuditEntry, MaskStrategy, PiiEntity, PiiKind, SanitizationResult};

// ── Strategy table ────────────────────────────────────────────────────────────

/// Default strategy per kind. Kinds without an explicit entry fall back to a
/// placeholder so no original value survives sanitization.
pub fn strategy_for(kind: PiiKind) -> MaskStrategy {
    match kind {
        PiiKind::Ssn | PiiKind::Financial => MaskStrategy::FullMask,
        PiiKind::Email | PiiKind::Phone | PiiKind::CreditCard => MaskStrategy::PartialMask,
        _ => MaskStrategy::Placeholder,
    }
}

// ── Replacement builders ──────────────────────────────────────────────────────

/// Alphanumerics become `*`; punctuation and spacing survive.
fn full_mask(value: &str) -> String {
    value.chars().map(|c| if c.is_alphanumeric() { '*' } else { c }).collect()
}

fn mask_email(value: &str) -> String {
    let Some((local, domain)) = value.split_once('@') else {
        return "***@***.***".into();
    };
    let local_chars: Vec<char> = local.chars().collect();
    let masked_local = if local_chars.len() <= 2 {
        "*".repeat(local_chars.len())
    } else {
        format!(
            "{}{}{}",
            local_chars[0],
            "*".repeat(local_chars.len() - 2),
            local_chars[local_chars.len() - 1]
        )
    };
    let masked_domain = match domain.rsplit_once('.') {
        Some((name, tld)) => format!("{}.{}", "*".repeat(name.chars().count()), tld),
        None => domain.to_string(),
    };
    format!("{masked_local}@{masked_domain}")
}

/// Mask all digits except the trailing `keep`, preserving formatting chars.
fn mask_digits_keep_last(value: &str, keep: usize) -> String {
    let total = value.chars().filter(|c| c.is_ascii_digit()).count();
    if total < keep {
        return "*".repeat(value.chars().count());
    }
    let mut seen = 0usize;
    value
        .chars()
        .map(|c| {
            if c.is_ascii_digit() {
                seen += 1;
                if seen <= total - keep { '*' } else { c }
            } else {
                c
            }
        })
        .collect()
}

/// Kind-specific partial mask. Shared with the token vault's masked-value
/// construction so masks are derivable from (original, kind) alone.
pub fn partial_mask(value: &str, kind: PiiKind) -> String {
    match kind {
        PiiKind::Email => mask_email(value),
        PiiKind::Phone | PiiKind::CreditCard => mask_digits_keep_last(value, 4),
        _ => {
            let chars: Vec<char> = value.chars().collect();
            if chars.len() <= 4 {
                "*".repeat(chars.len())
            } else {
                format!(
                    "{}{}{}{}{}",
                    chars[0],
                    chars[1],
                    "*".repeat(chars.len() - 4),
                    chars[chars.len() - 2],
                    chars[chars.len() - 1]
                )
            }
        }
    }
}

fn hash_replacement(kind: PiiKind, value: &str) -> String {
    let digest = md5::compute(value.as_bytes());
    format!("[{}:{}]", kind.label(), &hex::encode(digest.0)[..8])
}

pub fn replacement_for(entity: &PiiEntity, strategy: MaskStrategy) -> String {
    match strategy {
        MaskStrategy::Placeholder => format!("[{}]", entity.kind.label()),
        MaskStrategy::FullMask    => full_mask(&entity.span.original_text),
        MaskStrategy::PartialMask => partial_mask(&entity.span.original_text, entity.kind),
        MaskStrategy::Hash        => hash_replacement(entity.kind, &entity.span.original_text),
        MaskStrategy::Remove      => String::new(),
    }
}

// ── Risk arithmetic ───────────────────────────────────────────────────────────

fn entity_risk(entities: &[PiiEntity]) -> f64 {
    entities
        .iter()
        .map(|e| e.kind.risk_weight() * e.confidence)
        .sum::<f64>()
        .min(10.0)
}

// ── Sanitization ──────────────────────────────────────────────────────────────

/// Mask every entity at or above `threshold`. The audit trail holds exactly
/// one entry per masked entity, in splicing (descending start) order, and
/// replaying it against `original_text` reproduces `sanitized_text`.
pub fn sanitize(text: &str, entities: &[PiiEntity], threshold: f64) -> SanitizationResult {
    let mut to_mask: Vec<&PiiEntity> =
        entities.iter().filter(|e| e.confidence >= threshold).collect();
    to_mask.sort_by(|a, b| b.span.start.cmp(&a.span.start));

    let mut sanitized = text.to_string();
    let mut audit_trail = Vec::with_capacity(to_mask.len());
    let mut masked_entities = Vec::with_capacity(to_mask.len());

    for entity in &to_mask {
        let strategy = strategy_for(entity.kind);
        let replacement = replacement_for(entity, strategy);

        // Byte offsets computed against the original text stay valid on the
        // evolving string because splices only touch positions to the right.
        let bs = byte_offset(text, entity.span.start);
        let be = byte_offset(text, entity.span.end);
        sanitized.replace_range(bs..be, &replacement);

        audit_trail.push(AuditEntry {
            timestamp:   Utc::now(),
            entity_kind: entity.kind,
            original:    entity.span.original_text.clone(),
            replacement,
            confidence:  entity.confidence,
            start:       entity.span.start,
            end:         entity.span.end,
            strategy,
        });
        masked_entities.push((*entity).clone());
    }

    let remaining: Vec<PiiEntity> = entities
        .iter()
        .filter(|e| e.confidence < threshold)
        .cloned()
        .collect();
    let risk_reduced = (entity_risk(entities) - entity_risk(&remaining)).max(0.0);

    SanitizationResult {
        original_text:  text.to_string(),
        sanitized_text: sanitized,
        masked_entities,
        audit_trail,
        risk_reduced,
    }
}
