// riskgate/src/detectors/hallucination.rs
//
// Post-response factuality check: claims extracted from generated text are
// cross-referenced against the source row that produced the response.
// Order/tracking identifiers, status tokens, and dates each have their own
// comparison rule; contradictions and absolute quantifiers are flagged from
// the text alone.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use regex::Regex;
use serde_json::json;
use std::sync::OnceLock;
use std::time::Instant;

use crate::events::{
    HallucinationAssessment, HallucinationDetection, HallucinationKind, RiskLevel, Severity,
};

// ── Claim extraction ──────────────────────────────────────────────────────────

const CLAIM_PATTERNS: &[&str] = &[
    r"(?:Your|The)\s+(?:order|package|item)\s+(?:\S+\s+)?(?:is|was|will\s+be)\s+[^.!?]+",
    r"(?:Order|Package)\s+#?\S+\s+(?:is|was|will\s+be)\s+[^.!?]+",
    r"(?:ETA|Estimated\s+delivery|Expected\s+arrival)\s+(?:is|was|will\s+be)\s+[^.!?]+",
    r"(?:Status|Current\s+status)\s+(?:is|was)\s+[^.!?]+",
];

const ORDER_ID_PATTERNS: &[&str] = &[r"\b[A-Z]{2,}-[A-Za-z0-9-]{4,}\b", r"\b\d{6,}\b"];

const DATE_PATTERNS: &[&str] = &[
    r"\b(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\.?\s+\d{1,2},?\s+\d{4}\b",
    r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b",
    r"\b\d{4}-\d{2}-\d{2}\b",
];

const ABSOLUTE_PATTERN: &str =
    r"\b(?:always|never|everyone|nobody|definitely|certainly|absolutely|obviously)\b";

struct Catalog {
    claims:   Vec<Regex>,
    orders:   Vec<Regex>,
    dates:    Vec<Regex>,
    absolute: Regex,
}

static CATALOG: OnceLock<Catalog> = OnceLock::new();

fn catalog() -> &'static Catalog {
    CATALOG.get_or_init(|| Catalog {
        claims: CLAIM_PATTERNS
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")).expect("claim pattern compile failed"))
            .collect(),
        orders: ORDER_ID_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("order pattern compile failed"))
            .collect(),
        dates: DATE_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("date pattern compile failed"))
            .collect(),
        absolute: Regex::new(&format!("(?i){ABSOLUTE_PATTERN}")).expect("absolute pattern compile failed"),
    })
}

// ── Status synonyms ───────────────────────────────────────────────────────────

// Surface token → canonical status. Scanned with one automaton; manual
// word-boundary check since the automaton has none.
const STATUS_TOKENS: &[(&str, &str)] = &[
    ("in transit", "in_transit"),
    ("in_transit", "in_transit"),
    ("en route", "in_transit"),
    ("shipping", "in_transit"),
    ("on the way", "in_transit"),
    ("delivered", "delivered"),
    ("arrived", "delivered"),
    ("received", "delivered"),
    ("completed", "delivered"),
    ("pending", "pending"),
    ("processing", "pending"),
    ("preparing", "pending"),
    ("waiting", "pending"),
    ("cancelled", "cancelled"),
    ("returned", "returned"),
];

static STATUS_AC: OnceLock<(AhoCorasick, Vec<&'static str>)> = OnceLock::new();

fn status_automaton() -> &'static (AhoCorasick, Vec<&'static str>) {
    STATUS_AC.get_or_init(|| {
        let patterns: Vec<&str> = STATUS_TOKENS.iter().map(|(t, _)| *t).collect();
        let canon: Vec<&str> = STATUS_TOKENS.iter().map(|(_, c)| *c).collect();
        let ac = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::LeftmostLongest)
            .build(&patterns)
            .expect("status AC build failed");
        (ac, canon)
    })
}

fn statuses_in(text: &str) -> Vec<&'static str> {
    let (ac, canon) = status_automaton();
    let mut found = Vec::new();
    for m in ac.find_iter(text) {
        let before_ok = m.start() == 0
            || !text[..m.start()].chars().next_back().map(char::is_alphanumeric).unwrap_or(false);
        let after_ok = m.end() == text.len()
            || !text[m.end()..].chars().next().map(char::is_alphanumeric).unwrap_or(false);
        if before_ok && after_ok {
            let c = canon[m.pattern().as_usize()];
            if !found.contains(&c) {
                found.push(c);
            }
        }
    }
    found
}

fn canonical_status(raw: &str) -> &str {
    statuses_in(raw).first().copied().unwrap_or(raw)
}

fn normalize(value: &str) -> String {
    value.chars().filter(|c| c.is_alphanumeric()).collect::<String>().to_lowercase()
}

// ── Scoring ───────────────────────────────────────────────────────────────────

fn severity_weight(severity: Severity) -> f64 {
    match severity {
        Severity::Low      => 1.0,
        Severity::Medium   => 2.0,
        Severity::High     => 3.0,
        Severity::Critical => 4.0,
    }
}

fn accuracy_deduction(severity: Severity) -> f64 {
    match severity {
        Severity::Low      => 0.05,
        Severity::Medium   => 0.10,
        Severity::High     => 0.20,
        Severity::Critical => 0.30,
    }
}

fn classify(score: f64) -> RiskLevel {
    if score >= 8.0 {
        RiskLevel::Critical
    } else if score >= 6.0 {
        RiskLevel::High
    } else if score >= 4.0 {
        RiskLevel::Medium
    } else if score >= 2.0 {
        RiskLevel::Low
    } else {
        RiskLevel::Safe
    }
}

// ── Detection ─────────────────────────────────────────────────────────────────

/// Cross-reference `llm_text` against the source row it was generated from.
/// `source_row` is a JSON object; order_id / status / estimated_delivery are
/// the recognized fields.
pub fn detect(
    llm_text: &str,
    source_row: Option<&serde_json::Value>,
    _user_question: Option<&str>,
) -> HallucinationAssessment {
    let started = Instant::now();
    let cat = catalog();
    let mut detections = Vec::new();

    let claims: Vec<&str> = cat
        .claims
        .iter()
        .flat_map(|re| re.find_iter(llm_text).map(|m| m.as_str()))
        .filter(|c| c.len() > 10)
        .collect();

    if let Some(row) = source_row {
        // Order / tracking identifiers.
        if let Some(actual) = row.get("order_id").and_then(|v| v.as_str()) {
            let claimed: Vec<&str> = cat
                .orders
                .iter()
                .flat_map(|re| re.find_iter(llm_text).map(|m| m.as_str()))
                .collect();
            let actual_norm = normalize(actual);
            let matches = claimed.is_empty()
                || claimed.iter().any(|c| {
                    let c = normalize(c);
                    actual_norm.contains(&c) || c.contains(&actual_norm)
                });
            if !matches {
                detections.push(HallucinationDetection {
                    kind: HallucinationKind::FactualInaccuracy,
                    severity: Severity::High,
                    confidence: 0.9,
                    description: "Order number in response does not match source data".into(),
                    conflicting: Some(json!({ "claimed": claimed, "actual": actual })),
                });
            }
        }

        // Status tokens against the synonym sets.
        if let Some(actual) = row.get("status").and_then(|v| v.as_str()) {
            let claimed = statuses_in(llm_text);
            let actual_canon = canonical_status(actual);
            if !claimed.is_empty() && !claimed.contains(&actual_canon) {
                detections.push(HallucinationDetection {
                    kind: HallucinationKind::FactualInaccuracy,
                    severity: Severity::Medium,
                    confidence: 0.8,
                    description: "Status information does not match source data".into(),
                    conflicting: Some(json!({ "claimed": claimed, "actual": actual })),
                });
            }
        }

        // First recognizable date against the promised delivery date.
        if let Some(actual) = row.get("estimated_delivery").and_then(|v| v.as_str()) {
            let claimed: Option<&str> = cat
                .dates
                .iter()
                .filter_map(|re| re.find(llm_text).map(|m| (m.start(), m.as_str())))
                .min_by_key(|(start, _)| *start)
                .map(|(_, s)| s);
            if let Some(date) = claimed {
                let a = normalize(actual);
                let c = normalize(date);
                if !a.contains(&c) && !c.contains(&a) {
                    detections.push(HallucinationDetection {
                        kind: HallucinationKind::FactualInaccuracy,
                        severity: Severity::Medium,
                        confidence: 0.7,
                        description: "Delivery date does not match source data".into(),
                        conflicting: Some(json!({ "claimed": date, "actual": actual })),
                    });
                }
            }
        }
    }

    // Internal contradictions: two different canonical statuses in one text.
    let statuses = statuses_in(llm_text);
    if statuses.len() > 1 {
        detections.push(HallucinationDetection {
            kind: HallucinationKind::ContradictoryInfo,
            severity: Severity::High,
            confidence: 0.9,
            description: format!("Contradictory status claims: {}", statuses.join(" vs ")),
            conflicting: None,
        });
    }

    // Absolute quantifiers are unverifiable by construction.
    for m in cat.absolute.find_iter(llm_text) {
        detections.push(HallucinationDetection {
            kind: HallucinationKind::UnverifiableClaim,
            severity: Severity::Low,
            confidence: 0.6,
            description: format!("Unverifiable claim: '{}'", m.as_str()),
            conflicting: None,
        });
    }

    let score = if detections.is_empty() {
        0.0
    } else {
        let total: f64 = detections.iter().map(|d| severity_weight(d.severity) * d.confidence).sum();
        ((total / (detections.len() as f64 * 4.0)) * 10.0).min(10.0)
    };

    let factual_accuracy = if claims.is_empty() && detections.is_empty() {
        1.0
    } else {
        (1.0 - detections.iter().map(|d| accuracy_deduction(d.severity)).sum::<f64>()).clamp(0.0, 1.0)
    };

    let confidence = if detections.is_empty() {
        0.95
    } else {
        let avg = detections.iter().map(|d| d.confidence).sum::<f64>() / detections.len() as f64;
        let boosted = if detections.iter().any(|d| d.severity >= Severity::High) { avg + 0.1 } else { avg };
        boosted.clamp(0.0, 1.0)
    };

    // A claim with any numeral is checkable; identifiers, dates, and status
    // tokens catch the digit-free remainder.
    let verifiable = claims
        .iter()
        .filter(|c| {
            c.chars().any(|ch| ch.is_ascii_digit())
                || cat.orders.iter().any(|re| re.is_match(c))
                || cat.dates.iter().any(|re| re.is_match(c))
                || !statuses_in(c).is_empty()
        })
        .count();

    HallucinationAssessment {
        score,
        level: classify(score),
        detections,
        factual_accuracy,
        verifiable_claims: verifiable,
        unverifiable_claims: claims.len() - verifiable,
        confidence,
        processing_ms: started.elapsed().as_secs_f64() * 1000.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shipping_row() -> serde_json::Value {
        json!({
            "order_id": "ORD-2024-001",
            "status": "in_transit",
            "estimated_delivery": "2024-08-26",
        })
    }

    #[test]
    fn mismatched_order_id_is_high_severity() {
        let row = shipping_row();
        let out = detect(
            "Your order ORD-9999-999 is in transit and should arrive on Aug 26, 2024.",
            Some(&row),
            None,
        );
        let order = out
            .detections
            .iter()
            .find(|d| d.kind == HallucinationKind::FactualInaccuracy && d.severity == Severity::High)
            .expect("order mismatch detected");
        assert!((order.confidence - 0.9).abs() < 1e-9);
        assert!(out.score >= 4.0, "score {}", out.score);
        assert!(out.factual_accuracy <= 0.8, "accuracy {}", out.factual_accuracy);
    }

    #[test]
    fn matching_response_stays_clean() {
        let row = shipping_row();
        let out = detect("Your order ORD-2024-001 is in transit.", Some(&row), None);
        assert!(out.detections.is_empty(), "{:?}", out.detections);
        assert!((out.confidence - 0.95).abs() < 1e-9);
        assert!(out.score < 2.0);
    }

    #[test]
    fn wrong_status_flags_medium_mismatch() {
        let row = shipping_row();
        let out = detect("Your order ORD-2024-001 was delivered yesterday.", Some(&row), None);
        assert!(out
            .detections
            .iter()
            .any(|d| d.severity == Severity::Medium && d.kind == HallucinationKind::FactualInaccuracy));
    }

    #[test]
    fn contradictory_statuses_in_one_text() {
        let out = detect(
            "The package was delivered this morning but it is still in transit to you.",
            None,
            None,
        );
        assert!(out.detections.iter().any(|d| d.kind == HallucinationKind::ContradictoryInfo));
    }

    #[test]
    fn absolute_quantifiers_are_low_severity() {
        let out = detect("Our couriers are never late, everyone knows that.", None, None);
        let lows: Vec<_> = out
            .detections
            .iter()
            .filter(|d| d.kind == HallucinationKind::UnverifiableClaim)
            .collect();
        assert_eq!(lows.len(), 2);
        assert!(lows.iter().all(|d| d.severity == Severity::Low));
    }

    #[test]
    fn numeric_claims_count_as_verifiable() {
        let out = detect("Your package will be there in 3 days.", None, None);
        assert!(out.detections.is_empty(), "{:?}", out.detections);
        assert_eq!(out.verifiable_claims, 1);
        assert_eq!(out.unverifiable_claims, 0);
    }

    #[test]
    fn digit_free_status_claims_stay_verifiable() {
        let out = detect("Your package is on the way.", None, None);
        assert_eq!(out.verifiable_claims, 1);
        assert_eq!(out.unverifiable_claims, 0);
    }

    #[test]
    fn status_synonyms_match_the_source() {
        let row = json!({ "status": "in_transit" });
        let out = detect("Your package is on the way and should reach you soon.", Some(&row), None);
        assert!(out.detections.is_empty(), "{:?}", out.detections);
    }

    #[test]
    fn score_and_accuracy_stay_in_range() {
        let row = shipping_row();
        for text in [
            "Order ORD-0000-000 was delivered; it is also in transit; it always arrives on 01/01/1999.",
            "Everything is fine.",
            "",
        ] {
            let out = detect(text, Some(&row), None);
            assert!((0.0..=10.0).contains(&out.score));
            assert!((0.0..=1.0).contains(&out.factual_accuracy));
            assert!((0.0..=1.0).contains(&out.confidence));
        }
    }
}
