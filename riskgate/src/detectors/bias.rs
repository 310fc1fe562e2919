// riskgate/src/detectors/bias.rs
//
// Pattern-driven bias detection across nine pattern catalogs plus two
// heuristics: universal quantifiers over a group noun, and comparative
// claims across groups. Severity is fixed by kind.

use regex::Regex;
use std::sync::OnceLock;

use crate::config::DetectorConfig;
use crate::events::{BiasDetection, BiasKind, TextSpan};

use super::{char_span, context_snippet, dedup_by_overlap, final_confidence};

const BASE_CONFIDENCE: f64 = 0.80;
const QUANTIFIER_CONFIDENCE: f64 = 0.70;
const COMPARATIVE_CONFIDENCE: f64 = 0.80;
const CONTEXT_MARGIN: usize = 30;

// ── Pattern catalog ───────────────────────────────────────────────────────────

const BIAS_PATTERNS: &[(BiasKind, &str, &str)] = &[
    (BiasKind::Gender, r"(?:women|girls|females?)\s+(?:should|must|always|never)\s+(?:be|stay|remain|work)", "gender_prescription"),
    (BiasKind::Gender, r"(?:men|boys|males?)\s+are\s+(?:better|superior|stronger|smarter)", "gender_superiority"),
    (BiasKind::Gender, r"(?:housewife|homemaker|nurse|secretary)\s+is\s+(?:a\s+)?wom[ae]n'?s?\s+(?:job|role|duty)", "gender_role"),
    (BiasKind::Racial, r"(?:black|white|asian|hispanic|latino)\s+(?:people|person|individuals?)\s+(?:are|tend\s+to|usually)", "racial_generalization"),
    (BiasKind::Racial, r"racial\s+(?:stereotypes?|profiling|discrimination)", "racial_reference"),
    (BiasKind::Racial, r"(?:skin\s+colou?r|race|ethnicity)\s+(?:determines|affects|influences)", "race_determinism"),
    (BiasKind::Age, r"(?:old|elderly|senior)\s+(?:people|folks?|person)\s+(?:can't|cannot|are\s+unable|are\s+incapable)", "age_incapacity"),
    (BiasKind::Age, r"(?:young|teen(?:ager)?s?)\s+(?:people\s+)?are\s+(?:immature|irresponsible)", "youth_dismissal"),
    (BiasKind::Age, r"age\s+discrimination|ageism", "ageism_reference"),
    (BiasKind::Religious, r"(?:religious|faith)\s+people\s+are\s+(?:backward|primitive)", "religious_dismissal"),
    (BiasKind::Religious, r"(?:atheists?|agnostics?)\s+are\s+(?:immoral|untrustworthy)", "atheist_dismissal"),
    (BiasKind::Nationality, r"(?:immigrants?|foreigners?)\s+(?:are\s+all|all|always|take|steal)", "nationality_generalization"),
    (BiasKind::Nationality, r"(?:americans?|europeans?|africans?)\s+are\s+(?:all|always|never)", "national_stereotype"),
    (BiasKind::Stereotyping, r"(?:all|every|each)\s+(?:women|men|black|white|asian|hispanic|old|young)\s+(?:people\s+)?(?:are|behave|think)", "absolute_group_claim"),
    (BiasKind::Stereotyping, r"(?:typical|stereotypical)\s+(?:behavior|behaviour|trait|characteristic)", "stereotype_reference"),
    (BiasKind::Stereotyping, r"people\s+like\s+you|your\s+kind|those\s+people", "othering"),
    (BiasKind::HateSpeech, r"(?:hate|despise|loathe)\s+(?:all\s+|every\s+)?(?:women|men|black|white|asian|hispanic|gay|lesbian|trans)", "hate_expression"),
    (BiasKind::HateSpeech, r"(?:kill|harm|hurt)\s+(?:all|every)\s+(?:women|men|black|white|asian|hispanic)", "violent_hate"),
    (BiasKind::HateSpeech, r"(?:inferior|subhuman|worthless)\s+(?:race|people|group)", "dehumanization"),
    (BiasKind::Discrimination, r"(?:discriminate|exclude|reject)\s+(?:based\s+on|due\s+to|because\s+of)", "exclusion_basis"),
    (BiasKind::Discrimination, r"(?:only|exclusively)\s+(?:for|available\s+to)\s+(?:men|women|white|black|young|old)", "exclusive_access"),
    (BiasKind::Cultural, r"(?:western|eastern|american|european|asian)\s+(?:culture|values|standards)\s+(?:is|are)\s+(?:superior|better)", "cultural_supremacy"),
    (BiasKind::Cultural, r"(?:primitive|backward|uncivilized)\s+(?:culture|society|people)", "cultural_dismissal"),
    (BiasKind::Occupational, r"(?:nursing|teaching|caregiving)\s+is\s+(?:a\s+)?wom[ae]n'?s?\s+(?:work|profession|career)", "gendered_profession"),
    (BiasKind::Occupational, r"(?:engineering|construction|military)\s+is\s+(?:a\s+)?m[ae]n'?s?\s+(?:work|profession|career)", "gendered_profession"),
];

// Heuristic shapes classified by the group noun they quantify over.
const QUANTIFIER_PATTERNS: &[(&str, &str)] = &[
    (r"\b(?:all|every|no|none\s+of\s+the)\s+(?:women|men|black\s+people|white\s+people|asians?|hispanics?|old\s+people|young\s+people|immigrants?|foreigners?)\b", "universal_quantifier"),
    (r"\b(?:women|men|immigrants?|foreigners?)\s+(?:always|never)\b", "absolute_adverb"),
];

const COMPARATIVE_PATTERNS: &[(&str, &str)] = &[
    (r"\b(?:women|men|black\s+people|white\s+people|asians?|hispanics?|immigrants?)\s+are\s+(?:better|worse|superior|inferior|stronger|weaker|smarter|dumber)(?:\s+than)?\b", "group_comparison"),
    (r"\b(?:better|worse|superior|inferior)\s+than\s+(?:women|men|immigrants?|foreigners?)\b", "group_comparison"),
];

struct Catalog {
    fixed:        Vec<(BiasKind, Regex, &'static str)>,
    quantifiers:  Vec<(Regex, &'static str)>,
    comparatives: Vec<(Regex, &'static str)>,
}

static CATALOG: OnceLock<Catalog> = OnceLock::new();

fn catalog() -> &'static Catalog {
    CATALOG.get_or_init(|| Catalog {
        fixed: BIAS_PATTERNS
            .iter()
            .map(|(k, p, l)| {
                (*k, Regex::new(&format!(r"(?i)\b(?:{p})\b")).expect("bias pattern compile failed"), *l)
            })
            .collect(),
        quantifiers: QUANTIFIER_PATTERNS
            .iter()
            .map(|(p, l)| (Regex::new(&format!("(?i){p}")).expect("quantifier pattern compile failed"), *l))
            .collect(),
        comparatives: COMPARATIVE_PATTERNS
            .iter()
            .map(|(p, l)| (Regex::new(&format!("(?i){p}")).expect("comparative pattern compile failed"), *l))
            .collect(),
    })
}

/// Classify a heuristic hit by the group noun it mentions.
fn classify(matched: &str) -> BiasKind {
    let m = matched.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| m.contains(w));
    if has(&["women", "men", "female", "girl"]) {
        BiasKind::Gender
    } else if has(&["black", "white", "asian", "hispanic"]) {
        BiasKind::Racial
    } else if has(&["old", "young", "elderly", "teen"]) {
        BiasKind::Age
    } else if has(&["religious", "faith", "atheist"]) {
        BiasKind::Religious
    } else if has(&["immigrant", "foreigner", "american", "european"]) {
        BiasKind::Nationality
    } else {
        BiasKind::Stereotyping
    }
}

fn detection(text: &str, kind: BiasKind, bs: usize, be: usize, base: f64, label: &str) -> BiasDetection {
    let severity = kind.severity();
    let indicators = vec![label.to_string()];
    let context = context_snippet(text, bs, be, CONTEXT_MARGIN);
    let confidence = final_confidence(base, severity, context, indicators.len());
    let (start, end) = char_span(text, bs, be);
    BiasDetection {
        span: TextSpan { start, end, original_text: text[bs..be].to_string() },
        kind,
        severity,
        confidence,
        indicators,
    }
}

// Context words that mark the surrounding conversation as bias-sensitive.
const CONTEXT_INDICATORS: &[&str] = &[
    "discrimination", "bias", "prejudice", "stereotype", "racism", "sexism", "ageism",
];

/// Detect bias in `text`, optionally informed by surrounding conversation
/// context. Deterministic for a fixed (text, context, config).
pub fn detect(text: &str, context: Option<&str>, _cfg: &DetectorConfig) -> Vec<BiasDetection> {
    let cat = catalog();
    let mut found = Vec::new();

    for (kind, re, label) in &cat.fixed {
        for m in re.find_iter(text) {
            found.push(detection(text, *kind, m.start(), m.end(), BASE_CONFIDENCE, label));
        }
    }
    for (re, label) in &cat.quantifiers {
        for m in re.find_iter(text) {
            let kind = classify(m.as_str());
            found.push(detection(text, kind, m.start(), m.end(), QUANTIFIER_CONFIDENCE, label));
        }
    }
    for (re, label) in &cat.comparatives {
        for m in re.find_iter(text) {
            let kind = classify(m.as_str());
            found.push(detection(text, kind, m.start(), m.end(), COMPARATIVE_CONFIDENCE, label));
        }
    }

    if let Some(context) = context {
        let lowered = context.to_lowercase();
        if let Some(indicator) = CONTEXT_INDICATORS.iter().find(|w| lowered.contains(*w)) {
            let kind = classify(indicator);
            let severity = kind.severity();
            found.push(BiasDetection {
                span: TextSpan {
                    start: 0,
                    end: text.chars().count(),
                    original_text: text.chars().take(100).collect(),
                },
                kind,
                severity,
                confidence: final_confidence(0.6, severity, context, 2),
                indicators: vec![indicator.to_string(), "context_indicator".into()],
            });
        }
    }

    dedup_by_overlap(
        found,
        |d| (d.span.start, d.span.end),
        |a, b| a.kind == b.kind,
        |d| (d.confidence, 0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Severity;

    fn run(text: &str) -> Vec<BiasDetection> {
        detect(text, None, &DetectorConfig::default())
    }

    #[test]
    fn hate_speech_is_critical() {
        let text = "I truly hate all women and everything they stand for, and I want the world to know about it";
        let det = run(text);
        let hs = det.iter().find(|d| d.kind == BiasKind::HateSpeech).expect("hate speech detected");
        assert_eq!(hs.severity, Severity::Critical);
        assert!(hs.confidence > 0.5);
    }

    #[test]
    fn comparative_claim_classified_by_group() {
        let text = "It has been repeated in this forum many times that men are smarter than women, which is nonsense";
        let det = run(text);
        let cmp = det.iter().find(|d| d.indicators.contains(&"group_comparison".to_string()));
        let cmp = cmp.expect("comparative heuristic fired");
        assert_eq!(cmp.kind, BiasKind::Gender);
        assert_eq!(cmp.severity, Severity::High);
        assert!(cmp.confidence >= 0.7);
    }

    #[test]
    fn universal_quantifier_fires_at_lower_base() {
        let text = "Someone on the call kept insisting that all immigrants always game the benefits system somehow";
        let det = run(text);
        assert!(det.iter().any(|d| d.kind == BiasKind::Nationality));
    }

    #[test]
    fn severity_follows_kind_table() {
        assert_eq!(BiasKind::HateSpeech.severity(), Severity::Critical);
        assert_eq!(BiasKind::Discrimination.severity(), Severity::Critical);
        assert_eq!(BiasKind::Racial.severity(), Severity::High);
        assert_eq!(BiasKind::Gender.severity(), Severity::High);
        assert_eq!(BiasKind::Stereotyping.severity(), Severity::Medium);
        assert_eq!(BiasKind::Cultural.severity(), Severity::Medium);
        assert_eq!(BiasKind::Age.severity(), Severity::Low);
        assert_eq!(BiasKind::Nationality.severity(), Severity::Low);
    }

    #[test]
    fn clean_text_produces_nothing() {
        assert!(run("Could you summarize the quarterly shipping report for the team?").is_empty());
    }

    #[test]
    fn confidence_stays_clamped() {
        let text = "All women are bad, men are smarter than women, I hate all women, inferior race talk everywhere, \
                    discriminate based on gender, exclusively for men, western culture is superior to everything";
        for d in run(text) {
            assert!((0.0..=1.0).contains(&d.confidence), "confidence {} out of range", d.confidence);
        }
    }

    #[test]
    fn overlapping_detections_deduplicated() {
        // "men are smarter" triggers both the gender pattern and the
        // comparative heuristic on overlapping spans.
        let text = "There is an old claim floating around that men are smarter than everyone else in the room";
        let det = run(text);
        let gender_spans: Vec<_> = det.iter().filter(|d| d.kind == BiasKind::Gender).collect();
        assert_eq!(gender_spans.len(), 1);
    }
}
