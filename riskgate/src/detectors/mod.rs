// riskgate/src/detectors/mod.rs
//
// Detector set. The orchestrator runs them in fixed order
// (adversarial → pii → bias); outputs are independent of each other.
// Shared here: char-offset span plumbing and overlap deduplication.

pub mod adversarial;
pub mod bias;
pub mod hallucination;
pub mod pii;

/// Convert a regex byte range into character offsets over `text`.
pub(crate) fn char_span(text: &str, byte_start: usize, byte_end: usize) -> (usize, usize) {
    let start = text[..byte_start].chars().count();
    let end   = start + text[byte_start..byte_end].chars().count();
    (start, end)
}

/// Byte offset of the `char_idx`-th character of `text`.
pub(crate) fn byte_offset(text: &str, char_idx: usize) -> usize {
    text.char_indices()
        .nth(char_idx)
        .map(|(b, _)| b)
        .unwrap_or(text.len())
}

/// Context snippet around a byte range (±`margin` bytes, snapped to char
/// boundaries). Used for the context-quality confidence term.
pub(crate) fn context_snippet(text: &str, byte_start: usize, byte_end: usize, margin: usize) -> &str {
    let mut lo = byte_start.saturating_sub(margin);
    while !text.is_char_boundary(lo) { lo -= 1; }
    let mut hi = (byte_end + margin).min(text.len());
    while !text.is_char_boundary(hi) { hi += 1; }
    &text[lo..hi]
}

/// Context-quality term: longer surrounding context means the pattern match
/// is less likely to be an artifact of truncation.
pub(crate) fn context_quality(context: &str) -> f64 {
    if context.is_empty() {
        0.5
    } else {
        (context.chars().count() as f64 / 100.0).min(1.0)
    }
}

/// Pattern-detector confidence: base × severity multiplier × context quality
/// × indicator uplift, clamped to [0, 1].
pub(crate) fn final_confidence(
    base: f64,
    severity: crate::events::Severity,
    context: &str,
    indicators: usize,
) -> f64 {
    use crate::events::Severity;
    let sev_mult = match severity {
        Severity::Critical => 1.3,
        Severity::High     => 1.2,
        Severity::Medium   => 1.0,
        Severity::Low      => 0.9,
    };
    let uplift = 1.0 + 0.1 * indicators as f64;
    (base * sev_mult * context_quality(context) * uplift).clamp(0.0, 1.0)
}

/// Drop conflicting overlapping detections, keeping the higher-ranked one.
/// `conflicts` decides whether two overlapping detections compete (PII: any
/// overlap; bias/adversarial: overlap of the same kind). `rank` yields
/// (confidence, tie-break priority); on a full tie the earlier-inserted
/// detection wins.
pub(crate) fn dedup_by_overlap<T>(
    items: Vec<T>,
    span: impl Fn(&T) -> (usize, usize),
    conflicts: impl Fn(&T, &T) -> bool,
    rank: impl Fn(&T) -> (f64, u8),
) -> Vec<T> {
    let mut sorted = items;
    sorted.sort_by_key(|d| span(d).0);

    let mut kept: Vec<T> = Vec::with_capacity(sorted.len());
    'outer: for item in sorted {
        let (start, end) = span(&item);
        for existing in kept.iter_mut() {
            let (es, ee) = span(existing);
            if start < ee && end > es && conflicts(&item, existing) {
                let (ic, ip) = rank(&item);
                let (ec, ep) = rank(existing);
                if ic > ec || (ic == ec && ip > ep) {
                    *existing = item;
                }
                continue 'outer;
            }
        }
        kept.push(item);
    }
    kept
}
