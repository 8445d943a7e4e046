//! Hallucination filtering for transcription results.
//!
//! Speech models fed marginal audio emit recognizable garbage: bullet
//! fill, repeated single characters, subtitle credits. Every produced text
//! passes through these rules before emission; rejections are counted, not
//! errored.

use std::collections::HashSet;

use crate::stt::SttOutcome;

/// Minimum distinct non-space characters for a plausible utterance.
const MIN_UNIQUE_CHARS: usize = 5;

/// Bullet-character share at or above which the text is fill.
const BULLET_RATIO_LIMIT: f64 = 0.5;

/// Why a transcription was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Empty or whitespace-only text.
    Empty,
    /// Mostly U+2022 bullets.
    BulletFill,
    /// Fewer than five distinct non-space characters.
    LowCardinality,
    /// Matched a configured hallucination phrase.
    PhraseMatch,
}

impl RejectReason {
    /// Short identifier for logs and counters.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::BulletFill => "bullet_fill",
            Self::LowCardinality => "low_cardinality",
            Self::PhraseMatch => "phrase_match",
        }
    }
}

/// Configurable result filter applied to both STT backends.
pub struct HallucinationFilter {
    /// Case-folded substrings that reject a result.
    phrases: Vec<String>,
}

impl HallucinationFilter {
    /// Builds a filter from configured phrases (case-folded once here).
    #[must_use]
    pub fn new(phrases: &[String]) -> Self {
        Self {
            phrases: phrases.iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// Checks one text, returning the first matching rejection rule.
    #[must_use]
    pub fn evaluate(&self, text: &str) -> Option<RejectReason> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Some(RejectReason::Empty);
        }

        let total_chars = text.chars().count();
        let bullets = text.chars().filter(|&c| c == '\u{2022}').count();
        if bullets as f64 / total_chars as f64 >= BULLET_RATIO_LIMIT {
            return Some(RejectReason::BulletFill);
        }

        let unique: HashSet<char> = text.chars().filter(|c| *c != ' ').collect();
        if unique.len() < MIN_UNIQUE_CHARS {
            return Some(RejectReason::LowCardinality);
        }

        let folded = text.to_lowercase();
        if self.phrases.iter().any(|p| folded.contains(p)) {
            return Some(RejectReason::PhraseMatch);
        }

        None
    }

    /// Downgrades a `Transcribed` outcome to `Filtered` when a rule hits.
    #[must_use]
    pub fn apply(&self, outcome: SttOutcome) -> SttOutcome {
        match outcome {
            SttOutcome::Transcribed(raw) => match self.evaluate(&raw.text) {
                Some(reason) => SttOutcome::Filtered(reason),
                None => SttOutcome::Transcribed(raw),
            },
            other => other,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stt::RawTranscription;

    fn filter() -> HallucinationFilter {
        HallucinationFilter::new(&[
            "thanks for watching".to_string(),
            "sous-titrage".to_string(),
        ])
    }

    #[test]
    fn accepts_ordinary_speech() {
        assert_eq!(
            filter().evaluate("Le compresseur fait un bruit anormal au démarrage."),
            None
        );
    }

    #[test]
    fn rejects_empty_and_whitespace() {
        assert_eq!(filter().evaluate(""), Some(RejectReason::Empty));
        assert_eq!(filter().evaluate("   \n\t"), Some(RejectReason::Empty));
    }

    #[test]
    fn rejects_bullet_fill() {
        assert_eq!(
            filter().evaluate("• • • • • • • • • • • •"),
            Some(RejectReason::BulletFill)
        );
    }

    #[test]
    fn tolerates_a_single_bullet_in_real_text() {
        assert_eq!(
            filter().evaluate("Vérifier les points suivants • pression et débit"),
            None
        );
    }

    #[test]
    fn rejects_low_cardinality() {
        assert_eq!(
            filter().evaluate("ah ah ah ah ah"),
            Some(RejectReason::LowCardinality)
        );
    }

    #[test]
    fn rejects_configured_phrases_case_insensitively() {
        assert_eq!(
            filter().evaluate("Thanks for WATCHING!"),
            Some(RejectReason::PhraseMatch)
        );
        assert_eq!(
            filter().evaluate("Sous-titrage par la communauté"),
            Some(RejectReason::PhraseMatch)
        );
    }

    #[test]
    fn apply_passes_non_transcribed_outcomes_through() {
        let outcome = filter().apply(SttOutcome::Transient("timeout".into()));
        assert!(matches!(outcome, SttOutcome::Transient(_)));
    }

    #[test]
    fn apply_downgrades_hallucinated_text() {
        let outcome = filter().apply(SttOutcome::Transcribed(RawTranscription {
            text: "• • • •".into(),
            language: None,
            duration: None,
            confidence: None,
        }));
        assert!(matches!(
            outcome,
            SttOutcome::Filtered(RejectReason::BulletFill)
        ));
    }
}
