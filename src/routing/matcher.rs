//! Hybrid utterance matching
//!
//! Three stages run in a fixed order and each adds candidates:
//!
//! 1. exact: trimmed, case-insensitive equality (confidence 1.0)
//! 2. regex: the utterance compiled case-insensitively and tested against the
//!    raw message (confidence 0.8); invalid patterns are skipped
//! 3. semantic: optional caller-supplied scorer; its failures are errors
//!
//! Candidates are ranked by match type priority, then confidence. The sort is
//! stable so equal candidates keep declaration order.

use crate::error::{BoxError, DispatchError, DispatchResult};
use async_trait::async_trait;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, trace};

pub const EXACT_CONFIDENCE: f64 = 1.0;
pub const REGEX_CONFIDENCE: f64 = 0.8;

/// How a candidate matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Regex,
    /// Substring match, only produced by the rule router
    Keyword,
    Semantic,
}

impl MatchType {
    /// Lower ranks first
    pub fn priority(self) -> u8 {
        match self {
            MatchType::Exact => 0,
            MatchType::Regex => 1,
            MatchType::Keyword => 2,
            MatchType::Semantic => 3,
        }
    }
}

/// One possible match for a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentCandidate {
    /// Id of the intent, agent or pipeline owning the utterance
    pub intent_id: String,
    pub confidence: f64,
    pub match_type: MatchType,
    pub matched_utterance: String,
}

/// Utterances owned by one routable target
#[derive(Debug, Clone, PartialEq)]
pub struct UtteranceSet {
    pub id: String,
    pub utterances: Vec<String>,
}

impl UtteranceSet {
    pub fn new(id: impl Into<String>, utterances: Vec<String>) -> Self {
        Self {
            id: id.into(),
            utterances,
        }
    }
}

/// Externally supplied similarity scorer
#[async_trait]
pub trait SemanticMatcher: Send + Sync {
    /// Confidence in `[0, 1]` that `message` means `utterance`, or `None` for no match
    async fn score(&self, message: &str, utterance: &str) -> Result<Option<f64>, BoxError>;
}

/// Winner plus every candidate, ranked
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    pub winner: Option<IntentCandidate>,
    pub candidates: Vec<IntentCandidate>,
}

/// Stateless matcher over utterance sets
pub struct IntentMatcher;

impl IntentMatcher {
    /// Run all stages and rank the candidates
    pub async fn match_utterances(
        message: &str,
        sets: &[UtteranceSet],
        semantic: Option<&dyn SemanticMatcher>,
    ) -> DispatchResult<MatchOutcome> {
        let mut candidates = Self::exact_candidates(message, sets);
        candidates.extend(Self::regex_candidates(message, sets));

        if let Some(semantic) = semantic {
            candidates.extend(Self::semantic_candidates(message, sets, semantic).await?);
        }

        Self::rank(&mut candidates);
        let winner = candidates.first().cloned();

        debug!(
            candidates = candidates.len(),
            winner = winner.as_ref().map(|c| c.intent_id.as_str()).unwrap_or("none"),
            "Utterance matching finished"
        );

        Ok(MatchOutcome { winner, candidates })
    }

    pub fn exact_candidates(message: &str, sets: &[UtteranceSet]) -> Vec<IntentCandidate> {
        let normalized = message.trim().to_lowercase();
        let mut found = Vec::new();

        for set in sets {
            for utterance in &set.utterances {
                if utterance.trim().to_lowercase() == normalized {
                    found.push(IntentCandidate {
                        intent_id: set.id.clone(),
                        confidence: EXACT_CONFIDENCE,
                        match_type: MatchType::Exact,
                        matched_utterance: utterance.clone(),
                    });
                }
            }
        }

        found
    }

    pub fn regex_candidates(message: &str, sets: &[UtteranceSet]) -> Vec<IntentCandidate> {
        let mut found = Vec::new();

        for set in sets {
            for utterance in &set.utterances {
                let pattern = match RegexBuilder::new(utterance).case_insensitive(true).build() {
                    Ok(pattern) => pattern,
                    Err(e) => {
                        trace!(utterance = %utterance, error = %e, "Skipping invalid utterance pattern");
                        continue;
                    }
                };
                if pattern.is_match(message) {
                    found.push(IntentCandidate {
                        intent_id: set.id.clone(),
                        confidence: REGEX_CONFIDENCE,
                        match_type: MatchType::Regex,
                        matched_utterance: utterance.clone(),
                    });
                }
            }
        }

        found
    }

    async fn semantic_candidates(
        message: &str,
        sets: &[UtteranceSet],
        semantic: &dyn SemanticMatcher,
    ) -> DispatchResult<Vec<IntentCandidate>> {
        let mut found = Vec::new();

        for set in sets {
            for utterance in &set.utterances {
                let score = semantic
                    .score(message, utterance)
                    .await
                    .map_err(DispatchError::matching)?;

                if let Some(confidence) = score.filter(|c| !c.is_nan()) {
                    found.push(IntentCandidate {
                        intent_id: set.id.clone(),
                        confidence: confidence.clamp(0.0, 1.0),
                        match_type: MatchType::Semantic,
                        matched_utterance: utterance.clone(),
                    });
                }
            }
        }

        Ok(found)
    }

    /// Stable sort: match type priority, then confidence descending
    pub fn rank(candidates: &mut [IntentCandidate]) {
        candidates.sort_by(|a, b| {
            a.match_type
                .priority()
                .cmp(&b.match_type.priority())
                .then_with(|| {
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(Ordering::Equal)
                })
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sets() -> Vec<UtteranceSet> {
        vec![
            UtteranceSet::new("greeting", vec!["hello".into(), "hi there".into()]),
            UtteranceSet::new("billing", vec!["invoice".into(), "^pay(ment)?".into()]),
            UtteranceSet::new("broken", vec!["(unclosed".into()]),
        ]
    }

    struct FixedScore(f64);

    #[async_trait]
    impl SemanticMatcher for FixedScore {
        async fn score(&self, _message: &str, utterance: &str) -> Result<Option<f64>, BoxError> {
            Ok((utterance == "invoice").then_some(self.0))
        }
    }

    struct Broken;

    #[async_trait]
    impl SemanticMatcher for Broken {
        async fn score(&self, _message: &str, _utterance: &str) -> Result<Option<f64>, BoxError> {
            Err("embedding service unavailable".into())
        }
    }

    #[tokio::test]
    async fn test_exact_match_wins() {
        let outcome = IntentMatcher::match_utterances("  HELLO ", &sets(), None)
            .await
            .unwrap();

        let winner = outcome.winner.unwrap();
        assert_eq!(winner.intent_id, "greeting");
        assert_eq!(winner.match_type, MatchType::Exact);
        assert_eq!(winner.confidence, EXACT_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_regex_match_on_raw_message() {
        let outcome = IntentMatcher::match_utterances("Payment overdue", &sets(), None)
            .await
            .unwrap();

        let winner = outcome.winner.unwrap();
        assert_eq!(winner.intent_id, "billing");
        assert_eq!(winner.match_type, MatchType::Regex);
        assert_eq!(winner.confidence, REGEX_CONFIDENCE);
        assert_eq!(winner.matched_utterance, "^pay(ment)?");
    }

    #[tokio::test]
    async fn test_invalid_pattern_skipped_silently() {
        let outcome = IntentMatcher::match_utterances("(unclosed", &sets(), None)
            .await
            .unwrap();

        // The exact stage still sees it; the regex stage skips it
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].match_type, MatchType::Exact);
    }

    #[tokio::test]
    async fn test_no_candidates_is_not_an_error() {
        let outcome = IntentMatcher::match_utterances("weather", &sets(), None)
            .await
            .unwrap();
        assert!(outcome.winner.is_none());
        assert!(outcome.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_semantic_ranks_below_regex() {
        let outcome =
            IntentMatcher::match_utterances("hello, about my invoice", &sets(), Some(&FixedScore(0.99)))
                .await
                .unwrap();

        let types: Vec<MatchType> = outcome.candidates.iter().map(|c| c.match_type).collect();
        assert_eq!(types, vec![MatchType::Regex, MatchType::Regex, MatchType::Semantic]);
        // Regex ties keep declaration order
        assert_eq!(outcome.winner.unwrap().intent_id, "greeting");
    }

    #[tokio::test]
    async fn test_semantic_confidence_clamped() {
        let outcome = IntentMatcher::match_utterances("bill me", &sets(), Some(&FixedScore(1.7)))
            .await
            .unwrap();
        assert_eq!(outcome.winner.unwrap().confidence, 1.0);
    }

    #[tokio::test]
    async fn test_semantic_failure_is_hard_error() {
        let result = IntentMatcher::match_utterances("anything", &sets(), Some(&Broken)).await;
        assert!(matches!(result, Err(DispatchError::Matching { .. })));
    }

    #[test]
    fn test_rank_orders_by_type_then_confidence() {
        let candidate = |id: &str, match_type, confidence| IntentCandidate {
            intent_id: id.to_string(),
            confidence,
            match_type,
            matched_utterance: String::new(),
        };
        let mut candidates = vec![
            candidate("s-high", MatchType::Semantic, 0.99),
            candidate("r", MatchType::Regex, 0.8),
            candidate("s-low", MatchType::Semantic, 0.4),
            candidate("e", MatchType::Exact, 1.0),
            candidate("s-high-2", MatchType::Semantic, 0.99),
        ];

        IntentMatcher::rank(&mut candidates);

        let ids: Vec<&str> = candidates.iter().map(|c| c.intent_id.as_str()).collect();
        assert_eq!(ids, vec!["e", "r", "s-high", "s-high-2", "s-low"]);
    }
}
