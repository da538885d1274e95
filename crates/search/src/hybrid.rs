//! Lexical keyword scoring combined with vector similarity.
//!
//! The keyword score rewards candidates whose content or path contains the
//! query tokens, with a bonus for whole-word matches; the final score is a
//! weighted mix with the vector similarity. Deterministic: identical inputs
//! always produce identical scores.

use lodestone_core::SearchConfig;
use regex::Regex;

/// Minimum token length considered meaningful.
const MIN_TOKEN_LEN: usize = 3;

/// Per-query keyword scorer. Tokenization and word-boundary regexes are
/// built once per query, not per candidate.
#[derive(Debug)]
pub struct KeywordScorer {
  tokens: Vec<Token>,
}

#[derive(Debug)]
struct Token {
  text: String,
  whole_word: Regex,
}

impl KeywordScorer {
  /// Tokenize the query: whitespace split, lowercase, drop tokens shorter
  /// than three characters.
  pub fn new(query: &str) -> Self {
    let tokens = query
      .split_whitespace()
      .map(|t| t.to_lowercase())
      .filter(|t| t.len() >= MIN_TOKEN_LEN)
      .filter_map(|text| {
        let pattern = format!(r"\b{}\b", regex::escape(&text));
        Regex::new(&pattern).ok().map(|whole_word| Token { text, whole_word })
      })
      .collect();
    Self { tokens }
  }

  pub fn has_tokens(&self) -> bool {
    !self.tokens.is_empty()
  }

  /// Lexical score in [0, 1].
  ///
  /// Per token: content containment counts 1 toward the match total, a
  /// whole-word hit adds 0.5 bonus, path containment counts 0.5 toward the
  /// match total. Both parts normalize by the token count; the bonus is
  /// capped at 0.5 and the sum at 1.
  pub fn score(&self, content: &str, filepath: &str) -> f32 {
    if self.tokens.is_empty() {
      return 0.0;
    }

    let content_lower = content.to_lowercase();
    let path_lower = filepath.to_lowercase();

    let mut matches = 0.0f32;
    let mut bonus = 0.0f32;
    for token in &self.tokens {
      if content_lower.contains(&token.text) {
        matches += 1.0;
        if token.whole_word.is_match(&content_lower) {
          bonus += 0.5;
        }
      }
      if path_lower.contains(&token.text) {
        matches += 0.5;
      }
    }

    let count = self.tokens.len() as f32;
    let base = matches / count;
    let bonus = (bonus / count).min(0.5);
    (base + bonus).min(1.0)
  }
}

/// Weighted mix of vector similarity and keyword score.
pub fn combine(vector_score: f32, keyword_score: f32, weights: &SearchConfig) -> f32 {
  weights.semantic_weight * vector_score + weights.keyword_weight * keyword_score
}

/// Sort key: score descending, ties broken by path ascending then start
/// line ascending.
pub fn rank_order(a: &(f32, &str, u32), b: &(f32, &str, u32)) -> std::cmp::Ordering {
  b.0
    .partial_cmp(&a.0)
    .unwrap_or(std::cmp::Ordering::Equal)
    .then_with(|| a.1.cmp(b.1))
    .then_with(|| a.2.cmp(&b.2))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn weights() -> SearchConfig {
    SearchConfig::default()
  }

  #[test]
  fn test_no_usable_tokens_scores_zero() {
    let scorer = KeywordScorer::new("a of to");
    assert!(!scorer.has_tokens());
    assert_eq!(scorer.score("anything at all", "any.ts"), 0.0);
  }

  #[test]
  fn test_content_and_word_boundary() {
    let scorer = KeywordScorer::new("auth");
    // Whole word: 1.0 match + 0.5 bonus over one token
    let whole = scorer.score("the auth module", "utils.ts");
    assert!((whole - 1.0).abs() < 1e-6, "whole = {whole}");

    // Substring only: no word-boundary bonus
    let partial = scorer.score("authentication module", "utils.ts");
    assert!((partial - 1.0).abs() < 1e-6 || partial < whole, "partial = {partial}");
    assert!(partial <= whole);
  }

  #[test]
  fn test_path_containment() {
    let scorer = KeywordScorer::new("auth");
    let path_only = scorer.score("user data", "src/auth.ts");
    assert!((path_only - 0.5).abs() < 1e-6, "path_only = {path_only}");
  }

  #[test]
  fn test_score_bounded() {
    let scorer = KeywordScorer::new("auth token session");
    let score = scorer.score(
      "auth token session auth token session everywhere",
      "auth/token/session.ts",
    );
    assert!((0.0..=1.0).contains(&score));
  }

  #[test]
  fn test_deterministic() {
    let scorer = KeywordScorer::new("parse tree");
    let a = scorer.score("parse the tree", "parser.ts");
    let b = scorer.score("parse the tree", "parser.ts");
    assert_eq!(a, b);
  }

  #[test]
  fn test_case_insensitive() {
    let scorer = KeywordScorer::new("AUTH");
    assert!(scorer.score("Auth module", "x.ts") > 0.0);
  }

  #[test]
  fn test_regex_metacharacters_escaped() {
    let scorer = KeywordScorer::new("foo(bar)");
    // Must not panic or misbehave on regex metacharacters
    let score = scorer.score("calls foo(bar) here", "x.ts");
    assert!(score > 0.0);
  }

  #[test]
  fn test_keyword_boost_reranks() {
    // Candidate A: better vector score, no keyword hits
    // Candidate B: worse vector score, strong keyword hits
    let weights = weights();
    let scorer = KeywordScorer::new("auth");

    let a = combine(0.9, scorer.score("user data", "utils.ts"), &weights);
    let b = combine(0.7, scorer.score("auth function", "auth.ts"), &weights);
    assert!(b > a, "b = {b}, a = {a}");
  }

  #[test]
  fn test_combined_bounded_for_default_weights() {
    let weights = weights();
    let score = combine(1.0, 1.0, &weights);
    assert!(score <= 1.0 + 1e-6);
    assert!(combine(0.0, 0.0, &weights) >= 0.0);
  }

  #[test]
  fn test_rank_order_tie_breaks() {
    let mut hits = vec![
      (0.5f32, "b.ts", 10u32),
      (0.5f32, "a.ts", 20u32),
      (0.5f32, "a.ts", 5u32),
      (0.9f32, "z.ts", 1u32),
    ];
    hits.sort_by(rank_order);
    assert_eq!(hits[0].1, "z.ts");
    assert_eq!((hits[1].1, hits[1].2), ("a.ts", 5));
    assert_eq!((hits[2].1, hits[2].2), ("a.ts", 20));
    assert_eq!(hits[3].1, "b.ts");
  }
}
