//! Concept clustering: k-means over chunk embeddings with TF-IDF keyword
//! extraction and label synthesis.
//!
//! Clustering is deterministic for a given seed so repeated runs over an
//! unchanged index produce identical cluster sets.

use std::{
  collections::{HashMap, HashSet},
  path::Path,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::IndexError;

const K_MIN: usize = 4;
const K_MAX: usize = 32;
const KEYWORDS_PER_CLUSTER: usize = 8;
const REPRESENTATIVES_PER_CLUSTER: usize = 5;

/// Tokens carrying no concept signal in source code.
const STOPWORDS: &[&str] = &[
  "the", "and", "for", "not", "with", "this", "that", "from", "are", "was", "were", "been", "have", "has", "had",
  "will", "would", "should", "could", "into", "out", "its", "can", "all", "get", "set", "let", "var", "const",
  "function", "return", "import", "export", "class", "interface", "type", "enum", "new", "void", "null", "undefined",
  "true", "false", "async", "await", "public", "private", "protected", "static", "readonly", "extends", "implements",
  "else", "while", "switch", "case", "break", "continue", "try", "catch", "finally", "throw", "typeof", "instanceof",
  "string", "number", "boolean", "object", "any", "self", "super", "use", "using", "value", "values", "name", "data",
];

/// Tunables for one clustering run.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
  /// Cluster count; None chooses `clamp(round(sqrt(N/2)), 4, 32)`
  pub k: Option<usize>,
  pub max_iter: usize,
  /// Stop when fewer than `epsilon * N` assignments change in a round
  pub epsilon: f64,
  pub seed: u64,
  /// Silhouette sample size cap
  pub sample_cap: usize,
  /// Recompute when chunk count drifts by more than this fraction
  pub drift_fraction: f64,
}

impl Default for ClusterConfig {
  fn default() -> Self {
    Self {
      k: None,
      max_iter: 50,
      epsilon: 0.01,
      seed: 42,
      sample_cap: 2000,
      drift_fraction: 0.10,
    }
  }
}

/// One concept cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptCluster {
  /// Dense id, 0-based
  pub id: i32,
  pub label: String,
  pub size: usize,
  pub keywords: Vec<String>,
  /// Chunk ids closest to the centroid
  pub representatives: Vec<String>,
  pub centroid: Vec<f32>,
}

/// A full clustering of the index, persisted to `clusters.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSet {
  pub k: usize,
  pub seed: u64,
  /// Mean silhouette, clamped to [0, 1] for display
  pub quality: f64,
  pub computed_at_chunk_count: usize,
  pub clusters: Vec<ConceptCluster>,
}

impl ClusterSet {
  pub fn load(path: &Path) -> Result<Option<Self>, IndexError> {
    if !path.exists() {
      return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&raw)?))
  }

  pub fn save(&self, path: &Path) -> Result<(), IndexError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
  }

  /// Whether the index has drifted enough to invalidate this clustering.
  pub fn is_stale(&self, current_chunk_count: usize, drift_fraction: f64) -> bool {
    if self.computed_at_chunk_count == 0 {
      return current_chunk_count > 0;
    }
    let drift = (current_chunk_count as f64 - self.computed_at_chunk_count as f64).abs()
      / self.computed_at_chunk_count as f64;
    drift > drift_fraction
  }

  pub fn cluster(&self, id: i32) -> Option<&ConceptCluster> {
    self.clusters.iter().find(|c| c.id == id)
  }
}

/// Cluster chunk embeddings into concepts.
///
/// `items` pairs each chunk id with its content (for keywords) and vector.
/// Returns the cluster set plus per-chunk assignments.
pub fn cluster_chunks(
  items: &[(String, String, Vec<f32>)],
  config: &ClusterConfig,
) -> (ClusterSet, Vec<(String, i32)>) {
  let n = items.len();
  let k = config.k.unwrap_or_else(|| choose_k(n)).clamp(1, n.max(1));

  info!(n, k, seed = config.seed, "clustering chunk embeddings");

  let normalized: Vec<Vec<f32>> = items.iter().map(|(_, _, v)| normalize(v)).collect();
  let (assignments, centroids) = kmeans(&normalized, k, config.max_iter, config.epsilon, config.seed);

  let quality = silhouette_sample(&normalized, &assignments, k, config.sample_cap, config.seed);

  let mut clusters = Vec::with_capacity(k);
  for cluster_id in 0..k {
    let member_indices: Vec<usize> = (0..n).filter(|&i| assignments[i] == cluster_id).collect();

    let keywords = top_keywords(items, &assignments, cluster_id, k);
    let label = synthesize_label(&keywords, cluster_id as i32);

    // Representatives: closest members to the centroid
    let mut by_distance: Vec<(usize, f32)> = member_indices
      .iter()
      .map(|&i| (i, cosine_distance(&normalized[i], &centroids[cluster_id])))
      .collect();
    by_distance.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    let representatives: Vec<String> = by_distance
      .iter()
      .take(REPRESENTATIVES_PER_CLUSTER)
      .map(|(i, _)| items[*i].0.clone())
      .collect();

    clusters.push(ConceptCluster {
      id: cluster_id as i32,
      label,
      size: member_indices.len(),
      keywords,
      representatives,
      centroid: centroids[cluster_id].clone(),
    });
  }

  let set = ClusterSet {
    k,
    seed: config.seed,
    quality,
    computed_at_chunk_count: n,
    clusters,
  };

  let chunk_assignments: Vec<(String, i32)> = items
    .iter()
    .zip(&assignments)
    .map(|((id, _, _), &cluster)| (id.clone(), cluster as i32))
    .collect();

  (set, chunk_assignments)
}

/// Default cluster count: `clamp(round(sqrt(N/2)), 4, 32)`.
pub fn choose_k(n: usize) -> usize {
  let k = ((n as f64 / 2.0).sqrt()).round() as usize;
  k.clamp(K_MIN, K_MAX)
}

// ============================================================================
// K-means
// ============================================================================

/// K-means over cosine-normalized vectors with k-means++ seeding.
///
/// Returns (assignments, centroids). Deterministic for a given seed.
fn kmeans(vectors: &[Vec<f32>], k: usize, max_iter: usize, epsilon: f64, seed: u64) -> (Vec<usize>, Vec<Vec<f32>>) {
  let n = vectors.len();
  if n == 0 || k == 0 {
    return (Vec::new(), Vec::new());
  }
  let k = k.min(n);

  let mut rng = SplitMix64::new(seed);
  let mut centroids = seed_plus_plus(vectors, k, &mut rng);
  let mut assignments = vec![0usize; n];
  let churn_floor = (epsilon * n as f64).max(1.0) as usize;

  for iteration in 0..max_iter {
    // Assignment step
    let mut changed = 0usize;
    for (i, vector) in vectors.iter().enumerate() {
      let nearest = nearest_centroid(vector, &centroids);
      if assignments[i] != nearest {
        assignments[i] = nearest;
        changed += 1;
      }
    }

    if iteration > 0 && changed < churn_floor {
      debug!(iteration, changed, "k-means converged");
      break;
    }

    // Update step
    let dim = vectors[0].len();
    let mut sums = vec![vec![0f32; dim]; k];
    let mut counts = vec![0usize; k];
    for (vector, &cluster) in vectors.iter().zip(&assignments) {
      counts[cluster] += 1;
      for (acc, value) in sums[cluster].iter_mut().zip(vector) {
        *acc += value;
      }
    }

    for cluster in 0..k {
      if counts[cluster] == 0 {
        // Re-seed an empty cluster from the point farthest from its centroid
        let farthest = (0..n)
          .max_by(|&a, &b| {
            let da = cosine_distance(&vectors[a], &centroids[assignments[a]]);
            let db = cosine_distance(&vectors[b], &centroids[assignments[b]]);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
          })
          .unwrap_or(0);
        centroids[cluster] = vectors[farthest].clone();
      } else {
        let mean: Vec<f32> = sums[cluster].iter().map(|s| s / counts[cluster] as f32).collect();
        centroids[cluster] = normalize(&mean);
      }
    }
  }

  (assignments, centroids)
}

/// k-means++ seeding: first centroid uniform, the rest weighted by squared
/// distance to the nearest chosen centroid.
fn seed_plus_plus(vectors: &[Vec<f32>], k: usize, rng: &mut SplitMix64) -> Vec<Vec<f32>> {
  let n = vectors.len();
  let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
  centroids.push(vectors[rng.next_below(n)].clone());

  while centroids.len() < k {
    let weights: Vec<f64> = vectors
      .iter()
      .map(|v| {
        let d = centroids
          .iter()
          .map(|c| cosine_distance(v, c) as f64)
          .fold(f64::INFINITY, f64::min);
        d * d
      })
      .collect();

    let total: f64 = weights.iter().sum();
    if total <= f64::EPSILON {
      // All points coincide with existing centroids
      centroids.push(vectors[rng.next_below(n)].clone());
      continue;
    }

    let mut target = rng.next_f64() * total;
    let mut chosen = n - 1;
    for (i, w) in weights.iter().enumerate() {
      target -= w;
      if target <= 0.0 {
        chosen = i;
        break;
      }
    }
    centroids.push(vectors[chosen].clone());
  }

  centroids
}

fn nearest_centroid(vector: &[f32], centroids: &[Vec<f32>]) -> usize {
  let mut best = 0;
  let mut best_distance = f32::INFINITY;
  for (i, centroid) in centroids.iter().enumerate() {
    let d = cosine_distance(vector, centroid);
    if d < best_distance {
      best_distance = d;
      best = i;
    }
  }
  best
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
  1.0 - a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>()
}

fn normalize(v: &[f32]) -> Vec<f32> {
  let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
  if norm <= f32::EPSILON {
    v.to_vec()
  } else {
    v.iter().map(|x| x / norm).collect()
  }
}

// ============================================================================
// Quality
// ============================================================================

/// Mean silhouette over a random sample, clamped to [0, 1] for display.
fn silhouette_sample(vectors: &[Vec<f32>], assignments: &[usize], k: usize, cap: usize, seed: u64) -> f64 {
  let n = vectors.len();
  if n < 2 || k < 2 {
    return 0.0;
  }

  let mut rng = SplitMix64::new(seed ^ 0x5117);
  let sample: Vec<usize> = if n <= cap {
    (0..n).collect()
  } else {
    let mut picked = HashSet::with_capacity(cap);
    while picked.len() < cap {
      picked.insert(rng.next_below(n));
    }
    picked.into_iter().collect()
  };

  let mut total = 0.0f64;
  let mut counted = 0usize;

  for &i in &sample {
    let own = assignments[i];
    let mut per_cluster_sum = vec![0f64; k];
    let mut per_cluster_count = vec![0usize; k];

    for &j in &sample {
      if i == j {
        continue;
      }
      let d = cosine_distance(&vectors[i], &vectors[j]) as f64;
      per_cluster_sum[assignments[j]] += d;
      per_cluster_count[assignments[j]] += 1;
    }

    if per_cluster_count[own] == 0 {
      continue; // Singleton in the sample
    }
    let a = per_cluster_sum[own] / per_cluster_count[own] as f64;

    let mut b = f64::INFINITY;
    for cluster in 0..k {
      if cluster != own && per_cluster_count[cluster] > 0 {
        b = b.min(per_cluster_sum[cluster] / per_cluster_count[cluster] as f64);
      }
    }
    if !b.is_finite() {
      continue;
    }

    total += (b - a) / a.max(b).max(f64::EPSILON);
    counted += 1;
  }

  if counted == 0 {
    return 0.0;
  }
  (total / counted as f64).clamp(0.0, 1.0)
}

// ============================================================================
// Keywords and labels
// ============================================================================

/// Code-friendly tokenizer: split on non-alphanumerics, lowercase, drop
/// stopwords and very short tokens.
pub fn tokenize_code(content: &str) -> Vec<String> {
  content
    .split(|c: char| !c.is_alphanumeric())
    .map(|t| t.to_lowercase())
    .filter(|t| t.len() >= 3 && !t.chars().all(|c| c.is_numeric()) && !STOPWORDS.contains(&t.as_str()))
    .collect()
}

/// Top keywords for one cluster by TF-IDF, with IDF computed over all
/// clusters as documents.
fn top_keywords(items: &[(String, String, Vec<f32>)], assignments: &[usize], cluster: usize, k: usize) -> Vec<String> {
  // Term frequency per cluster
  let mut cluster_tf: Vec<HashMap<String, usize>> = vec![HashMap::new(); k];
  for ((_, content, _), &assigned) in items.iter().zip(assignments) {
    for token in tokenize_code(content) {
      *cluster_tf[assigned].entry(token).or_insert(0) += 1;
    }
  }

  // Document frequency across clusters
  let mut df: HashMap<&str, usize> = HashMap::new();
  for tf in &cluster_tf {
    for token in tf.keys() {
      *df.entry(token.as_str()).or_insert(0) += 1;
    }
  }

  let tf = &cluster_tf[cluster];
  let mut scored: Vec<(&str, f64)> = tf
    .iter()
    .map(|(token, &count)| {
      let token_df = df.get(token.as_str()).copied().unwrap_or(1);
      let idf = ((k as f64 + 1.0) / (token_df as f64)).ln();
      (token.as_str(), count as f64 * idf)
    })
    .collect();

  scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(b.0)));
  scored
    .into_iter()
    .take(KEYWORDS_PER_CLUSTER)
    .map(|(token, _)| token.to_string())
    .collect()
}

/// Two-to-four-word title from the top keywords; falls back to
/// "Cluster {id}" when there is nothing to work with.
fn synthesize_label(keywords: &[String], id: i32) -> String {
  if keywords.is_empty() {
    return format!("Cluster {id}");
  }
  let words: Vec<String> = keywords.iter().take(3).map(|w| title_case(w)).collect();
  words.join(" ")
}

fn title_case(word: &str) -> String {
  let mut chars = word.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
    None => String::new(),
  }
}

// ============================================================================
// Deterministic PRNG
// ============================================================================

/// SplitMix64: small, fast, and deterministic for a given seed, which is
/// all the seeding and sampling here need.
struct SplitMix64 {
  state: u64,
}

impl SplitMix64 {
  fn new(seed: u64) -> Self {
    Self { state: seed }
  }

  fn next_u64(&mut self) -> u64 {
    self.state = self.state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = self.state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
  }

  fn next_f64(&mut self) -> f64 {
    (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
  }

  fn next_below(&mut self, n: usize) -> usize {
    (self.next_u64() % n.max(1) as u64) as usize
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn item(id: &str, content: &str, vector: Vec<f32>) -> (String, String, Vec<f32>) {
    (id.to_string(), content.to_string(), vector)
  }

  /// Two well-separated groups in 4 dimensions.
  fn two_groups() -> Vec<(String, String, Vec<f32>)> {
    let mut items = Vec::new();
    for i in 0..10 {
      items.push(item(
        &format!("auth.ts:{}-{}", i * 10 + 1, i * 10 + 9),
        "authenticate login session token password verify credentials",
        vec![1.0, 0.1 * i as f32 * 0.01, 0.0, 0.0],
      ));
    }
    for i in 0..10 {
      items.push(item(
        &format!("render.ts:{}-{}", i * 10 + 1, i * 10 + 9),
        "render canvas draw pixel sprite frame buffer",
        vec![0.0, 0.0, 1.0, 0.1 * i as f32 * 0.01],
      ));
    }
    items
  }

  #[test]
  fn test_choose_k_bounds() {
    assert_eq!(choose_k(1), 4);
    assert_eq!(choose_k(50), 5);
    assert_eq!(choose_k(200), 10);
    assert_eq!(choose_k(1_000_000), 32);
  }

  #[test]
  fn test_two_groups_separate() {
    let items = two_groups();
    let config = ClusterConfig {
      k: Some(2),
      ..Default::default()
    };
    let (set, assignments) = cluster_chunks(&items, &config);

    assert_eq!(set.k, 2);
    assert_eq!(set.clusters.len(), 2);
    assert_eq!(assignments.len(), 20);

    // All auth chunks share a cluster, all render chunks share the other
    let auth_cluster = assignments[0].1;
    for (id, cluster) in &assignments[..10] {
      assert_eq!(*cluster, auth_cluster, "chunk {id}");
    }
    let render_cluster = assignments[10].1;
    assert_ne!(auth_cluster, render_cluster);
    for (id, cluster) in &assignments[10..] {
      assert_eq!(*cluster, render_cluster, "chunk {id}");
    }

    // Dense ids, sizes add up
    let ids: Vec<i32> = set.clusters.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![0, 1]);
    assert_eq!(set.clusters.iter().map(|c| c.size).sum::<usize>(), 20);

    // Well-separated groups score high on silhouette
    assert!(set.quality > 0.5, "quality = {}", set.quality);
  }

  #[test]
  fn test_deterministic_for_seed() {
    let items = two_groups();
    let config = ClusterConfig {
      k: Some(2),
      seed: 7,
      ..Default::default()
    };
    let (set_a, assignments_a) = cluster_chunks(&items, &config);
    let (set_b, assignments_b) = cluster_chunks(&items, &config);
    assert_eq!(assignments_a, assignments_b);
    assert_eq!(set_a.quality, set_b.quality);
  }

  #[test]
  fn test_keywords_reflect_cluster_content() {
    let items = two_groups();
    let config = ClusterConfig {
      k: Some(2),
      ..Default::default()
    };
    let (set, assignments) = cluster_chunks(&items, &config);

    let auth_cluster = set.cluster(assignments[0].1).unwrap();
    assert!(
      auth_cluster.keywords.iter().any(|k| k == "authenticate" || k == "login" || k == "token"),
      "keywords: {:?}",
      auth_cluster.keywords
    );
    // Keywords from the other cluster must not dominate
    assert!(!auth_cluster.keywords.iter().any(|k| k == "canvas" || k == "sprite"));
    assert!(auth_cluster.keywords.len() <= KEYWORDS_PER_CLUSTER);
  }

  #[test]
  fn test_labels_and_representatives() {
    let items = two_groups();
    let config = ClusterConfig {
      k: Some(2),
      ..Default::default()
    };
    let (set, _) = cluster_chunks(&items, &config);

    for cluster in &set.clusters {
      assert!(!cluster.label.is_empty());
      assert!(cluster.representatives.len() <= REPRESENTATIVES_PER_CLUSTER);
      assert!(!cluster.representatives.is_empty());
      // Representatives are real chunk ids from this run
      for rep in &cluster.representatives {
        assert!(items.iter().any(|(id, _, _)| id == rep), "unknown representative {rep}");
      }
    }
  }

  #[test]
  fn test_k_capped_by_item_count() {
    let items: Vec<_> = (0..3)
      .map(|i| item(&format!("f.ts:{i}-{i}"), "alpha beta gamma", vec![i as f32, 1.0, 0.0]))
      .collect();
    let config = ClusterConfig {
      k: Some(10),
      ..Default::default()
    };
    let (set, assignments) = cluster_chunks(&items, &config);
    assert!(set.k <= 3);
    assert_eq!(assignments.len(), 3);
  }

  #[test]
  fn test_tokenizer_drops_noise() {
    let tokens = tokenize_code("const userToken = getAuth(42); // the token");
    assert!(tokens.contains(&"usertoken".to_string()));
    assert!(tokens.contains(&"getauth".to_string()));
    assert!(tokens.contains(&"token".to_string()));
    assert!(!tokens.contains(&"42".to_string()));
    assert!(!tokens.contains(&"the".to_string()));
    assert!(!tokens.contains(&"const".to_string()));
  }

  #[test]
  fn test_stale_detection() {
    let set = ClusterSet {
      k: 4,
      seed: 42,
      quality: 0.5,
      computed_at_chunk_count: 100,
      clusters: Vec::new(),
    };
    assert!(!set.is_stale(105, 0.10));
    assert!(set.is_stale(120, 0.10));
    assert!(set.is_stale(80, 0.10));
  }

  #[test]
  fn test_cluster_set_round_trip() {
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("clusters.json");

    let items = two_groups();
    let (set, _) = cluster_chunks(&items, &ClusterConfig::default());
    set.save(&path).unwrap();

    let loaded = ClusterSet::load(&path).unwrap().unwrap();
    assert_eq!(loaded.k, set.k);
    assert_eq!(loaded.clusters.len(), set.clusters.len());

    let json = std::fs::read_to_string(&path).unwrap();
    assert!(json.contains("\"computedAtChunkCount\""));
  }

  #[test]
  fn test_splitmix_is_deterministic() {
    let mut a = SplitMix64::new(99);
    let mut b = SplitMix64::new(99);
    for _ in 0..16 {
      assert_eq!(a.next_u64(), b.next_u64());
    }
    let f = SplitMix64::new(1).next_f64();
    assert!((0.0..1.0).contains(&f));
  }
}
