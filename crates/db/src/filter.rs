//! SQL-ish predicate assembly for store queries.
//!
//! LanceDB filters are SQL WHERE fragments; this builder keeps the quoting
//! and escaping in one place so callers never concatenate raw strings.

/// Escape a string literal for a LanceDB predicate.
pub fn escape_sql(value: &str) -> String {
  value.replace('\'', "''")
}

/// Builder for conjunctive filters over the chunks table.
#[derive(Debug, Default)]
pub struct FilterBuilder {
  clauses: Vec<String>,
}

impl FilterBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// `column = 'value'`
  pub fn eq(mut self, column: &str, value: &str) -> Self {
    self.clauses.push(format!("{column} = '{}'", escape_sql(value)));
    self
  }

  pub fn eq_opt(self, column: &str, value: Option<&str>) -> Self {
    match value {
      Some(v) => self.eq(column, v),
      None => self,
    }
  }

  /// `column = <int>`
  pub fn eq_int(mut self, column: &str, value: i64) -> Self {
    self.clauses.push(format!("{column} = {value}"));
    self
  }

  /// `column LIKE 'pattern'` with SQL wildcards (`%`, `_`) in the pattern.
  pub fn like(mut self, column: &str, pattern: &str) -> Self {
    self.clauses.push(format!("{column} LIKE '{}'", escape_sql(pattern)));
    self
  }

  /// `column IN ('a', 'b', ...)`; an empty list adds no clause.
  pub fn any_of(mut self, column: &str, values: &[String]) -> Self {
    if values.is_empty() {
      return self;
    }
    let list = values
      .iter()
      .map(|v| format!("'{}'", escape_sql(v)))
      .collect::<Vec<_>>()
      .join(", ");
    self.clauses.push(format!("{column} IN ({list})"));
    self
  }

  /// Combined predicate, or None when no clause was added.
  pub fn build(self) -> Option<String> {
    if self.clauses.is_empty() {
      None
    } else {
      Some(self.clauses.join(" AND "))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_builds_none() {
    assert_eq!(FilterBuilder::new().build(), None);
  }

  #[test]
  fn test_eq_and_in() {
    let filter = FilterBuilder::new()
      .eq("file_path", "src/a.ts")
      .any_of("language", &["typescript".to_string(), "tsx".to_string()])
      .build()
      .unwrap();
    assert_eq!(filter, "file_path = 'src/a.ts' AND language IN ('typescript', 'tsx')");
  }

  #[test]
  fn test_escaping() {
    let filter = FilterBuilder::new().eq("file_path", "it's.ts").build().unwrap();
    assert_eq!(filter, "file_path = 'it''s.ts'");
  }

  #[test]
  fn test_like_clause() {
    let filter = FilterBuilder::new().like("file_path", "src/%").build().unwrap();
    assert_eq!(filter, "file_path LIKE 'src/%'");
  }

  #[test]
  fn test_like_escapes_quotes() {
    let filter = FilterBuilder::new().like("file_path", "%it's%").build().unwrap();
    assert_eq!(filter, "file_path LIKE '%it''s%'");
  }

  #[test]
  fn test_int_clause() {
    let filter = FilterBuilder::new().eq_int("concept_id", 3).build().unwrap();
    assert_eq!(filter, "concept_id = 3");
  }

  #[test]
  fn test_empty_in_list_is_no_clause() {
    assert_eq!(FilterBuilder::new().any_of("language", &[]).build(), None);
  }
}
