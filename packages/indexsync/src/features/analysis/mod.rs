//! Index analysis settings
//!
//! Fields may name an analyzer. Analyzers that are not built into the engine
//! contribute an `{"analysis": {...}}` fragment to the index settings; the
//! fragments of every field of an index are deep-merged before the settings
//! are pushed.
//!
//! # Merge rules
//!
//! - maps: union, merged recursively on shared keys
//! - lists: concatenated (items already present are not repeated)
//! - scalars: equal values are accepted, different values are a
//!   `ConfigError::SettingsConflict`

use serde_json::{json, Map, Value};

use crate::config::{ConfigError, ConfigResult};

/// Named analyzer, optionally carrying the settings that define it
#[derive(Debug, Clone, PartialEq)]
pub struct Analyzer {
    name: String,
    settings: Option<Value>,
}

impl Analyzer {
    /// Analyzer the engine already knows (`standard`, `keyword`, ...)
    pub fn builtin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: None,
        }
    }

    /// Analyzer defined by an explicit settings fragment
    pub fn custom(name: impl Into<String>, settings: Value) -> Self {
        Self {
            name: name.into(),
            settings: Some(settings),
        }
    }

    /// Character n-gram analyzer over letter/digit runs, lowercased
    ///
    /// ```rust
    /// use indexsync::Analyzer;
    ///
    /// let analyzer = Analyzer::ngram(2, 4);
    /// assert_eq!(analyzer.name(), "ngram_2_4_analyzer");
    /// ```
    pub fn ngram(min_gram: usize, max_gram: usize) -> Self {
        let base = format!("ngram_{}_{}", min_gram, max_gram);
        let analyzer = format!("{}_analyzer", base);
        let tokenizer = format!("{}_tokenizer", base);

        let settings = json!({
            "analysis": {
                "analyzer": {
                    (analyzer.clone()): {
                        "type": "custom",
                        "tokenizer": tokenizer.clone(),
                        "filter": ["lowercase"],
                    }
                },
                "tokenizer": {
                    (tokenizer): {
                        "type": "nGram",
                        "min_gram": min_gram,
                        "max_gram": max_gram,
                        "token_chars": ["letter", "digit"],
                    }
                }
            }
        });

        Self {
            name: analyzer,
            settings: Some(settings),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> Option<&Value> {
        self.settings.as_ref()
    }
}

/// N-gram definition recovered from merged index settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NgramSpec {
    pub min_gram: usize,
    pub max_gram: usize,
    pub lowercase: bool,
}

/// Every analyzer in `settings` whose tokenizer is an n-gram tokenizer
pub fn ngram_analyzers(settings: &Value) -> Vec<(String, NgramSpec)> {
    let analysis = &settings["analysis"];
    let Some(analyzers) = analysis["analyzer"].as_object() else {
        return Vec::new();
    };

    analyzers
        .iter()
        .filter_map(|(name, definition)| {
            let tokenizer = &analysis["tokenizer"][definition["tokenizer"].as_str()?];
            let kind = tokenizer["type"].as_str()?;
            if !kind.eq_ignore_ascii_case("ngram") {
                return None;
            }
            let lowercase = definition["filter"]
                .as_array()
                .is_some_and(|filters| filters.iter().any(|f| f == "lowercase"));
            Some((
                name.clone(),
                NgramSpec {
                    min_gram: tokenizer["min_gram"].as_u64()? as usize,
                    max_gram: tokenizer["max_gram"].as_u64()? as usize,
                    lowercase,
                },
            ))
        })
        .collect()
}

/// Deep-merge `contribution` into `target`
pub fn merge_settings(target: &mut Value, contribution: &Value) -> ConfigResult<()> {
    merge_at(target, contribution, &mut Vec::new())
}

fn merge_at(target: &mut Value, contribution: &Value, path: &mut Vec<String>) -> ConfigResult<()> {
    match (target, contribution) {
        (Value::Object(left), Value::Object(right)) => merge_maps(left, right, path),
        (Value::Array(left), Value::Array(right)) => {
            for item in right {
                if !left.contains(item) {
                    left.push(item.clone());
                }
            }
            Ok(())
        }
        (left, right) if *left == *right => Ok(()),
        (left, right) => Err(ConfigError::SettingsConflict {
            path: path.join("."),
            left: left.to_string(),
            right: right.to_string(),
        }),
    }
}

fn merge_maps(
    left: &mut Map<String, Value>,
    right: &Map<String, Value>,
    path: &mut Vec<String>,
) -> ConfigResult<()> {
    for (key, value) in right {
        match left.get_mut(key) {
            Some(existing) => {
                path.push(key.clone());
                merge_at(existing, value, path)?;
                path.pop();
            }
            None => {
                left.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_ngram_settings_shape() {
        let analyzer = Analyzer::ngram(2, 4);
        let settings = analyzer.settings().unwrap();

        assert_eq!(
            settings["analysis"]["analyzer"]["ngram_2_4_analyzer"]["tokenizer"],
            json!("ngram_2_4_tokenizer")
        );
        assert_eq!(
            settings["analysis"]["tokenizer"]["ngram_2_4_tokenizer"]["token_chars"],
            json!(["letter", "digit"])
        );
    }

    #[test]
    fn test_builtin_has_no_settings() {
        assert!(Analyzer::builtin("standard").settings().is_none());
    }

    #[test]
    fn test_ngram_analyzers_roundtrip() {
        let mut merged = json!({});
        merge_settings(&mut merged, Analyzer::ngram(2, 3).settings().unwrap()).unwrap();
        merge_settings(&mut merged, Analyzer::ngram(3, 5).settings().unwrap()).unwrap();

        let found = ngram_analyzers(&merged);
        assert_eq!(found.len(), 2);
        assert_eq!(
            found[0],
            (
                "ngram_2_3_analyzer".to_string(),
                NgramSpec {
                    min_gram: 2,
                    max_gram: 3,
                    lowercase: true
                }
            )
        );
    }

    #[test]
    fn test_same_analyzer_twice_is_stable() {
        let ngram = Analyzer::ngram(2, 4);
        let mut merged = json!({});
        merge_settings(&mut merged, ngram.settings().unwrap()).unwrap();
        merge_settings(&mut merged, ngram.settings().unwrap()).unwrap();
        assert_eq!(&merged, ngram.settings().unwrap());
    }

    #[test]
    fn test_conflicting_scalars() {
        let mut merged = json!({"analysis": {"tokenizer": {"t": {"min_gram": 2}}}});
        let err = merge_settings(
            &mut merged,
            &json!({"analysis": {"tokenizer": {"t": {"min_gram": 3}}}}),
        )
        .unwrap_err();

        match err {
            ConfigError::SettingsConflict { path, left, right } => {
                assert_eq!(path, "analysis.tokenizer.t.min_gram");
                assert_eq!(left, "2");
                assert_eq!(right, "3");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_lists_concatenate() {
        let mut merged = json!({"filter": ["lowercase"]});
        merge_settings(&mut merged, &json!({"filter": ["asciifolding"]})).unwrap();
        assert_eq!(merged, json!({"filter": ["lowercase", "asciifolding"]}));
    }

    fn flat_map() -> impl Strategy<Value = Value> {
        prop::collection::btree_map("[a-d]", 0i64..3, 0..4)
            .prop_map(|m| Value::Object(m.into_iter().map(|(k, v)| (k, json!(v))).collect()))
    }

    proptest! {
        #[test]
        fn prop_merge_with_self_is_identity(settings in flat_map()) {
            let mut merged = settings.clone();
            merge_settings(&mut merged, &settings).unwrap();
            prop_assert_eq!(merged, settings);
        }

        #[test]
        fn prop_merge_keeps_every_key(left in flat_map(), right in flat_map()) {
            let mut merged = left.clone();
            match merge_settings(&mut merged, &right) {
                Ok(()) => {
                    let merged = merged.as_object().unwrap();
                    for key in left.as_object().unwrap().keys().chain(right.as_object().unwrap().keys()) {
                        prop_assert!(merged.contains_key(key));
                    }
                }
                Err(ConfigError::SettingsConflict { path, .. }) => {
                    prop_assert_ne!(&left[&path], &right[&path]);
                }
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
        }
    }
}
