//! Tokenizers for mapped string fields
//!
//! # Analyzer resolution
//!
//! - n-gram analyzers found in the index settings → `LetterDigitNgramTokenizer`
//!   registered under the analyzer's own name (+ `LowerCaser` when the
//!   definition carries the `lowercase` filter)
//! - `standard` → tantivy `default`, `keyword` → `raw`, `english` → `en_stem`,
//!   `whitespace` → `whitespace`
//! - anything else falls back to `default`

use serde_json::Value;
use std::collections::BTreeSet;
use tantivy::tokenizer::{LowerCaser, TextAnalyzer, Token, TokenStream, Tokenizer};
use tantivy::Index;

use crate::features::analysis::{ngram_analyzers, NgramSpec};

pub const DEFAULT_TOKENIZER: &str = "default";

/// Character n-grams over runs of letters and digits.
///
/// Punctuation and whitespace split runs; grams never span two runs:
/// - `"ab-cd"` (2..2) → `["ab", "cd"]`
/// - `"rust"` (2..3) → `["ru", "rus", "us", "ust", "st"]`
#[derive(Debug, Clone)]
pub struct LetterDigitNgramTokenizer {
    min_gram: usize,
    max_gram: usize,
}

impl LetterDigitNgramTokenizer {
    pub fn new(min_gram: usize, max_gram: usize) -> Self {
        let min_gram = min_gram.max(1);
        Self {
            min_gram,
            max_gram: max_gram.max(min_gram),
        }
    }
}

impl Tokenizer for LetterDigitNgramTokenizer {
    type TokenStream<'a> = NgramTokenStream;

    fn token_stream<'a>(&'a mut self, text: &'a str) -> Self::TokenStream<'a> {
        NgramTokenStream {
            tokens: split_grams(text, self.min_gram, self.max_gram),
            current_index: 0,
        }
    }
}

pub struct NgramTokenStream {
    tokens: Vec<Token>,
    current_index: usize,
}

fn split_grams(text: &str, min_gram: usize, max_gram: usize) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut run: Vec<usize> = Vec::new();

    let flush = |run: &mut Vec<usize>, end: usize, tokens: &mut Vec<Token>| {
        for start in 0..run.len() {
            for len in min_gram..=max_gram {
                if start + len > run.len() {
                    break;
                }
                let offset_from = run[start];
                let offset_to = run.get(start + len).copied().unwrap_or(end);
                tokens.push(Token {
                    offset_from,
                    offset_to,
                    position: tokens.len(),
                    text: text[offset_from..offset_to].to_string(),
                    position_length: 1,
                });
            }
        }
        run.clear();
    };

    for (i, ch) in text.char_indices() {
        if ch.is_alphanumeric() {
            run.push(i);
        } else if !run.is_empty() {
            flush(&mut run, i, &mut tokens);
        }
    }
    if !run.is_empty() {
        flush(&mut run, text.len(), &mut tokens);
    }
    tokens
}

impl TokenStream for NgramTokenStream {
    fn advance(&mut self) -> bool {
        if self.current_index < self.tokens.len() {
            self.current_index += 1;
            true
        } else {
            false
        }
    }

    fn token(&self) -> &Token {
        &self.tokens[self.current_index - 1]
    }

    fn token_mut(&mut self) -> &mut Token {
        &mut self.tokens[self.current_index - 1]
    }
}

pub fn build_ngram_analyzer(spec: &NgramSpec) -> TextAnalyzer {
    let tokenizer = LetterDigitNgramTokenizer::new(spec.min_gram, spec.max_gram);
    if spec.lowercase {
        TextAnalyzer::builder(tokenizer).filter(LowerCaser).build()
    } else {
        TextAnalyzer::builder(tokenizer).build()
    }
}

/// Register every n-gram analyzer of `settings` on `index`; returns their names
pub fn register_analyzers(index: &Index, settings: &Value) -> BTreeSet<String> {
    ngram_analyzers(settings)
        .into_iter()
        .map(|(name, spec)| {
            index.tokenizers().register(&name, build_ngram_analyzer(&spec));
            name
        })
        .collect()
}

/// Tantivy tokenizer name for an analyzer name
pub fn tokenizer_for(analyzer: Option<&str>, registered: &BTreeSet<String>) -> String {
    match analyzer {
        Some(name) if registered.contains(name) => name.to_string(),
        Some("keyword") => "raw".to_string(),
        Some("english") => "en_stem".to_string(),
        Some("whitespace") => "whitespace".to_string(),
        _ => DEFAULT_TOKENIZER.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collect(analyzer: &mut TextAnalyzer, text: &str) -> Vec<String> {
        let mut stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }
        tokens
    }

    #[test]
    fn test_grams_stay_inside_runs() {
        let mut tokenizer = LetterDigitNgramTokenizer::new(2, 2);
        let mut stream = tokenizer.token_stream("ab-cd");

        let mut tokens = Vec::new();
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }

        assert_eq!(tokens, vec!["ab", "cd"]);
    }

    #[test]
    fn test_gram_range() {
        let mut analyzer = build_ngram_analyzer(&NgramSpec {
            min_gram: 2,
            max_gram: 3,
            lowercase: true,
        });
        assert_eq!(
            collect(&mut analyzer, "Rust"),
            vec!["ru", "rus", "us", "ust", "st"]
        );
    }

    #[test]
    fn test_short_runs_produce_nothing() {
        let mut analyzer = build_ngram_analyzer(&NgramSpec {
            min_gram: 3,
            max_gram: 3,
            lowercase: false,
        });
        assert!(collect(&mut analyzer, "a b").is_empty());
        assert_eq!(collect(&mut analyzer, "Go2x"), vec!["Go2", "o2x"]);
    }

    #[test]
    fn test_multibyte_offsets() {
        let mut analyzer = build_ngram_analyzer(&NgramSpec {
            min_gram: 2,
            max_gram: 2,
            lowercase: true,
        });
        assert_eq!(collect(&mut analyzer, "Čaj"), vec!["ča", "aj"]);
    }

    #[test]
    fn test_tokenizer_resolution() {
        let registered = BTreeSet::from(["ngram_2_3_analyzer".to_string()]);
        assert_eq!(tokenizer_for(Some("ngram_2_3_analyzer"), &registered), "ngram_2_3_analyzer");
        assert_eq!(tokenizer_for(Some("keyword"), &registered), "raw");
        assert_eq!(tokenizer_for(Some("standard"), &registered), "default");
        assert_eq!(tokenizer_for(None, &registered), "default");
    }

    #[test]
    fn test_register_from_settings() {
        let index = Index::create_in_ram(tantivy::schema::Schema::builder().build());
        let settings = json!({
            "analysis": {
                "analyzer": {
                    "ngram_2_3_analyzer": {"type": "custom", "tokenizer": "t", "filter": ["lowercase"]},
                    "plain": {"type": "custom", "tokenizer": "standard"},
                },
                "tokenizer": {"t": {"type": "nGram", "min_gram": 2, "max_gram": 3}}
            }
        });
        let names = register_analyzers(&index, &settings);
        assert_eq!(names, BTreeSet::from(["ngram_2_3_analyzer".to_string()]));
        assert!(index.tokenizers().get("ngram_2_3_analyzer").is_some());
    }
}
