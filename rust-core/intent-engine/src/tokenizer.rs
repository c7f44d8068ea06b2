//! WordPiece tokenization driven by the artifact's preprocessing descriptor
//!
//! Text is normalized (optionally lowercased with accents stripped), split on
//! whitespace and punctuation, and each word is segmented greedily into the
//! longest vocabulary pieces, continuation pieces carrying a `##` prefix. A
//! word that cannot be fully segmented becomes a single `[UNK]`. The sequence
//! is framed as `[CLS] ... [SEP]` and truncated to the configured length.

use crate::{EngineError, Result};
use model_export::AuxMetadata;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Aux metadata key holding the [`TokenizerDescriptor`]
pub const DESCRIPTOR_KEY: &str = "tokenizer";
/// Truncation length when the descriptor does not set one
pub const DEFAULT_MAX_LENGTH: usize = 512;
/// Longer words are not segmented and map straight to `[UNK]`
const MAX_WORD_CHARS: usize = 100;
const CONTINUATION_PREFIX: &str = "##";

/// Model inputs for one text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoding {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
}

impl Encoding {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// Turns request text into model inputs
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Encoding>;
}

/// Special token strings.
///
/// Requests are encoded one at a time, so no padding token is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecialTokens {
    pub unk: String,
    pub cls: String,
    pub sep: String,
}

impl Default for SpecialTokens {
    fn default() -> Self {
        Self {
            unk: "[UNK]".to_string(),
            cls: "[CLS]".to_string(),
            sep: "[SEP]".to_string(),
        }
    }
}

/// Serialized tokenizer settings; the token id is the position in `vocab`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenizerDescriptor {
    pub vocab: Vec<String>,
    #[serde(default = "default_lowercase")]
    pub lowercase: bool,
    #[serde(default)]
    pub special_tokens: SpecialTokens,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
}

fn default_lowercase() -> bool {
    true
}

fn default_max_length() -> usize {
    DEFAULT_MAX_LENGTH
}

impl TokenizerDescriptor {
    pub fn new(vocab: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            vocab: vocab.into_iter().map(Into::into).collect(),
            lowercase: true,
            special_tokens: SpecialTokens::default(),
            max_length: DEFAULT_MAX_LENGTH,
        }
    }

    /// Read the descriptor stored under [`DESCRIPTOR_KEY`]
    pub fn from_aux(aux: &AuxMetadata) -> Result<Self> {
        let value = aux.get(DESCRIPTOR_KEY).ok_or_else(|| {
            EngineError::Tokenizer(format!(
                "artifact metadata has no '{}' descriptor",
                DESCRIPTOR_KEY
            ))
        })?;
        serde_json::from_value(value.clone())
            .map_err(|e| EngineError::Tokenizer(format!("invalid tokenizer descriptor: {}", e)))
    }

    /// Store the descriptor under [`DESCRIPTOR_KEY`]
    pub fn insert_into(&self, aux: &mut AuxMetadata) -> Result<()> {
        let value = serde_json::to_value(self)
            .map_err(|e| EngineError::Tokenizer(format!("cannot serialize descriptor: {}", e)))?;
        aux.insert(DESCRIPTOR_KEY.to_string(), value);
        Ok(())
    }
}

/// Greedy longest-match-first WordPiece tokenizer
#[derive(Debug, Clone)]
pub struct WordPieceTokenizer {
    vocab: HashMap<String, i64>,
    lowercase: bool,
    unk_id: i64,
    cls_id: i64,
    sep_id: i64,
    max_length: usize,
}

impl WordPieceTokenizer {
    pub fn new(descriptor: &TokenizerDescriptor) -> Result<Self> {
        let mut vocab = HashMap::with_capacity(descriptor.vocab.len());
        for (id, token) in descriptor.vocab.iter().enumerate() {
            // First occurrence wins
            vocab.entry(token.clone()).or_insert(id as i64);
        }

        let lookup = |token: &str| {
            vocab.get(token).copied().ok_or_else(|| {
                EngineError::Tokenizer(format!("special token '{}' is not in the vocabulary", token))
            })
        };
        let special = &descriptor.special_tokens;
        let unk_id = lookup(&special.unk)?;
        let cls_id = lookup(&special.cls)?;
        let sep_id = lookup(&special.sep)?;

        let tokenizer = Self {
            vocab,
            lowercase: descriptor.lowercase,
            unk_id,
            cls_id,
            sep_id,
            max_length: 0,
        };
        tokenizer.with_max_length(descriptor.max_length)
    }

    pub fn from_aux(aux: &AuxMetadata) -> Result<Self> {
        Self::new(&TokenizerDescriptor::from_aux(aux)?)
    }

    /// Cap sequences at `max_length` tokens, framing included
    pub fn with_max_length(mut self, max_length: usize) -> Result<Self> {
        if max_length < 2 {
            return Err(EngineError::Tokenizer(format!(
                "max_length {} leaves no room for [CLS] and [SEP]",
                max_length
            )));
        }
        self.max_length = max_length;
        Ok(self)
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn token_id(&self, token: &str) -> Option<i64> {
        self.vocab.get(token).copied()
    }

    fn normalize(&self, text: &str) -> String {
        let cleaned = text.chars().filter(|c| !c.is_control() || c.is_whitespace());
        if self.lowercase {
            cleaned
                .nfd()
                .filter(|c| !is_combining_mark(*c))
                .flat_map(char::to_lowercase)
                .collect()
        } else {
            cleaned.collect()
        }
    }

    /// Whitespace-separated words with punctuation split into single-char words
    fn split_words(text: &str) -> Vec<&str> {
        let mut words = Vec::new();
        for chunk in text.split_whitespace() {
            let mut start = 0;
            for (i, ch) in chunk.char_indices() {
                if is_punctuation(ch) {
                    if start < i {
                        words.push(&chunk[start..i]);
                    }
                    let end = i + ch.len_utf8();
                    words.push(&chunk[i..end]);
                    start = end;
                }
            }
            if start < chunk.len() {
                words.push(&chunk[start..]);
            }
        }
        words
    }

    fn push_word_pieces(&self, word: &str, ids: &mut Vec<i64>) {
        if word.chars().count() > MAX_WORD_CHARS {
            ids.push(self.unk_id);
            return;
        }

        let mut pieces = Vec::new();
        let mut start = 0;
        while start < word.len() {
            let mut end = word.len();
            let mut matched = None;
            while start < end {
                let piece = &word[start..end];
                let id = if start == 0 {
                    self.vocab.get(piece)
                } else {
                    self.vocab.get(&format!("{}{}", CONTINUATION_PREFIX, piece))
                };
                if let Some(&id) = id {
                    matched = Some(id);
                    break;
                }
                // Drop the last char and retry
                end = start + piece.char_indices().last().map_or(0, |(i, _)| i);
            }

            match matched {
                Some(id) => {
                    pieces.push(id);
                    start = end;
                }
                None => {
                    ids.push(self.unk_id);
                    return;
                }
            }
        }
        ids.extend(pieces);
    }
}

impl Tokenizer for WordPieceTokenizer {
    fn encode(&self, text: &str) -> Result<Encoding> {
        let normalized = self.normalize(text);

        let mut input_ids = vec![self.cls_id];
        for word in Self::split_words(&normalized) {
            self.push_word_pieces(word, &mut input_ids);
            if input_ids.len() >= self.max_length {
                break;
            }
        }
        input_ids.truncate(self.max_length - 1);
        input_ids.push(self.sep_id);

        let attention_mask = vec![1; input_ids.len()];
        Ok(Encoding {
            input_ids,
            attention_mask,
        })
    }
}

fn is_punctuation(ch: char) -> bool {
    ch.is_ascii_punctuation() || !(ch.is_alphanumeric() || ch.is_whitespace())
}
