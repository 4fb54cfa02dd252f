//! Closed word vocabulary built from the translation corpus.
//!
//! Layout:
//!
//! ```text
//! 0 <pad>   1 <sos>   2 <eos>   3 <unk>   4.. corpus words
//! ```
//!
//! Corpus words are lowercased, whitespace-split and kept in first-occurrence
//! order, so the same corpus always yields the same indices.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::SpecialTokens;
use crate::{Error, Result};

/// Word list used when the corpus is empty, so the pipeline stays runnable without data.
pub const DEFAULT_WORDS: &[&str] = &[
    "hello", "how", "are", "you", "my", "name", "is", "thank", "please", "help", "me",
    "goodbye", "see", "later", "what", "your", "i", "am", "fine", "nice", "to", "meet", "love",
    "where", "the", "bathroom", "john", "very", "much",
];

/// Lowercase whitespace tokenization shared by the vocabulary and tokenizer.
pub fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace().map(str::to_lowercase)
}

/// Bijective token ↔ index mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VocabularyFile", into = "VocabularyFile")]
pub struct Vocabulary {
    idx2word: Vec<String>,
    word2idx: HashMap<String, u32>,
    special: SpecialTokens,
}

impl Vocabulary {
    /// Build from every translation string in the corpus.
    pub fn build<S: AsRef<str>>(translations: &[S], special: &SpecialTokens) -> Result<Self> {
        special.validate()?;
        let mut vocab = Self::reserved_only(special);

        for text in translations {
            for word in words(text.as_ref()) {
                vocab.push(word);
            }
        }

        if vocab.len() == 4 {
            tracing::warn!(
                "empty translation corpus, using built-in default vocabulary ({} words)",
                DEFAULT_WORDS.len()
            );
            for word in DEFAULT_WORDS {
                vocab.push(word.to_string());
            }
        }

        tracing::info!("vocabulary built: {} tokens", vocab.len());
        Ok(vocab)
    }

    fn reserved_only(special: &SpecialTokens) -> Self {
        let idx2word: Vec<String> = special
            .ordered()
            .iter()
            .map(|(_, name)| name.to_string())
            .collect();
        let word2idx = idx2word
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i as u32))
            .collect();
        Self {
            idx2word,
            word2idx,
            special: *special,
        }
    }

    fn push(&mut self, word: String) {
        if !self.word2idx.contains_key(&word) {
            self.word2idx.insert(word.clone(), self.idx2word.len() as u32);
            self.idx2word.push(word);
        }
    }

    /// Rebuild from an index → word map (as persisted in a bundle).
    pub fn from_index_map(idx2word: &BTreeMap<u32, String>, special: &SpecialTokens) -> Result<Self> {
        special.validate()?;
        let tokens: Vec<String> = idx2word.values().cloned().collect();
        for (expected, &idx) in idx2word.keys().enumerate() {
            if idx as usize != expected {
                return Err(Error::Bundle(format!(
                    "vocabulary indices are not contiguous: expected {expected}, found {idx}"
                )));
            }
        }
        for (idx, name) in special.ordered() {
            if tokens.get(idx as usize).map(String::as_str) != Some(name) {
                return Err(Error::Bundle(format!("reserved token {name} missing at index {idx}")));
            }
        }
        let mut word2idx = HashMap::with_capacity(tokens.len());
        for (i, word) in tokens.iter().enumerate() {
            if word2idx.insert(word.clone(), i as u32).is_some() {
                return Err(Error::Bundle(format!("duplicate vocabulary token {word:?}")));
            }
        }
        Ok(Self {
            idx2word: tokens,
            word2idx,
            special: *special,
        })
    }

    pub fn len(&self) -> usize {
        self.idx2word.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idx2word.is_empty()
    }

    pub fn special(&self) -> &SpecialTokens {
        &self.special
    }

    /// Index of `word`, or `<unk>`.
    pub fn index_of(&self, word: &str) -> u32 {
        self.word2idx.get(word).copied().unwrap_or(self.special.unk)
    }

    pub fn get(&self, word: &str) -> Option<u32> {
        self.word2idx.get(word).copied()
    }

    pub fn token(&self, idx: u32) -> Option<&str> {
        self.idx2word.get(idx as usize).map(String::as_str)
    }

    /// Decode indices to text: stop at `<eos>`, skip `<pad>` and `<sos>`,
    /// out-of-range indices read as `<unk>`.
    pub fn decode(&self, indices: &[u32]) -> String {
        let mut out: Vec<&str> = Vec::new();
        for &idx in indices {
            if idx == self.special.eos {
                break;
            }
            if idx == self.special.pad || idx == self.special.sos {
                continue;
            }
            out.push(self.token(idx).unwrap_or(SpecialTokens::UNK));
        }
        out.join(" ")
    }

    /// word → index direction, sorted for stable serialization.
    pub fn word_to_index(&self) -> BTreeMap<String, u32> {
        self.word2idx.iter().map(|(w, &i)| (w.clone(), i)).collect()
    }

    /// index → word direction.
    pub fn index_to_word(&self) -> BTreeMap<u32, String> {
        self.idx2word
            .iter()
            .enumerate()
            .map(|(i, w)| (i as u32, w.clone()))
            .collect()
    }
}

/// Serialized form carrying both directions.
#[derive(Serialize, Deserialize)]
struct VocabularyFile {
    word2idx: BTreeMap<String, u32>,
    idx2word: BTreeMap<u32, String>,
    special: SpecialTokens,
}

impl From<Vocabulary> for VocabularyFile {
    fn from(vocab: Vocabulary) -> Self {
        Self {
            word2idx: vocab.word_to_index(),
            idx2word: vocab.index_to_word(),
            special: vocab.special,
        }
    }
}

impl TryFrom<VocabularyFile> for Vocabulary {
    type Error = Error;

    fn try_from(file: VocabularyFile) -> Result<Self> {
        let vocab = Vocabulary::from_index_map(&file.idx2word, &file.special)?;
        if vocab.word_to_index() != file.word2idx {
            return Err(Error::Bundle(
                "word2idx and idx2word disagree".to_string(),
            ));
        }
        Ok(vocab)
    }
}
