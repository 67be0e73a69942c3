//! Allow-list of continuation words.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Error, Result};

/// Byte-level BPE marker for a token that starts a new word.
pub const WORD_BOUNDARY_MARKER: &str = "\u{0120}";

/// Lowercased words the generator may continue with.
///
/// Entries are stored with the word-boundary marker already prefixed, so a
/// vocabulary surface form matches only when it is a whole word, never a
/// mid-word subtoken.
#[derive(Debug, Clone, Default)]
pub struct VocabularyAllowList {
    entries: HashSet<String>,
    marker: String,
}

impl VocabularyAllowList {
    /// Builds an allow-list from words, using the GPT-2 word-boundary marker.
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::with_marker(words, WORD_BOUNDARY_MARKER)
    }

    /// Builds an allow-list from words with an explicit boundary marker.
    pub fn with_marker<I, S>(words: I, marker: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = words
            .into_iter()
            .filter(|w| !w.as_ref().is_empty())
            .map(|w| format!("{marker}{}", w.as_ref().to_lowercase()))
            .collect();
        Self {
            entries,
            marker: marker.to_string(),
        }
    }

    /// Reads one word per line. Blank lines are skipped.
    pub fn from_reader<R: BufRead>(reader: R, marker: &str) -> Result<Self> {
        let lines = reader.lines().collect::<std::io::Result<Vec<String>>>()?;
        Ok(Self::with_marker(lines, marker))
    }

    /// Reads the word-list file at `path`.
    pub fn from_file(path: impl AsRef<Path>, marker: &str) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            Error::ResourceLoad(format!("failed to open word list {}: {e}", path.display()))
        })?;
        Self::from_reader(BufReader::new(file), marker)
            .map_err(|e| Error::ResourceLoad(format!("failed to read word list {}: {e}", path.display())))
    }

    /// Whether a vocabulary surface form is an allowed whole word.
    pub fn matches(&self, surface: &str) -> bool {
        self.entries.contains(surface)
    }

    /// Ids of vocabulary entries whose surface form is allowed.
    pub fn token_ids(&self, vocab: &HashMap<String, u32>) -> BTreeSet<u32> {
        vocab
            .iter()
            .filter(|(surface, _)| self.matches(surface))
            .map(|(_, &id)| id)
            .collect()
    }

    /// Number of distinct words.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list has no words.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The word-boundary marker in use.
    pub fn marker(&self) -> &str {
        &self.marker
    }
}
