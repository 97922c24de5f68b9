pub mod ambiguity;
pub mod board;
pub mod config;
pub mod corpus;
#[cfg(feature = "pokeapi")]
pub mod pokeapi;
pub mod question;
pub mod translate;
pub mod usage;
#[cfg(feature = "web")]
pub mod web;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use ambiguity::{Ambiguity, AmbiguityResolver};
pub use board::{BoardError, BoardSnapshot, HostGate, Role, SharedQuestionBoard};
pub use config::{DataPaths, QuizSettings};
pub use corpus::{ReferenceCorpus, ReferenceEntry, StatLine};
pub use question::{GenerationError, Question, QuestionGenerator, StatQuestion};
pub use translate::{
    CachedTranslator, CorpusTranslator, EntityIdentity, IdentityScript, NameTranslationPort,
    ScriptConverter,
};
pub use usage::{UsageRecord, UsageRepository};

const ARTWORK_BASE: &str =
    "https://raw.githubusercontent.com/PokeAPI/sprites/master/sprites/pokemon/other/official-artwork";

/// Canonical lookup key: trimmed, lowercase, spaces folded to hyphens.
///
/// `"Close Combat"` and `"close-combat"` both become `close-combat`. Applying it
/// twice yields the same key.
pub fn normalize_key(raw: &str) -> String {
    raw.trim().to_lowercase().replace(' ', "-")
}

/// Official artwork sprite for a species id.
pub fn artwork_url(id: u32) -> String {
    format!("{ARTWORK_BASE}/{id}.png")
}

/// Display strings for one entity or move in the three quiz locales.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayNames {
    pub zh: String,
    pub ja: String,
    pub en: String,
}

impl DisplayNames {
    pub fn new(zh: impl Into<String>, ja: impl Into<String>, en: impl Into<String>) -> Self {
        Self {
            zh: zh.into(),
            ja: ja.into(),
            en: en.into(),
        }
    }

    /// Every locale set to the untranslated identifier.
    pub fn raw(name: &str) -> Self {
        Self::new(name, name, name)
    }

    /// Markdown card used for clue moves: bold Chinese, Japanese, italic English.
    pub fn render(&self) -> String {
        format!("**{}**\n\n{}\n\n*{}*", self.zh, self.ja, self.en)
    }
}

impl fmt::Display for DisplayNames {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {} | {}", self.zh, self.ja, self.en)
    }
}

/// Failure while reading one on-disk dataset.
#[derive(Debug)]
pub enum LoadError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Index(fst::Error),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Io(err) => write!(f, "io error: {err}"),
            LoadError::Json(err) => write!(f, "malformed json: {err}"),
            LoadError::Index(err) => write!(f, "failed to build key index: {err}"),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Io(err) => Some(err),
            LoadError::Json(err) => Some(err),
            LoadError::Index(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for LoadError {
    fn from(value: std::io::Error) -> Self {
        LoadError::Io(value)
    }
}

impl From<serde_json::Error> for LoadError {
    fn from(value: serde_json::Error) -> Self {
        LoadError::Json(value)
    }
}

impl From<fst::Error> for LoadError {
    fn from(value: fst::Error) -> Self {
        LoadError::Index(value)
    }
}
