use std::collections::HashSet;
use std::path::PathBuf;

use once_cell::sync::Lazy;

use crate::normalize_key;

pub const DEFAULT_TOP_N: usize = 200;
pub const DEFAULT_MOVE_POOL: usize = 20;
pub const DEFAULT_CLUES: usize = 1;
pub const DEFAULT_DECOYS: usize = 3;
pub const DEFAULT_MAX_ATTEMPTS: usize = 8;

/// Moves nearly every species can run. They make poor clues and worse decoys.
pub const DEFAULT_BANNED_MOVES: &[&str] = &[
    "protect",
    "tera-blast",
    "substitute",
    "rest",
    "sleep-talk",
    "endure",
    "facade",
    "helping-hand",
];

static DEFAULT_DENYLIST: Lazy<HashSet<String>> = Lazy::new(|| {
    DEFAULT_BANNED_MOVES
        .iter()
        .map(|name| name.to_string())
        .collect()
});

/// Tunables for loading usage data and assembling questions.
#[derive(Debug, Clone)]
pub struct QuizSettings {
    /// Only the first `top_n` records of every usage file are kept.
    pub top_n: usize,
    /// Per-entity cap applied to each source's move list.
    pub move_pool: usize,
    pub clues: usize,
    pub decoys: usize,
    /// Upper bound on target draws before generation gives up.
    pub max_attempts: usize,
    pub denylist: HashSet<String>,
}

impl Default for QuizSettings {
    fn default() -> Self {
        Self {
            top_n: DEFAULT_TOP_N,
            move_pool: DEFAULT_MOVE_POOL,
            clues: DEFAULT_CLUES,
            decoys: DEFAULT_DECOYS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            denylist: DEFAULT_DENYLIST.clone(),
        }
    }
}

impl QuizSettings {
    /// Replaces the denylist, normalizing every entry.
    pub fn with_denylist<I, S>(mut self, moves: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.denylist = moves
            .into_iter()
            .map(|name| normalize_key(name.as_ref()))
            .collect();
        self
    }

    pub fn is_banned(&self, move_name: &str) -> bool {
        self.denylist.contains(&normalize_key(move_name))
    }

    /// Requested clue-set size before deduplication.
    pub fn question_size(&self) -> usize {
        self.clues.saturating_add(self.decoys)
    }
}

/// Where the usage dataset and the reference caches live on disk.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub usage_dir: PathBuf,
    pub move_corpus: PathBuf,
    pub stat_corpus: PathBuf,
}

impl Default for DataPaths {
    fn default() -> Self {
        Self {
            usage_dir: PathBuf::from("json_data"),
            move_corpus: PathBuf::from("all_moves_cache_3.json"),
            stat_corpus: PathBuf::from("all_moves_cache_4.json"),
        }
    }
}
