use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::QuizSettings;
use crate::{LoadError, normalize_key};

const OTHER_SENTINEL: &str = "Other";
const FULL_SUFFIX: &str = "_FULL";

/// Merged usage statistics for one entity across every source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageRecord {
    pub key: String,
    /// Spelling from the first source that listed the entity.
    pub name: String,
    pub moves: Vec<String>,
    pub source: String,
    pub rank: usize,
}

impl UsageRecord {
    fn merge_moves(&mut self, moves: &[String]) {
        let mut seen: HashSet<String> = self.moves.iter().map(|m| normalize_key(m)).collect();
        for name in moves {
            if seen.insert(normalize_key(name)) {
                self.moves.push(name.clone());
            }
        }
    }
}

/// One ranked dataset as parsed from disk.
#[derive(Debug, Clone)]
pub struct UsageSource {
    pub label: String,
    pub entries: Vec<RankedEntity>,
}

#[derive(Debug, Clone)]
pub struct RankedEntity {
    pub name: String,
    pub rank: usize,
    pub moves: Vec<String>,
}

#[derive(Deserialize)]
struct RawEntity {
    name: Option<String>,
    #[serde(default)]
    moves: Vec<RawMove>,
}

#[derive(Deserialize)]
struct RawMove {
    #[serde(rename = "move")]
    name: Option<String>,
}

/// Usage records keyed by normalized entity name.
#[derive(Debug, Clone, Default)]
pub struct UsageRepository {
    records: HashMap<String, UsageRecord>,
    // Sorted keys keep target draws reproducible under a seeded rng.
    keys: Vec<String>,
}

impl UsageRepository {
    /// Loads every `*.json` file under `dir`.
    ///
    /// Unreadable or malformed files are skipped with a warning. A missing
    /// directory produces an empty repository.
    pub fn load_dir(dir: impl AsRef<Path>, settings: &QuizSettings) -> Self {
        let dir = dir.as_ref();
        let files = match source_files(dir) {
            Ok(files) => files,
            Err(err) => {
                warn!(path = %dir.display(), error = %err, "usage directory unavailable");
                return Self::default();
            }
        };
        let mut sources = Vec::with_capacity(files.len());
        for path in files {
            match Self::load_source(&path, settings) {
                Ok(source) => sources.push(source),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping usage file");
                }
            }
        }
        let repo = Self::from_sources(sources);
        info!(
            path = %dir.display(),
            entities = repo.len(),
            "loaded usage statistics"
        );
        repo
    }

    /// Parses a single usage file, applying the top-N, sentinel and move-pool rules.
    pub fn load_source(path: &Path, settings: &QuizSettings) -> Result<UsageSource, LoadError> {
        let reader = BufReader::new(File::open(path)?);
        let raw: Vec<RawEntity> = serde_json::from_reader(reader)?;
        Ok(UsageSource {
            label: source_label(path),
            entries: rank_entities(raw, settings),
        })
    }

    /// Merges sources in the order given.
    ///
    /// The first source to mention an entity fixes its `source` and `rank`;
    /// later sources only contribute moves.
    pub fn from_sources<I>(sources: I) -> Self
    where
        I: IntoIterator<Item = UsageSource>,
    {
        let mut records: HashMap<String, UsageRecord> = HashMap::new();
        for source in sources {
            for entity in source.entries {
                let key = normalize_key(&entity.name);
                match records.get_mut(&key) {
                    Some(record) => record.merge_moves(&entity.moves),
                    None => {
                        let mut record = UsageRecord {
                            key: key.clone(),
                            name: entity.name,
                            moves: Vec::with_capacity(entity.moves.len()),
                            source: source.label.clone(),
                            rank: entity.rank,
                        };
                        record.merge_moves(&entity.moves);
                        records.insert(key, record);
                    }
                }
            }
        }
        let mut keys: Vec<String> = records.keys().cloned().collect();
        keys.sort();
        Self { records, keys }
    }

    pub fn get(&self, name: &str) -> Option<&UsageRecord> {
        self.records.get(&normalize_key(name))
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Records ordered by key.
    pub fn iter(&self) -> impl Iterator<Item = &UsageRecord> + '_ {
        self.keys.iter().filter_map(|key| self.records.get(key))
    }

    /// Uniformly random record, `None` when nothing was loaded.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&UsageRecord> {
        self.keys
            .choose(rng)
            .and_then(|key| self.records.get(key))
    }
}

fn source_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    // Newest-named dataset first.
    files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
    Ok(files)
}

fn source_label(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem.replace(FULL_SUFFIX, "")
}

fn rank_entities(raw: Vec<RawEntity>, settings: &QuizSettings) -> Vec<RankedEntity> {
    raw.into_iter()
        .take(settings.top_n)
        .enumerate()
        .filter_map(|(idx, entity)| {
            let Some(name) = entity.name.filter(|name| !name.trim().is_empty()) else {
                debug!(rank = idx + 1, "usage record without a name");
                return None;
            };
            let moves = entity
                .moves
                .into_iter()
                .filter_map(|m| m.name)
                .filter(|name| name != OTHER_SENTINEL)
                .take(settings.move_pool)
                .collect();
            Some(RankedEntity {
                name,
                rank: idx + 1,
                moves,
            })
        })
        .collect()
}
