use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use fst::automaton::Str;
use fst::{Automaton, IntoStreamer, Map, Streamer};
use rand::Rng;
use rand::seq::SliceRandom;
use rapidfuzz::distance::levenshtein;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zstd::stream::decode_all;

use crate::{DisplayNames, LoadError, normalize_key};

/// Base stats as stored in the stat-guess cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatLine {
    #[serde(default)]
    pub hp: u32,
    #[serde(default)]
    pub atk: u32,
    #[serde(default)]
    pub def: u32,
    #[serde(default)]
    pub spa: u32,
    #[serde(default)]
    pub spd: u32,
    #[serde(default)]
    pub spe: u32,
}

impl StatLine {
    /// Base-stat total.
    pub fn total(&self) -> u32 {
        [self.atk, self.def, self.spa, self.spd, self.spe]
            .into_iter()
            .fold(self.hp, u32::saturating_add)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawNames {
    zh: Option<String>,
    ja: Option<String>,
    en: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    moves: Vec<String>,
    #[serde(default)]
    names: Option<RawNames>,
    #[serde(default)]
    stats: Option<StatLine>,
    #[serde(default)]
    id: Option<u32>,
}

/// Full learnset and metadata for one entity.
#[derive(Debug, Clone)]
pub struct ReferenceEntry {
    key: String,
    moves: Vec<String>,
    move_keys: HashSet<String>,
    names: RawNames,
    stats: Option<StatLine>,
    id: Option<u32>,
}

impl ReferenceEntry {
    pub fn new<I, S>(key: &str, moves: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entry = Self {
            key: normalize_key(key),
            moves: Vec::new(),
            move_keys: HashSet::new(),
            names: RawNames::default(),
            stats: None,
            id: None,
        };
        entry.extend_moves(moves.into_iter().map(Into::into));
        entry
    }

    pub fn with_names(mut self, names: DisplayNames) -> Self {
        self.names = RawNames {
            zh: Some(names.zh),
            ja: Some(names.ja),
            en: Some(names.en),
        };
        self
    }

    pub fn with_stats(mut self, stats: StatLine) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }

    fn from_raw(key: &str, raw: RawEntry) -> Self {
        let mut entry = Self::new(key, raw.moves);
        entry.names = raw.names.unwrap_or_default();
        entry.stats = raw.stats;
        entry.id = raw.id;
        entry
    }

    fn extend_moves<I: IntoIterator<Item = String>>(&mut self, moves: I) {
        for name in moves {
            if self.move_keys.insert(normalize_key(&name)) {
                self.moves.push(name);
            }
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn moves(&self) -> &[String] {
        &self.moves
    }

    pub fn knows(&self, move_name: &str) -> bool {
        self.move_keys.contains(&normalize_key(move_name))
    }

    pub fn stats(&self) -> Option<&StatLine> {
        self.stats.as_ref()
    }

    pub fn id(&self) -> Option<u32> {
        self.id
    }

    pub fn has_names(&self) -> bool {
        self.names.zh.is_some() || self.names.ja.is_some() || self.names.en.is_some()
    }

    /// Localized names, each missing locale replaced by the raw key.
    pub fn display_names(&self) -> DisplayNames {
        let fallback = || self.key.clone();
        DisplayNames {
            zh: self.names.zh.clone().unwrap_or_else(fallback),
            ja: self.names.ja.clone().unwrap_or_else(fallback),
            en: self.names.en.clone().unwrap_or_else(fallback),
        }
    }

    fn covers(&self, clue_keys: &HashSet<String>) -> bool {
        clue_keys.is_subset(&self.move_keys)
    }
}

/// Lookup table of entity key to full learnset, names and stats.
///
/// Entries are held in key order behind an `fst` map so fuzzy-prefix
/// resolution always lands on the lexicographically first variant.
#[derive(Debug, Default)]
pub struct ReferenceCorpus {
    entries: Vec<ReferenceEntry>,
    index: Option<Map<Vec<u8>>>,
}

impl ReferenceCorpus {
    /// Loads a cache artifact, degrading to an empty corpus on any failure.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::from_path(path) {
            Ok(corpus) => {
                info!(path = %path.display(), entries = corpus.len(), "loaded reference corpus");
                corpus
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "reference corpus unavailable");
                Self::default()
            }
        }
    }

    /// Reads `key -> {moves, names?, stats?, id?}` JSON, zstd-compressed when
    /// the file name ends in `.zst`.
    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        let mut reader = BufReader::new(File::open(path)?);
        let raw: BTreeMap<String, RawEntry> =
            if path.extension().is_some_and(|ext| ext == "zst") {
                let bytes = decode_all(reader)?;
                serde_json::from_slice(&bytes)?
            } else {
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes)?;
                serde_json::from_slice(&bytes)?
            };
        Self::from_entries(
            raw.into_iter()
                .map(|(key, entry)| ReferenceEntry::from_raw(&key, entry)),
        )
    }

    /// Builds a corpus; entries whose normalized keys collide share one move set.
    pub fn from_entries<I>(entries: I) -> Result<Self, LoadError>
    where
        I: IntoIterator<Item = ReferenceEntry>,
    {
        let mut merged: BTreeMap<String, ReferenceEntry> = BTreeMap::new();
        for entry in entries {
            match merged.get_mut(&entry.key) {
                Some(existing) => {
                    existing.extend_moves(entry.moves);
                    if !existing.has_names() {
                        existing.names = entry.names;
                    }
                    existing.stats = existing.stats.or(entry.stats);
                    existing.id = existing.id.or(entry.id);
                }
                None => {
                    merged.insert(entry.key.clone(), entry);
                }
            }
        }
        let index = if merged.is_empty() {
            None
        } else {
            Some(Map::from_iter(
                merged.keys().enumerate().map(|(idx, key)| (key, idx as u64)),
            )?)
        };
        Ok(Self {
            entries: merged.into_values().collect(),
            index,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when at least one entry carries a numeric id.
    pub fn has_ids(&self) -> bool {
        self.entries.iter().any(|entry| entry.id.is_some())
    }

    pub fn entries(&self) -> &[ReferenceEntry] {
        &self.entries
    }

    /// Exact key match, else the first `key-<suffix>` variant.
    pub fn resolve(&self, raw: &str) -> Option<&ReferenceEntry> {
        let index = self.index.as_ref()?;
        let key = normalize_key(raw);
        if key.is_empty() {
            return None;
        }
        if let Some(idx) = index.get(&key) {
            return self.entries.get(idx as usize);
        }
        let prefix = format!("{key}-");
        let mut stream = index.search(Str::new(&prefix).starts_with()).into_stream();
        let (_, idx) = stream.next()?;
        self.entries.get(idx as usize)
    }

    /// Up to `count` distinct moves from the entity's learnset, skipping
    /// `excluded` and any normalized key in `denylist`. Empty when the entity
    /// is unknown.
    pub fn sample_decoys<R, S>(
        &self,
        raw: &str,
        excluded: &[S],
        denylist: &HashSet<String>,
        count: usize,
        rng: &mut R,
    ) -> Vec<String>
    where
        R: Rng + ?Sized,
        S: AsRef<str>,
    {
        let Some(entry) = self.resolve(raw) else {
            return Vec::new();
        };
        let excluded: HashSet<String> = excluded.iter().map(|m| normalize_key(m.as_ref())).collect();
        let pool: Vec<&String> = entry
            .moves
            .iter()
            .filter(|name| {
                let key = normalize_key(name);
                !excluded.contains(&key) && !denylist.contains(&key)
            })
            .collect();
        pool.choose_multiple(rng, count.min(pool.len()))
            .map(|name| (*name).clone())
            .collect()
    }

    /// Every entry other than `excluded` whose learnset contains all `clues`.
    ///
    /// The excluded entity is matched by normalized key and by whatever entry
    /// it resolves to, so a base-form answer never lists its own default form.
    pub fn find_superset_entities<S: AsRef<str> + Sync>(
        &self,
        clues: &[S],
        excluded: &str,
    ) -> Vec<DisplayNames> {
        if self.is_empty() {
            return Vec::new();
        }
        let clue_keys: HashSet<String> = clues.iter().map(|m| normalize_key(m.as_ref())).collect();
        let excluded_key = normalize_key(excluded);
        let resolved_key = self.resolve(excluded).map(|entry| entry.key.as_str());
        self.entries
            .par_iter()
            .filter(|entry| entry.key != excluded_key && Some(entry.key.as_str()) != resolved_key)
            .filter(|entry| entry.covers(&clue_keys))
            .map(ReferenceEntry::display_names)
            .collect()
    }

    /// Closest keys to `raw` by normalized Levenshtein similarity.
    pub fn suggest(&self, raw: &str, limit: usize) -> Vec<(String, f64)> {
        let query = normalize_key(raw);
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(String, f64)> = self
            .entries
            .par_iter()
            .map(|entry| {
                let score = levenshtein::normalized_similarity(query.chars(), entry.key.chars());
                (entry.key.clone(), score)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::fs;
    use tempfile::TempDir;

    fn corpus(entries: Vec<ReferenceEntry>) -> ReferenceCorpus {
        ReferenceCorpus::from_entries(entries).unwrap()
    }

    fn sample_corpus() -> ReferenceCorpus {
        corpus(vec![
            ReferenceEntry::new("landorus-incarnate", ["earth-power", "sludge-bomb", "protect"]),
            ReferenceEntry::new("landorus-therian", ["u-turn", "stomping-tantrum"]),
            ReferenceEntry::new("mew", ["psychic", "transform"]),
            ReferenceEntry::new("mewtwo", ["psystrike", "psychic"])
                .with_names(DisplayNames::new("超夢", "ミュウツー", "Mewtwo")),
        ])
    }

    #[test]
    fn resolves_form_variant_by_prefix() {
        let corpus = sample_corpus();
        let entry = corpus.resolve("Landorus").expect("fuzzy match");
        assert_eq!(entry.key(), "landorus-incarnate");
    }

    #[test]
    fn exact_match_beats_prefix() {
        let corpus = sample_corpus();
        assert_eq!(corpus.resolve("Mewtwo").unwrap().key(), "mewtwo");
        assert_eq!(corpus.resolve("mew").unwrap().key(), "mew");
    }

    #[test]
    fn prefix_requires_hyphen_boundary() {
        let corpus = corpus(vec![ReferenceEntry::new("mewtwo", ["psystrike"])]);
        assert!(corpus.resolve("Mew").is_none());
        assert!(corpus.resolve("").is_none());
    }

    #[test]
    fn empty_corpus_short_circuits() {
        let corpus = ReferenceCorpus::default();
        let mut rng = StdRng::seed_from_u64(3);
        assert!(corpus.resolve("mew").is_none());
        assert!(corpus.sample_decoys("mew", &["psychic"], &HashSet::new(), 3, &mut rng).is_empty());
        assert!(corpus.find_superset_entities(&["psychic"], "mew").is_empty());
    }

    #[test]
    fn stat_total_saturates() {
        let stats = StatLine {
            hp: u32::MAX,
            atk: 10,
            ..StatLine::default()
        };
        assert_eq!(stats.total(), u32::MAX);
    }

    #[test]
    fn decoys_skip_excluded_and_denylisted() {
        let corpus = corpus(vec![ReferenceEntry::new(
            "amoonguss",
            ["spore", "rage-powder", "protect", "pollen-puff", "clear-smog", "sludge-bomb"],
        )]);
        let denylist: HashSet<String> = ["protect".to_string()].into_iter().collect();
        for seed in 0..32 {
            let mut rng = StdRng::seed_from_u64(seed);
            let decoys = corpus.sample_decoys("Amoonguss", &["Spore"], &denylist, 3, &mut rng);
            assert_eq!(decoys.len(), 3);
            let unique: HashSet<_> = decoys.iter().collect();
            assert_eq!(unique.len(), 3);
            assert!(!decoys.iter().any(|m| m == "spore" || m == "protect"));
        }
    }

    #[test]
    fn decoys_capped_by_pool() {
        let corpus = sample_corpus();
        let mut rng = StdRng::seed_from_u64(9);
        let none = HashSet::new();
        let decoys = corpus.sample_decoys("mew", &[] as &[&str], &none, 5, &mut rng);
        assert_eq!(decoys.len(), 2);
        assert!(corpus.sample_decoys("zapdos", &[] as &[&str], &none, 3, &mut rng).is_empty());
    }

    #[test]
    fn superset_search_skips_answer_and_renders_names() {
        let corpus = sample_corpus();
        let matches = corpus.find_superset_entities(&["Psychic"], "mew");
        assert_eq!(matches, vec![DisplayNames::new("超夢", "ミュウツー", "Mewtwo")]);
        let both = corpus.find_superset_entities(&["psychic"], "zapdos");
        assert_eq!(both.len(), 2);
        assert_eq!(both[0], DisplayNames::raw("mew"));
    }

    #[test]
    fn superset_search_excludes_resolved_form() {
        let corpus = sample_corpus();
        assert!(corpus.find_superset_entities(&["earth-power"], "Landorus").is_empty());
    }

    #[test]
    fn superset_search_is_monotonic() {
        let corpus = sample_corpus();
        let clue_sets: [&[&str]; 3] = [&["psychic"], &["psychic", "transform"], &[
            "psychic",
            "transform",
            "psystrike",
        ]];
        let mut previous = usize::MAX;
        for clues in clue_sets {
            let count = corpus.find_superset_entities(clues, "nobody").len();
            assert!(count <= previous);
            previous = count;
        }
        assert_eq!(previous, 0);
    }

    #[test]
    fn unique_when_clues_match_only_answer() {
        let corpus = sample_corpus();
        let matches = corpus.find_superset_entities(&["psystrike", "psychic"], "Mewtwo");
        assert!(matches.is_empty());
    }

    #[test]
    fn loads_json_and_merges_colliding_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(
            &path,
            r#"{
                "Urshifu": {"moves": ["close-combat"], "id": 892},
                "urshifu": {"moves": ["sucker-punch", "close-combat"],
                            "names": {"zh": "武道熊師", "en": "Urshifu"},
                            "stats": {"hp": 100, "atk": 130, "def": 100, "spa": 63, "spd": 60, "spe": 97}}
            }"#,
        )
        .unwrap();
        let corpus = ReferenceCorpus::load(&path);
        assert_eq!(corpus.len(), 1);
        let entry = corpus.resolve("URSHIFU").unwrap();
        assert_eq!(entry.moves().len(), 2);
        assert_eq!(entry.id(), Some(892));
        assert_eq!(entry.stats().unwrap().total(), 550);
        assert_eq!(entry.display_names().ja, "urshifu");
    }

    #[test]
    fn loads_zstd_artifact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json.zst");
        let json = br#"{"mew": {"moves": ["psychic"]}}"#;
        fs::write(&path, zstd::bulk::compress(json, 3).unwrap()).unwrap();
        let corpus = ReferenceCorpus::load(&path);
        assert!(corpus.resolve("mew").unwrap().knows("Psychic"));
    }

    #[test]
    fn missing_or_malformed_file_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(ReferenceCorpus::load(dir.path().join("absent.json")).is_empty());
        let bad = dir.path().join("bad.json");
        fs::write(&bad, b"[1, 2").unwrap();
        assert!(ReferenceCorpus::load(&bad).is_empty());
        assert!(matches!(
            ReferenceCorpus::from_path(&bad),
            Err(LoadError::Json(_))
        ));
    }

    #[test]
    fn suggest_ranks_close_keys_first() {
        let corpus = sample_corpus();
        let hits = corpus.suggest("mewtow", 2);
        assert_eq!(hits[0].0, "mewtwo");
        assert_eq!(hits.len(), 2);
    }
}
