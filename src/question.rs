use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{DataPaths, QuizSettings};
use crate::corpus::{ReferenceCorpus, StatLine};
use crate::translate::{EntityIdentity, NameTranslationPort};
use crate::usage::{UsageRecord, UsageRepository};
use crate::{DisplayNames, normalize_key};

/// A move-guess question: shuffled clue moves plus the hidden answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Question {
    pub clue_moves: Vec<String>,
    pub clue_names: Vec<DisplayNames>,
    /// Markdown card per clue, aligned with `clue_moves`.
    pub clue_display: Vec<String>,
    pub answer_key: String,
    pub answer_names: DisplayNames,
    pub answer_id: u32,
    pub source: String,
    pub rank: usize,
}

/// A base-stat guess question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatQuestion {
    pub stats: StatLine,
    pub answer_key: String,
    pub answer_names: DisplayNames,
    pub answer_id: u32,
    pub source: String,
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// The usage repository is empty; nothing can be drawn.
    NoUsageData,
    /// Every draw failed to resolve within the attempt budget.
    Exhausted { attempts: usize },
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationError::NoUsageData => write!(f, "no usage data loaded"),
            GenerationError::Exhausted { attempts } => {
                write!(f, "no resolvable target after {attempts} attempts")
            }
        }
    }
}

impl std::error::Error for GenerationError {}

/// Where a single generation attempt stands.
#[derive(Debug)]
enum Draft<'a> {
    NeedsTranslation(&'a UsageRecord),
    Finalized(Question),
    Retry,
}

/// Builds questions from the usage repository and reference corpora.
#[derive(Clone)]
pub struct QuestionGenerator {
    usage: Arc<UsageRepository>,
    corpus: Arc<ReferenceCorpus>,
    stat_corpus: Arc<ReferenceCorpus>,
    translator: Arc<dyn NameTranslationPort>,
    settings: QuizSettings,
}

impl QuestionGenerator {
    pub fn new(
        usage: Arc<UsageRepository>,
        corpus: Arc<ReferenceCorpus>,
        translator: Arc<dyn NameTranslationPort>,
        settings: QuizSettings,
    ) -> Self {
        Self {
            usage,
            stat_corpus: Arc::clone(&corpus),
            corpus,
            translator,
            settings,
        }
    }

    /// Loads usage data and both corpora from disk; missing pieces load empty.
    pub fn load(
        paths: &DataPaths,
        settings: QuizSettings,
        translator: Arc<dyn NameTranslationPort>,
    ) -> Self {
        let usage = Arc::new(UsageRepository::load_dir(&paths.usage_dir, &settings));
        let corpus = Arc::new(ReferenceCorpus::load(&paths.move_corpus));
        let stat_corpus = Arc::new(ReferenceCorpus::load(&paths.stat_corpus));
        Self::new(usage, corpus, translator, settings).with_stat_corpus(stat_corpus)
    }

    /// Uses a separate corpus for stat questions.
    pub fn with_stat_corpus(mut self, stat_corpus: Arc<ReferenceCorpus>) -> Self {
        self.stat_corpus = stat_corpus;
        self
    }

    pub fn usage(&self) -> &UsageRepository {
        &self.usage
    }

    pub fn corpus(&self) -> &ReferenceCorpus {
        &self.corpus
    }

    pub fn stat_corpus(&self) -> &ReferenceCorpus {
        &self.stat_corpus
    }

    pub fn settings(&self) -> &QuizSettings {
        &self.settings
    }

    pub fn translator(&self) -> &dyn NameTranslationPort {
        self.translator.as_ref()
    }

    /// Draws targets until one resolves, giving up after `max_attempts`.
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Question, GenerationError> {
        if self.usage.is_empty() {
            return Err(GenerationError::NoUsageData);
        }
        let attempts = self.settings.max_attempts.max(1);
        for attempt in 1..=attempts {
            let mut draft = match self.usage.choose(rng) {
                Some(record) => Draft::NeedsTranslation(record),
                None => Draft::Retry,
            };
            if let Draft::NeedsTranslation(record) = draft {
                draft = match self.translator.resolve_entity(&record.key) {
                    Some(identity) => Draft::Finalized(self.assemble(record, identity, rng)),
                    None => Draft::Retry,
                };
            }
            match draft {
                Draft::Finalized(question) => return Ok(question),
                Draft::Retry | Draft::NeedsTranslation(_) => {
                    debug!(attempt, "target did not resolve, drawing again");
                }
            }
        }
        warn!(attempts, "giving up on move question");
        Err(GenerationError::Exhausted { attempts })
    }

    fn assemble<R: Rng + ?Sized>(
        &self,
        record: &UsageRecord,
        identity: EntityIdentity,
        rng: &mut R,
    ) -> Question {
        let genuine = self.pick_genuine(record, rng);
        let decoys = self.corpus.sample_decoys(
            &record.key,
            genuine.as_slice(),
            &self.settings.denylist,
            self.settings.decoys,
            rng,
        );
        let mut clue_moves = dedup_moves(genuine.into_iter().chain(decoys));
        clue_moves.shuffle(rng);
        let clue_names: Vec<DisplayNames> = clue_moves
            .iter()
            .map(|name| self.translator.resolve_move(name))
            .collect();
        let clue_display = clue_names.iter().map(DisplayNames::render).collect();
        Question {
            clue_moves,
            clue_names,
            clue_display,
            answer_key: record.key.clone(),
            answer_names: identity.names,
            answer_id: identity.id,
            source: record.source.clone(),
            rank: record.rank,
        }
    }

    fn pick_genuine<R: Rng + ?Sized>(&self, record: &UsageRecord, rng: &mut R) -> Vec<String> {
        let filtered: Vec<&String> = record
            .moves
            .iter()
            .filter(|name| !self.settings.is_banned(name))
            .collect();
        let pool: Vec<&String> = if filtered.is_empty() {
            record.moves.iter().collect()
        } else {
            filtered
        };
        let count = self.settings.clues.min(pool.len());
        pool.choose_multiple(rng, count)
            .map(|name| (*name).clone())
            .collect()
    }

    /// Stat-guess variant: the target must carry base stats in the stat corpus.
    pub fn generate_stat_question<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<StatQuestion, GenerationError> {
        if self.usage.is_empty() {
            return Err(GenerationError::NoUsageData);
        }
        let attempts = self.settings.max_attempts.max(1);
        for attempt in 1..=attempts {
            let Some(record) = self.usage.choose(rng) else {
                continue;
            };
            let Some(entry) = self.stat_corpus.resolve(&record.key) else {
                debug!(attempt, target = %record.key, "no stat entry");
                continue;
            };
            let Some(stats) = entry.stats().copied() else {
                debug!(attempt, target = %record.key, "stat entry without stats");
                continue;
            };
            let Some(identity) = self.translator.resolve_entity(&record.key) else {
                debug!(attempt, target = %record.key, "target did not resolve");
                continue;
            };
            let answer_names = if entry.has_names() {
                entry.display_names()
            } else {
                identity.names
            };
            return Ok(StatQuestion {
                stats,
                answer_key: record.key.clone(),
                answer_names,
                answer_id: identity.id,
                source: record.source.clone(),
                rank: record.rank,
            });
        }
        warn!(attempts, "giving up on stat question");
        Err(GenerationError::Exhausted { attempts })
    }
}

/// Drops repeats by normalized key, keeping the first spelling seen.
fn dedup_moves<I: IntoIterator<Item = String>>(moves: I) -> Vec<String> {
    let mut seen = HashSet::new();
    moves
        .into_iter()
        .filter(|name| seen.insert(normalize_key(name)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::ReferenceEntry;
    use crate::usage::{RankedEntity, UsageSource};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    struct FixedTranslator {
        unknown: Vec<&'static str>,
    }

    impl NameTranslationPort for FixedTranslator {
        fn resolve_entity(&self, name_or_id: &str) -> Option<EntityIdentity> {
            if self.unknown.iter().any(|unknown| *unknown == name_or_id) {
                return None;
            }
            Some(EntityIdentity {
                id: 892,
                names: DisplayNames::new("武道熊師", "ウーラオス", "Urshifu"),
            })
        }

        fn resolve_move(&self, name: &str) -> DisplayNames {
            DisplayNames::new(format!("zh-{name}"), format!("ja-{name}"), name)
        }
    }

    fn translator(unknown: Vec<&'static str>) -> Arc<dyn NameTranslationPort> {
        Arc::new(FixedTranslator { unknown })
    }

    fn usage(entities: &[(&str, &[&str])]) -> Arc<UsageRepository> {
        let source = UsageSource {
            label: "regulation-h".into(),
            entries: entities
                .iter()
                .enumerate()
                .map(|(idx, (name, moves))| RankedEntity {
                    name: name.to_string(),
                    rank: idx + 1,
                    moves: moves.iter().map(|m| m.to_string()).collect(),
                })
                .collect(),
        };
        Arc::new(UsageRepository::from_sources([source]))
    }

    fn urshifu_corpus() -> Arc<ReferenceCorpus> {
        Arc::new(
            ReferenceCorpus::from_entries(vec![
                ReferenceEntry::new(
                    "urshifu-single-strike",
                    ["A", "B", "wicked-blow", "sucker-punch", "u-turn", "protect", "iron-head"],
                )
                .with_stats(StatLine {
                    hp: 100,
                    atk: 130,
                    def: 100,
                    spa: 63,
                    spd: 60,
                    spe: 97,
                }),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn urshifu_end_to_end() {
        let repo = usage(&[("Urshifu", &["A", "B", "C", "D"])]);
        let corpus = urshifu_corpus();
        let generator =
            QuestionGenerator::new(repo, Arc::clone(&corpus), translator(vec![]), QuizSettings::default());
        let pool: HashSet<&str> = ["A", "B", "C", "D"].into_iter().collect();
        let entry = corpus.resolve("urshifu").unwrap();
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let question = generator.generate(&mut rng).unwrap();
            assert_eq!(question.clue_moves.len(), 4);
            let keys: HashSet<String> = question.clue_moves.iter().map(|m| normalize_key(m)).collect();
            assert_eq!(keys.len(), question.clue_moves.len());
            assert!(question.clue_moves.iter().any(|m| pool.contains(m.as_str())));
            for clue in &question.clue_moves {
                assert!(pool.contains(clue.as_str()) || entry.knows(clue));
                assert_ne!(clue, "protect");
            }
            assert_eq!(question.clue_display.len(), question.clue_moves.len());
            assert_eq!(question.answer_key, "urshifu");
            assert_eq!(question.answer_id, 892);
            assert_eq!(question.source, "regulation-h");
            assert_eq!(question.rank, 1);
        }
    }

    #[test]
    fn display_is_aligned_with_clues() {
        let repo = usage(&[("Urshifu", &["Close Combat"])]);
        let generator = QuestionGenerator::new(
            repo,
            urshifu_corpus(),
            translator(vec![]),
            QuizSettings::default(),
        );
        let question = generator.generate(&mut StdRng::seed_from_u64(5)).unwrap();
        for (raw, card) in question.clue_moves.iter().zip(&question.clue_display) {
            assert_eq!(card, &format!("**zh-{raw}**\n\nja-{raw}\n\n*{raw}*"));
        }
    }

    #[test]
    fn genuine_clue_never_banned_unless_pool_is_all_banned() {
        let settings = QuizSettings {
            decoys: 0,
            ..QuizSettings::default()
        };
        let repo = usage(&[("Urshifu", &["Protect", "Close Combat"])]);
        let generator =
            QuestionGenerator::new(repo, urshifu_corpus(), translator(vec![]), settings.clone());
        for seed in 0..16 {
            let question = generator.generate(&mut StdRng::seed_from_u64(seed)).unwrap();
            assert_eq!(question.clue_moves, vec!["Close Combat"]);
        }

        let banned_only = usage(&[("Urshifu", &["Protect"])]);
        let generator =
            QuestionGenerator::new(banned_only, urshifu_corpus(), translator(vec![]), settings);
        let question = generator.generate(&mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(question.clue_moves, vec!["Protect"]);
    }

    #[test]
    fn decoys_do_not_repeat_genuine_moves() {
        let repo = usage(&[("Urshifu", &["Wicked Blow"])]);
        let settings = QuizSettings {
            decoys: 10,
            ..QuizSettings::default()
        };
        let generator = QuestionGenerator::new(repo, urshifu_corpus(), translator(vec![]), settings);
        let question = generator.generate(&mut StdRng::seed_from_u64(2)).unwrap();
        let keys: Vec<String> = question.clue_moves.iter().map(|m| normalize_key(m)).collect();
        assert_eq!(keys.iter().filter(|k| k.as_str() == "wicked-blow").count(), 1);
        // Five non-banned corpus moves remain once the genuine clue is excluded.
        assert_eq!(question.clue_moves.len(), 6);
    }

    #[test]
    fn decoys_follow_settings_denylist() {
        let repo = usage(&[("Mew", &["Psychic"])]);
        let corpus = Arc::new(
            ReferenceCorpus::from_entries(vec![ReferenceEntry::new(
                "mew",
                ["psychic", "protect", "substitute", "transform"],
            )])
            .unwrap(),
        );
        let generator =
            QuestionGenerator::new(repo, corpus, translator(vec![]), QuizSettings::default());
        for seed in 0..50 {
            let question = generator.generate(&mut StdRng::seed_from_u64(seed)).unwrap();
            assert!(!question.clue_moves.iter().any(|m| generator.settings().is_banned(m)));
            assert_eq!(question.clue_moves.len(), 2);
        }
    }

    #[test]
    fn missing_corpus_means_no_decoys() {
        let repo = usage(&[("Urshifu", &["A", "B"])]);
        let generator = QuestionGenerator::new(
            repo,
            Arc::new(ReferenceCorpus::default()),
            translator(vec![]),
            QuizSettings::default(),
        );
        let question = generator.generate(&mut StdRng::seed_from_u64(4)).unwrap();
        assert_eq!(question.clue_moves.len(), 1);
    }

    #[test]
    fn retries_past_unresolvable_targets() {
        let repo = usage(&[("Missingno", &["A"]), ("Urshifu", &["B"])]);
        let generator = QuestionGenerator::new(
            repo,
            urshifu_corpus(),
            translator(vec!["missingno"]),
            QuizSettings {
                max_attempts: 64,
                ..QuizSettings::default()
            },
        );
        for seed in 0..8 {
            let question = generator.generate(&mut StdRng::seed_from_u64(seed)).unwrap();
            assert_eq!(question.answer_key, "urshifu");
        }
    }

    #[test]
    fn bounded_retry_surfaces_failure() {
        let repo = usage(&[("Missingno", &["A"])]);
        let generator = QuestionGenerator::new(
            repo,
            urshifu_corpus(),
            translator(vec!["missingno"]),
            QuizSettings {
                max_attempts: 3,
                ..QuizSettings::default()
            },
        );
        let err = generator.generate(&mut StdRng::seed_from_u64(0)).unwrap_err();
        assert_eq!(err, GenerationError::Exhausted { attempts: 3 });
        assert_eq!(
            generator.generate_stat_question(&mut StdRng::seed_from_u64(0)),
            Err(GenerationError::Exhausted { attempts: 3 })
        );
    }

    #[test]
    fn empty_usage_is_reported() {
        let generator = QuestionGenerator::new(
            Arc::new(UsageRepository::default()),
            urshifu_corpus(),
            translator(vec![]),
            QuizSettings::default(),
        );
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(generator.generate(&mut rng), Err(GenerationError::NoUsageData));
        assert_eq!(
            generator.generate_stat_question(&mut rng),
            Err(GenerationError::NoUsageData)
        );
    }

    #[test]
    fn stat_question_uses_fuzzy_stat_entry() {
        let repo = usage(&[("Urshifu", &["A"])]);
        let generator =
            QuestionGenerator::new(repo, urshifu_corpus(), translator(vec![]), QuizSettings::default());
        let question = generator
            .generate_stat_question(&mut StdRng::seed_from_u64(8))
            .unwrap();
        assert_eq!(question.stats.total(), 550);
        assert_eq!(question.answer_id, 892);
        // The stat entry has no names, so the translator's names are used.
        assert_eq!(question.answer_names.en, "Urshifu");
        assert_eq!(question.source, "regulation-h");
    }

    #[test]
    fn stat_question_skips_entries_without_stats() {
        let repo = usage(&[("Mew", &["A"])]);
        let stat_corpus = Arc::new(
            ReferenceCorpus::from_entries(vec![ReferenceEntry::new("mew", ["psychic"])]).unwrap(),
        );
        let generator = QuestionGenerator::new(
            repo,
            urshifu_corpus(),
            translator(vec![]),
            QuizSettings {
                max_attempts: 2,
                ..QuizSettings::default()
            },
        )
        .with_stat_corpus(stat_corpus);
        assert_eq!(
            generator.generate_stat_question(&mut StdRng::seed_from_u64(0)),
            Err(GenerationError::Exhausted { attempts: 2 })
        );
    }

    #[test]
    fn dedup_keeps_first_spelling() {
        let moves = dedup_moves(
            ["Close Combat", "close-combat", "U-turn", "u-turn", "Protect"]
                .into_iter()
                .map(String::from),
        );
        assert_eq!(moves, vec!["Close Combat", "U-turn", "Protect"]);
    }
}
