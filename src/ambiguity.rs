use serde::Serialize;

use crate::DisplayNames;
use crate::corpus::ReferenceCorpus;
use crate::question::Question;

/// Whether a clue set pins down its answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "matches", rename_all = "snake_case")]
pub enum Ambiguity {
    /// No reference corpus loaded, so nothing can be said.
    Unavailable,
    /// No other entity knows every clue.
    Unique,
    /// Other entities whose learnsets also cover the clues.
    Ambiguous(Vec<DisplayNames>),
}

impl Ambiguity {
    pub fn is_unique(&self) -> bool {
        matches!(self, Ambiguity::Unique)
    }

    pub fn confounders(&self) -> &[DisplayNames] {
        match self {
            Ambiguity::Ambiguous(matches) => matches,
            _ => &[],
        }
    }
}

/// Reverse lookup over the reference corpus for clue sets.
pub struct AmbiguityResolver<'a> {
    corpus: &'a ReferenceCorpus,
}

impl<'a> AmbiguityResolver<'a> {
    pub fn new(corpus: &'a ReferenceCorpus) -> Self {
        Self { corpus }
    }

    pub fn check(&self, question: &Question) -> Ambiguity {
        self.check_moves(&question.clue_moves, &question.answer_key)
    }

    /// Ad-hoc check of arbitrary clues against a claimed answer. Blank clues
    /// are ignored.
    pub fn check_moves<S: AsRef<str>>(&self, clues: &[S], answer: &str) -> Ambiguity {
        if self.corpus.is_empty() {
            return Ambiguity::Unavailable;
        }
        let clues: Vec<&str> = clues
            .iter()
            .map(AsRef::as_ref)
            .filter(|clue| !clue.trim().is_empty())
            .collect();
        let matches = self.corpus.find_superset_entities(&clues, answer);
        if matches.is_empty() {
            Ambiguity::Unique
        } else {
            Ambiguity::Ambiguous(matches)
        }
    }
}
