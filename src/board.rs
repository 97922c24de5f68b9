use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::question::{Question, StatQuestion};

/// Who is talking to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Holds the shared secret: may publish and always sees answers.
    Host,
    Player,
}

impl Role {
    pub fn is_host(self) -> bool {
        matches!(self, Role::Host)
    }
}

/// Shared-secret check that hands out [`Role::Host`].
#[derive(Debug, Clone, Default)]
pub struct HostGate {
    secret: Option<String>,
}

impl HostGate {
    /// A blank secret disables hosting entirely.
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    pub fn authorize(&self, attempt: Option<&str>) -> Role {
        match (&self.secret, attempt) {
            (Some(secret), Some(attempt)) if secret == attempt => Role::Host,
            (_, Some(_)) => {
                warn!("rejected host secret");
                Role::Player
            }
            _ => Role::Player,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardError {
    /// Only the host may publish.
    Forbidden,
}

impl fmt::Display for BoardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoardError::Forbidden => write!(f, "only the host may publish questions"),
        }
    }
}

impl std::error::Error for BoardError {}

/// Point-in-time copy of the whole board.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BoardSnapshot {
    pub move_question: Option<Arc<Question>>,
    pub stat_question: Option<Arc<StatQuestion>>,
    /// Seconds since the epoch of the last publish.
    pub last_update: Option<u64>,
    /// Bumped on every publish so pollers can skip unchanged boards.
    pub revision: u64,
}

/// The one question slot per quiz mode that every session polls.
///
/// Publishing swaps whole `Arc`s under a write lock, so readers see either the
/// previous question or the new one in full.
#[derive(Debug, Default)]
pub struct SharedQuestionBoard {
    slots: RwLock<BoardSnapshot>,
}

impl SharedQuestionBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_move(&self, role: Role, question: Question) -> Result<Arc<Question>, BoardError> {
        ensure_host(role)?;
        let question = Arc::new(question);
        let revision = self.update(|slots| slots.move_question = Some(Arc::clone(&question)));
        info!(revision, answer = %question.answer_key, "published move question");
        Ok(question)
    }

    pub fn publish_stat(
        &self,
        role: Role,
        question: StatQuestion,
    ) -> Result<Arc<StatQuestion>, BoardError> {
        ensure_host(role)?;
        let question = Arc::new(question);
        let revision = self.update(|slots| slots.stat_question = Some(Arc::clone(&question)));
        info!(revision, answer = %question.answer_key, "published stat question");
        Ok(question)
    }

    pub fn current_move(&self) -> Option<Arc<Question>> {
        self.slots.read().move_question.clone()
    }

    pub fn current_stat(&self) -> Option<Arc<StatQuestion>> {
        self.slots.read().stat_question.clone()
    }

    pub fn last_update(&self) -> Option<u64> {
        self.slots.read().last_update
    }

    pub fn revision(&self) -> u64 {
        self.slots.read().revision
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        self.slots.read().clone()
    }

    fn update(&self, apply: impl FnOnce(&mut BoardSnapshot)) -> u64 {
        let mut guard = self.slots.write();
        apply(&mut guard);
        guard.last_update = Some(now_ts());
        guard.revision = guard.revision.saturating_add(1);
        guard.revision
    }
}

fn ensure_host(role: Role) -> Result<(), BoardError> {
    if role.is_host() {
        Ok(())
    } else {
        warn!(?role, "publish rejected");
        Err(BoardError::Forbidden)
    }
}

fn now_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DisplayNames;
    use crate::corpus::StatLine;
    use std::thread;

    fn question(answer: &str, clues: usize) -> Question {
        let clue_moves: Vec<String> = (0..clues).map(|i| format!("{answer}-move-{i}")).collect();
        Question {
            clue_names: clue_moves.iter().map(|m| DisplayNames::raw(m)).collect(),
            clue_display: clue_moves.iter().map(|m| DisplayNames::raw(m).render()).collect(),
            clue_moves,
            answer_key: answer.to_string(),
            answer_names: DisplayNames::raw(answer),
            answer_id: 1,
            source: "test".into(),
            rank: 1,
        }
    }

    #[test]
    fn gate_requires_matching_secret() {
        let gate = HostGate::new(Some("bobohost".into()));
        assert_eq!(gate.authorize(Some("bobohost")), Role::Host);
        assert_eq!(gate.authorize(Some("guess")), Role::Player);
        assert_eq!(gate.authorize(None), Role::Player);
    }

    #[test]
    fn gate_without_secret_never_grants_host() {
        let gate = HostGate::new(Some(String::new()));
        assert!(!gate.is_enabled());
        assert_eq!(gate.authorize(Some("")), Role::Player);
    }

    #[test]
    fn player_publish_leaves_slot_untouched() {
        let board = SharedQuestionBoard::new();
        board.publish_move(Role::Host, question("mew", 4)).unwrap();
        let before = board.snapshot();
        assert_eq!(
            board.publish_move(Role::Player, question("ditto", 4)).unwrap_err(),
            BoardError::Forbidden
        );
        let after = board.snapshot();
        assert_eq!(after.revision, before.revision);
        assert_eq!(after.move_question.unwrap().answer_key, "mew");
        assert!(after.stat_question.is_none());
    }

    #[test]
    fn host_publish_is_visible_in_full() {
        let board = SharedQuestionBoard::new();
        assert!(board.current_move().is_none());
        assert!(board.last_update().is_none());
        let published = question("urshifu", 4);
        board.publish_move(Role::Host, published.clone()).unwrap();
        assert_eq!(*board.current_move().unwrap(), published);
        assert_eq!(board.revision(), 1);
        assert!(board.last_update().is_some());
    }

    #[test]
    fn stat_slot_is_independent() {
        let board = SharedQuestionBoard::new();
        let stat = StatQuestion {
            stats: StatLine {
                hp: 80,
                ..StatLine::default()
            },
            answer_key: "mew".into(),
            answer_names: DisplayNames::raw("mew"),
            answer_id: 151,
            source: "test".into(),
            rank: 3,
        };
        assert!(board.publish_stat(Role::Player, stat.clone()).is_err());
        board.publish_stat(Role::Host, stat.clone()).unwrap();
        assert_eq!(*board.current_stat().unwrap(), stat);
        assert!(board.current_move().is_none());
    }

    #[test]
    fn concurrent_readers_never_see_torn_questions() {
        let board = Arc::new(SharedQuestionBoard::new());
        board.publish_move(Role::Host, question("q0", 4)).unwrap();
        let writer = {
            let board = Arc::clone(&board);
            thread::spawn(move || {
                for i in 1..200 {
                    board
                        .publish_move(Role::Host, question(&format!("q{i}"), 4))
                        .unwrap();
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let board = Arc::clone(&board);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let current = board.current_move().unwrap();
                        assert_eq!(current.clue_moves.len(), 4);
                        let prefix = format!("{}-move-", current.answer_key);
                        assert!(current.clue_moves.iter().all(|m| m.starts_with(&prefix)));
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(board.revision(), 200);
    }
}
