use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::error;

use crate::corpus::ReferenceCorpus;
use crate::{DisplayNames, normalize_key};

const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Numeric id plus localized names for a resolved entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityIdentity {
    pub id: u32,
    pub names: DisplayNames,
}

/// Resolves entity and move identifiers to display text.
///
/// Implementations never fail hard: an unknown entity is `None` and a move
/// that cannot be translated falls back to its raw identifier.
pub trait NameTranslationPort: Send + Sync {
    fn resolve_entity(&self, name_or_id: &str) -> Option<EntityIdentity>;

    fn resolve_move(&self, name: &str) -> DisplayNames;
}

impl<T: NameTranslationPort + ?Sized> NameTranslationPort for Arc<T> {
    fn resolve_entity(&self, name_or_id: &str) -> Option<EntityIdentity> {
        (**self).resolve_entity(name_or_id)
    }

    fn resolve_move(&self, name: &str) -> DisplayNames {
        (**self).resolve_move(name)
    }
}

/// Stateless text transform applied to Chinese display names, e.g. a
/// simplified-to-traditional converter.
pub trait ScriptConverter: Send + Sync {
    fn convert(&self, text: &str) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityScript;

impl ScriptConverter for IdentityScript {
    fn convert(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Offline translator backed by a reference corpus.
///
/// Entities resolve only when the corpus carries an `id`. Moves have no
/// localized table, so they render as their raw identifiers.
pub struct CorpusTranslator {
    corpus: Arc<ReferenceCorpus>,
}

impl CorpusTranslator {
    pub fn new(corpus: Arc<ReferenceCorpus>) -> Self {
        if !corpus.is_empty() && !corpus.has_ids() {
            error!(
                entries = corpus.len(),
                "reference corpus has no `id` fields; offline entity lookups will all miss"
            );
        }
        Self { corpus }
    }
}

impl NameTranslationPort for CorpusTranslator {
    fn resolve_entity(&self, name_or_id: &str) -> Option<EntityIdentity> {
        let entry = self.corpus.resolve(name_or_id)?;
        Some(EntityIdentity {
            id: entry.id()?,
            names: entry.display_names(),
        })
    }

    fn resolve_move(&self, name: &str) -> DisplayNames {
        DisplayNames::raw(name)
    }
}

/// LRU memo in front of another translator.
///
/// Only successful lookups are cached so a transient miss is retried on the
/// next draw. A move that comes back as its raw identifier counts as a miss.
pub struct CachedTranslator<T> {
    inner: T,
    entities: Mutex<LruCache<String, EntityIdentity>>,
    moves: Mutex<LruCache<String, DisplayNames>>,
}

impl<T: NameTranslationPort> CachedTranslator<T> {
    pub fn new(inner: T) -> Self {
        Self::with_capacity(inner, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(inner: T, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            entities: Mutex::new(LruCache::new(capacity)),
            moves: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

fn cached<K, V>(cache: &Mutex<LruCache<K, V>>, key: &K) -> Option<V>
where
    K: Hash + Eq,
    V: Clone,
{
    cache.lock().get(key).cloned()
}

impl<T: NameTranslationPort> NameTranslationPort for CachedTranslator<T> {
    fn resolve_entity(&self, name_or_id: &str) -> Option<EntityIdentity> {
        let key = normalize_key(name_or_id);
        if let Some(hit) = cached(&self.entities, &key) {
            return Some(hit);
        }
        // The lock is released while the inner lookup runs.
        let identity = self.inner.resolve_entity(name_or_id)?;
        self.entities.lock().put(key, identity.clone());
        Some(identity)
    }

    fn resolve_move(&self, name: &str) -> DisplayNames {
        let key = normalize_key(name);
        if let Some(hit) = cached(&self.moves, &key) {
            return hit;
        }
        let names = self.inner.resolve_move(name);
        if names != DisplayNames::raw(name) {
            self.moves.lock().put(key, names.clone());
        }
        names
    }
}
