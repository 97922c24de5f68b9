//! PokeAPI-backed [`NameTranslationPort`].
//!
//! Every request is bounded by a short timeout. Transport errors, non-2xx
//! statuses and unexpected payloads all degrade to "not found" for species and
//! to the raw move identifier for moves.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::translate::{EntityIdentity, IdentityScript, NameTranslationPort, ScriptConverter};
use crate::{DisplayNames, normalize_key};

pub const DEFAULT_BASE_URL: &str = "https://pokeapi.co/api/v2";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
const MISSING: &str = "N/A";
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

#[derive(Debug)]
pub enum TranslateError {
    Http(reqwest::Error),
}

impl fmt::Display for TranslateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslateError::Http(err) => write!(f, "http client error: {err}"),
        }
    }
}

impl std::error::Error for TranslateError {}

impl From<reqwest::Error> for TranslateError {
    fn from(value: reqwest::Error) -> Self {
        TranslateError::Http(value)
    }
}

#[derive(Debug, Deserialize)]
struct LocalizedName {
    name: String,
    language: Language,
}

#[derive(Debug, Deserialize)]
struct Language {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SpeciesPayload {
    id: u32,
    #[serde(default)]
    names: Vec<LocalizedName>,
}

#[derive(Debug, Deserialize)]
struct MovePayload {
    #[serde(default)]
    names: Vec<LocalizedName>,
}

pub struct PokeApiTranslator {
    client: Client,
    base_url: String,
    script: Arc<dyn ScriptConverter>,
}

impl PokeApiTranslator {
    pub fn new() -> Result<Self, TranslateError> {
        Self::with_base_url(DEFAULT_BASE_URL, Arc::new(IdentityScript))
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        script: Arc<dyn ScriptConverter>,
    ) -> Result<Self, TranslateError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            script,
        })
    }

    fn fetch<T: DeserializeOwned>(&self, resource: &str, name: &str) -> Option<T> {
        let segment = utf8_percent_encode(name, PATH_SEGMENT);
        let url = format!("{}/{resource}/{segment}", self.base_url);
        let response = match self.client.get(&url).send() {
            Ok(response) => response,
            Err(err) => {
                debug!(%url, error = %err, "pokeapi request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            debug!(%url, status = %response.status(), "pokeapi lookup missed");
            return None;
        }
        match response.json::<T>() {
            Ok(payload) => Some(payload),
            Err(err) => {
                debug!(%url, error = %err, "unexpected pokeapi payload");
                None
            }
        }
    }
}

impl NameTranslationPort for PokeApiTranslator {
    fn resolve_entity(&self, name_or_id: &str) -> Option<EntityIdentity> {
        let species: SpeciesPayload = self.fetch("pokemon-species", &normalize_key(name_or_id))?;
        Some(EntityIdentity {
            id: species.id,
            names: pick_names(&species.names, self.script.as_ref(), MISSING),
        })
    }

    fn resolve_move(&self, name: &str) -> DisplayNames {
        match self.fetch::<MovePayload>("move", &normalize_key(name)) {
            Some(payload) => move_names(&payload.names, self.script.as_ref(), name),
            None => DisplayNames::raw(name),
        }
    }
}

/// Traditional Chinese wins; simplified is converted; anything absent becomes `fallback`.
fn pick_names(entries: &[LocalizedName], script: &dyn ScriptConverter, fallback: &str) -> DisplayNames {
    let lookup = |lang: &str| {
        entries
            .iter()
            .find(|entry| entry.language.name == lang)
            .map(|entry| entry.name.clone())
    };
    let zh = lookup("zh-Hant")
        .or_else(|| lookup("zh-Hans"))
        .map(|raw| script.convert(&raw))
        .unwrap_or_else(|| fallback.to_string());
    DisplayNames {
        zh,
        ja: lookup("ja").unwrap_or_else(|| fallback.to_string()),
        en: lookup("en").unwrap_or_else(|| fallback.to_string()),
    }
}

/// Move names use the common `岩` glyph even where the converted text keeps `巖`.
fn move_names(entries: &[LocalizedName], script: &dyn ScriptConverter, fallback: &str) -> DisplayNames {
    let mut names = pick_names(entries, script, fallback);
    names.zh = names.zh.replace('巖', "岩");
    names
}
