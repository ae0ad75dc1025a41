//! Language runtime registry
//!
//! Resolves a language identifier to its execution profile. The registry is
//! built once from [`Config`] and shared read-only between workers.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{Config, LanguageProfile};

/// The requested language has no profile.
///
/// The display text is the user-facing message returned in place of program output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Language '{0}' is not supported yet.")]
pub struct UnsupportedLanguage(pub String);

/// Normalize a language identifier for lookup
pub fn normalize_language(language: &str) -> String {
    language.trim().to_lowercase()
}

/// Immutable mapping from language id to [`LanguageProfile`]
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    profiles: Arc<HashMap<String, Arc<LanguageProfile>>>,
}

impl LanguageRegistry {
    /// Build a registry; ids are normalized so lookups are case-insensitive
    pub fn new(profiles: HashMap<String, LanguageProfile>) -> Self {
        let profiles = profiles
            .into_iter()
            .map(|(id, profile)| (normalize_language(&id), Arc::new(profile)))
            .collect();
        Self {
            profiles: Arc::new(profiles),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.languages.clone())
    }

    /// Look up the profile for `language`
    pub fn lookup(&self, language: &str) -> Result<Arc<LanguageProfile>, UnsupportedLanguage> {
        let id = normalize_language(language);
        self.profiles
            .get(&id)
            .cloned()
            .ok_or(UnsupportedLanguage(id))
    }

    /// Registered language ids in sorted order
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
