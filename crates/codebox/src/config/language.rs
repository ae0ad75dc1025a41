use serde::{Deserialize, Deserializer, Serialize, de};

use crate::config::ConfigError;
use crate::types::SandboxLimits;

const INVALID_FILE_EXT_CHARS: [char; 2] = ['/', '.'];

/// Directory inside the environment where the source file is bound
pub const SANDBOX_SOURCE_DIR: &str = "/sandbox";

/// Execution profile for one language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageProfile {
    /// Human-readable name for the language (e.g., "Python 3")
    pub name: String,

    /// Container image whose entrypoint runs a single source file
    pub image: String,

    /// File extension of the source artifact
    pub extension: FileExtension,

    /// Explicit invocation inside the image
    ///
    /// When absent, the in-environment source path is passed as the only
    /// argument to the image entrypoint. Placeholder: {source}
    #[serde(default)]
    pub command: Option<Vec<String>>,

    /// Resource limits for this language (overrides defaults)
    #[serde(default)]
    pub limits: Option<SandboxLimits>,
}

impl LanguageProfile {
    /// Get the source file name for this language
    pub fn source_name(&self) -> String {
        format!("main.{}", self.extension)
    }

    /// Path of the source file as seen from inside the environment
    pub fn sandbox_source_path(&self) -> String {
        format!("{SANDBOX_SOURCE_DIR}/{}", self.source_name())
    }

    /// Limits for this language: `defaults` with this profile's overrides applied
    pub fn effective_limits(&self, defaults: &SandboxLimits) -> SandboxLimits {
        match self.limits {
            Some(ref overrides) => defaults.with_overrides(overrides),
            None => defaults.clone(),
        }
    }

    /// Arguments handed to the image after its name
    pub fn invocation(&self) -> Vec<String> {
        let source = self.sandbox_source_path();
        match self.command {
            Some(ref command) => Self::expand_command(command, &source),
            None => vec![source],
        }
    }

    /// Expand placeholders in the given command
    pub fn expand_command(command: &[String], source: &str) -> Vec<String> {
        command
            .iter()
            .map(|arg| arg.replace("{source}", source))
            .collect()
    }
}

/// File extension without dot (e.g., "py")
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileExtension(String);

impl FileExtension {
    pub fn new(extension: &str) -> Result<Self, ConfigError> {
        let contains_invalid = extension
            .chars()
            .any(|c| INVALID_FILE_EXT_CHARS.contains(&c));
        if contains_invalid {
            return Err(ConfigError::InvalidFileExtChars);
        }
        Ok(Self(extension.to_owned()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for FileExtension {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        // ".py" is accepted in config files for readability
        let trimmed = s.strip_prefix('.').unwrap_or(&s);
        FileExtension::new(trimmed).map_err(|_| {
            de::Error::invalid_value(
                de::Unexpected::Str(&s),
                &"a file extension without '/' or inner '.' characters",
            )
        })
    }
}

impl std::fmt::Display for FileExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
