//! Language configuration for the judge sandbox and the local compile gate

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Languages a submission may be written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Cpp,
    Java,
    Python,
    Javascript,
    Typescript,
}

impl Language {
    pub const ALL: &'static [Language] = &[
        Language::C,
        Language::Cpp,
        Language::Java,
        Language::Python,
        Language::Javascript,
        Language::Typescript,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::Typescript => "typescript",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "c" => Ok(Language::C),
            "cpp" | "c++" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            "python" | "python3" | "py" => Ok(Language::Python),
            "javascript" | "js" | "node" => Ok(Language::Javascript),
            "typescript" | "ts" => Ok(Language::Typescript),
            other => anyhow::bail!("Unsupported language: {}", other),
        }
    }
}

/// Toolchain settings for a supported language
#[derive(Debug, Clone)]
pub struct LanguageConfig {
    /// Language id understood by the judge sandbox
    pub judge_language_id: u32,
    /// Name of the source file in the scratch directory (e.g., "main.cpp")
    pub source_file: String,
    /// Local compile command (None for interpreted languages)
    pub compile_command: Option<Vec<String>>,
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
struct RawLanguageConfig {
    judge_language_id: u32,
    source_file: String,
    compile_command: Option<String>,
}

/// Global language configurations
static LANGUAGES: OnceLock<HashMap<Language, LanguageConfig>> = OnceLock::new();

/// Initialize language configurations from the embedded TOML file
pub fn init_languages() -> anyhow::Result<()> {
    let content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));
    let languages = parse_languages(content)?;

    LANGUAGES
        .set(languages)
        .map_err(|_| anyhow::anyhow!("Languages already initialized"))?;

    Ok(())
}

fn parse_languages(content: &str) -> anyhow::Result<HashMap<Language, LanguageConfig>> {
    let raw_configs: HashMap<String, RawLanguageConfig> = toml::from_str(content)?;

    let mut languages = HashMap::new();
    for (name, raw) in raw_configs {
        let language: Language = name.parse()?;
        let config = LanguageConfig {
            judge_language_id: raw.judge_language_id,
            source_file: raw.source_file,
            compile_command: raw.compile_command.map(|cmd| into_command(&cmd)),
        };
        languages.insert(language, config);
    }

    if let Some(missing) = Language::ALL.iter().find(|l| !languages.contains_key(l)) {
        anyhow::bail!("Missing language configuration for {}", missing);
    }

    Ok(languages)
}

/// Get language configuration
pub fn get_language_config(language: Language) -> Option<LanguageConfig> {
    LANGUAGES.get()?.get(&language).cloned()
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}

/// Initialize the embedded table once for tests that go through the global lookup
#[cfg(test)]
pub fn ensure_languages() {
    let _ = init_languages();
}
