//! Configuration parsing and validation.
//!
//! The engine is configured via a TOML file: server identity, the default
//! embeddings server, per-silo defaults (debounce, extension whitelist,
//! ignore patterns), and a map of named silos. See SPEC_FULL.md §6.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub defaults: SiloDefaults,
    #[serde(default)]
    pub silos: HashMap<String, SiloConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_server_name")]
    pub name: String,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            name: default_server_name(),
            bind: default_bind(),
        }
    }
}

fn default_server_name() -> String {
    "silo-engine".to_string()
}

fn default_bind() -> String {
    "127.0.0.1:8733".to_string()
}

/// Identifies a model in the bundled registry, or selects the HTTP
/// alternative via `ollama_url`.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingsConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub ollama_url: Option<String>,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        EmbeddingsConfig {
            model: default_model(),
            ollama_url: None,
        }
    }
}

fn default_model() -> String {
    "bge-small".to_string()
}

/// Defaults inherited by any silo that doesn't override them.
#[derive(Debug, Deserialize, Clone)]
pub struct SiloDefaults {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub ignore_files: Vec<String>,
}

impl Default for SiloDefaults {
    fn default() -> Self {
        SiloDefaults {
            debounce_ms: default_debounce_ms(),
            extensions: default_extensions(),
            ignore: default_ignore(),
            ignore_files: Vec::new(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_extensions() -> Vec<String> {
    vec![
        "md", "mdx", "txt", "rs", "py", "js", "ts", "go", "java", "c", "h", "cpp", "rb",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_ignore() -> Vec<String> {
    vec!["node_modules", ".git", "target", "dist", "build"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SiloConfig {
    pub directories: Vec<PathBuf>,
    pub db_path: PathBuf,
    #[serde(default)]
    pub extensions: Option<Vec<String>>,
    #[serde(default)]
    pub ignore: Option<Vec<String>>,
    #[serde(default)]
    pub ignore_files: Option<Vec<String>>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub sleeping: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

impl SiloConfig {
    pub fn effective_extensions<'a>(&'a self, defaults: &'a SiloDefaults) -> &'a [String] {
        self.extensions.as_deref().unwrap_or(&defaults.extensions)
    }

    pub fn effective_ignore<'a>(&'a self, defaults: &'a SiloDefaults) -> &'a [String] {
        self.ignore.as_deref().unwrap_or(&defaults.ignore)
    }

    pub fn effective_ignore_files<'a>(&'a self, defaults: &'a SiloDefaults) -> &'a [String] {
        self.ignore_files
            .as_deref()
            .unwrap_or(&defaults.ignore_files)
    }

    pub fn effective_model<'a>(&'a self, embeddings: &'a EmbeddingsConfig) -> &'a str {
        self.model.as_deref().unwrap_or(&embeddings.model)
    }

    /// Resolves `db_path` under the user-data directory when relative.
    pub fn resolved_db_path(&self, user_data_dir: &Path) -> PathBuf {
        if self.db_path.is_absolute() {
            self.db_path.clone()
        } else {
            user_data_dir.join(&self.db_path)
        }
    }
}

/// Reads, parses, and validates the configuration file at `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config =
        toml::from_str(&content).with_context(|| "failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.server.bind.parse::<std::net::SocketAddr>().is_err() {
        bail!("server.bind must be a valid socket address, got '{}'", config.server.bind);
    }

    for (name, silo) in &config.silos {
        if silo.directories.is_empty() {
            bail!("silo '{}' must configure at least one directory", name);
        }
        let ext = silo.effective_extensions(&config.defaults);
        if ext.is_empty() {
            bail!("silo '{}' resolves to an empty extension whitelist", name);
        }
    }

    Ok(())
}

/// The directory under which relative `db_path`s and the default config
/// file itself live. A thin, testable wrapper around `dirs::data_dir`.
pub fn default_user_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("silo-engine")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_toml() -> &'static str {
        r#"
        [server]
        name = "dev"
        bind = "127.0.0.1:9000"

        [embeddings]
        model = "bge-small"

        [defaults]
        debounce_ms = 1500
        extensions = ["md", "rs"]

        [silos.docs]
        directories = ["./docs"]
        db_path = "docs.sqlite"
        "#
    }

    #[test]
    fn parses_minimal_config() {
        let config: Config = toml::from_str(sample_toml()).unwrap();
        assert_eq!(config.server.name, "dev");
        assert_eq!(config.defaults.debounce_ms, 1500);
        assert!(config.silos.contains_key("docs"));
    }

    #[test]
    fn validate_rejects_silo_without_directories() {
        let mut config: Config = toml::from_str(sample_toml()).unwrap();
        config.silos.get_mut("docs").unwrap().directories.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn validate_rejects_bad_bind_address() {
        let mut config: Config = toml::from_str(sample_toml()).unwrap();
        config.server.bind = "not-an-address".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn silo_inherits_defaults_when_unset() {
        let config: Config = toml::from_str(sample_toml()).unwrap();
        let silo = &config.silos["docs"];
        assert_eq!(
            silo.effective_extensions(&config.defaults),
            &["md".to_string(), "rs".to_string()]
        );
        assert_eq!(silo.effective_model(&config.embeddings), "bge-small");
    }

    #[test]
    fn relative_db_path_resolves_under_user_data_dir() {
        let config: Config = toml::from_str(sample_toml()).unwrap();
        let silo = &config.silos["docs"];
        let resolved = silo.resolved_db_path(Path::new("/home/user/.local/share/silo-engine"));
        assert_eq!(
            resolved,
            PathBuf::from("/home/user/.local/share/silo-engine/docs.sqlite")
        );
    }
}
