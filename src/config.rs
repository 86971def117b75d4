//! TOML configuration.
//!
//! Every component receives its settings explicitly from [`Config`];
//! nothing reads configuration from globals. Secrets (`OPENAI_API_KEY`,
//! `GITHUB_TOKEN`) come from the environment only.
//!
//! ```toml
//! [db]
//! path = "./data/docidx.sqlite"
//!
//! [chunking]
//! max_tokens = 250
//! overlap_tokens = 25
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [[sources.github]]
//! name = "protocol-docs"
//! repo_url = "https://github.com/example/protocol"
//! path = "docs"
//! refresh_interval_secs = 3600
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use docs_index_core::chunk::ChunkingParams;
use docs_index_core::retrieve::RetrievalParams;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkingParams {
        ChunkingParams {
            max_tokens: self.max_tokens,
            overlap_tokens: self.overlap_tokens,
        }
    }
}

fn default_max_tokens() -> usize {
    250
}
fn default_overlap() -> usize {
    25
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    /// 0 = unlimited.
    #[serde(default)]
    pub max_chunks_per_doc: usize,
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            candidate_k: default_candidate_k(),
            max_chunks_per_doc: 0,
            max_query_chars: default_max_query_chars(),
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            candidate_k: self.candidate_k,
            max_chunks_per_doc: self.max_chunks_per_doc,
            max_query_chars: self.max_query_chars,
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_candidate_k() -> usize {
    40
}
fn default_max_query_chars() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// First backoff delay; doubles per attempt.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Base URL override (Ollama, OpenAI-compatible gateways).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            retry_base_ms: default_retry_base_ms(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_retry_base_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub default: String,
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: BTreeMap::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    #[serde(default)]
    pub filesystem: Vec<FilesystemSourceConfig>,
    #[serde(default)]
    pub github: Vec<GithubSourceConfig>,
}

impl SourcesConfig {
    /// `(name, refresh_interval_secs)` of every configured source.
    pub fn schedule(&self) -> Vec<(String, u64)> {
        self.filesystem
            .iter()
            .map(|s| (s.name.clone(), s.refresh_interval_secs))
            .chain(
                self.github
                    .iter()
                    .map(|s| (s.name.clone(), s.refresh_interval_secs)),
            )
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.schedule().into_iter().map(|(n, _)| n).collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemSourceConfig {
    pub name: String,
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.mdx".to_string(),
        "**/*.txt".to_string(),
        "**/*.rst".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubSourceConfig {
    pub name: String,
    /// `https://github.com/{owner}/{repo}` (a trailing `.git` is accepted).
    pub repo_url: String,
    /// Subdirectory to index; empty for the repository root.
    #[serde(default)]
    pub path: String,
    /// Branch, tag or commit; defaults to the repository's default branch.
    #[serde(default)]
    pub branch: Option<String>,
    /// File extensions to index.
    #[serde(default = "default_path_filter")]
    pub path_filter: Vec<String>,
    /// Optional local copy of every fetched document.
    #[serde(default)]
    pub mirror_dir: Option<PathBuf>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

fn default_path_filter() -> Vec<String> {
    vec![
        ".md".to_string(),
        ".mdx".to_string(),
        ".txt".to_string(),
        ".rst".to_string(),
    ]
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_refresh_interval() -> u64 {
    3600
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        bail!(
            "chunking.overlap_tokens ({}) must be < chunking.max_tokens ({})",
            config.chunking.overlap_tokens,
            config.chunking.max_tokens
        );
    }

    // Retrieval
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.max_query_chars == 0 {
        bail!("retrieval.max_query_chars must be >= 1");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.unwrap_or(0) == 0 {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    // Sources
    let mut seen = std::collections::HashSet::new();
    for name in config.sources.names() {
        if name.is_empty() || name == "all" {
            bail!("source name '{}' is reserved", name);
        }
        if !seen.insert(name.clone()) {
            bail!("duplicate source name: '{}'", name);
        }
    }
    for (name, interval) in config.sources.schedule() {
        if interval == 0 {
            bail!("sources.{}: refresh_interval_secs must be > 0", name);
        }
    }
    for gh in &config.sources.github {
        crate::source_github::parse_repo_url(&gh.repo_url)
            .with_context(|| format!("sources.github '{}'", gh.name))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    const BASE: &str = r#"
[db]
path = "/tmp/docidx.sqlite"

[embedding]
provider = "ollama"
model = "nomic-embed-text"
dims = 768
"#;

    #[test]
    fn test_defaults() {
        let config = parse(BASE).unwrap();
        assert_eq!(config.chunking.max_tokens, 250);
        assert_eq!(config.chunking.overlap_tokens, 25);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.embedding.max_retries, 5);
        assert_eq!(config.logging.default, "info");
        assert!(config.sources.names().is_empty());
    }

    #[test]
    fn test_overlap_must_be_below_max() {
        let toml_str = format!("{}\n[chunking]\nmax_tokens = 10\noverlap_tokens = 10\n", BASE);
        let err = parse(&toml_str).unwrap_err();
        assert!(err.to_string().contains("overlap_tokens"));
    }

    #[test]
    fn test_remote_provider_needs_model_and_dims() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn test_unknown_provider() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_sources_parse_and_schedule() {
        let toml_str = format!(
            r#"{}
[[sources.filesystem]]
name = "local"
root = "./docs"

[[sources.github]]
name = "protocol"
repo_url = "https://github.com/example/protocol.git"
path = "docs"
refresh_interval_secs = 600
"#,
            BASE
        );
        let config = parse(&toml_str).unwrap();
        assert_eq!(
            config.sources.schedule(),
            vec![("local".to_string(), 3600), ("protocol".to_string(), 600)]
        );
        assert_eq!(config.sources.github[0].path_filter.len(), 4);
    }

    #[test]
    fn test_duplicate_source_names_rejected() {
        let toml_str = format!(
            "{}\n[[sources.filesystem]]\nname = \"a\"\nroot = \"x\"\n\n[[sources.filesystem]]\nname = \"a\"\nroot = \"y\"\n",
            BASE
        );
        let err = parse(&toml_str).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_bad_repo_url_rejected() {
        let toml_str = format!(
            "{}\n[[sources.github]]\nname = \"g\"\nrepo_url = \"https://gitlab.com/a/b\"\n",
            BASE
        );
        assert!(parse(&toml_str).is_err());
    }
}
