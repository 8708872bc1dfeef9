use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Maximum query variants produced by expansion (original included).
    #[serde(default = "default_max_variants")]
    pub max_query_variants: usize,
    /// Per-backend hit cap (vector neighbors, keyword hits per variant, graph entities).
    #[serde(default = "default_backend_limit")]
    pub per_backend_limit: i64,
    /// Cap on the merged, deduplicated evidence list.
    #[serde(default = "default_merged_limit")]
    pub merged_limit: usize,
    /// Independent timebox for each retrieval backend call.
    #[serde(default = "default_backend_timeout_ms")]
    pub backend_timeout_ms: u64,
    /// Evidence items formatted into the prompt.
    #[serde(default = "default_prompt_evidence")]
    pub prompt_evidence_limit: usize,
    /// Snippet truncation for prompt evidence, in characters.
    #[serde(default = "default_prompt_snippet_chars")]
    pub prompt_snippet_chars: usize,
    /// Snippet truncation for the extractive fallback answer, in characters.
    #[serde(default = "default_fallback_snippet_chars")]
    pub fallback_snippet_chars: usize,
    /// Conversation turns included in multi-turn prompts.
    #[serde(default = "default_history_turns")]
    pub history_turns: i64,
    /// Size of streamed content chunks, in characters.
    #[serde(default = "default_stream_chunk_chars")]
    pub stream_chunk_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_query_variants: default_max_variants(),
            per_backend_limit: default_backend_limit(),
            merged_limit: default_merged_limit(),
            backend_timeout_ms: default_backend_timeout_ms(),
            prompt_evidence_limit: default_prompt_evidence(),
            prompt_snippet_chars: default_prompt_snippet_chars(),
            fallback_snippet_chars: default_fallback_snippet_chars(),
            history_turns: default_history_turns(),
            stream_chunk_chars: default_stream_chunk_chars(),
        }
    }
}

fn default_max_variants() -> usize {
    5
}
fn default_backend_limit() -> i64 {
    10
}
fn default_merged_limit() -> usize {
    20
}
fn default_backend_timeout_ms() -> u64 {
    10_000
}
fn default_prompt_evidence() -> usize {
    5
}
fn default_prompt_snippet_chars() -> usize {
    300
}
fn default_fallback_snippet_chars() -> usize {
    200
}
fn default_history_turns() -> i64 {
    5
}
fn default_stream_chunk_chars() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `disabled`, `openai`, or `ollama`.
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            base_url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `disabled` or `openai` (any OpenAI-compatible chat completions API).
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_generation_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            base_url: default_generation_base_url(),
            model: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            api_key_env: default_api_key_env(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_generation_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_temperature() -> f32 {
    0.7
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_retries() -> u32 {
    2
}
fn default_timeout_secs() -> u64 {
    30
}

/// Prompt templates. Placeholders are substituted literally:
/// `{question}`, `{current_question}`, `{search_results}`,
/// `{conversation_history}`, `{query}`.
#[derive(Debug, Deserialize, Clone)]
pub struct PromptsConfig {
    #[serde(default = "default_system_prompt")]
    pub system: String,
    #[serde(default = "default_single_turn_prompt")]
    pub single_turn: String,
    #[serde(default = "default_multi_turn_prompt")]
    pub multi_turn: String,
    #[serde(default = "default_expansion_prompt")]
    pub expansion: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            system: default_system_prompt(),
            single_turn: default_single_turn_prompt(),
            multi_turn: default_multi_turn_prompt(),
            expansion: default_expansion_prompt(),
        }
    }
}

fn default_system_prompt() -> String {
    "You are a document question-answering assistant. Answer strictly from the \
     provided document excerpts. If the excerpts do not contain the answer, say so."
        .to_string()
}

fn default_single_turn_prompt() -> String {
    "Question: {question}\n\nDocument excerpts:\n{search_results}\n\n\
     Answer the question using only the excerpts above. Cite the source file \
     and page where relevant."
        .to_string()
}

fn default_multi_turn_prompt() -> String {
    "Conversation so far:\n{conversation_history}\n\n\
     Current question: {current_question}\n\nDocument excerpts:\n{search_results}\n\n\
     Answer the current question using only the excerpts above, taking the \
     conversation into account. Cite the source file and page where relevant."
        .to_string()
}

fn default_expansion_prompt() -> String {
    "Rewrite the following search query as up to four short paraphrases or \
     sub-questions that would help retrieve relevant passages. Output one per \
     line with no numbering or commentary.\n\nQuery: {query}"
        .to_string()
}

impl Config {
    /// A minimal config pointing at the given database, used by tests and
    /// one-shot CLI invocations that never bind the server port.
    pub fn minimal(db_path: PathBuf) -> Self {
        Self {
            db: DbConfig { path: db_path },
            server: ServerConfig {
                bind: "127.0.0.1:7410".to_string(),
            },
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            prompts: PromptsConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.retrieval.max_query_variants == 0 {
        anyhow::bail!("retrieval.max_query_variants must be >= 1");
    }
    if config.retrieval.merged_limit == 0 {
        anyhow::bail!("retrieval.merged_limit must be >= 1");
    }
    if config.retrieval.stream_chunk_chars == 0 {
        anyhow::bail!("retrieval.stream_chunk_chars must be >= 1");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if config.generation.is_enabled() && config.generation.model.is_none() {
        anyhow::bail!(
            "generation.model must be specified when provider is '{}'",
            config.generation.provider
        );
    }
    match config.generation.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_applies_defaults() {
        let config: Config = toml::from_str(
            r#"
            [db]
            path = "/tmp/ragdock.sqlite"

            [server]
            bind = "127.0.0.1:7410"
            "#,
        )
        .unwrap();

        assert_eq!(config.retrieval.max_query_variants, 5);
        assert_eq!(config.retrieval.merged_limit, 20);
        assert_eq!(config.retrieval.per_backend_limit, 10);
        assert_eq!(config.retrieval.stream_chunk_chars, 10);
        assert!(!config.embedding.is_enabled());
        assert!(!config.generation.is_enabled());
    }

    #[test]
    fn prompts_contain_placeholders() {
        let prompts = PromptsConfig::default();
        assert!(prompts.single_turn.contains("{question}"));
        assert!(prompts.single_turn.contains("{search_results}"));
        assert!(prompts.multi_turn.contains("{conversation_history}"));
        assert!(prompts.multi_turn.contains("{current_question}"));
        assert!(prompts.expansion.contains("{query}"));
    }
}
