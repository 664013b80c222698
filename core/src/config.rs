use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

fn default_llm_concurrency() -> usize {
    2
}
fn default_embed_concurrency() -> usize {
    4
}
fn default_embed_batch_size() -> usize {
    32
}
fn default_semantic_threshold() -> f32 {
    0.7
}
fn default_max_candidates_to_embed() -> usize {
    500
}
fn default_max_selected_papers() -> usize {
    100
}
fn default_source_spacing_ms() -> u64 {
    1_000
}
fn default_fulltext_concurrency() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct LaneConfig {
    #[serde(default = "default_llm_concurrency")]
    pub llm_concurrency: usize,
    #[serde(default = "default_embed_concurrency")]
    pub embed_concurrency: usize,
    #[serde(default = "default_source_spacing_ms")]
    pub bibliographic_spacing_ms: u64,
    #[serde(default = "default_fulltext_concurrency")]
    pub fulltext_concurrency: usize,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            llm_concurrency: default_llm_concurrency(),
            embed_concurrency: default_embed_concurrency(),
            bibliographic_spacing_ms: default_source_spacing_ms(),
            fulltext_concurrency: default_fulltext_concurrency(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SelectionConfig {
    #[serde(default = "default_semantic_threshold")]
    pub semantic_threshold: f32,
    #[serde(default = "default_max_candidates_to_embed")]
    pub max_candidates_to_embed: usize,
    #[serde(default = "default_max_selected_papers")]
    pub max_selected_papers: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            semantic_threshold: default_semantic_threshold(),
            max_candidates_to_embed: default_max_candidates_to_embed(),
            max_selected_papers: default_max_selected_papers(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub lanes: LaneConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
    #[serde(default)]
    pub force_reingest: bool,
    /// Cache root; `.cache` is created beneath it.
    #[serde(default)]
    pub cache_root: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            lanes: LaneConfig::default(),
            selection: SelectionConfig::default(),
            embed_batch_size: default_embed_batch_size(),
            force_reingest: false,
            cache_root: None,
        }
    }
}

impl AppConfig {
    /// Layered load: `config/default` file, optional run-mode file,
    /// `SCHOLIA_`-prefixed environment, then the documented plain env vars.
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(Environment::with_prefix("SCHOLIA"));

        let mut cfg: AppConfig = builder.build()?.try_deserialize()?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Construct purely from defaults plus the documented env vars.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = parse_env::<usize>("LLM_CONCURRENCY") {
            self.lanes.llm_concurrency = v;
        }
        if let Some(v) = parse_env::<usize>("EMBED_CONCURRENCY") {
            self.lanes.embed_concurrency = v;
        }
        if let Some(v) = parse_env::<usize>("EMBED_BATCH_SIZE") {
            self.embed_batch_size = v;
        }
        if let Some(v) = parse_env::<f32>("SEMANTIC_THRESHOLD") {
            self.selection.semantic_threshold = v;
        }
        if let Some(v) = parse_env::<usize>("MAX_CANDIDATES_TO_EMBED") {
            self.selection.max_candidates_to_embed = v;
        }
        if let Some(v) = parse_env::<usize>("MAX_SELECTED_PAPERS") {
            self.selection.max_selected_papers = v;
        }
        if let Ok(v) = env::var("FORCE_REINGEST") {
            self.force_reingest = matches!(v.as_str(), "1" | "true" | "TRUE" | "yes");
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.lanes.llm_concurrency, 2);
        assert_eq!(cfg.lanes.embed_concurrency, 4);
        assert_eq!(cfg.embed_batch_size, 32);
        assert_eq!(cfg.selection.semantic_threshold, 0.7);
        assert_eq!(cfg.selection.max_candidates_to_embed, 500);
        assert_eq!(cfg.selection.max_selected_papers, 100);
        assert!(!cfg.force_reingest);
    }
}
