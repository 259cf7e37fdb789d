//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `GRIMOIRE_SPELLS_DIR`, `GRIMOIRE_LOG_LEVEL`, and
//! `GRIMOIRE_LLM_MODEL` env overrides.

use std::{
    env,
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;

/// Stdio channel configuration.
#[derive(Debug, Clone)]
pub struct StdioConfig {
    /// Whether the stdio channel is explicitly enabled.
    pub enabled: bool,
}

/// HTTP channel configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Whether the HTTP channel is explicitly enabled.
    pub enabled: bool,
    /// Socket address to bind the HTTP channel to.
    pub bind: String,
}

/// Comms subsystem configuration.
#[derive(Debug, Clone)]
pub struct CommsConfig {
    pub stdio: StdioConfig,
    pub http: HttpConfig,
}

/// What a failed invocation reports in its `output` field.
///
/// The error message always travels separately in the outcome's `error`
/// field; this only picks the placeholder output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailureOutput {
    /// Empty string.
    #[default]
    Empty,
    /// Echo the original input back.
    Input,
    /// Repeat the error message.
    Message,
}

/// Spells subsystem configuration.
#[derive(Debug, Clone)]
pub struct SpellsConfig {
    pub failure_output: FailureOutput,
}

/// OpenAI / OpenAI-compatible provider configuration.
/// Populated from `[llm.openai]` in the TOML.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    /// Model name passed in the request body.
    pub model: String,
    /// Sampling temperature (ignored for models that forbid it).
    pub temperature: f32,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
}

/// LLM subsystem configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Which provider is active (e.g. `"dummy"`, `"openai"`).
    /// Maps to `default` in `[llm]` TOML — named `default` there to signal
    /// that other provider sections can coexist without being loaded.
    pub provider: String,
    /// Config for the OpenAI / OpenAI-compatible provider (`[llm.openai]`).
    pub openai: OpenAiConfig,
}

/// Fully-resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub daemon_name: String,
    /// Directory scanned for `.rhai` spell scripts (already expanded, no `~`).
    pub spells_dir: PathBuf,
    pub log_level: String,
    pub comms: CommsConfig,
    pub spells: SpellsConfig,
    pub llm: LlmConfig,
    /// API key from `LLM_API_KEY` env var — `None` for keyless local models.
    /// Never sourced from TOML.
    pub llm_api_key: Option<String>,
}

impl Config {
    /// Returns `true` if the stdio channel should be loaded.
    pub fn comms_stdio_should_load(&self) -> bool {
        self.comms.stdio.enabled
    }

    /// Returns `true` if the HTTP channel should be loaded.
    pub fn comms_http_should_load(&self) -> bool {
        self.comms.http.enabled
    }
}

/// Raw TOML shape — `serde` target before resolution.
#[derive(Deserialize)]
struct RawConfig {
    daemon: RawDaemon,
    #[serde(default)]
    comms: RawComms,
    #[serde(default)]
    spells: RawSpells,
    #[serde(default)]
    llm: RawLlm,
}

#[derive(Deserialize)]
struct RawDaemon {
    name: String,
    #[serde(default = "default_spells_dir")]
    spells_dir: String,
    log_level: String,
}

#[derive(Deserialize, Default)]
struct RawComms {
    #[serde(default)]
    stdio: RawStdio,
    #[serde(default)]
    http: RawHttp,
}

#[derive(Deserialize)]
struct RawStdio {
    /// Defaults to `false`: the stdio channel must be explicitly enabled.
    #[serde(default = "default_false")]
    enabled: bool,
}

#[derive(Deserialize)]
struct RawHttp {
    /// Defaults to `true`: HTTP is the primary transport.
    #[serde(default = "default_true")]
    enabled: bool,
    /// Bind address for the HTTP listener.
    #[serde(default = "default_http_bind")]
    bind: String,
}

#[derive(Deserialize, Default)]
struct RawSpells {
    #[serde(default)]
    failure_output: FailureOutput,
}

#[derive(Deserialize)]
struct RawLlm {
    /// Maps to `default = "..."` in `[llm]`.
    #[serde(rename = "default", default = "default_llm_provider")]
    provider: String,
    #[serde(default)]
    openai: RawOpenAiConfig,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self { provider: default_llm_provider(), openai: RawOpenAiConfig::default() }
    }
}

#[derive(Deserialize)]
struct RawOpenAiConfig {
    #[serde(default = "default_openai_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_openai_model")]
    model: String,
    #[serde(default = "default_openai_temperature")]
    temperature: f32,
    #[serde(default = "default_openai_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawOpenAiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            model: default_openai_model(),
            temperature: default_openai_temperature(),
            timeout_seconds: default_openai_timeout_seconds(),
        }
    }
}

fn default_llm_provider() -> String { "dummy".to_string() }
fn default_openai_api_base_url() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_openai_model() -> String { "gpt-4o-mini".to_string() }
fn default_openai_temperature() -> f32 { 0.2 }
fn default_openai_timeout_seconds() -> u64 { 60 }

impl Default for RawStdio {
    fn default() -> Self {
        Self { enabled: false }
    }
}

impl Default for RawHttp {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_http_bind(),
        }
    }
}

fn default_spells_dir() -> String {
    "spells".to_string()
}

fn default_http_bind() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

/// Load config from `config/default.toml`, then apply env-var overrides.
pub fn load() -> Result<Config, AppError> {
    let spells_dir_override = env::var("GRIMOIRE_SPELLS_DIR").ok();
    let log_level_override = env::var("GRIMOIRE_LOG_LEVEL").ok();
    let mut config = load_from(
        Path::new("config/default.toml"),
        spells_dir_override.as_deref(),
        log_level_override.as_deref(),
    )?;
    if let Ok(model) = env::var("GRIMOIRE_LLM_MODEL") {
        config.llm.openai.model = model;
    }
    Ok(config)
}

/// Internal loader — accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    spells_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let d = parsed.daemon;

    let spells_dir_str = spells_dir_override.unwrap_or(&d.spells_dir).to_string();
    let spells_dir = expand_home(&spells_dir_str);
    let log_level = log_level_override.unwrap_or(&d.log_level).to_string();

    Ok(Config {
        daemon_name: d.name,
        spells_dir,
        log_level,
        comms: CommsConfig {
            stdio: StdioConfig {
                enabled: parsed.comms.stdio.enabled,
            },
            http: HttpConfig {
                enabled: parsed.comms.http.enabled,
                bind: parsed.comms.http.bind,
            },
        },
        spells: SpellsConfig {
            failure_output: parsed.spells.failure_output,
        },
        llm: LlmConfig {
            provider: parsed.llm.provider,
            openai: OpenAiConfig {
                api_base_url: parsed.llm.openai.api_base_url,
                model: parsed.llm.openai.model,
                temperature: parsed.llm.openai.temperature,
                timeout_seconds: parsed.llm.openai.timeout_seconds,
            },
        },
        llm_api_key: env::var("LLM_API_KEY").ok(),
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// Safe `Config` for unit tests — dummy LLM, no API keys, no external calls.
#[cfg(test)]
impl Config {
    pub fn test_default(spells_dir: &Path) -> Self {
        Self {
            daemon_name: "test".into(),
            spells_dir: spells_dir.to_path_buf(),
            log_level: "info".into(),
            comms: CommsConfig {
                stdio: StdioConfig { enabled: false },
                http: HttpConfig {
                    enabled: false,
                    bind: default_http_bind(),
                },
            },
            spells: SpellsConfig {
                failure_output: FailureOutput::Empty,
            },
            llm: LlmConfig {
                provider: "dummy".into(),
                openai: OpenAiConfig {
                    api_base_url: "http://localhost:0/v1/chat/completions".into(),
                    model: "test-model".into(),
                    temperature: 0.0,
                    timeout_seconds: 1,
                },
            },
            llm_api_key: None,
        }
    }
}
