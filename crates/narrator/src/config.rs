//! Configuration loading and parsing.
//!
//! Settings come from an optional TOML file; command-line flags override them.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use narration_player::EngineConfig;
use serde::Deserialize;

use crate::cli::Args;

const DEFAULT_CONFIG_FILE: &str = "narrator.toml";

/// Top-level configuration loaded from TOML.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct NarratorConfig {
    pub synthesis: SynthesisConfig,
    pub source: SourceConfig,
    pub playback: EngineConfig,
    pub output: OutputConfig,
}

/// Speech synthesis endpoint settings.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,
    /// Speech model name.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Sample rate of the raw PCM the endpoint returns.
    pub sample_rate: u32,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini-tts".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            sample_rate: 24_000,
            timeout_ms: 60_000,
        }
    }
}

/// Article fetching settings.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    /// Page fetch timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

/// Audio output settings.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Output device substring; the default device when unset.
    pub device: Option<String>,
    /// Play against the wall clock without opening a device.
    pub silent: bool,
}

impl NarratorConfig {
    /// Load a config file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("parse config {:?}", path))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str::<NarratorConfig>(raw)?)
    }

    /// Load `explicit` if given, else the default file next to the executable, else defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match default_config_path().filter(|p| p.is_file()) {
            Some(path) => {
                tracing::info!(path = ?path, "using config file");
                Self::load(&path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Apply command-line overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(voice) = args.voice.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            self.playback.voice = voice.to_string();
        }
        if let Some(rate) = args.rate {
            self.playback.initial_rate = rate;
        }
        if let Some(window) = args.prefetch_window {
            self.playback.prefetch_window = window;
        }
        if let Some(max_chars) = args.max_chunk_chars {
            self.playback.max_chunk_chars = max_chars;
        }
        if args.device.is_some() {
            self.output.device = args.device.clone();
        }
        self.output.device = normalize_device_name(self.output.device.take());
        self.output.silent |= args.silent;
    }
}

fn default_config_path() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    Some(exe.parent()?.join(DEFAULT_CONFIG_FILE))
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
