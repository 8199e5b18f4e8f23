//! Configuration system for the Agents SDK
//!
//! Provides defaults for agents, guardrails and the runner's authority.
//! Values come from code ([`ConfigBuilder`]), the environment ([`from_env`])
//! or a TOML file ([`from_file`]).

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::agent::DEFAULT_MAX_STEPS;
use crate::error::Result;
use crate::guardrail::{DEFAULT_CATEGORIES, DEFAULT_THRESHOLD};
use crate::run::ToolUseBehavior;

/// Global SDK configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// Step budget for agents built without an explicit one
    pub default_max_steps: usize,

    /// Tool-use policy for agents built without an explicit one
    pub default_tool_use_behavior: ToolUseBehavior,

    /// Threshold for guardrails built from this config
    pub guardrail_threshold: u32,

    /// Categories scored by content-filter guardrails
    pub content_filter_categories: Vec<String>,

    /// Principal allowed to register, unregister and tear down
    pub owner: String,

    /// Enable debug logging
    pub debug_mode: bool,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            default_max_steps: DEFAULT_MAX_STEPS,
            default_tool_use_behavior: ToolUseBehavior::default(),
            guardrail_threshold: DEFAULT_THRESHOLD,
            content_filter_categories: DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
            owner: "owner".to_string(),
            debug_mode: false,
        }
    }
}

/// Configuration builder
pub struct ConfigBuilder {
    config: SdkConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SdkConfig::default(),
        }
    }

    pub fn max_steps(mut self, steps: usize) -> Self {
        self.config.default_max_steps = steps.max(1);
        self
    }

    pub fn tool_use_behavior(mut self, behavior: ToolUseBehavior) -> Self {
        self.config.default_tool_use_behavior = behavior;
        self
    }

    pub fn guardrail_threshold(mut self, threshold: u32) -> Self {
        self.config.guardrail_threshold = threshold;
        self
    }

    pub fn categories<S: Into<String>>(mut self, categories: impl IntoIterator<Item = S>) -> Self {
        self.config.content_filter_categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.config.owner = owner.into();
        self
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.config.debug_mode = enabled;
        self
    }

    pub fn build(self) -> SdkConfig {
        self.config
    }
}

/// Load configuration from environment variables
///
/// Unparsable values are logged and ignored.
pub fn from_env() -> SdkConfig {
    from_lookup(|key| std::env::var(key).ok())
}

fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> SdkConfig {
    let mut config = SdkConfig::default();

    if let Some(steps) = lookup("AGENTS_MAX_STEPS") {
        match steps.parse::<usize>() {
            Ok(steps) if steps > 0 => config.default_max_steps = steps,
            _ => warn!(value = %steps, "Ignoring AGENTS_MAX_STEPS"),
        }
    }

    if let Some(behavior) = lookup("AGENTS_TOOL_USE") {
        match behavior.parse::<ToolUseBehavior>() {
            Ok(behavior) => config.default_tool_use_behavior = behavior,
            Err(e) => warn!(error = %e, "Ignoring AGENTS_TOOL_USE"),
        }
    }

    if let Some(threshold) = lookup("AGENTS_GUARDRAIL_THRESHOLD") {
        match threshold.parse::<u32>() {
            Ok(threshold) => config.guardrail_threshold = threshold,
            Err(_) => warn!(value = %threshold, "Ignoring AGENTS_GUARDRAIL_THRESHOLD"),
        }
    }

    if let Some(owner) = lookup("AGENTS_OWNER") {
        if !owner.is_empty() {
            config.owner = owner;
        }
    }

    if let Some(debug) = lookup("AGENTS_DEBUG") {
        config.debug_mode = debug.to_lowercase() == "true" || debug == "1";
    }

    config
}

/// Load configuration from a TOML file
pub fn from_file(path: impl AsRef<Path>) -> Result<SdkConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: SdkConfig = toml::from_str(&contents)?;
    Ok(config)
}
