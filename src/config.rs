use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::PotemkinError;
use crate::poll::{Backoff, PollPolicy};
use crate::provision::BackendKind;
use crate::{
    DEFAULT_CFN_POLL_INTERVAL_SECS, DEFAULT_CFN_POLL_MAX_ATTEMPTS, DEFAULT_CFN_STACK_TIMEOUT_MINUTES,
    DEFAULT_POLL_INTERVAL_SECS, DEFAULT_POLL_TIMEOUT_SECS,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PotemkinConfig {
    pub aws_profile: Option<String>,
    pub region: Option<String>,
    /// Overrides the endpoint of every AWS client, e.g. for LocalStack
    pub endpoint_url: Option<String>,
    pub backend: BackendKind,
    pub teardown: bool,
    pub poll: PollSettings,
    pub cloudformation: CloudFormationSettings,
    pub terraform: TerraformSettings,
}

impl Default for PotemkinConfig {
    fn default() -> Self {
        Self {
            aws_profile: None,
            region: None,
            endpoint_url: None,
            backend: BackendKind::default(),
            teardown: true,
            poll: PollSettings::default(),
            cloudformation: CloudFormationSettings::default(),
            terraform: TerraformSettings::default(),
        }
    }
}

/// Timing of the compliance wait helpers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub timeout_secs: u64,
    pub interval_secs: u64,
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
            interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_attempts: None,
            backoff: Backoff::Fixed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudFormationSettings {
    pub stack_timeout_minutes: i32,
    pub poll_interval_secs: u64,
    pub poll_max_attempts: u32,
}

impl Default for CloudFormationSettings {
    fn default() -> Self {
        Self {
            stack_timeout_minutes: DEFAULT_CFN_STACK_TIMEOUT_MINUTES,
            poll_interval_secs: DEFAULT_CFN_POLL_INTERVAL_SECS,
            poll_max_attempts: DEFAULT_CFN_POLL_MAX_ATTEMPTS,
        }
    }
}

impl CloudFormationSettings {
    /// Stack waits give up after `poll_max_attempts` describes, spaced
    /// `poll_interval_secs` apart
    pub fn poll_policy(&self) -> PollPolicy {
        let interval = Duration::from_secs(self.poll_interval_secs);
        let timeout = interval.saturating_mul(self.poll_max_attempts);
        PollPolicy::new(timeout, interval).max_attempts(self.poll_max_attempts)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerraformSettings {
    pub binary: String,
}

impl Default for TerraformSettings {
    fn default() -> Self {
        Self {
            binary: "terraform".to_string(),
        }
    }
}

impl PotemkinConfig {
    pub fn validate(&self) -> Result<(), PotemkinError> {
        if self.poll.interval_secs == 0 {
            return Err(PotemkinError::InvalidConfig(
                "poll.interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.poll.timeout_secs == 0 {
            return Err(PotemkinError::InvalidConfig(
                "poll.timeout_secs must be greater than 0".to_string(),
            ));
        }

        if !fits_deadline(self.poll_timeout()) {
            return Err(PotemkinError::InvalidConfig(format!(
                "poll.timeout_secs {} is too large",
                self.poll.timeout_secs
            )));
        }

        if self.cloudformation.stack_timeout_minutes <= 0 {
            return Err(PotemkinError::InvalidConfig(
                "cloudformation.stack_timeout_minutes must be greater than 0".to_string(),
            ));
        }

        if self.cloudformation.poll_interval_secs == 0 || self.cloudformation.poll_max_attempts == 0
        {
            return Err(PotemkinError::InvalidConfig(
                "cloudformation polling needs a non-zero interval and attempt count".to_string(),
            ));
        }

        if !fits_deadline(self.cloudformation.poll_policy().timeout) {
            return Err(PotemkinError::InvalidConfig(
                "cloudformation.poll_interval_secs * poll_max_attempts is too large".to_string(),
            ));
        }

        if self.terraform.binary.trim().is_empty() {
            return Err(PotemkinError::InvalidConfig(
                "terraform.binary must not be empty".to_string(),
            ));
        }

        self.poll_policy().validate()
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll.interval_secs)
    }

    /// Policy used by the compliance wait helpers
    pub fn poll_policy(&self) -> PollPolicy {
        let mut policy =
            PollPolicy::new(self.poll_timeout(), self.poll_interval()).backoff(self.poll.backoff.clone());
        policy.max_attempts = self.poll.max_attempts;
        policy
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply `POTEMKIN_*` overrides read through `lookup`. Values that do not
    /// parse are logged and ignored.
    pub fn apply_env_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(profile) = lookup("POTEMKIN_AWS_PROFILE") {
            self.aws_profile = Some(profile);
        }

        if let Some(region) = lookup("POTEMKIN_REGION") {
            self.region = Some(region);
        }

        if let Some(endpoint) = lookup("POTEMKIN_ENDPOINT_URL") {
            self.endpoint_url = Some(endpoint);
        }

        if let Some(backend) = lookup("POTEMKIN_BACKEND") {
            match backend.parse() {
                Ok(kind) => self.backend = kind,
                Err(e) => log::warn!("Ignoring POTEMKIN_BACKEND: {e}"),
            }
        }

        if let Some(teardown) = lookup("POTEMKIN_TEARDOWN") {
            match parse_flag(&teardown) {
                Some(flag) => self.teardown = flag,
                None => log::warn!("Ignoring POTEMKIN_TEARDOWN: not a boolean: {teardown}"),
            }
        }

        if let Some(timeout_str) = lookup("POTEMKIN_POLL_TIMEOUT_SECS") {
            if let Ok(timeout_secs) = timeout_str.parse::<u64>() {
                self.poll.timeout_secs = timeout_secs;
            }
        }

        if let Some(interval_str) = lookup("POTEMKIN_POLL_INTERVAL_SECS") {
            if let Ok(interval_secs) = interval_str.parse::<u64>() {
                self.poll.interval_secs = interval_secs;
            }
        }

        if let Some(binary) = lookup("POTEMKIN_TERRAFORM_BINARY") {
            self.terraform.binary = binary;
        }
    }
}

/// A configured timeout must be addable to the current instant
fn fits_deadline(timeout: Duration) -> bool {
    tokio::time::Instant::now().checked_add(timeout).is_some()
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Load configuration: env vars > config file > defaults
pub fn load_config(config_path: Option<&str>) -> Result<PotemkinConfig> {
    let mut config = match config_path {
        Some(path) if Path::new(path).exists() => {
            let file_content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {path}"))?;
            let config = parse_config(&file_content)
                .with_context(|| format!("Failed to parse config file: {path}"))?;
            log::info!("Loaded configuration from file: {path}");
            config
        }
        Some(path) => {
            log::info!("Config file not found: {path}, using defaults");
            PotemkinConfig::default()
        }
        None => PotemkinConfig::default(),
    };

    config.apply_env_overrides();

    config
        .validate()
        .with_context(|| "Configuration validation failed")?;

    log::debug!("Final config: {config:?}");
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<PotemkinConfig, PotemkinError> {
    Ok(toml::from_str(content)?)
}
