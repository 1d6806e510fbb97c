use super::{default_state_root, ConfigError};
use crate::coordination::CapabilityKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_LOW_CONFIDENCE_THRESHOLD: u8 = 60;
pub const DEFAULT_REQUEST_CONTEXT_MAX_CHARS: usize = 400;
pub const MIN_REQUEST_CONTEXT_MAX_CHARS: usize = 16;
pub const DEFAULT_CAPABILITY_TIMEOUT_SECONDS: u64 = 300;
pub const DEFAULT_RUN_LEASE_SECONDS: u64 = 900;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    File,
    Sqlite,
}

impl StoreKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Sqlite => "sqlite",
        }
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub state_root: Option<PathBuf>,
    #[serde(default)]
    pub store: StoreKind,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub capabilities: CapabilitySettings,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct EngineSettings {
    #[serde(default = "default_low_confidence_threshold")]
    pub low_confidence_threshold: u8,
    #[serde(default = "default_request_context_max_chars")]
    pub request_context_max_chars: usize,
    #[serde(default = "default_run_lease_seconds")]
    pub run_lease_seconds: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            low_confidence_threshold: DEFAULT_LOW_CONFIDENCE_THRESHOLD,
            request_context_max_chars: DEFAULT_REQUEST_CONTEXT_MAX_CHARS,
            run_lease_seconds: DEFAULT_RUN_LEASE_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CapabilitySettings {
    pub diagnosis: Option<CapabilityCommandConfig>,
    pub automation: Option<CapabilityCommandConfig>,
    pub writing: Option<CapabilityCommandConfig>,
}

impl CapabilitySettings {
    pub fn for_kind(&self, kind: CapabilityKind) -> Option<&CapabilityCommandConfig> {
        match kind {
            CapabilityKind::Diagnosis => self.diagnosis.as_ref(),
            CapabilityKind::Automation => self.automation.as_ref(),
            CapabilityKind::Writing => self.writing.as_ref(),
        }
    }

    pub fn require(&self, kind: CapabilityKind) -> Result<&CapabilityCommandConfig, ConfigError> {
        self.for_kind(kind)
            .ok_or_else(|| ConfigError::MissingCapability {
                kind: kind.to_string(),
            })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CapabilityCommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_capability_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_low_confidence_threshold() -> u8 {
    DEFAULT_LOW_CONFIDENCE_THRESHOLD
}

fn default_request_context_max_chars() -> usize {
    DEFAULT_REQUEST_CONTEXT_MAX_CHARS
}

fn default_run_lease_seconds() -> u64 {
    DEFAULT_RUN_LEASE_SECONDS
}

fn default_capability_timeout_seconds() -> u64 {
    DEFAULT_CAPABILITY_TIMEOUT_SECONDS
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(state_root) = &self.state_root {
            if !state_root.is_absolute() {
                return Err(ConfigError::Settings(
                    "`state_root` must be an absolute path".to_string(),
                ));
            }
        }

        if self.engine.low_confidence_threshold > 100 {
            return Err(ConfigError::Settings(
                "engine.low_confidence_threshold must be between 0 and 100".to_string(),
            ));
        }
        if self.engine.request_context_max_chars < MIN_REQUEST_CONTEXT_MAX_CHARS {
            return Err(ConfigError::Settings(format!(
                "engine.request_context_max_chars must be >= {MIN_REQUEST_CONTEXT_MAX_CHARS}"
            )));
        }

        if self.engine.run_lease_seconds == 0 {
            return Err(ConfigError::Settings(
                "engine.run_lease_seconds must be > 0".to_string(),
            ));
        }

        for kind in CapabilityKind::ALL {
            let Some(command) = self.capabilities.for_kind(kind) else {
                continue;
            };
            if command.program.trim().is_empty() {
                return Err(ConfigError::Settings(format!(
                    "capabilities.{kind}.program must be non-empty"
                )));
            }
            if command.timeout_seconds == 0 {
                return Err(ConfigError::Settings(format!(
                    "capabilities.{kind}.timeout_seconds must be > 0"
                )));
            }
        }

        Ok(())
    }

    pub fn resolve_state_root(&self) -> Result<PathBuf, ConfigError> {
        match &self.state_root {
            Some(path) => Ok(path.clone()),
            None => default_state_root(),
        }
    }
}
