//! Configuration for the provisioning service

use crate::error::ConfigError;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_QUEUE_CAPACITY: usize = 5;
pub const MAX_STATUS_RETRY_ATTEMPTS: u32 = 10;
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_TOOL: &str = "sf";
const DEFAULT_TARGET_FLAG: &str = "--target-org";
const DEFAULT_SHORT_TARGET_FLAG: &str = "-o";
const DEFAULT_DEFINITION_FILE: &str = "config/project-scratch-def.json";
const DEFAULT_DURATION_DAYS: u32 = 30;
const DEFAULT_ALIAS: &str = "MyScratchOrg";
const DEFAULT_INIT_SCRIPT: &str = "orgInit.sh";
const DEFAULT_POLICY_DIR: &str = "force-app/main/default/transactionSecurityPolicies";
const DEFAULT_POLICY_SUFFIX: &str = ".transactionSecurityPolicy-meta.xml";
const DEFAULT_SUBJECT_PREFIX: &str = "provision.v1";

/// Configuration for the provisioning daemon
#[derive(Debug, Clone, Parser)]
#[command(name = "provisiond")]
#[command(about = "Turns repository references into ephemeral environments")]
pub struct Config {
    /// HTTP listen port
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory under which per-request workspaces are cloned
    #[arg(long, env, default_value = "workspaces")]
    pub workspace_root: PathBuf,

    /// Directory holding the local tracking-record store (in-memory if unset)
    #[arg(long, env)]
    pub state_dir: Option<PathBuf>,

    /// Maximum concurrent environment-creation calls
    #[arg(long, env, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Environment-management CLI binary
    #[arg(long, env, default_value = DEFAULT_TOOL)]
    pub tool: String,

    /// Flag binding a tool invocation to a target environment
    #[arg(long, env, default_value = DEFAULT_TARGET_FLAG)]
    pub target_flag: String,

    /// Short form of the target flag
    #[arg(long, env, default_value = DEFAULT_SHORT_TARGET_FLAG)]
    pub short_target_flag: String,

    /// Definition file path, relative to the workspace
    #[arg(long, env, default_value = DEFAULT_DEFINITION_FILE)]
    pub definition_file: PathBuf,

    /// Lifetime requested for each environment, in days
    #[arg(long, env, default_value_t = DEFAULT_DURATION_DAYS)]
    pub duration_days: u32,

    /// Alias assigned to newly created environments
    #[arg(long, env, default_value = DEFAULT_ALIAS)]
    pub environment_alias: String,

    /// Init script path, relative to the workspace
    #[arg(long, env, default_value = DEFAULT_INIT_SCRIPT)]
    pub init_script: PathBuf,

    /// Policy directory, relative to the workspace
    #[arg(long, env, default_value = DEFAULT_POLICY_DIR)]
    pub policy_dir: PathBuf,

    /// File-name suffix identifying policy files
    #[arg(long, env, default_value = DEFAULT_POLICY_SUFFIX)]
    pub policy_suffix: String,

    /// Kill external commands running longer than this (no limit if unset)
    #[arg(long, env)]
    pub command_timeout_secs: Option<u64>,

    /// Extra attempts for a failed status write (at most 10)
    #[arg(long, env, default_value_t = 2)]
    pub status_retry_attempts: u32,

    /// Initial backoff between status write attempts, doubled per attempt
    #[arg(long, env, default_value_t = 500)]
    pub status_retry_backoff_ms: u64,

    /// NATS server URL; events are only logged when unset
    #[arg(long, env)]
    pub nats_url: Option<String>,

    /// Path to NATS credentials file
    #[arg(long, env)]
    pub nats_creds_path: Option<String>,

    /// Subject prefix for published events
    #[arg(long, env, default_value = DEFAULT_SUBJECT_PREFIX)]
    pub event_subject_prefix: String,

    /// JSON credentials file read on every authentication
    #[arg(long, env)]
    pub credentials_file: Option<PathBuf>,

    /// Output logs in JSON format
    #[arg(long, env)]
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            workspace_root: PathBuf::from("workspaces"),
            state_dir: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            tool: DEFAULT_TOOL.to_string(),
            target_flag: DEFAULT_TARGET_FLAG.to_string(),
            short_target_flag: DEFAULT_SHORT_TARGET_FLAG.to_string(),
            definition_file: PathBuf::from(DEFAULT_DEFINITION_FILE),
            duration_days: DEFAULT_DURATION_DAYS,
            environment_alias: DEFAULT_ALIAS.to_string(),
            init_script: PathBuf::from(DEFAULT_INIT_SCRIPT),
            policy_dir: PathBuf::from(DEFAULT_POLICY_DIR),
            policy_suffix: DEFAULT_POLICY_SUFFIX.to_string(),
            command_timeout_secs: None,
            status_retry_attempts: 2,
            status_retry_backoff_ms: 500,
            nats_url: None,
            nats_creds_path: None,
            event_subject_prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
            credentials_file: None,
            log_json: false,
        }
    }
}

impl Config {
    /// Parse configuration from command-line args and environment variables
    pub fn parse_config() -> Self {
        Config::parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidCapacity {
                capacity: self.queue_capacity,
            });
        }
        if self.tool.trim().is_empty() {
            return Err(ConfigError::EmptySetting { field: "tool" });
        }
        if self.target_flag.trim().is_empty() {
            return Err(ConfigError::EmptySetting {
                field: "target_flag",
            });
        }
        if self.status_retry_attempts > MAX_STATUS_RETRY_ATTEMPTS {
            return Err(ConfigError::OutOfRange {
                field: "status_retry_attempts",
                value: u64::from(self.status_retry_attempts),
                max: u64::from(MAX_STATUS_RETRY_ATTEMPTS),
            });
        }
        if self.policy_suffix.is_empty() {
            return Err(ConfigError::EmptySetting {
                field: "policy_suffix",
            });
        }
        Ok(())
    }

    pub fn records_path(&self) -> Option<PathBuf> {
        self.state_dir.as_ref().map(|dir| dir.join("records.json"))
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    pub fn tool_settings(&self) -> ToolSettings {
        ToolSettings {
            binary: self.tool.clone(),
            target_flag: self.target_flag.clone(),
            short_target_flag: Some(self.short_target_flag.clone())
                .filter(|flag| !flag.trim().is_empty()),
            definition_file: self.definition_file.clone(),
            duration_days: self.duration_days,
            alias: self.environment_alias.clone(),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            init_script: self.init_script.clone(),
            policy_dir: self.policy_dir.clone(),
            policy_suffix: self.policy_suffix.clone(),
        }
    }

    pub fn reporter_settings(&self) -> ReporterSettings {
        ReporterSettings {
            retry_attempts: self.status_retry_attempts,
            retry_backoff: Duration::from_millis(self.status_retry_backoff_ms),
        }
    }
}

/// How the environment-management CLI is invoked.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub binary: String,
    pub target_flag: String,
    pub short_target_flag: Option<String>,
    pub definition_file: PathBuf,
    pub duration_days: u32,
    pub alias: String,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Config::default().tool_settings()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub init_script: PathBuf,
    pub policy_dir: PathBuf,
    pub policy_suffix: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Config::default().pipeline_settings()
    }
}

#[derive(Debug, Clone)]
pub struct ReporterSettings {
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for ReporterSettings {
    fn default() -> Self {
        Config::default().reporter_settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_capacity, 5);
        assert!(config.records_path().is_none());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = Config {
            queue_capacity: 0,
            ..Config::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidCapacity { capacity: 0 })
        );
    }

    #[test]
    fn test_empty_tool_rejected() {
        let config = Config {
            tool: "  ".to_string(),
            ..Config::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::EmptySetting { field: "tool" })
        );
    }

    #[test]
    fn test_excessive_retry_attempts_rejected() {
        let config = Config {
            status_retry_attempts: 40,
            ..Config::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                field: "status_retry_attempts",
                value: 40,
                max: 10,
            })
        );
    }

    #[test]
    fn test_parse_from_args() {
        let config = Config::try_parse_from([
            "provisiond",
            "--queue-capacity",
            "2",
            "--state-dir",
            "/var/lib/provisiond",
            "--command-timeout-secs",
            "900",
        ])
        .unwrap();

        assert_eq!(config.queue_capacity, 2);
        assert_eq!(
            config.records_path(),
            Some(PathBuf::from("/var/lib/provisiond/records.json"))
        );
        assert_eq!(config.command_timeout(), Some(Duration::from_secs(900)));
    }

    #[test]
    fn test_blank_short_flag_disabled() {
        let config = Config {
            short_target_flag: String::new(),
            ..Config::default()
        };
        assert!(config.tool_settings().short_target_flag.is_none());
    }
}
