//! Engine configuration.

use serde::Deserialize;
use std::path::PathBuf;

/// Engine configuration loaded from environment variables.
///
/// Environment variables are prefixed with `CARDFLOW_`:
/// - `CARDFLOW_COMMAND_TIMEOUT_SECS`: Command step timeout (default: 60)
/// - `CARDFLOW_COMMAND_MAX_RETRIES`: Retries for transient transport errors (default: 2)
/// - `CARDFLOW_COMMAND_RETRY_DELAY_MS`: Delay between retries (default: 500)
/// - `CARDFLOW_APDU_FAILURE_STATUS_WORDS`: Comma separated status words treated as failure
/// - `CARDFLOW_TEMP_ROOT`: Directory under which scratch directories are created
/// - `CARDFLOW_HEADLESS`: Resolve interactive steps from pre-supplied values (default: false)
/// - `CARDFLOW_SCRIPT_MAX_OPERATIONS`: Operation budget for sandboxed scripts
/// - `CARDFLOW_SCRIPT_MAX_STRING_SIZE`: Largest string a sandboxed script may build
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Command step timeout in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Retries for transient card-transport errors reported by commands
    #[serde(default = "default_max_retries")]
    pub command_max_retries: u32,

    /// Delay between command retries in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub command_retry_delay_ms: u64,

    /// Status words (or prefixes) an APDU step treats as failure when no
    /// expected status word is given
    #[serde(default = "default_failure_status_words")]
    pub apdu_failure_status_words: Vec<String>,

    /// Root directory for scratch directories (system temp dir if unset)
    #[serde(default)]
    pub temp_root: Option<PathBuf>,

    /// Run interactive steps without prompting
    #[serde(default)]
    pub headless: bool,

    /// Operation budget for sandboxed scripts
    #[serde(default = "default_script_max_operations")]
    pub script_max_operations: u64,

    /// Largest string a sandboxed script may build
    #[serde(default = "default_script_max_string_size")]
    pub script_max_string_size: usize,
}

fn default_command_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    500
}

/// Class not supported, instruction not supported, file not found,
/// conditions of use not satisfied, security status not satisfied.
pub fn default_failure_status_words() -> Vec<String> {
    ["6E00", "6D00", "6A82", "6985", "6982"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_script_max_operations() -> u64 {
    500_000
}

fn default_script_max_string_size() -> usize {
    64 * 1024
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are prefixed with `CARDFLOW_`.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("CARDFLOW_").from_env::<EngineConfig>()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
            command_max_retries: default_max_retries(),
            command_retry_delay_ms: default_retry_delay_ms(),
            apdu_failure_status_words: default_failure_status_words(),
            temp_root: None,
            headless: false,
            script_max_operations: default_script_max_operations(),
            script_max_string_size: default_script_max_string_size(),
        }
    }
}
