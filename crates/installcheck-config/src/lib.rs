//! Configuration file handling for installcheck.
//!
//! Settings describe the package under test, the probe programs that
//! verify it, and the knobs of the run itself (heartbeat, retry, tools).
//! They are read from `installcheck.toml` and merged with CLI overrides.
//!
//! # Example
//!
//! ```
//! use installcheck_config::Config;
//!
//! let config: Config = toml::from_str(r#"
//! [package]
//! name = "mathkit"
//! repository = "https://github.com/example/mathkit.git"
//!
//! [probe]
//! function = "add"
//! submodule = "add"
//! "#).expect("parse");
//!
//! config.validate().expect("valid");
//! assert_eq!(config.package.spec(), "mathkit@latest");
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Default configuration file name
pub const CONFIG_FILE: &str = "installcheck.toml";

/// Environment variable overriding the npm executable.
pub const NPM_BIN_ENV: &str = "INSTALLCHECK_NPM_BIN";

/// Environment variable overriding the node executable.
pub const NODE_BIN_ENV: &str = "INSTALLCHECK_NODE_BIN";

/// Get the config file path for a directory
pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Complete installcheck configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub package: PackageConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// The package under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageConfig {
    /// Registry name of the package
    #[serde(default)]
    pub name: Option<String>,
    /// Registry version or dist-tag
    #[serde(default = "default_version")]
    pub version: String,
    /// Source-control URL used by the `*-source` scenarios
    #[serde(default)]
    pub repository: Option<String>,
    /// Branch, tag or commit appended to the repository URL
    #[serde(default = "default_reference")]
    pub reference: String,
    /// Command-line entry point installed globally (defaults to the package name)
    #[serde(default)]
    pub bin: Option<String>,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            name: None,
            version: default_version(),
            repository: None,
            reference: default_reference(),
            bin: None,
        }
    }
}

impl PackageConfig {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    /// `<name>@<version>`, the registry install target.
    pub fn spec(&self) -> String {
        format!("{}@{}", self.name(), self.version)
    }

    /// `<repository>#<reference>`, the source-control install target.
    pub fn source_spec(&self) -> String {
        format!(
            "{}#{}",
            self.repository.as_deref().unwrap_or_default(),
            self.reference
        )
    }

    pub fn bin_name(&self) -> &str {
        self.bin.as_deref().unwrap_or_else(|| self.name())
    }
}

/// What the probe programs load and call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Numeric function exported by the package's main entry point
    #[serde(default)]
    pub function: Option<String>,
    /// Arguments passed to the function
    #[serde(default = "default_probe_args")]
    pub args: Vec<f64>,
    /// Sub-module path, relative to the package (`<name>/<submodule>`)
    #[serde(default)]
    pub submodule: Option<String>,
    /// Export of the sub-module to call (defaults to `function`)
    #[serde(default)]
    pub submodule_export: Option<String>,
    /// Lowest Node major version that also runs the ES-module probes
    #[serde(default = "default_esm_min_node")]
    pub esm_min_node: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            function: None,
            args: default_probe_args(),
            submodule: None,
            submodule_export: None,
            esm_min_node: default_esm_min_node(),
        }
    }
}

impl ProbeConfig {
    pub fn function(&self) -> &str {
        self.function.as_deref().unwrap_or_default()
    }

    pub fn submodule(&self) -> &str {
        self.submodule.as_deref().unwrap_or_default()
    }

    pub fn submodule_export(&self) -> &str {
        self.submodule_export
            .as_deref()
            .unwrap_or_else(|| self.function())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Time between liveness lines
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: default_heartbeat_interval(),
        }
    }
}

/// Pause before the single retry of a failed scenario.
///
/// The attempt count is fixed at two; unknown keys are rejected so a file
/// asking for more attempts or another backoff shape fails to load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(with = "humantime_serde", default = "default_retry_delay")]
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay: default_retry_delay(),
        }
    }
}

/// External tools the run shells out to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub npm: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
    /// Kill any single external command that runs longer than this
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl ToolsConfig {
    /// npm executable: `INSTALLCHECK_NPM_BIN`, then the config file, then `npm`.
    pub fn npm_program(&self) -> String {
        resolve_program(NPM_BIN_ENV, self.npm.as_deref(), "npm")
    }

    /// node executable: `INSTALLCHECK_NODE_BIN`, then the config file, then `node`.
    pub fn node_program(&self) -> String {
        resolve_program(NODE_BIN_ENV, self.node.as_deref(), "node")
    }
}

fn resolve_program(env_key: &str, configured: Option<&str>, fallback: &str) -> String {
    env::var(env_key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| configured.map(str::to_string))
        .unwrap_or_else(|| fallback.to_string())
}

fn default_version() -> String {
    "latest".to_string()
}

fn default_reference() -> String {
    "main".to_string()
}

fn default_probe_args() -> Vec<f64> {
    vec![1.0, 2.0]
}

fn default_esm_min_node() -> u64 {
    14
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_retry_delay() -> Duration {
    installcheck_retry::DEFAULT_BACKOFF
}

/// CLI overrides for merging with config file values.
///
/// `None` means "user did not pass this flag".
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub package: Option<String>,
    pub version: Option<String>,
    pub repository: Option<String>,
    pub reference: Option<String>,
    pub bin: Option<String>,
    pub heartbeat_interval: Option<Duration>,
    pub retry_delay: Option<Duration>,
    pub command_timeout: Option<Duration>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a specific file path
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Apply CLI overrides; CLI values take precedence over the file.
    pub fn apply_overrides(&mut self, cli: CliOverrides) {
        if let Some(name) = cli.package {
            self.package.name = Some(name);
        }
        if let Some(version) = cli.version {
            self.package.version = version;
        }
        if let Some(repository) = cli.repository {
            self.package.repository = Some(repository);
        }
        if let Some(reference) = cli.reference {
            self.package.reference = reference;
        }
        if let Some(bin) = cli.bin {
            self.package.bin = Some(bin);
        }
        if let Some(interval) = cli.heartbeat_interval {
            self.heartbeat.interval = interval;
        }
        if let Some(delay) = cli.retry_delay {
            self.retry.delay = delay;
        }
        if let Some(timeout) = cli.command_timeout {
            self.tools.timeout = Some(timeout);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.package.name().trim().is_empty() {
            bail!("package.name is required (set it in {CONFIG_FILE} or pass --package)");
        }
        if self.package.version.trim().is_empty() {
            bail!("package.version cannot be empty");
        }
        match self.package.repository.as_deref() {
            Some(repo) if !repo.trim().is_empty() => {}
            _ => bail!("package.repository is required for the source-control scenarios"),
        }
        if self.package.reference.trim().is_empty() {
            bail!("package.reference cannot be empty");
        }
        if self.package.bin_name().trim().is_empty() {
            bail!("package.bin cannot be empty");
        }

        if self.probe.function().trim().is_empty() {
            bail!("probe.function is required");
        }
        if self.probe.submodule().trim().is_empty() {
            bail!("probe.submodule is required");
        }
        if self.probe.args.iter().any(|a| !a.is_finite()) {
            bail!("probe.args must be finite numbers");
        }

        if self.heartbeat.interval.is_zero() {
            bail!("heartbeat.interval must be greater than 0");
        }

        if let Some(timeout) = self.tools.timeout
            && timeout.is_zero()
        {
            bail!("tools.timeout must be greater than 0");
        }

        Ok(())
    }
}

/// Load `installcheck.toml` from `dir`, or defaults when it does not exist.
pub fn load_config(dir: &Path) -> Result<Config> {
    let path = config_path(dir);
    if !path.exists() {
        return Ok(Config::default());
    }
    Config::load_from_file(&path)
}
