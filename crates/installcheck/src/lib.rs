//! # installcheck
//!
//! Smoke-tests that a published npm package actually installs and works,
//! the way its users will install it.
//!
//! A run exercises four scenarios in a fixed order:
//!
//! 1. **local**: `npm install <name>@<version>` into a scratch project, then
//!    load the package with `require` (and `import` on a new enough Node) and
//!    call one numeric function from the main entry and one from a sub-module.
//! 2. **local-source**: the same, installing `<repository>#<reference>`.
//! 3. **global**: `npm install --global`, run the package's CLI with
//!    `--help`, uninstall, and list global packages before and after.
//! 4. **global-source**: the same, from source control.
//!
//! Each scenario is retried once after a fixed backoff. The first scenario
//! that still fails ends the run. A heartbeat thread prints a liveness line
//! throughout so CI hosts do not kill a job that is quietly waiting on the
//! network.
//!
//! ## Example
//!
//! ```ignore
//! use std::path::PathBuf;
//! use installcheck::engine::{self, Reporter, RunHooks};
//! use installcheck::types::RunOptions;
//!
//! let opts = RunOptions {
//!     manager: "npm".to_string(),
//!     install_dir: PathBuf::from("/tmp/installcheck"),
//!     log_file: PathBuf::from("install.log"),
//!     config: installcheck_config::load_config(".".as_ref())?,
//!     receipt_path: None,
//! };
//! let receipt = engine::run_checks(&opts, RunHooks::default(), &mut reporter)?;
//! ```
//!
//! ## Modules
//!
//! - [`engine`]: the top-level driver and the [`engine::Reporter`] trait
//! - [`scenario`]: scenario plans and the step runner
//! - [`manager`]: package-manager command lines
//! - [`probe`]: probe programs and Node version detection
//! - [`transcript`]: append-only log of every external command
//! - [`receipt`]: JSON run summary
//! - [`error`]: typed failures
//! - [`types`]: scenario kinds, phases and run options

/// The top-level driver: heartbeat, retry and scenario ordering.
pub mod engine;

/// Typed failures for scenarios and runs.
pub mod error;

/// Package-manager selection and command construction.
pub mod manager;

/// Probe programs that verify an installed package.
pub mod probe;

/// JSON receipt persistence.
pub mod receipt;

/// Declarative scenario plans and their runner.
pub mod scenario;

/// Append-only command transcript.
pub mod transcript;

/// Domain types: scenario kinds, phases, run options.
pub mod types;

pub use installcheck_config as config;
