use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use installcheck_config::Config;
use serde::{Deserialize, Serialize};

/// One end-to-end install-and-verify sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    Local,
    LocalSource,
    Global,
    GlobalSource,
}

impl ScenarioKind {
    /// Every scenario in execution order.
    pub fn all() -> [ScenarioKind; 4] {
        [
            ScenarioKind::Local,
            ScenarioKind::LocalSource,
            ScenarioKind::Global,
            ScenarioKind::GlobalSource,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScenarioKind::Local => "local",
            ScenarioKind::LocalSource => "local-source",
            ScenarioKind::Global => "global",
            ScenarioKind::GlobalSource => "global-source",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ScenarioKind::Local => "local install",
            ScenarioKind::LocalSource => "local install from source control",
            ScenarioKind::Global => "global install",
            ScenarioKind::GlobalSource => "global install from source control",
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, ScenarioKind::Global | ScenarioKind::GlobalSource)
    }

    pub fn from_source(&self) -> bool {
        matches!(self, ScenarioKind::LocalSource | ScenarioKind::GlobalSource)
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScenarioKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScenarioKind::all()
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| format!("unknown scenario: {s}"))
    }
}

/// Stage of a scenario a step belongs to. Decides the failure reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Setup,
    Install,
    Test,
    Cleanup,
}

impl Phase {
    /// Setup prepares the install, so a setup failure reads as an
    /// installation failure.
    pub fn failure_reason(&self) -> &'static str {
        match self {
            Phase::Setup | Phase::Install => "installation failed",
            Phase::Test => "test script failed",
            Phase::Cleanup => "cleanup failed",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Install => "install",
            Phase::Test => "test",
            Phase::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything one run needs, supplied by the caller.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Package-manager selector as given on the command line
    pub manager: String,
    /// Working directory each scenario creates and removes
    pub install_dir: PathBuf,
    /// Append-only transcript of every external command
    pub log_file: PathBuf,
    pub config: Config,
    /// Where to write the JSON receipt, if anywhere
    pub receipt_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenarios_run_in_fixed_order() {
        let names: Vec<_> = ScenarioKind::all().iter().map(|k| k.name()).collect();
        assert_eq!(names, ["local", "local-source", "global", "global-source"]);
    }

    #[test]
    fn scenario_kind_round_trips_through_name() {
        for kind in ScenarioKind::all() {
            assert_eq!(kind.name().parse::<ScenarioKind>(), Ok(kind));
        }
        assert!("system".parse::<ScenarioKind>().is_err());
    }

    #[test]
    fn scenario_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&ScenarioKind::GlobalSource).expect("serialize");
        assert_eq!(json, "\"global-source\"");
    }

    #[test]
    fn scenario_flags() {
        assert!(!ScenarioKind::Local.is_global());
        assert!(!ScenarioKind::Local.from_source());
        assert!(ScenarioKind::LocalSource.from_source());
        assert!(ScenarioKind::Global.is_global());
        assert!(ScenarioKind::GlobalSource.is_global() && ScenarioKind::GlobalSource.from_source());
    }

    #[test]
    fn phase_failure_reasons() {
        assert_eq!(Phase::Setup.failure_reason(), "installation failed");
        assert_eq!(Phase::Install.failure_reason(), "installation failed");
        assert_eq!(Phase::Test.failure_reason(), "test script failed");
        assert_eq!(Phase::Cleanup.failure_reason(), "cleanup failed");

        let mut reasons: Vec<_> = [Phase::Setup, Phase::Install, Phase::Test, Phase::Cleanup]
            .iter()
            .map(Phase::failure_reason)
            .collect();
        reasons.dedup();
        assert_eq!(reasons.len(), 3);
    }
}
