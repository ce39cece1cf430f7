//! JSON receipt summarising a run.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Phase, ScenarioKind};

/// Current receipt schema version
pub const RECEIPT_VERSION: &str = "installcheck.receipt.v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub receipt_version: String,
    pub manager: String,
    /// Registry install target, `<name>@<version>`
    pub package: String,
    /// Source-control install target, `<repository>#<reference>`
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub scenarios: Vec<ScenarioReceipt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioReceipt {
    pub scenario: ScenarioKind,
    pub state: ScenarioState,
    pub attempts: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScenarioState {
    Passed,
    Failed { phase: Phase, message: String },
    NotRun,
}

impl Receipt {
    /// A receipt with every scenario marked `not_run`.
    pub fn pending(manager: &str, package: String, source: String) -> Self {
        let now = Utc::now();
        Self {
            receipt_version: RECEIPT_VERSION.to_string(),
            manager: manager.to_string(),
            package,
            source,
            started_at: now,
            finished_at: now,
            success: false,
            scenarios: ScenarioKind::all()
                .into_iter()
                .map(|scenario| ScenarioReceipt {
                    scenario,
                    state: ScenarioState::NotRun,
                    attempts: 0,
                    duration_ms: 0,
                })
                .collect(),
        }
    }

    pub fn scenario_mut(&mut self, kind: ScenarioKind) -> Option<&mut ScenarioReceipt> {
        self.scenarios.iter_mut().find(|s| s.scenario == kind)
    }

    pub fn finish(&mut self) {
        self.finished_at = Utc::now();
        self.success = self
            .scenarios
            .iter()
            .all(|s| s.state == ScenarioState::Passed);
    }
}

/// Write the receipt, replacing any previous file atomically.
pub fn write_receipt(path: &Path, receipt: &Receipt) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create receipt dir {}", parent.display()))?;
    }
    atomic_write_json(path, receipt)
}

pub fn load_receipt(path: &Path) -> Result<Receipt> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read receipt file {}", path.display()))?;
    let receipt: Receipt = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse receipt JSON {}", path.display()))?;
    if receipt.receipt_version != RECEIPT_VERSION {
        bail!(
            "unsupported receipt version {} (expected {RECEIPT_VERSION})",
            receipt.receipt_version
        );
    }
    Ok(receipt)
}

fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let data = serde_json::to_vec_pretty(value).context("failed to serialize JSON")?;

    {
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("failed to create tmp file {}", tmp.display()))?;
        f.write_all(&data)
            .with_context(|| format!("failed to write tmp file {}", tmp.display()))?;
        f.sync_all().ok();
    }

    fs::rename(&tmp, path).with_context(|| {
        format!(
            "failed to rename tmp file {} to {}",
            tmp.display(),
            path.display()
        )
    })
}
