#![forbid(unsafe_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    /// Over-budget alignments fail.
    #[default]
    Strict,
    /// Over-budget alignments proceed and are flagged in the ledger.
    Hardened,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Allow,
    Reject,
}

/// Shape of one alignment about to be materialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentRequest {
    /// Operation name, e.g. `"series.add"` or `"frame.sub_row"`.
    pub operation: String,
    pub left_shape: (usize, usize),
    pub right_shape: (usize, usize),
    pub aligned_shape: (usize, usize),
    /// Output cells that at least one operand could not supply.
    pub unmatched_cells: usize,
}

impl AlignmentRequest {
    #[must_use]
    pub fn aligned_cells(&self) -> usize {
        self.aligned_shape.0.saturating_mul(self.aligned_shape.1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentRecord {
    pub ts_unix_ms: u64,
    pub mode: RuntimeMode,
    pub action: DecisionAction,
    pub over_budget: bool,
    pub request: AlignmentRequest,
}

/// Append-only log of alignment decisions.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceLedger {
    records: Vec<AlignmentRecord>,
}

impl EvidenceLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: AlignmentRecord) {
        self.records.push(record);
    }

    #[must_use]
    pub fn records(&self) -> &[AlignmentRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// One JSON object per line, oldest first.
    pub fn to_json_lines(&self) -> Result<String, RuntimeError> {
        let mut out = String::new();
        for record in &self.records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }
}

/// Admission policy consulted before an aligned result is materialized.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimePolicy {
    pub mode: RuntimeMode,
    /// Upper bound on rows × columns of an aligned result. `None` is unbounded.
    pub max_aligned_cells: Option<usize>,
}

impl RuntimePolicy {
    #[must_use]
    pub fn strict() -> Self {
        Self {
            mode: RuntimeMode::Strict,
            max_aligned_cells: None,
        }
    }

    #[must_use]
    pub fn strict_with_cap(max_aligned_cells: usize) -> Self {
        Self {
            mode: RuntimeMode::Strict,
            max_aligned_cells: Some(max_aligned_cells),
        }
    }

    #[must_use]
    pub fn hardened(max_aligned_cells: Option<usize>) -> Self {
        Self {
            mode: RuntimeMode::Hardened,
            max_aligned_cells,
        }
    }

    /// Parse a policy from JSON, e.g. `{"mode":"hardened","max_aligned_cells":1000}`.
    /// Missing fields take their defaults.
    pub fn from_json_str(text: &str) -> Result<Self, RuntimeError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn decide_alignment_admission(
        &self,
        request: AlignmentRequest,
        ledger: &mut EvidenceLedger,
    ) -> DecisionAction {
        let cells = request.aligned_cells();
        let over_budget = self.max_aligned_cells.is_some_and(|cap| cells > cap);
        let action = match (self.mode, over_budget) {
            (RuntimeMode::Strict, true) => DecisionAction::Reject,
            _ => DecisionAction::Allow,
        };

        if over_budget {
            log::warn!(
                "{}: aligned result of {cells} cells exceeds cap {:?} ({:?} -> {:?})",
                request.operation,
                self.max_aligned_cells,
                self.mode,
                action
            );
        } else {
            log::debug!(
                "{}: aligned {:?} with {:?} into {:?}, {} unmatched cells",
                request.operation,
                request.left_shape,
                request.right_shape,
                request.aligned_shape,
                request.unmatched_cells
            );
        }

        ledger.push(AlignmentRecord {
            ts_unix_ms: now_unix_ms().unwrap_or_default(),
            mode: self.mode,
            action,
            over_budget,
            request,
        });
        action
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("system clock is before UNIX_EPOCH")]
    ClockSkew,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn now_unix_ms() -> Result<u64, RuntimeError> {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| RuntimeError::ClockSkew)?
        .as_millis();
    Ok(u64::try_from(ms).unwrap_or(u64::MAX))
}
