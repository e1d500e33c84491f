//! File lifecycle: statuses, stages and processing modes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tenant::TenantId;

/// Persisted status of a file.
///
/// Ordered: a file only ever moves forward through this list, or jumps to
/// `Error`. `Scored` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Uploaded,
    Parsing,
    Parsed,
    L1,
    L2,
    L3,
    Scored,
    Error,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Uploaded => "uploaded",
            FileStatus::Parsing => "parsing",
            FileStatus::Parsed => "parsed",
            FileStatus::L1 => "l1",
            FileStatus::L2 => "l2",
            FileStatus::L3 => "l3",
            FileStatus::Scored => "scored",
            FileStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Scored | FileStatus::Error)
    }

    fn rank(&self) -> u8 {
        match self {
            FileStatus::Uploaded => 0,
            FileStatus::Parsing => 1,
            FileStatus::Parsed => 2,
            FileStatus::L1 => 3,
            FileStatus::L2 => 4,
            FileStatus::L3 => 5,
            FileStatus::Scored => 6,
            FileStatus::Error => 7,
        }
    }

    /// True when `next` is a forward move. Terminal statuses never move.
    pub fn can_transition_to(&self, next: FileStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == FileStatus::Error || next.rank() > self.rank()
    }

    /// True when this status is at or beyond the status `stage` produces.
    pub fn has_completed(&self, stage: Stage) -> bool {
        *self != FileStatus::Error && self.rank() >= stage.completed_status().rank()
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(FileStatus::Uploaded),
            "parsing" => Ok(FileStatus::Parsing),
            "parsed" => Ok(FileStatus::Parsed),
            "l1" => Ok(FileStatus::L1),
            "l2" => Ok(FileStatus::L2),
            "l3" => Ok(FileStatus::L3),
            "scored" => Ok(FileStatus::Scored),
            "error" => Ok(FileStatus::Error),
            _ => Err(format!("Unknown file status: {}", s)),
        }
    }
}

/// A unit of work that moves a file from one status to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Parse,
    L1,
    L2,
    L3,
    Score,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Parse => "parse",
            Stage::L1 => "l1",
            Stage::L2 => "l2",
            Stage::L3 => "l3",
            Stage::Score => "score",
        }
    }

    /// Status written when the stage finishes.
    pub fn completed_status(&self) -> FileStatus {
        match self {
            Stage::Parse => FileStatus::Parsed,
            Stage::L1 => FileStatus::L1,
            Stage::L2 => FileStatus::L2,
            Stage::L3 => FileStatus::L3,
            Stage::Score => FileStatus::Scored,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parse" => Ok(Stage::Parse),
            "l1" => Ok(Stage::L1),
            "l2" => Ok(Stage::L2),
            "l3" => Ok(Stage::L3),
            "score" => Ok(Stage::Score),
            _ => Err(format!("Unknown stage: {}", s)),
        }
    }
}

/// Review depth requested for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Rules and screening only.
    Economy,
    /// Rules, screening and deep review.
    Thorough,
}

const ECONOMY_STAGES: &[Stage] = &[Stage::Parse, Stage::L1, Stage::L2, Stage::Score];
const THOROUGH_STAGES: &[Stage] = &[Stage::Parse, Stage::L1, Stage::L2, Stage::L3, Stage::Score];

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Economy => "economy",
            ProcessingMode::Thorough => "thorough",
        }
    }

    pub fn stages(&self) -> &'static [Stage] {
        match self {
            ProcessingMode::Economy => ECONOMY_STAGES,
            ProcessingMode::Thorough => THOROUGH_STAGES,
        }
    }

    pub fn first_stage(&self) -> Stage {
        Stage::Parse
    }

    pub fn includes(&self, stage: Stage) -> bool {
        self.stages().contains(&stage)
    }

    pub fn next_stage(&self, after: Stage) -> Option<Stage> {
        let stages = self.stages();
        let pos = stages.iter().position(|s| *s == after)?;
        stages.get(pos + 1).copied()
    }

    /// Statuses from which `stage` may start.
    ///
    /// The parse stage also accepts `Parsing` so that a crashed attempt can
    /// be picked up again.
    pub fn entry_statuses(&self, stage: Stage) -> Vec<FileStatus> {
        let stages = self.stages();
        match stages.iter().position(|s| *s == stage) {
            Some(0) => vec![FileStatus::Uploaded, FileStatus::Parsing],
            Some(pos) => vec![stages[pos - 1].completed_status()],
            None => Vec::new(),
        }
    }
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "economy" => Ok(ProcessingMode::Economy),
            "thorough" => Ok(ProcessingMode::Thorough),
            _ => Err(format!("Unknown processing mode: {}", s)),
        }
    }
}

/// A translated document tracked by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QaFile {
    pub id: String,
    pub tenant_id: TenantId,
    pub project_id: String,
    pub batch_id: Option<String>,
    pub file_name: String,
    pub status: FileStatus,
    pub mode: ProcessingMode,
    pub segment_count: u32,
    /// Failed attempts of the stage currently in progress.
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registration data for a file entering the pipeline.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub id: String,
    pub tenant_id: TenantId,
    pub project_id: String,
    pub file_name: String,
    pub mode: ProcessingMode,
}
