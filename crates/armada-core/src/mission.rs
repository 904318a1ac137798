//! Mission templates, execution instances, and their status state machines.
//!
//! The status enums are closed tagged variants with explicit transition
//! tables; nothing in the engine moves a status by string comparison. A
//! transition not present in the table is rejected with
//! [`Error::InvalidTransition`] and leaves the record unchanged.

use crate::error::Error;
use crate::geometry::{MapMetadata, Pose, Position};
use crate::schedule::AutoScheduleFrequency;
use crate::{
    InspectionAreaId, InspectionId, MissionDefinitionId, MissionRunId, MissionTaskId, RobotId,
    SourceId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// External origin of a task list, e.g. a planning tool. The `source_id` is
/// the immutable identity key definitions are tied to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub source_id: String,
    pub custom_mission_tasks: Option<Vec<TaskBlueprint>>,
}

impl Source {
    #[must_use]
    pub fn new(source_id: impl Into<String>, tasks: Option<Vec<TaskBlueprint>>) -> Self {
        Self { id: SourceId::new(), source_id: source_id.into(), custom_mission_tasks: tasks }
    }
}

/// One planned step in a source's task list, expanded into a concrete
/// [`MissionTask`] each time a run is created from the definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskBlueprint {
    pub task_type: String,
    pub tag_id: Option<String>,
    pub robot_pose: Pose,
    pub inspection_target: Option<Position>,
}

/// A reusable mission template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionDefinition {
    pub id: MissionDefinitionId,
    pub source_id: SourceId,
    pub name: String,
    pub installation_code: String,
    pub inspection_area_id: Option<InspectionAreaId>,
    /// Legacy duration-based recurrence, kept for operator display only;
    /// the auto-schedule frequency is canonical.
    pub inspection_frequency_secs: Option<i64>,
    pub auto_schedule_frequency: Option<AutoScheduleFrequency>,
    pub last_successful_run_id: Option<MissionRunId>,
    /// Scheduling watermark: the instant the auto-scheduler last fired for.
    /// Initialized to creation time and only ever advanced by compare-and-set.
    pub last_auto_run_at: DateTime<Utc>,
    pub is_deprecated: bool,
}

impl MissionDefinition {
    #[must_use]
    pub fn new(
        source_id: SourceId,
        name: impl Into<String>,
        installation_code: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MissionDefinitionId::new(),
            source_id,
            name: name.into(),
            installation_code: installation_code.into(),
            inspection_area_id: None,
            inspection_frequency_secs: None,
            auto_schedule_frequency: None,
            last_successful_run_id: None,
            last_auto_run_at: created_at,
            is_deprecated: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Pending,
    Queued,
    Ongoing,
    Paused,
    Aborted,
    Cancelled,
    Failed,
    Successful,
}

impl MissionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Ongoing => "ongoing",
            Self::Paused => "paused",
            Self::Aborted => "aborted",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Successful => "successful",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "queued" => Some(Self::Queued),
            "ongoing" => Some(Self::Ongoing),
            "paused" => Some(Self::Paused),
            "aborted" => Some(Self::Aborted),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            "successful" => Some(Self::Successful),
        _ => None,
        }
    }

    /// Terminal statuses are immutable once reached.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Successful | Self::Aborted | Self::Failed | Self::Cancelled)
    }

    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        use MissionStatus::*;
        match (self, to) {
            (from, Aborted) => !from.is_terminal(),
            (Pending, Queued) => true,
            (Pending | Queued, Cancelled) => true,
            (Queued, Ongoing) => true,
            (Ongoing, Paused) | (Paused, Ongoing) => true,
            (Ongoing | Paused, Successful | Failed) => true,
            _ => false,
        }
    }

    pub fn transition(self, to: Self) -> Result<Self, Error> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(Error::invalid_transition(self.as_str(), to.as_str()))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionRunType {
    Normal,
    ReturnHome,
    Emergency,
}

impl MissionRunType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::ReturnHome => "return_home",
            Self::Emergency => "emergency",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "normal" => Some(Self::Normal),
            "return_home" => Some(Self::ReturnHome),
            "emergency" => Some(Self::Emergency),
            _ => None,
        }
    }
}

/// One concrete, time-stamped execution attempt of a mission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionRun {
    pub id: MissionRunId,
    /// Correlation id back to the template this run was created from; not a
    /// foreign key, ad-hoc runs leave it unset.
    pub mission_id: Option<MissionDefinitionId>,
    pub robot_id: RobotId,
    pub inspection_area_id: Option<InspectionAreaId>,
    pub name: String,
    pub status: MissionStatus,
    pub installation_code: String,
    pub desired_start_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub run_type: MissionRunType,
    pub isar_mission_id: Option<String>,
    pub status_reason: Option<String>,
    pub estimated_duration_secs: Option<i64>,
    pub map_metadata: Option<MapMetadata>,
    pub is_deprecated: bool,
}

impl MissionRun {
    #[must_use]
    pub fn new(
        robot_id: RobotId,
        name: impl Into<String>,
        installation_code: impl Into<String>,
        desired_start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MissionRunId::new(),
            mission_id: None,
            robot_id,
            inspection_area_id: None,
            name: name.into(),
            status: MissionStatus::Pending,
            installation_code: installation_code.into(),
            desired_start_time,
            start_time: None,
            end_time: None,
            run_type: MissionRunType::Normal,
            isar_mission_id: None,
            status_reason: None,
            estimated_duration_secs: None,
            map_metadata: None,
            is_deprecated: false,
        }
    }

    /// Rough duration estimate from the robot model's average seconds per
    /// inspection tag.
    #[must_use]
    pub fn estimate_duration(average_duration_per_tag: Option<f64>, task_count: usize) -> Option<i64> {
        average_duration_per_tag.map(|avg| (avg * task_count as f64).round() as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        use TaskStatus::*;
        match (self, to) {
            (Pending, InProgress | Cancelled) => true,
            (InProgress, Paused) | (Paused, InProgress) => true,
            (InProgress | Paused, Completed | Failed | Cancelled) => true,
            _ => false,
        }
    }

    pub fn transition(self, to: Self) -> Result<Self, Error> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(Error::invalid_transition(self.as_str(), to.as_str()))
        }
    }
}

/// One ordered step within a run. `task_order` defines execution sequence,
/// not wall-clock order; events from the robot interface are applied in
/// `task_order` no matter when they arrive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionTask {
    pub id: MissionTaskId,
    /// Weak back-reference: the task may outlive its run record for audit.
    pub mission_run_id: Option<MissionRunId>,
    pub task_order: i64,
    pub task_type: String,
    pub tag_id: Option<String>,
    pub robot_pose: Pose,
    pub isar_task_id: Option<String>,
    pub inspection_id: Option<InspectionId>,
    pub status: TaskStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl MissionTask {
    #[must_use]
    pub fn from_blueprint(run_id: MissionRunId, task_order: i64, blueprint: &TaskBlueprint) -> Self {
        Self {
            id: MissionTaskId::new(),
            mission_run_id: Some(run_id),
            task_order,
            task_type: blueprint.task_type.clone(),
            tag_id: blueprint.tag_id.clone(),
            robot_pose: blueprint.robot_pose,
            isar_task_id: None,
            inspection_id: None,
            status: TaskStatus::Pending,
            start_time: None,
            end_time: None,
        }
    }
}
