//! Event surface of the robot-interface collaborator.
//!
//! The ISAR driver sitting next to each robot reports connectivity and
//! mission progress as envelopes. Connectivity and fault events are keyed by
//! robot id, task events by ISAR task id; the control plane consumes these
//! as inputs to the registry and the run state machine and never initiates
//! robot-specific commands beyond "start mission with task list X".

use armada_core::{InspectionStatus, InspectionType, MissionRunId, Position, RobotId, RobotStatus, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: Uuid,
    pub robot_id: Option<RobotId>,
    pub mission_run_id: Option<MissionRunId>,
    pub kind: EventKind,
    pub sent_at: DateTime<Utc>,
}

impl Envelope {
    #[must_use]
    pub fn new(kind: EventKind, sent_at: DateTime<Utc>) -> Self {
        Self { message_id: Uuid::new_v4(), robot_id: None, mission_run_id: None, kind, sent_at }
    }

    #[must_use]
    pub fn for_robot(robot_id: RobotId, kind: EventKind, sent_at: DateTime<Utc>) -> Self {
        Self { robot_id: Some(robot_id), ..Self::new(kind, sent_at) }
    }

    #[must_use]
    pub fn for_run(run_id: MissionRunId, kind: EventKind, sent_at: DateTime<Utc>) -> Self {
        Self { mission_run_id: Some(run_id), ..Self::new(kind, sent_at) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventKind {
    RobotConnectivity(RobotConnectivity),
    MissionStarted(MissionStarted),
    TaskUpdate(TaskUpdate),
    MissionFault(MissionFault),
}

/// Robot-reported connectivity and self-state, keyed by the envelope's
/// robot id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotConnectivity {
    pub isar_connected: bool,
    pub status: RobotStatus,
}

/// Acknowledgment that the robot accepted a mission. Carries the ISAR-side
/// mission id and the mapping from task order to ISAR task ids, which all
/// later task events are keyed by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionStarted {
    pub isar_mission_id: String,
    pub tasks: Vec<IsarTaskLink>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsarTaskLink {
    pub task_order: i64,
    pub isar_task_id: String,
}

/// Progress report for one task, keyed by ISAR task id. A terminal update
/// may carry the captured inspection artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub isar_task_id: String,
    pub status: TaskStatus,
    pub inspection: Option<InspectionResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionResult {
    pub isar_inspection_id: String,
    pub status: InspectionStatus,
    pub inspection_type: InspectionType,
    pub inspection_target: Position,
    pub inspection_url: Option<String>,
}

/// Unrecoverable robot-side fault for the mission named in the envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionFault {
    pub reason: String,
}
