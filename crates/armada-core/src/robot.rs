//! Robot registry types.
//!
//! A robot carries two independent status fields: `status` is whatever the
//! robot last reported about itself over the ISAR interface, while
//! `fleet_status` is the availability the orchestrator assigns when deciding
//! what to dispatch. The two evolve independently and are reconciled by the
//! dispatcher.

use crate::error::Error;
use crate::{InspectionAreaId, InstallationId, MissionRunId, RobotId, RobotModelId};
use serde::{Deserialize, Serialize};

/// Configuration template shared by every robot of one model type, not an
/// instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotModel {
    pub id: RobotModelId,
    pub model_type: String,
    pub battery_warning_threshold: Option<f64>,
    pub lower_pressure_warning_threshold: Option<f64>,
    pub upper_pressure_warning_threshold: Option<f64>,
    /// Average seconds spent per inspection tag, used for run duration
    /// estimates.
    pub average_duration_per_tag: Option<f64>,
}

impl RobotModel {
    #[must_use]
    pub fn new(model_type: impl Into<String>) -> Self {
        Self {
            id: RobotModelId::new(),
            model_type: model_type.into(),
            battery_warning_threshold: None,
            lower_pressure_warning_threshold: None,
            upper_pressure_warning_threshold: None,
            average_duration_per_tag: None,
        }
    }
}

/// Robot-self-reported state, taken verbatim from connectivity events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotStatus {
    Available,
    Busy,
    Paused,
    Blocked,
    Offline,
}

impl RobotStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Busy => "busy",
            Self::Paused => "paused",
            Self::Blocked => "blocked",
            Self::Offline => "offline",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "available" => Some(Self::Available),
            "busy" => Some(Self::Busy),
            "paused" => Some(Self::Paused),
            "blocked" => Some(Self::Blocked),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// Orchestrator-assigned availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FleetStatus {
    Available,
    Busy,
    Offline,
    Deprecated,
}

impl FleetStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Busy => "busy",
            Self::Offline => "offline",
            Self::Deprecated => "deprecated",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "available" => Some(Self::Available),
            "busy" => Some(Self::Busy),
            "offline" => Some(Self::Offline),
            "deprecated" => Some(Self::Deprecated),
            _ => None,
        }
    }

    /// Deprecation is one-way; a deprecated robot keeps its history but is
    /// excluded from dispatch forever.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Deprecated)
    }

    /// The transition table for orchestrator-assigned availability. The
    /// Offline -> Available edge carries an extra guard checked by
    /// [`Robot::validate_fleet_transition`].
    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        use FleetStatus::*;
        match (self, to) {
            (_, Deprecated) => true,
            (Available, Busy) | (Busy, Available) => true,
            (Available | Busy, Offline) => true,
            (Offline, Available) => true,
            _ => false,
        }
    }
}

/// One physical or simulated unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Robot {
    pub id: RobotId,
    pub name: String,
    pub isar_id: String,
    pub model_id: RobotModelId,
    pub current_installation_id: InstallationId,
    pub current_inspection_area_id: Option<InspectionAreaId>,
    pub host: String,
    pub port: u16,
    pub capabilities: Vec<String>,
    pub isar_connected: bool,
    pub deprecated: bool,
    pub mission_queue_frozen: bool,
    pub status: RobotStatus,
    pub fleet_status: FleetStatus,
    pub current_mission_id: Option<MissionRunId>,
    /// Optimistic-concurrency token; every row write bumps it.
    pub version: i64,
}

impl Robot {
    /// Validate a fleet-status move, including the reconnect guard: a robot
    /// only comes back from Offline when ISAR is connected and the robot is
    /// not deprecated.
    pub fn validate_fleet_transition(&self, to: FleetStatus) -> Result<(), Error> {
        let from = self.fleet_status;
        if from == to {
            return Ok(());
        }
        if !from.can_transition(to) {
            return Err(Error::invalid_transition(from.as_str(), to.as_str()));
        }
        if from == FleetStatus::Offline
            && to == FleetStatus::Available
            && (!self.isar_connected || self.deprecated)
        {
            return Err(Error::invalid_transition(from.as_str(), to.as_str()));
        }
        Ok(())
    }

    /// Whether the dispatcher may queue a new run on this robot.
    #[must_use]
    pub fn is_dispatchable(&self) -> bool {
        self.fleet_status == FleetStatus::Available
            && !self.mission_queue_frozen
            && !self.deprecated
    }
}
