//! Captured inspection artifacts. An inspection has its own lifecycle: the
//! back-reference from its owning task is nullable, so the record survives
//! task cleanup and stays available for audit.

use crate::geometry::Position;
use crate::{InspectionFindingId, InspectionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionStatus {
    NotStarted,
    InProgress,
    Successful,
    Failed,
    Cancelled,
}

impl InspectionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Successful => "successful",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "not_started" => Some(Self::NotStarted),
            "in_progress" => Some(Self::InProgress),
            "successful" => Some(Self::Successful),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Successful | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionType {
    Image,
    ThermalImage,
    Video,
    ThermalVideo,
    Audio,
}

impl InspectionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::ThermalImage => "thermal_image",
            Self::Video => "video",
            Self::ThermalVideo => "thermal_video",
            Self::Audio => "audio",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "image" => Some(Self::Image),
            "thermal_image" => Some(Self::ThermalImage),
            "video" => Some(Self::Video),
            "thermal_video" => Some(Self::ThermalVideo),
            "audio" => Some(Self::Audio),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inspection {
    pub id: InspectionId,
    pub isar_task_id: String,
    pub isar_inspection_id: String,
    /// 3D point of the inspected tag in the localization frame.
    pub inspection_target: Position,
    pub status: InspectionStatus,
    pub inspection_type: InspectionType,
    pub analysis_type: Option<String>,
    pub inspection_url: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Downstream annotation produced by analysis, loosely coupled to its
/// inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionFinding {
    pub id: InspectionFindingId,
    pub inspection_date: DateTime<Utc>,
    pub isar_task_id: String,
    pub finding: String,
    pub inspection_id: Option<InspectionId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inspection_status_string_round_trip() {
        for status in [
            InspectionStatus::NotStarted,
            InspectionStatus::InProgress,
            InspectionStatus::Successful,
            InspectionStatus::Failed,
            InspectionStatus::Cancelled,
        ] {
            assert_eq!(InspectionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(InspectionStatus::parse("bogus"), None);
    }
}
