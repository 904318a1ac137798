use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod error;
pub mod geometry;
pub mod inspection;
pub mod mission;
pub mod robot;
pub mod schedule;
pub mod site;

pub use error::Error;
pub use geometry::{Boundary, MapMetadata, Orientation, Pose, Position, TransformationMatrices};
pub use inspection::{Inspection, InspectionFinding, InspectionStatus, InspectionType};
pub use mission::{
    MissionDefinition, MissionRun, MissionRunType, MissionStatus, MissionTask, Source,
    TaskBlueprint, TaskStatus,
};
pub use robot::{FleetStatus, Robot, RobotModel, RobotStatus};
pub use schedule::{AutoScheduleFrequency, TimeAndDay};
pub use site::{Installation, InspectionArea, Plant};

macro_rules! entity_id {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub Uuid);

            impl $name {
                #[must_use]
                pub fn new() -> Self {
                    Self(Uuid::new_v4())
                }

                pub fn parse(raw: &str) -> Result<Self, uuid::Error> {
                    Ok(Self(Uuid::parse_str(raw)?))
                }
            }

            impl Default for $name {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    self.0.fmt(f)
                }
            }
        )*
    };
}

entity_id!(
    InstallationId,
    PlantId,
    InspectionAreaId,
    RobotModelId,
    RobotId,
    SourceId,
    MissionDefinitionId,
    AutoScheduleFrequencyId,
    TimeAndDayId,
    MissionRunId,
    MissionTaskId,
    InspectionId,
    InspectionFindingId,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn robot_id_is_unique() {
        let a = RobotId::new();
        let b = RobotId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn mission_run_id_round_trips_through_display() {
        let id = MissionRunId::new();
        assert_eq!(MissionRunId::parse(&id.to_string()).unwrap(), id);
    }
}
