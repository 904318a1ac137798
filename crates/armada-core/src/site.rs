//! The three-level physical-site hierarchy scoping robots and missions:
//! Installation -> Plant -> InspectionArea. Provisioned once, rarely mutated,
//! and never deleted while anything in the fleet still references it.

use crate::error::Error;
use crate::geometry::{Boundary, MapMetadata};
use crate::{InspectionAreaId, InstallationId, PlantId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Installation {
    pub id: InstallationId,
    pub name: String,
    pub installation_code: String,
}

impl Installation {
    #[must_use]
    pub fn new(name: impl Into<String>, installation_code: impl Into<String>) -> Self {
        Self {
            id: InstallationId::new(),
            name: name.into(),
            installation_code: installation_code.into().to_uppercase(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plant {
    pub id: PlantId,
    pub installation_id: InstallationId,
    pub plant_code: String,
    pub name: String,
}

impl Plant {
    #[must_use]
    pub fn new(
        installation_id: InstallationId,
        plant_code: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: PlantId::new(),
            installation_id,
            plant_code: plant_code.into().to_uppercase(),
            name: name.into(),
        }
    }

    /// A plant may only be attached to areas under its own installation.
    pub fn validate_hierarchy(&self, installation: &Installation) -> Result<(), Error> {
        if self.installation_id != installation.id {
            return Err(Error::ReferenceNotFound(format!(
                "plant {} does not belong to installation {}",
                self.plant_code, installation.installation_code
            )));
        }
        Ok(())
    }
}

/// The localization and scheduling scope for missions. Carries the optional
/// polygon used to decide whether a robot position is inside the area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionArea {
    pub id: InspectionAreaId,
    pub installation_id: InstallationId,
    pub plant_id: PlantId,
    pub name: String,
    pub boundary: Option<Boundary>,
    pub map_metadata: Option<MapMetadata>,
}

impl InspectionArea {
    #[must_use]
    pub fn new(installation_id: InstallationId, plant_id: PlantId, name: impl Into<String>) -> Self {
        Self {
            id: InspectionAreaId::new(),
            installation_id,
            plant_id,
            name: name.into(),
            boundary: None,
            map_metadata: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn installation_code_is_uppercased() {
        let installation = Installation::new("Kårstø", "kaa");
        assert_eq!(installation.installation_code, "KAA");
    }

    #[test]
    fn plant_hierarchy_rejects_foreign_installation() {
        let installation = Installation::new("Kårstø", "KAA");
        let other = Installation::new("Johan Sverdrup", "JSV");
        let plant = Plant::new(other.id, "KAA-P1", "Processing");
        assert!(plant.validate_hierarchy(&installation).is_err());
        assert!(plant.validate_hierarchy(&other).is_ok());
    }
}
