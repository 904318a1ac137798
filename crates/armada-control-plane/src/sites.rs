//! Spatial hierarchy operations: Installation -> Plant -> InspectionArea.
//!
//! Read-heavy reference data. Deletes are restricted while any robot, run or
//! definition still points at the record; the pre-checks surface the domain
//! error instead of a bare constraint violation.

use armada_core::{
    Boundary, Error, InspectionArea, InspectionAreaId, Installation, InstallationId, MapMetadata,
    Plant, PlantId,
};
use rusqlite::Connection;

use crate::{Result, store};

pub fn create_installation(
    conn: &Connection,
    name: &str,
    installation_code: &str,
) -> Result<Installation> {
    let installation = Installation::new(name, installation_code);
    store::insert_installation(conn, &installation)?;
    Ok(installation)
}

pub fn create_plant(
    conn: &Connection,
    installation_id: InstallationId,
    plant_code: &str,
    name: &str,
) -> Result<Plant> {
    let Some(_) = store::fetch_installation(conn, installation_id)? else {
        return Err(Error::ReferenceNotFound(format!("installation {installation_id}")).into());
    };
    let plant = Plant::new(installation_id, plant_code, name);
    store::insert_plant(conn, &plant)?;
    Ok(plant)
}

/// Create an inspection area under a plant, verifying the plant actually
/// belongs to the named installation before anything references both.
pub fn create_area(
    conn: &Connection,
    installation_id: InstallationId,
    plant_id: PlantId,
    name: &str,
    boundary: Option<Boundary>,
    map_metadata: Option<MapMetadata>,
) -> Result<InspectionArea> {
    let Some(installation) = store::fetch_installation(conn, installation_id)? else {
        return Err(Error::ReferenceNotFound(format!("installation {installation_id}")).into());
    };
    let Some(plant) = store::fetch_plant(conn, plant_id)? else {
        return Err(Error::ReferenceNotFound(format!("plant {plant_id}")).into());
    };
    plant.validate_hierarchy(&installation)?;
    let mut area = InspectionArea::new(installation_id, plant_id, name);
    area.boundary = boundary;
    area.map_metadata = map_metadata;
    store::insert_area(conn, &area)?;
    Ok(area)
}

/// Look an area up by installation code and area name.
pub fn resolve_area(
    conn: &Connection,
    installation_code: &str,
    area_name: &str,
) -> Result<InspectionArea> {
    store::fetch_area_by_name(conn, installation_code, area_name)?.ok_or_else(|| {
        Error::ReferenceNotFound(format!(
            "inspection area '{area_name}' at installation '{installation_code}'"
        ))
        .into()
    })
}

pub fn delete_area(conn: &Connection, id: InspectionAreaId) -> Result<()> {
    if store::fetch_area(conn, id)?.is_none() {
        return Err(Error::ReferenceNotFound(format!("inspection area {id}")).into());
    }
    let references = store::count_references_to_area(conn, id)?;
    if references > 0 {
        return Err(Error::ReferenceInUse(format!(
            "inspection area {id} is referenced by {references} robots, runs or definitions"
        ))
        .into());
    }
    store::delete_area_row(conn, id)?;
    Ok(())
}

pub fn delete_plant(conn: &Connection, id: PlantId) -> Result<()> {
    if store::fetch_plant(conn, id)?.is_none() {
        return Err(Error::ReferenceNotFound(format!("plant {id}")).into());
    }
    let references = store::count_references_to_plant(conn, id)?;
    if references > 0 {
        return Err(Error::ReferenceInUse(format!(
            "plant {id} is referenced by {references} inspection areas"
        ))
        .into());
    }
    store::delete_plant_row(conn, id)?;
    Ok(())
}

pub fn delete_installation(conn: &Connection, id: InstallationId) -> Result<()> {
    if store::fetch_installation(conn, id)?.is_none() {
        return Err(Error::ReferenceNotFound(format!("installation {id}")).into());
    }
    let references = store::count_references_to_installation(conn, id)?;
    if references > 0 {
        return Err(Error::ReferenceInUse(format!(
            "installation {id} is referenced by {references} plants or robots"
        ))
        .into());
    }
    store::delete_installation_row(conn, id)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineError;

    #[test]
    fn resolve_area_finds_by_installation_code_and_name() {
        let conn = store::open_in_memory().unwrap();
        let installation = create_installation(&conn, "Kårstø", "KAA").unwrap();
        let plant = create_plant(&conn, installation.id, "KAA-P1", "Processing").unwrap();
        let area =
            create_area(&conn, installation.id, plant.id, "Compressor deck", None, None).unwrap();

        let resolved = resolve_area(&conn, "KAA", "Compressor deck").unwrap();
        assert_eq!(resolved.id, area.id);

        let missing = resolve_area(&conn, "KAA", "No such deck");
        assert!(matches!(
            missing,
            Err(EngineError::Domain(Error::ReferenceNotFound(_)))
        ));
    }

    #[test]
    fn area_creation_rejects_plant_from_other_installation() {
        let conn = store::open_in_memory().unwrap();
        let first = create_installation(&conn, "Kårstø", "KAA").unwrap();
        let second = create_installation(&conn, "Johan Sverdrup", "JSV").unwrap();
        let plant = create_plant(&conn, second.id, "JSV-P1", "Topside").unwrap();

        let result = create_area(&conn, first.id, plant.id, "Deck", None, None);
        assert!(matches!(result, Err(EngineError::Domain(Error::ReferenceNotFound(_)))));
    }

    #[test]
    fn installation_delete_is_restricted_while_plants_exist() {
        let conn = store::open_in_memory().unwrap();
        let installation = create_installation(&conn, "Kårstø", "KAA").unwrap();
        let plant = create_plant(&conn, installation.id, "KAA-P1", "Processing").unwrap();

        let result = delete_installation(&conn, installation.id);
        assert!(matches!(result, Err(EngineError::Domain(Error::ReferenceInUse(_)))));

        delete_plant(&conn, plant.id).unwrap();
        delete_installation(&conn, installation.id).unwrap();
        assert!(store::fetch_installation(&conn, installation.id).unwrap().is_none());
    }
}
