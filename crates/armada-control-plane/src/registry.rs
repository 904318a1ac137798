//! Robot registry: registration plus the orchestrator-facing availability
//! state machine.
//!
//! Every robot-row write goes through a compare-and-set on the row version,
//! with one automatic retry. Connectivity events and dispatch race against
//! each other on exactly these rows; the CAS discipline keeps both sides
//! from losing updates.

use armada_core::{
    Error, FleetStatus, InspectionAreaId, InstallationId, MissionRunId, Robot, RobotId,
    RobotModelId, RobotStatus,
};
use rusqlite::Connection;
use serde::Deserialize;
use tracing::info;

use crate::{Result, store};

#[derive(Debug, Clone, Deserialize)]
pub struct RobotSpec {
    pub name: String,
    pub isar_id: String,
    pub model_id: RobotModelId,
    pub current_installation_id: InstallationId,
    pub current_inspection_area_id: Option<InspectionAreaId>,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Register a robot, upserting on its ISAR id. A re-registration refreshes
/// the connection details but never resets fleet state.
pub fn register_robot(conn: &Connection, spec: &RobotSpec) -> Result<Robot> {
    if store::fetch_robot_model(conn, spec.model_id)?.is_none() {
        return Err(Error::ReferenceNotFound(format!("robot model {}", spec.model_id)).into());
    }
    if store::fetch_installation(conn, spec.current_installation_id)?.is_none() {
        return Err(Error::ReferenceNotFound(format!(
            "installation {}",
            spec.current_installation_id
        ))
        .into());
    }
    if let Some(area_id) = spec.current_inspection_area_id
        && store::fetch_area(conn, area_id)?.is_none()
    {
        return Err(Error::ReferenceNotFound(format!("inspection area {area_id}")).into());
    }

    if store::fetch_robot_by_isar_id(conn, &spec.isar_id)?.is_some() {
        let robot = with_robot_cas_by_isar_id(conn, &spec.isar_id, |robot| {
            robot.name = spec.name.clone();
            robot.model_id = spec.model_id;
            robot.current_installation_id = spec.current_installation_id;
            robot.current_inspection_area_id = spec.current_inspection_area_id;
            robot.host = spec.host.clone();
            robot.port = spec.port;
            robot.capabilities = spec.capabilities.clone();
            Ok(())
        })?;
        info!(robot_id = %robot.id, isar_id = %robot.isar_id, "re-registered robot");
        return Ok(robot);
    }

    let robot = Robot {
        id: RobotId::new(),
        name: spec.name.clone(),
        isar_id: spec.isar_id.clone(),
        model_id: spec.model_id,
        current_installation_id: spec.current_installation_id,
        current_inspection_area_id: spec.current_inspection_area_id,
        host: spec.host.clone(),
        port: spec.port,
        capabilities: spec.capabilities.clone(),
        isar_connected: false,
        deprecated: false,
        mission_queue_frozen: false,
        status: RobotStatus::Offline,
        fleet_status: FleetStatus::Offline,
        current_mission_id: None,
        version: 0,
    };
    store::insert_robot(conn, &robot)?;
    info!(robot_id = %robot.id, isar_id = %robot.isar_id, "registered robot");
    Ok(robot)
}

/// Apply a robot-reported connectivity event. Lost connectivity forces the
/// fleet status Offline; a reconnect only restores Available when ISAR is
/// connected and the robot is not deprecated.
pub fn update_connectivity(
    conn: &Connection,
    robot_id: RobotId,
    isar_connected: bool,
    status: RobotStatus,
) -> Result<Robot> {
    with_robot_cas(conn, robot_id, |robot| {
        robot.isar_connected = isar_connected;
        robot.status = status;
        if !isar_connected
            && matches!(robot.fleet_status, FleetStatus::Available | FleetStatus::Busy)
        {
            robot.fleet_status = FleetStatus::Offline;
        } else if isar_connected
            && robot.fleet_status == FleetStatus::Offline
            && !robot.deprecated
        {
            robot.fleet_status = FleetStatus::Available;
        }
        Ok(())
    })
}

/// Operator-facing fleet-status move, validated against the transition
/// table.
pub fn set_fleet_status(conn: &Connection, robot_id: RobotId, to: FleetStatus) -> Result<Robot> {
    with_robot_cas(conn, robot_id, |robot| {
        robot.validate_fleet_transition(to)?;
        if to == FleetStatus::Deprecated {
            robot.deprecated = true;
        }
        if robot.fleet_status == FleetStatus::Busy && to != FleetStatus::Busy {
            robot.current_mission_id = None;
        }
        robot.fleet_status = to;
        Ok(())
    })
}

/// Mark a robot busy with a run; entering Busy is what sets the current
/// mission pointer.
pub fn mark_busy(conn: &Connection, robot_id: RobotId, run_id: MissionRunId) -> Result<Robot> {
    with_robot_cas(conn, robot_id, |robot| {
        robot.validate_fleet_transition(FleetStatus::Busy)?;
        robot.fleet_status = FleetStatus::Busy;
        robot.current_mission_id = Some(run_id);
        Ok(())
    })
}

/// Release a robot when its run reaches a terminal state. If the robot went
/// Offline or was deprecated mid-run only the mission pointer is cleared;
/// the availability comes back through the connectivity path.
pub fn release(conn: &Connection, robot_id: RobotId) -> Result<Robot> {
    with_robot_cas(conn, robot_id, |robot| {
        robot.current_mission_id = None;
        if robot.fleet_status == FleetStatus::Busy {
            robot.fleet_status = FleetStatus::Available;
        }
        Ok(())
    })
}

pub fn freeze_queue(conn: &Connection, robot_id: RobotId, frozen: bool) -> Result<Robot> {
    with_robot_cas(conn, robot_id, |robot| {
        robot.mission_queue_frozen = frozen;
        Ok(())
    })
}

/// One-way move to the terminal Deprecated status. The robot keeps its
/// history but is excluded from dispatch forever.
pub fn deprecate(conn: &Connection, robot_id: RobotId) -> Result<Robot> {
    set_fleet_status(conn, robot_id, FleetStatus::Deprecated)
}

fn with_robot_cas<F>(conn: &Connection, robot_id: RobotId, mutate: F) -> Result<Robot>
where
    F: Fn(&mut Robot) -> Result<()>,
{
    // One automatic retry after a lost compare-and-set race.
    for _ in 0..2 {
        let Some(mut robot) = store::fetch_robot(conn, robot_id)? else {
            return Err(Error::ReferenceNotFound(format!("robot {robot_id}")).into());
        };
        mutate(&mut robot)?;
        if store::update_robot(conn, &robot)? {
            robot.version += 1;
            return Ok(robot);
        }
    }
    Err(Error::DispatchConflict(format!("robot {robot_id} row kept changing underneath")).into())
}

fn with_robot_cas_by_isar_id<F>(conn: &Connection, isar_id: &str, mutate: F) -> Result<Robot>
where
    F: Fn(&mut Robot) -> Result<()>,
{
    for _ in 0..2 {
        let Some(mut robot) = store::fetch_robot_by_isar_id(conn, isar_id)? else {
            return Err(Error::ReferenceNotFound(format!("robot with isar id {isar_id}")).into());
        };
        mutate(&mut robot)?;
        if store::update_robot(conn, &robot)? {
            robot.version += 1;
            return Ok(robot);
        }
    }
    Err(Error::DispatchConflict(format!("robot {isar_id} row kept changing underneath")).into())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{EngineError, sites};
    use armada_core::RobotModel;

    pub(crate) fn seed_robot(conn: &Connection) -> Robot {
        let installation = sites::create_installation(conn, "Kårstø", "KAA").unwrap();
        let plant = sites::create_plant(conn, installation.id, "KAA-P1", "Processing").unwrap();
        let area =
            sites::create_area(conn, installation.id, plant.id, "Compressor deck", None, None)
                .unwrap();
        let model = RobotModel::new("exr2");
        store::insert_robot_model(conn, &model).unwrap();
        register_robot(
            conn,
            &RobotSpec {
                name: "tern".into(),
                isar_id: "isar-tern".into(),
                model_id: model.id,
                current_installation_id: installation.id,
                current_inspection_area_id: Some(area.id),
                host: "localhost".into(),
                port: 3000,
                capabilities: vec!["take_image".into()],
            },
        )
        .unwrap()
    }

    #[test]
    fn fresh_robot_starts_offline_until_connected() {
        let conn = store::open_in_memory().unwrap();
        let robot = seed_robot(&conn);
        assert_eq!(robot.fleet_status, FleetStatus::Offline);

        let robot =
            update_connectivity(&conn, robot.id, true, RobotStatus::Available).unwrap();
        assert_eq!(robot.fleet_status, FleetStatus::Available);
    }

    #[test]
    fn lost_connectivity_forces_offline_and_reconnect_restores() {
        let conn = store::open_in_memory().unwrap();
        let robot = seed_robot(&conn);
        update_connectivity(&conn, robot.id, true, RobotStatus::Available).unwrap();

        let robot = update_connectivity(&conn, robot.id, false, RobotStatus::Offline).unwrap();
        assert_eq!(robot.fleet_status, FleetStatus::Offline);

        let robot = update_connectivity(&conn, robot.id, true, RobotStatus::Available).unwrap();
        assert_eq!(robot.fleet_status, FleetStatus::Available);
    }

    #[test]
    fn deprecated_robot_never_comes_back() {
        let conn = store::open_in_memory().unwrap();
        let robot = seed_robot(&conn);
        update_connectivity(&conn, robot.id, true, RobotStatus::Available).unwrap();

        let robot = deprecate(&conn, robot.id).unwrap();
        assert_eq!(robot.fleet_status, FleetStatus::Deprecated);
        assert!(robot.deprecated);

        let result = set_fleet_status(&conn, robot.id, FleetStatus::Available);
        assert!(matches!(
            result,
            Err(EngineError::Domain(Error::InvalidTransition { .. }))
        ));

        // Reconnecting does not resurrect it either.
        let robot = update_connectivity(&conn, robot.id, true, RobotStatus::Available).unwrap();
        assert_eq!(robot.fleet_status, FleetStatus::Deprecated);
    }

    #[test]
    fn busy_exit_clears_mission_pointer() {
        let conn = store::open_in_memory().unwrap();
        let robot = seed_robot(&conn);
        update_connectivity(&conn, robot.id, true, RobotStatus::Available).unwrap();

        let run_id = MissionRunId::new();
        let robot = mark_busy(&conn, robot.id, run_id).unwrap();
        assert_eq!(robot.fleet_status, FleetStatus::Busy);
        assert_eq!(robot.current_mission_id, Some(run_id));

        let robot = release(&conn, robot.id).unwrap();
        assert_eq!(robot.fleet_status, FleetStatus::Available);
        assert_eq!(robot.current_mission_id, None);
    }

    #[test]
    fn stale_version_write_is_rejected_by_cas() {
        let conn = store::open_in_memory().unwrap();
        let mut robot = seed_robot(&conn);
        // Another writer bumps the row first.
        freeze_queue(&conn, robot.id, true).unwrap();

        robot.name = "stale".into();
        assert!(!store::update_robot(&conn, &robot).unwrap());
    }
}
