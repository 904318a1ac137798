//! Fleet dispatcher: promotes Pending runs to Queued on eligible robots.
//!
//! One promotion per robot per pass, earliest `desired_start_time` first.
//! The promotion is a guarded status update, so a concurrent pass promoting
//! the same run is harmless.

use armada_core::{MissionRun, MissionStatus, Robot};
use rusqlite::Connection;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::{Result, store};

/// One dispatch pass over all Pending runs. Returns the runs promoted to
/// Queued. A single run failing never stops the pass.
pub fn dispatch(conn: &Connection) -> Result<Vec<armada_core::MissionRunId>> {
    let pending = store::list_pending_runs(conn)?;
    let mut promoted = Vec::new();
    let mut seen_robots = HashSet::new();
    for run in pending {
        // Only the earliest Pending run per robot is considered.
        if !seen_robots.insert(run.robot_id) {
            continue;
        }
        match try_promote(conn, &run) {
            Ok(true) => promoted.push(run.id),
            Ok(false) => {}
            Err(err) => {
                warn!(run_id = %run.id, robot_id = %run.robot_id, error = %err,
                    "dispatch pass skipped run");
            }
        }
    }
    Ok(promoted)
}

fn try_promote(conn: &Connection, run: &MissionRun) -> Result<bool> {
    let Some(robot) = store::fetch_robot(conn, run.robot_id)? else {
        // Cascade delete raced the pass; the run is gone with the robot.
        return Ok(false);
    };
    if !eligible(conn, &robot, run)? {
        return Ok(false);
    }
    if store::robot_has_active_run(conn, robot.id)? {
        debug!(robot_id = %robot.id, "robot already has an active run");
        return Ok(false);
    }
    let queued = store::promote_run_status(
        conn,
        run.id,
        MissionStatus::Pending,
        MissionStatus::Queued,
    )?;
    if queued {
        info!(run_id = %run.id, robot_id = %robot.id, "queued mission run");
    }
    Ok(queued)
}

fn eligible(conn: &Connection, robot: &Robot, run: &MissionRun) -> Result<bool> {
    if !robot.is_dispatchable() {
        return Ok(false);
    }
    let Some(installation) =
        store::fetch_installation_by_code(conn, &run.installation_code)?
    else {
        return Ok(false);
    };
    if robot.current_installation_id != installation.id {
        return Ok(false);
    }
    if let Some(area_id) = run.inspection_area_id
        && robot.current_inspection_area_id != Some(area_id)
    {
        return Ok(false);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{self, tests::seed_robot};
    use crate::scheduler;
    use armada_core::{
        FleetStatus, MissionRunType, Orientation, Pose, Position, RobotStatus, TaskBlueprint,
    };
    use chrono::{TimeZone, Utc};

    fn blueprint() -> TaskBlueprint {
        TaskBlueprint {
            task_type: "inspection".into(),
            tag_id: Some("TAG-200".into()),
            robot_pose: Pose::new(Position::new(0.0, 0.0, 0.0), Orientation::identity()),
            inspection_target: None,
        }
    }

    fn seed_run(conn: &Connection, robot_id: armada_core::RobotId) -> armada_core::MissionRunId {
        scheduler::create_ad_hoc_run(
            conn,
            robot_id,
            "Valve check",
            &[blueprint()],
            Utc.with_ymd_and_hms(2024, 1, 8, 8, 0, 0).unwrap(),
            MissionRunType::Normal,
        )
        .unwrap()
    }

    #[test]
    fn available_robot_gets_its_run_queued() {
        let conn = store::open_in_memory().unwrap();
        let robot = seed_robot(&conn);
        registry::update_connectivity(&conn, robot.id, true, RobotStatus::Available).unwrap();
        let run_id = seed_run(&conn, robot.id);

        let promoted = dispatch(&conn).unwrap();
        assert_eq!(promoted, vec![run_id]);

        let run = store::fetch_run(&conn, run_id).unwrap().unwrap();
        assert_eq!(run.status, MissionStatus::Queued);

        // Second pass is a no-op: the run already left Pending.
        assert!(dispatch(&conn).unwrap().is_empty());
    }

    #[test]
    fn offline_robot_leaves_runs_pending() {
        let conn = store::open_in_memory().unwrap();
        let robot = seed_robot(&conn);
        let run_id = seed_run(&conn, robot.id);

        assert!(dispatch(&conn).unwrap().is_empty());
        let run = store::fetch_run(&conn, run_id).unwrap().unwrap();
        assert_eq!(run.status, MissionStatus::Pending);
    }

    #[test]
    fn frozen_queue_blocks_dispatch_until_thawed() {
        let conn = store::open_in_memory().unwrap();
        let robot = seed_robot(&conn);
        registry::update_connectivity(&conn, robot.id, true, RobotStatus::Available).unwrap();
        registry::freeze_queue(&conn, robot.id, true).unwrap();
        let run_id = seed_run(&conn, robot.id);

        assert!(dispatch(&conn).unwrap().is_empty());
        assert!(dispatch(&conn).unwrap().is_empty());

        registry::freeze_queue(&conn, robot.id, false).unwrap();
        assert_eq!(dispatch(&conn).unwrap(), vec![run_id]);
    }

    #[test]
    fn one_active_run_per_robot() {
        let conn = store::open_in_memory().unwrap();
        let robot = seed_robot(&conn);
        registry::update_connectivity(&conn, robot.id, true, RobotStatus::Available).unwrap();
        let first = seed_run(&conn, robot.id);
        let second = seed_run(&conn, robot.id);

        // Only the earliest pending run is promoted; the second stays behind
        // it until the first reaches a terminal status.
        let promoted = dispatch(&conn).unwrap();
        assert_eq!(promoted.len(), 1);
        assert!(dispatch(&conn).unwrap().is_empty());

        let statuses: Vec<MissionStatus> = [first, second]
            .iter()
            .map(|id| store::fetch_run(&conn, *id).unwrap().unwrap().status)
            .collect();
        assert!(statuses.contains(&MissionStatus::Queued));
        assert!(statuses.contains(&MissionStatus::Pending));
    }

    #[test]
    fn busy_robot_is_skipped() {
        let conn = store::open_in_memory().unwrap();
        let robot = seed_robot(&conn);
        registry::update_connectivity(&conn, robot.id, true, RobotStatus::Available).unwrap();
        registry::set_fleet_status(&conn, robot.id, FleetStatus::Busy).unwrap();
        seed_run(&conn, robot.id);

        assert!(dispatch(&conn).unwrap().is_empty());
    }
}
