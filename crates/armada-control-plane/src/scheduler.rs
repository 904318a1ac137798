//! Mission definition store and the auto-schedule engine.
//!
//! `tick(now)` is the engine's single entry point, driven by a fixed-interval
//! timer. For every schedulable definition it computes the latest due fire
//! instant past the watermark, claims the watermark by compare-and-set and
//! only then creates the run, so concurrent ticks never double-fire and an
//! outage collapses to a single catch-up run per definition.

use armada_core::{
    AutoScheduleFrequency, Error, InspectionAreaId, MissionDefinition, MissionDefinitionId,
    MissionRun, MissionRunId, MissionRunType, MissionTask, Robot, RobotId, SourceId,
    TaskBlueprint,
};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::{Result, store};

pub fn create_definition(
    conn: &Connection,
    source_id: SourceId,
    name: &str,
    installation_code: &str,
    inspection_area_id: Option<InspectionAreaId>,
    schedule: Option<AutoScheduleFrequency>,
    created_at: DateTime<Utc>,
) -> Result<MissionDefinition> {
    if store::fetch_source(conn, source_id)?.is_none() {
        return Err(Error::ReferenceNotFound(format!("source {source_id}")).into());
    }
    if let Some(area_id) = inspection_area_id
        && store::fetch_area(conn, area_id)?.is_none()
    {
        return Err(Error::ReferenceNotFound(format!("inspection area {area_id}")).into());
    }
    if let Some(frequency) = &schedule {
        frequency.validate()?;
    }

    let mut definition = MissionDefinition::new(source_id, name, installation_code, created_at);
    definition.inspection_area_id = inspection_area_id;
    definition.auto_schedule_frequency = schedule;
    store::insert_definition(conn, &definition)?;
    Ok(definition)
}

/// One scheduler pass. Emits at most one run per definition and returns the
/// created run ids. A single definition failing never stops the pass.
pub fn tick(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<MissionRunId>> {
    let definitions = store::list_schedulable_definitions(conn)?;
    let mut created = Vec::new();
    for definition in definitions {
        match fire_definition(conn, &definition, now) {
            Ok(Some(run_id)) => created.push(run_id),
            Ok(None) => {}
            Err(err) => {
                warn!(definition_id = %definition.id, error = %err, "auto-schedule pass skipped definition");
            }
        }
    }
    Ok(created)
}

fn fire_definition(
    conn: &Connection,
    definition: &MissionDefinition,
    now: DateTime<Utc>,
) -> Result<Option<MissionRunId>> {
    let Some(frequency) = &definition.auto_schedule_frequency else {
        return Ok(None);
    };

    let watermark = definition.last_auto_run_at;
    let Some(fire_at) = frequency.latest_due(watermark, now)? else {
        return Ok(None);
    };

    let Some(source) = store::fetch_source(conn, definition.source_id)? else {
        return Err(Error::ReferenceNotFound(format!("source {}", definition.source_id)).into());
    };
    let blueprints = source.custom_mission_tasks.unwrap_or_default();
    if blueprints.is_empty() {
        return Err(Error::ScheduleMisconfigured(format!(
            "definition {} has a schedule but its source carries no task list",
            definition.id
        ))
        .into());
    }

    let Some(robot) = pick_robot(conn, definition)? else {
        // Leave the watermark unclaimed so the definition retries on the
        // next tick once a robot shows up.
        return Err(Error::RobotUnavailable(format!(
            "no robot at installation '{}' for definition {}",
            definition.installation_code, definition.id
        ))
        .into());
    };

    // Claim, then create. Losing the claim means a concurrent tick fired
    // this definition already.
    if !store::claim_watermark(conn, definition.id, watermark, fire_at)? {
        return Ok(None);
    }

    let run_id = create_run(
        conn,
        &robot,
        Some(definition.id),
        &definition.name,
        &definition.installation_code,
        definition.inspection_area_id,
        &blueprints,
        fire_at,
        MissionRunType::Normal,
    )?;
    info!(definition_id = %definition.id, run_id = %run_id, robot_id = %robot.id,
        desired_start_time = %fire_at, "auto-scheduled mission run");
    Ok(Some(run_id))
}

/// Lowest-id robot a run from this definition could ever dispatch to:
/// right installation, compatible area, not deprecated. Availability is the
/// dispatcher's concern, not the scheduler's.
fn pick_robot(conn: &Connection, definition: &MissionDefinition) -> Result<Option<Robot>> {
    let Some(installation) =
        store::fetch_installation_by_code(conn, &definition.installation_code)?
    else {
        return Err(Error::ReferenceNotFound(format!(
            "installation '{}'",
            definition.installation_code
        ))
        .into());
    };
    let mut robots: Vec<Robot> = store::list_robots(conn)?
        .into_iter()
        .filter(|robot| {
            !robot.deprecated
                && robot.current_installation_id == installation.id
                && match definition.inspection_area_id {
                    Some(area_id) => robot.current_inspection_area_id == Some(area_id),
                    None => true,
                }
        })
        .collect();
    robots.sort_by_key(|robot| robot.id);
    Ok(robots.into_iter().next())
}

/// Materialize a run and its ordered tasks from a task-list blueprint.
/// Shared by the auto-scheduler and the ad-hoc run endpoint.
#[allow(clippy::too_many_arguments)]
pub fn create_run(
    conn: &Connection,
    robot: &Robot,
    mission_id: Option<MissionDefinitionId>,
    name: &str,
    installation_code: &str,
    inspection_area_id: Option<InspectionAreaId>,
    blueprints: &[TaskBlueprint],
    desired_start_time: DateTime<Utc>,
    run_type: MissionRunType,
) -> Result<MissionRunId> {
    let mut run = MissionRun::new(robot.id, name, installation_code, desired_start_time);
    run.mission_id = mission_id;
    run.inspection_area_id = inspection_area_id;
    run.run_type = run_type;

    if let Some(area_id) = inspection_area_id {
        let Some(area) = store::fetch_area(conn, area_id)? else {
            return Err(Error::ReferenceNotFound(format!("inspection area {area_id}")).into());
        };
        if let Some(boundary) = &area.boundary {
            for (order, blueprint) in blueprints.iter().enumerate() {
                if !boundary.contains(&blueprint.robot_pose.position) {
                    return Err(Error::ScheduleMisconfigured(format!(
                        "task {order} pose lies outside inspection area '{}'",
                        area.name
                    ))
                    .into());
                }
            }
        }
        run.map_metadata = area.map_metadata;
    }

    let model = store::fetch_robot_model(conn, robot.model_id)?;
    run.estimated_duration_secs = MissionRun::estimate_duration(
        model.and_then(|m| m.average_duration_per_tag),
        blueprints.len(),
    );

    let tasks: Vec<MissionTask> = blueprints
        .iter()
        .enumerate()
        .map(|(order, blueprint)| MissionTask::from_blueprint(run.id, order as i64, blueprint))
        .collect();
    store::insert_run(conn, &run, &tasks)?;
    Ok(run.id)
}

/// Ad-hoc run creation for a named robot, outside any definition.
pub fn create_ad_hoc_run(
    conn: &Connection,
    robot_id: RobotId,
    name: &str,
    blueprints: &[TaskBlueprint],
    desired_start_time: DateTime<Utc>,
    run_type: MissionRunType,
) -> Result<MissionRunId> {
    let Some(robot) = store::fetch_robot(conn, robot_id)? else {
        return Err(Error::ReferenceNotFound(format!("robot {robot_id}")).into());
    };
    let Some(installation) = store::fetch_installation(conn, robot.current_installation_id)?
    else {
        return Err(Error::ReferenceNotFound(format!(
            "installation {}",
            robot.current_installation_id
        ))
        .into());
    };
    create_run(
        conn,
        &robot,
        None,
        name,
        &installation.installation_code,
        robot.current_inspection_area_id,
        blueprints,
        desired_start_time,
        run_type,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::seed_robot;
    use armada_core::{
        Boundary, MapMetadata, MissionStatus, Orientation, Pose, Position, Source, TimeAndDay,
        TransformationMatrices,
    };
    use chrono::{NaiveTime, TimeZone, Weekday};

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn blueprint() -> TaskBlueprint {
        TaskBlueprint {
            task_type: "inspection".into(),
            tag_id: Some("TAG-100".into()),
            robot_pose: Pose::new(Position::new(1.0, 2.0, 0.0), Orientation::identity()),
            inspection_target: Some(Position::new(1.5, 2.5, 1.0)),
        }
    }

    fn monday_0800() -> AutoScheduleFrequency {
        let time = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        AutoScheduleFrequency::new(vec![TimeAndDay::new(Weekday::Mon, time)])
    }

    fn seed_definition(
        conn: &Connection,
        created_at: DateTime<Utc>,
    ) -> MissionDefinition {
        let source = Source::new("echo-mission-1", Some(vec![blueprint(), blueprint()]));
        store::insert_source(conn, &source).unwrap();
        create_definition(
            conn,
            source.id,
            "Weekly compressor round",
            "KAA",
            None,
            Some(monday_0800()),
            created_at,
        )
        .unwrap()
    }

    #[test]
    fn tick_fires_catch_up_run_with_due_start_time() {
        let conn = store::open_in_memory().unwrap();
        let robot = seed_robot(&conn);
        // 2024-01-01 is a Monday; watermark sits at that 08:00 fire.
        let definition = seed_definition(&conn, utc(2024, 1, 1, 8, 0));

        let created = tick(&conn, utc(2024, 1, 8, 9, 0)).unwrap();
        assert_eq!(created.len(), 1);

        let run = store::fetch_run(&conn, created[0]).unwrap().unwrap();
        assert_eq!(run.desired_start_time, utc(2024, 1, 8, 8, 0));
        assert_eq!(run.status, MissionStatus::Pending);
        assert_eq!(run.robot_id, robot.id);
        assert_eq!(run.mission_id, Some(definition.id));

        let tasks = store::list_tasks_for_run(&conn, run.id).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].task_order, 0);
        assert_eq!(tasks[1].task_order, 1);
    }

    #[test]
    fn tick_is_idempotent_for_the_same_now() {
        let conn = store::open_in_memory().unwrap();
        seed_robot(&conn);
        seed_definition(&conn, utc(2024, 1, 1, 8, 0));

        let now = utc(2024, 1, 8, 9, 0);
        assert_eq!(tick(&conn, now).unwrap().len(), 1);
        assert_eq!(tick(&conn, now).unwrap().len(), 0);
        assert_eq!(tick(&conn, now).unwrap().len(), 0);
    }

    #[test]
    fn outage_collapses_to_one_run_not_a_backlog() {
        let conn = store::open_in_memory().unwrap();
        seed_robot(&conn);
        seed_definition(&conn, utc(2024, 1, 1, 8, 0));

        // Three Mondays missed; exactly one catch-up run for the latest.
        let created = tick(&conn, utc(2024, 1, 23, 12, 0)).unwrap();
        assert_eq!(created.len(), 1);
        let run = store::fetch_run(&conn, created[0]).unwrap().unwrap();
        assert_eq!(run.desired_start_time, utc(2024, 1, 22, 8, 0));
        assert_eq!(store::list_runs(&conn).unwrap().len(), 1);
    }

    #[test]
    fn nothing_fires_before_the_next_instant() {
        let conn = store::open_in_memory().unwrap();
        seed_robot(&conn);
        seed_definition(&conn, utc(2024, 1, 1, 8, 0));

        assert!(tick(&conn, utc(2024, 1, 3, 12, 0)).unwrap().is_empty());
    }

    #[test]
    fn definition_without_robot_retries_next_tick() {
        let conn = store::open_in_memory().unwrap();
        // No robot seeded; create the site by hand.
        crate::sites::create_installation(&conn, "Kårstø", "KAA").unwrap();
        let definition = seed_definition(&conn, utc(2024, 1, 1, 8, 0));

        assert!(tick(&conn, utc(2024, 1, 8, 9, 0)).unwrap().is_empty());

        // Watermark untouched, so the fire is still owed.
        let reloaded = store::fetch_definition(&conn, definition.id).unwrap().unwrap();
        assert_eq!(reloaded.last_auto_run_at, utc(2024, 1, 1, 8, 0));
    }

    #[test]
    fn empty_schedule_is_rejected_at_creation() {
        let conn = store::open_in_memory().unwrap();
        let source = Source::new("echo-mission-2", Some(vec![blueprint()]));
        store::insert_source(&conn, &source).unwrap();

        let result = create_definition(
            &conn,
            source.id,
            "Misconfigured",
            "KAA",
            None,
            Some(AutoScheduleFrequency::new(vec![])),
            utc(2024, 1, 1, 8, 0),
        );
        assert!(matches!(
            result,
            Err(crate::EngineError::Domain(Error::ScheduleMisconfigured(_)))
        ));
    }

    fn deck_boundary() -> Boundary {
        Boundary {
            polygon: vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]],
            z_min: 0.0,
            z_max: 5.0,
        }
    }

    fn fenced_area(conn: &Connection, with_map: bool) -> armada_core::InspectionArea {
        let robot_area_id =
            store::list_robots(conn).unwrap()[0].current_inspection_area_id.unwrap();
        let home = store::fetch_area(conn, robot_area_id).unwrap().unwrap();
        let map_metadata = with_map.then(|| MapMetadata {
            map_name: "kaa-compressor-deck".into(),
            boundary: deck_boundary(),
            transformation_matrices: TransformationMatrices {
                c1: 2.0,
                c2: 2.0,
                d1: 10.0,
                d2: 20.0,
            },
        });
        crate::sites::create_area(
            conn,
            home.installation_id,
            home.plant_id,
            "Fenced deck",
            Some(deck_boundary()),
            map_metadata,
        )
        .unwrap()
    }

    #[test]
    fn pose_outside_the_area_boundary_is_rejected() {
        let conn = store::open_in_memory().unwrap();
        let robot = seed_robot(&conn);
        let area = fenced_area(&conn, false);

        let mut far = blueprint();
        far.robot_pose = Pose::new(Position::new(50.0, 2.0, 0.0), Orientation::identity());
        let result = create_run(
            &conn,
            &robot,
            None,
            "Out of bounds",
            "KAA",
            Some(area.id),
            &[blueprint(), far],
            utc(2024, 1, 8, 9, 0),
            MissionRunType::Normal,
        );
        assert!(matches!(
            result,
            Err(crate::EngineError::Domain(Error::ScheduleMisconfigured(_)))
        ));

        // The same run with every pose inside goes through.
        create_run(
            &conn,
            &robot,
            None,
            "In bounds",
            "KAA",
            Some(area.id),
            &[blueprint()],
            utc(2024, 1, 8, 9, 0),
            MissionRunType::Normal,
        )
        .unwrap();
    }

    #[test]
    fn run_snapshots_the_area_map_metadata() {
        let conn = store::open_in_memory().unwrap();
        let robot = seed_robot(&conn);
        let area = fenced_area(&conn, true);

        let run_id = create_run(
            &conn,
            &robot,
            None,
            "Mapped round",
            "KAA",
            Some(area.id),
            &[blueprint()],
            utc(2024, 1, 8, 9, 0),
            MissionRunType::Normal,
        )
        .unwrap();

        let run = store::fetch_run(&conn, run_id).unwrap().unwrap();
        assert_eq!(run.map_metadata, area.map_metadata);
        assert_eq!(
            run.map_metadata.as_ref().map(|m| m.map_name.as_str()),
            Some("kaa-compressor-deck")
        );
    }

    #[test]
    fn deprecated_definitions_are_ignored() {
        let conn = store::open_in_memory().unwrap();
        seed_robot(&conn);
        let definition = seed_definition(&conn, utc(2024, 1, 1, 8, 0));
        conn.execute(
            "UPDATE mission_definitions SET is_deprecated = 1 WHERE id = ?1",
            rusqlite::params![definition.id.to_string()],
        )
        .unwrap();

        assert!(tick(&conn, utc(2024, 1, 8, 9, 0)).unwrap().is_empty());
    }
}
