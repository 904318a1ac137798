//! Mission-run state machine: applies robot-interface events and operator
//! commands to runs and their tasks.
//!
//! Task events are applied in `task_order`, not arrival order. An event for
//! a task ahead of the frontier (the lowest non-terminal order) is parked in
//! the durable buffer and replayed the moment the frontier catches up. Late
//! events for terminal runs or tasks are logged and discarded; nothing ever
//! re-opens a terminal record.

use armada_core::{
    Error, Inspection, InspectionFinding, InspectionFindingId, InspectionId, InspectionStatus,
    MissionRun, MissionRunId, MissionStatus, MissionTask, TaskStatus,
};
use armada_protocol::{Envelope, EventKind, MissionStarted, TaskUpdate};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::{Result, registry, store};

/// Apply one envelope from the robot interface.
pub fn apply_event(conn: &Connection, envelope: &Envelope) -> Result<()> {
    match &envelope.kind {
        EventKind::RobotConnectivity(connectivity) => {
            let Some(robot_id) = envelope.robot_id else {
                return Err(Error::ReferenceNotFound(
                    "connectivity envelope carries no robot id".into(),
                )
                .into());
            };
            registry::update_connectivity(
                conn,
                robot_id,
                connectivity.isar_connected,
                connectivity.status,
            )?;
            Ok(())
        }
        EventKind::MissionStarted(started) => {
            let run = require_run(conn, envelope.mission_run_id)?;
            handle_mission_started(conn, run, started, envelope.sent_at)
        }
        EventKind::TaskUpdate(update) => handle_task_update(conn, update, envelope.sent_at),
        EventKind::MissionFault(fault) => {
            let run = require_run(conn, envelope.mission_run_id)?;
            if run.status.is_terminal() {
                warn!(run_id = %run.id, "fault event for terminal run discarded");
                return Ok(());
            }
            fail_run(conn, run, &fault.reason, envelope.sent_at)
        }
    }
}

fn require_run(conn: &Connection, run_id: Option<MissionRunId>) -> Result<MissionRun> {
    let Some(run_id) = run_id else {
        return Err(Error::ReferenceNotFound("envelope carries no mission run id".into()).into());
    };
    let Some(run) = store::fetch_run(conn, run_id)? else {
        return Err(Error::ReferenceNotFound(format!("mission run {run_id}")).into());
    };
    Ok(run)
}

/// The robot accepted the mission: mark it busy, move the run Ongoing and
/// record the ISAR-side ids every later task event is keyed by.
fn handle_mission_started(
    conn: &Connection,
    mut run: MissionRun,
    started: &MissionStarted,
    sent_at: DateTime<Utc>,
) -> Result<()> {
    if run.status == MissionStatus::Ongoing {
        debug!(run_id = %run.id, "duplicate mission-started event");
        return Ok(());
    }
    if run.status.is_terminal() {
        warn!(run_id = %run.id, "mission-started event for terminal run discarded");
        return Ok(());
    }
    let to = run.status.transition(MissionStatus::Ongoing)?;

    // Busy first; if the robot cannot take the mission the run is untouched.
    registry::mark_busy(conn, run.robot_id, run.id)?;

    run.status = to;
    run.start_time = Some(sent_at);
    run.isar_mission_id = Some(started.isar_mission_id.clone());
    store::update_run(conn, &run)?;

    let mut tasks = store::list_tasks_for_run(conn, run.id)?;
    for link in &started.tasks {
        let Some(task) = tasks.iter_mut().find(|t| t.task_order == link.task_order) else {
            warn!(run_id = %run.id, task_order = link.task_order,
                "mission-started names an unknown task order");
            continue;
        };
        task.isar_task_id = Some(link.isar_task_id.clone());
        store::update_task(conn, task)?;
    }
    info!(run_id = %run.id, robot_id = %run.robot_id,
        isar_mission_id = %started.isar_mission_id, "mission run ongoing");
    Ok(())
}

fn handle_task_update(conn: &Connection, update: &TaskUpdate, sent_at: DateTime<Utc>) -> Result<()> {
    let Some(task) = store::fetch_task_by_isar_id(conn, &update.isar_task_id)? else {
        return Err(Error::ReferenceNotFound(format!(
            "task with isar id {}",
            update.isar_task_id
        ))
        .into());
    };
    let Some(run_id) = task.mission_run_id else {
        warn!(task_id = %task.id, "task event for an orphaned task discarded");
        return Ok(());
    };
    let Some(run) = store::fetch_run(conn, run_id)? else {
        warn!(task_id = %task.id, "task event for a deleted run discarded");
        return Ok(());
    };
    if run.status.is_terminal() {
        warn!(run_id = %run.id, isar_task_id = %update.isar_task_id,
            "task event for terminal run discarded");
        return Ok(());
    }
    if task.status.is_terminal() {
        warn!(run_id = %run.id, task_order = task.task_order,
            "task event for terminal task discarded");
        return Ok(());
    }

    let tasks = store::list_tasks_for_run(conn, run.id)?;
    let frontier = tasks
        .iter()
        .find(|t| !t.status.is_terminal())
        .map(|t| t.task_order);
    if frontier.is_some_and(|order| task.task_order > order) {
        debug!(run_id = %run.id, task_order = task.task_order,
            "buffering out-of-order task event");
        store::buffer_task_event(
            conn,
            run.id,
            task.task_order,
            &serde_json::to_string(update)?,
            sent_at,
        )?;
        return Ok(());
    }

    apply_task_update(conn, task, update, sent_at)?;
    advance_run(conn, run, sent_at)
}

/// Apply a status move to one task, creating or updating its inspection
/// artifact when the event carries one. Duplicate same-status events are
/// no-ops.
fn apply_task_update(
    conn: &Connection,
    mut task: MissionTask,
    update: &TaskUpdate,
    sent_at: DateTime<Utc>,
) -> Result<()> {
    if task.status != update.status {
        // A terminal report can be the first event we see for a task (the
        // in-progress one got lost or arrived out of order); pass through
        // in_progress so the table edges stay honest.
        if task.status == TaskStatus::Pending
            && matches!(update.status, TaskStatus::Completed | TaskStatus::Failed)
        {
            task.status = task.status.transition(TaskStatus::InProgress)?;
            task.start_time = Some(sent_at);
        }
        task.status = task.status.transition(update.status)?;
        if update.status == TaskStatus::InProgress && task.start_time.is_none() {
            task.start_time = Some(sent_at);
        }
        if update.status.is_terminal() {
            task.end_time = Some(sent_at);
        }
    }

    if let Some(result) = &update.inspection {
        match task.inspection_id {
            Some(inspection_id) => {
                let end_time = result.status.is_terminal().then_some(sent_at);
                store::update_inspection_status(conn, inspection_id, result.status, end_time)?;
            }
            None => {
                let inspection = Inspection {
                    id: InspectionId::new(),
                    isar_task_id: update.isar_task_id.clone(),
                    isar_inspection_id: result.isar_inspection_id.clone(),
                    inspection_target: result.inspection_target,
                    status: result.status,
                    inspection_type: result.inspection_type,
                    analysis_type: None,
                    inspection_url: result.inspection_url.clone(),
                    start_time: task.start_time.or(Some(sent_at)),
                    end_time: result.status.is_terminal().then_some(sent_at),
                };
                store::insert_inspection(conn, &inspection)?;
                task.inspection_id = Some(inspection.id);
            }
        }
    }

    store::update_task(conn, &task)?;
    Ok(())
}

/// Replay buffered events that the advancing frontier has unlocked, then
/// settle the run if every task reached a terminal status.
fn advance_run(conn: &Connection, run: MissionRun, sent_at: DateTime<Utc>) -> Result<()> {
    loop {
        let tasks = store::list_tasks_for_run(conn, run.id)?;
        if let Some(failed) = tasks.iter().find(|t| t.status == TaskStatus::Failed) {
            let reason = format!("task {} failed", failed.task_order);
            return fail_run(conn, run, &reason, sent_at);
        }
        let Some(frontier) = tasks.iter().find(|t| !t.status.is_terminal()) else {
            return complete_run(conn, run, sent_at);
        };
        let Some((payload, _received_at)) =
            store::take_buffered_event(conn, run.id, frontier.task_order)?
        else {
            return Ok(());
        };
        let update: TaskUpdate = serde_json::from_str(&payload)?;
        debug!(run_id = %run.id, task_order = frontier.task_order,
            "replaying buffered task event");
        apply_task_update(conn, frontier.clone(), &update, sent_at)?;
    }
}

/// All tasks done: the run is Successful, the robot goes back to the pool
/// and the owning definition records its latest success.
fn complete_run(conn: &Connection, mut run: MissionRun, sent_at: DateTime<Utc>) -> Result<()> {
    run.status = run.status.transition(MissionStatus::Successful)?;
    run.end_time = Some(sent_at);
    store::update_run(conn, &run)?;
    settle_terminal_run(conn, &run)?;
    if let Some(definition_id) = run.mission_id {
        store::set_last_successful_run(conn, definition_id, run.id)?;
    }
    info!(run_id = %run.id, robot_id = %run.robot_id, "mission run successful");
    Ok(())
}

/// Move a run to Failed (or Aborted when the table has no Failed edge from
/// its current status) and cancel every task still in flight.
fn fail_run(
    conn: &Connection,
    mut run: MissionRun,
    reason: &str,
    sent_at: DateTime<Utc>,
) -> Result<()> {
    let to = if run.status.can_transition(MissionStatus::Failed) {
        MissionStatus::Failed
    } else {
        MissionStatus::Aborted
    };
    run.status = run.status.transition(to)?;
    run.status_reason = Some(reason.to_string());
    run.end_time = Some(sent_at);
    store::update_run(conn, &run)?;
    cancel_open_tasks(conn, run.id, sent_at)?;
    settle_terminal_run(conn, &run)?;
    warn!(run_id = %run.id, robot_id = %run.robot_id, status = run.status.as_str(),
        reason, "mission run failed");
    Ok(())
}

/// Cancel every task still in flight, along with any inspection artifact
/// still open on one of them.
fn cancel_open_tasks(conn: &Connection, run_id: MissionRunId, sent_at: DateTime<Utc>) -> Result<()> {
    for mut task in store::list_tasks_for_run(conn, run_id)? {
        if task.status.is_terminal() {
            continue;
        }
        task.status = task.status.transition(TaskStatus::Cancelled)?;
        task.end_time = Some(sent_at);
        store::update_task(conn, &task)?;
        if let Some(inspection_id) = task.inspection_id
            && let Some(inspection) = store::fetch_inspection(conn, inspection_id)?
            && !inspection.status.is_terminal()
        {
            store::update_inspection_status(
                conn,
                inspection_id,
                InspectionStatus::Cancelled,
                Some(sent_at),
            )?;
        }
    }
    Ok(())
}

/// Terminal housekeeping shared by every exit path: free the robot and drop
/// whatever was still parked in the buffer.
fn settle_terminal_run(conn: &Connection, run: &MissionRun) -> Result<()> {
    registry::release(conn, run.robot_id)?;
    store::clear_buffered_events(conn, run.id)?;
    Ok(())
}

/// Record an analysis finding against a task, linking it to the task's
/// inspection when one was captured. Findings are loosely coupled: a
/// finding for a task nobody inspected is still kept.
pub fn record_finding(
    conn: &Connection,
    isar_task_id: &str,
    finding: &str,
    inspection_date: DateTime<Utc>,
) -> Result<InspectionFinding> {
    let inspection_id = store::fetch_inspection_by_isar_task_id(conn, isar_task_id)?
        .map(|inspection| inspection.id);
    let finding = InspectionFinding {
        id: InspectionFindingId::new(),
        inspection_date,
        isar_task_id: isar_task_id.to_string(),
        finding: finding.to_string(),
        inspection_id,
    };
    store::insert_finding(conn, &finding)?;
    info!(isar_task_id, linked = inspection_id.is_some(), "recorded inspection finding");
    Ok(finding)
}

// --- operator commands ---

/// Pause an ongoing run. The in-flight task is paused with it; completed
/// tasks are untouched.
pub fn pause_run(conn: &Connection, run_id: MissionRunId) -> Result<MissionRun> {
    let mut run = require_run(conn, Some(run_id))?;
    run.status = run.status.transition(MissionStatus::Paused)?;
    store::update_run(conn, &run)?;
    toggle_in_flight_task(conn, run.id, TaskStatus::InProgress, TaskStatus::Paused)?;
    info!(run_id = %run.id, "mission run paused");
    Ok(run)
}

pub fn resume_run(conn: &Connection, run_id: MissionRunId) -> Result<MissionRun> {
    let mut run = require_run(conn, Some(run_id))?;
    run.status = run.status.transition(MissionStatus::Ongoing)?;
    store::update_run(conn, &run)?;
    toggle_in_flight_task(conn, run.id, TaskStatus::Paused, TaskStatus::InProgress)?;
    info!(run_id = %run.id, "mission run resumed");
    Ok(run)
}

fn toggle_in_flight_task(
    conn: &Connection,
    run_id: MissionRunId,
    from: TaskStatus,
    to: TaskStatus,
) -> Result<()> {
    for mut task in store::list_tasks_for_run(conn, run_id)? {
        if task.status == from {
            task.status = task.status.transition(to)?;
            store::update_task(conn, &task)?;
        }
    }
    Ok(())
}

/// Cancel a run that has not started executing. Only Pending and Queued
/// runs can be cancelled; anything later must be aborted.
pub fn cancel_run(
    conn: &Connection,
    run_id: MissionRunId,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<MissionRun> {
    let mut run = require_run(conn, Some(run_id))?;
    run.status = run.status.transition(MissionStatus::Cancelled)?;
    run.status_reason = reason.map(str::to_string);
    run.end_time = Some(now);
    store::update_run(conn, &run)?;
    cancel_open_tasks(conn, run.id, now)?;
    settle_terminal_run(conn, &run)?;
    info!(run_id = %run.id, "mission run cancelled");
    Ok(run)
}

/// Operator abort: valid from every non-terminal status.
pub fn abort_run(
    conn: &Connection,
    run_id: MissionRunId,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<MissionRun> {
    let mut run = require_run(conn, Some(run_id))?;
    run.status = run.status.transition(MissionStatus::Aborted)?;
    run.status_reason = reason.map(str::to_string);
    run.end_time = Some(now);
    store::update_run(conn, &run)?;
    cancel_open_tasks(conn, run.id, now)?;
    settle_terminal_run(conn, &run)?;
    info!(run_id = %run.id, "mission run aborted");
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::seed_robot;
    use crate::{EngineError, dispatcher, scheduler};
    use armada_core::{
        FleetStatus, InspectionType, MissionRunType, Orientation, Pose, Position, Robot,
        RobotStatus, TaskBlueprint,
    };
    use armada_protocol::{InspectionResult, IsarTaskLink, RobotConnectivity};
    use chrono::{TimeZone, Utc};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, 9, minute, 0).unwrap()
    }

    fn blueprint(tag: &str) -> TaskBlueprint {
        TaskBlueprint {
            task_type: "inspection".into(),
            tag_id: Some(tag.into()),
            robot_pose: Pose::new(Position::new(0.0, 0.0, 0.0), Orientation::identity()),
            inspection_target: Some(Position::new(1.0, 1.0, 1.0)),
        }
    }

    /// Seed a connected robot with a three-task run already promoted to
    /// Queued, then acknowledge it so the run is Ongoing with ISAR task ids
    /// t0/t1/t2.
    fn seed_ongoing_run(conn: &Connection) -> (Robot, MissionRunId) {
        let robot = seed_robot(conn);
        registry::update_connectivity(conn, robot.id, true, RobotStatus::Available).unwrap();
        let run_id = scheduler::create_ad_hoc_run(
            conn,
            robot.id,
            "Deck round",
            &[blueprint("A"), blueprint("B"), blueprint("C")],
            at(0),
            MissionRunType::Normal,
        )
        .unwrap();
        dispatcher::dispatch(conn).unwrap();

        let started = EventKind::MissionStarted(MissionStarted {
            isar_mission_id: "isar-m-1".into(),
            tasks: (0..3)
                .map(|order| IsarTaskLink {
                    task_order: order,
                    isar_task_id: format!("t{order}"),
                })
                .collect(),
        });
        apply_event(conn, &Envelope::for_run(run_id, started, at(1))).unwrap();
        (robot, run_id)
    }

    fn task_update(isar_task_id: &str, status: TaskStatus) -> Envelope {
        Envelope::new(
            EventKind::TaskUpdate(TaskUpdate {
                isar_task_id: isar_task_id.into(),
                status,
                inspection: None,
            }),
            at(2),
        )
    }

    fn complete(conn: &Connection, isar_task_id: &str) {
        apply_event(conn, &task_update(isar_task_id, TaskStatus::InProgress)).unwrap();
        apply_event(conn, &task_update(isar_task_id, TaskStatus::Completed)).unwrap();
    }

    fn task_update_with_inspection(
        isar_task_id: &str,
        status: TaskStatus,
        inspection_status: InspectionStatus,
        minute: u32,
    ) -> Envelope {
        Envelope::new(
            EventKind::TaskUpdate(TaskUpdate {
                isar_task_id: isar_task_id.into(),
                status,
                inspection: Some(InspectionResult {
                    isar_inspection_id: format!("insp-{isar_task_id}"),
                    status: inspection_status,
                    inspection_type: InspectionType::Image,
                    inspection_target: Position::new(1.0, 1.0, 1.0),
                    inspection_url: None,
                }),
            }),
            at(minute),
        )
    }

    #[test]
    fn started_run_goes_ongoing_and_robot_busy() {
        let conn = store::open_in_memory().unwrap();
        let (robot, run_id) = seed_ongoing_run(&conn);

        let run = store::fetch_run(&conn, run_id).unwrap().unwrap();
        assert_eq!(run.status, MissionStatus::Ongoing);
        assert_eq!(run.start_time, Some(at(1)));
        assert_eq!(run.isar_mission_id.as_deref(), Some("isar-m-1"));

        let robot = store::fetch_robot(&conn, robot.id).unwrap().unwrap();
        assert_eq!(robot.fleet_status, FleetStatus::Busy);
        assert_eq!(robot.current_mission_id, Some(run_id));

        let tasks = store::list_tasks_for_run(&conn, run_id).unwrap();
        assert_eq!(tasks[1].isar_task_id.as_deref(), Some("t1"));
    }

    #[test]
    fn in_order_completion_finishes_the_run_and_frees_the_robot() {
        let conn = store::open_in_memory().unwrap();
        let (robot, run_id) = seed_ongoing_run(&conn);

        complete(&conn, "t0");
        complete(&conn, "t1");
        complete(&conn, "t2");

        let run = store::fetch_run(&conn, run_id).unwrap().unwrap();
        assert_eq!(run.status, MissionStatus::Successful);
        assert!(run.end_time.is_some());

        let robot = store::fetch_robot(&conn, robot.id).unwrap().unwrap();
        assert_eq!(robot.fleet_status, FleetStatus::Available);
        assert_eq!(robot.current_mission_id, None);
    }

    #[test]
    fn out_of_order_events_are_buffered_and_replayed() {
        let conn = store::open_in_memory().unwrap();
        let (_, run_id) = seed_ongoing_run(&conn);

        // t1 finishes "before" t0 from the engine's point of view.
        apply_event(&conn, &task_update("t1", TaskStatus::Completed)).unwrap();
        let tasks = store::list_tasks_for_run(&conn, run_id).unwrap();
        assert_eq!(tasks[1].status, TaskStatus::Pending);

        // Once t0 lands, the buffered t1 event replays immediately.
        complete(&conn, "t0");
        let tasks = store::list_tasks_for_run(&conn, run_id).unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Completed);
        assert_eq!(tasks[1].status, TaskStatus::Completed);
        assert_eq!(tasks[2].status, TaskStatus::Pending);

        complete(&conn, "t2");
        let run = store::fetch_run(&conn, run_id).unwrap().unwrap();
        assert_eq!(run.status, MissionStatus::Successful);
    }

    #[test]
    fn failed_task_fails_the_run_and_cancels_the_rest() {
        let conn = store::open_in_memory().unwrap();
        let (robot, run_id) = seed_ongoing_run(&conn);

        complete(&conn, "t0");
        apply_event(&conn, &task_update("t1", TaskStatus::InProgress)).unwrap();
        apply_event(&conn, &task_update("t1", TaskStatus::Failed)).unwrap();

        let run = store::fetch_run(&conn, run_id).unwrap().unwrap();
        assert_eq!(run.status, MissionStatus::Failed);
        assert_eq!(run.status_reason.as_deref(), Some("task 1 failed"));

        let tasks = store::list_tasks_for_run(&conn, run_id).unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Completed);
        assert_eq!(tasks[1].status, TaskStatus::Failed);
        assert_eq!(tasks[2].status, TaskStatus::Cancelled);

        let robot = store::fetch_robot(&conn, robot.id).unwrap().unwrap();
        assert_eq!(robot.fleet_status, FleetStatus::Available);
    }

    #[test]
    fn late_events_never_reopen_a_terminal_run() {
        let conn = store::open_in_memory().unwrap();
        let (_, run_id) = seed_ongoing_run(&conn);
        complete(&conn, "t0");
        complete(&conn, "t1");
        complete(&conn, "t2");

        // Discarded, not an error, and nothing moves.
        apply_event(&conn, &task_update("t1", TaskStatus::InProgress)).unwrap();
        let run = store::fetch_run(&conn, run_id).unwrap().unwrap();
        assert_eq!(run.status, MissionStatus::Successful);
        let tasks = store::list_tasks_for_run(&conn, run_id).unwrap();
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));
    }

    #[test]
    fn terminal_task_update_creates_the_inspection_record() {
        let conn = store::open_in_memory().unwrap();
        let (_, run_id) = seed_ongoing_run(&conn);

        apply_event(&conn, &task_update("t0", TaskStatus::InProgress)).unwrap();
        let envelope = Envelope::new(
            EventKind::TaskUpdate(TaskUpdate {
                isar_task_id: "t0".into(),
                status: TaskStatus::Completed,
                inspection: Some(InspectionResult {
                    isar_inspection_id: "insp-1".into(),
                    status: InspectionStatus::Successful,
                    inspection_type: InspectionType::Image,
                    inspection_target: Position::new(1.0, 1.0, 1.0),
                    inspection_url: Some("https://store/insp-1".into()),
                }),
            }),
            at(3),
        );
        apply_event(&conn, &envelope).unwrap();

        let tasks = store::list_tasks_for_run(&conn, run_id).unwrap();
        let inspection_id = tasks[0].inspection_id.unwrap();
        let inspection = store::fetch_inspection(&conn, inspection_id).unwrap().unwrap();
        assert_eq!(inspection.isar_inspection_id, "insp-1");
        assert_eq!(inspection.status, InspectionStatus::Successful);
        assert_eq!(inspection.end_time, Some(at(3)));
    }

    #[test]
    fn fault_fails_an_ongoing_run() {
        let conn = store::open_in_memory().unwrap();
        let (_, run_id) = seed_ongoing_run(&conn);
        complete(&conn, "t0");

        let fault = EventKind::MissionFault(armada_protocol::MissionFault {
            reason: "localization lost".into(),
        });
        apply_event(&conn, &Envelope::for_run(run_id, fault, at(4))).unwrap();

        let run = store::fetch_run(&conn, run_id).unwrap().unwrap();
        assert_eq!(run.status, MissionStatus::Failed);
        assert_eq!(run.status_reason.as_deref(), Some("localization lost"));
        let tasks = store::list_tasks_for_run(&conn, run_id).unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Completed);
        assert_eq!(tasks[1].status, TaskStatus::Cancelled);
    }

    #[test]
    fn pause_and_resume_round_trip() {
        let conn = store::open_in_memory().unwrap();
        let (_, run_id) = seed_ongoing_run(&conn);

        assert_eq!(pause_run(&conn, run_id).unwrap().status, MissionStatus::Paused);
        assert_eq!(resume_run(&conn, run_id).unwrap().status, MissionStatus::Ongoing);
    }

    #[test]
    fn pause_carries_the_in_flight_task_and_resume_restores_it() {
        let conn = store::open_in_memory().unwrap();
        let (_, run_id) = seed_ongoing_run(&conn);
        complete(&conn, "t0");
        apply_event(&conn, &task_update("t1", TaskStatus::InProgress)).unwrap();

        pause_run(&conn, run_id).unwrap();
        let tasks = store::list_tasks_for_run(&conn, run_id).unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Completed);
        assert_eq!(tasks[1].status, TaskStatus::Paused);
        assert_eq!(tasks[2].status, TaskStatus::Pending);

        resume_run(&conn, run_id).unwrap();
        let tasks = store::list_tasks_for_run(&conn, run_id).unwrap();
        assert_eq!(tasks[1].status, TaskStatus::InProgress);
        assert_eq!(tasks[2].status, TaskStatus::Pending);
    }

    #[test]
    fn abort_cancels_the_open_inspection_but_not_settled_ones() {
        let conn = store::open_in_memory().unwrap();
        let (_, run_id) = seed_ongoing_run(&conn);

        apply_event(
            &conn,
            &task_update_with_inspection(
                "t0",
                TaskStatus::InProgress,
                InspectionStatus::InProgress,
                2,
            ),
        )
        .unwrap();
        apply_event(
            &conn,
            &task_update_with_inspection(
                "t0",
                TaskStatus::Completed,
                InspectionStatus::Successful,
                3,
            ),
        )
        .unwrap();
        apply_event(
            &conn,
            &task_update_with_inspection(
                "t1",
                TaskStatus::InProgress,
                InspectionStatus::InProgress,
                4,
            ),
        )
        .unwrap();

        abort_run(&conn, run_id, Some("operator stop"), at(5)).unwrap();

        let tasks = store::list_tasks_for_run(&conn, run_id).unwrap();
        let settled = store::fetch_inspection(&conn, tasks[0].inspection_id.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(settled.status, InspectionStatus::Successful);

        let open = store::fetch_inspection(&conn, tasks[1].inspection_id.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(open.status, InspectionStatus::Cancelled);
        assert_eq!(open.end_time, Some(at(5)));
    }

    #[test]
    fn finding_links_to_the_task_inspection_when_one_exists() {
        let conn = store::open_in_memory().unwrap();
        let (_, run_id) = seed_ongoing_run(&conn);
        apply_event(
            &conn,
            &task_update_with_inspection(
                "t0",
                TaskStatus::InProgress,
                InspectionStatus::InProgress,
                2,
            ),
        )
        .unwrap();

        let linked = record_finding(&conn, "t0", "corrosion on flange", at(6)).unwrap();
        let tasks = store::list_tasks_for_run(&conn, run_id).unwrap();
        assert_eq!(linked.inspection_id, tasks[0].inspection_id);

        // A finding against a task nobody inspected is kept, unlinked.
        let unlinked = record_finding(&conn, "t9", "paint flaking", at(7)).unwrap();
        assert_eq!(unlinked.inspection_id, None);

        let findings = store::list_findings(&conn).unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].id, unlinked.id);
        assert_eq!(findings[1].id, linked.id);
    }

    #[test]
    fn cancel_is_rejected_once_the_run_is_ongoing() {
        let conn = store::open_in_memory().unwrap();
        let (_, run_id) = seed_ongoing_run(&conn);

        let result = cancel_run(&conn, run_id, Some("operator change of plan"), at(5));
        assert!(matches!(
            result,
            Err(EngineError::Domain(Error::InvalidTransition { .. }))
        ));

        let run = abort_run(&conn, run_id, Some("operator stop"), at(5)).unwrap();
        assert_eq!(run.status, MissionStatus::Aborted);
    }

    #[test]
    fn pending_run_can_be_cancelled() {
        let conn = store::open_in_memory().unwrap();
        let robot = seed_robot(&conn);
        let run_id = scheduler::create_ad_hoc_run(
            &conn,
            robot.id,
            "Never ran",
            &[blueprint("A")],
            at(0),
            MissionRunType::Normal,
        )
        .unwrap();

        let run = cancel_run(&conn, run_id, None, at(1)).unwrap();
        assert_eq!(run.status, MissionStatus::Cancelled);
        let tasks = store::list_tasks_for_run(&conn, run_id).unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Cancelled);
    }

    #[test]
    fn connectivity_event_routes_to_the_registry() {
        let conn = store::open_in_memory().unwrap();
        let robot = seed_robot(&conn);

        let kind = EventKind::RobotConnectivity(RobotConnectivity {
            isar_connected: true,
            status: RobotStatus::Available,
        });
        apply_event(&conn, &Envelope::for_robot(robot.id, kind, at(0))).unwrap();

        let robot = store::fetch_robot(&conn, robot.id).unwrap().unwrap();
        assert_eq!(robot.fleet_status, FleetStatus::Available);
        assert!(robot.isar_connected);
    }
}
