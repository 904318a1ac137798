//! Sqlite persistence: schema, row mappers, and the shared fetch/insert
//! helpers used by the registry, scheduler, dispatcher and event pipeline.
//!
//! Foreign-key actions encode the lifecycle rules: deleting a robot cascades
//! to its runs and their tasks, while installations, plants and inspection
//! areas are restricted from deletion as long as anything references them.
//! Timestamps are stored as RFC 3339 text, embedded value structs as JSON.

use armada_core::{
    AutoScheduleFrequency, AutoScheduleFrequencyId, FleetStatus, Inspection, InspectionArea,
    InspectionAreaId, InspectionFinding, InspectionFindingId, InspectionId, InspectionStatus,
    InspectionType,
    Installation, InstallationId, MissionDefinition, MissionDefinitionId, MissionRun,
    MissionRunId, MissionRunType, MissionStatus, MissionTask, MissionTaskId, Plant, PlantId,
    Robot, RobotId, RobotModel, RobotModelId, RobotStatus, Source, SourceId, TaskStatus,
    TimeAndDay, TimeAndDayId,
    schedule::{weekday_from_db, weekday_to_db},
};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::fmt::Display;
use std::fs;
use std::path::Path;

use crate::Result;

pub fn open(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS installations (
          id TEXT PRIMARY KEY,
          name TEXT NOT NULL,
          installation_code TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS plants (
          id TEXT PRIMARY KEY,
          installation_id TEXT NOT NULL REFERENCES installations(id) ON DELETE RESTRICT,
          plant_code TEXT NOT NULL UNIQUE,
          name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS inspection_areas (
          id TEXT PRIMARY KEY,
          installation_id TEXT NOT NULL REFERENCES installations(id) ON DELETE RESTRICT,
          plant_id TEXT NOT NULL REFERENCES plants(id) ON DELETE RESTRICT,
          name TEXT NOT NULL,
          boundary TEXT,
          map_metadata TEXT
        );

        CREATE TABLE IF NOT EXISTS robot_models (
          id TEXT PRIMARY KEY,
          model_type TEXT NOT NULL UNIQUE,
          battery_warning_threshold REAL,
          lower_pressure_warning_threshold REAL,
          upper_pressure_warning_threshold REAL,
          average_duration_per_tag REAL
        );

        CREATE TABLE IF NOT EXISTS robots (
          id TEXT PRIMARY KEY,
          name TEXT NOT NULL,
          isar_id TEXT NOT NULL UNIQUE,
          model_id TEXT NOT NULL REFERENCES robot_models(id) ON DELETE RESTRICT,
          current_installation_id TEXT NOT NULL REFERENCES installations(id) ON DELETE RESTRICT,
          current_inspection_area_id TEXT REFERENCES inspection_areas(id) ON DELETE RESTRICT,
          host TEXT NOT NULL,
          port INTEGER NOT NULL,
          capabilities TEXT NOT NULL,
          isar_connected INTEGER NOT NULL,
          deprecated INTEGER NOT NULL,
          mission_queue_frozen INTEGER NOT NULL,
          status TEXT NOT NULL,
          fleet_status TEXT NOT NULL,
          current_mission_id TEXT,
          version INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS sources (
          id TEXT PRIMARY KEY,
          source_id TEXT NOT NULL UNIQUE,
          custom_mission_tasks TEXT
        );

        CREATE TABLE IF NOT EXISTS auto_schedule_frequencies (
          id TEXT PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS time_and_days (
          id TEXT PRIMARY KEY,
          auto_schedule_frequency_id TEXT NOT NULL
            REFERENCES auto_schedule_frequencies(id) ON DELETE CASCADE,
          day_of_week INTEGER NOT NULL,
          time_of_day TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS mission_definitions (
          id TEXT PRIMARY KEY,
          source_id TEXT NOT NULL REFERENCES sources(id) ON DELETE RESTRICT,
          name TEXT NOT NULL,
          installation_code TEXT NOT NULL,
          inspection_area_id TEXT REFERENCES inspection_areas(id) ON DELETE RESTRICT,
          inspection_frequency_secs INTEGER,
          auto_schedule_frequency_id TEXT REFERENCES auto_schedule_frequencies(id),
          last_successful_run_id TEXT,
          last_auto_run_at TEXT NOT NULL,
          is_deprecated INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS mission_runs (
          id TEXT PRIMARY KEY,
          mission_id TEXT,
          robot_id TEXT NOT NULL REFERENCES robots(id) ON DELETE CASCADE,
          inspection_area_id TEXT REFERENCES inspection_areas(id) ON DELETE RESTRICT,
          name TEXT NOT NULL,
          status TEXT NOT NULL,
          installation_code TEXT NOT NULL,
          desired_start_time TEXT NOT NULL,
          start_time TEXT,
          end_time TEXT,
          run_type TEXT NOT NULL,
          isar_mission_id TEXT,
          status_reason TEXT,
          estimated_duration_secs INTEGER,
          map_metadata TEXT,
          is_deprecated INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS mission_tasks (
          id TEXT PRIMARY KEY,
          mission_run_id TEXT REFERENCES mission_runs(id) ON DELETE CASCADE,
          task_order INTEGER NOT NULL,
          task_type TEXT NOT NULL,
          tag_id TEXT,
          robot_pose TEXT NOT NULL,
          isar_task_id TEXT,
          inspection_id TEXT,
          status TEXT NOT NULL,
          start_time TEXT,
          end_time TEXT,
          UNIQUE(mission_run_id, task_order)
        );

        CREATE TABLE IF NOT EXISTS inspections (
          id TEXT PRIMARY KEY,
          isar_task_id TEXT NOT NULL,
          isar_inspection_id TEXT NOT NULL,
          inspection_target TEXT NOT NULL,
          status TEXT NOT NULL,
          inspection_type TEXT NOT NULL,
          analysis_type TEXT,
          inspection_url TEXT,
          start_time TEXT,
          end_time TEXT
        );

        CREATE TABLE IF NOT EXISTS inspection_findings (
          id TEXT PRIMARY KEY,
          inspection_date TEXT NOT NULL,
          isar_task_id TEXT NOT NULL,
          finding TEXT NOT NULL,
          inspection_id TEXT REFERENCES inspections(id) ON DELETE SET NULL
        );

        CREATE TABLE IF NOT EXISTS buffered_task_events (
          mission_run_id TEXT NOT NULL REFERENCES mission_runs(id) ON DELETE CASCADE,
          task_order INTEGER NOT NULL,
          payload TEXT NOT NULL,
          received_at TEXT NOT NULL,
          PRIMARY KEY(mission_run_id, task_order)
        );
        ",
    )?;
    Ok(())
}

// Column lists shared between the list and single-row fetches so the
// mappers never drift from the queries.
pub const ROBOT_COLS: &str = "id, name, isar_id, model_id, current_installation_id, \
     current_inspection_area_id, host, port, capabilities, isar_connected, deprecated, \
     mission_queue_frozen, status, fleet_status, current_mission_id, version";
pub const RUN_COLS: &str = "id, mission_id, robot_id, inspection_area_id, name, status, \
     installation_code, desired_start_time, start_time, end_time, run_type, isar_mission_id, \
     status_reason, estimated_duration_secs, map_metadata, is_deprecated";
pub const TASK_COLS: &str = "id, mission_run_id, task_order, task_type, tag_id, robot_pose, \
     isar_task_id, inspection_id, status, start_time, end_time";

fn corrupt(idx: usize, message: impl Into<String>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into().into())
}

fn col<T, E: Display>(idx: usize, value: std::result::Result<T, E>) -> rusqlite::Result<T> {
    value.map_err(|err| corrupt(idx, err.to_string()))
}

pub fn datetime_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn datetime_col(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    col(idx, DateTime::parse_from_rfc3339(raw)).map(|dt| dt.with_timezone(&Utc))
}

fn opt_datetime_col(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|raw| datetime_col(idx, &raw)).transpose()
}

fn json_col<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    col(idx, serde_json::from_str(raw))
}

fn json_to_db<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)).into())
}

// --- installations / plants / areas ---

pub fn insert_installation(conn: &Connection, installation: &Installation) -> Result<()> {
    conn.execute(
        "INSERT INTO installations (id, name, installation_code) VALUES (?1, ?2, ?3)",
        params![
            installation.id.to_string(),
            installation.name,
            installation.installation_code
        ],
    )?;
    Ok(())
}

fn map_installation_row(row: &Row<'_>) -> rusqlite::Result<Installation> {
    Ok(Installation {
        id: col(0, InstallationId::parse(&row.get::<_, String>(0)?))?,
        name: row.get(1)?,
        installation_code: row.get(2)?,
    })
}

pub fn fetch_installation(conn: &Connection, id: InstallationId) -> Result<Option<Installation>> {
    Ok(conn
        .query_row(
            "SELECT id, name, installation_code FROM installations WHERE id = ?1",
            params![id.to_string()],
            map_installation_row,
        )
        .optional()?)
}

pub fn fetch_installation_by_code(
    conn: &Connection,
    installation_code: &str,
) -> Result<Option<Installation>> {
    Ok(conn
        .query_row(
            "SELECT id, name, installation_code FROM installations WHERE installation_code = ?1",
            params![installation_code],
            map_installation_row,
        )
        .optional()?)
}

pub fn list_installations(conn: &Connection) -> Result<Vec<Installation>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, installation_code FROM installations ORDER BY installation_code",
    )?;
    let rows = stmt.query_map([], map_installation_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

pub fn insert_plant(conn: &Connection, plant: &Plant) -> Result<()> {
    conn.execute(
        "INSERT INTO plants (id, installation_id, plant_code, name) VALUES (?1, ?2, ?3, ?4)",
        params![
            plant.id.to_string(),
            plant.installation_id.to_string(),
            plant.plant_code,
            plant.name
        ],
    )?;
    Ok(())
}

fn map_plant_row(row: &Row<'_>) -> rusqlite::Result<Plant> {
    Ok(Plant {
        id: col(0, PlantId::parse(&row.get::<_, String>(0)?))?,
        installation_id: col(1, InstallationId::parse(&row.get::<_, String>(1)?))?,
        plant_code: row.get(2)?,
        name: row.get(3)?,
    })
}

pub fn fetch_plant(conn: &Connection, id: PlantId) -> Result<Option<Plant>> {
    Ok(conn
        .query_row(
            "SELECT id, installation_id, plant_code, name FROM plants WHERE id = ?1",
            params![id.to_string()],
            map_plant_row,
        )
        .optional()?)
}

pub fn list_plants(conn: &Connection) -> Result<Vec<Plant>> {
    let mut stmt =
        conn.prepare("SELECT id, installation_id, plant_code, name FROM plants ORDER BY plant_code")?;
    let rows = stmt.query_map([], map_plant_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

pub fn insert_area(conn: &Connection, area: &InspectionArea) -> Result<()> {
    let boundary = area.boundary.as_ref().map(json_to_db).transpose()?;
    let map_metadata = area.map_metadata.as_ref().map(json_to_db).transpose()?;
    conn.execute(
        "INSERT INTO inspection_areas (id, installation_id, plant_id, name, boundary, map_metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            area.id.to_string(),
            area.installation_id.to_string(),
            area.plant_id.to_string(),
            area.name,
            boundary,
            map_metadata
        ],
    )?;
    Ok(())
}

fn map_area_row(row: &Row<'_>) -> rusqlite::Result<InspectionArea> {
    Ok(InspectionArea {
        id: col(0, InspectionAreaId::parse(&row.get::<_, String>(0)?))?,
        installation_id: col(1, InstallationId::parse(&row.get::<_, String>(1)?))?,
        plant_id: col(2, PlantId::parse(&row.get::<_, String>(2)?))?,
        name: row.get(3)?,
        boundary: row
            .get::<_, Option<String>>(4)?
            .map(|raw| json_col(4, &raw))
            .transpose()?,
        map_metadata: row
            .get::<_, Option<String>>(5)?
            .map(|raw| json_col(5, &raw))
            .transpose()?,
    })
}

pub fn fetch_area(conn: &Connection, id: InspectionAreaId) -> Result<Option<InspectionArea>> {
    Ok(conn
        .query_row(
            "SELECT id, installation_id, plant_id, name, boundary, map_metadata
             FROM inspection_areas WHERE id = ?1",
            params![id.to_string()],
            map_area_row,
        )
        .optional()?)
}

pub fn fetch_area_by_name(
    conn: &Connection,
    installation_code: &str,
    area_name: &str,
) -> Result<Option<InspectionArea>> {
    Ok(conn
        .query_row(
            "SELECT a.id, a.installation_id, a.plant_id, a.name, a.boundary, a.map_metadata
             FROM inspection_areas a
             JOIN installations i ON i.id = a.installation_id
             WHERE i.installation_code = ?1 AND a.name = ?2",
            params![installation_code, area_name],
            map_area_row,
        )
        .optional()?)
}

pub fn list_areas(conn: &Connection) -> Result<Vec<InspectionArea>> {
    let mut stmt = conn.prepare(
        "SELECT id, installation_id, plant_id, name, boundary, map_metadata
         FROM inspection_areas ORDER BY name",
    )?;
    let rows = stmt.query_map([], map_area_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

// --- robot models / robots ---

pub fn insert_robot_model(conn: &Connection, model: &RobotModel) -> Result<()> {
    conn.execute(
        "INSERT INTO robot_models (id, model_type, battery_warning_threshold,
           lower_pressure_warning_threshold, upper_pressure_warning_threshold,
           average_duration_per_tag)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            model.id.to_string(),
            model.model_type,
            model.battery_warning_threshold,
            model.lower_pressure_warning_threshold,
            model.upper_pressure_warning_threshold,
            model.average_duration_per_tag
        ],
    )?;
    Ok(())
}

fn map_robot_model_row(row: &Row<'_>) -> rusqlite::Result<RobotModel> {
    Ok(RobotModel {
        id: col(0, RobotModelId::parse(&row.get::<_, String>(0)?))?,
        model_type: row.get(1)?,
        battery_warning_threshold: row.get(2)?,
        lower_pressure_warning_threshold: row.get(3)?,
        upper_pressure_warning_threshold: row.get(4)?,
        average_duration_per_tag: row.get(5)?,
    })
}

pub fn fetch_robot_model(conn: &Connection, id: RobotModelId) -> Result<Option<RobotModel>> {
    Ok(conn
        .query_row(
            "SELECT id, model_type, battery_warning_threshold, lower_pressure_warning_threshold,
                    upper_pressure_warning_threshold, average_duration_per_tag
             FROM robot_models WHERE id = ?1",
            params![id.to_string()],
            map_robot_model_row,
        )
        .optional()?)
}

pub fn list_robot_models(conn: &Connection) -> Result<Vec<RobotModel>> {
    let mut stmt = conn.prepare(
        "SELECT id, model_type, battery_warning_threshold, lower_pressure_warning_threshold,
                upper_pressure_warning_threshold, average_duration_per_tag
         FROM robot_models ORDER BY model_type",
    )?;
    let rows = stmt.query_map([], map_robot_model_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

pub fn insert_robot(conn: &Connection, robot: &Robot) -> Result<()> {
    conn.execute(
        "INSERT INTO robots (id, name, isar_id, model_id, current_installation_id,
           current_inspection_area_id, host, port, capabilities, isar_connected, deprecated,
           mission_queue_frozen, status, fleet_status, current_mission_id, version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            robot.id.to_string(),
            robot.name,
            robot.isar_id,
            robot.model_id.to_string(),
            robot.current_installation_id.to_string(),
            robot.current_inspection_area_id.map(|id| id.to_string()),
            robot.host,
            robot.port,
            json_to_db(&robot.capabilities)?,
            robot.isar_connected,
            robot.deprecated,
            robot.mission_queue_frozen,
            robot.status.as_str(),
            robot.fleet_status.as_str(),
            robot.current_mission_id.map(|id| id.to_string()),
            robot.version
        ],
    )?;
    Ok(())
}

pub fn map_robot_row(row: &Row<'_>) -> rusqlite::Result<Robot> {
    let status_raw: String = row.get(12)?;
    let fleet_raw: String = row.get(13)?;
    Ok(Robot {
        id: col(0, RobotId::parse(&row.get::<_, String>(0)?))?,
        name: row.get(1)?,
        isar_id: row.get(2)?,
        model_id: col(3, RobotModelId::parse(&row.get::<_, String>(3)?))?,
        current_installation_id: col(4, InstallationId::parse(&row.get::<_, String>(4)?))?,
        current_inspection_area_id: row
            .get::<_, Option<String>>(5)?
            .map(|raw| col(5, InspectionAreaId::parse(&raw)))
            .transpose()?,
        host: row.get(6)?,
        port: row.get::<_, i64>(7)? as u16,
        capabilities: json_col(8, &row.get::<_, String>(8)?)?,
        isar_connected: row.get(9)?,
        deprecated: row.get(10)?,
        mission_queue_frozen: row.get(11)?,
        status: RobotStatus::parse(&status_raw)
            .ok_or_else(|| corrupt(12, format!("unknown robot status '{status_raw}'")))?,
        fleet_status: FleetStatus::parse(&fleet_raw)
            .ok_or_else(|| corrupt(13, format!("unknown fleet status '{fleet_raw}'")))?,
        current_mission_id: row
            .get::<_, Option<String>>(14)?
            .map(|raw| col(14, MissionRunId::parse(&raw)))
            .transpose()?,
        version: row.get(15)?,
    })
}

pub fn fetch_robot(conn: &Connection, id: RobotId) -> Result<Option<Robot>> {
    Ok(conn
        .query_row(
            &format!("SELECT {ROBOT_COLS} FROM robots WHERE id = ?1"),
            params![id.to_string()],
            map_robot_row,
        )
        .optional()?)
}

pub fn fetch_robot_by_isar_id(conn: &Connection, isar_id: &str) -> Result<Option<Robot>> {
    Ok(conn
        .query_row(
            &format!("SELECT {ROBOT_COLS} FROM robots WHERE isar_id = ?1"),
            params![isar_id],
            map_robot_row,
        )
        .optional()?)
}

pub fn list_robots(conn: &Connection) -> Result<Vec<Robot>> {
    let mut stmt = conn.prepare(&format!("SELECT {ROBOT_COLS} FROM robots ORDER BY name"))?;
    let rows = stmt.query_map([], map_robot_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// Compare-and-set write of a robot row, guarded by the version the caller
/// read. Returns false when the row changed underneath, in which case the
/// caller re-reads and retries or surfaces a `DispatchConflict`.
pub fn update_robot(conn: &Connection, robot: &Robot) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE robots SET name = ?2, current_installation_id = ?3,
           current_inspection_area_id = ?4, host = ?5, port = ?6, capabilities = ?7,
           isar_connected = ?8, deprecated = ?9, mission_queue_frozen = ?10, status = ?11,
           fleet_status = ?12, current_mission_id = ?13, version = version + 1
         WHERE id = ?1 AND version = ?14",
        params![
            robot.id.to_string(),
            robot.name,
            robot.current_installation_id.to_string(),
            robot.current_inspection_area_id.map(|id| id.to_string()),
            robot.host,
            robot.port,
            json_to_db(&robot.capabilities)?,
            robot.isar_connected,
            robot.deprecated,
            robot.mission_queue_frozen,
            robot.status.as_str(),
            robot.fleet_status.as_str(),
            robot.current_mission_id.map(|id| id.to_string()),
            robot.version
        ],
    )?;
    Ok(updated > 0)
}

// --- sources / definitions / schedule ---

pub fn insert_source(conn: &Connection, source: &Source) -> Result<()> {
    let tasks = source.custom_mission_tasks.as_ref().map(json_to_db).transpose()?;
    conn.execute(
        "INSERT INTO sources (id, source_id, custom_mission_tasks) VALUES (?1, ?2, ?3)",
        params![source.id.to_string(), source.source_id, tasks],
    )?;
    Ok(())
}

pub fn fetch_source(conn: &Connection, id: SourceId) -> Result<Option<Source>> {
    Ok(conn
        .query_row(
            "SELECT id, source_id, custom_mission_tasks FROM sources WHERE id = ?1",
            params![id.to_string()],
            |row| {
                Ok(Source {
                    id: col(0, SourceId::parse(&row.get::<_, String>(0)?))?,
                    source_id: row.get(1)?,
                    custom_mission_tasks: row
                        .get::<_, Option<String>>(2)?
                        .map(|raw| json_col(2, &raw))
                        .transpose()?,
                })
            },
        )
        .optional()?)
}

pub fn insert_definition(conn: &Connection, definition: &MissionDefinition) -> Result<()> {
    if let Some(frequency) = &definition.auto_schedule_frequency {
        conn.execute(
            "INSERT INTO auto_schedule_frequencies (id) VALUES (?1)",
            params![frequency.id.to_string()],
        )?;
        for entry in &frequency.entries {
            conn.execute(
                "INSERT INTO time_and_days (id, auto_schedule_frequency_id, day_of_week, time_of_day)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    entry.id.to_string(),
                    frequency.id.to_string(),
                    weekday_to_db(entry.day_of_week),
                    entry.time_of_day.format("%H:%M:%S").to_string()
                ],
            )?;
        }
    }
    conn.execute(
        "INSERT INTO mission_definitions (id, source_id, name, installation_code,
           inspection_area_id, inspection_frequency_secs, auto_schedule_frequency_id,
           last_successful_run_id, last_auto_run_at, is_deprecated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            definition.id.to_string(),
            definition.source_id.to_string(),
            definition.name,
            definition.installation_code,
            definition.inspection_area_id.map(|id| id.to_string()),
            definition.inspection_frequency_secs,
            definition.auto_schedule_frequency.as_ref().map(|f| f.id.to_string()),
            definition.last_successful_run_id.map(|id| id.to_string()),
            datetime_to_db(definition.last_auto_run_at),
            definition.is_deprecated
        ],
    )?;
    Ok(())
}

fn fetch_frequency(
    conn: &Connection,
    id: AutoScheduleFrequencyId,
) -> Result<AutoScheduleFrequency> {
    let mut stmt = conn.prepare(
        "SELECT id, day_of_week, time_of_day FROM time_and_days
         WHERE auto_schedule_frequency_id = ?1 ORDER BY id",
    )?;
    let entries = stmt
        .query_map(params![id.to_string()], |row| {
            let day_raw: i64 = row.get(1)?;
            let time_raw: String = row.get(2)?;
            Ok(TimeAndDay {
                id: col(0, TimeAndDayId::parse(&row.get::<_, String>(0)?))?,
                day_of_week: weekday_from_db(day_raw)
                    .ok_or_else(|| corrupt(1, format!("unknown weekday index {day_raw}")))?,
                time_of_day: col(2, chrono::NaiveTime::parse_from_str(&time_raw, "%H:%M:%S"))?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(AutoScheduleFrequency { id, entries })
}

fn map_definition_row(conn: &Connection, row: &Row<'_>) -> rusqlite::Result<MissionDefinition> {
    let frequency_id = row
        .get::<_, Option<String>>(6)?
        .map(|raw| col(6, AutoScheduleFrequencyId::parse(&raw)))
        .transpose()?;
    let auto_schedule_frequency = frequency_id
        .map(|id| {
            fetch_frequency(conn, id).map_err(|err| match err {
                crate::EngineError::Storage(err) => err,
                other => corrupt(6, other.to_string()),
            })
        })
        .transpose()?;
    Ok(MissionDefinition {
        id: col(0, MissionDefinitionId::parse(&row.get::<_, String>(0)?))?,
        source_id: col(1, SourceId::parse(&row.get::<_, String>(1)?))?,
        name: row.get(2)?,
        installation_code: row.get(3)?,
        inspection_area_id: row
            .get::<_, Option<String>>(4)?
            .map(|raw| col(4, InspectionAreaId::parse(&raw)))
            .transpose()?,
        inspection_frequency_secs: row.get(5)?,
        auto_schedule_frequency,
        last_successful_run_id: row
            .get::<_, Option<String>>(7)?
            .map(|raw| col(7, MissionRunId::parse(&raw)))
            .transpose()?,
        last_auto_run_at: datetime_col(8, &row.get::<_, String>(8)?)?,
        is_deprecated: row.get(9)?,
    })
}

const DEFINITION_COLS: &str = "id, source_id, name, installation_code, inspection_area_id, \
     inspection_frequency_secs, auto_schedule_frequency_id, last_successful_run_id, \
     last_auto_run_at, is_deprecated";

pub fn fetch_definition(
    conn: &Connection,
    id: MissionDefinitionId,
) -> Result<Option<MissionDefinition>> {
    Ok(conn
        .query_row(
            &format!("SELECT {DEFINITION_COLS} FROM mission_definitions WHERE id = ?1"),
            params![id.to_string()],
            |row| map_definition_row(conn, row),
        )
        .optional()?)
}

pub fn list_definitions(conn: &Connection) -> Result<Vec<MissionDefinition>> {
    let mut stmt =
        conn.prepare(&format!("SELECT {DEFINITION_COLS} FROM mission_definitions ORDER BY name"))?;
    let rows = stmt.query_map([], |row| map_definition_row(conn, row))?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// Definitions the auto-scheduler considers: not deprecated and carrying a
/// frequency.
pub fn list_schedulable_definitions(conn: &Connection) -> Result<Vec<MissionDefinition>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DEFINITION_COLS} FROM mission_definitions
         WHERE is_deprecated = 0 AND auto_schedule_frequency_id IS NOT NULL
         ORDER BY id"
    ))?;
    let rows = stmt.query_map([], |row| map_definition_row(conn, row))?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// Compare-and-set advance of the scheduling watermark. Claim, then create:
/// a false return means a concurrent tick already fired this definition.
pub fn claim_watermark(
    conn: &Connection,
    definition_id: MissionDefinitionId,
    expected: DateTime<Utc>,
    fire_at: DateTime<Utc>,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE mission_definitions SET last_auto_run_at = ?3
         WHERE id = ?1 AND last_auto_run_at = ?2",
        params![definition_id.to_string(), datetime_to_db(expected), datetime_to_db(fire_at)],
    )?;
    Ok(updated > 0)
}

pub fn set_last_successful_run(
    conn: &Connection,
    definition_id: MissionDefinitionId,
    run_id: MissionRunId,
) -> Result<()> {
    conn.execute(
        "UPDATE mission_definitions SET last_successful_run_id = ?2 WHERE id = ?1",
        params![definition_id.to_string(), run_id.to_string()],
    )?;
    Ok(())
}

// --- mission runs / tasks ---

pub fn insert_run(conn: &Connection, run: &MissionRun, tasks: &[MissionTask]) -> Result<()> {
    let map_metadata = run.map_metadata.as_ref().map(json_to_db).transpose()?;
    conn.execute(
        "INSERT INTO mission_runs (id, mission_id, robot_id, inspection_area_id, name, status,
           installation_code, desired_start_time, start_time, end_time, run_type,
           isar_mission_id, status_reason, estimated_duration_secs, map_metadata, is_deprecated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            run.id.to_string(),
            run.mission_id.map(|id| id.to_string()),
            run.robot_id.to_string(),
            run.inspection_area_id.map(|id| id.to_string()),
            run.name,
            run.status.as_str(),
            run.installation_code,
            datetime_to_db(run.desired_start_time),
            run.start_time.map(datetime_to_db),
            run.end_time.map(datetime_to_db),
            run.run_type.as_str(),
            run.isar_mission_id,
            run.status_reason,
            run.estimated_duration_secs,
            map_metadata,
            run.is_deprecated
        ],
    )?;
    for task in tasks {
        insert_task(conn, task)?;
    }
    Ok(())
}

pub fn insert_task(conn: &Connection, task: &MissionTask) -> Result<()> {
    conn.execute(
        "INSERT INTO mission_tasks (id, mission_run_id, task_order, task_type, tag_id,
           robot_pose, isar_task_id, inspection_id, status, start_time, end_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            task.id.to_string(),
            task.mission_run_id.map(|id| id.to_string()),
            task.task_order,
            task.task_type,
            task.tag_id,
            json_to_db(&task.robot_pose)?,
            task.isar_task_id,
            task.inspection_id.map(|id| id.to_string()),
            task.status.as_str(),
            task.start_time.map(datetime_to_db),
            task.end_time.map(datetime_to_db)
        ],
    )?;
    Ok(())
}

pub fn map_run_row(row: &Row<'_>) -> rusqlite::Result<MissionRun> {
    let status_raw: String = row.get(5)?;
    let type_raw: String = row.get(10)?;
    Ok(MissionRun {
        id: col(0, MissionRunId::parse(&row.get::<_, String>(0)?))?,
        mission_id: row
            .get::<_, Option<String>>(1)?
            .map(|raw| col(1, MissionDefinitionId::parse(&raw)))
            .transpose()?,
        robot_id: col(2, RobotId::parse(&row.get::<_, String>(2)?))?,
        inspection_area_id: row
            .get::<_, Option<String>>(3)?
            .map(|raw| col(3, InspectionAreaId::parse(&raw)))
            .transpose()?,
        name: row.get(4)?,
        status: MissionStatus::parse(&status_raw)
            .ok_or_else(|| corrupt(5, format!("unknown mission status '{status_raw}'")))?,
        installation_code: row.get(6)?,
        desired_start_time: datetime_col(7, &row.get::<_, String>(7)?)?,
        start_time: opt_datetime_col(8, row.get(8)?)?,
        end_time: opt_datetime_col(9, row.get(9)?)?,
        run_type: MissionRunType::parse(&type_raw)
            .ok_or_else(|| corrupt(10, format!("unknown run type '{type_raw}'")))?,
        isar_mission_id: row.get(11)?,
        status_reason: row.get(12)?,
        estimated_duration_secs: row.get(13)?,
        map_metadata: row
            .get::<_, Option<String>>(14)?
            .map(|raw| json_col(14, &raw))
            .transpose()?,
        is_deprecated: row.get(15)?,
    })
}

pub fn fetch_run(conn: &Connection, id: MissionRunId) -> Result<Option<MissionRun>> {
    Ok(conn
        .query_row(
            &format!("SELECT {RUN_COLS} FROM mission_runs WHERE id = ?1"),
            params![id.to_string()],
            map_run_row,
        )
        .optional()?)
}

pub fn list_runs(conn: &Connection) -> Result<Vec<MissionRun>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RUN_COLS} FROM mission_runs ORDER BY desired_start_time DESC, id"
    ))?;
    let rows = stmt.query_map([], map_run_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// Pending runs in dispatch order: earliest desired start first, id as the
/// deterministic tie-break.
pub fn list_pending_runs(conn: &Connection) -> Result<Vec<MissionRun>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RUN_COLS} FROM mission_runs WHERE status = 'pending'
         ORDER BY desired_start_time, id"
    ))?;
    let rows = stmt.query_map([], map_run_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// Whether the robot already owns a run the dispatcher must not stack on
/// top of.
pub fn robot_has_active_run(conn: &Connection, robot_id: RobotId) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM mission_runs
         WHERE robot_id = ?1 AND status IN ('queued', 'ongoing', 'paused')",
        params![robot_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Status-guarded promotion used by the dispatcher; false when the run was
/// no longer in the expected status (idempotent re-dispatch, lost race).
pub fn promote_run_status(
    conn: &Connection,
    run_id: MissionRunId,
    expected: MissionStatus,
    to: MissionStatus,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE mission_runs SET status = ?3 WHERE id = ?1 AND status = ?2",
        params![run_id.to_string(), expected.as_str(), to.as_str()],
    )?;
    Ok(updated > 0)
}

pub fn update_run(conn: &Connection, run: &MissionRun) -> Result<()> {
    conn.execute(
        "UPDATE mission_runs SET status = ?2, start_time = ?3, end_time = ?4,
           isar_mission_id = ?5, status_reason = ?6, estimated_duration_secs = ?7
         WHERE id = ?1",
        params![
            run.id.to_string(),
            run.status.as_str(),
            run.start_time.map(datetime_to_db),
            run.end_time.map(datetime_to_db),
            run.isar_mission_id,
            run.status_reason,
            run.estimated_duration_secs
        ],
    )?;
    Ok(())
}

pub fn map_task_row(row: &Row<'_>) -> rusqlite::Result<MissionTask> {
    let status_raw: String = row.get(8)?;
    Ok(MissionTask {
        id: col(0, MissionTaskId::parse(&row.get::<_, String>(0)?))?,
        mission_run_id: row
            .get::<_, Option<String>>(1)?
            .map(|raw| col(1, MissionRunId::parse(&raw)))
            .transpose()?,
        task_order: row.get(2)?,
        task_type: row.get(3)?,
        tag_id: row.get(4)?,
        robot_pose: json_col(5, &row.get::<_, String>(5)?)?,
        isar_task_id: row.get(6)?,
        inspection_id: row
            .get::<_, Option<String>>(7)?
            .map(|raw| col(7, InspectionId::parse(&raw)))
            .transpose()?,
        status: TaskStatus::parse(&status_raw)
            .ok_or_else(|| corrupt(8, format!("unknown task status '{status_raw}'")))?,
        start_time: opt_datetime_col(9, row.get(9)?)?,
        end_time: opt_datetime_col(10, row.get(10)?)?,
    })
}

/// Tasks of a run in execution order.
pub fn list_tasks_for_run(conn: &Connection, run_id: MissionRunId) -> Result<Vec<MissionTask>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TASK_COLS} FROM mission_tasks WHERE mission_run_id = ?1 ORDER BY task_order"
    ))?;
    let rows = stmt.query_map(params![run_id.to_string()], map_task_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

pub fn fetch_task_by_isar_id(conn: &Connection, isar_task_id: &str) -> Result<Option<MissionTask>> {
    Ok(conn
        .query_row(
            &format!("SELECT {TASK_COLS} FROM mission_tasks WHERE isar_task_id = ?1"),
            params![isar_task_id],
            map_task_row,
        )
        .optional()?)
}

pub fn update_task(conn: &Connection, task: &MissionTask) -> Result<()> {
    conn.execute(
        "UPDATE mission_tasks SET isar_task_id = ?2, inspection_id = ?3, status = ?4,
           start_time = ?5, end_time = ?6
         WHERE id = ?1",
        params![
            task.id.to_string(),
            task.isar_task_id,
            task.inspection_id.map(|id| id.to_string()),
            task.status.as_str(),
            task.start_time.map(datetime_to_db),
            task.end_time.map(datetime_to_db)
        ],
    )?;
    Ok(())
}

// --- inspections / findings ---

pub fn insert_inspection(conn: &Connection, inspection: &Inspection) -> Result<()> {
    conn.execute(
        "INSERT INTO inspections (id, isar_task_id, isar_inspection_id, inspection_target,
           status, inspection_type, analysis_type, inspection_url, start_time, end_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            inspection.id.to_string(),
            inspection.isar_task_id,
            inspection.isar_inspection_id,
            json_to_db(&inspection.inspection_target)?,
            inspection.status.as_str(),
            inspection.inspection_type.as_str(),
            inspection.analysis_type,
            inspection.inspection_url,
            inspection.start_time.map(datetime_to_db),
            inspection.end_time.map(datetime_to_db)
        ],
    )?;
    Ok(())
}

fn map_inspection_row(row: &Row<'_>) -> rusqlite::Result<Inspection> {
    let status_raw: String = row.get(4)?;
    let type_raw: String = row.get(5)?;
    Ok(Inspection {
        id: col(0, InspectionId::parse(&row.get::<_, String>(0)?))?,
        isar_task_id: row.get(1)?,
        isar_inspection_id: row.get(2)?,
        inspection_target: json_col(3, &row.get::<_, String>(3)?)?,
        status: InspectionStatus::parse(&status_raw)
            .ok_or_else(|| corrupt(4, format!("unknown inspection status '{status_raw}'")))?,
        inspection_type: InspectionType::parse(&type_raw)
            .ok_or_else(|| corrupt(5, format!("unknown inspection type '{type_raw}'")))?,
        analysis_type: row.get(6)?,
        inspection_url: row.get(7)?,
        start_time: opt_datetime_col(8, row.get(8)?)?,
        end_time: opt_datetime_col(9, row.get(9)?)?,
    })
}

pub fn fetch_inspection(conn: &Connection, id: InspectionId) -> Result<Option<Inspection>> {
    Ok(conn
        .query_row(
            "SELECT id, isar_task_id, isar_inspection_id, inspection_target, status,
                    inspection_type, analysis_type, inspection_url, start_time, end_time
             FROM inspections WHERE id = ?1",
            params![id.to_string()],
            map_inspection_row,
        )
        .optional()?)
}

pub fn update_inspection_status(
    conn: &Connection,
    id: InspectionId,
    status: InspectionStatus,
    end_time: Option<DateTime<Utc>>,
) -> Result<()> {
    conn.execute(
        "UPDATE inspections SET status = ?2, end_time = COALESCE(?3, end_time) WHERE id = ?1",
        params![id.to_string(), status.as_str(), end_time.map(datetime_to_db)],
    )?;
    Ok(())
}

/// The inspection captured for an ISAR task, if any; findings link through
/// this.
pub fn fetch_inspection_by_isar_task_id(
    conn: &Connection,
    isar_task_id: &str,
) -> Result<Option<Inspection>> {
    Ok(conn
        .query_row(
            "SELECT id, isar_task_id, isar_inspection_id, inspection_target, status,
                    inspection_type, analysis_type, inspection_url, start_time, end_time
             FROM inspections WHERE isar_task_id = ?1",
            params![isar_task_id],
            map_inspection_row,
        )
        .optional()?)
}

pub fn insert_finding(conn: &Connection, finding: &InspectionFinding) -> Result<()> {
    conn.execute(
        "INSERT INTO inspection_findings (id, inspection_date, isar_task_id, finding, inspection_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            finding.id.to_string(),
            datetime_to_db(finding.inspection_date),
            finding.isar_task_id,
            finding.finding,
            finding.inspection_id.map(|id| id.to_string())
        ],
    )?;
    Ok(())
}

pub fn list_findings(conn: &Connection) -> Result<Vec<InspectionFinding>> {
    let mut stmt = conn.prepare(
        "SELECT id, inspection_date, isar_task_id, finding, inspection_id
         FROM inspection_findings ORDER BY inspection_date DESC, id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(InspectionFinding {
            id: col(0, InspectionFindingId::parse(&row.get::<_, String>(0)?))?,
            inspection_date: datetime_col(1, &row.get::<_, String>(1)?)?,
            isar_task_id: row.get(2)?,
            finding: row.get(3)?,
            inspection_id: row
                .get::<_, Option<String>>(4)?
                .map(|raw| col(4, InspectionId::parse(&raw)))
                .transpose()?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

// --- buffered task events ---

pub fn buffer_task_event(
    conn: &Connection,
    run_id: MissionRunId,
    task_order: i64,
    payload: &str,
    received_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO buffered_task_events (mission_run_id, task_order, payload, received_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(mission_run_id, task_order) DO UPDATE SET
           payload = excluded.payload,
           received_at = excluded.received_at",
        params![run_id.to_string(), task_order, payload, datetime_to_db(received_at)],
    )?;
    Ok(())
}

/// Remove and return the buffered event for one task slot, if any.
pub fn take_buffered_event(
    conn: &Connection,
    run_id: MissionRunId,
    task_order: i64,
) -> Result<Option<(String, DateTime<Utc>)>> {
    let found = conn
        .query_row(
            "SELECT payload, received_at FROM buffered_task_events
             WHERE mission_run_id = ?1 AND task_order = ?2",
            params![run_id.to_string(), task_order],
            |row| {
                let payload: String = row.get(0)?;
                let received_at = datetime_col(1, &row.get::<_, String>(1)?)?;
                Ok((payload, received_at))
            },
        )
        .optional()?;
    if found.is_some() {
        conn.execute(
            "DELETE FROM buffered_task_events WHERE mission_run_id = ?1 AND task_order = ?2",
            params![run_id.to_string(), task_order],
        )?;
    }
    Ok(found)
}

pub fn clear_buffered_events(conn: &Connection, run_id: MissionRunId) -> Result<()> {
    conn.execute(
        "DELETE FROM buffered_task_events WHERE mission_run_id = ?1",
        params![run_id.to_string()],
    )?;
    Ok(())
}

// --- reference counting for restrict-deletes ---

pub fn count_references_to_area(conn: &Connection, id: InspectionAreaId) -> Result<i64> {
    let id = id.to_string();
    let robots: i64 = conn.query_row(
        "SELECT COUNT(*) FROM robots WHERE current_inspection_area_id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    let runs: i64 = conn.query_row(
        "SELECT COUNT(*) FROM mission_runs WHERE inspection_area_id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    let definitions: i64 = conn.query_row(
        "SELECT COUNT(*) FROM mission_definitions WHERE inspection_area_id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(robots + runs + definitions)
}

pub fn count_references_to_installation(conn: &Connection, id: InstallationId) -> Result<i64> {
    let id = id.to_string();
    let plants: i64 = conn.query_row(
        "SELECT COUNT(*) FROM plants WHERE installation_id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    let robots: i64 = conn.query_row(
        "SELECT COUNT(*) FROM robots WHERE current_installation_id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(plants + robots)
}

pub fn count_references_to_plant(conn: &Connection, id: PlantId) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM inspection_areas WHERE plant_id = ?1",
        params![id.to_string()],
        |row| row.get(0),
    )?)
}

pub fn delete_area_row(conn: &Connection, id: InspectionAreaId) -> Result<()> {
    conn.execute("DELETE FROM inspection_areas WHERE id = ?1", params![id.to_string()])?;
    Ok(())
}

pub fn delete_installation_row(conn: &Connection, id: InstallationId) -> Result<()> {
    conn.execute("DELETE FROM installations WHERE id = ?1", params![id.to_string()])?;
    Ok(())
}

pub fn delete_plant_row(conn: &Connection, id: PlantId) -> Result<()> {
    conn.execute("DELETE FROM plants WHERE id = ?1", params![id.to_string()])?;
    Ok(())
}
