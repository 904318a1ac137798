//! HTTP surface for operators and the robot interface.
//!
//! Thin layer: handlers validate shape, take the connection lock and call
//! into the registry / scheduler / dispatcher / event modules. Domain errors
//! map onto status codes here and nowhere else.

use armada_core::{
    AutoScheduleFrequency, Boundary, Error, FleetStatus, InspectionArea, InspectionAreaId,
    InspectionFinding, Installation, InstallationId, MapMetadata, MissionDefinition, MissionRun,
    MissionRunId, MissionRunType, MissionStatus, Plant, PlantId, Robot, RobotId, RobotModel,
    Source, TaskBlueprint, TimeAndDay,
};
use armada_protocol::Envelope;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::{DateTime, NaiveTime, Utc, Weekday};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{EngineError, events, registry, scheduler, sites, store};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/installations", post(create_installation).get(list_installations))
        .route("/v1/installations/{id}", delete(delete_installation))
        .route("/v1/plants", post(create_plant).get(list_plants))
        .route("/v1/plants/{id}", delete(delete_plant))
        .route("/v1/inspection-areas", post(create_area).get(list_areas))
        .route("/v1/inspection-areas/{id}", delete(delete_area))
        .route("/v1/robot-models", post(create_robot_model).get(list_robot_models))
        .route("/v1/robots", get(list_robots))
        .route("/v1/robots/register", post(register_robot))
        .route("/v1/robots/{id}/fleet-status", post(set_fleet_status))
        .route("/v1/robots/{id}/freeze", post(freeze_queue))
        .route("/v1/robots/{id}/deprecate", post(deprecate_robot))
        .route("/v1/mission-definitions", post(create_definition).get(list_definitions))
        .route("/v1/mission-runs", post(create_run).get(list_runs))
        .route("/v1/mission-runs/{id}/pause", post(pause_run))
        .route("/v1/mission-runs/{id}/resume", post(resume_run))
        .route("/v1/mission-runs/{id}/abort", post(abort_run))
        .route("/v1/mission-runs/{id}/cancel", post(cancel_run))
        .route("/v1/events", post(ingest_event))
        .route("/v1/inspection-findings", post(create_finding).get(list_findings))
        .route("/v1/status", get(get_status))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    ok: bool,
    error: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }
}

impl From<EngineError> for ApiError {
    fn from(value: EngineError) -> Self {
        let status = match &value {
            EngineError::Domain(Error::ReferenceNotFound(_)) => StatusCode::NOT_FOUND,
            EngineError::Domain(Error::ScheduleMisconfigured(_)) => StatusCode::BAD_REQUEST,
            EngineError::Domain(
                Error::InvalidTransition { .. }
                | Error::DispatchConflict(_)
                | Error::RobotUnavailable(_)
                | Error::ReferenceInUse(_),
            ) => StatusCode::CONFLICT,
            EngineError::Storage(_) | EngineError::Io(_) | EngineError::Codec(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self { status, message: value.to_string() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiErrorBody { ok: false, error: self.message })).into_response()
    }
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

// --- spatial hierarchy ---

#[derive(Debug, Deserialize)]
struct CreateInstallationRequest {
    name: String,
    installation_code: String,
}

async fn create_installation(
    State(state): State<AppState>,
    Json(request): Json<CreateInstallationRequest>,
) -> Result<Json<Installation>, ApiError> {
    if request.name.trim().is_empty() || request.installation_code.trim().is_empty() {
        return Err(ApiError::bad_request("name and installation_code are required"));
    }
    let db = state.db.lock().await;
    let installation = sites::create_installation(&db, &request.name, &request.installation_code)?;
    Ok(Json(installation))
}

async fn list_installations(
    State(state): State<AppState>,
) -> Result<Json<Vec<Installation>>, ApiError> {
    let db = state.db.lock().await;
    Ok(Json(store::list_installations(&db)?))
}

async fn delete_installation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let db = state.db.lock().await;
    sites::delete_installation(&db, InstallationId(id))?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct CreatePlantRequest {
    installation_id: InstallationId,
    plant_code: String,
    name: String,
}

async fn create_plant(
    State(state): State<AppState>,
    Json(request): Json<CreatePlantRequest>,
) -> Result<Json<Plant>, ApiError> {
    let db = state.db.lock().await;
    let plant =
        sites::create_plant(&db, request.installation_id, &request.plant_code, &request.name)?;
    Ok(Json(plant))
}

async fn list_plants(
    State(state): State<AppState>,
) -> Result<Json<Vec<Plant>>, ApiError> {
    let db = state.db.lock().await;
    Ok(Json(store::list_plants(&db)?))
}

async fn delete_plant(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let db = state.db.lock().await;
    sites::delete_plant(&db, PlantId(id))?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct CreateAreaRequest {
    installation_id: InstallationId,
    plant_id: PlantId,
    name: String,
    boundary: Option<Boundary>,
    map_metadata: Option<MapMetadata>,
}

async fn create_area(
    State(state): State<AppState>,
    Json(request): Json<CreateAreaRequest>,
) -> Result<Json<InspectionArea>, ApiError> {
    let db = state.db.lock().await;
    let area = sites::create_area(
        &db,
        request.installation_id,
        request.plant_id,
        &request.name,
        request.boundary,
        request.map_metadata,
    )?;
    Ok(Json(area))
}

async fn list_areas(
    State(state): State<AppState>,
) -> Result<Json<Vec<InspectionArea>>, ApiError> {
    let db = state.db.lock().await;
    Ok(Json(store::list_areas(&db)?))
}

async fn delete_area(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let db = state.db.lock().await;
    sites::delete_area(&db, InspectionAreaId(id))?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

// --- robots ---

#[derive(Debug, Deserialize)]
struct CreateRobotModelRequest {
    model_type: String,
    battery_warning_threshold: Option<f64>,
    lower_pressure_warning_threshold: Option<f64>,
    upper_pressure_warning_threshold: Option<f64>,
    average_duration_per_tag: Option<f64>,
}

async fn create_robot_model(
    State(state): State<AppState>,
    Json(request): Json<CreateRobotModelRequest>,
) -> Result<Json<RobotModel>, ApiError> {
    if request.model_type.trim().is_empty() {
        return Err(ApiError::bad_request("model_type is required"));
    }
    let mut model = RobotModel::new(&request.model_type);
    model.battery_warning_threshold = request.battery_warning_threshold;
    model.lower_pressure_warning_threshold = request.lower_pressure_warning_threshold;
    model.upper_pressure_warning_threshold = request.upper_pressure_warning_threshold;
    model.average_duration_per_tag = request.average_duration_per_tag;

    let db = state.db.lock().await;
    store::insert_robot_model(&db, &model)?;
    Ok(Json(model))
}

async fn list_robot_models(
    State(state): State<AppState>,
) -> Result<Json<Vec<RobotModel>>, ApiError> {
    let db = state.db.lock().await;
    Ok(Json(store::list_robot_models(&db)?))
}

async fn register_robot(
    State(state): State<AppState>,
    Json(request): Json<registry::RobotSpec>,
) -> Result<Json<Robot>, ApiError> {
    if request.name.trim().is_empty() || request.isar_id.trim().is_empty() {
        return Err(ApiError::bad_request("name and isar_id are required"));
    }
    let db = state.db.lock().await;
    Ok(Json(registry::register_robot(&db, &request)?))
}

async fn list_robots(State(state): State<AppState>) -> Result<Json<Vec<Robot>>, ApiError> {
    let db = state.db.lock().await;
    Ok(Json(store::list_robots(&db)?))
}

#[derive(Debug, Deserialize)]
struct FleetStatusRequest {
    fleet_status: FleetStatus,
}

async fn set_fleet_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<FleetStatusRequest>,
) -> Result<Json<Robot>, ApiError> {
    let db = state.db.lock().await;
    Ok(Json(registry::set_fleet_status(&db, RobotId(id), request.fleet_status)?))
}

#[derive(Debug, Deserialize)]
struct FreezeRequest {
    frozen: bool,
}

async fn freeze_queue(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<FreezeRequest>,
) -> Result<Json<Robot>, ApiError> {
    let db = state.db.lock().await;
    Ok(Json(registry::freeze_queue(&db, RobotId(id), request.frozen)?))
}

async fn deprecate_robot(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Robot>, ApiError> {
    let db = state.db.lock().await;
    Ok(Json(registry::deprecate(&db, RobotId(id))?))
}

// --- mission definitions ---

#[derive(Debug, Deserialize)]
struct ScheduleEntry {
    day_of_week: Weekday,
    time_of_day: NaiveTime,
}

#[derive(Debug, Deserialize)]
struct CreateDefinitionRequest {
    source_id: String,
    tasks: Vec<TaskBlueprint>,
    name: String,
    installation_code: String,
    inspection_area_id: Option<InspectionAreaId>,
    schedule: Option<Vec<ScheduleEntry>>,
}

async fn create_definition(
    State(state): State<AppState>,
    Json(request): Json<CreateDefinitionRequest>,
) -> Result<Json<MissionDefinition>, ApiError> {
    if request.name.trim().is_empty() || request.tasks.is_empty() {
        return Err(ApiError::bad_request("name and a non-empty task list are required"));
    }
    let schedule = request.schedule.map(|entries| {
        AutoScheduleFrequency::new(
            entries
                .into_iter()
                .map(|entry| TimeAndDay::new(entry.day_of_week, entry.time_of_day))
                .collect(),
        )
    });

    let db = state.db.lock().await;
    let source = Source::new(&request.source_id, Some(request.tasks));
    store::insert_source(&db, &source)?;
    let definition = scheduler::create_definition(
        &db,
        source.id,
        &request.name,
        &request.installation_code,
        request.inspection_area_id,
        schedule,
        Utc::now(),
    )?;
    Ok(Json(definition))
}

async fn list_definitions(
    State(state): State<AppState>,
) -> Result<Json<Vec<MissionDefinition>>, ApiError> {
    let db = state.db.lock().await;
    Ok(Json(store::list_definitions(&db)?))
}

// --- mission runs ---

#[derive(Debug, Deserialize)]
struct CreateRunRequest {
    robot_id: RobotId,
    name: String,
    tasks: Vec<TaskBlueprint>,
    desired_start_time: Option<DateTime<Utc>>,
    run_type: Option<MissionRunType>,
}

async fn create_run(
    State(state): State<AppState>,
    Json(request): Json<CreateRunRequest>,
) -> Result<Json<MissionRun>, ApiError> {
    if request.name.trim().is_empty() || request.tasks.is_empty() {
        return Err(ApiError::bad_request("name and a non-empty task list are required"));
    }
    let db = state.db.lock().await;
    let run_id = scheduler::create_ad_hoc_run(
        &db,
        request.robot_id,
        &request.name,
        &request.tasks,
        request.desired_start_time.unwrap_or_else(Utc::now),
        request.run_type.unwrap_or(MissionRunType::Normal),
    )?;
    let run = store::fetch_run(&db, run_id)?
        .ok_or_else(|| EngineError::Domain(Error::ReferenceNotFound(format!("mission run {run_id}"))))?;
    Ok(Json(run))
}

async fn list_runs(State(state): State<AppState>) -> Result<Json<Vec<MissionRun>>, ApiError> {
    let db = state.db.lock().await;
    Ok(Json(store::list_runs(&db)?))
}

async fn pause_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MissionRun>, ApiError> {
    let db = state.db.lock().await;
    Ok(Json(events::pause_run(&db, MissionRunId(id))?))
}

async fn resume_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MissionRun>, ApiError> {
    let db = state.db.lock().await;
    Ok(Json(events::resume_run(&db, MissionRunId(id))?))
}

#[derive(Debug, Default, Deserialize)]
struct StopRunRequest {
    reason: Option<String>,
}

async fn abort_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    request: Option<Json<StopRunRequest>>,
) -> Result<Json<MissionRun>, ApiError> {
    let reason = request.and_then(|Json(r)| r.reason);
    let db = state.db.lock().await;
    Ok(Json(events::abort_run(
        &db,
        MissionRunId(id),
        reason.as_deref(),
        Utc::now(),
    )?))
}

async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    request: Option<Json<StopRunRequest>>,
) -> Result<Json<MissionRun>, ApiError> {
    let reason = request.and_then(|Json(r)| r.reason);
    let db = state.db.lock().await;
    Ok(Json(events::cancel_run(
        &db,
        MissionRunId(id),
        reason.as_deref(),
        Utc::now(),
    )?))
}

// --- robot interface ingestion ---

async fn ingest_event(
    State(state): State<AppState>,
    Json(envelope): Json<Envelope>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let db = state.db.lock().await;
    events::apply_event(&db, &envelope)?;
    Ok(Json(serde_json::json!({ "ok": true, "message_id": envelope.message_id })))
}

// --- inspection findings ---

#[derive(Debug, Deserialize)]
struct CreateFindingRequest {
    isar_task_id: String,
    finding: String,
    inspection_date: Option<DateTime<Utc>>,
}

async fn create_finding(
    State(state): State<AppState>,
    Json(request): Json<CreateFindingRequest>,
) -> Result<Json<InspectionFinding>, ApiError> {
    if request.isar_task_id.trim().is_empty() || request.finding.trim().is_empty() {
        return Err(ApiError::bad_request("isar_task_id and finding are required"));
    }
    let db = state.db.lock().await;
    let finding = events::record_finding(
        &db,
        &request.isar_task_id,
        &request.finding,
        request.inspection_date.unwrap_or_else(Utc::now),
    )?;
    Ok(Json(finding))
}

async fn list_findings(
    State(state): State<AppState>,
) -> Result<Json<Vec<InspectionFinding>>, ApiError> {
    let db = state.db.lock().await;
    Ok(Json(store::list_findings(&db)?))
}

// --- fleet snapshot ---

#[derive(Debug, Serialize)]
struct StatusSummary {
    total_robots: usize,
    available_robots: usize,
    busy_robots: usize,
    offline_robots: usize,
    pending_runs: usize,
    active_runs: usize,
    successful_runs: usize,
    failed_runs: usize,
}

#[derive(Debug, Serialize)]
struct StatusSnapshot {
    generated_at: DateTime<Utc>,
    summary: StatusSummary,
    robots: Vec<Robot>,
    runs: Vec<MissionRun>,
}

async fn get_status(State(state): State<AppState>) -> Result<Json<StatusSnapshot>, ApiError> {
    let db = state.db.lock().await;
    let robots = store::list_robots(&db)?;
    let runs = store::list_runs(&db)?;

    let summary = StatusSummary {
        total_robots: robots.len(),
        available_robots: robots
            .iter()
            .filter(|r| r.fleet_status == FleetStatus::Available)
            .count(),
        busy_robots: robots.iter().filter(|r| r.fleet_status == FleetStatus::Busy).count(),
        offline_robots: robots.iter().filter(|r| r.fleet_status == FleetStatus::Offline).count(),
        pending_runs: runs.iter().filter(|r| r.status == MissionStatus::Pending).count(),
        active_runs: runs
            .iter()
            .filter(|r| {
                matches!(
                    r.status,
                    MissionStatus::Queued | MissionStatus::Ongoing | MissionStatus::Paused
                )
            })
            .count(),
        successful_runs: runs
            .iter()
            .filter(|r| r.status == MissionStatus::Successful)
            .count(),
        failed_runs: runs.iter().filter(|r| r.status == MissionStatus::Failed).count(),
    };

    Ok(Json(StatusSnapshot { generated_at: Utc::now(), summary, robots, runs }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_status_codes() {
        let not_found: ApiError =
            EngineError::Domain(Error::ReferenceNotFound("robot x".into())).into();
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);

        let conflict: ApiError =
            EngineError::Domain(Error::invalid_transition("ongoing", "cancelled")).into();
        assert_eq!(conflict.status, StatusCode::CONFLICT);

        let bad: ApiError =
            EngineError::Domain(Error::ScheduleMisconfigured("empty".into())).into();
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);

        let unavailable: ApiError =
            EngineError::Domain(Error::RobotUnavailable("none at KAA".into())).into();
        assert_eq!(unavailable.status, StatusCode::CONFLICT);
    }
}
