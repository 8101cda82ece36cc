use axum::{
    extract::{rejection::JsonRejection, Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::adjust::{build_day_summary, AdjustPolicy, DayRequest, Level, ProgressResult};
use crate::auth::{self, AuthUser};
use crate::db::{self, Db, NewPlan, ProgressUpdate};
use crate::error::{ApiError, Result};
use crate::models::{Note, PlanSummary, ProgressEntry, PublicUser, StudyPlan, StudySession, UserStats};
use crate::syllabus::{self, DayPlan, SubjectInfo};

#[derive(Clone)]
pub struct ApiState {
    pub db: Db,
    /// How smart-adjust treats unfinished topics on days that are already ahead.
    pub adjust_policy: AdjustPolicy,
    pub token_ttl_hours: i64,
}

pub fn app_router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/api/subjects", get(list_subjects))
        .route("/api/register", post(register))
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/generate-plan", post(generate_plan))
        .route("/api/smart-adjust", post(smart_adjust))
        .route("/api/plans", get(list_plans).post(create_plan))
        .route("/api/plans/:id", get(get_plan).delete(delete_plan))
        .route("/api/plans/:id/progress", get(list_progress).post(record_progress))
        .route("/api/plans/:id/days/:day/adjust", post(adjust_day))
        .route("/api/plans/:id/notes", get(list_notes).post(create_note))
        .route("/api/plans/:id/notes/:note_id", delete(delete_note))
        .route("/api/plans/:id/sessions", get(list_sessions).post(create_session))
        .route("/api/stats", get(stats))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn home() -> &'static str {
    "Study Planner backend running"
}

async fn list_subjects() -> Json<Vec<SubjectInfo>> {
    Json(syllabus::subjects())
}

// --- Auth ---

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    user: PublicUser,
}

async fn register(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(req) = payload?;
    let username = req.username.trim();
    let email = req.email.trim();

    auth::validate_registration(username, email, &req.password)?;

    if state.db.user_exists(username, email).await? {
        return Err(ApiError::Conflict("Username or email already exists".into()));
    }

    let hash = auth::hash_password(&req.password)?;
    let user = match state.db.create_user(username, email, &hash).await {
        Ok(user) => user,
        Err(e) if db::is_unique_violation(&e) => {
            return Err(ApiError::Conflict("Username or email already exists".into()));
        }
        Err(e) => return Err(e.into()),
    };
    log::info!("registered user {} (id {})", user.username, user.id);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "User registered successfully",
            "user": PublicUser::from(&user),
        })),
    ))
}

async fn login(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>> {
    let Json(req) = payload?;

    let user = state
        .db
        .find_user_by_username(req.username.trim())
        .await?
        .filter(|user| auth::verify_password(&req.password, &user.password_hash))
        .ok_or_else(|| ApiError::Unauthorized("Invalid username or password".into()))?;

    let token = auth::issue_token(&state.db, user.id, state.token_ttl_hours).await?;
    log::info!("user {} logged in", user.username);

    Ok(Json(LoginResponse {
        token,
        user: PublicUser::from(&user),
    }))
}

async fn logout(State(state): State<ApiState>, auth: AuthUser) -> Result<StatusCode> {
    state.db.delete_token(&auth.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Planning ---

fn default_days() -> u32 {
    1
}

fn default_hours() -> f64 {
    2.0
}

#[derive(Deserialize)]
struct GeneratePlanRequest {
    subject: String,
    level: String,
    #[serde(default = "default_days")]
    days: u32,
    #[serde(default = "default_hours")]
    hours: f64,
}

impl GeneratePlanRequest {
    fn build(&self) -> Result<(Level, Vec<DayPlan>)> {
        let level: Level = self.level.parse()?;
        let plan = syllabus::generate_plan(&self.subject, level, self.days, self.hours)?;
        Ok((level, plan))
    }
}

#[derive(Serialize)]
struct GeneratePlanResponse {
    plan: Vec<DayPlan>,
    recommended_hours: f64,
}

async fn generate_plan(
    payload: std::result::Result<Json<GeneratePlanRequest>, JsonRejection>,
) -> Result<Json<GeneratePlanResponse>> {
    let Json(req) = payload?;
    let (level, plan) = req.build()?;

    Ok(Json(GeneratePlanResponse {
        plan,
        recommended_hours: syllabus::recommended_daily_hours(level, req.hours),
    }))
}

async fn smart_adjust(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<ProgressResult>> {
    let Json(body) = payload?;
    let day = DayRequest::from_json(&body)?;

    Ok(Json(build_day_summary(day.level, &day.subtopics, state.adjust_policy)))
}

// --- Stored plans ---

async fn owned_plan(state: &ApiState, auth: &AuthUser, plan_id: i64) -> Result<StudyPlan> {
    state
        .db
        .get_plan(auth.user.id, plan_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Plan not found".into()))
}

async fn list_plans(State(state): State<ApiState>, auth: AuthUser) -> Result<Json<Vec<PlanSummary>>> {
    let plans = state.db.list_plans(auth.user.id).await?;
    Ok(Json(plans.iter().map(StudyPlan::summary).collect()))
}

async fn create_plan(
    State(state): State<ApiState>,
    auth: AuthUser,
    payload: std::result::Result<Json<GeneratePlanRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StudyPlan>)> {
    let Json(req) = payload?;
    let (level, days) = req.build()?;

    let plan = state
        .db
        .create_plan(NewPlan {
            user_id: auth.user.id,
            subject: &req.subject,
            level,
            days: req.days,
            hours_per_day: req.hours,
            plan: &days,
        })
        .await?;
    log::info!("user {} created plan {} ({} {}, {} days)", auth.user.id, plan.id, plan.subject, level, plan.days);

    Ok((StatusCode::CREATED, Json(plan)))
}

async fn get_plan(State(state): State<ApiState>, auth: AuthUser, Path(id): Path<i64>) -> Result<Json<StudyPlan>> {
    Ok(Json(owned_plan(&state, &auth, id).await?))
}

async fn delete_plan(State(state): State<ApiState>, auth: AuthUser, Path(id): Path<i64>) -> Result<StatusCode> {
    if state.db.delete_plan(auth.user.id, id).await? {
        log::info!("user {} deleted plan {}", auth.user.id, id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Plan not found".into()))
    }
}

#[derive(Deserialize)]
struct ProgressRequest {
    day: u32,
    topic: String,
    completed: bool,
    #[serde(default)]
    time_spent: i64,
}

async fn record_progress(
    State(state): State<ApiState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    payload: std::result::Result<Json<ProgressRequest>, JsonRejection>,
) -> Result<Json<DayPlan>> {
    let Json(req) = payload?;
    if req.time_spent < 0 {
        return Err(ApiError::InvalidInput("time_spent must not be negative".into()));
    }

    let update = ProgressUpdate {
        day: req.day,
        topic: &req.topic,
        completed: req.completed,
        time_spent: req.time_spent,
    };
    let day = state
        .db
        .record_progress(auth.user.id, id, update)
        .await?
        .ok_or_else(|| ApiError::NotFound("Plan, day or topic not found".into()))?;

    Ok(Json(day))
}

async fn list_progress(State(state): State<ApiState>, auth: AuthUser, Path(id): Path<i64>) -> Result<Json<Vec<ProgressEntry>>> {
    let plan = owned_plan(&state, &auth, id).await?;
    Ok(Json(state.db.list_progress(plan.id).await?))
}

/// Smart-adjusts one stored day with the configured policy and saves the result.
async fn adjust_day(
    State(state): State<ApiState>,
    auth: AuthUser,
    Path((id, day)): Path<(i64, u32)>,
) -> Result<Json<ProgressResult>> {
    let summary = state
        .db
        .adjust_plan_day(auth.user.id, id, day, state.adjust_policy)
        .await?
        .ok_or_else(|| ApiError::NotFound("Plan or day not found".into()))?;
    log::debug!("adjusted plan {} day {}: {}% {}", id, day, summary.progress_percent, summary.status.label());

    Ok(Json(summary))
}

// --- Notes & sessions ---

#[derive(Deserialize)]
struct NoteRequest {
    topic: String,
    content: String,
}

async fn list_notes(State(state): State<ApiState>, auth: AuthUser, Path(id): Path<i64>) -> Result<Json<Vec<Note>>> {
    let plan = owned_plan(&state, &auth, id).await?;
    Ok(Json(state.db.list_notes(plan.id).await?))
}

async fn create_note(
    State(state): State<ApiState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    payload: std::result::Result<Json<NoteRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Note>)> {
    let Json(req) = payload?;
    if req.topic.trim().is_empty() || req.content.trim().is_empty() {
        return Err(ApiError::InvalidInput("topic and content are required".into()));
    }

    let plan = owned_plan(&state, &auth, id).await?;
    let note = state.db.add_note(plan.id, req.topic.trim(), &req.content).await?;
    Ok((StatusCode::CREATED, Json(note)))
}

async fn delete_note(
    State(state): State<ApiState>,
    auth: AuthUser,
    Path((id, note_id)): Path<(i64, i64)>,
) -> Result<StatusCode> {
    let plan = owned_plan(&state, &auth, id).await?;
    if state.db.delete_note(plan.id, note_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Note not found".into()))
    }
}

#[derive(Deserialize)]
struct SessionRequest {
    topic: String,
    duration: i64,
}

async fn list_sessions(State(state): State<ApiState>, auth: AuthUser, Path(id): Path<i64>) -> Result<Json<Vec<StudySession>>> {
    let plan = owned_plan(&state, &auth, id).await?;
    Ok(Json(state.db.list_sessions(plan.id).await?))
}

async fn create_session(
    State(state): State<ApiState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    payload: std::result::Result<Json<SessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StudySession>)> {
    let Json(req) = payload?;
    if req.topic.trim().is_empty() {
        return Err(ApiError::InvalidInput("topic is required".into()));
    }
    if req.duration <= 0 {
        return Err(ApiError::InvalidInput("duration must be a positive number of seconds".into()));
    }

    let plan = owned_plan(&state, &auth, id).await?;
    let session = state.db.add_session(plan.id, req.topic.trim(), req.duration).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn stats(State(state): State<ApiState>, auth: AuthUser) -> Result<Json<UserStats>> {
    Ok(Json(state.db.user_stats(auth.user.id).await?))
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
