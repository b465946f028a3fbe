//! Endpoint handlers
//!
//! A thin adapter: parse the request, authenticate, run the RBAC gate,
//! call the engine, serialize the result. No behavior beyond translation
//! lives here; the engine is fully usable without this layer.
//!
//! Scoping rules enforced here:
//! - `_system` entities and dataset are reachable by admins only
//! - queries without a dataset scope need `rbac:perm:dataset:cross`,
//!   and still hide `_system` from non-admins

use crate::dto::{
    decode_content, format_timestamp, parse_timestamp, ChangesDto, CreateRequest, DiffDto,
    EntityDto, EventDto, HealthResponse, LoginRequest, LoginResponse, UpdateRequest, UserDto,
};
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use entitydb_auth::UserContext;
use entitydb_core::{
    CancelToken, Entity, EntityDbError, EntityId, TagValue, WildcardPattern, SYSTEM_DATASET,
};
use entitydb_engine::{GetOptions, ListFilter, MatchMode};
use serde::Deserialize;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Default per-request deadline
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/auth/logout", post(logout))
        .route("/api/v1/auth/whoami", get(whoami))
        .route("/api/v1/entities/create", post(create_entity))
        .route("/api/v1/entities/get", get(get_entity))
        .route("/api/v1/entities/update", put(update_entity))
        .route("/api/v1/entities/list", get(list_entities))
        .route("/api/v1/entities/query", get(query_entities))
        .route("/api/v1/entities/history", get(history))
        .route("/api/v1/entities/as-of", get(as_of))
        .route("/api/v1/entities/changes", get(changes))
        .route("/api/v1/entities/diff", get(diff))
        .route("/api/v1/tags/values", get(tag_values))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}

fn user_dto(ctx: &UserContext) -> UserDto {
    UserDto {
        id: ctx.user_id.to_string(),
        username: ctx.username.clone(),
        roles: ctx.roles.clone(),
    }
}

fn parse_tags(values: &[String]) -> Result<Vec<TagValue>, ApiError> {
    values
        .iter()
        .map(|v| TagValue::parse(v).map_err(ApiError))
        .collect()
}

// Comma-separated `tag=` parameter
fn split_tags(param: &Option<String>) -> Result<Vec<TagValue>, ApiError> {
    match param {
        None => Ok(Vec::new()),
        Some(raw) => raw
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| TagValue::parse(s).map_err(ApiError))
            .collect(),
    }
}

fn require_entity_visible(
    state: &AppState,
    ctx: &UserContext,
    entity: &Entity,
) -> Result<(), ApiError> {
    if entity.dataset() == SYSTEM_DATASET {
        state.gate.require_admin(ctx)?;
    }
    Ok(())
}

// =============================================================================
// Auth
// =============================================================================

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let session = state.sessions.login(&request.username, &request.password)?;
    Ok(Json(LoginResponse {
        token: session.token,
        expires_at: format_timestamp(session.expires_at),
        user: user_dto(&session.user),
    }))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    let token = state.raw_token(&headers)?;
    state.sessions.logout(token)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn whoami(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UserDto>, ApiError> {
    let ctx = state.authenticate(&headers)?;
    Ok(Json(user_dto(&ctx)))
}

// =============================================================================
// Entities
// =============================================================================

async fn create_entity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateRequest>,
) -> Result<(StatusCode, Json<EntityDto>), ApiError> {
    let ctx = state.authenticate(&headers)?;
    state.gate.require(&ctx, "write", "entity")?;

    let tags = parse_tags(&request.tags)?;
    if tags
        .iter()
        .any(|t| t.dataset_name() == Some(SYSTEM_DATASET))
    {
        state.gate.require_admin(&ctx)?;
    }

    let content = decode_content(&request.content)?;
    let id = match &request.id {
        Some(raw) => Some(EntityId::parse(raw)?),
        None => None,
    };
    let entity = state.store.create(tags, content, id)?;
    Ok((
        StatusCode::CREATED,
        Json(EntityDto::from_entity(&entity, false)),
    ))
}

#[derive(Debug, Deserialize)]
struct GetParams {
    id: String,
    #[serde(default)]
    include_timestamps: Option<bool>,
    as_of: Option<String>,
    dataset: Option<String>,
}

async fn get_entity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<GetParams>,
) -> Result<Json<EntityDto>, ApiError> {
    let ctx = state.authenticate(&headers)?;
    state.gate.require(&ctx, "read", "entity")?;

    let id = EntityId::parse(&params.id)?;
    let opts = GetOptions {
        as_of: params.as_of.as_deref().map(parse_timestamp).transpose()?,
        dataset: params.dataset.clone(),
    };
    let entity = state.store.get(&id, &opts)?;
    require_entity_visible(&state, &ctx, &entity)?;
    Ok(Json(EntityDto::from_entity(
        &entity,
        params.include_timestamps.unwrap_or(false),
    )))
}

async fn update_entity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<EntityDto>, ApiError> {
    let ctx = state.authenticate(&headers)?;
    state.gate.require(&ctx, "write", "entity")?;

    let id = EntityId::parse(&request.id)?;
    let current = state.store.get(&id, &GetOptions::default())?;
    require_entity_visible(&state, &ctx, &current)?;

    if let Some(target) = &request.tags {
        let target = parse_tags(target)?;
        if target
            .iter()
            .any(|t| t.dataset_name() == Some(SYSTEM_DATASET))
        {
            state.gate.require_admin(&ctx)?;
        }
        let live: Vec<TagValue> = current.tag_values().cloned().collect();
        let add: Vec<TagValue> = target
            .iter()
            .filter(|t| !live.contains(t))
            .cloned()
            .collect();
        // Engine-managed content tags never leave via a tag-set update
        let remove: Vec<TagValue> = live
            .iter()
            .filter(|t| !target.contains(t) && t.namespace() != "content")
            .cloned()
            .collect();
        state.store.append_tags(&id, &add, &remove)?;
    }

    if let Some(content) = &request.content {
        let bytes = decode_content(&Some(content.clone()))?;
        state.store.replace_content(&id, bytes)?;
    }

    let updated = state.store.get(&id, &GetOptions::default())?;
    Ok(Json(EntityDto::from_entity(&updated, false)))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    tag: Option<String>,
    #[serde(rename = "match")]
    match_mode: Option<String>,
    wildcard: Option<String>,
    dataset: Option<String>,
    limit: Option<usize>,
    #[serde(default)]
    offset: usize,
    #[serde(default)]
    include_timestamps: Option<bool>,
}

async fn list_entities(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<EntityDto>>, ApiError> {
    run_list(state, headers, params).await
}

async fn query_entities(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<EntityDto>>, ApiError> {
    run_list(state, headers, params).await
}

async fn run_list(
    state: AppState,
    headers: HeaderMap,
    params: ListParams,
) -> Result<Json<Vec<EntityDto>>, ApiError> {
    let ctx = state.authenticate(&headers)?;
    state.gate.require(&ctx, "read", "entity")?;

    match params.dataset.as_deref() {
        Some(SYSTEM_DATASET) => state.gate.require_admin(&ctx)?,
        Some(_) => {}
        None => {
            // Unscoped queries span datasets
            state.gate.require(&ctx, "dataset", "cross")?;
        }
    }

    let filter = ListFilter {
        tags: split_tags(&params.tag)?,
        match_mode: params
            .match_mode
            .as_deref()
            .map(MatchMode::parse)
            .transpose()?
            .unwrap_or_default(),
        wildcard: params
            .wildcard
            .as_deref()
            .map(WildcardPattern::parse)
            .transpose()?,
        dataset: params.dataset.clone(),
        limit: params.limit,
        offset: params.offset,
    };
    let mut entities = state.store.list(&filter, &CancelToken::new())?;
    if params.dataset.is_none() && !ctx.is_admin() {
        entities.retain(|e| e.dataset() != SYSTEM_DATASET);
    }

    let include_ts = params.include_timestamps.unwrap_or(false);
    Ok(Json(
        entities
            .iter()
            .map(|e| EntityDto::from_entity(e, include_ts))
            .collect(),
    ))
}

// =============================================================================
// Temporal
// =============================================================================

#[derive(Debug, Deserialize)]
struct HistoryParams {
    id: String,
    from: Option<String>,
    to: Option<String>,
}

async fn history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<EventDto>>, ApiError> {
    let ctx = state.authenticate(&headers)?;
    state.gate.require(&ctx, "read", "entity")?;

    let id = EntityId::parse(&params.id)?;
    let entity = state.store.get(&id, &GetOptions::default())?;
    require_entity_visible(&state, &ctx, &entity)?;

    let from = params.from.as_deref().map(parse_timestamp).transpose()?;
    let to = params.to.as_deref().map(parse_timestamp).transpose()?;
    let events = state.store.history(&id, from, to)?;
    Ok(Json(events.iter().map(EventDto::from).collect()))
}

#[derive(Debug, Deserialize)]
struct AsOfParams {
    id: String,
    timestamp: String,
}

async fn as_of(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<AsOfParams>,
) -> Result<Json<EntityDto>, ApiError> {
    let ctx = state.authenticate(&headers)?;
    state.gate.require(&ctx, "read", "entity")?;

    let id = EntityId::parse(&params.id)?;
    let t = parse_timestamp(&params.timestamp)?;
    let entity = state.store.as_of(&id, t)?;
    require_entity_visible(&state, &ctx, &entity)?;
    Ok(Json(EntityDto::from_entity(&entity, true)))
}

#[derive(Debug, Deserialize)]
struct ChangesParams {
    since: String,
    limit: Option<usize>,
}

async fn changes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ChangesParams>,
) -> Result<Json<Vec<ChangesDto>>, ApiError> {
    let ctx = state.authenticate(&headers)?;
    state.gate.require(&ctx, "read", "entity")?;
    state.gate.require(&ctx, "dataset", "cross")?;

    let since = parse_timestamp(&params.since)?;
    let mut changed = state
        .store
        .changes_since(since, params.limit, &CancelToken::new())?;
    if !ctx.is_admin() {
        changed.retain(|c| state.store.dataset_of(&c.id) != SYSTEM_DATASET);
    }
    Ok(Json(changed.iter().map(ChangesDto::from).collect()))
}

#[derive(Debug, Deserialize)]
struct DiffParams {
    id: String,
    t1: String,
    t2: String,
}

async fn diff(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<DiffParams>,
) -> Result<Json<DiffDto>, ApiError> {
    let ctx = state.authenticate(&headers)?;
    state.gate.require(&ctx, "read", "entity")?;

    let id = EntityId::parse(&params.id)?;
    let entity = state.store.get(&id, &GetOptions::default())?;
    require_entity_visible(&state, &ctx, &entity)?;

    let t1 = parse_timestamp(&params.t1)?;
    let t2 = parse_timestamp(&params.t2)?;
    let result = state.store.diff(&id, t1, t2)?;
    Ok(Json(DiffDto::from(&result)))
}

#[derive(Debug, Deserialize)]
struct TagValuesParams {
    namespace: String,
}

async fn tag_values(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<TagValuesParams>,
) -> Result<Json<Vec<String>>, ApiError> {
    let ctx = state.authenticate(&headers)?;
    state.gate.require(&ctx, "read", "entity")?;
    if params.namespace.is_empty() {
        return Err(ApiError(EntityDbError::malformed("namespace is required")));
    }
    Ok(Json(state.store.tag_values(&params.namespace)))
}

// =============================================================================
// Health
// =============================================================================

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.store.stats();
    Json(HealthResponse {
        status: "ok",
        uptime_s: state.started.elapsed().as_secs(),
        entities: stats.entities,
    })
}
