use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::org::{
    Group, GroupCreateRequest, Site, SiteCreateRequest, Structure, StructureCreateRequest,
};
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/org/structures",
    tag = "Organization",
    responses((status = 200, description = "List structures", body = [Structure]))
)]
pub async fn list_structures(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> AppResult<Json<Vec<Structure>>> {
    let structures = sqlx::query_as::<_, Structure>(
        "SELECT id, name, code, active, created_at, updated_at FROM structures WHERE active = 1 ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(structures))
}

#[utoipa::path(
    post,
    path = "/org/structures",
    tag = "Organization",
    request_body = StructureCreateRequest,
    responses((status = 201, description = "Structure created", body = Structure))
)]
pub async fn create_structure(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<StructureCreateRequest>,
) -> AppResult<(StatusCode, Json<Structure>)> {
    super::ensure_admin(&state.pool, auth.user_id).await?;

    if payload.name.trim().is_empty() || payload.code.trim().is_empty() {
        return Err(AppError::bad_request("name and code are required"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        "INSERT INTO structures (id, name, code, active, created_at, updated_at) VALUES (?, ?, ?, 1, ?, ?)",
    )
    .bind(id)
    .bind(payload.name.trim())
    .bind(payload.code.trim().to_lowercase())
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let structure = sqlx::query_as::<_, Structure>(
        "SELECT id, name, code, active, created_at, updated_at FROM structures WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&state.pool)
    .await?;

    Ok((StatusCode::CREATED, Json(structure)))
}

#[utoipa::path(
    get,
    path = "/org/groups",
    tag = "Organization",
    responses((status = 200, description = "List groups", body = [Group]))
)]
pub async fn list_groups(State(state): State<AppState>, _auth: AuthUser) -> AppResult<Json<Vec<Group>>> {
    let groups = sqlx::query_as::<_, Group>(
        "SELECT id, name, structure_id, active, created_at FROM groups WHERE active = 1 ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(groups))
}

#[utoipa::path(
    post,
    path = "/org/groups",
    tag = "Organization",
    request_body = GroupCreateRequest,
    responses((status = 201, description = "Group created", body = Group))
)]
pub async fn create_group(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<GroupCreateRequest>,
) -> AppResult<(StatusCode, Json<Group>)> {
    super::ensure_admin(&state.pool, auth.user_id).await?;

    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO groups (id, name, structure_id, active, created_at) VALUES (?, ?, ?, 1, ?)")
        .bind(id)
        .bind(payload.name.trim())
        .bind(payload.structure_id)
        .bind(utc_now())
        .execute(&state.pool)
        .await?;

    let group = sqlx::query_as::<_, Group>(
        "SELECT id, name, structure_id, active, created_at FROM groups WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&state.pool)
    .await?;

    Ok((StatusCode::CREATED, Json(group)))
}

#[utoipa::path(
    get,
    path = "/org/sites",
    tag = "Organization",
    responses((status = 200, description = "List sites", body = [Site]))
)]
pub async fn list_sites(State(state): State<AppState>, _auth: AuthUser) -> AppResult<Json<Vec<Site>>> {
    let sites = sqlx::query_as::<_, Site>(
        "SELECT id, name, structure_id, active, created_at FROM sites WHERE active = 1 ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(sites))
}

#[utoipa::path(
    post,
    path = "/org/sites",
    tag = "Organization",
    request_body = SiteCreateRequest,
    responses((status = 201, description = "Site created", body = Site))
)]
pub async fn create_site(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<SiteCreateRequest>,
) -> AppResult<(StatusCode, Json<Site>)> {
    super::ensure_admin(&state.pool, auth.user_id).await?;

    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO sites (id, name, structure_id, active, created_at) VALUES (?, ?, ?, 1, ?)")
        .bind(id)
        .bind(payload.name.trim())
        .bind(payload.structure_id)
        .bind(utc_now())
        .execute(&state.pool)
        .await?;

    let site = sqlx::query_as::<_, Site>(
        "SELECT id, name, structure_id, active, created_at FROM sites WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&state.pool)
    .await?;

    Ok((StatusCode::CREATED, Json(site)))
}
