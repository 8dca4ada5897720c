use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::inventory::{
    equipment_status, Equipment, EquipmentCreateRequest, InventoryAuthorization,
    InventorySyncRequest, InventorySyncResponse,
};
use crate::policy;
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/inventory/equipment",
    tag = "Inventory",
    responses((status = 200, description = "List equipment", body = [Equipment]))
)]
pub async fn list_equipment(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Equipment>>> {
    super::ensure_technician(&state.pool, auth.user_id).await?;

    let equipment = sqlx::query_as::<_, Equipment>(
        "SELECT id, name, inventory_number, user_id, site_id, status, created_at, updated_at \
         FROM equipment ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(equipment))
}

#[utoipa::path(
    post,
    path = "/inventory/equipment",
    tag = "Inventory",
    request_body = EquipmentCreateRequest,
    responses(
        (status = 201, description = "Equipment created", body = Equipment),
        (status = 409, description = "Inventory number already in use")
    )
)]
pub async fn create_equipment(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<EquipmentCreateRequest>,
) -> AppResult<(StatusCode, Json<Equipment>)> {
    super::ensure_admin(&state.pool, auth.user_id).await?;

    let duplicate: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM equipment WHERE inventory_number = ?")
            .bind(&payload.inventory_number)
            .fetch_one(&state.pool)
            .await?;
    if duplicate > 0 {
        return Err(AppError::conflict("inventory number already in use"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    let status = if payload.user_id.is_some() {
        equipment_status::IN_USE
    } else {
        equipment_status::AVAILABLE
    };

    sqlx::query(
        "INSERT INTO equipment (id, name, inventory_number, user_id, site_id, status, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(payload.name.trim())
    .bind(&payload.inventory_number)
    .bind(payload.user_id)
    .bind(payload.site_id)
    .bind(status)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let equipment = fetch_equipment(&state.pool, id).await?;
    Ok((StatusCode::CREATED, Json(equipment)))
}

#[utoipa::path(
    get,
    path = "/inventory/equipment/{id}/authorizations",
    tag = "Inventory",
    params(("id" = Uuid, Path, description = "Equipment id")),
    responses((status = 200, description = "Active authorization links", body = [InventoryAuthorization]))
)]
pub async fn list_equipment_authorizations(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<InventoryAuthorization>>> {
    super::ensure_technician(&state.pool, auth.user_id).await?;
    let equipment = fetch_equipment(&state.pool, id).await?;

    let links = sqlx::query_as::<_, InventoryAuthorization>(
        "SELECT id, equipment_id, user_id, authorization_record_id, active, created_at, updated_at \
         FROM inventory_authorizations WHERE equipment_id = ? AND active = 1 ORDER BY created_at DESC",
    )
    .bind(equipment.id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(links))
}

/// Reconcile inventory-authorization links from what is installed and
/// granted right now. Manual trigger; the resolver never calls this.
#[utoipa::path(
    post,
    path = "/inventory/authorizations/sync",
    tag = "Inventory",
    request_body = InventorySyncRequest,
    responses((status = 200, description = "Links reconciled", body = InventorySyncResponse))
)]
pub async fn sync_authorizations(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<InventorySyncRequest>,
) -> AppResult<Json<InventorySyncResponse>> {
    super::ensure_admin(&state.pool, auth.user_id).await?;

    let created = policy::sync::sync_inventory_authorizations(
        &state.pool,
        payload.user_id,
        payload.equipment_id,
    )
    .await?;

    tracing::info!(created, "inventory authorizations synchronized");

    Ok(Json(InventorySyncResponse { created }))
}

async fn fetch_equipment(pool: &sqlx::SqlitePool, id: Uuid) -> AppResult<Equipment> {
    let equipment = sqlx::query_as::<_, Equipment>(
        "SELECT id, name, inventory_number, user_id, site_id, status, created_at, updated_at \
         FROM equipment WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    equipment.ok_or_else(|| AppError::not_found("equipment not found"))
}
