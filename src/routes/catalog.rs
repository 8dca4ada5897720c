use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::catalog::{
    CatalogSyncOneRequest, CatalogSyncReport, DbSoftwareReference, SoftwareCategory,
    SoftwareCategoryCreateRequest, SoftwareReference, SoftwareReferenceCreateRequest,
    SoftwareReferenceUpdateRequest,
};
use crate::policy;
use crate::utils::{encode_version_list, utc_now};

#[utoipa::path(
    get,
    path = "/catalog",
    tag = "Catalog",
    responses((status = 200, description = "List software references", body = [SoftwareReference]))
)]
pub async fn list_references(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> AppResult<Json<Vec<SoftwareReference>>> {
    let rows = sqlx::query_as::<_, DbSoftwareReference>(
        "SELECT id, name, publisher, description, category_id, security_level, allowed_versions, \
         forbidden_versions, license_required, active, created_at, updated_at \
         FROM software_references WHERE active = 1 ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;

    let references: Vec<SoftwareReference> = rows
        .into_iter()
        .map(SoftwareReference::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(references))
}

#[utoipa::path(
    post,
    path = "/catalog",
    tag = "Catalog",
    request_body = SoftwareReferenceCreateRequest,
    responses(
        (status = 201, description = "Reference created", body = SoftwareReference),
        (status = 409, description = "Name already referenced")
    )
)]
pub async fn create_reference(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<SoftwareReferenceCreateRequest>,
) -> AppResult<(StatusCode, Json<SoftwareReference>)> {
    super::ensure_admin(&state.pool, auth.user_id).await?;

    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("reference name must not be empty"));
    }

    let duplicate: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM software_references WHERE name = ?")
        .bind(name)
        .fetch_one(&state.pool)
        .await?;
    if duplicate > 0 {
        return Err(AppError::conflict("a reference with this name already exists"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    let security_level = payload.security_level.unwrap_or(crate::models::catalog::SecurityLevel::Open);

    sqlx::query(
        "INSERT INTO software_references (id, name, publisher, description, category_id, security_level, \
         allowed_versions, forbidden_versions, license_required, active, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(id)
    .bind(name)
    .bind(payload.publisher.unwrap_or_default())
    .bind(payload.description.unwrap_or_default())
    .bind(payload.category_id)
    .bind(security_level.as_str())
    .bind(encode_version_list(&payload.allowed_versions.unwrap_or_default()))
    .bind(encode_version_list(&payload.forbidden_versions.unwrap_or_default()))
    .bind(payload.license_required.unwrap_or(false))
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let reference: SoftwareReference = fetch_reference(&state.pool, id).await?.try_into()?;

    crate::events::log_activity(&state.event_bus, "created", Some(auth.user_id), &reference);

    // A manually created entry may classify software that machines already
    // reported; pick those rows up right away
    policy::reverify_unlinked_by_name(&state.pool, &reference.name).await?;

    Ok((StatusCode::CREATED, Json(reference)))
}

#[utoipa::path(
    get,
    path = "/catalog/{id}",
    tag = "Catalog",
    params(("id" = Uuid, Path, description = "Reference id")),
    responses((status = 200, description = "Reference detail", body = SoftwareReference))
)]
pub async fn get_reference(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SoftwareReference>> {
    let reference: SoftwareReference = fetch_reference(&state.pool, id).await?.try_into()?;
    Ok(Json(reference))
}

#[utoipa::path(
    put,
    path = "/catalog/{id}",
    tag = "Catalog",
    params(("id" = Uuid, Path, description = "Reference id")),
    request_body = SoftwareReferenceUpdateRequest,
    responses((status = 200, description = "Reference updated", body = SoftwareReference))
)]
pub async fn update_reference(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<SoftwareReferenceUpdateRequest>,
) -> AppResult<Json<SoftwareReference>> {
    super::ensure_admin(&state.pool, auth.user_id).await?;

    let current = fetch_reference(&state.pool, id).await?;
    let old_level = current.security_level.clone();

    let publisher = payload.publisher.unwrap_or(current.publisher);
    let description = payload.description.unwrap_or(current.description);
    let category_id = payload.category_id.or(current.category_id);
    let security_level = payload
        .security_level
        .map(|level| level.as_str().to_string())
        .unwrap_or(current.security_level);
    let allowed_versions = payload
        .allowed_versions
        .map(|v| encode_version_list(&v))
        .unwrap_or(current.allowed_versions);
    let forbidden_versions = payload
        .forbidden_versions
        .map(|v| encode_version_list(&v))
        .unwrap_or(current.forbidden_versions);
    let license_required = payload.license_required.unwrap_or(current.license_required);
    let active = payload.active.unwrap_or(current.active);

    sqlx::query(
        "UPDATE software_references SET publisher = ?, description = ?, category_id = ?, security_level = ?, \
         allowed_versions = ?, forbidden_versions = ?, license_required = ?, active = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(&publisher)
    .bind(&description)
    .bind(category_id)
    .bind(&security_level)
    .bind(&allowed_versions)
    .bind(&forbidden_versions)
    .bind(license_required)
    .bind(active)
    .bind(utc_now())
    .bind(id)
    .execute(&state.pool)
    .await?;

    // Security-level changes must propagate to cached outcomes
    if security_level != old_level {
        policy::reverify_references(&state.pool, &[id]).await?;
    }

    let reference: SoftwareReference = fetch_reference(&state.pool, id).await?.try_into()?;
    Ok(Json(reference))
}

#[utoipa::path(
    post,
    path = "/catalog/sync",
    tag = "Catalog",
    responses((status = 200, description = "Catalog synchronized from installed software", body = CatalogSyncReport))
)]
pub async fn sync_catalog(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<CatalogSyncReport>> {
    super::ensure_admin(&state.pool, auth.user_id).await?;
    let report = policy::sync::sync_catalog_from_installed(&state.pool).await?;
    Ok(Json(report))
}

#[utoipa::path(
    post,
    path = "/catalog/sync-one",
    tag = "Catalog",
    request_body = CatalogSyncOneRequest,
    responses(
        (status = 200, description = "Reference synchronized", body = SoftwareReference),
        (status = 404, description = "No installed software with that name")
    )
)]
pub async fn sync_catalog_one(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<CatalogSyncOneRequest>,
) -> AppResult<Json<SoftwareReference>> {
    super::ensure_admin(&state.pool, auth.user_id).await?;

    let synced =
        policy::sync::sync_catalog_entry(&state.pool, &payload.name, payload.publisher.as_deref())
            .await?;

    match synced {
        Some(reference) => Ok(Json(reference.try_into()?)),
        None => Err(AppError::not_found("no installed software with that name")),
    }
}

// =============================================================================
// CATEGORIES
// =============================================================================

#[utoipa::path(
    get,
    path = "/catalog/categories",
    tag = "Catalog",
    responses((status = 200, description = "List categories", body = [SoftwareCategory]))
)]
pub async fn list_categories(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> AppResult<Json<Vec<SoftwareCategory>>> {
    let categories = sqlx::query_as::<_, SoftwareCategory>(
        "SELECT id, name, description, active, created_at FROM software_categories WHERE active = 1 ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(categories))
}

#[utoipa::path(
    post,
    path = "/catalog/categories",
    tag = "Catalog",
    request_body = SoftwareCategoryCreateRequest,
    responses((status = 201, description = "Category created", body = SoftwareCategory))
)]
pub async fn create_category(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<SoftwareCategoryCreateRequest>,
) -> AppResult<(StatusCode, Json<SoftwareCategory>)> {
    super::ensure_admin(&state.pool, auth.user_id).await?;

    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO software_categories (id, name, description, active, created_at) VALUES (?, ?, ?, 1, ?)",
    )
    .bind(id)
    .bind(payload.name.trim())
    .bind(payload.description.unwrap_or_default())
    .bind(utc_now())
    .execute(&state.pool)
    .await?;

    let category = sqlx::query_as::<_, SoftwareCategory>(
        "SELECT id, name, description, active, created_at FROM software_categories WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&state.pool)
    .await?;

    Ok((StatusCode::CREATED, Json(category)))
}

pub(crate) async fn fetch_reference(pool: &SqlitePool, id: Uuid) -> AppResult<DbSoftwareReference> {
    let reference = sqlx::query_as::<_, DbSoftwareReference>(
        "SELECT id, name, publisher, description, category_id, security_level, allowed_versions, \
         forbidden_versions, license_required, active, created_at, updated_at \
         FROM software_references WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    reference.ok_or_else(|| AppError::not_found("software reference not found"))
}
