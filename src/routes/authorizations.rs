use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::authorization::{
    AuthorizationRecord, AuthorizationStatus, BulkAuthorizationRequest, BulkMutationResponse,
    DbAuthorizationRecord, ForbidRequest, ScopeKind,
};
use crate::models::user::DbUser;
use crate::policy;
use crate::utils::utc_now;

#[derive(Debug, Deserialize)]
pub struct AuthorizationListQuery {
    pub software_ref_id: Uuid,
}

#[utoipa::path(
    get,
    path = "/authorizations",
    tag = "Authorizations",
    params(("software_ref_id" = Uuid, Query, description = "Reference to list records for")),
    responses((status = 200, description = "Authorization records", body = [AuthorizationRecord]))
)]
pub async fn list_records(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<AuthorizationListQuery>,
) -> AppResult<Json<Vec<AuthorizationRecord>>> {
    super::ensure_technician(&state.pool, auth.user_id).await?;

    let rows = sqlx::query_as::<_, DbAuthorizationRecord>(
        "SELECT id, software_ref_id, scope_kind, scope_id, status, valid_from, valid_until, \
         granted_by, reason, created_at, updated_at \
         FROM authorization_records WHERE software_ref_id = ? ORDER BY created_at DESC",
    )
    .bind(query.software_ref_id)
    .fetch_all(&state.pool)
    .await?;

    let records: Vec<AuthorizationRecord> = rows
        .into_iter()
        .map(AuthorizationRecord::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(records))
}

#[utoipa::path(
    post,
    path = "/authorizations/bulk-deny",
    tag = "Authorizations",
    request_body = BulkAuthorizationRequest,
    responses((status = 200, description = "Denials applied and outcomes re-resolved", body = BulkMutationResponse))
)]
pub async fn bulk_deny(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<BulkAuthorizationRequest>,
) -> AppResult<Json<BulkMutationResponse>> {
    let admin = super::ensure_admin(&state.pool, auth.user_id).await?;
    apply_bulk(&state, &admin, payload, AuthorizationStatus::Denied).await
}

#[utoipa::path(
    post,
    path = "/authorizations/bulk-grant",
    tag = "Authorizations",
    request_body = BulkAuthorizationRequest,
    responses((status = 200, description = "Grants applied and outcomes re-resolved", body = BulkMutationResponse))
)]
pub async fn bulk_grant(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<BulkAuthorizationRequest>,
) -> AppResult<Json<BulkMutationResponse>> {
    let admin = super::ensure_admin(&state.pool, auth.user_id).await?;
    apply_bulk(&state, &admin, payload, AuthorizationStatus::Granted).await
}

/// Mark a reference set forbidden. Overrides every record: a forbidden
/// reference blocks regardless of per-scope grants.
#[utoipa::path(
    post,
    path = "/catalog/forbid",
    tag = "Authorizations",
    request_body = ForbidRequest,
    responses((status = 200, description = "References marked forbidden", body = BulkMutationResponse))
)]
pub async fn forbid(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<ForbidRequest>,
) -> AppResult<Json<BulkMutationResponse>> {
    let admin = super::ensure_admin(&state.pool, auth.user_id).await?;

    let reference_ids =
        resolve_reference_selector(&state.pool, &payload.software_ref_ids, &payload.category_ids).await?;

    let mut mutated = 0u32;
    for reference_id in &reference_ids {
        let changed = sqlx::query(
            "UPDATE software_references SET security_level = 'forbidden', updated_at = ? \
             WHERE id = ? AND security_level != 'forbidden'",
        )
        .bind(utc_now())
        .bind(reference_id)
        .execute(&state.pool)
        .await?;

        if changed.rows_affected() > 0 {
            mutated += 1;
            let reference: crate::models::catalog::SoftwareReference =
                super::catalog::fetch_reference(&state.pool, *reference_id).await?.try_into()?;
            crate::events::log_activity(&state.event_bus, "forbidden", Some(admin.id), &reference);
        }
    }

    // Propagate to cached outcomes, changed or not: a re-run must still
    // leave every affected row consistent
    let reverified = policy::reverify_references(&state.pool, &reference_ids).await?;

    Ok(Json(BulkMutationResponse { mutated, reverified }))
}

async fn apply_bulk(
    state: &AppState,
    admin: &DbUser,
    payload: BulkAuthorizationRequest,
    status: AuthorizationStatus,
) -> AppResult<Json<BulkMutationResponse>> {
    if payload.target_ids.is_empty() {
        return Err(AppError::bad_request("at least one target is required"));
    }

    let reference_ids =
        resolve_reference_selector(&state.pool, &payload.software_ref_ids, &payload.category_ids).await?;

    let action = match status {
        AuthorizationStatus::Denied => "bulk_denied",
        _ => "bulk_granted",
    };
    let default_reason = match status {
        AuthorizationStatus::Denied => format!("Denied in bulk by {}", admin.name),
        _ => format!("Granted in bulk by {}", admin.name),
    };
    let reason = payload
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(&default_reason)
        .to_string();

    let mut mutated = 0u32;
    for reference_id in &reference_ids {
        for target_id in &payload.target_ids {
            let record = upsert_record(
                &state.pool,
                *reference_id,
                payload.scope_kind,
                *target_id,
                status,
                admin.id,
                &reason,
                payload.valid_until,
            )
            .await?;
            mutated += 1;

            crate::events::log_activity(&state.event_bus, action, Some(admin.id), &record);
        }
    }

    // Synchronous fan-out: the mutation is not done until every affected
    // cached outcome has been recomputed
    let reverified = policy::reverify_references(&state.pool, &reference_ids).await?;

    tracing::info!(
        references = reference_ids.len(),
        targets = payload.target_ids.len(),
        status = status.as_str(),
        reverified,
        "bulk authorization mutation applied"
    );

    Ok(Json(BulkMutationResponse { mutated, reverified }))
}

/// Expand the reference-set selector: explicit ids plus every active
/// reference of the requested categories, deduplicated.
pub(crate) async fn resolve_reference_selector(
    pool: &SqlitePool,
    software_ref_ids: &[Uuid],
    category_ids: &[Uuid],
) -> AppResult<Vec<Uuid>> {
    let mut ids: Vec<Uuid> = Vec::new();

    for id in software_ref_ids {
        // Unknown ids are a caller mistake, not a silently-empty selector
        let exists: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM software_references WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await?;
        if exists == 0 {
            return Err(AppError::not_found(format!("software reference {} not found", id)));
        }
        if !ids.contains(id) {
            ids.push(*id);
        }
    }

    for category_id in category_ids {
        let members: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM software_references WHERE category_id = ? AND active = 1 ORDER BY name",
        )
        .bind(category_id)
        .fetch_all(pool)
        .await?;
        for id in members {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }

    if ids.is_empty() {
        return Err(AppError::bad_request("no software selected"));
    }

    Ok(ids)
}

/// One record per (reference, scope kind, target): create it with the
/// requested status, or normalize the existing one. Never duplicates.
#[allow(clippy::too_many_arguments)]
async fn upsert_record(
    pool: &SqlitePool,
    software_ref_id: Uuid,
    scope_kind: ScopeKind,
    target_id: Uuid,
    status: AuthorizationStatus,
    granted_by: Uuid,
    reason: &str,
    valid_until: Option<chrono::DateTime<chrono::Utc>>,
) -> AppResult<AuthorizationRecord> {
    let now = utc_now();

    let existing: Option<(Uuid, String)> = sqlx::query_as(
        "SELECT id, status FROM authorization_records \
         WHERE software_ref_id = ? AND scope_kind = ? AND scope_id = ?",
    )
    .bind(software_ref_id)
    .bind(scope_kind.as_str())
    .bind(target_id)
    .fetch_optional(pool)
    .await?;

    let record_id = match existing {
        None => {
            let id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO authorization_records (id, software_ref_id, scope_kind, scope_id, status, \
                 valid_from, valid_until, granted_by, reason, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(software_ref_id)
            .bind(scope_kind.as_str())
            .bind(target_id)
            .bind(status.as_str())
            .bind(now)
            .bind(valid_until)
            .bind(granted_by)
            .bind(reason)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await?;
            id
        }
        Some((id, current_status)) => {
            if current_status != status.as_str() {
                sqlx::query(
                    "UPDATE authorization_records SET status = ?, granted_by = ?, reason = ?, \
                     valid_until = ?, updated_at = ? WHERE id = ?",
                )
                .bind(status.as_str())
                .bind(granted_by)
                .bind(reason)
                .bind(valid_until)
                .bind(now)
                .bind(id)
                .execute(pool)
                .await?;
            }
            id
        }
    };

    let record = sqlx::query_as::<_, DbAuthorizationRecord>(
        "SELECT id, software_ref_id, scope_kind, scope_id, status, valid_from, valid_until, \
         granted_by, reason, created_at, updated_at \
         FROM authorization_records WHERE id = ?",
    )
    .bind(record_id)
    .fetch_one(pool)
    .await?;

    record.try_into()
}
