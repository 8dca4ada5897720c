use std::collections::HashSet;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::db::{row_parsers, uuid_sql};
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::machine::{
    machine_status, DbInstalledSoftware, DbMachine, InstalledSoftware, InventoryReportRequest,
    InventoryReportResponse, Machine, MachineCreateRequest,
};
use crate::policy;
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/machines",
    tag = "Machines",
    responses((status = 200, description = "List machines", body = [Machine]))
)]
pub async fn list_machines(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Machine>>> {
    let caller = super::auth::fetch_user_by_id(&state.pool, auth.user_id).await?;

    // Technicians and admins see the whole fleet, everyone else their own
    let rows = if caller.role == crate::models::user::roles::USER {
        sqlx::query_as::<_, DbMachine>(
            "SELECT id, name, serial_number, user_id, structure_id, site_id, status, last_sync_at, created_at, updated_at \
             FROM machines WHERE user_id = ? ORDER BY name",
        )
        .bind(auth.user_id)
        .fetch_all(&state.pool)
        .await?
    } else {
        sqlx::query_as::<_, DbMachine>(
            "SELECT id, name, serial_number, user_id, structure_id, site_id, status, last_sync_at, created_at, updated_at \
             FROM machines ORDER BY name",
        )
        .fetch_all(&state.pool)
        .await?
    };

    let machines: Vec<Machine> = rows.into_iter().map(Machine::try_from).collect::<Result<_, _>>()?;
    Ok(Json(machines))
}

#[utoipa::path(
    post,
    path = "/machines",
    tag = "Machines",
    request_body = MachineCreateRequest,
    responses((status = 201, description = "Machine registered", body = Machine))
)]
pub async fn create_machine(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<MachineCreateRequest>,
) -> AppResult<(StatusCode, Json<Machine>)> {
    if payload.name.trim().is_empty() {
        return Err(AppError::bad_request("machine name must not be empty"));
    }

    let machine_id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO machines (id, name, serial_number, user_id, structure_id, site_id, status, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(machine_id)
    .bind(payload.name.trim())
    .bind(&payload.serial_number)
    .bind(auth.user_id)
    .bind(payload.structure_id)
    .bind(payload.site_id)
    .bind(machine_status::ACTIVE)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let machine: Machine = fetch_machine(&state.pool, machine_id).await?.try_into()?;

    crate::events::log_activity(&state.event_bus, "created", Some(auth.user_id), &machine);

    Ok((StatusCode::CREATED, Json(machine)))
}

#[utoipa::path(
    get,
    path = "/machines/{id}",
    tag = "Machines",
    params(("id" = Uuid, Path, description = "Machine id")),
    responses((status = 200, description = "Machine detail", body = Machine))
)]
pub async fn get_machine(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Machine>> {
    let machine = fetch_machine(&state.pool, id).await?;
    ensure_machine_access(&state.pool, &machine, auth.user_id).await?;
    Ok(Json(machine.try_into()?))
}

/// Full inventory replacement from a machine agent: prior rows for the
/// machine are dropped, the submitted set is inserted, and every new row
/// goes through the resolution engine before the response is built.
#[utoipa::path(
    post,
    path = "/machines/{id}/inventory",
    tag = "Machines",
    params(("id" = Uuid, Path, description = "Machine id")),
    request_body = InventoryReportRequest,
    responses((status = 200, description = "Inventory stored and resolved", body = InventoryReportResponse))
)]
pub async fn report_inventory(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(raw): Json<serde_json::Value>,
) -> AppResult<Json<InventoryReportResponse>> {
    let machine = fetch_machine(&state.pool, id).await?;
    ensure_machine_access(&state.pool, &machine, auth.user_id).await?;

    // Agent payloads are large; report the exact JSON path on mismatch
    let payload: InventoryReportRequest = serde_path_to_error::deserialize(raw).map_err(|err| {
        let path = err.path().to_string();
        AppError::payload(path, err.into_inner().to_string())
    })?;

    let now = utc_now();

    // Replace-all semantics; delete and insert are not atomic with respect
    // to readers, agents retry at their own layer
    sqlx::query("DELETE FROM installed_software WHERE machine_id = ?")
        .bind(machine.id)
        .execute(&state.pool)
        .await?;

    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut received = 0u32;
    for entry in &payload.software {
        let name = entry.name.trim();
        if name.is_empty() {
            continue;
        }
        if !seen.insert((name.to_lowercase(), entry.version.clone())) {
            continue;
        }

        sqlx::query(
            "INSERT INTO installed_software (id, machine_id, name, version, publisher, install_date, size_bytes, license_required, license_valid, resolution, block_reason, detected_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, 'unclassified', '', ?, ?)",
        )
        .bind(Uuid::new_v4())
        .bind(machine.id)
        .bind(name)
        .bind(&entry.version)
        .bind(&entry.publisher)
        .bind(entry.install_date)
        .bind(entry.size_bytes)
        .bind(entry.license_required)
        .bind(now)
        .bind(now)
        .execute(&state.pool)
        .await?;
        received += 1;
    }

    sqlx::query("UPDATE machines SET last_sync_at = ?, updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(now)
        .bind(machine.id)
        .execute(&state.pool)
        .await?;

    let summary = policy::reverify_machine(&state.pool, machine.id).await?;

    let machine_dto: Machine = fetch_machine(&state.pool, machine.id).await?.try_into()?;
    crate::events::log_activity(&state.event_bus, "synchronized", Some(auth.user_id), &machine_dto);

    tracing::info!(
        machine = %machine.id,
        received,
        blocked = summary.blocked,
        "machine inventory synchronized"
    );

    Ok(Json(InventoryReportResponse {
        received,
        blocked: summary.blocked,
    }))
}

#[utoipa::path(
    get,
    path = "/machines/{id}/software",
    tag = "Machines",
    params(("id" = Uuid, Path, description = "Machine id")),
    responses((status = 200, description = "Installed software with outcomes", body = [InstalledSoftware]))
)]
pub async fn list_software(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<InstalledSoftware>>> {
    let machine = fetch_machine(&state.pool, id).await?;
    ensure_machine_access(&state.pool, &machine, auth.user_id).await?;

    // Try simple fast-path query first
    let simple = sqlx::query_as::<_, DbInstalledSoftware>(
        "SELECT id, machine_id, name, version, publisher, install_date, size_bytes, software_ref_id, \
         license_required, license_valid, resolution, block_reason, detected_at, updated_at \
         FROM installed_software WHERE machine_id = ? ORDER BY name",
    )
    .bind(machine.id)
    .fetch_all(&state.pool)
    .await;

    let rows: Vec<DbInstalledSoftware> = match simple {
        Ok(rows) => rows,
        Err(_) => {
            // Fallback: select textified UUIDs and parse manually
            let id_case = uuid_sql::case_uuid("id");
            let machine_case = uuid_sql::case_uuid("machine_id");
            let ref_case = uuid_sql::case_uuid("software_ref_id");
            let machine_match = uuid_sql::match_uuid_clause("machine_id");
            let sql = format!(
                "SELECT {} , {} , name, version, publisher, install_date, size_bytes, {} , \
                 license_required, license_valid, resolution, block_reason, detected_at, updated_at \
                 FROM installed_software WHERE {} ORDER BY name",
                id_case, machine_case, ref_case, machine_match
            );

            let raw_rows = sqlx::query(&sql)
                .bind(machine.id.to_string())
                .bind(machine.id.to_string())
                .fetch_all(&state.pool)
                .await?;

            let mut parsed = Vec::with_capacity(raw_rows.len());
            for row in raw_rows {
                parsed.push(row_parsers::db_installed_software_from_row(&row)?);
            }

            parsed
        }
    };

    let software: Vec<InstalledSoftware> = rows
        .into_iter()
        .map(InstalledSoftware::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(software))
}

/// Reporting view: everything currently blocked on the caller's machines,
/// each row carrying its human-readable reason.
#[utoipa::path(
    get,
    path = "/software/blocked",
    tag = "Machines",
    responses((status = 200, description = "Blocked software for the current user", body = [InstalledSoftware]))
)]
pub async fn blocked_software(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<InstalledSoftware>>> {
    let rows = sqlx::query_as::<_, DbInstalledSoftware>(
        "SELECT i.id, i.machine_id, i.name, i.version, i.publisher, i.install_date, i.size_bytes, \
         i.software_ref_id, i.license_required, i.license_valid, i.resolution, i.block_reason, \
         i.detected_at, i.updated_at \
         FROM installed_software i \
         INNER JOIN machines m ON m.id = i.machine_id \
         WHERE m.user_id = ? AND i.resolution = 'blocked' \
         ORDER BY i.name",
    )
    .bind(auth.user_id)
    .fetch_all(&state.pool)
    .await?;

    let software: Vec<InstalledSoftware> = rows
        .into_iter()
        .map(InstalledSoftware::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(software))
}

pub(crate) async fn fetch_machine(pool: &SqlitePool, machine_id: Uuid) -> AppResult<DbMachine> {
    let machine = sqlx::query_as::<_, DbMachine>(
        "SELECT id, name, serial_number, user_id, structure_id, site_id, status, last_sync_at, created_at, updated_at \
         FROM machines WHERE id = ?",
    )
    .bind(machine_id)
    .fetch_optional(pool)
    .await?;

    machine.ok_or_else(|| AppError::not_found("machine not found"))
}

async fn ensure_machine_access(pool: &SqlitePool, machine: &DbMachine, user_id: Uuid) -> AppResult<()> {
    if machine.user_id == Some(user_id) {
        return Ok(());
    }

    let caller = super::auth::fetch_user_by_id(pool, user_id).await?;
    if caller.role == crate::models::user::roles::USER {
        return Err(AppError::forbidden("not allowed to access this machine"));
    }

    Ok(())
}
