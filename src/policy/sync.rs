use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::AppResult;
use crate::models::authorization::{AuthorizationRecord, DbAuthorizationRecord};
use crate::models::catalog::{CatalogSyncReport, DbSoftwareReference};
use crate::utils::utc_now;

use super::subject::Subject;

/// Reconcile the reference catalog from every observed installation.
///
/// One get-or-create per distinct (name, publisher) pair; new entries
/// default to the `open` security level so detection alone never blocks
/// anything. Running twice without new observations creates nothing.
pub async fn sync_catalog_from_installed(pool: &SqlitePool) -> AppResult<CatalogSyncReport> {
    let pairs: Vec<(String, String)> =
        sqlx::query_as("SELECT DISTINCT name, publisher FROM installed_software ORDER BY name")
            .fetch_all(pool)
            .await?;

    let mut report = CatalogSyncReport {
        created: 0,
        updated: 0,
        total_processed: pairs.len() as u32,
    };

    for (name, publisher) in pairs {
        if name.trim().is_empty() {
            continue;
        }

        let existing: Option<(Uuid, String)> =
            sqlx::query_as("SELECT id, publisher FROM software_references WHERE name = ?")
                .bind(&name)
                .fetch_optional(pool)
                .await?;

        match existing {
            None => {
                let now = utc_now();
                sqlx::query(
                    "INSERT INTO software_references (id, name, publisher, description, security_level, active, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, 'open', 1, ?, ?)",
                )
                .bind(Uuid::new_v4())
                .bind(&name)
                .bind(&publisher)
                .bind("Automatically detected from machine inventories")
                .bind(now)
                .bind(now)
                .execute(pool)
                .await?;
                report.created += 1;
            }
            Some((id, existing_publisher)) => {
                // Backfill the publisher once a machine reports one.
                if existing_publisher.is_empty() && !publisher.is_empty() {
                    sqlx::query("UPDATE software_references SET publisher = ?, updated_at = ? WHERE id = ?")
                        .bind(&publisher)
                        .bind(utc_now())
                        .bind(id)
                        .execute(pool)
                        .await?;
                    report.updated += 1;
                }
            }
        }
    }

    tracing::info!(
        created = report.created,
        updated = report.updated,
        total = report.total_processed,
        "catalog synchronized from installed software"
    );

    Ok(report)
}

/// Targeted single-title variant of the catalog sync. Returns None when
/// no machine has ever reported that name; there is nothing to
/// synchronize from.
pub async fn sync_catalog_entry(
    pool: &SqlitePool,
    name: &str,
    publisher: Option<&str>,
) -> AppResult<Option<DbSoftwareReference>> {
    if name.trim().is_empty() {
        return Ok(None);
    }

    let observed: Option<(String, String)> = sqlx::query_as(
        "SELECT i.publisher, m.name FROM installed_software i \
         JOIN machines m ON m.id = i.machine_id \
         WHERE i.name = ? COLLATE NOCASE LIMIT 1",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    let Some((observed_publisher, machine_name)) = observed else {
        return Ok(None);
    };

    if let Some(existing) = fetch_reference_by_name(pool, name).await? {
        return Ok(Some(existing));
    }

    let now = utc_now();
    let id = Uuid::new_v4();
    let publisher = publisher
        .map(str::to_string)
        .filter(|p| !p.is_empty())
        .unwrap_or(observed_publisher);

    sqlx::query(
        "INSERT INTO software_references (id, name, publisher, description, security_level, active, created_at, updated_at) \
         VALUES (?, ?, ?, ?, 'open', 1, ?, ?)",
    )
    .bind(id)
    .bind(name)
    .bind(&publisher)
    .bind(format!("Synchronized from {}", machine_name))
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    fetch_reference_by_name(pool, name).await
}

/// Reconcile the inventory-authorization links: for each equipment item
/// with an assigned user, every currently-allowed, catalog-linked
/// installed title that maps to a currently-valid grant gets an active
/// link row. Only newly created rows count toward the return value;
/// inactive rows are reactivated in place.
pub async fn sync_inventory_authorizations(
    pool: &SqlitePool,
    user: Option<Uuid>,
    equipment: Option<Uuid>,
) -> AppResult<u32> {
    let equipment_rows: Vec<(Uuid, Option<Uuid>)> = if let Some(user_id) = user {
        sqlx::query_as("SELECT id, user_id FROM equipment WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(pool)
            .await?
    } else if let Some(equipment_id) = equipment {
        sqlx::query_as("SELECT id, user_id FROM equipment WHERE id = ?")
            .bind(equipment_id)
            .fetch_all(pool)
            .await?
    } else {
        sqlx::query_as("SELECT id, user_id FROM equipment WHERE user_id IS NOT NULL")
            .fetch_all(pool)
            .await?
    };

    let now = utc_now();
    let mut created = 0u32;

    for (equipment_id, user_id) in equipment_rows {
        let Some(user_id) = user_id else { continue };
        let Some(subject) = Subject::load(pool, user_id).await? else { continue };

        let installed_refs: Vec<Uuid> = sqlx::query_scalar(
            "SELECT DISTINCT i.software_ref_id FROM installed_software i \
             JOIN machines m ON m.id = i.machine_id \
             WHERE m.user_id = ? AND i.resolution = 'allowed' AND i.software_ref_id IS NOT NULL",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        for software_ref_id in installed_refs {
            let grants = fetch_grants_for_subject(pool, software_ref_id, &subject).await?;
            // Unlike denial matching in the resolver, grants go through the
            // full validity predicate including expiry.
            let Some(record) = grants.into_iter().find(|grant| grant.is_valid_at(now)) else {
                continue;
            };

            let existing: Option<(Uuid, bool)> = sqlx::query_as(
                "SELECT id, active FROM inventory_authorizations \
                 WHERE equipment_id = ? AND authorization_record_id = ?",
            )
            .bind(equipment_id)
            .bind(record.id)
            .fetch_optional(pool)
            .await?;

            match existing {
                None => {
                    sqlx::query(
                        "INSERT INTO inventory_authorizations (id, equipment_id, user_id, authorization_record_id, active, created_at, updated_at) \
                         VALUES (?, ?, ?, ?, 1, ?, ?)",
                    )
                    .bind(Uuid::new_v4())
                    .bind(equipment_id)
                    .bind(user_id)
                    .bind(record.id)
                    .bind(now)
                    .bind(now)
                    .execute(pool)
                    .await?;
                    created += 1;
                }
                Some((link_id, active)) if !active => {
                    sqlx::query("UPDATE inventory_authorizations SET active = 1, updated_at = ? WHERE id = ?")
                        .bind(now)
                        .bind(link_id)
                        .execute(pool)
                        .await?;
                }
                Some(_) => {}
            }
        }
    }

    Ok(created)
}

async fn fetch_reference_by_name(
    pool: &SqlitePool,
    name: &str,
) -> AppResult<Option<DbSoftwareReference>> {
    let reference = sqlx::query_as::<_, DbSoftwareReference>(
        "SELECT id, name, publisher, description, category_id, security_level, allowed_versions, \
         forbidden_versions, license_required, active, created_at, updated_at \
         FROM software_references WHERE name = ?",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(reference)
}

async fn fetch_grants_for_subject(
    pool: &SqlitePool,
    software_ref_id: Uuid,
    subject: &Subject,
) -> AppResult<Vec<AuthorizationRecord>> {
    let rows = sqlx::query_as::<_, DbAuthorizationRecord>(
        "SELECT id, software_ref_id, scope_kind, scope_id, status, valid_from, valid_until, \
         granted_by, reason, created_at, updated_at \
         FROM authorization_records \
         WHERE software_ref_id = ? AND status = 'granted' AND ( \
            (scope_kind = 'user' AND scope_id = ?) OR \
            (scope_kind = 'group' AND scope_id = ?) OR \
            (scope_kind = 'structure' AND scope_id = ?) OR \
            (scope_kind = 'site' AND scope_id = ?)) \
         ORDER BY created_at ASC",
    )
    .bind(software_ref_id)
    .bind(subject.user_id)
    .bind(subject.group_id)
    .bind(subject.structure_id)
    .bind(subject.site_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(AuthorizationRecord::try_from).collect()
}
