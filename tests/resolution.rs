use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

use softgate::models::machine::DbInstalledSoftware;
use softgate::policy::{self, Outcome};

async fn setup() -> Result<(SqlitePool, TempDir)> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("test.db");

    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    Ok((pool, dir))
}

async fn seed_structure(pool: &SqlitePool) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query("INSERT INTO structures (id, name, code, active, created_at, updated_at) VALUES (?, ?, ?, 1, ?, ?)")
        .bind(id)
        .bind(format!("Structure {}", id))
        .bind(&id.to_string()[..8])
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
    Ok(id)
}

async fn seed_site(pool: &SqlitePool, structure_id: Uuid) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO sites (id, name, structure_id, active, created_at) VALUES (?, ?, ?, 1, ?)")
        .bind(id)
        .bind(format!("Site {}", id))
        .bind(structure_id)
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(id)
}

async fn seed_user(
    pool: &SqlitePool,
    structure_id: Option<Uuid>,
    group_id: Option<Uuid>,
    site_id: Option<Uuid>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, role, structure_id, group_id, site_id, active, created_at, updated_at) \
         VALUES (?, ?, ?, 'x', 'user', ?, ?, ?, 1, ?, ?)",
    )
    .bind(id)
    .bind("Test User")
    .bind(format!("{}@example.com", id))
    .bind(structure_id)
    .bind(group_id)
    .bind(site_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

async fn seed_machine(pool: &SqlitePool, user_id: Option<Uuid>) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO machines (id, name, user_id, status, created_at, updated_at) VALUES (?, ?, ?, 'active', ?, ?)",
    )
    .bind(id)
    .bind(format!("machine-{}", id))
    .bind(user_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

async fn seed_reference(pool: &SqlitePool, name: &str, security_level: &str) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO software_references (id, name, security_level, active, created_at, updated_at) \
         VALUES (?, ?, ?, 1, ?, ?)",
    )
    .bind(id)
    .bind(name)
    .bind(security_level)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

async fn seed_installed(pool: &SqlitePool, machine_id: Uuid, name: &str, version: &str) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO installed_software (id, machine_id, name, version, detected_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(machine_id)
    .bind(name)
    .bind(version)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

#[allow(clippy::too_many_arguments)]
async fn seed_record(
    pool: &SqlitePool,
    software_ref_id: Uuid,
    scope_kind: &str,
    scope_id: Uuid,
    status: &str,
    reason: &str,
    valid_until: Option<chrono::DateTime<Utc>>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO authorization_records (id, software_ref_id, scope_kind, scope_id, status, valid_from, valid_until, reason, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(software_ref_id)
    .bind(scope_kind)
    .bind(scope_id)
    .bind(status)
    .bind(now)
    .bind(valid_until)
    .bind(reason)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

async fn fetch_installed(pool: &SqlitePool, id: Uuid) -> Result<DbInstalledSoftware> {
    let row = sqlx::query_as::<_, DbInstalledSoftware>(
        "SELECT id, machine_id, name, version, publisher, install_date, size_bytes, software_ref_id, \
         license_required, license_valid, resolution, block_reason, detected_at, updated_at \
         FROM installed_software WHERE id = ?",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

#[tokio::test]
async fn open_reference_without_records_is_allowed() -> Result<()> {
    let (pool, _dir) = setup().await?;

    let structure = seed_structure(&pool).await?;
    let user = seed_user(&pool, Some(structure), None, None).await?;
    let machine = seed_machine(&pool, Some(user)).await?;
    seed_reference(&pool, "Vendor X Suite", "open").await?;
    let installed = seed_installed(&pool, machine, "Vendor X Suite", "1.0").await?;

    let row = fetch_installed(&pool, installed).await?;
    let outcome = policy::resolve(&pool, &row).await?;
    assert_eq!(outcome, Outcome::Allowed);

    let row = fetch_installed(&pool, installed).await?;
    assert_eq!(row.resolution, "allowed");
    assert_eq!(row.block_reason, "");
    assert!(row.software_ref_id.is_some(), "resolution should persist the catalog link");

    Ok(())
}

#[tokio::test]
async fn structure_denial_blocks_with_admin_reason() -> Result<()> {
    let (pool, _dir) = setup().await?;

    let structure = seed_structure(&pool).await?;
    let user = seed_user(&pool, Some(structure), None, None).await?;
    let machine = seed_machine(&pool, Some(user)).await?;
    let reference = seed_reference(&pool, "Vendor X Suite", "open").await?;
    let installed = seed_installed(&pool, machine, "Vendor X Suite", "1.0").await?;

    seed_record(&pool, reference, "structure", structure, "denied", "licensing cost", None).await?;

    let row = fetch_installed(&pool, installed).await?;
    let outcome = policy::resolve(&pool, &row).await?;
    assert_eq!(outcome, Outcome::blocked("licensing cost"));

    let row = fetch_installed(&pool, installed).await?;
    assert_eq!(row.resolution, "blocked");
    assert_eq!(row.block_reason, "licensing cost");

    Ok(())
}

#[tokio::test]
async fn user_grant_does_not_override_structure_denial() -> Result<()> {
    let (pool, _dir) = setup().await?;

    let structure = seed_structure(&pool).await?;
    let user = seed_user(&pool, Some(structure), None, None).await?;
    let machine = seed_machine(&pool, Some(user)).await?;
    let reference = seed_reference(&pool, "Vendor X Suite", "open").await?;
    let installed = seed_installed(&pool, machine, "Vendor X Suite", "1.0").await?;

    seed_record(&pool, reference, "structure", structure, "denied", "licensing cost", None).await?;
    // Only denied records are scanned for blocking: the personal grant is
    // a documented precedence quirk, not a grant-override mechanism
    seed_record(&pool, reference, "user", user, "granted", "", None).await?;

    let row = fetch_installed(&pool, installed).await?;
    let outcome = policy::resolve(&pool, &row).await?;
    assert!(outcome.is_blocked());
    assert_eq!(outcome.reason(), "licensing cost");

    Ok(())
}

#[tokio::test]
async fn forbidden_reference_overrides_user_grant() -> Result<()> {
    let (pool, _dir) = setup().await?;

    let structure = seed_structure(&pool).await?;
    let user = seed_user(&pool, Some(structure), None, None).await?;
    let machine = seed_machine(&pool, Some(user)).await?;
    let reference = seed_reference(&pool, "Underground Tool", "forbidden").await?;
    let installed = seed_installed(&pool, machine, "Underground Tool", "0.9").await?;

    seed_record(&pool, reference, "user", user, "granted", "", None).await?;

    let row = fetch_installed(&pool, installed).await?;
    let outcome = policy::resolve(&pool, &row).await?;
    assert!(outcome.is_blocked());
    assert_eq!(outcome.reason(), "forbidden by security policy");

    Ok(())
}

#[tokio::test]
async fn user_denial_takes_precedence_over_structure_denial() -> Result<()> {
    let (pool, _dir) = setup().await?;

    let structure = seed_structure(&pool).await?;
    let user = seed_user(&pool, Some(structure), None, None).await?;
    let machine = seed_machine(&pool, Some(user)).await?;
    let reference = seed_reference(&pool, "Vendor X Suite", "open").await?;
    let installed = seed_installed(&pool, machine, "Vendor X Suite", "1.0").await?;

    // Structure-level record created first; the user-level one must still win
    seed_record(&pool, reference, "structure", structure, "denied", "structure-wide", None).await?;
    seed_record(&pool, reference, "user", user, "denied", "personal ban", None).await?;

    let row = fetch_installed(&pool, installed).await?;
    let outcome = policy::resolve(&pool, &row).await?;
    assert_eq!(outcome.reason(), "personal ban");

    Ok(())
}

#[tokio::test]
async fn unassigned_machine_is_never_blocked_by_scope_denials() -> Result<()> {
    let (pool, _dir) = setup().await?;

    let structure = seed_structure(&pool).await?;
    let site = seed_site(&pool, structure).await?;
    let machine = seed_machine(&pool, None).await?;
    let reference = seed_reference(&pool, "Vendor X Suite", "open").await?;
    let installed = seed_installed(&pool, machine, "Vendor X Suite", "1.0").await?;

    seed_record(&pool, reference, "site", site, "denied", "site ban", None).await?;
    seed_record(&pool, reference, "structure", structure, "denied", "structure ban", None).await?;

    let row = fetch_installed(&pool, installed).await?;
    assert_eq!(policy::resolve(&pool, &row).await?, Outcome::Allowed);

    // Global forbidden still applies without an owner
    sqlx::query("UPDATE software_references SET security_level = 'forbidden' WHERE id = ?")
        .bind(reference)
        .execute(&pool)
        .await?;

    let row = fetch_installed(&pool, installed).await?;
    let outcome = policy::resolve(&pool, &row).await?;
    assert_eq!(outcome.reason(), "forbidden by security policy");

    Ok(())
}

#[tokio::test]
async fn expired_denial_still_blocks() -> Result<()> {
    let (pool, _dir) = setup().await?;

    let structure = seed_structure(&pool).await?;
    let user = seed_user(&pool, Some(structure), None, None).await?;
    let machine = seed_machine(&pool, Some(user)).await?;
    let reference = seed_reference(&pool, "Vendor X Suite", "open").await?;
    let installed = seed_installed(&pool, machine, "Vendor X Suite", "1.0").await?;

    // Denial matching ignores the validity window by design
    let past = Utc::now() - Duration::days(30);
    seed_record(&pool, reference, "user", user, "denied", "old ban", Some(past)).await?;

    let row = fetch_installed(&pool, installed).await?;
    let outcome = policy::resolve(&pool, &row).await?;
    assert!(outcome.is_blocked());
    assert_eq!(outcome.reason(), "old ban");

    Ok(())
}

#[tokio::test]
async fn unknown_software_stays_unclassified_and_permitted() -> Result<()> {
    let (pool, _dir) = setup().await?;

    let user = seed_user(&pool, None, None, None).await?;
    let machine = seed_machine(&pool, Some(user)).await?;
    let installed = seed_installed(&pool, machine, "Homegrown Script", "0.1").await?;

    let row = fetch_installed(&pool, installed).await?;
    let outcome = policy::resolve(&pool, &row).await?;
    assert_eq!(outcome, Outcome::Unclassified);
    assert!(outcome.is_permitted());

    let row = fetch_installed(&pool, installed).await?;
    assert_eq!(row.resolution, "unclassified");
    assert!(row.software_ref_id.is_none());

    Ok(())
}

#[tokio::test]
async fn linking_matches_names_case_insensitively() -> Result<()> {
    let (pool, _dir) = setup().await?;

    let user = seed_user(&pool, None, None, None).await?;
    let machine = seed_machine(&pool, Some(user)).await?;
    let reference = seed_reference(&pool, "Vendor X Suite", "open").await?;
    let installed = seed_installed(&pool, machine, "VENDOR X SUITE", "1.0").await?;

    let row = fetch_installed(&pool, installed).await?;
    let outcome = policy::resolve(&pool, &row).await?;
    assert_eq!(outcome, Outcome::Allowed);

    let row = fetch_installed(&pool, installed).await?;
    assert_eq!(row.software_ref_id, Some(reference));

    Ok(())
}

#[tokio::test]
async fn repeated_resolution_writes_only_once() -> Result<()> {
    let (pool, _dir) = setup().await?;

    let structure = seed_structure(&pool).await?;
    let user = seed_user(&pool, Some(structure), None, None).await?;
    let machine = seed_machine(&pool, Some(user)).await?;
    seed_reference(&pool, "Vendor X Suite", "open").await?;
    let installed = seed_installed(&pool, machine, "Vendor X Suite", "1.0").await?;

    let row = fetch_installed(&pool, installed).await?;
    policy::resolve(&pool, &row).await?;

    let after_first = fetch_installed(&pool, installed).await?;
    assert_eq!(after_first.resolution, "allowed");

    // No state changed in between: the second run must be a no-op write
    policy::resolve(&pool, &after_first).await?;
    let after_second = fetch_installed(&pool, installed).await?;
    assert_eq!(after_first.updated_at, after_second.updated_at);

    Ok(())
}

#[tokio::test]
async fn reverify_references_propagates_new_denials() -> Result<()> {
    let (pool, _dir) = setup().await?;

    let structure = seed_structure(&pool).await?;
    let user = seed_user(&pool, Some(structure), None, None).await?;
    let machine = seed_machine(&pool, Some(user)).await?;
    let reference = seed_reference(&pool, "Vendor X Suite", "open").await?;
    let installed = seed_installed(&pool, machine, "Vendor X Suite", "1.0").await?;

    let row = fetch_installed(&pool, installed).await?;
    assert_eq!(policy::resolve(&pool, &row).await?, Outcome::Allowed);

    seed_record(&pool, reference, "structure", structure, "denied", "licensing cost", None).await?;
    let processed = policy::reverify_references(&pool, &[reference]).await?;
    assert_eq!(processed, 1);

    let row = fetch_installed(&pool, installed).await?;
    assert_eq!(row.resolution, "blocked");
    assert_eq!(row.block_reason, "licensing cost");

    Ok(())
}
