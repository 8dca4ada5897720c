use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot`
use uuid::Uuid;

use softgate::create_app;

async fn setup() -> Result<(Router, SqlitePool, TempDir)> {
    let dir = tempfile::tempdir().context("failed to create tempdir")?;
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

    // tests run in CI/container; ensure a JWT secret is available
    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool.clone()).await?;

    Ok((app, pool, dir))
}

async fn request(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    payload: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }

    let req = match payload {
        Some(payload) => builder
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let resp = app.clone().oneshot(req).await?;
    let status = resp.status();
    let body_bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes)?
    };

    Ok((status, value))
}

async fn seed_structure(pool: &SqlitePool) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query("INSERT INTO structures (id, name, code, active, created_at, updated_at) VALUES (?, 'ACME', 'acme', 1, ?, ?)")
        .bind(id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
    Ok(id)
}

async fn register_user(app: &Router, email: &str, structure_id: Uuid) -> Result<(String, Uuid)> {
    let (status, body) = request(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({
            "name": "Test User",
            "email": email,
            "password": "password123",
            "structure_id": structure_id
        })),
    )
    .await?;
    if status != StatusCode::CREATED {
        panic!("register failed: {} - {}", status, body);
    }

    let token = body
        .get("token")
        .and_then(|v| v.as_str())
        .context("missing token")?
        .to_string();
    let user_id = body
        .get("user")
        .and_then(|u| u.get("id"))
        .and_then(|v| v.as_str())
        .context("missing user id")?
        .parse()?;

    Ok((token, user_id))
}

#[tokio::test]
async fn full_policy_flow() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let structure_id = seed_structure(&pool).await?;

    // -- register and promote to admin
    let (token, user_id) = register_user(&app, "admin@example.com", structure_id).await?;
    sqlx::query("UPDATE users SET role = 'admin' WHERE id = ?")
        .bind(user_id)
        .execute(&pool)
        .await?;

    // -- register a machine
    let (status, machine) = request(
        &app,
        "POST",
        "/machines",
        Some(&token),
        Some(json!({"name": "WKS-0001"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "machine create failed: {}", machine);
    let machine_id = machine.get("id").and_then(|v| v.as_str()).context("missing machine id")?.to_string();

    // -- agent reports its inventory
    let inventory = json!({
        "software": [
            {"name": "Vendor X Suite", "version": "2.4.1", "publisher": "Vendor X"},
            {"name": "Open Imaging Tool", "version": "1.0.0", "publisher": ""}
        ]
    });
    let (status, report) = request(
        &app,
        "POST",
        &format!("/machines/{}/inventory", machine_id),
        Some(&token),
        Some(inventory.clone()),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "inventory report failed: {}", report);
    assert_eq!(report.get("received").and_then(Value::as_u64), Some(2));
    assert_eq!(report.get("blocked").and_then(Value::as_u64), Some(0));

    // Nothing referenced yet: everything is unclassified and permitted
    let (_, software) = request(
        &app,
        "GET",
        &format!("/machines/{}/software", machine_id),
        Some(&token),
        None,
    )
    .await?;
    let rows = software.as_array().context("software list")?;
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.get("resolution").and_then(Value::as_str) == Some("unclassified")));

    // -- populate the catalog from observations
    let (status, sync_report) = request(&app, "POST", "/catalog/sync", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sync_report.get("created").and_then(Value::as_u64), Some(2));

    // Agents re-sync; rows now link to the catalog and resolve to allowed
    let (status, _) = request(
        &app,
        "POST",
        &format!("/machines/{}/inventory", machine_id),
        Some(&token),
        Some(inventory),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let (_, catalog) = request(&app, "GET", "/catalog", Some(&token), None).await?;
    let references = catalog.as_array().context("catalog list")?;
    let vendor_ref = references
        .iter()
        .find(|r| r.get("name").and_then(Value::as_str) == Some("Vendor X Suite"))
        .context("Vendor X Suite reference")?;
    let imaging_ref = references
        .iter()
        .find(|r| r.get("name").and_then(Value::as_str) == Some("Open Imaging Tool"))
        .context("Open Imaging Tool reference")?;
    let vendor_ref_id = vendor_ref.get("id").and_then(Value::as_str).context("ref id")?;
    let imaging_ref_id = imaging_ref.get("id").and_then(Value::as_str).context("ref id")?;

    // -- deny Vendor X Suite for the whole structure
    let (status, mutation) = request(
        &app,
        "POST",
        "/authorizations/bulk-deny",
        Some(&token),
        Some(json!({
            "software_ref_ids": [vendor_ref_id],
            "scope_kind": "structure",
            "target_ids": [structure_id],
            "reason": "licensing cost"
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "bulk deny failed: {}", mutation);
    assert_eq!(mutation.get("mutated").and_then(Value::as_u64), Some(1));
    assert_eq!(mutation.get("reverified").and_then(Value::as_u64), Some(1));

    // Policy change propagated to the cached outcomes
    let (_, blocked) = request(&app, "GET", "/software/blocked", Some(&token), None).await?;
    let blocked_rows = blocked.as_array().context("blocked list")?;
    assert_eq!(blocked_rows.len(), 1);
    assert_eq!(
        blocked_rows[0].get("name").and_then(Value::as_str),
        Some("Vendor X Suite")
    );
    assert_eq!(
        blocked_rows[0].get("block_reason").and_then(Value::as_str),
        Some("licensing cost")
    );

    // Re-running the same denial is an upsert, not a duplicate
    let (status, _) = request(
        &app,
        "POST",
        "/authorizations/bulk-deny",
        Some(&token),
        Some(json!({
            "software_ref_ids": [vendor_ref_id],
            "scope_kind": "structure",
            "target_ids": [structure_id],
            "reason": "licensing cost"
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let (_, records) = request(
        &app,
        "GET",
        &format!("/authorizations?software_ref_id={}", vendor_ref_id),
        Some(&token),
        None,
    )
    .await?;
    assert_eq!(records.as_array().map(Vec::len), Some(1));

    // -- mark the other title forbidden
    let (status, forbid) = request(
        &app,
        "POST",
        "/catalog/forbid",
        Some(&token),
        Some(json!({"software_ref_ids": [imaging_ref_id]})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(forbid.get("mutated").and_then(Value::as_u64), Some(1));

    let (_, blocked) = request(&app, "GET", "/software/blocked", Some(&token), None).await?;
    let blocked_rows = blocked.as_array().context("blocked list")?;
    assert_eq!(blocked_rows.len(), 2);
    let imaging_row = blocked_rows
        .iter()
        .find(|r| r.get("name").and_then(Value::as_str) == Some("Open Imaging Tool"))
        .context("imaging row")?;
    assert_eq!(
        imaging_row.get("block_reason").and_then(Value::as_str),
        Some("forbidden by security policy")
    );

    Ok(())
}

#[tokio::test]
async fn policy_mutation_requires_admin_role() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let structure_id = seed_structure(&pool).await?;

    let (token, _user_id) = register_user(&app, "user@example.com", structure_id).await?;

    let (status, _) = request(
        &app,
        "POST",
        "/authorizations/bulk-deny",
        Some(&token),
        Some(json!({
            "software_ref_ids": [Uuid::new_v4()],
            "scope_kind": "user",
            "target_ids": [Uuid::new_v4()],
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request(&app, "POST", "/catalog/sync", Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn endpoints_require_bearer_token() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let (status, _) = request(&app, "GET", "/machines", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = request(&app, "GET", "/software/blocked", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn inventory_report_rejects_malformed_payload_with_path() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let structure_id = seed_structure(&pool).await?;
    let (token, _) = register_user(&app, "agent@example.com", structure_id).await?;

    let (status, machine) = request(
        &app,
        "POST",
        "/machines",
        Some(&token),
        Some(json!({"name": "WKS-0002"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let machine_id = machine.get("id").and_then(Value::as_str).context("machine id")?.to_string();

    // `software` must be an array of objects
    let (status, error) = request(
        &app,
        "POST",
        &format!("/machines/{}/inventory", machine_id),
        Some(&token),
        Some(json!({"software": [{"name": 42}]})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let message = error.get("message").and_then(Value::as_str).unwrap_or_default();
    assert!(message.contains("software"), "error should name the offending path: {}", message);

    Ok(())
}
