use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::models;
use crate::routes::health::HealthResponse;

#[derive(OpenApi)]
#[openapi(
    components(
        schemas(
            models::user::User,
            models::user::AuthResponse,
            models::user::LoginRequest,
            models::user::RegisterRequest,
            models::org::Structure,
            models::org::StructureCreateRequest,
            models::org::Group,
            models::org::GroupCreateRequest,
            models::org::Site,
            models::org::SiteCreateRequest,
            models::machine::Machine,
            models::machine::MachineCreateRequest,
            models::machine::InstalledSoftware,
            models::machine::SoftwareReportEntry,
            models::machine::InventoryReportRequest,
            models::machine::InventoryReportResponse,
            models::catalog::SecurityLevel,
            models::catalog::SoftwareReference,
            models::catalog::SoftwareReferenceCreateRequest,
            models::catalog::SoftwareReferenceUpdateRequest,
            models::catalog::SoftwareCategory,
            models::catalog::SoftwareCategoryCreateRequest,
            models::catalog::CatalogSyncReport,
            models::catalog::CatalogSyncOneRequest,
            models::authorization::ScopeKind,
            models::authorization::AuthorizationStatus,
            models::authorization::AuthorizationRecord,
            models::authorization::BulkAuthorizationRequest,
            models::authorization::ForbidRequest,
            models::authorization::BulkMutationResponse,
            models::inventory::Equipment,
            models::inventory::EquipmentCreateRequest,
            models::inventory::InventoryAuthorization,
            models::inventory::InventorySyncRequest,
            models::inventory::InventorySyncResponse,
            HealthResponse
        )
    ),
    tags(
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Machines", description = "Machine fleet and installed-software registry"),
        (name = "Catalog", description = "Software reference catalog"),
        (name = "Authorizations", description = "Authorization records and bulk policy mutation"),
        (name = "Inventory", description = "Equipment inventory and authorization links"),
        (name = "Organization", description = "Structures, groups and sites"),
        (name = "Health", description = "Service health")
    )
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
    let mut doc = serde_json::to_value(&ApiDoc::openapi())?;

    normalize_path_operations(&mut doc);
    ensure_security_components(&mut doc);
    ensure_global_security(&mut doc);
    ensure_openapi_version(&mut doc);
    add_examples(&mut doc);
    ensure_servers(&mut doc, port);

    Ok(serde_json::from_value(doc)?)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> Router {
    let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
        .try_it_out_enabled(true)
        .with_credentials(true)
        .persist_authorization(true);

    let doc_json = Arc::new(serde_json::to_value(&doc).expect("OpenAPI serialization must succeed"));

    let json_route = {
        let doc_json = Arc::clone(&doc_json);
        get(move || {
            let doc_json = Arc::clone(&doc_json);
            async move { Json((*doc_json).clone()) }
        })
    };

    Router::new()
        .route("/api-docs/openapi.json", json_route)
        .merge(SwaggerUi::new("/docs").config(swagger_config))
}

/// Lowercase and merge duplicate method keys per path; duplicated mapping
/// keys break Swagger's parser.
fn normalize_path_operations(doc: &mut Value) {
    if let Some(paths) = doc.get_mut("paths").and_then(Value::as_object_mut) {
        let snapshot = paths.clone();
        for (path, item) in snapshot {
            if let Some(ops) = item.as_object() {
                let mut normalized = Map::new();
                for (method, val) in ops {
                    let key = method.to_lowercase();
                    if let Some(existing) = normalized.get_mut(&key) {
                        merge_values(existing, val);
                    } else {
                        normalized.insert(key, val.clone());
                    }
                }
                paths.insert(path, Value::Object(normalized));
            }
        }
    }
}

fn ensure_security_components(doc: &mut Value) {
    let components = doc
        .as_object_mut()
        .expect("OpenAPI root must be an object")
        .entry("components")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .expect("components must be an object");

    let schemes = components
        .entry("securitySchemes")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .expect("securitySchemes must be an object");

    schemes.insert(
        "bearerAuth".to_string(),
        json!({
            "type": "http",
            "scheme": "bearer",
            "bearerFormat": "JWT"
        }),
    );
}

fn ensure_global_security(doc: &mut Value) {
    doc.as_object_mut()
        .expect("OpenAPI root must be an object")
        .entry("security")
        .or_insert_with(|| json!([{ "bearerAuth": [] }]));
}

fn ensure_openapi_version(doc: &mut Value) {
    doc.as_object_mut()
        .expect("OpenAPI root must be an object")
        .entry("openapi")
        .or_insert_with(|| Value::String("3.1.0".to_string()));
}

fn add_examples(doc: &mut Value) {
    if let Some(paths) = doc.get_mut("paths").and_then(Value::as_object_mut) {
        for item in paths.values_mut() {
            if let Some(operations) = item.as_object_mut() {
                for operation in operations.values_mut() {
                    apply_parameter_examples(operation);
                    apply_request_examples(operation);
                }
            }
        }
    }
}

fn apply_parameter_examples(operation: &mut Value) {
    if let Some(parameters) = operation.get_mut("parameters").and_then(Value::as_array_mut) {
        for parameter in parameters.iter_mut() {
            if let Some(name) = parameter.get("name").and_then(Value::as_str) {
                if name == "id" || name == "software_ref_id" {
                    if let Some(obj) = parameter.as_object_mut() {
                        obj.entry("example")
                            .or_insert_with(|| json!("00000000-0000-0000-0000-000000000000"));
                    }
                }
            }
        }
    }
}

fn apply_request_examples(operation: &mut Value) {
    let Some(request_body) = operation.get_mut("requestBody") else { return };
    let Some(content) = request_body.get_mut("content").and_then(Value::as_object_mut) else { return };
    let Some(app_json) = content.get_mut("application/json").and_then(Value::as_object_mut) else { return };
    let Some(schema) = app_json.get("schema").and_then(Value::as_object) else { return };
    let Some(reference) = schema.get("$ref").and_then(Value::as_str) else { return };

    let example = match reference {
        "#/components/schemas/LoginRequest" => Some(json!({
            "email": "ada@example.com",
            "password": "S3cureP@ssw0rd"
        })),
        "#/components/schemas/RegisterRequest" => Some(json!({
            "name": "Ada Lovelace",
            "email": "ada@example.com",
            "password": "S3cureP@ssw0rd"
        })),
        "#/components/schemas/MachineCreateRequest" => Some(json!({
            "name": "WKS-0042",
            "serial_number": "SN-93A7F2"
        })),
        "#/components/schemas/InventoryReportRequest" => Some(json!({
            "software": [
                {"name": "Vendor X Suite", "version": "2.4.1", "publisher": "Vendor X"},
                {"name": "Open Imaging Tool", "version": "1.0.0", "publisher": ""}
            ]
        })),
        "#/components/schemas/SoftwareReferenceCreateRequest" => Some(json!({
            "name": "Vendor X Suite",
            "publisher": "Vendor X",
            "security_level": "controlled"
        })),
        "#/components/schemas/BulkAuthorizationRequest" => Some(json!({
            "software_ref_ids": ["00000000-0000-0000-0000-000000000000"],
            "scope_kind": "structure",
            "target_ids": ["11111111-1111-1111-1111-111111111111"],
            "reason": "licensing cost"
        })),
        "#/components/schemas/CatalogSyncOneRequest" => Some(json!({
            "name": "Vendor X Suite"
        })),
        _ => None,
    };

    if let Some(example) = example {
        app_json.insert("example".to_string(), example);
    }
}

fn ensure_servers(doc: &mut Value, port: u16) {
    // If CERT_PATH+KEY_PATH are provided the server binds TLS; prefer
    // https so Swagger Try-it-out calls the backend over TLS.
    let tls_enabled = std::env::var("CERT_PATH").is_ok() && std::env::var("KEY_PATH").is_ok();

    let scheme = if tls_enabled { "https" } else { "http" };
    let server_url = format!("{}://localhost:{}", scheme, port);

    match doc.get_mut("servers") {
        Some(Value::Array(arr)) => {
            let has = arr
                .iter()
                .any(|v| v.get("url").and_then(Value::as_str) == Some(server_url.as_str()));
            if !has {
                arr.push(json!({ "url": server_url }));
            }
        }
        _ => {
            doc["servers"] = json!([{ "url": server_url }]);
        }
    }
}

fn merge_values(target: &mut Value, addition: &Value) {
    match (target, addition) {
        (Value::Object(dest), Value::Object(src)) => {
            for (key, value) in src {
                if let Some(existing) = dest.get_mut(key) {
                    merge_values(existing, value);
                } else {
                    dest.insert(key.clone(), value.clone());
                }
            }
        }
        (Value::Array(dest), Value::Array(src)) => {
            for item in src {
                if !dest.contains(item) {
                    dest.push(item.clone());
                }
            }
        }
        _ => {}
    }
}
