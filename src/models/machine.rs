use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};

pub mod machine_status {
    pub const ACTIVE: &str = "active";
    pub const INACTIVE: &str = "inactive";
    pub const MAINTENANCE: &str = "maintenance";
    pub const RETIRED: &str = "retired";
}

// =============================================================================
// MACHINE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Machine {
    pub id: Uuid,
    pub name: String,
    pub serial_number: Option<String>,
    /// Assigned owner; machines may be unassigned
    pub user_id: Option<Uuid>,
    pub structure_id: Option<Uuid>,
    pub site_id: Option<Uuid>,
    #[schema(example = "active")]
    pub status: String,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Machine {
    fn entity_type() -> &'static str { "machine" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbMachine {
    pub id: Uuid,
    pub name: String,
    pub serial_number: Option<String>,
    pub user_id: Option<Uuid>,
    pub structure_id: Option<Uuid>,
    pub site_id: Option<Uuid>,
    pub status: String,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbMachine> for Machine {
    type Error = AppError;

    fn try_from(value: DbMachine) -> Result<Self, Self::Error> {
        Ok(Machine {
            id: value.id,
            name: value.name,
            serial_number: value.serial_number,
            user_id: value.user_id,
            structure_id: value.structure_id,
            site_id: value.site_id,
            status: value.status,
            last_sync_at: value.last_sync_at,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MachineCreateRequest {
    #[schema(example = "WKS-0042")]
    pub name: String,
    pub serial_number: Option<String>,
    pub structure_id: Option<Uuid>,
    pub site_id: Option<Uuid>,
}

// =============================================================================
// INSTALLED SOFTWARE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InstalledSoftware {
    pub id: Uuid,
    pub machine_id: Uuid,
    pub name: String,
    pub version: String,
    pub publisher: String,
    pub install_date: Option<DateTime<Utc>>,
    pub size_bytes: Option<i64>,
    pub software_ref_id: Option<Uuid>,
    pub license_required: bool,
    pub license_valid: bool,
    /// Cached engine outcome: "allowed", "blocked" or "unclassified"
    #[schema(example = "allowed")]
    pub resolution: String,
    /// Always non-empty when resolution is "blocked"
    pub block_reason: String,
    pub detected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for InstalledSoftware {
    fn entity_type() -> &'static str { "installed_software" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Noise }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbInstalledSoftware {
    pub id: Uuid,
    pub machine_id: Uuid,
    pub name: String,
    pub version: String,
    pub publisher: String,
    pub install_date: Option<DateTime<Utc>>,
    pub size_bytes: Option<i64>,
    pub software_ref_id: Option<Uuid>,
    pub license_required: bool,
    pub license_valid: bool,
    pub resolution: String,
    pub block_reason: String,
    pub detected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbInstalledSoftware> for InstalledSoftware {
    type Error = AppError;

    fn try_from(value: DbInstalledSoftware) -> Result<Self, Self::Error> {
        Ok(InstalledSoftware {
            id: value.id,
            machine_id: value.machine_id,
            name: value.name,
            version: value.version,
            publisher: value.publisher,
            install_date: value.install_date,
            size_bytes: value.size_bytes,
            software_ref_id: value.software_ref_id,
            license_required: value.license_required,
            license_valid: value.license_valid,
            resolution: value.resolution,
            block_reason: value.block_reason,
            detected_at: value.detected_at,
            updated_at: value.updated_at,
        })
    }
}

// =============================================================================
// AGENT INVENTORY REPORT
// =============================================================================

/// One detected installation as submitted by a machine agent.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SoftwareReportEntry {
    #[schema(example = "Vendor X Suite")]
    pub name: String,
    #[serde(default)]
    #[schema(example = "2.4.1")]
    pub version: String,
    #[serde(default)]
    pub publisher: String,
    pub install_date: Option<DateTime<Utc>>,
    pub size_bytes: Option<i64>,
    #[serde(default)]
    pub license_required: bool,
}

/// Full replacement set for one machine; prior rows are dropped.
#[derive(Debug, Deserialize, ToSchema)]
pub struct InventoryReportRequest {
    pub software: Vec<SoftwareReportEntry>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InventoryReportResponse {
    pub received: u32,
    pub blocked: u32,
}
