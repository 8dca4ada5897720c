use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

pub mod equipment_status {
    pub const AVAILABLE: &str = "available";
    pub const IN_USE: &str = "in_use";
    pub const MAINTENANCE: &str = "maintenance";
    pub const RETIRED: &str = "retired";
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Equipment {
    pub id: Uuid,
    pub name: String,
    pub inventory_number: String,
    pub user_id: Option<Uuid>,
    pub site_id: Option<Uuid>,
    #[schema(example = "in_use")]
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EquipmentCreateRequest {
    #[schema(example = "Laptop Dell 5540")]
    pub name: String,
    #[schema(example = "INV-2024-0042")]
    pub inventory_number: String,
    pub user_id: Option<Uuid>,
    pub site_id: Option<Uuid>,
}

/// Denormalized link: "this equipment's user currently holds this valid
/// authorization". Maintained only by the inventory synchronization job.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct InventoryAuthorization {
    pub id: Uuid,
    pub equipment_id: Uuid,
    pub user_id: Uuid,
    pub authorization_record_id: Uuid,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct InventorySyncRequest {
    pub user_id: Option<Uuid>,
    pub equipment_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InventorySyncResponse {
    pub created: u32,
}
