use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

// =============================================================================
// STRUCTURE (company / organizational unit)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Structure {
    pub id: Uuid,
    pub name: String,
    /// Short code used in usernames and reports
    #[schema(example = "acme")]
    pub code: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StructureCreateRequest {
    #[schema(example = "ACME Industries")]
    pub name: String,
    #[schema(example = "acme")]
    pub code: String,
}

// =============================================================================
// GROUP
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub structure_id: Uuid,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GroupCreateRequest {
    #[schema(example = "Accounting")]
    pub name: String,
    pub structure_id: Uuid,
}

// =============================================================================
// SITE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Site {
    pub id: Uuid,
    pub name: String,
    pub structure_id: Uuid,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SiteCreateRequest {
    #[schema(example = "Paris HQ")]
    pub name: String,
    pub structure_id: Uuid,
}
