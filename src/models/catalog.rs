use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};
use crate::utils::parse_version_list;

/// Security classification of a catalog entry. Only `Forbidden` blocks
/// unconditionally; the other levels defer to authorization records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Open,
    Controlled,
    Restricted,
    Forbidden,
}

impl SecurityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityLevel::Open => "open",
            SecurityLevel::Controlled => "controlled",
            SecurityLevel::Restricted => "restricted",
            SecurityLevel::Forbidden => "forbidden",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw {
            "open" => Ok(SecurityLevel::Open),
            "controlled" => Ok(SecurityLevel::Controlled),
            "restricted" => Ok(SecurityLevel::Restricted),
            "forbidden" => Ok(SecurityLevel::Forbidden),
            other => Err(AppError::internal(format!("unknown security level: {other}"))),
        }
    }
}

// =============================================================================
// SOFTWARE REFERENCE (canonical catalog entry)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SoftwareReference {
    pub id: Uuid,
    /// Unique, matched case-insensitively against detected software names
    pub name: String,
    pub publisher: String,
    pub description: String,
    pub category_id: Option<Uuid>,
    pub security_level: SecurityLevel,
    pub allowed_versions: Vec<String>,
    pub forbidden_versions: Vec<String>,
    pub license_required: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for SoftwareReference {
    fn entity_type() -> &'static str { "software_reference" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbSoftwareReference {
    pub id: Uuid,
    pub name: String,
    pub publisher: String,
    pub description: String,
    pub category_id: Option<Uuid>,
    pub security_level: String,
    pub allowed_versions: String,
    pub forbidden_versions: String,
    pub license_required: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbSoftwareReference> for SoftwareReference {
    type Error = AppError;

    fn try_from(value: DbSoftwareReference) -> Result<Self, Self::Error> {
        Ok(SoftwareReference {
            id: value.id,
            name: value.name,
            publisher: value.publisher,
            description: value.description,
            category_id: value.category_id,
            security_level: SecurityLevel::parse(&value.security_level)?,
            allowed_versions: parse_version_list(&value.allowed_versions),
            forbidden_versions: parse_version_list(&value.forbidden_versions),
            license_required: value.license_required,
            active: value.active,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SoftwareReferenceCreateRequest {
    #[schema(example = "Vendor X Suite")]
    pub name: String,
    #[schema(example = "Vendor X")]
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    #[schema(example = "open")]
    pub security_level: Option<SecurityLevel>,
    pub allowed_versions: Option<Vec<String>>,
    pub forbidden_versions: Option<Vec<String>>,
    pub license_required: Option<bool>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SoftwareReferenceUpdateRequest {
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    pub security_level: Option<SecurityLevel>,
    pub allowed_versions: Option<Vec<String>>,
    pub forbidden_versions: Option<Vec<String>>,
    pub license_required: Option<bool>,
    pub active: Option<bool>,
}

// =============================================================================
// SOFTWARE CATEGORY
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct SoftwareCategory {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SoftwareCategoryCreateRequest {
    #[schema(example = "Development tools")]
    pub name: String,
    pub description: Option<String>,
}

// =============================================================================
// CATALOG SYNC
// =============================================================================

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CatalogSyncReport {
    pub created: u32,
    pub updated: u32,
    pub total_processed: u32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CatalogSyncOneRequest {
    #[schema(example = "Vendor X Suite")]
    pub name: String,
    pub publisher: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_level_roundtrip() {
        for level in [
            SecurityLevel::Open,
            SecurityLevel::Controlled,
            SecurityLevel::Restricted,
            SecurityLevel::Forbidden,
        ] {
            assert_eq!(SecurityLevel::parse(level.as_str()).unwrap(), level);
        }
    }

    #[test]
    fn security_level_rejects_unknown() {
        assert!(SecurityLevel::parse("banned").is_err());
    }
}
