use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};

// =============================================================================
// SCOPE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    User,
    Group,
    Structure,
    Site,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::User => "user",
            ScopeKind::Group => "group",
            ScopeKind::Structure => "structure",
            ScopeKind::Site => "site",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw {
            "user" => Ok(ScopeKind::User),
            "group" => Ok(ScopeKind::Group),
            "structure" => Ok(ScopeKind::Structure),
            "site" => Ok(ScopeKind::Site),
            other => Err(AppError::internal(format!("unknown scope kind: {other}"))),
        }
    }
}

/// The one target a record applies to. Exactly one of the four, by
/// construction; there is no "all columns null" state to defend against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeTarget {
    User(Uuid),
    Group(Uuid),
    Structure(Uuid),
    Site(Uuid),
}

impl ScopeTarget {
    pub fn new(kind: ScopeKind, id: Uuid) -> Self {
        match kind {
            ScopeKind::User => ScopeTarget::User(id),
            ScopeKind::Group => ScopeTarget::Group(id),
            ScopeKind::Structure => ScopeTarget::Structure(id),
            ScopeKind::Site => ScopeTarget::Site(id),
        }
    }

    pub fn kind(&self) -> ScopeKind {
        match self {
            ScopeTarget::User(_) => ScopeKind::User,
            ScopeTarget::Group(_) => ScopeKind::Group,
            ScopeTarget::Structure(_) => ScopeKind::Structure,
            ScopeTarget::Site(_) => ScopeKind::Site,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            ScopeTarget::User(id)
            | ScopeTarget::Group(id)
            | ScopeTarget::Structure(id)
            | ScopeTarget::Site(id) => *id,
        }
    }
}

// =============================================================================
// AUTHORIZATION RECORD
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Granted,
    Denied,
    Pending,
    Expired,
}

impl AuthorizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationStatus::Granted => "granted",
            AuthorizationStatus::Denied => "denied",
            AuthorizationStatus::Pending => "pending",
            AuthorizationStatus::Expired => "expired",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw {
            "granted" => Ok(AuthorizationStatus::Granted),
            "denied" => Ok(AuthorizationStatus::Denied),
            "pending" => Ok(AuthorizationStatus::Pending),
            "expired" => Ok(AuthorizationStatus::Expired),
            other => Err(AppError::internal(format!("unknown authorization status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuthorizationRecord {
    pub id: Uuid,
    pub software_ref_id: Uuid,
    pub scope_kind: ScopeKind,
    pub scope_id: Uuid,
    pub status: AuthorizationStatus,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub granted_by: Option<Uuid>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AuthorizationRecord {
    pub fn scope(&self) -> ScopeTarget {
        ScopeTarget::new(self.scope_kind, self.scope_id)
    }

    /// A record is valid only when granted and not past its end date.
    /// Denied/pending/expired records are never valid, whatever the dates.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        if self.status != AuthorizationStatus::Granted {
            return false;
        }
        match self.valid_until {
            Some(until) => now <= until,
            None => true,
        }
    }
}

impl Loggable for AuthorizationRecord {
    fn entity_type() -> &'static str { "authorization_record" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbAuthorizationRecord {
    pub id: Uuid,
    pub software_ref_id: Uuid,
    pub scope_kind: String,
    pub scope_id: Uuid,
    pub status: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub granted_by: Option<Uuid>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbAuthorizationRecord> for AuthorizationRecord {
    type Error = AppError;

    fn try_from(value: DbAuthorizationRecord) -> Result<Self, Self::Error> {
        Ok(AuthorizationRecord {
            id: value.id,
            software_ref_id: value.software_ref_id,
            scope_kind: ScopeKind::parse(&value.scope_kind)?,
            scope_id: value.scope_id,
            status: AuthorizationStatus::parse(&value.status)?,
            valid_from: value.valid_from,
            valid_until: value.valid_until,
            granted_by: value.granted_by,
            reason: value.reason,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

// =============================================================================
// BULK MUTATION REQUESTS
// =============================================================================

/// Reference-set selector: explicit ids and/or every active reference in
/// the given categories. At least one selector must be non-empty.
#[derive(Debug, Deserialize, ToSchema)]
pub struct BulkAuthorizationRequest {
    #[serde(default)]
    pub software_ref_ids: Vec<Uuid>,
    #[serde(default)]
    pub category_ids: Vec<Uuid>,
    pub scope_kind: ScopeKind,
    pub target_ids: Vec<Uuid>,
    pub reason: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ForbidRequest {
    #[serde(default)]
    pub software_ref_ids: Vec<Uuid>,
    #[serde(default)]
    pub category_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BulkMutationResponse {
    /// Records created or updated
    pub mutated: u32,
    /// Installed-software rows re-resolved afterwards
    pub reverified: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(status: AuthorizationStatus, valid_until: Option<DateTime<Utc>>) -> AuthorizationRecord {
        let now = Utc::now();
        AuthorizationRecord {
            id: Uuid::new_v4(),
            software_ref_id: Uuid::new_v4(),
            scope_kind: ScopeKind::User,
            scope_id: Uuid::new_v4(),
            status,
            valid_from: now,
            valid_until,
            granted_by: None,
            reason: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn granted_without_expiry_is_valid() {
        let rec = record(AuthorizationStatus::Granted, None);
        assert!(rec.is_valid_at(Utc::now()));
    }

    #[test]
    fn granted_past_expiry_is_invalid() {
        let rec = record(AuthorizationStatus::Granted, Some(Utc::now() - Duration::days(1)));
        assert!(!rec.is_valid_at(Utc::now()));
    }

    #[test]
    fn denied_is_never_valid_even_with_future_expiry() {
        let rec = record(AuthorizationStatus::Denied, Some(Utc::now() + Duration::days(30)));
        assert!(!rec.is_valid_at(Utc::now()));
    }

    #[test]
    fn scope_target_kind_and_id() {
        let id = Uuid::new_v4();
        let target = ScopeTarget::new(ScopeKind::Structure, id);
        assert_eq!(target.kind(), ScopeKind::Structure);
        assert_eq!(target.id(), id);
    }
}
