use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::AppResult;
use crate::models::authorization::{AuthorizationRecord, DbAuthorizationRecord, ScopeKind};
use crate::models::catalog::SecurityLevel;
use crate::models::machine::DbInstalledSoftware;
use crate::utils::utc_now;

use super::subject::Subject;
use super::{Outcome, DEFAULT_DENIAL_REASON, FORBIDDEN_REASON};

#[derive(Debug, Clone, Copy, Default)]
pub struct ReverifySummary {
    pub processed: u32,
    pub blocked: u32,
}

/// Compute and cache the authorization outcome of one installed-software
/// row.
///
/// Order of evaluation: link to the catalog by case-insensitive name if
/// the row has no reference yet; a `forbidden` security level blocks
/// before any per-scope record is considered; otherwise the first denial
/// record matching the machine owner in user > group > structure > site
/// order blocks. Denial matching is on status alone: an expired denial
/// still blocks, unlike grant matching in the inventory sync.
pub async fn resolve(pool: &SqlitePool, installed: &DbInstalledSoftware) -> AppResult<Outcome> {
    let software_ref_id = match installed.software_ref_id {
        Some(id) => Some(id),
        None => link_reference(pool, installed).await?,
    };

    let Some(software_ref_id) = software_ref_id else {
        // Not in the catalog: stays permitted, just not classified.
        let outcome = Outcome::Unclassified;
        persist_outcome(pool, installed, &outcome).await?;
        tracing::debug!(software = %installed.name, "no catalog match, left unclassified");
        return Ok(outcome);
    };

    let security_level: Option<String> =
        sqlx::query_scalar("SELECT security_level FROM software_references WHERE id = ?")
            .bind(software_ref_id)
            .fetch_optional(pool)
            .await?;

    let Some(security_level) = security_level else {
        // Dangling reference id; treat like an unlinked row.
        let outcome = Outcome::Unclassified;
        persist_outcome(pool, installed, &outcome).await?;
        return Ok(outcome);
    };

    if SecurityLevel::parse(&security_level)? == SecurityLevel::Forbidden {
        // Short-circuits every per-scope check; a per-user grant cannot
        // override a forbidden reference.
        let outcome = Outcome::blocked(FORBIDDEN_REASON);
        persist_outcome(pool, installed, &outcome).await?;
        return Ok(outcome);
    }

    let owner = machine_owner(pool, installed.machine_id).await?;
    let subject = match owner {
        Some(user_id) => Subject::load(pool, user_id).await?,
        // Unassigned machine: no scope denial can apply.
        None => None,
    };

    let outcome = match subject {
        None => Outcome::Allowed,
        Some(subject) => {
            let denials = fetch_denials(pool, software_ref_id).await?;
            match first_matching_denial(&denials, &subject) {
                Some(record) => {
                    let reason = if record.reason.trim().is_empty() {
                        DEFAULT_DENIAL_REASON.to_string()
                    } else {
                        record.reason.clone()
                    };
                    Outcome::Blocked { reason }
                }
                None => Outcome::Allowed,
            }
        }
    };

    persist_outcome(pool, installed, &outcome).await?;
    Ok(outcome)
}

/// Re-resolve every row of one machine, typically right after an agent
/// inventory report.
pub async fn reverify_machine(pool: &SqlitePool, machine_id: Uuid) -> AppResult<ReverifySummary> {
    let rows = sqlx::query_as::<_, DbInstalledSoftware>(
        "SELECT id, machine_id, name, version, publisher, install_date, size_bytes, software_ref_id, \
         license_required, license_valid, resolution, block_reason, detected_at, updated_at \
         FROM installed_software WHERE machine_id = ?",
    )
    .bind(machine_id)
    .fetch_all(pool)
    .await?;

    let mut summary = ReverifySummary::default();
    for row in &rows {
        let outcome = resolve(pool, row).await?;
        summary.processed += 1;
        if outcome.is_blocked() {
            summary.blocked += 1;
        }
    }

    Ok(summary)
}

/// Re-resolve every installed row linked to the given references. This is
/// the propagation path for bulk grants/denials and security-level
/// changes: callers invoke it synchronously after mutating records.
pub async fn reverify_references(pool: &SqlitePool, software_ref_ids: &[Uuid]) -> AppResult<u32> {
    if software_ref_ids.is_empty() {
        return Ok(0);
    }

    let placeholders = std::iter::repeat("?")
        .take(software_ref_ids.len())
        .collect::<Vec<_>>()
        .join(",");
    let sql = format!(
        "SELECT id, machine_id, name, version, publisher, install_date, size_bytes, software_ref_id, \
         license_required, license_valid, resolution, block_reason, detected_at, updated_at \
         FROM installed_software WHERE software_ref_id IN ({})",
        placeholders
    );

    let mut query = sqlx::query_as::<_, DbInstalledSoftware>(&sql);
    for id in software_ref_ids {
        query = query.bind(id);
    }

    let rows = query.fetch_all(pool).await?;

    let mut processed = 0u32;
    for row in &rows {
        resolve(pool, row).await?;
        processed += 1;
    }

    tracing::debug!(references = software_ref_ids.len(), processed, "re-resolved installed software");
    Ok(processed)
}

/// Re-resolve unlinked rows carrying a given name, picking up a catalog
/// entry that was just created for software machines already reported.
pub async fn reverify_unlinked_by_name(pool: &SqlitePool, name: &str) -> AppResult<u32> {
    let rows = sqlx::query_as::<_, DbInstalledSoftware>(
        "SELECT id, machine_id, name, version, publisher, install_date, size_bytes, software_ref_id, \
         license_required, license_valid, resolution, block_reason, detected_at, updated_at \
         FROM installed_software WHERE software_ref_id IS NULL AND name = ? COLLATE NOCASE",
    )
    .bind(name)
    .fetch_all(pool)
    .await?;

    let mut processed = 0u32;
    for row in &rows {
        resolve(pool, row).await?;
        processed += 1;
    }

    Ok(processed)
}

/// Try to attach an unlinked row to the catalog by case-insensitive exact
/// name. Persists the link when a match exists.
async fn link_reference(pool: &SqlitePool, installed: &DbInstalledSoftware) -> AppResult<Option<Uuid>> {
    let matched: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM software_references WHERE name = ? COLLATE NOCASE")
            .bind(&installed.name)
            .fetch_optional(pool)
            .await?;

    if let Some(ref_id) = matched {
        sqlx::query("UPDATE installed_software SET software_ref_id = ? WHERE id = ?")
            .bind(ref_id)
            .bind(installed.id)
            .execute(pool)
            .await?;
    }

    Ok(matched)
}

async fn machine_owner(pool: &SqlitePool, machine_id: Uuid) -> AppResult<Option<Uuid>> {
    let owner: Option<Option<Uuid>> = sqlx::query_scalar("SELECT user_id FROM machines WHERE id = ?")
        .bind(machine_id)
        .fetch_optional(pool)
        .await?;

    Ok(owner.flatten())
}

/// Only the status is filtered here: the validity window of a denial is
/// intentionally ignored, mirroring how grants and denials are matched
/// asymmetrically throughout the suite.
async fn fetch_denials(pool: &SqlitePool, software_ref_id: Uuid) -> AppResult<Vec<AuthorizationRecord>> {
    let rows = sqlx::query_as::<_, DbAuthorizationRecord>(
        "SELECT id, software_ref_id, scope_kind, scope_id, status, valid_from, valid_until, \
         granted_by, reason, created_at, updated_at \
         FROM authorization_records WHERE software_ref_id = ? AND status = 'denied' \
         ORDER BY created_at ASC",
    )
    .bind(software_ref_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(AuthorizationRecord::try_from).collect()
}

/// Fixed precedence: a user-scoped denial beats a group-scoped one, which
/// beats structure, which beats site. Declaration order, not specificity
/// scoring.
fn first_matching_denial<'a>(
    records: &'a [AuthorizationRecord],
    subject: &Subject,
) -> Option<&'a AuthorizationRecord> {
    for kind in [ScopeKind::User, ScopeKind::Group, ScopeKind::Structure, ScopeKind::Site] {
        if let Some(record) = records
            .iter()
            .find(|record| record.scope_kind == kind && subject.matches(&record.scope()))
        {
            return Some(record);
        }
    }
    None
}

/// Write the outcome back only when it differs from the stored one. This
/// guard is load-bearing: resolution is invoked from write paths, and an
/// unconditional save here would re-trigger those paths forever.
async fn persist_outcome(
    pool: &SqlitePool,
    installed: &DbInstalledSoftware,
    outcome: &Outcome,
) -> AppResult<bool> {
    let stored = Outcome::from_parts(&installed.resolution, &installed.block_reason);
    if stored == *outcome {
        return Ok(false);
    }

    sqlx::query("UPDATE installed_software SET resolution = ?, block_reason = ?, updated_at = ? WHERE id = ?")
        .bind(outcome.state_str())
        .bind(outcome.reason())
        .bind(utc_now())
        .bind(installed.id)
        .execute(pool)
        .await?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::authorization::{AuthorizationStatus, ScopeTarget};
    use chrono::Utc;

    fn denial(scope: ScopeTarget, reason: &str) -> AuthorizationRecord {
        let now = Utc::now();
        AuthorizationRecord {
            id: Uuid::new_v4(),
            software_ref_id: Uuid::new_v4(),
            scope_kind: scope.kind(),
            scope_id: scope.id(),
            status: AuthorizationStatus::Denied,
            valid_from: now,
            valid_until: None,
            granted_by: None,
            reason: reason.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn user_denial_beats_structure_denial() {
        let user_id = Uuid::new_v4();
        let structure_id = Uuid::new_v4();
        let subject = Subject::new(user_id).with_structure(structure_id);

        // structure record listed first: precedence is by scope kind, not
        // record order
        let records = vec![
            denial(ScopeTarget::Structure(structure_id), "structure-wide"),
            denial(ScopeTarget::User(user_id), "personal"),
        ];

        let hit = first_matching_denial(&records, &subject).unwrap();
        assert_eq!(hit.reason, "personal");
    }

    #[test]
    fn group_beats_structure_and_site() {
        let group_id = Uuid::new_v4();
        let structure_id = Uuid::new_v4();
        let site_id = Uuid::new_v4();
        let subject = Subject::new(Uuid::new_v4())
            .with_group(group_id)
            .with_structure(structure_id)
            .with_site(site_id);

        let records = vec![
            denial(ScopeTarget::Site(site_id), "site"),
            denial(ScopeTarget::Structure(structure_id), "structure"),
            denial(ScopeTarget::Group(group_id), "group"),
        ];

        let hit = first_matching_denial(&records, &subject).unwrap();
        assert_eq!(hit.reason, "group");
    }

    #[test]
    fn unrelated_denials_do_not_match() {
        let subject = Subject::new(Uuid::new_v4()).with_structure(Uuid::new_v4());
        let records = vec![
            denial(ScopeTarget::User(Uuid::new_v4()), "someone else"),
            denial(ScopeTarget::Structure(Uuid::new_v4()), "other structure"),
        ];
        assert!(first_matching_denial(&records, &subject).is_none());
    }
}
