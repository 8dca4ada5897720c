use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::AppResult;
use crate::models::authorization::ScopeTarget;

/// The organizational identity a scope check runs against: a machine
/// owner together with the group/structure/site they belong to.
#[derive(Debug, Clone)]
pub struct Subject {
    pub user_id: Uuid,
    pub group_id: Option<Uuid>,
    pub structure_id: Option<Uuid>,
    pub site_id: Option<Uuid>,
}

impl Subject {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            group_id: None,
            structure_id: None,
            site_id: None,
        }
    }

    pub fn with_group(mut self, group_id: Uuid) -> Self {
        self.group_id = Some(group_id);
        self
    }

    pub fn with_structure(mut self, structure_id: Uuid) -> Self {
        self.structure_id = Some(structure_id);
        self
    }

    pub fn with_site(mut self, site_id: Uuid) -> Self {
        self.site_id = Some(site_id);
        self
    }

    /// Load the subject for a user id; None when the user row is gone.
    pub async fn load(pool: &SqlitePool, user_id: Uuid) -> AppResult<Option<Subject>> {
        let row: Option<(Uuid, Option<Uuid>, Option<Uuid>, Option<Uuid>)> = sqlx::query_as(
            "SELECT id, group_id, structure_id, site_id FROM users WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(|(id, group_id, structure_id, site_id)| Subject {
            user_id: id,
            group_id,
            structure_id,
            site_id,
        }))
    }

    pub fn matches(&self, target: &ScopeTarget) -> bool {
        match target {
            ScopeTarget::User(id) => *id == self.user_id,
            ScopeTarget::Group(id) => self.group_id == Some(*id),
            ScopeTarget::Structure(id) => self.structure_id == Some(*id),
            ScopeTarget::Site(id) => self.site_id == Some(*id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_user_scope() {
        let user_id = Uuid::new_v4();
        let subject = Subject::new(user_id);
        assert!(subject.matches(&ScopeTarget::User(user_id)));
        assert!(!subject.matches(&ScopeTarget::User(Uuid::new_v4())));
    }

    #[test]
    fn missing_membership_never_matches() {
        let subject = Subject::new(Uuid::new_v4());
        assert!(!subject.matches(&ScopeTarget::Group(Uuid::new_v4())));
        assert!(!subject.matches(&ScopeTarget::Structure(Uuid::new_v4())));
        assert!(!subject.matches(&ScopeTarget::Site(Uuid::new_v4())));
    }

    #[test]
    fn matches_org_scopes() {
        let group = Uuid::new_v4();
        let structure = Uuid::new_v4();
        let site = Uuid::new_v4();
        let subject = Subject::new(Uuid::new_v4())
            .with_group(group)
            .with_structure(structure)
            .with_site(site);

        assert!(subject.matches(&ScopeTarget::Group(group)));
        assert!(subject.matches(&ScopeTarget::Structure(structure)));
        assert!(subject.matches(&ScopeTarget::Site(site)));
        assert!(!subject.matches(&ScopeTarget::Site(structure)));
    }
}
