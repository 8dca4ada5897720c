pub mod auth;
pub mod authorizations;
pub mod catalog;
pub mod health;
pub mod inventory;
pub mod machines;
pub mod org;

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::user::{roles, DbUser};

/// Admin gate shared by the policy-mutation and org-management routes.
pub(crate) async fn ensure_admin(pool: &SqlitePool, user_id: Uuid) -> AppResult<DbUser> {
    let user = auth::fetch_user_by_id(pool, user_id).await?;
    if user.role != roles::ADMIN {
        return Err(AppError::forbidden("administrator role required"));
    }
    Ok(user)
}

/// Technicians (and admins) may look at machines they do not own.
pub(crate) async fn ensure_technician(pool: &SqlitePool, user_id: Uuid) -> AppResult<DbUser> {
    let user = auth::fetch_user_by_id(pool, user_id).await?;
    if user.role != roles::ADMIN && user.role != roles::TECHNICIAN {
        return Err(AppError::forbidden("technician role required"));
    }
    Ok(user)
}
