use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{machine::DbInstalledSoftware, user::DbUser};

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, AppError> {
    let s = s.trim();

    // RFC3339 first (e.g. 2026-06-08T12:34:56Z)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite default timestamp format: "YYYY-MM-DD HH:MM:SS" (with optional fractional seconds)
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    // Date-only format: "YYYY-MM-DD"
    if let Ok(naive_date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let ndt = naive_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| AppError::internal("invalid datetime: date out of range".to_string()))?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(AppError::internal(format!("invalid datetime: {}", s)))
}

fn parse_opt_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, AppError> {
    match s {
        Some(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                Ok(Some(parse_datetime(trimmed)?))
            }
        }
        None => Ok(None),
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(s).map_err(|e| AppError::internal(format!("invalid uuid: {}", e)))
}

fn parse_opt_uuid(s: Option<String>) -> Result<Option<Uuid>, AppError> {
    match s {
        Some(s) => Ok(Some(parse_uuid(&s)?)),
        None => Ok(None),
    }
}

fn get_col<'r, T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>>(
    row: &'r SqliteRow,
    name: &str,
) -> Result<T, AppError> {
    row.try_get(name)
        .map_err(|e| AppError::internal(format!("missing {}: {}", name, e)))
}

pub fn db_user_from_row(row: &SqliteRow) -> Result<DbUser, AppError> {
    let id_s: String = get_col(row, "id")?;
    let name: String = get_col(row, "name")?;
    let email: String = get_col(row, "email")?;
    let password_hash: String = get_col(row, "password_hash")?;
    let role: String = get_col(row, "role")?;
    let structure_id_s: Option<String> = get_col(row, "structure_id")?;
    let group_id_s: Option<String> = get_col(row, "group_id")?;
    let site_id_s: Option<String> = get_col(row, "site_id")?;
    let active: bool = get_col(row, "active")?;
    let created_at_s: String = get_col(row, "created_at")?;
    let updated_at_s: String = get_col(row, "updated_at")?;
    let deleted_at_s: Option<String> = get_col(row, "deleted_at")?;

    Ok(DbUser {
        id: parse_uuid(&id_s)?,
        name,
        email,
        password_hash,
        role,
        structure_id: parse_opt_uuid(structure_id_s)?,
        group_id: parse_opt_uuid(group_id_s)?,
        site_id: parse_opt_uuid(site_id_s)?,
        active,
        created_at: parse_datetime(&created_at_s)?,
        updated_at: parse_datetime(&updated_at_s)?,
        deleted_at: parse_opt_datetime(deleted_at_s)?,
    })
}

pub fn db_installed_software_from_row(row: &SqliteRow) -> Result<DbInstalledSoftware, AppError> {
    let id_s: String = get_col(row, "id")?;
    let machine_id_s: String = get_col(row, "machine_id")?;
    let name: String = get_col(row, "name")?;
    let version: String = get_col(row, "version")?;
    let publisher: String = get_col(row, "publisher")?;
    let install_date_s: Option<String> = get_col(row, "install_date")?;
    let size_bytes: Option<i64> = get_col(row, "size_bytes")?;
    let software_ref_id_s: Option<String> = get_col(row, "software_ref_id")?;
    let license_required: bool = get_col(row, "license_required")?;
    let license_valid: bool = get_col(row, "license_valid")?;
    let resolution: String = get_col(row, "resolution")?;
    let block_reason: String = get_col(row, "block_reason")?;
    let detected_at_s: String = get_col(row, "detected_at")?;
    let updated_at_s: String = get_col(row, "updated_at")?;

    Ok(DbInstalledSoftware {
        id: parse_uuid(&id_s)?,
        machine_id: parse_uuid(&machine_id_s)?,
        name,
        version,
        publisher,
        install_date: parse_opt_datetime(install_date_s)?,
        size_bytes,
        software_ref_id: parse_opt_uuid(software_ref_id_s)?,
        license_required,
        license_valid,
        resolution,
        block_reason,
        detected_at: parse_datetime(&detected_at_s)?,
        updated_at: parse_datetime(&updated_at_s)?,
    })
}
