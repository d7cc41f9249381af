use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::model::TenantScope;
use rusqlite::{Connection, OptionalExtension};

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Resolve `params.schoolId` to a scope, rejecting unknown schools.
pub fn tenant(conn: &Connection, req: &Request) -> Result<TenantScope, serde_json::Value> {
    let school_id = required_str(req, "schoolId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM schools WHERE id = ?", [&school_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    if exists.is_none() {
        return Err(err(&req.id, "not_found", "school not found", None));
    }
    Ok(TenantScope::new(school_id))
}

/// Numbers may arrive as JSON numbers or numeric strings.
pub fn as_f64(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|x| x.is_finite())
}

pub fn class_in_scope(
    conn: &Connection,
    scope: &TenantScope,
    req: &Request,
    class_id: &str,
) -> Result<(), serde_json::Value> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM classes WHERE id = ? AND school_id = ?",
            (class_id, &scope.school_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    if exists.is_none() {
        return Err(err(&req.id, "not_found", "class not found", None));
    }
    Ok(())
}

pub fn section_in_scope(
    conn: &Connection,
    scope: &TenantScope,
    req: &Request,
    class_id: &str,
    section_id: &str,
) -> Result<(), serde_json::Value> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sections WHERE id = ? AND class_id = ? AND school_id = ?",
            (section_id, class_id, &scope.school_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    if exists.is_none() {
        return Err(err(&req.id, "not_found", "section not found", None));
    }
    Ok(())
}
