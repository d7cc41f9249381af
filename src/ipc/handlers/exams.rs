use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str, tenant};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_exams_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let scope = match tenant(conn, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let kind = optional_str(req, "kind");

    let exam_id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    if let Err(e) = conn.execute(
        "INSERT INTO exams(id, school_id, name, kind, created_at) VALUES(?, ?, ?, ?, ?)",
        (&exam_id, &scope.school_id, &name, &kind, &created_at),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "exams" })),
        );
    }
    ok(&req.id, json!({ "examId": exam_id, "name": name }))
}

fn handle_exams_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let scope = match tenant(conn, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT id, name, kind FROM exams WHERE school_id = ? ORDER BY created_at, name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&scope.school_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let kind: Option<String> = row.get(2)?;
            Ok(json!({ "id": id, "name": name, "kind": kind }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(exams) => ok(&req.id, json!({ "exams": exams })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exams.create" => Some(handle_exams_create(state, req)),
        "exams.list" => Some(handle_exams_list(state, req)),
        _ => None,
    }
}
