use crate::calc;
use crate::db;
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::helpers::{
    as_f64, db_conn, optional_str, required_str, section_in_scope, tenant,
};
use crate::ipc::types::{AppState, Request};
use crate::model::PassMarks;
use crate::snapshot::{self, PASS_MARKS_KEY};
use rusqlite::OptionalExtension;
use serde_json::json;

struct MarkInput {
    student_id: String,
    subject_id: String,
    mcq: f64,
    written: f64,
}

fn parse_entries(req: &Request) -> Result<Vec<MarkInput>, serde_json::Value> {
    let Some(raw) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", "entries must be an array", None));
    };
    let mut out = Vec::with_capacity(raw.len());
    for (idx, e) in raw.iter().enumerate() {
        let field = |k: &str| {
            e.get(k)
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let (Some(student_id), Some(subject_id)) = (field("studentId"), field("subjectId")) else {
            return Err(err(
                &req.id,
                "bad_params",
                "entry needs studentId and subjectId",
                Some(json!({ "index": idx })),
            ));
        };
        let num = |k: &str| -> Result<f64, serde_json::Value> {
            match e.get(k) {
                None | Some(serde_json::Value::Null) => Ok(0.0),
                Some(v) => match as_f64(v) {
                    Some(x) if x >= 0.0 => Ok(x),
                    _ => Err(err(
                        &req.id,
                        "bad_params",
                        format!("{} must be a non-negative number", k),
                        Some(json!({ "index": idx })),
                    )),
                },
            }
        };
        let mcq = num("mcq")?;
        let written = num("written")?;
        out.push(MarkInput {
            student_id,
            subject_id,
            mcq,
            written,
        });
    }
    Ok(out)
}

/// Bulk upsert of raw marks for one exam and section.
fn handle_marks_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let scope = match tenant(conn, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (class_id, section_id) = match (required_str(req, "classId"), required_str(req, "sectionId")) {
        (Ok(c), Ok(s)) => (c, s),
        (Err(e), _) | (_, Err(e)) => return e,
    };
    if let Err(e) = section_in_scope(conn, &scope, req, &class_id, &section_id) {
        return e;
    }
    let exam_exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM exams WHERE id = ? AND school_id = ?",
            (&exam_id, &scope.school_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exam_exists.is_none() {
        return err(&req.id, "not_found", "exam not found", None);
    }
    let entries = match parse_entries(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let updated_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    for (idx, m) in entries.iter().enumerate() {
        let in_section: Option<i64> = match tx
            .query_row(
                "SELECT 1 FROM students WHERE id = ? AND school_id = ? AND section_id = ?",
                (&m.student_id, &scope.school_id, &section_id),
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => {
                let _ = tx.rollback();
                return err(&req.id, "db_query_failed", e.to_string(), None);
            }
        };
        if in_section.is_none() {
            let _ = tx.rollback();
            return err(
                &req.id,
                "not_found",
                "student not found in section",
                Some(json!({ "index": idx, "studentId": m.student_id })),
            );
        }
        if let Err(e) = tx.execute(
            "INSERT INTO marks(
                school_id, exam_id, class_id, section_id, subject_id, student_id,
                mcq, written, updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(school_id, exam_id, subject_id, student_id) DO UPDATE SET
                class_id = excluded.class_id,
                section_id = excluded.section_id,
                mcq = excluded.mcq,
                written = excluded.written,
                updated_at = excluded.updated_at",
            (
                &scope.school_id,
                &exam_id,
                &class_id,
                &section_id,
                &m.subject_id,
                &m.student_id,
                m.mcq,
                m.written,
                &updated_at,
            ),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "marks" })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "updated": entries.len() }))
}

fn handle_marks_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let scope = match tenant(conn, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let (exam_id, class_id) = match (required_str(req, "examId"), required_str(req, "classId")) {
        (Ok(x), Ok(c)) => (x, c),
        (Err(e), _) | (_, Err(e)) => return e,
    };
    let section_id = optional_str(req, "sectionId");

    let mut stmt = match conn.prepare(
        "SELECT student_id, subject_id, section_id, mcq, written
         FROM marks
         WHERE school_id = ? AND exam_id = ? AND class_id = ?
           AND (? IS NULL OR section_id = ?)
         ORDER BY section_id, student_id, subject_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(
            (&scope.school_id, &exam_id, &class_id, &section_id, &section_id),
            |row| {
                let student_id: String = row.get(0)?;
                let subject_id: String = row.get(1)?;
                let section_id: String = row.get(2)?;
                let mcq: f64 = row.get(3)?;
                let written: f64 = row.get(4)?;
                Ok(json!({
                    "studentId": student_id,
                    "subjectId": subject_id,
                    "sectionId": section_id,
                    "mcq": mcq,
                    "written": written
                }))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(entries) => ok(&req.id, json!({ "entries": entries })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_pass_marks_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let scope = match tenant(conn, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    match snapshot::load_pass_marks(conn, &scope) {
        Ok(p) => ok(&req.id, json!({ "passMarks": p })),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_pass_marks_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let scope = match tenant(conn, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let (Some(mcq), Some(written)) = (
        req.params.get("mcq").and_then(as_f64),
        req.params.get("written").and_then(as_f64),
    ) else {
        return err(&req.id, "bad_params", "mcq and written are required numbers", None);
    };
    let pass = PassMarks { mcq, written };
    if let Err(e) = calc::validate_pass_marks(&pass) {
        return calc_err(&req.id, e);
    }
    let value = json!({ "mcq": pass.mcq, "written": pass.written });
    if let Err(e) = db::settings_set_json(conn, &scope.school_id, PASS_MARKS_KEY, &value) {
        return err(
            &req.id,
            "db_insert_failed",
            format!("{e:?}"),
            Some(json!({ "table": "settings" })),
        );
    }
    ok(&req.id, json!({ "passMarks": pass }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.set" => Some(handle_marks_set(state, req)),
        "marks.list" => Some(handle_marks_list(state, req)),
        "settings.passMarks.get" => Some(handle_pass_marks_get(state, req)),
        "settings.passMarks.set" => Some(handle_pass_marks_set(state, req)),
        _ => None,
    }
}
