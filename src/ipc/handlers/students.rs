use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str, section_in_scope, tenant};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Create a student, or update one in place when `studentId` is given.
/// Published results keep their own identity snapshot and are not touched.
fn handle_students_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let scope = match tenant(conn, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let section_id = match required_str(req, "sectionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = section_in_scope(conn, &scope, req, &class_id, &section_id) {
        return e;
    }

    let roll_number = optional_str(req, "rollNumber");
    let father_name = optional_str(req, "fatherName");
    let mother_name = optional_str(req, "motherName");
    let fourth_subject_id = optional_str(req, "fourthSubjectId");
    let updated_at = now_rfc3339();

    if let Some(student_id) = optional_str(req, "studentId") {
        let existing: Option<i64> = match conn
            .query_row(
                "SELECT 1 FROM students WHERE id = ? AND school_id = ?",
                (&student_id, &scope.school_id),
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if existing.is_some() {
            if let Err(e) = conn.execute(
                "UPDATE students
                 SET class_id = ?, section_id = ?, name = ?, roll_number = ?,
                     father_name = ?, mother_name = ?, fourth_subject_id = ?, updated_at = ?
                 WHERE id = ? AND school_id = ?",
                (
                    &class_id,
                    &section_id,
                    &name,
                    &roll_number,
                    &father_name,
                    &mother_name,
                    &fourth_subject_id,
                    &updated_at,
                    &student_id,
                    &scope.school_id,
                ),
            ) {
                return err(
                    &req.id,
                    "db_update_failed",
                    e.to_string(),
                    Some(json!({ "table": "students" })),
                );
            }
            return ok(&req.id, json!({ "studentId": student_id, "created": false }));
        }
        let taken: Option<i64> = match conn
            .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
                r.get(0)
            })
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if taken.is_some() {
            return err(&req.id, "not_found", "student not found", None);
        }
    }

    let next_sort: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students WHERE section_id = ?",
        [&section_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let student_id = optional_str(req, "studentId").unwrap_or_else(|| Uuid::new_v4().to_string());
    if let Err(e) = conn.execute(
        "INSERT INTO students(
            id, school_id, class_id, section_id, name, roll_number,
            father_name, mother_name, fourth_subject_id, sort_order, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &scope.school_id,
            &class_id,
            &section_id,
            &name,
            &roll_number,
            &father_name,
            &mother_name,
            &fourth_subject_id,
            next_sort,
            &updated_at,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    ok(&req.id, json!({ "studentId": student_id, "created": true }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let scope = match tenant(conn, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let section_id = optional_str(req, "sectionId");

    let mut stmt = match conn.prepare(
        "SELECT st.id, st.section_id, st.name, st.roll_number, st.father_name,
                st.mother_name, st.fourth_subject_id
         FROM students st
         JOIN sections se ON se.id = st.section_id
         WHERE st.school_id = ? AND st.class_id = ? AND (? IS NULL OR st.section_id = ?)
         ORDER BY se.sort_order, st.sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(
            (&scope.school_id, &class_id, &section_id, &section_id),
            |row| {
                let id: String = row.get(0)?;
                let section_id: String = row.get(1)?;
                let name: String = row.get(2)?;
                let roll_number: Option<String> = row.get(3)?;
                let father_name: Option<String> = row.get(4)?;
                let mother_name: Option<String> = row.get(5)?;
                let fourth_subject_id: Option<String> = row.get(6)?;
                Ok(json!({
                    "id": id,
                    "sectionId": section_id,
                    "name": name,
                    "rollNumber": roll_number,
                    "fatherName": father_name,
                    "motherName": mother_name,
                    "fourthSubjectId": fourth_subject_id
                }))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.upsert" => Some(handle_students_upsert(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        _ => None,
    }
}
