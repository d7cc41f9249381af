use crate::grouping;
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::helpers::{
    as_f64, class_in_scope, db_conn, optional_str, required_str, section_in_scope, tenant,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{SubjectDef, SubjectGroup};
use crate::snapshot;
use rusqlite::OptionalExtension;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

fn parse_subject(req: &Request, raw: &serde_json::Value, idx: usize) -> Result<SubjectDef, serde_json::Value> {
    let bad = |msg: &str| {
        err(
            &req.id,
            "invalid_subject",
            msg.to_string(),
            Some(json!({ "index": idx })),
        )
    };
    let name = raw
        .get("name")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| bad("subject name is required"))?;
    let subject_id = raw
        .get("subjectId")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let max_mcq = match raw.get("maxMcq") {
        None | Some(serde_json::Value::Null) => 0.0,
        Some(v) => as_f64(v).ok_or_else(|| bad("maxMcq must be a number"))?,
    };
    let max_written = match raw.get("maxWritten") {
        None | Some(serde_json::Value::Null) => 0.0,
        Some(v) => as_f64(v).ok_or_else(|| bad("maxWritten must be a number"))?,
    };
    if max_mcq < 0.0 || max_written < 0.0 {
        return Err(bad("max marks must not be negative"));
    }
    if max_mcq <= 0.0 && max_written <= 0.0 {
        return Err(bad("at least one of maxMcq or maxWritten must be positive"));
    }
    let is_optional_fourth = raw.get("isFourth").and_then(|v| v.as_bool()).unwrap_or(false);

    Ok(SubjectDef {
        subject_id,
        name,
        max_mcq,
        max_written,
        is_optional_fourth,
    })
}

/// Replace the subject configuration of one section.
fn handle_subjects_configure(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let scope = match tenant(conn, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let (class_id, section_id) = match (required_str(req, "classId"), required_str(req, "sectionId")) {
        (Ok(c), Ok(s)) => (c, s),
        (Err(e), _) | (_, Err(e)) => return e,
    };
    if let Err(e) = section_in_scope(conn, &scope, req, &class_id, &section_id) {
        return e;
    }
    let Some(raw_subjects) = req.params.get("subjects").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "subjects must be an array", None);
    };

    let mut subjects = Vec::with_capacity(raw_subjects.len());
    for (idx, raw) in raw_subjects.iter().enumerate() {
        match parse_subject(req, raw, idx) {
            Ok(s) => subjects.push(s),
            Err(e) => return e,
        }
    }
    let mut seen = HashSet::new();
    for s in &subjects {
        if !seen.insert(s.subject_id.as_str()) {
            return err(
                &req.id,
                "invalid_subject",
                "subject listed twice",
                Some(json!({ "subjectId": s.subject_id })),
            );
        }
    }
    let fourth: Vec<&str> = subjects
        .iter()
        .filter(|s| s.is_optional_fourth)
        .map(|s| s.subject_id.as_str())
        .collect();
    if fourth.len() > 1 {
        return err(
            &req.id,
            "invalid_subject",
            "only one subject may be marked as 4th subject",
            Some(json!({ "subjectIds": fourth })),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "DELETE FROM subjects WHERE school_id = ? AND class_id = ? AND section_id = ?",
        (&scope.school_id, &class_id, &section_id),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }
    for (i, s) in subjects.iter().enumerate() {
        if let Err(e) = tx.execute(
            "INSERT INTO subjects(
                school_id, class_id, section_id, subject_id, name,
                max_mcq, max_written, is_fourth, sort_order
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &scope.school_id,
                &class_id,
                &section_id,
                &s.subject_id,
                &s.name,
                s.max_mcq,
                s.max_written,
                s.is_optional_fourth as i64,
                i as i64,
            ),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "subjects" })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "subjects": subjects }))
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let section_ids = match optional_str(req, "sectionId") {
        Some(s) => vec![s],
        None => match snapshot::class_section_ids(conn, &scope, &class_id) {
            Ok(ids) => ids,
            Err(e) => return calc_err(&req.id, e),
        },
    };
    match snapshot::load_subjects(conn, &scope, &class_id, &section_ids) {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_groups_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let scope = match tenant(conn, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let (class_id, name) = match (required_str(req, "classId"), required_str(req, "name")) {
        (Ok(c), Ok(n)) => (c, n),
        (Err(e), _) | (_, Err(e)) => return e,
    };
    if let Err(e) = class_in_scope(conn, &scope, req, &class_id) {
        return e;
    }
    let group_id = optional_str(req, "groupId");

    let mut member_ids: Vec<String> = Vec::new();
    for v in req
        .params
        .get("subjectIds")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
    {
        if let Some(s) = v.as_str() {
            if !member_ids.iter().any(|m| m == s) {
                member_ids.push(s.to_string());
            }
        }
    }
    if member_ids.len() < 2 {
        return err(
            &req.id,
            "bad_params",
            "a group needs at least two subjects",
            None,
        );
    }

    let section_ids = match snapshot::class_section_ids(conn, &scope, &class_id) {
        Ok(ids) => ids,
        Err(e) => return calc_err(&req.id, e),
    };
    let configured: HashMap<String, SubjectDef> =
        match snapshot::load_subjects(conn, &scope, &class_id, &section_ids) {
            Ok(list) => list.into_iter().map(|s| (s.subject_id.clone(), s)).collect(),
            Err(e) => return calc_err(&req.id, e),
        };
    if let Some(missing) = member_ids.iter().find(|id| !configured.contains_key(*id)) {
        return err(
            &req.id,
            "not_found",
            "subject is not configured for this class",
            Some(json!({ "subjectId": missing })),
        );
    }

    let existing = match snapshot::load_groups(conn, &scope, &class_id) {
        Ok(g) => g,
        Err(e) => return calc_err(&req.id, e),
    };
    if let Some(gid) = group_id.as_deref() {
        if !existing.iter().any(|g| g.group_id == gid) {
            return err(&req.id, "not_found", "group not found", None);
        }
    }
    for other in existing
        .iter()
        .filter(|g| Some(g.group_id.as_str()) != group_id.as_deref())
    {
        if let Some(taken) = member_ids.iter().find(|id| other.contains(id)) {
            return err(
                &req.id,
                "group_conflict",
                "subject already belongs to another group",
                Some(json!({ "subjectId": taken, "groupId": other.group_id })),
            );
        }
    }

    let total_max_marks: f64 = match req.params.get("totalMaxMarks") {
        None | Some(serde_json::Value::Null) => member_ids
            .iter()
            .filter_map(|id| configured.get(id))
            .map(|s| s.max_total())
            .sum(),
        Some(v) => match as_f64(v) {
            Some(x) if x > 0.0 => x,
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    "totalMaxMarks must be a positive number",
                    None,
                )
            }
        },
    };

    let group = SubjectGroup {
        group_id: group_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        name,
        member_subject_ids: member_ids,
        total_max_marks,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let next_sort: i64 = match tx.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM subject_groups WHERE class_id = ?",
        [&class_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    };
    let upsert = tx.execute(
        "INSERT INTO subject_groups(id, school_id, class_id, name, total_max_marks, sort_order)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, total_max_marks = excluded.total_max_marks",
        (
            &group.group_id,
            &scope.school_id,
            &class_id,
            &group.name,
            group.total_max_marks,
            next_sort,
        ),
    );
    if let Err(e) = upsert {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subject_groups" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM subject_group_members WHERE group_id = ?",
        [&group.group_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "subject_group_members" })),
        );
    }
    for (i, sid) in group.member_subject_ids.iter().enumerate() {
        if let Err(e) = tx.execute(
            "INSERT INTO subject_group_members(group_id, subject_id, sort_order) VALUES(?, ?, ?)",
            (&group.group_id, sid, i as i64),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "subject_group_members" })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "group": group }))
}

fn handle_groups_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    match snapshot::load_groups(conn, &scope, &class_id) {
        Ok(groups) => {
            let conflicts: Vec<_> = grouping::find_group_conflicts(&groups)
                .into_iter()
                .map(|(subject_id, group_ids)| json!({ "subjectId": subject_id, "groupIds": group_ids }))
                .collect();
            ok(&req.id, json!({ "groups": groups, "conflicts": conflicts }))
        }
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_groups_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let scope = match tenant(conn, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM subject_groups WHERE id = ? AND school_id = ?",
            (&group_id, &scope.school_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "group not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for (sql, table) in [
        ("DELETE FROM subject_group_members WHERE group_id = ?", "subject_group_members"),
        ("DELETE FROM subject_groups WHERE id = ?", "subject_groups"),
    ] {
        if let Err(e) = tx.execute(sql, [&group_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.configure" => Some(handle_subjects_configure(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "groups.save" => Some(handle_groups_save(state, req)),
        "groups.list" => Some(handle_groups_list(state, req)),
        "groups.delete" => Some(handle_groups_delete(state, req)),
        _ => None,
    }
}
