use crate::bundle;
use crate::calc::{self, CalcError};
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::helpers::{as_f64, db_conn, optional_str, required_str, tenant};
use crate::ipc::types::{AppState, Request};
use crate::model::{ExamWeight, PassMarks, ResultMode, TenantScope};
use crate::publish::{self, PublicationMeta, PublishedResultRecord};
use crate::snapshot::{self, CalcSelection};
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;
use tracing::{debug, info};

const SINGLE_EXAM_WEIGHT: f64 = 100.0;

fn parse_mode(req: &Request) -> Result<ResultMode, serde_json::Value> {
    match optional_str(req, "mode").as_deref() {
        None | Some("single") => Ok(ResultMode::Single),
        Some("combined") => Ok(ResultMode::Combined),
        Some(other) => Err(err(
            &req.id,
            "bad_params",
            "mode must be single or combined",
            Some(json!({ "mode": other })),
        )),
    }
}

fn parse_selection(req: &Request) -> Result<CalcSelection, serde_json::Value> {
    let class_id = required_str(req, "classId")?;
    let mode = parse_mode(req)?;

    let Some(raw_sections) = req.params.get("sectionIds").and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", "sectionIds must be an array", None));
    };
    let mut section_ids: Vec<String> = Vec::new();
    for v in raw_sections {
        let Some(s) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return Err(err(&req.id, "bad_params", "sectionIds must be strings", None));
        };
        if !section_ids.iter().any(|x| x == s) {
            section_ids.push(s.to_string());
        }
    }

    let Some(raw_exams) = req.params.get("exams").and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", "exams must be an array", None));
    };
    let mut exams = Vec::with_capacity(raw_exams.len());
    for (idx, raw) in raw_exams.iter().enumerate() {
        let Some(exam_id) = raw
            .get("examId")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            return Err(err(
                &req.id,
                "bad_params",
                "exam entry needs examId",
                Some(json!({ "index": idx })),
            ));
        };
        let weight = match (raw.get("weight"), mode) {
            (None | Some(serde_json::Value::Null), ResultMode::Single) => SINGLE_EXAM_WEIGHT,
            (None | Some(serde_json::Value::Null), ResultMode::Combined) => {
                return Err(err(
                    &req.id,
                    "invalid_weights",
                    "every exam in a combined result needs a weight",
                    Some(json!({ "examId": exam_id })),
                ));
            }
            (Some(v), _) => as_f64(v).ok_or_else(|| {
                err(
                    &req.id,
                    "invalid_weights",
                    "exam weight must be a number",
                    Some(json!({ "examId": exam_id })),
                )
            })?,
        };
        exams.push(ExamWeight {
            exam_id: exam_id.to_string(),
            weight,
        });
    }

    let pass_marks = match req.params.get("passMarks") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => {
            let (Some(mcq), Some(written)) = (
                v.get("mcq").and_then(as_f64),
                v.get("written").and_then(as_f64),
            ) else {
                return Err(err(
                    &req.id,
                    "invalid_pass_marks",
                    "passMarks needs numeric mcq and written",
                    None,
                ));
            };
            Some(PassMarks { mcq, written })
        }
    };

    Ok(CalcSelection {
        class_id,
        section_ids,
        mode,
        exams,
        pass_marks,
    })
}

struct Computed {
    meta: PublicationMeta,
    records: Vec<PublishedResultRecord>,
    warnings: Vec<calc::CalcWarning>,
    stats: calc::ClassStats,
}

fn compute(
    conn: &Connection,
    scope: &TenantScope,
    selection: &CalcSelection,
    published_at: Option<String>,
) -> Result<Computed, CalcError> {
    let snap = snapshot::load_class_snapshot(conn, scope, selection)?;
    let outcome = calc::calculate_class(&snap)?;
    let meta = PublicationMeta::for_snapshot(&snap, published_at);
    let records = publish::format_class(&snap, &outcome, &meta);
    info!(
        school = %scope.school_id,
        class = %snap.class_id,
        mode = snap.mode.as_str(),
        result_key = %meta.result_key,
        students = snap.students.len(),
        subjects = snap.subjects.len(),
        marks = snap.marks.len(),
        "results calculated"
    );
    Ok(Computed {
        meta,
        records,
        warnings: outcome.warnings,
        stats: outcome.stats,
    })
}

fn handle_results_calculate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let scope = match tenant(conn, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let selection = match parse_selection(req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    match compute(conn, &scope, &selection, None) {
        Ok(c) => ok(
            &req.id,
            json!({
                "resultKey": c.meta.result_key,
                "examName": c.meta.exam_name,
                "records": c.records,
                "warnings": c.warnings,
                "stats": c.stats,
            }),
        ),
        Err(e) => calc_err(&req.id, e),
    }
}

/// Compute and persist one record per student in a single transaction.
/// Republishing the same selection replaces the earlier records.
fn handle_results_publish(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let scope = match tenant(conn, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let selection = match parse_selection(req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let published_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let c = match compute(conn, &scope, &selection, Some(published_at.clone())) {
        Ok(c) => c,
        Err(e) => return calc_err(&req.id, e),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for record in &c.records {
        let payload = match serde_json::to_string(record) {
            Ok(s) => s,
            Err(e) => {
                let _ = tx.rollback();
                return err(&req.id, "db_insert_failed", e.to_string(), None);
            }
        };
        if let Err(e) = tx.execute(
            "INSERT OR REPLACE INTO published_results(
                school_id, student_id, result_key, class_id, section_id,
                merit_position, payload_json, published_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &scope.school_id,
                &record.student.student_id,
                &c.meta.result_key,
                &c.meta.class_id,
                &record.student.section_id,
                record.merit_position as i64,
                &payload,
                &published_at,
            ),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "published_results" })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }
    info!(
        school = %scope.school_id,
        result_key = %c.meta.result_key,
        count = c.records.len(),
        "results published"
    );

    ok(
        &req.id,
        json!({
            "resultKey": c.meta.result_key,
            "examName": c.meta.exam_name,
            "publishedAt": published_at,
            "count": c.records.len(),
            "warnings": c.warnings,
            "stats": c.stats,
        }),
    )
}

fn load_published(
    conn: &Connection,
    scope: &TenantScope,
    result_key: &str,
    class_id: Option<&str>,
) -> rusqlite::Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, payload_json
         FROM published_results
         WHERE school_id = ? AND result_key = ? AND (? IS NULL OR class_id = ?)
         ORDER BY merit_position, student_id",
    )?;
    let rows = stmt
        .query_map(
            (&scope.school_id, result_key, class_id, class_id),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn payloads_to_json(
    req: &Request,
    rows: Vec<(String, String)>,
) -> Result<Vec<serde_json::Value>, serde_json::Value> {
    rows.into_iter()
        .map(|(student_id, payload)| {
            serde_json::from_str(&payload).map_err(|e| {
                err(
                    &req.id,
                    "db_query_failed",
                    format!("stored record unreadable: {}", e),
                    Some(json!({ "studentId": student_id })),
                )
            })
        })
        .collect()
}

fn handle_results_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let scope = match tenant(conn, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let result_key = match required_str(req, "resultKey") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = optional_str(req, "classId");
    let rows = match load_published(conn, &scope, &result_key, class_id.as_deref()) {
        Ok(r) => r,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match payloads_to_json(req, rows) {
        Ok(records) => ok(&req.id, json!({ "resultKey": result_key, "records": records })),
        Err(e) => e,
    }
}

fn handle_results_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let scope = match tenant(conn, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let result_key = optional_str(req, "resultKey");

    let mut stmt = match conn.prepare(
        "SELECT student_id, payload_json
         FROM published_results
         WHERE school_id = ? AND student_id = ? AND (? IS NULL OR result_key = ?)
         ORDER BY published_at DESC, result_key",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(
            (&scope.school_id, &student_id, &result_key, &result_key),
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(r) => r,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if rows.is_empty() {
        return err(&req.id, "not_found", "no published result for student", None);
    }
    match payloads_to_json(req, rows) {
        Ok(records) => ok(&req.id, json!({ "records": records })),
        Err(e) => e,
    }
}

fn handle_results_export_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let scope = match tenant(conn, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let (result_key, out_path) = match (required_str(req, "resultKey"), required_str(req, "outPath")) {
        (Ok(k), Ok(p)) => (k, PathBuf::from(p)),
        (Err(e), _) | (_, Err(e)) => return e,
    };
    let rows = match load_published(conn, &scope, &result_key, None) {
        Ok(r) => r,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if rows.is_empty() {
        return err(
            &req.id,
            "not_found",
            "no published results for result key",
            Some(json!({ "resultKey": result_key })),
        );
    }

    match bundle::export_results_bundle(&scope.school_id, &result_key, &rows, &out_path) {
        Ok(summary) => {
            debug!(path = %out_path.to_string_lossy(), entries = summary.entry_count, "bundle written");
            ok(
                &req.id,
                json!({
                    "ok": true,
                    "outPath": out_path.to_string_lossy(),
                    "bundleFormat": summary.bundle_format,
                    "entryCount": summary.entry_count,
                    "recordCount": rows.len(),
                }),
            )
        }
        Err(e) => err(&req.id, "export_failed", format!("{e:?}"), None),
    }
}

/// Check a bundle's integrity and that it belongs to the requesting school.
fn handle_results_verify_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let scope = match tenant(conn, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let path = match required_str(req, "path") {
        Ok(p) => PathBuf::from(p),
        Err(e) => return e,
    };
    let summary = match bundle::verify_results_bundle(&path) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "bundle_invalid", format!("{e:?}"), None),
    };
    if summary.school_id != scope.school_id {
        return err(
            &req.id,
            "bundle_invalid",
            "bundle belongs to another school",
            None,
        );
    }
    ok(
        &req.id,
        json!({
            "resultKey": summary.result_key,
            "recordCount": summary.record_count,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.calculate" => Some(handle_results_calculate(state, req)),
        "results.publish" => Some(handle_results_publish(state, req)),
        "results.list" => Some(handle_results_list(state, req)),
        "results.student" => Some(handle_results_student(state, req)),
        "results.exportBundle" => Some(handle_results_export_bundle(state, req)),
        "results.verifyBundle" => Some(handle_results_verify_bundle(state, req)),
        _ => None,
    }
}
