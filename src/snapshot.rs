use crate::calc::{self, CalcError};
use crate::db;
use crate::model::{
    ClassSnapshot, ExamRef, ExamWeight, MarkEntry, MarkSheet, PassMarks, ResultMode,
    StudentProfile, SubjectDef, SubjectGroup, TenantScope,
};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use std::collections::{HashMap, HashSet};

pub const PASS_MARKS_KEY: &str = "pass_marks";

/// What the administrator picked for one "calculate" action.
#[derive(Debug, Clone, PartialEq)]
pub struct CalcSelection {
    pub class_id: String,
    pub section_ids: Vec<String>,
    pub mode: ResultMode,
    pub exams: Vec<ExamWeight>,
    pub pass_marks: Option<PassMarks>,
}

fn db_err(e: rusqlite::Error) -> CalcError {
    CalcError::new("db_query_failed", e.to_string())
}

fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(",")
}

pub fn load_pass_marks(conn: &Connection, scope: &TenantScope) -> Result<PassMarks, CalcError> {
    let stored = db::settings_get_json(conn, &scope.school_id, PASS_MARKS_KEY)
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    match stored {
        Some(v) => serde_json::from_value(v).map_err(|e| {
            CalcError::new("invalid_pass_marks", format!("stored pass marks unreadable: {}", e))
        }),
        None => Ok(PassMarks::default()),
    }
}

pub fn load_class_name(
    conn: &Connection,
    scope: &TenantScope,
    class_id: &str,
) -> Result<String, CalcError> {
    conn.query_row(
        "SELECT name FROM classes WHERE id = ? AND school_id = ?",
        (class_id, &scope.school_id),
        |r| r.get(0),
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| CalcError::new("not_found", "class not found"))
}

pub fn class_section_ids(
    conn: &Connection,
    scope: &TenantScope,
    class_id: &str,
) -> Result<Vec<String>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT id FROM sections
             WHERE school_id = ? AND class_id = ?
             ORDER BY sort_order, id",
        )
        .map_err(db_err)?;
    let ids = stmt
        .query_map((&scope.school_id, class_id), |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(ids)
}

/// Subject definitions of the given sections, unioned by subject id. The
/// first section (then sort order) that defines a subject wins.
pub fn load_subjects(
    conn: &Connection,
    scope: &TenantScope,
    class_id: &str,
    section_ids: &[String],
) -> Result<Vec<SubjectDef>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT subject_id, name, max_mcq, max_written, is_fourth
             FROM subjects
             WHERE school_id = ? AND class_id = ? AND section_id = ?
             ORDER BY sort_order, subject_id",
        )
        .map_err(db_err)?;

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for section_id in section_ids {
        let rows = stmt
            .query_map((&scope.school_id, class_id, section_id), |r| {
                Ok(SubjectDef {
                    subject_id: r.get(0)?,
                    name: r.get(1)?,
                    max_mcq: r.get(2)?,
                    max_written: r.get(3)?,
                    is_optional_fourth: r.get::<_, i64>(4)? != 0,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)?;
        for s in rows {
            if seen.insert(s.subject_id.clone()) {
                out.push(s);
            }
        }
    }
    Ok(out)
}

pub fn load_groups(
    conn: &Connection,
    scope: &TenantScope,
    class_id: &str,
) -> Result<Vec<SubjectGroup>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, total_max_marks
             FROM subject_groups
             WHERE school_id = ? AND class_id = ?
             ORDER BY sort_order, name, id",
        )
        .map_err(db_err)?;
    let heads: Vec<(String, String, f64)> = stmt
        .query_map((&scope.school_id, class_id), |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut members_stmt = conn
        .prepare(
            "SELECT subject_id FROM subject_group_members
             WHERE group_id = ?
             ORDER BY sort_order",
        )
        .map_err(db_err)?;
    let mut out = Vec::with_capacity(heads.len());
    for (group_id, name, total_max_marks) in heads {
        let member_subject_ids = members_stmt
            .query_map([&group_id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)?;
        out.push(SubjectGroup {
            group_id,
            name,
            member_subject_ids,
            total_max_marks,
        });
    }
    Ok(out)
}

fn load_sections(
    conn: &Connection,
    scope: &TenantScope,
    class_id: &str,
    section_ids: &[String],
) -> Result<HashMap<String, String>, CalcError> {
    let mut stmt = conn
        .prepare("SELECT name FROM sections WHERE id = ? AND class_id = ? AND school_id = ?")
        .map_err(db_err)?;
    let mut names = HashMap::new();
    for id in section_ids {
        let name: Option<String> = stmt
            .query_row((id, class_id, &scope.school_id), |r| r.get(0))
            .optional()
            .map_err(db_err)?;
        let Some(name) = name else {
            return Err(CalcError::new("not_found", "section not found")
                .with_details(json!({ "sectionId": id })));
        };
        names.insert(id.clone(), name);
    }
    Ok(names)
}

fn load_exams(
    conn: &Connection,
    scope: &TenantScope,
    weights: &[ExamWeight],
) -> Result<Vec<ExamRef>, CalcError> {
    let mut stmt = conn
        .prepare("SELECT name FROM exams WHERE id = ? AND school_id = ?")
        .map_err(db_err)?;
    let mut out = Vec::with_capacity(weights.len());
    for w in weights {
        let name: Option<String> = stmt
            .query_row((&w.exam_id, &scope.school_id), |r| r.get(0))
            .optional()
            .map_err(db_err)?;
        let Some(name) = name else {
            return Err(CalcError::new("not_found", "exam not found")
                .with_details(json!({ "examId": w.exam_id })));
        };
        out.push(ExamRef {
            exam_id: w.exam_id.clone(),
            name,
            weight: w.weight,
        });
    }
    Ok(out)
}

/// Roster order inside one section: numeric roll numbers by value, then
/// other roll numbers as text, then students without a roll number. Sort
/// order breaks ties.
const ROSTER_ORDER: &str = "CASE
        WHEN roll_number IS NULL OR TRIM(roll_number) = '' THEN 2
        WHEN TRIM(roll_number) NOT GLOB '*[^0-9]*' THEN 0
        ELSE 1
    END,
    CASE WHEN TRIM(roll_number) NOT GLOB '*[^0-9]*' THEN CAST(TRIM(roll_number) AS INTEGER) END,
    TRIM(roll_number),
    sort_order,
    id";

fn load_students(
    conn: &Connection,
    scope: &TenantScope,
    class_id: &str,
    section_ids: &[String],
    section_names: &HashMap<String, String>,
) -> Result<Vec<StudentProfile>, CalcError> {
    let sql = format!(
        "SELECT id, name, roll_number, father_name, mother_name, fourth_subject_id
         FROM students
         WHERE school_id = ? AND class_id = ? AND section_id = ?
         ORDER BY {}",
        ROSTER_ORDER
    );
    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let mut out = Vec::new();
    for section_id in section_ids {
        let section_name = section_names.get(section_id).cloned().unwrap_or_default();
        let rows = stmt
            .query_map((&scope.school_id, class_id, section_id), |r| {
                Ok(StudentProfile {
                    student_id: r.get(0)?,
                    name: r.get(1)?,
                    roll_number: r.get(2)?,
                    father_name: r.get(3)?,
                    mother_name: r.get(4)?,
                    fourth_subject_id: r.get(5)?,
                    section_id: section_id.clone(),
                    section_name: section_name.clone(),
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)?;
        out.extend(rows);
    }
    Ok(out)
}

fn load_marks(
    conn: &Connection,
    scope: &TenantScope,
    class_id: &str,
    exams: &[ExamRef],
    students: &[StudentProfile],
) -> Result<MarkSheet, CalcError> {
    let mut sheet = MarkSheet::new();
    if exams.is_empty() || students.is_empty() {
        return Ok(sheet);
    }
    let student_ids: HashSet<&str> = students.iter().map(|s| s.student_id.as_str()).collect();

    let sql = format!(
        "SELECT exam_id, subject_id, student_id, mcq, written
         FROM marks
         WHERE school_id = ? AND class_id = ? AND exam_id IN ({})",
        placeholders(exams.len())
    );
    let mut bind_values: Vec<Value> = Vec::with_capacity(exams.len() + 2);
    bind_values.push(Value::Text(scope.school_id.clone()));
    bind_values.push(Value::Text(class_id.to_string()));
    for e in exams {
        bind_values.push(Value::Text(e.exam_id.clone()));
    }

    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params_from_iter(bind_values), |r| {
            let exam_id: String = r.get(0)?;
            let subject_id: String = r.get(1)?;
            let student_id: String = r.get(2)?;
            let mcq: Option<f64> = r.get(3)?;
            let written: Option<f64> = r.get(4)?;
            Ok((exam_id, subject_id, student_id, mcq, written))
        })
        .map_err(db_err)?;
    for row in rows {
        let (exam_id, subject_id, student_id, mcq, written) = row.map_err(db_err)?;
        if !student_ids.contains(student_id.as_str()) {
            continue;
        }
        sheet.insert(
            &exam_id,
            &subject_id,
            &student_id,
            MarkEntry {
                mcq: mcq.unwrap_or(0.0),
                written: written.unwrap_or(0.0),
            },
        );
    }
    Ok(sheet)
}

/// Read everything one calculation needs. Global configuration (weights,
/// pass marks) is checked before any roster or mark is read.
pub fn load_class_snapshot(
    conn: &Connection,
    scope: &TenantScope,
    selection: &CalcSelection,
) -> Result<ClassSnapshot, CalcError> {
    calc::validate_exam_weights(selection.mode, &selection.exams)?;
    let pass_marks = match selection.pass_marks {
        Some(p) => p,
        None => load_pass_marks(conn, scope)?,
    };
    calc::validate_pass_marks(&pass_marks)?;

    if selection.section_ids.is_empty() {
        return Err(CalcError::new(
            "invalid_selection",
            "select at least one section",
        ));
    }

    let class_name = load_class_name(conn, scope, &selection.class_id)?;
    let section_names = load_sections(conn, scope, &selection.class_id, &selection.section_ids)?;
    let exams = load_exams(conn, scope, &selection.exams)?;
    let subjects = load_subjects(conn, scope, &selection.class_id, &selection.section_ids)?;
    let groups = load_groups(conn, scope, &selection.class_id)?;
    let students = load_students(
        conn,
        scope,
        &selection.class_id,
        &selection.section_ids,
        &section_names,
    )?;
    let marks = load_marks(conn, scope, &selection.class_id, &exams, &students)?;

    Ok(ClassSnapshot {
        scope: scope.clone(),
        class_id: selection.class_id.clone(),
        class_name,
        mode: selection.mode,
        exams,
        subjects,
        groups,
        students,
        marks,
        pass_marks,
    })
}
