use crate::calc::{ClassOutcome, StudentResult};
use crate::grade::{self, Grade};
use crate::grouping::{self, DisplayEntry};
use crate::model::{ClassSnapshot, ExamRef, ResultMode, StudentProfile, SubjectDef, SubjectGroup};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

pub const COMBINED_EXAM_NAME: &str = "Combined Result";

/// Single mode publishes under the exam id. Combined mode hashes the
/// exam/weight set so the same selection always lands on the same key.
pub fn result_key(mode: ResultMode, exams: &[ExamRef]) -> String {
    if mode == ResultMode::Single && exams.len() == 1 {
        return exams[0].exam_id.clone();
    }
    let mut parts: Vec<String> = exams
        .iter()
        .map(|e| format!("{}:{:.2}", e.exam_id, e.weight))
        .collect();
    parts.sort();
    let digest = Sha256::digest(parts.join("|").as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("combined_{}", &hex[..16])
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicationMeta {
    pub result_key: String,
    pub mode: ResultMode,
    pub exam_id: Option<String>,
    pub exam_name: String,
    pub exams: Vec<ExamRef>,
    pub class_id: String,
    pub class_name: String,
    pub published_at: Option<String>,
}

impl PublicationMeta {
    pub fn for_snapshot(snapshot: &ClassSnapshot, published_at: Option<String>) -> Self {
        let (exam_id, exam_name) = match (snapshot.mode, snapshot.exams.as_slice()) {
            (ResultMode::Single, [only]) => (Some(only.exam_id.clone()), only.name.clone()),
            _ => (None, COMBINED_EXAM_NAME.to_string()),
        };
        Self {
            result_key: result_key(snapshot.mode, &snapshot.exams),
            mode: snapshot.mode,
            exam_id,
            exam_name,
            exams: snapshot.exams.clone(),
            class_id: snapshot.class_id.clone(),
            class_name: snapshot.class_name.clone(),
            published_at,
        }
    }
}

/// Identity fields copied at publication time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSnapshot {
    pub student_id: String,
    pub name: String,
    pub roll_number: Option<String>,
    pub section_id: String,
    pub section_name: String,
    pub father_name: Option<String>,
    pub mother_name: Option<String>,
}

impl From<&StudentProfile> for StudentSnapshot {
    fn from(p: &StudentProfile) -> Self {
        Self {
            student_id: p.student_id.clone(),
            name: p.name.clone(),
            roll_number: p.roll_number.clone(),
            section_id: p.section_id.clone(),
            section_name: p.section_name.clone(),
            father_name: p.father_name.clone(),
            mother_name: p.mother_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedSubject {
    pub subject_id: String,
    pub subject_name: String,
    pub marks_obtained: f64,
    pub max_marks: f64,
    pub mcq: f64,
    pub written: f64,
    pub grade: Grade,
    pub gpa: f64,
    pub is_fourth: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedResultRecord {
    #[serde(flatten)]
    pub meta: PublicationMeta,
    pub student: StudentSnapshot,
    pub total_marks: f64,
    pub total_max_marks: f64,
    pub percentage: f64,
    pub grade: Grade,
    pub gpa: f64,
    pub is_failed: bool,
    pub failed_subjects: Vec<String>,
    pub merit_position: usize,
    pub subjects: Vec<PublishedSubject>,
    pub display: Vec<DisplayEntry>,
}

pub fn format_for_publication(
    result: &StudentResult,
    student: &StudentProfile,
    subjects: &[SubjectDef],
    groups: &[SubjectGroup],
    meta: &PublicationMeta,
) -> PublishedResultRecord {
    let rows: Vec<PublishedSubject> = subjects
        .iter()
        .filter(|s| !s.is_degenerate())
        .map(|s| match result.subject_results.get(&s.subject_id) {
            Some(r) => PublishedSubject {
                subject_id: s.subject_id.clone(),
                subject_name: s.name.clone(),
                marks_obtained: r.total,
                max_marks: s.max_total(),
                mcq: r.mcq,
                written: r.written,
                grade: r.grade,
                gpa: r.gpa,
                is_fourth: r.is_fourth,
            },
            None => PublishedSubject {
                subject_id: s.subject_id.clone(),
                subject_name: s.name.clone(),
                marks_obtained: 0.0,
                max_marks: s.max_total(),
                mcq: 0.0,
                written: 0.0,
                grade: Grade::F,
                gpa: 0.0,
                is_fourth: false,
            },
        })
        .collect();

    let total_max_marks: f64 = rows.iter().map(|r| r.max_marks).sum();
    let percentage = if total_max_marks > 0.0 {
        grade::round_2_decimal(result.total_marks / total_max_marks * 100.0)
    } else {
        0.0
    };

    PublishedResultRecord {
        meta: meta.clone(),
        student: StudentSnapshot::from(student),
        total_marks: result.total_marks,
        total_max_marks,
        percentage,
        grade: result.final_grade,
        gpa: result.final_gpa,
        is_failed: result.is_failed,
        failed_subjects: result.failed_subjects.clone(),
        merit_position: result.merit_position,
        subjects: rows,
        display: grouping::merge_groups(result, subjects, groups),
    }
}

/// Records for a whole class outcome, in merit order.
pub fn format_class(
    snapshot: &ClassSnapshot,
    outcome: &ClassOutcome,
    meta: &PublicationMeta,
) -> Vec<PublishedResultRecord> {
    let profiles: HashMap<&str, &StudentProfile> = snapshot
        .students
        .iter()
        .map(|s| (s.student_id.as_str(), s))
        .collect();
    outcome
        .results
        .iter()
        .filter_map(|r| {
            profiles.get(r.student_id.as_str()).map(|p| {
                format_for_publication(r, p, &snapshot.subjects, &snapshot.groups, meta)
            })
        })
        .collect()
}
