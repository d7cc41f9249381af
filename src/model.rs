use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Explicit school scope for every read and write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantScope {
    pub school_id: String,
}

impl TenantScope {
    pub fn new(school_id: impl Into<String>) -> Self {
        Self {
            school_id: school_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectDef {
    pub subject_id: String,
    pub name: String,
    pub max_mcq: f64,
    pub max_written: f64,
    #[serde(default, rename = "isFourth")]
    pub is_optional_fourth: bool,
}

impl SubjectDef {
    pub fn max_total(&self) -> f64 {
        self.max_mcq + self.max_written
    }

    /// Both components carry zero marks; such a subject contributes nothing.
    pub fn is_degenerate(&self) -> bool {
        self.max_mcq <= 0.0 && self.max_written <= 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultMode {
    Single,
    Combined,
}

impl ResultMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultMode::Single => "single",
            ResultMode::Combined => "combined",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamWeight {
    pub exam_id: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamRef {
    pub exam_id: String,
    pub name: String,
    pub weight: f64,
}

/// One MCQ/written pair as entered. Absent entries read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkEntry {
    #[serde(default)]
    pub mcq: f64,
    #[serde(default)]
    pub written: f64,
}

/// Raw marks of a class snapshot keyed by (exam, subject, student).
#[derive(Debug, Clone, Default)]
pub struct MarkSheet {
    entries: HashMap<(String, String, String), MarkEntry>,
}

impl MarkSheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, exam_id: &str, subject_id: &str, student_id: &str, entry: MarkEntry) {
        self.entries.insert(
            (
                exam_id.to_string(),
                subject_id.to_string(),
                student_id.to_string(),
            ),
            entry,
        );
    }

    pub fn get(&self, exam_id: &str, subject_id: &str, student_id: &str) -> MarkEntry {
        self.entries
            .get(&(
                exam_id.to_string(),
                subject_id.to_string(),
                student_id.to_string(),
            ))
            .copied()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectGroup {
    pub group_id: String,
    pub name: String,
    pub member_subject_ids: Vec<String>,
    pub total_max_marks: f64,
}

impl SubjectGroup {
    pub fn contains(&self, subject_id: &str) -> bool {
        self.member_subject_ids.iter().any(|s| s == subject_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub student_id: String,
    pub name: String,
    pub roll_number: Option<String>,
    pub section_id: String,
    pub section_name: String,
    pub father_name: Option<String>,
    pub mother_name: Option<String>,
    pub fourth_subject_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PassMarks {
    pub mcq: f64,
    pub written: f64,
}

impl Default for PassMarks {
    fn default() -> Self {
        Self {
            mcq: 33.0,
            written: 33.0,
        }
    }
}

/// Fully materialized inputs for one calculation run.
#[derive(Debug, Clone)]
pub struct ClassSnapshot {
    pub scope: TenantScope,
    pub class_id: String,
    pub class_name: String,
    pub mode: ResultMode,
    pub exams: Vec<ExamRef>,
    pub subjects: Vec<SubjectDef>,
    pub groups: Vec<SubjectGroup>,
    pub students: Vec<StudentProfile>,
    pub marks: MarkSheet,
    pub pass_marks: PassMarks,
}

impl ClassSnapshot {
    pub fn exam_weights(&self) -> Vec<ExamWeight> {
        self.exams
            .iter()
            .map(|e| ExamWeight {
                exam_id: e.exam_id.clone(),
                weight: e.weight,
            })
            .collect()
    }
}
