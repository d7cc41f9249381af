use crate::grade::{self, Grade, GradePoint};
use crate::grouping;
use crate::merit;
use crate::model::{ClassSnapshot, ExamWeight, MarkSheet, PassMarks, ResultMode, StudentProfile, SubjectDef};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Allowed drift of combined exam weights around 100.
pub const WEIGHT_TOLERANCE: f64 = 0.1;
pub const MAX_GPA: f64 = 5.0;
/// Fourth subject grade points above this count as bonus.
pub const FOURTH_SUBJECT_BASE_GPA: f64 = 2.0;

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExamBreakdown {
    pub mcq: f64,
    pub written: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectResult {
    pub subject_id: String,
    pub subject_name: String,
    pub mcq: f64,
    pub written: f64,
    pub total: f64,
    pub max_total: f64,
    pub grade: Grade,
    pub gpa: f64,
    pub failed: bool,
    pub is_fourth: bool,
    pub exam_breakdown: BTreeMap<String, ExamBreakdown>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentResult {
    pub student_id: String,
    pub total_marks: f64,
    pub subject_results: BTreeMap<String, SubjectResult>,
    pub final_gpa: f64,
    pub final_grade: Grade,
    pub is_failed: bool,
    pub failed_subjects: Vec<String>,
    pub merit_position: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CalcWarning {
    #[serde(rename_all = "camelCase")]
    DegenerateSubject { subject_id: String, name: String },
    #[serde(rename_all = "camelCase")]
    SubjectInManyGroups {
        subject_id: String,
        group_ids: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStats {
    pub student_count: usize,
    pub pass_count: usize,
    pub fail_count: usize,
    pub pass_rate: f64,
    pub average_gpa: f64,
    pub highest_gpa: f64,
}

#[derive(Debug, Clone)]
pub struct ClassOutcome {
    /// Ranked, merit positions assigned.
    pub results: Vec<StudentResult>,
    pub warnings: Vec<CalcWarning>,
    pub stats: ClassStats,
}

pub fn validate_exam_weights(mode: ResultMode, exams: &[ExamWeight]) -> Result<(), CalcError> {
    if exams.is_empty() {
        return Err(CalcError::new(
            "invalid_selection",
            "select at least one exam",
        ));
    }

    let mut seen = HashSet::new();
    for e in exams {
        if !seen.insert(e.exam_id.as_str()) {
            return Err(CalcError::new("invalid_selection", "exam selected more than once")
                .with_details(json!({ "examId": e.exam_id })));
        }
        if !e.weight.is_finite() || e.weight < 0.0 {
            return Err(CalcError::new("invalid_weights", "exam weight must be a non-negative number")
                .with_details(json!({ "examId": e.exam_id, "weight": e.weight })));
        }
    }

    if mode == ResultMode::Single && exams.len() != 1 {
        return Err(CalcError::new(
            "invalid_selection",
            "single mode takes exactly one exam",
        )
        .with_details(json!({ "examCount": exams.len() })));
    }

    let total: f64 = exams.iter().map(|e| e.weight).sum();
    if (total - 100.0).abs() > WEIGHT_TOLERANCE {
        return Err(CalcError::new(
            "invalid_weights",
            format!("total weight must be 100%. Current: {}%", total),
        )
        .with_details(json!({ "totalWeight": total })));
    }
    Ok(())
}

pub fn validate_pass_marks(pass: &PassMarks) -> Result<(), CalcError> {
    let ok = |v: f64| v.is_finite() && (0.0..=100.0).contains(&v);
    if !ok(pass.mcq) || !ok(pass.written) {
        return Err(CalcError::new(
            "invalid_pass_marks",
            "pass marks must be percentages between 0 and 100",
        )
        .with_details(json!({ "mcq": pass.mcq, "written": pass.written })));
    }
    Ok(())
}

/// Weighted MCQ/written totals of one subject for one student, with
/// component-wise pass thresholds. `is_fourth` is left false for the caller.
pub fn aggregate_subject(
    subject: &SubjectDef,
    student_id: &str,
    exams: &[ExamWeight],
    marks: &MarkSheet,
    pass: &PassMarks,
) -> SubjectResult {
    let mut weighted_mcq = 0.0_f64;
    let mut weighted_written = 0.0_f64;
    let mut exam_breakdown = BTreeMap::new();

    for e in exams {
        let entry = marks.get(&e.exam_id, &subject.subject_id, student_id);
        exam_breakdown.insert(
            e.exam_id.clone(),
            ExamBreakdown {
                mcq: entry.mcq,
                written: entry.written,
                weight: e.weight,
            },
        );
        weighted_mcq += entry.mcq * (e.weight / 100.0);
        weighted_written += entry.written * (e.weight / 100.0);
    }

    let mcq_pass_mark = subject.max_mcq * pass.mcq / 100.0;
    let written_pass_mark = subject.max_written * pass.written / 100.0;
    let mcq_failed = subject.max_mcq > 0.0 && weighted_mcq < mcq_pass_mark;
    let written_failed = subject.max_written > 0.0 && weighted_written < written_pass_mark;
    let failed = mcq_failed || written_failed;

    let total = weighted_mcq + weighted_written;
    let max_total = subject.max_total();
    let GradePoint { grade, gpa } = if failed {
        GradePoint::FAIL
    } else {
        grade::resolve_grade(total, max_total)
    };

    SubjectResult {
        subject_id: subject.subject_id.clone(),
        subject_name: subject.name.clone(),
        mcq: weighted_mcq,
        written: weighted_written,
        total,
        max_total,
        grade,
        gpa,
        failed,
        is_fourth: false,
        exam_breakdown,
    }
}

pub fn fourth_subject_bonus(gpa: f64) -> f64 {
    if gpa > FOURTH_SUBJECT_BASE_GPA {
        gpa - FOURTH_SUBJECT_BASE_GPA
    } else {
        0.0
    }
}

/// Average mandatory grade points plus bonus, capped and rounded.
pub fn compose_final_gpa(mandatory_gpa_sum: f64, bonus: f64, mandatory_count: usize) -> f64 {
    if mandatory_count == 0 {
        return 0.0;
    }
    let raw = (mandatory_gpa_sum + bonus) / mandatory_count as f64;
    grade::round_2_decimal(raw.min(MAX_GPA))
}

fn is_fourth_for(student: &StudentProfile, subject: &SubjectDef) -> bool {
    match student.fourth_subject_id.as_deref() {
        Some(id) => id == subject.subject_id,
        None => subject.is_optional_fourth,
    }
}

pub fn calculate_student_result(
    student: &StudentProfile,
    subjects: &[SubjectDef],
    exams: &[ExamWeight],
    marks: &MarkSheet,
    pass: &PassMarks,
) -> StudentResult {
    let mut total_marks = 0.0_f64;
    let mut subject_results = BTreeMap::new();
    let mut mandatory_gpa_sum = 0.0_f64;
    let mut mandatory_count = 0_usize;
    let mut bonus = 0.0_f64;
    let mut fourth_taken = false;
    let mut is_failed = false;
    let mut failed_subjects = Vec::new();

    for subject in subjects {
        if subject.is_degenerate() {
            continue;
        }

        let mut res = aggregate_subject(subject, &student.student_id, exams, marks, pass);
        total_marks += res.total;

        // At most one fourth subject per student; later candidates count as mandatory.
        let is_fourth = !fourth_taken && is_fourth_for(student, subject);
        if is_fourth {
            fourth_taken = true;
            bonus = fourth_subject_bonus(res.gpa);
        } else {
            mandatory_gpa_sum += res.gpa;
            mandatory_count += 1;
            if res.failed {
                is_failed = true;
                failed_subjects.push(subject.name.clone());
            }
        }
        res.is_fourth = is_fourth;
        subject_results.insert(subject.subject_id.clone(), res);
    }

    let (final_gpa, final_grade) = if is_failed {
        (0.0, Grade::F)
    } else {
        let gpa = compose_final_gpa(mandatory_gpa_sum, bonus, mandatory_count);
        (gpa, grade::grade_for_gpa(gpa))
    };

    StudentResult {
        student_id: student.student_id.clone(),
        total_marks,
        subject_results,
        final_gpa,
        final_grade,
        is_failed,
        failed_subjects,
        merit_position: 0,
    }
}

pub fn class_stats(results: &[StudentResult]) -> ClassStats {
    let student_count = results.len();
    let fail_count = results.iter().filter(|r| r.is_failed).count();
    let pass_count = student_count - fail_count;
    let (pass_rate, average_gpa) = if student_count > 0 {
        (
            grade::round_2_decimal(100.0 * pass_count as f64 / student_count as f64),
            grade::round_2_decimal(
                results.iter().map(|r| r.final_gpa).sum::<f64>() / student_count as f64,
            ),
        )
    } else {
        (0.0, 0.0)
    };
    let highest_gpa = results.iter().map(|r| r.final_gpa).fold(0.0_f64, f64::max);

    ClassStats {
        student_count,
        pass_count,
        fail_count,
        pass_rate,
        average_gpa,
        highest_gpa,
    }
}

/// Validate the selection, compute every student and rank them.
pub fn calculate_class(snapshot: &ClassSnapshot) -> Result<ClassOutcome, CalcError> {
    let exams = snapshot.exam_weights();
    validate_exam_weights(snapshot.mode, &exams)?;
    validate_pass_marks(&snapshot.pass_marks)?;

    let mut warnings = Vec::new();
    for s in snapshot.subjects.iter().filter(|s| s.is_degenerate()) {
        warn!(subject_id = %s.subject_id, "skipping subject with no marks configured");
        warnings.push(CalcWarning::DegenerateSubject {
            subject_id: s.subject_id.clone(),
            name: s.name.clone(),
        });
    }
    for (subject_id, group_ids) in grouping::find_group_conflicts(&snapshot.groups) {
        warn!(%subject_id, groups = ?group_ids, "subject belongs to more than one group");
        warnings.push(CalcWarning::SubjectInManyGroups {
            subject_id,
            group_ids,
        });
    }

    let mut results: Vec<StudentResult> = snapshot
        .students
        .iter()
        .map(|st| {
            calculate_student_result(
                st,
                &snapshot.subjects,
                &exams,
                &snapshot.marks,
                &snapshot.pass_marks,
            )
        })
        .collect();
    merit::rank_results(&mut results);

    let stats = class_stats(&results);
    debug!(
        school = %snapshot.scope.school_id,
        class = %snapshot.class_id,
        students = stats.student_count,
        failed = stats.fail_count,
        "class results computed"
    );

    Ok(ClassOutcome {
        results,
        warnings,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExamRef, MarkEntry, SubjectGroup, TenantScope};
    use proptest::prelude::*;

    fn subject(id: &str, max_mcq: f64, max_written: f64) -> SubjectDef {
        SubjectDef {
            subject_id: id.to_string(),
            name: id.to_uppercase(),
            max_mcq,
            max_written,
            is_optional_fourth: false,
        }
    }

    fn student(id: &str) -> StudentProfile {
        StudentProfile {
            student_id: id.to_string(),
            name: format!("Student {}", id),
            roll_number: None,
            section_id: "sec-a".to_string(),
            section_name: "A".to_string(),
            father_name: None,
            mother_name: None,
            fourth_subject_id: None,
        }
    }

    fn single(exam_id: &str) -> Vec<ExamWeight> {
        vec![ExamWeight {
            exam_id: exam_id.to_string(),
            weight: 100.0,
        }]
    }

    fn mark(mcq: f64, written: f64) -> MarkEntry {
        MarkEntry { mcq, written }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn single_exam_subject_clears_both_thresholds() {
        let math = subject("math", 30.0, 70.0);
        let mut marks = MarkSheet::new();
        marks.insert("ex1", "math", "s1", mark(20.0, 40.0));

        let res = aggregate_subject(&math, "s1", &single("ex1"), &marks, &PassMarks::default());
        assert!(close(res.total, 60.0));
        assert_eq!(res.max_total, 100.0);
        assert!(!res.failed);
        // 60% sits on the A- lower bound of the grading table.
        assert_eq!(res.grade, Grade::AMinus);
        assert_eq!(res.gpa, 3.5);
        assert_eq!(res.exam_breakdown["ex1"].weight, 100.0);
    }

    #[test]
    fn component_failure_forces_f_despite_passing_total() {
        let math = subject("math", 30.0, 70.0);
        let mut marks = MarkSheet::new();
        marks.insert("ex1", "math", "s1", mark(5.0, 70.0));

        let res = aggregate_subject(&math, "s1", &single("ex1"), &marks, &PassMarks::default());
        assert!(close(res.total, 75.0));
        assert!(res.failed);
        assert_eq!(res.grade, Grade::F);
        assert_eq!(res.gpa, 0.0);
    }

    #[test]
    fn zero_max_component_is_never_checked() {
        let art = subject("art", 0.0, 50.0);
        let mut marks = MarkSheet::new();
        marks.insert("ex1", "art", "s1", mark(0.0, 40.0));

        let res = aggregate_subject(&art, "s1", &single("ex1"), &marks, &PassMarks::default());
        assert!(!res.failed);
        assert_eq!(res.grade, Grade::APlus);
    }

    #[test]
    fn missing_marks_read_as_zero() {
        let math = subject("math", 30.0, 70.0);
        let res = aggregate_subject(
            &math,
            "nobody",
            &single("ex1"),
            &MarkSheet::new(),
            &PassMarks::default(),
        );
        assert_eq!(res.total, 0.0);
        assert!(res.failed);
        assert_eq!(res.exam_breakdown["ex1"].mcq, 0.0);
    }

    #[test]
    fn combined_exams_use_linear_weighted_sum() {
        let sci = subject("sci", 100.0, 100.0);
        let mut marks = MarkSheet::new();
        marks.insert("a", "sci", "s1", mark(50.0, 50.0));
        marks.insert("b", "sci", "s1", mark(30.0, 30.0));
        let exams = vec![
            ExamWeight {
                exam_id: "a".into(),
                weight: 60.0,
            },
            ExamWeight {
                exam_id: "b".into(),
                weight: 40.0,
            },
        ];

        let res = aggregate_subject(&sci, "s1", &exams, &marks, &PassMarks::default());
        assert!(close(res.mcq, 42.0));
        assert!(close(res.written, 42.0));
        assert!(close(res.total, 84.0));
        assert_eq!(res.exam_breakdown.len(), 2);
    }

    #[test]
    fn weight_sum_outside_tolerance_is_rejected() {
        let weights = |a: f64, b: f64| {
            vec![
                ExamWeight {
                    exam_id: "a".into(),
                    weight: a,
                },
                ExamWeight {
                    exam_id: "b".into(),
                    weight: b,
                },
            ]
        };
        assert!(validate_exam_weights(ResultMode::Combined, &weights(60.0, 40.0)).is_ok());
        assert!(validate_exam_weights(ResultMode::Combined, &weights(60.0, 40.05)).is_ok());

        let e = validate_exam_weights(ResultMode::Combined, &weights(60.0, 30.0)).unwrap_err();
        assert_eq!(e.code, "invalid_weights");
        assert_eq!(e.details.unwrap()["totalWeight"], json!(90.0));

        let e = validate_exam_weights(ResultMode::Combined, &weights(60.0, 40.2)).unwrap_err();
        assert_eq!(e.code, "invalid_weights");
    }

    #[test]
    fn selection_shape_is_validated() {
        assert_eq!(
            validate_exam_weights(ResultMode::Single, &[]).unwrap_err().code,
            "invalid_selection"
        );
        let two = vec![
            ExamWeight {
                exam_id: "a".into(),
                weight: 50.0,
            },
            ExamWeight {
                exam_id: "b".into(),
                weight: 50.0,
            },
        ];
        assert_eq!(
            validate_exam_weights(ResultMode::Single, &two).unwrap_err().code,
            "invalid_selection"
        );
        let dup = vec![
            ExamWeight {
                exam_id: "a".into(),
                weight: 50.0,
            },
            ExamWeight {
                exam_id: "a".into(),
                weight: 50.0,
            },
        ];
        assert_eq!(
            validate_exam_weights(ResultMode::Combined, &dup).unwrap_err().code,
            "invalid_selection"
        );
    }

    #[test]
    fn pass_marks_must_be_percentages() {
        assert!(validate_pass_marks(&PassMarks::default()).is_ok());
        let bad = PassMarks {
            mcq: 120.0,
            written: 33.0,
        };
        assert_eq!(validate_pass_marks(&bad).unwrap_err().code, "invalid_pass_marks");
    }

    #[test]
    fn fourth_subject_bonus_scenario() {
        assert_eq!(fourth_subject_bonus(4.5), 2.5);
        assert_eq!(fourth_subject_bonus(2.0), 0.0);
        assert_eq!(fourth_subject_bonus(1.0), 0.0);
        assert_eq!(compose_final_gpa(12.0, 2.5, 3), 4.83);
        assert_eq!(compose_final_gpa(15.0, 3.0, 3), 5.0);
        assert_eq!(compose_final_gpa(0.0, 0.0, 0), 0.0);
    }

    #[test]
    fn student_with_fourth_subject_gets_bonus() {
        let mut subjects = vec![
            subject("bangla", 0.0, 100.0),
            subject("english", 0.0, 100.0),
            subject("math", 0.0, 100.0),
            subject("agri", 0.0, 100.0),
        ];
        subjects[3].is_optional_fourth = true;

        let mut marks = MarkSheet::new();
        marks.insert("ex1", "bangla", "s1", mark(0.0, 75.0)); // A 4.0
        marks.insert("ex1", "english", "s1", mark(0.0, 72.0)); // A 4.0
        marks.insert("ex1", "math", "s1", mark(0.0, 85.0)); // A+ 5.0
        marks.insert("ex1", "agri", "s1", mark(0.0, 90.0)); // A+ 5.0 -> bonus 3.0

        let res = calculate_student_result(
            &student("s1"),
            &subjects,
            &single("ex1"),
            &marks,
            &PassMarks::default(),
        );
        assert!(!res.is_failed);
        // (4 + 4 + 5 + 3) / 3 = 5.33 -> capped
        assert_eq!(res.final_gpa, 5.0);
        assert_eq!(res.final_grade, Grade::APlus);
        assert!(res.subject_results["agri"].is_fourth);
        assert!(close(res.total_marks, 322.0));
    }

    #[test]
    fn failed_fourth_subject_does_not_fail_student() {
        let mut subjects = vec![subject("bangla", 0.0, 100.0), subject("agri", 0.0, 100.0)];
        subjects[1].is_optional_fourth = true;
        let mut marks = MarkSheet::new();
        marks.insert("ex1", "bangla", "s1", mark(0.0, 55.0));
        marks.insert("ex1", "agri", "s1", mark(0.0, 10.0));

        let res = calculate_student_result(
            &student("s1"),
            &subjects,
            &single("ex1"),
            &marks,
            &PassMarks::default(),
        );
        assert!(!res.is_failed);
        assert!(res.subject_results["agri"].failed);
        assert_eq!(res.final_gpa, 3.0);
        assert_eq!(res.final_grade, Grade::B);
    }

    #[test]
    fn student_override_picks_fourth_subject() {
        let mut subjects = vec![
            subject("bio", 0.0, 100.0),
            subject("hmath", 0.0, 100.0),
            subject("phy", 0.0, 100.0),
        ];
        subjects[1].is_optional_fourth = true;
        let mut st = student("s1");
        st.fourth_subject_id = Some("bio".to_string());

        let mut marks = MarkSheet::new();
        marks.insert("ex1", "bio", "s1", mark(0.0, 20.0));
        marks.insert("ex1", "hmath", "s1", mark(0.0, 80.0));
        marks.insert("ex1", "phy", "s1", mark(0.0, 80.0));

        let res = calculate_student_result(&st, &subjects, &single("ex1"), &marks, &PassMarks::default());
        assert!(res.subject_results["bio"].is_fourth);
        assert!(!res.subject_results["hmath"].is_fourth);
        assert!(!res.is_failed);
        assert_eq!(res.final_gpa, 5.0);
    }

    #[test]
    fn only_first_flagged_subject_is_fourth() {
        let mut subjects = vec![
            subject("a", 0.0, 100.0),
            subject("b", 0.0, 100.0),
            subject("c", 0.0, 100.0),
        ];
        subjects[1].is_optional_fourth = true;
        subjects[2].is_optional_fourth = true;
        let mut marks = MarkSheet::new();
        for id in ["a", "b", "c"] {
            marks.insert("ex1", id, "s1", mark(0.0, 50.0));
        }

        let res = calculate_student_result(&student("s1"), &subjects, &single("ex1"), &marks, &PassMarks::default());
        let fourth: Vec<_> = res
            .subject_results
            .values()
            .filter(|r| r.is_fourth)
            .map(|r| r.subject_id.as_str())
            .collect();
        assert_eq!(fourth, vec!["b"]);
    }

    #[test]
    fn every_failed_mandatory_subject_is_listed() {
        let subjects = vec![
            subject("bangla", 0.0, 100.0),
            subject("english", 0.0, 100.0),
            subject("math", 0.0, 100.0),
        ];
        let mut marks = MarkSheet::new();
        marks.insert("ex1", "bangla", "s1", mark(0.0, 10.0));
        marks.insert("ex1", "english", "s1", mark(0.0, 95.0));
        marks.insert("ex1", "math", "s1", mark(0.0, 20.0));

        let res = calculate_student_result(&student("s1"), &subjects, &single("ex1"), &marks, &PassMarks::default());
        assert!(res.is_failed);
        assert_eq!(res.final_gpa, 0.0);
        assert_eq!(res.final_grade, Grade::F);
        assert_eq!(res.failed_subjects, vec!["BANGLA".to_string(), "MATH".to_string()]);
    }

    #[test]
    fn no_subjects_yields_zero_f() {
        let res = calculate_student_result(&student("s1"), &[], &single("ex1"), &MarkSheet::new(), &PassMarks::default());
        assert_eq!(res.final_gpa, 0.0);
        assert_eq!(res.final_grade, Grade::F);
        assert!(!res.is_failed);
    }

    #[test]
    fn degenerate_subjects_contribute_nothing() {
        let subjects = vec![subject("math", 0.0, 100.0), subject("void", 0.0, 0.0)];
        let mut marks = MarkSheet::new();
        marks.insert("ex1", "math", "s1", mark(0.0, 80.0));
        marks.insert("ex1", "void", "s1", mark(0.0, 30.0));

        let res = calculate_student_result(&student("s1"), &subjects, &single("ex1"), &marks, &PassMarks::default());
        assert!(!res.subject_results.contains_key("void"));
        assert_eq!(res.total_marks, 80.0);
        assert_eq!(res.final_gpa, 5.0);
    }

    fn snapshot(students: Vec<StudentProfile>, marks: MarkSheet) -> ClassSnapshot {
        ClassSnapshot {
            scope: TenantScope::new("school-1"),
            class_id: "class-9".into(),
            class_name: "Nine".into(),
            mode: ResultMode::Single,
            exams: vec![ExamRef {
                exam_id: "ex1".into(),
                name: "Half Yearly".into(),
                weight: 100.0,
            }],
            subjects: vec![subject("math", 30.0, 70.0), subject("void", 0.0, 0.0)],
            groups: vec![
                SubjectGroup {
                    group_id: "g1".into(),
                    name: "One".into(),
                    member_subject_ids: vec!["math".into(), "x".into()],
                    total_max_marks: 200.0,
                },
                SubjectGroup {
                    group_id: "g2".into(),
                    name: "Two".into(),
                    member_subject_ids: vec!["math".into(), "y".into()],
                    total_max_marks: 200.0,
                },
            ],
            students,
            marks,
            pass_marks: PassMarks::default(),
        }
    }

    #[test]
    fn class_calculation_ranks_and_reports_warnings() {
        let mut marks = MarkSheet::new();
        marks.insert("ex1", "math", "s1", mark(20.0, 40.0));
        marks.insert("ex1", "math", "s2", mark(28.0, 65.0));
        marks.insert("ex1", "math", "s3", mark(2.0, 65.0));
        let snap = snapshot(vec![student("s1"), student("s2"), student("s3")], marks);

        let out = calculate_class(&snap).expect("calculate");
        let order: Vec<_> = out.results.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(order, vec!["s2", "s1", "s3"]);
        assert_eq!(out.results[0].merit_position, 1);
        assert_eq!(out.results[2].merit_position, 3);
        assert_eq!(out.stats.fail_count, 1);
        assert_eq!(out.stats.pass_count, 2);
        assert_eq!(out.stats.highest_gpa, 5.0);
        assert_eq!(out.warnings.len(), 2);
        assert!(matches!(out.warnings[0], CalcWarning::DegenerateSubject { .. }));
    }

    #[test]
    fn bad_weights_abort_before_any_student() {
        let mut snap = snapshot(vec![student("s1")], MarkSheet::new());
        snap.exams[0].weight = 90.0;
        let e = calculate_class(&snap).unwrap_err();
        assert_eq!(e.code, "invalid_weights");
    }

    fn arb_marks() -> impl Strategy<Value = Vec<(f64, f64)>> {
        prop::collection::vec((0.0_f64..=30.0, 0.0_f64..=70.0), 1..6)
    }

    proptest! {
        #[test]
        fn final_gpa_stays_in_bounds_and_fail_dominates(scores in arb_marks(), fourth in any::<bool>()) {
            let mut subjects = Vec::new();
            let mut marks = MarkSheet::new();
            for (i, (m, w)) in scores.iter().enumerate() {
                let id = format!("sub{}", i);
                let mut s = subject(&id, 30.0, 70.0);
                s.is_optional_fourth = fourth && i == 0;
                subjects.push(s);
                marks.insert("ex1", &id, "s1", mark(*m, *w));
            }
            let st = student("s1");
            let res = calculate_student_result(&st, &subjects, &single("ex1"), &marks, &PassMarks::default());
            prop_assert!(res.final_gpa >= 0.0 && res.final_gpa <= MAX_GPA);
            if res.is_failed {
                prop_assert_eq!(res.final_gpa, 0.0);
                prop_assert_eq!(res.final_grade, Grade::F);
            }
            let again = calculate_student_result(&st, &subjects, &single("ex1"), &marks, &PassMarks::default());
            prop_assert_eq!(res, again);
        }
    }
}
