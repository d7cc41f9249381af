use crate::calc::{StudentResult, SubjectResult};
use crate::grade::{self, Grade};
use crate::model::{SubjectDef, SubjectGroup};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectLine {
    pub subject_id: String,
    pub subject_name: String,
    pub marks_obtained: f64,
    pub max_marks: f64,
    pub mcq: f64,
    pub written: f64,
    pub grade: Grade,
    pub gpa: f64,
    pub failed: bool,
    pub is_fourth: bool,
}

/// A constituent of a group row. Carries marks only; the group row is graded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberLine {
    pub subject_id: String,
    pub subject_name: String,
    pub mcq: f64,
    pub written: f64,
    pub total: f64,
    pub max_marks: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupLine {
    /// `group_<groupId>`
    pub subject_id: String,
    pub group_id: String,
    pub subject_name: String,
    pub marks_obtained: f64,
    pub max_marks: f64,
    pub mcq: f64,
    pub written: f64,
    pub grade: Grade,
    pub gpa: f64,
    pub members: Vec<MemberLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DisplayEntry {
    Subject(SubjectLine),
    Group(GroupLine),
}

pub fn group_display_id(group_id: &str) -> String {
    format!("group_{}", group_id)
}

fn subject_line(res: &SubjectResult) -> SubjectLine {
    SubjectLine {
        subject_id: res.subject_id.clone(),
        subject_name: res.subject_name.clone(),
        marks_obtained: res.total,
        max_marks: res.max_total,
        mcq: res.mcq,
        written: res.written,
        grade: res.grade,
        gpa: res.gpa,
        failed: res.failed,
        is_fourth: res.is_fourth,
    }
}

/// Subjects listed by more than one group, with the ids of those groups.
pub fn find_group_conflicts(groups: &[SubjectGroup]) -> Vec<(String, Vec<String>)> {
    let mut owners: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for g in groups {
        for sid in &g.member_subject_ids {
            let entry = owners.entry(sid.as_str()).or_default();
            if !entry.contains(&g.group_id) {
                entry.push(g.group_id.clone());
            }
        }
    }
    owners
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(sid, ids)| (sid.to_string(), ids))
        .collect()
}

/// Replace grouped subjects of one student's result with one graded row per
/// group. Ungrouped subjects keep configuration order; group rows follow in
/// group order. A subject listed by several groups goes to the first one.
pub fn merge_groups(
    result: &StudentResult,
    subjects: &[SubjectDef],
    groups: &[SubjectGroup],
) -> Vec<DisplayEntry> {
    let mut out = Vec::new();
    let mut members_by_group: Vec<Vec<&SubjectResult>> = vec![Vec::new(); groups.len()];

    for subject in subjects {
        let Some(res) = result.subject_results.get(&subject.subject_id) else {
            continue;
        };
        match groups.iter().position(|g| g.contains(&subject.subject_id)) {
            Some(idx) => members_by_group[idx].push(res),
            None => out.push(DisplayEntry::Subject(subject_line(res))),
        }
    }

    for (group, members) in groups.iter().zip(members_by_group) {
        if members.is_empty() {
            continue;
        }
        let marks_obtained: f64 = members.iter().map(|m| m.total).sum();
        let mcq: f64 = members.iter().map(|m| m.mcq).sum();
        let written: f64 = members.iter().map(|m| m.written).sum();
        let gp = grade::resolve_grade(marks_obtained, group.total_max_marks);

        out.push(DisplayEntry::Group(GroupLine {
            subject_id: group_display_id(&group.group_id),
            group_id: group.group_id.clone(),
            subject_name: group.name.clone(),
            marks_obtained,
            max_marks: group.total_max_marks,
            mcq,
            written,
            grade: gp.grade,
            gpa: gp.gpa,
            members: members
                .iter()
                .map(|m| MemberLine {
                    subject_id: m.subject_id.clone(),
                    subject_name: m.subject_name.clone(),
                    mcq: m.mcq,
                    written: m.written,
                    total: m.total,
                    max_marks: m.max_total,
                })
                .collect(),
        }));
    }
    out
}
