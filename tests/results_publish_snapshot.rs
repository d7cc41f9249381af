mod test_support;

use serde_json::json;
use test_support::{request_ok, seed_school, spawn_sidecar, str_field, temp_dir};

#[test]
fn published_records_keep_identity_and_republish_replaces() {
    let workspace = temp_dir("resultd-publish");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed_school(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "subjects.configure",
        json!({
            "schoolId": fx.school_id,
            "classId": fx.class_id,
            "sectionId": fx.section_id,
            "subjects": [{ "subjectId": "eng", "name": "English", "maxWritten": 100 }]
        }),
    );
    let exam_id = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "exams.create",
            json!({ "schoolId": fx.school_id, "name": "Final" }),
        ),
        "examId",
    );
    let student_id = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "students.upsert",
            json!({
                "schoolId": fx.school_id,
                "classId": fx.class_id,
                "sectionId": fx.section_id,
                "name": "Golam Mostafa",
                "rollNumber": "12",
                "fatherName": "Abdul Mostafa"
            }),
        ),
        "studentId",
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "marks.set",
        json!({
            "schoolId": fx.school_id,
            "examId": exam_id,
            "classId": fx.class_id,
            "sectionId": fx.section_id,
            "entries": [{ "studentId": student_id, "subjectId": "eng", "written": 81 }]
        }),
    );
    let selection = json!({
        "schoolId": fx.school_id,
        "classId": fx.class_id,
        "sectionIds": [fx.section_id],
        "mode": "single",
        "exams": [{ "examId": exam_id }]
    });

    // A preview writes nothing.
    let _ = request_ok(&mut stdin, &mut reader, "5", "results.calculate", selection.clone());
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "results.list",
        json!({ "schoolId": fx.school_id, "resultKey": exam_id }),
    );
    assert_eq!(
        listed.get("records").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    let published = request_ok(&mut stdin, &mut reader, "7", "results.publish", selection.clone());
    assert_eq!(published.get("count").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(str_field(&published, "resultKey"), exam_id);
    let published_at = str_field(&published, "publishedAt");

    // Profile edits after publication do not reach the stored record.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.upsert",
        json!({
            "schoolId": fx.school_id,
            "classId": fx.class_id,
            "sectionId": fx.section_id,
            "studentId": student_id,
            "name": "Golam Mostafa Chowdhury",
            "rollNumber": "12"
        }),
    );
    let stored = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "results.student",
        json!({ "schoolId": fx.school_id, "studentId": student_id, "resultKey": exam_id }),
    );
    let rec = stored.pointer("/records/0").expect("record");
    assert_eq!(
        rec.pointer("/student/name").and_then(|v| v.as_str()),
        Some("Golam Mostafa")
    );
    assert_eq!(
        rec.pointer("/student/fatherName").and_then(|v| v.as_str()),
        Some("Abdul Mostafa")
    );
    assert_eq!(rec.get("publishedAt").and_then(|v| v.as_str()), Some(published_at.as_str()));
    assert_eq!(rec.get("grade").and_then(|v| v.as_str()), Some("A+"));

    // Republishing the same selection overwrites under the same key.
    let _ = request_ok(&mut stdin, &mut reader, "10", "results.publish", selection);
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "results.list",
        json!({ "schoolId": fx.school_id, "resultKey": exam_id }),
    );
    let records = listed
        .get("records")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].pointer("/student/name").and_then(|v| v.as_str()),
        Some("Golam Mostafa Chowdhury")
    );
    assert_eq!(records[0].get("meritPosition").and_then(|v| v.as_u64()), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
