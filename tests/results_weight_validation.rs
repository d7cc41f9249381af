mod test_support;

use serde_json::json;
use test_support::{
    approx, error_code, request_err, request_ok, seed_school, spawn_sidecar, str_field, temp_dir,
};

#[test]
fn selection_is_rejected_before_any_student_is_computed() {
    let workspace = temp_dir("resultd-weights");
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
    let mid = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "exams.create",
            json!({ "schoolId": fx.school_id, "name": "Mid Term" }),
        ),
        "examId",
    );
    let fin = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "exams.create",
            json!({ "schoolId": fx.school_id, "name": "Final" }),
        ),
        "examId",
    );
    let select = |mode: &str, exams: serde_json::Value| {
        json!({
            "schoolId": fx.school_id,
            "classId": fx.class_id,
            "sectionIds": [fx.section_id],
            "mode": mode,
            "exams": exams
        })
    };

    let e = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "results.calculate",
        select(
            "combined",
            json!([{ "examId": mid, "weight": 40 }, { "examId": fin, "weight": 50 }]),
        ),
    );
    assert_eq!(error_code(&e), "invalid_weights");
    approx(e.pointer("/details/totalWeight").and_then(|v| v.as_f64()), 90.0);

    let e = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "results.publish",
        select(
            "combined",
            json!([{ "examId": mid, "weight": 60 }, { "examId": fin, "weight": 60 }]),
        ),
    );
    assert_eq!(error_code(&e), "invalid_weights");
    approx(e.pointer("/details/totalWeight").and_then(|v| v.as_f64()), 120.0);

    let e = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "results.calculate",
        select("combined", json!([{ "examId": mid, "weight": 40 }, { "examId": fin }])),
    );
    assert_eq!(error_code(&e), "invalid_weights");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "results.calculate",
        select("single", json!([{ "examId": mid }, { "examId": fin }])),
    );
    assert_eq!(error_code(&e), "invalid_selection");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "results.calculate",
        select(
            "combined",
            json!([{ "examId": mid, "weight": 50 }, { "examId": mid, "weight": 50 }]),
        ),
    );
    assert_eq!(error_code(&e), "invalid_selection");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "results.calculate",
        select("single", json!([])),
    );
    assert_eq!(error_code(&e), "invalid_selection");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "results.calculate",
        select("single", json!([{ "examId": "no-such-exam" }])),
    );
    assert_eq!(error_code(&e), "not_found");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "11",
        "results.calculate",
        json!({
            "schoolId": fx.school_id,
            "classId": fx.class_id,
            "sectionIds": [],
            "mode": "single",
            "exams": [{ "examId": mid }]
        }),
    );
    assert_eq!(error_code(&e), "invalid_selection");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "12",
        "results.calculate",
        json!({
            "schoolId": fx.school_id,
            "classId": fx.class_id,
            "sectionIds": [fx.section_id],
            "mode": "single",
            "exams": [{ "examId": mid }],
            "passMarks": { "mcq": 120, "written": 33 }
        }),
    );
    assert_eq!(error_code(&e), "invalid_pass_marks");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "13",
        "settings.passMarks.set",
        json!({ "schoolId": fx.school_id, "mcq": -1, "written": 33 }),
    );
    assert_eq!(error_code(&e), "invalid_pass_marks");

    // Within the 0.1 tolerance.
    let ok = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "results.calculate",
        select(
            "combined",
            json!([{ "examId": mid, "weight": 33.34 }, { "examId": fin, "weight": 66.7 }]),
        ),
    );
    assert!(str_field(&ok, "resultKey").starts_with("combined_"));

    // Nothing was published by any of the rejected calls.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "results.list",
        json!({ "schoolId": fx.school_id, "resultKey": mid }),
    );
    assert_eq!(
        listed.get("records").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
