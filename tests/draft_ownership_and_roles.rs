use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_resultsd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn resultsd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(resp: &serde_json::Value) -> Option<&str> {
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

fn admin() -> serde_json::Value {
    json!({ "role": "admin", "id": "admin-1" })
}

#[test]
fn ownership_and_role_checks_are_enforced() {
    let workspace = temp_dir("resultsd-ownership");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let class = request_ok(
        &mut stdin,
        &mut reader,
        "class",
        "classes.create",
        json!({ "actor": admin(), "name": "Grade 8" }),
    );
    let division = request_ok(
        &mut stdin,
        &mut reader,
        "division",
        "divisions.create",
        json!({
            "actor": admin(),
            "classId": class["classId"].as_str().expect("classId"),
            "name": "8A"
        }),
    );
    let division_id = division["divisionId"].as_str().expect("divisionId");
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "subject",
        "subjects.create",
        json!({ "actor": admin(), "divisionId": division_id, "name": "History" }),
    );
    let subject_id = subject["subjectId"].as_str().expect("subjectId");

    let t1 = request_ok(
        &mut stdin,
        &mut reader,
        "teacher-1",
        "teachers.create",
        json!({ "actor": admin(), "name": "A. One", "email": "one@example.edu" }),
    );
    let t2 = request_ok(
        &mut stdin,
        &mut reader,
        "teacher-2",
        "teachers.create",
        json!({ "actor": admin(), "name": "B. Two", "email": "two@example.edu" }),
    );
    let teacher1 = json!({ "role": "teacher", "id": t1["teacherId"].as_str().expect("id") });
    let teacher2 = json!({ "role": "teacher", "id": t2["teacherId"].as_str().expect("id") });

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "student",
        "students.create",
        json!({
            "actor": admin(),
            "divisionId": division_id,
            "rollNumber": 1,
            "lastName": "Kaur",
            "firstName": "Simran"
        }),
    );
    let student_id = student["studentId"].as_str().expect("studentId");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "save",
        "results.saveDrafts",
        json!({
            "actor": teacher1,
            "subjectId": subject_id,
            "results": [{
                "studentId": student_id,
                "ut1": 20, "ut2": 18, "terminal": 40,
                "annualTheory": 60, "annualPractical": 25
            }]
        }),
    );
    let drafts = request_ok(
        &mut stdin,
        &mut reader,
        "drafts",
        "results.drafts",
        json!({ "actor": teacher1 }),
    );
    let draft_id = drafts["results"][0]["id"].as_str().expect("draft id");

    // Another teacher cannot edit the draft.
    let stolen = request(
        &mut stdin,
        &mut reader,
        "steal",
        "results.updateScores",
        json!({ "actor": teacher2, "draftId": draft_id, "ut1": 0 }),
    );
    assert_eq!(error_code(&stolen), Some("forbidden"));

    // Another teacher's submit sweep does not touch it.
    let other_submit = request_ok(
        &mut stdin,
        &mut reader,
        "other-submit",
        "results.submit",
        json!({ "actor": teacher2 }),
    );
    assert_eq!(other_submit["submitted"].as_u64(), Some(0));
    let drafts = request_ok(
        &mut stdin,
        &mut reader,
        "drafts-after",
        "results.drafts",
        json!({ "actor": teacher1 }),
    );
    assert_eq!(drafts["results"].as_array().map(|a| a.len()), Some(1));

    // The owner's partial edit recomputes the aggregate.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "edit",
        "results.updateScores",
        json!({ "actor": teacher1, "draftId": draft_id, "ut1": 10 }),
    );
    assert_eq!(updated["total"].as_f64(), Some(76.5));
    assert_eq!(updated["remark"].as_str(), Some("Pass"));

    // An invalid merged set is rejected.
    let invalid = request(
        &mut stdin,
        &mut reader,
        "edit-invalid",
        "results.updateScores",
        json!({ "actor": teacher1, "draftId": draft_id, "annualTheory": 90 }),
    );
    assert_eq!(error_code(&invalid), Some("validation_failed"));

    // Submitted records are no longer editable.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "submit",
        "results.submit",
        json!({ "actor": teacher1 }),
    );
    let locked = request(
        &mut stdin,
        &mut reader,
        "edit-locked",
        "results.updateScores",
        json!({ "actor": teacher1, "draftId": draft_id, "ut1": 12 }),
    );
    assert_eq!(error_code(&locked), Some("invalid_status"));

    // Workflow transitions are admin-only; list endpoints are role-gated.
    let approve_as_teacher = request(
        &mut stdin,
        &mut reader,
        "approve-as-teacher",
        "results.approve",
        json!({ "actor": teacher1, "resultId": draft_id }),
    );
    assert_eq!(error_code(&approve_as_teacher), Some("forbidden"));

    let drafts_as_student = request(
        &mut stdin,
        &mut reader,
        "drafts-as-student",
        "results.drafts",
        json!({ "actor": { "role": "student", "id": student_id } }),
    );
    assert_eq!(error_code(&drafts_as_student), Some("forbidden"));

    let no_actor = request(
        &mut stdin,
        &mut reader,
        "no-actor",
        "results.submit",
        json!({}),
    );
    assert_eq!(error_code(&no_actor), Some("unauthorized"));
}
