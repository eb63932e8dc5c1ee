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

fn admin() -> serde_json::Value {
    json!({ "role": "admin", "id": "admin-1" })
}

struct Seed {
    subject_id: String,
    teacher_id: String,
}

fn seed_roster(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, rolls: &[i64]) -> Seed {
    let class = request_ok(
        stdin,
        reader,
        "seed-class",
        "classes.create",
        json!({ "actor": admin(), "name": "Grade 8" }),
    );
    let class_id = class["classId"].as_str().expect("classId").to_string();

    let division = request_ok(
        stdin,
        reader,
        "seed-division",
        "divisions.create",
        json!({ "actor": admin(), "classId": class_id, "name": "8A" }),
    );
    let division_id = division["divisionId"]
        .as_str()
        .expect("divisionId")
        .to_string();

    let subject = request_ok(
        stdin,
        reader,
        "seed-subject",
        "subjects.create",
        json!({
            "actor": admin(),
            "divisionId": division_id,
            "name": "Science",
            "courseCode": "SCI8"
        }),
    );
    let subject_id = subject["subjectId"].as_str().expect("subjectId").to_string();

    let teacher = request_ok(
        stdin,
        reader,
        "seed-teacher",
        "teachers.create",
        json!({ "actor": admin(), "name": "M. Rao", "email": "m.rao@example.edu" }),
    );
    let teacher_id = teacher["teacherId"].as_str().expect("teacherId").to_string();

    for (i, roll) in rolls.iter().enumerate() {
        let _ = request_ok(
            stdin,
            reader,
            &format!("seed-student-{}", i),
            "students.create",
            json!({
                "actor": admin(),
                "divisionId": division_id,
                "rollNumber": roll,
                "lastName": format!("Student{}", roll),
                "firstName": "Test"
            }),
        );
    }

    Seed {
        subject_id,
        teacher_id,
    }
}

#[test]
fn one_bad_row_never_aborts_the_upload() {
    let workspace = temp_dir("resultsd-upload-partial");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seed = seed_roster(&mut stdin, &mut reader, &[1, 2, 3]);

    // Line 2 is valid; line 3 has an out-of-range UT1; line 4 references an
    // unknown roll number; line 5 leaves annual_practical blank.
    let upload_path = workspace.join("marks.csv");
    std::fs::write(
        &upload_path,
        "roll_number,ut1,ut2,terminal,annual_theory,annual_practical\n\
         1,20,18,40,60,25\n\
         2,26,18,40,60,25\n\
         99,20,18,40,60,25\n\
         3,20,18,40,60,\n",
    )
    .expect("write upload file");

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "upload",
        "results.upload",
        json!({
            "actor": { "role": "teacher", "id": seed.teacher_id },
            "subjectId": seed.subject_id,
            "path": upload_path.to_string_lossy()
        }),
    );

    assert_eq!(result["imported"].as_u64(), Some(1));
    let errors: Vec<&str> = result["errors"]
        .as_array()
        .expect("errors array")
        .iter()
        .map(|v| v.as_str().expect("error string"))
        .collect();
    assert_eq!(
        errors,
        vec![
            "Row 3: UT1 marks must be between 0 and 25",
            "Row 4: Student not found with roll number 99",
            "Row 5: Missing required fields: annual_practical",
        ]
    );

    // The valid row became a draft with computed total and remark.
    let drafts = request_ok(
        &mut stdin,
        &mut reader,
        "drafts",
        "results.drafts",
        json!({ "actor": { "role": "teacher", "id": seed.teacher_id } }),
    );
    let rows = drafts["results"].as_array().expect("results array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["rollNumber"].as_i64(), Some(1));
    assert_eq!(rows[0]["total"].as_f64(), Some(81.5));
    assert_eq!(rows[0]["remark"].as_str(), Some("Pass"));
    assert_eq!(rows[0]["status"].as_str(), Some("draft"));
}

#[test]
fn upload_with_unknown_subject_is_rejected_up_front() {
    let workspace = temp_dir("resultsd-upload-nosubject");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seed = seed_roster(&mut stdin, &mut reader, &[1]);

    let upload_path = workspace.join("marks.csv");
    std::fs::write(
        &upload_path,
        "roll_number,ut1,ut2,terminal,annual_theory,annual_practical\n1,20,18,40,60,25\n",
    )
    .expect("write upload file");

    let resp = request(
        &mut stdin,
        &mut reader,
        "upload",
        "results.upload",
        json!({
            "actor": { "role": "teacher", "id": seed.teacher_id },
            "subjectId": "no-such-subject",
            "path": upload_path.to_string_lossy()
        }),
    );
    assert_eq!(resp["ok"].as_bool(), Some(false));
    assert_eq!(resp["error"]["code"].as_str(), Some("not_found"));
}

#[test]
fn reupload_overwrites_existing_drafts() {
    let workspace = temp_dir("resultsd-upload-overwrite");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seed = seed_roster(&mut stdin, &mut reader, &[1]);
    let actor = json!({ "role": "teacher", "id": seed.teacher_id });

    let upload_path = workspace.join("marks.csv");
    std::fs::write(
        &upload_path,
        "roll_number,ut1,ut2,terminal,annual_theory,annual_practical\n1,20,18,40,60,25\n",
    )
    .expect("write upload file");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "upload-1",
        "results.upload",
        json!({
            "actor": actor,
            "subjectId": seed.subject_id,
            "path": upload_path.to_string_lossy()
        }),
    );

    std::fs::write(
        &upload_path,
        "roll_number,ut1,ut2,terminal,annual_theory,annual_practical\n1,5,5,10,10,0\n",
    )
    .expect("rewrite upload file");
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "upload-2",
        "results.upload",
        json!({
            "actor": actor,
            "subjectId": seed.subject_id,
            "path": upload_path.to_string_lossy()
        }),
    );
    assert_eq!(second["imported"].as_u64(), Some(1));

    let drafts = request_ok(
        &mut stdin,
        &mut reader,
        "drafts",
        "results.drafts",
        json!({ "actor": actor }),
    );
    let rows = drafts["results"].as_array().expect("results array");
    assert_eq!(rows.len(), 1, "same key upserts in place");
    assert_eq!(rows[0]["total"].as_f64(), Some(15.0));
    assert_eq!(rows[0]["remark"].as_str(), Some("Fail"));
}
