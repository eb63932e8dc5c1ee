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

#[test]
fn backup_and_restore_preserve_published_results() {
    let workspace = temp_dir("resultsd-backup-src");
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
    let division_id = division["divisionId"]
        .as_str()
        .expect("divisionId")
        .to_string();
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "subject",
        "subjects.create",
        json!({ "actor": admin(), "divisionId": division_id, "name": "Geography" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "student",
        "students.create",
        json!({
            "actor": admin(),
            "divisionId": division_id,
            "rollNumber": 1,
            "lastName": "Mehta",
            "firstName": "Asha"
        }),
    );

    let upload_path = workspace.join("geo.csv");
    std::fs::write(
        &upload_path,
        "roll_number,ut1,ut2,terminal,annual_theory,annual_practical\n1,20,18,40,60,25\n",
    )
    .expect("write upload file");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "upload",
        "results.uploadDivision",
        json!({
            "actor": admin(),
            "divisionId": division_id,
            "subjectId": subject["subjectId"].as_str().expect("subjectId"),
            "path": upload_path.to_string_lossy()
        }),
    );

    // Backups are admin-only.
    let bundle_path = temp_dir("resultsd-bundle").join("school.zip");
    let as_teacher = request(
        &mut stdin,
        &mut reader,
        "backup-as-teacher",
        "workspace.backup",
        json!({
            "actor": { "role": "teacher", "id": "t-1" },
            "outPath": bundle_path.to_string_lossy()
        }),
    );
    assert_eq!(
        as_teacher["error"]["code"].as_str(),
        Some("forbidden"),
        "{}",
        as_teacher
    );

    let backup = request_ok(
        &mut stdin,
        &mut reader,
        "backup",
        "workspace.backup",
        json!({ "actor": admin(), "outPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(
        backup["bundleFormat"].as_str(),
        Some("resultsd-workspace-v1")
    );
    assert!(bundle_path.is_file(), "bundle written to disk");

    // Restore into a fresh workspace and read the same data back.
    let restored_workspace = temp_dir("resultsd-backup-dst");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "select-2",
        "workspace.select",
        json!({ "path": restored_workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "restore",
        "workspace.restore",
        json!({ "actor": admin(), "inPath": bundle_path.to_string_lossy() }),
    );

    let results = request_ok(
        &mut stdin,
        &mut reader,
        "results",
        "results.byDivision",
        json!({ "actor": admin(), "divisionId": division_id }),
    );
    let rows = results["results"].as_array().expect("results array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["total"].as_f64(), Some(81.5));
    assert_eq!(rows[0]["lastName"].as_str(), Some("Mehta"));
}

#[test]
fn restore_rejects_foreign_bundles() {
    let workspace = temp_dir("resultsd-restore-bad");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let bogus = workspace.join("not-a-bundle.zip");
    std::fs::write(&bogus, b"definitely not a zip").expect("write bogus file");

    let resp = request(
        &mut stdin,
        &mut reader,
        "restore",
        "workspace.restore",
        json!({ "actor": admin(), "inPath": bogus.to_string_lossy() }),
    );
    assert_eq!(resp["ok"].as_bool(), Some(false));
    assert_eq!(resp["error"]["code"].as_str(), Some("restore_failed"));

    // The daemon still serves the original workspace afterwards.
    let health = request_ok(&mut stdin, &mut reader, "health", "health", json!({}));
    assert_eq!(
        health["workspacePath"].as_str(),
        Some(workspace.to_string_lossy().as_ref())
    );
    let classes = request_ok(
        &mut stdin,
        &mut reader,
        "classes",
        "classes.list",
        json!({ "actor": admin() }),
    );
    assert_eq!(classes["classes"].as_array().map(|a| a.len()), Some(0));
}
