use crate::ingest;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{actor, param_str, require_role, Role};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = actor(req) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    let division_id = match param_str(req, "divisionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, roll_number, last_name, first_name, active
         FROM students
         WHERE division_id = ?
         ORDER BY roll_number",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&division_id], |row| {
            let id: String = row.get(0)?;
            let roll_number: i64 = row.get(1)?;
            let last_name: String = row.get(2)?;
            let first_name: String = row.get(3)?;
            let active: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "rollNumber": roll_number,
                "lastName": last_name,
                "firstName": first_name,
                "active": active != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let division_id = match param_str(req, "divisionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let roll_number = match req.params.get("rollNumber").and_then(|v| v.as_i64()) {
        Some(v) if v > 0 => v,
        _ => return err(&req.id, "bad_params", "missing/invalid rollNumber", None),
    };
    let last_name = match param_str(req, "lastName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let first_name = match param_str(req, "firstName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM divisions WHERE id = ?", [&division_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "division not found", None);
    }

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, division_id, roll_number, last_name, first_name, active, updated_at)
         VALUES(?, ?, ?, ?, ?, 1, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&student_id, &division_id, roll_number, &last_name, &first_name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(
        &req.id,
        json!({ "studentId": student_id, "rollNumber": roll_number }),
    )
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match param_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind: Vec<rusqlite::types::Value> = Vec::new();

    if let Some(v) = req.params.get("rollNumber").and_then(|v| v.as_i64()) {
        if v <= 0 {
            return err(&req.id, "bad_params", "rollNumber must be positive", None);
        }
        set_parts.push("roll_number = ?".into());
        bind.push(rusqlite::types::Value::Integer(v));
    }
    if let Some(v) = req.params.get("lastName").and_then(|v| v.as_str()) {
        set_parts.push("last_name = ?".into());
        bind.push(rusqlite::types::Value::Text(v.trim().to_string()));
    }
    if let Some(v) = req.params.get("firstName").and_then(|v| v.as_str()) {
        set_parts.push("first_name = ?".into());
        bind.push(rusqlite::types::Value::Text(v.trim().to_string()));
    }
    if let Some(v) = req.params.get("active").and_then(|v| v.as_bool()) {
        set_parts.push("active = ?".into());
        bind.push(rusqlite::types::Value::Integer(if v { 1 } else { 0 }));
    }

    if set_parts.is_empty() {
        return err(&req.id, "bad_params", "no fields to update", None);
    }
    set_parts.push("updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')".into());

    let sql = format!(
        "UPDATE students SET {} WHERE id = ?",
        set_parts.join(", ")
    );
    bind.push(rusqlite::types::Value::Text(student_id.clone()));

    match conn.execute(&sql, rusqlite::params_from_iter(bind)) {
        Ok(0) => err(&req.id, "not_found", "student not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        ),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match param_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let steps: [(&str, &str); 3] = [
        (
            "buffered_results",
            "DELETE FROM buffered_results WHERE student_id = ?",
        ),
        ("results", "DELETE FROM results WHERE student_id = ?"),
        ("students", "DELETE FROM students WHERE id = ?"),
    ];

    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [&student_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

/// Bulk roster import: one row per student, columns roll_number, last_name,
/// first_name. Bad rows are reported with their spreadsheet line number and
/// never abort the rest of the file.
fn handle_students_upload(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let division_id = match param_str(req, "divisionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let path = match param_str(req, "path") {
        Ok(v) => PathBuf::from(v),
        Err(resp) => return resp,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM divisions WHERE id = ?", [&division_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "division not found", None);
    }

    let table = match ingest::parse_table_file(&path) {
        Ok(t) => t,
        Err(e) => return err(&req.id, "bad_params", format!("{e:#}"), None),
    };

    let mut imported: usize = 0;
    let mut errors: Vec<String> = Vec::new();

    for (i, row) in table.rows.iter().enumerate() {
        let line = i + 2;

        let mut missing: Vec<&str> = Vec::new();
        let roll_text = row.get("roll_number");
        if roll_text.is_none() {
            missing.push("roll_number");
        }
        let last_name = row.get("last_name");
        if last_name.is_none() {
            missing.push("last_name");
        }
        let first_name = row.get("first_name");
        if first_name.is_none() {
            missing.push("first_name");
        }
        if !missing.is_empty() {
            errors.push(format!(
                "Row {}: Missing required fields: {}",
                line,
                missing.join(", ")
            ));
            continue;
        }

        let roll_number = match roll_text.and_then(|t| t.parse::<i64>().ok()) {
            Some(v) if v > 0 => v,
            _ => {
                errors.push(format!(
                    "Row {}: roll_number must be a positive number",
                    line
                ));
                continue;
            }
        };

        let student_id = Uuid::new_v4().to_string();
        let res = conn.execute(
            "INSERT INTO students(id, division_id, roll_number, last_name, first_name, active, updated_at)
             VALUES(?, ?, ?, ?, ?, 1, strftime('%Y-%m-%dT%H:%M:%SZ','now'))
             ON CONFLICT(division_id, roll_number) DO UPDATE SET
               last_name = excluded.last_name,
               first_name = excluded.first_name,
               active = 1,
               updated_at = excluded.updated_at",
            (
                &student_id,
                &division_id,
                roll_number,
                last_name.unwrap_or_default(),
                first_name.unwrap_or_default(),
            ),
        );
        match res {
            Ok(_) => imported += 1,
            Err(e) => errors.push(format!("Row {}: {}", line, e)),
        }
    }

    let mut result = json!({ "imported": imported });
    if !errors.is_empty() {
        result
            .as_object_mut()
            .expect("result should be object")
            .insert("errors".into(), json!(errors));
    }
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "students.upload" => Some(handle_students_upload(state, req)),
        _ => None,
    }
}
