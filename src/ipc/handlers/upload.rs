use crate::ingest::{self, RawRow};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{param_str, require_role, HandlerErr, Role};
use crate::ipc::types::{AppState, Request};
use crate::marks::{self, RawMarks};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

use super::drafts::upsert_draft;

fn raw_marks_from_row(row: &RawRow) -> RawMarks {
    RawMarks {
        ut1: row.get("ut1").map(|s| s.to_string()),
        ut2: row.get("ut2").map(|s| s.to_string()),
        terminal: row.get("terminal").map(|s| s.to_string()),
        annual_theory: row.get("annual_theory").map(|s| s.to_string()),
        annual_practical: row.get("annual_practical").map(|s| s.to_string()),
    }
}

fn resolve_roll_global(conn: &Connection, roll: i64) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT id FROM students
         WHERE roll_number = ? AND active = 1
         ORDER BY rowid LIMIT 1",
        [roll],
        |r| r.get(0),
    )
    .optional()
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn resolve_roll_in_division(
    conn: &Connection,
    division_id: &str,
    roll: i64,
) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT id FROM students WHERE division_id = ? AND roll_number = ?",
        (division_id, roll),
        |r| r.get(0),
    )
    .optional()
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

/// Teacher self-service upload: every valid row lands as a draft owned by
/// the caller. Row failures are accumulated with their spreadsheet line
/// number (+2: 1-based plus the header row) and never abort the batch.
fn handle_results_upload(state: &mut AppState, req: &Request) -> serde_json::Value {
    let caller = match require_role(req, Role::Teacher) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match param_str(req, "subjectId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let path = match param_str(req, "path") {
        Ok(v) => PathBuf::from(v),
        Err(resp) => return resp,
    };

    let subject_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if subject_exists.is_none() {
        return err(&req.id, "not_found", "subject not found", None);
    }

    let table = match ingest::parse_table_file(&path) {
        Ok(t) => t,
        Err(e) => return err(&req.id, "bad_params", format!("{e:#}"), None),
    };

    let mut imported: usize = 0;
    let mut errors: Vec<String> = Vec::new();

    for (i, row) in table.rows.iter().enumerate() {
        let line = i + 2;

        let roll_text = row.get("roll_number");
        let extra_missing: &[&str] = if roll_text.is_none() {
            &["roll_number"]
        } else {
            &[]
        };
        let raw = raw_marks_from_row(row);
        let components = match marks::validate(&raw, extra_missing) {
            Ok(c) => c,
            Err(e) => {
                errors.push(format!("Row {}: {}", line, e.message()));
                continue;
            }
        };

        let roll_text = roll_text.unwrap_or_default();
        let student_id = match roll_text.parse::<i64>() {
            Ok(roll) => match resolve_roll_global(conn, roll) {
                Ok(v) => v,
                Err(e) => {
                    errors.push(format!("Row {}: {}", line, e.message));
                    continue;
                }
            },
            Err(_) => None,
        };
        let Some(student_id) = student_id else {
            errors.push(format!(
                "Row {}: Student not found with roll number {}",
                line, roll_text
            ));
            continue;
        };

        let agg = marks::aggregate(&components);
        match upsert_draft(conn, &caller.id, &student_id, &subject_id, &components, &agg) {
            Ok(()) => imported += 1,
            Err(e) => errors.push(format!("Row {}: {}", line, e.message)),
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

/// Admin upload straight into the published results for one division. Rows
/// resolve roll numbers inside that division only, and the write bypasses
/// the draft lifecycle entirely (upsert on student+subject).
fn handle_results_upload_division(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let subject_id = match param_str(req, "subjectId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let path = match param_str(req, "path") {
        Ok(v) => PathBuf::from(v),
        Err(resp) => return resp,
    };

    for (table, id) in [("divisions", &division_id), ("subjects", &subject_id)] {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
        let exists: Option<i64> = match conn.query_row(&sql, [id], |r| r.get(0)).optional() {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if exists.is_none() {
            return err(
                &req.id,
                "not_found",
                format!("{} row not found", table),
                Some(json!({ "id": id })),
            );
        }
    }

    let parsed = match ingest::parse_table_file(&path) {
        Ok(t) => t,
        Err(e) => return err(&req.id, "bad_params", format!("{e:#}"), None),
    };

    let mut imported: usize = 0;
    let mut errors: Vec<String> = Vec::new();

    for (i, row) in parsed.rows.iter().enumerate() {
        let line = i + 2;

        let roll_text = row.get("roll_number");
        let extra_missing: &[&str] = if roll_text.is_none() {
            &["roll_number"]
        } else {
            &[]
        };
        let raw = raw_marks_from_row(row);
        let components = match marks::validate(&raw, extra_missing) {
            Ok(c) => c,
            Err(e) => {
                errors.push(format!("Row {}: {}", line, e.message()));
                continue;
            }
        };

        let roll_text = roll_text.unwrap_or_default();
        let student_id = match roll_text.parse::<i64>() {
            Ok(roll) => match resolve_roll_in_division(conn, &division_id, roll) {
                Ok(v) => v,
                Err(e) => {
                    errors.push(format!("Row {}: {}", line, e.message));
                    continue;
                }
            },
            Err(_) => None,
        };
        let Some(student_id) = student_id else {
            errors.push(format!(
                "Row {}: Student not found with roll number {}",
                line, roll_text
            ));
            continue;
        };

        let agg = marks::aggregate(&components);
        let public_id = Uuid::new_v4().to_string();
        let res = conn.execute(
            "INSERT INTO results(
                id, student_id, subject_id,
                ut1, ut2, terminal, annual_theory, annual_practical,
                total, remark, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                    strftime('%Y-%m-%dT%H:%M:%SZ','now'))
             ON CONFLICT(student_id, subject_id) DO UPDATE SET
               ut1 = excluded.ut1,
               ut2 = excluded.ut2,
               terminal = excluded.terminal,
               annual_theory = excluded.annual_theory,
               annual_practical = excluded.annual_practical,
               total = excluded.total,
               remark = excluded.remark,
               updated_at = excluded.updated_at",
            (
                &public_id,
                &student_id,
                &subject_id,
                components.ut1,
                components.ut2,
                components.terminal,
                components.annual_theory,
                components.annual_practical,
                agg.total,
                agg.remark.as_str(),
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
        "results.upload" => Some(handle_results_upload(state, req)),
        "results.uploadDivision" => Some(handle_results_upload_division(state, req)),
        _ => None,
    }
}
