use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{param_str, require_role, Role};
use crate::ipc::types::{AppState, Request};
use crate::marks::DraftStatus;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

/// One sweep per teacher: every draft-status record they own becomes
/// submitted. Records in other states, and other teachers' records, are
/// untouched. There is no row-level submit.
fn handle_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let caller = match require_role(req, Role::Teacher) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match conn.execute(
        "UPDATE buffered_results
         SET status = 'submitted',
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE teacher_id = ? AND status = 'draft'",
        [&caller.id],
    ) {
        Ok(n) => ok(&req.id, json!({ "submitted": n })),
        Err(e) => err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "buffered_results" })),
        ),
    }
}

fn handle_submitted_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "results": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           b.id, b.student_id, b.subject_id, b.teacher_id,
           b.ut1, b.ut2, b.terminal, b.annual_theory, b.annual_practical,
           b.total, b.remark,
           s.roll_number, s.last_name, s.first_name,
           sub.name, t.name
         FROM buffered_results b
         JOIN students s ON s.id = b.student_id
         JOIN subjects sub ON sub.id = b.subject_id
         JOIN teachers t ON t.id = b.teacher_id
         WHERE b.status = 'submitted'
         ORDER BY s.roll_number ASC, b.rowid ASC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "studentId": row.get::<_, String>(1)?,
                "subjectId": row.get::<_, String>(2)?,
                "teacherId": row.get::<_, String>(3)?,
                "ut1": row.get::<_, f64>(4)?,
                "ut2": row.get::<_, f64>(5)?,
                "terminal": row.get::<_, f64>(6)?,
                "annualTheory": row.get::<_, f64>(7)?,
                "annualPractical": row.get::<_, f64>(8)?,
                "total": row.get::<_, f64>(9)?,
                "remark": row.get::<_, String>(10)?,
                "rollNumber": row.get::<_, i64>(11)?,
                "lastName": row.get::<_, String>(12)?,
                "firstName": row.get::<_, String>(13)?,
                "subjectName": row.get::<_, String>(14)?,
                "teacherName": row.get::<_, String>(15)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(results) => ok(&req.id, json!({ "results": results })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

struct BufferedRow {
    student_id: String,
    subject_id: String,
    ut1: f64,
    ut2: f64,
    terminal: f64,
    annual_theory: f64,
    annual_practical: f64,
    total: f64,
    remark: String,
    status: String,
}

fn load_buffered(
    conn: &rusqlite::Connection,
    result_id: &str,
) -> Result<Option<BufferedRow>, rusqlite::Error> {
    conn.query_row(
        "SELECT student_id, subject_id, ut1, ut2, terminal,
                annual_theory, annual_practical, total, remark, status
         FROM buffered_results WHERE id = ?",
        [result_id],
        |r| {
            Ok(BufferedRow {
                student_id: r.get(0)?,
                subject_id: r.get(1)?,
                ut1: r.get(2)?,
                ut2: r.get(3)?,
                terminal: r.get(4)?,
                annual_theory: r.get(5)?,
                annual_practical: r.get(6)?,
                total: r.get(7)?,
                remark: r.get(8)?,
                status: r.get(9)?,
            })
        },
    )
    .optional()
}

/// Publishes one submitted record: the public result row is upserted on
/// (student_id, subject_id) and the source flips to approved, both inside a
/// single transaction so a crash can never leave an approved draft without
/// its published counterpart. Approving a fresh draft for the same student
/// and subject later simply overwrites the public row.
fn handle_approve(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let result_id = match param_str(req, "resultId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let row = match load_buffered(conn, &result_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(row) = row else {
        return err(&req.id, "not_found", "result not found", None);
    };
    if DraftStatus::parse(&row.status) != Some(DraftStatus::Submitted) {
        return err(
            &req.id,
            "invalid_status",
            format!("result is {}, only submitted results can be approved", row.status),
            Some(json!({ "status": row.status })),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let public_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
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
            &row.student_id,
            &row.subject_id,
            row.ut1,
            row.ut2,
            row.terminal,
            row.annual_theory,
            row.annual_practical,
            row.total,
            &row.remark,
        ),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "results" })),
        );
    }

    if let Err(e) = tx.execute(
        "UPDATE buffered_results
         SET status = 'approved',
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?",
        [&result_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "buffered_results" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true, "resultId": result_id }))
}

/// Returns a submitted record to the owning teacher's editable pool. No
/// rejection reason is stored; the portal communicates that out of band.
fn handle_reject(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let result_id = match param_str(req, "resultId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let status: Option<String> = match conn
        .query_row(
            "SELECT status FROM buffered_results WHERE id = ?",
            [&result_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(status) = status else {
        return err(&req.id, "not_found", "result not found", None);
    };
    if DraftStatus::parse(&status) != Some(DraftStatus::Submitted) {
        return err(
            &req.id,
            "invalid_status",
            format!("result is {}, only submitted results can be rejected", status),
            Some(json!({ "status": status })),
        );
    }

    if let Err(e) = conn.execute(
        "UPDATE buffered_results
         SET status = 'draft',
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?",
        [&result_id],
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "buffered_results" })),
        );
    }

    ok(&req.id, json!({ "ok": true, "resultId": result_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.submit" => Some(handle_submit(state, req)),
        "results.submitted" => Some(handle_submitted_list(state, req)),
        "results.approve" => Some(handle_approve(state, req)),
        "results.reject" => Some(handle_reject(state, req)),
        _ => None,
    }
}
