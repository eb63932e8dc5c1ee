use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{param_str, require_role, HandlerErr, Role};
use crate::ipc::types::{AppState, Request};
use crate::marks::{self, Aggregate, Components, DraftStatus, RawMarks};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const DRAFTS_DEFAULT_LIMIT: i64 = 30;
const DRAFTS_MAX_LIMIT: i64 = 500;

pub(crate) fn resolve_student(
    conn: &Connection,
    student_id: &str,
) -> Result<(), HandlerErr> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    if found.is_none() {
        let mut e = HandlerErr::new("not_found", "student not found");
        e.details = Some(json!({ "studentId": student_id }));
        return Err(e);
    }
    Ok(())
}

/// Writes or overwrites the one live draft per (teacher, student, subject).
/// Status always lands on `draft`, even when the previous record had been
/// submitted; saving over a submitted record pulls it back into the editable
/// pool.
pub(crate) fn upsert_draft(
    conn: &Connection,
    teacher_id: &str,
    student_id: &str,
    subject_id: &str,
    c: &Components,
    agg: &Aggregate,
) -> Result<(), HandlerErr> {
    let draft_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO buffered_results(
            id, teacher_id, student_id, subject_id,
            ut1, ut2, terminal, annual_theory, annual_practical,
            total, remark, status, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'draft',
                strftime('%Y-%m-%dT%H:%M:%SZ','now'))
         ON CONFLICT(teacher_id, student_id, subject_id) DO UPDATE SET
           ut1 = excluded.ut1,
           ut2 = excluded.ut2,
           terminal = excluded.terminal,
           annual_theory = excluded.annual_theory,
           annual_practical = excluded.annual_practical,
           total = excluded.total,
           remark = excluded.remark,
           status = 'draft',
           updated_at = excluded.updated_at",
        (
            &draft_id,
            teacher_id,
            student_id,
            subject_id,
            c.ut1,
            c.ut2,
            c.terminal,
            c.annual_theory,
            c.annual_practical,
            agg.total,
            agg.remark.as_str(),
        ),
    )
    .map_err(|e| {
        let mut he = HandlerErr::new("db_insert_failed", e.to_string());
        he.details = Some(json!({ "table": "buffered_results" }));
        he
    })?;
    Ok(())
}

/// Batch save from the single-entry marks form. Unlike file upload, a bad
/// row aborts the whole request; the form surfaces one error at a time.
fn handle_save_drafts(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let Some(rows) = req.params.get("results").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing results[]", None);
    };

    let mut saved: usize = 0;
    for (i, row) in rows.iter().enumerate() {
        let Some(student_id) = row.get("studentId").and_then(|v| v.as_str()) else {
            return err(
                &req.id,
                "bad_params",
                format!("result at index {} missing studentId", i),
                None,
            );
        };

        let raw = RawMarks::from_json(row);
        let components = match marks::validate(&raw, &[]) {
            Ok(c) => c,
            Err(e) => {
                return err(&req.id, "validation_failed", e.message(), e.details())
            }
        };
        let agg = marks::aggregate(&components);

        if let Err(e) = resolve_student(conn, student_id) {
            return e.response(&req.id);
        }
        if let Err(e) = upsert_draft(conn, &caller.id, student_id, &subject_id, &components, &agg)
        {
            return e.response(&req.id);
        }
        saved += 1;
    }

    ok(&req.id, json!({ "saved": saved }))
}

fn handle_drafts_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let caller = match require_role(req, Role::Teacher) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "results": [], "page": 1 }));
    };

    let status_text = req
        .params
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or("draft");
    let Some(status) = DraftStatus::parse(status_text) else {
        return err(
            &req.id,
            "bad_params",
            "status must be one of: draft, submitted, approved",
            Some(json!({ "status": status_text })),
        );
    };

    let page = req.params.get("page").and_then(|v| v.as_i64()).unwrap_or(1);
    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(DRAFTS_DEFAULT_LIMIT);
    if page < 1 || limit < 1 || limit > DRAFTS_MAX_LIMIT {
        return err(
            &req.id,
            "bad_params",
            "page must be >= 1 and limit in 1..=500",
            Some(json!({ "page": page, "limit": limit })),
        );
    }
    let offset = (page - 1) * limit;

    // rowid tie-break keeps the order stable when roll numbers collide
    // across divisions.
    let mut stmt = match conn.prepare(
        "SELECT
           b.id, b.student_id, b.subject_id,
           b.ut1, b.ut2, b.terminal, b.annual_theory, b.annual_practical,
           b.total, b.remark, b.status,
           s.roll_number, s.last_name, s.first_name,
           sub.name
         FROM buffered_results b
         JOIN students s ON s.id = b.student_id
         JOIN subjects sub ON sub.id = b.subject_id
         WHERE b.teacher_id = ? AND b.status = ?
         ORDER BY s.roll_number ASC, b.rowid ASC
         LIMIT ? OFFSET ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((&caller.id, status.as_str(), limit, offset), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "studentId": row.get::<_, String>(1)?,
                "subjectId": row.get::<_, String>(2)?,
                "ut1": row.get::<_, f64>(3)?,
                "ut2": row.get::<_, f64>(4)?,
                "terminal": row.get::<_, f64>(5)?,
                "annualTheory": row.get::<_, f64>(6)?,
                "annualPractical": row.get::<_, f64>(7)?,
                "total": row.get::<_, f64>(8)?,
                "remark": row.get::<_, String>(9)?,
                "status": row.get::<_, String>(10)?,
                "rollNumber": row.get::<_, i64>(11)?,
                "lastName": row.get::<_, String>(12)?,
                "firstName": row.get::<_, String>(13)?,
                "subjectName": row.get::<_, String>(14)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(results) => ok(
            &req.id,
            json!({ "results": results, "page": page, "limit": limit }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Partial score edit on one existing draft. Ownership is enforced here no
/// matter which form the edit came from; only draft-status records may
/// change. Omitted fields keep their stored values, and the merged set goes
/// back through validation so a partial edit can never store an invalid
/// combination.
fn handle_update_scores(state: &mut AppState, req: &Request) -> serde_json::Value {
    let caller = match require_role(req, Role::Teacher) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let draft_id = match param_str(req, "draftId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let stored: Option<(String, String, f64, f64, f64, f64, f64)> = match conn
        .query_row(
            "SELECT teacher_id, status, ut1, ut2, terminal, annual_theory, annual_practical
             FROM buffered_results WHERE id = ?",
            [&draft_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                ))
            },
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let Some((owner_id, status, ut1, ut2, terminal, annual_theory, annual_practical)) = stored
    else {
        return err(&req.id, "not_found", "draft result not found", None);
    };
    if owner_id != caller.id {
        return err(
            &req.id,
            "forbidden",
            "draft belongs to another teacher",
            None,
        );
    }
    if DraftStatus::parse(&status) != Some(DraftStatus::Draft) {
        return err(
            &req.id,
            "invalid_status",
            format!("draft is {}, only draft records can be edited", status),
            Some(json!({ "status": status })),
        );
    }

    let edits = RawMarks::from_json(&req.params);
    let merged = RawMarks {
        ut1: edits.ut1.or_else(|| Some(ut1.to_string())),
        ut2: edits.ut2.or_else(|| Some(ut2.to_string())),
        terminal: edits.terminal.or_else(|| Some(terminal.to_string())),
        annual_theory: edits
            .annual_theory
            .or_else(|| Some(annual_theory.to_string())),
        annual_practical: edits
            .annual_practical
            .or_else(|| Some(annual_practical.to_string())),
    };

    let components = match marks::validate(&merged, &[]) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "validation_failed", e.message(), e.details()),
    };
    let agg = marks::aggregate(&components);

    if let Err(e) = conn.execute(
        "UPDATE buffered_results SET
           ut1 = ?, ut2 = ?, terminal = ?, annual_theory = ?, annual_practical = ?,
           total = ?, remark = ?,
           updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?",
        (
            components.ut1,
            components.ut2,
            components.terminal,
            components.annual_theory,
            components.annual_practical,
            agg.total,
            agg.remark.as_str(),
            &draft_id,
        ),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "buffered_results" })),
        );
    }

    ok(
        &req.id,
        json!({
            "id": draft_id,
            "total": agg.total,
            "remark": agg.remark.as_str()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.saveDrafts" => Some(handle_save_drafts(state, req)),
        "results.drafts" => Some(handle_drafts_list(state, req)),
        "results.updateScores" => Some(handle_update_scores(state, req)),
        _ => None,
    }
}
