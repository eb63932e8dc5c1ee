use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{param_str, require_role, Role};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

/// Published results for the calling student, newest first. Only approved
/// (or admin-uploaded) marks ever reach the results table, so there is no
/// status filtering here.
fn handle_results_for_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let caller = match require_role(req, Role::Student) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "results": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           r.id, r.subject_id,
           r.ut1, r.ut2, r.terminal, r.annual_theory, r.annual_practical,
           r.total, r.remark,
           sub.name, sub.course_code
         FROM results r
         JOIN subjects sub ON sub.id = r.subject_id
         WHERE r.student_id = ?
         ORDER BY r.updated_at DESC, r.rowid DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&caller.id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "subjectId": row.get::<_, String>(1)?,
                "ut1": row.get::<_, f64>(2)?,
                "ut2": row.get::<_, f64>(3)?,
                "terminal": row.get::<_, f64>(4)?,
                "annualTheory": row.get::<_, f64>(5)?,
                "annualPractical": row.get::<_, f64>(6)?,
                "total": row.get::<_, f64>(7)?,
                "remark": row.get::<_, String>(8)?,
                "subjectName": row.get::<_, String>(9)?,
                "courseCode": row.get::<_, Option<String>>(10)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(results) => ok(&req.id, json!({ "results": results })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_results_by_division(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "results": [] }));
    };

    let division_id = match param_str(req, "divisionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT
           r.id, r.student_id, r.subject_id,
           r.ut1, r.ut2, r.terminal, r.annual_theory, r.annual_practical,
           r.total, r.remark,
           s.roll_number, s.last_name, s.first_name,
           sub.name
         FROM results r
         JOIN students s ON s.id = r.student_id
         JOIN subjects sub ON sub.id = r.subject_id
         WHERE s.division_id = ?
         ORDER BY s.roll_number ASC, sub.name ASC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&division_id], |row| {
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
                "rollNumber": row.get::<_, i64>(10)?,
                "lastName": row.get::<_, String>(11)?,
                "firstName": row.get::<_, String>(12)?,
                "subjectName": row.get::<_, String>(13)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(results) => ok(&req.id, json!({ "results": results })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.forStudent" => Some(handle_results_for_student(state, req)),
        "results.byDivision" => Some(handle_results_by_division(state, req)),
        _ => None,
    }
}
