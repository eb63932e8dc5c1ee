use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{actor, param_str, require_role, Role};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = actor(req) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "teachers": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           t.id,
           t.name,
           t.email,
           (SELECT COUNT(*) FROM teacher_subjects ts WHERE ts.teacher_id = t.id) AS subject_count,
           (SELECT COUNT(*) FROM buffered_results b
             WHERE b.teacher_id = t.id AND b.status = 'draft') AS draft_count
         FROM teachers t
         ORDER BY t.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let email: String = row.get(2)?;
            let subject_count: i64 = row.get(3)?;
            let draft_count: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "email": email,
                "subjectCount": subject_count,
                "draftCount": draft_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match param_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let email = match param_str(req, "email") {
        Ok(v) => v.to_ascii_lowercase(),
        Err(resp) => return resp,
    };

    let teacher_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO teachers(id, name, email) VALUES(?, ?, ?)",
        (&teacher_id, &name, &email),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }

    ok(
        &req.id,
        json!({ "teacherId": teacher_id, "name": name, "email": email }),
    )
}

fn handle_teachers_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let teacher_id = match param_str(req, "teacherId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "teacher not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Published results stay; they no longer reference the teacher.
    let steps: [(&str, &str); 3] = [
        (
            "buffered_results",
            "DELETE FROM buffered_results WHERE teacher_id = ?",
        ),
        (
            "teacher_subjects",
            "DELETE FROM teacher_subjects WHERE teacher_id = ?",
        ),
        ("teachers", "DELETE FROM teachers WHERE id = ?"),
    ];

    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [&teacher_id]) {
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

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "teachers.delete" => Some(handle_teachers_delete(state, req)),
        _ => None,
    }
}
