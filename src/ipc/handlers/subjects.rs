use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{actor, param_str, require_role, Role};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = actor(req) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "subjects": [] }));
    };

    let division_id = req.params.get("divisionId").and_then(|v| v.as_str());

    let mut stmt = match conn.prepare(
        "SELECT id, division_id, name, course_code
         FROM subjects
         WHERE (?1 IS NULL OR division_id = ?1)
         ORDER BY name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([division_id], |row| {
            let id: String = row.get(0)?;
            let division_id: String = row.get(1)?;
            let name: String = row.get(2)?;
            let course_code: Option<String> = row.get(3)?;
            Ok(json!({
                "id": id,
                "divisionId": division_id,
                "name": name,
                "courseCode": course_code
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let name = match param_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let course_code = req
        .params
        .get("courseCode")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

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

    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, division_id, name, course_code) VALUES(?, ?, ?, ?)",
        (&subject_id, &division_id, &name, &course_code),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }

    ok(
        &req.id,
        json!({
            "subjectId": subject_id,
            "divisionId": division_id,
            "name": name,
            "courseCode": course_code
        }),
    )
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match param_str(req, "subjectId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "subject not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let steps: [(&str, &str); 4] = [
        (
            "buffered_results",
            "DELETE FROM buffered_results WHERE subject_id = ?",
        ),
        ("results", "DELETE FROM results WHERE subject_id = ?"),
        (
            "teacher_subjects",
            "DELETE FROM teacher_subjects WHERE subject_id = ?",
        ),
        ("subjects", "DELETE FROM subjects WHERE id = ?"),
    ];

    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [&subject_id]) {
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

fn handle_subjects_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let subject_id = match param_str(req, "subjectId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    for (table, id) in [("teachers", &teacher_id), ("subjects", &subject_id)] {
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

    if let Err(e) = conn.execute(
        "INSERT INTO teacher_subjects(teacher_id, subject_id) VALUES(?, ?)
         ON CONFLICT(teacher_id, subject_id) DO NOTHING",
        (&teacher_id, &subject_id),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teacher_subjects" })),
        );
    }

    ok(
        &req.id,
        json!({ "teacherId": teacher_id, "subjectId": subject_id }),
    )
}

fn handle_subjects_assigned(state: &mut AppState, req: &Request) -> serde_json::Value {
    let caller = match actor(req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "subjects": [] }));
    };

    // Teachers see their own assignments; admins may ask for any teacher.
    let teacher_id = match caller.role {
        Role::Teacher => caller.id.clone(),
        Role::Admin => match param_str(req, "teacherId") {
            Ok(v) => v,
            Err(resp) => return resp,
        },
        Role::Student => {
            return err(&req.id, "forbidden", "requires teacher or admin role", None)
        }
    };

    let mut stmt = match conn.prepare(
        "SELECT sub.id, sub.division_id, sub.name, sub.course_code
         FROM subjects sub
         JOIN teacher_subjects ts ON ts.subject_id = sub.id
         WHERE ts.teacher_id = ?
         ORDER BY sub.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&teacher_id], |row| {
            let id: String = row.get(0)?;
            let division_id: String = row.get(1)?;
            let name: String = row.get(2)?;
            let course_code: Option<String> = row.get(3)?;
            Ok(json!({
                "id": id,
                "divisionId": division_id,
                "name": name,
                "courseCode": course_code
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.delete" => Some(handle_subjects_delete(state, req)),
        "subjects.assign" => Some(handle_subjects_assign(state, req)),
        "subjects.assigned" => Some(handle_subjects_assigned(state, req)),
        _ => None,
    }
}
