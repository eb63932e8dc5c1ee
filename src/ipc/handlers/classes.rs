use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{actor, param_str, require_role, Role};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = actor(req) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Include basic counts so the admin dashboard can render without extra
    // round trips. Correlated subqueries avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           (SELECT COUNT(*) FROM divisions d WHERE d.class_id = c.id) AS division_count,
           (SELECT COUNT(*) FROM students s
             JOIN divisions d ON d.id = s.division_id
             WHERE d.class_id = c.id) AS student_count
         FROM classes c
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let division_count: i64 = row.get(2)?;
            let student_count: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "divisionCount": division_count,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name) VALUES(?, ?)",
        (&class_id, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(&req.id, json!({ "classId": class_id, "name": name }))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match param_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE). Marks are
    // removed by subject and by student; either side may reference this class.
    let steps: [(&str, &str); 9] = [
        (
            "buffered_results",
            "DELETE FROM buffered_results
             WHERE subject_id IN (
               SELECT sub.id FROM subjects sub
               JOIN divisions d ON d.id = sub.division_id
               WHERE d.class_id = ?
             )",
        ),
        (
            "buffered_results",
            "DELETE FROM buffered_results
             WHERE student_id IN (
               SELECT s.id FROM students s
               JOIN divisions d ON d.id = s.division_id
               WHERE d.class_id = ?
             )",
        ),
        (
            "results",
            "DELETE FROM results
             WHERE subject_id IN (
               SELECT sub.id FROM subjects sub
               JOIN divisions d ON d.id = sub.division_id
               WHERE d.class_id = ?
             )",
        ),
        (
            "results",
            "DELETE FROM results
             WHERE student_id IN (
               SELECT s.id FROM students s
               JOIN divisions d ON d.id = s.division_id
               WHERE d.class_id = ?
             )",
        ),
        (
            "teacher_subjects",
            "DELETE FROM teacher_subjects
             WHERE subject_id IN (
               SELECT sub.id FROM subjects sub
               JOIN divisions d ON d.id = sub.division_id
               WHERE d.class_id = ?
             )",
        ),
        (
            "subjects",
            "DELETE FROM subjects
             WHERE division_id IN (SELECT id FROM divisions WHERE class_id = ?)",
        ),
        (
            "students",
            "DELETE FROM students
             WHERE division_id IN (SELECT id FROM divisions WHERE class_id = ?)",
        ),
        ("divisions", "DELETE FROM divisions WHERE class_id = ?"),
        ("classes", "DELETE FROM classes WHERE id = ?"),
    ];

    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [&class_id]) {
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

fn handle_divisions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = actor(req) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "divisions": [] }));
    };

    let class_id = req.params.get("classId").and_then(|v| v.as_str());

    let sql = "SELECT
                 d.id,
                 d.class_id,
                 d.name,
                 (SELECT COUNT(*) FROM students s WHERE s.division_id = d.id) AS student_count,
                 (SELECT COUNT(*) FROM subjects sub WHERE sub.division_id = d.id) AS subject_count
               FROM divisions d
               WHERE (?1 IS NULL OR d.class_id = ?1)
               ORDER BY d.name";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([class_id], |row| {
            let id: String = row.get(0)?;
            let class_id: String = row.get(1)?;
            let name: String = row.get(2)?;
            let student_count: i64 = row.get(3)?;
            let subject_count: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "classId": class_id,
                "name": name,
                "studentCount": student_count,
                "subjectCount": subject_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(divisions) => ok(&req.id, json!({ "divisions": divisions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_divisions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match param_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = match param_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let division_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO divisions(id, class_id, name) VALUES(?, ?, ?)",
        (&division_id, &class_id, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "divisions" })),
        );
    }

    ok(
        &req.id,
        json!({ "divisionId": division_id, "classId": class_id, "name": name }),
    )
}

fn handle_divisions_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let steps: [(&str, &str); 8] = [
        (
            "buffered_results",
            "DELETE FROM buffered_results
             WHERE subject_id IN (SELECT id FROM subjects WHERE division_id = ?)",
        ),
        (
            "buffered_results",
            "DELETE FROM buffered_results
             WHERE student_id IN (SELECT id FROM students WHERE division_id = ?)",
        ),
        (
            "results",
            "DELETE FROM results
             WHERE subject_id IN (SELECT id FROM subjects WHERE division_id = ?)",
        ),
        (
            "results",
            "DELETE FROM results
             WHERE student_id IN (SELECT id FROM students WHERE division_id = ?)",
        ),
        (
            "teacher_subjects",
            "DELETE FROM teacher_subjects
             WHERE subject_id IN (SELECT id FROM subjects WHERE division_id = ?)",
        ),
        ("subjects", "DELETE FROM subjects WHERE division_id = ?"),
        ("students", "DELETE FROM students WHERE division_id = ?"),
        ("divisions", "DELETE FROM divisions WHERE id = ?"),
    ];

    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [&division_id]) {
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
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        "divisions.list" => Some(handle_divisions_list(state, req)),
        "divisions.create" => Some(handle_divisions_create(state, req)),
        "divisions.delete" => Some(handle_divisions_delete(state, req)),
        _ => None,
    }
}
