use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{param_str, require_role, Role};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_workspace_backup(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let out_path = match param_str(req, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(resp) => return resp,
    };

    match backup::export_workspace_bundle(&workspace, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "outPath": out_path.to_string_lossy(),
                "bundleFormat": summary.bundle_format,
                "dbBytes": summary.db_bytes
            }),
        ),
        Err(e) => err(&req.id, "backup_failed", format!("{e:#}"), None),
    }
}

/// Restores a bundle over the current workspace, then reopens the database
/// so the daemon serves the restored data immediately. The live connection
/// is dropped before the file swap.
fn handle_workspace_restore(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let in_path = match param_str(req, "inPath") {
        Ok(v) => PathBuf::from(v),
        Err(resp) => return resp,
    };

    state.db = None;

    if let Err(e) = backup::import_workspace_bundle(&in_path, &workspace) {
        // Reopen whatever is on disk so the daemon is not left without a db.
        state.db = db::open_db(&workspace).ok();
        return err(&req.id, "restore_failed", format!("{e:#}"), None);
    }

    match db::open_db(&workspace) {
        Ok(conn) => {
            state.db = Some(conn);
            ok(
                &req.id,
                json!({ "workspacePath": workspace.to_string_lossy() }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "workspace.backup" => Some(handle_workspace_backup(state, req)),
        "workspace.restore" => Some(handle_workspace_restore(state, req)),
        _ => None,
    }
}
