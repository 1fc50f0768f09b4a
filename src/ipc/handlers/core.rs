use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::HandlerErr;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    let db_status = match state.db.as_ref() {
        None => "closed",
        Some(conn) => match conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0)) {
            Ok(_) => "connected",
            Err(e) => {
                tracing::warn!(error = %e, "health check query failed");
                "error"
            }
        },
    };
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "database": db_status,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }),
    )
}

fn count(conn: &Connection, table: &str) -> Result<i64, HandlerErr> {
    let sql = format!("SELECT COUNT(*) FROM {}", table);
    Ok(conn.query_row(&sql, [], |r| r.get(0))?)
}

fn status(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({
        "instructors": count(conn, "instructors")?,
        "groups": count(conn, "class_groups")?,
        "students": count(conn, "students")?,
        "payments": count(conn, "payments")?,
        "expenses": count(conn, "expenses")?,
        "attendance": count(conn, "attendance")?,
    }))
}

fn handle_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match status(conn) {
        Ok(counts) => ok(
            &req.id,
            json!({
                "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
                "counts": counts,
            }),
        ),
        Err(error) => error.response(&req.id),
    }
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            tracing::info!(workspace = %path.display(), "workspace opened");
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => {
            tracing::error!(workspace = %path.display(), error = %e, "workspace open failed");
            err(&req.id, "db_failed", format!("{e:#}"), None)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "status" => Some(handle_status(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
