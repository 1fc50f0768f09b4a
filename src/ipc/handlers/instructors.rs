use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_opt_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn instructor_json(conn: &Connection, id: &str) -> Result<Option<serde_json::Value>, HandlerErr> {
    Ok(conn
        .query_row(
            "SELECT i.id, i.name, i.phone, i.specialization,
                    (SELECT COUNT(*) FROM class_groups g WHERE g.instructor_id = i.id),
                    (SELECT COUNT(*) FROM students s WHERE s.instructor_id = i.id)
             FROM instructors i
             WHERE i.id = ?",
            [id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "phone": r.get::<_, Option<String>>(2)?,
                    "specialization": r.get::<_, Option<String>>(3)?,
                    "groupCount": r.get::<_, i64>(4)?,
                    "studentCount": r.get::<_, i64>(5)?,
                }))
            },
        )
        .optional()?)
}

fn instructors_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare("SELECT id FROM instructors ORDER BY name, id")?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(v) = instructor_json(conn, &id)? {
            out.push(v);
        }
    }
    Ok(json!({ "instructors": out }))
}

fn instructors_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO instructors(id, name, phone, specialization) VALUES(?, ?, ?, ?)",
        (
            &id,
            &name,
            get_opt_str(params, "phone"),
            get_opt_str(params, "specialization"),
        ),
    )?;
    tracing::info!(instructor_id = %id, "instructor created");
    Ok(json!({ "instructor": instructor_json(conn, &id)? }))
}

fn instructors_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "instructorId")?;
    let name = get_required_str(params, "name")?;
    let n = conn.execute(
        "UPDATE instructors SET name = ?, phone = ?, specialization = ? WHERE id = ?",
        (
            &name,
            get_opt_str(params, "phone"),
            get_opt_str(params, "specialization"),
            &id,
        ),
    )?;
    if n == 0 {
        return Err(HandlerErr::not_found("instructor not found"));
    }
    Ok(json!({ "instructor": instructor_json(conn, &id)? }))
}

fn instructors_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "instructorId")?;
    let tx = db::begin_write(conn)?;
    let counts: Option<(i64, i64)> = tx
        .query_row(
            "SELECT (SELECT COUNT(*) FROM class_groups WHERE instructor_id = i.id),
                    (SELECT COUNT(*) FROM students WHERE instructor_id = i.id)
             FROM instructors i WHERE i.id = ?",
            [&id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((groups, students)) = counts else {
        return Err(HandlerErr::not_found("instructor not found"));
    };
    if groups > 0 || students > 0 {
        tracing::info!(instructor_id = %id, groups, students, "instructor delete blocked");
        return Err(HandlerErr {
            code: "blocked",
            message: "instructor still has groups or students".to_string(),
            details: Some(json!({
                "reason": "has_dependents",
                "groupCount": groups,
                "studentCount": students,
            })),
        });
    }
    tx.execute("DELETE FROM instructors WHERE id = ?", [&id])?;
    tx.commit()?;
    tracing::info!(instructor_id = %id, "instructor deleted");
    Ok(json!({ "deleted": true }))
}

fn handle_instructors_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "instructors": [] }));
    };
    match instructors_list(conn) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_instructors_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match instructors_create(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_instructors_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match instructors_update(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_instructors_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match instructors_delete(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "instructors.list" => Some(handle_instructors_list(state, req)),
        "instructors.create" => Some(handle_instructors_create(state, req)),
        "instructors.update" => Some(handle_instructors_update(state, req)),
        "instructors.delete" => Some(handle_instructors_delete(state, req)),
        _ => None,
    }
}
