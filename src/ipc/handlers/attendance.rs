use crate::db;
use crate::enrollment::EnrollmentStore;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_opt_date, get_opt_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

impl AttendanceStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Late => "late",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttendanceEntry {
    student_id: String,
    status: AttendanceStatus,
}

fn required_date(params: &serde_json::Value) -> Result<String, HandlerErr> {
    get_opt_date(params, "date")?
        .map(|d| d.format("%Y-%m-%d").to_string())
        .ok_or_else(|| HandlerErr::bad_params("missing date"))
}

fn attendance_mark(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let date = required_date(params)?;
    let entries: Vec<AttendanceEntry> = match params.get("entries") {
        Some(v) if v.is_array() => serde_json::from_value(v.clone())
            .map_err(|e| HandlerErr::bad_params(format!("invalid entries: {}", e)))?,
        _ => return Err(HandlerErr::bad_params("missing entries")),
    };

    let actor = get_opt_str(params, "actorInstructorId");

    let tx = db::begin_write(conn)?;
    let owner: Option<String> = tx
        .query_row(
            "SELECT instructor_id FROM class_groups WHERE id = ?",
            [&group_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(owner) = owner else {
        return Err(HandlerErr::not_found("group not found"));
    };
    if let Some(actor) = actor.as_deref() {
        if actor != owner {
            tracing::warn!(group_id = %group_id, actor, "attendance refused for foreign group");
            return Err(HandlerErr {
                code: "blocked",
                message: "instructor does not teach this group".to_string(),
                details: Some(json!({
                    "reason": "not_group_owner",
                    "groupId": group_id,
                    "actorInstructorId": actor,
                })),
            });
        }
    }
    let enrolled = tx.students_of(&group_id)?;

    for entry in &entries {
        if !enrolled.iter().any(|s| s.student_id == entry.student_id) {
            return Err(HandlerErr {
                code: "bad_params",
                message: "student is not enrolled in this group".to_string(),
                details: Some(json!({ "studentId": entry.student_id, "groupId": group_id })),
            });
        }
        tx.execute(
            "INSERT INTO attendance(id, student_id, group_id, date, status)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(student_id, group_id, date) DO UPDATE SET status = excluded.status",
            (
                Uuid::new_v4().to_string(),
                &entry.student_id,
                &group_id,
                &date,
                entry.status.as_str(),
            ),
        )?;
    }
    tx.commit()?;
    tracing::info!(group_id = %group_id, date = %date, marked = entries.len(), "attendance marked");
    Ok(json!({ "groupId": group_id, "date": date, "marked": entries.len() }))
}

fn attendance_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let date = required_date(params)?;
    let mut stmt = conn.prepare(
        "SELECT sg.student_id, s.name, a.status
         FROM student_groups sg
         JOIN students s ON s.id = sg.student_id
         LEFT JOIN attendance a
           ON a.student_id = sg.student_id AND a.group_id = sg.group_id AND a.date = ?2
         WHERE sg.group_id = ?1
         ORDER BY s.name, s.id",
    )?;
    let rows = stmt
        .query_map((&group_id, &date), |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "status": r.get::<_, Option<String>>(2)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "groupId": group_id, "date": date, "students": rows }))
}

fn handle_attendance_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_mark(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_attendance_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(handle_attendance_mark(state, req)),
        "attendance.list" => Some(handle_attendance_list(state, req)),
        _ => None,
    }
}
