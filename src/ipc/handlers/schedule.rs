use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_opt_date, get_opt_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::schedule::Weekday;
use crate::timetable::{self, TimetableEntry};
use chrono::Datelike;
use rusqlite::Connection;
use serde_json::json;

fn entries_json(entries: &[TimetableEntry]) -> Vec<serde_json::Value> {
    entries.iter().map(TimetableEntry::to_json).collect()
}

fn schedule_weekly(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let instructor_id = get_opt_str(params, "instructorId");
    let week = timetable::weekly(conn, instructor_id.as_deref())?;
    let days: Vec<serde_json::Value> = week
        .iter()
        .map(|(day, entries)| json!({ "day": day, "entries": entries_json(entries) }))
        .collect();
    Ok(json!({ "days": days }))
}

fn schedule_today(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date = get_opt_date(params, "date")?.unwrap_or_else(|| chrono::Local::now().date_naive());
    let day = Weekday::from_chrono(date.weekday());
    let instructor_id = get_opt_str(params, "instructorId");
    let entries = timetable::for_day(conn, day, instructor_id.as_deref())?;
    Ok(json!({
        "date": date.format("%Y-%m-%d").to_string(),
        "day": day,
        "entries": entries_json(&entries),
    }))
}

fn handle_schedule_weekly(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match schedule_weekly(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_schedule_today(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match schedule_today(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.weekly" => Some(handle_schedule_weekly(state, req)),
        "schedule.today" => Some(handle_schedule_today(state, req)),
        _ => None,
    }
}
