use crate::conflicts::{self, ConflictReport};
use crate::enrollment::EnrollmentStore;
use crate::groups::{self, GroupDraft, SaveOutcome};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_bool, get_opt_i64, get_opt_str, get_required_money, get_required_str, parse_slots,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, Money};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeSet;

const DEFAULT_MAX_STUDENTS: i64 = 15;
const RECENT_PAYMENTS: usize = 10;

fn draft_from_params(params: &serde_json::Value) -> Result<GroupDraft, HandlerErr> {
    Ok(GroupDraft {
        name: get_required_str(params, "name")?,
        level: get_opt_str(params, "level"),
        instructor_id: get_required_str(params, "instructorId")?,
        price: get_required_money(params, "price")?,
        max_students: get_opt_i64(params, "maxStudents")?.unwrap_or(DEFAULT_MAX_STUDENTS),
    })
}

fn group_or_not_found(conn: &Connection, group_id: &str) -> Result<groups::GroupRecord, HandlerErr> {
    groups::load_group(conn, group_id)?.ok_or_else(|| HandlerErr::not_found("group not found"))
}

fn report_json(report: &ConflictReport) -> serde_json::Value {
    let mut v = report.to_json();
    v["message"] = json!(report.message());
    v
}

fn groups_save(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_opt_str(params, "groupId");
    let draft = draft_from_params(params)?;
    let slots = parse_slots(params)?;
    let force = get_bool(params, "forceSave");

    match groups::save_group_schedule(conn, group_id.as_deref(), &draft, &slots, force)? {
        SaveOutcome::Saved(group) => Ok(json!({ "saved": true, "group": group.to_json() })),
        SaveOutcome::Rejected(report) => Ok(json!({
            "saved": false,
            "hasConflicts": true,
            "report": report_json(&report),
        })),
    }
}

fn groups_check_conflicts(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let instructor_id = get_required_str(params, "instructorId")?;
    let group_id = get_opt_str(params, "groupId");
    let slots = parse_slots(params)?;

    let instructor_name: Option<String> = conn
        .query_row(
            "SELECT name FROM instructors WHERE id = ?",
            [&instructor_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(instructor_name) = instructor_name else {
        return Err(HandlerErr::not_found("instructor not found"));
    };

    let found = conflicts::find_conflicts(conn, &slots, &instructor_id, group_id.as_deref())?;
    let report = ConflictReport {
        instructor_id,
        instructor_name,
        conflicts: found,
    };
    Ok(json!({
        "hasConflicts": !report.conflicts.is_empty(),
        "report": report_json(&report),
    }))
}

fn groups_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let instructor_id = get_opt_str(params, "instructorId");
    let rows = groups::list_groups(conn, instructor_id.as_deref())?;
    Ok(json!({
        "groups": rows.iter().map(|g| g.to_json()).collect::<Vec<_>>()
    }))
}

fn groups_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let group = group_or_not_found(conn, &group_id)?;
    Ok(json!({ "group": group.to_json() }))
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    present: i64,
    absent: i64,
    late: i64,
}

impl Tally {
    fn add(&mut self, status: &str) {
        match status {
            "present" => self.present += 1,
            "absent" => self.absent += 1,
            "late" => self.late += 1,
            _ => {}
        }
    }

    fn records(&self) -> i64 {
        self.present + self.absent + self.late
    }

    /// Share of records marked present, to one decimal place.
    fn percentage(&self) -> f64 {
        let total = self.records();
        if total == 0 {
            return 0.0;
        }
        (self.present as f64 * 1000.0 / total as f64).round() / 10.0
    }
}

struct RosterRow {
    id: String,
    name: String,
    phone: Option<String>,
    location: Option<String>,
}

fn groups_details(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let group = group_or_not_found(conn, &group_id)?;

    let mut stmt = conn.prepare(
        "SELECT student_id, date, status FROM attendance WHERE group_id = ? ORDER BY date DESC",
    )?;
    let records = stmt
        .query_map([&group_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut overall = Tally::default();
    let mut dates = BTreeSet::new();
    for (_, date, status) in &records {
        overall.add(status);
        dates.insert(date.as_str());
    }
    let session_dates: Vec<&str> = dates.into_iter().rev().collect();

    let mut stmt = conn.prepare(
        "SELECT s.id, s.name, s.phone, s.location
         FROM student_groups sg
         JOIN students s ON s.id = sg.student_id
         WHERE sg.group_id = ?
         ORDER BY s.name, s.id",
    )?;
    let roster = stmt
        .query_map([&group_id], |r| {
            Ok(RosterRow {
                id: r.get(0)?,
                name: r.get(1)?,
                phone: r.get(2)?,
                location: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    // Revenue uses each student's whole ledger, not just this group's share.
    let mut expected = Money::ZERO;
    let mut received = Money::ZERO;
    let mut students = Vec::with_capacity(roster.len());
    for row in roster {
        let mut tally = Tally::default();
        let mut by_date = serde_json::Map::new();
        for (_, date, status) in records.iter().filter(|rec| rec.0 == row.id) {
            tally.add(status);
            by_date.insert(date.clone(), json!(status));
        }
        let financials = ledger::student_financials(conn, &row.id)?;
        expected = expected + financials.price_after_discount;
        received = received + financials.total_paid;
        students.push(json!({
            "studentId": row.id,
            "name": row.name,
            "phone": row.phone,
            "location": row.location,
            "present": tally.present,
            "absent": tally.absent,
            "late": tally.late,
            "sessions": tally.records(),
            "percentage": tally.percentage(),
            "byDate": by_date,
            "financials": financials,
        }));
    }

    let recent_payments = ledger::recent_group_payments(conn, &group_id, RECENT_PAYMENTS)?;

    Ok(json!({
        "group": group.to_json(),
        "attendance": {
            "sessions": session_dates.len(),
            "present": overall.present,
            "absent": overall.absent,
            "late": overall.late,
            "records": overall.records(),
            "percentage": overall.percentage(),
            "sessionDates": session_dates,
        },
        "students": students,
        "revenue": {
            "expected": expected,
            "received": received,
            "pending": expected - received,
        },
        "recentPayments": recent_payments,
    }))
}

fn groups_students(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let group = group_or_not_found(conn, &group_id)?;
    let students = conn.students_of(&group_id)?;
    Ok(json!({
        "groupId": group.id,
        "maxStudents": group.max_students,
        "students": students,
    }))
}

fn groups_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    groups::delete_group(conn, &group_id)?;
    Ok(json!({ "deleted": true }))
}

fn handle_groups_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match groups_save(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_groups_check_conflicts(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match groups_check_conflicts(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_groups_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "groups": [] }));
    };
    match groups_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_groups_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match groups_get(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_groups_details(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match groups_details(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_groups_students(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match groups_students(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_groups_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match groups_delete(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "groups.list" => Some(handle_groups_list(state, req)),
        "groups.get" => Some(handle_groups_get(state, req)),
        "groups.details" => Some(handle_groups_details(state, req)),
        "groups.save" => Some(handle_groups_save(state, req)),
        "groups.checkConflicts" => Some(handle_groups_check_conflicts(state, req)),
        "groups.students" => Some(handle_groups_students(state, req)),
        "groups.delete" => Some(handle_groups_delete(state, req)),
        _ => None,
    }
}
