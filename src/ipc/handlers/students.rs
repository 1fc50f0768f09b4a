use crate::db;
use crate::enrollment::EnrollmentStore;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_opt_date, get_opt_i64, get_opt_money, get_opt_str, get_required_str, get_str_list,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{Financials, Money};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StudentRow {
    id: String,
    name: String,
    phone: Option<String>,
    age: Option<i64>,
    location: Option<String>,
    instructor_id: Option<String>,
    discount: Money,
    total_paid: Money,
    registration_date: String,
}

fn load_student(conn: &Connection, student_id: &str) -> Result<Option<StudentRow>, HandlerErr> {
    Ok(conn
        .query_row(
            "SELECT id, name, phone, age, location, instructor_id, discount_cents,
                    total_paid_cents, registration_date
             FROM students WHERE id = ?",
            [student_id],
            |r| {
                Ok(StudentRow {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    phone: r.get(2)?,
                    age: r.get(3)?,
                    location: r.get(4)?,
                    instructor_id: r.get(5)?,
                    discount: Money::from_cents(r.get(6)?),
                    total_paid: Money::from_cents(r.get(7)?),
                    registration_date: r.get(8)?,
                })
            },
        )
        .optional()?)
}

fn student_json(conn: &Connection, row: &StudentRow) -> Result<serde_json::Value, HandlerErr> {
    let groups = conn.enrollments_of(&row.id)?;
    let financials = Financials::compute(groups.iter().map(|g| g.price), row.discount, row.total_paid);
    Ok(json!({
        "id": row.id,
        "name": row.name,
        "phone": row.phone,
        "age": row.age,
        "location": row.location,
        "instructorId": row.instructor_id,
        "registrationDate": row.registration_date,
        "groups": groups,
        "financials": financials,
        "hasDues": financials.has_dues(),
    }))
}

fn student_or_not_found(conn: &Connection, student_id: &str) -> Result<StudentRow, HandlerErr> {
    load_student(conn, student_id)?.ok_or_else(|| HandlerErr::not_found("student not found"))
}

/// Fields shared by create and update.
struct StudentFields {
    name: String,
    phone: Option<String>,
    age: Option<i64>,
    location: Option<String>,
    instructor_id: Option<String>,
    discount: Money,
    registration_date: Option<String>,
}

fn fields_from_params(conn: &Connection, params: &serde_json::Value) -> Result<StudentFields, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let age = get_opt_i64(params, "age")?;
    if matches!(age, Some(a) if a < 0) {
        return Err(HandlerErr::bad_params("age must not be negative"));
    }
    let discount = get_opt_money(params, "discount")?.unwrap_or(Money::ZERO);
    if discount.is_negative() {
        return Err(HandlerErr::bad_params("discount must not be negative"));
    }
    let instructor_id = get_opt_str(params, "instructorId");
    if let Some(iid) = instructor_id.as_deref() {
        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM instructors WHERE id = ?", [iid], |r| r.get(0))
            .optional()?;
        if exists.is_none() {
            return Err(HandlerErr::not_found("instructor not found"));
        }
    }
    let registration_date =
        get_opt_date(params, "registrationDate")?.map(|d| d.format("%Y-%m-%d").to_string());
    Ok(StudentFields {
        name,
        phone: get_opt_str(params, "phone"),
        age,
        location: get_opt_str(params, "location"),
        instructor_id,
        discount,
        registration_date,
    })
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_opt_str(params, "groupId");
    let instructor_id = get_opt_str(params, "instructorId");
    let mut stmt = conn.prepare(
        "SELECT s.id FROM students s
         WHERE (?1 IS NULL OR s.id IN (SELECT student_id FROM student_groups WHERE group_id = ?1))
           AND (?2 IS NULL OR s.id IN (
                SELECT sg.student_id FROM student_groups sg
                JOIN class_groups g ON g.id = sg.group_id
                WHERE g.instructor_id = ?2))
         ORDER BY s.name, s.id",
    )?;
    let ids = stmt
        .query_map((group_id.as_deref(), instructor_id.as_deref()), |r| {
            r.get::<_, String>(0)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(row) = load_student(conn, &id)? {
            out.push(student_json(conn, &row)?);
        }
    }
    Ok(json!({ "students": out }))
}

fn students_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let row = student_or_not_found(conn, &student_id)?;
    Ok(json!({ "student": student_json(conn, &row)? }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_ids = get_str_list(params, "groupIds")?;
    let tx = db::begin_write(conn)?;
    let fields = fields_from_params(&tx, params)?;
    let id = Uuid::new_v4().to_string();
    let registration_date = fields
        .registration_date
        .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string());
    tx.execute(
        "INSERT INTO students(id, name, phone, age, location, instructor_id, discount_cents,
                              total_paid_cents, registration_date)
         VALUES(?, ?, ?, ?, ?, ?, ?, 0, ?)",
        (
            &id,
            &fields.name,
            &fields.phone,
            fields.age,
            &fields.location,
            &fields.instructor_id,
            fields.discount.cents(),
            &registration_date,
        ),
    )?;
    for gid in &group_ids {
        tx.enroll(&id, gid)?;
    }
    let row = student_or_not_found(&tx, &id)?;
    let student = student_json(&tx, &row)?;
    tx.commit()?;
    tracing::info!(student_id = %id, groups = group_ids.len(), "student created");
    Ok(json!({ "student": student }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let tx = db::begin_write(conn)?;
    let existing = student_or_not_found(&tx, &student_id)?;
    let fields = fields_from_params(&tx, params)?;
    tx.execute(
        "UPDATE students
         SET name = ?, phone = ?, age = ?, location = ?, instructor_id = ?, discount_cents = ?,
             registration_date = ?
         WHERE id = ?",
        (
            &fields.name,
            &fields.phone,
            fields.age,
            &fields.location,
            &fields.instructor_id,
            fields.discount.cents(),
            fields
                .registration_date
                .as_deref()
                .unwrap_or(&existing.registration_date),
            &student_id,
        ),
    )?;
    // Enrollments are only touched when the caller sends the list.
    if params.get("groupIds").is_some_and(|v| !v.is_null()) {
        let group_ids = get_str_list(params, "groupIds")?;
        tx.replace_enrollments(&student_id, &group_ids)?;
    }
    let row = student_or_not_found(&tx, &student_id)?;
    let student = student_json(&tx, &row)?;
    tx.commit()?;
    tracing::info!(student_id = %student_id, "student updated");
    Ok(json!({ "student": student }))
}

/// Removes the student with everything hanging off it. Returns false when
/// the student did not exist.
fn delete_student(conn: &Connection, student_id: &str) -> Result<bool, HandlerErr> {
    conn.execute("DELETE FROM attendance WHERE student_id = ?", [student_id])?;
    conn.execute("DELETE FROM payments WHERE student_id = ?", [student_id])?;
    conn.execute("DELETE FROM student_groups WHERE student_id = ?", [student_id])?;
    let n = conn.execute("DELETE FROM students WHERE id = ?", [student_id])?;
    Ok(n > 0)
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let tx = db::begin_write(conn)?;
    if !delete_student(&tx, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }
    tx.commit()?;
    tracing::info!(student_id = %student_id, "student deleted");
    Ok(json!({ "deleted": true }))
}

fn students_bulk_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let ids = get_str_list(params, "studentIds")?;
    if ids.is_empty() {
        return Err(HandlerErr::bad_params("missing studentIds"));
    }
    let tx = db::begin_write(conn)?;
    let mut deleted = 0usize;
    let mut missing = Vec::new();
    for id in &ids {
        if delete_student(&tx, id)? {
            deleted += 1;
        } else {
            missing.push(id.clone());
        }
    }
    tx.commit()?;
    tracing::info!(deleted, missing = missing.len(), "students bulk deleted");
    Ok(json!({ "deleted": deleted, "missing": missing }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MembershipOp {
    Add,
    Remove,
    Replace,
}

impl MembershipOp {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "add" => Some(Self::Add),
            "remove" => Some(Self::Remove),
            "replace" => Some(Self::Replace),
            _ => None,
        }
    }
}

fn students_membership_bulk_edit(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_ids = get_str_list(params, "studentIds")?;
    if student_ids.is_empty() {
        return Err(HandlerErr::bad_params("missing studentIds"));
    }
    let group_id = get_required_str(params, "groupId")?;
    let op_raw = get_required_str(params, "operation")?;
    let Some(op) = MembershipOp::parse(&op_raw) else {
        return Err(HandlerErr::bad_params(
            "operation must be add, remove or replace",
        ));
    };

    let tx = db::begin_write(conn)?;
    let group_exists: Option<i64> = tx
        .query_row("SELECT 1 FROM class_groups WHERE id = ?", [&group_id], |r| {
            r.get(0)
        })
        .optional()?;
    if group_exists.is_none() {
        return Err(HandlerErr::not_found("group not found"));
    }

    let mut changed = 0usize;
    let mut unchanged = 0usize;
    for sid in &student_ids {
        if load_student(&tx, sid)?.is_none() {
            return Err(HandlerErr {
                code: "not_found",
                message: "student not found".to_string(),
                details: Some(json!({ "studentId": sid })),
            });
        }
        let did_change = match op {
            MembershipOp::Add => tx.enroll(sid, &group_id)?,
            MembershipOp::Remove => tx.unenroll(sid, &group_id)?,
            MembershipOp::Replace => {
                let before = tx.enrollments_of(sid)?;
                let same = before.len() == 1 && before[0].group_id == group_id;
                if !same {
                    tx.replace_enrollments(sid, std::slice::from_ref(&group_id))?;
                }
                !same
            }
        };
        if did_change {
            changed += 1;
        } else {
            unchanged += 1;
        }
    }
    tx.commit()?;
    tracing::info!(group_id = %group_id, operation = %op_raw, changed, "membership bulk edit");
    Ok(json!({ "operation": op_raw, "changed": changed, "unchanged": unchanged }))
}

fn students_financials(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let financials = crate::ledger::student_financials(conn, &student_id)?;
    Ok(json!({
        "studentId": student_id,
        "financials": financials,
        "hasDues": financials.has_dues(),
    }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };
    match students_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_get(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_create(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_update(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_delete(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_bulk_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_bulk_delete(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_membership_bulk_edit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_membership_bulk_edit(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_financials(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_financials(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "students.bulkDelete" => Some(handle_students_bulk_delete(state, req)),
        "students.membership.bulkEdit" => Some(handle_students_membership_bulk_edit(state, req)),
        "students.financials" => Some(handle_students_financials(state, req)),
        _ => None,
    }
}
