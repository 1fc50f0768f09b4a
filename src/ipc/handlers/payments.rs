use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_opt_date, get_opt_str, get_required_money, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, Money, PaymentInput};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn payments_record(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let input = PaymentInput {
        amount: get_required_money(params, "amount")?,
        month: get_opt_str(params, "month"),
        notes: get_opt_str(params, "notes"),
        paid_at: get_opt_date(params, "paidAt")?.map(|d| d.format("%Y-%m-%d").to_string()),
    };
    let payment = ledger::record_payment(conn, &student_id, input)?;
    let financials = ledger::student_financials(conn, &student_id)?;
    Ok(json!({
        "payment": payment,
        "financials": financials,
        "hasDues": financials.has_dues(),
    }))
}

fn payments_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_opt_str(params, "studentId");
    let rows = ledger::list_payments(conn, student_id.as_deref())?;
    let total: Money = rows.iter().map(|p| p.amount).sum();
    Ok(json!({ "payments": rows, "total": total }))
}

fn expenses_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let description = get_required_str(params, "description")?;
    let amount = get_required_money(params, "amount")?;
    if !amount.is_positive() {
        return Err(HandlerErr::bad_params("amount must be greater than 0"));
    }
    let spent_at = get_opt_date(params, "spentAt")?
        .unwrap_or_else(|| chrono::Local::now().date_naive())
        .format("%Y-%m-%d")
        .to_string();
    let id = Uuid::new_v4().to_string();
    let category = get_opt_str(params, "category");
    let notes = get_opt_str(params, "notes");
    conn.execute(
        "INSERT INTO expenses(id, description, amount_cents, category, spent_at, notes)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &description, amount.cents(), &category, &spent_at, &notes),
    )?;
    tracing::info!(expense_id = %id, amount_cents = amount.cents(), "expense recorded");
    Ok(json!({
        "expense": {
            "id": id,
            "description": description,
            "amount": amount,
            "category": category,
            "spentAt": spent_at,
            "notes": notes,
        }
    }))
}

fn expenses_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, description, amount_cents, category, spent_at, notes
         FROM expenses
         ORDER BY spent_at DESC, rowid DESC",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                Money::from_cents(r.get(2)?),
                r.get::<_, Option<String>>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, Option<String>>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let total: Money = rows.iter().map(|r| r.2).sum();
    let expenses: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(id, description, amount, category, spent_at, notes)| {
            json!({
                "id": id,
                "description": description,
                "amount": amount,
                "category": category,
                "spentAt": spent_at,
                "notes": notes,
            })
        })
        .collect();
    Ok(json!({ "expenses": expenses, "total": total }))
}

fn handle_payments_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match payments_record(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_payments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "payments": [], "total": 0 }));
    };
    match payments_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_expenses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match expenses_create(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_expenses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "expenses": [], "total": 0 }));
    };
    match expenses_list(conn) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "payments.record" => Some(handle_payments_record(state, req)),
        "payments.list" => Some(handle_payments_list(state, req)),
        "expenses.create" => Some(handle_expenses_create(state, req)),
        "expenses.list" => Some(handle_expenses_list(state, req)),
        _ => None,
    }
}
