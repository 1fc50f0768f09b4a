use crate::enrollment::EnrollmentStore;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_opt_date, get_opt_i64, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{Financials, Money};
use chrono::Datelike;
use rusqlite::Connection;
use serde_json::json;

#[derive(Debug, Default)]
struct Receivables {
    pending: Money,
    expected: Money,
    students_with_dues: i64,
}

fn receivables(conn: &Connection) -> Result<Receivables, HandlerErr> {
    let mut stmt = conn.prepare("SELECT id, discount_cents, total_paid_cents FROM students")?;
    let students = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                Money::from_cents(r.get(1)?),
                Money::from_cents(r.get(2)?),
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Receivables::default();
    for (id, discount, paid) in students {
        let prices = conn.enrollments_of(&id)?.into_iter().map(|g| g.price);
        let f = Financials::compute(prices, discount, paid);
        out.expected = out.expected + f.price_after_discount;
        if f.has_dues() {
            out.pending = out.pending + f.remaining_balance;
            out.students_with_dues += 1;
        }
    }
    Ok(out)
}

fn scalar(conn: &Connection, sql: &str) -> Result<i64, HandlerErr> {
    Ok(conn.query_row(sql, [], |r| r.get(0))?)
}

/// Cents per calendar month (index 0 = January) for rows whose date column
/// starts with `year`.
fn monthly_totals(conn: &Connection, table: &str, date_col: &str, year: i32) -> Result<[i64; 12], HandlerErr> {
    let sql = format!(
        "SELECT CAST(substr({col}, 6, 2) AS INTEGER), SUM(amount_cents)
         FROM {table}
         WHERE substr({col}, 1, 4) = ?
         GROUP BY 1",
        col = date_col,
        table = table
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([format!("{:04}", year)], |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = [0i64; 12];
    for (month, cents) in rows {
        if let Some(slot) = usize::try_from(month - 1).ok().and_then(|i| out.get_mut(i)) {
            *slot += cents;
        }
    }
    Ok(out)
}

fn reports_summary(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date = get_opt_date(params, "date")?.unwrap_or_else(|| chrono::Local::now().date_naive());
    let year = match get_opt_i64(params, "year")? {
        Some(y) => i32::try_from(y)
            .ok()
            .filter(|y| (1..=9999).contains(y))
            .ok_or_else(|| HandlerErr::bad_params("year is out of range"))?,
        None => date.year(),
    };
    let date_str = date.format("%Y-%m-%d").to_string();

    let mut attendance = json!({ "present": 0, "absent": 0, "late": 0 });
    {
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM attendance WHERE date = ? GROUP BY status")?;
        let rows = stmt
            .query_map([&date_str], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        for (status, n) in rows {
            attendance[status] = json!(n);
        }
    }

    let revenue = Money::from_cents(scalar(conn, "SELECT COALESCE(SUM(amount_cents), 0) FROM payments")?);
    let expenses = Money::from_cents(scalar(conn, "SELECT COALESCE(SUM(amount_cents), 0) FROM expenses")?);
    let recv = receivables(conn)?;

    let income_by_month = monthly_totals(conn, "payments", "paid_at", year)?;
    let expenses_by_month = monthly_totals(conn, "expenses", "spent_at", year)?;
    let monthly: Vec<serde_json::Value> = (0..12)
        .map(|i| {
            json!({
                "month": i + 1,
                "income": Money::from_cents(income_by_month[i]),
                "expenses": Money::from_cents(expenses_by_month[i]),
            })
        })
        .collect();

    Ok(json!({
        "date": date_str,
        "year": year,
        "counts": {
            "students": scalar(conn, "SELECT COUNT(*) FROM students")?,
            "groups": scalar(conn, "SELECT COUNT(*) FROM class_groups")?,
            "instructors": scalar(conn, "SELECT COUNT(*) FROM instructors")?,
        },
        "attendance": attendance,
        "totalRevenue": revenue,
        "totalExpenses": expenses,
        "netBalance": revenue - expenses,
        "pendingPayments": recv.pending,
        "studentsWithDues": recv.students_with_dues,
        "expectedRevenue": recv.expected,
        "monthly": monthly,
    }))
}

fn handle_reports_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match reports_summary(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.summary" => Some(handle_reports_summary(state, req)),
        _ => None,
    }
}
