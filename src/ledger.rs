use crate::db;
use crate::enrollment::EnrollmentStore;
use crate::error::{CoreError, CoreResult};
use rusqlite::{Connection, OptionalExtension};
use serde::{Serialize, Serializer};
use std::iter::Sum;
use std::ops::{Add, Sub};
use uuid::Uuid;

/// Currency amount in minor units (cents). Crosses the IPC boundary as a
/// major-unit JSON number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

/// Largest amount accepted from callers: one trillion major units.
const MAX_INPUT_CENTS: f64 = 1e14;

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub fn cents(self) -> i64 {
        self.0
    }

    /// Rounds a major-unit amount to the nearest cent.
    pub fn from_major(field: &str, value: f64) -> CoreResult<Self> {
        if !value.is_finite() {
            return Err(CoreError::invalid(field, "amount must be a finite number"));
        }
        let cents = (value * 100.0).round();
        if cents.abs() > MAX_INPUT_CENTS {
            return Err(CoreError::invalid(field, "amount is out of range"));
        }
        Ok(Self(cents as i64))
    }

    pub fn as_major(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0.saturating_sub(rhs.0))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_major())
    }
}

pub fn total_course_price<I>(prices: I) -> Money
where
    I: IntoIterator<Item = Money>,
{
    prices.into_iter().sum()
}

/// Never below zero, however large the discount.
pub fn price_after_discount(total: Money, discount: Money) -> Money {
    (total - discount).max(Money::ZERO)
}

/// Negative means the student has overpaid; that is not an error.
pub fn remaining_balance(after_discount: Money, total_paid: Money) -> Money {
    after_discount - total_paid
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Financials {
    pub total_price: Money,
    pub discount: Money,
    pub price_after_discount: Money,
    pub total_paid: Money,
    pub remaining_balance: Money,
}

impl Financials {
    pub fn compute<I>(prices: I, discount: Money, total_paid: Money) -> Self
    where
        I: IntoIterator<Item = Money>,
    {
        let total_price = total_course_price(prices);
        let after = price_after_discount(total_price, discount);
        Self {
            total_price,
            discount,
            price_after_discount: after,
            total_paid,
            remaining_balance: remaining_balance(after, total_paid),
        }
    }

    pub fn has_dues(&self) -> bool {
        self.remaining_balance.is_positive()
    }
}

#[derive(Debug, Clone, Copy)]
struct StudentMoney {
    discount: Money,
    total_paid: Money,
}

fn student_money(conn: &Connection, student_id: &str) -> CoreResult<Option<StudentMoney>> {
    Ok(conn
        .query_row(
            "SELECT discount_cents, total_paid_cents FROM students WHERE id = ?",
            [student_id],
            |r| {
                Ok(StudentMoney {
                    discount: Money::from_cents(r.get(0)?),
                    total_paid: Money::from_cents(r.get(1)?),
                })
            },
        )
        .optional()?)
}

pub fn student_financials(conn: &Connection, student_id: &str) -> CoreResult<Financials> {
    let money = student_money(conn, student_id)?
        .ok_or_else(|| CoreError::not_found("student", student_id))?;
    let prices = conn
        .enrollments_of(student_id)?
        .into_iter()
        .map(|g| g.price);
    Ok(Financials::compute(prices, money.discount, money.total_paid))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub student_id: String,
    pub amount: Money,
    pub paid_at: String,
    pub month: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PaymentInput {
    pub amount: Money,
    pub month: Option<String>,
    pub notes: Option<String>,
    /// ISO date or RFC 3339 timestamp; defaults to now.
    pub paid_at: Option<String>,
}

/// Appends a payment and raises the student's running total in one
/// transaction. Either both rows change or neither does.
pub fn record_payment(
    conn: &Connection,
    student_id: &str,
    input: PaymentInput,
) -> CoreResult<Payment> {
    if !input.amount.is_positive() {
        return Err(CoreError::invalid("amount", "amount must be greater than 0"));
    }

    let tx = db::begin_write(conn)?;
    let updated = tx.execute(
        "UPDATE students SET total_paid_cents = total_paid_cents + ? WHERE id = ?",
        (input.amount.cents(), student_id),
    )?;
    if updated == 0 {
        return Err(CoreError::not_found("student", student_id));
    }

    let payment = Payment {
        id: Uuid::new_v4().to_string(),
        student_id: student_id.to_string(),
        amount: input.amount,
        paid_at: input
            .paid_at
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339()),
        month: input.month,
        notes: input.notes,
    };
    tx.execute(
        "INSERT INTO payments(id, student_id, amount_cents, paid_at, month, notes)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &payment.id,
            &payment.student_id,
            payment.amount.cents(),
            &payment.paid_at,
            &payment.month,
            &payment.notes,
        ),
    )?;
    tx.commit()?;

    tracing::info!(
        student_id,
        payment_id = %payment.id,
        amount_cents = payment.amount.cents(),
        "payment recorded"
    );
    Ok(payment)
}

fn payment_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id: r.get(0)?,
        student_id: r.get(1)?,
        amount: Money::from_cents(r.get(2)?),
        paid_at: r.get(3)?,
        month: r.get(4)?,
        notes: r.get(5)?,
    })
}

pub fn list_payments(conn: &Connection, student_id: Option<&str>) -> CoreResult<Vec<Payment>> {
    let mut stmt = conn.prepare(
        "SELECT id, student_id, amount_cents, paid_at, month, notes
         FROM payments
         WHERE (?1 IS NULL OR student_id = ?1)
         ORDER BY paid_at DESC, rowid DESC",
    )?;
    let rows = stmt
        .query_map([student_id], payment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Newest payments made by students currently enrolled in `group_id`.
pub fn recent_group_payments(
    conn: &Connection,
    group_id: &str,
    limit: usize,
) -> CoreResult<Vec<Payment>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(
        "SELECT id, student_id, amount_cents, paid_at, month, notes
         FROM payments
         WHERE student_id IN (SELECT student_id FROM student_groups WHERE group_id = ?1)
         ORDER BY paid_at DESC, rowid DESC
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map((group_id, limit), payment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_conn;

    fn m(major: i64) -> Money {
        Money::from_cents(major * 100)
    }

    fn seed_student(conn: &Connection, discount: i64, paid: i64) {
        conn.execute(
            "INSERT INTO instructors(id, name) VALUES('i1', 'Hoda')",
            [],
        )
        .expect("instructor");
        conn.execute(
            "INSERT INTO class_groups(id, name, instructor_id, price_cents, max_students)
             VALUES('ga', 'Group A', 'i1', 50000, 10), ('gb', 'Group B', 'i1', 30000, 10)",
            [],
        )
        .expect("groups");
        conn.execute(
            "INSERT INTO students(id, name, discount_cents, total_paid_cents, registration_date)
             VALUES('s1', 'Sara', ?, ?, '2025-01-10')",
            (discount * 100, paid * 100),
        )
        .expect("student");
        conn.execute(
            "INSERT INTO student_groups(student_id, group_id) VALUES('s1', 'ga'), ('s1', 'gb')",
            [],
        )
        .expect("enroll");
    }

    #[test]
    fn two_groups_with_discount_and_partial_payment() {
        let f = Financials::compute([m(500), m(300)], m(100), m(600));
        assert_eq!(f.total_price, m(800));
        assert_eq!(f.price_after_discount, m(700));
        assert_eq!(f.remaining_balance, m(100));
        assert!(f.has_dues());
    }

    #[test]
    fn discount_larger_than_price_floors_at_zero() {
        assert_eq!(price_after_discount(m(300), m(1000)), Money::ZERO);
        let f = Financials::compute([m(300)], m(1000), Money::ZERO);
        assert_eq!(f.price_after_discount, Money::ZERO);
        assert_eq!(f.remaining_balance, Money::ZERO);
    }

    #[test]
    fn overpayment_gives_negative_balance() {
        let f = Financials::compute([m(200)], Money::ZERO, m(250));
        assert_eq!(f.remaining_balance, m(-50));
        assert!(f.remaining_balance.is_negative());
        assert!(!f.has_dues());
    }

    #[test]
    fn no_enrollments_means_nothing_owed() {
        let f = Financials::compute(Vec::new(), m(50), Money::ZERO);
        assert_eq!(f.total_price, Money::ZERO);
        assert_eq!(f.remaining_balance, Money::ZERO);
    }

    #[test]
    fn money_rounds_to_nearest_cent() {
        assert_eq!(Money::from_major("amount", 12.34).unwrap().cents(), 1234);
        assert_eq!(Money::from_major("amount", 19.999).unwrap().cents(), 2000);
        assert_eq!(Money::from_major("amount", 0.1 + 0.2).unwrap().cents(), 30);
        assert!(Money::from_major("amount", f64::NAN).is_err());
        assert_eq!(serde_json::to_value(m(7)).unwrap(), serde_json::json!(7.0));
    }

    #[test]
    fn huge_amounts_are_rejected_and_sums_saturate() {
        assert!(Money::from_major("price", 1e12).is_ok());
        assert!(Money::from_major("price", 1e13).is_err());
        assert!(Money::from_major("price", -1e13).is_err());

        let big = Money::from_cents(i64::MAX / 2);
        let total = total_course_price([big, big, big]);
        assert_eq!(total.cents(), i64::MAX);
        let f = Financials::compute([big, big, big], Money::from_cents(i64::MIN), Money::ZERO);
        assert_eq!(f.price_after_discount.cents(), i64::MAX);
        assert_eq!(f.remaining_balance.cents(), i64::MAX);
    }

    #[test]
    fn student_financials_reads_enrolled_prices() {
        let conn = test_conn();
        seed_student(&conn, 100, 600);
        let f = student_financials(&conn, "s1").expect("financials");
        assert_eq!(f.total_price, m(800));
        assert_eq!(f.price_after_discount, m(700));
        assert_eq!(f.remaining_balance, m(100));
    }

    #[test]
    fn student_financials_unknown_student_is_not_found() {
        let conn = test_conn();
        assert!(matches!(
            student_financials(&conn, "ghost"),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn record_payment_raises_total_and_appends_row() {
        let conn = test_conn();
        seed_student(&conn, 100, 600);
        let p = record_payment(
            &conn,
            "s1",
            PaymentInput {
                amount: m(100),
                notes: Some("March".into()),
                ..Default::default()
            },
        )
        .expect("record");
        assert_eq!(p.amount, m(100));

        let f = student_financials(&conn, "s1").expect("financials");
        assert_eq!(f.total_paid, m(700));
        assert_eq!(f.remaining_balance, Money::ZERO);

        let rows = list_payments(&conn, Some("s1")).expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, p.id);
    }

    #[test]
    fn record_payment_rejects_non_positive_amounts() {
        let conn = test_conn();
        seed_student(&conn, 0, 0);
        for amount in [Money::ZERO, m(-5)] {
            let res = record_payment(
                &conn,
                "s1",
                PaymentInput {
                    amount,
                    ..Default::default()
                },
            );
            assert!(matches!(res, Err(CoreError::Validation { .. })));
        }
        assert!(list_payments(&conn, None).expect("list").is_empty());
    }

    #[test]
    fn record_payment_for_unknown_student_writes_nothing() {
        let conn = test_conn();
        let res = record_payment(
            &conn,
            "ghost",
            PaymentInput {
                amount: m(10),
                ..Default::default()
            },
        );
        assert!(matches!(res, Err(CoreError::NotFound { .. })));
        assert!(list_payments(&conn, None).expect("list").is_empty());
    }

    #[test]
    fn recent_group_payments_only_covers_enrolled_students() {
        let conn = test_conn();
        seed_student(&conn, 0, 0);
        conn.execute(
            "INSERT INTO students(id, name, discount_cents, total_paid_cents, registration_date)
             VALUES('s2', 'Mona', 0, 0, '2025-01-10')",
            [],
        )
        .expect("outsider");
        let rows = [
            ("s1", "2025-02-01"),
            ("s1", "2025-03-01"),
            ("s2", "2025-04-01"),
            ("s1", "2025-01-01"),
        ];
        for (student, day) in rows {
            record_payment(
                &conn,
                student,
                PaymentInput {
                    amount: m(50),
                    paid_at: Some(day.to_string()),
                    ..Default::default()
                },
            )
            .expect("payment");
        }

        let recent = recent_group_payments(&conn, "ga", 2).expect("recent");
        let dates: Vec<&str> = recent.iter().map(|p| p.paid_at.as_str()).collect();
        assert_eq!(dates, vec!["2025-03-01", "2025-02-01"]);
        assert!(recent.iter().all(|p| p.student_id == "s1"));
        assert!(recent_group_payments(&conn, "missing", 10).expect("empty").is_empty());
    }
}
