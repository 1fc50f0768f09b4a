//! The student/group join relation.
//!
//! Everything that needs to know who is enrolled where goes through
//! [`EnrollmentStore`]; `rusqlite::Connection` (and therefore an open
//! `Transaction`, which derefs to it) is the one implementation.

use crate::error::{CoreError, CoreResult};
use crate::ledger::Money;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrolledGroup {
    pub group_id: String,
    pub name: String,
    pub price: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrolledStudent {
    pub student_id: String,
    pub name: String,
}

pub trait EnrollmentStore {
    fn enrollments_of(&self, student_id: &str) -> CoreResult<Vec<EnrolledGroup>>;

    fn students_of(&self, group_id: &str) -> CoreResult<Vec<EnrolledStudent>>;

    /// Returns false when the student was already enrolled.
    fn enroll(&self, student_id: &str, group_id: &str) -> CoreResult<bool>;

    /// Returns false when there was nothing to remove.
    fn unenroll(&self, student_id: &str, group_id: &str) -> CoreResult<bool>;

    /// Drops every enrollment of the student and enrolls them in `group_ids`.
    /// Callers wrap this in a transaction.
    fn replace_enrollments(&self, student_id: &str, group_ids: &[String]) -> CoreResult<()> {
        for g in self.enrollments_of(student_id)? {
            self.unenroll(student_id, &g.group_id)?;
        }
        for gid in group_ids {
            self.enroll(student_id, gid)?;
        }
        Ok(())
    }
}

impl EnrollmentStore for Connection {
    fn enrollments_of(&self, student_id: &str) -> CoreResult<Vec<EnrolledGroup>> {
        let mut stmt = self.prepare(
            "SELECT g.id, g.name, g.price_cents
             FROM student_groups sg
             JOIN class_groups g ON g.id = sg.group_id
             WHERE sg.student_id = ?
             ORDER BY g.name, g.id",
        )?;
        let rows = stmt
            .query_map([student_id], |r| {
                Ok(EnrolledGroup {
                    group_id: r.get(0)?,
                    name: r.get(1)?,
                    price: Money::from_cents(r.get(2)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn students_of(&self, group_id: &str) -> CoreResult<Vec<EnrolledStudent>> {
        let mut stmt = self.prepare(
            "SELECT s.id, s.name
             FROM student_groups sg
             JOIN students s ON s.id = sg.student_id
             WHERE sg.group_id = ?
             ORDER BY s.name, s.id",
        )?;
        let rows = stmt
            .query_map([group_id], |r| {
                Ok(EnrolledStudent {
                    student_id: r.get(0)?,
                    name: r.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn enroll(&self, student_id: &str, group_id: &str) -> CoreResult<bool> {
        let capacity: Option<(i64, i64)> = self
            .query_row(
                "SELECT g.max_students,
                        (SELECT COUNT(*) FROM student_groups sg WHERE sg.group_id = g.id)
                 FROM class_groups g
                 WHERE g.id = ?",
                [group_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let Some((max_students, enrolled)) = capacity else {
            return Err(CoreError::not_found("group", group_id));
        };

        let already: Option<i64> = self
            .query_row(
                "SELECT 1 FROM student_groups WHERE student_id = ? AND group_id = ?",
                [student_id, group_id],
                |r| r.get(0),
            )
            .optional()?;
        if already.is_some() {
            return Ok(false);
        }

        if enrolled >= max_students {
            return Err(CoreError::blocked(
                "group is full",
                json!({ "reason": "group_full", "groupId": group_id, "maxStudents": max_students }),
            ));
        }

        self.execute(
            "INSERT INTO student_groups(student_id, group_id) VALUES(?, ?)",
            [student_id, group_id],
        )?;
        Ok(true)
    }

    fn unenroll(&self, student_id: &str, group_id: &str) -> CoreResult<bool> {
        let n = self.execute(
            "DELETE FROM student_groups WHERE student_id = ? AND group_id = ?",
            [student_id, group_id],
        )?;
        Ok(n > 0)
    }
}
