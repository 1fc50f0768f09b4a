//! Group lifecycle: validate, check for instructor conflicts, commit.

use crate::conflicts::{self, stored_slot, ConflictReport};
use crate::db;
use crate::error::{CoreError, CoreResult};
use crate::ledger::Money;
use crate::schedule::TimeSlot;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Editable fields of a group, everything except its schedule.
#[derive(Debug, Clone)]
pub struct GroupDraft {
    pub name: String,
    pub level: Option<String>,
    pub instructor_id: String,
    pub price: Money,
    pub max_students: i64,
}

impl GroupDraft {
    fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::invalid("name", "name must not be empty"));
        }
        if self.instructor_id.trim().is_empty() {
            return Err(CoreError::invalid("instructorId", "missing instructorId"));
        }
        if self.price.is_negative() {
            return Err(CoreError::invalid("price", "price must not be negative"));
        }
        if self.max_students < 1 {
            return Err(CoreError::invalid(
                "maxStudents",
                "maxStudents must be at least 1",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupRecord {
    pub id: String,
    pub name: String,
    pub level: Option<String>,
    pub instructor_id: String,
    pub instructor_name: String,
    pub price: Money,
    pub max_students: i64,
    pub student_count: i64,
    pub slots: Vec<TimeSlot>,
}

impl GroupRecord {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "name": self.name,
            "level": self.level,
            "instructorId": self.instructor_id,
            "instructorName": self.instructor_name,
            "price": self.price,
            "maxStudents": self.max_students,
            "studentCount": self.student_count,
            "isFull": self.student_count >= self.max_students,
            "slots": self.slots.iter().map(TimeSlot::to_json).collect::<Vec<_>>(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved(GroupRecord),
    Rejected(ConflictReport),
}

fn instructor_name(conn: &Connection, instructor_id: &str) -> CoreResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT name FROM instructors WHERE id = ?",
            [instructor_id],
            |r| r.get(0),
        )
        .optional()?)
}

fn enrolled_count(conn: &Connection, group_id: &str) -> CoreResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM student_groups WHERE group_id = ?",
        [group_id],
        |r| r.get(0),
    )?)
}

/// Creates (`group_id == None`) or updates a group and replaces its whole
/// slot set.
///
/// Unless `force_save` is set, the candidate slots are checked against the
/// instructor's other groups first; any overlap aborts with
/// `SaveOutcome::Rejected` and nothing is written. The check and the write
/// share one IMMEDIATE transaction.
pub fn save_group_schedule(
    conn: &Connection,
    group_id: Option<&str>,
    draft: &GroupDraft,
    slots: &[TimeSlot],
    force_save: bool,
) -> CoreResult<SaveOutcome> {
    draft.validate()?;

    let tx = db::begin_write(conn)?;

    let Some(instructor_name) = instructor_name(&tx, &draft.instructor_id)? else {
        return Err(CoreError::not_found("instructor", &draft.instructor_id));
    };

    if let Some(gid) = group_id {
        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM class_groups WHERE id = ?", [gid], |r| {
                r.get(0)
            })
            .optional()?;
        if exists.is_none() {
            return Err(CoreError::not_found("group", gid));
        }
        let enrolled = enrolled_count(&tx, gid)?;
        if enrolled > draft.max_students {
            return Err(CoreError::invalid(
                "maxStudents",
                format!(
                    "maxStudents {} is below the {} students already enrolled",
                    draft.max_students, enrolled
                ),
            ));
        }
    }

    if !force_save {
        let found = conflicts::find_conflicts(&tx, slots, &draft.instructor_id, group_id)?;
        if !found.is_empty() {
            tracing::info!(
                instructor_id = %draft.instructor_id,
                group_id = group_id.unwrap_or("<new>"),
                conflicts = found.len(),
                "group save rejected: instructor schedule conflict"
            );
            return Ok(SaveOutcome::Rejected(ConflictReport {
                instructor_id: draft.instructor_id.clone(),
                instructor_name,
                conflicts: found,
            }));
        }
    }

    let id = match group_id {
        Some(gid) => {
            tx.execute(
                "UPDATE class_groups
                 SET name = ?, level = ?, instructor_id = ?, price_cents = ?, max_students = ?
                 WHERE id = ?",
                (
                    draft.name.trim(),
                    &draft.level,
                    &draft.instructor_id,
                    draft.price.cents(),
                    draft.max_students,
                    gid,
                ),
            )?;
            gid.to_string()
        }
        None => {
            let gid = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO class_groups(id, name, level, instructor_id, price_cents, max_students)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (
                    &gid,
                    draft.name.trim(),
                    &draft.level,
                    &draft.instructor_id,
                    draft.price.cents(),
                    draft.max_students,
                ),
            )?;
            gid
        }
    };

    tx.execute("DELETE FROM schedules WHERE group_id = ?", [&id])?;
    for slot in slots {
        if slot.wraps_midnight() {
            tracing::warn!(
                group_id = %id,
                day = %slot.day(),
                start = %slot.start(),
                end = %slot.end(),
                "slot runs past midnight; end time wrapped"
            );
        }
        tx.execute(
            "INSERT INTO schedules(id, group_id, day, start_min, end_min) VALUES(?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &id,
                slot.day().as_str(),
                slot.start().minutes(),
                slot.end().minutes(),
            ),
        )?;
    }

    let record = load_group(&tx, &id)?.ok_or_else(|| CoreError::not_found("group", &id))?;
    tx.commit()?;

    tracing::info!(
        group_id = %record.id,
        instructor_id = %record.instructor_id,
        slots = record.slots.len(),
        forced = force_save,
        "group saved"
    );
    Ok(SaveOutcome::Saved(record))
}

pub fn load_group(conn: &Connection, group_id: &str) -> CoreResult<Option<GroupRecord>> {
    let row = conn
        .query_row(
            "SELECT g.id, g.name, g.level, g.instructor_id, i.name, g.price_cents, g.max_students,
                    (SELECT COUNT(*) FROM student_groups sg WHERE sg.group_id = g.id)
             FROM class_groups g
             JOIN instructors i ON i.id = g.instructor_id
             WHERE g.id = ?",
            [group_id],
            |r| {
                Ok(GroupRecord {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    level: r.get(2)?,
                    instructor_id: r.get(3)?,
                    instructor_name: r.get(4)?,
                    price: Money::from_cents(r.get(5)?),
                    max_students: r.get(6)?,
                    student_count: r.get(7)?,
                    slots: Vec::new(),
                })
            },
        )
        .optional()?;
    let Some(mut record) = row else {
        return Ok(None);
    };
    record.slots = group_slots(conn, group_id)?;
    Ok(Some(record))
}

pub fn group_slots(conn: &Connection, group_id: &str) -> CoreResult<Vec<TimeSlot>> {
    let mut stmt = conn.prepare(
        "SELECT day, start_min, end_min FROM schedules WHERE group_id = ? ORDER BY start_min",
    )?;
    let raw = stmt
        .query_map([group_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, i64>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut slots: Vec<TimeSlot> = raw
        .iter()
        .filter_map(|(day, start, end)| stored_slot(day, *start, *end))
        .collect();
    slots.sort_by_key(|s| (s.day(), s.start()));
    Ok(slots)
}

pub fn list_groups(conn: &Connection, instructor_id: Option<&str>) -> CoreResult<Vec<GroupRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM class_groups
         WHERE (?1 IS NULL OR instructor_id = ?1)
         ORDER BY name, id",
    )?;
    let ids = stmt
        .query_map([instructor_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(g) = load_group(conn, &id)? {
            out.push(g);
        }
    }
    Ok(out)
}

/// Deletes a group with its schedule and attendance. Refused while any
/// student is still enrolled.
pub fn delete_group(conn: &Connection, group_id: &str) -> CoreResult<()> {
    let tx = db::begin_write(conn)?;
    let exists: Option<i64> = tx
        .query_row("SELECT 1 FROM class_groups WHERE id = ?", [group_id], |r| {
            r.get(0)
        })
        .optional()?;
    if exists.is_none() {
        return Err(CoreError::not_found("group", group_id));
    }

    let enrolled = enrolled_count(&tx, group_id)?;
    if enrolled > 0 {
        tracing::info!(group_id, enrolled, "group delete blocked: students enrolled");
        return Err(CoreError::blocked(
            "group still has enrolled students",
            json!({ "reason": "has_students", "groupId": group_id, "studentCount": enrolled }),
        ));
    }

    tx.execute("DELETE FROM schedules WHERE group_id = ?", [group_id])?;
    tx.execute("DELETE FROM attendance WHERE group_id = ?", [group_id])?;
    tx.execute("DELETE FROM class_groups WHERE id = ?", [group_id])?;
    tx.commit()?;
    tracing::info!(group_id, "group deleted");
    Ok(())
}
