use crate::conflicts::stored_slot;
use crate::error::CoreResult;
use crate::schedule::{TimeSlot, Weekday};
use rusqlite::Connection;
use serde_json::json;

#[derive(Debug, Clone, PartialEq)]
pub struct TimetableEntry {
    pub group_id: String,
    pub group_name: String,
    pub level: Option<String>,
    pub instructor_id: String,
    pub instructor_name: String,
    pub student_count: i64,
    pub max_students: i64,
    pub slot: TimeSlot,
}

impl TimetableEntry {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "groupId": self.group_id,
            "groupName": self.group_name,
            "level": self.level,
            "instructorId": self.instructor_id,
            "instructorName": self.instructor_name,
            "studentCount": self.student_count,
            "maxStudents": self.max_students,
            "slot": self.slot.to_json(),
        })
    }
}

fn load_entries(conn: &Connection, instructor_id: Option<&str>) -> CoreResult<Vec<TimetableEntry>> {
    let mut stmt = conn.prepare(
        "SELECT g.id, g.name, g.level, g.instructor_id, i.name, g.max_students,
                (SELECT COUNT(*) FROM student_groups sg WHERE sg.group_id = g.id),
                s.day, s.start_min, s.end_min
         FROM schedules s
         JOIN class_groups g ON g.id = s.group_id
         JOIN instructors i ON i.id = g.instructor_id
         WHERE (?1 IS NULL OR g.instructor_id = ?1)",
    )?;
    let rows = stmt
        .query_map([instructor_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, i64>(5)?,
                r.get::<_, i64>(6)?,
                r.get::<_, String>(7)?,
                r.get::<_, i64>(8)?,
                r.get::<_, i64>(9)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out: Vec<TimetableEntry> = rows
        .into_iter()
        .filter_map(
            |(gid, gname, level, iid, iname, max_students, count, day, start, end)| {
                Some(TimetableEntry {
                    group_id: gid,
                    group_name: gname,
                    level,
                    instructor_id: iid,
                    instructor_name: iname,
                    student_count: count,
                    max_students,
                    slot: stored_slot(&day, start, end)?,
                })
            },
        )
        .collect();
    out.sort_by(|a, b| {
        (a.slot.day(), a.slot.start(), &a.group_name)
            .cmp(&(b.slot.day(), b.slot.start(), &b.group_name))
    });
    Ok(out)
}

/// All seven days, Saturday first, each sorted by start time. Days with no
/// sessions are present and empty.
pub fn weekly(
    conn: &Connection,
    instructor_id: Option<&str>,
) -> CoreResult<Vec<(Weekday, Vec<TimetableEntry>)>> {
    let entries = load_entries(conn, instructor_id)?;
    Ok(Weekday::ALL
        .into_iter()
        .map(|day| {
            let of_day = entries
                .iter()
                .filter(|e| e.slot.day() == day)
                .cloned()
                .collect();
            (day, of_day)
        })
        .collect())
}

pub fn for_day(
    conn: &Connection,
    day: Weekday,
    instructor_id: Option<&str>,
) -> CoreResult<Vec<TimetableEntry>> {
    Ok(load_entries(conn, instructor_id)?
        .into_iter()
        .filter(|e| e.slot.day() == day)
        .collect())
}
