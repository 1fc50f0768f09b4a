//! Instructor double-booking detection.
//!
//! A conflict is a pair (candidate slot, committed slot) for the same
//! instructor that overlaps on the same day. Nothing here writes.

use crate::error::CoreResult;
use crate::schedule::{overlaps, ClockTime, TimeSlot, Weekday};
use rusqlite::Connection;

/// A slot already stored for one of the instructor's groups.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedSlot {
    pub group_id: String,
    pub group_name: String,
    pub slot: TimeSlot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    /// Position of the offending slot in the candidate list.
    pub candidate_index: usize,
    pub candidate: TimeSlot,
    pub group_id: String,
    pub group_name: String,
    pub existing: TimeSlot,
}

impl Conflict {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "candidateIndex": self.candidate_index,
            "candidate": self.candidate.to_json(),
            "groupId": self.group_id,
            "groupName": self.group_name,
            "day": self.existing.day(),
            "start": self.existing.start(),
            "end": self.existing.end(),
            "startLabel": self.existing.start().to_12h_label(),
            "endLabel": self.existing.end().to_12h_label(),
        })
    }
}

/// What a rejected save hands back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictReport {
    pub instructor_id: String,
    pub instructor_name: String,
    pub conflicts: Vec<Conflict>,
}

impl ConflictReport {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "instructorId": self.instructor_id,
            "instructorName": self.instructor_name,
            "conflicts": self.conflicts.iter().map(Conflict::to_json).collect::<Vec<_>>(),
        })
    }

    /// One line per conflict, ready for a confirmation dialog.
    pub fn message(&self) -> String {
        let mut out = format!(
            "{} already teaches another group at this time:",
            self.instructor_name
        );
        for c in &self.conflicts {
            out.push_str(&format!(
                "\n- {} ({}): {} - {}",
                c.group_name,
                c.existing.day(),
                c.existing.start().to_12h_label(),
                c.existing.end().to_12h_label()
            ));
        }
        out
    }
}

/// Every overlapping (candidate, committed) pair, candidates in input order
/// and committed slots in the order given. Duplicates are kept.
pub fn detect(candidates: &[TimeSlot], committed: &[CommittedSlot]) -> Vec<Conflict> {
    let mut out = Vec::new();
    for (idx, cand) in candidates.iter().enumerate() {
        for existing in committed {
            if existing.slot.day() != cand.day() {
                continue;
            }
            if overlaps(cand, &existing.slot) {
                out.push(Conflict {
                    candidate_index: idx,
                    candidate: *cand,
                    group_id: existing.group_id.clone(),
                    group_name: existing.group_name.clone(),
                    existing: existing.slot,
                });
            }
        }
    }
    out
}

/// All slots of the instructor's groups, minus `exclude_group_id`.
pub fn committed_slots(
    conn: &Connection,
    instructor_id: &str,
    exclude_group_id: Option<&str>,
) -> CoreResult<Vec<CommittedSlot>> {
    let mut stmt = conn.prepare(
        "SELECT g.id, g.name, s.day, s.start_min, s.end_min
         FROM schedules s
         JOIN class_groups g ON g.id = s.group_id
         WHERE g.instructor_id = ?1
           AND (?2 IS NULL OR g.id <> ?2)
         ORDER BY g.name, g.id, s.start_min",
    )?;
    let raw = stmt
        .query_map((instructor_id, exclude_group_id), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, i64>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(raw.len());
    for (group_id, group_name, day, start, end) in raw {
        let Some(slot) = stored_slot(&day, start, end) else {
            tracing::warn!(%group_id, %day, start, end, "skipping unreadable schedule row");
            continue;
        };
        out.push(CommittedSlot {
            group_id,
            group_name,
            slot,
        });
    }
    out.sort_by(|a, b| {
        (&a.group_name, &a.group_id, a.slot.day(), a.slot.start())
            .cmp(&(&b.group_name, &b.group_id, b.slot.day(), b.slot.start()))
    });
    Ok(out)
}

pub(crate) fn stored_slot(day: &str, start: i64, end: i64) -> Option<TimeSlot> {
    let day = Weekday::parse(day)?;
    let start = ClockTime::from_minutes(start).ok()?;
    let end = ClockTime::from_minutes(end).ok()?;
    Some(TimeSlot::from_stored(day, start, end))
}

pub fn find_conflicts(
    conn: &Connection,
    candidates: &[TimeSlot],
    instructor_id: &str,
    exclude_group_id: Option<&str>,
) -> CoreResult<Vec<Conflict>> {
    let committed = committed_slots(conn, instructor_id, exclude_group_id)?;
    let conflicts = detect(candidates, &committed);
    tracing::debug!(
        instructor_id,
        candidates = candidates.len(),
        committed = committed.len(),
        found = conflicts.len(),
        "conflict check"
    );
    Ok(conflicts)
}
