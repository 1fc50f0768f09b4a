use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// Day of a weekly recurring slot. Ordered the way the center's week runs,
/// Saturday first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Saturday,
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Saturday,
        Weekday::Sunday,
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Saturday => "saturday",
            Self::Sunday => "sunday",
            Self::Monday => "monday",
            Self::Tuesday => "tuesday",
            Self::Wednesday => "wednesday",
            Self::Thursday => "thursday",
            Self::Friday => "friday",
        }
    }

    /// Accepts full names and three-letter prefixes, any case.
    pub fn parse(s: &str) -> Option<Self> {
        let t = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == t || (t.len() == 3 && d.as_str().starts_with(&t)))
    }

    pub fn from_chrono(d: chrono::Weekday) -> Self {
        match d {
            chrono::Weekday::Sat => Self::Saturday,
            chrono::Weekday::Sun => Self::Sunday,
            chrono::Weekday::Mon => Self::Monday,
            chrono::Weekday::Tue => Self::Tuesday,
            chrono::Weekday::Wed => Self::Wednesday,
            chrono::Weekday::Thu => Self::Thursday,
            chrono::Weekday::Fri => Self::Friday,
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Period {
    #[serde(rename = "AM")]
    Am,
    #[serde(rename = "PM")]
    Pm,
}

impl Period {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AM" => Some(Self::Am),
            "PM" => Some(Self::Pm),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Am => "AM",
            Self::Pm => "PM",
        }
    }
}

/// Time of day as minutes since midnight, always in `0..1440`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClockTime(u16);

impl ClockTime {
    pub fn new(hour: u8, minute: u8) -> CoreResult<Self> {
        if hour > 23 {
            return Err(CoreError::invalid("hour", "hour must be between 0 and 23"));
        }
        if minute > 59 {
            return Err(CoreError::invalid(
                "minute",
                "minute must be between 0 and 59",
            ));
        }
        Ok(Self(u16::from(hour) * 60 + u16::from(minute)))
    }

    pub fn from_minutes(minutes: i64) -> CoreResult<Self> {
        if !(0..i64::from(MINUTES_PER_DAY)).contains(&minutes) {
            return Err(CoreError::invalid(
                "minutes",
                format!("{} is outside a single day", minutes),
            ));
        }
        Ok(Self(minutes as u16))
    }

    /// Parses `H:MM` / `HH:MM` in 24-hour form.
    pub fn parse_hhmm(s: &str) -> CoreResult<Self> {
        let t = s.trim();
        let Some((h, m)) = t.split_once(':') else {
            return Err(CoreError::invalid("time", format!("expected HH:MM, got {:?}", t)));
        };
        let hour = h
            .parse::<u8>()
            .map_err(|_| CoreError::invalid("time", format!("non-numeric hour in {:?}", t)))?;
        if m.len() != 2 {
            return Err(CoreError::invalid("time", format!("expected HH:MM, got {:?}", t)));
        }
        let minute = m
            .parse::<u8>()
            .map_err(|_| CoreError::invalid("time", format!("non-numeric minute in {:?}", t)))?;
        Self::new(hour, minute)
    }

    /// 12 AM is midnight, 12 PM is noon.
    pub fn from_12h(hour: u8, minute: u8, period: Period) -> CoreResult<Self> {
        if !(1..=12).contains(&hour) {
            return Err(CoreError::invalid("hour", "hour must be between 1 and 12"));
        }
        let h24 = match (period, hour) {
            (Period::Am, 12) => 0,
            (Period::Am, h) => h,
            (Period::Pm, 12) => 12,
            (Period::Pm, h) => h + 12,
        };
        Self::new(h24, minute)
    }

    pub fn to_12h(self) -> (u8, u8, Period) {
        let (h, m) = (self.hour(), self.minute());
        match h {
            0 => (12, m, Period::Am),
            1..=11 => (h, m, Period::Am),
            12 => (12, m, Period::Pm),
            _ => (h - 12, m, Period::Pm),
        }
    }

    pub fn to_12h_label(self) -> String {
        let (h, m, p) = self.to_12h();
        format!("{}:{:02} {}", h, m, p.as_str())
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    pub fn hour(self) -> u8 {
        (self.0 / 60) as u8
    }

    pub fn minute(self) -> u8 {
        (self.0 % 60) as u8
    }

    /// Adds minutes modulo 24 hours.
    pub fn wrapping_add(self, minutes: u32) -> Self {
        let total = (u32::from(self.0) + minutes) % u32::from(MINUTES_PER_DAY);
        Self(total as u16)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ClockTime::parse_hhmm(&s).map_err(serde::de::Error::custom)
    }
}

/// One weekly recurring block: `[start, end)` on `day`.
///
/// Built through `new` the range is non-empty and inside the day. Built
/// through `from_duration` the end wraps modulo 24 hours, so a session that
/// runs past midnight ends up with `end <= start`; such slots are kept as
/// entered and compared by raw minutes like any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeSlot {
    day: Weekday,
    start: ClockTime,
    end: ClockTime,
}

impl TimeSlot {
    pub fn new(day: Weekday, start: ClockTime, end: ClockTime) -> CoreResult<Self> {
        if start >= end {
            return Err(CoreError::invalid(
                "end",
                format!("start {} must be before end {}", start, end),
            ));
        }
        Ok(Self { day, start, end })
    }

    pub fn from_duration(day: Weekday, start: ClockTime, duration_minutes: i64) -> CoreResult<Self> {
        if !(1..i64::from(MINUTES_PER_DAY)).contains(&duration_minutes) {
            return Err(CoreError::invalid(
                "durationMinutes",
                "duration must be between 1 and 1439 minutes",
            ));
        }
        let end = start.wrapping_add(duration_minutes as u32);
        Ok(Self { day, start, end })
    }

    /// Rehydrates a slot read back from storage without re-validating it.
    pub(crate) fn from_stored(day: Weekday, start: ClockTime, end: ClockTime) -> Self {
        Self { day, start, end }
    }

    pub fn day(&self) -> Weekday {
        self.day
    }

    pub fn start(&self) -> ClockTime {
        self.start
    }

    pub fn end(&self) -> ClockTime {
        self.end
    }

    pub fn wraps_midnight(&self) -> bool {
        self.end <= self.start
    }

    pub fn duration_minutes(&self) -> u16 {
        if self.wraps_midnight() {
            MINUTES_PER_DAY - self.start.minutes() + self.end.minutes()
        } else {
            self.end.minutes() - self.start.minutes()
        }
    }

    /// Half-open overlap on the same day; touching endpoints do not overlap.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.day == other.day && self.start < other.end && other.start < self.end
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "day": self.day,
            "start": self.start,
            "end": self.end,
            "startLabel": self.start.to_12h_label(),
            "endLabel": self.end.to_12h_label(),
            "durationMinutes": self.duration_minutes(),
            "wrapsMidnight": self.wraps_midnight(),
        })
    }
}

pub fn overlaps(a: &TimeSlot, b: &TimeSlot) -> bool {
    a.overlaps(b)
}

/// A slot as it arrives from the UI. Three shapes are accepted:
/// `{day, start, end}`, `{day, start, durationMinutes}` and the form shape
/// `{day, hour, minute, period, durationMinutes}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotInput {
    pub day: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub hour: Option<u8>,
    pub minute: Option<u8>,
    pub period: Option<String>,
    pub duration_minutes: Option<i64>,
}

impl SlotInput {
    /// `index` is only used to name the offending field in errors.
    pub fn resolve(&self, index: usize) -> CoreResult<TimeSlot> {
        let field = |name: &str| format!("slots[{}].{}", index, name);
        let reword = |name: &str, e: CoreError| match e {
            CoreError::Validation { message, .. } => CoreError::Validation {
                field: field(name),
                message,
            },
            other => other,
        };
        let nest = |e: CoreError| match e {
            CoreError::Validation { field: inner, message } => CoreError::Validation {
                field: field(inner.as_str()),
                message,
            },
            other => other,
        };

        let day_raw = self
            .day
            .as_deref()
            .ok_or_else(|| CoreError::invalid(&field("day"), "missing day"))?;
        let day = Weekday::parse(day_raw).ok_or_else(|| {
            CoreError::invalid(&field("day"), format!("unknown day {:?}", day_raw))
        })?;

        let start = match (&self.start, self.hour, self.minute, &self.period) {
            (Some(s), _, _, _) => ClockTime::parse_hhmm(s).map_err(|e| reword("start", e))?,
            (None, Some(h), Some(m), Some(p)) => {
                let period = Period::parse(p).ok_or_else(|| {
                    CoreError::invalid(&field("period"), "period must be AM or PM")
                })?;
                ClockTime::from_12h(h, m, period).map_err(nest)?
            }
            _ => {
                return Err(CoreError::invalid(
                    &field("start"),
                    "missing start (HH:MM or hour/minute/period)",
                ))
            }
        };

        match (&self.end, self.duration_minutes) {
            (Some(e), _) => {
                let end = ClockTime::parse_hhmm(e).map_err(|e| reword("end", e))?;
                TimeSlot::new(day, start, end).map_err(|e| reword("end", e))
            }
            (None, Some(d)) => {
                TimeSlot::from_duration(day, start, d).map_err(|e| reword("durationMinutes", e))
            }
            (None, None) => Err(CoreError::invalid(
                &field("end"),
                "missing end or durationMinutes",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> ClockTime {
        ClockTime::parse_hhmm(s).expect("clock time")
    }

    fn slot(day: Weekday, start: &str, end: &str) -> TimeSlot {
        TimeSlot::new(day, t(start), t(end)).expect("slot")
    }

    #[test]
    fn different_days_never_overlap() {
        let a = slot(Weekday::Saturday, "10:00", "11:00");
        let b = slot(Weekday::Sunday, "10:00", "11:00");
        assert!(!overlaps(&a, &b));
        assert!(!overlaps(&b, &a));
    }

    #[test]
    fn overlap_is_symmetric_on_same_day() {
        let slots = [
            slot(Weekday::Monday, "09:00", "10:00"),
            slot(Weekday::Monday, "09:30", "10:30"),
            slot(Weekday::Monday, "10:00", "11:00"),
            slot(Weekday::Monday, "08:00", "12:00"),
        ];
        for a in &slots {
            for b in &slots {
                assert_eq!(a.overlaps(b), b.overlaps(a), "{:?} vs {:?}", a, b);
            }
        }
    }

    #[test]
    fn touching_boundaries_do_not_overlap() {
        let a = slot(Weekday::Saturday, "10:00", "11:00");
        let b = slot(Weekday::Saturday, "11:00", "12:00");
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn contained_and_partial_ranges_overlap() {
        let outer = slot(Weekday::Tuesday, "08:00", "12:00");
        let inner = slot(Weekday::Tuesday, "09:00", "09:30");
        let tail = slot(Weekday::Tuesday, "11:59", "13:00");
        assert!(outer.overlaps(&inner));
        assert!(outer.overlaps(&tail));
        assert!(!inner.overlaps(&tail));
    }

    #[test]
    fn explicit_range_requires_start_before_end() {
        assert!(TimeSlot::new(Weekday::Friday, t("11:00"), t("11:00")).is_err());
        assert!(TimeSlot::new(Weekday::Friday, t("12:00"), t("11:00")).is_err());
    }

    #[test]
    fn twelve_hour_conversion_handles_noon_and_midnight() {
        assert_eq!(ClockTime::from_12h(12, 0, Period::Am).unwrap().to_string(), "00:00");
        assert_eq!(ClockTime::from_12h(12, 15, Period::Pm).unwrap().to_string(), "12:15");
        assert_eq!(ClockTime::from_12h(1, 5, Period::Pm).unwrap().to_string(), "13:05");
        assert_eq!(ClockTime::from_12h(9, 30, Period::Am).unwrap().to_string(), "09:30");
        assert!(ClockTime::from_12h(0, 0, Period::Am).is_err());
        assert!(ClockTime::from_12h(13, 0, Period::Pm).is_err());

        assert_eq!(t("00:00").to_12h(), (12, 0, Period::Am));
        assert_eq!(t("12:00").to_12h(), (12, 0, Period::Pm));
        assert_eq!(t("23:45").to_12h(), (11, 45, Period::Pm));
        assert_eq!(t("13:05").to_12h_label(), "1:05 PM");
    }

    #[test]
    fn duration_past_midnight_wraps_end_time() {
        let s = TimeSlot::from_duration(Weekday::Thursday, t("23:30"), 60).expect("slot");
        assert_eq!(s.end().to_string(), "00:30");
        assert!(s.wraps_midnight());
        assert_eq!(s.duration_minutes(), 60);
    }

    #[test]
    fn duration_must_be_positive_and_under_a_day() {
        assert!(TimeSlot::from_duration(Weekday::Monday, t("10:00"), 0).is_err());
        assert!(TimeSlot::from_duration(Weekday::Monday, t("10:00"), 1440).is_err());
        let s = TimeSlot::from_duration(Weekday::Monday, t("10:00"), 90).expect("slot");
        assert_eq!(s.end().to_string(), "11:30");
        assert!(!s.wraps_midnight());
    }

    #[test]
    fn parse_rejects_malformed_times() {
        assert!(ClockTime::parse_hhmm("ten:00").is_err());
        assert!(ClockTime::parse_hhmm("10:5").is_err());
        assert!(ClockTime::parse_hhmm("24:00").is_err());
        assert!(ClockTime::parse_hhmm("1000").is_err());
        assert_eq!(t("7:05").minutes(), 425);
    }

    #[test]
    fn weekday_accepts_short_and_long_names() {
        assert_eq!(Weekday::parse("Sat"), Some(Weekday::Saturday));
        assert_eq!(Weekday::parse("wednesday"), Some(Weekday::Wednesday));
        assert_eq!(Weekday::parse("WED"), Some(Weekday::Wednesday));
        assert_eq!(Weekday::parse("someday"), None);
        assert_eq!(Weekday::ALL[0], Weekday::Saturday);
    }

    #[test]
    fn slot_input_resolves_form_shape() {
        let input = SlotInput {
            day: Some("sat".into()),
            hour: Some(11),
            minute: Some(30),
            period: Some("PM".into()),
            duration_minutes: Some(60),
            ..Default::default()
        };
        let s = input.resolve(0).expect("resolve");
        assert_eq!(s.day(), Weekday::Saturday);
        assert_eq!(s.start().to_string(), "23:30");
        assert_eq!(s.end().to_string(), "00:30");
    }

    #[test]
    fn slot_input_names_the_bad_field() {
        let input = SlotInput {
            day: Some("monday".into()),
            start: Some("10:00".into()),
            end: Some("09:00".into()),
            ..Default::default()
        };
        match input.resolve(2) {
            Err(CoreError::Validation { field, .. }) => assert_eq!(field, "slots[2].end"),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn slot_input_keeps_the_clock_field_name() {
        let input = SlotInput {
            day: Some("sunday".into()),
            hour: Some(10),
            minute: Some(75),
            period: Some("AM".into()),
            duration_minutes: Some(60),
            ..Default::default()
        };
        match input.resolve(0) {
            Err(CoreError::Validation { field, message }) => {
                assert_eq!(field, "slots[0].minute");
                assert!(message.contains("minute"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }

        let input = SlotInput {
            hour: Some(13),
            minute: Some(0),
            ..input
        };
        match input.resolve(1) {
            Err(CoreError::Validation { field, .. }) => assert_eq!(field, "slots[1].hour"),
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
