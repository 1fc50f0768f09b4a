pub mod attendance;
pub mod backup;
pub mod core;
pub mod groups;
pub mod instructors;
pub mod payments;
pub mod reports;
pub mod schedule;
pub mod students;
