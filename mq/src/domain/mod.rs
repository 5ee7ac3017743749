//! Domain types for the schedule queue
//!
//! - [`ScheduleEntry`] - one concrete execution of a test group at an instant
//! - [`ScheduleWindow`] - the horizon currently materialized into the queue

mod entry;
mod window;

pub use entry::ScheduleEntry;
pub use window::ScheduleWindow;
