//! Per-ping derived features: real velocity, weekday, hour and holiday flag.

pub mod enrich;
pub mod holidays;
pub mod velocity;

pub use enrich::{Enricher, enrich_sequence};
pub use holidays::HolidayCalendar;
