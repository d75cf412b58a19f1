pub mod calendars;
pub mod check;
pub mod conflicts;
pub mod disconnect;
pub mod events;
