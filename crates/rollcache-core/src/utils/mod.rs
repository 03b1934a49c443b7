//! Utility functions for timestamp parsing and calendar arithmetic.

pub mod dates;

// Re-export commonly used functions at module level
pub use dates::{parse_flexible, LocalCalendar};
