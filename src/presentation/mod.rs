//! Presentation layer reporting image events to the terminal.

/// Event reporting.
pub mod reporter;

pub use reporter::{EventReporter, ImageDimensions, ReportSummary};
