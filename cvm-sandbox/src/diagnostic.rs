//! Human-readable exception reports.
//!
//! A report looks like:
//!
//! ```text
//! Uncaught exception: ReferenceError: foo is not defined
//! at _default_name.js:3:8
//!   let x = foo + 1;
//!           ^^^
//! Stack trace:
//! ReferenceError: foo is not defined
//!     at _default_name.js:3:9
//! ```
//!
//! Pieces the engine did not provide are left out. The text is for display
//! only and has no stable structure.

use crate::engine::{Exception, SourceLocation};
use std::fmt::Write;

const LABEL: &str = "Uncaught exception: ";

/// Render an engine exception into a multi-line report.
pub fn format_exception(exception: &Exception) -> String {
    let mut report = String::from(LABEL);
    report.push_str(&exception.text);

    if let Some(location) = &exception.location {
        write_location(&mut report, location);
    }

    if let Some(stack) = exception.stack.as_deref().filter(|s| !s.is_empty()) {
        report.push_str("\nStack trace:\n");
        report.push_str(stack);
    }

    report
}

fn write_location(report: &mut String, location: &SourceLocation) {
    let _ = write!(report, "\nat {}", location.resource);
    if let Some(line) = location.line {
        let _ = write!(report, ":{line}");
    }
    if let Some(start) = location.start_column {
        let _ = write!(report, ":{start}");
    }

    if let Some(source_line) = &location.source_line {
        let _ = write!(report, "\n  {source_line}");
    }

    if let (Some(start), Some(end)) = (location.start_column, location.end_column) {
        report.push_str("\n  ");
        report.extend(std::iter::repeat(' ').take(start));
        report.extend(std::iter::repeat('^').take(end.saturating_sub(start)));
    }
}
