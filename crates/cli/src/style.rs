//! Shared styling helpers for CLI output.

use console::Style;

use odksync_core::conflict::ResolutionCase;

/// Green with checkmark.
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Red with cross.
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// Marker for a column whose versions differ.
pub fn conflicting() -> String {
    Style::new().red().bold().apply_to("≠ differs").to_string()
}

/// Marker for a column whose versions agree.
pub fn concordant() -> String {
    Style::new().dim().apply_to("= same").to_string()
}

/// Short human label for a resolution case.
pub fn case_label(case: ResolutionCase) -> String {
    match case {
        ResolutionCase::DeleteOrPromote => Style::new()
            .yellow()
            .bold()
            .apply_to("New row, never saved")
            .to_string(),
        ResolutionCase::RestoreOrPromote => Style::new()
            .blue()
            .bold()
            .apply_to("Saved row with checkpoints")
            .to_string(),
        ResolutionCase::AlreadyResolved => Style::new()
            .green()
            .apply_to("Already resolved")
            .to_string(),
    }
}
