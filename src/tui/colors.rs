//! Color constants for the terminal user interface.

use ratatui::style::Color;

use crate::forms::guard::Severity;

/// Focused field border
pub const GOLD: Color = Color::Rgb(255, 215, 0);
/// Header and status bar background
pub const DARK_GREEN: Color = Color::Rgb(0, 80, 0);
/// Critical changes and destructive confirmations
pub const DARK_RED: Color = Color::Rgb(114, 0, 0);
/// Significant changes
pub const AMBER: Color = Color::Rgb(160, 100, 0);
/// Ordinary changes
pub const DARK_PURPLE: Color = Color::Rgb(86, 60, 92);

/// Dialog background for a pending change of the given severity.
pub fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Critical => DARK_RED,
        Severity::Significant => AMBER,
        Severity::Ordinary => DARK_PURPLE,
    }
}
