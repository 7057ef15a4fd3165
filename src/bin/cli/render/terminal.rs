use bloomquest_lib::quest::BloomProgress;

/// ANSI color codes
pub struct Color;

impl Color {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
}

/// Wrap `text` in `color` when colors are on
pub fn paint(text: &str, color: &str, use_color: bool) -> String {
    if use_color {
        format!("{}{}{}", color, text, Color::RESET)
    } else {
        text.to_string()
    }
}

/// Fixed-width bar for a 0-100 percentage
pub fn bar(percent: f64, width: usize) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize;
    format!("{}{}", "\u{2588}".repeat(filled), "\u{2591}".repeat(width - filled.min(width)))
}

/// Short status flags for one level
pub fn level_flags(progress: &BloomProgress, unlocked: bool) -> String {
    let mut flags = Vec::new();
    if !unlocked {
        flags.push("locked");
    }
    if progress.cleared {
        flags.push("cleared");
    }
    if progress.mastered {
        flags.push("mastered");
    }
    flags.join(", ")
}
