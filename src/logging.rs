//! Console logging gate

/// Log level for console output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Suppress all non-warning output
    Quiet,
    /// Normal output level
    Normal,
    /// Verbose output with additional details
    Verbose,
}

/// Print a message if the current level permits it
pub fn log(level: LogLevel, required: LogLevel, msg: &str) {
    if level != LogLevel::Quiet && (level == required || required == LogLevel::Normal) {
        println!("{msg}");
    }
}

/// Warnings are never suppressed; each occurrence is reported.
pub fn warn(msg: &str) {
    eprintln!("warning: {msg}");
}
