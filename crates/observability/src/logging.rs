//! Logging helpers.

/// Cap applied to request/response payloads before they hit a log record.
pub const MAX_LOG_MESSAGE_LEN: usize = 1000;

const TRUNCATION_MARKER: &str = "...(truncated)";

/// Truncate a payload string for logging.
///
/// Keeps the first [`MAX_LOG_MESSAGE_LEN`] characters and appends a marker.
/// Cuts on a char boundary so multi-byte payloads stay valid UTF-8.
pub fn truncate_log_message(message: &str) -> String {
    truncate_to(message, MAX_LOG_MESSAGE_LEN)
}

/// Truncate to an explicit cap (exposed for configurable sinks).
pub fn truncate_to(message: &str, max_len: usize) -> String {
    if message.chars().count() <= max_len {
        return message.to_string();
    }
    let cut: String = message.chars().take(max_len).collect();
    format!("{cut}{TRUNCATION_MARKER}")
}
