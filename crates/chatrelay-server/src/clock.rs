//! Wall-clock timestamps for chat lines.

/// Local time as `HH:MM:SS`.
pub(crate) fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}
