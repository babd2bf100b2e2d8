//! Human-readable duration formatting
//!
//! Used wherever the engine writes a duration into a reason string
//! (dwell-time and cooldown suppressions, sweep summaries). Keeps the
//! format consistent across the engine and the administrative CLI.

/// Format a duration in seconds as a compact `Nd Nh Nm` string.
///
/// The two most significant non-zero units are shown; sub-minute
/// durations render as `Ns`. Negative inputs (clock skew between the
/// caller and stored timestamps) are clamped to `0s`.
///
/// # Examples
///
/// ```
/// use sqa_common::human_time::format_duration;
///
/// assert_eq!(format_duration(45), "45s");
/// assert_eq!(format_duration(3600), "1h");
/// assert_eq!(format_duration(90_000), "1d 1h");
/// assert_eq!(format_duration(601_200), "6d 23h");
/// assert_eq!(format_duration(-5), "0s");
/// ```
pub fn format_duration(seconds: i64) -> String {
    if seconds <= 0 {
        return "0s".to_string();
    }

    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    } else if hours > 0 {
        if minutes > 0 {
            format!("{}h {}m", hours, minutes)
        } else {
            format!("{}h", hours)
        }
    } else if minutes > 0 {
        if secs > 0 {
            format!("{}m {}s", minutes, secs)
        } else {
            format!("{}m", minutes)
        }
    } else {
        format!("{}s", secs)
    }
}
