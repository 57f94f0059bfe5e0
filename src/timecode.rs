/*!
 * Timestamp parsing and formatting for the supported subtitle formats.
 *
 * All timestamps are held internally as `std::time::Duration` with
 * millisecond resolution. Each format has its own textual convention:
 * SRT uses `HH:MM:SS,mmm`, WebVTT uses `HH:MM:SS.mmm` (hours optional
 * and allowed to exceed two digits), ASS uses `H:MM:SS.CC` with
 * centisecond precision.
 */

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::SubtitleError;

static SRT_TIMESTAMP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{2,}):(\d{2}):(\d{2})[,.](\d{3})$").unwrap());

static VTT_TIMESTAMP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:(\d{2,}):)?(\d{2}):(\d{2})\.(\d{3})$").unwrap());

static ASS_TIMESTAMP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+):(\d{2}):(\d{2})\.(\d{2})$").unwrap());

fn build_duration(hours: u64, minutes: u64, seconds: u64, millis: u64) -> Duration {
    Duration::from_millis(hours * 3_600_000 + minutes * 60_000 + seconds * 1_000 + millis)
}

/// Parse an SRT timestamp (`HH:MM:SS,mmm`) to a duration.
///
/// A period separator is tolerated since it appears in the wild.
pub fn parse_srt_timestamp(timestamp: &str) -> Result<Duration, SubtitleError> {
    let captures = SRT_TIMESTAMP
        .captures(timestamp.trim())
        .ok_or_else(|| SubtitleError::parse(format!("Invalid timestamp: {timestamp}")))?;

    let hours: u64 = captures[1].parse().unwrap_or(0);
    let minutes: u64 = captures[2].parse().unwrap_or(0);
    let seconds: u64 = captures[3].parse().unwrap_or(0);
    let millis: u64 = captures[4].parse().unwrap_or(0);

    if minutes >= 60 || seconds >= 60 {
        return Err(SubtitleError::parse(format!(
            "Invalid time components in timestamp: {timestamp}"
        )));
    }

    Ok(build_duration(hours, minutes, seconds, millis))
}

/// Format a duration as an SRT timestamp (`HH:MM:SS,mmm`)
pub fn format_srt_timestamp(duration: Duration) -> String {
    let ms = duration.as_millis() as u64;
    format!(
        "{:02}:{:02}:{:02},{:03}",
        ms / 3_600_000,
        (ms % 3_600_000) / 60_000,
        (ms % 60_000) / 1_000,
        ms % 1_000
    )
}

/// Parse a WebVTT timestamp (`HH:MM:SS.mmm`, hours optional)
pub fn parse_vtt_timestamp(timestamp: &str) -> Result<Duration, SubtitleError> {
    let captures = VTT_TIMESTAMP
        .captures(timestamp.trim())
        .ok_or_else(|| SubtitleError::parse(format!("Invalid timestamp: {timestamp}")))?;

    let hours: u64 = captures
        .get(1)
        .map(|m| m.as_str().parse().unwrap_or(0))
        .unwrap_or(0);
    let minutes: u64 = captures[2].parse().unwrap_or(0);
    let seconds: u64 = captures[3].parse().unwrap_or(0);
    let millis: u64 = captures[4].parse().unwrap_or(0);

    if minutes >= 60 || seconds >= 60 {
        return Err(SubtitleError::parse(format!(
            "Invalid time components in timestamp: {timestamp}"
        )));
    }

    Ok(build_duration(hours, minutes, seconds, millis))
}

/// Format a duration as a WebVTT timestamp (`HH:MM:SS.mmm`)
pub fn format_vtt_timestamp(duration: Duration) -> String {
    let ms = duration.as_millis() as u64;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        ms / 3_600_000,
        (ms % 3_600_000) / 60_000,
        (ms % 60_000) / 1_000,
        ms % 1_000
    )
}

/// Parse an ASS timestamp (`H:MM:SS.CC`, centiseconds)
pub fn parse_ass_timestamp(timestamp: &str) -> Result<Duration, SubtitleError> {
    let captures = ASS_TIMESTAMP
        .captures(timestamp.trim())
        .ok_or_else(|| SubtitleError::parse(format!("Invalid timestamp: {timestamp}")))?;

    let hours: u64 = captures[1].parse().unwrap_or(0);
    let minutes: u64 = captures[2].parse().unwrap_or(0);
    let seconds: u64 = captures[3].parse().unwrap_or(0);
    let centis: u64 = captures[4].parse().unwrap_or(0);

    Ok(build_duration(hours, minutes, seconds, centis * 10))
}

/// Format a duration as an ASS timestamp (`H:MM:SS.CC`).
///
/// Millisecond precision below a centisecond is truncated, matching the
/// format's resolution.
pub fn format_ass_timestamp(duration: Duration) -> String {
    let ms = duration.as_millis() as u64;
    format!(
        "{}:{:02}:{:02}.{:02}",
        ms / 3_600_000,
        (ms % 3_600_000) / 60_000,
        (ms % 60_000) / 1_000,
        (ms % 1_000) / 10
    )
}

/// Convert a duration to fractional seconds for serialisation
pub fn duration_to_seconds(duration: Duration) -> f64 {
    duration.as_secs_f64()
}

/// Build a duration from fractional seconds, clamping negatives to zero
pub fn duration_from_seconds(seconds: f64) -> Duration {
    if seconds.is_finite() && seconds > 0.0 {
        Duration::from_secs_f64(seconds)
    } else {
        Duration::ZERO
    }
}
