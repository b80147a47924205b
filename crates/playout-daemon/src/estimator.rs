//! Render-duration estimates and the fetch deadline derived from them.

use playout_proto::config::DisplayConfig;
use playout_proto::protocol::DisplayPayload;
use playout_proto::text::text_width_px;
use std::time::Duration;
use tokio::time::Instant;

/// Renderer geometry and timing, captured from the display config so live
/// tweaks only affect renders started afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderParams {
    pub device_width_px: u32,
    pub speed_px_per_sec: f64,
    /// Per pixel row in vertical scrolling.
    pub row_delay: Duration,
    /// Rest period of a line once it is fully in view.
    pub line_rest: Duration,
}

impl RenderParams {
    pub fn from_display(display: &DisplayConfig) -> Self {
        Self {
            device_width_px: display.device_width_px(),
            speed_px_per_sec: display.scroll_speed_px_per_sec(),
            row_delay: Duration::from_secs_f64(display.vertical_scroll_delay_ms.max(0.0) / 1000.0),
            line_rest: Duration::from_secs_f64(display.line_hold_secs.max(0.0)),
        }
    }

    /// Time one line occupies: rest plus the eight rows it takes to scroll in.
    pub fn line_hold(&self) -> Duration {
        self.line_rest + self.row_delay * 8
    }
}

impl Default for RenderParams {
    fn default() -> Self {
        Self::from_display(&DisplayConfig::default())
    }
}

/// Time to scroll `width_px` of content across the matrix.
pub fn flat_duration(width_px: u32, speed_px_per_sec: f64) -> Duration {
    if speed_px_per_sec <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(width_px as f64 / speed_px_per_sec)
}

/// Time for `line_count` lines in vertical mode.  The two extra slots cover
/// the blank lead-in and the final scroll-out.
pub fn lines_duration(line_count: usize, line_hold: Duration) -> Duration {
    line_hold * (line_count as u32 + 2)
}

pub fn estimate_duration(payload: &DisplayPayload, params: &RenderParams) -> Duration {
    match payload {
        // The text scrolls in from the right edge and out past the left one.
        DisplayPayload::FlatText(text) => flat_duration(
            text_width_px(text) + params.device_width_px,
            params.speed_px_per_sec,
        ),
        DisplayPayload::LineSet(lines) => lines_duration(lines.len(), params.line_hold()),
    }
}

/// Deadline for starting the next aggregation so its result is ready when
/// the current render ends.  `None` means as soon as possible.
pub fn next_fetch_deadline(
    now: Instant,
    estimated: Duration,
    last_build_secs: u64,
) -> Option<Instant> {
    let lead = Duration::from_secs(2 * last_build_secs);
    if estimated <= lead {
        None
    } else {
        Some(now + (estimated - lead))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_estimate_and_deadline() {
        let estimated = flat_duration(400, 50.0);
        assert_eq!(estimated, Duration::from_secs(8));

        let now = Instant::now();
        assert_eq!(
            next_fetch_deadline(now, estimated, 1),
            Some(now + Duration::from_secs(6))
        );
    }

    #[test]
    fn test_short_render_fetches_asap() {
        let now = Instant::now();
        assert_eq!(next_fetch_deadline(now, Duration::from_secs(4), 2), None);
        assert_eq!(next_fetch_deadline(now, Duration::from_secs(3), 2), None);
        assert!(next_fetch_deadline(now, Duration::from_secs(5), 2).is_some());
    }

    #[test]
    fn test_payload_estimates() {
        let params = RenderParams {
            device_width_px: 64,
            speed_px_per_sec: 50.0,
            row_delay: Duration::from_millis(125),
            line_rest: Duration::from_secs(2),
        };
        // 36 px of text plus the 64 px device width.
        let flat = DisplayPayload::FlatText("Hello!".into());
        assert_eq!(estimate_duration(&flat, &params), Duration::from_secs(2));

        let lines = DisplayPayload::LineSet(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(params.line_hold(), Duration::from_secs(3));
        assert_eq!(estimate_duration(&lines, &params), Duration::from_secs(15));
    }
}
