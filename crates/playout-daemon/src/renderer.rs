//! Output device abstraction.
//!
//! The engine only needs three things from a matrix: play a payload frame by
//! frame while honoring cancellation, show a short status line, and go dark.
//! [`SimulatedMatrix`] implements the timing of a real device without any
//! hardware and is what `playoutd` drives unless a device driver is plugged
//! in.

use crate::estimator::RenderParams;
use chrono::{DateTime, Local};
use playout_proto::protocol::DisplayPayload;
use playout_proto::text::text_width_px;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Completed,
    Aborted,
}

#[async_trait::async_trait]
pub trait Renderer: Send + Sync {
    /// Play `payload` once.  Cancellation is observed between frames.
    async fn render(
        &self,
        payload: &DisplayPayload,
        params: &RenderParams,
        cancel: &CancellationToken,
    ) -> anyhow::Result<RenderOutcome>;

    /// Replace whatever is shown with a static line.
    async fn show_status(&self, text: &str) -> anyhow::Result<()>;

    async fn clear(&self) -> anyhow::Result<()>;
}

/// Clock face for a matrix of `modules` 8x8 modules.
pub fn clock_text(now: DateTime<Local>, modules: u32) -> String {
    if modules < 15 {
        now.format("%H:%M:%S").to_string()
    } else {
        now.format("%d.%m.%Y %H:%M:%S").to_string()
    }
}

/// Show the clock until cancelled or `max_show_time` has passed.
pub async fn run_clock(
    renderer: Arc<dyn Renderer>,
    modules: u32,
    refresh_per_second: u32,
    max_show_time: Duration,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let period = Duration::from_secs_f64(1.0 / refresh_per_second.max(1) as f64);
    let until = tokio::time::Instant::now() + max_show_time;
    while tokio::time::Instant::now() < until && !cancel.is_cancelled() {
        renderer.show_status(&clock_text(Local::now(), modules)).await?;
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
        }
    }
    renderer.clear().await
}

// ── simulated matrix ──────────────────────────────────────────────────────────

/// What a [`SimulatedMatrix`] currently shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatrixView {
    pub payload: Option<DisplayPayload>,
    pub status: Option<String>,
    /// Frames drawn since start.
    pub frames: u64,
    pub completed: u64,
    pub aborted: u64,
}

#[derive(Debug, Default, Clone)]
pub struct SimulatedMatrix {
    view: Arc<RwLock<MatrixView>>,
}

impl SimulatedMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn view(&self) -> MatrixView {
        self.view.read().await.clone()
    }

    /// Wait out one frame; `false` when cancelled first.
    async fn frame(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => {
                self.view.write().await.frames += 1;
                true
            }
        }
    }

    async fn play(
        &self,
        payload: &DisplayPayload,
        params: &RenderParams,
        cancel: &CancellationToken,
    ) -> bool {
        match payload {
            DisplayPayload::FlatText(text) => {
                if params.speed_px_per_sec <= 0.0 {
                    return true;
                }
                let column = Duration::from_secs_f64(1.0 / params.speed_px_per_sec);
                let columns = text_width_px(text) + params.device_width_px;
                for _ in 0..columns {
                    if !self.frame(column, cancel).await {
                        return false;
                    }
                }
            }
            DisplayPayload::LineSet(lines) => {
                // Blank lead-in, every line, then the scroll-out.
                for _ in 0..lines.len() + 2 {
                    for _ in 0..8 {
                        if !self.frame(params.row_delay, cancel).await {
                            return false;
                        }
                    }
                    if !self.frame(params.line_rest, cancel).await {
                        return false;
                    }
                }
            }
        }
        true
    }
}

#[async_trait::async_trait]
impl Renderer for SimulatedMatrix {
    async fn render(
        &self,
        payload: &DisplayPayload,
        params: &RenderParams,
        cancel: &CancellationToken,
    ) -> anyhow::Result<RenderOutcome> {
        {
            let mut view = self.view.write().await;
            view.payload = Some(payload.clone());
            view.status = None;
        }
        debug!("Matrix: {}", payload);

        let outcome = if self.play(payload, params, cancel).await {
            RenderOutcome::Completed
        } else {
            RenderOutcome::Aborted
        };

        let mut view = self.view.write().await;
        view.payload = None;
        match outcome {
            RenderOutcome::Completed => view.completed += 1,
            RenderOutcome::Aborted => view.aborted += 1,
        }
        Ok(outcome)
    }

    async fn show_status(&self, text: &str) -> anyhow::Result<()> {
        let mut view = self.view.write().await;
        view.payload = None;
        view.status = Some(text.to_string());
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        let mut view = self.view.write().await;
        view.payload = None;
        view.status = None;
        Ok(())
    }
}
