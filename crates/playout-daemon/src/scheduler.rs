//! Fetch/Display scheduler.
//!
//! A pure state machine: the core feeds it [`Input`]s together with the
//! current instant and executes the [`Action`]s it returns.  Nothing in here
//! spawns tasks or touches the renderer, which keeps every transition
//! testable with synthetic clocks.
//!
//! The `fetch_in_progress` / `output_in_progress` / `clock_in_progress`
//! flags observers see are projections of the single [`Phase`], so at most
//! one of them can be set.  A background prefetch during `Displaying` is
//! tracked separately as `build_in_flight`.

use crate::estimator::{estimate_duration, next_fetch_deadline, RenderParams};
use playout_proto::config::Config;
use playout_proto::protocol::{DisplayPayload, EngineSnapshot, PhaseKind};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub music_required: bool,
    pub clock_show: bool,
    pub clock_without_idle_time: bool,
    pub max_idle_time: Duration,
    pub max_show_time: Duration,
    pub audioinfo_interval: Duration,
    pub empty_retry: Duration,
    pub stale_fetch: Duration,
    pub interrupt_margin: Duration,
    pub render: RenderParams,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            music_required: config.schedule.music_required,
            clock_show: config.clock.show,
            clock_without_idle_time: config.clock.without_idle_time,
            max_idle_time: Duration::from_secs(config.clock.max_idle_time_secs),
            max_show_time: Duration::from_secs(config.clock.max_show_time_secs),
            audioinfo_interval: Duration::from_secs(config.clock.audioinfo_interval_secs.max(1)),
            empty_retry: Duration::from_secs(config.schedule.empty_retry_secs),
            stale_fetch: Duration::from_secs(config.schedule.stale_fetch_secs),
            interrupt_margin: Duration::from_secs_f64(config.schedule.interrupt_margin_secs.max(0.0)),
            render: RenderParams::from_display(&config.display),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Fetching,
    /// A prepared payload waits for the previous render task to wind down.
    DisplayReady,
    Displaying { render_id: u64 },
    ClockDisplaying { since: Instant },
    ZoneControl,
}

impl Phase {
    pub fn kind(&self) -> PhaseKind {
        match self {
            Phase::Idle => PhaseKind::Idle,
            Phase::Fetching => PhaseKind::Fetching,
            Phase::DisplayReady => PhaseKind::DisplayReady,
            Phase::Displaying { .. } => PhaseKind::Displaying,
            Phase::ClockDisplaying { .. } => PhaseKind::ClockDisplaying,
            Phase::ZoneControl => PhaseKind::ZoneControl,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Tick,
    BuildFinished {
        payload: DisplayPayload,
        took: Duration,
    },
    RenderFinished {
        render_id: u64,
    },
    ProbeResult {
        audio_available: bool,
    },
    /// Preempt the current playout.  `seed` is shown if the forced
    /// aggregation comes back empty.
    Interrupt {
        seed: Option<DisplayPayload>,
    },
    EnterZoneControl,
    ExitZoneControl {
        committed: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    StartBuild,
    StartRender {
        render_id: u64,
        payload: DisplayPayload,
        estimated: Duration,
    },
    AbortRender {
        render_id: u64,
    },
    ClearDisplay,
    StartClock,
    StopClock,
    StartProbe,
}

#[derive(Debug)]
pub struct Scheduler {
    settings: SchedulerSettings,
    phase: Phase,
    active: Option<DisplayPayload>,
    prepared: Option<DisplayPayload>,
    /// Fallback handed over by an interrupt.
    seed: Option<DisplayPayload>,
    /// Last shown payload, parked while zone control owns the matrix.
    resume: Option<DisplayPayload>,
    build_in_flight: bool,
    /// The running build started before a zone-control commit.
    discard_build: bool,
    /// Render task that has not reported back yet, aborted ones included.
    render_outstanding: Option<u64>,
    next_render_id: u64,
    interrupt_requested: bool,
    /// `None` means as soon as possible.
    next_fetch: Option<Instant>,
    last_fetch_at: Option<Instant>,
    idle_since: Option<Instant>,
    play_count: u64,
    last_build_secs: u64,
    audio_available: bool,
    next_probe: Option<Instant>,
}

impl Scheduler {
    pub fn new(settings: SchedulerSettings) -> Self {
        Self {
            settings,
            phase: Phase::Idle,
            active: None,
            prepared: None,
            seed: None,
            resume: None,
            build_in_flight: false,
            discard_build: false,
            render_outstanding: None,
            next_render_id: 1,
            interrupt_requested: false,
            next_fetch: None,
            last_fetch_at: None,
            idle_since: None,
            play_count: 0,
            last_build_secs: 0,
            audio_available: false,
            next_probe: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn active(&self) -> Option<&DisplayPayload> {
        self.active.as_ref()
    }

    pub fn prepared(&self) -> Option<&DisplayPayload> {
        self.prepared.as_ref()
    }

    pub fn build_in_flight(&self) -> bool {
        self.build_in_flight
    }

    pub fn next_fetch(&self) -> Option<Instant> {
        self.next_fetch
    }

    pub fn idle_since(&self) -> Option<Instant> {
        self.idle_since
    }

    pub fn play_count(&self) -> u64 {
        self.play_count
    }

    pub fn render_params(&self) -> RenderParams {
        self.settings.render
    }

    /// Takes effect from the next swap on.
    pub fn set_render_params(&mut self, params: RenderParams) {
        self.settings.render = params;
    }

    /// Single entry point for every state change.
    pub fn handle(&mut self, input: Input, now: Instant) -> Vec<Action> {
        let mut actions = Vec::new();
        match input {
            Input::Tick => {}
            Input::BuildFinished { payload, took } => {
                self.on_build_finished(payload, took, now, &mut actions)
            }
            Input::RenderFinished { render_id } => self.on_render_finished(render_id),
            Input::ProbeResult { audio_available } => {
                self.on_probe_result(audio_available, now, &mut actions)
            }
            Input::Interrupt { seed } => self.on_interrupt(seed, now, &mut actions),
            Input::EnterZoneControl => self.on_enter_zone_control(now, &mut actions),
            Input::ExitZoneControl { committed } => {
                self.on_exit_zone_control(committed, now, &mut actions)
            }
        }
        self.advance(now, &mut actions);
        actions
    }

    /// Whether an interrupt would be honored right now.
    pub fn can_interrupt(&self, now: Instant) -> bool {
        matches!(self.phase, Phase::Displaying { .. })
            && !self.build_in_flight
            && self
                .next_fetch
                .is_some_and(|deadline| deadline.saturating_duration_since(now) > self.settings.interrupt_margin)
    }

    pub fn fill_snapshot(&self, snapshot: &mut EngineSnapshot, now: Instant) {
        snapshot.phase = self.phase.kind();
        snapshot.fetch_in_progress = self.phase == Phase::Fetching;
        snapshot.output_in_progress = matches!(self.phase, Phase::Displaying { .. });
        snapshot.clock_in_progress = matches!(self.phase, Phase::ClockDisplaying { .. });
        snapshot.zone_control_active = self.phase == Phase::ZoneControl;
        snapshot.fetch_done = self.prepared.is_some();
        snapshot.build_in_flight = self.build_in_flight;
        snapshot.interrupt_requested = self.interrupt_requested;
        snapshot.active_payload = self.active.clone();
        snapshot.prepared_payload = self.prepared.clone();
        snapshot.next_fetch_in_secs = self
            .next_fetch
            .map(|deadline| deadline.saturating_duration_since(now).as_secs_f64().round());
        snapshot.idle_for_secs = self
            .idle_since
            .map(|since| now.saturating_duration_since(since).as_secs_f64().round());
        snapshot.play_count = self.play_count;
        snapshot.last_build_secs = self.last_build_secs;
        snapshot.audio_available = self.audio_available;
    }

    // ── inputs ──────────────────────────────────────────────────────────────

    fn on_build_finished(
        &mut self,
        payload: DisplayPayload,
        took: Duration,
        now: Instant,
        actions: &mut Vec<Action>,
    ) {
        self.build_in_flight = false;
        self.last_build_secs = took.as_secs_f64().ceil() as u64;

        if std::mem::take(&mut self.discard_build) {
            debug!("Scheduler: dropping build started before the zone change");
            self.start_build(actions);
            return;
        }

        self.last_fetch_at = Some(now);
        if payload.is_empty() {
            self.idle_since.get_or_insert(now);
        } else {
            self.idle_since = None;
        }

        if let Phase::ClockDisplaying { .. } = self.phase {
            if payload.is_empty() {
                self.next_fetch = Some(now + self.settings.empty_retry);
                return;
            }
            info!("Scheduler: content while the clock runs, leaving clock");
            self.exit_clock(now, actions);
            self.phase = Phase::DisplayReady;
        }
        self.prepared = Some(payload);
    }

    fn on_render_finished(&mut self, render_id: u64) {
        if self.render_outstanding == Some(render_id) {
            self.render_outstanding = None;
        }
        if self.phase == (Phase::Displaying { render_id }) {
            self.phase = if self.prepared.is_some() {
                Phase::DisplayReady
            } else if self.build_in_flight {
                Phase::Fetching
            } else {
                Phase::Idle
            };
        } else {
            debug!("Scheduler: render {} reported after it was superseded", render_id);
        }
    }

    fn on_probe_result(&mut self, audio_available: bool, now: Instant, actions: &mut Vec<Action>) {
        if !matches!(self.phase, Phase::ClockDisplaying { .. }) {
            return;
        }
        self.audio_available = audio_available;
        if audio_available {
            info!("Scheduler: audio detected, leaving clock");
            self.exit_clock(now, actions);
            self.next_fetch = None;
            self.phase = Phase::Fetching;
            if !self.build_in_flight {
                self.start_build(actions);
            }
        }
    }

    fn on_interrupt(&mut self, seed: Option<DisplayPayload>, now: Instant, actions: &mut Vec<Action>) {
        if !self.can_interrupt(now) {
            debug!("Scheduler: interrupt ignored in {:?}", self.phase.kind());
            return;
        }
        let Phase::Displaying { render_id } = self.phase else {
            return;
        };
        info!("Scheduler: interrupting render {}", render_id);
        actions.push(Action::AbortRender { render_id });
        actions.push(Action::ClearDisplay);
        self.seed = self.prepared.take().or(seed);
        self.active = None;
        self.next_fetch = None;
        self.interrupt_requested = true;
        self.phase = Phase::Fetching;
        self.start_build(actions);
    }

    fn on_enter_zone_control(&mut self, now: Instant, actions: &mut Vec<Action>) {
        match self.phase {
            Phase::ZoneControl => return,
            Phase::Displaying { render_id } => actions.push(Action::AbortRender { render_id }),
            Phase::ClockDisplaying { .. } => self.exit_clock(now, actions),
            _ => {}
        }
        self.resume = self.active.take();
        self.interrupt_requested = false;
        self.seed = None;
        actions.push(Action::ClearDisplay);
        self.phase = Phase::ZoneControl;
    }

    fn on_exit_zone_control(&mut self, committed: bool, now: Instant, actions: &mut Vec<Action>) {
        if self.phase != Phase::ZoneControl {
            return;
        }
        actions.push(Action::ClearDisplay);
        let resume = self.resume.take();
        let fresh = self
            .last_fetch_at
            .is_some_and(|at| now.saturating_duration_since(at) < self.settings.stale_fetch);

        if !committed && fresh {
            if self.prepared.is_none() {
                self.prepared = resume;
            }
        } else {
            // The selection marker changed, or the cached content is too old.
            self.prepared = None;
            self.next_fetch = None;
            self.discard_build = committed && self.build_in_flight;
        }

        self.phase = if self.prepared.is_some() {
            Phase::DisplayReady
        } else if self.build_in_flight {
            Phase::Fetching
        } else {
            Phase::Idle
        };
    }

    // ── automatic transitions ───────────────────────────────────────────────

    fn advance(&mut self, now: Instant, actions: &mut Vec<Action>) {
        while self.step(now, actions) {}
    }

    /// One transition; returns `true` when the phase changed.
    fn step(&mut self, now: Instant, actions: &mut Vec<Action>) -> bool {
        match self.phase {
            Phase::ZoneControl => false,
            Phase::Idle => {
                if self.clock_eligible(now) {
                    self.enter_clock(now, actions);
                } else if self.prepared.is_some() {
                    self.phase = Phase::DisplayReady;
                } else if self.build_in_flight {
                    self.phase = Phase::Fetching;
                } else if self.fetch_due(now) {
                    self.start_build(actions);
                    self.phase = Phase::Fetching;
                } else {
                    return false;
                }
                true
            }
            Phase::Fetching => {
                if self.prepared.is_some() {
                    self.phase = Phase::DisplayReady;
                    return true;
                }
                if !self.build_in_flight {
                    self.start_build(actions);
                }
                false
            }
            Phase::DisplayReady => {
                if self.render_outstanding.is_some() {
                    return false;
                }
                self.swap(now, actions);
                true
            }
            Phase::Displaying { .. } => {
                if !self.build_in_flight && self.prepared.is_none() && self.fetch_due(now) {
                    self.start_build(actions);
                }
                false
            }
            Phase::ClockDisplaying { since } => {
                if now.saturating_duration_since(since) >= self.settings.max_show_time {
                    info!("Scheduler: clock show time elapsed");
                    self.exit_clock(now, actions);
                    self.phase = Phase::Idle;
                    return true;
                }
                if !self.build_in_flight && self.fetch_due(now) {
                    self.start_build(actions);
                }
                if self.next_probe.map_or(true, |at| now >= at) {
                    actions.push(Action::StartProbe);
                    self.next_probe = Some(now + self.settings.audioinfo_interval);
                }
                false
            }
        }
    }

    fn swap(&mut self, now: Instant, actions: &mut Vec<Action>) {
        let candidate = self
            .prepared
            .take()
            .filter(|p| !p.is_empty())
            .or_else(|| self.seed.take().filter(|p| !p.is_empty()));
        self.seed = None;
        self.interrupt_requested = false;

        let Some(payload) = candidate else {
            debug!("Scheduler: nothing to show, retrying in {:?}", self.settings.empty_retry);
            self.active = None;
            self.next_fetch = Some(now + self.settings.empty_retry);
            self.phase = Phase::Idle;
            return;
        };

        let estimated = estimate_duration(&payload, &self.settings.render);
        self.next_fetch = next_fetch_deadline(now, estimated, self.last_build_secs);
        self.play_count += 1;
        let render_id = self.next_render_id;
        self.next_render_id += 1;
        debug!(
            "Scheduler: render {} for {:.1}s, next fetch in {:?}",
            render_id,
            estimated.as_secs_f64(),
            self.next_fetch.map(|d| d.saturating_duration_since(now))
        );

        self.active = Some(payload.clone());
        self.render_outstanding = Some(render_id);
        self.phase = Phase::Displaying { render_id };
        actions.push(Action::StartRender {
            render_id,
            payload,
            estimated,
        });
    }

    fn start_build(&mut self, actions: &mut Vec<Action>) {
        if self.build_in_flight {
            return;
        }
        self.build_in_flight = true;
        actions.push(Action::StartBuild);
    }

    fn fetch_due(&self, now: Instant) -> bool {
        self.next_fetch.map_or(true, |deadline| now >= deadline)
    }

    fn clock_eligible(&self, now: Instant) -> bool {
        let s = &self.settings;
        if !s.clock_show || !s.music_required {
            return false;
        }
        if self.build_in_flight
            || self.render_outstanding.is_some()
            || self.audio_available
            || self.prepared.as_ref().is_some_and(|p| !p.is_empty())
        {
            return false;
        }
        s.clock_without_idle_time
            || self
                .idle_since
                .is_some_and(|since| now.saturating_duration_since(since) > s.max_idle_time)
    }

    fn enter_clock(&mut self, now: Instant, actions: &mut Vec<Action>) {
        info!("Scheduler: idle, showing clock");
        self.phase = Phase::ClockDisplaying { since: now };
        self.audio_available = false;
        self.next_probe = Some(now + self.settings.audioinfo_interval);
        actions.push(Action::StartClock);
    }

    fn exit_clock(&mut self, now: Instant, actions: &mut Vec<Action>) {
        actions.push(Action::StopClock);
        self.audio_available = false;
        self.next_probe = None;
        let nothing_shown = self.active.as_ref().map_or(true, DisplayPayload::is_empty);
        self.idle_since = if self.settings.music_required
            && !self.settings.clock_without_idle_time
            && nothing_shown
        {
            Some(now)
        } else {
            None
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            music_required: false,
            clock_show: true,
            clock_without_idle_time: false,
            max_idle_time: Duration::from_secs(5),
            max_show_time: Duration::from_secs(30),
            audioinfo_interval: Duration::from_secs(1),
            empty_retry: Duration::from_secs(15),
            stale_fetch: Duration::from_secs(60),
            interrupt_margin: Duration::from_secs(2),
            // 60 px/s and no lead-in: 80 glyphs (480 px) take exactly 8 s.
            render: RenderParams {
                device_width_px: 0,
                speed_px_per_sec: 60.0,
                row_delay: Duration::ZERO,
                line_rest: Duration::from_secs(1),
            },
        }
    }

    fn eight_second_payload(tag: char) -> DisplayPayload {
        DisplayPayload::FlatText(std::iter::repeat(tag).take(80).collect())
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    fn render_id_of(actions: &[Action]) -> Option<u64> {
        actions.iter().find_map(|a| match a {
            Action::StartRender { render_id, .. } => Some(*render_id),
            _ => None,
        })
    }

    fn assert_single_flag(scheduler: &Scheduler, now: Instant) {
        let mut snapshot = EngineSnapshot::default();
        scheduler.fill_snapshot(&mut snapshot, now);
        let set = [
            snapshot.fetch_in_progress,
            snapshot.output_in_progress,
            snapshot.clock_in_progress,
        ]
        .iter()
        .filter(|f| **f)
        .count();
        assert!(set <= 1, "more than one in-progress flag in {:?}", snapshot.phase);
    }

    /// Drive the scheduler to `Displaying` an 8 s payload built in 1 s.
    fn displaying(t0: Instant) -> (Scheduler, u64) {
        let mut scheduler = Scheduler::new(settings());
        let actions = scheduler.handle(Input::Tick, t0);
        assert_eq!(actions, vec![Action::StartBuild]);
        let actions = scheduler.handle(
            Input::BuildFinished {
                payload: eight_second_payload('a'),
                took: secs(1.0),
            },
            t0,
        );
        let render_id = render_id_of(&actions).expect("render started");
        (scheduler, render_id)
    }

    #[test]
    fn test_first_tick_builds_then_displays() {
        let t0 = Instant::now();
        let (scheduler, _) = displaying(t0);
        assert!(matches!(scheduler.phase(), Phase::Displaying { .. }));
        assert_eq!(scheduler.play_count(), 1);
        // 8 s render, 1 s build: fetch 2 s before the end.
        assert_eq!(scheduler.next_fetch(), Some(t0 + secs(6.0)));
        assert_single_flag(&scheduler, t0);
    }

    #[test]
    fn test_prefetch_and_swap_on_completion() {
        let t0 = Instant::now();
        let (mut scheduler, first) = displaying(t0);

        assert!(scheduler.handle(Input::Tick, t0 + secs(5.0)).is_empty());
        let actions = scheduler.handle(Input::Tick, t0 + secs(6.0));
        assert_eq!(actions, vec![Action::StartBuild]);
        assert!(scheduler.build_in_flight());
        assert_single_flag(&scheduler, t0 + secs(6.0));

        scheduler.handle(
            Input::BuildFinished {
                payload: eight_second_payload('b'),
                took: secs(0.4),
            },
            t0 + secs(6.4),
        );
        // Still showing the first payload, the new one waits.
        assert_eq!(scheduler.active(), Some(&eight_second_payload('a')));
        assert_eq!(scheduler.prepared(), Some(&eight_second_payload('b')));

        let actions = scheduler.handle(Input::RenderFinished { render_id: first }, t0 + secs(8.0));
        assert!(render_id_of(&actions).is_some());
        assert_eq!(scheduler.active(), Some(&eight_second_payload('b')));
        assert_eq!(scheduler.play_count(), 2);
        assert_single_flag(&scheduler, t0 + secs(8.0));
    }

    #[test]
    fn test_interrupt_margin() {
        let t0 = Instant::now();

        // 5 s before the deadline: honored.
        let (mut scheduler, render_id) = displaying(t0);
        let actions = scheduler.handle(
            Input::Interrupt {
                seed: Some(DisplayPayload::FlatText("breaking".into())),
            },
            t0 + secs(1.0),
        );
        assert!(actions.contains(&Action::AbortRender { render_id }));
        assert!(actions.contains(&Action::StartBuild));
        assert_eq!(scheduler.active(), None);
        assert_eq!(scheduler.phase(), Phase::Fetching);
        assert_single_flag(&scheduler, t0 + secs(1.0));

        // 1.5 s before the deadline: the natural swap wins.
        let (mut scheduler, _) = displaying(t0);
        let actions = scheduler.handle(Input::Interrupt { seed: None }, t0 + secs(4.5));
        assert!(actions.is_empty());
        assert_eq!(scheduler.active(), Some(&eight_second_payload('a')));
    }

    #[test]
    fn test_interrupt_waits_for_aborted_render_and_uses_seed() {
        let t0 = Instant::now();
        let (mut scheduler, old_render) = displaying(t0);
        let seed = DisplayPayload::FlatText("operator says hi".into());
        scheduler.handle(Input::Interrupt { seed: Some(seed.clone()) }, t0 + secs(1.0));

        // Build comes back empty before the old render task has stopped.
        let actions = scheduler.handle(
            Input::BuildFinished {
                payload: DisplayPayload::FlatText(String::new()),
                took: secs(0.2),
            },
            t0 + secs(1.2),
        );
        assert!(render_id_of(&actions).is_none());
        assert_eq!(scheduler.phase(), Phase::DisplayReady);

        let actions = scheduler.handle(
            Input::RenderFinished {
                render_id: old_render,
            },
            t0 + secs(1.3),
        );
        let new_render = render_id_of(&actions).expect("seed rendered");
        assert_ne!(new_render, old_render);
        assert_eq!(scheduler.active(), Some(&seed));
    }

    #[test]
    fn test_empty_result_retries_later() {
        let t0 = Instant::now();
        let mut scheduler = Scheduler::new(settings());
        scheduler.handle(Input::Tick, t0);
        scheduler.handle(
            Input::BuildFinished {
                payload: DisplayPayload::FlatText(String::new()),
                took: secs(0.1),
            },
            t0,
        );
        assert_eq!(scheduler.phase(), Phase::Idle);
        assert_eq!(scheduler.active(), None);
        assert_eq!(scheduler.next_fetch(), Some(t0 + secs(15.0)));

        assert!(scheduler.handle(Input::Tick, t0 + secs(14.0)).is_empty());
        assert_eq!(
            scheduler.handle(Input::Tick, t0 + secs(15.0)),
            vec![Action::StartBuild]
        );
    }

    #[test]
    fn test_idle_clock_and_audio_return() {
        let t0 = Instant::now();
        let mut scheduler = Scheduler::new(SchedulerSettings {
            music_required: true,
            ..settings()
        });
        scheduler.handle(Input::Tick, t0);
        scheduler.handle(
            Input::BuildFinished {
                payload: DisplayPayload::FlatText(String::new()),
                took: secs(0.1),
            },
            t0,
        );

        assert!(scheduler.handle(Input::Tick, t0 + secs(5.0)).is_empty());
        let actions = scheduler.handle(Input::Tick, t0 + secs(5.01));
        assert_eq!(actions, vec![Action::StartClock]);
        assert!(matches!(scheduler.phase(), Phase::ClockDisplaying { .. }));
        assert_single_flag(&scheduler, t0 + secs(5.01));

        let actions = scheduler.handle(Input::Tick, t0 + secs(6.5));
        assert_eq!(actions, vec![Action::StartProbe]);
        let actions = scheduler.handle(
            Input::ProbeResult {
                audio_available: true,
            },
            t0 + secs(6.6),
        );
        assert!(actions.contains(&Action::StopClock));
        assert!(actions.contains(&Action::StartBuild));
        assert_eq!(scheduler.phase(), Phase::Fetching);
    }

    #[test]
    fn test_clock_requires_music_required() {
        let t0 = Instant::now();
        let mut scheduler = Scheduler::new(settings());
        scheduler.handle(Input::Tick, t0);
        scheduler.handle(
            Input::BuildFinished {
                payload: DisplayPayload::FlatText(String::new()),
                took: secs(0.1),
            },
            t0,
        );
        assert!(scheduler.handle(Input::Tick, t0 + secs(10.0)).is_empty());
        assert_eq!(scheduler.phase(), Phase::Idle);
    }

    #[test]
    fn test_clock_ends_after_show_time() {
        let t0 = Instant::now();
        let mut scheduler = Scheduler::new(SchedulerSettings {
            music_required: true,
            audioinfo_interval: secs(100.0),
            ..settings()
        });
        scheduler.handle(Input::Tick, t0);
        scheduler.handle(
            Input::BuildFinished {
                payload: DisplayPayload::FlatText(String::new()),
                took: secs(0.1),
            },
            t0,
        );
        scheduler.handle(Input::Tick, t0 + secs(6.0));
        assert!(matches!(scheduler.phase(), Phase::ClockDisplaying { .. }));

        // The background build at the retry deadline comes back empty.
        let actions = scheduler.handle(Input::Tick, t0 + secs(15.0));
        assert_eq!(actions, vec![Action::StartBuild]);
        scheduler.handle(
            Input::BuildFinished {
                payload: DisplayPayload::FlatText(String::new()),
                took: secs(0.1),
            },
            t0 + secs(15.0),
        );
        assert!(matches!(scheduler.phase(), Phase::ClockDisplaying { .. }));

        let actions = scheduler.handle(Input::Tick, t0 + secs(36.0));
        assert!(actions.contains(&Action::StopClock));
        // Idle time restarts, so the clock does not come straight back and
        // the overdue fetch runs instead.
        assert!(actions.contains(&Action::StartBuild));
        assert_eq!(scheduler.phase(), Phase::Fetching);
        assert_eq!(scheduler.idle_since(), Some(t0 + secs(36.0)));
    }

    #[test]
    fn test_zone_control_cancel_restores_fresh_payload() {
        let t0 = Instant::now();
        let (mut scheduler, render_id) = displaying(t0);
        let actions = scheduler.handle(Input::EnterZoneControl, t0 + secs(1.0));
        assert!(actions.contains(&Action::AbortRender { render_id }));
        assert_eq!(scheduler.phase(), Phase::ZoneControl);
        assert_eq!(scheduler.active(), None);

        scheduler.handle(Input::RenderFinished { render_id }, t0 + secs(1.1));
        // Frozen: no builds while the operator browses.
        assert!(scheduler.handle(Input::Tick, t0 + secs(7.0)).is_empty());

        let actions = scheduler.handle(
            Input::ExitZoneControl { committed: false },
            t0 + secs(8.0),
        );
        assert!(render_id_of(&actions).is_some());
        assert_eq!(scheduler.active(), Some(&eight_second_payload('a')));
    }

    #[test]
    fn test_zone_control_commit_rebuilds() {
        let t0 = Instant::now();
        let (mut scheduler, render_id) = displaying(t0);
        scheduler.handle(Input::EnterZoneControl, t0 + secs(1.0));
        scheduler.handle(Input::RenderFinished { render_id }, t0 + secs(1.1));
        let actions = scheduler.handle(
            Input::ExitZoneControl { committed: true },
            t0 + secs(2.0),
        );
        assert!(actions.contains(&Action::StartBuild));
        assert_eq!(scheduler.phase(), Phase::Fetching);
    }

    #[test]
    fn test_zone_control_cancel_after_stale_fetch_rebuilds() {
        let t0 = Instant::now();
        let (mut scheduler, render_id) = displaying(t0);
        scheduler.handle(Input::EnterZoneControl, t0 + secs(1.0));
        scheduler.handle(Input::RenderFinished { render_id }, t0 + secs(1.1));
        let actions = scheduler.handle(
            Input::ExitZoneControl { committed: false },
            t0 + secs(90.0),
        );
        assert!(actions.contains(&Action::StartBuild));
    }

    #[test]
    fn test_commit_discards_build_started_before() {
        let t0 = Instant::now();
        let (mut scheduler, render_id) = displaying(t0);
        scheduler.handle(Input::Tick, t0 + secs(6.0));
        assert!(scheduler.build_in_flight());
        scheduler.handle(Input::EnterZoneControl, t0 + secs(6.1));
        scheduler.handle(Input::RenderFinished { render_id }, t0 + secs(6.2));
        scheduler.handle(Input::ExitZoneControl { committed: true }, t0 + secs(6.3));

        let actions = scheduler.handle(
            Input::BuildFinished {
                payload: eight_second_payload('x'),
                took: secs(0.5),
            },
            t0 + secs(6.5),
        );
        assert_eq!(actions, vec![Action::StartBuild]);
        assert_eq!(scheduler.prepared(), None);
    }
}
