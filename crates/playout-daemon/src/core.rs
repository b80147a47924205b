/// PlayoutCore: single-owner event loop for all scheduling state.
///
/// Every input (control-surface and admin commands, finished builds and
/// renders, probe results, timer ticks, media-service push notifications)
/// arrives as a `DaemonEvent` on one mpsc channel.  The core owns the
/// `Scheduler` and the zone-control cursor exclusively; workers (builds,
/// renders, the clock, probes) run as spawned tasks and report back through
/// the same channel.
///
/// After each event the core publishes an `EngineSnapshot` through the
/// `StateManager` and broadcasts `BroadcastMessage::StateUpdated` when it
/// changed.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use playout_proto::config::Config;
use playout_proto::protocol::{Command, EngineSnapshot, Gesture, PlayState, Transport};
use playout_proto::state::StateManager;
use playout_proto::text::map_names;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregator::{Aggregation, Aggregator, AggregatorSettings};
use crate::estimator::RenderParams;
use crate::registry::ChannelRegistry;
use crate::renderer::{run_clock, RenderOutcome, Renderer};
use crate::scheduler::{Action, Input, Scheduler, SchedulerSettings};
use crate::sources::message::MessageBoard;
use crate::sources::{AudioSource, FragmentSource, TransportCode};
use crate::watchdog::Watchdog;
use crate::zone_control::{GestureOutcome, ZoneControl};
use crate::BroadcastMessage;

// ── DaemonEvent ───────────────────────────────────────────────────────────────

/// All inputs into the PlayoutCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from the control surface or the admin API.
    ClientCommand(Command),
    /// Timer tick: deadlines, zone-control timeout, watchdog.
    HeartbeatTick,
    /// A scheduled build finished.
    BuildFinished(Aggregation),
    /// A forced change check finished.
    ForcedCheckFinished(Aggregation),
    RenderFinished {
        render_id: u64,
        outcome: RenderOutcome,
    },
    ProbeFinished {
        audio_available: bool,
    },
    /// Time to poll sources that push no notifications.
    WebcheckTick,
    /// Zones of the media service changed state.
    MediaZonesChanged(Vec<String>),
    Shutdown,
}

/// Content sources handed to the core at startup.
#[derive(Default)]
pub struct Sources {
    pub audio: Vec<Arc<dyn AudioSource>>,
    pub fragments: Vec<Arc<dyn FragmentSource>>,
}

// ── PlayoutCore ───────────────────────────────────────────────────────────────

pub struct PlayoutCore {
    config: Config,
    /// Where live-control changes are persisted; `None` keeps them in memory.
    config_path: Option<PathBuf>,
    state_manager: Arc<StateManager>,
    registry: Arc<ChannelRegistry>,
    messages: Arc<MessageBoard>,
    aggregator: Arc<Aggregator>,
    renderer: Arc<dyn Renderer>,
    scheduler: Scheduler,
    zone_control: ZoneControl,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    watchdog: Option<Watchdog>,
    /// Running render task and its abort handle.
    render_cancel: Option<(u64, CancellationToken)>,
    /// Running clock task.  Stopping it waits for its final clear so the
    /// clock never draws over the render that follows.
    clock_task: Option<(CancellationToken, JoinHandle<()>)>,
    probe_in_flight: bool,
    forced_check_in_flight: bool,
    /// Set once the first build has come back.
    initialized: bool,
}

impl PlayoutCore {
    pub async fn new(
        config: Config,
        config_path: Option<PathBuf>,
        sources: Sources,
        renderer: Arc<dyn Renderer>,
        state_manager: Arc<StateManager>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> anyhow::Result<Self> {
        ChannelRegistry::validate_source_names(
            config.webservers.zones.iter().map(|z| z.name.as_str()),
        )?;

        let registry = Arc::new(ChannelRegistry::with_defaults(
            Some(config.zone_control.control_zone.clone()),
            state_manager.last_control_channel().await,
        ));
        let messages = Arc::new(MessageBoard::new());
        let aggregator = Arc::new(Aggregator::new(
            AggregatorSettings::from_config(&config),
            Arc::clone(&registry),
            sources.audio,
            sources.fragments,
            Arc::clone(&messages),
        ));
        let watchdog = if config.watchdog.enabled {
            Watchdog::from_env()
        } else {
            None
        };

        Ok(Self {
            scheduler: Scheduler::new(SchedulerSettings::from_config(&config)),
            zone_control: ZoneControl::new(Duration::from_secs(config.zone_control.timeout_secs)),
            config,
            config_path,
            state_manager,
            registry,
            messages,
            aggregator,
            renderer,
            event_tx,
            broadcast_tx,
            watchdog,
            render_cancel: None,
            clock_task: None,
            probe_in_flight: false,
            forced_check_in_flight: false,
            initialized: false,
        })
    }

    /// Borrow the state manager (for use by the HTTP server).
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    pub fn registry(&self) -> Arc<ChannelRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn messages(&self) -> Arc<MessageBoard> {
        Arc::clone(&self.messages)
    }

    /// Run the core event loop.  Returns when a `Shutdown` event is received
    /// or the event channel is closed.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("PlayoutCore: starting event loop");

        let tick = Duration::from_millis(self.config.schedule.tick_millis.max(10));
        let heartbeat_tx = self.event_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tick).await;
                if heartbeat_tx.send(DaemonEvent::HeartbeatTick).await.is_err() {
                    break;
                }
            }
        });

        if self.aggregator.audio_sources().iter().any(|s| s.force_updates()) {
            let interval =
                Duration::from_secs(self.config.webservers.webcheck_interval_secs.max(1));
            let webcheck_tx = self.event_tx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    if webcheck_tx.send(DaemonEvent::WebcheckTick).await.is_err() {
                        break;
                    }
                }
            });
        }

        if let Some(watchdog) = &self.watchdog {
            watchdog.ready();
        }

        // First build right away instead of waiting for a tick.
        self.feed(Input::Tick).await;
        self.publish().await;

        loop {
            let evt = event_rx.recv().await;
            match evt {
                None => {
                    info!("PlayoutCore: event channel closed, shutting down");
                    break;
                }

                Some(DaemonEvent::Shutdown) => {
                    info!("PlayoutCore: shutdown requested");
                    break;
                }

                Some(DaemonEvent::ClientCommand(cmd)) => {
                    info!("PlayoutCore: command {:?}", cmd);
                    if let Err(e) = self.handle_command(cmd).await {
                        error!("PlayoutCore: command error: {}", e);
                    }
                }

                Some(DaemonEvent::HeartbeatTick) => {
                    if let Some(watchdog) = &self.watchdog {
                        watchdog.notify();
                    }
                    self.check_zone_control().await;
                    self.feed(Input::Tick).await;
                }

                Some(DaemonEvent::BuildFinished(aggregation)) => {
                    self.initialized = true;
                    self.feed(Input::BuildFinished {
                        payload: aggregation.payload,
                        took: aggregation.took,
                    })
                    .await;
                }

                Some(DaemonEvent::ForcedCheckFinished(aggregation)) => {
                    self.forced_check_in_flight = false;
                    self.on_forced_check(aggregation).await;
                }

                Some(DaemonEvent::RenderFinished { render_id, outcome }) => {
                    debug!("PlayoutCore: render {} {:?}", render_id, outcome);
                    if self.render_cancel.as_ref().is_some_and(|(id, _)| *id == render_id) {
                        self.render_cancel = None;
                    }
                    self.feed(Input::RenderFinished { render_id }).await;
                }

                Some(DaemonEvent::ProbeFinished { audio_available }) => {
                    self.probe_in_flight = false;
                    self.feed(Input::ProbeResult { audio_available }).await;
                }

                Some(DaemonEvent::WebcheckTick) => {
                    self.start_forced_check("webcheck").await;
                }

                Some(DaemonEvent::MediaZonesChanged(zones)) => {
                    debug!("PlayoutCore: media zones changed {:?}", zones);
                    self.start_forced_check("media service").await;
                }
            }

            self.publish().await;
        }

        self.cleanup().await;
        Ok(())
    }

    // ── scheduler plumbing ────────────────────────────────────────────────────

    async fn feed(&mut self, input: Input) {
        let actions = self.scheduler.handle(input, Instant::now());
        for action in actions {
            self.execute(action).await;
        }
    }

    async fn execute(&mut self, action: Action) {
        match action {
            Action::StartBuild => self.spawn_build(),
            Action::StartRender {
                render_id,
                payload,
                estimated,
            } => {
                info!(
                    "PlayoutCore: render {} ({:.1}s): {}",
                    render_id,
                    estimated.as_secs_f64(),
                    payload
                );
                let cancel = CancellationToken::new();
                self.render_cancel = Some((render_id, cancel.clone()));
                let renderer = Arc::clone(&self.renderer);
                let params = self.scheduler.render_params();
                let tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let outcome = match renderer.render(&payload, &params, &cancel).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            error!("PlayoutCore: render {} failed: {}", render_id, e);
                            RenderOutcome::Aborted
                        }
                    };
                    let _ = tx
                        .send(DaemonEvent::RenderFinished { render_id, outcome })
                        .await;
                });
            }
            Action::AbortRender { render_id } => {
                if let Some((id, cancel)) = &self.render_cancel {
                    if *id == render_id {
                        debug!("PlayoutCore: aborting render {}", render_id);
                        cancel.cancel();
                    }
                }
            }
            Action::ClearDisplay => {
                if let Err(e) = self.renderer.clear().await {
                    warn!("PlayoutCore: clear failed: {}", e);
                }
            }
            Action::StartClock => {
                self.stop_clock().await;
                let cancel = CancellationToken::new();
                let renderer = Arc::clone(&self.renderer);
                let clock = self.config.clock.clone();
                let modules = self.config.display.modules;
                let token = cancel.clone();
                let handle = tokio::spawn(async move {
                    if let Err(e) = run_clock(
                        renderer,
                        modules,
                        clock.refresh_per_second,
                        Duration::from_secs(clock.max_show_time_secs),
                        token,
                    )
                    .await
                    {
                        warn!("PlayoutCore: clock failed: {}", e);
                    }
                });
                self.clock_task = Some((cancel, handle));
            }
            Action::StopClock => self.stop_clock().await,
            Action::StartProbe => self.spawn_probe(),
        }
    }

    async fn stop_clock(&mut self) {
        let Some((cancel, handle)) = self.clock_task.take() else {
            return;
        };
        cancel.cancel();
        if let Err(e) = handle.await {
            warn!("PlayoutCore: clock task failed: {}", e);
        }
    }

    fn spawn_build(&self) {
        let aggregator = Arc::clone(&self.aggregator);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let aggregation = run_aggregation(aggregator, false).await;
            let _ = tx.send(DaemonEvent::BuildFinished(aggregation)).await;
        });
    }

    fn spawn_probe(&mut self) {
        if self.probe_in_flight {
            return;
        }
        self.probe_in_flight = true;
        let sources: Vec<Arc<dyn AudioSource>> = self.aggregator.audio_sources().to_vec();
        let timeout = Duration::from_secs(self.config.schedule.source_timeout_secs.max(1));
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let mut audio_available = false;
            for source in sources {
                match tokio::time::timeout(timeout, source.is_available()).await {
                    Ok(true) => {
                        audio_available = true;
                        break;
                    }
                    Ok(false) => {}
                    Err(_) => warn!("PlayoutCore: probe of {} timed out", source.name()),
                }
            }
            let _ = tx.send(DaemonEvent::ProbeFinished { audio_available }).await;
        });
    }

    // ── forced change checks ──────────────────────────────────────────────────

    async fn start_forced_check(&mut self, reason: &str) {
        let now = Instant::now();
        let allowed = self.initialized
            && !self.forced_check_in_flight
            && !self.zone_control.is_active()
            && self.scheduler.can_interrupt(now)
            && !self.messages.is_exclusive().await;
        if !allowed {
            // Still keep channel availability current for zone control.
            self.spawn_channel_refresh();
            return;
        }
        debug!("PlayoutCore: forced check ({})", reason);
        self.forced_check_in_flight = true;
        let aggregator = Arc::clone(&self.aggregator);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let aggregation = run_aggregation(aggregator, true).await;
            let _ = tx.send(DaemonEvent::ForcedCheckFinished(aggregation)).await;
        });
    }

    fn spawn_channel_refresh(&self) {
        let sources: Vec<Arc<dyn AudioSource>> = self.aggregator.audio_sources().to_vec();
        let registry = Arc::clone(&self.registry);
        let timeout = Duration::from_secs(self.config.schedule.source_timeout_secs.max(1));
        tokio::spawn(async move {
            for source in sources {
                match tokio::time::timeout(timeout, source.refresh_channels(&registry)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!("PlayoutCore: {} channel refresh: {}", source.name(), e),
                    Err(_) => debug!("PlayoutCore: {} channel refresh timed out", source.name()),
                }
            }
        });
    }

    async fn on_forced_check(&mut self, aggregation: Aggregation) {
        if !aggregation.control_changed {
            return;
        }
        if self.messages.is_exclusive().await {
            debug!("PlayoutCore: playout change ignored, exclusive message set");
            return;
        }
        info!("PlayoutCore: playout changed, requesting interrupt");
        self.feed(Input::Interrupt {
            seed: Some(aggregation.payload),
        })
        .await;
    }

    // ── commands ──────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        match cmd {
            Command::Gesture { gesture } => self.handle_gesture(gesture).await,
            Command::ZoneControl { control_id, action } => {
                self.registry.select(&control_id).await?;
                self.remember_selection(&control_id).await;
                self.transport(Some(control_id), action).await
            }
            Command::SetMessage { message, option } => {
                let set = self.messages.set(&message, option).await;
                match set {
                    Some(message) if message.mode.preempts() => {
                        let seed = self.aggregator.message_payload(&message);
                        self.feed(Input::Interrupt { seed: Some(seed) }).await;
                    }
                    Some(_) => {}
                    None => info!("PlayoutCore: operator message cleared"),
                }
                Ok(())
            }
            Command::LiveControl { control, value } => {
                self.config.display.apply_live_control(&control, &value)?;
                self.scheduler
                    .set_render_params(RenderParams::from_display(&self.config.display));
                info!("PlayoutCore: live control {} = {}", control, value);
                if let Some(path) = &self.config_path {
                    self.config.save_to(path)?;
                }
                Ok(())
            }
            Command::GetState => Ok(()),
        }
    }

    async fn handle_gesture(&mut self, gesture: Gesture) -> anyhow::Result<()> {
        let now = Instant::now();
        let ids = self.registry.ids().await;
        let selected = self.registry.selected_id().await;

        match self.zone_control.handle_gesture(gesture, &ids, selected.clone(), now) {
            GestureOutcome::Entered { cursor } => {
                info!("PlayoutCore: zone control entered at {:?}", cursor);
                self.feed(Input::EnterZoneControl).await;
                self.show_zone_cursor(cursor.as_deref()).await;
            }
            GestureOutcome::Moved { cursor } => {
                self.show_zone_cursor(cursor.as_deref()).await;
            }
            GestureOutcome::Committed { channel } => {
                let committed = match channel {
                    Some(id) => match self.registry.select(&id).await {
                        Ok(()) => {
                            self.remember_selection(&id).await;
                            true
                        }
                        Err(e) => {
                            warn!("PlayoutCore: cannot commit zone: {}", e);
                            false
                        }
                    },
                    None => false,
                };
                info!("PlayoutCore: zone control left (committed={})", committed);
                self.feed(Input::ExitZoneControl { committed }).await;
            }
            GestureOutcome::Cancelled => {
                info!("PlayoutCore: zone control cancelled");
                self.feed(Input::ExitZoneControl { committed: false }).await;
            }
            GestureOutcome::Transport(transport) => {
                self.transport(selected, transport).await?;
            }
        }
        Ok(())
    }

    async fn show_zone_cursor(&self, cursor: Option<&str>) {
        let name = match cursor {
            Some(id) => self
                .registry
                .get(id)
                .await
                .map(|c| c.display_name)
                .unwrap_or_else(|| id.to_string()),
            None => "-".to_string(),
        };
        let zc = &self.config.zone_control;
        let name = if zc.map_names {
            map_names(&name, &zc.name_map)
        } else {
            name
        };
        let text = format!("{}: {}", self.config.language.message("control zone"), name);
        if let Err(e) = self.renderer.show_status(&text).await {
            warn!("PlayoutCore: cannot show zone cursor: {}", e);
        }
    }

    async fn remember_selection(&self, id: &str) {
        if let Err(e) = self.state_manager.remember_control_channel(id).await {
            warn!("PlayoutCore: cannot persist control channel: {}", e);
        }
    }

    /// Leave zone control when it timed out or its cursor went away.
    async fn check_zone_control(&mut self) {
        if !self.zone_control.is_active() {
            return;
        }
        let now = Instant::now();
        let reason = if self.zone_control.timed_out(now) {
            Some("timeout")
        } else {
            match self.zone_control.cursor() {
                Some(id) if !self.registry.contains(id).await => Some("cursor channel removed"),
                _ => None,
            }
        };
        if let Some(reason) = reason {
            info!("PlayoutCore: zone control left without commit ({})", reason);
            self.zone_control.cancel();
            self.feed(Input::ExitZoneControl { committed: false }).await;
        }
    }

    /// Issue a transport command on `channel_id` through the source owning it.
    async fn transport(&self, channel_id: Option<String>, transport: Transport) -> anyhow::Result<()> {
        let Some(id) = channel_id else {
            warn!("PlayoutCore: {:?} ignored, no control channel", transport);
            return Ok(());
        };
        let channel = self
            .registry
            .get(&id)
            .await
            .ok_or_else(|| anyhow::anyhow!("unknown channel '{}'", id))?;

        let code = match transport {
            Transport::Previous => TransportCode::Previous,
            Transport::Next => TransportCode::Next,
            Transport::PlayMode => match self.registry.toggle_play(&id).await {
                Some(PlayState::Playing) => TransportCode::Play,
                _ => TransportCode::Stop,
            },
            Transport::ShuffleMode => {
                TransportCode::Shuffle(self.registry.toggle_shuffle(&id).await.unwrap_or(false))
            }
        };

        let source = self
            .aggregator
            .audio_sources()
            .iter()
            .find(|s| s.kind() == channel.kind)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no source serves channel '{}'", id))?;

        info!("PlayoutCore: {} on '{}'", code.as_code(), id);
        tokio::spawn(async move {
            if let Err(e) = source.transport(&channel, code).await {
                warn!("PlayoutCore: {} on '{}' failed: {}", code.as_code(), channel.id, e);
            }
        });
        Ok(())
    }

    // ── publishing ────────────────────────────────────────────────────────────

    async fn publish(&self) {
        let mut snapshot = EngineSnapshot::default();
        self.scheduler.fill_snapshot(&mut snapshot, Instant::now());
        let registry = self.registry.snapshot().await;
        snapshot.selected_channel = registry.selected;
        snapshot.channels = registry.channels;
        snapshot.zone_cursor = self.zone_control.cursor().map(str::to_string);
        snapshot.message = self.messages.get().await;

        if self.state_manager.publish(snapshot).await {
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
    }

    async fn cleanup(&mut self) {
        info!("PlayoutCore: cleanup");
        if let Some((_, cancel)) = self.render_cancel.take() {
            cancel.cancel();
        }
        self.stop_clock().await;
        if let Err(e) = self.renderer.clear().await {
            warn!("PlayoutCore: clear on shutdown failed: {}", e);
        }
    }
}

/// Turn media-service push notifications into core events.
pub fn forward_media_changes(
    mut changes: broadcast::Receiver<Vec<String>>,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(zones) => {
                    if event_tx.send(DaemonEvent::MediaZonesChanged(zones)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("PlayoutCore: {} media notifications dropped", n);
                    if event_tx
                        .send(DaemonEvent::MediaZonesChanged(Vec::new()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Run one aggregation in its own task so a panicking source cannot take
/// the loop down.  A failed build reports an empty, unchanged payload.
async fn run_aggregation(aggregator: Arc<Aggregator>, force: bool) -> Aggregation {
    let started = Instant::now();
    let mode = aggregator.mode();
    match tokio::spawn(async move { aggregator.aggregate(force).await }).await {
        Ok(aggregation) => aggregation,
        Err(e) => {
            error!("PlayoutCore: aggregation failed: {}", e);
            Aggregation::failed(mode, started.elapsed())
        }
    }
}
