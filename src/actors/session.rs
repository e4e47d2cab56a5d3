use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use actix::prelude::*;
use image::DynamicImage;
use rand::prelude::*;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::config::CONFIG;
use crate::error::SafetyGuardError;
use crate::messages::supervisor::SystemShutdown;
use crate::messages::{
    ActorFailed, ClearDisplay, DisplayFrame, GetSessionStatus, InternalSessionComplete,
    SessionOutcome, SessionState, SessionStatus, SpeakAlert, StartSession, StopSession,
};
use crate::utils::camera::{CameraSource, FrameSource};
use crate::utils::detection_utils::{detect_ppe, ComplianceResult, DetectionModelTrait};

/// Opens a frame source for a camera URL. Injected so tests can run sessions
/// against scripted sources.
pub type FrameSourceFactory =
    Arc<dyn Fn(&str) -> Result<Box<dyn FrameSource>, SafetyGuardError> + Send + Sync>;

/// Throughput and alerting knobs for one live session.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub conf_threshold: f32,
    /// Process every Nth frame; the rest are read and dropped.
    pub frame_skip: u64,
    /// One shared cooldown for violation and compliance alerts alike.
    pub alert_cooldown: Duration,
    pub audio_alerts: bool,
}

impl SessionPolicy {
    pub fn from_config() -> Self {
        Self {
            conf_threshold: CONFIG.detection.confidence_threshold,
            frame_skip: CONFIG.session.frame_skip.max(1),
            alert_cooldown: Duration::from_secs(CONFIG.session.alert_cooldown_secs),
            audio_alerts: CONFIG.alerts.enabled,
        }
    }
}

/// Gates both alert kinds behind a single shared timestamp.
pub struct AlertGate {
    cooldown: Duration,
    last_alert: Option<Instant>,
}

impl AlertGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_alert: None,
        }
    }

    /// True (arming the cooldown) when enough time has passed since the last
    /// alert of either kind. The first call always fires.
    pub fn try_fire(&mut self, now: Instant) -> bool {
        match self.last_alert {
            Some(last) if now.duration_since(last) <= self.cooldown => false,
            _ => {
                self.last_alert = Some(now);
                true
            }
        }
    }
}

/// LiveSessionActor owns the live inspection lifecycle: it spawns the
/// blocking camera loop, relays stop requests, and reports how the session
/// ended. The camera handle itself never leaves the loop task.
pub struct LiveSessionActor {
    model: Arc<dyn DetectionModelTrait>,
    source_factory: FrameSourceFactory,
    policy: SessionPolicy,
    alert_recipient: Option<Recipient<SpeakAlert>>,
    display_recipient: Option<Recipient<DisplayFrame>>,
    clear_recipient: Option<Recipient<ClearDisplay>>,
    supervisor: Option<Addr<crate::actors::SupervisorActor>>,
    shutdown_on_exit: bool,
    state: SessionState,
    stop_signal: Option<Arc<AtomicBool>>,
    frames_seen: u64,
    frames_processed: u64,
    last_outcome: Option<SessionOutcome>,
}

impl LiveSessionActor {
    pub fn new(model: Arc<dyn DetectionModelTrait>) -> Self {
        Self {
            model,
            source_factory: Arc::new(|url: &str| {
                CameraSource::open(url).map(|camera| Box::new(camera) as Box<dyn FrameSource>)
            }),
            policy: SessionPolicy::from_config(),
            alert_recipient: None,
            display_recipient: None,
            clear_recipient: None,
            supervisor: None,
            shutdown_on_exit: false,
            state: SessionState::Idle,
            stop_signal: None,
            frames_seen: 0,
            frames_processed: 0,
            last_outcome: None,
        }
    }

    pub fn with_policy(mut self, policy: SessionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_source_factory(mut self, source_factory: FrameSourceFactory) -> Self {
        self.source_factory = source_factory;
        self
    }

    pub fn with_alerts(mut self, recipient: Recipient<SpeakAlert>) -> Self {
        self.alert_recipient = Some(recipient);
        self
    }

    pub fn with_display(
        mut self,
        display: Recipient<DisplayFrame>,
        clear: Recipient<ClearDisplay>,
    ) -> Self {
        self.display_recipient = Some(display);
        self.clear_recipient = Some(clear);
        self
    }

    pub fn with_supervisor(mut self, supervisor: Addr<crate::actors::SupervisorActor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    /// Ask the supervisor to stop the whole system when the session ends
    /// (used by the CLI live mode).
    pub fn shutdown_system_on_exit(mut self, enabled: bool) -> Self {
        self.shutdown_on_exit = enabled;
        self
    }

    /// Spawn the inspection loop on the blocking thread pool, reporting the
    /// camera-open result through `init_tx` before the first frame.
    fn spawn_inspection_task(
        &mut self,
        ctx: &mut Context<Self>,
        camera_url: String,
        stop_signal: Arc<AtomicBool>,
        init_tx: oneshot::Sender<Result<(), SafetyGuardError>>,
    ) {
        let own_addr = ctx.address();
        let model = self.model.clone();
        let source_factory = self.source_factory.clone();
        let policy = self.policy.clone();
        let alerts = if policy.audio_alerts {
            self.alert_recipient.clone()
        } else {
            None
        };
        let display = self.display_recipient.clone();

        info!(target: "session", "Spawning inspection loop in blocking thread pool");

        let task = async move {
            let joined = tokio::task::spawn_blocking(move || {
                run_inspection_loop(
                    &camera_url,
                    source_factory,
                    model,
                    policy,
                    alerts,
                    display,
                    stop_signal,
                    init_tx,
                )
            })
            .await;

            let completion = match joined {
                Ok(Some(completion)) => completion,
                // The camera never opened; StartSession already reported it.
                Ok(None) => return,
                Err(join_error) => {
                    error!(target: "session", "Inspection loop panicked or was cancelled: {}", join_error);
                    InternalSessionComplete {
                        outcome: Err(SafetyGuardError::Other(format!(
                            "Inspection task failed: {}",
                            join_error
                        ))),
                        frames_seen: 0,
                        frames_processed: 0,
                    }
                }
            };
            own_addr.do_send(completion);
        };

        // The task is never aborted; stop requests go through the signal so
        // the loop can finish its in-flight frame and release the camera.
        let _handle = actix::spawn(task);
    }
}

impl Actor for LiveSessionActor {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        info!("LiveSessionActor started");
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("LiveSessionActor stopped");

        // Ask a running loop to wind down; never abort it mid-frame, the
        // guaranteed-release cleanup runs inside the loop task itself.
        if let Some(signal) = &self.stop_signal {
            signal.store(true, Ordering::Relaxed);
        }
    }
}

// =============================================================================
// MESSAGE HANDLERS
// =============================================================================

impl Handler<StartSession> for LiveSessionActor {
    type Result = ResponseActFuture<Self, Result<(), SafetyGuardError>>;

    fn handle(&mut self, msg: StartSession, ctx: &mut Self::Context) -> Self::Result {
        info!("Received StartSession for: {}", msg.camera_url);

        if self.stop_signal.is_some() || self.state != SessionState::Idle {
            warn!("A live session is already active, rejecting start request");
            return Box::pin(
                async {
                    Err(SafetyGuardError::Other(
                        "A live session is already running".to_string(),
                    ))
                }
                .into_actor(self),
            );
        }

        let stop_signal = Arc::new(AtomicBool::new(false));
        self.stop_signal = Some(stop_signal.clone());
        self.last_outcome = None;

        let (init_tx, init_rx) = oneshot::channel::<Result<(), SafetyGuardError>>();
        self.spawn_inspection_task(ctx, msg.camera_url, stop_signal, init_tx);

        Box::pin(
            async move {
                match init_rx.await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(err)) => Err(err),
                    Err(_channel_error) => Err(SafetyGuardError::Other(
                        "Camera initialization channel failed".to_string(),
                    )),
                }
            }
            .into_actor(self)
            .map(|result, actor, _ctx| {
                match &result {
                    // The loop may already have completed for very short
                    // sessions; only enter Running while it is still alive.
                    Ok(()) => {
                        if actor.stop_signal.is_some() {
                            actor.state = SessionState::Running;
                            info!("Live inspection session is running");
                        }
                    }
                    Err(err) => {
                        error!("Failed to access camera: {}", err);
                        actor.state = SessionState::Idle;
                        actor.stop_signal = None;
                        if let Some(supervisor) = &actor.supervisor {
                            supervisor.do_send(ActorFailed {
                                actor_name: "LiveSessionActor".to_string(),
                                error: err.to_string(),
                            });
                        }
                    }
                }
                result
            }),
        )
    }
}

impl Handler<StopSession> for LiveSessionActor {
    type Result = Result<(), SafetyGuardError>;

    fn handle(&mut self, _msg: StopSession, _ctx: &mut Self::Context) -> Self::Result {
        match &self.stop_signal {
            Some(signal) => {
                info!("Stop requested for live session");
                self.state = SessionState::Stopping;
                // Takes effect at the next iteration boundary; the loop then
                // releases the camera and reports back.
                signal.store(true, Ordering::Relaxed);
            }
            None => {
                debug!("No live session to stop");
            }
        }
        Ok(())
    }
}

impl Handler<InternalSessionComplete> for LiveSessionActor {
    type Result = ();

    fn handle(&mut self, msg: InternalSessionComplete, _ctx: &mut Self::Context) -> Self::Result {
        self.frames_seen = msg.frames_seen;
        self.frames_processed = msg.frames_processed;

        match msg.outcome {
            Ok(outcome) => {
                info!(
                    "Live session ended: {:?} ({} of {} frames processed)",
                    outcome, msg.frames_processed, msg.frames_seen
                );
                self.last_outcome = Some(outcome);
                if outcome == SessionOutcome::CameraError {
                    if let Some(supervisor) = &self.supervisor {
                        supervisor.do_send(ActorFailed {
                            actor_name: "LiveSessionActor".to_string(),
                            error: "Camera read failure".to_string(),
                        });
                    }
                }
            }
            Err(err) => {
                error!("Live session failed: {}", err);
                self.last_outcome = Some(SessionOutcome::Failed);
                if let Some(supervisor) = &self.supervisor {
                    supervisor.do_send(ActorFailed {
                        actor_name: "LiveSessionActor".to_string(),
                        error: err.to_string(),
                    });
                }
            }
        }

        // Cleanup tail: the camera was already released inside the loop task.
        self.state = SessionState::Idle;
        self.stop_signal = None;
        if let Some(clear) = &self.clear_recipient {
            clear.do_send(ClearDisplay);
        }
        if self.shutdown_on_exit {
            if let Some(supervisor) = &self.supervisor {
                supervisor.do_send(SystemShutdown);
            }
        }
    }
}

impl Handler<GetSessionStatus> for LiveSessionActor {
    type Result = Result<SessionStatus, SafetyGuardError>;

    fn handle(&mut self, _msg: GetSessionStatus, _ctx: &mut Self::Context) -> Self::Result {
        Ok(SessionStatus {
            state: self.state,
            frames_seen: self.frames_seen,
            frames_processed: self.frames_processed,
            last_outcome: self.last_outcome,
        })
    }
}

// =============================================================================
// INSPECTION LOOP
// =============================================================================

/// The blocking inspection loop. Returns `None` when the camera never opened
/// (the error went through `init_tx`), otherwise the completion report, sent
/// after the camera has been released.
#[allow(clippy::too_many_arguments)]
fn run_inspection_loop(
    camera_url: &str,
    source_factory: FrameSourceFactory,
    model: Arc<dyn DetectionModelTrait>,
    policy: SessionPolicy,
    alerts: Option<Recipient<SpeakAlert>>,
    display: Option<Recipient<DisplayFrame>>,
    stop_signal: Arc<AtomicBool>,
    init_tx: oneshot::Sender<Result<(), SafetyGuardError>>,
) -> Option<InternalSessionComplete> {
    info!(target: "session", "Acquiring camera {}", camera_url);

    let mut camera = match source_factory(camera_url) {
        Ok(camera) => {
            if init_tx.send(Ok(())).is_err() {
                error!(target: "session", "Session starter went away before the camera opened");
                return None;
            }
            camera
        }
        Err(err) => {
            error!(target: "session", "Failed to access camera {}: {}", camera_url, err);
            let _ = init_tx.send(Err(err));
            return None;
        }
    };

    let mut gate = AlertGate::new(policy.alert_cooldown);
    let mut frames_seen = 0u64;
    let mut frames_processed = 0u64;

    let outcome = loop {
        // Stop requests take effect here, never mid-frame.
        if stop_signal.load(Ordering::Relaxed) {
            info!(target: "session", "Stop requested, ending live session");
            break SessionOutcome::Stopped;
        }

        let frame = match camera.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                warn!(target: "session", "Camera disconnected");
                break SessionOutcome::CameraDisconnected;
            }
            Err(err) => {
                error!(target: "session", "Camera read failed: {}", err);
                break SessionOutcome::CameraError;
            }
        };

        frames_seen += 1;
        // Keep every Nth frame, drop the rest to bound inference load.
        if frames_seen % policy.frame_skip != 0 {
            continue;
        }

        // A corrupt frame must not take the session down.
        let processed = catch_unwind(AssertUnwindSafe(|| {
            process_frame(
                model.as_ref(),
                &policy,
                &frame,
                frames_seen,
                &alerts,
                &display,
                &mut gate,
            )
        }));
        match processed {
            Ok(()) => frames_processed += 1,
            Err(_panic) => {
                error!(target: "session", "Frame {} processing panicked, continuing", frames_seen)
            }
        }
    };

    // Guaranteed release: every exit path above funnels through here before
    // anything else observes the session end.
    drop(camera);
    info!(target: "session", "Live inspection stopped, camera resources released");

    Some(InternalSessionComplete {
        outcome: Ok(outcome),
        frames_seen,
        frames_processed,
    })
}

fn process_frame(
    model: &dyn DetectionModelTrait,
    policy: &SessionPolicy,
    frame: &DynamicImage,
    frame_index: u64,
    alerts: &Option<Recipient<SpeakAlert>>,
    display: &Option<Recipient<DisplayFrame>>,
    gate: &mut AlertGate,
) {
    let result: ComplianceResult = detect_ppe(model, frame, policy.conf_threshold);

    if let Some(display) = display {
        display.do_send(DisplayFrame {
            annotated_frame: result.annotated_frame.clone(),
            missing_items: result.missing_items.clone(),
            frame_index,
        });
    }

    if let Some(alerts) = alerts {
        if gate.try_fire(Instant::now()) {
            let text = if result.missing_items.is_empty() {
                CONFIG.alerts.compliance_message.clone()
            } else {
                violation_message(&result.missing_items)
            };
            alerts.do_send(SpeakAlert { text });
        }
    }
}

fn violation_message(missing_items: &[String]) -> String {
    let templates = &CONFIG.alerts.violation_messages;
    let template = if templates.is_empty() {
        "Warning! Missing safety equipment: {items}".to_string()
    } else {
        templates[rand::thread_rng().gen_range(0..templates.len())].clone()
    };
    template.replace("{items}", &missing_items.join(", "))
}
