use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actix::prelude::*;
use image::DynamicImage;

use safetyguard_service::actors::{FrameSourceFactory, LiveSessionActor, SessionPolicy};
use safetyguard_service::error::SafetyGuardError;
use safetyguard_service::messages::{
    ClearDisplay, DisplayFrame, GetSessionStatus, SessionOutcome, SessionState, SessionStatus,
    SpeakAlert, StartSession, StopSession,
};
use safetyguard_service::utils::camera::FrameSource;
use safetyguard_service::utils::detection_utils::{Detection, DetectionModelTrait, REQUIRED_PPE};

// Common test setup
fn init_test_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new("debug"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

fn create_test_frame() -> DynamicImage {
    image::DynamicImage::new_rgb8(64, 48)
}

// =============================================================================
// Test doubles
// =============================================================================

enum CameraStep {
    Frame,
    Eof,
    Fail,
}

/// Frame source that plays back a fixed script and counts its releases.
struct ScriptedCamera {
    steps: VecDeque<CameraStep>,
    endless: bool,
    released: Arc<AtomicU32>,
}

impl ScriptedCamera {
    fn new(steps: Vec<CameraStep>, released: Arc<AtomicU32>) -> Self {
        Self {
            steps: steps.into(),
            endless: false,
            released,
        }
    }

    fn endless(released: Arc<AtomicU32>) -> Self {
        Self {
            steps: VecDeque::new(),
            endless: true,
            released,
        }
    }
}

impl FrameSource for ScriptedCamera {
    fn read_frame(&mut self) -> Result<Option<DynamicImage>, SafetyGuardError> {
        if self.endless {
            std::thread::sleep(Duration::from_millis(2));
            return Ok(Some(create_test_frame()));
        }
        match self.steps.pop_front() {
            Some(CameraStep::Frame) => Ok(Some(create_test_frame())),
            Some(CameraStep::Eof) | None => Ok(None),
            Some(CameraStep::Fail) => Err(SafetyGuardError::CameraError(
                "simulated read failure".to_string(),
            )),
        }
    }
}

impl Drop for ScriptedCamera {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

fn single_use_factory(camera: ScriptedCamera) -> FrameSourceFactory {
    let slot = Mutex::new(Some(camera));
    Arc::new(move |_url: &str| {
        slot.lock()
            .unwrap()
            .take()
            .map(|camera| Box::new(camera) as Box<dyn FrameSource>)
            .ok_or_else(|| SafetyGuardError::CameraError("camera already taken".to_string()))
    })
}

fn failing_factory() -> FrameSourceFactory {
    Arc::new(|_url: &str| {
        Err(SafetyGuardError::CameraError(
            "Failed to access camera".to_string(),
        ))
    })
}

/// Deterministic model double; optionally panics to simulate a corrupt frame.
struct StubModel {
    detections: Vec<Detection>,
    panics: bool,
}

impl StubModel {
    fn empty() -> Self {
        Self {
            detections: Vec::new(),
            panics: false,
        }
    }

    fn with_detections(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            panics: false,
        }
    }

    fn panicking() -> Self {
        Self {
            detections: Vec::new(),
            panics: true,
        }
    }
}

impl DetectionModelTrait for StubModel {
    fn predict(
        &self,
        _frame: &DynamicImage,
        _conf_threshold: f32,
    ) -> Result<Vec<Detection>, SafetyGuardError> {
        if self.panics {
            panic!("model exploded");
        }
        Ok(self.detections.clone())
    }

    fn class_name(&self, class_id: u8) -> Option<&str> {
        REQUIRED_PPE.get(class_id as usize).copied()
    }
}

fn detection(cls: u8) -> Detection {
    Detection {
        r#box: [10, 10, 50, 50],
        cls,
        cls_name: REQUIRED_PPE[cls as usize].to_string(),
        conf: 85,
    }
}

fn full_ppe_detections() -> Vec<Detection> {
    (0u8..4).map(detection).collect()
}

/// Records every alert the session submits.
#[derive(Default)]
struct CollectingAlertActor {
    texts: Arc<Mutex<Vec<String>>>,
}

impl Actor for CollectingAlertActor {
    type Context = Context<Self>;
}

impl Handler<SpeakAlert> for CollectingAlertActor {
    type Result = ();

    fn handle(&mut self, msg: SpeakAlert, _ctx: &mut Self::Context) -> Self::Result {
        self.texts.lock().unwrap().push(msg.text);
    }
}

/// Records rendered frames and display clears.
#[derive(Default)]
struct CollectingDisplayActor {
    frames: Arc<Mutex<Vec<u64>>>,
    cleared: Arc<AtomicU32>,
}

impl Actor for CollectingDisplayActor {
    type Context = Context<Self>;
}

impl Handler<DisplayFrame> for CollectingDisplayActor {
    type Result = ();

    fn handle(&mut self, msg: DisplayFrame, _ctx: &mut Self::Context) -> Self::Result {
        self.frames.lock().unwrap().push(msg.frame_index);
    }
}

impl Handler<ClearDisplay> for CollectingDisplayActor {
    type Result = ();

    fn handle(&mut self, _msg: ClearDisplay, _ctx: &mut Self::Context) -> Self::Result {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Harness
// =============================================================================

struct SessionHarness {
    session: Addr<LiveSessionActor>,
    alerts: Arc<Mutex<Vec<String>>>,
    display_frames: Arc<Mutex<Vec<u64>>>,
    display_cleared: Arc<AtomicU32>,
    released: Arc<AtomicU32>,
}

fn test_policy(frame_skip: u64, cooldown: Duration) -> SessionPolicy {
    SessionPolicy {
        conf_threshold: 0.5,
        frame_skip,
        alert_cooldown: cooldown,
        audio_alerts: true,
    }
}

fn start_harness(
    model: StubModel,
    factory: FrameSourceFactory,
    policy: SessionPolicy,
    released: Arc<AtomicU32>,
) -> SessionHarness {
    init_test_tracing();

    let alert_actor = CollectingAlertActor::default();
    let alerts = alert_actor.texts.clone();
    let alert_addr = alert_actor.start();

    let display_actor = CollectingDisplayActor::default();
    let display_frames = display_actor.frames.clone();
    let display_cleared = display_actor.cleared.clone();
    let display_addr = display_actor.start();

    let session = LiveSessionActor::new(Arc::new(model))
        .with_policy(policy)
        .with_source_factory(factory)
        .with_alerts(alert_addr.recipient())
        .with_display(
            display_addr.clone().recipient(),
            display_addr.recipient(),
        )
        .start();

    SessionHarness {
        session,
        alerts,
        display_frames,
        display_cleared,
        released,
    }
}

async fn wait_for_completion(session: &Addr<LiveSessionActor>) -> SessionStatus {
    for _ in 0..500 {
        let status = session.send(GetSessionStatus).await.unwrap().unwrap();
        if status.state == SessionState::Idle && status.last_outcome.is_some() {
            // Give the cleanup-tail messages a moment to land
            tokio::time::sleep(Duration::from_millis(50)).await;
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session did not return to idle in time");
}

// =============================================================================
// Scenarios
// =============================================================================

#[actix::test]
async fn camera_disconnect_ends_the_session_and_releases_the_camera_once() {
    let released = Arc::new(AtomicU32::new(0));
    let camera = ScriptedCamera::new(
        vec![
            CameraStep::Frame,
            CameraStep::Frame,
            CameraStep::Frame,
            CameraStep::Frame,
            CameraStep::Frame,
            CameraStep::Eof,
        ],
        released.clone(),
    );
    let harness = start_harness(
        StubModel::empty(),
        single_use_factory(camera),
        test_policy(1, Duration::from_secs(60)),
        released,
    );

    let started = harness
        .session
        .send(StartSession {
            camera_url: "test://camera".to_string(),
        })
        .await
        .unwrap();
    assert!(started.is_ok());

    let status = wait_for_completion(&harness.session).await;
    assert_eq!(status.last_outcome, Some(SessionOutcome::CameraDisconnected));
    assert_eq!(status.frames_seen, 5);
    assert_eq!(status.frames_processed, 5);

    // Guaranteed-release contract: exactly one release, then a display clear
    assert_eq!(harness.released.load(Ordering::SeqCst), 1);
    assert_eq!(harness.display_frames.lock().unwrap().len(), 5);
    assert_eq!(harness.display_cleared.load(Ordering::SeqCst), 1);

    // Five violation frames within one cooldown window produce a single alert
    let alerts = harness.alerts.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].contains("helmet, vest, gloves, boots"));
}

#[actix::test]
async fn frame_skip_drops_frames_between_inferences() {
    let released = Arc::new(AtomicU32::new(0));
    let mut steps: Vec<CameraStep> = (0..6).map(|_| CameraStep::Frame).collect();
    steps.push(CameraStep::Eof);
    let camera = ScriptedCamera::new(steps, released.clone());
    let harness = start_harness(
        StubModel::empty(),
        single_use_factory(camera),
        test_policy(3, Duration::from_secs(60)),
        released,
    );

    harness
        .session
        .send(StartSession {
            camera_url: "test://camera".to_string(),
        })
        .await
        .unwrap()
        .unwrap();

    let status = wait_for_completion(&harness.session).await;
    assert_eq!(status.frames_seen, 6);
    // Every 3rd frame is kept
    assert_eq!(status.frames_processed, 2);
    assert_eq!(harness.display_frames.lock().unwrap().as_slice(), &[3, 6]);
}

#[actix::test]
async fn stop_request_ends_an_endless_session_cleanly() {
    let released = Arc::new(AtomicU32::new(0));
    let camera = ScriptedCamera::endless(released.clone());
    let harness = start_harness(
        StubModel::empty(),
        single_use_factory(camera),
        test_policy(3, Duration::from_secs(60)),
        released,
    );

    harness
        .session
        .send(StartSession {
            camera_url: "test://camera".to_string(),
        })
        .await
        .unwrap()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.session.send(StopSession).await.unwrap().unwrap();

    let status = wait_for_completion(&harness.session).await;
    assert_eq!(status.last_outcome, Some(SessionOutcome::Stopped));
    assert_eq!(harness.released.load(Ordering::SeqCst), 1);
}

#[actix::test]
async fn camera_open_failure_keeps_the_session_idle() {
    let released = Arc::new(AtomicU32::new(0));
    let harness = start_harness(
        StubModel::empty(),
        failing_factory(),
        test_policy(1, Duration::from_secs(60)),
        released,
    );

    let started = harness
        .session
        .send(StartSession {
            camera_url: "test://camera".to_string(),
        })
        .await
        .unwrap();
    assert!(started.is_err());

    let status = harness
        .session
        .send(GetSessionStatus)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.state, SessionState::Idle);
    assert_eq!(status.last_outcome, None);

    // No camera was ever acquired and no alert was ever touched
    assert_eq!(harness.released.load(Ordering::SeqCst), 0);
    assert!(harness.alerts.lock().unwrap().is_empty());
    assert!(harness.display_frames.lock().unwrap().is_empty());
}

#[actix::test]
async fn camera_read_failure_is_terminal_but_still_cleans_up() {
    let released = Arc::new(AtomicU32::new(0));
    let camera = ScriptedCamera::new(
        vec![CameraStep::Frame, CameraStep::Fail],
        released.clone(),
    );
    let harness = start_harness(
        StubModel::empty(),
        single_use_factory(camera),
        test_policy(1, Duration::from_secs(60)),
        released,
    );

    harness
        .session
        .send(StartSession {
            camera_url: "test://camera".to_string(),
        })
        .await
        .unwrap()
        .unwrap();

    let status = wait_for_completion(&harness.session).await;
    assert_eq!(status.last_outcome, Some(SessionOutcome::CameraError));
    assert_eq!(status.frames_seen, 1);
    assert_eq!(harness.released.load(Ordering::SeqCst), 1);
}

#[actix::test]
async fn a_panicking_model_does_not_end_the_session() {
    let released = Arc::new(AtomicU32::new(0));
    let camera = ScriptedCamera::new(
        vec![
            CameraStep::Frame,
            CameraStep::Frame,
            CameraStep::Frame,
            CameraStep::Eof,
        ],
        released.clone(),
    );
    let harness = start_harness(
        StubModel::panicking(),
        single_use_factory(camera),
        test_policy(1, Duration::from_secs(60)),
        released,
    );

    harness
        .session
        .send(StartSession {
            camera_url: "test://camera".to_string(),
        })
        .await
        .unwrap()
        .unwrap();

    let status = wait_for_completion(&harness.session).await;
    // The session survived every per-frame panic and ended on camera EOF,
    // with the camera still released exactly once
    assert_eq!(status.last_outcome, Some(SessionOutcome::CameraDisconnected));
    assert_eq!(status.frames_seen, 3);
    assert_eq!(status.frames_processed, 0);
    assert_eq!(harness.released.load(Ordering::SeqCst), 1);
    assert!(harness.alerts.lock().unwrap().is_empty());
}

#[actix::test]
async fn fully_equipped_worker_triggers_a_compliance_confirmation() {
    let released = Arc::new(AtomicU32::new(0));
    let camera = ScriptedCamera::new(
        vec![CameraStep::Frame, CameraStep::Frame, CameraStep::Eof],
        released.clone(),
    );
    let harness = start_harness(
        StubModel::with_detections(full_ppe_detections()),
        single_use_factory(camera),
        test_policy(1, Duration::from_secs(60)),
        released,
    );

    harness
        .session
        .send(StartSession {
            camera_url: "test://camera".to_string(),
        })
        .await
        .unwrap()
        .unwrap();

    wait_for_completion(&harness.session).await;

    let alerts = harness.alerts.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].contains("All safety equipment"));
}

#[actix::test]
async fn missing_helmet_is_called_out_in_the_alert() {
    let released = Arc::new(AtomicU32::new(0));
    let camera = ScriptedCamera::new(vec![CameraStep::Frame, CameraStep::Eof], released.clone());
    // vest, gloves and boots detected; helmet missing
    let harness = start_harness(
        StubModel::with_detections(vec![detection(1), detection(2), detection(3)]),
        single_use_factory(camera),
        test_policy(1, Duration::from_secs(60)),
        released,
    );

    harness
        .session
        .send(StartSession {
            camera_url: "test://camera".to_string(),
        })
        .await
        .unwrap()
        .unwrap();

    wait_for_completion(&harness.session).await;

    let alerts = harness.alerts.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].contains("helmet"));
    assert!(!alerts[0].contains("vest"));
}

#[actix::test]
async fn a_second_start_while_running_is_rejected() {
    let released = Arc::new(AtomicU32::new(0));
    let camera = ScriptedCamera::endless(released.clone());
    let harness = start_harness(
        StubModel::empty(),
        single_use_factory(camera),
        test_policy(3, Duration::from_secs(60)),
        released,
    );

    harness
        .session
        .send(StartSession {
            camera_url: "test://camera".to_string(),
        })
        .await
        .unwrap()
        .unwrap();

    let second = harness
        .session
        .send(StartSession {
            camera_url: "test://camera".to_string(),
        })
        .await
        .unwrap();
    assert!(second.is_err());

    harness.session.send(StopSession).await.unwrap().unwrap();
    wait_for_completion(&harness.session).await;
}
