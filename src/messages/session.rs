use actix::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::SafetyGuardError;

/// Messages for LiveSessionActor

#[derive(Message)]
#[rtype(result = "Result<(), crate::error::SafetyGuardError>")]
pub struct StartSession {
    pub camera_url: String,
}

/// Request a stop; it takes effect at the next loop iteration boundary, never
/// mid-frame, and the session performs its cleanup before going back to idle.
#[derive(Message)]
#[rtype(result = "Result<(), crate::error::SafetyGuardError>")]
pub struct StopSession;

#[derive(Message)]
#[rtype(result = "Result<SessionStatus, crate::error::SafetyGuardError>")]
pub struct GetSessionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Running,
    Stopping,
}

/// Why the previous session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionOutcome {
    Stopped,
    CameraDisconnected,
    CameraError,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub frames_seen: u64,
    pub frames_processed: u64,
    pub last_outcome: Option<SessionOutcome>,
}

/// Sent from the inspection loop task back to the LiveSessionActor once the
/// loop has ended and the camera has been released.
#[derive(Message)]
#[rtype(result = "()")]
pub struct InternalSessionComplete {
    pub outcome: Result<SessionOutcome, SafetyGuardError>,
    pub frames_seen: u64,
    pub frames_processed: u64,
}
