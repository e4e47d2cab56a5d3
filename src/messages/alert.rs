use actix::prelude::*;

/// Messages for AlertActor

/// Submit one audio alert. Enqueueing never blocks; playback happens later,
/// in submission order.
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct SpeakAlert {
    pub text: String,
}

/// Resolves once every alert enqueued before it has been attempted.
#[derive(Message)]
#[rtype(result = "Result<(), crate::error::SafetyGuardError>")]
pub struct FlushAlerts;
