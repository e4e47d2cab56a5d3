use actix::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Messages for SupervisorActor and system management

#[derive(Message)]
#[rtype(result = "()")]
pub struct ActorFailed {
    pub actor_name: String,
    pub error: String,
}

#[derive(Message)]
#[rtype(result = "Result<SystemHealth, crate::error::SafetyGuardError>")]
pub struct GetSystemHealth;

#[derive(Message)]
#[rtype(result = "Result<(), crate::error::SafetyGuardError>")]
pub struct ShutdownSystem;

#[derive(Message)]
#[rtype(result = "()")]
pub struct HealthCheck {
    pub actor_name: String,
    pub healthy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub overall_healthy: bool,
    pub actor_statuses: HashMap<String, ActorHealth>,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorHealth {
    pub name: String,
    pub healthy: bool,
    pub error_count: u32,
    pub last_error: Option<String>,
}
