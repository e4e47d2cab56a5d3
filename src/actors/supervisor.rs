use actix::prelude::*;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::error::SafetyGuardError;
use crate::messages::supervisor::{RegisterActor, SystemShutdown};
use crate::messages::{ActorFailed, ActorHealth, GetSystemHealth, HealthCheck, ShutdownSystem, SystemHealth};

/// SupervisorActor manages the health and lifecycle of other actors in the system
pub struct SupervisorActor {
    start_time: Instant,
    actor_health: HashMap<String, ActorHealth>,
    shutdown_requested: bool,
}

impl Default for SupervisorActor {
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            actor_health: HashMap::new(),
            shutdown_requested: false,
        }
    }
}

impl Actor for SupervisorActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("SupervisorActor started");

        // Schedule periodic health checks
        ctx.run_interval(Duration::from_secs(30), |actor, _ctx| {
            actor.perform_health_check();
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("SupervisorActor stopped. System will now terminate.");
    }
}

impl SupervisorActor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new actor for health monitoring
    pub fn register_actor(&mut self, name: String) {
        let health = ActorHealth {
            name: name.clone(),
            healthy: true,
            error_count: 0,
            last_error: None,
        };
        self.actor_health.insert(name.clone(), health);
        info!("Registered actor '{}' for monitoring", name);
    }

    /// Perform periodic health checks
    fn perform_health_check(&self) {
        let unhealthy_actors: Vec<_> = self
            .actor_health
            .iter()
            .filter(|(_, health)| !health.healthy)
            .map(|(name, _)| name)
            .collect();

        if !unhealthy_actors.is_empty() {
            warn!("Unhealthy actors detected: {:?}", unhealthy_actors);
        }
    }

    /// Check if the system is overall healthy
    fn is_system_healthy(&self) -> bool {
        !self.shutdown_requested && self.actor_health.values().all(|health| health.healthy)
    }
}

impl Handler<RegisterActor> for SupervisorActor {
    type Result = ();

    fn handle(&mut self, msg: RegisterActor, _ctx: &mut Self::Context) -> Self::Result {
        self.register_actor(msg.name);
    }
}

impl Handler<ActorFailed> for SupervisorActor {
    type Result = ();

    fn handle(&mut self, msg: ActorFailed, _ctx: &mut Self::Context) -> Self::Result {
        error!("Actor '{}' failed: {}", msg.actor_name, msg.error);

        if let Some(health) = self.actor_health.get_mut(&msg.actor_name) {
            health.healthy = false;
            health.error_count += 1;
            health.last_error = Some(msg.error.clone());
        }

        warn!("Actor '{}' marked as unhealthy", msg.actor_name);
    }
}

impl Handler<GetSystemHealth> for SupervisorActor {
    type Result = Result<SystemHealth, SafetyGuardError>;

    fn handle(&mut self, _msg: GetSystemHealth, _ctx: &mut Self::Context) -> Self::Result {
        let uptime_seconds = self.start_time.elapsed().as_secs();
        let overall_healthy = self.is_system_healthy();

        Ok(SystemHealth {
            overall_healthy,
            actor_statuses: self.actor_health.clone(),
            uptime_seconds,
        })
    }
}

impl Handler<ShutdownSystem> for SupervisorActor {
    type Result = Result<(), SafetyGuardError>;

    fn handle(&mut self, _msg: ShutdownSystem, ctx: &mut Self::Context) -> Self::Result {
        info!("System shutdown requested");
        self.shutdown_requested = true;

        // Stop the actor system
        ctx.stop();
        System::current().stop();

        Ok(())
    }
}

impl Handler<HealthCheck> for SupervisorActor {
    type Result = ();

    fn handle(&mut self, msg: HealthCheck, _ctx: &mut Self::Context) -> Self::Result {
        if let Some(health) = self.actor_health.get_mut(&msg.actor_name) {
            health.healthy = msg.healthy;
            if msg.healthy {
                health.last_error = None;
            }
        }
    }
}

impl Handler<SystemShutdown> for SupervisorActor {
    type Result = ();

    fn handle(&mut self, _msg: SystemShutdown, ctx: &mut Context<Self>) -> Self::Result {
        info!("SupervisorActor: Received SystemShutdown message. Initiating shutdown sequence.");

        // Schedule immediate shutdown
        info!("SupervisorActor: Stopping Actix system.");
        ctx.run_later(std::time::Duration::from_millis(100), |_actor, _ctx| {
            actix::System::current().stop();
        });

        // Also schedule a force shutdown as a backup in case graceful shutdown fails
        ctx.run_later(std::time::Duration::from_secs(5), |_actor, _ctx| {
            error!("SupervisorActor: Graceful shutdown timed out after 5 seconds. Force stopping system.");
            std::process::exit(1);
        });
    }
}
