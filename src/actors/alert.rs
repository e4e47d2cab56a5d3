use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;

use actix::prelude::*;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::config::CONFIG;
use crate::error::SafetyGuardError;
use crate::messages::{FlushAlerts, SpeakAlert};
use crate::utils::speech::SpeechService;

enum AlertJob {
    Speak(String),
    Flush(oneshot::Sender<()>),
}

/// AlertActor owns the audio alert queue.
///
/// Producers submit `SpeakAlert` and return immediately; a single blocking
/// worker drains the queue with a blocking receive and plays one message at a
/// time, so alerts come out in strict submission order with no overlapping
/// audio. A message that fails to play is logged and dropped without
/// disturbing the worker or later messages.
pub struct AlertActor {
    speech_service: Arc<SpeechService>,
    enabled: bool,
    queue: Option<Sender<AlertJob>>,
}

impl AlertActor {
    pub fn new() -> Self {
        Self::with_service(SpeechService::from_config(), CONFIG.alerts.enabled)
    }

    pub fn with_service(speech_service: SpeechService, enabled: bool) -> Self {
        Self {
            speech_service: Arc::new(speech_service),
            enabled,
            queue: None,
        }
    }
}

impl Default for AlertActor {
    fn default() -> Self {
        Self::new()
    }
}

impl Actor for AlertActor {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        info!("AlertActor started");

        if !self.enabled {
            info!("Audio alerts disabled, alert worker not started");
            return;
        }

        let (tx, rx) = channel::<AlertJob>();
        self.queue = Some(tx);

        // The worker detaches; it exits on its own once the queue sender is
        // dropped and the remaining jobs have drained.
        let speech_service = self.speech_service.clone();
        let _worker = tokio::task::spawn_blocking(move || {
            while let Ok(job) = rx.recv() {
                match job {
                    AlertJob::Speak(message) => {
                        if let Err(err) = speech_service.speak(&message) {
                            error!("Could not play alert \"{}\": {}", message, err);
                        }
                    }
                    AlertJob::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("Alert queue closed, worker exiting");
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("AlertActor stopped");
        // Dropping the sender lets the worker drain what is queued and exit.
        self.queue = None;
    }
}

impl Handler<SpeakAlert> for AlertActor {
    type Result = ();

    fn handle(&mut self, msg: SpeakAlert, _ctx: &mut Self::Context) -> Self::Result {
        let Some(queue) = &self.queue else {
            debug!("Audio alerts disabled, dropping alert: {}", msg.text);
            return;
        };

        // Unbounded queue: enqueueing never blocks the frame pipeline.
        if queue.send(AlertJob::Speak(msg.text)).is_err() {
            warn!("Alert worker is gone, dropping alert");
        }
    }
}

impl Handler<FlushAlerts> for AlertActor {
    type Result = ResponseFuture<Result<(), SafetyGuardError>>;

    fn handle(&mut self, _msg: FlushAlerts, _ctx: &mut Self::Context) -> Self::Result {
        let Some(queue) = &self.queue else {
            return Box::pin(async { Ok(()) });
        };

        let (tx, rx) = oneshot::channel();
        let enqueued = queue.send(AlertJob::Flush(tx)).is_ok();

        Box::pin(async move {
            if !enqueued {
                return Ok(());
            }
            rx.await.map_err(|_| {
                SafetyGuardError::Other("Alert worker dropped the flush signal".to_string())
            })
        })
    }
}
