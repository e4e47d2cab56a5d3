use actix::prelude::*;
use clap::{Parser, Subcommand};
use miette::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use safetyguard_service::actors::{AlertActor, DisplayActor, LiveSessionActor, SupervisorActor};
use safetyguard_service::config::CONFIG;
use safetyguard_service::error::SafetyGuardError;
use safetyguard_service::messages::supervisor::RegisterActor;
use safetyguard_service::messages::{
    FlushAlerts, GetSystemHealth, SpeakAlert, StartSession, StopSession,
};
use safetyguard_service::utils::detection_utils::{
    detect_ppe, DetectionModelTrait, HttpDetectionModel,
};
use safetyguard_service::utils::report::{ReportBuilder, ReportFormat};

#[derive(Parser)]
#[command(version, about = "AI-powered PPE compliance monitoring", name = "SafetyGuard Service")]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run live camera inspection until stopped
    Live {
        /// Camera device or stream URL (overrides the configured one)
        #[arg(long)]
        camera: Option<String>,
    },
    /// Inspect a single worker photo
    Image {
        /// Path to the image file
        path: String,
        /// Also generate a downloadable report (pdf or html)
        #[arg(long)]
        report: Option<String>,
    },
}

fn main() -> Result<()> {
    // Parse CLI args and set CONFIG_PATH before any config access
    let args = Args::parse();
    std::env::set_var("CONFIG_PATH", &args.config);

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "safetyguard_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting!");

    match args.command {
        Command::Live { camera } => run_live(camera),
        Command::Image { path, report } => run_image(path, report),
    }
}

/// Live camera inspection: wire the actor system and run until the session
/// ends or Ctrl+C.
fn run_live(camera: Option<String>) -> Result<()> {
    let system = System::new();

    system.block_on(async {
        // Start the supervisor
        let supervisor = SupervisorActor::new().start();

        // Start the alert and display actors
        let alert_actor = AlertActor::new().start();
        let display_actor = DisplayActor::new().start();

        // One model instance per process, shared by handle
        let model: Arc<dyn DetectionModelTrait> = Arc::new(HttpDetectionModel::from_config());

        let session_actor = LiveSessionActor::new(model)
            .with_alerts(alert_actor.clone().recipient())
            .with_display(
                display_actor.clone().recipient(),
                display_actor.clone().recipient(),
            )
            .with_supervisor(supervisor.clone())
            .shutdown_system_on_exit(true)
            .start();

        // Register all actors with supervisor for health monitoring
        supervisor.do_send(RegisterActor::new("LiveSessionActor"));
        supervisor.do_send(RegisterActor::new("AlertActor"));
        supervisor.do_send(RegisterActor::new("DisplayActor"));

        info!("Actor system started");

        // Verify system health
        if let Ok(health) = supervisor.send(GetSystemHealth).await {
            match health {
                Ok(h) if h.overall_healthy => info!("System health check passed"),
                Ok(_) => {
                    error!("System health check failed");
                    System::current().stop();
                    return;
                }
                Err(e) => {
                    error!("Failed to get system health: {}", e);
                    System::current().stop();
                    return;
                }
            }
        }

        let camera_url = camera.unwrap_or_else(|| CONFIG.session.camera_url.clone());
        info!("Starting live inspection on {}", camera_url);
        match session_actor.send(StartSession { camera_url }).await {
            Ok(Ok(())) => info!("Live inspection started"),
            Ok(Err(e)) => {
                error!("Failed to start live inspection: {}", e);
                System::current().stop();
                return;
            }
            Err(e) => {
                error!("Failed to send start message: {}", e);
                System::current().stop();
                return;
            }
        }

        info!("The session will shut down on camera loss, failure or Ctrl+C.");

        // Ctrl+C requests a stop; the session finishes its in-flight frame,
        // releases the camera and then asks the supervisor to shut down.
        let session_for_signal = session_actor.clone();
        actix::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C signal, stopping live inspection...");
                    session_for_signal.do_send(StopSession);
                }
                Err(err) => {
                    error!("Unable to listen for shutdown signal: {}", err);
                    System::current().stop();
                }
            }
        });
    });

    // Run the system - this will block until System::current().stop() is called
    if let Err(e) = system.run() {
        error!("System run failed: {}", e);
        return Err(miette::miette!("System run failed: {}", e));
    }

    info!("Application shutdown complete.");
    Ok(())
}

/// One-shot still-image inspection with optional report generation.
fn run_image(path: String, report: Option<String>) -> Result<()> {
    let report_format = match report.as_deref() {
        Some(raw) => Some(raw.parse::<ReportFormat>()?),
        None => None,
    };

    let system = System::new();
    let outcome: std::result::Result<(), SafetyGuardError> = system.block_on(async move {
        let alert_actor = AlertActor::new().start();

        info!("Inspecting {}", path);
        let detection = tokio::task::spawn_blocking(move || {
            let model = HttpDetectionModel::from_config();
            // Loading failures propagate: this is an explicit user action
            let frame = image::open(&path)?;
            Ok::<_, SafetyGuardError>(detect_ppe(
                &model,
                &frame,
                CONFIG.detection.confidence_threshold,
            ))
        })
        .await
        .map_err(|err| SafetyGuardError::Other(format!("Inspection task failed: {}", err)))??;

        // Persist the annotated frame next to the live display output
        std::fs::create_dir_all(&CONFIG.output.folder)?;
        let annotated_path = Path::new(&CONFIG.output.folder).join("inspection.png");
        detection.annotated_frame.save(&annotated_path)?;
        info!("Annotated image saved to {}", annotated_path.display());

        if detection.missing_items.is_empty() {
            info!("Full PPE compliance, all required equipment detected");
            alert_actor.do_send(SpeakAlert {
                text: "All safety equipment detected. Good compliance.".to_string(),
            });
        } else {
            warn!(
                "Safety violation detected, missing: {}",
                detection.missing_items.join(", ")
            );
            alert_actor.do_send(SpeakAlert {
                text: format!(
                    "Safety alert! Missing equipment: {}",
                    detection.missing_items.join(", ")
                ),
            });
        }

        if let Some(format) = report_format {
            let builder = ReportBuilder::new()?;
            let (report_path, media_type) = builder.generate(
                &detection.annotated_frame,
                &detection.missing_items,
                &detection.item_counts,
                format,
            )?;
            let delivered = format!(
                "PPE_Report_{}.{}",
                chrono::Local::now().format("%Y%m%d_%H%M%S"),
                format.extension()
            );
            std::fs::copy(&report_path, &delivered)?;
            info!("Report ({}) saved to {}", media_type, delivered);
            // The transient report file goes away with the builder
        }

        // Let queued audio finish before tearing the system down
        if let Ok(flushed) = alert_actor.send(FlushAlerts).await {
            flushed?;
        }
        Ok(())
    });

    outcome?;
    info!("Inspection complete.");
    Ok(())
}
