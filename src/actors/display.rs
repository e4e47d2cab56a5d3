use std::fs;
use std::path::{Path, PathBuf};

use actix::prelude::*;
use tracing::{debug, info, warn};

use crate::config::CONFIG;
use crate::messages::{ClearDisplay, DisplayFrame};

/// DisplayActor publishes the latest annotated frame for the surrounding UI
/// to render, and wipes it when a session cleans up.
pub struct DisplayActor {
    display_path: PathBuf,
}

impl DisplayActor {
    pub fn new() -> Self {
        Self::with_path(Path::new(&CONFIG.output.folder).join(&CONFIG.output.display_filename))
    }

    pub fn with_path(display_path: PathBuf) -> Self {
        Self { display_path }
    }
}

impl Default for DisplayActor {
    fn default() -> Self {
        Self::new()
    }
}

impl Actor for DisplayActor {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        info!("DisplayActor started");
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("DisplayActor stopped");
    }
}

impl Handler<DisplayFrame> for DisplayActor {
    type Result = ();

    fn handle(&mut self, msg: DisplayFrame, _ctx: &mut Self::Context) -> Self::Result {
        if let Some(parent) = self.display_path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!("Could not create display folder {}: {}", parent.display(), err);
                return;
            }
        }

        match msg.annotated_frame.save(&self.display_path) {
            Ok(()) => debug!(
                "Rendered frame {} to {} ({} items missing)",
                msg.frame_index,
                self.display_path.display(),
                msg.missing_items.len()
            ),
            Err(err) => warn!("Could not render frame {}: {}", msg.frame_index, err),
        }

        if !msg.missing_items.is_empty() {
            info!(
                "Safety violation on frame {}: missing {}",
                msg.frame_index,
                msg.missing_items.join(", ")
            );
        }
    }
}

impl Handler<ClearDisplay> for DisplayActor {
    type Result = ();

    fn handle(&mut self, _msg: ClearDisplay, _ctx: &mut Self::Context) -> Self::Result {
        // Best-effort: the file may never have been written.
        let _ = fs::remove_file(&self.display_path);
        debug!("Display cleared");
    }
}
