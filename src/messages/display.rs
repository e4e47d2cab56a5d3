use actix::prelude::*;
use image::DynamicImage;

/// Messages for DisplayActor

/// One processed frame for the surrounding UI: the annotated image plus the
/// missing-items verdict. Alert text never travels this way.
#[derive(Message)]
#[rtype(result = "()")]
pub struct DisplayFrame {
    pub annotated_frame: DynamicImage,
    pub missing_items: Vec<String>,
    pub frame_index: u64,
}

/// Clear whatever the display currently shows (session cleanup).
#[derive(Message)]
#[rtype(result = "()")]
pub struct ClearDisplay;
