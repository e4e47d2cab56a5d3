use ab_glyph::{FontVec, PxScale};
use image::DynamicImage;
use tracing::warn;

use crate::config::CONFIG;
use crate::error::SafetyGuardError;
use crate::utils::detection_utils::Detection;

/// Burn detection boxes and labels into the frame.
///
/// Labels need the font configured at `output.font_path`; when it is missing
/// or invalid the boxes are still drawn and the labels are skipped.
pub fn draw_detections(
    image: DynamicImage,
    detections: &[(Detection, String)],
) -> Result<DynamicImage, SafetyGuardError> {
    let mut image = image;
    let font = load_label_font();

    for (detection, label) in detections {
        let [x1, y1, x2, y2] = detection.r#box;
        let box_x = x1.min(image.width().saturating_sub(1));
        let box_y = y1.min(image.height().saturating_sub(1));
        let box_width = x2.saturating_sub(box_x).clamp(1, image.width() - box_x);
        let box_height = y2.saturating_sub(box_y).clamp(1, image.height() - box_y);

        for i in 0..CONFIG.output.line_thickness {
            if 2 * i >= box_width || 2 * i >= box_height {
                break;
            }
            imageproc::drawing::draw_hollow_rect_mut(
                &mut image,
                imageproc::rect::Rect::at(box_x as i32 + i as i32, box_y as i32 + i as i32)
                    .of_size(box_width - 2 * i, box_height - 2 * i),
                image::Rgba(CONFIG.output.line_color),
            );
        }

        if let Some(font) = &font {
            draw_label(
                &mut image,
                font,
                &format!("{} ({}%)", label, detection.conf),
                box_x,
                box_y,
                box_width,
                box_height,
            );
        }
    }

    Ok(image)
}

fn draw_label(
    image: &mut DynamicImage,
    font: &FontVec,
    label: &str,
    box_x: u32,
    box_y: u32,
    box_width: u32,
    box_height: u32,
) {
    let scale: PxScale = PxScale { x: 25.0, y: 25.0 };
    let text_size = imageproc::drawing::text_size(scale, font, label);
    let padding_x = 10;
    let padding_y = 5;

    let text_width = text_size.0 + 2 * padding_x;
    let text_height = text_size.1 + 2 * padding_y;

    let text_x = if box_width > text_size.0 + padding_x {
        box_x + box_width - text_size.0 - padding_x
    } else {
        box_x
    };
    let banner_x = if box_width > text_width {
        box_x + box_width - text_width
    } else {
        box_x
    };

    if text_height < box_y {
        // Banner above the box
        imageproc::drawing::draw_filled_rect_mut(
            &mut *image,
            imageproc::rect::Rect::at(banner_x as i32, (box_y - text_height) as i32)
                .of_size(text_width, text_height),
            image::Rgba(CONFIG.output.line_color),
        );
        imageproc::drawing::draw_text_mut(
            &mut *image,
            image::Rgba(CONFIG.output.text_color),
            text_x as i32,
            (box_y - text_height + padding_y) as i32,
            scale,
            font,
            label,
        );
    } else {
        // Detection too close to the top, banner below the box instead
        let text_y = box_y + box_height;
        if text_y + text_height <= image.height() {
            imageproc::drawing::draw_filled_rect_mut(
                &mut *image,
                imageproc::rect::Rect::at(banner_x as i32, text_y as i32)
                    .of_size(text_width, text_height),
                image::Rgba(CONFIG.output.line_color),
            );
            imageproc::drawing::draw_text_mut(
                &mut *image,
                image::Rgba(CONFIG.output.text_color),
                text_x as i32,
                (text_y + padding_y) as i32,
                scale,
                font,
                label,
            );
        }
    }
}

fn load_label_font() -> Option<FontVec> {
    let path = &CONFIG.output.font_path;
    match std::fs::read(path) {
        Ok(bytes) => match FontVec::try_from_vec(bytes) {
            Ok(font) => Some(font),
            Err(err) => {
                warn!("Invalid label font {}: {}. Drawing boxes only", path, err);
                None
            }
        },
        Err(err) => {
            warn!("Label font {} unavailable: {}. Drawing boxes only", path, err);
            None
        }
    }
}
