extern crate ffmpeg_next as ffmpeg;

use ffmpeg::codec::context::Context as CodecContext;
use ffmpeg::format::{self, Pixel};
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{Context as ScalingContext, Flags};
use ffmpeg::util::frame::video::Video;
use image::{DynamicImage, RgbImage};
use tracing::info;

use crate::error::SafetyGuardError;

/// A camera or stream handle, exclusively owned by the inspection loop for
/// the lifetime of a session: it is acquired, read and released on the loop
/// thread and never crosses it. Dropping the source releases the underlying
/// resource.
pub trait FrameSource {
    /// Pull the next decoded frame. `Ok(None)` means the source ended
    /// (camera disconnected or stream exhausted) and is terminal.
    fn read_frame(&mut self) -> Result<Option<DynamicImage>, SafetyGuardError>;
}

/// FFmpeg-backed frame source: opens the device or stream URL, decodes the
/// best video stream and scales every frame to RGB24.
pub struct CameraSource {
    ictx: format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: ScalingContext,
    video_stream_index: usize,
}

impl CameraSource {
    pub fn open(url: &str) -> Result<Self, SafetyGuardError> {
        ffmpeg::init()?;
        ffmpeg::log::set_level(ffmpeg::log::Level::Quiet);

        let ictx = format::input(&url)?;
        let input_stream = ictx
            .streams()
            .best(Type::Video)
            .ok_or_else(|| SafetyGuardError::CameraError(format!("No video stream in {}", url)))?;
        let video_stream_index = input_stream.index();

        let decoder = CodecContext::from_parameters(input_stream.parameters())?
            .decoder()
            .video()?;

        let scaler = ScalingContext::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            Flags::BILINEAR,
        )?;

        info!(target: "session", "Opened camera {} ({}x{})", url, decoder.width(), decoder.height());

        Ok(Self {
            ictx,
            decoder,
            scaler,
            video_stream_index,
        })
    }

    fn frame_to_image(&self, rgb_frame: &Video) -> Result<DynamicImage, SafetyGuardError> {
        let width = rgb_frame.width();
        let height = rgb_frame.height();
        let stride = rgb_frame.stride(0);
        let data = rgb_frame.data(0);
        let row_len = width as usize * 3;

        // Rows carry alignment padding, copy them out without it.
        let mut pixels = Vec::with_capacity(row_len * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            pixels.extend_from_slice(&data[start..start + row_len]);
        }

        let buffer = RgbImage::from_raw(width, height, pixels).ok_or_else(|| {
            SafetyGuardError::CameraError("Decoded frame has inconsistent dimensions".to_string())
        })?;
        Ok(DynamicImage::ImageRgb8(buffer))
    }
}

impl FrameSource for CameraSource {
    fn read_frame(&mut self) -> Result<Option<DynamicImage>, SafetyGuardError> {
        loop {
            // Drain any frame the decoder already buffered before feeding it
            // another packet.
            let mut decoded = Video::empty();
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let mut rgb_frame = Video::empty();
                self.scaler.run(&decoded, &mut rgb_frame)?;
                return Ok(Some(self.frame_to_image(&rgb_frame)?));
            }

            let Some((stream, packet)) = self.ictx.packets().next() else {
                return Ok(None);
            };
            if stream.index() != self.video_stream_index {
                continue;
            }
            self.decoder.send_packet(&packet)?;
        }
    }
}
