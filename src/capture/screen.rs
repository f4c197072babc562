use std::io::Cursor;

use anyhow::{Context, Result};
use image::{imageops::FilterType, DynamicImage, ImageFormat, RgbaImage};

use super::decode::{encode_data_uri, ImageMime, ScreenCapture};

/// Captures taller than this are downscaled before encoding.
pub const MAX_CAPTURE_HEIGHT: u32 = 1080;

/// Shrinks `image` to `max_height`, preserving aspect ratio.
pub fn downscale(image: RgbaImage, max_height: u32) -> RgbaImage {
    let (width, height) = image.dimensions();
    if height <= max_height {
        return image;
    }

    let aspect_ratio = width as f32 / height as f32;
    let new_width = ((max_height as f32 * aspect_ratio).round() as u32).max(1);
    log::debug!("resizing capture from {width}x{height} to {new_width}x{max_height}");
    image::imageops::resize(&image, new_width, max_height, FilterType::Triangle)
}

/// Encodes a raw frame into the payload shape the capture manager consumes.
pub fn encode_frame(image: RgbaImage) -> Result<ScreenCapture> {
    let image = downscale(image, MAX_CAPTURE_HEIGHT);
    let (width, height) = image.dimensions();

    let mut png_data = Vec::new();
    DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut png_data), ImageFormat::Png)
        .context("failed to encode capture as PNG")?;

    Ok(ScreenCapture {
        data: encode_data_uri(ImageMime::Png, &png_data),
        width,
        height,
    })
}

#[cfg(feature = "desktop")]
pub use native::ScreenCaptureProvider;

#[cfg(feature = "desktop")]
mod native {
    use anyhow::{anyhow, Context, Result};
    use async_trait::async_trait;
    use image::RgbaImage;
    use xcap::Monitor;

    use super::encode_frame;
    use crate::capture::decode::ScreenCapture;
    use crate::capture::manager::CaptureProvider;

    /// Captures the monitor containing the origin.
    pub struct ScreenCaptureProvider;

    fn grab_primary_monitor() -> Result<RgbaImage> {
        let monitor =
            Monitor::from_point(0, 0).map_err(|err| anyhow!("failed to get monitor: {err}"))?;
        let captured = monitor
            .capture_image()
            .map_err(|err| anyhow!("failed to capture image: {err}"))?;

        let (width, height) = (captured.width(), captured.height());
        RgbaImage::from_raw(width, height, captured.into_raw())
            .ok_or_else(|| anyhow!("capture buffer does not match {width}x{height}"))
    }

    #[async_trait]
    impl CaptureProvider for ScreenCaptureProvider {
        async fn capture_screen(&self) -> Result<ScreenCapture> {
            tokio::task::spawn_blocking(|| {
                let frame = grab_primary_monitor()?;
                log::debug!("screen captured: {}x{}", frame.width(), frame.height());
                encode_frame(frame)
            })
            .await
            .context("screen capture worker join failed")?
        }
    }
}
