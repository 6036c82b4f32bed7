//! Image encoding: `DynamicImage` → base64 JPEG/PNG wrapped in `ImageData`.
//!
//! VLM APIs (OpenAI, Anthropic, Gemini) accept images as base64 data-URIs
//! embedded in the JSON request body. Drill logs are mostly scans, so JPEG is
//! the default: the source is already lossy and the payload is several times
//! smaller than PNG for a 3000 px page. `detail: "high"` makes GPT-4-class
//! models tile the full image; without it the sample columns are unreadable.

use crate::config::ImageFormat;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page for the VLM API.
pub fn encode_page(img: &DynamicImage, format: ImageFormat) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    match format {
        // The JPEG encoder rejects an alpha channel; pdfium bitmaps carry one.
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8())
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)?,
        ImageFormat::Png => img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?,
    }

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded {:?} image → {} bytes base64", format, b64.len());

    Ok(ImageData::new(b64, format.mime_type()).with_detail("high"))
}
