//! Content type detection and image previews.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;
use std::path::Path;

const FALLBACK_MIME: &str = "application/octet-stream";

/// Content types that get a preview.
const PREVIEWABLE: [&str; 4] = ["image/png", "image/jpeg", "image/gif", "image/webp"];

fn mime_from_extension(name: &str) -> Option<&'static str> {
    let extension = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    Some(match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => return None,
    })
}

/// Guesses the content type from the filename extension, falling back to the
/// payload's magic bytes and finally to `application/octet-stream`.
pub fn detect_mime(name: &str, data: &[u8]) -> String {
    mime_from_extension(name)
        .or_else(|| infer::get(data).map(|kind| kind.mime_type()))
        .unwrap_or(FALLBACK_MIME)
        .to_string()
}

pub fn is_previewable(mime: &str) -> bool {
    PREVIEWABLE.contains(&mime)
}

/// Decodes an image and re-encodes it as a JPEG whose longest edge is at
/// most `max_dimension`. Smaller images keep their size.
pub fn render_preview(data: &[u8], max_dimension: u32) -> Result<Vec<u8>> {
    let image = image::load_from_memory(data).or_raise(|| ErrorKind::Preview)?;
    let (width, height) = image.dimensions();
    let image = match width.max(height) > max_dimension {
        true => image.thumbnail(max_dimension, max_dimension),
        false => image,
    };
    // JPEG has no alpha channel.
    let image = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut encoded = Cursor::new(Vec::new());
    image.write_to(&mut encoded, ImageFormat::Jpeg).or_raise(|| ErrorKind::Preview)?;
    Ok(encoded.into_inner())
}
