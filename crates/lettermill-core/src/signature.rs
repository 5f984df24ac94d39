//! Signature image cleanup and filename-based lookup.
//!
//! Uploaded signatures arrive as photos or scans with off-white paper
//! backgrounds, alpha channels, and generous margins. Cleanup normalizes
//! them into a tight, white-background PNG so insertion into a letter looks
//! uniform. The transform is deterministic and idempotent: cleaning
//! already-clean bytes reproduces them exactly.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, GenericImageView, ImageEncoder, Rgba, RgbaImage};
use thiserror::Error;

/// Channel floor above which a pixel counts as background and is snapped to
/// pure white.
const WHITE_THRESHOLD: u8 = 225;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("failed to decode signature image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("failed to encode signature image: {0}")]
    Encode(String),
}

/// Clean a signature image: flatten alpha over white, snap near-white
/// background to pure white, crop to the ink bounding box, and re-encode as
/// RGB8 PNG.
pub fn clean_signature(bytes: &[u8]) -> Result<Vec<u8>, SignatureError> {
    let img = image::load_from_memory(bytes)?;

    // Flatten any alpha channel over a white background.
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    let mut background = RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255]));
    image::imageops::overlay(&mut background, &rgba, 0, 0);
    let mut rgb = DynamicImage::ImageRgba8(background).to_rgb8();

    // Snap near-white background (and watermark residue) to pure white.
    for pixel in rgb.pixels_mut() {
        if pixel.0.iter().all(|&c| c >= WHITE_THRESHOLD) {
            pixel.0 = [255, 255, 255];
        }
    }

    // Crop to the bounding box of the remaining ink. An all-white image is
    // kept whole.
    let (min_x, min_y, max_x, max_y) = ink_bounds(&rgb).unwrap_or((0, 0, w - 1, h - 1));
    let cropped =
        image::imageops::crop_imm(&rgb, min_x, min_y, max_x - min_x + 1, max_y - min_y + 1)
            .to_image();

    let mut out = Vec::new();
    let encoder = PngEncoder::new(Cursor::new(&mut out));
    encoder
        .write_image(
            cropped.as_raw(),
            cropped.width(),
            cropped.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| SignatureError::Encode(e.to_string()))?;
    Ok(out)
}

/// Bounding box of non-white pixels, `None` when the image is fully white.
fn ink_bounds(rgb: &image::RgbImage) -> Option<(u32, u32, u32, u32)> {
    let (w, h) = rgb.dimensions();
    let mut bounds: Option<(u32, u32, u32, u32)> = None;

    for y in 0..h {
        for x in 0..w {
            if rgb.get_pixel(x, y).0 != [255, 255, 255] {
                bounds = Some(match bounds {
                    None => (x, y, x, y),
                    Some((min_x, min_y, max_x, max_y)) => {
                        (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
                    }
                });
            }
        }
    }
    bounds
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Image files in a directory, name-sorted for deterministic lookup.
fn image_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file() && is_image_file(p))
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

/// Find a signature file by token: exact file name or stem match first, then
/// case-insensitive substring match.
pub fn find_in_dir(dir: &Path, token: &str) -> Option<PathBuf> {
    let files = image_files(dir);
    let token_lower = token.to_ascii_lowercase();

    files
        .iter()
        .find(|p| {
            p.file_name().and_then(|n| n.to_str()) == Some(token)
                || p.file_stem().and_then(|n| n.to_str()) == Some(token)
        })
        .or_else(|| {
            files.iter().find(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.to_ascii_lowercase().contains(&token_lower))
                    .unwrap_or(false)
            })
        })
        .cloned()
}

/// First available signature asset in the directory, the final fallback of
/// the lookup chain.
pub fn first_in_dir(dir: &Path) -> Option<PathBuf> {
    image_files(dir).into_iter().next()
}
