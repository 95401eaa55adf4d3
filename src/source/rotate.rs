use image::{Rgba, RgbaImage, imageops};

use crate::error::{Result, ThumbError};
use crate::scale::ensure_allocatable;

const ANGLE_EPSILON: f64 = 1e-9;

/// Fill colour for the corners exposed by a non-right-angle rotation.
const BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Normalize an angle into `[0, 360)`.
fn normalize(degrees: f64) -> f64 {
    let d = degrees.rem_euclid(360.0);
    if (360.0 - d).abs() < ANGLE_EPSILON {
        0.0
    } else {
        d
    }
}

fn is_angle(normalized: f64, target: f64) -> bool {
    (normalized - target).abs() < ANGLE_EPSILON
}

pub fn needs_rotation(degrees: f64) -> bool {
    !is_angle(normalize(degrees), 0.0)
}

/// Rotate an image clockwise by `degrees`.
///
/// Right angles are exact pixel moves. Any other angle is a bilinear
/// rotation about the centre onto the bounding box of the rotated image.
/// The rotated buffer must fit within `max_image_bytes`.
pub fn rotate(image: RgbaImage, degrees: f64, max_image_bytes: u64) -> Result<RgbaImage> {
    if !degrees.is_finite() {
        return Err(ThumbError::ScaleFailed(format!(
            "cannot rotate by {} degrees",
            degrees
        )));
    }

    let angle = normalize(degrees);
    if is_angle(angle, 0.0) {
        return Ok(image);
    }
    let (w, h) = image.dimensions();
    if is_angle(angle, 90.0) || is_angle(angle, 270.0) {
        ensure_allocatable(h, w, max_image_bytes)?;
    } else {
        ensure_allocatable(w, h, max_image_bytes)?;
    }

    if is_angle(angle, 90.0) {
        Ok(imageops::rotate90(&image))
    } else if is_angle(angle, 180.0) {
        Ok(imageops::rotate180(&image))
    } else if is_angle(angle, 270.0) {
        Ok(imageops::rotate270(&image))
    } else {
        rotate_arbitrary(&image, angle, max_image_bytes)
    }
}

fn rotate_arbitrary(src: &RgbaImage, degrees: f64, max_image_bytes: u64) -> Result<RgbaImage> {
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 {
        return Err(ThumbError::ScaleFailed(
            "cannot rotate an empty image".to_string(),
        ));
    }

    let (sin, cos) = degrees.to_radians().sin_cos();
    let (wf, hf) = (f64::from(w), f64::from(h));

    // Whole-pixel bounding box of the rotated rectangle
    let new_w = (wf * cos.abs() + hf * sin.abs()) as u32;
    let new_h = (wf * sin.abs() + hf * cos.abs()) as u32;
    if new_w == 0 || new_h == 0 {
        return Err(ThumbError::ScaleFailed(format!(
            "rotation by {} degrees collapsed {}x{} to nothing",
            degrees, w, h
        )));
    }

    ensure_allocatable(new_w, new_h, max_image_bytes)?;

    let (cx, cy) = (wf / 2.0, hf / 2.0);
    let (ncx, ncy) = (f64::from(new_w) / 2.0, f64::from(new_h) / 2.0);

    let mut out = RgbaImage::from_pixel(new_w, new_h, BACKGROUND);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let dx = f64::from(x) + 0.5 - ncx;
        let dy = f64::from(y) + 0.5 - ncy;
        // Inverse of a clockwise rotation in y-down coordinates
        let sx = dx * cos + dy * sin + cx - 0.5;
        let sy = -dx * sin + dy * cos + cy - 0.5;
        if let Some(sample) = sample_bilinear(src, sx, sy) {
            *pixel = sample;
        }
    }

    Ok(out)
}

fn sample_bilinear(src: &RgbaImage, x: f64, y: f64) -> Option<Rgba<u8>> {
    let (w, h) = src.dimensions();
    let (max_x, max_y) = (f64::from(w) - 0.5, f64::from(h) - 0.5);
    if x < -0.5 || y < -0.5 || x > max_x || y > max_y {
        return None;
    }

    let x = x.clamp(0.0, f64::from(w - 1));
    let y = y.clamp(0.0, f64::from(h - 1));
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - f64::from(x0);
    let fy = y - f64::from(y0);

    let p00 = src.get_pixel(x0, y0);
    let p10 = src.get_pixel(x1, y0);
    let p01 = src.get_pixel(x0, y1);
    let p11 = src.get_pixel(x1, y1);

    let mut channels = [0u8; 4];
    for (c, channel) in channels.iter_mut().enumerate() {
        let top = f64::from(p00[c]) * (1.0 - fx) + f64::from(p10[c]) * fx;
        let bottom = f64::from(p01[c]) * (1.0 - fx) + f64::from(p11[c]) * fx;
        *channel = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Some(Rgba(channels))
}
