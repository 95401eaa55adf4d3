use image::{Rgba, RgbaImage};

use crate::picture::Size;

const FILL: Rgba<u8> = Rgba([224, 224, 224, 255]);
const FRAME: Rgba<u8> = Rgba([128, 128, 128, 255]);
const CROSS: Rgba<u8> = Rgba([200, 40, 40, 255]);

/// Shown in place of a thumbnail whose picture could not be read.
///
/// A grey tile with a frame and a red cross, sized to the bounding box.
pub fn offline_placeholder(size: Size) -> RgbaImage {
    let width = size.width.max(1);
    let height = size.height.max(1);
    let stroke = (width.min(height) / 32).max(1);

    RgbaImage::from_fn(width, height, |x, y| {
        let on_frame =
            x < stroke || y < stroke || x >= width - stroke || y >= height - stroke;
        if on_frame {
            return FRAME;
        }
        // Distance from each diagonal, in the box's own aspect ratio
        let fx = u64::from(x) * u64::from(height);
        let fy = u64::from(y) * u64::from(width);
        let back = u64::from(width - 1 - x) * u64::from(height);
        let tolerance = u64::from(stroke) * u64::from(width.max(height));
        if fx.abs_diff(fy) <= tolerance || back.abs_diff(fy) <= tolerance {
            CROSS
        } else {
            FILL
        }
    })
}
