use std::collections::HashSet;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::Result;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbaImage};

use crate::cli::{CompressionLevel, ThumbnailFormat};
use crate::error::ThumbError;

/// Where the thumbnail of `input` goes: `<stem>_thumb.<ext>` in `output_dir`.
pub fn thumbnail_path(output_dir: &Path, input: &Path, format: ThumbnailFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "picture".to_string());
    output_dir.join(format!("{}_thumb.{}", stem, format.extension()))
}

/// Thumbnail paths for a batch of inputs, one per input and all distinct.
///
/// Inputs sharing a file stem (`a/img.jpg`, `b/img.jpg`) would otherwise
/// write the same file; later ones get a numbered `<stem>_<n>_thumb.<ext>`.
pub fn thumbnail_paths(
    output_dir: &Path,
    inputs: &[PathBuf],
    format: ThumbnailFormat,
) -> Vec<PathBuf> {
    let mut taken = HashSet::new();
    inputs
        .iter()
        .map(|input| {
            let mut path = thumbnail_path(output_dir, input, format);
            let stem = input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "picture".to_string());
            let mut n = 2;
            while !taken.insert(path.clone()) {
                path = output_dir.join(format!("{}_{}_thumb.{}", stem, n, format.extension()));
                n += 1;
            }
            path
        })
        .collect()
}

/// Save a thumbnail as PNG (optionally oxipng-compressed) or JPEG.
pub fn save_thumbnail(
    image: &RgbaImage,
    path: &Path,
    format: ThumbnailFormat,
    jpeg_quality: u8,
    compress: Option<CompressionLevel>,
) -> Result<()> {
    let save_error = |e| ThumbError::ImageSave {
        path: path.to_path_buf(),
        source: e,
    };

    // Encode in memory
    let mut encoded = Cursor::new(Vec::new());
    match format {
        ThumbnailFormat::Png => {
            image
                .write_to(&mut encoded, ImageFormat::Png)
                .map_err(save_error)?;
        }
        ThumbnailFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb = DynamicImage::ImageRgba8(image.clone()).into_rgb8();
            JpegEncoder::new_with_quality(&mut encoded, jpeg_quality.clamp(1, 100))
                .encode_image(&rgb)
                .map_err(save_error)?;
        }
    }

    let output_data = match (format, compress) {
        (ThumbnailFormat::Png, Some(level)) => {
            let opts = match level {
                CompressionLevel::Level(n) => oxipng::Options::from_preset(n),
                CompressionLevel::Max => oxipng::Options::max_compression(),
            };
            oxipng::optimize_from_memory(&encoded.into_inner(), &opts).map_err(|e| {
                ThumbError::PngCompress {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                }
            })?
        }
        _ => encoded.into_inner(),
    };

    fs::write(path, output_data).map_err(|e| ThumbError::OutputWrite {
        path: path.to_path_buf(),
        source: e,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RgbaImage {
        RgbaImage::from_fn(40, 30, |x, y| image::Rgba([x as u8 * 6, y as u8 * 8, 90, 255]))
    }

    #[test]
    fn test_thumbnail_path() {
        let path = thumbnail_path(
            Path::new("out"),
            Path::new("/photos/holiday.JPG"),
            ThumbnailFormat::Jpeg,
        );
        assert_eq!(path, PathBuf::from("out/holiday_thumb.jpg"));
    }

    #[test]
    fn test_thumbnail_paths_disambiguate_shared_stems() {
        let inputs = vec![
            PathBuf::from("a/img.jpg"),
            PathBuf::from("b/img.jpg"),
            PathBuf::from("c/img.png"),
            PathBuf::from("c/other.png"),
        ];
        let paths = thumbnail_paths(Path::new("out"), &inputs, ThumbnailFormat::Png);
        assert_eq!(
            paths,
            vec![
                PathBuf::from("out/img_thumb.png"),
                PathBuf::from("out/img_2_thumb.png"),
                PathBuf::from("out/img_3_thumb.png"),
                PathBuf::from("out/other_thumb.png"),
            ]
        );
    }

    #[test]
    fn test_save_png_with_compression() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a_thumb.png");
        save_thumbnail(
            &sample(),
            &path,
            ThumbnailFormat::Png,
            80,
            Some(CompressionLevel::Level(1)),
        )
        .unwrap();

        let reloaded = image::open(&path).unwrap();
        assert_eq!((reloaded.width(), reloaded.height()), (40, 30));
    }

    #[test]
    fn test_save_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a_thumb.jpg");
        save_thumbnail(&sample(), &path, ThumbnailFormat::Jpeg, 80, None).unwrap();

        let format = image::ImageReader::open(&path)
            .unwrap()
            .with_guessed_format()
            .unwrap()
            .format();
        assert_eq!(format, Some(ImageFormat::Jpeg));
    }

    #[test]
    fn test_unwritable_destination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("a_thumb.png");
        let err = save_thumbnail(&sample(), &path, ThumbnailFormat::Png, 80, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ThumbError>(),
            Some(ThumbError::OutputWrite { .. })
        ));
    }
}
