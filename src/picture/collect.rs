use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::error::ThumbError;

const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp", "tif", "tiff"];

/// Expand input paths (files or directories) into the pictures to render.
///
/// Directories are walked recursively and sorted so the render order is
/// stable between runs.
pub fn collect_pictures(inputs: &[impl AsRef<Path>]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for input in inputs {
        let path = input.as_ref();
        if !path.exists() {
            return Err(ThumbError::InputNotFound(path.to_path_buf()).into());
        }

        if path.is_file() {
            if is_supported_image(path) {
                paths.push(path.to_path_buf());
            }
        } else if path.is_dir() {
            let mut found = Vec::new();
            collect_from_directory(path, &mut found)?;
            found.sort();
            paths.extend(found);
        }
    }

    if paths.is_empty() {
        return Err(ThumbError::NoImages.into());
    }
    Ok(paths)
}

fn collect_from_directory(dir: &Path, paths: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();

        if path.is_file() && is_supported_image(&path) {
            paths.push(path);
        } else if path.is_dir() {
            collect_from_directory(&path, paths)?;
        }
    }

    Ok(())
}

fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_recursively_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("2024")).unwrap();
        std::fs::write(dir.path().join("b.JPG"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        std::fs::write(dir.path().join("2024").join("a.png"), b"").unwrap();

        let found = collect_pictures(&[dir.path()]).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.contains(&dir.path().join("2024").join("a.png")));
        assert!(found.contains(&dir.path().join("b.JPG")));
    }

    #[test]
    fn test_missing_input() {
        let err = collect_pictures(&["/no/such/picture.jpg"]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ThumbError>(),
            Some(ThumbError::InputNotFound(_))
        ));
    }

    #[test]
    fn test_no_pictures() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("readme.md"), b"").unwrap();
        let err = collect_pictures(&[dir.path()]).unwrap_err();
        assert!(matches!(err.downcast_ref::<ThumbError>(), Some(ThumbError::NoImages)));
    }
}
