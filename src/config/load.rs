use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::types::ThumbConfig;

/// A loaded configuration file with its associated directory.
///
/// Paths in the config are relative to the config file location,
/// so we need to track where the config was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The parsed configuration
    pub config: ThumbConfig,
    /// The directory containing the config file
    pub config_dir: PathBuf,
}

impl LoadedConfig {
    /// Load a config file from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let config: ThumbConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        if config.version != 1 {
            anyhow::bail!(
                "unsupported config version {} in {}",
                config.version,
                path.display()
            );
        }

        let config_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self { config, config_dir })
    }

    /// Resolve input patterns to actual file paths.
    ///
    /// Glob patterns are expanded, and all paths are resolved relative
    /// to the config file directory.
    pub fn resolve_inputs(&self) -> Result<Vec<PathBuf>> {
        let mut results = Vec::new();

        for pattern in &self.config.input {
            if is_glob_pattern(pattern) {
                let full_pattern = self.config_dir.join(pattern);
                let pattern_str = full_pattern.to_string_lossy();

                let paths = glob::glob(&pattern_str)
                    .with_context(|| format!("invalid glob pattern: {}", pattern))?;

                for entry in paths {
                    let path =
                        entry.with_context(|| format!("failed to read glob entry: {}", pattern))?;
                    results.push(path);
                }
            } else {
                results.push(self.config_dir.join(pattern));
            }
        }

        Ok(results)
    }

    /// Resolve the output directory relative to the config file directory.
    pub fn resolve_output_dir(&self) -> PathBuf {
        self.config_dir.join(&self.config.output_dir)
    }
}

/// Check if a pattern contains glob characters.
fn is_glob_pattern(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?') || pattern.contains('[')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_glob_pattern() {
        assert!(is_glob_pattern("*.jpg"));
        assert!(is_glob_pattern("2024/**/*.jpg"));
        assert!(is_glob_pattern("img_?.png"));
        assert!(is_glob_pattern("img_[0-9].png"));
        assert!(!is_glob_pattern("holiday.jpg"));
        assert!(!is_glob_pattern("2024/beach.jpg"));
    }

    #[test]
    fn test_load_resolves_relative_to_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"").unwrap();
        std::fs::write(dir.path().join("b.png"), b"").unwrap();
        let config_path = dir.path().join("thumbq.json");
        std::fs::write(
            &config_path,
            r#"{ "input": ["*.png", "c.jpg"], "output_dir": "thumbs", "workers": 3 }"#,
        )
        .unwrap();

        let loaded = LoadedConfig::load(&config_path).unwrap();
        assert_eq!(loaded.config.workers, 3);
        // Unspecified fields fall back to defaults
        assert_eq!(loaded.config.thumbnail_size, 350);

        let inputs = loaded.resolve_inputs().unwrap();
        assert_eq!(inputs.len(), 3);
        assert!(inputs.contains(&dir.path().join("c.jpg")));
        assert_eq!(loaded.resolve_output_dir(), dir.path().join("thumbs"));
    }

    #[test]
    fn test_load_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("thumbq.json");
        std::fs::write(&config_path, r#"{ "version": 7 }"#).unwrap();
        assert!(LoadedConfig::load(&config_path).is_err());
    }
}
