use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "thumbq")]
#[command(version, about = "Prioritised thumbnail generator", long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Render thumbnails for a set of pictures through the worker pool
    Render(RenderArgs),
    /// Load, rotate and scale a single picture by a fixed factor
    Scale(ScaleArgs),
    /// Write a config file with default settings
    InitConfig(InitConfigArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RenderArgs {
    /// Input image files or directories
    #[arg(required_unless_present = "config")]
    pub input: Vec<PathBuf>,

    /// Load settings from a .thumbq config file
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output directory for thumbnails [default: .]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Edge of the square bounding box in pixels [default: 350]
    #[arg(short, long)]
    pub size: Option<u32>,

    /// Number of worker threads (1-16) [default: 2]
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Single nearest-neighbour resize instead of multi-step bicubic
    #[arg(long)]
    pub fast: bool,

    /// Number of bicubic resize steps [default: 2]
    #[arg(long)]
    pub steps: Option<u32>,

    /// Allow pictures smaller than the box to be enlarged
    #[arg(long)]
    pub enlarge: bool,

    /// Treat the first N pictures as on screen (requested at high priority)
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub visible: usize,

    /// Thumbnail file format [default: png]
    #[arg(long, value_enum)]
    pub format: Option<ThumbnailFormat>,

    /// JPEG quality 1-100 [default: 80]
    #[arg(long, value_name = "QUALITY")]
    pub jpeg_quality: Option<u8>,

    /// Compress PNG output (0-6 or 'max'). Default level is 2 if flag is present without value.
    #[arg(long, value_name = "LEVEL", default_missing_value = "2", num_args = 0..=1)]
    pub compress: Option<CompressionLevel>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ScaleArgs {
    /// Picture to scale
    pub input: PathBuf,

    /// Output file; the format follows the extension
    #[arg(short, long)]
    pub output: PathBuf,

    /// Scale factor (e.g., 0.5 for half size)
    #[arg(long, value_name = "FACTOR")]
    pub factor: f64,

    /// Clockwise rotation in degrees applied before scaling
    #[arg(long, value_name = "DEGREES", default_value_t = 0.0)]
    pub rotation: f64,

    /// Single nearest-neighbour resize instead of multi-step bicubic
    #[arg(long)]
    pub fast: bool,

    /// Number of bicubic resize steps
    #[arg(long, default_value_t = 2)]
    pub steps: u32,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Args, Debug, Clone)]
pub struct InitConfigArgs {
    /// Where to write the config file
    pub path: PathBuf,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

/// File format thumbnails are written in
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum ThumbnailFormat {
    #[default]
    Png,
    #[value(alias = "jpg")]
    Jpeg,
}

impl ThumbnailFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ThumbnailFormat::Png => "png",
            ThumbnailFormat::Jpeg => "jpg",
        }
    }

    /// Parse the `format` field of a config file.
    pub fn from_config(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Some(ThumbnailFormat::Png),
            "jpeg" | "jpg" => Some(ThumbnailFormat::Jpeg),
            _ => None,
        }
    }
}

/// PNG compression level (0-6 or max)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    /// Optimization level 0-6
    Level(u8),
    /// Maximum compression
    Max,
}

impl std::str::FromStr for CompressionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("max") {
            Ok(CompressionLevel::Max)
        } else {
            s.parse::<u8>()
                .map_err(|_e| format!("invalid compression level: {}", s))
                .and_then(|n| {
                    if n <= 6 {
                        Ok(CompressionLevel::Level(n))
                    } else {
                        Err(format!("compression level must be 0-6 or 'max', got {}", n))
                    }
                })
        }
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        CompressionLevel::Level(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_level_parsing() {
        assert_eq!("max".parse::<CompressionLevel>(), Ok(CompressionLevel::Max));
        assert_eq!("4".parse::<CompressionLevel>(), Ok(CompressionLevel::Level(4)));
        assert!("7".parse::<CompressionLevel>().is_err());
        assert!("fast".parse::<CompressionLevel>().is_err());
    }

    #[test]
    fn test_render_args() {
        let cli = CliArgs::try_parse_from([
            "thumbq", "render", "a.jpg", "b.jpg", "--size", "200", "--visible", "1", "--compress",
        ])
        .unwrap();
        let Command::Render(args) = cli.command else {
            panic!("expected render");
        };
        assert_eq!(args.input.len(), 2);
        assert_eq!(args.size, Some(200));
        assert_eq!(args.visible, 1);
        assert_eq!(args.compress, Some(CompressionLevel::Level(2)));
        assert!(!args.fast);
    }

    #[test]
    fn test_render_requires_input_or_config() {
        assert!(CliArgs::try_parse_from(["thumbq", "render"]).is_err());
        assert!(CliArgs::try_parse_from(["thumbq", "render", "-c", "x.thumbq"]).is_ok());
    }

    #[test]
    fn test_scale_args() {
        let cli = CliArgs::try_parse_from([
            "thumbq", "scale", "in.png", "-o", "out.png", "--factor", "2", "--rotation", "90",
        ])
        .unwrap();
        let Command::Scale(args) = cli.command else {
            panic!("expected scale");
        };
        assert_eq!(args.factor, 2.0);
        assert_eq!(args.rotation, 90.0);
        assert_eq!(args.steps, 2);
    }

    #[test]
    fn test_format_from_config() {
        assert_eq!(ThumbnailFormat::from_config("JPEG"), Some(ThumbnailFormat::Jpeg));
        assert_eq!(ThumbnailFormat::from_config("png"), Some(ThumbnailFormat::Png));
        assert_eq!(ThumbnailFormat::from_config("gif"), None);
    }
}
