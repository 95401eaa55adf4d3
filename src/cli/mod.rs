mod args;

pub use args::{
    CliArgs, Command, CompressionLevel, InitConfigArgs, RenderArgs, ScaleArgs, ThumbnailFormat,
};
