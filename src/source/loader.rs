use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{ImageReader, Limits, RgbaImage};
use log::{debug, error, warn};
use parking_lot::Mutex;

use super::{SourceImageState, needs_rotation, rotate};
use crate::error::{Result, ThumbError};
use crate::scale::ensure_allocatable;

/// The single logical slot a loader fills.
#[derive(Debug, Default)]
struct Slot {
    /// Bumped by every load and every stop; a load whose ticket no longer
    /// matches has been superseded and must not touch the slot.
    generation: u64,
    path: Option<PathBuf>,
    state: SourceImageState,
    load_time: Duration,
}

/// Decodes a picture file into a bitmap and applies its rotation.
///
/// The decode itself runs outside the slot lock on a buffer owned by the
/// calling load, so a second load on the same loader can start while the
/// first is still decoding. The first then finishes into the void.
#[derive(Debug)]
pub struct SourceImageLoader {
    slot: Mutex<Slot>,
    max_image_bytes: u64,
}

impl SourceImageLoader {
    pub fn new(max_image_bytes: u64) -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            max_image_bytes,
        }
    }

    /// Load `path` and rotate it clockwise by `rotation` degrees.
    ///
    /// Returns [`ThumbError::Superseded`] when another load or a stop
    /// request took over the slot before this one completed.
    pub fn load(&self, path: &Path, rotation: f64) -> Result<Arc<RgbaImage>> {
        let ticket = self.begin(path)?;
        let start = Instant::now();

        let decoded = match decode(path, self.max_image_bytes) {
            Ok(image) => image,
            Err(e) => return Err(self.fail(ticket, e)),
        };

        let image = if needs_rotation(rotation) {
            self.advance(ticket, SourceImageState::Rotating)?;
            match rotate(decoded, rotation, self.max_image_bytes) {
                Ok(image) => image,
                Err(e) => return Err(self.fail(ticket, e)),
            }
        } else {
            decoded
        };

        let (width, height) = image.dimensions();
        let image = Arc::new(image);
        let elapsed = start.elapsed();
        {
            let mut slot = self.slot.lock();
            if slot.generation != ticket {
                return Err(ThumbError::Superseded);
            }
            slot.state.transition(SourceImageState::Ready {
                image: Arc::clone(&image),
                width,
                height,
            })?;
            slot.load_time = elapsed;
        }
        debug!(
            "Loaded {} ({}x{}) in {:?}",
            path.display(),
            width,
            height,
            elapsed
        );
        Ok(image)
    }

    fn begin(&self, path: &Path) -> Result<u64> {
        let mut slot = self.slot.lock();
        if slot.state.is_active() {
            debug!(
                "Superseding load of {:?} with {}",
                slot.path,
                path.display()
            );
        }
        slot.generation += 1;
        slot.path = Some(path.to_path_buf());
        slot.load_time = Duration::ZERO;
        slot.state.reset();
        slot.state.transition(SourceImageState::Loading)?;
        Ok(slot.generation)
    }

    /// Apply a state change on behalf of the load holding `ticket`.
    fn advance(&self, ticket: u64, next: SourceImageState) -> Result<()> {
        let mut slot = self.slot.lock();
        if slot.generation != ticket {
            return Err(ThumbError::Superseded);
        }
        slot.state.transition(next)
    }

    /// Record a failure and return the error the caller should see.
    fn fail(&self, ticket: u64, err: ThumbError) -> ThumbError {
        let mut slot = self.slot.lock();
        if slot.generation != ticket {
            return ThumbError::Superseded;
        }
        if let ThumbError::OutOfMemory(ref message) = err {
            error!("Out of memory while loading {:?}: {}", slot.path, message);
        } else {
            debug!("{}", err);
        }
        if let Err(e) = slot.state.transition(SourceImageState::Error(err.to_string())) {
            warn!("{}", e);
        }
        err
    }

    /// Abandon the current load, if any. Its result will be discarded.
    pub fn stop_loading(&self) -> bool {
        let mut slot = self.slot.lock();
        Self::stop_locked(&mut slot)
    }

    /// Stop the current load unless it is loading `exempt`.
    ///
    /// Returns true when a load of a different picture was stopped.
    pub fn stop_loading_except(&self, exempt: &Path) -> bool {
        let mut slot = self.slot.lock();
        match &slot.path {
            Some(current) if current != exempt => Self::stop_locked(&mut slot),
            _ => false,
        }
    }

    fn stop_locked(slot: &mut Slot) -> bool {
        if !slot.state.is_active() {
            return false;
        }
        debug!("Stopping load of {:?}", slot.path);
        slot.generation += 1;
        slot.load_time = Duration::ZERO;
        slot.state.transition(SourceImageState::Error("Aborted".to_string())).is_ok()
    }

    /// Drop the loaded bitmap so the slot no longer keeps it alive.
    ///
    /// Loads still in progress are left alone.
    pub fn release(&self) {
        let mut slot = self.slot.lock();
        if matches!(slot.state, SourceImageState::Ready { .. }) {
            slot.state.reset();
        }
    }

    pub fn state(&self) -> SourceImageState {
        self.slot.lock().state.clone()
    }

    /// Dimensions of the ready bitmap, or 0x0 when nothing is loaded.
    pub fn dimensions(&self) -> (u32, u32) {
        match self.slot.lock().state {
            SourceImageState::Ready { width, height, .. } => (width, height),
            _ => (0, 0),
        }
    }

    pub fn load_time(&self) -> Duration {
        self.slot.lock().load_time
    }
}

fn decode(path: &Path, max_image_bytes: u64) -> Result<RgbaImage> {
    let unreadable = |source| ThumbError::SourceUnreadable {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = ImageReader::open(path)
        .map_err(unreadable)?
        .with_guessed_format()
        .map_err(unreadable)?;

    if reader.format().is_none() {
        return Err(ThumbError::DecodeFailed {
            path: path.to_path_buf(),
            message: "unrecognised image format".to_string(),
        });
    }

    let mut limits = Limits::default();
    limits.max_alloc = Some(max_image_bytes);
    reader.limits(limits);

    let image = reader
        .decode()
        .map_err(|e| ThumbError::from_image_error(path, e))?;

    // The RGBA conversion below allocates a second full-size buffer
    ensure_allocatable(image.width(), image.height(), max_image_bytes)?;
    Ok(image.into_rgba8())
}
