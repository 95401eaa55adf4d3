use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::RwLock;

/// Stable identity of a picture node in the collection model.
///
/// Survives changes to the picture's path, rotation or checksum, which is what
/// lets the cache drop every thumbnail of a picture whose content moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PictureId(pub u64);

impl fmt::Display for PictureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A width x height pair in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn square(edge: u32) -> Self {
        Self::new(edge, edge)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// The attributes that decide whether a cached thumbnail is still valid.
#[derive(Debug, Clone, PartialEq)]
pub struct PictureIdentity {
    pub path: PathBuf,
    pub rotation: f64,
    pub checksum: u64,
}

/// Handle to a picture owned by the external collection model.
///
/// The pipeline only reads through this trait. Implementations must be cheap
/// to query since workers call them while building a request.
pub trait PictureRef: Send + Sync + fmt::Debug {
    fn id(&self) -> PictureId;

    fn image_path(&self) -> PathBuf;

    /// Clockwise rotation in degrees to apply before scaling.
    fn rotation_angle(&self) -> f64;

    fn checksum(&self) -> u64;

    /// Modification time of the underlying file, if known.
    fn last_modified(&self) -> Option<SystemTime> {
        std::fs::metadata(self.image_path())
            .and_then(|m| m.modified())
            .ok()
    }

    fn identity(&self) -> PictureIdentity {
        PictureIdentity {
            path: self.image_path(),
            rotation: self.rotation_angle(),
            checksum: self.checksum(),
        }
    }
}

/// Picture backed directly by a file on disk.
///
/// Attributes can be changed after construction to mirror edits made in the
/// collection model (moving the file, rotating, recomputing the checksum).
#[derive(Debug)]
pub struct FilePicture {
    id: PictureId,
    path: RwLock<PathBuf>,
    rotation: RwLock<f64>,
    checksum: AtomicU64,
}

impl FilePicture {
    pub fn new(id: PictureId, path: impl AsRef<Path>) -> Self {
        Self {
            id,
            path: RwLock::new(path.as_ref().to_path_buf()),
            rotation: RwLock::new(0.0),
            checksum: AtomicU64::new(0),
        }
    }

    pub fn with_rotation(self, degrees: f64) -> Self {
        *self.rotation.write() = degrees;
        self
    }

    pub fn with_checksum(self, checksum: u64) -> Self {
        self.checksum.store(checksum, Ordering::Relaxed);
        self
    }

    pub fn set_path(&self, path: impl AsRef<Path>) {
        *self.path.write() = path.as_ref().to_path_buf();
    }

    pub fn set_rotation(&self, degrees: f64) {
        *self.rotation.write() = degrees;
    }

    pub fn set_checksum(&self, checksum: u64) {
        self.checksum.store(checksum, Ordering::Relaxed);
    }
}

impl PictureRef for FilePicture {
    fn id(&self) -> PictureId {
        self.id
    }

    fn image_path(&self) -> PathBuf {
        self.path.read().clone()
    }

    fn rotation_angle(&self) -> f64 {
        *self.rotation.read()
    }

    fn checksum(&self) -> u64 {
        self.checksum.load(Ordering::Relaxed)
    }
}
