use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::picture::{PictureIdentity, PictureRef, Size};

/// How urgently a thumbnail is wanted. `High` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Priority {
    /// Visible on screen right now
    High = 0,
    #[default]
    Medium = 1,
    Low = 2,
    /// Background prefetch
    Lowest = 3,
}

impl Priority {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Priority::High,
            1 => Priority::Medium,
            2 => Priority::Low,
            _ => Priority::Lowest,
        }
    }
}

/// Identifies the UI element a thumbnail is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestorId(pub u64);

impl fmt::Display for RequestorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "requestor {}", self.0)
    }
}

/// What a caller hands to [`RequestQueue::submit`](super::RequestQueue::submit).
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub requestor: RequestorId,
    pub picture: Arc<dyn PictureRef>,
    pub priority: Priority,
    pub size: Size,
    /// Rebuild even if an equivalent request or cached thumbnail exists
    pub force: bool,
}

impl NewRequest {
    pub fn new(
        requestor: RequestorId,
        picture: Arc<dyn PictureRef>,
        priority: Priority,
        size: Size,
    ) -> Self {
        Self {
            requestor,
            picture,
            priority,
            size,
            force: false,
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// A queued or running thumbnail job.
///
/// Shared between the queue, the worker running it and the handle held by
/// the requestor. The picture's identity is captured at submission so the
/// result is cached against what was actually rendered.
#[derive(Debug)]
pub struct ThumbnailRequest {
    requestor: RequestorId,
    picture: Arc<dyn PictureRef>,
    identity: PictureIdentity,
    priority: AtomicU8,
    size: Size,
    force: bool,
    seq: u64,
    cancelled: AtomicBool,
}

impl ThumbnailRequest {
    pub(super) fn new(request: NewRequest, seq: u64) -> Self {
        let identity = request.picture.identity();
        Self {
            requestor: request.requestor,
            picture: request.picture,
            identity,
            priority: AtomicU8::new(request.priority as u8),
            size: request.size,
            force: request.force,
            seq,
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn requestor(&self) -> RequestorId {
        self.requestor
    }

    pub fn picture(&self) -> &Arc<dyn PictureRef> {
        &self.picture
    }

    pub fn identity(&self) -> &PictureIdentity {
        &self.identity
    }

    pub fn priority(&self) -> Priority {
        Priority::from_u8(self.priority.load(Ordering::Acquire))
    }

    /// Only called with the queue lock held, since the priority is part of
    /// the pending map key.
    pub(super) fn set_priority(&self, priority: Priority) {
        self.priority.store(priority as u8, Ordering::Release);
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn is_forced(&self) -> bool {
        self.force
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(super) fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether `request` asks for exactly the thumbnail this one produces.
    pub(super) fn same_target(&self, request: &NewRequest) -> bool {
        !request.force
            && self.picture.id() == request.picture.id()
            && self.size == request.size
            && self.identity == request.picture.identity()
    }
}

/// The requestor's view of a submitted request.
#[derive(Debug, Clone)]
pub struct RequestHandle(pub(super) Arc<ThumbnailRequest>);

impl RequestHandle {
    pub fn request(&self) -> &Arc<ThumbnailRequest> {
        &self.0
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    pub fn priority(&self) -> Priority {
        self.0.priority()
    }

    /// Two handles are the same when they refer to the same submission.
    pub fn same_as(&self, other: &RequestHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::picture::{FilePicture, PictureId};

    #[test]
    fn test_priority_order() {
        assert!(Priority::High < Priority::Medium);
        assert!(Priority::Low < Priority::Lowest);
        for p in [Priority::High, Priority::Medium, Priority::Low, Priority::Lowest] {
            assert_eq!(Priority::from_u8(p as u8), p);
        }
    }

    #[test]
    fn test_same_target() {
        let pic: Arc<dyn PictureRef> = Arc::new(FilePicture::new(PictureId(1), "a.jpg"));
        let new = NewRequest::new(RequestorId(1), Arc::clone(&pic), Priority::Low, Size::square(100));
        let request = ThumbnailRequest::new(new.clone(), 0);

        assert!(request.same_target(&new));
        assert!(!request.same_target(&new.clone().force(true)));
        let mut other_size = new.clone();
        other_size.size = Size::square(200);
        assert!(!request.same_target(&other_size));
    }
}
