use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;
use log::{debug, info};

use crate::cache::{CacheStats, ThumbnailCache};
use crate::config::Settings;
use crate::dispatch::{DeliverySender, ResultDispatcher};
use crate::error::{Result, ThumbError};
use crate::picture::{PictureRef, Size};
use crate::pool::{PoolStats, WorkerPool};
use crate::queue::{NewRequest, Priority, RequestHandle, RequestQueue, RequestorId};

/// What a requestor is currently showing.
#[derive(Debug)]
struct Shown {
    picture: Arc<dyn PictureRef>,
    size: Size,
    handle: RequestHandle,
}

/// Entry point for the UI layer.
///
/// Owns the queue, cache, workers and the result dispatcher. Lives on the UI
/// thread; callbacks registered here run on that thread from
/// [`dispatch_pending`](Self::dispatch_pending) or
/// [`dispatch_timeout`](Self::dispatch_timeout).
#[derive(Debug)]
pub struct ThumbnailService {
    settings: Arc<Settings>,
    queue: Arc<RequestQueue>,
    cache: Arc<ThumbnailCache>,
    pool: WorkerPool,
    dispatcher: ResultDispatcher,
    shown: HashMap<RequestorId, Shown>,
}

impl ThumbnailService {
    pub fn new(settings: Arc<Settings>) -> Result<Self> {
        let (dispatcher, sender) = ResultDispatcher::new();
        Self::start(settings, dispatcher, sender)
    }

    /// Like [`new`](Self::new), calling `waker` from a worker thread whenever
    /// a result is ready to dispatch.
    pub fn with_waker(
        settings: Arc<Settings>,
        waker: impl Fn() + Send + Sync + 'static,
    ) -> Result<Self> {
        let (dispatcher, sender) = ResultDispatcher::new();
        Self::start(settings, dispatcher, sender.with_waker(waker))
    }

    fn start(
        settings: Arc<Settings>,
        dispatcher: ResultDispatcher,
        sender: DeliverySender,
    ) -> Result<Self> {
        settings.validate()?;
        let queue = Arc::new(RequestQueue::new());
        let cache = Arc::new(ThumbnailCache::new(settings.max_cache_entries));
        let pool = WorkerPool::spawn(
            Arc::clone(&settings),
            Arc::clone(&queue),
            Arc::clone(&cache),
            sender,
        )?;
        Ok(Self {
            settings,
            queue,
            cache,
            pool,
            dispatcher,
            shown: HashMap::new(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The configured square thumbnail box.
    pub fn default_size(&self) -> Size {
        Size::square(self.settings.thumbnail_size)
    }

    /// Ask for a thumbnail of `picture` fitting inside `size`.
    ///
    /// Replaces whatever `requestor` asked for before; only the latest
    /// request of a requestor ever reaches a callback.
    pub fn request_thumbnail_creation(
        &mut self,
        requestor: RequestorId,
        picture: Arc<dyn PictureRef>,
        priority: Priority,
        size: Size,
    ) -> RequestHandle {
        self.submit(NewRequest::new(requestor, picture, priority, size))
    }

    fn submit(&mut self, request: NewRequest) -> RequestHandle {
        let requestor = request.requestor;
        let picture = Arc::clone(&request.picture);
        let size = request.size;
        let handle = self.queue.submit(request);

        if let Some(previous) = self.shown.get(&requestor) {
            // The previous result may already be on its way to the dispatcher
            if !previous.handle.same_as(&handle) {
                self.queue.cancel(&previous.handle);
            }
        }
        self.shown.insert(
            requestor,
            Shown {
                picture,
                size,
                handle: handle.clone(),
            },
        );
        handle
    }

    pub fn cancel_request(&mut self, handle: &RequestHandle) -> bool {
        self.queue.cancel(handle)
    }

    pub fn on_thumbnail_ready(&mut self, callback: impl FnMut(RequestorId, Arc<RgbaImage>) + 'static) {
        self.dispatcher.on_ready(callback);
    }

    pub fn on_thumbnail_error(&mut self, callback: impl FnMut(RequestorId, &ThumbError) + 'static) {
        self.dispatcher.on_error(callback);
    }

    /// The picture changed (moved, rotated, re-checksummed): drop its cached
    /// thumbnails and rebuild them for every requestor showing it.
    ///
    /// Returns the number of requestors that were resubmitted.
    pub fn invalidate_picture(&mut self, picture: &dyn PictureRef) -> usize {
        let id = picture.id();
        // Cancel first: a worker re-checks cancellation under the cache lock
        let cancelled = self.queue.cancel_picture(id);
        let dropped = self.cache.invalidate(id);

        let affected: Vec<(RequestorId, Arc<dyn PictureRef>, Size)> = self
            .shown
            .iter()
            .filter(|(_, shown)| shown.picture.id() == id)
            .map(|(requestor, shown)| (*requestor, Arc::clone(&shown.picture), shown.size))
            .collect();
        for (requestor, picture, size) in &affected {
            self.submit(
                NewRequest::new(*requestor, Arc::clone(picture), Priority::High, *size).force(true),
            );
        }

        info!(
            "Invalidated picture {}: {} cached, {} queued, {} requestor(s) refreshing",
            id,
            dropped,
            cancelled,
            affected.len()
        );
        affected.len()
    }

    /// Rebuild the thumbnail `requestor` is showing, skipping the cache.
    pub fn refresh_thumbnail(&mut self, requestor: RequestorId) -> Option<RequestHandle> {
        let (picture, size) = match self.shown.get(&requestor) {
            Some(shown) => (Arc::clone(&shown.picture), shown.size),
            None => {
                debug!("Nothing to refresh for {}", requestor);
                return None;
            }
        };
        Some(self.submit(NewRequest::new(requestor, picture, Priority::High, size).force(true)))
    }

    /// The requestor is gone; cancel its request and stop tracking it.
    pub fn forget_requestor(&mut self, requestor: RequestorId) {
        if let Some(shown) = self.shown.remove(&requestor) {
            self.queue.cancel(&shown.handle);
        }
    }

    pub fn dispatch_pending(&mut self) -> usize {
        self.dispatcher.dispatch_pending()
    }

    pub fn dispatch_timeout(&mut self, timeout: Duration) -> usize {
        self.dispatcher.dispatch_timeout(timeout)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// True when nothing is queued or running.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.queue.in_flight_count() == 0
    }

    /// Cancel everything queued and join the workers. Results already
    /// delivered can still be dispatched afterwards.
    pub fn shutdown(&mut self) {
        self.queue.clear();
        self.pool.shutdown();
        self.shown.clear();
    }
}
