use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use image::RgbaImage;
use log::{debug, error, info, warn};

use super::stats::{PoolCounters, PoolStats};
use crate::cache::{CacheKey, ThumbnailCache};
use crate::config::Settings;
use crate::dispatch::{Delivery, DeliverySender, ThumbnailOutcome};
use crate::error::{Result, ThumbError};
use crate::queue::{RequestQueue, ThumbnailRequest};
use crate::scale::ScalablePicture;

fn checkpoint(request: &ThumbnailRequest) -> Result<()> {
    if request.is_cancelled() {
        Err(ThumbError::Superseded)
    } else {
        Ok(())
    }
}

/// Load, rotate and scale the picture of `request` into its bounding box.
///
/// Returns [`ThumbError::Superseded`] as soon as a checkpoint finds the
/// request cancelled. Work already started is not interrupted.
pub fn produce_thumbnail(
    picture: &mut ScalablePicture,
    request: &ThumbnailRequest,
    slow_decode_warn: Duration,
) -> Result<RgbaImage> {
    checkpoint(request)?;
    let identity = request.identity();
    picture.set_scale_size(request.size());
    picture.load_picture(&identity.path, identity.rotation)?;

    let load_time = picture.load_time();
    if load_time > slow_decode_warn {
        warn!(
            "Decoding {} took {:?}",
            identity.path.display(),
            load_time
        );
    }
    checkpoint(request)?;

    picture.scale_picture()?;
    checkpoint(request)?;

    picture
        .take_scaled()
        .ok_or_else(|| ThumbError::ScaleFailed("scaled picture was not ready".to_string()))
}

/// Cache a finished thumbnail unless its request was cancelled meanwhile.
///
/// The cancellation check runs under the cache lock, so an invalidation
/// that cancels the request before clearing the cache always wins.
fn store_result(
    cache: &ThumbnailCache,
    request: &ThumbnailRequest,
    key: CacheKey,
    bitmap: Arc<RgbaImage>,
    modified: Option<SystemTime>,
) -> Result<()> {
    let stored = cache.put_if(key, bitmap, request.identity().clone(), modified, || {
        !request.is_cancelled()
    });
    if stored {
        Ok(())
    } else {
        Err(ThumbError::Superseded)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct Produced {
    bitmap: Arc<RgbaImage>,
    from_cache: bool,
}

struct Worker {
    settings: Arc<Settings>,
    queue: Arc<RequestQueue>,
    cache: Arc<ThumbnailCache>,
    sender: DeliverySender,
    counters: Arc<PoolCounters>,
    picture: ScalablePicture,
}

impl Worker {
    fn run(mut self) {
        debug!("Worker started");
        while let Some(request) = self.queue.pop_next() {
            self.handle(&request);
            self.queue.complete(&request);
        }
        debug!("Worker stopped");
    }

    fn handle(&mut self, request: &Arc<ThumbnailRequest>) {
        if request.is_cancelled() {
            self.counters.discarded();
            return;
        }
        self.counters.started();

        let result = match panic::catch_unwind(AssertUnwindSafe(|| self.process(request))) {
            Ok(result) => result,
            Err(payload) => {
                // The picture may be stuck mid-transition
                self.picture = ScalablePicture::from_settings(&self.settings);
                Err(ThumbError::ScaleFailed(format!(
                    "worker panicked: {}",
                    panic_message(payload.as_ref())
                )))
            }
        };

        match result {
            Ok(produced) => {
                if produced.from_cache {
                    self.counters.cache_hit();
                }
                self.counters.succeeded();
                self.deliver(request, ThumbnailOutcome::Ready(produced.bitmap));
            }
            Err(ThumbError::Superseded) => {
                debug!("Dropped superseded request for {}", request.requestor());
                self.counters.discarded();
            }
            Err(err) => {
                self.counters.failed();
                warn!(
                    "Thumbnail of {} for {} failed: {}",
                    request.identity().path.display(),
                    request.requestor(),
                    err
                );
                self.deliver(request, ThumbnailOutcome::Failed(err));
            }
        }
    }

    fn process(&mut self, request: &ThumbnailRequest) -> Result<Produced> {
        let key = CacheKey::new(request.picture().id(), request.size());
        let modified = request.picture().last_modified();

        if !request.is_forced() {
            if let Some(bitmap) = self.cache.get_fresh(&key, request.identity(), modified) {
                return Ok(Produced {
                    bitmap,
                    from_cache: true,
                });
            }
        }

        let image = produce_thumbnail(&mut self.picture, request, self.settings.slow_decode_warn)?;
        let bitmap = Arc::new(image);
        store_result(&self.cache, request, key, Arc::clone(&bitmap), modified)?;
        Ok(Produced {
            bitmap,
            from_cache: false,
        })
    }

    fn deliver(&self, request: &Arc<ThumbnailRequest>, outcome: ThumbnailOutcome) {
        if request.is_cancelled() {
            self.counters.discarded();
            return;
        }
        self.sender.send(Delivery {
            request: Arc::clone(request),
            outcome,
        });
    }
}

/// Fixed set of threads turning queued requests into thumbnails.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    queue: Arc<RequestQueue>,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    pub fn spawn(
        settings: Arc<Settings>,
        queue: Arc<RequestQueue>,
        cache: Arc<ThumbnailCache>,
        sender: DeliverySender,
    ) -> Result<Self> {
        let counters = Arc::new(PoolCounters::new(settings.failure_alert_threshold));
        let mut pool = Self {
            workers: Vec::with_capacity(settings.workers),
            queue: Arc::clone(&queue),
            counters: Arc::clone(&counters),
        };

        for index in 0..settings.workers {
            let worker = Worker {
                settings: Arc::clone(&settings),
                queue: Arc::clone(&queue),
                cache: Arc::clone(&cache),
                sender: sender.clone(),
                counters: Arc::clone(&counters),
                picture: ScalablePicture::from_settings(&settings),
            };
            let spawned = thread::Builder::new()
                .name(format!("thumb-worker-{}", index))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(ThumbError::WorkerSpawn(e));
                }
            }
        }

        info!("Started {} thumbnail worker(s)", pool.workers.len());
        Ok(pool)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    /// Stop the queue and wait for every worker to finish its current request.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.queue.shutdown();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("A thumbnail worker exited with a panic");
            }
        }
        debug!("Thumbnail workers joined");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ResultDispatcher;
    use crate::error::ErrorKind;
    use crate::picture::{FilePicture, PictureId, PictureRef, Size};
    use crate::queue::{NewRequest, Priority, RequestorId};
    use std::cell::RefCell;
    use std::path::{Path, PathBuf};
    use std::rc::Rc;
    use std::time::Instant;

    type Results = Rc<RefCell<Vec<(RequestorId, std::result::Result<(u32, u32), ErrorKind>)>>>;

    struct Harness {
        queue: Arc<RequestQueue>,
        cache: Arc<ThumbnailCache>,
        pool: WorkerPool,
        dispatcher: ResultDispatcher,
        results: Results,
    }

    impl Harness {
        fn new(workers: usize) -> Self {
            let settings = Arc::new(Settings {
                workers,
                thumbnail_size: 100,
                ..Settings::default()
            });
            let queue = Arc::new(RequestQueue::new());
            let cache = Arc::new(ThumbnailCache::new(settings.max_cache_entries));
            let (mut dispatcher, sender) = ResultDispatcher::new();
            let pool = WorkerPool::spawn(settings, Arc::clone(&queue), Arc::clone(&cache), sender)
                .unwrap();

            let results: Results = Rc::new(RefCell::new(Vec::new()));
            let ready = Rc::clone(&results);
            dispatcher.on_ready(move |requestor, bitmap| {
                ready.borrow_mut().push((requestor, Ok(bitmap.dimensions())));
            });
            let failed = Rc::clone(&results);
            dispatcher.on_error(move |requestor, err| {
                failed.borrow_mut().push((requestor, Err(err.kind())));
            });

            Self {
                queue,
                cache,
                pool,
                dispatcher,
                results,
            }
        }

        fn submit(&self, requestor: u64, picture: Arc<dyn PictureRef>) {
            self.queue.submit(NewRequest::new(
                RequestorId(requestor),
                picture,
                Priority::High,
                Size::square(100),
            ));
        }

        /// Dispatch until `count` callbacks have run or five seconds pass.
        fn wait_for(&mut self, count: usize) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while self.results.borrow().len() < count && Instant::now() < deadline {
                self.dispatcher.dispatch_timeout(Duration::from_millis(20));
            }
        }
    }

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        RgbaImage::from_pixel(width, height, image::Rgba([1, 2, 3, 255]))
            .save(&path)
            .unwrap();
        path
    }

    fn file_picture(id: u64, path: &Path) -> Arc<dyn PictureRef> {
        Arc::new(FilePicture::new(PictureId(id), path))
    }

    #[derive(Debug)]
    struct ExplodingPicture;

    impl PictureRef for ExplodingPicture {
        fn id(&self) -> PictureId {
            PictureId(99)
        }
        fn image_path(&self) -> PathBuf {
            PathBuf::from("explodes.png")
        }
        fn rotation_angle(&self) -> f64 {
            0.0
        }
        fn checksum(&self) -> u64 {
            0
        }
        fn last_modified(&self) -> Option<SystemTime> {
            panic!("metadata lookup blew up")
        }
    }

    #[test]
    fn test_produces_thumbnails() {
        let dir = tempfile::tempdir().unwrap();
        let wide = write_png(dir.path(), "wide.png", 350, 233);
        let tall = write_png(dir.path(), "tall.png", 233, 350);
        let mut harness = Harness::new(2);

        harness.submit(1, file_picture(1, &wide));
        harness.submit(2, file_picture(2, &tall));
        harness.wait_for(2);

        let mut results = harness.results.borrow().clone();
        results.sort_by_key(|(requestor, _)| *requestor);
        assert_eq!(
            results,
            vec![
                (RequestorId(1), Ok((100, 67))),
                (RequestorId(2), Ok((67, 100))),
            ]
        );
        assert_eq!(harness.cache.len(), 2);
        assert_eq!(harness.pool.stats().succeeded, 2);
    }

    #[test]
    fn test_missing_file_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut harness = Harness::new(1);

        harness.submit(1, file_picture(1, &dir.path().join("gone.jpg")));
        harness.wait_for(1);

        assert_eq!(
            harness.results.borrow().as_slice(),
            &[(RequestorId(1), Err(ErrorKind::SourceUnreadable))]
        );
        let stats = harness.pool.stats();
        assert_eq!((stats.failed, stats.consecutive_failures), (1, 1));
    }

    #[test]
    fn test_second_requestor_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "a.png", 200, 200);
        let picture = file_picture(1, &path);
        let mut harness = Harness::new(1);

        harness.submit(1, Arc::clone(&picture));
        harness.wait_for(1);
        harness.submit(2, picture);
        harness.wait_for(2);

        assert_eq!(harness.results.borrow().len(), 2);
        assert_eq!(harness.pool.stats().cache_hits, 1);
    }

    #[test]
    fn test_panic_becomes_scale_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "ok.png", 50, 50);
        let mut harness = Harness::new(1);

        harness.submit(1, Arc::new(ExplodingPicture));
        harness.wait_for(1);
        // The same worker keeps going
        harness.submit(2, file_picture(2, &path));
        harness.wait_for(2);

        let results = harness.results.borrow();
        assert_eq!(results[0], (RequestorId(1), Err(ErrorKind::ScaleFailed)));
        assert_eq!(results[1], (RequestorId(2), Ok((50, 50))));
    }

    #[test]
    fn test_shutdown_joins_workers() {
        let mut harness = Harness::new(3);
        assert_eq!(harness.pool.worker_count(), 3);
        harness.pool.shutdown();
        assert_eq!(harness.pool.worker_count(), 0);
        assert!(harness.queue.is_shut_down());
    }

    #[test]
    fn test_cancelled_request_is_not_produced() {
        let queue = RequestQueue::new();
        let handle = queue.submit(NewRequest::new(
            RequestorId(1),
            Arc::new(FilePicture::new(PictureId(1), "never-read.png")),
            Priority::High,
            Size::square(100),
        ));
        queue.cancel(&handle);

        let mut picture = ScalablePicture::from_settings(&Settings::default());
        let result = produce_thumbnail(&mut picture, handle.request(), Duration::from_secs(5));
        assert!(matches!(result, Err(ThumbError::Superseded)));
    }

    #[test]
    fn test_invalidated_result_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "a.png", 20, 20);
        let queue = RequestQueue::new();
        let cache = ThumbnailCache::new(4);
        queue.submit(NewRequest::new(
            RequestorId(1),
            file_picture(1, &path),
            Priority::High,
            Size::square(100),
        ));
        let request = queue.pop_next().unwrap();

        // Invalidation lands after the last checkpoint but before the put
        let mut picture = ScalablePicture::from_settings(&Settings::default());
        let image = produce_thumbnail(&mut picture, &request, Duration::from_secs(5)).unwrap();
        queue.cancel_picture(PictureId(1));
        cache.invalidate(PictureId(1));

        let key = CacheKey::new(PictureId(1), Size::square(100));
        let stored = store_result(&cache, &request, key, Arc::new(image), None);
        assert!(matches!(stored, Err(ThumbError::Superseded)));
        assert!(cache.get(&key).is_none());
    }
}
