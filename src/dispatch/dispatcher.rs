use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use image::RgbaImage;
use log::{debug, warn};

use crate::error::ThumbError;
use crate::queue::{RequestorId, ThumbnailRequest};

/// How a request ended.
#[derive(Debug)]
pub enum ThumbnailOutcome {
    Ready(Arc<RgbaImage>),
    Failed(ThumbError),
}

/// A finished request travelling from a worker to the UI thread.
#[derive(Debug)]
pub struct Delivery {
    pub request: Arc<ThumbnailRequest>,
    pub outcome: ThumbnailOutcome,
}

type Waker = Arc<dyn Fn() + Send + Sync>;

/// Worker side of the result channel.
#[derive(Clone)]
pub struct DeliverySender {
    tx: Sender<Delivery>,
    waker: Option<Waker>,
}

impl fmt::Debug for DeliverySender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliverySender")
            .field("queued", &self.tx.len())
            .field("waker", &self.waker.is_some())
            .finish()
    }
}

impl DeliverySender {
    /// Call `waker` after every delivery so an event loop can schedule a
    /// dispatch on its own thread.
    pub fn with_waker(mut self, waker: impl Fn() + Send + Sync + 'static) -> Self {
        self.waker = Some(Arc::new(waker));
        self
    }

    /// Returns false when the dispatcher is gone.
    pub fn send(&self, delivery: Delivery) -> bool {
        if self.tx.send(delivery).is_err() {
            debug!("Result dispatcher dropped; discarding delivery");
            return false;
        }
        if let Some(waker) = &self.waker {
            waker();
        }
        true
    }
}

type ReadyCallback = Box<dyn FnMut(RequestorId, Arc<RgbaImage>)>;
type ErrorCallback = Box<dyn FnMut(RequestorId, &ThumbError)>;

/// Runs thumbnail callbacks on the thread that owns it.
///
/// The callbacks are not `Send`, which keeps the dispatcher (and anything
/// holding it) on the thread that created it.
pub struct ResultDispatcher {
    rx: Receiver<Delivery>,
    owner: ThreadId,
    on_ready: Option<ReadyCallback>,
    on_error: Option<ErrorCallback>,
}

impl fmt::Debug for ResultDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultDispatcher")
            .field("owner", &self.owner)
            .field("queued", &self.rx.len())
            .finish_non_exhaustive()
    }
}

impl ResultDispatcher {
    pub fn new() -> (Self, DeliverySender) {
        let (tx, rx) = unbounded();
        let dispatcher = Self {
            rx,
            owner: thread::current().id(),
            on_ready: None,
            on_error: None,
        };
        (dispatcher, DeliverySender { tx, waker: None })
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn on_ready(&mut self, callback: impl FnMut(RequestorId, Arc<RgbaImage>) + 'static) {
        self.on_ready = Some(Box::new(callback));
    }

    pub fn on_error(&mut self, callback: impl FnMut(RequestorId, &ThumbError) + 'static) {
        self.on_error = Some(Box::new(callback));
    }

    /// Run callbacks for everything already delivered. Returns how many
    /// callbacks ran.
    pub fn dispatch_pending(&mut self) -> usize {
        debug_assert_eq!(thread::current().id(), self.owner);
        let mut dispatched = 0;
        while let Ok(delivery) = self.rx.try_recv() {
            if self.dispatch(delivery) {
                dispatched += 1;
            }
        }
        dispatched
    }

    /// Wait up to `timeout` for the first delivery, then drain the rest.
    pub fn dispatch_timeout(&mut self, timeout: Duration) -> usize {
        debug_assert_eq!(thread::current().id(), self.owner);
        match self.rx.recv_timeout(timeout) {
            Ok(delivery) => usize::from(self.dispatch(delivery)) + self.dispatch_pending(),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => 0,
        }
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    fn dispatch(&mut self, delivery: Delivery) -> bool {
        let request = delivery.request;
        // Last cancellation checkpoint: the requestor may have moved on while
        // the result sat in the channel.
        if request.is_cancelled() {
            debug!("Dropping result of cancelled request for {}", request.requestor());
            return false;
        }
        match delivery.outcome {
            ThumbnailOutcome::Ready(bitmap) => match self.on_ready.as_mut() {
                Some(callback) => {
                    callback(request.requestor(), bitmap);
                    true
                }
                None => false,
            },
            ThumbnailOutcome::Failed(ThumbError::Superseded) => false,
            ThumbnailOutcome::Failed(err) => match self.on_error.as_mut() {
                Some(callback) => {
                    callback(request.requestor(), &err);
                    true
                }
                None => {
                    warn!("Unhandled thumbnail error for {}: {}", request.requestor(), err);
                    false
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::picture::{FilePicture, PictureId, PictureRef, Size};
    use crate::queue::{NewRequest, Priority, RequestQueue};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn popped_request(queue: &RequestQueue, requestor: u64) -> Arc<ThumbnailRequest> {
        let picture: Arc<dyn PictureRef> = Arc::new(FilePicture::new(PictureId(1), "a.jpg"));
        queue.submit(NewRequest::new(
            RequestorId(requestor),
            picture,
            Priority::High,
            Size::square(10),
        ));
        queue.pop_next_timeout(Duration::ZERO).unwrap()
    }

    #[test]
    fn test_ready_reaches_callback_on_owner_thread() {
        let queue = RequestQueue::new();
        let (mut dispatcher, sender) = ResultDispatcher::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        dispatcher.on_ready(move |requestor, bitmap| {
            sink.borrow_mut().push((requestor, bitmap.dimensions(), thread::current().id()));
        });

        let request = popped_request(&queue, 3);
        let worker = thread::spawn(move || {
            sender.send(Delivery {
                request,
                outcome: ThumbnailOutcome::Ready(Arc::new(RgbaImage::new(10, 5))),
            })
        });
        assert!(worker.join().unwrap());

        assert_eq!(dispatcher.dispatch_pending(), 1);
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, RequestorId(3));
        assert_eq!(seen[0].1, (10, 5));
        assert_eq!(seen[0].2, dispatcher.owner());
    }

    #[test]
    fn test_cancelled_results_are_dropped() {
        let queue = RequestQueue::new();
        let (mut dispatcher, sender) = ResultDispatcher::new();
        let calls = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&calls);
        dispatcher.on_ready(move |_, _| *counter.borrow_mut() += 1);

        let picture: Arc<dyn PictureRef> = Arc::new(FilePicture::new(PictureId(1), "a.jpg"));
        let handle = queue.submit(NewRequest::new(
            RequestorId(1),
            picture,
            Priority::High,
            Size::square(10),
        ));
        let request = queue.pop_next_timeout(Duration::ZERO).unwrap();
        sender.send(Delivery {
            request,
            outcome: ThumbnailOutcome::Ready(Arc::new(RgbaImage::new(1, 1))),
        });
        queue.cancel(&handle);

        assert_eq!(dispatcher.dispatch_pending(), 0);
        assert_eq!(*calls.borrow(), 0);
    }

    #[test]
    fn test_errors_and_superseded() {
        let queue = RequestQueue::new();
        let (mut dispatcher, sender) = ResultDispatcher::new();
        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&errors);
        dispatcher.on_error(move |_, err| sink.borrow_mut().push(err.kind()));

        sender.send(Delivery {
            request: popped_request(&queue, 1),
            outcome: ThumbnailOutcome::Failed(ThumbError::ScaleFailed("boom".into())),
        });
        sender.send(Delivery {
            request: popped_request(&queue, 2),
            outcome: ThumbnailOutcome::Failed(ThumbError::Superseded),
        });

        assert_eq!(dispatcher.dispatch_timeout(Duration::from_millis(50)), 1);
        assert_eq!(errors.borrow().as_slice(), &[crate::error::ErrorKind::ScaleFailed]);
    }

    #[test]
    fn test_waker_called_per_send() {
        let queue = RequestQueue::new();
        let (_dispatcher, sender) = ResultDispatcher::new();
        let wakes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&wakes);
        let sender = sender.with_waker(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for requestor in 0..3 {
            sender.send(Delivery {
                request: popped_request(&queue, requestor),
                outcome: ThumbnailOutcome::Ready(Arc::new(RgbaImage::new(1, 1))),
            });
        }
        assert_eq!(wakes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_send_after_dispatcher_dropped() {
        let queue = RequestQueue::new();
        let (dispatcher, sender) = ResultDispatcher::new();
        drop(dispatcher);
        assert!(!sender.send(Delivery {
            request: popped_request(&queue, 1),
            outcome: ThumbnailOutcome::Ready(Arc::new(RgbaImage::new(1, 1))),
        }));
    }

    #[test]
    fn test_dispatch_timeout_with_nothing_queued() {
        let (mut dispatcher, _sender) = ResultDispatcher::new();
        assert_eq!(dispatcher.dispatch_timeout(Duration::from_millis(5)), 0);
    }
}
