use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::{Condvar, Mutex};

use super::{NewRequest, Priority, RequestHandle, RequestorId, ThumbnailRequest};
use crate::picture::PictureId;

#[derive(Debug, Default)]
struct QueueState {
    /// Ordered by priority, then by submission order
    pending: BTreeMap<(Priority, u64), Arc<ThumbnailRequest>>,
    /// The pending request of each requestor
    by_requestor: HashMap<RequestorId, Arc<ThumbnailRequest>>,
    /// Requests a worker has popped and not yet completed
    in_flight: HashMap<RequestorId, Arc<ThumbnailRequest>>,
    next_seq: u64,
    shutdown: bool,
}

impl QueueState {
    fn remove_pending(&mut self, request: &Arc<ThumbnailRequest>) -> bool {
        let removed = self
            .pending
            .remove(&(request.priority(), request.seq()))
            .is_some();
        if let Some(current) = self.by_requestor.get(&request.requestor()) {
            if Arc::ptr_eq(current, request) {
                self.by_requestor.remove(&request.requestor());
            }
        }
        removed
    }

    fn insert(&mut self, request: NewRequest) -> Arc<ThumbnailRequest> {
        let request = Arc::new(ThumbnailRequest::new(request, self.next_seq));
        self.next_seq += 1;
        self.pending
            .insert((request.priority(), request.seq()), Arc::clone(&request));
        self.by_requestor
            .insert(request.requestor(), Arc::clone(&request));
        request
    }

    fn pop(&mut self) -> Option<Arc<ThumbnailRequest>> {
        while let Some((_, request)) = self.pending.pop_first() {
            if let Some(current) = self.by_requestor.get(&request.requestor()) {
                if Arc::ptr_eq(current, &request) {
                    self.by_requestor.remove(&request.requestor());
                }
            }
            if request.is_cancelled() {
                continue;
            }
            self.in_flight
                .insert(request.requestor(), Arc::clone(&request));
            return Some(request);
        }
        None
    }
}

/// Pending thumbnail requests, served highest priority first and in
/// submission order within a priority.
///
/// Each requestor has at most one live request: submitting again either
/// reuses the live one (same target) or cancels it.
#[derive(Debug, Default)]
pub struct RequestQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&self, request: NewRequest) -> RequestHandle {
        let mut state = self.state.lock();

        if let Some(existing) = state.by_requestor.get(&request.requestor).cloned() {
            if existing.same_target(&request) {
                if request.priority < existing.priority() {
                    state.remove_pending(&existing);
                    existing.set_priority(request.priority);
                    state
                        .pending
                        .insert((existing.priority(), existing.seq()), Arc::clone(&existing));
                    state
                        .by_requestor
                        .insert(existing.requestor(), Arc::clone(&existing));
                    debug!(
                        "Raised pending request of {} to {:?}",
                        request.requestor, request.priority
                    );
                }
                return RequestHandle(existing);
            }
            debug!("Superseding pending request of {}", request.requestor);
            existing.mark_cancelled();
            state.remove_pending(&existing);
        }

        if let Some(running) = state.in_flight.get(&request.requestor).cloned() {
            if !running.is_cancelled() && running.same_target(&request) {
                return RequestHandle(running);
            }
            debug!("Cancelling in-flight request of {}", request.requestor);
            running.mark_cancelled();
            state.in_flight.remove(&request.requestor);
        }

        let request = state.insert(request);
        drop(state);
        self.available.notify_one();
        RequestHandle(request)
    }

    /// Cancel a request. Returns true if it was still waiting in the queue;
    /// a running request only has its result suppressed.
    pub fn cancel(&self, handle: &RequestHandle) -> bool {
        let request = &handle.0;
        let mut state = self.state.lock();
        request.mark_cancelled();
        if let Some(running) = state.in_flight.get(&request.requestor()) {
            if Arc::ptr_eq(running, request) {
                state.in_flight.remove(&request.requestor());
            }
        }
        state.remove_pending(request)
    }

    /// Block until a request is available. `None` once the queue is shut down.
    pub fn pop_next(&self) -> Option<Arc<ThumbnailRequest>> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(request) = state.pop() {
                return Some(request);
            }
            self.available.wait(&mut state);
        }
    }

    /// Like [`pop_next`](Self::pop_next) but gives up after `timeout`.
    pub fn pop_next_timeout(&self, timeout: Duration) -> Option<Arc<ThumbnailRequest>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(request) = state.pop() {
                return Some(request);
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return if state.shutdown { None } else { state.pop() };
            }
        }
    }

    /// Called by the worker once it is done with `request`.
    pub fn complete(&self, request: &Arc<ThumbnailRequest>) {
        let mut state = self.state.lock();
        if let Some(running) = state.in_flight.get(&request.requestor()) {
            if Arc::ptr_eq(running, request) {
                state.in_flight.remove(&request.requestor());
            }
        }
    }

    /// Cancel every pending and running request for `picture`.
    pub fn cancel_picture(&self, picture: PictureId) -> usize {
        let mut state = self.state.lock();
        let pending: Vec<_> = state
            .pending
            .values()
            .filter(|r| r.picture().id() == picture)
            .cloned()
            .collect();
        for request in &pending {
            request.mark_cancelled();
            state.remove_pending(request);
        }
        let running: Vec<RequestorId> = state
            .in_flight
            .iter()
            .filter(|(_, r)| r.picture().id() == picture)
            .map(|(requestor, _)| *requestor)
            .collect();
        for requestor in &running {
            if let Some(request) = state.in_flight.remove(requestor) {
                request.mark_cancelled();
            }
        }
        pending.len() + running.len()
    }

    /// Cancel everything still waiting.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        for request in state.pending.values() {
            request.mark_cancelled();
        }
        state.pending.clear();
        state.by_requestor.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Wake every blocked worker and make all further pops return `None`.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        drop(state);
        self.available.notify_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shutdown
    }

    #[cfg(test)]
    fn lock(&self) -> parking_lot::MutexGuard<'_, QueueState> {
        self.state.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::picture::{FilePicture, PictureRef, Size};
    use std::thread;

    fn picture(id: u64) -> Arc<dyn PictureRef> {
        Arc::new(FilePicture::new(PictureId(id), format!("/photos/{}.jpg", id)))
    }

    fn request(requestor: u64, pic: &Arc<dyn PictureRef>, priority: Priority) -> NewRequest {
        NewRequest::new(
            RequestorId(requestor),
            Arc::clone(pic),
            priority,
            Size::square(100),
        )
    }

    #[test]
    fn test_priority_then_fifo() {
        let queue = RequestQueue::new();
        let (a, b, c) = (picture(1), picture(2), picture(3));
        queue.submit(request(1, &a, Priority::Low));
        queue.submit(request(2, &b, Priority::High));
        queue.submit(request(3, &c, Priority::High));

        let order: Vec<_> = std::iter::from_fn(|| queue.pop_next_timeout(Duration::ZERO))
            .map(|r| r.picture().id())
            .collect();
        assert_eq!(order, vec![PictureId(2), PictureId(3), PictureId(1)]);
    }

    #[test]
    fn test_duplicate_submission_raises_priority() {
        let queue = RequestQueue::new();
        let pic = picture(1);
        let other = picture(2);
        queue.submit(request(2, &other, Priority::Medium));
        let first = queue.submit(request(1, &pic, Priority::Lowest));
        let second = queue.submit(request(1, &pic, Priority::High));

        assert!(first.same_as(&second));
        assert_eq!(second.priority(), Priority::High);
        assert_eq!(queue.len(), 2);
        let next = queue.pop_next_timeout(Duration::ZERO).unwrap();
        assert_eq!(next.picture().id(), PictureId(1));
    }

    #[test]
    fn test_duplicate_never_lowers_priority() {
        let queue = RequestQueue::new();
        let pic = picture(1);
        queue.submit(request(1, &pic, Priority::High));
        let again = queue.submit(request(1, &pic, Priority::Lowest));
        assert_eq!(again.priority(), Priority::High);
    }

    #[test]
    fn test_new_target_supersedes_pending() {
        let queue = RequestQueue::new();
        let old = queue.submit(request(1, &picture(1), Priority::High));
        let new = queue.submit(request(1, &picture(2), Priority::Low));

        assert!(old.is_cancelled());
        assert!(!new.is_cancelled());
        assert_eq!(queue.len(), 1);
        let next = queue.pop_next_timeout(Duration::ZERO).unwrap();
        assert_eq!(next.picture().id(), PictureId(2));
    }

    #[test]
    fn test_forced_submission_replaces_pending() {
        let queue = RequestQueue::new();
        let pic = picture(1);
        let old = queue.submit(request(1, &pic, Priority::Low));
        let forced = queue.submit(request(1, &pic, Priority::High).force(true));
        assert!(!old.same_as(&forced));
        assert!(old.is_cancelled());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_in_flight_same_target_is_reused() {
        let queue = RequestQueue::new();
        let pic = picture(1);
        let handle = queue.submit(request(1, &pic, Priority::Low));
        let running = queue.pop_next_timeout(Duration::ZERO).unwrap();

        let again = queue.submit(request(1, &pic, Priority::High));
        assert!(again.same_as(&handle));
        assert!(queue.is_empty());
        queue.complete(&running);
        assert_eq!(queue.in_flight_count(), 0);
    }

    #[test]
    fn test_in_flight_other_target_is_cancelled() {
        let queue = RequestQueue::new();
        queue.submit(request(1, &picture(1), Priority::Low));
        let running = queue.pop_next_timeout(Duration::ZERO).unwrap();

        queue.submit(request(1, &picture(2), Priority::Low));
        assert!(running.is_cancelled());
        assert_eq!(queue.len(), 1);

        // Completing the stale request must not clobber the new bookkeeping
        let next = queue.pop_next_timeout(Duration::ZERO).unwrap();
        queue.complete(&running);
        assert_eq!(queue.in_flight_count(), 1);
        queue.complete(&next);
        assert_eq!(queue.in_flight_count(), 0);
    }

    #[test]
    fn test_cancel_before_pickup() {
        let queue = RequestQueue::new();
        let handle = queue.submit(request(1, &picture(1), Priority::High));

        assert!(queue.cancel(&handle));
        assert!(handle.is_cancelled());
        assert!(queue.pop_next_timeout(Duration::ZERO).is_none());
        assert!(!queue.cancel(&handle));
        assert!(queue.lock().by_requestor.is_empty());
    }

    #[test]
    fn test_cancel_running_suppresses_only() {
        let queue = RequestQueue::new();
        let handle = queue.submit(request(1, &picture(1), Priority::High));
        let _running = queue.pop_next_timeout(Duration::ZERO).unwrap();
        assert!(!queue.cancel(&handle));
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_cancel_picture() {
        let queue = RequestQueue::new();
        let shared = picture(7);
        queue.submit(request(1, &shared, Priority::High));
        let _running = queue.pop_next_timeout(Duration::ZERO).unwrap();
        let pending = queue.submit(request(2, &shared, Priority::Low));
        let unrelated = queue.submit(request(3, &picture(8), Priority::Low));

        assert_eq!(queue.cancel_picture(PictureId(7)), 2);
        assert!(pending.is_cancelled());
        assert!(!unrelated.is_cancelled());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.in_flight_count(), 0);
    }

    #[test]
    fn test_clear_cancels_pending() {
        let queue = RequestQueue::new();
        let a = queue.submit(request(1, &picture(1), Priority::High));
        let b = queue.submit(request(2, &picture(2), Priority::High));
        queue.clear();
        assert!(a.is_cancelled() && b.is_cancelled());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_shutdown_wakes_blocked_worker() {
        let queue = Arc::new(RequestQueue::new());
        let worker = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_next())
        };
        thread::sleep(Duration::from_millis(20));
        queue.shutdown();
        assert!(worker.join().unwrap().is_none());
        assert!(queue.is_shut_down());
    }

    #[test]
    fn test_blocked_worker_receives_submission() {
        let queue = Arc::new(RequestQueue::new());
        let worker = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_next().map(|r| r.picture().id()))
        };
        thread::sleep(Duration::from_millis(20));
        queue.submit(request(1, &picture(4), Priority::Low));
        assert_eq!(worker.join().unwrap(), Some(PictureId(4)));
    }

    #[test]
    fn test_pop_timeout_on_empty_queue() {
        let queue = RequestQueue::new();
        assert!(queue.pop_next_timeout(Duration::from_millis(5)).is_none());
    }
}
