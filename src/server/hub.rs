//! Single capture session fanned out to every connected viewer.
//!
//! The camera can only be opened by one source at a time, so all `/video_feed`
//! connections share one `CaptureManager`, owned by a capture thread. That
//! thread encodes each frame once and publishes it into a latest-frame slot.
//! Subscribers wake on each publish and take the newest part. A slow viewer
//! simply misses intermediate frames; nobody queues and the capture thread
//! never waits on a client.
//!
//! The session starts with the first subscriber and stops when the last one
//! leaves or the stream ends. The next subscriber after that re-initializes
//! capture from the preferred tier.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::capture::CaptureManager;
use crate::config::CaptureConfig;
use crate::encode::{EncodedFrame, StreamEncoder};
use crate::ingest::SourceProvider;

/// Builds a fresh provider for each capture session.
pub type ProviderFactory = Arc<dyn Fn() -> Box<dyn SourceProvider> + Send + Sync>;

#[derive(Clone)]
pub struct FrameHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    config: CaptureConfig,
    encoder: StreamEncoder,
    providers: ProviderFactory,
    state: Mutex<HubState>,
    published: Condvar,
}

#[derive(Default)]
struct HubState {
    subscribers: usize,
    /// Id of the running capture session, if any.
    session: Option<u64>,
    next_session: u64,
    latest: Option<Published>,
    seq: u64,
    closing: bool,
    /// Thread of the most recently started session, joined before reopening.
    worker: Option<JoinHandle<()>>,
}

struct Published {
    session: u64,
    seq: u64,
    frame: Arc<EncodedFrame>,
}

impl FrameHub {
    pub fn new(config: CaptureConfig, encoder: StreamEncoder, providers: ProviderFactory) -> Self {
        Self {
            inner: Arc::new(HubInner {
                config,
                encoder,
                providers,
                state: Mutex::new(HubState::default()),
                published: Condvar::new(),
            }),
        }
    }

    /// Join the running session, starting one if none is live.
    pub fn subscribe(&self) -> Subscription {
        let mut state = self.inner.lock();
        state.subscribers += 1;
        let session = match state.session {
            Some(session) if !state.closing => session,
            _ => self.start_session(&mut state),
        };
        Subscription {
            inner: self.inner.clone(),
            session,
            last_seq: state.seq,
        }
    }

    pub fn subscribers(&self) -> usize {
        self.inner.lock().subscribers
    }

    pub fn is_capturing(&self) -> bool {
        self.inner.lock().session.is_some()
    }

    /// End every subscription and stop capture. Blocks until the capture
    /// thread has released the device.
    pub fn shutdown(&self) {
        let worker = {
            let mut state = self.inner.lock();
            state.closing = true;
            state.worker.take()
        };
        self.inner.published.notify_all();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                log::error!("FrameHub: capture thread panicked");
            }
        }
    }

    fn start_session(&self, state: &mut HubState) -> u64 {
        let session = state.next_session;
        state.next_session += 1;
        if state.closing {
            // Hand out an id that is already over.
            return session;
        }
        state.session = Some(session);
        state.latest = None;

        let previous = state.worker.take();
        let inner = self.inner.clone();
        state.worker = Some(std::thread::spawn(move || {
            if let Some(previous) = previous {
                let _ = previous.join();
            }
            run_session(&inner, session);
        }));
        log::info!(
            "FrameHub: starting capture session {} on {}",
            session,
            self.inner.config.device
        );
        session
    }
}

fn run_session(inner: &HubInner, session: u64) {
    let provider = (inner.providers)();
    let mut capture = match CaptureManager::with_provider(inner.config.clone(), provider) {
        Ok(capture) => capture,
        Err(err) => {
            log::error!(
                "FrameHub: session {}: camera {} unavailable",
                session,
                err.device()
            );
            inner.end_session(session);
            return;
        }
    };

    loop {
        if !inner.wanted(session) {
            log::info!(
                "FrameHub: session {} has no viewers; releasing {}",
                session,
                inner.config.device
            );
            break;
        }
        match capture.next_frame() {
            Ok(frame) => match inner.encoder.encode(&frame) {
                Ok(encoded) => inner.publish(session, encoded),
                Err(err) => log::warn!("FrameHub: skipping frame: {}", err),
            },
            Err(err) if err.is_terminal_end() => {
                log::info!("FrameHub: session {}: {}", session, err);
                break;
            }
            Err(err) => {
                log::error!(
                    "FrameHub: session {} lost camera {}: {}",
                    session,
                    err.device(),
                    err
                );
                break;
            }
        }
    }

    inner.end_session(session);
    let stats = capture.stats();
    capture.close();
    log::info!(
        "FrameHub: session {} closed after {} frames ({} tier, {} degrades)",
        session,
        stats.frames_captured,
        stats.tier,
        stats.degrades
    );
}

impl HubInner {
    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether the capture thread for `session` should keep going. Clears the
    /// session under the same lock when it should not, so no new subscriber
    /// can join a session that is about to stop.
    fn wanted(&self, session: u64) -> bool {
        let mut state = self.lock();
        if state.session != Some(session) {
            return false;
        }
        if state.subscribers == 0 || state.closing {
            state.session = None;
            state.latest = None;
            drop(state);
            self.published.notify_all();
            return false;
        }
        true
    }

    fn publish(&self, session: u64, frame: EncodedFrame) {
        let mut state = self.lock();
        if state.session != Some(session) {
            return;
        }
        state.seq += 1;
        state.latest = Some(Published {
            session,
            seq: state.seq,
            frame: Arc::new(frame),
        });
        drop(state);
        self.published.notify_all();
    }

    fn end_session(&self, session: u64) {
        let mut state = self.lock();
        if state.session == Some(session) {
            state.session = None;
            state.latest = None;
        }
        drop(state);
        self.published.notify_all();
    }
}

/// A viewer's handle on the shared session. Dropping it unsubscribes.
pub struct Subscription {
    inner: Arc<HubInner>,
    session: u64,
    last_seq: u64,
}

impl Subscription {
    /// Block until a frame newer than the last one returned is published.
    ///
    /// Returns `None` once the session has ended or the hub is shutting down.
    pub fn next_frame(&mut self) -> Option<Arc<EncodedFrame>> {
        let mut state = self.inner.lock();
        loop {
            if state.closing || state.session != Some(self.session) {
                return None;
            }
            if let Some(latest) = &state.latest {
                if latest.session == self.session && latest.seq > self.last_seq {
                    self.last_seq = latest.seq;
                    return Some(latest.frame.clone());
                }
            }
            state = self
                .inner
                .published
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    pub fn session(&self) -> u64 {
        self.session
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        state.subscribers = state.subscribers.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::DeviceProvider;

    fn hub(device: &str) -> FrameHub {
        FrameHub::new(
            CaptureConfig::new(device, 16, 12, 200),
            StreamEncoder::default(),
            Arc::new(|| Box::new(DeviceProvider) as Box<dyn SourceProvider>),
        )
    }

    #[test]
    fn subscribers_share_one_session_and_see_increasing_frames() {
        let hub = hub("stub://hub");
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        assert_eq!(a.session(), b.session());
        assert_eq!(hub.subscribers(), 2);

        let mut last = 0;
        for _ in 0..3 {
            assert!(a.next_frame().is_some());
            assert!(a.last_seq > last);
            last = a.last_seq;
        }
        assert!(b.next_frame().is_some());
        hub.shutdown();
        assert!(a.next_frame().is_none());
    }

    #[test]
    fn stream_end_finishes_subscribers_and_next_subscriber_restarts() {
        let hub = hub("stub://hub?frames=2");
        let mut first = hub.subscribe();
        let mut frames = 0;
        while first.next_frame().is_some() {
            frames += 1;
        }
        assert!(frames <= 2);
        drop(first);

        let second = hub.subscribe();
        assert_ne!(second.session(), 0);
        hub.shutdown();
    }

    #[test]
    fn unavailable_device_ends_subscription() {
        let hub = hub("stub://hub?preferred=fail&fallback=fail");
        let mut sub = hub.subscribe();
        assert!(sub.next_frame().is_none());
        hub.shutdown();
        assert!(!hub.is_capturing());
    }
}
