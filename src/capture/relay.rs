//! Frame relay: capture thread -> latest-frame cache + one subscriber.
//!
//! Every delivered frame first replaces the single-slot cache (a handle swap
//! under its own lock), then is offered to the current subscription through a
//! bounded channel. The capture thread never blocks on the consumer: when the
//! queue is full the frame is dropped (late frames are discarded) and the
//! cache still holds it for on-demand crops.

use anyhow::{Context, Result};
use image::RgbImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::frame::{crop_normalized, Frame};
use crate::geometry::NormalizedRect;

/// Default subscriber queue depth (frames).
pub const DEFAULT_QUEUE_DEPTH: usize = 4;

pub struct FrameRelay {
    latest: Mutex<Option<Frame>>,
    subscriber: Mutex<Option<Subscriber>>,
    queue_depth: usize,
    generation: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

struct Subscriber {
    generation: u64,
    tx: SyncSender<Frame>,
}

/// Relay counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub frames_received: u64,
    pub frames_dropped: u64,
}

impl FrameRelay {
    pub fn new(queue_depth: usize) -> Arc<Self> {
        Arc::new(Self {
            latest: Mutex::new(None),
            subscriber: Mutex::new(None),
            queue_depth: queue_depth.max(1),
            generation: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    /// Output handle given to a camera device.
    pub fn sink(self: &Arc<Self>) -> FrameSink {
        FrameSink {
            relay: Arc::clone(self),
        }
    }

    /// Snapshot of the most recent frame, if any.
    pub fn latest_frame(&self) -> Option<Frame> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Crop a region out of the most recent frame.
    ///
    /// The cache lock covers only the handle copy; cropping runs after it is
    /// released.
    pub fn crop_latest(&self, rect: &NormalizedRect) -> Option<RgbImage> {
        let frame = self.latest_frame()?;
        crop_normalized(frame.image(), rect)
    }

    /// Replace the subscriber. The previous subscription's channel closes.
    pub fn subscribe(&self) -> FrameSubscription {
        let (tx, rx) = mpsc::sync_channel(self.queue_depth);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        *self
            .subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Subscriber { generation, tx });
        FrameSubscription { rx }
    }

    /// Subscribe and drive `consumer` from a dedicated delivery thread.
    ///
    /// The thread exits when the subscription is replaced or the relay drops.
    pub fn on_frame<F>(&self, mut consumer: F) -> Result<JoinHandle<()>>
    where
        F: FnMut(Frame) + Send + 'static,
    {
        let subscription = self.subscribe();
        std::thread::Builder::new()
            .name("frame-delivery".into())
            .spawn(move || {
                for frame in subscription.iter() {
                    consumer(frame);
                }
                log::debug!("frame delivery thread exiting");
            })
            .context("spawn frame delivery thread")
    }

    /// Close the current subscription, if any.
    pub fn unsubscribe(&self) {
        self.subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            frames_received: self.delivered.load(Ordering::Relaxed),
            frames_dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn publish(&self, frame: Frame) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        {
            let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
            *latest = Some(frame.clone());
        }

        let current = self
            .subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|sub| (sub.generation, sub.tx.clone()));
        let Some((generation, tx)) = current else {
            return;
        };

        match tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::debug!(
                    "subscriber lagging; dropped frame #{} ({} dropped total)",
                    frame.sequence,
                    dropped
                );
            }
            Err(TrySendError::Disconnected(_)) => {
                let mut subscriber = self
                    .subscriber
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                // Only clear it if nobody re-subscribed meanwhile.
                if subscriber
                    .as_ref()
                    .is_some_and(|sub| sub.generation == generation)
                {
                    *subscriber = None;
                }
            }
        }
    }
}

/// Output side handed to camera devices. Cloneable across capture threads.
#[derive(Clone)]
pub struct FrameSink {
    relay: Arc<FrameRelay>,
}

impl FrameSink {
    /// Called from the capture thread for every new frame.
    pub fn deliver(&self, frame: Frame) {
        self.relay.publish(frame);
    }
}

/// Receiving end of a relay subscription.
pub struct FrameSubscription {
    rx: Receiver<Frame>,
}

impl FrameSubscription {
    /// Block for the next frame; `None` once the subscription is closed.
    pub fn recv(&self) -> Option<Frame> {
        self.rx.recv().ok()
    }

    /// Wait up to `timeout`; `None` on timeout or close.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Frame> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<Frame> {
        match self.rx.try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Frame> + '_ {
        self.rx.iter()
    }
}
