//! Stream pump thread.
//!
//! One thread per device services the transport with
//! [`Driver::pump_events`] while at least one stream runs. Frames are
//! copied into per-stream buffers under the stream lock; the consumer is
//! woken through the event queue with at most one outstanding wakeup per
//! stream, so a slow consumer sees coalesced frames instead of a growing
//! queue.

use crate::driver::{Driver, FrameSink};
use crate::ops::Wakeup;
use crate::types::{FrameMode, StreamKind};
use crate::{Result, SensorError};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Bookkeeping for one stream.
pub(crate) struct StreamState {
    pub started: bool,
    pub mode: Option<FrameMode>,
    /// Latest complete frame, sized to `mode.length` while started.
    pub buffer: Vec<u8>,
    /// A frame arrived since the consumer last claimed one.
    pub frame_pending: bool,
    /// A wakeup for this stream is already sitting in the event queue.
    pub notify_queued: bool,
}

impl StreamState {
    fn new() -> StreamState {
        StreamState {
            started: false,
            mode: None,
            buffer: Vec::new(),
            frame_pending: false,
            notify_queued: false,
        }
    }
}

/// Frame state shared between the pump thread and the consumer.
pub(crate) struct StreamShared {
    pub depth: StreamState,
    pub video: StreamState,
    /// Conversion output, sized for the largest RGB frame the sensor
    /// can produce (1280x1024, 3 bytes per pixel).
    pub scratch: Vec<u8>,
}

impl StreamShared {
    pub(crate) fn new() -> StreamShared {
        StreamShared {
            depth: StreamState::new(),
            video: StreamState::new(),
            scratch: vec![0u8; 1280 * 1024 * 3],
        }
    }

    pub(crate) fn stream_mut(&mut self, kind: StreamKind) -> &mut StreamState {
        match kind {
            StreamKind::Depth => &mut self.depth,
            StreamKind::Video => &mut self.video,
        }
    }

    pub(crate) fn stream(&self, kind: StreamKind) -> &StreamState {
        match kind {
            StreamKind::Depth => &self.depth,
            StreamKind::Video => &self.video,
        }
    }
}

struct PumpSink<'a> {
    streams: &'a Mutex<StreamShared>,
    events_tx: &'a Sender<Wakeup>,
}

impl FrameSink for PumpSink<'_> {
    fn frame_ready(&mut self, kind: StreamKind, data: &[u8]) {
        let mut shared = self.streams.lock().unwrap();
        let st = shared.stream_mut(kind);
        if !st.started {
            return;
        }
        if data.len() != st.buffer.len() {
            log::warn!(
                "dropping {:?} frame of {} bytes, expected {}",
                kind,
                data.len(),
                st.buffer.len()
            );
            return;
        }
        st.buffer.copy_from_slice(data);
        st.frame_pending = true;
        if !st.notify_queued {
            st.notify_queued = true;
            let _ = self.events_tx.send(Wakeup::Frame(kind));
        }
    }
}

pub(crate) fn spawn(
    driver: Arc<Mutex<Box<dyn Driver>>>,
    streams: Arc<Mutex<StreamShared>>,
    abort: Arc<AtomicBool>,
    events_tx: Sender<Wakeup>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("freesense-pump".into())
        .spawn(move || run(driver, streams, abort, events_tx))
        .map_err(|e| SensorError::OperationFailed(format!("failed to spawn pump thread: {e}")))
}

fn run(
    driver: Arc<Mutex<Box<dyn Driver>>>,
    streams: Arc<Mutex<StreamShared>>,
    abort: Arc<AtomicBool>,
    events_tx: Sender<Wakeup>,
) {
    log::trace!("pump thread started");
    while !abort.load(Ordering::SeqCst) {
        let mut sink = PumpSink {
            streams: &streams,
            events_tx: &events_tx,
        };
        // pump_events returns within ~100ms, so the driver mutex is
        // released often enough for commands and stop requests.
        let result = { driver.lock().unwrap().pump_events(&mut sink) };
        if let Err(e) = result {
            log::warn!("event pump failed: {e}");
            thread::sleep(Duration::from_millis(10));
        }
    }
    log::trace!("pump thread exiting");
}
