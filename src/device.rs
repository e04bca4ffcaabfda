//! Device façade: construction, streams, motor, and the event loop.

use crate::convert;
use crate::dispatch::{self, DispatchShared};
use crate::driver::{Driver, DriverBackend};
use crate::ops::{self, CancelToken, Completer, OpId, Operation, Wakeup};
use crate::pump::{self, StreamShared};
use crate::types::{
    DepthFormat, FrameMode, Led, Resolution, StreamKind, Subdevices, TiltState, VideoFormat,
    TILT_MAX_DEGREES, TILT_MIN_DEGREES,
};
use crate::{Result, SensorError};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Events delivered to the consumer's loop through
/// [`Device::next_event`] and friends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A depth frame is ready; fetch it with a depth frame accessor.
    /// Frames arriving faster than the consumer claims them coalesce
    /// into one event.
    DepthFrameReady,
    /// A video frame is ready.
    VideoFrameReady,
    /// The operation with this id completed; claim its result from the
    /// matching [`Operation`] handle.
    OperationComplete(OpId),
}

/// Read guard over one frame.
///
/// Holds the stream lock, so incoming frames are deferred (not dropped)
/// while the guard lives. Keep the borrow short.
pub struct Frame<'a> {
    guard: MutexGuard<'a, StreamShared>,
    source: FrameSource,
    mode: FrameMode,
}

enum FrameSource {
    Depth,
    Video,
    Scratch(usize),
}

impl Frame<'_> {
    pub fn data(&self) -> &[u8] {
        match self.source {
            FrameSource::Depth => &self.guard.depth.buffer,
            FrameSource::Video => &self.guard.video.buffer,
            FrameSource::Scratch(len) => &self.guard.scratch[..len],
        }
    }

    pub fn mode(&self) -> &FrameMode {
        &self.mode
    }
}

/// Handle to one open sensor.
///
/// All methods take `&self`; the handle can be shared behind an `Arc`
/// with the event loop running on one thread and commands issued from
/// others. Dropping (or [`close`](Device::close)) stops both worker
/// threads, cancels pending operations, and releases the transport.
pub struct Device {
    // Declaration order matters: the driver must drop before the backend
    // that owns its session.
    driver: Arc<Mutex<Box<dyn Driver>>>,
    _backend: Mutex<Box<dyn DriverBackend>>,
    streams: Arc<Mutex<StreamShared>>,
    dispatch: Arc<Mutex<DispatchShared>>,
    events_tx: Sender<Wakeup>,
    events_rx: Receiver<Wakeup>,
    pump_abort: Arc<AtomicBool>,
    pump_thread: Mutex<Option<JoinHandle<()>>>,
    dispatch_thread: Mutex<Option<JoinHandle<()>>>,
    /// Last requested tilt angle, used for the small-move short circuit.
    tilt_target: Mutex<f64>,
    index: i32,
    subdevices: Subdevices,
}

impl Device {
    /// Open device `index` through `backend` asynchronously.
    ///
    /// The transport is opened on a worker thread; the returned handle
    /// completes with the ready [`Device`]. `cancel` aborts the open at
    /// its checkpoints; a device already opened by then is released.
    pub fn open<B: DriverBackend>(
        backend: B,
        index: i32,
        subdevices: Subdevices,
        cancel: Option<&CancelToken>,
    ) -> Operation<Device> {
        let (op, completer) = ops::pair(None);
        let token = cancel.cloned();
        let spawned = thread::Builder::new()
            .name("freesense-open".into())
            .spawn(move || open_worker(Box::new(backend), index, subdevices, token, completer));
        if let Err(e) = spawned {
            // The completer was moved into the failed closure and is
            // gone; surface the error through a fresh handle.
            return ops::completed(
                None,
                Err(SensorError::OperationFailed(format!(
                    "failed to spawn open thread: {e}"
                ))),
            );
        }
        op
    }

    /// Blocking variant of [`open`](Device::open).
    pub fn open_sync<B: DriverBackend>(
        backend: B,
        index: i32,
        subdevices: Subdevices,
    ) -> Result<Device> {
        Device::open(backend, index, subdevices, None).wait()
    }

    pub fn index(&self) -> i32 {
        self.index
    }

    pub fn subdevices(&self) -> Subdevices {
        self.subdevices
    }

    // ---- streams ----

    /// Negotiate `format` and start the depth stream.
    pub fn start_depth_stream(&self, format: DepthFormat) -> Result<()> {
        let mut driver = self.driver.lock().unwrap();
        {
            let streams = self.streams.lock().unwrap();
            if streams.depth.started {
                return Err(SensorError::AlreadyStarted(StreamKind::Depth));
            }
        }
        let mode = driver
            .find_depth_mode(format)
            .ok_or_else(|| SensorError::InvalidArgument(format!("no depth mode for {format:?}")))?;
        driver.set_depth_mode(&mode)?;
        driver.start_depth()?;
        // Secure the pump before the stream counts as started, so a
        // failed start leaves nothing running and can simply be retried.
        if let Err(e) = self.start_pump_and_mark(StreamKind::Depth, mode) {
            if let Err(stop_err) = driver.stop_depth() {
                log::warn!("failed to unwind depth stream after pump failure: {stop_err}");
            }
            return Err(e);
        }
        drop(driver);
        log::info!("depth stream started: {format:?}, {} bytes/frame", mode.length);
        Ok(())
    }

    /// Negotiate the mode and start the video stream. Fails with
    /// `InvalidArgument` when the sensor has no mode for the pair.
    pub fn start_video_stream(&self, resolution: Resolution, format: VideoFormat) -> Result<()> {
        let mut driver = self.driver.lock().unwrap();
        {
            let streams = self.streams.lock().unwrap();
            if streams.video.started {
                return Err(SensorError::AlreadyStarted(StreamKind::Video));
            }
        }
        let mode = driver
            .find_video_mode(resolution, format)
            .ok_or_else(|| {
                SensorError::InvalidArgument(format!("no video mode for {resolution:?}/{format:?}"))
            })?;
        driver.set_video_mode(&mode)?;
        driver.start_video()?;
        if let Err(e) = self.start_pump_and_mark(StreamKind::Video, mode) {
            if let Err(stop_err) = driver.stop_video() {
                log::warn!("failed to unwind video stream after pump failure: {stop_err}");
            }
            return Err(e);
        }
        drop(driver);
        log::info!(
            "video stream started: {resolution:?}/{format:?}, {} bytes/frame",
            mode.length
        );
        Ok(())
    }

    pub fn stop_depth_stream(&self) -> Result<()> {
        self.stop_stream(StreamKind::Depth)
    }

    pub fn stop_video_stream(&self) -> Result<()> {
        self.stop_stream(StreamKind::Video)
    }

    fn stop_stream(&self, kind: StreamKind) -> Result<()> {
        let mut driver = self.driver.lock().unwrap();
        {
            let streams = self.streams.lock().unwrap();
            if !streams.stream(kind).started {
                return Err(SensorError::NotStarted(kind));
            }
        }
        match kind {
            StreamKind::Depth => driver.stop_depth()?,
            StreamKind::Video => driver.stop_video()?,
        }
        {
            let mut streams = self.streams.lock().unwrap();
            let st = streams.stream_mut(kind);
            st.started = false;
            st.frame_pending = false;
            // A stale wakeup may still sit in the queue; the claim loop
            // skips it once frame_pending is clear.
            st.notify_queued = false;
        }
        // The pump blocks on the driver lock, so release it before joining.
        drop(driver);
        self.stop_pump_if_idle();
        log::info!("{kind:?} stream stopped");
        Ok(())
    }

    /// Mode of the running stream, if started.
    pub fn stream_mode(&self, kind: StreamKind) -> Option<FrameMode> {
        let streams = self.streams.lock().unwrap();
        let st = streams.stream(kind);
        if st.started {
            st.mode
        } else {
            None
        }
    }

    // ---- frame access ----

    /// Borrow the latest raw depth frame.
    pub fn depth_frame_raw(&self) -> Result<Frame<'_>> {
        let guard = self.streams.lock().unwrap();
        let mode = started_mode(&guard, StreamKind::Depth)?;
        Ok(Frame {
            guard,
            source: FrameSource::Depth,
            mode,
        })
    }

    /// Borrow the latest depth frame converted to 8-bit grayscale RGB.
    pub fn depth_frame_grayscale(&self) -> Result<Frame<'_>> {
        let mut guard = self.streams.lock().unwrap();
        let mode = started_mode(&guard, StreamKind::Depth)?;
        let shared = &mut *guard;
        let len = convert::depth_to_grayscale_rgb(&mode, &shared.depth.buffer, &mut shared.scratch)?;
        Ok(Frame {
            guard,
            source: FrameSource::Scratch(len),
            mode,
        })
    }

    /// Borrow the latest raw video frame.
    pub fn video_frame_raw(&self) -> Result<Frame<'_>> {
        let guard = self.streams.lock().unwrap();
        let mode = started_mode(&guard, StreamKind::Video)?;
        Ok(Frame {
            guard,
            source: FrameSource::Video,
            mode,
        })
    }

    /// Borrow the latest video frame as RGB. RGB-shaped formats pass
    /// through; 8-bit IR expands by channel replication; other formats
    /// are unsupported.
    pub fn video_frame_rgb(&self) -> Result<Frame<'_>> {
        let mut guard = self.streams.lock().unwrap();
        let mode = started_mode(&guard, StreamKind::Video)?;
        let format = mode
            .video_format
            .ok_or(SensorError::Unsupported("video frame without a format"))?;
        if convert::video_is_rgb(format) {
            return Ok(Frame {
                guard,
                source: FrameSource::Video,
                mode,
            });
        }
        match format {
            VideoFormat::Ir8Bit => {
                let shared = &mut *guard;
                let len = convert::ir8_to_rgb(&shared.video.buffer, &mut shared.scratch)?;
                Ok(Frame {
                    guard,
                    source: FrameSource::Scratch(len),
                    mode,
                })
            }
            _ => Err(SensorError::Unsupported(
                "rgb conversion of this video format",
            )),
        }
    }

    // ---- motor and led ----

    /// Drive the tilt motor to `degrees` (clamped to the mechanical
    /// range). Completes once the motor stops. At most one tilt operation
    /// may be in flight; with none in flight, moves of one degree or less
    /// complete immediately without touching the motor.
    pub fn set_tilt_angle(&self, degrees: f64, cancel: Option<&CancelToken>) -> Operation<()> {
        let degrees = degrees.clamp(TILT_MIN_DEGREES, TILT_MAX_DEGREES);
        let mut target = self.tilt_target.lock().unwrap();
        let op = {
            let mut d = self.dispatch.lock().unwrap();
            // The pending check comes first: while a move is in flight
            // every new request is refused, dead band or not.
            if d.set_tilt.is_some() {
                return ops::completed(
                    Some(self.events_tx.clone()),
                    Err(SensorError::OperationPending("set tilt")),
                );
            }
            if (degrees - *target).abs() <= 1.0 {
                return ops::completed(Some(self.events_tx.clone()), Ok(()));
            }
            let (op, completer) = ops::pair(Some(self.events_tx.clone()));
            d.set_tilt = Some(completer);
            d.tilt_request = Some(degrees);
            d.tilt_moving = false;
            op
        };
        *target = degrees;
        drop(target);
        if let Err(e) = self.ensure_dispatcher() {
            let mut d = self.dispatch.lock().unwrap();
            d.tilt_request = None;
            if let Some(c) = d.set_tilt.take() {
                c.complete(Err(e));
            }
            return op;
        }
        if let Some(token) = cancel {
            self.hook_tilt_cancel(token, op.id());
        }
        op
    }

    /// Blocking variant of [`set_tilt_angle`](Device::set_tilt_angle).
    pub fn set_tilt_angle_sync(&self, degrees: f64) -> Result<()> {
        self.set_tilt_angle(degrees, None).wait()
    }

    /// Set the front LED. Serialized through the dispatcher like tilt;
    /// at most one LED operation may be in flight.
    pub fn set_led(&self, led: Led, cancel: Option<&CancelToken>) -> Operation<()> {
        let op = {
            let mut d = self.dispatch.lock().unwrap();
            if d.set_led.is_some() {
                return ops::completed(
                    Some(self.events_tx.clone()),
                    Err(SensorError::OperationPending("set led")),
                );
            }
            let (op, completer) = ops::pair(Some(self.events_tx.clone()));
            d.set_led = Some(completer);
            d.led_request = Some(led);
            op
        };
        if let Err(e) = self.ensure_dispatcher() {
            let mut d = self.dispatch.lock().unwrap();
            d.led_request = None;
            if let Some(c) = d.set_led.take() {
                c.complete(Err(e));
            }
            return op;
        }
        if let Some(token) = cancel {
            self.hook_led_cancel(token, op.id());
        }
        op
    }

    /// Blocking variant of [`set_led`](Device::set_led).
    pub fn set_led_sync(&self, led: Led) -> Result<()> {
        self.set_led(led, None).wait()
    }

    /// Sample tilt angle, motion status, and accelerometer through the
    /// dispatcher. Any number of queries may be outstanding; queries
    /// sharing a dispatcher cycle share one hardware poll.
    pub fn query_tilt_state(&self, cancel: Option<&CancelToken>) -> Operation<TiltState> {
        let op = {
            let mut d = self.dispatch.lock().unwrap();
            let (op, completer) = ops::pair(Some(self.events_tx.clone()));
            d.state_queries.push(completer);
            op
        };
        if let Err(e) = self.ensure_dispatcher() {
            let mut d = self.dispatch.lock().unwrap();
            if let Some(pos) = d.state_queries.iter().position(|c| c.id() == op.id()) {
                let c = d.state_queries.swap_remove(pos);
                c.complete(Err(e));
            }
            return op;
        }
        if let Some(token) = cancel {
            self.hook_query_cancel(token, op.id());
        }
        op
    }

    /// Current tilt angle in degrees, polled directly from the device.
    pub fn tilt_angle(&self) -> Result<f64> {
        let mut driver = self.driver.lock().unwrap();
        Ok(driver.query_tilt_state()?.tilt_degrees)
    }

    /// Accelerometer reading in g, polled directly from the device.
    pub fn accelerometer(&self) -> Result<(f64, f64, f64)> {
        let mut driver = self.driver.lock().unwrap();
        Ok(driver.query_tilt_state()?.accelerometer)
    }

    // ---- event loop ----

    /// Block until the next event.
    pub fn next_event(&self) -> DeviceEvent {
        loop {
            // Device owns a sender, so recv cannot disconnect.
            let Ok(wakeup) = self.events_rx.recv() else {
                unreachable!("event queue disconnected while device alive")
            };
            if let Some(event) = self.claim(wakeup) {
                return event;
            }
        }
    }

    /// Wait up to `timeout` for the next event.
    pub fn next_event_timeout(&self, timeout: Duration) -> Option<DeviceEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            let remaining = deadline.checked_duration_since(now)?;
            let Ok(wakeup) = self.events_rx.recv_timeout(remaining) else {
                return None;
            };
            if let Some(event) = self.claim(wakeup) {
                return Some(event);
            }
        }
    }

    /// Return the next event if one is already queued.
    pub fn try_next_event(&self) -> Option<DeviceEvent> {
        while let Ok(wakeup) = self.events_rx.try_recv() {
            if let Some(event) = self.claim(wakeup) {
                return Some(event);
            }
        }
        None
    }

    fn claim(&self, wakeup: Wakeup) -> Option<DeviceEvent> {
        match wakeup {
            Wakeup::Op(id) => Some(DeviceEvent::OperationComplete(id)),
            Wakeup::Frame(kind) => {
                let mut streams = self.streams.lock().unwrap();
                let st = streams.stream_mut(kind);
                st.notify_queued = false;
                if !st.frame_pending {
                    // Coalesced away or the stream stopped meanwhile.
                    return None;
                }
                st.frame_pending = false;
                Some(match kind {
                    StreamKind::Depth => DeviceEvent::DepthFrameReady,
                    StreamKind::Video => DeviceEvent::VideoFrameReady,
                })
            }
        }
    }

    // ---- teardown ----

    /// Stop both worker threads, cancel pending operations, and release
    /// the transport. Equivalent to dropping the device.
    pub fn close(self) {}

    fn shutdown(&mut self) {
        log::debug!("shutting down device {}", self.index);

        self.stop_pump();

        {
            let mut d = self.dispatch.lock().unwrap();
            d.abort = true;
        }
        if let Some(handle) = self.dispatch_thread.lock().unwrap().take() {
            let _ = handle.join();
        }

        // Cancel whatever the dispatcher left behind.
        {
            let mut d = self.dispatch.lock().unwrap();
            if let Some(c) = d.set_tilt.take() {
                c.complete(Err(SensorError::Cancelled("set tilt")));
            }
            if let Some(c) = d.set_led.take() {
                c.complete(Err(SensorError::Cancelled("set led")));
            }
            for c in d.state_queries.drain(..) {
                c.complete(Err(SensorError::Cancelled("state query")));
            }
            d.tilt_request = None;
            d.led_request = None;
        }

        let mut driver = self.driver.lock().unwrap();
        {
            let mut streams = self.streams.lock().unwrap();
            if streams.depth.started {
                if let Err(e) = driver.stop_depth() {
                    log::warn!("failed to stop depth stream on close: {e}");
                }
                streams.depth.started = false;
            }
            if streams.video.started {
                if let Err(e) = driver.stop_video() {
                    log::warn!("failed to stop video stream on close: {e}");
                }
                streams.video.started = false;
            }
        }
    }

    fn stop_pump(&self) {
        self.pump_abort.store(true, Ordering::SeqCst);
        if let Some(handle) = self.pump_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Join the pump only if no stream is running. Holds the thread slot
    /// across the check so a concurrent stream start either reuses the
    /// still-live pump or spawns a fresh one after the join, never
    /// neither.
    fn stop_pump_if_idle(&self) {
        let mut slot = self.pump_thread.lock().unwrap();
        {
            let streams = self.streams.lock().unwrap();
            if streams.depth.started || streams.video.started {
                return;
            }
        }
        self.pump_abort.store(true, Ordering::SeqCst);
        if let Some(handle) = slot.take() {
            let _ = handle.join();
        }
    }

    /// Make sure the pump is running, then mark `kind` started, all under
    /// the pump slot lock so [`stop_pump_if_idle`](Device::stop_pump_if_idle)
    /// cannot interleave between the two.
    fn start_pump_and_mark(&self, kind: StreamKind, mode: FrameMode) -> Result<()> {
        let mut slot = self.pump_thread.lock().unwrap();
        if slot.is_none() {
            self.pump_abort.store(false, Ordering::SeqCst);
            *slot = Some(pump::spawn(
                self.driver.clone(),
                self.streams.clone(),
                self.pump_abort.clone(),
                self.events_tx.clone(),
            )?);
        }
        let mut streams = self.streams.lock().unwrap();
        let st = streams.stream_mut(kind);
        st.started = true;
        st.mode = Some(mode);
        st.buffer.clear();
        st.buffer.resize(mode.length, 0);
        st.frame_pending = false;
        st.notify_queued = false;
        Ok(())
    }

    fn ensure_dispatcher(&self) -> Result<()> {
        let mut slot = self.dispatch_thread.lock().unwrap();
        if slot.is_none() {
            *slot = Some(dispatch::spawn(self.driver.clone(), self.dispatch.clone())?);
        }
        Ok(())
    }

    // Cancellation takes the matching completer out of its slot; the
    // dispatcher finding the slot empty simply has nothing to complete.
    // A tilt request already written to the motor keeps moving.

    fn hook_tilt_cancel(&self, token: &CancelToken, id: OpId) {
        let weak = Arc::downgrade(&self.dispatch);
        token.on_cancel(move || {
            if let Some(c) = take_tilt(&weak, id) {
                c.complete(Err(SensorError::Cancelled("set tilt")));
            }
        });
    }

    fn hook_led_cancel(&self, token: &CancelToken, id: OpId) {
        let weak = Arc::downgrade(&self.dispatch);
        token.on_cancel(move || {
            if let Some(c) = take_led(&weak, id) {
                c.complete(Err(SensorError::Cancelled("set led")));
            }
        });
    }

    fn hook_query_cancel(&self, token: &CancelToken, id: OpId) {
        let weak = Arc::downgrade(&self.dispatch);
        token.on_cancel(move || {
            if let Some(c) = take_query(&weak, id) {
                c.complete(Err(SensorError::Cancelled("state query")));
            }
        });
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn started_mode(shared: &StreamShared, kind: StreamKind) -> Result<FrameMode> {
    let st = shared.stream(kind);
    if !st.started {
        return Err(SensorError::NotStarted(kind));
    }
    st.mode.ok_or(SensorError::NotStarted(kind))
}

fn take_tilt(weak: &Weak<Mutex<DispatchShared>>, id: OpId) -> Option<Completer<()>> {
    let dispatch = weak.upgrade()?;
    let mut d = dispatch.lock().unwrap();
    if d.set_tilt.as_ref().map(Completer::id) == Some(id) {
        d.set_tilt.take()
    } else {
        None
    }
}

fn take_led(weak: &Weak<Mutex<DispatchShared>>, id: OpId) -> Option<Completer<()>> {
    let dispatch = weak.upgrade()?;
    let mut d = dispatch.lock().unwrap();
    if d.set_led.as_ref().map(Completer::id) == Some(id) {
        d.set_led.take()
    } else {
        None
    }
}

fn take_query(weak: &Weak<Mutex<DispatchShared>>, id: OpId) -> Option<Completer<TiltState>> {
    let dispatch = weak.upgrade()?;
    let mut d = dispatch.lock().unwrap();
    let pos = d.state_queries.iter().position(|c| c.id() == id)?;
    Some(d.state_queries.swap_remove(pos))
}

fn open_worker(
    mut backend: Box<dyn DriverBackend>,
    index: i32,
    subdevices: Subdevices,
    cancel: Option<CancelToken>,
    completer: Completer<Device>,
) {
    let cancelled = || cancel.as_ref().is_some_and(CancelToken::is_cancelled);

    if cancelled() {
        completer.complete(Err(SensorError::Cancelled("open")));
        return;
    }

    let mut driver = match backend.open(index, subdevices) {
        Ok(driver) => driver,
        Err(e) => {
            completer.complete(Err(e));
            return;
        }
    };

    if cancelled() {
        drop(driver);
        completer.complete(Err(SensorError::Cancelled("open")));
        return;
    }

    // Seed the tilt target so the small-move short circuit is measured
    // against the physical angle rather than zero.
    let mut tilt_target = 0.0;
    if subdevices.contains(Subdevices::MOTOR) {
        match driver.query_tilt_state() {
            Ok(state) => tilt_target = state.tilt_degrees,
            Err(e) => log::warn!("initial tilt state query failed: {e}"),
        }
    }

    if cancelled() {
        drop(driver);
        completer.complete(Err(SensorError::Cancelled("open")));
        return;
    }

    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let device = Device {
        driver: Arc::new(Mutex::new(driver)),
        _backend: Mutex::new(backend),
        streams: Arc::new(Mutex::new(StreamShared::new())),
        dispatch: Arc::new(Mutex::new(DispatchShared::default())),
        events_tx,
        events_rx,
        pump_abort: Arc::new(AtomicBool::new(false)),
        pump_thread: Mutex::new(None),
        dispatch_thread: Mutex::new(None),
        tilt_target: Mutex::new(tilt_target),
        index,
        subdevices,
    };
    log::info!("device {index} opened with {subdevices:?}");
    completer.complete(Ok(device));
}
