//! Backend traits that a sensor transport implements.
//!
//! [`Driver`] is the per-device interface the pump and dispatcher threads
//! talk to. All methods are blocking and are only ever called with the
//! device mutex held, so implementations need no internal locking.

use crate::types::{DepthFormat, FrameMode, Led, Resolution, StreamKind, TiltState, VideoFormat};
use crate::Result;

/// Receiver for frames surfaced by [`Driver::pump_events`].
///
/// `data` borrows transport-owned storage and is only valid for the
/// duration of the call; implementations must copy out what they keep.
pub trait FrameSink {
    fn frame_ready(&mut self, stream: StreamKind, data: &[u8]);
}

/// Blocking transport interface to one physical sensor.
pub trait Driver: Send {
    /// Look up the mode table entry for a depth format.
    fn find_depth_mode(&self, format: DepthFormat) -> Option<FrameMode> {
        Some(FrameMode::depth(format))
    }

    /// Look up the mode table entry for a video resolution/format pair.
    fn find_video_mode(&self, resolution: Resolution, format: VideoFormat) -> Option<FrameMode> {
        FrameMode::video(resolution, format)
    }

    fn set_depth_mode(&mut self, mode: &FrameMode) -> Result<()>;
    fn set_video_mode(&mut self, mode: &FrameMode) -> Result<()>;

    fn start_depth(&mut self) -> Result<()>;
    fn stop_depth(&mut self) -> Result<()>;
    fn start_video(&mut self) -> Result<()>;
    fn stop_video(&mut self) -> Result<()>;

    /// Service the transport and invoke `sink` synchronously, on the
    /// calling thread, once per frame that arrived. Must return within
    /// roughly 100ms whether or not frames arrived, so stop and command
    /// paths are never starved of the device mutex.
    fn pump_events(&mut self, sink: &mut dyn FrameSink) -> Result<()>;

    /// Drive the tilt motor toward `degrees`. Returns once the command is
    /// accepted; motion completion is observed through
    /// [`query_tilt_state`](Driver::query_tilt_state).
    fn set_tilt_degrees(&mut self, degrees: f64) -> Result<()>;

    /// Read tilt angle, accelerometer and motor motion status.
    fn query_tilt_state(&mut self) -> Result<TiltState>;

    fn set_led(&mut self, led: Led) -> Result<()>;
}

/// Factory that opens drivers by device index. The session it represents
/// stays alive as long as the backend does; dropping it after all drivers
/// are closed shuts the session down.
pub trait DriverBackend: Send + 'static {
    fn open(&mut self, index: i32, subdevices: crate::types::Subdevices)
        -> Result<Box<dyn Driver>>;
}
