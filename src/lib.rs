//! Rust SDK for Kinect-class USB depth sensors.
//!
//! A [`Device`] bundles the sensor's two frame streams (depth and video),
//! the tilt motor, the front LED, and the accelerometer behind one
//! thread-safe handle. Two worker threads do the heavy lifting: a pump
//! that services the transport and copies frames out, and a dispatcher
//! that serializes motor traffic. The consumer runs a plain event loop
//! over [`Device::next_event`]; frames coalesce under load and every
//! asynchronous operation completes through a [`Operation`] handle that
//! can be waited on or matched against `OperationComplete` events.
//!
//! # Example
//!
//! ```no_run
//! use freesense::{Device, MotorBackend, Subdevices};
//!
//! fn main() -> freesense::Result<()> {
//!     let backend = MotorBackend::new()?;
//!     let device = Device::open_sync(backend, 0, Subdevices::MOTOR)?;
//!     device.set_tilt_angle_sync(15.0)?;
//!     println!("tilt is now {} degrees", device.tilt_angle()?);
//!     Ok(())
//! }
//! ```

mod convert;
mod device;
mod dispatch;
mod driver;
mod error;
mod ops;
mod pump;
mod types;
mod usb;

pub use device::{Device, DeviceEvent, Frame};
pub use driver::{Driver, DriverBackend, FrameSink};
pub use error::SensorError;
pub use ops::{CancelToken, OpId, Operation};
pub use types::{
    DepthFormat, FrameMode, Led, Resolution, StreamKind, Subdevices, TiltState, VideoFormat,
    TILT_MAX_DEGREES, TILT_MIN_DEGREES,
};
pub use usb::{MotorBackend, MotorDriver};

pub type Result<T> = std::result::Result<T, SensorError>;
