//! USB transport for the tilt motor subdevice.
//!
//! The motor, LED, and accelerometer live on their own USB function
//! (045e:02b0) and are driven entirely through control transfers. This
//! backend covers that function only; camera streaming needs the full
//! isochronous stack and is reported as unsupported here.

use crate::driver::{Driver, DriverBackend, FrameSink};
use crate::types::{FrameMode, Led, Subdevices, TiltState};
use crate::{Result, SensorError};
use rusb::{Context, DeviceHandle, UsbContext};
use std::time::Duration;

const MOTOR_VID: u16 = 0x045e;
const MOTOR_PID: u16 = 0x02b0;

const REQ_SET_LED: u8 = 0x06;
const REQ_SET_TILT: u8 = 0x31;
const REQ_GET_STATE: u8 = 0x32;

// bmRequestType: vendor, device
const OUT_VENDOR: u8 = 0x40;
const IN_VENDOR: u8 = 0xc0;

const CTRL_TIMEOUT: Duration = Duration::from_millis(500);

/// Accelerometer counts per g.
const COUNTS_PER_G: f64 = 819.0;

const STATUS_MOVING: u8 = 0x04;

/// Opens [`MotorDriver`]s over libusb.
pub struct MotorBackend {
    context: Context,
}

impl MotorBackend {
    pub fn new() -> Result<MotorBackend> {
        Ok(MotorBackend {
            context: Context::new()?,
        })
    }
}

impl DriverBackend for MotorBackend {
    fn open(&mut self, index: i32, subdevices: Subdevices) -> Result<Box<dyn Driver>> {
        if !subdevices.contains(Subdevices::MOTOR) {
            return Err(SensorError::InvalidArgument(
                "motor backend requires the MOTOR subdevice".into(),
            ));
        }
        if index < 0 {
            return Err(SensorError::InvalidArgument(format!(
                "negative device index {index}"
            )));
        }
        let device = self
            .context
            .devices()?
            .iter()
            .filter(|d| {
                d.device_descriptor()
                    .map(|desc| desc.vendor_id() == MOTOR_VID && desc.product_id() == MOTOR_PID)
                    .unwrap_or(false)
            })
            .nth(index as usize)
            .ok_or_else(|| {
                SensorError::NotInitialized(format!("no tilt motor at index {index}"))
            })?;
        let handle = device.open()?;
        handle.claim_interface(0)?;
        log::debug!(
            "opened tilt motor {index} on bus {:03} address {:03}",
            device.bus_number(),
            device.address()
        );
        Ok(Box::new(MotorDriver { handle }))
    }
}

/// Control-transfer driver for the tilt motor function.
pub struct MotorDriver {
    handle: DeviceHandle<Context>,
}

impl Driver for MotorDriver {
    fn set_depth_mode(&mut self, _mode: &FrameMode) -> Result<()> {
        Err(SensorError::Unsupported("depth streaming on the motor backend"))
    }

    fn set_video_mode(&mut self, _mode: &FrameMode) -> Result<()> {
        Err(SensorError::Unsupported("video streaming on the motor backend"))
    }

    fn start_depth(&mut self) -> Result<()> {
        Err(SensorError::Unsupported("depth streaming on the motor backend"))
    }

    fn stop_depth(&mut self) -> Result<()> {
        Err(SensorError::Unsupported("depth streaming on the motor backend"))
    }

    fn start_video(&mut self) -> Result<()> {
        Err(SensorError::Unsupported("video streaming on the motor backend"))
    }

    fn stop_video(&mut self) -> Result<()> {
        Err(SensorError::Unsupported("video streaming on the motor backend"))
    }

    fn pump_events(&mut self, _sink: &mut dyn FrameSink) -> Result<()> {
        Err(SensorError::Unsupported("streaming on the motor backend"))
    }

    fn set_tilt_degrees(&mut self, degrees: f64) -> Result<()> {
        // The device takes the angle in half-degree steps.
        let half_degrees = (degrees * 2.0).round() as i16;
        self.handle.write_control(
            OUT_VENDOR,
            REQ_SET_TILT,
            half_degrees as u16,
            0,
            &[],
            CTRL_TIMEOUT,
        )?;
        Ok(())
    }

    fn query_tilt_state(&mut self) -> Result<TiltState> {
        let mut buf = [0u8; 10];
        let n = self
            .handle
            .read_control(IN_VENDOR, REQ_GET_STATE, 0, 0, &mut buf, CTRL_TIMEOUT)?;
        if n < buf.len() {
            return Err(SensorError::StateQueryFailed(format!(
                "short state read: {n} bytes"
            )));
        }
        let accel = |hi: u8, lo: u8| i16::from_be_bytes([hi, lo]) as f64 / COUNTS_PER_G;
        Ok(TiltState {
            tilt_degrees: buf[8] as i8 as f64 / 2.0,
            accelerometer: (
                accel(buf[2], buf[3]),
                accel(buf[4], buf[5]),
                accel(buf[6], buf[7]),
            ),
            moving: buf[9] == STATUS_MOVING,
        })
    }

    fn set_led(&mut self, led: Led) -> Result<()> {
        self.handle
            .write_control(OUT_VENDOR, REQ_SET_LED, led as u16, 0, &[], CTRL_TIMEOUT)?;
        Ok(())
    }
}

impl Drop for MotorDriver {
    fn drop(&mut self) {
        let _ = self.handle.release_interface(0);
    }
}
