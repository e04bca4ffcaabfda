//! Sweep the tilt motor between two angles, driving everything through
//! the event loop instead of blocking waits.

use freesense::{CancelToken, Device, DeviceEvent, MotorBackend, Subdevices};
use std::time::Duration;

const SWEEPS: usize = 4;
const ANGLES: [f64; 2] = [-15.0, 15.0];

fn main() -> freesense::Result<()> {
    env_logger::init();

    let backend = MotorBackend::new()?;
    let cancel = CancelToken::new();
    let device = Device::open(backend, 0, Subdevices::MOTOR, Some(&cancel)).wait()?;

    let mut pending = device.set_tilt_angle(ANGLES[0], Some(&cancel));
    let mut sweep = 0;

    while sweep < SWEEPS {
        let Some(event) = device.next_event_timeout(Duration::from_secs(10)) else {
            eprintln!("motor did not settle in time");
            cancel.cancel();
            break;
        };
        match event {
            DeviceEvent::OperationComplete(id) if id == pending.id() => {
                if let Some(result) = pending.try_take() {
                    result?;
                }
                let state = device.query_tilt_state(None).wait()?;
                println!(
                    "sweep {}: settled at {:+.1} deg, accel ({:+.2}, {:+.2}, {:+.2}) g",
                    sweep,
                    state.tilt_degrees,
                    state.accelerometer.0,
                    state.accelerometer.1,
                    state.accelerometer.2
                );
                sweep += 1;
                if sweep < SWEEPS {
                    pending = device.set_tilt_angle(ANGLES[sweep % 2], Some(&cancel));
                }
            }
            other => println!("ignoring {other:?}"),
        }
    }

    device.set_tilt_angle_sync(0.0)?;
    Ok(())
}
