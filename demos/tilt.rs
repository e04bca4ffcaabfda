//! Move the tilt motor to the angle given on the command line.
//!
//! Usage: cargo run --example tilt -- <degrees>

use freesense::{Device, Led, MotorBackend, Subdevices};

fn main() -> freesense::Result<()> {
    env_logger::init();

    let degrees: f64 = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(0.0);

    let backend = MotorBackend::new()?;
    let device = Device::open_sync(backend, 0, Subdevices::MOTOR)?;

    let state = device.query_tilt_state(None).wait()?;
    println!(
        "tilt {:+.1} deg, accel ({:+.2}, {:+.2}, {:+.2}) g, moving: {}",
        state.tilt_degrees,
        state.accelerometer.0,
        state.accelerometer.1,
        state.accelerometer.2,
        state.moving
    );

    device.set_led_sync(Led::BlinkGreen)?;
    println!("moving to {degrees:+.1} deg");
    device.set_tilt_angle_sync(degrees)?;
    device.set_led_sync(Led::Green)?;
    println!("done, tilt now {:+.1} deg", device.tilt_angle()?);
    Ok(())
}
