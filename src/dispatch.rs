//! Motor command dispatcher thread.
//!
//! Tilt, LED, and state-query requests are funneled through one thread so
//! motor traffic never interleaves. Each cycle applies at most one tilt
//! and one LED command, then polls the tilt state once if anyone is
//! waiting on it: a pending tilt completes on the moving-to-stopped edge,
//! and every queued state query completes with the same snapshot.

use crate::driver::Driver;
use crate::ops::Completer;
use crate::types::{Led, TiltState};
use crate::{Result, SensorError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const CYCLE: Duration = Duration::from_millis(5);

/// Request slots shared between submitters and the dispatcher.
#[derive(Default)]
pub(crate) struct DispatchShared {
    /// Target angle not yet written to the motor.
    pub tilt_request: Option<f64>,
    pub led_request: Option<Led>,
    /// At most one tilt operation may be in flight.
    pub set_tilt: Option<Completer<()>>,
    pub set_led: Option<Completer<()>>,
    pub state_queries: Vec<Completer<TiltState>>,
    /// Motor observed moving on the previous poll.
    pub tilt_moving: bool,
    pub abort: bool,
}

pub(crate) fn spawn(
    driver: Arc<Mutex<Box<dyn Driver>>>,
    dispatch: Arc<Mutex<DispatchShared>>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("freesense-dispatch".into())
        .spawn(move || run(driver, dispatch))
        .map_err(|e| {
            SensorError::OperationFailed(format!("failed to spawn dispatch thread: {e}"))
        })
}

fn run(driver: Arc<Mutex<Box<dyn Driver>>>, dispatch: Arc<Mutex<DispatchShared>>) {
    log::trace!("dispatch thread started");
    loop {
        // Snapshot the cycle's work up front; queries submitted while the
        // hardware phase runs wait for the next cycle.
        let (tilt_request, led_request, queries, want_poll) = {
            let mut d = dispatch.lock().unwrap();
            if d.abort {
                break;
            }
            let queries: Vec<_> = d.state_queries.drain(..).collect();
            let want_poll = d.set_tilt.is_some() || !queries.is_empty();
            (d.tilt_request.take(), d.led_request.take(), queries, want_poll)
        };

        if tilt_request.is_none() && led_request.is_none() && !want_poll {
            thread::sleep(CYCLE);
            continue;
        }

        // Talk to the hardware without holding the request lock.
        let mut tilt_cmd_err = None;
        let mut led_result = None;
        let mut poll_result: Option<std::result::Result<TiltState, String>> = None;
        {
            let mut drv = driver.lock().unwrap();
            if let Some(degrees) = tilt_request {
                log::trace!("applying tilt request: {degrees} degrees");
                if let Err(e) = drv.set_tilt_degrees(degrees) {
                    tilt_cmd_err = Some(e.to_string());
                }
            }
            if let Some(led) = led_request {
                log::trace!("applying led request: {led:?}");
                led_result = Some(drv.set_led(led).map_err(|e| e.to_string()));
            }
            if want_poll {
                poll_result = Some(drv.query_tilt_state().map_err(|e| e.to_string()));
            }
        }

        let mut d = dispatch.lock().unwrap();
        if let Some(msg) = tilt_cmd_err {
            match d.set_tilt.take() {
                Some(c) => c.complete(Err(SensorError::OperationFailed(msg))),
                // cancelled mid-flight; the failure still gets surfaced
                None => log::warn!("tilt command failed: {msg}"),
            }
            d.tilt_moving = false;
        }
        if let Some(result) = led_result {
            match (d.set_led.take(), result) {
                (Some(c), result) => c.complete(result.map_err(SensorError::OperationFailed)),
                (None, Err(msg)) => log::warn!("led command failed: {msg}"),
                (None, Ok(())) => {}
            }
        }
        match poll_result {
            Some(Ok(state)) => {
                if d.set_tilt.is_some() {
                    if d.tilt_moving && !state.moving {
                        if let Some(c) = d.set_tilt.take() {
                            c.complete(Ok(()));
                        }
                    }
                    d.tilt_moving = state.moving;
                }
                for c in queries {
                    c.complete(Ok(state));
                }
            }
            Some(Err(msg)) => {
                if let Some(c) = d.set_tilt.take() {
                    c.complete(Err(SensorError::StateQueryFailed(msg.clone())));
                }
                d.tilt_moving = false;
                for c in queries {
                    c.complete(Err(SensorError::StateQueryFailed(msg.clone())));
                }
            }
            None => debug_assert!(queries.is_empty()),
        }
        drop(d);

        thread::sleep(CYCLE);
    }
    log::trace!("dispatch thread exiting");
}
