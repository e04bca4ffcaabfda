#![allow(dead_code)]

//! Scriptable in-memory transport for device tests.

use freesense::{
    Driver, DriverBackend, FrameMode, FrameSink, Led, Result, SensorError, StreamKind, Subdevices,
    TiltState,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type SharedMock = Arc<Mutex<MockState>>;

pub struct MockState {
    /// Each entry is one `pump_events` call's worth of frames.
    pub pump_batches: VecDeque<Vec<(StreamKind, Vec<u8>)>>,
    /// Scripted tilt-state poll results, consumed front to back.
    pub scripted_states: VecDeque<std::result::Result<TiltState, String>>,
    /// Returned once the script runs out.
    pub resting_state: TiltState,
    /// Artificial latency for every state poll.
    pub query_delay: Duration,
    pub tilt_commands: Vec<f64>,
    pub led_commands: Vec<Led>,
    pub depth_running: bool,
    pub video_running: bool,
    /// Make the next `start_depth` calls fail.
    pub fail_start_depth: bool,
}

impl Default for MockState {
    fn default() -> Self {
        MockState {
            pump_batches: VecDeque::new(),
            scripted_states: VecDeque::new(),
            resting_state: TiltState {
                tilt_degrees: 0.0,
                accelerometer: (0.0, -1.0, 0.0),
                moving: false,
            },
            query_delay: Duration::ZERO,
            tilt_commands: Vec::new(),
            led_commands: Vec::new(),
            depth_running: false,
            video_running: false,
            fail_start_depth: false,
        }
    }
}

pub struct MockBackend {
    state: SharedMock,
    pub fail_open: bool,
}

pub fn mock() -> (MockBackend, SharedMock) {
    let state = Arc::new(Mutex::new(MockState::default()));
    (
        MockBackend {
            state: state.clone(),
            fail_open: false,
        },
        state,
    )
}

impl DriverBackend for MockBackend {
    fn open(&mut self, index: i32, _subdevices: Subdevices) -> Result<Box<dyn Driver>> {
        if self.fail_open {
            return Err(SensorError::NotInitialized(format!(
                "no mock device at index {index}"
            )));
        }
        Ok(Box::new(MockDriver {
            state: self.state.clone(),
        }))
    }
}

pub struct MockDriver {
    state: SharedMock,
}

impl Driver for MockDriver {
    fn set_depth_mode(&mut self, _mode: &FrameMode) -> Result<()> {
        Ok(())
    }

    fn set_video_mode(&mut self, _mode: &FrameMode) -> Result<()> {
        Ok(())
    }

    fn start_depth(&mut self) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        if s.fail_start_depth {
            return Err(SensorError::OperationFailed(
                "depth engine refused to start".into(),
            ));
        }
        s.depth_running = true;
        Ok(())
    }

    fn stop_depth(&mut self) -> Result<()> {
        self.state.lock().unwrap().depth_running = false;
        Ok(())
    }

    fn start_video(&mut self) -> Result<()> {
        self.state.lock().unwrap().video_running = true;
        Ok(())
    }

    fn stop_video(&mut self) -> Result<()> {
        self.state.lock().unwrap().video_running = false;
        Ok(())
    }

    fn pump_events(&mut self, sink: &mut dyn FrameSink) -> Result<()> {
        let batch = self.state.lock().unwrap().pump_batches.pop_front();
        match batch {
            Some(frames) => {
                for (kind, data) in frames {
                    sink.frame_ready(kind, &data);
                }
            }
            None => std::thread::sleep(Duration::from_millis(5)),
        }
        Ok(())
    }

    fn set_tilt_degrees(&mut self, degrees: f64) -> Result<()> {
        self.state.lock().unwrap().tilt_commands.push(degrees);
        Ok(())
    }

    fn query_tilt_state(&mut self) -> Result<TiltState> {
        let (delay, scripted, resting) = {
            let mut s = self.state.lock().unwrap();
            (s.query_delay, s.scripted_states.pop_front(), s.resting_state)
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        match scripted {
            Some(Ok(state)) => Ok(state),
            Some(Err(msg)) => Err(SensorError::OperationFailed(msg)),
            None => Ok(resting),
        }
    }

    fn set_led(&mut self, led: Led) -> Result<()> {
        self.state.lock().unwrap().led_commands.push(led);
        Ok(())
    }
}
