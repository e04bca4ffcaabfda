mod common;

use common::{mock, SharedMock};
use freesense::{
    CancelToken, DepthFormat, Device, DeviceEvent, Led, Resolution, SensorError, StreamKind,
    Subdevices, TiltState, VideoFormat,
};
use std::time::Duration;

const DEPTH_LEN: usize = 640 * 480 * 2;

fn open_device() -> (Device, SharedMock) {
    let (backend, state) = mock();
    let device = Device::open_sync(backend, 0, Subdevices::default()).unwrap();
    (device, state)
}

fn settle() {
    std::thread::sleep(Duration::from_millis(100));
}

#[test]
fn burst_of_frames_coalesces_into_one_event() {
    let (device, state) = open_device();
    state.lock().unwrap().pump_batches.push_back(vec![
        (StreamKind::Depth, vec![1u8; DEPTH_LEN]),
        (StreamKind::Depth, vec![2u8; DEPTH_LEN]),
        (StreamKind::Depth, vec![3u8; DEPTH_LEN]),
    ]);
    device.start_depth_stream(DepthFormat::Depth11Bit).unwrap();
    settle();

    assert_eq!(device.try_next_event(), Some(DeviceEvent::DepthFrameReady));
    assert_eq!(device.try_next_event(), None);

    // The accessor sees the newest frame of the burst.
    let frame = device.depth_frame_raw().unwrap();
    assert_eq!(frame.data().len(), DEPTH_LEN);
    assert!(frame.data().iter().all(|&b| b == 3));
    drop(frame);

    device.stop_depth_stream().unwrap();
}

#[test]
fn depth_grayscale_conversion() {
    let (device, state) = open_device();
    // every 11-bit sample at midscale (1024)
    let mut raw = vec![0u8; DEPTH_LEN];
    for px in raw.chunks_exact_mut(2) {
        px.copy_from_slice(&1024u16.to_le_bytes());
    }
    state
        .lock()
        .unwrap()
        .pump_batches
        .push_back(vec![(StreamKind::Depth, raw)]);
    device.start_depth_stream(DepthFormat::Depth11Bit).unwrap();
    settle();

    assert_eq!(device.try_next_event(), Some(DeviceEvent::DepthFrameReady));
    let frame = device.depth_frame_grayscale().unwrap();
    assert_eq!(frame.data().len(), 640 * 480 * 3);
    assert!(frame.data().iter().all(|&b| b == 128));
}

#[test]
fn starting_a_started_stream_fails_without_side_effects() {
    let (device, state) = open_device();
    device.start_depth_stream(DepthFormat::Depth11Bit).unwrap();
    assert!(matches!(
        device.start_depth_stream(DepthFormat::Depth10Bit),
        Err(SensorError::AlreadyStarted(StreamKind::Depth))
    ));
    assert_eq!(
        device
            .stream_mode(StreamKind::Depth)
            .and_then(|m| m.depth_format),
        Some(DepthFormat::Depth11Bit)
    );
    assert!(state.lock().unwrap().depth_running);

    device.stop_depth_stream().unwrap();
    assert!(matches!(
        device.stop_depth_stream(),
        Err(SensorError::NotStarted(StreamKind::Depth))
    ));
}

#[test]
fn concurrent_stop_and_start_keeps_the_pump_alive() {
    let (device, state) = open_device();
    device.start_depth_stream(DepthFormat::Depth11Bit).unwrap();

    // Race a depth stop against a video start. Whichever order they
    // land in, the surviving stream must still have a pump feeding it.
    let device = std::sync::Arc::new(device);
    let stopper = {
        let device = device.clone();
        std::thread::spawn(move || device.stop_depth_stream().unwrap())
    };
    device
        .start_video_stream(Resolution::Medium, VideoFormat::Rgb)
        .unwrap();
    stopper.join().unwrap();

    state
        .lock()
        .unwrap()
        .pump_batches
        .push_back(vec![(StreamKind::Video, vec![7u8; 640 * 480 * 3])]);
    assert_eq!(
        device.next_event_timeout(Duration::from_secs(1)),
        Some(DeviceEvent::VideoFrameReady)
    );

    device.stop_video_stream().unwrap();
}

#[test]
fn failed_depth_start_can_be_retried() {
    let (device, state) = open_device();
    state.lock().unwrap().fail_start_depth = true;
    assert!(matches!(
        device.start_depth_stream(DepthFormat::Depth11Bit),
        Err(SensorError::OperationFailed(_))
    ));
    // The failed attempt leaves nothing started behind.
    assert!(device.stream_mode(StreamKind::Depth).is_none());

    state.lock().unwrap().fail_start_depth = false;
    state
        .lock()
        .unwrap()
        .pump_batches
        .push_back(vec![(StreamKind::Depth, vec![1u8; DEPTH_LEN])]);
    device.start_depth_stream(DepthFormat::Depth11Bit).unwrap();
    assert_eq!(
        device.next_event_timeout(Duration::from_secs(1)),
        Some(DeviceEvent::DepthFrameReady)
    );

    device.stop_depth_stream().unwrap();
}

#[test]
fn unknown_video_mode_is_rejected() {
    let (device, _state) = open_device();
    assert!(matches!(
        device.start_video_stream(Resolution::Low, VideoFormat::Rgb),
        Err(SensorError::InvalidArgument(_))
    ));
    assert!(matches!(
        device.start_video_stream(Resolution::High, VideoFormat::YuvRaw),
        Err(SensorError::InvalidArgument(_))
    ));
}

#[test]
fn small_tilt_move_completes_without_motor_traffic() {
    let (device, state) = open_device();
    device.set_tilt_angle(0.5, None).wait().unwrap();
    settle();
    assert!(state.lock().unwrap().tilt_commands.is_empty());
}

#[test]
fn tilt_completes_when_motor_stops() {
    let (device, state) = open_device();
    let moving = |m| TiltState {
        tilt_degrees: 15.0,
        accelerometer: (0.0, -1.0, 0.0),
        moving: m,
    };
    {
        let mut s = state.lock().unwrap();
        s.scripted_states.push_back(Ok(moving(true)));
        s.scripted_states.push_back(Ok(moving(false)));
    }

    let op = device.set_tilt_angle(15.0, None);
    let id = op.id();
    assert_eq!(
        device.next_event_timeout(Duration::from_secs(2)),
        Some(DeviceEvent::OperationComplete(id))
    );
    op.try_take().unwrap().unwrap();
    assert_eq!(state.lock().unwrap().tilt_commands, vec![15.0]);
}

#[test]
fn tilt_clamps_to_mechanical_range() {
    let (device, state) = open_device();
    {
        let mut s = state.lock().unwrap();
        s.scripted_states.push_back(Ok(TiltState {
            tilt_degrees: 31.0,
            accelerometer: (0.0, -1.0, 0.0),
            moving: true,
        }));
    }
    device.set_tilt_angle_sync(100.0).unwrap();
    assert_eq!(state.lock().unwrap().tilt_commands, vec![31.0]);
}

#[test]
fn second_tilt_while_pending_is_refused() {
    let (device, state) = open_device();
    // motor keeps reporting motion, so the first operation stays in flight
    state.lock().unwrap().resting_state.moving = true;

    let op1 = device.set_tilt_angle(20.0, None);
    settle();
    let op2 = device.set_tilt_angle(-20.0, None);
    assert!(matches!(op2.wait(), Err(SensorError::OperationPending(_))));

    // requests inside the dead band of the in-flight target are refused
    // too, not short-circuited to success
    let op3 = device.set_tilt_angle(20.0, None);
    assert!(matches!(op3.wait(), Err(SensorError::OperationPending(_))));
    let op4 = device.set_tilt_angle(19.5, None);
    assert!(matches!(op4.wait(), Err(SensorError::OperationPending(_))));

    // the refusal leaves the first operation alone
    state.lock().unwrap().resting_state.moving = false;
    op1.wait().unwrap();
    assert_eq!(state.lock().unwrap().tilt_commands, vec![20.0]);
}

#[test]
fn dropping_the_device_cancels_pending_operations() {
    let (device, state) = open_device();
    {
        let mut s = state.lock().unwrap();
        s.resting_state.moving = true;
        s.query_delay = Duration::from_millis(300);
    }

    let tilt = device.set_tilt_angle(20.0, None);
    // dispatcher is now inside a slow state poll; these queries queue up
    std::thread::sleep(Duration::from_millis(50));
    let q1 = device.query_tilt_state(None);
    let q2 = device.query_tilt_state(None);
    let q3 = device.query_tilt_state(None);

    drop(device);
    assert!(matches!(tilt.wait(), Err(SensorError::Cancelled(_))));
    for q in [q1, q2, q3] {
        assert!(matches!(q.wait(), Err(SensorError::Cancelled(_))));
    }
}

#[test]
fn state_query_failure_fails_the_tilt_operation() {
    let (device, state) = open_device();
    state
        .lock()
        .unwrap()
        .scripted_states
        .push_back(Err("bus fault".into()));
    let op = device.set_tilt_angle(10.0, None);
    assert!(matches!(op.wait(), Err(SensorError::StateQueryFailed(_))));
}

#[test]
fn tilt_state_query_reports_accelerometer() {
    let (device, state) = open_device();
    state.lock().unwrap().resting_state = TiltState {
        tilt_degrees: -5.0,
        accelerometer: (0.1, -0.9, 0.2),
        moving: false,
    };

    let sampled = device.query_tilt_state(None).wait().unwrap();
    assert_eq!(sampled.tilt_degrees, -5.0);
    assert_eq!(sampled.accelerometer, (0.1, -0.9, 0.2));
    assert!(!sampled.moving);

    assert_eq!(device.tilt_angle().unwrap(), -5.0);
    assert_eq!(device.accelerometer().unwrap(), (0.1, -0.9, 0.2));
}

#[test]
fn cancelling_removes_queued_state_queries() {
    let (device, state) = open_device();
    state.lock().unwrap().query_delay = Duration::from_millis(300);
    let token = CancelToken::new();

    // occupies the dispatcher in a slow poll
    let first = device.query_tilt_state(None);
    std::thread::sleep(Duration::from_millis(50));

    let q1 = device.query_tilt_state(Some(&token));
    let q2 = device.query_tilt_state(Some(&token));
    token.cancel();

    assert!(matches!(q1.wait(), Err(SensorError::Cancelled(_))));
    assert!(matches!(q2.wait(), Err(SensorError::Cancelled(_))));
    first.wait().unwrap();
}

#[test]
fn cancelling_a_finished_operation_is_a_noop() {
    let (device, _state) = open_device();
    let token = CancelToken::new();
    let op = device.query_tilt_state(Some(&token));
    op.wait().unwrap();
    token.cancel();
}

#[test]
fn led_commands_are_serialized_in_order() {
    let (device, state) = open_device();
    device.set_led_sync(Led::Green).unwrap();
    device.set_led_sync(Led::BlinkGreen).unwrap();
    device.set_led_sync(Led::Off).unwrap();
    assert_eq!(
        state.lock().unwrap().led_commands,
        vec![Led::Green, Led::BlinkGreen, Led::Off]
    );
}

#[test]
fn open_can_be_cancelled_up_front() {
    let (backend, _state) = mock();
    let token = CancelToken::new();
    token.cancel();
    let op = Device::open(backend, 0, Subdevices::default(), Some(&token));
    assert!(matches!(op.wait(), Err(SensorError::Cancelled(_))));
}

#[test]
fn open_failure_surfaces_the_backend_error() {
    let (mut backend, _state) = mock();
    backend.fail_open = true;
    assert!(matches!(
        Device::open_sync(backend, 0, Subdevices::default()),
        Err(SensorError::NotInitialized(_))
    ));
}

#[test]
fn close_stops_running_streams() {
    let (device, state) = open_device();
    device.start_depth_stream(DepthFormat::Depth11Bit).unwrap();
    drop(device);
    assert!(!state.lock().unwrap().depth_running);
}
