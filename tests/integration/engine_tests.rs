//! End-to-end engine tests
//!
//! These run the real dispatcher and presence poller threads against the
//! in-memory appliance and observe the engine only through its event stream.

use cronus_link::core::config::EngineConfig;
use cronus_link::core::info::{DeviceState, FirmwareVersion};
use cronus_link::core::settings::DeviceSettings;
use cronus_link::hid::{CmCommand, CronusDevice, MockAppliance, MockTransport, Personality};
use cronus_link::{CommandFailure, CommandFamily, DeviceEvent, DeviceInfo, FailureReason};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

const WAIT: Duration = Duration::from_secs(5);

type Events = UnboundedReceiver<DeviceEvent>;

fn fast_config() -> EngineConfig {
    EngineConfig {
        read_timeout_ms: 20,
        poll_interval_ms: 10,
        api_frame_interval_us: 1220,
        exit_settle_ms: 1,
    }
}

fn running() -> (MockAppliance, CronusDevice<MockTransport>, Events) {
    let appliance = MockAppliance::new();
    let device = CronusDevice::new(appliance.transport(), fast_config());
    let events = device.subscribe();
    device.start();
    (appliance, device, events)
}

fn connected() -> (MockAppliance, CronusDevice<MockTransport>, Events) {
    let (appliance, device, mut events) = running();
    appliance.plug(Personality::Normal);
    wait_ready(&mut events);
    (appliance, device, events)
}

/// Block until `pick` accepts an event
fn wait_for<T>(events: &mut Events, mut pick: impl FnMut(DeviceEvent) -> Option<T>) -> T {
    tokio_test::block_on(async {
        tokio::time::timeout(WAIT, async {
            loop {
                let event = events.recv().await.expect("event stream closed");
                if let Some(value) = pick(event) {
                    return value;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    })
}

fn wait_ready(events: &mut Events) -> DeviceInfo {
    wait_for(events, |event| match event {
        DeviceEvent::InfoChanged(info) if info.is_ready() => Some(info),
        _ => None,
    })
}

fn wait_state(events: &mut Events, state: DeviceState) -> DeviceInfo {
    wait_for(events, |event| match event {
        DeviceEvent::InfoChanged(info) if info.state == state => Some(info),
        _ => None,
    })
}

fn wait_failure(events: &mut Events, command: CommandFamily) -> CommandFailure {
    wait_for(events, |event| match event {
        DeviceEvent::CommandFailed(failure) if failure.command == command => Some(failure),
        _ => None,
    })
}

/// Poll a condition on the appliance side
fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_hotplug_identifies_appliance() {
    let (appliance, device, mut events) = running();
    assert_eq!(device.device_info(), DeviceInfo::disconnected());

    appliance.plug(Personality::Normal);
    let info = wait_ready(&mut events);
    assert_eq!(info.state, DeviceState::Connected);
    assert_eq!(info.firmware, Some(FirmwareVersion { major: 10, minor: 5 }));
    assert!(info.hub_compatible);
    assert_eq!(device.device_info(), info);
    assert_eq!(appliance.open_count(), 1);
}

#[test]
fn test_unplug_and_replug() {
    let (appliance, device, mut events) = connected();

    appliance.unplug();
    let info = wait_state(&mut events, DeviceState::Disconnected);
    assert_eq!(info, DeviceInfo::disconnected());
    assert!(device.request_io_status().is_err());

    appliance.plug(Personality::Normal);
    wait_ready(&mut events);
    assert_eq!(appliance.open_count(), 2);
}

#[test]
fn test_bootloader_personality_is_not_opened() {
    let (appliance, device, _events) = running();
    appliance.plug(Personality::Bootloader);

    thread::sleep(Duration::from_millis(100));
    assert_eq!(appliance.open_count(), 0);
    assert!(!device.device_info().is_connected());
}

#[test]
fn test_io_status_poll() {
    let (_appliance, device, mut events) = connected();

    device.request_io_status().unwrap();
    let status = wait_for(&mut events, |event| match event {
        DeviceEvent::IoStatusChanged(status) => Some(status),
        _ => None,
    });
    assert_eq!(status.slot, 1);
    assert_eq!(status.controller_name(), "PS4");
    assert!(device.io_status().is_some());
}

#[test]
fn test_settings_read_modify_write() {
    let (appliance, device, mut events) = connected();
    appliance.set_settings([3, 1, 8, 1, 0, 2, 0x0D, 0x85, 200, 1, 15]);

    device.request_settings().unwrap();
    let mut settings = wait_for(&mut events, |event| match event {
        DeviceEvent::SettingsChanged(settings) => Some(settings),
        _ => None,
    });
    assert!(settings.remote_control_slot_g8);
    assert_eq!(settings.ds4_lightbar_brightness, 200);

    settings.slot_recall = false;
    settings.ds4_lightbar_brightness = 50;
    device.save_settings(&settings).unwrap();
    device.request_settings().unwrap();

    let stored = wait_for(&mut events, |event| match event {
        DeviceEvent::SettingsChanged(stored) => Some(stored),
        _ => None,
    });
    assert_eq!(stored, settings);
    assert_eq!(appliance.settings(), settings.to_block());
    assert_eq!(device.settings(), Some(settings));
}

#[test]
fn test_settings_preset_applied() {
    let (appliance, device, _events) = connected();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("preset.toml");
    std::fs::write(&path, "slot_recall = true\nds4_lightbar_brightness = 120\n").unwrap();

    let preset = DeviceSettings::load_preset(&path).unwrap();
    device.save_settings(&preset).unwrap();
    eventually(|| appliance.settings()[8] == 120);
    assert_eq!(appliance.settings()[3], 1);
}

#[test]
fn test_script_upload_and_unload() {
    let (appliance, device, _events) = connected();
    let script: Vec<u8> = (0..=255u8).cycle().take(1000).collect();

    device.load_script(&script).unwrap();
    eventually(|| appliance.loaded_script().as_deref() == Some(script.as_slice()));

    device.unload_script();
    eventually(|| appliance.loaded_script().is_none());
}

#[test]
fn test_script_file_upload() {
    let (appliance, device, _events) = connected();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("script.bin");
    std::fs::write(&path, [0xAA; 61]).unwrap();

    device.load_script_file(&path).unwrap();
    eventually(|| appliance.loaded_script() == Some(vec![0xAA; 61]));
}

#[test]
fn test_change_slot_and_turn_off() {
    let (appliance, device, _events) = connected();

    device.change_slot().unwrap();
    eventually(|| appliance.slot() == 2);

    device.turn_off_controller();
    eventually(|| appliance.controller() == 0);
}

#[test]
fn test_api_mode_session() {
    let (appliance, device, mut events) = connected();

    device.enter_api_mode().unwrap();
    let info = wait_state(&mut events, DeviceState::ApiMode);
    assert!(info.is_api_mode());
    assert!(appliance.is_api_mode());

    let mut frame = CmCommand::new();
    frame.set(0, 100);
    device.send_api_frame(&frame).unwrap();
    let status = wait_for(&mut events, |event| match event {
        DeviceEvent::IoStatusChanged(status) => Some(status),
        _ => None,
    });
    assert_eq!(status.slot, 1);

    device.exit_api_mode().unwrap();
    wait_state(&mut events, DeviceState::Connected);
    assert!(!appliance.is_api_mode());
    assert!(appliance.flush_count() >= 2);
}

#[test]
fn test_api_frame_outside_api_mode() {
    let (_appliance, device, mut events) = connected();

    assert!(device.send_api_frame(&CmCommand::new()).is_err());
    let failure = wait_failure(&mut events, CommandFamily::ApiFrame);
    assert_eq!(failure.reason, FailureReason::NeedApiMode);
}

#[test]
fn test_misaligned_response_fails_after_retry() {
    let (appliance, device, mut events) = connected();
    appliance.set_misaligned(true);

    device.request_settings().unwrap();
    let failure = wait_failure(&mut events, CommandFamily::RequestSettings);
    assert_eq!(failure.reason, FailureReason::FailedToReadResult);
    assert!(device.settings().is_none());
}

#[test]
fn test_write_failure_reported() {
    let (appliance, device, mut events) = connected();
    appliance.set_fail_writes(true);

    device.change_slot().unwrap();
    let failure = wait_failure(&mut events, CommandFamily::ChangeSlot);
    assert_eq!(failure.reason, FailureReason::FailedToSendCommand);
}

#[test]
fn test_silent_device_reports_missing_result() {
    let (appliance, device, mut events) = connected();
    appliance.set_silent(true);

    device.request_io_status().unwrap();
    let failure = wait_failure(&mut events, CommandFamily::RequestIoStatus);
    assert_eq!(failure.reason, FailureReason::FailedToReadResult);
}

#[test]
fn test_every_subscriber_sees_identity() {
    let (appliance, device, mut first) = running();
    let mut second = device.subscribe();

    appliance.plug(Personality::Normal);
    let a = wait_ready(&mut first);
    let b = wait_ready(&mut second);
    assert_eq!(a, b);
}

#[test]
fn test_stop_halts_engine() {
    let (appliance, device, _events) = connected();
    assert!(device.is_running());

    device.stop();
    assert!(!device.is_running());
    assert!(device.pending_commands().is_empty());

    // queued work stays queued once the dispatcher is gone
    appliance.clear_written();
    device.unload_script();
    thread::sleep(Duration::from_millis(50));
    assert!(appliance.written().is_empty());
}

#[test]
fn test_short_write_is_a_send_failure() {
    let (appliance, device, mut events) = connected();
    appliance.set_short_writes(true);

    device.unload_script();
    let failure = wait_failure(&mut events, CommandFamily::UnloadScript);
    assert_eq!(failure.reason, FailureReason::FailedToSendCommand);
}

#[test]
fn test_dispatcher_survives_transport_panic() {
    let (appliance, device, mut events) = connected();
    appliance.panic_next_write();

    device.change_slot().unwrap();
    let failure = wait_failure(&mut events, CommandFamily::ChangeSlot);
    assert_eq!(failure.reason, FailureReason::FailedToSendCommand);

    // the second step went through after the fault, so the loop is alive
    eventually(|| appliance.slot() == 2);
    device.change_slot().unwrap();
    eventually(|| appliance.slot() == 3);
}

#[test]
fn test_poller_survives_discovery_panic() {
    let (appliance, _device, mut events) = connected();
    appliance.panic_next_discover();
    thread::sleep(Duration::from_millis(50));

    appliance.unplug();
    wait_state(&mut events, DeviceState::Disconnected);
}

#[test]
fn test_restart_requeries_identity() {
    let (appliance, device, mut events) = connected();

    device.stop();
    assert_eq!(device.device_info(), DeviceInfo::disconnected());
    wait_state(&mut events, DeviceState::Disconnected);

    device.start();
    let info = wait_ready(&mut events);
    assert_eq!(info.firmware, Some(FirmwareVersion { major: 10, minor: 5 }));
    assert_eq!(appliance.open_count(), 2);
}
