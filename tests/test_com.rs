// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Message channel tests: both ends in one process.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracker_bridge::com::{ComPort, ConnectionState, LaneConfig, Side, EVENT_LANE, REALTIME_LANE};
use tracker_bridge::ComError;

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_com_{}_{n}", std::process::id())
}

fn lanes() -> [LaneConfig; 2] {
    [LaneConfig::with_depth(8, 4), LaneConfig::with_depth(256, 2)]
}

fn pair(tag: &str) -> (ComPort, ComPort) {
    let name = unique_name(tag);
    let device = ComPort::create(&name, &lanes()).expect("create");
    let panel = ComPort::connect(&name, &lanes()).expect("connect");
    (device, panel)
}

#[test]
fn connect_without_device_is_not_connected() {
    let result = ComPort::connect(&unique_name("nodev"), &lanes());
    assert!(matches!(result, Err(ComError::NotConnected)));
}

#[test]
fn send_without_panel_is_not_connected() {
    let device = ComPort::create(&unique_name("nopanel"), &lanes()).expect("create");
    assert_eq!(device.side(), Side::Device);
    assert_eq!(device.check_connection(), ConnectionState::Unconnected);
    assert!(matches!(
        device.send(REALTIME_LANE, b"hello"),
        Err(ComError::NotConnected)
    ));
}

#[test]
fn messages_flow_both_ways_per_lane() {
    let (device, panel) = pair("flow");
    let mut buf = [0u8; 256];

    device.send(REALTIME_LANE, b"request").expect("send");
    panel.send(EVENT_LANE, &[1]).expect("send event");
    panel.send(REALTIME_LANE, b"response").expect("send");

    assert_eq!(panel.read(REALTIME_LANE, &mut buf).expect("read"), Some(7));
    assert_eq!(&buf[..7], b"request");
    assert_eq!(panel.read(EVENT_LANE, &mut buf).expect("read"), None);

    assert_eq!(device.read(EVENT_LANE, &mut buf).expect("read"), Some(1));
    assert_eq!(buf[0], 1);
    assert_eq!(device.read(REALTIME_LANE, &mut buf).expect("read"), Some(8));
    assert_eq!(&buf[..8], b"response");
    assert_eq!(device.read(REALTIME_LANE, &mut buf).expect("read"), None);
}

#[test]
fn messages_keep_their_boundaries() {
    let (device, panel) = pair("atomic");
    let mut buf = [0u8; 256];
    for len in [1usize, 12, 16, 200] {
        device.send(REALTIME_LANE, &vec![len as u8; len]).expect("send");
        assert_eq!(panel.read(REALTIME_LANE, &mut buf).expect("read"), Some(len));
        assert!(buf[..len].iter().all(|&b| b == len as u8));
    }
}

#[test]
fn full_lane_reports_buffer_full() {
    let (_device, panel) = pair("full");
    for _ in 0..4 {
        panel.send(EVENT_LANE, &[0u8; 8]).expect("send");
    }
    assert!(matches!(
        panel.send(EVENT_LANE, &[0u8; 8]),
        Err(ComError::BufferFull { lane: EVENT_LANE })
    ));
}

#[test]
fn oversized_and_misaddressed_messages_are_rejected() {
    let (device, _panel) = pair("param");
    assert!(matches!(
        device.send(EVENT_LANE, &[0u8; 9]),
        Err(ComError::MessageTooLarge { lane: 0, size: 9, max: 8 })
    ));
    assert!(matches!(
        device.send(7, b"x"),
        Err(ComError::InvalidParameter(_))
    ));
    let mut buf = [0u8; 4];
    assert!(matches!(
        device.read(7, &mut buf),
        Err(ComError::InvalidParameter(_))
    ));
}

#[test]
fn read_into_small_buffer_consumes_the_message() {
    let (device, panel) = pair("small");
    device.send(REALTIME_LANE, &[5u8; 32]).expect("send");
    device.send(REALTIME_LANE, &[6u8; 2]).expect("send");

    let mut small = [0u8; 4];
    assert!(matches!(
        panel.read(REALTIME_LANE, &mut small),
        Err(ComError::MessageTooLarge { size: 32, .. })
    ));
    assert_eq!(panel.read(REALTIME_LANE, &mut small).expect("read"), Some(2));
}

#[test]
fn drain_discards_pending_messages() {
    let (device, panel) = pair("drain");
    device.send(REALTIME_LANE, b"a").expect("send");
    device.send(REALTIME_LANE, b"b").expect("send");
    panel.drain(REALTIME_LANE).expect("drain");

    let mut buf = [0u8; 4];
    assert_eq!(panel.read(REALTIME_LANE, &mut buf).expect("read"), None);
}

#[test]
fn lane_mismatch_is_rejected() {
    let name = unique_name("mismatch");
    let _device = ComPort::create(&name, &lanes()).expect("create");
    let other = [LaneConfig::with_depth(8, 4), LaneConfig::with_depth(128, 4)];
    assert!(matches!(
        ComPort::connect(&name, &other),
        Err(ComError::InvalidParameter(_))
    ));
}

#[test]
fn connection_state_follows_both_ends() {
    let name = unique_name("state");
    let device = ComPort::create(&name, &lanes()).expect("create");
    assert_eq!(device.check_connection(), ConnectionState::Unconnected);

    let panel = ComPort::connect(&name, &lanes()).expect("connect");
    assert_eq!(device.check_connection(), ConnectionState::Connected);
    assert_eq!(panel.check_connection(), ConnectionState::Connected);

    drop(panel);
    assert_eq!(device.check_connection(), ConnectionState::Unconnected);

    let panel = ComPort::connect(&name, &lanes()).expect("reconnect");
    drop(device);
    assert_eq!(panel.check_connection(), ConnectionState::Unconnected);
    assert!(matches!(panel.send(EVENT_LANE, &[1]), Err(ComError::NotConnected)));
}

#[test]
fn newer_panel_supersedes_older_handle() {
    let name = unique_name("supersede");
    let device = ComPort::create(&name, &lanes()).expect("create");
    let first = ComPort::connect(&name, &lanes()).expect("first");
    let second = ComPort::connect(&name, &lanes()).expect("second");

    assert_eq!(first.check_connection(), ConnectionState::Unconnected);
    assert_eq!(second.check_connection(), ConnectionState::Connected);

    // Dropping the superseded handle leaves the new registration alone.
    drop(first);
    assert_eq!(device.check_connection(), ConnectionState::Connected);
}

#[test]
fn device_can_recreate_after_close() {
    let name = unique_name("recreate");
    let device = ComPort::create(&name, &lanes()).expect("create");
    drop(device);
    let device = ComPort::create(&name, &lanes()).expect("recreate");
    let panel = ComPort::connect(&name, &lanes()).expect("connect");
    device.send(REALTIME_LANE, b"again").expect("send");

    let mut buf = [0u8; 8];
    assert_eq!(panel.read(REALTIME_LANE, &mut buf).expect("read"), Some(5));
}

#[test]
fn stale_panel_messages_are_dropped_on_attach() {
    let name = unique_name("stale_msgs");
    let device = ComPort::create(&name, &lanes()).expect("create");
    let panel = ComPort::connect(&name, &lanes()).expect("connect");
    device.send(REALTIME_LANE, b"old").expect("send");
    drop(panel);

    let panel = ComPort::connect(&name, &lanes()).expect("reconnect");
    let mut buf = [0u8; 8];
    assert_eq!(panel.read(REALTIME_LANE, &mut buf).expect("read"), None);
}
