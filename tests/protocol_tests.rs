//! Controller and protocol engine driven through radio events

mod common;

use common::{datetime, Harness};
use picolight::config::Config;
use picolight::controller::Controller;
use picolight::hal::{Clock, EnvironmentReading, RadioError, RadioEvent, Rtc};
use picolight::peripheral::ConnectionState;
use picolight::protocol::{Characteristic, Notification};
use picolight::Color;

const CONN: u16 = 1;

/// Instant fades so each colour change is one commit
fn instant_config() -> Config {
    let mut config = Config::default();
    config.fade.duration_secs = 0.0;
    config.fade.startup_duration_secs = 0.0;
    config.schedule.transition_fade_secs = 0.0;
    config
}

fn connected() -> (Harness, Controller) {
    let h = Harness::with_config(instant_config());
    let mut controller = h.boot();
    controller.handle_event(RadioEvent::Connected(CONN));
    h.radio.clear();
    (h, controller)
}

fn write(controller: &mut Controller, characteristic: Characteristic, data: &[u8]) {
    controller.handle_event(RadioEvent::Write {
        characteristic,
        data: data.to_vec(),
    });
}

#[test]
fn boot_starts_advertising_with_lights_off() {
    let h = Harness::with_config(instant_config());
    let controller = h.boot();

    assert_eq!(controller.protocol().state(), ConnectionState::Advertising);
    assert_eq!(h.radio.advertise_count(), 1);
    assert!(!controller.state().fade.is_on());
    assert_eq!(h.sensor.reads(), 1);
}

#[test]
fn advertising_waits_for_free_memory() {
    let h = Harness::with_config(instant_config());
    h.memory.set_free(10_000);
    let mut controller = h.boot();

    assert_eq!(controller.protocol().state(), ConnectionState::Disconnected);
    assert!(controller.protocol().advertising_needed());
    assert_eq!(h.radio.advertise_count(), 0);

    controller.poll();
    assert_eq!(h.radio.advertise_count(), 0);

    h.memory.set_free(20_000);
    h.clock.advance(1_000);
    controller.poll();
    assert_eq!(h.radio.advertise_count(), 0, "retry is rate limited");

    h.clock.advance(4_000);
    controller.poll();
    assert_eq!(h.radio.advertise_count(), 1);
    assert_eq!(controller.protocol().state(), ConnectionState::Advertising);
}

#[test]
fn failed_advertising_is_retried() {
    let h = Harness::with_config(instant_config());
    h.radio.set_fail_advertising(true);
    let mut controller = h.boot();
    assert!(controller.protocol().advertising_needed());

    h.radio.set_fail_advertising(false);
    controller.poll();

    assert_eq!(controller.protocol().state(), ConnectionState::Advertising);
}

#[test]
fn connect_pushes_full_state() {
    let h = Harness::with_config(instant_config());
    let mut controller = h.boot();

    controller.handle_event(RadioEvent::Connected(CONN));

    assert_eq!(controller.protocol().state(), ConnectionState::Connected);
    assert_eq!(controller.protocol().conn_handle(), Some(CONN));
    assert_eq!(h.radio.codes(), vec![112, 121, 131, 120]);

    let notifications = h.radio.notifications();
    assert_eq!(
        notifications[0],
        Notification::Settings {
            auto_cycle: true,
            active_recipe: 4
        }
    );
    assert_eq!(notifications[1], Notification::Environment(EnvironmentReading::default()));
    assert_eq!(notifications[3], Notification::Time(datetime(12, 0)));
}

#[test]
fn disconnect_restarts_advertising() {
    let (h, mut controller) = connected();

    controller.handle_event(RadioEvent::Disconnected(CONN));
    assert_eq!(controller.protocol().state(), ConnectionState::Disconnected);
    assert!(controller.protocol().advertising_needed());

    controller.poll();
    assert_eq!(h.radio.advertise_count(), 2);
    assert_eq!(controller.protocol().state(), ConnectionState::Advertising);
}

#[test]
fn recipe_write_applies_and_opens_override() {
    let (h, mut controller) = connected();

    write(&mut controller, Characteristic::Recipe, &[5]);

    assert_eq!(controller.state().fade.recipe_name(), "bloom");
    assert_eq!(h.actuator.last(), Some(Color::new(255, 100, 10, 150)));
    assert!(controller.state().scheduler.override_active(h.clock.now_ms()));
    assert_eq!(
        h.radio.notifications(),
        vec![Notification::Ack {
            characteristic: 1,
            op: 0
        }]
    );
}

#[test]
fn recipe_index_out_of_range_is_invalid() {
    let (h, mut controller) = connected();

    write(&mut controller, Characteristic::Recipe, &[16]);

    assert!(!controller.state().fade.is_on());
    assert!(!controller.state().scheduler.override_active(h.clock.now_ms()));
    assert_eq!(h.radio.sent(), vec![(Characteristic::Control, vec![101, 1, 0])]);
}

#[test]
fn custom_colour_reports_custom_status() {
    let (h, mut controller) = connected();

    write(&mut controller, Characteristic::Custom, &[1, 2, 3, 4]);
    write(&mut controller, Characteristic::Control, &[14]);

    assert_eq!(
        h.radio.sent(),
        vec![
            (Characteristic::Control, vec![100, 2, 0]),
            (Characteristic::Control, vec![120, 1, 0xFF, 1, 2, 3, 4]),
        ]
    );
}

#[test]
fn malformed_writes_are_reported() {
    let (h, mut controller) = connected();

    write(&mut controller, Characteristic::Custom, &[1, 2, 3]);
    write(&mut controller, Characteristic::Control, &[99]);
    write(&mut controller, Characteristic::Control, &[30, 1, 2]);

    assert_eq!(h.radio.codes(), vec![101, 101, 101]);
    assert_eq!(
        h.radio.notifications()[1],
        Notification::InvalidCommand {
            characteristic: 3,
            op: 99
        }
    );
}

#[test]
fn lights_on_uses_active_recipe() {
    let (h, mut controller) = connected();

    write(&mut controller, Characteristic::Control, &[13, 11]);
    write(&mut controller, Characteristic::Control, &[1]);
    assert_eq!(controller.state().fade.recipe_name(), "forest");

    write(&mut controller, Characteristic::Control, &[0]);
    assert!(!controller.state().fade.is_on());

    assert_eq!(
        h.radio.sent(),
        vec![
            (Characteristic::Control, vec![113, 11]),
            (Characteristic::Control, vec![100, 3, 1]),
            (Characteristic::Control, vec![100, 3, 0]),
        ]
    );
}

#[test]
fn toggle_auto_cycle_notifies_new_state() {
    let (h, mut controller) = connected();

    write(&mut controller, Characteristic::Control, &[2]);
    assert!(!controller.state().scheduler.settings().auto_cycle);
    write(&mut controller, Characteristic::Control, &[2]);
    assert!(controller.state().scheduler.settings().auto_cycle);

    assert_eq!(h.radio.codes(), vec![103, 102]);
}

#[test]
fn set_clock_updates_rtc() {
    let (h, mut controller) = connected();

    // 2026-06-01 09:30:15, Monday
    write(
        &mut controller,
        Characteristic::Control,
        &[30, 0xEA, 0x07, 6, 1, 9, 30, 15, 1],
    );

    let expected = chrono::NaiveDate::from_ymd_opt(2026, 6, 1)
        .and_then(|date| date.and_hms_opt(9, 30, 15))
        .unwrap();
    assert_eq!(h.rtc.now(), expected);
    assert_eq!(controller.state().minute_of_day(), 9 * 60 + 30);
    assert_eq!(h.radio.notifications(), vec![Notification::Time(expected)]);
}

#[test]
fn schedule_upload_applies_and_echoes() {
    let (h, mut controller) = connected();

    write(
        &mut controller,
        Characteristic::Schedule,
        &[3, 1, 0, 0, 23, 59, 5, 1],
    );

    assert_eq!(controller.state().fade.recipe_name(), "bloom");
    assert_eq!(
        h.radio.sent(),
        vec![
            (Characteristic::Control, vec![100, 4, 0]),
            (Characteristic::Control, vec![140, 3, 1, 0, 0, 23, 59, 5, 1]),
        ]
    );
}

#[test]
fn rejected_schedule_upload_is_invalid() {
    let (h, mut controller) = connected();

    write(
        &mut controller,
        Characteristic::Schedule,
        &[3, 1, 25, 0, 23, 59, 5, 1],
    );

    assert!(!controller.state().fade.is_on());
    assert_eq!(h.radio.sent(), vec![(Characteristic::Control, vec![101, 4, 0])]);
}

#[test]
fn status_request_refreshes_sensors() {
    let (h, mut controller) = connected();
    h.sensor.set(EnvironmentReading {
        temperature_c: Some(24.0),
        co2_ppm: Some(800),
        ..EnvironmentReading::default()
    });

    write(&mut controller, Characteristic::Control, &[12]);

    let sent = h.radio.sent();
    assert_eq!(sent[0], (Characteristic::Sensor, b"24.0,N/A,800,N/A,N/A".to_vec()));
    assert_eq!(h.radio.codes(), vec![121, 131, 140]);
    assert_eq!(h.sensor.reads(), 2);
}

#[test]
fn peer_gone_forces_disconnect() {
    let (h, mut controller) = connected();
    h.radio.set_notify_error(Some(RadioError::PeerDisconnected));

    write(&mut controller, Characteristic::Control, &[14]);

    assert_eq!(controller.protocol().state(), ConnectionState::Disconnected);
    assert!(controller.protocol().advertising_needed());
}

#[test]
fn transient_notify_error_keeps_connection() {
    let (h, mut controller) = connected();
    h.radio.set_notify_error(Some(RadioError::OutOfMemory));

    write(&mut controller, Characteristic::Control, &[14]);

    assert_eq!(controller.protocol().state(), ConnectionState::Connected);
}

#[test]
fn nothing_is_sent_while_disconnected() {
    let h = Harness::with_config(instant_config());
    let mut controller = h.boot();

    write(&mut controller, Characteristic::Recipe, &[0]);

    assert_eq!(controller.state().fade.recipe_name(), "balanced");
    assert!(h.radio.sent().is_empty());
}

#[test]
fn sensor_snapshot_is_pushed_periodically() {
    let (h, mut controller) = connected();

    controller.poll();
    controller.poll();
    assert_eq!(h.radio.sent().len(), 1);
    assert_eq!(h.radio.sent()[0].0, Characteristic::Sensor);

    h.clock.advance(5_000);
    controller.poll();
    assert_eq!(h.radio.sent().len(), 2);
}

#[test]
fn poll_feeds_watchdog_and_reclaims_memory() {
    let h = Harness::with_config(instant_config());
    let mut controller = h.boot();
    let feeds = h.watchdog.feeds();
    let reclaims = h.memory.reclaims();

    controller.poll();
    assert_eq!(h.watchdog.feeds(), feeds + 1);
    assert_eq!(h.memory.reclaims(), reclaims);

    h.clock.advance(30_000);
    controller.poll();
    assert_eq!(h.memory.reclaims(), reclaims + 1);
}

#[test]
fn schedule_resumes_after_override() {
    let (h, mut controller) = connected();
    write(
        &mut controller,
        Characteristic::Schedule,
        &[1, 1, 0, 0, 23, 59, 4, 1],
    );
    assert_eq!(controller.state().fade.recipe_name(), "veg_growth");

    write(&mut controller, Characteristic::Recipe, &[13]);
    h.clock.advance(60_000);
    controller.poll();
    assert_eq!(controller.state().fade.recipe_name(), "night_light");

    h.clock.advance(300_000);
    controller.poll();
    assert_eq!(controller.state().fade.recipe_name(), "veg_growth");
}

#[test]
fn shutdown_turns_lights_off() {
    let (h, mut controller) = connected();
    write(&mut controller, Characteristic::Recipe, &[14]);

    controller.shutdown();

    assert_eq!(h.actuator.last(), Some(Color::OFF));
    assert!(!controller.state().fade.is_on());
}
