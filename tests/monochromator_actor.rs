//! Integration tests for the control actor
//!
//! Every test drives a [`Monochromator`] over a [`ScriptedTransport`] on a paused tokio
//! clock, so settle delays and polling periods elapse instantly and deterministically.

use std::time::Duration;

use cornerstone130::protocol::classify;
use cornerstone130::{
    AccessKind, Attribute, DeviceConfig, DeviceError, DeviceState, FilterDefinition,
    GratingDefinition, Monochromator, OperatingUnit, ScriptedTransport, ShutterState,
};
use tokio::time::sleep;

/// Polling period long enough that no tick fires during a test; polls are driven by
/// `refresh()` instead.
fn manual_polling() -> DeviceConfig {
    DeviceConfig {
        polling_period_ms: 60_000,
        ..DeviceConfig::default()
    }
}

async fn open_device(script: &ScriptedTransport, config: DeviceConfig) -> Monochromator {
    let device = Monochromator::spawn(Box::new(script.clone()), config);
    device.open().await.unwrap();
    device
}

fn gratings() -> Vec<GratingDefinition> {
    vec![
        GratingDefinition {
            number: 1,
            label: "1200 l/mm VIS".to_string(),
            min_wavelength: 200.0,
            max_wavelength: 1400.0,
        },
        GratingDefinition {
            number: 2,
            label: "600 l/mm NIR".to_string(),
            min_wavelength: 600.0,
            max_wavelength: 2400.0,
        },
    ]
}

// =============================================================================
// Open and periodic polling
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_open_then_first_poll_populates_snapshot() {
    let script = ScriptedTransport::healthy();
    let device = Monochromator::spawn(Box::new(script.clone()), DeviceConfig::default());

    assert_eq!(device.state(), DeviceState::Initializing);
    assert_eq!(
        device.get_state_and_status(),
        (DeviceState::Initializing, "Device is initializing".to_string())
    );

    device.open().await.unwrap();
    assert_eq!(
        device.get_state_and_status(),
        (DeviceState::Standby, "Device is up and ready".to_string())
    );
    assert_eq!(script.commands(), vec!["INFO?", "STB?"]);

    // default period is 500 ms
    sleep(Duration::from_millis(600)).await;

    let snapshot = device.snapshot();
    assert_eq!(snapshot.wavelength, 500.0);
    assert_eq!(snapshot.grating_number, 1);
    assert_eq!(snapshot.grating_label, "1200 l/mm VIS");
    assert_eq!(snapshot.filter_number, 1);
    assert_eq!(snapshot.filter_label, "OPEN");
    assert_eq!(snapshot.shutter, ShutterState::Closed);
    assert!(snapshot.updated_at.is_some());
    assert_eq!(
        snapshot.status_message,
        "Transport state: CONNECTED\nDevice is up and ready"
    );

    device.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_labels_are_only_read_when_position_changes() {
    let script = ScriptedTransport::healthy();
    let device = open_device(&script, manual_polling()).await;

    device.refresh().await.unwrap();
    device.refresh().await.unwrap();
    assert_eq!(script.count("GRAT1LABEL?"), 1);
    assert_eq!(script.count("FILTER1LABEL?"), 1);
    assert_eq!(script.count("WAVE?"), 2);

    script.respond("FILTER?", "2");
    device.refresh().await.unwrap();
    assert_eq!(script.count("FILTER2LABEL?"), 1);
    assert_eq!(device.get_filter_number(), 2);
    assert_eq!(device.get_filter_label(), "OG550");

    device.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_grating_reply_with_trailing_fields() {
    let script = ScriptedTransport::healthy();
    script.respond("GRAT?", "1,1200,1200 l/mm VIS");
    let device = open_device(&script, manual_polling()).await;

    device.refresh().await.unwrap();
    assert_eq!(device.state(), DeviceState::Standby);
    assert_eq!(device.get_grating_number(), 1);
    assert_eq!(device.get_grating_label(), "1200 l/mm VIS");

    script.respond("GRAT?", "2,600,600 l/mm NIR");
    device.refresh().await.unwrap();
    assert_eq!(device.get_grating_number(), 2);
    assert_eq!(device.get_grating_label(), "600 l/mm NIR");

    device.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_zero_polling_period_still_runs() {
    let script = ScriptedTransport::healthy();
    let config = DeviceConfig {
        polling_period_ms: 0,
        ..DeviceConfig::default()
    };
    let device = open_device(&script, config).await;
    assert_eq!(device.state(), DeviceState::Standby);

    sleep(Duration::from_millis(200)).await;
    assert!(script.count("WAVE?") > 0);
    assert_eq!(device.get_wavelength(), 500.0);

    device.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_open_stays_in_fault_without_polling() {
    let script = ScriptedTransport::healthy();
    script.fail_connect(true);
    let device = Monochromator::spawn(Box::new(script.clone()), DeviceConfig::default());

    let err = device.open().await.unwrap_err();
    assert!(matches!(err, DeviceError::Transport { .. }));

    sleep(Duration::from_secs(2)).await;
    let (state, status) = device.get_state_and_status();
    assert_eq!(state, DeviceState::Fault);
    assert!(status.starts_with("Device open error: "), "{status}");
    assert!(script.commands().is_empty());

    device.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_commands_before_open_are_rejected() {
    let script = ScriptedTransport::healthy();
    let device = Monochromator::spawn(Box::new(script.clone()), manual_polling());

    let err = device.set_wavelength(600.0).await.unwrap_err();
    assert!(matches!(err, DeviceError::Internal(_)));
    assert_eq!(device.state(), DeviceState::Initializing);
    assert!(script.commands().is_empty());

    device.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_labels_written_on_open_when_configured() {
    let script = ScriptedTransport::healthy();
    let config = DeviceConfig {
        write_labels_on_open: true,
        ..manual_polling()
    };
    let device = Monochromator::builder(Box::new(script.clone()))
        .config(config)
        .gratings(gratings())
        .filters(vec![FilterDefinition {
            number: 2,
            label: "OG550".to_string(),
        }])
        .spawn();

    device.open().await.unwrap();
    assert_eq!(
        script.commands(),
        vec![
            "INFO?",
            "STB?",
            "GRAT1LABEL 1200 l/mm VIS",
            "STB?",
            "GRAT2LABEL 600 l/mm NIR",
            "STB?",
            "FILTER2LABEL OG550",
            "STB?",
        ]
    );

    device.shutdown().await.unwrap();
}

// =============================================================================
// Moves and settle delays
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_wavelength_move_settles_after_proportional_delay() {
    let script = ScriptedTransport::healthy();
    let device = open_device(&script, manual_polling()).await;
    device.refresh().await.unwrap();
    script.clear_log();

    // 100 nm of a 1200 nm range at 5 s full scale: ~417 ms
    device.set_wavelength(600.0).await.unwrap();
    assert_eq!(
        device.get_state_and_status(),
        (DeviceState::Moving, "Wave length change in progress...".to_string())
    );
    assert_eq!(script.commands(), vec!["GOWAVE 600.000000"]);

    script.respond("WAVE?", "600.000");

    sleep(Duration::from_millis(400)).await;
    device.refresh().await.unwrap();
    assert_eq!(device.state(), DeviceState::Moving);
    assert_eq!(script.count("WAVE?"), 0);

    sleep(Duration::from_millis(20)).await;
    device.refresh().await.unwrap();
    assert_eq!(device.state(), DeviceState::Standby);
    assert_eq!(device.get_wavelength(), 600.0);

    device.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_grating_change_applies_definition_range() {
    let script = ScriptedTransport::healthy();
    let config = DeviceConfig {
        grating_write_delay_ms: 1000,
        ..manual_polling()
    };
    let device = Monochromator::builder(Box::new(script.clone()))
        .config(config)
        .gratings(gratings())
        .spawn();
    device.open().await.unwrap();
    device.refresh().await.unwrap();
    assert_eq!(device.snapshot().wavelength_unit_range, 1200.0);
    assert_eq!(device.grating_limits(), Some((200.0, 1400.0)));

    device.set_grating_number(2).await.unwrap();
    assert_eq!(
        device.get_state_and_status(),
        (DeviceState::Moving, "Grating change in progress...".to_string())
    );
    script.respond("GRAT?", "2");

    sleep(Duration::from_millis(1001)).await;
    device.refresh().await.unwrap();

    assert_eq!(device.state(), DeviceState::Standby);
    assert_eq!(device.get_grating_number(), 2);
    assert_eq!(device.get_grating_label(), "600 l/mm NIR");
    assert_eq!(device.snapshot().wavelength_unit_range, 1800.0);
    assert_eq!(device.grating_limits(), Some((600.0, 2400.0)));

    device.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_filter_move_reports_progress_status() {
    let script = ScriptedTransport::healthy();
    let device = open_device(&script, manual_polling()).await;

    device.set_filter_number(2).await.unwrap();
    assert_eq!(
        device.get_state_and_status(),
        (DeviceState::Moving, "Filter change in progress...".to_string())
    );
    assert_eq!(script.count("FILTER 2"), 1);

    // default filter settle time is 3 s
    sleep(Duration::from_millis(2900)).await;
    device.refresh().await.unwrap();
    assert_eq!(device.state(), DeviceState::Moving);

    sleep(Duration::from_millis(200)).await;
    device.refresh().await.unwrap();
    assert_eq!(device.state(), DeviceState::Standby);

    device.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_abort_ends_move_with_user_abort_status() {
    let script = ScriptedTransport::healthy();
    let device = open_device(&script, manual_polling()).await;
    device.refresh().await.unwrap();

    device.set_wavelength(1200.0).await.unwrap();
    assert!(device.is_abort_allowed());
    device.abort().await.unwrap();
    script.clear_log();

    device.refresh().await.unwrap();
    assert_eq!(
        device.get_state_and_status(),
        (DeviceState::Standby, "User abort".to_string())
    );
    // the aborting poll does not read the instrument
    assert!(script.commands().is_empty());

    device.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_out_of_scale_wavelength_keeps_actor_alive() {
    let script = ScriptedTransport::healthy();
    let device = open_device(&script, manual_polling()).await;
    device.refresh().await.unwrap();

    // too far to express as a settle time: the full-scale delay applies instead
    device.set_wavelength(1e300).await.unwrap();
    assert_eq!(device.state(), DeviceState::Moving);
    device.abort().await.unwrap();
    device.refresh().await.unwrap();
    assert_eq!(device.state(), DeviceState::Standby);

    script.clear_log();
    let err = device.set_wavelength(f64::NAN).await.unwrap_err();
    assert!(matches!(err, DeviceError::Protocol { .. }));
    assert!(script.commands().is_empty());
    assert_eq!(device.state(), DeviceState::Standby);

    device.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_move_write_leaves_state_unchanged() {
    let script = ScriptedTransport::healthy();
    let device = open_device(&script, manual_polling()).await;
    device.refresh().await.unwrap();
    script.fail_next("GOWAVE 600.000000");

    let err = device.set_wavelength(600.0).await.unwrap_err();
    match err {
        DeviceError::Transport { command, .. } => assert_eq!(command, "GOWAVE 600.000000"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(device.state(), DeviceState::Standby);

    device.shutdown().await.unwrap();
}

// =============================================================================
// Faults and recovery
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_hardware_error_code_faults_and_recovers() {
    let script = ScriptedTransport::healthy();
    let device = open_device(&script, manual_polling()).await;

    script.respond("STB?", "3");
    script.respond("ERROR?", "3");
    device.refresh().await.unwrap();

    let (state, status) = device.get_state_and_status();
    assert_eq!(state, DeviceState::Fault);
    assert!(status.contains(classify(3)), "{status}");
    assert!(status.starts_with("Transport state: CONNECTED\n"));
    // readings are still committed alongside the fault
    assert_eq!(device.get_wavelength(), 500.0);
    assert!(!device.is_allowed(Attribute::Wavelength, AccessKind::Write));
    assert!(device.is_allowed(Attribute::Wavelength, AccessKind::Read));

    script.respond("STB?", "0");
    device.refresh().await.unwrap();
    assert_eq!(device.state(), DeviceState::Standby);

    device.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_read_failure_faults_and_keeps_last_values() {
    let script = ScriptedTransport::healthy();
    let device = open_device(&script, manual_polling()).await;
    device.refresh().await.unwrap();
    assert_eq!(device.get_wavelength(), 500.0);

    script.fail_on("WAVE?");
    script.respond("GRAT?", "2");
    device.refresh().await.unwrap();

    let (state, status) = device.get_state_and_status();
    assert_eq!(state, DeviceState::Fault);
    assert!(status.starts_with("Periodic read error: "), "{status}");
    assert_eq!(device.get_wavelength(), 500.0);
    assert_eq!(device.get_grating_number(), 1);

    script.recover("WAVE?");
    device.refresh().await.unwrap();
    assert_eq!(
        device.get_state_and_status(),
        (
            DeviceState::Standby,
            "Transport state: CONNECTED\nDevice is up and ready".to_string()
        )
    );
    assert_eq!(device.get_grating_number(), 2);

    device.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unparseable_answer_is_a_read_error() {
    let script = ScriptedTransport::healthy();
    let device = open_device(&script, manual_polling()).await;

    script.respond("SHUTTER?", "X");
    device.refresh().await.unwrap();

    let (state, status) = device.get_state_and_status();
    assert_eq!(state, DeviceState::Fault);
    assert!(status.starts_with("Periodic read error: "), "{status}");

    device.shutdown().await.unwrap();
}

// =============================================================================
// Shutter, units and labels
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutter_does_not_enter_moving() {
    let script = ScriptedTransport::healthy();
    let device = open_device(&script, manual_polling()).await;
    script.clear_log();

    device.set_shutter_state(ShutterState::Open).await.unwrap();
    assert_eq!(device.state(), DeviceState::Standby);
    assert_eq!(script.commands(), vec!["SHUTTER O", "STB?"]);

    script.respond("SHUTTER?", "O");
    device.refresh().await.unwrap();
    assert_eq!(device.get_shutter_state(), ShutterState::Open);

    device.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutter_hardware_error_faults() {
    let script = ScriptedTransport::healthy();
    let device = open_device(&script, manual_polling()).await;

    script.respond_once("STB?", "1");
    script.respond("ERROR?", "6");
    let err = device
        .set_shutter_state(ShutterState::Closed)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        DeviceError::Hardware {
            code: 6,
            description: classify(6).to_string()
        }
    );

    let (state, status) = device.get_state_and_status();
    assert_eq!(state, DeviceState::Fault);
    assert!(status.ends_with(classify(6)), "{status}");

    device.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unit_and_label_writes() {
    let script = ScriptedTransport::healthy();
    let device = open_device(&script, manual_polling()).await;
    script.clear_log();

    device.set_unit(OperatingUnit::Wavenumbers).await.unwrap();
    device.set_grating_label(1, "VIS").await.unwrap();
    device.set_filter_label(2, "LP550").await.unwrap();
    assert_eq!(
        script.commands(),
        vec![
            "UNITS WN",
            "STB?",
            "GRAT1LABEL VIS",
            "STB?",
            "FILTER2LABEL LP550",
            "STB?"
        ]
    );

    script.respond_once("STB?", "1");
    script.respond("ERROR?", "9");
    let err = device
        .set_grating_label(1, "a label that is far too long")
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::Hardware { code: 9, .. }));
    assert_eq!(device.state(), DeviceState::Standby);

    device.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_external_range_override_drives_move_estimate() {
    let script = ScriptedTransport::healthy();
    let device = open_device(&script, manual_polling()).await;
    device.refresh().await.unwrap();

    // 100 nm of a 200 nm range at 5 s full scale: 2.5 s
    device.set_grating_wavelength_range(200.0);
    device.set_wavelength(600.0).await.unwrap();
    // mirrored into the snapshot by the actor, not by the caller
    assert_eq!(device.snapshot().wavelength_unit_range, 1200.0);

    sleep(Duration::from_millis(2400)).await;
    device.refresh().await.unwrap();
    assert_eq!(device.state(), DeviceState::Moving);

    sleep(Duration::from_millis(200)).await;
    device.refresh().await.unwrap();
    assert_eq!(device.state(), DeviceState::Standby);
    assert_eq!(device.snapshot().wavelength_unit_range, 200.0);

    device.shutdown().await.unwrap();
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_slow_command_times_out_caller() {
    let script = ScriptedTransport::healthy();
    let device = open_device(&script, manual_polling()).await;
    script.delay_on("GOWAVE 600.000000", Duration::from_secs(2));

    let err = device.set_wavelength(600.0).await.unwrap_err();
    assert_eq!(
        err,
        DeviceError::Timeout {
            operation: "set_wavelength",
            timeout_ms: 1000
        }
    );

    // the actor still completes the move once the instrument answers
    sleep(Duration::from_millis(1500)).await;
    assert_eq!(device.state(), DeviceState::Moving);

    device.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_commands_preempt_pending_poll() {
    let script = ScriptedTransport::healthy();
    let config = DeviceConfig {
        polling_period_ms: 100,
        filter_write_delay_ms: 0,
        ..DeviceConfig::default()
    };
    let device = open_device(&script, config).await;
    script.clear_log();
    script.delay_on("FILTER 2", Duration::from_millis(300));

    let mover = device.clone();
    let filter = tokio::spawn(async move { mover.set_filter_number(2).await });
    sleep(Duration::from_millis(50)).await;
    // queued while FILTER 2 is in flight and several ticks are overdue
    device.abort().await.unwrap();
    filter.await.unwrap().unwrap();

    // a tick may land right after open; what matters is that nothing runs between the
    // move and the abort queued behind it
    let log = script.commands();
    let filter_at = log.iter().position(|c| c == "FILTER 2").unwrap();
    assert_eq!(log[filter_at + 1], "ABORT");

    device.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_refresh_yields_to_later_commands() {
    let script = ScriptedTransport::healthy();
    let config = DeviceConfig {
        filter_write_delay_ms: 0,
        ..manual_polling()
    };
    let device = open_device(&script, config).await;
    script.clear_log();
    script.delay_on("FILTER 2", Duration::from_millis(300));

    let mover = device.clone();
    let filter = tokio::spawn(async move { mover.set_filter_number(2).await });
    sleep(Duration::from_millis(10)).await;
    let poller = device.clone();
    let refresh = tokio::spawn(async move { poller.refresh().await });
    sleep(Duration::from_millis(10)).await;
    device.abort().await.unwrap();

    filter.await.unwrap().unwrap();
    refresh.await.unwrap().unwrap();

    // the abort overtook the earlier refresh, which then saw the aborted move
    assert_eq!(script.commands(), vec!["FILTER 2", "ABORT"]);
    assert_eq!(
        device.get_state_and_status(),
        (DeviceState::Standby, "User abort".to_string())
    );

    device.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_exchanges_are_never_interleaved() {
    let script = ScriptedTransport::healthy();
    let device = open_device(&script, manual_polling()).await;
    script.delay_on("WAVE?", Duration::from_millis(100));
    script.delay_on("UNITS NM", Duration::from_millis(100));
    script.delay_on("GRAT1LABEL VIS", Duration::from_millis(100));

    let (poll, unit, label) = tokio::join!(
        device.refresh(),
        device.set_unit(OperatingUnit::Nanometers),
        device.set_grating_label(1, "VIS"),
    );
    poll.unwrap();
    unit.unwrap();
    label.unwrap();

    assert_eq!(script.max_in_flight(), 1);
    assert_eq!(device.state(), DeviceState::Standby);

    device.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_readers_see_consistent_state_and_status() {
    let script = ScriptedTransport::healthy();
    let config = DeviceConfig {
        polling_period_ms: 50,
        filter_write_delay_ms: 200,
        ..DeviceConfig::default()
    };
    let device = open_device(&script, config).await;

    let reader = device.clone();
    let readers = tokio::spawn(async move {
        for _ in 0..200 {
            let (state, status) = reader.get_state_and_status();
            match state {
                DeviceState::Moving => assert!(status.ends_with("in progress..."), "{status}"),
                DeviceState::Standby => assert!(
                    status.ends_with("Device is up and ready") || status == "User abort",
                    "{status}"
                ),
                other => panic!("unexpected state {other}"),
            }
            sleep(Duration::from_millis(5)).await;
        }
    });

    for number in [2, 1, 2] {
        device.set_filter_number(number).await.unwrap();
        sleep(Duration::from_millis(300)).await;
    }
    readers.await.unwrap();

    device.shutdown().await.unwrap();
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_polling() {
    let script = ScriptedTransport::healthy();
    let device = open_device(&script, DeviceConfig::default()).await;

    device.shutdown().await.unwrap();
    script.clear_log();
    sleep(Duration::from_secs(5)).await;
    assert!(script.commands().is_empty());

    assert_eq!(
        device.set_wavelength(600.0).await,
        Err(DeviceError::ActorUnavailable)
    );
    assert_eq!(device.refresh().await, Err(DeviceError::ActorUnavailable));
}
