use std::time::Duration;

use powderdose_control::{
    purge, CalibrationTable, ConfigError, ControlError, DispenseConfig, DispenseController,
    DispenseRequest, DispenseStage, MeasureSettings, MemoryLog, NullLog, PurgeConfig,
};
use powderdose_frame::{Command, Direction, FilterType};
use powderdose_session::{Device, DeviceState, SessionConfig};
use powderdose_sim::{SimConfig, SimulatedRig};

fn session_config() -> SessionConfig {
    SessionConfig {
        request_timeout: Duration::from_millis(500),
        measure_timeout: Duration::from_millis(500),
        ready_timeout: Duration::from_millis(500),
        ..SessionConfig::default()
    }
}

fn connect(config: SimConfig) -> (SimulatedRig, Device<SimulatedRig>) {
    let rig = SimulatedRig::new(config);
    let device = Device::connect(rig.clone(), session_config()).expect("sim should connect");
    rig.clear_commands();
    (rig, device)
}

fn instant_config() -> DispenseConfig {
    DispenseConfig {
        scale_settle_secs: 0.0,
        tare_settle_secs: 0.0,
        stepper_settle_secs: 0.0,
        burst_settle_secs: 0.0,
        ..DispenseConfig::default()
    }
}

fn table(factor: f64) -> CalibrationTable {
    let mut table = CalibrationTable::default();
    table.set_auger_factor("8mm_base", "dishwasher_salt", factor);
    table
}

fn request(target: f64) -> DispenseRequest {
    DispenseRequest {
        target_grams: target,
        auger: "8mm_base".to_string(),
        powder: "dishwasher_salt".to_string(),
        direction: Direction::Forward,
    }
}

fn dispensed_steps(commands: &[Command]) -> Vec<u32> {
    commands
        .iter()
        .filter_map(|command| match command {
            Command::Dispense { steps, .. } => Some(*steps),
            _ => None,
        })
        .collect()
}

#[test]
fn five_gram_target_with_calibrated_auger() {
    let (rig, mut device) = connect(SimConfig::default());
    let controller = DispenseController::new(instant_config(), MeasureSettings::default());
    let mut log = MemoryLog::default();

    let outcome = controller
        .dispense(&mut device, &table(0.01), &request(5.0), &mut log)
        .expect("dispense should finish");

    let commands = rig.commands();
    assert_eq!(dispensed_steps(&commands), vec![250, 400]);
    assert_eq!(commands.first(), Some(&Command::ScaleOn));
    assert_eq!(commands[1], Command::Tare);
    assert_eq!(
        commands[2],
        Command::Meas {
            samples: 100,
            filter: FilterType::Ewma
        }
    );
    assert_eq!(
        &commands[commands.len() - 2..],
        &[Command::DispenserOff, Command::ScaleOff]
    );

    assert_eq!(outcome.lump_steps, 250);
    assert_eq!(outcome.total_steps, 650);
    assert!(outcome.measured >= 4.95);
    assert_eq!(outcome.stages.len(), 3);
    assert_eq!(outcome.stages[0].stage, DispenseStage::CoarseFill);
    assert_eq!(outcome.stages[0].bursts, 1);
    assert_eq!(outcome.stages[1].bursts, 0);
    assert_eq!(outcome.stages[2].bursts, 0);

    assert!(!rig.stepper_on());
    assert!(!rig.scale_on());
    assert_eq!(device.state(), DeviceState::default());

    assert_eq!(log.rows.len(), 1);
    let row = &log.rows[0];
    assert_eq!(row.desired_amount, Some(5.0));
    assert_eq!(row.steps, Some(650));
    assert_eq!(row.auger_type.as_deref(), Some("8mm_base"));
    assert_eq!(row.powder_type.as_deref(), Some("dishwasher_salt"));
    assert_eq!(row.filter_type.as_deref(), Some("EWMA"));
}

#[test]
fn overestimated_factor_walks_through_every_stage() {
    // Real auger delivers a tenth of what the table claims.
    let (rig, mut device) = connect(SimConfig::default().with_grams_per_step(0.001));
    let controller = DispenseController::new(instant_config(), MeasureSettings::default());

    let outcome = controller
        .dispense(&mut device, &table(0.01), &request(5.0), &mut NullLog)
        .expect("dispense should finish");

    let [coarse, medium, fine] = &outcome.stages[..] else {
        panic!("expected three stages, got {:?}", outcome.stages);
    };
    assert_eq!(coarse.bursts, 10);
    assert!((30..=31).contains(&medium.bursts), "{medium:?}");
    assert!((19..=21).contains(&fine.bursts), "{fine:?}");
    assert!(outcome.measured >= 4.95 - 1e-9);
    assert!(outcome.measured < 5.0);

    let steps = dispensed_steps(&rig.commands());
    assert_eq!(steps[0], 250);
    assert!(steps[1..=10].iter().all(|&s| s == 400));
    assert!(steps[11..].iter().all(|&s| s == 20 || s == 5));
    assert_eq!(
        u64::from(steps.iter().sum::<u32>()),
        outcome.total_steps
    );
}

#[test]
fn empty_hopper_stalls_and_powers_down() {
    let (rig, mut device) = connect(SimConfig::default().with_hopper(3.0));
    let config = DispenseConfig {
        max_bursts_per_stage: 20,
        ..instant_config()
    };
    let controller = DispenseController::new(config, MeasureSettings::default());

    let err = controller
        .dispense(&mut device, &table(0.01), &request(5.0), &mut NullLog)
        .unwrap_err();

    match err {
        ControlError::ConvergenceStalled {
            stage,
            bursts,
            measured,
            target,
        } => {
            assert_eq!(stage, DispenseStage::CoarseFill);
            assert_eq!(bursts, 20);
            assert!((measured - 3.0).abs() < 1e-6);
            assert!((target - 4.0).abs() < 1e-9);
        }
        other => panic!("expected stall, got {other:?}"),
    }
    assert!(!rig.stepper_on());
    assert!(!rig.scale_on());
    assert_eq!(device.state(), DeviceState::default());
}

#[test]
fn stage_time_limit_stalls() {
    let (_rig, mut device) = connect(SimConfig::default().with_hopper(3.0));
    let config = DispenseConfig {
        burst_settle_secs: 0.02,
        max_stage_secs: Some(0.05),
        ..instant_config()
    };
    let controller = DispenseController::new(config, MeasureSettings::default());

    let err = controller
        .dispense(&mut device, &table(0.01), &request(5.0), &mut NullLog)
        .unwrap_err();
    assert!(
        matches!(err, ControlError::ConvergenceStalled { bursts, .. } if bursts < 200),
        "{err:?}"
    );
}

#[test]
fn missing_calibration_sends_nothing() {
    let (rig, mut device) = connect(SimConfig::default());
    let controller = DispenseController::new(instant_config(), MeasureSettings::default());

    let err = controller
        .dispense(
            &mut device,
            &CalibrationTable::default(),
            &request(5.0),
            &mut NullLog,
        )
        .unwrap_err();

    assert!(matches!(
        err,
        ControlError::Config(ConfigError::MissingAuger { .. })
    ));
    assert!(rig.commands().is_empty());
}

#[test]
fn non_positive_target_rejected() {
    let (rig, mut device) = connect(SimConfig::default());
    let controller = DispenseController::default();
    for target in [0.0, -1.0, f64::NAN] {
        let err = controller
            .dispense(&mut device, &table(0.01), &request(target), &mut NullLog)
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidTarget(_)));
    }
    assert!(rig.commands().is_empty());
}

#[test]
fn malformed_weight_is_retried() {
    let (_rig, mut device) = connect(SimConfig::default().with_malformed_weights(2));
    let controller = DispenseController::new(instant_config(), MeasureSettings::default());
    let outcome = controller
        .dispense(&mut device, &table(0.01), &request(5.0), &mut NullLog)
        .expect("retries should absorb malformed replies");
    assert!(outcome.measured >= 4.95);
}

#[test]
fn chatter_before_measurements_is_skipped() {
    let (_rig, mut device) = connect(SimConfig::default().with_chatter());
    let controller = DispenseController::new(instant_config(), MeasureSettings::default());
    let outcome = controller
        .dispense(&mut device, &table(0.01), &request(2.0), &mut NullLog)
        .expect("dispense should finish");
    assert!(outcome.measured >= 1.98);
}

fn instant_purge() -> PurgeConfig {
    PurgeConfig {
        settle_secs: 0.0,
        scale_settle_secs: 0.0,
        ..PurgeConfig::default()
    }
}

#[test]
fn purge_stops_when_auger_runs_empty() {
    let (rig, mut device) = connect(
        SimConfig::default()
            .with_grams_per_step(0.001)
            .with_hopper(1.0),
    );

    let outcome = purge(
        &mut device,
        &instant_purge(),
        &MeasureSettings::default(),
        Direction::Forward,
    )
    .expect("purge should settle");

    assert_eq!(outcome.iterations, 6);
    assert_eq!(outcome.total_steps, 1200);
    assert!((outcome.final_weight - 1.0).abs() < 1e-6);
    assert!(!rig.stepper_on());
    assert!(!rig.scale_on());

    let commands = rig.commands();
    assert_eq!(
        &commands[..3],
        &[Command::DispenserOn, Command::ScaleOn, Command::Tare]
    );
}

#[test]
fn purge_gives_up_on_endless_powder() {
    let (rig, mut device) = connect(SimConfig::default());
    let config = PurgeConfig {
        max_iterations: 5,
        ..instant_purge()
    };

    let err = purge(
        &mut device,
        &config,
        &MeasureSettings::default(),
        Direction::Forward,
    )
    .unwrap_err();

    assert!(matches!(
        err,
        ControlError::ConvergenceStalled {
            stage: DispenseStage::Purge,
            bursts: 5,
            ..
        }
    ));
    assert_eq!(rig.total_steps(), 1000);
    assert!(!rig.stepper_on());
    assert!(!rig.scale_on());
}
