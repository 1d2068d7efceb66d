use std::collections::VecDeque;
use std::time::Duration;

use powderdose_control::{
    run_auger_calibration, run_scale_calibration, run_sensitivity, AugerCalibration, AugerPlan,
    CalibrationRow, CalibrationTable, ControlError, DispenseConfig, DispenseController, DispenseRequest,
    MeasureSettings, MemoryLog, NullLog, OperatorInput, Progress, Prompt, Result, SampleSource,
    ScalePlan, SensitivityPlan,
};
use powderdose_frame::{Command, Direction};
use powderdose_session::{Device, SessionConfig};
use powderdose_sim::{SimConfig, SimulatedRig, DEFAULT_RAW_INTERCEPT, DEFAULT_RAW_SLOPE};

fn connect(config: SimConfig) -> (SimulatedRig, Device<SimulatedRig>) {
    let rig = SimulatedRig::new(config);
    let session = SessionConfig {
        request_timeout: Duration::from_millis(500),
        measure_timeout: Duration::from_millis(500),
        ready_timeout: Duration::from_millis(500),
        ..SessionConfig::default()
    };
    let device = Device::connect(rig.clone(), session).expect("sim should connect");
    rig.clear_commands();
    (rig, device)
}

fn auger_plan() -> AugerPlan {
    AugerPlan {
        auger: "8mm_base".to_string(),
        powder: "dishwasher_salt".to_string(),
        direction: Direction::Forward,
        min_steps: 100,
        max_steps: 500,
        interval: 100,
    }
}

#[test]
fn auger_calibration_recovers_grams_per_step() {
    let (rig, mut device) = connect(SimConfig::default());
    let mut log = MemoryLog::default();
    let mut operator = |prompt: &Prompt| -> Result<OperatorInput> {
        match prompt {
            Prompt::MeasuredMass { steps } => Ok(OperatorInput::Mass(f64::from(*steps) * 0.0123)),
            other => panic!("unexpected prompt {other:?}"),
        }
    };

    let report = run_auger_calibration(&mut device, auger_plan(), &mut operator, &mut log)
        .expect("calibration should finish");

    assert_eq!(report.points.len(), 5);
    assert!((report.grams_per_step() - 0.0123).abs() < 1e-12);
    assert!(report.fit.r_squared > 0.999_999);

    let mut table = CalibrationTable::default();
    report.apply_to(&mut table).unwrap();
    let factor = table.auger_factor("8mm_base", "dishwasher_salt").unwrap();
    assert!((factor - 0.0123).abs() < 1e-12);

    let commands = rig.commands();
    assert_eq!(commands.first(), Some(&Command::DispenserOn));
    assert_eq!(commands.last(), Some(&Command::DispenserOff));
    let steps: Vec<u32> = commands
        .iter()
        .filter_map(|command| match command {
            Command::Dispense { steps, .. } => Some(*steps),
            _ => None,
        })
        .collect();
    assert_eq!(steps, vec![100, 200, 300, 400, 500]);

    assert_eq!(log.rows.len(), 5);
    assert_eq!(log.rows[2].steps, Some(300));
    assert!(!rig.stepper_on());
}

#[test]
fn auger_calibration_waits_at_every_gate() {
    let (rig, mut device) = connect(SimConfig::default());
    let mut log = NullLog;
    let mut calibration = AugerCalibration::new(auger_plan()).unwrap();
    assert_eq!(calibration.prompt(), None);

    let progress = calibration
        .advance(&mut device, OperatorInput::Continue, &mut log)
        .unwrap();
    assert_eq!(
        progress,
        Progress::Awaiting(Prompt::MeasuredMass { steps: 100 })
    );

    let err = calibration
        .advance(&mut device, OperatorInput::Continue, &mut log)
        .unwrap_err();
    assert!(matches!(err, ControlError::UnexpectedInput { .. }));
    assert_eq!(
        calibration.prompt(),
        Some(Prompt::MeasuredMass { steps: 100 })
    );
    assert!(rig.stepper_on());

    let progress = calibration
        .advance(&mut device, OperatorInput::Mass(1.2), &mut log)
        .unwrap();
    assert_eq!(
        progress,
        Progress::Awaiting(Prompt::MeasuredMass { steps: 200 })
    );
    assert_eq!(calibration.points().len(), 1);

    let err = calibration
        .advance(&mut device, OperatorInput::Abort, &mut log)
        .unwrap_err();
    assert!(matches!(err, ControlError::Aborted));
    assert!(!rig.stepper_on());
    assert!(calibration.is_finished());

    let err = calibration
        .advance(&mut device, OperatorInput::Mass(2.4), &mut log)
        .unwrap_err();
    assert!(matches!(err, ControlError::AlreadyFinished));
}

#[test]
fn operator_failure_aborts_auger_calibration() {
    let (rig, mut device) = connect(SimConfig::default());
    let mut operator =
        |_: &Prompt| -> Result<OperatorInput> { Err(ControlError::InvalidPlan("no tty".into())) };

    let err = run_auger_calibration(&mut device, auger_plan(), &mut operator, &mut NullLog)
        .unwrap_err();
    assert!(matches!(err, ControlError::InvalidPlan(_)));
    assert!(!rig.stepper_on());
}

#[test]
fn operator_failure_powers_down_scale_calibration() {
    let (rig, mut device) = connect(SimConfig::default());
    let mut operator = |prompt: &Prompt| -> Result<OperatorInput> {
        assert_eq!(prompt, &Prompt::SetupScale);
        Err(ControlError::InvalidPlan("no tty".into()))
    };

    let err = run_scale_calibration(
        &mut device,
        scale_plan(Some(vec![5.0])),
        &mut operator,
        &mut NullLog,
    )
    .unwrap_err();
    assert!(matches!(err, ControlError::InvalidPlan(_)));
    assert!(!rig.scale_on());
    assert!(!rig.stepper_on());
}

/// Plays the operator against the simulated pan.
fn pan_operator(
    rig: SimulatedRig,
    mut weights: VecDeque<f64>,
) -> impl FnMut(&Prompt) -> Result<OperatorInput> {
    move |prompt: &Prompt| {
        let input = match prompt {
            Prompt::SetupScale => OperatorInput::Continue,
            Prompt::ClearPan => {
                rig.set_external_load(0.0);
                OperatorInput::Continue
            }
            Prompt::NextWeight => match weights.pop_front() {
                Some(grams) => OperatorInput::Weight(grams),
                None => OperatorInput::Finish,
            },
            Prompt::PlaceWeight { grams } => {
                rig.set_external_load(*grams);
                OperatorInput::Continue
            }
            other => panic!("unexpected prompt {other:?}"),
        };
        Ok(input)
    }
}

fn scale_plan(known_weights: Option<Vec<f64>>) -> ScalePlan {
    ScalePlan {
        known_weights,
        num_meas: 3,
        measure: MeasureSettings::default(),
        settle: Duration::ZERO,
    }
}

#[test]
fn scale_calibration_with_known_weights() {
    let (rig, mut device) = connect(SimConfig::default());
    let mut operator = pan_operator(rig.clone(), VecDeque::new());
    let mut log = MemoryLog::default();

    let report = run_scale_calibration(
        &mut device,
        scale_plan(Some(vec![5.0, 10.0, 20.0])),
        &mut operator,
        &mut log,
    )
    .expect("calibration should finish");

    let grams: Vec<f64> = report.points.iter().map(|p| p.grams).collect();
    assert_eq!(grams, vec![0.0, 5.0, 0.0, 10.0, 0.0, 20.0]);
    assert!((report.fit.slope - DEFAULT_RAW_SLOPE).abs() < 0.5);
    assert!((report.fit.intercept - DEFAULT_RAW_INTERCEPT).abs() < 1.0);

    let mut table = CalibrationTable::default();
    report.apply_to(&mut table).unwrap();
    assert_eq!(table.scale, report.params());

    assert_eq!(
        log.calibrations,
        vec![CalibrationRow {
            slope: report.fit.slope,
            intercept: report.fit.intercept,
            r_squared: report.fit.r_squared,
            points: 6,
        }]
    );
    assert!(log.rows.is_empty());

    let commands = rig.commands();
    assert_eq!(&commands[..2], &[Command::DispenserOn, Command::ScaleOn]);
    assert_eq!(
        &commands[commands.len() - 2..],
        &[Command::DispenserOff, Command::ScaleOff]
    );
}

#[test]
fn scale_calibration_asks_for_weights_until_done() {
    let (rig, mut device) = connect(SimConfig::default());
    let mut operator = pan_operator(rig.clone(), VecDeque::from([2.0, 50.0]));

    let report = run_scale_calibration(&mut device, scale_plan(None), &mut operator, &mut NullLog)
        .expect("calibration should finish");

    let grams: Vec<f64> = report.points.iter().map(|p| p.grams).collect();
    assert_eq!(grams, vec![0.0, 2.0, 0.0, 50.0, 0.0]);
    assert!((report.fit.slope - DEFAULT_RAW_SLOPE).abs() < 0.5);
    assert!(!rig.scale_on());
}

#[test]
fn scale_calibration_without_weights_cannot_fit() {
    let (rig, mut device) = connect(SimConfig::default());
    let mut operator = pan_operator(rig.clone(), VecDeque::new());

    let mut log = MemoryLog::default();

    let err = run_scale_calibration(&mut device, scale_plan(None), &mut operator, &mut log)
        .unwrap_err();
    assert!(matches!(err, ControlError::Fit(_)));
    assert!(log.calibrations.is_empty());
    assert!(!rig.scale_on());
    assert!(!rig.stepper_on());
}

#[test]
fn sensitivity_with_placed_samples() {
    let (rig, mut device) = connect(SimConfig::default());
    let controller = DispenseController::default();
    let mut log = MemoryLog::default();
    let placed = rig.clone();
    let mut operator = move |prompt: &Prompt| -> Result<OperatorInput> {
        match prompt {
            Prompt::PlaceSample { repetition, .. } if *repetition == 1 => {
                placed.set_external_load(2.5);
                Ok(OperatorInput::Continue)
            }
            Prompt::PlaceSample { .. } => Ok(OperatorInput::Continue),
            other => panic!("unexpected prompt {other:?}"),
        }
    };
    let plan = SensitivityPlan {
        reps: 2,
        samples: 3,
        source: SampleSource::Operator,
        scale_settle: Duration::ZERO,
    };

    let report = run_sensitivity(
        &mut device,
        &CalibrationTable::default(),
        &controller,
        &plan,
        &mut operator,
        &mut log,
    )
    .expect("sensitivity test should finish");

    assert_eq!(report.samples.len(), 6);
    assert!(report.samples[..3]
        .iter()
        .all(|s| s.repetition == 1 && (s.grams - 2.5).abs() < 1e-3));
    // The second repetition tares with the sample still on the pan.
    assert!(report.samples[3..]
        .iter()
        .all(|s| s.repetition == 2 && s.grams.abs() < 1e-3));
    assert_eq!(log.rows.len(), 6);
    assert_eq!(log.rows[4].repetition, Some(2));
    assert_eq!(log.rows[4].sample, Some(2));
    assert!(!rig.scale_on());
}

#[test]
fn sensitivity_with_dispensed_samples() {
    let (_rig, mut device) = connect(SimConfig::default());
    let mut table = CalibrationTable::default();
    table.set_auger_factor("8mm_base", "dishwasher_salt", 0.01);
    let controller = DispenseController::new(
        DispenseConfig {
            scale_settle_secs: 0.0,
            tare_settle_secs: 0.0,
            stepper_settle_secs: 0.0,
            burst_settle_secs: 0.0,
            ..DispenseConfig::default()
        },
        MeasureSettings::default(),
    );
    let mut log = MemoryLog::default();
    let mut operator =
        |prompt: &Prompt| -> Result<OperatorInput> { panic!("unexpected prompt {prompt:?}") };
    let plan = SensitivityPlan {
        reps: 1,
        samples: 2,
        source: SampleSource::Dispense(DispenseRequest {
            target_grams: 3.0,
            auger: "8mm_base".to_string(),
            powder: "dishwasher_salt".to_string(),
            direction: Direction::Forward,
        }),
        scale_settle: Duration::ZERO,
    };

    let report = run_sensitivity(
        &mut device,
        &table,
        &controller,
        &plan,
        &mut operator,
        &mut log,
    )
    .expect("sensitivity test should finish");

    assert_eq!(report.samples.len(), 2);
    assert!(report.samples.iter().all(|s| s.grams >= 2.97));
    assert_eq!(log.rows.len(), 2);
    assert_eq!(log.rows[1].desired_amount, Some(3.0));
    assert_eq!(log.rows[1].sample, Some(2));
}
