//! End-to-end scenarios driven through `Vehicle::step` with a synthetic host.

use approx::assert_abs_diff_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::PI;

use drivetrain_server::config::{DifferentialConfig, VehicleConfig};
use drivetrain_server::drivetrain::differential::{Differential, DifferentialType};
use drivetrain_server::drivetrain::gearbox::GearState;
use drivetrain_server::drivetrain::{ChassisState, DriverCommand, InputSurface, Side, WheelContact};
use drivetrain_server::vehicle::Vehicle;

const DT: f32 = 1.0 / 60.0;

fn full_throttle() -> InputSurface {
    InputSurface { throttle: 1.0, ..InputSurface::default() }
}

fn planted(load: f32) -> Vec<WheelContact> {
    (0..4)
        .map(|_| WheelContact { grounded: true, normal_force: load, ..WheelContact::airborne() })
        .collect()
}

#[test]
fn idle_start_settles_at_min_rpm() {
    let mut cfg = VehicleConfig::gt86();
    cfg.engine.start_running = false;
    let min_rpm = cfg.engine.min_rpm;
    let mut v = Vehicle::new(cfg).unwrap();
    assert!(!v.state().engine_running);
    assert_eq!(v.state().engine_rpm, 0.0);

    v.input_mut().push_command(DriverCommand::StartEngine);
    for _ in 0..30 {
        v.step(&ChassisState::default(), &[], DT);
    }
    assert!(v.state().engine_starting);
    assert!(!v.state().engine_running);

    for _ in 0..35 {
        v.step(&ChassisState::default(), &[], DT);
    }
    assert!(v.state().engine_running);
    assert!(!v.state().engine_starting);

    for _ in 0..60 {
        v.step(&ChassisState::default(), &[], DT);
    }
    assert_abs_diff_eq!(v.state().engine_rpm, min_rpm, epsilon = 1.0);
}

#[test]
fn automatic_upshift_from_first_gear() {
    let cfg = VehicleConfig::gt86();
    let first = cfg.gearbox.gear_ratios[0] * cfg.final_drive();
    let radius = cfg.drive_wheel_radius();
    let shifting_ticks = (cfg.gearbox.shifting_time / DT).round() as usize;
    let mut v = Vehicle::new(cfg).unwrap();
    v.input_mut().set_player(full_throttle());

    // Rolling without resistance: the body follows the engine through first gear.
    let mut speed = 0.0;
    let mut started = false;
    for _ in 0..900 {
        let chassis = ChassisState { linvel: [0.0, 0.0, speed], ..ChassisState::default() };
        v.step(&chassis, &[], DT);
        if v.state().shifting {
            started = true;
            break;
        }
        speed = v.state().engine_rpm / first * 2.0 * PI * radius / 60.0;
    }
    assert!(started, "no upshift within the run");
    assert_eq!(v.state().gear_state, GearState::Forward(0));
    assert_eq!(v.gearbox().shift_target(), Some(GearState::Forward(1)));

    let chassis = ChassisState { linvel: [0.0, 0.0, speed], ..ChassisState::default() };
    for _ in 0..shifting_ticks - 1 {
        v.step(&chassis, &[], DT);
        assert!(v.state().shifting);
    }
    v.step(&chassis, &[], DT);
    assert!(!v.state().shifting);
    assert_eq!(v.state().gear_state, GearState::Forward(1));
    assert_eq!(v.state().gear, 1);
}

#[test]
fn open_differential_starves_the_spinning_wheel() {
    let cfg = DifferentialConfig { kind: DifferentialType::Open, final_drive: 4.0, ..DifferentialConfig::default() };
    let mut diff = Differential::new(&cfg);

    // left wheel in the air with no rpm, right wheel spinning freely
    let (left, right) = diff.split(300.0, 0.0, 900.0);
    assert_abs_diff_eq!(right, 0.0, epsilon = 1e-3);
    assert_abs_diff_eq!(left + right, 300.0 * 4.0, epsilon = 1e-2);
}

#[test]
fn tcs_cuts_drive_on_the_next_tick() {
    let mut v = Vehicle::new(VehicleConfig::gt86()).unwrap();
    v.input_mut().set_player(full_throttle());
    let contacts = planted(3_300.0);
    let threshold = v.stability().config().tcs_threshold;

    let mut engaged_before = false;
    let mut checked = 0;
    for _ in 0..600 {
        v.step(&ChassisState::default(), &contacts, DT);

        let requested = v.differentials()[0].output().0;
        let applied = v.axles()[1].wheel(Side::Left).applied_motor_torque();
        if engaged_before && requested > 1.0 {
            assert!(applied < requested, "applied {applied} requested {requested}");
            checked += 1;
        }
        engaged_before = v.state().tcs && v.axles()[1].wheel(Side::Left).forward_slip() > threshold;
    }
    assert!(checked > 0, "tcs never engaged under wheelspin");
}

#[test]
fn differential_torque_is_conserved() {
    let mut rng = StdRng::seed_from_u64(7);
    for kind in [DifferentialType::Open, DifferentialType::Limited, DifferentialType::FullLocked, DifferentialType::Direct] {
        for _ in 0..500 {
            let cfg = DifferentialConfig {
                kind,
                lock_percentage: rng.gen_range(0.0..=100.0),
                final_drive: rng.gen_range(1.0..6.0),
                axle: 0,
            };
            let mut diff = Differential::new(&cfg);
            let torque = rng.gen_range(-800.0..800.0);
            let (l, r) = diff.split(torque, rng.gen_range(-3000.0..3000.0), rng.gen_range(-3000.0..3000.0));
            let expected = torque * cfg.final_drive;
            assert_abs_diff_eq!(l + r, expected, epsilon = 1e-2 * expected.abs().max(1.0));
        }
    }
}

#[test]
fn rpm_stays_in_bounds_under_random_throttle() {
    let mut rng = StdRng::seed_from_u64(11);
    let cfg = VehicleConfig::gt86();
    let max_rpm = cfg.engine.max_rpm;
    let mut v = Vehicle::new(cfg).unwrap();
    let contacts = planted(3_300.0);

    for _ in 0..1_200 {
        let throttle = rng.gen_range(0.0..=1.0);
        v.input_mut().set_player(InputSurface { throttle, ..InputSurface::default() });
        v.step(&ChassisState::default(), &contacts, DT);
        let rpm = v.state().engine_rpm;
        assert!((0.0..=max_rpm).contains(&rpm), "rpm {rpm}");
        assert!(v.state().gear < v.gearbox().gear_count());
    }
}
