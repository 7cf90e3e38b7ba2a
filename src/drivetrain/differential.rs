// ==============================================================================
// differential.rs - LEFT/RIGHT TORQUE SPLIT ON ONE AXLE
// ------------------------------------------------------------------------------
// Per tick:
//   l, r  = |left rpm|, |right rpm|
//   slip  = |l - r| / (l + r)          (0 when both are stationary)
//   side  = +/- slip * 0.5             (positive on the faster wheel)
//
//   T     = torque_in * final_drive
//   out_s = T/2 - T * side_ratio_s     (left + right == T, always)
//
// Policies:
//   Open       : full side ratio. The faster (less resisted) wheel gets LESS
//                torque. This is deliberate: a lifted wheel receives ~0.
//   Limited    : side ratio damped by (1 - lock / 100)
//   FullLocked : even split, both wheel spins coupled by the axle
//   Direct     : even split, no coupling
// ==============================================================================

use serde::{Deserialize, Serialize};

use crate::config::DifferentialConfig;
use crate::drivetrain::types::sanitize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifferentialType {
    Open,
    Limited,
    FullLocked,
    Direct,
}

#[derive(Debug, Clone)]
pub struct Differential {
    kind: DifferentialType,
    lock_percentage: f32,
    final_drive: f32,
    axle: usize,

    left_slip_ratio: f32,
    right_slip_ratio: f32,
    received_torque: f32,
    left_torque: f32,
    right_torque: f32,
}

impl Differential {
    pub fn new(cfg: &DifferentialConfig) -> Self {
        Self {
            kind: cfg.kind,
            lock_percentage: cfg.lock_percentage.clamp(0.0, 100.0),
            final_drive: cfg.final_drive,
            axle: cfg.axle,
            left_slip_ratio: 0.0,
            right_slip_ratio: 0.0,
            received_torque: 0.0,
            left_torque: 0.0,
            right_torque: 0.0,
        }
    }

    /// Splits `torque` between the two wheels of the bound axle.
    pub fn split(&mut self, torque: f32, left_rpm: f32, right_rpm: f32) -> (f32, f32) {
        self.received_torque = sanitize(torque, 0.0);
        let total = self.received_torque * self.final_drive;

        let (left_ratio, right_ratio) = self.side_ratios(left_rpm, right_rpm);
        self.left_slip_ratio = left_ratio;
        self.right_slip_ratio = right_ratio;

        self.left_torque = total * 0.5 - total * left_ratio;
        self.right_torque = total * 0.5 - total * right_ratio;
        (self.left_torque, self.right_torque)
    }

    fn side_ratios(&self, left_rpm: f32, right_rpm: f32) -> (f32, f32) {
        let l = sanitize(left_rpm, 0.0).abs();
        let r = sanitize(right_rpm, 0.0).abs();
        let sum = l + r;
        if sum <= 1e-3 {
            return (0.0, 0.0);
        }

        let slip = ((l - r).abs() / sum).clamp(0.0, 1.0);
        let bias = match self.kind {
            DifferentialType::Open => slip * 0.5,
            DifferentialType::Limited => slip * 0.5 * (1.0 - self.lock_percentage / 100.0),
            DifferentialType::FullLocked | DifferentialType::Direct => 0.0,
        };

        // faster side gets the positive ratio
        if l >= r { (bias, -bias) } else { (-bias, bias) }
    }

    /// FullLocked axles share one spin speed.
    pub fn couples_wheels(&self) -> bool {
        self.kind == DifferentialType::FullLocked
    }

    pub fn kind(&self) -> DifferentialType { self.kind }
    pub fn axle(&self) -> usize { self.axle }
    pub fn final_drive(&self) -> f32 { self.final_drive }
    pub fn slip_ratios(&self) -> (f32, f32) { (self.left_slip_ratio, self.right_slip_ratio) }
    pub fn output(&self) -> (f32, f32) { (self.left_torque, self.right_torque) }
    pub fn received_torque(&self) -> f32 { self.received_torque }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn diff(kind: DifferentialType, lock: f32) -> Differential {
        Differential::new(&DifferentialConfig { kind, lock_percentage: lock, final_drive: 4.1, axle: 0 })
    }

    #[test]
    fn every_policy_conserves_torque() {
        let mut rng = StdRng::seed_from_u64(3);
        for kind in [DifferentialType::Open, DifferentialType::Limited, DifferentialType::FullLocked, DifferentialType::Direct] {
            let mut d = diff(kind, rng.gen_range(0.0..100.0));
            for _ in 0..2_000 {
                let torque = rng.gen_range(-800.0..800.0);
                let (l, r) = d.split(torque, rng.gen_range(-3000.0..3000.0), rng.gen_range(-3000.0..3000.0));
                let expected = torque * 4.1;
                assert_abs_diff_eq!(l + r, expected, epsilon = expected.abs() * 1e-5 + 1e-3);
            }
        }
    }

    #[test]
    fn open_diff_starves_lifted_spinning_wheel() {
        let mut d = diff(DifferentialType::Open, 0.0);
        // left wheel held still, right wheel spinning freely in the air
        let (l, r) = d.split(300.0, 0.0, 2_000.0);
        assert_abs_diff_eq!(r, 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(l, 300.0 * 4.1, epsilon = 1e-2);
    }

    #[test]
    fn limited_slip_narrows_the_bias() {
        let mut open = diff(DifferentialType::Open, 0.0);
        let mut lsd = diff(DifferentialType::Limited, 60.0);
        let (ol, _) = open.split(100.0, 500.0, 1_000.0);
        let (ll, _) = lsd.split(100.0, 500.0, 1_000.0);
        let even = 100.0 * 4.1 * 0.5;
        assert!(ol > ll && ll > even);
    }

    #[test]
    fn fully_locked_limited_matches_even_split() {
        let mut d = diff(DifferentialType::Limited, 100.0);
        let (l, r) = d.split(200.0, 100.0, 1_500.0);
        assert_abs_diff_eq!(l, r, epsilon = 1e-3);
    }

    #[test]
    fn locked_and_direct_split_evenly() {
        for kind in [DifferentialType::FullLocked, DifferentialType::Direct] {
            let mut d = diff(kind, 0.0);
            let (l, r) = d.split(100.0, 0.0, 900.0);
            assert_abs_diff_eq!(l, r);
        }
        assert!(diff(DifferentialType::FullLocked, 0.0).couples_wheels());
        assert!(!diff(DifferentialType::Direct, 0.0).couples_wheels());
    }

    #[test]
    fn stationary_wheels_split_evenly() {
        let mut d = diff(DifferentialType::Open, 0.0);
        let (l, r) = d.split(50.0, 0.0, 0.0);
        assert_abs_diff_eq!(l, r);
        assert_eq!(d.slip_ratios(), (0.0, 0.0));
    }
}
