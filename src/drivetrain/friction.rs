//! Tire friction curves and ground materials.
//!
//! A curve maps |slip| to a friction coefficient: it rises to an extremum,
//! falls off toward an asymptote, then stays flat. Multiplied by the normal
//! load it gives the force the contact patch can carry.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrictionCurve {
    pub extremum_slip: f32,
    pub extremum_value: f32,
    pub asymptote_slip: f32,
    pub asymptote_value: f32,
    pub stiffness: f32,
}

impl Default for FrictionCurve {
    fn default() -> Self {
        Self {
            extremum_slip: 0.2,
            extremum_value: 1.0,
            asymptote_slip: 0.8,
            asymptote_value: 0.75,
            stiffness: 1.0,
        }
    }
}

impl FrictionCurve {
    /// Friction coefficient for the given slip magnitude, before stiffness.
    pub fn shape(&self, slip: f32) -> f32 {
        let s = if slip.is_finite() { slip.abs() } else { 0.0 };
        let ext = self.extremum_slip.max(1e-4);
        let asym = self.asymptote_slip.max(ext + 1e-4);

        if s <= ext {
            let t = s / ext;
            // ease-out rise: steep near zero, flat at the peak
            self.extremum_value * t * (2.0 - t)
        } else if s < asym {
            let t = (s - ext) / (asym - ext);
            let t = t * t * (3.0 - 2.0 * t);
            self.extremum_value + (self.asymptote_value - self.extremum_value) * t
        } else {
            self.asymptote_value
        }
    }

    /// Friction coefficient including stiffness scaling.
    pub fn evaluate(&self, slip: f32, stiffness_scale: f32) -> f32 {
        self.shape(slip) * self.stiffness * stiffness_scale.max(0.0)
    }

    /// Peak coefficient including stiffness scaling.
    pub fn peak(&self, stiffness_scale: f32) -> f32 {
        self.extremum_value.max(self.asymptote_value) * self.stiffness * stiffness_scale.max(0.0)
    }
}

/// Surface properties keyed by ground-material index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundMaterial {
    pub name: String,
    pub forward: FrictionCurve,
    pub sideways: FrictionCurve,
    /// Combined slip above this marks the wheel as skidding.
    pub slip_threshold: f32,
    /// Extra wheel-spin damping (N*m per rad/s), e.g. grass or sand drag.
    pub damping: f32,
}
