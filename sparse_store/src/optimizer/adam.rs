// SPDX-License-Identifier: MIT OR Apache-2.0
//! Adam-style sparse optimizer family.
//!
//! Per key the family keeps the weight vector `w`, biased first/second
//! moment estimates `m` and `v`, and an exposure counter `show`. Bias
//! correction uses two kernel-global accumulated power terms shared across
//! all keys, advanced once per applied record:
//!
//! ```text
//! beta1_power *= beta1
//! beta2_power *= beta2
//! alpha = learning_rate * sqrt(1 - beta2_power) / (1 - beta1_power)
//! m     = beta1 * m + (1 - beta1) * g
//! v     = beta2 * v + (1 - beta2) * g^2
//! w    -= alpha * m / (sqrt(v) + epsilon)
//! show += batch_show
//! ```
//!
//! Lazy creation default-initializes every record to all-zero weights and
//! moments. The show-decay pass is a no-op for this family; the show
//! counter is kept as an exposure statistic only.

use serde::{Deserialize, Serialize};

use crate::compact::CompactVector;
use crate::kernel::OptimizerFamily;
use crate::optimizer::GradientRecord;

/// Adam hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adam {
    /// Base step size.
    pub learning_rate: f32,
    /// First-moment decay rate.
    pub beta1: f32,
    /// Second-moment decay rate.
    pub beta2: f32,
    /// Denominator fuzz keeping early steps finite.
    pub epsilon: f32,
}

impl Default for Adam {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

/// Per-key Adam record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdamValue {
    w: CompactVector,
    m: CompactVector,
    v: CompactVector,
    show: f32,
}

impl AdamValue {
    fn new(dim: usize) -> Self {
        Self {
            w: CompactVector::zeros(dim),
            m: CompactVector::zeros(dim),
            v: CompactVector::zeros(dim),
            show: 0.0,
        }
    }

    /// Accumulated exposure count.
    #[must_use]
    pub fn show(&self) -> f32 {
        self.show
    }
}

/// Accumulated beta power terms shared across all keys of one kernel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamGlobals {
    /// Running product of `beta1`, one factor per applied record.
    pub beta1_power: f32,
    /// Running product of `beta2`, one factor per applied record.
    pub beta2_power: f32,
}

impl Default for AdamGlobals {
    fn default() -> Self {
        Self {
            beta1_power: 1.0,
            beta2_power: 1.0,
        }
    }
}

impl OptimizerFamily for Adam {
    const FAMILY: &'static str = "adam";

    type Value = AdamValue;
    type Globals = AdamGlobals;

    fn init_value(&self, dim: usize) -> AdamValue {
        AdamValue::new(dim)
    }

    fn weight<'a>(&self, value: &'a AdamValue) -> &'a [f32] {
        value.w.as_slice()
    }

    fn apply(&self, value: &mut AdamValue, globals: &mut AdamGlobals, record: &GradientRecord) {
        globals.beta1_power *= self.beta1;
        globals.beta2_power *= self.beta2;
        let alpha =
            self.learning_rate * (1.0 - globals.beta2_power).sqrt() / (1.0 - globals.beta1_power);

        value.show += record.batch_show;

        let w = value.w.as_mut_slice();
        let m = value.m.as_mut_slice();
        let v = value.v.as_mut_slice();
        for i in 0..w.len() {
            let g = record.grad[i];
            m[i] = self.beta1 * m[i] + (1.0 - self.beta1) * g;
            v[i] = self.beta2 * v[i] + (1.0 - self.beta2) * g * g;
            w[i] -= alpha * m[i] / (v[i].sqrt() + self.epsilon);
        }
    }

    fn show_decay(&self, _value: &mut AdamValue) {}

    fn value_bytes(&self, dim: usize) -> usize {
        std::mem::size_of::<AdamValue>() + 3 * CompactVector::spill_bytes(dim)
    }
}
