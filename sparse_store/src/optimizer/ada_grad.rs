// SPDX-License-Identifier: MIT OR Apache-2.0
//! AdaGrad sparse optimizer family.
//!
//! Per key the family keeps the weight vector `w`, one accumulated
//! squared-gradient scalar `g2sum`, and an exposure counter `show`:
//!
//! ```text
//! g2sum += mean(g^2)
//! w     -= learning_rate * g / sqrt(g2sum + epsilon)
//! show  += batch_show
//! ```
//!
//! The show-decay pass multiplies `show` by `show_decay_rate`, aging out
//! keys that stop being observed.

use serde::{Deserialize, Serialize};

use crate::compact::CompactVector;
use crate::kernel::OptimizerFamily;
use crate::optimizer::GradientRecord;

/// AdaGrad hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaGrad {
    /// Base step size.
    pub learning_rate: f32,
    /// Denominator fuzz for keys with a tiny accumulator.
    pub epsilon: f32,
    /// Starting value of the squared-gradient accumulator.
    pub initial_g2sum: f32,
    /// Per-decay-pass multiplier applied to each key's show counter.
    pub show_decay_rate: f32,
}

impl Default for AdaGrad {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            epsilon: 1e-8,
            initial_g2sum: 0.0,
            show_decay_rate: 0.98,
        }
    }
}

/// Per-key AdaGrad record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaGradValue {
    w: CompactVector,
    g2sum: f32,
    show: f32,
}

impl AdaGradValue {
    /// Accumulated exposure count.
    #[must_use]
    pub fn show(&self) -> f32 {
        self.show
    }
}

impl OptimizerFamily for AdaGrad {
    const FAMILY: &'static str = "ada_grad";

    type Value = AdaGradValue;
    type Globals = ();

    fn init_value(&self, dim: usize) -> AdaGradValue {
        AdaGradValue {
            w: CompactVector::zeros(dim),
            g2sum: self.initial_g2sum,
            show: 0.0,
        }
    }

    fn weight<'a>(&self, value: &'a AdaGradValue) -> &'a [f32] {
        value.w.as_slice()
    }

    fn apply(&self, value: &mut AdaGradValue, _globals: &mut (), record: &GradientRecord) {
        value.show += record.batch_show;

        let dim = value.w.len();
        let mut grad_sq = 0.0f32;
        for &g in record.grad.iter() {
            grad_sq += g * g;
        }
        value.g2sum += grad_sq / dim as f32;

        let denom = (value.g2sum + self.epsilon).sqrt();
        for (w, &g) in value.w.as_mut_slice().iter_mut().zip(record.grad.iter()) {
            *w -= self.learning_rate * g / denom;
        }
    }

    fn show_decay(&self, value: &mut AdaGradValue) {
        value.show *= self.show_decay_rate;
    }

    fn value_bytes(&self, dim: usize) -> usize {
        std::mem::size_of::<AdaGradValue>() + CompactVector::spill_bytes(dim)
    }
}
