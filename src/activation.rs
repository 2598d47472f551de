use std::fmt;

use crate::error::{Error, Result};

/// Scalar function applied element-wise after a layer's weights and bias.
///
/// Networks persist only the [`tag`](Self::tag).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActivationFunction {
    Identity,
    ReLU,
    Sigmoid,
    Tanh,
    Step,
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + f64::exp(-x))
}

impl ActivationFunction {
    pub const ALL: [ActivationFunction; 5] = [
        Self::Identity,
        Self::ReLU,
        Self::Sigmoid,
        Self::Tanh,
        Self::Step,
    ];

    pub fn compute(self, x: f64) -> f64 {
        match self {
            Self::Identity => x,
            Self::ReLU => x.max(0.0),
            Self::Sigmoid => sigmoid(x),
            Self::Tanh => x.tanh(),
            Self::Step => {
                if x <= 0.0 {
                    0.0
                } else {
                    1.0
                }
            }
        }
    }

    /// Derivative of [`compute`](Self::compute). ReLU uses 0 at `x <= 0` and
    /// Step is flat everywhere, including its jump.
    pub fn derivative(self, x: f64) -> f64 {
        match self {
            Self::Identity => 1.0,
            Self::ReLU => {
                if x <= 0.0 {
                    0.0
                } else {
                    1.0
                }
            }
            Self::Sigmoid => {
                let s = sigmoid(x);
                s * (1.0 - s)
            }
            Self::Tanh => 1.0 - x.tanh().powi(2),
            Self::Step => 0.0,
        }
    }

    pub fn tag(self) -> u64 {
        match self {
            Self::Identity => 0,
            Self::ReLU => 1,
            Self::Sigmoid => 2,
            Self::Tanh => 3,
            Self::Step => 4,
        }
    }

    pub fn from_tag(tag: u64) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.tag() == tag)
            .ok_or(Error::UnknownActivation(tag))
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::ReLU => "relu",
            Self::Sigmoid => "sigmoid",
            Self::Tanh => "tanh",
            Self::Step => "step",
        }
    }
}

impl fmt::Display for ActivationFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ActivationFunction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidParameter(format!("unknown activation function '{s}'")))
    }
}
