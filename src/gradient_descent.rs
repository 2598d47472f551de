use std::iter::zip;

use log::debug;

use crate::{
    backprop::{self, Gradients},
    dataset::{Item, TrainingData},
    error::{Error, Result},
    network::NeuralNetwork,
};

/// Stochastic gradient descent: one parameter update per example.
///
/// Holds the network exclusively for as long as it trains it.
pub struct GradientDescent<'a> {
    network: &'a mut NeuralNetwork,
    learning_rate: f64,
    update_biases: bool,
    normalize_gradients: bool,
}

impl<'a> GradientDescent<'a> {
    pub fn new(network: &'a mut NeuralNetwork, learning_rate: f64) -> Result<Self> {
        if !(learning_rate.is_finite() && learning_rate > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "learning rate must be positive and finite, got {learning_rate}"
            )));
        }

        Ok(GradientDescent {
            network,
            learning_rate,
            update_biases: true,
            normalize_gradients: false,
        })
    }

    pub fn with_bias_updates(mut self, update_biases: bool) -> Self {
        self.update_biases = update_biases;
        self
    }

    /// Scale every gradient to unit norm before applying it, so the step size
    /// is set by the learning rate alone.
    pub fn normalizing_gradients(mut self, normalize: bool) -> Self {
        self.normalize_gradients = normalize;
        self
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn network(&self) -> &NeuralNetwork {
        self.network
    }

    /// Moves every parameter a step against the cost gradient of `item`.
    pub fn step(&mut self, item: &Item) -> Result<()> {
        let gradients = backprop::compute_gradients(self.network, item, self.normalize_gradients)?;

        self.apply(gradients)
    }

    /// Runs [`step`](Self::step) once per training item, in the order the data
    /// hands them out.
    pub fn optimize<D: TrainingData>(&mut self, data: &D) -> Result<()> {
        let mut steps = 0usize;

        data.iterate_training_data(|item| {
            steps += 1;
            self.step(item)
        })?;

        debug!(
            "Gradient descent pass finished after {} steps at rate {}",
            steps, self.learning_rate
        );

        Ok(())
    }

    /// Commits the update only when every new parameter is finite; otherwise
    /// the network is left as it was.
    fn apply(&mut self, gradients: Gradients) -> Result<()> {
        let rate = self.learning_rate;

        let weights: Vec<_> = zip(&self.network.weights, gradients.weights)
            .map(|(w, nw)| w - nw * rate)
            .collect();

        let biases: Vec<_> = if self.update_biases {
            zip(&self.network.biases, gradients.biases)
                .map(|(b, nb)| b - nb * rate)
                .collect()
        } else {
            self.network.biases.clone()
        };

        let updated = NeuralNetwork {
            weights,
            biases,
            activations: self.network.activations.clone(),
        };

        updated.check_finite()?;
        *self.network = updated;

        Ok(())
    }
}
