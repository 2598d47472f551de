use nalgebra::DVector;
use rayon::prelude::*;

use crate::{dataset::Item, error::Result, network::NeuralNetwork};

/// Index of the largest entry, the usual reading of a one-hot output layer.
pub fn argmax(v: &DVector<f64>) -> usize {
    v.argmax().0
}

/// A network paired with a way of reading its output layer as a class.
pub struct Classifier<F> {
    network: NeuralNetwork,
    interpret: F,
}

impl<T, F> Classifier<F>
where
    F: Fn(&DVector<f64>) -> T,
{
    pub fn new(network: NeuralNetwork, interpret: F) -> Self {
        Classifier { network, interpret }
    }

    pub fn network(&self) -> &NeuralNetwork {
        &self.network
    }

    pub fn into_network(self) -> NeuralNetwork {
        self.network
    }

    pub fn classify(&self, input: &DVector<f64>) -> Result<T> {
        Ok((self.interpret)(&self.network.output(input)?))
    }

    pub fn classify_slice(&self, input: &[f64]) -> Result<T> {
        self.classify(&DVector::from_column_slice(input))
    }
}

impl<T, F> Classifier<F>
where
    T: PartialEq + Send,
    F: Fn(&DVector<f64>) -> T + Sync,
{
    /// Counts the items whose computed class equals the class of their
    /// expected output.
    pub fn count_correct(&self, items: &[Item]) -> Result<usize> {
        items
            .par_iter()
            .map(|item| {
                let computed = self.classify(&item.input)?;

                Ok(usize::from(computed == (self.interpret)(&item.output)))
            })
            .sum()
    }
}
