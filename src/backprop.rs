use itertools::izip;
use nalgebra::{DMatrix, DVector};

use crate::{
    dataset::Item,
    error::{Error, Result},
    network::NeuralNetwork,
};

/// Gradient of the squared-error cost with respect to every weight and bias,
/// laid out exactly like the network's own parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct Gradients {
    pub weights: Vec<DMatrix<f64>>,
    pub biases: Vec<DVector<f64>>,
}

impl Gradients {
    fn zeros_like(network: &NeuralNetwork) -> Self {
        Gradients {
            weights: network
                .weights
                .iter()
                .map(|w| DMatrix::zeros(w.nrows(), w.ncols()))
                .collect(),
            biases: network.biases.iter().map(|b| DVector::zeros(b.len())).collect(),
        }
    }

    /// Rescales every non-zero gradient to unit (Frobenius) norm.
    pub fn normalize(&mut self) {
        for w in &mut self.weights {
            let norm = w.norm();

            if norm > 0.0 {
                *w /= norm;
            }
        }

        for b in &mut self.biases {
            let norm = b.norm();

            if norm > 0.0 {
                *b /= norm;
            }
        }
    }

    fn check_finite(&self) -> Result<()> {
        for (i, (w, b)) in self.weights.iter().zip(&self.biases).enumerate() {
            if !w.iter().chain(b.iter()).all(|x| x.is_finite()) {
                return Err(Error::NonFinite(format!("gradient of layer {i}")));
            }
        }

        Ok(())
    }
}

fn check_signal(delta: &DVector<f64>, layer: usize) -> Result<()> {
    if delta.iter().all(|x| x.is_finite()) {
        Ok(())
    } else {
        Err(Error::NonFinite(format!("error signal of layer {layer}")))
    }
}

/// Backpropagates the cost `Σ(output - expected)²` of one example.
///
/// The result is the true gradient, pointing in the direction in which the
/// cost grows. With `normalize` set each gradient is scaled to unit norm.
pub fn compute_gradients(
    network: &NeuralNetwork,
    item: &Item,
    normalize: bool,
) -> Result<Gradients> {
    let pass = network.feed_forward(&item.input)?;

    if item.output.len() != network.output_size() {
        return Err(Error::Shape(format!(
            "network produces {} outputs, example expects {}",
            network.output_size(),
            item.output.len()
        )));
    }

    let layers = network.weights.len();
    let last_activation = network.activations[layers - 1];
    let last_raw = &pass.raw[layers - 1];

    let mut delta = ((pass.output() - &item.output) * 2.0)
        .component_mul(&last_raw.map(|x| last_activation.derivative(x)));

    check_signal(&delta, layers)?;

    let mut gradients = Gradients::zeros_like(network);

    // Walk from the output layer back to the first hidden layer. Pairs each
    // layer's gradient slots with its input activations, its weights (for
    // pushing the signal one layer back) and the raw values of the layer below.
    for (layer, nw, nb, a, w) in izip!(
        (0..layers).rev(),
        gradients.weights.iter_mut().rev(),
        gradients.biases.iter_mut().rev(),
        pass.activations.iter().rev().skip(1),
        network.weights.iter().rev()
    ) {
        *nw = &delta * a.transpose();
        *nb = delta.clone();

        if layer == 0 {
            break;
        }

        let f = network.activations[layer - 1];
        let sp = pass.raw[layer - 1].map(|x| f.derivative(x));

        delta = (w.transpose() * &delta).component_mul(&sp);

        check_signal(&delta, layer)?;
    }

    gradients.check_finite()?;

    if normalize {
        gradients.normalize();
    }

    Ok(gradients)
}
