use std::{
    fs::File,
    io::{BufReader, BufWriter, Cursor, Read, Write},
    iter::zip,
    ops::RangeInclusive,
    path::Path,
};

use nalgebra::{DMatrix, DVector};
use rand::Rng;

use crate::{
    activation::ActivationFunction,
    dataset::Item,
    encoding,
    error::{Error, Result},
};

/// Layer sizes, input layer first.
pub type Shape = Vec<usize>;

/// A feed-forward network stored as one weight matrix, bias vector and
/// activation function per layer transition.
///
/// `weights[i]` is `outputs_i × inputs_i` and `biases[i]` has `outputs_i`
/// entries, so layer `i` maps `a` to `f_i(weights[i] * a + biases[i])`.
#[derive(Clone, Debug, PartialEq)]
pub struct NeuralNetwork {
    pub(crate) weights: Vec<DMatrix<f64>>,
    pub(crate) biases: Vec<DVector<f64>>,
    pub(crate) activations: Vec<ActivationFunction>,
}

/// Everything a forward pass produced, as consumed by backpropagation.
#[derive(Clone, Debug)]
pub struct ForwardPass {
    /// `activations[0]` is the input, `activations[k]` the output of layer `k`.
    pub activations: Vec<DVector<f64>>,
    /// `raw[k]` is the value of layer `k + 1` before its activation function.
    pub raw: Vec<DVector<f64>>,
}

impl ForwardPass {
    pub fn output(&self) -> &DVector<f64> {
        // Never empty: the input is always recorded.
        &self.activations[self.activations.len() - 1]
    }
}

fn check_range(name: &str, range: &RangeInclusive<f64>) -> Result<()> {
    if !range.start().is_finite() || !range.end().is_finite() || range.start() > range.end() {
        return Err(Error::InvalidParameter(format!(
            "{name} {}..={} is not a finite, non-empty range",
            range.start(),
            range.end()
        )));
    }

    Ok(())
}

fn check_shape(shape: &[usize], activations: &[ActivationFunction]) -> Result<()> {
    if shape.len() < 2 {
        return Err(Error::Shape(format!(
            "a network needs at least 2 layers, got {}",
            shape.len()
        )));
    }

    if let Some(i) = shape.iter().position(|&n| n == 0) {
        return Err(Error::Shape(format!("layer {i} has no neurons")));
    }

    if activations.len() != shape.len() - 1 {
        return Err(Error::Shape(format!(
            "{} layers need {} activation functions, got {}",
            shape.len(),
            shape.len() - 1,
            activations.len()
        )));
    }

    Ok(())
}

impl NeuralNetwork {
    pub fn new(
        weights: Vec<DMatrix<f64>>,
        biases: Vec<DVector<f64>>,
        activations: Vec<ActivationFunction>,
    ) -> Result<Self> {
        let network = NeuralNetwork {
            weights,
            biases,
            activations,
        };

        network.validate()?;

        Ok(network)
    }

    /// A network of the given shape with every weight and bias set to zero.
    pub fn zeros(shape: &[usize], activations: &[ActivationFunction]) -> Result<Self> {
        check_shape(shape, activations)?;

        Ok(NeuralNetwork {
            weights: zip(shape.iter(), shape.iter().skip(1))
                .map(|(&inputs, &outputs)| DMatrix::zeros(outputs, inputs))
                .collect(),
            biases: shape.iter().skip(1).map(|&n| DVector::zeros(n)).collect(),
            activations: activations.to_vec(),
        })
    }

    /// A network of the given shape with parameters drawn uniformly from the
    /// given ranges.
    pub fn random<R: Rng + ?Sized>(
        shape: &[usize],
        activations: &[ActivationFunction],
        weight_range: RangeInclusive<f64>,
        bias_range: RangeInclusive<f64>,
        rng: &mut R,
    ) -> Result<Self> {
        check_shape(shape, activations)?;
        check_range("weight range", &weight_range)?;
        check_range("bias range", &bias_range)?;

        let weights: Vec<_> = zip(shape.iter(), shape.iter().skip(1))
            .map(|(&inputs, &outputs)| {
                DMatrix::from_fn(outputs, inputs, |_, _| rng.gen_range(weight_range.clone()))
            })
            .collect();

        let biases: Vec<_> = shape
            .iter()
            .skip(1)
            .map(|&n| DVector::from_fn(n, |_, _| rng.gen_range(bias_range.clone())))
            .collect();

        Ok(NeuralNetwork {
            weights,
            biases,
            activations: activations.to_vec(),
        })
    }

    /// Checks every representation invariant: matching counts, chainable
    /// dimensions, non-empty layers and finite parameters.
    pub fn validate(&self) -> Result<()> {
        let layers = self.weights.len();

        if layers == 0 {
            return Err(Error::Shape("a network needs at least one weight matrix".into()));
        }

        if self.biases.len() != layers || self.activations.len() != layers {
            return Err(Error::Shape(format!(
                "{layers} weight matrices, {} bias vectors and {} activation functions",
                self.biases.len(),
                self.activations.len()
            )));
        }

        for (i, (w, b)) in zip(&self.weights, &self.biases).enumerate() {
            if w.nrows() == 0 || w.ncols() == 0 {
                return Err(Error::Shape(format!("weight matrix {i} is empty")));
            }

            if w.nrows() != b.len() {
                return Err(Error::Shape(format!(
                    "weight matrix {i} has {} rows but bias vector {i} has {} entries",
                    w.nrows(),
                    b.len()
                )));
            }
        }

        for (i, (w, next)) in zip(&self.weights, self.weights.iter().skip(1)).enumerate() {
            if next.ncols() != w.nrows() {
                return Err(Error::Shape(format!(
                    "layer {i} outputs {} values but layer {} takes {}",
                    w.nrows(),
                    i + 1,
                    next.ncols()
                )));
            }
        }

        self.check_finite()
    }

    pub fn check_finite(&self) -> Result<()> {
        for (i, (w, b)) in zip(&self.weights, &self.biases).enumerate() {
            if !w.iter().all(|x| x.is_finite()) {
                return Err(Error::NonFinite(format!("weight matrix {i}")));
            }

            if !b.iter().all(|x| x.is_finite()) {
                return Err(Error::NonFinite(format!("bias vector {i}")));
            }
        }

        Ok(())
    }

    /// Number of layers, counting the input layer.
    pub fn layer_count(&self) -> usize {
        self.weights.len() + 1
    }

    pub fn shape(&self) -> Shape {
        std::iter::once(self.input_size())
            .chain(self.weights.iter().map(|w| w.nrows()))
            .collect()
    }

    pub fn input_size(&self) -> usize {
        self.weights[0].ncols()
    }

    pub fn output_size(&self) -> usize {
        self.weights[self.weights.len() - 1].nrows()
    }

    pub fn weights(&self) -> &[DMatrix<f64>] {
        &self.weights
    }

    pub fn biases(&self) -> &[DVector<f64>] {
        &self.biases
    }

    pub fn activations(&self) -> &[ActivationFunction] {
        &self.activations
    }

    fn check_input(&self, input: &DVector<f64>) -> Result<()> {
        if input.len() != self.input_size() {
            return Err(Error::Shape(format!(
                "network takes {} inputs, got {}",
                self.input_size(),
                input.len()
            )));
        }

        Ok(())
    }

    /// Computes the output layer for an input vector.
    pub fn output(&self, input: &DVector<f64>) -> Result<DVector<f64>> {
        self.check_input(input)?;

        Ok(self
            .layers()
            .fold(input.clone(), |a, (w, b, f)| (w * a + b).map(|x| f.compute(x))))
    }

    /// Computes the output while keeping every activation and pre-activation
    /// vector along the way.
    pub fn feed_forward(&self, input: &DVector<f64>) -> Result<ForwardPass> {
        self.check_input(input)?;

        let mut activations = Vec::with_capacity(self.layer_count());
        let mut raw = Vec::with_capacity(self.weights.len());

        activations.push(input.clone());

        for (w, b, f) in self.layers() {
            let z = w * &activations[activations.len() - 1] + b;

            activations.push(z.map(|x| f.compute(x)));
            raw.push(z);
        }

        Ok(ForwardPass { activations, raw })
    }

    /// Squared distance between the network's output and the expected output.
    pub fn cost(&self, item: &Item) -> Result<f64> {
        let output = self.output(&item.input)?;

        if output.len() != item.output.len() {
            return Err(Error::Shape(format!(
                "network produces {} outputs, example expects {}",
                output.len(),
                item.output.len()
            )));
        }

        Ok((output - &item.output).norm_squared())
    }

    fn layers(
        &self,
    ) -> impl Iterator<Item = (&DMatrix<f64>, &DVector<f64>, ActivationFunction)> + '_ {
        zip(zip(&self.weights, &self.biases), &self.activations).map(|((w, b), &f)| (w, b, f))
    }
}

// Binary format: [layer count][activation tags][weights][biases], see `encoding`.
impl NeuralNetwork {
    pub fn write_to<W: Write>(&self, dst: &mut W) -> Result<()> {
        encoding::write_word(dst, self.layer_count())?;

        for f in &self.activations {
            encoding::write_word(dst, f.tag() as usize)?;
        }

        for w in &self.weights {
            encoding::write_matrix(dst, w)?;
        }

        for b in &self.biases {
            encoding::write_vector(dst, b)?;
        }

        Ok(())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        self.write_to(&mut buf).expect("writing to a Vec can't fail");

        buf
    }

    pub fn read_from<R: Read>(src: &mut R) -> Result<Self> {
        let layer_count = encoding::read_word(src, "layer count")?;

        if layer_count < 2 {
            return Err(Error::Format(format!(
                "layer count must be at least 2, found {layer_count}"
            )));
        }

        let transitions = layer_count - 1;

        let activations = (0..transitions)
            .map(|_| {
                let tag = encoding::read_word(src, "activation tag")?;

                ActivationFunction::from_tag(tag as u64)
            })
            .collect::<Result<Vec<_>>>()?;

        let weights = (0..transitions)
            .map(|_| encoding::read_matrix(src))
            .collect::<Result<Vec<_>>>()?;

        let biases = (0..transitions)
            .map(|_| encoding::read_vector(src))
            .collect::<Result<Vec<_>>>()?;

        Self::new(weights, biases, activations)
    }

    /// Decodes a network, rejecting any bytes left over after it.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let network = Self::read_from(&mut cursor)?;
        let trailing = bytes.len() - cursor.position() as usize;

        if trailing != 0 {
            return Err(Error::Format(format!(
                "{trailing} unexpected bytes after the encoded network"
            )));
        }

        Ok(network)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut dst = BufWriter::new(File::create(path)?);

        self.write_to(&mut dst)?;
        dst.flush()?;

        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut src = BufReader::new(File::open(path)?);

        Self::read_from(&mut src)
    }
}
