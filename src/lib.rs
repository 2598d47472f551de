//! Feed-forward neural networks trained by backpropagation or a genetic
//! algorithm, with a compact binary format for networks and labeled data sets.

pub mod activation;
pub mod backprop;
pub mod classifier;
pub mod dataset;
pub mod encoding;
pub mod error;
pub mod genetic;
pub mod gradient_descent;
pub mod mnist;
pub mod network;

pub use activation::ActivationFunction;
pub use backprop::{compute_gradients, Gradients};
pub use classifier::Classifier;
pub use dataset::{DataSet, Item, MemoryDataSet, TrainingData};
pub use error::{Error, Result};
pub use genetic::{Breeding, GeneticAlgorithm, GeneticConfig, GeneticOptimizer, ScoreRecord};
pub use gradient_descent::GradientDescent;
pub use network::{ForwardPass, NeuralNetwork, Shape};
