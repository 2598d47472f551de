use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use log::info;
use neuralkit::{
    classifier::argmax, mnist::MnistData, ActivationFunction, Breeding, Classifier, DataSet, Error,
    GeneticConfig, GeneticOptimizer, GradientDescent, MemoryDataSet, NeuralNetwork, Result,
    TrainingData,
};
use rand::{rngs::StdRng, SeedableRng};

/// Feed-forward networks trained by gradient descent or a genetic algorithm
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Convert the uncompressed MNIST IDX files into a data set
    ConvertMnist {
        /// Folder holding train-images-idx3-ubyte and friends
        mnist_dir: PathBuf,
        /// Folder to write the data set files into
        out_dir: PathBuf,
        #[arg(long, default_value = "mnist")]
        name: String,
    },
    /// Train a network with stochastic gradient descent
    Train {
        #[command(flatten)]
        model: ModelArgs,
        #[arg(long, default_value_t = 30)]
        epochs: usize,
        #[arg(long, default_value_t = 0.01)]
        rate: f64,
        /// Scale each gradient to unit norm before applying it
        #[arg(long)]
        normalize: bool,
    },
    /// Search for a network with a genetic algorithm
    Evolve {
        #[command(flatten)]
        model: ModelArgs,
        #[arg(long, default_value_t = 100)]
        population: usize,
        #[arg(long, default_value_t = 50)]
        generations: usize,
        /// Fraction of the population replaced each generation
        #[arg(long, default_value_t = 0.7)]
        eliminate: f64,
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Debug, Args)]
struct ModelArgs {
    /// Folder holding the data set files
    dir: PathBuf,
    /// Data set name, as given when it was created
    name: String,
    /// Neurons in the single hidden layer
    #[arg(long, default_value_t = 30)]
    hidden: usize,
    #[arg(long, default_value_t = ActivationFunction::Sigmoid)]
    activation: ActivationFunction,
    /// Where to save the resulting network
    #[arg(long, default_value = "network.nn")]
    out: PathBuf,
}

impl ModelArgs {
    fn open(&self) -> Result<DataSet> {
        DataSet::open(&self.dir, &self.name)
    }

    /// Input and output widths come from the first item of the data set.
    fn shape(&self, data: &MemoryDataSet) -> Result<[usize; 3]> {
        let first = data
            .training
            .first()
            .or_else(|| data.testing.first())
            .ok_or(Error::EmptyDataSet)?;

        Ok([first.input.len(), self.hidden, first.output.len()])
    }
}

fn convert_mnist(mnist_dir: &Path, out_dir: &Path, name: &str) -> Result<()> {
    println!("Loading MNIST data");

    let data = MnistData::parse(mnist_dir)?;
    let set = data.into_data_set(out_dir, name)?;

    println!(
        "Wrote {} training and {} testing items to {}",
        set.training_count(),
        set.testing_count(),
        set.directory().display()
    );

    Ok(())
}

fn train(model: &ModelArgs, epochs: usize, rate: f64, normalize: bool) -> Result<()> {
    let mut data = model.open()?.load()?;
    let shape = model.shape(&data)?;
    let activations = [model.activation; 2];

    let mut rng = StdRng::from_entropy();
    let mut network =
        NeuralNetwork::random(&shape, &activations, -1.0..=1.0, -1.0..=1.0, &mut rng)?;

    for epoch in 0..epochs {
        data.shuffle_training();

        GradientDescent::new(&mut network, rate)?
            .normalizing_gradients(normalize)
            .optimize(&data)?;

        if data.testing.is_empty() {
            println!("Epoch {epoch} complete");
            continue;
        }

        let cost = data.testing_cost(&network)?;
        let classifier = Classifier::new(network, argmax);
        let correct = classifier.count_correct(&data.testing)?;
        network = classifier.into_network();

        println!(
            "Epoch {epoch}: cost {cost:.5}, {correct} / {} correct",
            data.testing.len()
        );
    }

    network.save(&model.out)?;
    info!("Saved network to {}", model.out.display());

    Ok(())
}

fn evolve(
    model: &ModelArgs,
    population: usize,
    generations: usize,
    eliminate: f64,
    seed: Option<u64>,
) -> Result<()> {
    let data = model.open()?.load()?;
    let shape = model.shape(&data)?;

    let rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let config = GeneticConfig {
        population_size: population,
        eliminating_portion: eliminate,
        generations,
        ..GeneticConfig::default()
    };

    let optimizer = GeneticOptimizer::new(&shape, &[model.activation; 2], Breeding::default());
    let network = optimizer.find_optimal_network(&data, &config, rng, |generation, _| {
        println!("Generation {generation} complete");
    })?;

    match data.testing_cost(&network) {
        Ok(cost) => println!("Testing cost {cost:.5}"),
        Err(Error::EmptyDataSet) => {}
        Err(e) => return Err(e),
    }

    network.save(&model.out)?;
    info!("Saved network to {}", model.out.display());

    Ok(())
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Command::ConvertMnist {
            mnist_dir,
            out_dir,
            name,
        } => convert_mnist(mnist_dir, out_dir, name),
        Command::Train {
            model,
            epochs,
            rate,
            normalize,
        } => train(model, *epochs, *rate, *normalize),
        Command::Evolve {
            model,
            population,
            generations,
            eliminate,
            seed,
        } => evolve(model, *population, *generations, *eliminate, *seed),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
