use std::{iter::zip, ops::RangeInclusive};

use log::{debug, info};
use rand::Rng;

use crate::{
    activation::ActivationFunction,
    dataset::TrainingData,
    error::{Error, Result},
    network::NeuralNetwork,
};

/// An organism's position in the population paired with its score.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoreRecord {
    pub index: usize,
    pub score: f64,
}

/// Truncation-selection genetic algorithm over any organism type.
///
/// Each generation scores every organism, ranks them, and replaces the lowest
/// `fitness_fraction` of the population with offspring of two distinct parents
/// drawn uniformly from the rest.
pub struct GeneticAlgorithm<R> {
    fitness_fraction: f64,
    rng: R,
}

impl<R: Rng> GeneticAlgorithm<R> {
    pub fn new(fitness_fraction: f64, rng: R) -> Result<Self> {
        if !(fitness_fraction > 0.0 && fitness_fraction < 1.0) {
            return Err(Error::InvalidParameter(format!(
                "fitness fraction must lie strictly between 0 and 1, got {fitness_fraction}"
            )));
        }

        Ok(GeneticAlgorithm {
            fitness_fraction,
            rng,
        })
    }

    pub fn fitness_fraction(&self) -> f64 {
        self.fitness_fraction
    }

    pub fn rng(&mut self) -> &mut R {
        &mut self.rng
    }

    pub fn evolve<S, F, B>(
        &mut self,
        organisms: &mut [S],
        generations: usize,
        score: F,
        breed: B,
    ) -> Result<Vec<ScoreRecord>>
    where
        F: FnMut(&S) -> Result<f64>,
        B: FnMut(&S, &S, &mut R) -> Result<S>,
    {
        self.evolve_with(organisms, generations, score, breed, |_, _| {})
    }

    /// Like [`evolve`](Self::evolve), calling `on_generation` with the
    /// generation number and the population after each generation.
    ///
    /// Returns the score records of the last evaluated generation, sorted from
    /// worst to best. Zero generations leaves the population untouched.
    pub fn evolve_with<S, F, B, G>(
        &mut self,
        organisms: &mut [S],
        generations: usize,
        mut score: F,
        mut breed: B,
        mut on_generation: G,
    ) -> Result<Vec<ScoreRecord>>
    where
        F: FnMut(&S) -> Result<f64>,
        B: FnMut(&S, &S, &mut R) -> Result<S>,
        G: FnMut(usize, &[S]),
    {
        if generations == 0 {
            return Ok(Vec::new());
        }

        let population = organisms.len();

        if population < 2 {
            return Err(Error::InvalidParameter(format!(
                "a population needs at least 2 organisms, got {population}"
            )));
        }

        let cutoff = (self.fitness_fraction * population as f64) as usize;
        let mut scores = Vec::with_capacity(population);

        for generation in 0..generations {
            scores.clear();

            for (index, organism) in organisms.iter().enumerate() {
                scores.push(ScoreRecord {
                    index,
                    score: score(organism)?,
                });
            }

            scores.sort_by(|a, b| a.score.total_cmp(&b.score));

            for rank in 0..cutoff {
                let (p1, p2) = self.pick_parents(cutoff, population);
                let child = breed(
                    &organisms[scores[p1].index],
                    &organisms[scores[p2].index],
                    &mut self.rng,
                )?;

                organisms[scores[rank].index] = child;
            }

            debug!(
                "Generation {} best score {}",
                generation + 1,
                scores[population - 1].score
            );

            on_generation(generation, organisms);
        }

        Ok(scores)
    }

    /// Two ranks from `[cutoff, population)`, distinct whenever that range
    /// holds more than one organism.
    fn pick_parents(&mut self, cutoff: usize, population: usize) -> (usize, usize) {
        let p1 = self.rng.gen_range(cutoff..population);

        if population - cutoff < 2 {
            return (p1, p1);
        }

        loop {
            let p2 = self.rng.gen_range(cutoff..population);

            if p2 != p1 {
                return (p1, p2);
            }
        }
    }
}

/// How two parent networks produce a child.
#[derive(Clone, Debug, PartialEq)]
pub enum Breeding {
    /// Element-wise mean of the parents' weights and biases.
    ArithmeticMean,
    /// The mean, after which each entry is, with probability `frequency`,
    /// multiplied by a value drawn uniformly from `range`.
    Mutating {
        frequency: f64,
        range: RangeInclusive<f64>,
    },
}

impl Default for Breeding {
    fn default() -> Self {
        Breeding::Mutating {
            frequency: 0.2,
            range: -10.0..=10.0,
        }
    }
}

impl Breeding {
    pub fn breed<R: Rng + ?Sized>(
        &self,
        mother: &NeuralNetwork,
        father: &NeuralNetwork,
        rng: &mut R,
    ) -> Result<NeuralNetwork> {
        let mut child = mean(mother, father)?;

        if let Breeding::Mutating { frequency, range } = self {
            if !(0.0..=1.0).contains(frequency) {
                return Err(Error::InvalidParameter(format!(
                    "mutation frequency must lie in [0, 1], got {frequency}"
                )));
            }

            let (low, high) = (*range.start(), *range.end());

            if !(low.is_finite() && high.is_finite() && low <= high) {
                return Err(Error::InvalidParameter(format!(
                    "mutation range {low}..={high} is not a finite, non-empty range"
                )));
            }

            let entries = child
                .weights
                .iter_mut()
                .flat_map(|w| w.iter_mut())
                .chain(child.biases.iter_mut().flat_map(|b| b.iter_mut()));

            for x in entries {
                if rng.gen_bool(*frequency) {
                    *x *= rng.gen_range(range.clone());
                }
            }
        }

        child.check_finite()?;

        Ok(child)
    }
}

fn mean(mother: &NeuralNetwork, father: &NeuralNetwork) -> Result<NeuralNetwork> {
    if mother.shape() != father.shape() {
        return Err(Error::Shape(format!(
            "can't breed networks of shapes {:?} and {:?}",
            mother.shape(),
            father.shape()
        )));
    }

    if mother.activations != father.activations {
        return Err(Error::Shape(format!(
            "can't breed networks with activation functions {:?} and {:?}",
            mother.activations, father.activations
        )));
    }

    Ok(NeuralNetwork {
        weights: zip(&mother.weights, &father.weights)
            .map(|(a, b)| (a + b) * 0.5)
            .collect(),
        biases: zip(&mother.biases, &father.biases)
            .map(|(a, b)| (a + b) * 0.5)
            .collect(),
        activations: mother.activations.clone(),
    })
}

/// Tunables for [`GeneticOptimizer::find_optimal_network`].
#[derive(Clone, Debug, PartialEq)]
pub struct GeneticConfig {
    pub population_size: usize,
    /// Fraction of the population replaced by offspring each generation.
    pub eliminating_portion: f64,
    pub generations: usize,
    pub weight_range: RangeInclusive<f64>,
    pub bias_range: RangeInclusive<f64>,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        GeneticConfig {
            population_size: 100,
            eliminating_portion: 0.7,
            generations: 50,
            weight_range: -10.0..=10.0,
            bias_range: -10.0..=10.0,
        }
    }
}

/// Searches for network parameters of a fixed shape by evolving a random
/// population, scoring each network by its negated mean training cost.
#[derive(Clone, Debug)]
pub struct GeneticOptimizer {
    shape: Vec<usize>,
    activations: Vec<ActivationFunction>,
    breeding: Breeding,
}

impl GeneticOptimizer {
    pub fn new(shape: &[usize], activations: &[ActivationFunction], breeding: Breeding) -> Self {
        GeneticOptimizer {
            shape: shape.to_vec(),
            activations: activations.to_vec(),
            breeding,
        }
    }

    pub fn score<D: TrainingData>(data: &D, network: &NeuralNetwork) -> Result<f64> {
        Ok(-data.training_cost(network)?)
    }

    pub fn find_optimal_network<D, R, G>(
        &self,
        data: &D,
        config: &GeneticConfig,
        rng: R,
        on_generation: G,
    ) -> Result<NeuralNetwork>
    where
        D: TrainingData,
        R: Rng,
        G: FnMut(usize, &[NeuralNetwork]),
    {
        let mut algorithm = GeneticAlgorithm::new(config.eliminating_portion, rng)?;

        let mut population = (0..config.population_size)
            .map(|_| {
                NeuralNetwork::random(
                    &self.shape,
                    &self.activations,
                    config.weight_range.clone(),
                    config.bias_range.clone(),
                    algorithm.rng(),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            "Evolving {} networks of shape {:?} for {} generations",
            config.population_size, self.shape, config.generations
        );

        algorithm.evolve_with(
            &mut population,
            config.generations,
            |network| Self::score(data, network),
            |mother, father, rng| self.breeding.breed(mother, father, rng),
            on_generation,
        )?;

        // Offspring of the last generation were never scored.
        let mut best: Option<(f64, usize)> = None;

        for (i, network) in population.iter().enumerate() {
            let score = Self::score(data, network)?;

            if best.map_or(true, |(s, _)| score > s) {
                best = Some((score, i));
            }
        }

        let (score, index) =
            best.ok_or_else(|| Error::InvalidParameter("population size must not be zero".into()))?;

        info!("Best network scored {}", score);

        Ok(population.swap_remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::ActivationFunction::*;
    use crate::dataset::{Item, MemoryDataSet};
    use nalgebra::{DMatrix, DVector};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn average(scores: impl Iterator<Item = f64>) -> f64 {
        let (sum, n) = scores.fold((0.0, 0), |(s, n), x| (s + x, n + 1));
        sum / n as f64
    }

    #[test]
    fn zero_generations_is_a_no_op() {
        let mut algorithm = GeneticAlgorithm::new(0.5, StdRng::seed_from_u64(1)).unwrap();
        let mut population = vec![1.0, 2.0, 3.0];

        let records = algorithm
            .evolve(&mut population, 0, |x| Ok(*x), |a, b, _| Ok(a + b))
            .unwrap();

        assert!(records.is_empty());
        assert_eq!(population, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        for fraction in [0.0, 1.0, -0.5, f64::NAN] {
            assert!(matches!(
                GeneticAlgorithm::new(fraction, StdRng::seed_from_u64(1)),
                Err(Error::InvalidParameter(_))
            ));
        }

        let mut algorithm = GeneticAlgorithm::new(0.5, StdRng::seed_from_u64(1)).unwrap();
        let mut lonely = vec![1.0];

        assert!(matches!(
            algorithm.evolve(&mut lonely, 3, |x| Ok(*x), |a, _, _| Ok(*a)),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn lowest_ranked_organisms_are_replaced_by_distinct_fit_parents() {
        let mut algorithm = GeneticAlgorithm::new(0.5, StdRng::seed_from_u64(7)).unwrap();
        let mut population = vec![5.0, 1.0, 8.0, 2.0, 9.0, 7.0];
        let mut parents = Vec::new();

        let records = algorithm
            .evolve(
                &mut population,
                1,
                |x| Ok(*x),
                |a, b, _| {
                    parents.push((*a, *b));
                    Ok(-1.0)
                },
            )
            .unwrap();

        let ranked: Vec<usize> = records.iter().map(|r| r.index).collect();
        assert_eq!(ranked, vec![1, 3, 0, 5, 2, 4]);

        // The three worst (1.0, 2.0, 5.0) were replaced, the fit half kept.
        assert_eq!(population, vec![-1.0, -1.0, 8.0, -1.0, 9.0, 7.0]);
        assert_eq!(parents.len(), 3);

        for (a, b) in parents {
            assert_ne!(a, b);
            assert!([7.0, 8.0, 9.0].contains(&a));
            assert!([7.0, 8.0, 9.0].contains(&b));
        }
    }

    #[test]
    fn a_single_fit_survivor_breeds_with_itself() {
        let mut algorithm = GeneticAlgorithm::new(0.5, StdRng::seed_from_u64(7)).unwrap();
        let mut population = vec![3.0, 4.0];

        algorithm
            .evolve(
                &mut population,
                4,
                |x| Ok(*x),
                |a, b, _| {
                    assert_eq!(a, b);
                    Ok(*a)
                },
            )
            .unwrap();

        assert_eq!(population, vec![4.0, 4.0]);
    }

    #[test]
    fn generation_hook_sees_every_generation() {
        let mut algorithm = GeneticAlgorithm::new(0.3, StdRng::seed_from_u64(2)).unwrap();
        let mut population: Vec<f64> = (0..10).map(f64::from).collect();
        let mut seen = Vec::new();

        algorithm
            .evolve_with(
                &mut population,
                5,
                |x| Ok(-x.abs()),
                |a, b, _| Ok((a + b) / 2.0),
                |generation, organisms| seen.push((generation, organisms.len())),
            )
            .unwrap();

        assert_eq!(seen, vec![(0, 10), (1, 10), (2, 10), (3, 10), (4, 10)]);
    }

    #[test]
    fn score_errors_abort_evolution() {
        let mut algorithm = GeneticAlgorithm::new(0.5, StdRng::seed_from_u64(2)).unwrap();
        let mut population = vec![1.0, 2.0, 3.0];

        let result = algorithm.evolve(
            &mut population,
            2,
            |_| Err(Error::EmptyDataSet),
            |a, _, _| Ok(*a),
        );

        assert!(matches!(result, Err(Error::EmptyDataSet)));
    }

    #[test]
    fn average_score_never_drops_under_mean_crossover() {
        // A concave score means a child of two fit parents never scores
        // below the organism it replaces.
        let mut rng = StdRng::seed_from_u64(42);
        let mut population: Vec<f64> = (0..200).map(|_| rng.gen_range(-100.0..100.0)).collect();
        let score = |x: &f64| -(x - 17.0) * (x - 17.0);

        let mut algorithm = GeneticAlgorithm::new(0.6, rng).unwrap();
        let before = average(population.iter().map(score));

        algorithm
            .evolve(&mut population, 25, |x| Ok(score(x)), |a, b, _| Ok((a + b) / 2.0))
            .unwrap();

        let after = average(population.iter().map(score));

        assert!(after >= before, "average score fell from {before} to {after}");
    }

    #[test]
    fn arithmetic_mean_averages_parameters() {
        let mut rng = StdRng::seed_from_u64(4);
        let a = NeuralNetwork::random(&[2, 3, 1], &[Tanh, Step], -1.0..=1.0, -1.0..=1.0, &mut rng)
            .unwrap();
        let b = NeuralNetwork::random(&[2, 3, 1], &[Tanh, Step], -1.0..=1.0, -1.0..=1.0, &mut rng)
            .unwrap();

        let child = Breeding::ArithmeticMean.breed(&a, &b, &mut rng).unwrap();

        assert_eq!(child.shape(), a.shape());
        assert_eq!(child.activations(), a.activations());

        for l in 0..2 {
            assert_eq!(child.weights()[l], (&a.weights()[l] + &b.weights()[l]) * 0.5);
            assert_eq!(child.biases()[l], (&a.biases()[l] + &b.biases()[l]) * 0.5);
        }
    }

    #[test]
    fn mutation_frequency_bounds_the_changes() {
        let mut rng = StdRng::seed_from_u64(4);
        let a =
            NeuralNetwork::random(&[4, 4], &[Identity], 1.0..=2.0, 1.0..=2.0, &mut rng).unwrap();

        let never = Breeding::Mutating {
            frequency: 0.0,
            range: -10.0..=10.0,
        };
        assert_eq!(never.breed(&a, &a, &mut rng).unwrap(), a);

        let always = Breeding::Mutating {
            frequency: 1.0,
            range: 3.0..=4.0,
        };
        let child = always.breed(&a, &a, &mut rng).unwrap();

        for (c, p) in child.weights()[0].iter().zip(a.weights()[0].iter()) {
            assert!(*c >= 3.0 * p && *c <= 4.0 * p);
        }

        let invalid = Breeding::Mutating {
            frequency: 1.5,
            range: 0.0..=1.0,
        };
        assert!(matches!(
            invalid.breed(&a, &a, &mut rng),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn mismatched_parents_are_rejected() {
        let mut rng = StdRng::seed_from_u64(4);
        let a = NeuralNetwork::zeros(&[2, 1], &[Identity]).unwrap();
        let b = NeuralNetwork::zeros(&[3, 1], &[Identity]).unwrap();

        assert!(matches!(
            Breeding::ArithmeticMean.breed(&a, &b, &mut rng),
            Err(Error::Shape(_))
        ));

        let sigmoid = NeuralNetwork::zeros(&[2, 1], &[Sigmoid]).unwrap();

        assert!(matches!(
            Breeding::ArithmeticMean.breed(&a, &sigmoid, &mut rng),
            Err(Error::Shape(_))
        ));
    }

    #[test]
    fn overflowing_mutation_is_reported() {
        let mut rng = StdRng::seed_from_u64(4);
        let huge = NeuralNetwork::new(
            vec![DMatrix::from_element(1, 1, f64::MAX / 2.0)],
            vec![DVector::from_element(1, f64::MAX / 2.0)],
            vec![Identity],
        )
        .unwrap();
        let amplify = Breeding::Mutating {
            frequency: 1.0,
            range: 5.0..=10.0,
        };

        assert!(matches!(
            amplify.breed(&huge, &huge, &mut rng),
            Err(Error::NonFinite(_))
        ));
    }

    #[test]
    fn evolving_networks_improves_average_score() {
        // With identity activations the cost is convex in the parameters, so
        // averaging two fit parents can't make things worse.
        let items = vec![
            Item::from_slices(&[0.0, 0.0], &[1.0]),
            Item::from_slices(&[0.0, 1.0], &[2.0]),
            Item::from_slices(&[1.0, 0.0], &[0.0]),
            Item::from_slices(&[1.0, 1.0], &[1.0]),
        ];
        let data = MemoryDataSet::new(items, vec![]);
        let mut rng = StdRng::seed_from_u64(42);

        let mut population = (0..60)
            .map(|_| NeuralNetwork::random(&[2, 1], &[Identity], -5.0..=5.0, -5.0..=5.0, &mut rng))
            .collect::<Result<Vec<_>>>()
            .unwrap();

        let score = |n: &NeuralNetwork| GeneticOptimizer::score(&data, n);
        let before = average(population.iter().map(|n| score(n).unwrap()));

        let mut algorithm = GeneticAlgorithm::new(0.5, rng).unwrap();
        algorithm
            .evolve(&mut population, 10, score, |a, b, rng| {
                Breeding::ArithmeticMean.breed(a, b, rng)
            })
            .unwrap();

        let after = average(population.iter().map(|n| score(n).unwrap()));

        assert!(after >= before, "average score fell from {before} to {after}");
        assert!(after > before);
    }

    #[test]
    fn optimizer_returns_the_best_network() {
        let items = vec![
            Item::from_slices(&[0.0], &[1.0]),
            Item::from_slices(&[1.0], &[3.0]),
        ];
        let data = MemoryDataSet::new(items, vec![]);
        let optimizer = GeneticOptimizer::new(&[1, 1], &[Identity], Breeding::default());
        let config = GeneticConfig {
            population_size: 40,
            generations: 30,
            weight_range: -5.0..=5.0,
            bias_range: -5.0..=5.0,
            ..GeneticConfig::default()
        };
        let mut generations = 0;

        let best = optimizer
            .find_optimal_network(&data, &config, StdRng::seed_from_u64(42), |_, population| {
                generations += 1;
                assert_eq!(population.len(), 40);
            })
            .unwrap();

        assert_eq!(generations, 30);
        assert_eq!(best.shape(), vec![1, 1]);

        let initial = NeuralNetwork::zeros(&[1, 1], &[Identity]).unwrap();
        assert!(data.training_cost(&best).unwrap() < data.training_cost(&initial).unwrap());
    }
}
