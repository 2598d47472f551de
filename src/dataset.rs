use std::{
    fmt,
    fs::{self, File},
    io::{BufReader, BufWriter, Cursor, Read, Write},
    path::{Path, PathBuf},
};

use log::{debug, info};
use nalgebra::DVector;
use permutation_iterator::Permutor;

use crate::{
    encoding,
    error::{Error, Result},
    network::NeuralNetwork,
};

/// One labeled example: an input vector and the output expected for it.
#[derive(Clone, Debug, PartialEq)]
pub struct Item {
    pub input: DVector<f64>,
    pub output: DVector<f64>,
}

impl Item {
    pub fn new(input: DVector<f64>, output: DVector<f64>) -> Self {
        Item { input, output }
    }

    pub fn from_slices(input: &[f64], output: &[f64]) -> Self {
        Item {
            input: DVector::from_column_slice(input),
            output: DVector::from_column_slice(output),
        }
    }

    /// Size in bytes of this item once encoded.
    pub fn encoded_size(&self) -> usize {
        encoding::vector_size(self.input.len()) + encoding::vector_size(self.output.len())
    }

    pub fn write_to<W: Write>(&self, dst: &mut W) -> Result<()> {
        encoding::write_vector(dst, &self.input)?;
        encoding::write_vector(dst, &self.output)
    }

    pub fn read_from<R: Read>(src: &mut R) -> Result<Self> {
        let input = encoding::read_vector(src)?;
        let output = encoding::read_vector(src)?;

        Ok(Item { input, output })
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Input: {:?}\nOutput: {:?}",
            self.input.as_slice(),
            self.output.as_slice()
        )
    }
}

/// A source of training and testing examples.
///
/// Every pass visits each item exactly once; no particular order is promised.
/// The first error returned by `visit` stops the pass and is handed back.
pub trait TrainingData {
    fn iterate_training_data<F>(&self, visit: F) -> Result<()>
    where
        F: FnMut(&Item) -> Result<()>;

    fn iterate_testing_data<F>(&self, visit: F) -> Result<()>
    where
        F: FnMut(&Item) -> Result<()>;

    /// Mean cost of `network` over the training items.
    fn training_cost(&self, network: &NeuralNetwork) -> Result<f64> {
        let mut total = 0.0;
        let mut count = 0usize;

        self.iterate_training_data(|item| {
            total += network.cost(item)?;
            count += 1;

            Ok(())
        })?;

        mean(total, count)
    }

    /// Mean cost of `network` over the testing items.
    fn testing_cost(&self, network: &NeuralNetwork) -> Result<f64> {
        let mut total = 0.0;
        let mut count = 0usize;

        self.iterate_testing_data(|item| {
            total += network.cost(item)?;
            count += 1;

            Ok(())
        })?;

        mean(total, count)
    }
}

fn mean(total: f64, count: usize) -> Result<f64> {
    if count == 0 {
        return Err(Error::EmptyDataSet);
    }

    Ok(total / count as f64)
}

/// Training and testing items held in memory.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemoryDataSet {
    pub training: Vec<Item>,
    pub testing: Vec<Item>,
}

impl MemoryDataSet {
    pub fn new(training: Vec<Item>, testing: Vec<Item>) -> Self {
        MemoryDataSet { training, testing }
    }

    /// Reorders the training items with a fresh random permutation.
    pub fn shuffle_training(&mut self) {
        let len = self.training.len() as u64;

        if len < 2 {
            return;
        }

        let mut slots: Vec<Option<Item>> = self.training.drain(..).map(Some).collect();

        self.training = Permutor::new(len)
            .filter_map(|i| slots[i as usize].take())
            .collect();
    }
}

impl TrainingData for MemoryDataSet {
    fn iterate_training_data<F>(&self, visit: F) -> Result<()>
    where
        F: FnMut(&Item) -> Result<()>,
    {
        self.training.iter().try_for_each(visit)
    }

    fn iterate_testing_data<F>(&self, visit: F) -> Result<()>
    where
        F: FnMut(&Item) -> Result<()>,
    {
        self.testing.iter().try_for_each(visit)
    }
}

const FILE_EXTENSION: &str = "nkds";
const TRAINING_POSTFIX: &str = "_train_data";
const TESTING_POSTFIX: &str = "_test_data";
const HEADER_SIZE: u64 = 2 * encoding::WORD_SIZE as u64;

/// A named data set stored as two `.nkds` files in one directory.
///
/// Each file is `[item count][item size]` followed by `item count` records of
/// exactly `item size` bytes, each record being the encoded input vector
/// followed by the encoded output vector.
#[derive(Clone, Debug)]
pub struct DataSet {
    name: String,
    directory: PathBuf,
    training_count: usize,
    testing_count: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Header {
    count: usize,
    item_size: usize,
}

impl DataSet {
    /// Writes the given items to a new data set, replacing any files of the
    /// same name.
    pub fn create(
        directory: &Path,
        name: &str,
        training: &[Item],
        testing: &[Item],
    ) -> Result<Self> {
        fs::create_dir_all(directory)?;

        let data_set = DataSet {
            name: name.to_owned(),
            directory: directory.to_owned(),
            training_count: training.len(),
            testing_count: testing.len(),
        };

        write_items(&data_set.training_path(), training)?;
        write_items(&data_set.testing_path(), testing)?;

        info!(
            "Wrote data set {} ({} training, {} testing items) to {}",
            name,
            training.len(),
            testing.len(),
            directory.display()
        );

        Ok(data_set)
    }

    /// Opens an existing data set, checking both file headers.
    pub fn open(directory: &Path, name: &str) -> Result<Self> {
        let mut data_set = DataSet {
            name: name.to_owned(),
            directory: directory.to_owned(),
            training_count: 0,
            testing_count: 0,
        };

        data_set.training_count = read_header(&data_set.training_path())?.1.count;
        data_set.testing_count = read_header(&data_set.testing_path())?.1.count;

        debug!(
            "Opened data set {} with {} training and {} testing items",
            name, data_set.training_count, data_set.testing_count
        );

        Ok(data_set)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn training_count(&self) -> usize {
        self.training_count
    }

    pub fn testing_count(&self) -> usize {
        self.testing_count
    }

    pub fn training_path(&self) -> PathBuf {
        self.file_path(TRAINING_POSTFIX)
    }

    pub fn testing_path(&self) -> PathBuf {
        self.file_path(TESTING_POSTFIX)
    }

    /// Reads both files into memory.
    pub fn load(&self) -> Result<MemoryDataSet> {
        let mut training = Vec::with_capacity(self.training_count);
        let mut testing = Vec::with_capacity(self.testing_count);

        self.iterate_training_data(|item| {
            training.push(item.clone());
            Ok(())
        })?;
        self.iterate_testing_data(|item| {
            testing.push(item.clone());
            Ok(())
        })?;

        Ok(MemoryDataSet { training, testing })
    }

    fn file_path(&self, postfix: &str) -> PathBuf {
        self.directory
            .join(format!("{}{}.{}", self.name, postfix, FILE_EXTENSION))
    }
}

impl TrainingData for DataSet {
    fn iterate_training_data<F>(&self, visit: F) -> Result<()>
    where
        F: FnMut(&Item) -> Result<()>,
    {
        iterate_file(&self.training_path(), visit)
    }

    fn iterate_testing_data<F>(&self, visit: F) -> Result<()>
    where
        F: FnMut(&Item) -> Result<()>,
    {
        iterate_file(&self.testing_path(), visit)
    }
}

fn write_items(path: &Path, items: &[Item]) -> Result<()> {
    let item_size = items.first().map(Item::encoded_size).unwrap_or(0);

    if let Some((i, item)) = items
        .iter()
        .enumerate()
        .find(|(_, item)| item.encoded_size() != item_size)
    {
        return Err(Error::Format(format!(
            "item {i} encodes to {} bytes but item 0 encodes to {item_size}; all items must be the same size",
            item.encoded_size()
        )));
    }

    let mut dst = BufWriter::new(File::create(path)?);

    encoding::write_word(&mut dst, items.len())?;
    encoding::write_word(&mut dst, item_size)?;

    for item in items {
        item.write_to(&mut dst)?;
    }

    dst.flush()?;

    Ok(())
}

fn read_header(path: &Path) -> Result<(BufReader<File>, Header)> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut src = BufReader::new(file);

    let count = encoding::read_word(&mut src, "item count")?;
    let item_size = encoding::read_word(&mut src, "item size")?;

    let expected_len = (count as u64)
        .checked_mul(item_size as u64)
        .and_then(|body| body.checked_add(HEADER_SIZE));

    if expected_len != Some(file_len) {
        return Err(Error::Format(format!(
            "{} declares {count} items of {item_size} bytes but is {file_len} bytes long",
            path.display()
        )));
    }

    // An empty file is written with item size 0; a record holds at least two
    // vector headers.
    let min_size = 2 * encoding::vector_size(0);

    if (count == 0 && item_size != 0) || (count > 0 && item_size < min_size) {
        return Err(Error::Format(format!(
            "{} declares {count} items of {item_size} bytes",
            path.display()
        )));
    }

    Ok((src, Header { count, item_size }))
}

fn iterate_file<F>(path: &Path, mut visit: F) -> Result<()>
where
    F: FnMut(&Item) -> Result<()>,
{
    let (mut src, header) = read_header(path)?;
    let mut record = vec![0; header.item_size];

    for i in 0..header.count {
        src.read_exact(&mut record)
            .map_err(|e| Error::from_read(e, "data set record"))?;

        let mut cursor = Cursor::new(record.as_slice());
        let item = Item::read_from(&mut cursor)?;

        if cursor.position() as usize != header.item_size {
            return Err(Error::Format(format!(
                "record {i} of {} doesn't fill its {} bytes",
                path.display(),
                header.item_size
            )));
        }

        visit(&item)?;
    }

    Ok(())
}
