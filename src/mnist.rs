//! Conversion of the MNIST IDX files into labeled items and data sets.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use byteorder::{BigEndian, ReadBytesExt};
use log::info;
use nalgebra::DVector;

use crate::{
    classifier::argmax,
    dataset::{DataSet, Item},
    error::{Error, Result},
};

pub const DIGITS: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq)]
enum DataType {
    UnsignedByte,
    SignedByte,
    Short,
    Int,
    Float,
    Double,
    Unknown,
}

impl From<u32> for DataType {
    fn from(v: u32) -> Self {
        match (v >> 8) & 0xFF {
            0x08 => Self::UnsignedByte,
            0x09 => Self::SignedByte,
            0x0B => Self::Short,
            0x0C => Self::Int,
            0x0D => Self::Float,
            0x0E => Self::Double,
            _ => Self::Unknown,
        }
    }
}

fn read_u32(src: &mut impl Read, what: &str) -> Result<u32> {
    src.read_u32::<BigEndian>()
        .map_err(|e| Error::from_read(e, what))
}

/// Checks an IDX magic number for unsigned bytes of the given dimension.
fn check_magic(src: &mut impl Read, dims: u32) -> Result<()> {
    let magic = read_u32(src, "IDX magic number")?;
    let data_type = DataType::from(magic);
    let data_dims = magic & 0xFF;

    if magic >> 16 != 0 || data_type != DataType::UnsignedByte || data_dims != dims {
        return Err(Error::Format(format!(
            "expected an IDX file of unsigned bytes with {dims} dimensions, found {data_type:?} with {data_dims} (magic {magic:#010x})"
        )));
    }

    Ok(())
}

/// Reads exactly `len` bytes, growing the buffer only as data arrives.
fn read_bytes(src: &mut impl Read, len: usize, what: &str) -> Result<Vec<u8>> {
    let mut data = Vec::new();

    src.by_ref().take(len as u64).read_to_end(&mut data)?;

    if data.len() != len {
        return Err(Error::Format(format!(
            "unexpected end of input while reading {what}: expected {len} bytes, found {}",
            data.len()
        )));
    }

    Ok(data)
}

#[derive(Debug)]
struct RawImages {
    dims: (u32, u32),
    data: Vec<u8>,
}

impl RawImages {
    fn parse(src: &mut impl Read) -> Result<Self> {
        check_magic(src, 3)?;

        let count = read_u32(src, "image count")?;
        let d1 = read_u32(src, "image rows")?;
        let d2 = read_u32(src, "image columns")?;
        let len = (count as usize)
            .checked_mul(d1 as usize)
            .and_then(|n| n.checked_mul(d2 as usize))
            .ok_or_else(|| Error::Format("image data too large".into()))?;

        Ok(RawImages {
            dims: (d1, d2),
            data: read_bytes(src, len, "image pixels")?,
        })
    }

    fn image_len(&self) -> usize {
        self.dims.0 as usize * self.dims.1 as usize
    }

    fn count(&self) -> usize {
        match self.image_len() {
            0 => 0,
            n => self.data.len() / n,
        }
    }
}

#[derive(Debug)]
struct RawLabels(Vec<u8>);

impl RawLabels {
    fn parse(src: &mut impl Read) -> Result<Self> {
        check_magic(src, 1)?;

        let count = read_u32(src, "label count")?;

        Ok(RawLabels(read_bytes(src, count as usize, "labels")?))
    }
}

/// Pairs each image, scaled to `[0, 1]`, with its one-hot encoded label.
fn to_items(images: RawImages, labels: RawLabels) -> Result<Vec<Item>> {
    if images.count() != labels.0.len() {
        return Err(Error::Format(format!(
            "{} images but {} labels",
            images.count(),
            labels.0.len()
        )));
    }

    if images.image_len() == 0 {
        return Ok(Vec::new());
    }

    images
        .data
        .chunks(images.image_len())
        .zip(labels.0)
        .map(|(pixels, label)| {
            let label = label as usize;

            if label >= DIGITS {
                return Err(Error::Format(format!("label {label} is not a digit")));
            }

            let input =
                DVector::from_iterator(pixels.len(), pixels.iter().map(|&p| p as f64 / 255.0));
            let mut output = DVector::zeros(DIGITS);
            output[label] = 1.0;

            Ok(Item::new(input, output))
        })
        .collect()
}

pub fn parse_items(images: &mut impl Read, labels: &mut impl Read) -> Result<Vec<Item>> {
    let images = RawImages::parse(images)?;
    let labels = RawLabels::parse(labels)?;

    to_items(images, labels)
}

#[derive(Debug)]
pub struct MnistData {
    pub training: Vec<Item>,
    pub testing: Vec<Item>,
}

impl MnistData {
    /// Reads the four uncompressed MNIST files from `dir`.
    pub fn parse(dir: &Path) -> Result<Self> {
        let open = |name: &str| -> Result<BufReader<File>> {
            Ok(BufReader::new(File::open(dir.join(name))?))
        };

        let training = parse_items(
            &mut open("train-images-idx3-ubyte")?,
            &mut open("train-labels-idx1-ubyte")?,
        )?;
        let testing = parse_items(
            &mut open("t10k-images-idx3-ubyte")?,
            &mut open("t10k-labels-idx1-ubyte")?,
        )?;

        info!(
            "Parsed {} training and {} testing digits from {}",
            training.len(),
            testing.len(),
            dir.display()
        );

        Ok(MnistData { training, testing })
    }

    pub fn into_data_set(self, dir: &Path, name: &str) -> Result<DataSet> {
        DataSet::create(dir, name, &self.training, &self.testing)
    }
}

/// Draws a 28×28 digit item with block characters under its label.
pub fn render_digit(item: &Item) -> String {
    const SIDE: usize = 28;

    let mut desc = format!("Handwritten digit: {}", argmax(&item.output));

    for (i, &brightness) in item.input.iter().enumerate() {
        if i % SIDE == 0 {
            desc.push('\n');
        }

        desc.push(match brightness {
            b if b <= 0.2 => ' ',
            b if b <= 0.4 => '░',
            b if b <= 0.6 => '▒',
            b if b <= 0.8 => '▓',
            _ => '█',
        });
    }

    desc
}
