//! Little-endian primitives shared by the network and data set formats.
//!
//! A word is a `u64`. A matrix is `[rows][cols]` followed by `rows * cols`
//! `f64` elements in row-major order; vectors are `n × 1` matrices.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};

pub const WORD_SIZE: usize = 8;

// Caps the up-front allocation when a header claims a huge matrix.
const MAX_PREALLOCATED: usize = 1 << 16;

pub fn write_word<W: Write>(dst: &mut W, value: usize) -> Result<()> {
    dst.write_u64::<LittleEndian>(value as u64)?;

    Ok(())
}

pub fn read_word<R: Read>(src: &mut R, what: &str) -> Result<usize> {
    let raw = src
        .read_u64::<LittleEndian>()
        .map_err(|e| Error::from_read(e, what))?;

    usize::try_from(raw).map_err(|_| Error::Format(format!("{what} {raw} doesn't fit in memory")))
}

pub fn write_matrix<W: Write>(dst: &mut W, m: &DMatrix<f64>) -> Result<()> {
    write_word(dst, m.nrows())?;
    write_word(dst, m.ncols())?;

    for r in 0..m.nrows() {
        for c in 0..m.ncols() {
            dst.write_f64::<LittleEndian>(m[(r, c)])?;
        }
    }

    Ok(())
}

pub fn write_vector<W: Write>(dst: &mut W, v: &DVector<f64>) -> Result<()> {
    write_word(dst, v.len())?;
    write_word(dst, 1)?;

    for &x in v.iter() {
        dst.write_f64::<LittleEndian>(x)?;
    }

    Ok(())
}

pub fn read_matrix<R: Read>(src: &mut R) -> Result<DMatrix<f64>> {
    let rows = read_word(src, "matrix row count")?;
    let cols = read_word(src, "matrix column count")?;
    let len = rows
        .checked_mul(cols)
        .ok_or_else(|| Error::Format(format!("matrix of {rows}x{cols} is too large")))?;

    let mut data = Vec::with_capacity(len.min(MAX_PREALLOCATED));

    for _ in 0..len {
        data.push(
            src.read_f64::<LittleEndian>()
                .map_err(|e| Error::from_read(e, "matrix elements"))?,
        );
    }

    Ok(DMatrix::from_row_slice(rows, cols, &data))
}

pub fn read_vector<R: Read>(src: &mut R) -> Result<DVector<f64>> {
    let m = read_matrix(src)?;

    if m.ncols() != 1 {
        return Err(Error::Format(format!(
            "expected a column vector, found a {}x{} matrix",
            m.nrows(),
            m.ncols()
        )));
    }

    Ok(DVector::from_column_slice(m.as_slice()))
}

/// Encoded size in bytes of a column vector of `len` elements.
pub fn vector_size(len: usize) -> usize {
    2 * WORD_SIZE + len * std::mem::size_of::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn matrices_are_row_major_with_dimension_header() {
        let m = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let mut buf = Vec::new();

        write_matrix(&mut buf, &m).unwrap();

        assert_eq!(buf.len(), 2 * WORD_SIZE + 6 * 8);
        assert_eq!(&buf[0..8], &2u64.to_le_bytes());
        assert_eq!(&buf[8..16], &3u64.to_le_bytes());
        assert_eq!(&buf[16..24], &1.0f64.to_le_bytes());
        assert_eq!(&buf[24..32], &2.0f64.to_le_bytes());

        let back = read_matrix(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn vector_size_matches_written_bytes() {
        let v = DVector::from_vec(vec![0.5, -1.5, 3.25]);
        let mut buf = Vec::new();

        write_vector(&mut buf, &v).unwrap();

        assert_eq!(buf.len(), vector_size(3));
        assert_eq!(read_vector(&mut Cursor::new(&buf)).unwrap(), v);
    }

    #[test]
    fn truncated_matrix_is_a_format_error() {
        let m = DMatrix::from_element(3, 3, 1.0);
        let mut buf = Vec::new();
        write_matrix(&mut buf, &m).unwrap();
        buf.truncate(buf.len() - 4);

        assert!(matches!(
            read_matrix(&mut Cursor::new(&buf)),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn huge_dimensions_fail_without_allocating() {
        let mut buf = Vec::new();
        write_word(&mut buf, usize::MAX / 2).unwrap();
        write_word(&mut buf, 2).unwrap();

        assert!(read_matrix(&mut Cursor::new(&buf)).is_err());
    }

    #[test]
    fn matrix_is_not_a_vector() {
        let mut buf = Vec::new();
        write_matrix(&mut buf, &DMatrix::zeros(2, 2)).unwrap();

        assert!(matches!(
            read_vector(&mut Cursor::new(&buf)),
            Err(Error::Format(_))
        ));
    }
}
