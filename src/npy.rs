//! Dense-array (`.npy`) decoding.
//!
//! Layout: the magic `\x93NUMPY`, a major/minor version pair, a little-endian
//! header length (u16 for v1, u32 for v2/v3), then a Python-literal header
//! dict such as `{'descr': '<f4', 'fortran_order': False, 'shape': (3, 4), }`
//! padded with spaces and a newline. The payload follows immediately.
//!
//! Only 32- and 64-bit floats with one or two dimensions are accepted.
//! Column-major (`fortran_order: True`) payloads are transposed to row-major.

use crate::error::{LensError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

const FORMAT: &str = "npy";

/// File magic.
pub const MAGIC: &[u8; 6] = b"\x93NUMPY";

const HEADER_ALIGN: usize = 64;

static DESCR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'descr'\s*:\s*'([^']*)'").expect("valid descr regex"));
static FORTRAN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"'fortran_order'\s*:\s*(True|False)").expect("valid fortran_order regex")
});
static SHAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'shape'\s*:\s*\(([^)]*)\)").expect("valid shape regex"));

/// Element type of a decoded array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    F32,
    F64,
}

impl DType {
    const fn size(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

/// Flat element buffer, row-major.
#[derive(Debug, Clone, PartialEq)]
pub enum Elements {
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl Elements {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> f64 {
        match self {
            Self::F32(v) => f64::from(v[index]),
            Self::F64(v) => v[index],
        }
    }
}

/// A decoded one- or two-dimensional array.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseArray {
    pub shape: Vec<usize>,
    pub data: Elements,
}

impl DenseArray {
    #[must_use]
    pub const fn dtype(&self) -> DType {
        match self.data {
            Elements::F32(_) => DType::F32,
            Elements::F64(_) => DType::F64,
        }
    }

    /// Number of rows (the first dimension).
    #[must_use]
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Row width; 1 for a one-dimensional array.
    #[must_use]
    pub fn cols(&self) -> usize {
        self.shape.get(1).copied().unwrap_or(1)
    }

    /// Copy row `index` out as `f64`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.rows()`.
    #[must_use]
    pub fn row(&self, index: usize) -> Vec<f64> {
        let cols = self.cols();
        let start = index * cols;
        (start..start + cols).map(|i| self.data.get(i)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

struct Header {
    dtype: DType,
    order: ByteOrder,
    fortran_order: bool,
    shape: Vec<usize>,
}

/// Decode an `.npy` buffer.
///
/// # Errors
///
/// Returns [`LensError::Decode`] for a bad magic, an unreadable header, an
/// unsupported dtype or rank, or a payload whose length disagrees with the
/// shape.
pub fn decode(bytes: &[u8]) -> Result<DenseArray> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(LensError::decode(FORMAT, "missing \\x93NUMPY magic"));
    }
    let major = bytes[6];
    let (header_len, header_start): (usize, usize) = match major {
        1 => (usize::from(u16::from_le_bytes([bytes[8], bytes[9]])), 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(LensError::decode(FORMAT, "truncated header length"));
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            let len = usize::try_from(len)
                .map_err(|_| LensError::decode(FORMAT, "header length overflow"))?;
            (len, 12)
        }
        other => {
            return Err(LensError::decode(FORMAT, format!("unsupported version {other}")));
        }
    };

    let payload_start = header_start
        .checked_add(header_len)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| LensError::decode(FORMAT, "header exceeds file length"))?;
    let header_text = std::str::from_utf8(&bytes[header_start..payload_start])
        .map_err(|_| LensError::decode(FORMAT, "header is not valid text"))?;
    let header = parse_header(header_text)?;

    let count: usize = header
        .shape
        .iter()
        .try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
        .ok_or_else(|| LensError::decode(FORMAT, "shape overflow"))?;
    let payload = &bytes[payload_start..];
    let expected = count
        .checked_mul(header.dtype.size())
        .ok_or_else(|| LensError::decode(FORMAT, "payload size overflow"))?;
    if payload.len() != expected {
        return Err(LensError::decode(
            FORMAT,
            format!(
                "payload is {} bytes but shape {:?} needs {expected}",
                payload.len(),
                header.shape
            ),
        ));
    }

    let data = read_elements(payload, header.dtype, header.order);
    let data = if header.fortran_order && header.shape.len() == 2 {
        transpose_to_row_major(data, header.shape[0], header.shape[1])
    } else {
        data
    };

    Ok(DenseArray {
        shape: header.shape,
        data,
    })
}

fn parse_header(text: &str) -> Result<Header> {
    let descr = DESCR_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .ok_or_else(|| LensError::decode(FORMAT, "header has no 'descr'"))?
        .as_str();
    let fortran_order = FORTRAN_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .ok_or_else(|| LensError::decode(FORMAT, "header has no 'fortran_order'"))?
        .as_str()
        == "True";
    let shape_text = SHAPE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .ok_or_else(|| LensError::decode(FORMAT, "header has no 'shape'"))?
        .as_str();

    let shape = shape_text
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|_| LensError::decode(FORMAT, format!("bad shape entry '{part}'")))
        })
        .collect::<Result<Vec<_>>>()?;
    if shape.is_empty() || shape.len() > 2 {
        return Err(LensError::decode(
            FORMAT,
            format!("only 1-D and 2-D arrays are supported, got shape {shape:?}"),
        ));
    }

    let (order, kind) = match descr.as_bytes().first() {
        Some(b'<' | b'=' | b'|') => (ByteOrder::Little, &descr[1..]),
        Some(b'>') => (ByteOrder::Big, &descr[1..]),
        _ => (ByteOrder::Little, descr),
    };
    let dtype = match kind {
        "f4" => DType::F32,
        "f8" => DType::F64,
        other => {
            return Err(LensError::decode(FORMAT, format!("unsupported dtype '{other}'")));
        }
    };

    Ok(Header {
        dtype,
        order,
        fortran_order,
        shape,
    })
}

fn read_elements(payload: &[u8], dtype: DType, order: ByteOrder) -> Elements {
    match dtype {
        DType::F32 => Elements::F32(
            payload
                .chunks_exact(4)
                .map(|c| {
                    let raw = [c[0], c[1], c[2], c[3]];
                    match order {
                        ByteOrder::Little => f32::from_le_bytes(raw),
                        ByteOrder::Big => f32::from_be_bytes(raw),
                    }
                })
                .collect(),
        ),
        DType::F64 => Elements::F64(
            payload
                .chunks_exact(8)
                .map(|c| {
                    let raw = [c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]];
                    match order {
                        ByteOrder::Little => f64::from_le_bytes(raw),
                        ByteOrder::Big => f64::from_be_bytes(raw),
                    }
                })
                .collect(),
        ),
    }
}

fn transpose<T: Copy>(values: &[T], rows: usize, cols: usize) -> Vec<T> {
    // values[j * rows + i] holds element (i, j)
    let mut out = Vec::with_capacity(values.len());
    for i in 0..rows {
        for j in 0..cols {
            out.push(values[j * rows + i]);
        }
    }
    out
}

fn transpose_to_row_major(data: Elements, rows: usize, cols: usize) -> Elements {
    match data {
        Elements::F32(v) => Elements::F32(transpose(&v, rows, cols)),
        Elements::F64(v) => Elements::F64(transpose(&v, rows, cols)),
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Element types the encoder can write.
pub trait Element: Copy {
    const DESCR: &'static str;
    fn write_le(self, out: &mut Vec<u8>);
}

impl Element for f32 {
    const DESCR: &'static str = "<f4";
    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl Element for f64 {
    const DESCR: &'static str = "<f8";
    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

/// Encode row-major `values` with the given shape as a v1 `.npy` buffer.
/// With `fortran_order` the payload is written column-major.
///
/// # Errors
///
/// Returns an error if the shape is not 1-D/2-D or disagrees with `values`.
pub fn encode<T: Element>(values: &[T], shape: &[usize], fortran_order: bool) -> Result<Vec<u8>> {
    if shape.is_empty() || shape.len() > 2 {
        return Err(LensError::decode(FORMAT, "only 1-D and 2-D arrays can be encoded"));
    }
    if shape.iter().product::<usize>() != values.len() {
        return Err(LensError::decode(FORMAT, "shape does not match value count"));
    }

    let shape_text = match shape {
        [n] => format!("({n},)"),
        dims => format!(
            "({})",
            dims.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        ),
    };
    let fortran = if fortran_order { "True" } else { "False" };
    let mut header =
        format!("{{'descr': '{}', 'fortran_order': {fortran}, 'shape': {shape_text}, }}", T::DESCR);
    let unpadded = MAGIC.len() + 2 + 2 + header.len() + 1;
    header.push_str(&" ".repeat((HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN));
    header.push('\n');

    let header_len = u16::try_from(header.len())
        .map_err(|_| LensError::decode(FORMAT, "header too long for v1"))?;
    let mut out = Vec::with_capacity(header.len() + 10 + values.len() * 8);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(header.as_bytes());

    let ordered = if fortran_order && shape.len() == 2 {
        // Write element (i, j) at position j * rows + i.
        transpose(values, shape[1], shape[0])
    } else {
        values.to_vec()
    };
    for value in ordered {
        value.write_le(&mut out);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f64_round_trip_is_exact() {
        let values = [1.5, -2.25, 3.0e-12, 4.0, 5.5, f64::MAX];
        let bytes = encode(&values, &[2, 3], false).unwrap();
        let array = decode(&bytes).unwrap();
        assert_eq!(array.shape, vec![2, 3]);
        assert_eq!(array.data, Elements::F64(values.to_vec()));
        assert_eq!(array.row(1), vec![4.0, 5.5, f64::MAX]);
    }

    #[test]
    fn f32_round_trip_within_precision() {
        let values = [0.1f32, 0.2, 0.3, 0.4];
        let array = decode(&encode(&values, &[4], false).unwrap()).unwrap();
        assert_eq!(array.dtype(), DType::F32);
        assert_eq!(array.rows(), 4);
        assert_eq!(array.cols(), 1);
        for (i, v) in values.iter().enumerate() {
            assert!((array.row(i)[0] - f64::from(*v)).abs() < 1e-7);
        }
    }

    #[test]
    fn header_is_aligned() {
        let bytes = encode(&[1.0f32, 2.0], &[1, 2], false).unwrap();
        let header_len = usize::from(u16::from_le_bytes([bytes[8], bytes[9]]));
        assert_eq!((10 + header_len) % 64, 0);
        assert_eq!(bytes[10 + header_len - 1], b'\n');
    }

    #[test]
    fn fortran_order_is_transposed() {
        // Row-major [[1, 2, 3], [4, 5, 6]] written column-major.
        let row_major = [1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0];
        let bytes = encode(&row_major, &[2, 3], true).unwrap();
        // Payload order on disk is column-major: 1, 4, 2, 5, 3, 6.
        let payload_start = bytes.len() - 6 * 8;
        let first_two: Vec<f64> = bytes[payload_start..payload_start + 16]
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(first_two, vec![1.0, 4.0]);

        let array = decode(&bytes).unwrap();
        assert_eq!(array.data, Elements::F64(row_major.to_vec()));
    }

    #[test]
    fn big_endian_payload() {
        let mut bytes = encode(&[0.0f64], &[1], false).unwrap();
        // Patch descr to big-endian and rewrite the payload.
        let pos = bytes.windows(3).position(|w| w == b"<f8").unwrap();
        bytes[pos] = b'>';
        let len = bytes.len();
        bytes[len - 8..].copy_from_slice(&2.5f64.to_be_bytes());
        let array = decode(&bytes).unwrap();
        assert_eq!(array.row(0), vec![2.5]);
    }

    #[test]
    fn rejects_bad_magic() {
        let err = decode(b"NOTNUMPY\x01\x00").unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn rejects_unsupported_dtype() {
        let mut bytes = encode(&[1.0f32], &[1], false).unwrap();
        let pos = bytes.windows(3).position(|w| w == b"<f4").unwrap();
        bytes[pos + 1] = b'i';
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("unsupported dtype"));
    }

    #[test]
    fn rejects_length_mismatch() {
        let mut bytes = encode(&[1.0f64, 2.0], &[2], false).unwrap();
        bytes.truncate(bytes.len() - 1);
        assert!(decode(&bytes).unwrap_err().is_decode());
    }

    #[test]
    fn rejects_three_dimensions() {
        let header = "{'descr': '<f8', 'fortran_order': False, 'shape': (1, 1, 1), }\n";
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&u16::try_from(header.len()).unwrap().to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&1.0f64.to_le_bytes());
        assert!(decode(&bytes).unwrap_err().is_decode());
    }
}
