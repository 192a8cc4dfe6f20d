//! Decoder for NumPy `.npy` files (format versions 1.0, 2.0 and 3.0).

use serde_json::{Number, Value};
use thiserror::Error;

const MAGIC: &[u8] = b"\x93NUMPY";
const MAX_EMPTY_LISTS: usize = 1 << 16;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NpyError {
    #[error("Not a NumPy file")]
    BadMagic,

    #[error("Unsupported .npy format version {0}.{1}")]
    UnsupportedVersion(u8, u8),

    #[error("Truncated .npy file")]
    Truncated,

    #[error("Invalid .npy header: {0}")]
    InvalidHeader(String),

    #[error("Unsupported dtype '{0}'")]
    UnsupportedDtype(String),

    #[error("Array data is {actual} bytes, shape requires {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Float,
    Int,
    UInt,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Dtype {
    kind: Kind,
    size: usize,
    big_endian: bool,
}

impl Dtype {
    fn parse(descr: &str) -> Result<Self, NpyError> {
        let unsupported = || NpyError::UnsupportedDtype(descr.to_string());
        let mut chars = descr.chars();
        let big_endian = match chars.next() {
            Some('<') | Some('|') | Some('=') => false,
            Some('>') => true,
            _ => return Err(unsupported()),
        };
        let kind = match chars.next() {
            Some('f') => Kind::Float,
            Some('i') => Kind::Int,
            Some('u') => Kind::UInt,
            Some('b') => Kind::Bool,
            _ => return Err(unsupported()),
        };
        let size: usize = chars.as_str().parse().map_err(|_| unsupported())?;

        let valid = match kind {
            Kind::Float => matches!(size, 4 | 8),
            Kind::Int | Kind::UInt => matches!(size, 1 | 2 | 4 | 8),
            Kind::Bool => size == 1,
        };
        if !valid {
            return Err(unsupported());
        }
        Ok(Self {
            kind,
            size,
            big_endian,
        })
    }

    fn decode(&self, raw: &[u8]) -> f64 {
        let mut buf = [0u8; 8];
        buf[..self.size].copy_from_slice(raw);
        if self.big_endian {
            buf[..self.size].reverse();
        }

        match (self.kind, self.size) {
            (Kind::Float, 4) => f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
            (Kind::Float, _) => f64::from_le_bytes(buf),
            (Kind::Bool, _) | (Kind::UInt, _) => u64::from_le_bytes(buf) as f64,
            (Kind::Int, size) => {
                // Sign-extend from the element width
                let shift = 64 - 8 * size as u32;
                ((i64::from_le_bytes(buf) << shift) >> shift) as f64
            }
        }
    }
}

/// A decoded array in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    pub shape: Vec<usize>,
    pub values: Vec<f64>,
    kind: Kind,
}

impl NpyArray {
    pub fn parse(bytes: &[u8]) -> Result<Self, NpyError> {
        if bytes.len() < MAGIC.len() + 2 || &bytes[..MAGIC.len()] != MAGIC {
            return Err(NpyError::BadMagic);
        }
        let (major, minor) = (bytes[6], bytes[7]);

        let (header_len, header_start) = match major {
            1 => {
                let len = bytes.get(8..10).ok_or(NpyError::Truncated)?;
                (u16::from_le_bytes([len[0], len[1]]) as usize, 10)
            }
            2 | 3 => {
                let len = bytes.get(8..12).ok_or(NpyError::Truncated)?;
                (
                    u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize,
                    12,
                )
            }
            _ => return Err(NpyError::UnsupportedVersion(major, minor)),
        };

        let header_end = header_start + header_len;
        let header = bytes
            .get(header_start..header_end)
            .ok_or(NpyError::Truncated)?;
        let header = std::str::from_utf8(header)
            .map_err(|_| NpyError::InvalidHeader("header is not valid text".to_string()))?;

        let dtype = Dtype::parse(quoted_value(header, "descr")?)?;
        let fortran_order = parse_bool(header, "fortran_order")?;
        let shape = parse_shape(header)?;

        let too_large = || NpyError::InvalidHeader(format!("shape {:?} is too large", shape));
        let count = shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(too_large)?;
        let expected = count.checked_mul(dtype.size).ok_or_else(too_large)?;
        // Empty arrays still expand into one JSON list per leading index
        let lists = shape
            .iter()
            .take_while(|&&dim| dim != 0)
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(too_large)?;
        if count == 0 && lists > MAX_EMPTY_LISTS {
            return Err(too_large());
        }
        let data = &bytes[header_end..];
        if data.len() != expected {
            return Err(NpyError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }

        let values: Vec<f64> = data
            .chunks_exact(dtype.size)
            .map(|raw| dtype.decode(raw))
            .collect();
        let values = if fortran_order {
            fortran_to_row_major(&values, &shape)
        } else {
            values
        };

        Ok(Self {
            shape,
            values,
            kind: dtype.kind,
        })
    }

    /// Nested JSON arrays following the array's shape. Non-finite floats become `null`.
    pub fn to_json(&self) -> Value {
        self.nest(&self.values, &self.shape)
    }

    fn nest(&self, values: &[f64], shape: &[usize]) -> Value {
        match shape.split_first() {
            None => values
                .first()
                .map(|&v| self.element(v))
                .unwrap_or(Value::Null),
            Some((&len, rest)) => {
                let step: usize = rest.iter().product();
                Value::Array(
                    (0..len)
                        .map(|i| self.nest(&values[i * step..(i + 1) * step], rest))
                        .collect(),
                )
            }
        }
    }

    fn element(&self, value: f64) -> Value {
        match self.kind {
            Kind::Float => Number::from_f64(value)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Kind::UInt | Kind::Bool => Value::from(value as u64),
            Kind::Int => Value::from(value as i64),
        }
    }
}

/// Returns the text following `'key':` in the header dictionary.
fn dict_value<'a>(header: &'a str, key: &str) -> Result<&'a str, NpyError> {
    let start = [format!("'{}'", key), format!("\"{}\"", key)]
        .iter()
        .find_map(|quoted| header.find(quoted.as_str()).map(|i| i + quoted.len()))
        .ok_or_else(|| NpyError::InvalidHeader(format!("missing '{}'", key)))?;

    header[start..]
        .trim_start()
        .strip_prefix(':')
        .map(str::trim_start)
        .ok_or_else(|| NpyError::InvalidHeader(format!("malformed '{}' entry", key)))
}

fn quoted_value<'a>(header: &'a str, key: &str) -> Result<&'a str, NpyError> {
    let rest = dict_value(header, key)?;
    let invalid = || NpyError::InvalidHeader(format!("'{}' is not a string", key));
    let quote = rest.chars().next().filter(|c| *c == '\'' || *c == '"').ok_or_else(invalid)?;
    let rest = &rest[1..];
    let end = rest.find(quote).ok_or_else(invalid)?;
    Ok(&rest[..end])
}

fn parse_bool(header: &str, key: &str) -> Result<bool, NpyError> {
    let rest = dict_value(header, key)?;
    if rest.starts_with("True") {
        Ok(true)
    } else if rest.starts_with("False") {
        Ok(false)
    } else {
        Err(NpyError::InvalidHeader(format!("'{}' is not a boolean", key)))
    }
}

fn parse_shape(header: &str) -> Result<Vec<usize>, NpyError> {
    let rest = dict_value(header, "shape")?;
    let invalid = || NpyError::InvalidHeader("'shape' is not a tuple".to_string());
    let inner = rest.strip_prefix('(').ok_or_else(invalid)?;
    let end = inner.find(')').ok_or_else(invalid)?;

    inner[..end]
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| {
            dim.trim_end_matches('L')
                .parse()
                .map_err(|_| NpyError::InvalidHeader(format!("bad dimension '{}'", dim)))
        })
        .collect()
}

fn fortran_to_row_major(values: &[f64], shape: &[usize]) -> Vec<f64> {
    if shape.len() < 2 {
        return values.to_vec();
    }

    let mut out = Vec::with_capacity(values.len());
    let mut index = vec![0usize; shape.len()];
    for _ in 0..values.len() {
        let mut offset = 0;
        let mut step = 1;
        for (i, dim) in index.iter().zip(shape) {
            offset += i * step;
            step *= dim;
        }
        out.push(values[offset]);

        for axis in (0..shape.len()).rev() {
            index[axis] += 1;
            if index[axis] < shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn npy(descr: &str, fortran: bool, shape: &str, data: &[u8]) -> Vec<u8> {
        let mut header = format!(
            "{{'descr': '{}', 'fortran_order': {}, 'shape': {}, }}",
            descr,
            if fortran { "True" } else { "False" },
            shape
        );
        // Pad so the data starts on a 64-byte boundary, as numpy does
        while (10 + header.len() + 1) % 64 != 0 {
            header.push(' ');
        }
        header.push('\n');

        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(data);
        bytes
    }

    fn f8(values: &[f64]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_parse_single_lead_float64() {
        let values: Vec<f64> = (0..10).map(f64::from).collect();
        let array = NpyArray::parse(&npy("<f8", false, "(1, 10)", &f8(&values))).unwrap();

        assert_eq!(array.shape, vec![1, 10]);
        assert_eq!(array.to_json(), json!([[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]]));
    }

    #[test]
    fn test_parse_one_dimensional_int16() {
        let data: Vec<u8> = [-2i16, 0, 300].iter().flat_map(|v| v.to_le_bytes()).collect();
        let array = NpyArray::parse(&npy("<i2", false, "(3,)", &data)).unwrap();
        assert_eq!(array.to_json(), json!([-2, 0, 300]));
    }

    #[test]
    fn test_parse_big_endian_float32() {
        let data: Vec<u8> = [1.5f32, -0.25].iter().flat_map(|v| v.to_be_bytes()).collect();
        let array = NpyArray::parse(&npy(">f4", false, "(2,)", &data)).unwrap();
        assert_eq!(array.values, vec![1.5, -0.25]);
    }

    #[test]
    fn test_fortran_order_is_transposed() {
        // [[1, 2, 3], [4, 5, 6]] stored column-major
        let data = f8(&[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        let array = NpyArray::parse(&npy("<f8", true, "(2, 3)", &data)).unwrap();
        assert_eq!(array.to_json(), json!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]));
    }

    #[test]
    fn test_nan_becomes_null() {
        let array = NpyArray::parse(&npy("<f8", false, "(1, 2)", &f8(&[f64::NAN, 1.0]))).unwrap();
        assert_eq!(array.to_json(), json!([[null, 1.0]]));
    }

    #[test]
    fn test_version_two_header() {
        let v1 = npy("<f8", false, "(1,)", &f8(&[7.0]));
        let header_len = u16::from_le_bytes([v1[8], v1[9]]) as u32;
        let mut v2 = MAGIC.to_vec();
        v2.extend_from_slice(&[2, 0]);
        v2.extend_from_slice(&header_len.to_le_bytes());
        v2.extend_from_slice(&v1[10..]);

        let array = NpyArray::parse(&v2).unwrap();
        assert_eq!(array.values, vec![7.0]);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert_eq!(NpyArray::parse(b"hello world"), Err(NpyError::BadMagic));
        assert_eq!(
            NpyArray::parse(&npy("<c16", false, "(1,)", &[0; 16])),
            Err(NpyError::UnsupportedDtype("<c16".to_string()))
        );
        assert_eq!(
            NpyArray::parse(&npy("<f8", false, "(1, 10)", &f8(&[1.0]))),
            Err(NpyError::LengthMismatch {
                expected: 80,
                actual: 8
            })
        );

        let mut truncated = npy("<f8", false, "(1,)", &f8(&[1.0]));
        truncated.truncate(20);
        assert_eq!(NpyArray::parse(&truncated), Err(NpyError::Truncated));
    }

    #[test]
    fn test_overflowing_shape_is_rejected() {
        let result = NpyArray::parse(&npy("<f8", false, "(4294967296, 4294967296)", &[]));
        assert!(matches!(result, Err(NpyError::InvalidHeader(_))));

        let result = NpyArray::parse(&npy("<f8", false, "(2305843009213693952,)", &[]));
        assert!(matches!(result, Err(NpyError::InvalidHeader(_))));

        let result = NpyArray::parse(&npy("<f8", false, "(1099511627776, 0)", &[]));
        assert!(matches!(result, Err(NpyError::InvalidHeader(_))));

        let empty = NpyArray::parse(&npy("<f8", false, "(3, 0)", &[])).unwrap();
        assert_eq!(empty.to_json(), json!([[], [], []]));
    }

    #[test]
    fn test_large_unsigned_values_are_not_saturated() {
        let value = 1u64 << 63;
        let array = NpyArray::parse(&npy("<u8", false, "(1,)", &value.to_le_bytes())).unwrap();
        assert_eq!(array.to_json(), json!([9223372036854775808u64]));
    }
}
