//! Model file readers.
//!
//! Network weights live in a safetensors container: an 8-byte
//! little-endian header length, a JSON header mapping tensor names to
//! `{dtype, shape, data_offsets}`, then the raw little-endian tensor
//! bytes. Only `F32` and `F64` tensors are accepted; `F64` is narrowed
//! on load.
//!
//! The cluster-centre table is a NumPy `.npy` array of shape
//! `(classes, 2)`.

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::InferenceError;

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
const HEADER_ALIGN: usize = 8;

/// A dense row-major `f32` tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Wrap `data` with the given shape.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError::Format`] if the element count does not
    /// match the shape.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, InferenceError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(InferenceError::Format(format!(
                "tensor of shape {shape:?} needs {expected} elements, got {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Dimension sizes, outermost first.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Elements in row-major order.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Consume the tensor, returning its elements.
    #[must_use]
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct HeaderEntry {
    dtype: String,
    shape: Vec<usize>,
    data_offsets: [usize; 2],
}

/// A set of named tensors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightFile {
    tensors: BTreeMap<String, Tensor>,
}

impl WeightFile {
    /// An empty weight set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a tensor.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.tensors.insert(name.into(), tensor);
    }

    /// Look up a tensor by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    /// Look up a tensor and check its shape.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError::MissingTensor`] if `name` is absent and
    /// [`InferenceError::ShapeMismatch`] if the shape differs.
    pub fn require(&self, name: &str, shape: &[usize]) -> Result<&Tensor, InferenceError> {
        let tensor = self
            .get(name)
            .ok_or_else(|| InferenceError::MissingTensor(name.to_owned()))?;
        if tensor.shape() != shape {
            return Err(InferenceError::ShapeMismatch {
                layer: name.to_owned(),
                expected: shape.to_vec(),
                found: tensor.shape().to_vec(),
            });
        }
        Ok(tensor)
    }

    /// Number of tensors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Whether the set holds no tensors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Tensor names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    /// Read a safetensors file from disk.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError::Io`] if the file cannot be read and
    /// [`InferenceError::Format`] if its contents are malformed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, InferenceError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let weights = Self::from_bytes(&bytes)?;
        tracing::debug!(path = %path.display(), tensors = weights.len(), "loaded weight file");
        Ok(weights)
    }

    /// Parse an in-memory safetensors container.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError::Format`] for a truncated file, an
    /// invalid header, an unsupported dtype, or out-of-range offsets.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, InferenceError> {
        let (len_bytes, rest) = bytes
            .split_first_chunk::<8>()
            .ok_or_else(|| InferenceError::Format("weight file shorter than its header length".into()))?;
        let header_len = usize::try_from(u64::from_le_bytes(*len_bytes))
            .map_err(|_| InferenceError::Format("header length does not fit in memory".into()))?;
        if header_len > rest.len() {
            return Err(InferenceError::Format(format!(
                "header declares {header_len} bytes but only {} remain",
                rest.len()
            )));
        }
        let (header, data) = rest.split_at(header_len);
        let entries: BTreeMap<String, serde_json::Value> = serde_json::from_slice(header)
            .map_err(|e| InferenceError::Format(format!("invalid header: {e}")))?;

        let mut tensors = BTreeMap::new();
        for (name, value) in entries {
            if name == "__metadata__" {
                continue;
            }
            let entry: HeaderEntry = serde_json::from_value(value)
                .map_err(|e| InferenceError::Format(format!("tensor `{name}`: {e}")))?;
            let tensor = decode_entry(&name, &entry, data)?;
            tensors.insert(name, tensor);
        }
        Ok(Self { tensors })
    }

    /// Serialize as a safetensors container with `F32` tensors.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError::Format`] if the header cannot be encoded.
    pub fn to_bytes(&self) -> Result<Vec<u8>, InferenceError> {
        let mut header = BTreeMap::new();
        let mut offset = 0;
        for (name, tensor) in &self.tensors {
            let end = offset + tensor.data.len() * 4;
            header.insert(
                name.as_str(),
                HeaderEntry {
                    dtype: "F32".into(),
                    shape: tensor.shape.clone(),
                    data_offsets: [offset, end],
                },
            );
            offset = end;
        }
        let mut json = serde_json::to_vec(&header)
            .map_err(|e| InferenceError::Format(format!("cannot encode header: {e}")))?;
        json.resize(json.len().next_multiple_of(HEADER_ALIGN), b' ');

        let mut out = Vec::with_capacity(8 + json.len() + offset);
        out.extend_from_slice(&(json.len() as u64).to_le_bytes());
        out.extend_from_slice(&json);
        for tensor in self.tensors.values() {
            for v in &tensor.data {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        Ok(out)
    }
}

fn decode_entry(name: &str, entry: &HeaderEntry, data: &[u8]) -> Result<Tensor, InferenceError> {
    let [begin, end] = entry.data_offsets;
    let bytes = data.get(begin..end).ok_or_else(|| {
        InferenceError::Format(format!(
            "tensor `{name}` spans bytes {begin}..{end} of a {}-byte data section",
            data.len()
        ))
    })?;
    let values = decode_le(&entry.dtype, bytes)
        .ok_or_else(|| InferenceError::Format(format!("tensor `{name}` has unsupported dtype {}", entry.dtype)))?;
    Tensor::new(entry.shape.clone(), values)
        .map_err(|e| InferenceError::Format(format!("tensor `{name}`: {e}")))
}

/// Decode little-endian samples of a named element type.
///
/// Accepts both safetensors (`F32`) and NumPy (`<f4`) spellings.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn decode_le(dtype: &str, bytes: &[u8]) -> Option<Vec<f32>> {
    match dtype {
        "F32" | "<f4" => bytes
            .chunks_exact(4)
            .map(|c| c.try_into().ok().map(f32::from_le_bytes))
            .collect::<Option<_>>()
            .filter(|_| bytes.len() % 4 == 0),
        "F64" | "<f8" => bytes
            .chunks_exact(8)
            .map(|c| c.try_into().ok().map(|b| f64::from_le_bytes(b) as f32))
            .collect::<Option<_>>()
            .filter(|_| bytes.len() % 8 == 0),
        "<i4" => bytes
            .chunks_exact(4)
            .map(|c| c.try_into().ok().map(|b| i32::from_le_bytes(b) as f32))
            .collect::<Option<_>>()
            .filter(|_| bytes.len() % 4 == 0),
        "<i8" => bytes
            .chunks_exact(8)
            .map(|c| c.try_into().ok().map(|b| i64::from_le_bytes(b) as f32))
            .collect::<Option<_>>()
            .filter(|_| bytes.len() % 8 == 0),
        _ => None,
    }
}

/// Parse a NumPy `.npy` array (format versions 1 through 3).
///
/// Fortran-ordered 2-D arrays are transposed into row-major order.
///
/// # Errors
///
/// Returns [`InferenceError::Format`] for a missing magic string, an
/// unreadable header, an unsupported dtype, or a short data section.
pub fn read_npy(bytes: &[u8]) -> Result<Tensor, InferenceError> {
    let format = |msg: &str| InferenceError::Format(format!("npy: {msg}"));
    if !bytes.starts_with(NPY_MAGIC) || bytes.len() < 10 {
        return Err(format("missing magic string"));
    }
    let (header_len, start) = match bytes[6] {
        1 => (usize::from(u16::from_le_bytes([bytes[8], bytes[9]])), 10),
        2 | 3 => {
            let len = bytes
                .get(8..12)
                .and_then(|b| b.try_into().ok())
                .map(u32::from_le_bytes)
                .ok_or_else(|| format("truncated header length"))?;
            (len as usize, 12)
        }
        v => return Err(format(&format!("unsupported format version {v}"))),
    };
    let header = bytes
        .get(start..start + header_len)
        .and_then(|h| std::str::from_utf8(h).ok())
        .ok_or_else(|| format("truncated or non-UTF-8 header"))?;

    let descr = dict_value(header, "descr")
        .and_then(|v| v.strip_prefix('\''))
        .and_then(|v| v.split('\'').next())
        .ok_or_else(|| format("header has no descr"))?;
    let fortran = dict_value(header, "fortran_order")
        .ok_or_else(|| format("header has no fortran_order"))?
        .starts_with("True");
    let shape = dict_value(header, "shape")
        .and_then(parse_shape)
        .ok_or_else(|| format("header has no readable shape"))?;

    let count: usize = shape.iter().product();
    let width = match descr {
        "<f4" | "<i4" => 4,
        "<f8" | "<i8" => 8,
        other => return Err(format(&format!("unsupported dtype {other}"))),
    };
    let body = &bytes[start + header_len..];
    let data = body
        .get(..count * width)
        .and_then(|b| decode_le(descr, b))
        .ok_or_else(|| format(&format!("data section shorter than {count} elements")))?;

    let data = match (fortran, shape.as_slice()) {
        (true, &[rows, cols]) => (0..rows)
            .flat_map(|r| (0..cols).map(move |c| (r, c)))
            .map(|(r, c)| data[c * rows + r])
            .collect(),
        _ => data,
    };
    Tensor::new(shape, data)
}

/// Text following `'key':` in a NumPy header dict, left-trimmed.
fn dict_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!("'{key}':");
    let at = header.find(&pattern)?;
    Some(header[at + pattern.len()..].trim_start())
}

fn parse_shape(value: &str) -> Option<Vec<usize>> {
    let inner = value.strip_prefix('(')?.split(')').next()?;
    inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect()
}

/// Load the `(classes, 2)` table of quantized `ab` cluster centres.
///
/// # Errors
///
/// Returns [`InferenceError::Io`] if the file cannot be read and
/// [`InferenceError::Format`] if it is not a two-column `.npy` array.
pub fn load_centres(path: impl AsRef<Path>) -> Result<Array2<f32>, InferenceError> {
    let tensor = read_npy(&std::fs::read(path)?)?;
    centres_from_tensor(tensor)
}

pub(crate) fn centres_from_tensor(tensor: Tensor) -> Result<Array2<f32>, InferenceError> {
    match *tensor.shape() {
        [classes, 2] if classes > 0 => Array2::from_shape_vec((classes, 2), tensor.into_data())
            .map_err(|e| InferenceError::Format(e.to_string())),
        _ => Err(InferenceError::Format(format!(
            "cluster centres must have shape (classes, 2), found {:?}",
            tensor.shape()
        ))),
    }
}
