// Safetensors — Persisting a module's state mapping
//
// A module's state is an ordered name → tensor mapping (see
// `Module::state_dict`). It is stored as a single safetensors file:
//
//   ┌──────────────┬──────────────────────┬───────────────────────┐
//   │ 8 bytes      │ N bytes              │ raw data bytes        │
//   │ header size  │ JSON header (UTF-8)  │ (contiguous, LE)      │
//   └──────────────┴──────────────────────┴───────────────────────┘
//
// Header metadata example:
//   "__metadata__": { "format": "mosaic", "order": "[\"0.weight\",\"0.bias\"]" }
//
// The safetensors writer lays tensors out in its own order, so the
// mapping order is kept in the "order" entry and reads return entries in
// the order they were written. Every array keeps its shape and dtype.
//
// LOADING:
//
// `load_state` restores values into the tensors a module already holds.
// All names and shapes are checked first; nothing is written unless the
// whole file matches, so a failed load leaves the module as it was.
//
// Usage:
//   safetensors::save_state(&model.state_dict(), "model.safetensors")?;
//   safetensors::load_state(&model.state_dict(), "model.safetensors")?;

use std::collections::HashMap;
use std::path::Path;

use ::safetensors::tensor::{SafeTensors, TensorView};

use mosaic_core::backend::Backend;
use mosaic_core::dtype::DType;
use mosaic_core::error::{Error, Result};
use mosaic_core::shape::Shape;
use mosaic_core::tensor::Tensor;

const FORMAT: &str = "mosaic";

// DType ↔ safetensors dtype

fn dtype_to_st(dtype: DType) -> ::safetensors::Dtype {
    match dtype {
        DType::F16 => ::safetensors::Dtype::F16,
        DType::BF16 => ::safetensors::Dtype::BF16,
        DType::F32 => ::safetensors::Dtype::F32,
        DType::F64 => ::safetensors::Dtype::F64,
        DType::I64 => ::safetensors::Dtype::I64,
    }
}

fn st_to_dtype(dtype: ::safetensors::Dtype) -> Result<DType> {
    match dtype {
        ::safetensors::Dtype::F16 => Ok(DType::F16),
        ::safetensors::Dtype::BF16 => Ok(DType::BF16),
        ::safetensors::Dtype::F32 => Ok(DType::F32),
        ::safetensors::Dtype::F64 => Ok(DType::F64),
        ::safetensors::Dtype::I64 => Ok(DType::I64),
        other => Err(Error::Format(format!(
            "unsupported safetensors dtype {other:?}"
        ))),
    }
}

// Raw bytes extraction / reconstruction

fn tensor_to_bytes<B: Backend>(tensor: &Tensor<B>) -> Result<Vec<u8>> {
    let data = tensor.to_f64_vec()?;
    Ok(match tensor.dtype() {
        DType::F16 => data
            .iter()
            .flat_map(|&v| half::f16::from_f64(v).to_le_bytes())
            .collect(),
        DType::BF16 => data
            .iter()
            .flat_map(|&v| half::bf16::from_f64(v).to_le_bytes())
            .collect(),
        DType::F32 => data
            .iter()
            .flat_map(|&v| (v as f32).to_le_bytes())
            .collect(),
        DType::F64 => data.iter().flat_map(|&v| v.to_le_bytes()).collect(),
        DType::I64 => data
            .iter()
            .flat_map(|&v| (v as i64).to_le_bytes())
            .collect(),
    })
}

fn bytes_to_f64(raw: &[u8], dtype: DType) -> Vec<f64> {
    match dtype {
        DType::F16 => raw
            .chunks_exact(2)
            .map(|c| half::f16::from_le_bytes([c[0], c[1]]).to_f64())
            .collect(),
        DType::BF16 => raw
            .chunks_exact(2)
            .map(|c| half::bf16::from_le_bytes([c[0], c[1]]).to_f64())
            .collect(),
        DType::F32 => raw
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
            .collect(),
        DType::F64 => raw
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect(),
        DType::I64 => raw
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f64)
            .collect(),
    }
}

/// One decoded entry of a state file.
struct RawEntry {
    name: String,
    dtype: DType,
    shape: Shape,
    data: Vec<f64>,
}

// Write

/// Write an ordered name → tensor mapping to `path`.
pub fn save_state<B: Backend>(
    state: &[(String, Tensor<B>)],
    path: impl AsRef<Path>,
) -> Result<()> {
    let bytes = state
        .iter()
        .map(|(_, t)| tensor_to_bytes(t))
        .collect::<Result<Vec<_>>>()?;

    let mut views = Vec::with_capacity(state.len());
    for ((name, tensor), data) in state.iter().zip(&bytes) {
        let view = TensorView::new(dtype_to_st(tensor.dtype()), tensor.dims().to_vec(), data)
            .map_err(Error::format)?;
        views.push((name.as_str(), view));
    }

    let order: Vec<&str> = state.iter().map(|(n, _)| n.as_str()).collect();
    let mut metadata = HashMap::new();
    metadata.insert("format".to_string(), FORMAT.to_string());
    metadata.insert(
        "order".to_string(),
        serde_json::to_string(&order).map_err(Error::format)?,
    );

    ::safetensors::serialize_to_file(views, &Some(metadata), path.as_ref())
        .map_err(Error::format)?;
    log::debug!(
        "wrote {} tensors to {}",
        state.len(),
        path.as_ref().display()
    );
    Ok(())
}

// Read

fn read_raw(path: &Path) -> Result<Vec<RawEntry>> {
    let buffer = std::fs::read(path)?;
    let (_, header) = SafeTensors::read_metadata(&buffer).map_err(Error::format)?;
    let tensors = SafeTensors::deserialize(&buffer).map_err(Error::format)?;

    // Entries in write order when recorded, otherwise in file order.
    let stored: Vec<String> = tensors.names().into_iter().cloned().collect();
    let names: Vec<String> = match header.metadata().as_ref().and_then(|m| m.get("order")) {
        Some(order) => {
            let names: Vec<String> = serde_json::from_str(order).map_err(Error::format)?;
            let (mut listed, mut present) = (names.clone(), stored);
            listed.sort_unstable();
            present.sort_unstable();
            if listed != present {
                return Err(Error::Format(format!(
                    "{}: recorded order lists {} tensors, file holds {}",
                    path.display(),
                    listed.len(),
                    present.len()
                )));
            }
            names
        }
        None => stored,
    };

    let mut entries = Vec::with_capacity(names.len());
    for name in names {
        let view = tensors.tensor(&name).map_err(Error::format)?;
        let dtype = st_to_dtype(view.dtype())?;
        entries.push(RawEntry {
            data: bytes_to_f64(view.data(), dtype),
            shape: Shape::from(view.shape()),
            dtype,
            name,
        });
    }
    Ok(entries)
}

/// Read a state file into fresh tensors on `device`, in write order.
pub fn read_state<B: Backend>(
    path: impl AsRef<Path>,
    device: &B::Device,
) -> Result<Vec<(String, Tensor<B>)>> {
    read_raw(path.as_ref())?
        .into_iter()
        .map(|e| {
            let t = Tensor::<B>::from_f64_slice(&e.data, e.shape, e.dtype, device)?;
            Ok((e.name, t))
        })
        .collect()
}

/// Restore a state file into the tensors of `state`, in place.
///
/// Fails with `MissingKey`, `UnexpectedKey` or `StateShapeMismatch` before
/// touching any tensor. Values are converted to each target's dtype.
pub fn load_state<B: Backend>(
    state: &[(String, Tensor<B>)],
    path: impl AsRef<Path>,
) -> Result<()> {
    let entries = read_raw(path.as_ref())?;
    let by_name: HashMap<&str, &RawEntry> =
        entries.iter().map(|e| (e.name.as_str(), e)).collect();

    for (name, tensor) in state {
        let entry = by_name
            .get(name.as_str())
            .ok_or_else(|| Error::MissingKey(name.clone()))?;
        if &entry.shape != tensor.shape() {
            return Err(Error::StateShapeMismatch {
                name: name.clone(),
                expected: tensor.shape().clone(),
                got: entry.shape.clone(),
            });
        }
    }
    for entry in &entries {
        if !state.iter().any(|(n, _)| *n == entry.name) {
            return Err(Error::UnexpectedKey(entry.name.clone()));
        }
    }

    for (name, tensor) in state {
        if let Some(entry) = by_name.get(name.as_str()) {
            tensor.update_data_inplace(&entry.data)?;
        }
    }
    log::debug!(
        "restored {} tensors from {}",
        state.len(),
        path.as_ref().display()
    );
    Ok(())
}
