// Python bindings: generators exposed as pyclasses returning flat numpy arrays
// plus their shapes, to be reshaped on the Python side.

use std::path::Path;

use numpy::PyArray1;
use pyo3::exceptions::{PyIndexError, PyKeyError, PyValueError};
use pyo3::prelude::*;
use pyo3::{IntoPyObjectExt, Py, PyAny};

use crate::deck::{DeckGenerator, DeckReshaper};
use crate::draft::{DraftGenerator, DraftReshaper};
use crate::error::BatchError;
use crate::frame::read_frame;
use crate::generator::{BatchGenerator, GeneratorConfig, Reshape};
use crate::types::CardIdx;

impl From<BatchError> for PyErr {
    fn from(err: BatchError) -> PyErr {
        match err {
            BatchError::BatchOutOfRange { .. } => PyIndexError::new_err(err.to_string()),
            BatchError::UnknownCard(_) | BatchError::UnknownCardIdx(_) => {
                PyKeyError::new_err(err.to_string())
            }
            BatchError::Io(_) => pyo3::exceptions::PyIOError::new_err(err.to_string()),
            _ => PyValueError::new_err(err.to_string()),
        }
    }
}

fn load<R: Reshape>(
    data_path: &str,
    cards_path: &str,
    config: GeneratorConfig,
) -> PyResult<BatchGenerator<R>> {
    let data = read_frame(Path::new(data_path))?;
    let cards = read_frame(Path::new(cards_path))?;
    Ok(BatchGenerator::new(&data, &cards, config)?)
}

fn config(
    batch_size: usize,
    shuffle: bool,
    to_fit: bool,
    exclude_basics: bool,
    seed: Option<u64>,
) -> GeneratorConfig {
    let config = GeneratorConfig::default()
        .with_batch_size(batch_size)
        .with_shuffle(shuffle)
        .with_to_fit(to_fit)
        .with_exclude_basics(exclude_basics);
    match seed {
        Some(seed) => config.with_seed(seed),
        None => config,
    }
}

fn push_weights(
    py: Python<'_>,
    out: &mut Vec<Py<PyAny>>,
    weights: Option<Vec<f32>>,
) -> PyResult<()> {
    if let Some(weights) = weights {
        out.push(("weights", PyArray1::from_vec(py, weights)).into_py_any(py)?);
    }
    Ok(())
}

// ============================================================================
// Draft Sampler
// ============================================================================

#[pyclass]
pub struct DraftSampler {
    inner: DraftGenerator,
}

#[pymethods]
impl DraftSampler {
    #[new]
    #[pyo3(signature = (data_path, cards_path, batch_size=32, shuffle=true, to_fit=true, exclude_basics=true, seed=None))]
    fn new(
        data_path: &str,
        cards_path: &str,
        batch_size: usize,
        shuffle: bool,
        to_fit: bool,
        exclude_basics: bool,
        seed: Option<u64>,
    ) -> PyResult<Self> {
        let config = config(batch_size, shuffle, to_fit, exclude_basics, seed);
        Ok(Self {
            inner: load::<DraftReshaper>(data_path, cards_path, config)?,
        })
    }

    fn __len__(&self) -> usize {
        self.inner.len()
    }

    /// Batch as a list of `(name, flat array)` pairs plus shape tuples.
    fn batch(&self, py: Python<'_>, batch_idx: usize) -> PyResult<Vec<Py<PyAny>>> {
        let (features, labels, weights) = self.inner.get_batch(batch_idx)?.into_parts();
        let mut out = vec![
            ("draft_info_shape", features.draft_info_shape()).into_py_any(py)?,
            ("positions_shape", features.positions_shape()).into_py_any(py)?,
            ("draft_info", PyArray1::from_vec(py, features.draft_info)).into_py_any(py)?,
            ("positions", PyArray1::from_vec(py, features.positions)).into_py_any(py)?,
        ];
        if let Some(labels) = labels {
            out.push(("picks_shape", labels.shape()).into_py_any(py)?);
            out.push(("picks", PyArray1::from_vec(py, labels.picks)).into_py_any(py)?);
        }
        push_weights(py, &mut out, weights)?;
        Ok(out)
    }

    fn on_epoch_end(&mut self) {
        self.inner.on_epoch_end();
    }

    fn card_name_to_idx(&self, name: &str) -> PyResult<u32> {
        Ok(self.inner.card_name_to_idx(name)?.0)
    }

    fn card_idx_to_name(&self, idx: u32) -> PyResult<String> {
        Ok(self.inner.card_idx_to_name(CardIdx(idx))?.to_string())
    }
}

// ============================================================================
// Deck Sampler
// ============================================================================

#[pyclass]
pub struct DeckSampler {
    inner: DeckGenerator,
}

#[pymethods]
impl DeckSampler {
    #[new]
    #[pyo3(signature = (data_path, cards_path, batch_size=32, shuffle=true, to_fit=true, exclude_basics=true, seed=None))]
    fn new(
        data_path: &str,
        cards_path: &str,
        batch_size: usize,
        shuffle: bool,
        to_fit: bool,
        exclude_basics: bool,
        seed: Option<u64>,
    ) -> PyResult<Self> {
        let config = config(batch_size, shuffle, to_fit, exclude_basics, seed);
        Ok(Self {
            inner: load::<DeckReshaper>(data_path, cards_path, config)?,
        })
    }

    fn __len__(&self) -> usize {
        self.inner.len()
    }

    /// Batch as a list of `(name, flat array)` pairs plus shape tuples.
    fn batch(&self, py: Python<'_>, batch_idx: usize) -> PyResult<Vec<Py<PyAny>>> {
        let (features, labels, weights) = self.inner.get_batch(batch_idx)?.into_parts();

        let mut out = vec![
            ("pools_shape", features.pools_shape()).into_py_any(py)?,
            ("pools", PyArray1::from_vec(py, features.pools)).into_py_any(py)?,
            ("anchors", PyArray1::from_vec(py, features.anchors)).into_py_any(py)?,
            ("positives", PyArray1::from_vec(py, features.positives)).into_py_any(py)?,
            ("negatives", PyArray1::from_vec(py, features.negatives)).into_py_any(py)?,
        ];
        if let Some(labels) = labels {
            out.push(("basics_shape", labels.basics_shape()).into_py_any(py)?);
            out.push(("decks_shape", labels.decks_shape()).into_py_any(py)?);
            out.push(("basics", PyArray1::from_vec(py, labels.basics)).into_py_any(py)?);
            out.push(("decks", PyArray1::from_vec(py, labels.decks)).into_py_any(py)?);
        }
        push_weights(py, &mut out, weights)?;
        Ok(out)
    }

    fn on_epoch_end(&mut self) {
        self.inner.on_epoch_end();
    }

    fn card_name_to_idx(&self, name: &str) -> PyResult<u32> {
        Ok(self.inner.card_name_to_idx(name)?.0)
    }

    fn card_idx_to_name(&self, idx: u32) -> PyResult<String> {
        Ok(self.inner.card_idx_to_name(CardIdx(idx))?.to_string())
    }
}

#[pymodule]
fn mtg_batcher(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<DraftSampler>()?;
    m.add_class::<DeckSampler>()?;
    Ok(())
}
