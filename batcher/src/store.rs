//! Per-prefix feature matrices extracted from a dataset.
//!
//! Each declared column prefix (`pack_card`, `pool`, `deck`, `sideboard`, ...)
//! maps to one dense [`CardMatrix`]. Basic-land columns can be kept apart in a
//! second map, and the optional `ml_weights` column is held alongside.
//!
//! Matrices come out of the frame in dataset column order. [`FeatureStore::align`]
//! puts them in vocabulary order so column `j` is card index `j`.

use std::collections::HashMap;

use polars::prelude::DataFrame;
use tracing::{debug, warn};

use crate::error::{BatchError, Result};
use crate::frame;
use crate::types::{CardMatrix, CardTable, BASIC_LANDS, WEIGHTS_COLUMN};

#[derive(Debug, Clone, Default)]
pub struct FeatureStore {
    /// Prefixes in declaration order
    prefixes: Vec<String>,
    /// prefix -> card matrix (basics excluded when requested)
    matrices: HashMap<String, CardMatrix>,
    /// prefix -> basic-land-only matrix (only when basics are stored)
    basics: HashMap<String, CardMatrix>,
    /// Per-row importance weights, if the dataset carries them
    weights: Option<Vec<f32>>,
    rows: usize,
}

impl FeatureStore {
    pub fn from_frame<S: AsRef<str>>(
        df: &DataFrame,
        prefixes: &[S],
        exclude_basics: bool,
        store_basics: bool,
    ) -> Result<Self> {
        let mut store = Self {
            rows: df.height(),
            ..Self::default()
        };

        for prefix in prefixes.iter().map(AsRef::as_ref) {
            let cols = frame::card_columns(df, prefix, exclude_basics);
            if cols.is_empty() {
                warn!("No columns match prefix '{}_'; feature matrix is empty", prefix);
            }
            let matrix = frame::card_matrix(df, prefix, &cols)?;
            debug!("Prefix '{}': {} x {}", prefix, matrix.rows, matrix.cols());
            store.matrices.insert(prefix.to_string(), matrix);

            if store_basics {
                let basic_cols = frame::basic_columns(df, prefix);
                let basics = frame::card_matrix(df, prefix, &basic_cols)?;
                store.basics.insert(prefix.to_string(), basics);
            }
            store.prefixes.push(prefix.to_string());
        }

        if frame::has_column(df, WEIGHTS_COLUMN) {
            store.weights = Some(frame::f32_values(df, WEIGHTS_COLUMN)?);
        }

        Ok(store)
    }

    /// Reorder every card matrix into the vocabulary's index order, and every
    /// basics matrix into [`BASIC_LANDS`] order.
    ///
    /// Cards with no column become zero columns. A column naming a card
    /// outside the vocabulary fails with `UnknownCard`.
    pub fn align(&mut self, cards: &CardTable) -> Result<()> {
        for (prefix, matrix) in self.matrices.iter_mut() {
            *matrix = matrix.reorder(cards.names())?;
            debug!("Prefix '{}' aligned to {} cards", prefix, matrix.cols());
        }

        let basics: Vec<String> = BASIC_LANDS.iter().map(|b| b.to_string()).collect();
        for matrix in self.basics.values_mut() {
            // Basic columns match case-insensitively.
            for card in &mut matrix.cards {
                *card = card.to_ascii_lowercase();
            }
            *matrix = matrix.reorder(&basics)?;
        }
        Ok(())
    }

    /// Matrix stored for a prefix.
    pub fn matrix(&self, prefix: &str) -> Result<&CardMatrix> {
        self.matrices
            .get(prefix)
            .ok_or_else(|| BatchError::MissingPrefix(prefix.to_string()))
    }

    /// Basic-land matrix stored for a prefix.
    pub fn basics(&self, prefix: &str) -> Result<&CardMatrix> {
        self.basics
            .get(prefix)
            .ok_or_else(|| BatchError::MissingPrefix(format!("{}_basics", prefix)))
    }

    pub fn weights(&self) -> Option<&[f32]> {
        self.weights.as_deref()
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Number of dataset rows
    pub fn rows(&self) -> usize {
        self.rows
    }
}

/// Slice `weights` at `indices` and rescale the slice to sum to 1.
///
/// `None` in, `None` out.
pub fn batch_weights(weights: Option<&[f32]>, indices: &[usize]) -> Result<Option<Vec<f32>>> {
    let Some(weights) = weights else {
        return Ok(None);
    };

    let mut out: Vec<f32> = indices.iter().map(|&i| weights[i]).collect();
    let total: f32 = out.iter().sum();
    if !(total > 0.0 && total.is_finite()) {
        return Err(BatchError::InvalidWeights(total));
    }
    for w in &mut out {
        *w /= total;
    }
    Ok(Some(out))
}
