//! Train/validation splitting and matched generator construction.

use std::collections::{HashMap, HashSet};

use polars::prelude::*;
use rand::prelude::*;
use rand::seq::index;
use tracing::{info, warn};

use crate::error::{BatchError, Result};
use crate::frame;
use crate::generator::{BatchGenerator, GeneratorConfig, Reshape};
use crate::types::WEIGHTS_COLUMN;

// ============================================================================
// Importance Weighting
// ============================================================================

/// Computes one positive importance weight per dataset row.
pub trait Weighting {
    fn weights(&self, data: &DataFrame) -> Result<Vec<f32>>;
}

impl<F> Weighting for F
where
    F: Fn(&DataFrame) -> Result<Vec<f32>>,
{
    fn weights(&self, data: &DataFrame) -> Result<Vec<f32>> {
        self(data)
    }
}

/// Inverse class-frequency weights over a label column.
///
/// Each row gets `rows / (classes * rows_in_its_class)`, so every class
/// carries the same total weight.
#[derive(Debug, Clone)]
pub struct ClassBalance {
    pub column: String,
}

impl ClassBalance {
    pub fn new(column: &str) -> Self {
        Self {
            column: column.to_string(),
        }
    }
}

impl Weighting for ClassBalance {
    fn weights(&self, data: &DataFrame) -> Result<Vec<f32>> {
        let labels = frame::str_values(data, &self.column)?;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for label in &labels {
            *counts.entry(label.as_str()).or_default() += 1;
        }

        let rows = labels.len() as f64;
        let classes = counts.len() as f64;
        Ok(labels
            .iter()
            .map(|l| (rows / (classes * counts[l.as_str()] as f64)) as f32)
            .collect())
    }
}

// ============================================================================
// Split Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct SplitConfig {
    /// Group rows by this column so no id lands in both partitions. Defaults
    /// to the reshaper's own grouping column (`draft_id` for drafts).
    pub id_col: Option<String>,
    /// Fraction of rows (or ids) used for training, in (0, 1]
    pub train_p: f64,
    /// Generator settings; `batch_size` is the training batch size
    pub generator: GeneratorConfig,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            id_col: None,
            train_p: 1.0,
            generator: GeneratorConfig::default(),
        }
    }
}

impl SplitConfig {
    pub fn with_id_col(mut self, id_col: &str) -> Self {
        self.id_col = Some(id_col.to_string());
        self
    }

    pub fn with_train_p(mut self, train_p: f64) -> Self {
        self.train_p = train_p;
        self
    }

    pub fn with_generator(mut self, generator: GeneratorConfig) -> Self {
        self.generator = generator;
        self
    }
}

// ============================================================================
// Splitting
// ============================================================================

/// Split row positions: `floor(n * train_p)` drawn without replacement for
/// training, the rest for validation. Both lists come back in row order.
pub(crate) fn split_rows(n: usize, train_p: f64, rng: &mut StdRng) -> (Vec<usize>, Vec<usize>) {
    let n_train = (n as f64 * train_p) as usize;
    let mut in_train = vec![false; n];
    for i in index::sample(rng, n, n_train) {
        in_train[i] = true;
    }
    (0..n).partition(|&i| in_train[i])
}

/// Split row positions by group id: a `train_p` share of the distinct ids goes
/// to training along with every row carrying them.
pub(crate) fn split_groups(
    ids: &[String],
    train_p: f64,
    rng: &mut StdRng,
) -> (Vec<usize>, Vec<usize>) {
    let mut seen = HashSet::new();
    let unique: Vec<&str> = ids
        .iter()
        .map(String::as_str)
        .filter(|id| seen.insert(*id))
        .collect();

    let (train_groups, _) = split_rows(unique.len(), train_p, rng);
    let train_ids: HashSet<&str> = train_groups.into_iter().map(|g| unique[g]).collect();
    (0..ids.len()).partition(|&row| train_ids.contains(ids[row].as_str()))
}

/// Validation batch size giving roughly as many validation batches as
/// training batches. Never below 1.
pub fn validation_batch_size(validation_items: usize, training_batches: usize) -> usize {
    let size = validation_items / training_batches.max(1);
    if size == 0 {
        warn!(
            "{} validation items for {} training batches; using batch size 1",
            validation_items, training_batches
        );
        1
    } else {
        size
    }
}

/// Build a training generator and, when `train_p < 1`, a matched validation
/// generator.
///
/// Without an `id_col`, reshapers whose items span several rows are split by
/// their grouping column so no item is cut in two.
///
/// With a `weighting`, per-row importance weights are computed over the full
/// dataset first and stored in the `ml_weights` column.
pub fn create_train_and_val_gens<R: Reshape>(
    mut data: DataFrame,
    cards: &DataFrame,
    config: &SplitConfig,
    weighting: Option<&dyn Weighting>,
) -> Result<(BatchGenerator<R>, Option<BatchGenerator<R>>)> {
    if !(config.train_p > 0.0 && config.train_p <= 1.0) {
        return Err(BatchError::InvalidFraction(config.train_p));
    }

    if let Some(weighting) = weighting {
        let weights = weighting.weights(&data)?;
        if weights.len() != data.height() {
            return Err(BatchError::WeightLength {
                expected: data.height(),
                found: weights.len(),
            });
        }
        data.with_column(Column::new(WEIGHTS_COLUMN.into(), weights))?;
    }

    let (train, val) = if config.train_p < 1.0 {
        let seed = config.generator.seed.unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);
        let group = config.id_col.as_deref().or(R::GROUP_COLUMN);
        let (train_rows, val_rows) = match group {
            None => split_rows(data.height(), config.train_p, &mut rng),
            Some(col) => split_groups(&frame::str_values(&data, col)?, config.train_p, &mut rng),
        };
        info!(
            "Split {} rows: {} training, {} validation",
            data.height(),
            train_rows.len(),
            val_rows.len()
        );
        let val = frame::take_rows(&data, &val_rows)?;
        (frame::take_rows(&data, &train_rows)?, Some(val))
    } else {
        (data, None)
    };

    if train.height() == 0 {
        return Err(BatchError::EmptyPartition("training"));
    }

    let train_gen = BatchGenerator::<R>::new(&train, cards, config.generator.clone())?;

    let val_gen = match val {
        Some(val) if val.height() > 0 => {
            if train_gen.is_empty() {
                return Err(BatchError::EmptyPartition("training batch"));
            }
            let batch_size = validation_batch_size(R::count_items(&val)?, train_gen.len());
            let val_config = config.generator.clone().with_batch_size(batch_size);
            Some(BatchGenerator::<R>::new(&val, cards, val_config)?)
        }
        _ => None,
    };

    Ok((train_gen, val_gen))
}
