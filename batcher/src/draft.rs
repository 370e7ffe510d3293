//! Draft batches: per-pick records grouped into fixed-length sequences.
//!
//! Rows are grouped by `draft_id` and ordered by `position`. Every batch holds
//! whole drafts, so the item count is the number of distinct drafts rather
//! than the number of rows.

use std::collections::HashMap;

use polars::prelude::DataFrame;
use rand::rngs::StdRng;
use rayon::prelude::*;
use tracing::info;

use crate::error::{BatchError, Result};
use crate::frame;
use crate::generator::{BatchGenerator, Reshape, Reshaped};
use crate::store::{batch_weights, FeatureStore};
use crate::types::{
    DRAFT_ID_COLUMN, PACK_NUMBER_COLUMN, PICK_COLUMN, PICK_NUMBER_COLUMN, POSITION_COLUMN,
};

pub const PACK_PREFIX: &str = "pack_card";
pub const POOL_PREFIX: &str = "pool";

/// Draft sequence batches
pub type DraftGenerator = BatchGenerator<DraftReshaper>;

/// Model inputs for a draft batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftFeatures {
    /// Pack vectors followed by pool vectors, `(k, t, 2 * n_cards)` row-major
    pub draft_info: Vec<f32>,
    /// Linear pick position, `(k, t, 1)`
    pub positions: Vec<i32>,
    pub batch_size: usize,
    pub seq_len: usize,
    pub n_cards: usize,
}

impl DraftFeatures {
    pub fn draft_info_shape(&self) -> [usize; 3] {
        [self.batch_size, self.seq_len, 2 * self.n_cards]
    }

    pub fn positions_shape(&self) -> [usize; 3] {
        [self.batch_size, self.seq_len, 1]
    }
}

/// Pick labels for a draft batch, `(k, t, 1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftLabels {
    pub picks: Vec<i32>,
    pub batch_size: usize,
    pub seq_len: usize,
}

impl DraftLabels {
    pub fn shape(&self) -> [usize; 3] {
        [self.batch_size, self.seq_len, 1]
    }
}

pub struct DraftReshaper {
    store: FeatureStore,
    /// Draft ids in order of first appearance (index = draft ordinal)
    draft_ids: Vec<String>,
    /// Dataset rows of each draft, ordered by position
    blocks: Vec<Vec<usize>>,
    /// Raw `position` value per row
    row_positions: Vec<i64>,
    /// Linear position index per row
    linear_positions: Vec<i32>,
    picks: Vec<i32>,
    /// Weight per draft ordinal, taken from the draft's first row. Batch items
    /// are drafts, so weights are sliced per draft rather than per dataset row.
    draft_weights: Option<Vec<f32>>,
    /// Sequence length: max position + 1 over the dataset
    t: usize,
}

impl DraftReshaper {
    pub fn seq_len(&self) -> usize {
        self.t
    }

    pub fn draft_ids(&self) -> &[String] {
        &self.draft_ids
    }

    pub fn n_cards(&self) -> usize {
        self.store.matrix(PACK_PREFIX).map(|m| m.cols()).unwrap_or(0)
    }

    pub fn store(&self) -> &FeatureStore {
        &self.store
    }

    /// Fails unless the draft has exactly one row per position `0..t`.
    fn check_complete(&self, draft: usize) -> Result<()> {
        let block = &self.blocks[draft];
        let complete = block.len() == self.t
            && block
                .iter()
                .enumerate()
                .all(|(p, &row)| self.row_positions[row] == p as i64);
        if complete {
            Ok(())
        } else {
            Err(BatchError::IncompleteDraft {
                draft_id: self.draft_ids[draft].clone(),
                expected: self.t,
                found: block.len(),
            })
        }
    }
}

/// Group rows by id, keeping ids in order of first appearance.
fn group_rows(ids: Vec<String>) -> (Vec<String>, Vec<Vec<usize>>) {
    let mut ordinal: HashMap<String, usize> = HashMap::new();
    let mut unique = Vec::new();
    let mut blocks: Vec<Vec<usize>> = Vec::new();

    for (row, id) in ids.into_iter().enumerate() {
        let d = *ordinal.entry(id.clone()).or_insert_with(|| {
            unique.push(id);
            blocks.push(Vec::new());
            blocks.len() - 1
        });
        blocks[d].push(row);
    }
    (unique, blocks)
}

impl Reshape for DraftReshaper {
    type Features = DraftFeatures;
    type Labels = DraftLabels;

    const PREFIXES: &'static [&'static str] = &[PACK_PREFIX, POOL_PREFIX];
    const GROUP_COLUMN: Option<&'static str> = Some(DRAFT_ID_COLUMN);

    fn build(data: &DataFrame, store: FeatureStore) -> Result<Self> {
        let row_positions = frame::i64_values(data, POSITION_COLUMN)?;
        let picks = frame::i64_values(data, PICK_COLUMN)?;
        let pack_numbers = frame::i64_values(data, PACK_NUMBER_COLUMN)?;
        let pick_numbers = frame::i64_values(data, PICK_NUMBER_COLUMN)?;
        let (draft_ids, mut blocks) = group_rows(frame::str_values(data, DRAFT_ID_COLUMN)?);

        for block in &mut blocks {
            block.sort_by_key(|&row| row_positions[row]);
        }

        let t = row_positions.iter().max().map_or(0, |&m| (m + 1).max(0) as usize);
        let picks_per_pack = pick_numbers.iter().max().map_or(1, |&m| m + 1);
        let linear_positions = pack_numbers
            .iter()
            .zip(&pick_numbers)
            .map(|(&pack, &pick)| (pack * picks_per_pack + pick) as i32)
            .collect();

        let pack = store.matrix(PACK_PREFIX)?;
        let pool = store.matrix(POOL_PREFIX)?;
        if pack.cards != pool.cards {
            return Err(BatchError::ShapeMismatch(format!(
                "pack columns ({}) and pool columns ({}) name different cards",
                pack.cols(),
                pool.cols()
            )));
        }

        let draft_weights = store.weights().map(|w| {
            blocks
                .iter()
                .map(|block| block.first().map_or(0.0, |&row| w[row]))
                .collect()
        });

        info!(
            "Draft data: {} drafts, {} rows, sequence length {}, {} cards",
            draft_ids.len(),
            row_positions.len(),
            t,
            pack.cols()
        );

        Ok(Self {
            store,
            draft_ids,
            blocks,
            row_positions,
            linear_positions,
            picks: picks.into_iter().map(|p| p as i32).collect(),
            draft_weights,
            t,
        })
    }

    fn count_items(data: &DataFrame) -> Result<usize> {
        let (unique, _) = group_rows(frame::str_values(data, DRAFT_ID_COLUMN)?);
        Ok(unique.len())
    }

    fn num_items(&self) -> usize {
        self.draft_ids.len()
    }

    fn reshape(
        &self,
        items: &[usize],
        _rng: &mut StdRng,
    ) -> Result<Reshaped<DraftFeatures, DraftLabels>> {
        for &draft in items {
            self.check_complete(draft)?;
        }

        let pack = self.store.matrix(PACK_PREFIX)?;
        let pool = self.store.matrix(POOL_PREFIX)?;
        let (k, t, n) = (items.len(), self.t, pack.cols());
        let width = 2 * n;

        let mut draft_info = vec![0.0f32; k * t * width];
        if t * width > 0 {
            draft_info
                .par_chunks_mut(t * width)
                .zip(items.par_iter())
                .for_each(|(seq, &draft)| {
                    for (p, &row) in self.blocks[draft].iter().enumerate() {
                        let step = &mut seq[p * width..(p + 1) * width];
                        step[..n].copy_from_slice(pack.row(row));
                        step[n..].copy_from_slice(pool.row(row));
                    }
                });
        }

        let mut positions = Vec::with_capacity(k * t);
        let mut picks = Vec::with_capacity(k * t);
        for &draft in items {
            for &row in &self.blocks[draft] {
                positions.push(self.linear_positions[row]);
                picks.push(self.picks[row]);
            }
        }

        let weights = batch_weights(self.draft_weights.as_deref(), items)?;

        Ok((
            DraftFeatures {
                draft_info,
                positions,
                batch_size: k,
                seq_len: t,
                n_cards: n,
            },
            DraftLabels {
                picks,
                batch_size: k,
                seq_len: t,
            },
            weights,
        ))
    }
}
