use std::collections::HashMap;

use polars::prelude::DataFrame;

use crate::error::{BatchError, Result};
use crate::frame;

// ============================================================================
// Column Naming
// ============================================================================

/// Card table column holding the dense card index
pub const CARD_IDX_COLUMN: &str = "idx";
/// Card table column holding the card name
pub const CARD_NAME_COLUMN: &str = "name";

pub const DRAFT_ID_COLUMN: &str = "draft_id";
pub const POSITION_COLUMN: &str = "position";
pub const PICK_COLUMN: &str = "pick";
pub const PACK_NUMBER_COLUMN: &str = "pack_number";
pub const PICK_NUMBER_COLUMN: &str = "pick_number";
/// Optional precomputed importance weight per row
pub const WEIGHTS_COLUMN: &str = "ml_weights";

/// The five basic lands. The card table reserves its first rows for them.
pub const BASIC_LANDS: [&str; 5] = ["plains", "island", "swamp", "mountain", "forest"];

/// Number of leading card table rows dropped when basics are excluded
pub const NUM_BASICS: usize = BASIC_LANDS.len();

/// True if `card` names one of the basic lands (case-insensitive).
pub fn is_basic_land(card: &str) -> bool {
    BASIC_LANDS.iter().any(|b| b.eq_ignore_ascii_case(card))
}

// ============================================================================
// Index Types (newtypes for type safety)
// ============================================================================

/// Dense card vocabulary index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CardIdx(pub u32);

// ============================================================================
// Card Vocabulary
// ============================================================================

/// Card vocabulary: names keyed by a contiguous index starting at 0.
#[derive(Debug, Clone, Default)]
pub struct CardTable {
    /// Card names indexed by CardIdx.0
    names: Vec<String>,
    /// Maps card name -> CardIdx
    lookup: HashMap<String, CardIdx>,
}

impl CardTable {
    /// Build the vocabulary from a frame with `idx` and `name` columns.
    ///
    /// Rows are ordered by `idx`. With `exclude_basics` the first five rows
    /// (the basic lands) are dropped; the remaining cards are renumbered so
    /// indices stay contiguous from 0 in their original relative order.
    pub fn from_frame(cards: &DataFrame, exclude_basics: bool) -> Result<Self> {
        let idx = frame::i64_values(cards, CARD_IDX_COLUMN)?;
        let names = frame::str_values(cards, CARD_NAME_COLUMN)?;

        let mut rows: Vec<(i64, String)> = idx.into_iter().zip(names).collect();
        rows.sort_by_key(|(i, _)| *i);

        let skip = if exclude_basics { NUM_BASICS } else { 0 };
        Self::from_names(rows.into_iter().skip(skip).map(|(_, n)| n))
    }

    /// Build from names already in index order. Names must be unique.
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut lookup = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if lookup.insert(name.clone(), CardIdx(i as u32)).is_some() {
                return Err(BatchError::DuplicateCard(name.clone()));
            }
        }
        Ok(Self { names, lookup })
    }

    /// Number of cards in the vocabulary
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Exact-match lookup of a card's index.
    pub fn card_name_to_idx(&self, name: &str) -> Result<CardIdx> {
        self.lookup
            .get(name)
            .copied()
            .ok_or_else(|| BatchError::UnknownCard(name.to_string()))
    }

    /// Inverse of [`CardTable::card_name_to_idx`].
    pub fn card_idx_to_name(&self, idx: CardIdx) -> Result<&str> {
        self.names
            .get(idx.0 as usize)
            .map(String::as_str)
            .ok_or(BatchError::UnknownCardIdx(idx.0))
    }

    /// Card names in index order
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

// ============================================================================
// Card Matrix
// ============================================================================

/// Dense row-major matrix of per-card values (one row per dataset row).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardMatrix {
    /// Card name of each column
    pub cards: Vec<String>,
    /// Number of rows
    pub rows: usize,
    /// Row-major values, `rows * cards.len()` long
    pub data: Vec<f32>,
}

impl CardMatrix {
    /// Number of card columns
    pub fn cols(&self) -> usize {
        self.cards.len()
    }

    /// A single row
    pub fn row(&self, i: usize) -> &[f32] {
        let c = self.cols();
        &self.data[i * c..(i + 1) * c]
    }

    /// Copy the given rows, in order, into a new flat buffer.
    pub fn gather(&self, rows: &[usize]) -> Vec<f32> {
        let mut out = Vec::with_capacity(rows.len() * self.cols());
        for &r in rows {
            out.extend_from_slice(self.row(r));
        }
        out
    }

    /// Rearrange columns into `order`. Cards in `order` without a column here
    /// become all-zero columns; a column naming a card outside `order` fails.
    pub fn reorder(&self, order: &[String]) -> Result<CardMatrix> {
        let position: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        let targets = self
            .cards
            .iter()
            .map(|card| {
                position
                    .get(card.as_str())
                    .copied()
                    .ok_or_else(|| BatchError::UnknownCard(card.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        let cols = order.len();
        let mut data = vec![0.0f32; self.rows * cols];
        for r in 0..self.rows {
            let dst = &mut data[r * cols..(r + 1) * cols];
            for (&t, &v) in targets.iter().zip(self.row(r)) {
                dst[t] = v;
            }
        }

        Ok(CardMatrix {
            cards: order.to_vec(),
            rows: self.rows,
            data,
        })
    }
}
