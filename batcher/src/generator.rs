// Generic batch generator: owns the card vocabulary, the item permutation and
// the epoch lifecycle. Domain reshaping (drafts, decks) is plugged in through
// the `Reshape` trait.

use polars::prelude::DataFrame;
use rand::prelude::*;
use tracing::{debug, info};

use crate::error::{BatchError, Result};
use crate::store::FeatureStore;
use crate::types::{CardIdx, CardTable};

/// Output of a reshaping routine: `(features, labels, sample_weights)`.
pub type Reshaped<F, L> = (F, L, Option<Vec<f32>>);

/// Domain-specific batch reshaping.
///
/// An implementation decides which column prefixes it reads, what an "item"
/// is (a dataset row, a whole draft, ...) and how a set of items becomes a
/// fixed-shape batch.
pub trait Reshape: Sized + Send + Sync {
    type Features;
    type Labels;

    /// Column prefixes extracted into the feature store by default.
    const PREFIXES: &'static [&'static str];

    /// Whether the batch contract needs the basics-only matrices.
    const NEEDS_BASICS: bool = false;

    /// Column whose rows must stay together when a dataset is split, because
    /// one item spans several rows.
    const GROUP_COLUMN: Option<&'static str> = None;

    /// Build global data from the dataset and its extracted features.
    fn build(data: &DataFrame, store: FeatureStore) -> Result<Self>;

    /// Number of batchable items in a dataset, without building anything.
    fn count_items(data: &DataFrame) -> Result<usize>;

    /// Number of batchable items held.
    fn num_items(&self) -> usize;

    /// Reshape the given item indices into one batch.
    fn reshape(
        &self,
        items: &[usize],
        rng: &mut StdRng,
    ) -> Result<Reshaped<Self::Features, Self::Labels>>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for a batch generator
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Items per batch
    pub batch_size: usize,
    /// Reshuffle items at every epoch reset
    pub shuffle: bool,
    /// Return labels and weights along with features
    pub to_fit: bool,
    /// Drop the basic lands from the vocabulary and the feature matrices
    pub exclude_basics: bool,
    /// Keep basic-land columns in separate matrices
    pub store_basics: bool,
    /// Base seed for shuffling and sampling; drawn from the OS when unset
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            shuffle: true,
            to_fit: true,
            exclude_basics: true,
            store_basics: false,
            seed: None,
        }
    }
}

impl GeneratorConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_to_fit(mut self, to_fit: bool) -> Self {
        self.to_fit = to_fit;
        self
    }

    pub fn with_exclude_basics(mut self, exclude_basics: bool) -> Self {
        self.exclude_basics = exclude_basics;
        self
    }

    pub fn with_store_basics(mut self, store_basics: bool) -> Self {
        self.store_basics = store_basics;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

// ============================================================================
// Batches
// ============================================================================

/// One generated batch.
#[derive(Debug, Clone)]
pub enum Batch<F, L> {
    /// Fit mode: features, labels and renormalized sample weights
    Fit {
        features: F,
        labels: L,
        weights: Option<Vec<f32>>,
    },
    /// Prediction mode: features only
    Predict(F),
}

impl<F, L> Batch<F, L> {
    pub fn features(&self) -> &F {
        match self {
            Batch::Fit { features, .. } => features,
            Batch::Predict(features) => features,
        }
    }

    pub fn labels(&self) -> Option<&L> {
        match self {
            Batch::Fit { labels, .. } => Some(labels),
            Batch::Predict(_) => None,
        }
    }

    pub fn weights(&self) -> Option<&[f32]> {
        match self {
            Batch::Fit { weights, .. } => weights.as_deref(),
            Batch::Predict(_) => None,
        }
    }

    pub fn into_parts(self) -> (F, Option<L>, Option<Vec<f32>>) {
        match self {
            Batch::Fit {
                features,
                labels,
                weights,
            } => (features, Some(labels), weights),
            Batch::Predict(features) => (features, None, None),
        }
    }
}

// ============================================================================
// Generator
// ============================================================================

pub struct BatchGenerator<R: Reshape> {
    cards: CardTable,
    reshaper: R,
    config: GeneratorConfig,
    /// Current item permutation; rebuilt by `epoch_reset`
    indices: Vec<usize>,
    size: usize,
    seed: u64,
    epoch: u64,
}

impl<R: Reshape> BatchGenerator<R> {
    /// Create a generator over the reshaper's own column prefixes.
    pub fn new(data: &DataFrame, cards: &DataFrame, config: GeneratorConfig) -> Result<Self> {
        Self::with_prefixes(data, cards, R::PREFIXES, config)
    }

    /// Create a generator extracting an explicit list of column prefixes.
    pub fn with_prefixes<S: AsRef<str>>(
        data: &DataFrame,
        cards: &DataFrame,
        prefixes: &[S],
        config: GeneratorConfig,
    ) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(BatchError::InvalidBatchSize);
        }

        let cards = CardTable::from_frame(cards, config.exclude_basics)?;
        let store_basics = config.store_basics || R::NEEDS_BASICS;
        let mut store =
            FeatureStore::from_frame(data, prefixes, config.exclude_basics, store_basics)?;
        store.align(&cards)?;
        let reshaper = R::build(data, store)?;
        let size = reshaper.num_items();
        let seed = config.seed.unwrap_or_else(rand::random);

        info!(
            "Batch generator: {} items, batch size {}, {} batches, {} cards",
            size,
            config.batch_size,
            size / config.batch_size,
            cards.len()
        );

        let mut generator = Self {
            cards,
            reshaper,
            config,
            indices: Vec::new(),
            size,
            seed,
            epoch: 0,
        };
        generator.reset_indices();
        Ok(generator)
    }

    /// Number of full batches per epoch. A trailing partial batch is dropped.
    pub fn len(&self) -> usize {
        self.size / self.config.batch_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn reset_indices(&mut self) {
        let mut indices: Vec<usize> = (0..self.size).collect();
        if self.config.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.epoch));
            indices.shuffle(&mut rng);
        }
        self.indices = indices;
    }

    /// Start a new epoch: rebuild the item permutation.
    ///
    /// Without shuffling the permutation is always the identity order.
    pub fn epoch_reset(&mut self) {
        self.epoch += 1;
        self.reset_indices();
        debug!("Epoch {}: indices reset", self.epoch);
    }

    /// Alias for [`BatchGenerator::epoch_reset`], named after the trainer callback.
    pub fn on_epoch_end(&mut self) {
        self.epoch_reset();
    }

    /// Generate batch `batch_number` of the current epoch.
    pub fn get_batch(&self, batch_number: usize) -> Result<Batch<R::Features, R::Labels>> {
        let len = self.len();
        if batch_number >= len {
            return Err(BatchError::BatchOutOfRange {
                batch: batch_number,
                len,
            });
        }

        let bs = self.config.batch_size;
        let items = &self.indices[batch_number * bs..(batch_number + 1) * bs];
        let mut rng = StdRng::seed_from_u64(batch_seed(self.seed, self.epoch, batch_number));
        let (features, labels, weights) = self.reshaper.reshape(items, &mut rng)?;

        if self.config.to_fit {
            Ok(Batch::Fit {
                features,
                labels,
                weights,
            })
        } else {
            Ok(Batch::Predict(features))
        }
    }

    /// Iterate over every batch of the current epoch.
    pub fn batches(&self) -> impl Iterator<Item = Result<Batch<R::Features, R::Labels>>> + '_ {
        (0..self.len()).map(move |i| self.get_batch(i))
    }

    pub fn card_name_to_idx(&self, name: &str) -> Result<CardIdx> {
        self.cards.card_name_to_idx(name)
    }

    pub fn card_idx_to_name(&self, idx: CardIdx) -> Result<&str> {
        self.cards.card_idx_to_name(idx)
    }

    /// Current item permutation
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Number of batchable items (rows or drafts)
    pub fn total_size(&self) -> usize {
        self.size
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn n_cards(&self) -> usize {
        self.cards.len()
    }

    pub fn cards(&self) -> &CardTable {
        &self.cards
    }

    pub fn reshaper(&self) -> &R {
        &self.reshaper
    }

    pub fn reshaper_mut(&mut self) -> &mut R {
        &mut self.reshaper
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }
}

/// Per-batch RNG seed, distinct across epochs and batch numbers.
fn batch_seed(seed: u64, epoch: u64, batch_number: usize) -> u64 {
    seed ^ epoch.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (batch_number as u64).wrapping_add(1).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    /// Reshaper returning the item indices themselves.
    struct Rows {
        rows: usize,
    }

    impl Reshape for Rows {
        type Features = Vec<usize>;
        type Labels = usize;

        const PREFIXES: &'static [&'static str] = &["deck"];

        fn build(_data: &DataFrame, store: FeatureStore) -> Result<Self> {
            Ok(Self { rows: store.rows() })
        }

        fn count_items(data: &DataFrame) -> Result<usize> {
            Ok(data.height())
        }

        fn num_items(&self) -> usize {
            self.rows
        }

        fn reshape(&self, items: &[usize], _rng: &mut StdRng) -> Result<Reshaped<Vec<usize>, usize>> {
            Ok((items.to_vec(), items.len(), None))
        }
    }

    fn data(rows: usize) -> DataFrame {
        let values: Vec<i64> = (0..rows as i64).collect();
        df!("deck_opt" => values).unwrap()
    }

    fn cards() -> DataFrame {
        df!("idx" => [0i64, 1], "name" => ["opt", "shock"]).unwrap()
    }

    fn config(batch_size: usize) -> GeneratorConfig {
        GeneratorConfig::default()
            .with_batch_size(batch_size)
            .with_exclude_basics(false)
            .with_seed(7)
    }

    #[test]
    fn test_len_drops_partial_batch() {
        for (rows, bs, expected) in [(10, 4, 2), (8, 4, 2), (3, 4, 0), (9, 1, 9)] {
            let g = BatchGenerator::<Rows>::new(&data(rows), &cards(), config(bs)).unwrap();
            assert_eq!(g.len(), expected);
            assert_eq!(g.batches().count(), expected);
        }
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = BatchGenerator::<Rows>::new(&data(4), &cards(), config(0));
        assert!(matches!(err, Err(BatchError::InvalidBatchSize)));
    }

    #[test]
    fn test_identity_without_shuffle() {
        let mut g =
            BatchGenerator::<Rows>::new(&data(6), &cards(), config(2).with_shuffle(false)).unwrap();
        let identity: Vec<usize> = (0..6).collect();
        for _ in 0..3 {
            assert_eq!(g.indices(), identity.as_slice());
            g.epoch_reset();
        }
        assert_eq!(g.epoch(), 3);
    }

    #[test]
    fn test_shuffle_is_permutation() {
        let mut g = BatchGenerator::<Rows>::new(&data(50), &cards(), config(5)).unwrap();
        let first = g.indices().to_vec();
        g.on_epoch_end();
        let second = g.indices().to_vec();

        for perm in [&first, &second] {
            let mut sorted = perm.clone();
            sorted.sort_unstable();
            assert_eq!(sorted, (0..50).collect::<Vec<_>>());
        }
        assert_ne!(first, second);
    }

    #[test]
    fn test_seeded_generators_agree() {
        let a = BatchGenerator::<Rows>::new(&data(20), &cards(), config(4)).unwrap();
        let b = BatchGenerator::<Rows>::new(&data(20), &cards(), config(4)).unwrap();
        assert_eq!(a.indices(), b.indices());
    }

    #[test]
    fn test_get_batch_slices_permutation() {
        let g = BatchGenerator::<Rows>::new(&data(10), &cards(), config(3)).unwrap();
        let batch = g.get_batch(1).unwrap();
        assert_eq!(batch.features(), &g.indices()[3..6].to_vec());
        assert_eq!(batch.labels(), Some(&3));
        assert!(batch.weights().is_none());
        assert!(matches!(
            g.get_batch(3),
            Err(BatchError::BatchOutOfRange { batch: 3, len: 3 })
        ));
    }

    #[test]
    fn test_predict_mode_features_only() {
        let g = BatchGenerator::<Rows>::new(&data(4), &cards(), config(2).with_to_fit(false))
            .unwrap();
        let (features, labels, weights) = g.get_batch(0).unwrap().into_parts();
        assert_eq!(features.len(), 2);
        assert!(labels.is_none());
        assert!(weights.is_none());
    }

    #[test]
    fn test_card_lookup() {
        let g = BatchGenerator::<Rows>::new(&data(4), &cards(), config(2)).unwrap();
        assert_eq!(g.n_cards(), 2);
        assert_eq!(g.card_name_to_idx("shock").unwrap(), CardIdx(1));
        assert_eq!(g.card_idx_to_name(CardIdx(0)).unwrap(), "opt");
        assert!(g.card_name_to_idx("bolt").is_err());
    }
}
