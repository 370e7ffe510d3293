//! Deck batches: deck/sideboard composition plus anchor/positive/negative
//! card sampling for a contrastive objective.

use polars::prelude::DataFrame;
use rand::prelude::*;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{BatchError, Result};
use crate::generator::{BatchGenerator, Reshape, Reshaped};
use crate::store::{batch_weights, FeatureStore};

pub const DECK_PREFIX: &str = "deck";
pub const SIDEBOARD_PREFIX: &str = "sideboard";

/// Deck composition batches
pub type DeckGenerator = BatchGenerator<DeckReshaper>;

/// What to do when a sampling row has no positive mass (e.g. an empty
/// sideboard, or a deck whose only card is the anchor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DegeneratePolicy {
    /// Sample uniformly over every card except the anchor (for negatives,
    /// only cards absent from the deck)
    #[default]
    Uniform,
    /// Always return card 0, even when card 0 is the anchor
    FirstIndex,
    /// Fail the whole batch
    Fail,
}

/// Model inputs for a deck batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DeckFeatures {
    /// Deck + sideboard counts, `(k, n_cards)`
    pub pools: Vec<f32>,
    pub anchors: Vec<i32>,
    pub positives: Vec<i32>,
    pub negatives: Vec<i32>,
    pub batch_size: usize,
    pub n_cards: usize,
}

impl DeckFeatures {
    pub fn pools_shape(&self) -> [usize; 2] {
        [self.batch_size, self.n_cards]
    }
}

/// Reconstruction targets for a deck batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DeckLabels {
    /// Basic land counts in the deck, `(k, n_basics)`
    pub basics: Vec<f32>,
    /// Deck counts, `(k, n_cards)`
    pub decks: Vec<f32>,
    pub batch_size: usize,
    pub n_cards: usize,
    pub n_basics: usize,
}

impl DeckLabels {
    pub fn basics_shape(&self) -> [usize; 2] {
        [self.batch_size, self.n_basics]
    }

    pub fn decks_shape(&self) -> [usize; 2] {
        [self.batch_size, self.n_cards]
    }
}

pub struct DeckReshaper {
    store: FeatureStore,
    policy: DegeneratePolicy,
}

impl DeckReshaper {
    pub fn policy(&self) -> DegeneratePolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: DegeneratePolicy) {
        self.policy = policy;
    }

    pub fn store(&self) -> &FeatureStore {
        &self.store
    }
}

impl Reshape for DeckReshaper {
    type Features = DeckFeatures;
    type Labels = DeckLabels;

    const PREFIXES: &'static [&'static str] = &[DECK_PREFIX, SIDEBOARD_PREFIX];
    const NEEDS_BASICS: bool = true;

    fn build(_data: &DataFrame, store: FeatureStore) -> Result<Self> {
        let deck = store.matrix(DECK_PREFIX)?;
        let sideboard = store.matrix(SIDEBOARD_PREFIX)?;
        if deck.cards != sideboard.cards {
            return Err(BatchError::ShapeMismatch(format!(
                "deck columns ({}) and sideboard columns ({}) name different cards",
                deck.cols(),
                sideboard.cols()
            )));
        }
        let basics = store.basics(DECK_PREFIX)?;

        info!(
            "Deck data: {} decks, {} cards, {} basics",
            deck.rows,
            deck.cols(),
            basics.cols()
        );

        Ok(Self {
            store,
            policy: DegeneratePolicy::default(),
        })
    }

    fn count_items(data: &DataFrame) -> Result<usize> {
        Ok(data.height())
    }

    fn num_items(&self) -> usize {
        self.store.rows()
    }

    fn reshape(
        &self,
        items: &[usize],
        rng: &mut StdRng,
    ) -> Result<Reshaped<DeckFeatures, DeckLabels>> {
        let deck = self.store.matrix(DECK_PREFIX)?;
        let sideboard = self.store.matrix(SIDEBOARD_PREFIX)?;
        let basics = self.store.basics(DECK_PREFIX)?;
        let (k, n) = (items.len(), deck.cols());

        let decks = deck.gather(items);
        let sideboards = sideboard.gather(items);
        let pools: Vec<f32> = decks.iter().zip(&sideboards).map(|(d, s)| d + s).collect();
        let weights = batch_weights(self.store.weights(), items)?;

        // One uniform draw per row for each of anchor, positive and negative.
        let draws: Vec<[f64; 3]> = (0..k).map(|_| rng.gen()).collect();

        let samples: Vec<(i32, i32, i32)> = (0..k)
            .into_par_iter()
            .map(|i| {
                let deck_row = &decks[i * n..(i + 1) * n];
                let sideboard_row = &sideboards[i * n..(i + 1) * n];
                sample_card_pair(deck_row, sideboard_row, draws[i], self.policy, i)
            })
            .collect::<Result<_>>()?;

        let mut anchors = Vec::with_capacity(k);
        let mut positives = Vec::with_capacity(k);
        let mut negatives = Vec::with_capacity(k);
        for (a, p, ng) in samples {
            anchors.push(a);
            positives.push(p);
            negatives.push(ng);
        }

        Ok((
            DeckFeatures {
                pools,
                anchors,
                positives,
                negatives,
                batch_size: k,
                n_cards: n,
            },
            DeckLabels {
                basics: basics.gather(items),
                decks,
                batch_size: k,
                n_cards: n,
                n_basics: basics.cols(),
            },
            weights,
        ))
    }
}

/// Sample (anchor, positive, negative) for one deck.
///
/// The anchor follows the deck counts; the positive follows the deck counts
/// with the anchor removed; the negative follows the sideboard counts with the
/// anchor removed. When the sideboard has no mass the uniform fallback only
/// considers cards the deck does not play.
pub fn sample_card_pair(
    deck: &[f32],
    sideboard: &[f32],
    draws: [f64; 3],
    policy: DegeneratePolicy,
    row: usize,
) -> Result<(i32, i32, i32)> {
    let anchor = sample_index(deck, None, draws[0], policy, row)?;
    let positive = sample_index(deck, Some(anchor), draws[1], policy, row)?;
    let negative = match draw(sideboard, Some(anchor), draws[2]) {
        Some(j) => j,
        None => {
            let outside_deck: Vec<usize> = (0..deck.len())
                .filter(|&j| j != anchor && deck[j] <= 0.0)
                .collect();
            fallback(&outside_deck, draws[2], policy, row)?
        }
    };
    Ok((anchor as i32, positive as i32, negative as i32))
}

/// Inverse-CDF draw from unnormalized category counts.
///
/// Returns the first category whose cumulative share exceeds `u` (in `[0, 1)`),
/// ignoring `exclude` and non-positive counts. Rows with no mass fall back to
/// `policy`, with every category except `exclude` as a candidate.
pub fn sample_index(
    counts: &[f32],
    exclude: Option<usize>,
    u: f64,
    policy: DegeneratePolicy,
    row: usize,
) -> Result<usize> {
    match draw(counts, exclude, u) {
        Some(j) => Ok(j),
        None => {
            let candidates: Vec<usize> = (0..counts.len()).filter(|&j| Some(j) != exclude).collect();
            fallback(&candidates, u, policy, row)
        }
    }
}

/// Inverse-CDF draw; `None` when no category has positive mass.
fn draw(counts: &[f32], exclude: Option<usize>, u: f64) -> Option<usize> {
    let mass = |j: usize, c: f32| -> f64 {
        if Some(j) == exclude {
            0.0
        } else {
            c.max(0.0) as f64
        }
    };

    let total: f64 = counts.iter().enumerate().map(|(j, &c)| mass(j, c)).sum();
    if total <= 0.0 {
        return None;
    }

    let threshold = u * total;
    let mut running = 0.0;
    let mut last = None;
    for (j, &c) in counts.iter().enumerate() {
        let m = mass(j, c);
        if m <= 0.0 {
            continue;
        }
        running += m;
        last = Some(j);
        if running > threshold {
            return Some(j);
        }
    }
    // Rounding left the draw past the final bin.
    last
}

fn fallback(candidates: &[usize], u: f64, policy: DegeneratePolicy, row: usize) -> Result<usize> {
    debug!("Row {}: no sampling mass, applying {:?}", row, policy);
    match policy {
        DegeneratePolicy::FirstIndex => Ok(0),
        DegeneratePolicy::Fail => Err(BatchError::DegenerateDistribution { row }),
        DegeneratePolicy::Uniform => {
            if candidates.is_empty() {
                return Err(BatchError::DegenerateDistribution { row });
            }
            let j = ((u * candidates.len() as f64) as usize).min(candidates.len() - 1);
            Ok(candidates[j])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{Batch, GeneratorConfig};
    use crate::types::CardIdx;
    use polars::prelude::*;

    fn cards() -> DataFrame {
        df!(
            "idx" => [0i64, 1, 2, 3, 4, 5, 6, 7],
            "name" => ["plains", "island", "swamp", "mountain", "forest", "opt", "shock", "bolt"]
        )
        .unwrap()
    }

    /// `rows` copies of one deck over cards (opt, shock, bolt).
    fn decks(rows: usize, deck: [i64; 3], sideboard: [i64; 3]) -> DataFrame {
        let col = |v: i64| vec![v; rows];
        let weights: Vec<f32> = (1..=rows).map(|w| w as f32).collect();
        DataFrame::new(vec![
            Column::new("deck_opt".into(), col(deck[0])),
            Column::new("deck_shock".into(), col(deck[1])),
            Column::new("deck_bolt".into(), col(deck[2])),
            Column::new("deck_island".into(), col(7)),
            Column::new("deck_forest".into(), col(8)),
            Column::new("sideboard_opt".into(), col(sideboard[0])),
            Column::new("sideboard_shock".into(), col(sideboard[1])),
            Column::new("sideboard_bolt".into(), col(sideboard[2])),
            Column::new("ml_weights".into(), weights),
        ])
        .unwrap()
    }

    fn config(batch_size: usize) -> GeneratorConfig {
        GeneratorConfig::default().with_batch_size(batch_size).with_seed(11)
    }

    #[test]
    fn test_example_deck_sampling() {
        let g = DeckGenerator::new(&decks(64, [3, 0, 1], [0, 2, 0]), &cards(), config(64)).unwrap();
        let batch = g.get_batch(0).unwrap();
        let f = batch.features();

        for i in 0..64 {
            let (a, p, ng) = (f.anchors[i], f.positives[i], f.negatives[i]);
            assert!(a == 0 || a == 2, "anchor {}", a);
            if a == 0 {
                assert_eq!(p, 2);
            } else {
                assert_eq!(p, 0);
            }
            assert_eq!(ng, 1);
        }
        // 64 draws at 3:1 odds land on both anchors.
        assert!(f.anchors.contains(&0));
        assert!(f.anchors.contains(&2));
    }

    #[test]
    fn test_pools_and_labels() {
        let g = DeckGenerator::new(&decks(4, [3, 0, 1], [0, 2, 0]), &cards(), config(2)).unwrap();
        let Batch::Fit {
            features,
            labels,
            weights,
        } = g.get_batch(1).unwrap()
        else {
            panic!("expected fit batch");
        };

        assert_eq!(features.pools_shape(), [2, 3]);
        assert_eq!(features.pools, vec![3.0, 2.0, 1.0, 3.0, 2.0, 1.0]);
        assert_eq!(labels.decks_shape(), [2, 3]);
        assert_eq!(labels.decks, vec![3.0, 0.0, 1.0, 3.0, 0.0, 1.0]);
        // Basics come out in plains, island, swamp, mountain, forest order.
        assert_eq!(labels.basics_shape(), [2, 5]);
        assert_eq!(
            labels.basics,
            vec![0.0, 7.0, 0.0, 0.0, 8.0, 0.0, 7.0, 0.0, 0.0, 8.0]
        );

        let w = weights.unwrap();
        assert!((w.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_basics_stored_without_flag() {
        let g = DeckGenerator::new(
            &decks(2, [1, 1, 1], [1, 1, 1]),
            &cards(),
            config(2).with_store_basics(false),
        )
        .unwrap();
        assert!(g.reshaper().store().basics(DECK_PREFIX).is_ok());
    }

    #[test]
    fn test_seeded_batches_repeat() {
        let data = decks(32, [2, 1, 1], [1, 1, 3]);
        let a = DeckGenerator::new(&data, &cards(), config(16)).unwrap();
        let b = DeckGenerator::new(&data, &cards(), config(16)).unwrap();
        assert_eq!(
            a.get_batch(1).unwrap().features(),
            b.get_batch(1).unwrap().features()
        );
    }

    #[test]
    fn test_pairs_never_repeat_anchor() {
        let data = decks(40, [2, 1, 1], [1, 1, 3]);
        let mut g = DeckGenerator::new(&data, &cards(), config(8)).unwrap();
        for _ in 0..3 {
            for batch in g.batches() {
                let batch = batch.unwrap();
                let f = batch.features();
                for i in 0..f.batch_size {
                    assert_ne!(f.positives[i], f.anchors[i]);
                    assert_ne!(f.negatives[i], f.anchors[i]);
                }
            }
            g.epoch_reset();
        }
    }

    #[test]
    fn test_degenerate_policies() {
        let data = decks(2, [2, 0, 0], [0, 0, 0]);

        let mut g = DeckGenerator::new(&data, &cards(), config(2)).unwrap();
        let f = g.get_batch(0).unwrap().features().clone();
        for i in 0..2 {
            assert_eq!(f.anchors[i], 0);
            assert_ne!(f.positives[i], 0);
            assert_ne!(f.negatives[i], 0);
        }

        g.reshaper_mut().set_policy(DegeneratePolicy::Fail);
        assert!(matches!(
            g.get_batch(0),
            Err(BatchError::DegenerateDistribution { .. })
        ));

        g.reshaper_mut().set_policy(DegeneratePolicy::FirstIndex);
        let f = g.get_batch(0).unwrap().features().clone();
        assert_eq!(f.positives, vec![0, 0]);

        // Empty sideboard: negatives fall back to the one card outside the deck.
        let data = decks(16, [2, 1, 0], [0, 0, 0]);
        let g = DeckGenerator::new(&data, &cards(), config(16)).unwrap();
        let f = g.get_batch(0).unwrap().features().clone();
        assert!(f.negatives.iter().all(|&n| n == 2));
    }

    #[test]
    fn test_negative_fallback_avoids_deck_cards() {
        let (deck, sideboard) = ([2.0f32, 1.0, 0.0], [0.0f32; 3]);
        for step in 0..100 {
            let u = step as f64 / 100.0;
            let (a, p, n) =
                sample_card_pair(&deck, &sideboard, [u, u, u], DegeneratePolicy::Uniform, 0)
                    .unwrap();
            assert_ne!(a, p);
            assert_eq!(n, 2);
        }

        // Every card is in the deck: nothing can serve as a negative.
        assert!(matches!(
            sample_card_pair(&[1.0, 1.0], &[0.0, 0.0], [0.2; 3], DegeneratePolicy::Uniform, 4),
            Err(BatchError::DegenerateDistribution { row: 4 })
        ));
    }

    #[test]
    fn test_shuffled_columns_follow_vocabulary() {
        // Columns listed bolt, shock, opt; vocabulary is opt=0, shock=1, bolt=2.
        let data = df!(
            "deck_bolt" => [0i64, 0],
            "deck_shock" => [4i64, 4],
            "deck_opt" => [0i64, 0],
            "sideboard_bolt" => [1i64, 1],
            "sideboard_shock" => [0i64, 0],
            "sideboard_opt" => [2i64, 2]
        )
        .unwrap();
        let g = DeckGenerator::new(&data, &cards(), config(2)).unwrap();
        let batch = g.get_batch(0).unwrap();
        let f = batch.features();

        assert_eq!(f.pools_shape(), [2, g.n_cards()]);
        assert_eq!(f.pools[..3], [2.0, 4.0, 1.0]);
        for &a in &f.anchors {
            assert_eq!(g.card_idx_to_name(CardIdx(a as u32)).unwrap(), "shock");
        }
        assert_eq!(batch.labels().unwrap().decks[..3], [0.0, 4.0, 0.0]);
    }

    #[test]
    fn test_sample_index_inverse_cdf() {
        let counts = [3.0f32, 0.0, 1.0];
        let p = DegeneratePolicy::Fail;
        assert_eq!(sample_index(&counts, None, 0.0, p, 0).unwrap(), 0);
        assert_eq!(sample_index(&counts, None, 0.74, p, 0).unwrap(), 0);
        assert_eq!(sample_index(&counts, None, 0.75, p, 0).unwrap(), 2);
        assert_eq!(sample_index(&counts, None, 0.9999, p, 0).unwrap(), 2);
        assert_eq!(sample_index(&counts, Some(0), 0.1, p, 0).unwrap(), 2);
        assert_eq!(sample_index(&[0.0, 2.0, 0.0], Some(0), 0.5, p, 0).unwrap(), 1);
    }

    #[test]
    fn test_uniform_fallback_skips_excluded() {
        let counts = [0.0f32; 3];
        let p = DegeneratePolicy::Uniform;
        assert_eq!(sample_index(&counts, Some(0), 0.0, p, 0).unwrap(), 1);
        assert_eq!(sample_index(&counts, Some(0), 0.99, p, 0).unwrap(), 2);
        assert_eq!(sample_index(&counts, Some(1), 0.6, p, 0).unwrap(), 2);
        assert_eq!(sample_index(&counts, None, 0.5, p, 0).unwrap(), 1);
        assert!(sample_index(&[0.0], Some(0), 0.5, p, 3).is_err());
    }
}
