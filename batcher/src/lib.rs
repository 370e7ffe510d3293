pub mod deck;
pub mod draft;
pub mod error;
pub mod frame;
pub mod generator;
pub mod split;
pub mod store;
pub mod types;

#[cfg(feature = "python")]
mod python;

// Re-export commonly used types
pub use types::{CardIdx, CardMatrix, CardTable, BASIC_LANDS, NUM_BASICS};

pub use error::{BatchError, Result};
pub use frame::read_frame;
pub use generator::{Batch, BatchGenerator, GeneratorConfig, Reshape, Reshaped};
pub use store::FeatureStore;

// Re-export the concrete generators
pub use deck::{DeckFeatures, DeckGenerator, DeckLabels, DeckReshaper, DegeneratePolicy};
pub use draft::{DraftFeatures, DraftGenerator, DraftLabels, DraftReshaper};
pub use split::{create_train_and_val_gens, ClassBalance, SplitConfig, Weighting};
