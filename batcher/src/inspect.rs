use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use mtg_batcher::{
    create_train_and_val_gens, read_frame, BatchGenerator, ClassBalance, DeckReshaper,
    DraftReshaper, GeneratorConfig, Reshape, SplitConfig, Weighting,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Kind {
    Draft,
    Deck,
}

#[derive(Parser, Debug)]
#[command(name = "inspect")]
#[command(about = "Build draft or deck batch generators from a dataset and log their batch shapes.")]
struct Args {
    /// Dataset file (.parquet or .csv)
    #[arg(short, long)]
    data: PathBuf,

    /// Card table file with `idx` and `name` columns (.parquet or .csv)
    #[arg(short, long)]
    cards: PathBuf,

    /// Which generator to build
    #[arg(short, long, value_enum, default_value = "draft")]
    kind: Kind,

    /// Training batch size
    #[arg(short, long, default_value_t = 32)]
    batch_size: usize,

    /// Fraction of rows (or ids) used for training
    #[arg(long, default_value_t = 1.0)]
    train_p: f64,

    /// Split by this id column instead of by row
    #[arg(long)]
    id_col: Option<String>,

    #[arg(long)]
    seed: Option<u64>,

    /// Class-balance sample weights over this label column
    #[arg(long)]
    weight_column: Option<String>,

    #[arg(long, default_value = "false")]
    no_shuffle: bool,

    /// Keep basic lands in the vocabulary and the features
    #[arg(long, default_value = "false")]
    keep_basics: bool,
}

impl Args {
    fn split_config(&self) -> SplitConfig {
        let mut generator = GeneratorConfig::default()
            .with_batch_size(self.batch_size)
            .with_shuffle(!self.no_shuffle)
            .with_exclude_basics(!self.keep_basics);
        if let Some(seed) = self.seed {
            generator = generator.with_seed(seed);
        }

        let mut config = SplitConfig::default()
            .with_train_p(self.train_p)
            .with_generator(generator);
        if let Some(id_col) = &self.id_col {
            config = config.with_id_col(id_col);
        }
        config
    }
}

fn describe<R, D>(name: &str, generator: &BatchGenerator<R>, shapes: D) -> mtg_batcher::Result<()>
where
    R: Reshape,
    D: Fn(&R::Features, Option<&R::Labels>) -> String,
{
    info!(
        "{}: {} items, {} batches of {}, {} cards",
        name,
        generator.total_size(),
        generator.len(),
        generator.batch_size(),
        generator.n_cards()
    );
    if generator.is_empty() {
        return Ok(());
    }

    let batch = generator.get_batch(0)?;
    info!("  first batch: {}", shapes(batch.features(), batch.labels()));
    if let Some(weights) = batch.weights() {
        info!("  weights: {} values, sum {:.4}", weights.len(), weights.iter().sum::<f32>());
    }
    Ok(())
}

fn inspect<R, D>(args: &Args, shapes: D) -> mtg_batcher::Result<()>
where
    R: Reshape,
    D: Fn(&R::Features, Option<&R::Labels>) -> String,
{
    info!("Loading dataset from: {:?}", args.data);
    let data = read_frame(&args.data)?;
    info!("Loading card table from: {:?}", args.cards);
    let cards = read_frame(&args.cards)?;
    info!("Dataset: {} rows, {} columns", data.height(), data.width());

    let weighting = args.weight_column.as_deref().map(ClassBalance::new);
    let (train, val) = create_train_and_val_gens::<R>(
        data,
        &cards,
        &args.split_config(),
        weighting.as_ref().map(|w| w as &dyn Weighting),
    )?;

    describe("train", &train, &shapes)?;
    if let Some(val) = &val {
        describe("validation", val, &shapes)?;
    }
    Ok(())
}

fn main() -> ExitCode {
    // Initialize tracing
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    let args = Args::parse();

    let result = match args.kind {
        Kind::Draft => inspect::<DraftReshaper, _>(&args, |f, l| {
            format!(
                "draft_info {:?}, positions {:?}, picks {:?}",
                f.draft_info_shape(),
                f.positions_shape(),
                l.map(|l| l.shape())
            )
        }),
        Kind::Deck => inspect::<DeckReshaper, _>(&args, |f, l| {
            format!(
                "pools {:?}, anchors [{}], basics {:?}, decks {:?}",
                f.pools_shape(),
                f.anchors.len(),
                l.map(|l| l.basics_shape()),
                l.map(|l| l.decks_shape())
            )
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
