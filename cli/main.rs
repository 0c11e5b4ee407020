#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::{Path, PathBuf};
use std::process;

use sage::config::SageConfig;
use sage::data::{Dataset, load_dataset};
use sage::imputation::{MarginalImputation, ReferenceImputation};
use sage::loss::Loss;
use sage::model::LinearModel;
use sage::report::{format_summary, write_sage_tsv};
use sage::sampler::{SageValues, permutation_sampling};

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ImputationCli {
    /// Sample held-out values from background rows
    Marginal,
    /// Fill held-out values with the background column means
    Reference,
}

#[derive(Args)]
pub struct DataArgs {
    /// Name of the target column (defaults to the last column)
    #[arg(long)]
    pub target: Option<String>,

    /// Field separator of the input files
    #[arg(long, default_value_t = ',')]
    pub separator: char,
}

#[derive(Args)]
pub struct FitArgs {
    /// Path to the training data (header row, target column last)
    pub training_data: PathBuf,

    #[command(flatten)]
    pub data: DataArgs,

    /// Where to write the fitted model
    #[arg(long, default_value = "model.toml")]
    pub output: PathBuf,
}

#[derive(Args)]
pub struct ExplainArgs {
    /// Path to the explicand data (header row, target column last)
    pub data_path: PathBuf,

    /// Path to a trained model file (.toml)
    #[arg(long)]
    pub model: PathBuf,

    /// Background data used for imputation (defaults to the explicand data)
    #[arg(long, value_name = "PATH")]
    pub background: Option<PathBuf>,

    /// Use at most this many randomly chosen background rows
    #[arg(long, value_name = "N")]
    pub background_rows: Option<usize>,

    #[command(flatten)]
    pub data: DataArgs,

    /// TOML file with estimator settings; flags below take precedence
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Number of permutations to sample
    #[arg(long, value_name = "N")]
    pub n_samples: Option<usize>,

    /// Imputation draws averaged per evaluated feature subset
    #[arg(long, value_name = "M")]
    pub m_samples: Option<usize>,

    /// Explicand rows per predictor call
    #[arg(long, value_name = "ROWS")]
    pub batch_size: Option<usize>,

    /// Loss function: mse or cross entropy
    #[arg(long)]
    pub loss: Option<Loss>,

    /// Seed for reproducible sampling
    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long, value_enum, default_value_t = ImputationCli::Marginal)]
    pub imputation: ImputationCli,

    /// Evaluate permutations on all cores
    #[arg(long)]
    pub parallel: bool,

    /// Stop early once the estimates have converged
    #[arg(long)]
    pub detect_convergence: bool,

    /// Convergence threshold, as a fraction of the total value to explain
    #[arg(long, value_name = "FRACTION")]
    pub convergence_threshold: Option<f64>,

    /// Show a progress bar
    #[arg(long)]
    pub bar: bool,

    /// Where to write the SAGE values
    #[arg(long, default_value = "sage.tsv")]
    pub output: PathBuf,
}

#[derive(Parser)]
#[command(
    name = "sage",
    version,
    about = "Global feature importance (SAGE) by permutation sampling."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a linear reference model
    #[command(about = "Fit a least squares model (outputs: model.toml)")]
    Fit(FitArgs),

    /// Estimate SAGE values of a trained model
    #[command(about = "Estimate SAGE values (outputs: sage.tsv)")]
    Explain(ExplainArgs),

    /// Display version information
    #[command(about = "Display version information")]
    Version,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Fit(args)) => fit(args),
        Some(Commands::Explain(args)) => explain(args),
        Some(Commands::Version) => {
            println!("sage {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn separator_byte(separator: char) -> Result<u8, Box<dyn std::error::Error>> {
    if separator.is_ascii() {
        Ok(separator as u8)
    } else {
        Err(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("--separator must be a single ASCII character, got '{separator}'"),
        )))
    }
}

fn load(path: &Path, data: &DataArgs) -> Result<Dataset, Box<dyn std::error::Error>> {
    Ok(load_dataset(
        path,
        data.target.as_deref(),
        separator_byte(data.separator)?,
    )?)
}

pub fn fit(args: FitArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading training data from: {}", args.training_data.display());
    let data = load(&args.training_data, &args.data)?;
    println!(
        "Loaded {} samples with {} features",
        data.n_rows(),
        data.n_features()
    );

    let model = LinearModel::fit(&data)?;
    model.save(&args.output)?;
    println!("Model saved to: {}", args.output.display());
    Ok(())
}

/// Merges the optional config file with command-line overrides.
fn resolve_config(args: &ExplainArgs) -> Result<SageConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => SageConfig::load(path)?,
        None => SageConfig::default(),
    };
    if let Some(n) = args.n_samples {
        config.n_samples = n;
    }
    if let Some(m) = args.m_samples {
        config.m_samples = m;
    }
    if let Some(b) = args.batch_size {
        config.batch_size = b;
    }
    if let Some(loss) = args.loss {
        config.loss = loss;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if let Some(threshold) = args.convergence_threshold {
        config.convergence_threshold = threshold;
    }
    config.parallel |= args.parallel;
    config.detect_convergence |= args.detect_convergence;
    config.bar |= args.bar;
    Ok(config)
}

pub fn explain(args: ExplainArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = resolve_config(&args)?;
    // Background subsampling and permutation sampling share this seed.
    let seed = config.seed.unwrap_or_else(rand::random);
    config.seed = Some(seed);
    println!("Sampling seed: {seed}");

    println!("Loading model from: {}", args.model.display());
    let model = LinearModel::load(&args.model)?;

    println!("Loading explicand data from: {}", args.data_path.display());
    let explicand = load(&args.data_path, &args.data)?.align_to(&model.feature_names)?;

    let background = match &args.background {
        Some(path) => {
            println!("Loading background data from: {}", path.display());
            load(path, &args.data)?.align_to(&model.feature_names)?
        }
        None => explicand.clone(),
    };
    let background = match args.background_rows {
        Some(rows) => {
            let mut rng = StdRng::seed_from_u64(seed);
            background.sample_rows(rows, &mut rng)
        }
        None => background,
    };
    println!(
        "Explaining {} rows with {} features against {} background rows",
        explicand.n_rows(),
        explicand.n_features(),
        background.n_rows()
    );

    let result: SageValues = match args.imputation {
        ImputationCli::Marginal => {
            let imputer = MarginalImputation::new(background.features)?;
            permutation_sampling(&model, &imputer, &explicand, &config)?
        }
        ImputationCli::Reference => {
            let imputer = ReferenceImputation::from_background_mean(background.features.view())?;
            permutation_sampling(&model, &imputer, &explicand, &config)?
        }
    };

    println!("{}", format_summary(&explicand.feature_names, &result)?);
    write_sage_tsv(&args.output, &explicand.feature_names, &result)?;
    println!("SAGE values written to: {}", args.output.display());
    Ok(())
}
