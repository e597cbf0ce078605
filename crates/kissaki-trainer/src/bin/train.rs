use std::path::PathBuf;

use anyhow::Result;
use candle_core::Device;
use clap::{Parser, Subcommand};
use kissaki_core::{InferencePolicy, TrainingPolicyKind};
use kissaki_trainer::{load_raw, load_tagged, run_training, write_prediction_file, Tagger, TrainerConfig};
use tracing::{error, info, Level};

#[derive(Parser)]
#[command(name = "train")]
#[command(about = "Train and run the Kissaki sequence tagger")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model from a JSON configuration
    Train {
        /// Trainer configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Directory for checkpoints and predictions
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Tag a file with a trained model
    Test {
        /// Directory holding `<variant>.safetensors` and `<variant>.json`
        #[arg(short, long)]
        model: PathBuf,

        /// Training variant the model was saved under (TF, SS or DS)
        #[arg(long, default_value = "DS")]
        variant: TrainingPolicyKind,

        /// Input file, `word<TAB>tag` or one word per line with --raw
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the predictions
        #[arg(short, long)]
        output: PathBuf,

        /// Input has no gold tags
        #[arg(long)]
        raw: bool,

        /// `greedy`, `beam` or `beam:N`; a bare `beam` uses the saved width
        #[arg(long, default_value = "greedy", value_parser = check_inference)]
        inference: String,

        #[arg(long, default_value_t = 32)]
        batch_size: usize,
    },
}

fn check_inference(s: &str) -> Result<String, String> {
    s.parse::<InferencePolicy>()
        .map(|_| s.to_string())
        .map_err(|e| e.to_string())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Train { config, out } => {
            let config = TrainerConfig::load(&config)?;
            let summary = run_training(config, &out)?;
            info!(
                epochs = summary.epochs,
                best_epoch = summary.best_epoch,
                best_score = ?summary.best_score,
                "done"
            );
        }
        Commands::Test {
            model,
            variant,
            input,
            output,
            raw,
            inference,
            batch_size,
        } => {
            let tagger = Tagger::load(&model, variant, &Device::Cpu)?;
            let inference = tagger.inference_policy(&inference)?;
            let sentences = if raw { load_raw(&input)? } else { load_tagged(&input)? };
            write_prediction_file(&tagger, &sentences, &output, batch_size.max(1), inference)?;
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    if let Err(e) = run(cli) {
        error!("{e:#}");
        std::process::exit(1);
    }
}
