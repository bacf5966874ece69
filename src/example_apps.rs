use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum, error::ErrorKind};

use crate::batcher::Batcher;
use crate::config::{BatcherConfig, BatcherMode};
use crate::data::Batch;
use crate::metrics::padding_efficiency;
use crate::source::{LineFileSource, LineFileSourceConfig, SourceMode};
use crate::vocab::{Vocab, Vocabulary, output_ids_to_words};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Train,
    Eval,
    Decode,
}

impl From<ModeArg> for BatcherMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Train => BatcherMode::Train,
            ModeArg::Eval => BatcherMode::Eval,
            ModeArg::Decode => BatcherMode::Decode,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "batch_demo",
    disable_help_subcommand = true,
    about = "Stream padded seq2seq batches from a directory of line files",
    long_about = "Build a batch pipeline over tab-tab delimited record files and print the shape of each batch.",
    after_help = "Settings from --config are applied first; explicit flags override them."
)]
/// CLI for `batch_demo`.
///
/// Common usage:
/// - One deterministic pass: `--vocab-path vocab.txt --data-root data/ --single-pass`
/// - Continuous training batches: `--vocab-path vocab.txt --data-root data/ --batches 20`
struct BatchDemoCli {
    #[arg(
        long = "vocab-path",
        value_name = "PATH",
        help = "Vocabulary file with `word count` lines"
    )]
    vocab_path: PathBuf,
    #[arg(
        long = "vocab-max-size",
        default_value_t = 0,
        help = "Maximum vocabulary size including special tokens (0 = unlimited)"
    )]
    vocab_max_size: usize,
    #[arg(
        long = "data-root",
        value_name = "DIR",
        help = "Directory walked for record files"
    )]
    data_root: PathBuf,
    #[arg(long, help = "Only read record files with this extension")]
    extension: Option<String>,
    #[arg(long, value_name = "PATH", help = "Optional JSON batcher configuration")]
    config: Option<PathBuf>,
    #[arg(
        long = "batch-size",
        value_parser = parse_positive_usize,
        help = "Examples per batch"
    )]
    batch_size: Option<usize>,
    #[arg(
        long = "max-decoder-steps",
        value_parser = parse_positive_usize,
        help = "Fixed decoder sequence length"
    )]
    max_decoder_steps: Option<usize>,
    #[arg(long, value_enum, help = "Batching mode")]
    mode: Option<ModeArg>,
    #[arg(long = "single-pass", help = "Read the data once, in order, then stop")]
    single_pass: bool,
    #[arg(
        long,
        default_value_t = 5,
        value_parser = parse_positive_usize,
        help = "Stop after this many batches"
    )]
    batches: usize,
}

/// Run the batch demo with CLI-style arguments (program name excluded).
pub fn run_batch_demo<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let Some(cli) =
        parse_cli::<BatchDemoCli, _>(std::iter::once("batch_demo".to_string()).chain(args_iter))?
    else {
        return Ok(());
    };

    let config = demo_config(&cli)?;
    let vocab = Arc::new(Vocab::from_path(&cli.vocab_path, cli.vocab_max_size)?);
    println!(
        "Loaded {} vocabulary entries from {}",
        vocab.size(),
        cli.vocab_path.display()
    );

    let source_mode = if config.single_pass {
        SourceMode::Exhaustible
    } else {
        SourceMode::Infinite
    };
    let mut source_config = LineFileSourceConfig::new("batch_demo", cli.data_root.clone())
        .with_mode(source_mode)
        .with_seed(config.seed);
    if let Some(extension) = &cli.extension {
        source_config = source_config.with_extension(extension);
    }
    let source = LineFileSource::new(source_config)?;
    println!(
        "Reading {} record files under {}",
        source.files().len(),
        cli.data_root.display()
    );

    let vocab_dyn: Arc<dyn Vocabulary> = vocab;
    let batcher = Batcher::new(Box::new(source), Arc::clone(&vocab_dyn), config)?;
    let mut emitted = 0;
    while emitted < cli.batches {
        let Some(batch) = batcher.next_batch()? else {
            println!("End of stream after {emitted} batches.");
            break;
        };
        print_batch(emitted, &batch, vocab_dyn.as_ref())?;
        emitted += 1;
    }

    println!("{}", serde_json::to_string_pretty(&batcher.metrics())?);
    Ok(())
}

fn demo_config(cli: &BatchDemoCli) -> Result<BatcherConfig, Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => BatcherConfig::from_json_path(path)?,
        None => BatcherConfig::default(),
    };
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(steps) = cli.max_decoder_steps {
        config.max_decoder_steps = steps;
    }
    if let Some(mode) = cli.mode {
        config.mode = mode.into();
    }
    if cli.single_pass {
        config.single_pass = true;
    }
    config.validate()?;
    Ok(config)
}

fn print_batch(
    index: usize,
    batch: &Batch,
    vocab: &dyn Vocabulary,
) -> Result<(), Box<dyn Error>> {
    println!(
        "batch {index}: rows={} encoder_width={} query_width={} decoder_steps={} max_oovs={} padding_efficiency={:.3}",
        batch.len(),
        batch.encoder_width(),
        batch.query_width(),
        batch.max_decoder_steps,
        batch.max_oov_count,
        padding_efficiency(batch)
    );
    if let (Some(targets), Some(oovs)) = (batch.target_ids.first(), batch.oov_words(0)) {
        let len = batch.decoder_lens.first().copied().unwrap_or(0);
        let words = output_ids_to_words(&targets[..len], vocab, oovs)?;
        println!("  source: {}", batch.original_sources[0]);
        println!("  target: {}", words.join(" "));
    }
    Ok(())
}

fn parse_positive_usize(raw: &str) -> Result<usize, String> {
    let parsed = raw
        .parse::<usize>()
        .map_err(|_| format!("Could not parse '{}' as a positive integer", raw))?;
    if parsed == 0 {
        return Err("value must be greater than zero".to_string());
    }
    Ok(parsed)
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}
