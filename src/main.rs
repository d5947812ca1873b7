use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use feature_compiler::audio::ingest_wav_file;
use feature_compiler::compile::{FeatureCompiler, FolderOutcome, FolderProgress};
use feature_compiler::config::{load_config, CompilerConfig};
use feature_compiler::pipeline::{TraceEntry, TraceWriter};
use feature_compiler::spectrum::{
    bands::note_to_frequency, frequency_to_display_x, FrequencyScale, SpectrumFeatureBuilder,
};
use feature_compiler::state::{storage::default_trace_path, Dataset, SqliteFeatureStore};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

/// Note feature dataset compiler
#[derive(Parser)]
#[command(name = "feature-compiler")]
#[command(about = "Compile note-aligned spectral features into training and testing datasets")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile every new example folder into its dataset
    Compile {
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Discard existing datasets and start over
        #[arg(long)]
        overwrite: bool,

        /// Shuffle both datasets after compiling
        #[arg(long)]
        shuffle: bool,

        /// Write a JSONL progress trace (default location if no file given)
        #[arg(long, num_args = 0..=1)]
        trace: Option<Option<PathBuf>>,
    },
    /// Shuffle the records of both datasets
    Shuffle {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Record and label counts of both datasets
    Stats {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the note bands of the first window of a WAV file
    Spectrum {
        /// Input WAV file
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Frequency axis used for the display column
        #[arg(long, value_enum, default_value = "mel")]
        scale: Scale,

        /// Width of the display axis in columns
        #[arg(long, default_value_t = 80)]
        width: u32,
    },
    /// Show default configuration
    ShowConfig,
}

#[derive(Clone, Copy, ValueEnum)]
enum Scale {
    Linear,
    Mel,
}

impl From<Scale> for FrequencyScale {
    fn from(scale: Scale) -> Self {
        match scale {
            Scale::Linear => FrequencyScale::Linear,
            Scale::Mel => FrequencyScale::Mel,
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Compile {
            config,
            overwrite,
            shuffle,
            trace,
        } => {
            let mut config = read_config(config.as_deref())?;
            config.overwrite |= overwrite;

            let trace = match trace {
                Some(Some(path)) => Some(TraceWriter::new(path)),
                Some(None) => Some(TraceWriter::new(default_trace_path()?)),
                None => None,
            };
            if let Some(writer) = &trace {
                log::info!("Tracing progress to {}", writer.path().display());
            }

            let mut compiler = FeatureCompiler::open(&config)?;
            let summary = compiler.compile_all(&mut |progress| {
                report_folder(progress);
                write_trace(&trace, &TraceEntry::folder(progress));
            })?;
            write_trace(&trace, &TraceEntry::summary(&summary));

            println!(
                "Compiled {} folders ({} training, {} testing), {} records; {} folders already present",
                summary.appended_folders(),
                summary.training_folders.len(),
                summary.testing_folders.len(),
                summary.records,
                summary.skipped_folders.len()
            );
            if summary.short_examples > 0 {
                println!("Dropped {} examples shorter than one window", summary.short_examples);
            }

            if shuffle {
                compiler.shuffle(
                    config.shuffle.chunk_size,
                    config.shuffle.passes,
                    &mut |dataset, progress| {
                        report_shuffle(dataset, progress);
                        write_trace(&trace, &TraceEntry::shuffle(dataset, progress));
                    },
                )?;
                println!("Shuffled both datasets");
            }
        }
        Commands::Shuffle { config } => {
            let config = read_config(config.as_deref())?;
            let mut compiler = FeatureCompiler::open_existing(&config)?;
            compiler.shuffle(
                config.shuffle.chunk_size,
                config.shuffle.passes,
                &mut report_shuffle,
            )?;
            println!("Shuffled both datasets");
        }
        Commands::Stats { config } => {
            let config = read_config(config.as_deref())?;
            for (dataset, path) in [
                (Dataset::Training, &config.training_path),
                (Dataset::Testing, &config.testing_path),
            ] {
                print_stats(dataset, path)?;
            }
        }
        Commands::Spectrum {
            input,
            config,
            scale,
            width,
        } => {
            let config = read_config(config.as_deref())?;
            print_spectrum(&input, &config, scale.into(), width as f64)?;
        }
        Commands::ShowConfig => {
            let json = serde_json::to_string_pretty(&CompilerConfig::default())?;
            println!("{}", json);
        }
    }

    Ok(())
}

fn read_config(path: Option<&Path>) -> anyhow::Result<CompilerConfig> {
    match path {
        Some(path) => {
            load_config(path).with_context(|| format!("loading {}", path.display()))
        }
        None => Ok(CompilerConfig::default()),
    }
}

fn write_trace(trace: &Option<TraceWriter>, entry: &TraceEntry) {
    if let Some(writer) = trace {
        if let Err(e) = writer.write(entry) {
            log::warn!("Failed to write trace entry: {}", e);
        }
    }
}

fn report_folder(progress: &FolderProgress) {
    if !std::io::stderr().is_terminal() {
        return;
    }
    let status = match progress.outcome {
        FolderOutcome::Committed { dataset, records } => format!("{} records -> {}", records, dataset),
        FolderOutcome::Skipped => "skipped".to_string(),
    };
    eprintln!(
        "[{} {}/{}] {}: {}",
        progress.category.as_str(),
        progress.completed,
        progress.total,
        progress.folder,
        status
    );
}

fn report_shuffle(dataset: Dataset, progress: f64) {
    if !std::io::stderr().is_terminal() {
        return;
    }
    // Rewrite the current line in place
    eprint!("\r\x1B[2KShuffling {}: {:.1}%", dataset, progress * 100.0);
    if progress >= 1.0 {
        eprintln!();
    }
}

fn print_stats(dataset: Dataset, path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        println!("{}: no dataset at {}", dataset, path.display());
        return Ok(());
    }

    let store = SqliteFeatureStore::open(path, false)
        .with_context(|| format!("opening {}", path.display()))?;
    let folders = store.folder_entries()?;
    println!(
        "{}: {} records from {} folders, {} features per record",
        dataset,
        store.record_count()?,
        folders.len(),
        store.feature_length()?.unwrap_or(0)
    );

    let mut counts: Vec<_> = store.label_counts()?.into_iter().collect();
    counts.sort_by_key(|(kind, _)| format!("{:?}", kind));
    for (kind, count) in counts {
        println!("  {:?}: {}", kind, count);
    }
    Ok(())
}

fn print_spectrum(
    input: &Path,
    config: &CompilerConfig,
    scale: FrequencyScale,
    width: f64,
) -> anyhow::Result<()> {
    let audio = ingest_wav_file(input)?;
    if audio.sample_rate != config.features.sample_rate {
        anyhow::bail!(
            "{} is {} Hz but the configuration expects {} Hz",
            input.display(),
            audio.sample_rate,
            config.features.sample_rate
        );
    }

    let builder = SpectrumFeatureBuilder::new(&config.features)?;
    let bands = builder.bands(&audio.to_mono())?.with_context(|| {
        format!(
            "{} is shorter than one {}-sample window",
            input.display(),
            config.features.sample_count
        )
    })?;

    let range = builder.note_range();
    let min_frequency = note_to_frequency(range.start as f64);
    let max_frequency = note_to_frequency(range.end as f64);

    println!("{:>5} {:>10} {:>7} {:>12}", "note", "Hz", "x", "magnitude");
    for band in bands {
        let frequency = note_to_frequency(band.note as f64);
        let x = frequency_to_display_x(frequency, min_frequency, max_frequency, scale, width);
        println!("{:>5} {:>10.2} {:>7.1} {:>12.6}", band.note, frequency, x, band.magnitude);
    }
    Ok(())
}
