//! tunematch CLI entry point

use clap::Parser;
use serde::Serialize;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tunematch::config::{Cli, Command, EngineConfig};
use tunematch::export::{self, AnalyzeResponse, DirectoryStemSink, SeparateResponse, Status};
use tunematch::matching::CorpusIndex;
use tunematch::pipeline::{self, Engine, IndexOptions};
use tunematch::TunematchError;

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(&cli);

    let config = EngineConfig::from_cli(&cli);
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    match &cli.command {
        Command::Index {
            input,
            output,
            no_recursive,
            threads,
            force,
        } => {
            if let Err(e) = validate_output_parent(output) {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
            let options = IndexOptions {
                input,
                output,
                recursive: !no_recursive,
                force: *force,
                threads: *threads,
                show_progress: cli.show_progress(),
            };
            match pipeline::run_index(&options, &config) {
                Ok(result) => {
                    println!(
                        "Summary: {} indexed, {} failed, {} skipped (of {} total); corpus holds {} tracks",
                        result.successful,
                        result.failed,
                        result.skipped,
                        result.total_files,
                        result.corpus_size
                    );
                    if result.failed > 0 {
                        ExitCode::from(1)
                    } else {
                        ExitCode::SUCCESS
                    }
                }
                Err(e) => {
                    eprintln!("Fatal error: {}", e);
                    ExitCode::FAILURE
                }
            }
        }

        Command::Analyze { file, corpus, .. } => {
            let response = match analyze(file, corpus, config) {
                Ok(response) => response,
                Err(e) => AnalyzeResponse::error(&e),
            };
            let ok = response.status == Status::Success;
            print_json(&response, ok)
        }

        Command::Separate {
            file,
            output,
            url_prefix,
        } => {
            let sink = DirectoryStemSink::new(output, url_prefix.as_str());
            let response = match separate(file, &sink, config) {
                Ok(response) => response,
                Err(e) => SeparateResponse::error(&e),
            };
            let ok = response.status == Status::Success;
            print_json(&response, ok)
        }
    }
}

fn analyze(file: &Path, corpus_path: &Path, config: EngineConfig) -> Result<AnalyzeResponse, TunematchError> {
    let tracks = export::read_corpus(corpus_path)?;
    let corpus = Arc::new(CorpusIndex::from_tracks(tracks)?);
    let engine = Engine::new(config, corpus)?;
    let bytes = std::fs::read(file)?;
    Ok(engine.analyze_response(&bytes, extension(file)))
}

fn separate(file: &Path, sink: &DirectoryStemSink, config: EngineConfig) -> Result<SeparateResponse, TunematchError> {
    let engine = Engine::new(config, Arc::new(CorpusIndex::new()))?;
    let bytes = std::fs::read(file)?;
    Ok(engine.separate_and_export(&bytes, extension(file), sink))
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

fn print_json<T: Serialize>(value: &T, ok: bool) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Fatal error: {}", e);
            return ExitCode::FAILURE;
        }
    }
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

fn init_logging(cli: &Cli) {
    let filter = cli.log_level().to_string().to_lowercase();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn validate_output_parent(output: &Path) -> Result<(), String> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(format!(
                "Output parent directory does not exist: {}\n\n  Tip: Create it first.\n  Example: mkdir -p {}",
                parent.display(),
                parent.display()
            ));
        }
    }
    Ok(())
}
