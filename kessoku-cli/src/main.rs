use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser)]
#[command(
    name = "kessoku",
    version,
    about = "Compile-time dependency injection for Rust: generates injector functions from inject! directives"
)]
struct Cli {
    /// Source files containing inject! directives
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Log verbosity
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(cli.log_level.as_filter()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let summary = kessoku_cli::run_files(&cli.files);
    std::process::exit(summary.exit_code());
}
