//! Driver shared by the `kessoku` binary and the CLI tests.

use std::path::PathBuf;

use colored::Colorize;

/// Outcome of one CLI invocation.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub generated: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl RunSummary {
    pub fn exit_code(&self) -> i32 {
        if self.errors > 0 {
            1
        } else {
            0
        }
    }
}

/// Generates a companion file next to every input that carries directives.
/// A file with no directives yields no output and no error; any error in a
/// file suppresses its output entirely.
pub fn run_files(files: &[PathBuf]) -> RunSummary {
    let mut summary = RunSummary::default();
    for file in files {
        match kessoku_codegen::generate(file) {
            Ok(Some(generated)) => match kessoku_codegen::write(&generated) {
                Ok(()) => {
                    println!(
                        "{} Generated {}",
                        "✓".green(),
                        generated.path.display().to_string().cyan()
                    );
                    summary.generated += 1;
                }
                Err(err) => {
                    eprintln!("{} {err}", "error:".red().bold());
                    summary.errors += 1;
                }
            },
            Ok(None) => {
                tracing::info!(file = %file.display(), "no inject! directives, nothing to generate");
                summary.skipped += 1;
            }
            Err(errors) => {
                for err in errors {
                    eprintln!("{} {err}", "error:".red().bold());
                    summary.errors += 1;
                }
            }
        }
    }
    summary
}
