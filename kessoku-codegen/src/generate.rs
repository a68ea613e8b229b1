//! The per-file driver: load, extract, build, plan, emit.
//!
//! One invocation handles one input file with its own Oracle, NameBook and
//! output buffer, so callers are free to process files in parallel.

use std::fs;
use std::path::{Path, PathBuf};

use crate::emit::{emit_file, Unit};
use crate::error::GenerateError;
use crate::extract::extract;
use crate::graph;
use crate::names::NameBook;
use crate::oracle::Oracle;
use crate::plan;

/// A rendered companion file, not yet written to disk.
#[derive(Debug)]
pub struct GeneratedFile {
    pub path: PathBuf,
    pub source: String,
}

/// `src/app.rs` → `src/app_band.rs`.
pub fn companion_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "generated".to_string());
    match input.extension() {
        Some(ext) => input.with_file_name(format!("{stem}_band.{}", ext.to_string_lossy())),
        None => input.with_file_name(format!("{stem}_band")),
    }
}

/// Runs the pipeline over one file.
///
/// `Ok(None)` means the file contains no directives and no companion should
/// exist. `Err` carries every error found in the file; in that case nothing
/// is rendered, so a failed run never leaves partial output behind.
pub fn generate(input: &Path) -> Result<Option<GeneratedFile>, Vec<GenerateError>> {
    let oracle = Oracle::load(input).map_err(|err| vec![err])?;
    let extraction = extract(&oracle);
    let mut errors = extraction.errors;

    let mut file_book = NameBook::new();
    for name in oracle.top_level_names() {
        file_book.observe(name);
    }

    let mut units = Vec::new();
    for directive in extraction.directives {
        let name = directive.injector_name.clone();
        // Locals are scoped per injector; import aliases are file-wide, so
        // every name an injector takes is fed back into the file book.
        let mut book = file_book.clone();
        match graph::build(directive, oracle.file(), &mut book) {
            Ok(graph) => {
                let plan = plan::plan(&graph, &mut book);
                for arg in &graph.args {
                    file_book.observe(&arg.name);
                }
                for param in &graph.params {
                    file_book.observe(&param.name);
                }
                for channel in &plan.channels {
                    file_book.observe(&channel.tx);
                    file_book.observe(&channel.rx);
                }
                tracing::debug!(injector = %name, chains = plan.chains.len(), "planned injector");
                units.push(Unit { graph, plan });
            }
            Err(err) => errors.push(err),
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    if units.is_empty() {
        return Ok(None);
    }

    let source = emit_file(&oracle, &units, &mut file_book);
    Ok(Some(GeneratedFile {
        path: companion_path(input),
        source,
    }))
}

/// Commits a rendered companion to disk.
pub fn write(generated: &GeneratedFile) -> Result<(), GenerateError> {
    fs::write(&generated.path, &generated.source).map_err(|source| GenerateError::Io {
        file: generated.path.clone(),
        source,
    })
}
