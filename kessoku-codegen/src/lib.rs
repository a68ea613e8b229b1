//! The Kessoku code generator: turns `inject!` build directives into
//! injector functions.
//!
//! The pipeline runs in four stages, leaves first:
//!
//! | Stage | Module | Responsibility |
//! |-------|--------|----------------|
//! | Oracle adapter | [`oracle`] | `syn`-backed parsing and syntactic name/type resolution |
//! | Directive extractor | [`extract`] | reifies `inject!` calls, expands sets, classifies providers |
//! | Graph builder | [`graph`] | typed DAG, auto-arguments, naming, conflict/cycle detection |
//! | Planner & emitter | [`plan`], [`emit`] | chain formation, channel allocation, source rendering |
//!
//! Data flows strictly forward; each stage consumes only its predecessor's
//! output. [`generate::generate`] drives all four for one file.

pub mod emit;
pub mod error;
pub mod extract;
pub mod generate;
pub mod graph;
pub mod ir;
pub mod names;
pub mod oracle;
pub mod plan;

pub use error::GenerateError;
pub use generate::{companion_path, generate, write, GeneratedFile};
