//! Runtime support and directive markers for the Kessoku code generator.
//!
//! User code interacts with this crate in two ways:
//!
//! 1. **Directives.** The [`inject!`] and [`set!`] macros carry build
//!    directives for the `kessoku` CLI. They expand to nothing, so a file
//!    containing directives keeps compiling before generation has run.
//!
//! 2. **Generated code.** The injector functions emitted by the generator
//!    call into [`Band`], [`signal`], [`recv`] and [`InjectError`] to
//!    coordinate asynchronous providers.
//!
//! # Declaring an injector
//!
//! ```ignore
//! use kessoku::inject;
//!
//! fn new_db() -> Db { Db::connect() }
//! fn new_app(db: Db) -> App { App { db } }
//!
//! inject!(App, "initialize_app",
//!     provide(new_db),
//!     provide(new_app),
//! );
//! ```
//!
//! Running `kessoku src/app.rs` then emits `src/app_band.rs` containing
//! `pub fn initialize_app() -> App`.
//!
//! # Provider forms
//!
//! | Form | Meaning |
//! |------|---------|
//! | `provide(f)` | Call `f`, wiring its parameters from other providers |
//! | `async_(p)` | Run `p` concurrently on an auxiliary task |
//! | `bind(dyn Trait, p)` | `p`'s output additionally satisfies `Arc<dyn Trait>` |
//! | `value(expr)` | Use `expr` as-is |
//! | `set!(p, ...)` / a `set!` name | A reusable group of providers |

mod band;
mod error;

pub use band::{recv, signal, Band, Signal, SignalReceiver};
pub use error::InjectError;

/// Convenience re-exports for directive files.
pub mod prelude {
    pub use crate::{inject, set, Band, InjectError};
    pub use tokio_util::sync::CancellationToken;
}

/// Declares a build directive: `inject!(ReturnType, "injector_name", provider...)`.
///
/// The macro expands to nothing; the `kessoku` CLI reads it from source and
/// generates the injector function in a sibling `<file>_band.rs`.
#[macro_export]
macro_rules! inject {
    ($($directive:tt)*) => {};
}

/// Declares a named provider set: `set!(NAME, provider...)`, or an inline
/// set when used as a provider argument inside [`inject!`].
///
/// Like [`inject!`], this expands to nothing and is only meaningful to the
/// generator. Set names can be referenced from any directive in the same
/// file.
#[macro_export]
macro_rules! set {
    ($($providers:tt)*) => {};
}
