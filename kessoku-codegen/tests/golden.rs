//! End-to-end pipeline tests over `testdata/`, comparing emitted companions
//! byte-for-byte against golden files.

use std::fs;
use std::path::{Path, PathBuf};

use kessoku_codegen::GenerateError;

fn testdata(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("testdata")
        .join(name)
}

fn generated(name: &str) -> String {
    kessoku_codegen::generate(&testdata(name))
        .unwrap_or_else(|errors| panic!("generation of {name} failed: {errors:?}"))
        .unwrap_or_else(|| panic!("{name} produced no output"))
        .source
}

fn golden(name: &str) -> String {
    fs::read_to_string(testdata(name)).unwrap()
}

#[test]
fn sync_injector_with_auto_argument() {
    assert_eq!(generated("service.rs"), golden("service_band.expected"));
}

#[test]
fn error_propagation() {
    assert_eq!(generated("db_app.rs"), golden("db_app_band.expected"));
}

#[test]
fn interface_bind() {
    assert_eq!(generated("repo.rs"), golden("repo_band.expected"));
}

#[test]
fn two_async_siblings_one_sync_consumer() {
    assert_eq!(generated("async_app.rs"), golden("async_app_band.expected"));
}

#[test]
fn async_to_sync_chain() {
    assert_eq!(generated("chain.rs"), golden("chain_band.expected"));
}

#[test]
fn sync_root_feeding_async_chain() {
    assert_eq!(
        generated("sync_to_async.rs"),
        golden("sync_to_async_band.expected")
    );
}

#[test]
fn diamond_with_multi_parent_async_consumer() {
    assert_eq!(generated("diamond.rs"), golden("diamond_band.expected"));
}

#[test]
fn value_only_directive() {
    assert_eq!(generated("value_only.rs"), golden("value_only_band.expected"));
}

#[test]
fn conflict_yields_errors_and_no_output() {
    let errors = kessoku_codegen::generate(&testdata("conflict.rs")).unwrap_err();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], GenerateError::Conflict { .. }));
    assert!(errors[0].to_string().contains("multiple providers provide"));
}

#[test]
fn file_without_directives_yields_nothing() {
    let result = kessoku_codegen::generate(&testdata("plain.rs")).unwrap();
    assert!(result.is_none());
}

#[test]
fn repeated_runs_are_byte_identical() {
    assert_eq!(generated("async_app.rs"), generated("async_app.rs"));
    assert_eq!(generated("repo.rs"), generated("repo.rs"));
}

#[test]
fn sync_plans_contain_no_task_primitives() {
    for input in ["service.rs", "db_app.rs", "repo.rs", "value_only.rs"] {
        let source = generated(input);
        assert!(!source.contains("Band"), "{input} spawned a supervisor");
        assert!(!source.contains("signal"), "{input} allocated a channel");
        assert!(!source.contains("async"), "{input} went asynchronous");
    }
}

#[test]
fn async_plans_take_context_first_and_return_result() {
    for input in ["async_app.rs", "chain.rs", "sync_to_async.rs"] {
        let source = generated(input);
        assert!(
            source.contains("(ctx: CancellationToken)"),
            "{input} is missing the context argument"
        );
        assert!(
            source.contains("Result<App, ::kessoku::InjectError>"),
            "{input} does not return a Result"
        );
        assert!(source.contains("band.finish().await?;"));
    }
}

#[test]
fn generating_the_companion_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("service.rs");
    fs::copy(testdata("service.rs"), &input).unwrap();

    let first = kessoku_codegen::generate(&input).unwrap().unwrap();
    kessoku_codegen::write(&first).unwrap();
    assert_eq!(first.path, dir.path().join("service_band.rs"));

    // The companion holds no directives, so the generator ignores it.
    let companion = kessoku_codegen::generate(&first.path).unwrap();
    assert!(companion.is_none());

    // And the original regenerates to the same bytes.
    let second = kessoku_codegen::generate(&input).unwrap().unwrap();
    assert_eq!(first.source, second.source);
}
