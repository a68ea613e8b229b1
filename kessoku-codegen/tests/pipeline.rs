//! Pipeline tests over inline sources, covering shapes the golden corpus
//! does not: multiple directives per file, sets, clone insertion, import
//! aliasing and error reporting.

use std::fs;
use std::path::PathBuf;

use kessoku_codegen::{GenerateError, GeneratedFile};

fn generate_named(name: &str, source: &str) -> Result<Option<GeneratedFile>, Vec<GenerateError>> {
    let dir = tempfile::tempdir().unwrap();
    let path: PathBuf = dir.path().join(name);
    fs::write(&path, source).unwrap();
    kessoku_codegen::generate(&path)
}

fn generate(source: &str) -> String {
    generate_named("app.rs", source)
        .expect("generation failed")
        .expect("no output")
        .source
}

#[test]
fn multiple_directives_emit_in_directive_order() {
    let source = "use kessoku::inject;\n\
        pub struct Db;\npub struct Cache;\n\
        fn new_db() -> Db { Db }\nfn new_cache() -> Cache { Cache }\n\
        inject!(Db, \"initialize_db\", provide(new_db));\n\
        inject!(Cache, \"initialize_cache\", provide(new_cache));\n";
    let out = generate(source);
    let db = out.find("pub fn initialize_db").unwrap();
    let cache = out.find("pub fn initialize_cache").unwrap();
    assert!(db < cache);
}

#[test]
fn shared_argument_is_cloned_for_all_but_last_use() {
    let source = "use kessoku::inject;\n\
        pub struct Cfg;\npub struct A;\npub struct B;\npub struct App;\n\
        fn new_a(cfg: Cfg) -> A { A }\n\
        fn new_b(cfg: Cfg) -> B { B }\n\
        fn new_app(a: A, b: B) -> App { App }\n\
        inject!(App, \"initialize_app\", provide(new_a), provide(new_b), provide(new_app));\n";
    let out = generate(source);
    assert!(out.contains("let a = new_a(cfg.clone());"));
    assert!(out.contains("let b = new_b(cfg);"));
}

#[test]
fn set_expansion_end_to_end() {
    let source = "use kessoku::inject;\nuse kessoku::set;\n\
        pub struct Db;\npub struct Repo;\npub struct App;\n\
        fn new_db() -> Db { Db }\n\
        fn new_repo(db: Db) -> Repo { Repo }\n\
        fn new_app(repo: Repo) -> App { App }\n\
        set!(STORAGE, provide(new_db), provide(new_repo));\n\
        inject!(App, \"initialize_app\", STORAGE, provide(new_app));\n";
    let out = generate(source);
    assert!(out.contains("let db = new_db();"));
    assert!(out.contains("let repo = new_repo(db);"));
    assert!(out.contains("let app = new_app(repo);"));
}

#[test]
fn tuple_outputs_discard_unused_slots() {
    let source = "use kessoku::inject;\n\
        pub struct Conn;\npub struct Stats;\npub struct App;\n\
        fn open() -> (Conn, Stats) { (Conn, Stats) }\n\
        fn new_app(conn: Conn) -> App { App }\n\
        inject!(App, \"initialize_app\", provide(open), provide(new_app));\n";
    let out = generate(source);
    assert!(out.contains("let (conn, _) = open();"));
}

#[test]
fn imported_types_are_aliased_when_their_name_is_taken() {
    let source = "use kessoku::inject;\nuse mylib::Config;\n\
        pub struct Service;\n\
        fn new_service(config: Config) -> Service { Service }\n\
        inject!(Service, \"initialize_service\", provide(new_service));\n";
    let out = generate(source);
    // `Config` is a visible name in the input file, so the import shifts.
    assert!(out.contains("use mylib::Config as Config0;"));
    assert!(out.contains("pub fn initialize_service(config: Config0) -> Service {"));
}

#[test]
fn context_requirement_becomes_leading_argument() {
    let source = "use kessoku::inject;\nuse tokio_util::sync::CancellationToken;\n\
        pub struct Watcher;\n\
        fn new_watcher(ctx: CancellationToken) -> Watcher { Watcher }\n\
        inject!(Watcher, \"initialize_watcher\", provide(new_watcher));\n";
    let out = generate(source);
    assert!(out.contains("pub fn initialize_watcher(ctx: CancellationToken) -> Watcher {"));
    assert!(out.contains("let watcher = new_watcher(ctx.clone());"));
    // No async provider, so no supervisor.
    assert!(!out.contains("Band"));
}

#[test]
fn async_marker_on_sync_fn_spawns_without_await() {
    let source = "use kessoku::inject;\n\
        pub struct Db;\npub struct App;\n\
        fn new_db() -> Db { Db }\n\
        fn new_app(db: Db) -> App { App }\n\
        inject!(App, \"initialize_app\", async_(provide(new_db)), provide(new_app));\n";
    let out = generate(source);
    assert!(out.contains("band.spawn(async move {"));
    assert!(out.contains("let db = new_db();"));
    assert!(!out.contains("new_db().await"));
}

#[test]
fn async_provider_errors_are_wrapped_inside_the_task() {
    let source = "use kessoku::inject;\n\
        pub struct Db;\npub struct App;\n\
        async fn new_db() -> Result<Db, std::io::Error> { unimplemented!() }\n\
        fn new_app(db: Db) -> App { App }\n\
        inject!(App, \"initialize_app\", provide(new_db), provide(new_app));\n";
    let out = generate(source);
    assert!(out.contains(
        "let db = new_db().await.map_err(|err| ::kessoku::InjectError::provider(\"new_db\", err))?;"
    ));
    // The task error cancels siblings; the principal surfaces it at recv.
    assert!(out.contains("let db = band.recv(db_rx).await?;"));
}

#[test]
fn duplicate_injector_name_is_an_extract_error() {
    let source = "use kessoku::inject;\n\
        pub struct Db;\nfn new_db() -> Db { Db }\n\
        inject!(Db, \"init\", provide(new_db));\n\
        inject!(Db, \"init\", provide(new_db));\n";
    let errors = generate_named("app.rs", source).unwrap_err();
    assert!(errors
        .iter()
        .any(|err| err.to_string().contains("duplicate injector name")));
}

#[test]
fn unparsable_input_is_a_parse_error() {
    let errors = generate_named("broken.rs", "fn oops( {").unwrap_err();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], GenerateError::Parse { .. }));
}

#[test]
fn one_bad_directive_suppresses_the_whole_file() {
    let source = "use kessoku::inject;\n\
        pub struct Db;\npub struct App;\n\
        fn new_db() -> Db { Db }\n\
        inject!(Db, \"initialize_db\", provide(new_db));\n\
        inject!(App, \"initialize_app\", provide(missing_provider));\n";
    let errors = generate_named("app.rs", source).unwrap_err();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].to_string().contains("missing_provider"));
}

#[test]
fn missing_io_surfaces_as_error() {
    let errors = kessoku_codegen::generate(std::path::Path::new("does/not/exist.rs")).unwrap_err();
    assert!(matches!(errors[0], GenerateError::Io { .. }));
}

#[test]
fn errors_carry_file_and_position() {
    let source = "use kessoku::inject;\n\
        pub struct App;\n\
        inject!(App, \"initialize_app\");\n";
    let errors = generate_named("app.rs", source).unwrap_err();
    let message = errors[0].to_string();
    assert!(message.contains("app.rs:3:"), "unexpected location: {message}");
}
