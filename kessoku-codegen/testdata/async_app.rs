use kessoku::inject;

pub struct Db;
pub struct Cache;
pub struct App;

async fn new_db() -> Db {
    Db
}

async fn new_cache() -> Cache {
    Cache
}

fn new_app(db: Db, cache: Cache) -> App {
    App
}

inject!(App, "initialize_app", provide(new_db), provide(new_cache), provide(new_app));
