use kessoku::inject;

pub struct Cfg;
pub struct Db;
pub struct App;

fn new_cfg() -> Cfg {
    Cfg
}

async fn new_db(cfg: Cfg) -> Db {
    Db
}

fn new_app(db: Db) -> App {
    App
}

inject!(App, "initialize_app", provide(new_cfg), provide(new_db), provide(new_app));
