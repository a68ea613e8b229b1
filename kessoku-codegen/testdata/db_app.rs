use kessoku::inject;

pub struct Db;
pub struct App;

fn new_db() -> Result<Db, std::io::Error> {
    Ok(Db)
}

fn new_app(db: Db) -> App {
    App
}

inject!(App, "initialize_app", provide(new_db), provide(new_app));
