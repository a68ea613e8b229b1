use kessoku::inject;

pub struct Db;
pub struct Repo;
pub struct App;

async fn new_db() -> Db {
    Db
}

fn new_repo(db: Db) -> Repo {
    Repo
}

fn new_app(repo: Repo) -> App {
    App
}

inject!(App, "initialize_app", provide(new_db), provide(new_repo), provide(new_app));
