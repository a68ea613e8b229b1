use std::sync::Arc;

use kessoku::inject;

pub trait Repo {}

pub struct PgRepo;

impl Repo for PgRepo {}

pub struct Svc;

fn new_pg_repo() -> PgRepo {
    PgRepo
}

fn new_svc(repo: Arc<dyn Repo>) -> Svc {
    Svc
}

inject!(Svc, "initialize_svc", bind(dyn Repo, provide(new_pg_repo)), provide(new_svc));
