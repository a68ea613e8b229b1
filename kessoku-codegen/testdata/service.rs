use kessoku::inject;

pub struct Config;
pub struct Service;

fn new_service(config: Config) -> Service {
    Service
}

inject!(Service, "initialize_service", provide(new_service));
