use kessoku::inject;

pub struct Config {
    pub retries: u32,
}

inject!(Config, "initialize_config", value(Config { retries: 3 }));
