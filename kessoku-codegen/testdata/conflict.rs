use kessoku::inject;

pub struct Config;

fn config_from_env() -> Config {
    Config
}

fn config_from_file() -> Config {
    Config
}

inject!(Config, "initialize_config", provide(config_from_env), provide(config_from_file));
