pub struct Config;

pub fn load() -> Config {
    Config
}
