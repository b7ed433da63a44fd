use std::path::PathBuf;

const DEFAULT_DIR_NAME: &str = ".strata";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Process-wide settings resolved once at startup from global flags and
/// environment, then passed explicitly into every command. Kept as a plain
/// value rather than module-level state so commands can be constructed and
/// tested in isolation.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub verbose: bool,
    pub json: bool,
}

impl Config {
    pub fn resolve(data_dir: Option<PathBuf>, verbose: bool, json: bool) -> Self {
        Config { data_dir: data_dir.unwrap_or_else(default_data_dir), verbose, json }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("state.db")
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}", self.db_path().display())
    }

    pub fn max_connections(&self) -> u32 {
        DEFAULT_MAX_CONNECTIONS
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    pub fn signing_key_path(&self) -> PathBuf {
        self.data_dir.join("signing.key")
    }
}

fn default_data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(DEFAULT_DIR_NAME)
}
