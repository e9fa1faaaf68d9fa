use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{Result, SumStatsError};
use crate::fields::FieldCatalog;
use crate::store::db::TicketDb;
use crate::store::{DATA_DIR, DB_FILE, data_dir};

pub struct Repo {
    pub root: PathBuf,
    pub db: TicketDb,
    pub config: Config,
}

impl Repo {
    /// Create `.sumstats/` with an empty ticket database and a default config file.
    pub fn init(root: &Path) -> Result<Self> {
        let dir = data_dir(root);
        if dir.join(DB_FILE).exists() {
            return Err(SumStatsError::AlreadyInitialized);
        }
        fs::create_dir_all(&dir)?;

        let config = Config::default();
        let config_path = Config::path(root);
        if !config_path.exists() {
            fs::write(&config_path, config.to_yaml_string()?)?;
        }
        let db = TicketDb::open(&dir.join(DB_FILE))?;

        Ok(Self {
            root: root.to_path_buf(),
            db,
            config,
        })
    }

    /// Open an initialized directory, loading its configuration.
    pub fn open(root: &Path) -> Result<Self> {
        let db_path = data_dir(root).join(DB_FILE);
        if !db_path.exists() {
            return Err(SumStatsError::NotInitialized);
        }
        let config = Config::load(root)?;
        let db = TicketDb::open(&db_path)?;
        Ok(Self {
            root: root.to_path_buf(),
            db,
            config,
        })
    }

    pub fn catalog(&self) -> Result<FieldCatalog> {
        FieldCatalog::load(&self.db, &self.config)
    }
}

/// Walk up from `start` to the nearest directory holding `.sumstats/`.
pub fn find_repo_root(start: &Path) -> Result<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join(DATA_DIR).exists() {
            return Ok(dir);
        }
        if !dir.pop() {
            return Err(SumStatsError::NotInitialized);
        }
    }
}
