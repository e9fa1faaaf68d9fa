pub mod db;
pub mod history;
pub mod repo;

use std::path::{Path, PathBuf};

pub const DATA_DIR: &str = ".sumstats";
pub const DB_FILE: &str = "tickets.db";

pub fn data_dir(root: &Path) -> PathBuf {
    root.join(DATA_DIR)
}
