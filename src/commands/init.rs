use std::path::Path;

use tracing::info;

use crate::error::Result;
use crate::store::repo::Repo;

pub fn run(root: &Path) -> Result<()> {
    let repo = Repo::init(root)?;
    info!(root = %repo.root.display(), "initialized");
    eprintln!("Initialized .sumstats/ in {}", root.display());
    Ok(())
}
