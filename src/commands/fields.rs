use std::path::Path;

use crate::error::Result;
use crate::output::{self, Format};
use crate::store::repo::Repo;

pub fn run(root: &Path, format: Format) -> Result<()> {
    let repo = Repo::open(root)?;
    let catalog = repo.catalog()?;
    output::print_fields(&catalog, format)
}
