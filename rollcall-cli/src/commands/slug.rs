//! `rollcall slug`: print the canonical slug for a value.

use anyhow::{bail, Result};
use clap::Args;

use rollcall_core::slug::slug;

/// Arguments for `rollcall slug`.
#[derive(Args, Debug)]
pub struct SlugArgs {
    /// Free-text value, e.g. a department name.
    pub value: String,
}

impl SlugArgs {
    pub fn run(self) -> Result<()> {
        let slugged = slug(&self.value);
        if slugged.is_empty() {
            bail!("'{}' does not form a group name", self.value);
        }
        println!("{slugged}");
        Ok(())
    }
}
