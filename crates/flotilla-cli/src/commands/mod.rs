//! CLI commands

pub mod apply;
pub mod resolve;
pub mod validate;

use flotilla_core::{Document, Override};

use crate::DocumentArgs;
use crate::error::Result;

/// Load the document files named on the command line
pub fn load_documents(args: &DocumentArgs) -> Result<Vec<Document>> {
    Ok(Document::load_files(&args.files)?)
}

/// Load the documents and apply `--values` files and `--set` overrides
pub fn load_overridden(args: &DocumentArgs) -> Result<Vec<Document>> {
    let documents = load_documents(args)?;
    if args.values.is_empty() && args.set.is_empty() {
        return Ok(documents);
    }

    let value_files = args
        .values
        .iter()
        .map(Document::load_file)
        .collect::<flotilla_core::Result<Vec<_>>>()?;

    Ok(Override::new(&documents)
        .with_target_manifest(args.target_manifest.as_deref())
        .apply(&value_files, &args.set)?)
}
