//! Resolve command - print the fully resolved manifest

use flotilla_core::{classify, resolve, validate_documents};

use crate::DocumentArgs;
use crate::error::{CliError, Result};

pub fn run(args: &DocumentArgs, json_output: bool) -> Result<()> {
    let documents = super::load_overridden(args)?;
    let target = args.target_manifest.as_deref();

    validate_documents(&documents, target)?.into_result()?;

    let classified = classify(&documents, target)?;
    for warning in &classified.warnings {
        tracing::warn!("{}", warning);
    }
    let manifest = resolve(&classified)?;

    let text = if json_output {
        serde_json::to_string_pretty(&manifest).map_err(|e| CliError::internal(e.to_string()))?
    } else {
        serde_yaml::to_string(&manifest).map_err(|e| CliError::internal(e.to_string()))?
    };
    println!("{}", text.trim_end());

    Ok(())
}
