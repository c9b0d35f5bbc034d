//! Validate command - check documents against their schemas and the manifest structure

use console::style;
use flotilla_core::validate_documents;

use crate::DocumentArgs;
use crate::display::ReportRenderer;
use crate::error::{CliError, Result};

pub fn run(args: &DocumentArgs, json_output: bool) -> Result<()> {
    let documents = super::load_overridden(args)?;

    if !json_output {
        println!(
            "{} Validating {} document(s) from {} file(s)",
            style("→").blue(),
            documents.len(),
            args.files.len()
        );
    }

    let report = validate_documents(&documents, args.target_manifest.as_deref())?;

    if json_output {
        let output = serde_json::json!({
            "valid": report.is_valid(),
            "error_count": report.error_count,
            "messages": report.messages,
        });
        let text = serde_json::to_string_pretty(&output)
            .map_err(|e| CliError::internal(e.to_string()))?;
        println!("{}", text);
    } else {
        ReportRenderer::new().render_validation(&report)?;
    }

    if !report.is_valid() {
        return Err(CliError::validation_with_help(
            format!("{} error(s) found", report.error_count),
            "fix the documents listed above and validate again",
        ));
    }

    Ok(())
}
