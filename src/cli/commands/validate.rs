//! `validate` command handler.
//!
//! Every file is checked, even after one fails, so one run reports every
//! broken file.

use serde_json::json;

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::config::loader::{ConfigLoader, LoaderOptions};
use crate::error::{ConfigError, RoomkeeperError};

/// Validates each configuration file.
///
/// # Errors
///
/// Returns the first file's error if any file fails to load or validate.
pub fn run(args: &ValidateArgs) -> Result<(), RoomkeeperError> {
    let loader = ConfigLoader::new(LoaderOptions {
        strict: args.strict,
        ..LoaderOptions::default()
    });

    let mut first_error: Option<ConfigError> = None;
    let mut reports = Vec::with_capacity(args.files.len());

    for path in &args.files {
        tracing::info!(file = %path.display(), "validating configuration");
        let file = path.display().to_string();

        match loader.load(path) {
            Ok(loaded) => {
                let warnings: Vec<String> = loaded
                    .warnings
                    .iter()
                    .map(|w| match &w.location {
                        Some(location) => format!("{} at {location}", w.message),
                        None => w.message.clone(),
                    })
                    .collect();
                if args.format == OutputFormat::Human {
                    println!("{file}: ok");
                    for warning in &warnings {
                        println!("  warning: {warning}");
                    }
                }
                reports.push(json!({ "file": file, "valid": true, "errors": [], "warnings": warnings }));
            }
            Err(error) => {
                let issues: Vec<String> = match &error {
                    ConfigError::ValidationError { errors, .. } => {
                        errors.iter().map(ToString::to_string).collect()
                    }
                    other => vec![other.to_string()],
                };
                if args.format == OutputFormat::Human {
                    println!("{file}: invalid");
                    for issue in &issues {
                        println!("  {issue}");
                    }
                }
                reports.push(json!({ "file": file, "valid": false, "errors": issues, "warnings": [] }));
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }
    }

    if args.format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }

    match first_error {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}
