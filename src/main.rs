//! Command line wrapper: loads a stored collection, optionally runs a single
//! condition against it and prints the matching records as JSON.
//!
//! ```text
//! nestdb <file> [<field> <operator> <json value>] [--config <settings file>]
//! ```
//!
//! Logging is controlled through `RUST_LOG`.

use std::env;
use std::process::ExitCode;

use nestdb::collection::Collection;
use nestdb::datatype::Value;
use nestdb::persist::stringify;
use nestdb::settings::Settings;
use nestdb::{NestError, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

struct Arguments {
    file: String,
    condition: Option<(String, String, Value)>,
    config: Option<String>,
}

fn arguments() -> Result<Arguments> {
    let mut positional = Vec::new();
    let mut config = None;
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            config = Some(args.next().ok_or_else(|| {
                NestError::InvalidArgument("--config needs a file name".to_string())
            })?);
        } else {
            positional.push(arg);
        }
    }
    let mut positional = positional.into_iter();
    let file = positional.next().ok_or_else(|| {
        NestError::InvalidArgument(
            "usage: nestdb <file> [<field> <operator> <json value>] [--config <file>]".to_string(),
        )
    })?;
    let rest: Vec<String> = positional.collect();
    let condition = match rest.as_slice() {
        [] => None,
        [field, op, value] => {
            let json: serde_json::Value = serde_json::from_str(value)
                .unwrap_or_else(|_| serde_json::Value::String(value.clone()));
            Some((field.clone(), op.clone(), Value::from(json)))
        }
        _ => {
            return Err(NestError::InvalidArgument(
                "a condition takes a field, an operator and a value".to_string(),
            ));
        }
    };
    Ok(Arguments {
        file,
        condition,
        config,
    })
}

fn run() -> Result<()> {
    let arguments = arguments()?;
    let settings = match &arguments.config {
        Some(path) => Settings::load(path)?,
        None => Settings::from_env()?,
    };
    let mut db = Collection::with_settings(settings);
    db.load(&arguments.file, None)?;
    if let Some((field, op, value)) = arguments.condition {
        db.select(field, op.as_str(), value)?;
    }
    let found = db.fetch();
    info!(found = found.len(), total = db.len(), "query done");
    println!("{}", stringify(&found)?);
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "nestdb failed");
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
