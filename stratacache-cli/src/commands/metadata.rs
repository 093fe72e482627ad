//! Per-entry metadata commands.

use clap::Subcommand;
use serde_json::Value;
use stratacache::config::CacheConfig;
use stratacache::disk::Metadata;
use stratacache::Cache;

use super::{finish, open_cache};
use crate::error::CliError;

/// Metadata action subcommands.
#[derive(Debug, Subcommand)]
pub enum MetaAction {
    /// Print the metadata of an entry as JSON
    Get { key: String },
    /// Set one metadata field (value is parsed as JSON, else kept as a string)
    Set {
        key: String,
        name: String,
        value: String,
    },
    /// Remove one field, or all metadata when no field is given
    Remove { key: String, name: Option<String> },
}

pub async fn run(action: MetaAction, config: CacheConfig) -> Result<(), CliError> {
    let cache = open_cache(&config)?;
    let result = execute(&cache, action).await;
    cache.shutdown().await;
    result
}

async fn execute(cache: &Cache<Vec<u8>>, action: MetaAction) -> Result<(), CliError> {
    match action {
        MetaAction::Get { key } => {
            let metadata = finish(cache.metadata(&key))
                .await?
                .ok_or_else(|| CliError::NotFound(key.clone()))?;
            let text = serde_json::to_string_pretty(&metadata)
                .map_err(|e| CliError::InvalidArgument(e.to_string()))?;
            println!("{}", text);
            Ok(())
        }
        MetaAction::Set { key, name, value } => {
            let mut values = Metadata::new();
            values.insert(name.clone(), parse_value(&value));
            if finish(cache.merge_metadata(&key, values)).await? {
                println!("Set '{}' on '{}'", name, key);
                Ok(())
            } else {
                Err(CliError::NotFound(key))
            }
        }
        MetaAction::Remove { key, name: None } => {
            if finish(cache.remove_metadata(&key)).await? {
                println!("Removed metadata of '{}'", key);
                Ok(())
            } else {
                Err(CliError::NotFound(key))
            }
        }
        MetaAction::Remove {
            key,
            name: Some(name),
        } => remove_field(cache, &key, &name).await,
    }
}

async fn remove_field(cache: &Cache<Vec<u8>>, key: &str, name: &str) -> Result<(), CliError> {
    let mut metadata = finish(cache.metadata(key))
        .await?
        .ok_or_else(|| CliError::NotFound(key.to_string()))?;
    if metadata.remove(name).is_none() {
        return Err(CliError::InvalidArgument(format!(
            "'{}' has no metadata field '{}'",
            key, name
        )));
    }

    let updated = if metadata.is_empty() {
        finish(cache.remove_metadata(key)).await?
    } else {
        finish(cache.set_metadata(key, metadata)).await?
    };
    if updated {
        println!("Removed '{}' from '{}'", name, key);
        Ok(())
    } else {
        Err(CliError::NotFound(key.to_string()))
    }
}

/// JSON if it parses, otherwise the raw text as a string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
