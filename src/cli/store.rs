//! Store maintenance commands

use super::{parse_store, CliError, OutputFormat};
use crate::kv::{self, Registry, SharedStorage, StorageOptions};
use crate::resume::{FinishedRecord, ResumeSession, RESUME_NAMESPACE};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::Args;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;

/// `dump` arguments
#[derive(Debug, Args)]
pub struct DumpArgs {
    /// Only dump this namespace
    #[arg(long)]
    pub namespace: Option<String>,

    /// Include base64-encoded values
    #[arg(long, default_value_t = false)]
    pub values: bool,
}

/// `migrate` arguments
#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// Target store, e.g. `type=file,path=./courier.json`
    #[arg(long, value_parser = parse_store)]
    pub to: StorageOptions,
}

/// `reset` arguments
#[derive(Debug, Args)]
pub struct ResetArgs {
    /// Fingerprint of the session to forget
    #[arg(long)]
    pub fingerprint: String,
}

/// List namespaces
pub fn namespaces(storage: &SharedStorage, format: OutputFormat) -> Result<(), CliError> {
    let names = storage.namespaces()?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&names)?),
        OutputFormat::Human => {
            println!("{} namespaces in {} store:", names.len(), storage.name());
            for name in names {
                println!("  {name}");
            }
        }
    }
    Ok(())
}

impl DumpArgs {
    /// Execute the dump command
    pub fn execute(&self, storage: &SharedStorage, format: OutputFormat) -> Result<(), CliError> {
        let meta = storage.migrate_to()?;
        let mut out = BTreeMap::new();
        for (namespace, pairs) in meta {
            if self.namespace.as_ref().is_some_and(|ns| ns != &namespace) {
                continue;
            }
            let mut entries: Vec<_> = pairs.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let entries: Vec<_> = entries
                .into_iter()
                .map(|(key, value)| describe_entry(&namespace, key, &value, self.values))
                .collect();
            out.insert(namespace, entries);
        }

        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&out)?),
            OutputFormat::Human => {
                for (namespace, entries) in &out {
                    println!("[{namespace}] {} keys", entries.len());
                    for entry in entries {
                        println!("  {entry}");
                    }
                }
            }
        }
        Ok(())
    }
}

fn describe_entry(namespace: &str, key: String, value: &[u8], with_value: bool) -> serde_json::Value {
    let mut entry = json!({ "key": key, "size": value.len() });
    if namespace == RESUME_NAMESPACE {
        if let Ok(record) = serde_json::from_slice::<FinishedRecord>(value) {
            entry["fingerprint"] = json!(record.fingerprint());
            entry["finished"] = json!(record.finished().len());
            entry["updated_at"] = json!(record.updated_at());
        }
    }
    if with_value {
        entry["value"] = json!(STANDARD.encode(value));
    }
    entry
}

impl MigrateArgs {
    /// Execute the migrate command
    pub fn execute(&self, registry: &Registry, storage: &SharedStorage) -> Result<(), CliError> {
        let target = registry.open_with_map(&self.to)?;
        let keys = kv::migrate(storage.as_ref(), target.as_ref())?;
        target.close()?;
        info!(keys, from = storage.name(), to = target.name(), "Migration finished");
        println!("Migrated {keys} keys from {} to {}", storage.name(), target.name());
        Ok(())
    }
}

impl ResetArgs {
    /// Execute the reset command
    pub fn execute(&self, storage: &SharedStorage) -> Result<(), CliError> {
        if self.fingerprint.trim().is_empty() {
            return Err(CliError::InvalidArgument("fingerprint must not be empty".to_string()));
        }
        let session = ResumeSession::open(storage, &self.fingerprint)?;
        session.reset()?;
        println!("Reset session {}", self.fingerprint);
        Ok(())
    }
}
