//! Registry persistence: one versioned snapshot blob.
//!
//! The whole registry (entries, asked maps, seen caches, watchdog state)
//! serializes into a single bincode file. A magic/version mismatch is not
//! an error the caller can fix, so loading reports it distinctly and the
//! subsystem restarts from an empty registry.

use crate::registry::Registry;
use crate::RegistryError;
use serde::{Deserialize, Serialize};
use std::path::Path;

const MAGIC: &str = "OnyxServiceNodeCache";
const FORMAT_VERSION: &str = "registry-store-2";

#[derive(Deserialize)]
struct Envelope {
    magic: String,
    version: String,
    registry: Registry,
}

/// Borrowed mirror of [`Envelope`] so saving doesn't clone the registry.
#[derive(Serialize)]
struct EnvelopeRef<'a> {
    magic: &'a str,
    version: &'a str,
    registry: &'a Registry,
}

pub fn save_registry(registry: &Registry, path: &Path) -> Result<(), RegistryError> {
    let envelope = EnvelopeRef {
        magic: MAGIC,
        version: FORMAT_VERSION,
        registry,
    };
    let bytes = bincode::serialize(&envelope)
        .map_err(|e| RegistryError::Corrupt(e.to_string()))?;
    std::fs::write(path, bytes)?;
    tracing::debug!(path = %path.display(), nodes = registry.size(), "registry saved");
    Ok(())
}

pub fn load_registry(path: &Path) -> Result<Registry, RegistryError> {
    let bytes = std::fs::read(path)?;
    let envelope: Envelope =
        bincode::deserialize(&bytes).map_err(|e| RegistryError::Corrupt(e.to_string()))?;
    if envelope.magic != MAGIC || envelope.version != FORMAT_VERSION {
        return Err(RegistryError::IncompatibleVersion(format!(
            "{}/{}",
            envelope.magic, envelope.version
        )));
    }
    tracing::info!(path = %path.display(), nodes = envelope.registry.size(), "registry loaded");
    Ok(envelope.registry)
}
