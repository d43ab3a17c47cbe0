//! The card pipeline: discovery, transcoding, and the registry the room
//! engine draws decks from.

pub mod loader;
pub mod transcode;

use crate::config::ServerConfig;
use crate::types::CardId;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use loader::LoaderOptions;
use transcode::{CardCache, CardFormat};

const CARD_ID_PREFIX_LEN: usize = 16;

/// Read-only mapping of card ID to cache artifact, built once after the
/// transcode pass. IDs are assigned in source-path order and are stable
/// across restarts for identical inputs.
pub struct CardRegistry {
    entries: HashMap<CardId, PathBuf>,
    order: Vec<CardId>,
    mime: &'static str,
}

impl CardRegistry {
    /// `artifacts` must already be in source-path order; IDs are the first 16
    /// hex chars of each fingerprint, widened to the full hash on collision.
    pub fn assemble(artifacts: Vec<transcode::CardArtifact>, format: CardFormat) -> Self {
        let mut entries = HashMap::new();
        let mut order = Vec::new();
        let mut seen_fingerprints = std::collections::HashSet::new();

        for artifact in artifacts {
            // identical source bytes produce identical fingerprints; keep one
            if !seen_fingerprints.insert(artifact.fingerprint.clone()) {
                continue;
            }

            let short: CardId = artifact.fingerprint[..CARD_ID_PREFIX_LEN].to_string();
            let id = if entries.contains_key(&short) {
                artifact.fingerprint.clone()
            } else {
                short
            };

            order.push(id.clone());
            entries.insert(id, artifact.path);
        }

        Self {
            entries,
            order,
            mime: format.mime_type(),
        }
    }

    pub fn get(&self, id: &str) -> Option<(&Path, &'static str)> {
        self.entries.get(id).map(|path| (path.as_path(), self.mime))
    }

    /// IDs in deterministic (source-path) order.
    pub fn card_ids(&self) -> &[CardId] {
        &self.order
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Run the whole pipeline: discover sources, transcode them on a bounded
/// pool, and assemble the registry. Fatal when no card survives.
pub async fn build_registry(config: &ServerConfig) -> Result<CardRegistry> {
    let opts = LoaderOptions {
        builtin_dir: config.builtin_image_dir.clone(),
        extra_dirs: config.extra_image_dirs.clone(),
        disable_builtin: config.disable_builtin_images,
        sniff_extensionless: config.sniff_extensionless_images,
    };
    let sources = loader::discover_sources(&opts)?;
    let source_count = sources.len();

    let cache = Arc::new(CardCache::new(
        config.cards_cache_dir(),
        config.transform_spec(),
        config.validate_cache_hits,
    )?);

    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    let results = transcode::transcode_all(sources, cache, workers).await?;

    let mut artifacts = Vec::with_capacity(results.len());
    let mut failed = 0usize;
    for (source, result) in results {
        match result {
            Ok(artifact) => artifacts.push(artifact),
            Err(err) => {
                failed += 1;
                tracing::warn!(
                    "failed to normalize image {}: {:#}",
                    source.path().display(),
                    err
                );
            }
        }
    }

    let registry = CardRegistry::assemble(artifacts, config.card_format);
    if registry.is_empty() {
        return Err(anyhow!(
            "No cards available after transcoding ({} sources, {} failed)",
            source_count,
            failed
        ));
    }

    tracing::info!(
        "card registry ready: {} cards ({} sources, {} failed, format {})",
        registry.len(),
        source_count,
        failed,
        registry.mime
    );
    Ok(registry)
}
