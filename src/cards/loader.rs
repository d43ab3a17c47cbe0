//! Discovery of card source images on disk.
//!
//! Walks the configured directories, keeps files that are recognizably
//! JPEG/PNG/WebP (by extension, or by magic bytes for extensionless files
//! when sniffing is enabled), and hands back a deduplicated, path-sorted
//! list of sources with lazily computed content hashes.

use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const SNIFF_PREFIX_BYTES: usize = 16;
const HASH_CHUNK_BYTES: usize = 64 * 1024;

/// One accepted source file. The content hash is computed on first use and
/// memoized; discovery itself never reads whole files.
#[derive(Debug)]
pub struct SourceImage {
    path: PathBuf,
    hash: OnceLock<String>,
}

impl SourceImage {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            hash: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Streamed sha256 of the source bytes, hex-encoded.
    pub fn content_hash(&self) -> Result<&str> {
        if let Some(hash) = self.hash.get() {
            return Ok(hash);
        }

        let file = fs::File::open(&self.path)
            .with_context(|| format!("Failed to open source image {}", self.path.display()))?;
        let mut reader = std::io::BufReader::new(file);
        let mut hasher = Sha256::new();
        let mut chunk = vec![0u8; HASH_CHUNK_BYTES];
        loop {
            let read = reader
                .read(&mut chunk)
                .with_context(|| format!("Failed to read source image {}", self.path.display()))?;
            if read == 0 {
                break;
            }
            hasher.update(&chunk[..read]);
        }

        let _ = self.hash.set(format!("{:x}", hasher.finalize()));
        Ok(self.hash.get().expect("hash was just set"))
    }
}

#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub builtin_dir: PathBuf,
    pub extra_dirs: Vec<PathBuf>,
    pub disable_builtin: bool,
    pub sniff_extensionless: bool,
}

/// Scan every configured directory and return the accepted sources.
///
/// Fails when the configuration can only yield an empty deck: extra dirs set
/// but empty, builtins disabled with nothing else, or nothing found at all.
pub fn discover_sources(opts: &LoaderOptions) -> Result<Vec<SourceImage>> {
    let mut found: Vec<PathBuf> = Vec::new();

    if !opts.disable_builtin {
        found.extend(collect_dir(
            &opts.builtin_dir,
            true,
            opts.sniff_extensionless,
        )?);
    }

    let mut extra_found = Vec::new();
    for dir in &opts.extra_dirs {
        extra_found.extend(collect_dir(dir, false, opts.sniff_extensionless)?);
    }

    if !opts.extra_dirs.is_empty() && extra_found.is_empty() {
        return Err(anyhow!(
            "No supported images (.jpg/.jpeg/.png/.webp) found in any of the {} extra image directories",
            opts.extra_dirs.len()
        ));
    }
    if opts.disable_builtin && extra_found.is_empty() {
        return Err(anyhow!(
            "Built-in images are disabled and no extra images were loaded"
        ));
    }

    found.extend(extra_found);

    let mut seen = HashSet::new();
    let mut sources: Vec<PathBuf> = found.into_iter().filter(|p| seen.insert(p.clone())).collect();
    sources.sort();

    if sources.is_empty() {
        return Err(anyhow!(
            "No card images found; the server cannot run with an empty deck"
        ));
    }

    Ok(sources.into_iter().map(SourceImage::new).collect())
}

/// Breadth-first recursive walk. Directories are canonicalized and tracked in
/// a visited set so symlink cycles are entered once and then skipped. With
/// `strict_root`, an unreadable root is an error; otherwise it only warns.
fn collect_dir(root: &Path, strict_root: bool, sniff: bool) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = VecDeque::from([root.to_path_buf()]);
    let mut visited = HashSet::new();

    while let Some(dir) = pending.pop_front() {
        let resolved = match fs::canonicalize(&dir) {
            Ok(path) => path,
            Err(err) => {
                if strict_root && dir == root {
                    return Err(anyhow!(
                        "Unable to resolve image directory {}: {}",
                        dir.display(),
                        err
                    ));
                }
                tracing::warn!("unable to resolve image directory {}: {}", dir.display(), err);
                continue;
            }
        };

        if !visited.insert(resolved.clone()) {
            continue;
        }

        let entries = match fs::read_dir(&resolved) {
            Ok(entries) => entries,
            Err(err) => {
                if strict_root && dir == root {
                    return Err(anyhow!(
                        "Unable to read image directory {}: {}",
                        dir.display(),
                        err
                    ));
                }
                tracing::warn!("unable to read image directory {}: {}", dir.display(), err);
                continue;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!("failed reading entry in {}: {}", resolved.display(), err);
                    continue;
                }
            };

            let resolved_entry = match fs::canonicalize(entry.path()) {
                Ok(path) => path,
                Err(err) => {
                    tracing::warn!("unable to resolve {}: {}", entry.path().display(), err);
                    continue;
                }
            };

            if resolved_entry.is_dir() {
                pending.push_back(resolved_entry);
            } else if resolved_entry.is_file() && is_supported_image(&resolved_entry, sniff) {
                found.push(resolved_entry);
            }
        }
    }

    Ok(found)
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            matches!(
                ext.to_ascii_lowercase().as_str(),
                "jpg" | "jpeg" | "png" | "webp"
            )
        })
        .unwrap_or(false)
}

fn sniff_supported_image(path: &Path) -> bool {
    let mut prefix = [0u8; SNIFF_PREFIX_BYTES];
    let read = match fs::File::open(path).and_then(|mut f| f.read(&mut prefix)) {
        Ok(read) => read,
        Err(err) => {
            tracing::warn!(
                "failed to read extensionless candidate {}: {}",
                path.display(),
                err
            );
            return false;
        }
    };

    match infer::get(&prefix[..read]) {
        Some(kind) => matches!(kind.mime_type(), "image/jpeg" | "image/png" | "image/webp"),
        None => false,
    }
}

fn is_supported_image(path: &Path, sniff: bool) -> bool {
    if has_supported_extension(path) {
        return true;
    }
    sniff && path.extension().is_none() && sniff_supported_image(path)
}
