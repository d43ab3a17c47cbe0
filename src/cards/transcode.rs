//! Content-addressed card transcoding cache.
//!
//! Every source image is center-cropped to the configured aspect ratio,
//! resized, and encoded into an artifact whose file name is derived from the
//! source content hash, the transform spec, and the pipeline version. Builds
//! are atomic (temp file + rename) and deduplicated per cache file name
//! within the process.

use anyhow::{anyhow, Context, Result};
use dashmap::DashMap;
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, GenericImageView, ImageEncoder, ImageFormat};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use super::loader::SourceImage;

/// Bumped whenever the transform pipeline changes behavior, so stale
/// artifacts never collide with new ones.
pub const PIPELINE_VERSION: &str = "v1";

const AVIF_QUALITY: u8 = 80;
const AVIF_SPEED: u8 = 4;
const JPEG_QUALITY: u8 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardFormat {
    Avif,
    Jpeg,
}

impl CardFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "avif" => Some(Self::Avif),
            "jpeg" | "jpg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    pub fn file_extension(self) -> &'static str {
        match self {
            Self::Avif => "avif",
            Self::Jpeg => "jpg",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Avif => "image/avif",
            Self::Jpeg => "image/jpeg",
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            Self::Avif => ImageFormat::Avif,
            Self::Jpeg => ImageFormat::Jpeg,
        }
    }
}

/// Everything that determines the bytes of an artifact besides the source.
#[derive(Debug, Clone)]
pub struct TransformSpec {
    pub ratio_width: u32,
    pub ratio_height: u32,
    pub long_side: u32,
    pub format: CardFormat,
    pub avif_encoder: String,
    pub avif_threads: u32,
}

impl TransformSpec {
    /// Output dimensions with the long side on the longer ratio axis.
    pub fn output_dimensions(&self) -> (u32, u32) {
        if self.ratio_width <= self.ratio_height {
            let height = self.long_side.max(1);
            let width = ((height as f64 * self.ratio_width as f64 / self.ratio_height as f64)
                .round() as u32)
                .max(1);
            (width, height)
        } else {
            let width = self.long_side.max(1);
            let height = ((width as f64 * self.ratio_height as f64 / self.ratio_width as f64)
                .round() as u32)
                .max(1);
            (width, height)
        }
    }

    /// Compact encoding of the spec for cache file names.
    pub fn tag(&self) -> String {
        match self.format {
            CardFormat::Avif => format!(
                "{}x{}-{}-avif-q{}-s{}-{}-t{}",
                self.ratio_width,
                self.ratio_height,
                self.long_side,
                AVIF_QUALITY,
                AVIF_SPEED,
                self.avif_encoder,
                self.avif_threads
            ),
            CardFormat::Jpeg => format!(
                "{}x{}-{}-jpeg-q{}",
                self.ratio_width, self.ratio_height, self.long_side, JPEG_QUALITY
            ),
        }
    }
}

/// A finished cache entry for one source.
#[derive(Debug, Clone)]
pub struct CardArtifact {
    /// sha256 over (source hash, spec tag, pipeline version); card IDs are
    /// carved out of this.
    pub fingerprint: String,
    pub path: PathBuf,
}

pub struct CardCache {
    dir: PathBuf,
    spec: TransformSpec,
    validate_hits: bool,
    // per-file-name build locks: at most one build per fingerprint in-process
    building: DashMap<String, Arc<Mutex<()>>>,
}

impl CardCache {
    pub fn new(dir: PathBuf, spec: TransformSpec, validate_hits: bool) -> Result<Self> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cards cache directory {}", dir.display()))?;
        Ok(Self {
            dir,
            spec,
            validate_hits,
            building: DashMap::new(),
        })
    }

    pub fn spec(&self) -> &TransformSpec {
        &self.spec
    }

    /// Return the cached artifact for `source`, building it if it is absent
    /// or fails validation. Blocking; run on a worker thread.
    pub fn ensure_card(&self, source: &SourceImage) -> Result<CardArtifact> {
        let source_hash = source.content_hash()?.to_string();
        let file_name = format!(
            "{source_hash}_{}_{PIPELINE_VERSION}.{}",
            self.spec.tag(),
            self.spec.format.file_extension()
        );
        let path = self.dir.join(&file_name);
        let fingerprint = fingerprint(&source_hash, &self.spec);

        let lock = self
            .building
            .entry(file_name.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if path.exists() {
            if !self.validate_hits {
                return Ok(CardArtifact { fingerprint, path });
            }
            match self.validate_artifact(&path) {
                Ok(()) => return Ok(CardArtifact { fingerprint, path }),
                Err(err) => {
                    tracing::warn!(
                        "cached card {} failed validation ({}); rebuilding",
                        path.display(),
                        err
                    );
                    let _ = fs::remove_file(&path);
                }
            }
        }

        self.build(source, &path)?;
        Ok(CardArtifact { fingerprint, path })
    }

    /// A valid artifact carries the expected container format and decodes (or
    /// self-describes) to exactly the output dimensions.
    fn validate_artifact(&self, path: &Path) -> Result<()> {
        let bytes = fs::read(path).context("unreadable artifact")?;
        let format =
            image::guess_format(&bytes).context("artifact bytes are not a known image format")?;
        if format != self.spec.format.image_format() {
            return Err(anyhow!(
                "artifact format {:?} does not match configured {:?}",
                format,
                self.spec.format
            ));
        }

        let dimensions = match self.spec.format {
            CardFormat::Jpeg => image::load_from_memory(&bytes)
                .context("artifact failed to decode")?
                .dimensions(),
            // AVIF decode support is not compiled in; the ispe property box
            // carries the pixel dimensions.
            CardFormat::Avif => {
                avif_dimensions(&bytes).ok_or_else(|| anyhow!("artifact has no ispe box"))?
            }
        };

        let expected = self.spec.output_dimensions();
        if dimensions != expected {
            return Err(anyhow!(
                "artifact is {}x{}, expected {}x{}",
                dimensions.0,
                dimensions.1,
                expected.0,
                expected.1
            ));
        }
        Ok(())
    }

    fn build(&self, source: &SourceImage, dest: &Path) -> Result<()> {
        let bytes = fs::read(source.path())
            .with_context(|| format!("Failed to read source image {}", source.path().display()))?;
        let decoded = image::load_from_memory(&bytes)
            .with_context(|| format!("Failed to decode image {}", source.path().display()))?;

        let (src_width, src_height) = decoded.dimensions();
        if src_width == 0 || src_height == 0 {
            return Err(anyhow!(
                "Image {} has invalid dimensions {}x{}",
                source.path().display(),
                src_width,
                src_height
            ));
        }

        let (crop_x, crop_y, crop_width, crop_height) = center_crop_rect(
            src_width,
            src_height,
            self.spec.ratio_width,
            self.spec.ratio_height,
        );
        let cropped =
            image::imageops::crop_imm(&decoded, crop_x, crop_y, crop_width, crop_height).to_image();

        let (out_width, out_height) = self.spec.output_dimensions();
        let resized = DynamicImage::ImageRgba8(cropped).resize_exact(
            out_width,
            out_height,
            FilterType::Lanczos3,
        );

        let tmp = dest.with_file_name(format!(
            "{}.tmp-{:08x}",
            dest.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("artifact"),
            rand::random::<u32>()
        ));

        let result = self.encode_to(&tmp, &resized);
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
            return result;
        }

        fs::rename(&tmp, dest)
            .with_context(|| format!("Failed to move artifact into place at {}", dest.display()))?;
        Ok(())
    }

    fn encode_to(&self, tmp: &Path, resized: &DynamicImage) -> Result<()> {
        let file = fs::File::create(tmp)
            .with_context(|| format!("Failed to create temp artifact {}", tmp.display()))?;
        let mut writer = BufWriter::new(file);

        match self.spec.format {
            CardFormat::Avif => {
                let rgba = resized.to_rgba8();
                let (width, height) = rgba.dimensions();
                let mut encoder =
                    AvifEncoder::new_with_speed_quality(&mut writer, AVIF_SPEED, AVIF_QUALITY);
                if self.spec.avif_threads > 0 {
                    encoder = encoder.with_num_threads(Some(self.spec.avif_threads as usize));
                }
                encoder
                    .write_image(rgba.as_raw(), width, height, ExtendedColorType::Rgba8)
                    .with_context(|| format!("Failed to encode {}", tmp.display()))?;
            }
            CardFormat::Jpeg => {
                let rgb = resized.to_rgb8();
                let mut encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
                encoder
                    .encode_image(&rgb)
                    .with_context(|| format!("Failed to encode {}", tmp.display()))?;
            }
        }

        let file = writer
            .into_inner()
            .map_err(|e| anyhow!("Failed to flush artifact {}: {}", tmp.display(), e))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync artifact {}", tmp.display()))?;
        Ok(())
    }
}

pub fn fingerprint(source_hash: &str, spec: &TransformSpec) -> String {
    let descriptor = format!("{source_hash}|{}|{PIPELINE_VERSION}", spec.tag());
    format!("{:x}", Sha256::digest(descriptor.as_bytes()))
}

/// Largest centered rectangle of the source with the target aspect ratio.
pub fn center_crop_rect(
    src_width: u32,
    src_height: u32,
    ratio_width: u32,
    ratio_height: u32,
) -> (u32, u32, u32, u32) {
    let sw = src_width as u64;
    let sh = src_height as u64;
    let rw = ratio_width as u64;
    let rh = ratio_height as u64;

    if sw * rh > sh * rw {
        let crop_width = ((sh * rw / rh).max(1)) as u32;
        let offset_x = src_width.saturating_sub(crop_width) / 2;
        (offset_x, 0, crop_width, src_height)
    } else {
        let crop_height = ((sw * rh / rw).max(1)) as u32;
        let offset_y = src_height.saturating_sub(crop_height) / 2;
        (0, offset_y, src_width, crop_height)
    }
}

/// Pixel dimensions from an AVIF file's `ispe` property box
/// (meta > iprp > ipco > ispe in the ISOBMFF box tree).
fn avif_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let meta = find_box(bytes, b"meta")?;
    // meta is a FullBox: skip 4 bytes of version/flags
    let iprp = find_box(meta.get(4..)?, b"iprp")?;
    let ipco = find_box(iprp, b"ipco")?;
    let ispe = find_box(ipco, b"ispe")?;
    let width = u32::from_be_bytes(ispe.get(4..8)?.try_into().ok()?);
    let height = u32::from_be_bytes(ispe.get(8..12)?.try_into().ok()?);
    Some((width, height))
}

fn find_box<'a>(data: &'a [u8], name: &[u8; 4]) -> Option<&'a [u8]> {
    let mut offset = 0usize;
    while offset + 8 <= data.len() {
        let size = u32::from_be_bytes(data.get(offset..offset + 4)?.try_into().ok()?) as usize;
        if size < 8 || offset + size > data.len() {
            return None;
        }
        if &data[offset + 4..offset + 8] == name {
            return Some(&data[offset + 8..offset + size]);
        }
        offset += size;
    }
    None
}

/// Transcode the whole source set on a bounded blocking pool. Per-source
/// failures come back as inner errors; a panicking worker fails the batch.
pub async fn transcode_all(
    sources: Vec<SourceImage>,
    cache: Arc<CardCache>,
    workers: usize,
) -> Result<Vec<(SourceImage, Result<CardArtifact>)>> {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));

    let tasks = sources.into_iter().map(|source| {
        let cache = Arc::clone(&cache);
        let semaphore = Arc::clone(&semaphore);
        async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .context("transcode pool closed")?;
            tokio::task::spawn_blocking(move || {
                let result = cache.ensure_card(&source);
                (source, result)
            })
            .await
            .context("transcode worker died")
        }
    });

    futures::future::join_all(tasks).await.into_iter().collect()
}
