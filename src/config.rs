//! Boot-time configuration. Every `TALESPIN_*` environment variable is read
//! exactly once into a `ServerConfig` that gets passed down; invalid values
//! warn and fall back to their defaults.

use crate::cards::transcode::{CardFormat, TransformSpec};
use std::env;
use std::path::{Path, PathBuf};

const EXTRA_IMAGE_DIRS_ENV: &str = "TALESPIN_EXTRA_IMAGE_DIRS";
const DISABLE_BUILTIN_IMAGES_ENV: &str = "TALESPIN_DISABLE_BUILTIN_IMAGES_P";
const SNIFF_EXTENSIONLESS_IMAGES_ENV: &str = "TALESPIN_SNIFF_EXTENSIONLESS_IMAGES_P";
const CACHE_DIR_ENV: &str = "TALESPIN_CACHE_DIR";
const CARD_ASPECT_RATIO_ENV: &str = "TALESPIN_CARD_ASPECT_RATIO";
const CARD_LONG_SIDE_ENV: &str = "TALESPIN_CARD_LONG_SIDE";
const CARD_CACHE_FORMAT_ENV: &str = "TALESPIN_CARD_CACHE_FORMAT";
const CARD_AVIF_ENCODER_ENV: &str = "TALESPIN_CARD_AVIF_ENCODER";
const CARD_AVIF_THREADS_ENV: &str = "TALESPIN_CARD_AVIF_THREADS";
const VALIDATE_CACHE_HITS_ENV: &str = "TALESPIN_VALIDATE_CACHE_HITS_P";
const DEFAULT_WIN_POINTS_ENV: &str = "TALESPIN_DEFAULT_WIN_POINTS";
const PORT_ENV: &str = "TALESPIN_PORT";

const BUILTIN_IMAGE_DIR: &str = "static/assets/cards";
const DEFAULT_CACHE_DIR: &str = "~/.cache/talespin";
const DEFAULT_ASPECT_RATIO: (u32, u32) = (2, 3);
const DEFAULT_LONG_SIDE: u32 = 1536;
const DEFAULT_AVIF_ENCODER: &str = "ravif";
const DEFAULT_WIN_POINTS: u16 = 10;
const DEFAULT_PORT: u16 = 8081;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub builtin_image_dir: PathBuf,
    pub extra_image_dirs: Vec<PathBuf>,
    pub disable_builtin_images: bool,
    pub sniff_extensionless_images: bool,
    pub cache_dir: PathBuf,
    pub ratio_width: u32,
    pub ratio_height: u32,
    pub long_side: u32,
    pub card_format: CardFormat,
    pub avif_encoder: String,
    pub avif_threads: u32,
    pub validate_cache_hits: bool,
    pub default_win_points: u16,
    pub listen_port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let (ratio_width, ratio_height) = env_ratio(CARD_ASPECT_RATIO_ENV, DEFAULT_ASPECT_RATIO);

        Self {
            builtin_image_dir: PathBuf::from(BUILTIN_IMAGE_DIR),
            extra_image_dirs: env_dir_list(EXTRA_IMAGE_DIRS_ENV),
            disable_builtin_images: env_flag(DISABLE_BUILTIN_IMAGES_ENV),
            sniff_extensionless_images: env_flag(SNIFF_EXTENSIONLESS_IMAGES_ENV),
            cache_dir: env::var(CACHE_DIR_ENV)
                .map(|v| expand_home(v.trim()))
                .unwrap_or_else(|_| expand_home(DEFAULT_CACHE_DIR)),
            ratio_width,
            ratio_height,
            long_side: env_positive(CARD_LONG_SIDE_ENV, DEFAULT_LONG_SIDE),
            card_format: env_card_format(CARD_CACHE_FORMAT_ENV),
            avif_encoder: env::var(CARD_AVIF_ENCODER_ENV)
                .map(|v| v.trim().to_string())
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_AVIF_ENCODER.to_string()),
            avif_threads: env::var(CARD_AVIF_THREADS_ENV)
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0),
            validate_cache_hits: env_flag_default(VALIDATE_CACHE_HITS_ENV, true),
            default_win_points: env_positive(DEFAULT_WIN_POINTS_ENV, DEFAULT_WIN_POINTS),
            listen_port: env_positive(PORT_ENV, DEFAULT_PORT),
        }
    }

    /// The transform every card goes through, as the cache sees it.
    pub fn transform_spec(&self) -> TransformSpec {
        TransformSpec {
            ratio_width: self.ratio_width,
            ratio_height: self.ratio_height,
            long_side: self.long_side,
            format: self.card_format,
            avif_encoder: self.avif_encoder.clone(),
            avif_threads: self.avif_threads,
        }
    }

    pub fn cards_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("cards")
    }
}

pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home);
        }
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = env::var("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(path)
}

pub fn parse_ratio(raw: &str) -> Option<(u32, u32)> {
    let (w, h) = raw.trim().split_once(':')?;
    let width = w.trim().parse::<u32>().ok()?;
    let height = h.trim().parse::<u32>().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

fn env_ratio(key: &str, default: (u32, u32)) -> (u32, u32) {
    match env::var(key) {
        Ok(raw) => parse_ratio(&raw).unwrap_or_else(|| {
            tracing::warn!(
                "invalid {}='{}'; using default {}:{}",
                key,
                raw,
                default.0,
                default.1
            );
            default
        }),
        Err(_) => default,
    }
}

fn env_card_format(key: &str) -> CardFormat {
    match env::var(key) {
        Ok(raw) => CardFormat::parse(&raw).unwrap_or_else(|| {
            tracing::warn!("invalid {}='{}'; using default avif", key, raw);
            CardFormat::Avif
        }),
        Err(_) => CardFormat::Avif,
    }
}

fn env_positive<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + From<u8> + Copy + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) if value > T::from(0u8) => value,
            _ => {
                tracing::warn!("invalid {}='{}'; using default {}", key, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_flag(key: &str) -> bool {
    env_flag_default(key, false)
}

fn env_flag_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "y" => true,
            "n" => false,
            other => {
                tracing::warn!(
                    "invalid {}='{}' (expected y/n); using default {}",
                    key,
                    other,
                    if default { "y" } else { "n" }
                );
                default
            }
        },
        Err(_) => default,
    }
}

fn env_dir_list(key: &str) -> Vec<PathBuf> {
    env::var(key)
        .map(|raw| {
            raw.split('\n')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(expand_home)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_parsing() {
        assert_eq!(parse_ratio("2:3"), Some((2, 3)));
        assert_eq!(parse_ratio(" 16 : 9 "), Some((16, 9)));
        assert_eq!(parse_ratio("0:3"), None);
        assert_eq!(parse_ratio("2"), None);
        assert_eq!(parse_ratio("2:3:4"), None);
        assert_eq!(parse_ratio("a:b"), None);
    }

    #[test]
    fn home_expansion_leaves_absolute_paths_alone() {
        assert_eq!(expand_home("/tmp/cards"), PathBuf::from("/tmp/cards"));
    }

    #[test]
    fn home_expansion_resolves_tilde() {
        if let Ok(home) = env::var("HOME") {
            assert_eq!(expand_home("~/x"), Path::new(&home).join("x"));
            assert_eq!(expand_home("~"), PathBuf::from(home));
        }
    }
}
