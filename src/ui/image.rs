//! Inline images: fetch, convert to terminal graphics, and keep the result
//! on disk so later sessions can replay it without the network.

use crate::feeds::image::ImageFetcher;
use crate::twitter_message::User;
use crate::ui::color::ColorMode;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use image::ImageFormat;
use std::collections::{HashSet, VecDeque};
use std::io::Cursor;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

const ICON_PREFIX: &str = "icon-";
const TEMP_PREFIX: &str = ".tmp-";
const ICON_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);
const IMAGE_MAX_AGE: Duration = Duration::from_secs(2 * 24 * 60 * 60);
const TEMP_MAX_AGE: Duration = Duration::from_secs(60 * 60);
/// Failed keys remembered for [`ImageCache::state`]; older ones read as missing.
const FAILED_KEYS: usize = 64;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Render raw image bytes as bytes a terminal can draw inline.
#[async_trait]
pub trait TerminalGraphics: Send + Sync {
    async fn convert(&self, image: Vec<u8>, width: Option<u32>) -> Result<Vec<u8>>;
}

/// Converts through an external `img2sixel` process.
pub struct Img2Sixel {
    program: PathBuf,
    color_mode: ColorMode,
    colormap_dir: Option<PathBuf>,
}

impl Img2Sixel {
    pub fn new(program: PathBuf, color_mode: ColorMode, colormap_dir: Option<PathBuf>) -> Self {
        Self {
            program,
            color_mode,
            colormap_dir,
        }
    }

    fn args(&self, width: Option<u32>) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(w) = width {
            args.push("-w".to_string());
            args.push(w.to_string());
        }
        match self.color_mode {
            ColorMode::Mono => {
                args.push("-e".to_string());
                args.push("--quality=low".to_string());
            }
            ColorMode::Ansi16 => {
                let colormap = self
                    .colormap_dir
                    .as_ref()
                    .map(|dir| dir.join("colormap16.png"))
                    .filter(|p| p.exists());
                match colormap {
                    Some(path) => {
                        args.push("-m".to_string());
                        args.push(path.display().to_string());
                    }
                    None => {
                        args.push("-p".to_string());
                        args.push("16".to_string());
                    }
                }
            }
            ColorMode::Ansi256 => {}
        }
        args
    }
}

/// Re-encode formats the converter may not read as PNG.
fn normalize_format(bytes: Vec<u8>) -> Result<Vec<u8>> {
    match image::guess_format(&bytes) {
        Ok(format @ (ImageFormat::Gif | ImageFormat::WebP)) => {
            let img = image::load_from_memory_with_format(&bytes, format)?;
            let mut out = Vec::new();
            img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
            Ok(out)
        }
        _ => Ok(bytes),
    }
}

#[async_trait]
impl TerminalGraphics for Img2Sixel {
    async fn convert(&self, image: Vec<u8>, width: Option<u32>) -> Result<Vec<u8>> {
        let input = tokio::task::spawn_blocking(move || normalize_format(image)).await??;

        let mut child = Command::new(&self.program)
            .args(self.args(width))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("starting {}", self.program.display()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("converter stdin unavailable"))?;
        let writer = tokio::spawn(async move { stdin.write_all(&input).await });

        let output = child.wait_with_output().await?;
        if let Ok(Err(e)) = writer.await {
            debug!("converter closed its input early: {}", e);
        }
        if !output.status.success() {
            bail!("{} exited with {}", self.program.display(), output.status);
        }
        Ok(output.stdout)
    }
}

/// Replace characters that are awkward in file names.
fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            ':' | '/' | '(' | ')' | '?' | ' ' | '\\' => '_',
            c => c,
        })
        .collect()
}

/// File name of a cached image; includes everything that changes its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn icon(user: &User, avatar_url: &str, size: u32, mode: ColorMode) -> Self {
        let base = avatar_url.rsplit('/').next().unwrap_or(avatar_url);
        CacheKey(format!(
            "{}{}-{}-{}-{}",
            ICON_PREFIX,
            mode.depth(),
            size,
            sanitize(&user.screen_name),
            sanitize(base)
        ))
    }

    pub fn photo(url: &str, width: Option<u32>, mode: ColorMode) -> Self {
        let width = width.map(|w| w.to_string()).unwrap_or_else(|| "0".to_string());
        CacheKey(format!("{}-{}-{}", mode.depth(), width, sanitize(url)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Missing,
    Fetching,
    Ready,
    /// The last attempt produced nothing; the next request retries.
    FailedEmpty,
}

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub key: CacheKey,
    pub url: String,
    pub width: Option<u32>,
}

/// Keys with no file to show for them. Ready entries live only on disk.
#[derive(Default)]
struct Tracking {
    fetching: HashSet<CacheKey>,
    failed: VecDeque<CacheKey>,
}

impl Tracking {
    fn start(&mut self, key: &CacheKey) {
        self.fetching.insert(key.clone());
    }

    fn finish(&mut self, key: &CacheKey, ok: bool) {
        self.fetching.remove(key);
        self.failed.retain(|k| k != key);
        if !ok {
            if self.failed.len() == FAILED_KEYS {
                self.failed.pop_front();
            }
            self.failed.push_back(key.clone());
        }
    }
}

pub struct ImageCache {
    dir: PathBuf,
    fetcher: Arc<dyn ImageFetcher>,
    converter: Option<Arc<dyn TerminalGraphics>>,
    tracking: Mutex<Tracking>,
}

impl ImageCache {
    /// `converter` is `None` when images are disabled; lookups then never
    /// touch the network.
    pub fn new(
        dir: PathBuf,
        fetcher: Arc<dyn ImageFetcher>,
        converter: Option<Arc<dyn TerminalGraphics>>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating cache directory {}", dir.display()))?;
        Ok(Self {
            dir,
            fetcher,
            converter,
            tracking: Mutex::new(Tracking::default()),
        })
    }

    pub fn path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.as_str())
    }

    fn track(&self, f: impl FnOnce(&mut Tracking)) {
        if let Ok(mut tracking) = self.tracking.lock() {
            f(&mut tracking);
        }
    }

    pub fn state(&self, key: &CacheKey) -> CacheState {
        let (fetching, failed) = match self.tracking.lock() {
            Ok(t) => (t.fetching.contains(key), t.failed.contains(key)),
            Err(_) => (false, false),
        };
        if fetching {
            CacheState::Fetching
        } else if self.path(key).metadata().is_ok_and(|m| m.len() > 0) {
            CacheState::Ready
        } else if failed {
            CacheState::FailedEmpty
        } else {
            CacheState::Missing
        }
    }

    /// Terminal graphics for `url`, from disk or freshly converted.
    /// Failures are logged and yield `None`.
    pub async fn load(&self, key: &CacheKey, url: &str, width: Option<u32>) -> Option<Vec<u8>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => {
                debug!("cache hit {}", key.as_str());
                return Some(bytes);
            }
            Ok(_) => {
                let _ = tokio::fs::remove_file(&path).await;
            }
            Err(_) => {}
        }

        let converter = self.converter.clone()?;

        debug!("cache miss {}", key.as_str());
        self.track(|t| t.start(key));
        let result = self.fetch_and_store(converter.as_ref(), key, url, width).await;
        self.track(|t| t.finish(key, result.is_ok()));
        match result {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("image {}: {:#}", url, e);
                None
            }
        }
    }

    async fn fetch_and_store(
        &self,
        converter: &dyn TerminalGraphics,
        key: &CacheKey,
        url: &str,
        width: Option<u32>,
    ) -> Result<Vec<u8>> {
        let raw = self.fetcher.fetch(url).await?;
        let out = converter.convert(raw, width).await?;
        if out.is_empty() {
            bail!("converter produced no output");
        }

        let tmp = self.dir.join(format!(
            "{}{}-{}-{}",
            TEMP_PREFIX,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed),
            key.as_str()
        ));
        if let Err(e) = tokio::fs::write(&tmp, &out).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("writing {}", tmp.display()));
        }
        if let Err(e) = tokio::fs::rename(&tmp, self.path(key)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e).context("renaming cache file");
        }
        Ok(out)
    }

    /// Load several images at once; results keep the order of `requests`.
    pub async fn load_many(
        &self,
        requests: &[ImageRequest],
        concurrency: usize,
    ) -> Vec<Option<Vec<u8>>> {
        stream::iter(requests.to_vec())
            .map(|r| async move { self.load(&r.key, &r.url, r.width).await })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    /// Delete old entries and leftovers of interrupted writes.
    pub fn expire(&self, now: SystemTime) -> Result<usize> {
        let mut removed = 0;
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("reading cache directory {}", self.dir.display()))?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let max_age = if name.starts_with(TEMP_PREFIX) {
                TEMP_MAX_AGE
            } else if name.starts_with(ICON_PREFIX) {
                ICON_MAX_AGE
            } else {
                IMAGE_MAX_AGE
            };
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(_) => continue,
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age > max_age && std::fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("expired {} cached images", removed);
        }
        Ok(removed)
    }
}
