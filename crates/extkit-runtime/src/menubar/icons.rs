//! Icon resolution for published menus, with an LRU cache for file icons.

use std::{
    collections::{HashMap, HashSet},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
};

use extkit_protocol::{Icon, IconSource};
use futures::future::join_all;
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::warn;

use crate::{
    config::IconConfig,
    host::IconExtractor,
    loader::{IconKind, IconSpec},
};

/// Extensions the host loads directly without asking the extractor.
const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "tif", "tiff", "bmp", "pdf", "icns", "svg", "heic", "webp",
];

/// Resolves declared icons into wire icons, caching extracted file icons.
pub struct IconResolver {
    /// Native icon lookup for non-image files.
    extractor: Arc<dyn IconExtractor>,
    /// Pixel size requested from the extractor.
    size: u32,
    /// Extracted icons by path, including misses.
    cache: Mutex<LruCache<PathBuf, IconSource>>,
}

impl IconResolver {
    /// Create a resolver backed by `extractor`.
    pub fn new(extractor: Arc<dyn IconExtractor>, config: &IconConfig) -> Self {
        let cap = NonZeroUsize::new(config.cache_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            extractor,
            size: config.size,
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Resolve one icon. Relative file paths are taken from `assets`.
    ///
    /// Extraction failures degrade to no icon.
    pub async fn resolve(&self, spec: &IconSpec, assets: &Path) -> Icon {
        let source = match &spec.kind {
            IconKind::DataUrl(url) => IconSource::DataUrl(url.clone()),
            IconKind::Emoji(e) => IconSource::Emoji(e.clone()),
            IconKind::File(path) => {
                let abs = if path.is_absolute() {
                    path.clone()
                } else {
                    assets.join(path)
                };
                if is_image(&abs) {
                    IconSource::FilePath(abs.to_string_lossy().into_owned())
                } else {
                    self.extract(abs).await
                }
            }
        };
        if matches!(source, IconSource::None) {
            return Icon::none();
        }
        Icon {
            source,
            template: spec.template,
        }
    }

    /// Resolve a set of icons concurrently.
    pub async fn resolve_all(
        &self,
        specs: HashSet<IconSpec>,
        assets: &Path,
    ) -> HashMap<IconSpec, Icon> {
        let resolved = join_all(specs.iter().map(|s| self.resolve(s, assets))).await;
        specs.into_iter().zip(resolved).collect()
    }

    /// Cached or freshly extracted icon for a non-image file. Failures are not cached.
    async fn extract(&self, path: PathBuf) -> IconSource {
        if let Some(found) = self.cache.lock().await.get(&path).cloned() {
            return found;
        }

        let source = match self.extractor.resolve_file_icon(&path, self.size).await {
            Ok(Some(url)) => IconSource::DataUrl(url),
            Ok(None) => IconSource::None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "icon_degraded");
                return IconSource::None;
            }
        };

        self.cache.lock().await.put(path, source.clone());
        source
    }
}

/// True when the host can load `path` itself.
fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
}
