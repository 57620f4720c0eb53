//! Layer registry backed by a JSON layer store document.
//!
//! The store is re-read only when its modification time changes. Between
//! changes every caller gets the same `Arc<LayerStoreCache>`. Source access
//! runs on the blocking pool; the async lock makes reloads single-flight
//! without parking runtime workers.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use wfsgate_telemetry::{log_layer_store_reloaded, log_layer_store_unavailable, MetricsRegistry};

use crate::error::{Result, ServiceError};
use crate::validate::RequestValidator;

/// Where the layer store document comes from. Calls may block; the registry
/// only invokes them from the blocking pool.
pub trait LayerSource: Send + Sync {
    /// Modification time used for change detection.
    fn modified(&self) -> io::Result<SystemTime>;

    /// Full document text.
    fn read(&self) -> io::Result<String>;

    /// Human readable location, for logs.
    fn describe(&self) -> String;
}

/// A layer store on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileLayerSource {
    path: PathBuf,
}

impl FileLayerSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LayerSource for FileLayerSource {
    fn modified(&self) -> io::Result<SystemTime> {
        std::fs::metadata(&self.path)?.modified()
    }

    fn read(&self) -> io::Result<String> {
        std::fs::read_to_string(&self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// A WFS-T layer definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WfstLayer {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub caption: String,
    /// Feature type names served by this layer.
    #[serde(default)]
    pub layers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_for_groups: Option<Vec<String>>,
    /// Any other keys of the store entry, kept as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WfstLayer {
    /// The layer as a JSON object, including extra keys.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Layers without a group restriction are visible to everyone.
    pub fn is_visible_to(&self, groups: &[String]) -> bool {
        match &self.visible_for_groups {
            None => true,
            Some(allowed) => allowed.iter().any(|g| groups.contains(g)),
        }
    }

    /// Whether `type_name` is one of this layer's feature types.
    pub fn serves(&self, type_name: &str) -> bool {
        self.layers.iter().any(|l| l == type_name)
    }
}

#[derive(Debug, Deserialize)]
struct LayerStoreDocument {
    #[serde(default)]
    wfstlayers: Vec<WfstLayer>,
}

/// One parsed snapshot of the layer store.
#[derive(Debug)]
pub struct LayerStoreCache {
    pub last_modified: SystemTime,
    layers: Vec<Arc<WfstLayer>>,
    by_id: HashMap<String, Arc<WfstLayer>>,
}

impl LayerStoreCache {
    /// Parse a store document. Duplicate ids keep their first occurrence.
    pub fn parse(text: &str, last_modified: SystemTime) -> std::result::Result<Self, String> {
        let document: LayerStoreDocument =
            serde_json::from_str(text).map_err(|e| format!("invalid layer store: {e}"))?;

        let mut layers = Vec::with_capacity(document.wfstlayers.len());
        let mut by_id = HashMap::with_capacity(document.wfstlayers.len());
        for layer in document.wfstlayers {
            if by_id.contains_key(&layer.id) {
                tracing::warn!(layer_id = %layer.id, "duplicate layer id in store, keeping first");
                continue;
            }
            let layer = Arc::new(layer);
            by_id.insert(layer.id.clone(), Arc::clone(&layer));
            layers.push(layer);
        }

        Ok(Self {
            last_modified,
            layers,
            by_id,
        })
    }

    pub fn get(&self, id: &str) -> Option<Arc<WfstLayer>> {
        self.by_id.get(id).cloned()
    }

    /// Layers in document order.
    pub fn layers(&self) -> &[Arc<WfstLayer>] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Outcome of checking the source against the cached mtime.
enum Refresh {
    Unchanged,
    Loaded(LayerStoreCache),
    Failed(String),
}

fn refresh(source: &dyn LayerSource, cached: Option<SystemTime>) -> Refresh {
    let modified = match source.modified() {
        Ok(modified) => modified,
        Err(e) => return Refresh::Failed(format!("cannot stat layer store: {e}")),
    };
    if cached == Some(modified) {
        return Refresh::Unchanged;
    }

    let parsed = source
        .read()
        .map_err(|e| format!("cannot read layer store: {e}"))
        .and_then(|text| LayerStoreCache::parse(&text, modified));
    match parsed {
        Ok(store) => Refresh::Loaded(store),
        Err(reason) => Refresh::Failed(reason),
    }
}

/// Result of [`LayerRegistry::get_store`].
#[derive(Debug, Clone)]
pub enum StoreState {
    Ready(Arc<LayerStoreCache>),
    Unavailable(String),
}

/// Cached, change-detecting access to the layer store.
pub struct LayerRegistry {
    source: Arc<dyn LayerSource>,
    /// Held over stat + read + parse so concurrent reloads happen once.
    cache: Mutex<Option<Arc<LayerStoreCache>>>,
    validator: RequestValidator,
    metrics: Arc<MetricsRegistry>,
}

impl LayerRegistry {
    pub fn new(
        source: Box<dyn LayerSource>,
        validator: RequestValidator,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            source: Arc::from(source),
            cache: Mutex::new(None),
            validator,
            metrics,
        }
    }

    pub fn describe(&self) -> String {
        self.source.describe()
    }

    /// Current snapshot, reloading when the source mtime moved.
    pub async fn get_store(&self) -> StoreState {
        let mut cache = self.cache.lock().await;

        let cached = cache.as_ref().map(|store| store.last_modified);
        let source = Arc::clone(&self.source);
        let outcome = tokio::task::spawn_blocking(move || refresh(source.as_ref(), cached))
            .await
            .unwrap_or_else(|e| Refresh::Failed(format!("layer store check failed: {e}")));

        match outcome {
            Refresh::Unchanged => match cache.as_ref().map(Arc::clone) {
                Some(current) => StoreState::Ready(current),
                None => self.unavailable(&mut cache, "layer store not loaded".to_string()),
            },
            Refresh::Loaded(store) => {
                let store = Arc::new(store);
                *cache = Some(Arc::clone(&store));
                self.metrics.record_layer_store_reload(true, store.len());
                log_layer_store_reloaded!(
                    source = %self.source.describe(),
                    layers = store.len(),
                    "layer store loaded"
                );
                StoreState::Ready(store)
            }
            Refresh::Failed(reason) => self.unavailable(&mut cache, reason),
        }
    }

    fn unavailable(&self, cache: &mut Option<Arc<LayerStoreCache>>, reason: String) -> StoreState {
        *cache = None;
        self.metrics.record_layer_store_reload(false, 0);
        log_layer_store_unavailable!(
            source = %self.source.describe(),
            reason = %reason,
            "layer store unavailable"
        );
        StoreState::Unavailable(reason)
    }

    /// Look up a layer by id. The configured URL must be an internal path or
    /// pass the SSRF policy.
    pub async fn lookup(&self, id: &str) -> Result<Arc<WfstLayer>> {
        let store = match self.get_store().await {
            StoreState::Ready(store) => store,
            StoreState::Unavailable(reason) => {
                return Err(
                    ServiceError::service("Layer store unavailable").with_detail("reason", reason)
                );
            }
        };

        let layer = store
            .get(id)
            .ok_or_else(|| ServiceError::not_found(format!("WFST layer '{id}' not found")))?;

        if !self.validator.is_valid_url(&layer.url, true) {
            return Err(ServiceError::upstream("Invalid WFS URL configured for layer", 500)
                .with_detail("layerId", id));
        }
        Ok(layer)
    }

    /// Read and parse the source without touching the cache.
    pub async fn load_uncached(&self) -> Result<Vec<Arc<WfstLayer>>> {
        let source = Arc::clone(&self.source);
        let outcome = tokio::task::spawn_blocking(move || refresh(source.as_ref(), None))
            .await
            .unwrap_or_else(|e| Refresh::Failed(format!("layer store check failed: {e}")));

        match outcome {
            Refresh::Loaded(store) => Ok(store.layers),
            Refresh::Failed(reason) => {
                Err(ServiceError::service("Layer store unavailable").with_detail("reason", reason))
            }
            Refresh::Unchanged => Err(ServiceError::service("Layer store unavailable")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// In-memory source with a settable mtime and a read counter.
    struct MemorySource {
        modified: Mutex<SystemTime>,
        text: Mutex<String>,
        reads: Arc<AtomicUsize>,
    }

    impl MemorySource {
        fn new(text: &str) -> (Self, Arc<AtomicUsize>) {
            let reads = Arc::new(AtomicUsize::new(0));
            let source = Self {
                modified: Mutex::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1000)),
                text: Mutex::new(text.to_string()),
                reads: Arc::clone(&reads),
            };
            (source, reads)
        }
    }

    impl LayerSource for Arc<MemorySource> {
        fn modified(&self) -> io::Result<SystemTime> {
            Ok(*self.modified.lock())
        }

        fn read(&self) -> io::Result<String> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.text.lock().clone())
        }

        fn describe(&self) -> String {
            "memory".into()
        }
    }

    const STORE: &str = r#"{
        "wfstlayers": [
            {"id": "roads", "url": "/wfs/roads", "caption": "Roads", "layers": ["app:roads"]},
            {"id": "parcels", "url": "https://maps.example.com/wfs", "caption": "Parcels",
             "layers": ["app:parcels", "app:buildings"], "visibleForGroups": ["planners"],
             "infoUrl": "https://example.com/parcels"},
            {"id": "roads", "url": "/wfs/other", "caption": "Duplicate", "layers": []},
            {"id": "internal", "url": "http://127.0.0.1:8080/wfs", "caption": "Bad", "layers": ["x"]}
        ]
    }"#;

    fn registry(source: impl LayerSource + 'static) -> LayerRegistry {
        LayerRegistry::new(
            Box::new(source),
            RequestValidator::new(Vec::new(), 10_000),
            Arc::new(MetricsRegistry::new()),
        )
    }

    fn ready(state: StoreState) -> Arc<LayerStoreCache> {
        match state {
            StoreState::Ready(store) => store,
            StoreState::Unavailable(reason) => panic!("store unavailable: {reason}"),
        }
    }

    #[tokio::test]
    async fn test_same_mtime_returns_same_snapshot() {
        let (source, reads) = MemorySource::new(STORE);
        let registry = registry(Arc::new(source));

        let first = ready(registry.get_store().await);
        let second = ready(registry.get_store().await);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mtime_change_reparses_once() {
        let (source, reads) = MemorySource::new(STORE);
        let source = Arc::new(source);
        let registry = registry(Arc::clone(&source));

        let before = ready(registry.get_store().await);
        *source.text.lock() = r#"{"wfstlayers": [{"id": "new", "url": "/wfs", "layers": []}]}"#.into();
        *source.modified.lock() += Duration::from_secs(5);

        let after = ready(registry.get_store().await);
        let again = ready(registry.get_store().await);
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(Arc::ptr_eq(&after, &again));
        assert_eq!(reads.load(Ordering::SeqCst), 2);
        assert!(after.get("roads").is_none());
        assert!(after.get("new").is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_loads_single_flight() {
        let (source, reads) = MemorySource::new(STORE);
        let registry = Arc::new(registry(Arc::new(source)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move { ready(registry.get_store().await) }));
        }
        let mut stores = Vec::new();
        for handle in handles {
            stores.push(handle.await.unwrap());
        }
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert!(stores.iter().all(|s| Arc::ptr_eq(s, &stores[0])));
    }

    #[test]
    fn test_duplicates_first_wins_and_extra_keys_kept() {
        let store = LayerStoreCache::parse(STORE, SystemTime::UNIX_EPOCH).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.get("roads").unwrap().caption, "Roads");

        let parcels = store.get("parcels").unwrap();
        assert_eq!(parcels.extra["infoUrl"], "https://example.com/parcels");
        let json = parcels.to_json();
        assert_eq!(json["visibleForGroups"][0], "planners");
        assert_eq!(json["infoUrl"], "https://example.com/parcels");
        assert!(parcels.serves("app:buildings"));
        assert!(!parcels.serves("app:roads"));
    }

    #[test]
    fn test_visibility() {
        let store = LayerStoreCache::parse(STORE, SystemTime::UNIX_EPOCH).unwrap();
        let roads = store.get("roads").unwrap();
        let parcels = store.get("parcels").unwrap();
        assert!(roads.is_visible_to(&[]));
        assert!(!parcels.is_visible_to(&["editors".to_string()]));
        assert!(parcels.is_visible_to(&["editors".to_string(), "planners".to_string()]));
    }

    #[tokio::test]
    async fn test_lookup_errors() {
        let (source, _) = MemorySource::new(STORE);
        let registry = registry(Arc::new(source));

        assert_eq!(registry.lookup("roads").await.unwrap().url, "/wfs/roads");
        assert!(registry.lookup("nope").await.unwrap_err().is_not_found());

        let err = registry.lookup("internal").await.unwrap_err();
        assert!(err.is_upstream());
        assert_eq!(err.status, 500);
    }

    #[tokio::test]
    async fn test_parse_failure_clears_cache() {
        let (source, _) = MemorySource::new(STORE);
        let source = Arc::new(source);
        let registry = registry(Arc::clone(&source));
        ready(registry.get_store().await);

        *source.text.lock() = "{ not json".into();
        *source.modified.lock() += Duration::from_secs(1);
        assert!(matches!(
            registry.get_store().await,
            StoreState::Unavailable(_)
        ));
        assert!(registry.cache.lock().await.is_none());

        let err = registry.lookup("roads").await.unwrap_err();
        assert_eq!(err.status, 500);
        assert!(registry.load_uncached().await.is_err());
    }

    #[tokio::test]
    async fn test_slow_source_does_not_block_runtime() {
        struct SlowSource;

        impl LayerSource for SlowSource {
            fn modified(&self) -> io::Result<SystemTime> {
                std::thread::sleep(Duration::from_millis(300));
                Ok(SystemTime::UNIX_EPOCH)
            }

            fn read(&self) -> io::Result<String> {
                Ok(STORE.to_string())
            }

            fn describe(&self) -> String {
                "slow".into()
            }
        }

        // Current-thread runtime: a stat run inline would hold up the sleep.
        let registry = Arc::new(registry(SlowSource));
        let loading = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { ready(registry.get_store().await).len() }
        });

        let started = std::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(loading.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_file_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(STORE.as_bytes()).unwrap();
        file.flush().unwrap();

        let registry = registry(FileLayerSource::new(file.path()));
        assert_eq!(ready(registry.get_store().await).len(), 3);
        assert_eq!(registry.load_uncached().await.unwrap().len(), 3);
        assert_eq!(registry.describe(), file.path().display().to_string());
    }

    #[tokio::test]
    async fn test_missing_file_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(FileLayerSource::new(dir.path().join("missing.json")));
        assert!(matches!(
            registry.get_store().await,
            StoreState::Unavailable(_)
        ));
    }
}
