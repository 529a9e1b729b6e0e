//! The symbol index (`spec.md` §4.4): the in-memory multi-index, its
//! query engine, and the incremental-refresh orchestrator. This is the
//! hard core the rest of the crate exists to feed.
//!
//! `SymbolIndex` is a cheap `Arc`-backed handle; `SymbolIndexInner` owns
//! the five derived maps behind a single `tokio::sync::Mutex` so that
//! mutating operations serialize per `spec.md` §5, while fanout during
//! `index_files`/`update_incremental` happens over per-file tasks that
//! return their computed symbols to this single owner.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use futures::stream::{self, StreamExt};
use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use url::Url;

use crate::cache::PersistentCache;
use crate::error::LsmcpError;
use crate::events::{EventBus, IndexEvent};
use crate::fs::FileSystem;
use crate::model::symbol::{FileSymbols, IndexedSymbol, SymbolKind};
use crate::model::query::SymbolQuery;
use crate::provider::lsp_provider::language_id_for_extension;
use crate::provider::SymbolProvider;
use crate::vcs::{filter_recognized_extensions, VcsProbe};

/// Default bounded-parallelism fanout over files, per `spec.md` §5.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// A cooperative cancellation flag, checked between batches by
/// `index_files`/`update_incremental` (`spec.md` §5).
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options for [`SymbolIndex::index_files`] (`spec.md` §4.4.2).
/// `skip_failures` is a required field, not defaulted: the source is
/// inconsistent about its default, so the public API forces callers to
/// decide (`SPEC_FULL.md` §9).
#[derive(Clone)]
pub struct IndexFilesOptions {
    pub concurrency: usize,
    pub skip_failures: bool,
    pub batch_size: usize,
    pub on_progress: Option<Arc<dyn Fn(usize, usize) + Send + Sync>>,
    pub cancellation: Option<CancellationToken>,
}

impl IndexFilesOptions {
    pub fn new(skip_failures: bool) -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            skip_failures,
            batch_size: DEFAULT_CONCURRENCY,
            on_progress: None,
            cancellation: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }
}

impl std::fmt::Debug for IndexFilesOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexFilesOptions")
            .field("concurrency", &self.concurrency)
            .field("skip_failures", &self.skip_failures)
            .field("batch_size", &self.batch_size)
            .field("has_cancellation", &self.cancellation.is_some())
            .finish()
    }
}

/// Options for [`SymbolIndex::update_incremental`]. Per-file errors are
/// always captured rather than aborting (`spec.md` §4.4.6 step 6), so
/// unlike `IndexFilesOptions` there is no `skip_failures` field.
#[derive(Debug, Clone)]
pub struct UpdateIncrementalOptions {
    pub batch_size: usize,
    pub cancellation: Option<CancellationToken>,
}

impl Default for UpdateIncrementalOptions {
    fn default() -> Self {
        Self { batch_size: DEFAULT_CONCURRENCY, cancellation: None }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexFilesReport {
    pub indexed: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct IncrementalUpdateResult {
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub errors: Vec<String>,
}

/// Aggregate counters held alongside the four derived maps
/// (`spec.md` §3). `cache_hits`/`cache_misses` are a `SPEC_FULL.md`
/// §3 supplement for project-overview style summaries; they
/// participate in no invariant.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub total_files: usize,
    pub total_symbols: usize,
    pub cumulative_indexing_time_ms: u64,
    pub last_update_ms: i64,
    pub last_commit_hash: Option<String>,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// The five maps mutated atomically from the single logical owner
/// (`spec.md` §3). `name_index`/`kind_index`/`container_index` are
/// derived from `file_index` and are kept in sync on every insert and
/// removal; sets that become empty are pruned (invariant 6).
#[derive(Default)]
struct SymbolIndexState {
    file_index: FxHashMap<Url, FileSymbols>,
    name_index: FxHashMap<String, HashSet<Url>>,
    kind_index: FxHashMap<SymbolKind, HashSet<Url>>,
    container_index: FxHashMap<String, HashSet<Url>>,
    stats: IndexStats,
}

impl SymbolIndexState {
    /// Removes `uri` from `file_index` and every derived set it
    /// appeared in, pruning sets left empty. A no-op if `uri` isn't
    /// indexed.
    fn remove_uri(&mut self, uri: &Url) {
        let Some(record) = self.file_index.remove(uri) else { return };
        let removed_count = record.total_symbol_count();
        for symbol in record.iter_all() {
            prune(&mut self.name_index, &symbol.name, uri);
            prune(&mut self.kind_index, &symbol.kind, uri);
            if let Some(container) = &symbol.container_name {
                prune(&mut self.container_index, container, uri);
            }
        }
        self.stats.total_files = self.file_index.len();
        self.stats.total_symbols = self.stats.total_symbols.saturating_sub(removed_count);
    }

    /// Installs `record` for `uri`, assuming any previous record for
    /// `uri` has already been removed by the caller (exactly-once
    /// update semantics live in [`SymbolIndex::install`]).
    fn insert(&mut self, uri: Url, record: FileSymbols) {
        let added_count = record.total_symbol_count();
        for symbol in record.iter_all() {
            self.name_index.entry(symbol.name.clone()).or_default().insert(uri.clone());
            self.kind_index.entry(symbol.kind).or_default().insert(uri.clone());
            if let Some(container) = &symbol.container_name {
                self.container_index.entry(container.clone()).or_default().insert(uri.clone());
            }
        }
        self.file_index.insert(uri, record);
        self.stats.total_files = self.file_index.len();
        self.stats.total_symbols += added_count;
    }
}

fn prune<K: std::hash::Hash + Eq>(index: &mut FxHashMap<K, HashSet<Url>>, key: &K, uri: &Url) {
    if let Some(set) = index.get_mut(key) {
        set.remove(uri);
        if set.is_empty() {
            index.remove(key);
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn system_time_to_ms(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

struct SymbolIndexInner {
    state: AsyncMutex<SymbolIndexState>,
    provider: Arc<dyn SymbolProvider>,
    cache: Arc<PersistentCache>,
    vcs: Arc<dyn VcsProbe>,
    fs: Arc<dyn FileSystem>,
    events: EventBus,
    workspace_root: PathBuf,
    recognized_extensions: Vec<String>,
}

/// A cheap, `Clone`-able handle onto the shared index state
/// (`SPEC_FULL.md` §4.4's ownership model: an `Arc<SymbolIndexInner>`
/// mirroring the teacher's `Arc`-wrapped-collaborators-behind-a-facade
/// shape).
#[derive(Clone)]
pub struct SymbolIndex {
    inner: Arc<SymbolIndexInner>,
}

impl SymbolIndex {
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        provider: Arc<dyn SymbolProvider>,
        cache: Arc<PersistentCache>,
        vcs: Arc<dyn VcsProbe>,
        fs: Arc<dyn FileSystem>,
        recognized_extensions: Vec<String>,
    ) -> Self {
        Self {
            inner: Arc::new(SymbolIndexInner {
                state: AsyncMutex::new(SymbolIndexState::default()),
                provider,
                cache,
                vcs,
                fs,
                events: EventBus::new(),
                workspace_root: workspace_root.into(),
                recognized_extensions,
            }),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub async fn stats(&self) -> IndexStats {
        self.inner.state.lock().await.stats.clone()
    }

    /// True after a schema bump wiped the persistent cache; callers
    /// should treat this as "a full re-index is required" and call
    /// [`SymbolIndex::mark_cache_reindex_complete`] once done.
    pub fn cache_requires_reindexing(&self) -> bool {
        self.inner.cache.requires_reindexing()
    }

    pub fn mark_cache_reindex_complete(&self) {
        self.inner.cache.mark_reindex_complete();
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.inner.workspace_root.join(p)
        }
    }

    fn path_to_uri(&self, path: &str) -> Result<Url, LsmcpError> {
        let abs = self.resolve_path(path);
        Url::from_file_path(&abs)
            .map_err(|_| LsmcpError::Other(format!("not a representable file path: {path}")))
    }

    /// Prefers the VCS blob hash; falls back to a content hash so the
    /// cache stays content-addressed even outside a repository
    /// (`Cargo.toml`'s `blake3` dependency covers this fallback).
    async fn compute_blob_hash(&self, path: &str, content: &str) -> String {
        match self.inner.vcs.blob_hash(path).await {
            Ok(Some(hash)) => hash,
            _ => format!("blake3:{}", blake3::hash(content.as_bytes()).to_hex()),
        }
    }

    /// Exactly-once update: removes any previous record for `uri` from
    /// the derived indices before installing the new one (`spec.md`
    /// §4.4.1).
    async fn install(&self, uri: Url, record: FileSymbols, from_cache: bool, elapsed_ms: u64) {
        let mut state = self.inner.state.lock().await;
        state.remove_uri(&uri);
        state.insert(uri, record);
        state.stats.last_update_ms = now_ms();
        state.stats.cumulative_indexing_time_ms += elapsed_ms;
        if from_cache {
            state.stats.cache_hits += 1;
        } else {
            state.stats.cache_misses += 1;
        }
    }

    /// `spec.md` §4.4.1: consults the cache, falls back to the symbol
    /// provider on miss, and emits the matching event. Never alters
    /// state on provider failure.
    pub async fn index_file(&self, path: &str) -> Result<(), LsmcpError> {
        let uri = self.path_to_uri(path)?;
        let abs_path = self.resolve_path(path);
        let content = self.inner.fs.read_file(&abs_path).await.ok();
        let blob_hash = self.compute_blob_hash(path, content.as_deref().unwrap_or("")).await;

        if let Some(symbols) = self.inner.cache.get(path, &blob_hash) {
            let count: usize = symbols.iter().map(IndexedSymbol::count_including_descendants).sum();
            let record =
                FileSymbols { uri: uri.clone(), last_indexed_ms: now_ms(), blob_hash: Some(blob_hash), symbols };
            self.install(uri.clone(), record, true, 0).await;
            self.inner.events.emit(IndexEvent::FileIndexed { uri, symbol_count: count, from_cache: true });
            return Ok(());
        }

        let provider_start = Instant::now();
        let raw = match self.inner.provider.get_document_symbols(&uri).await {
            Ok(raw) => raw,
            Err(e) => {
                self.inner.events.emit(IndexEvent::IndexError { uri: uri.clone(), error: e.to_record() });
                return Err(e);
            }
        };
        let elapsed_ms = provider_start.elapsed().as_millis() as u64;

        let language_id = language_id_for_extension(&abs_path);
        let symbols = crate::provider::normalize(&uri, raw, language_id, content.as_deref());

        if let Err(e) = self.inner.cache.set(path, &blob_hash, &symbols) {
            tracing::warn!(path, error = %e, "failed to persist symbols to cache");
        }

        let count: usize = symbols.iter().map(IndexedSymbol::count_including_descendants).sum();
        let record = FileSymbols { uri: uri.clone(), last_indexed_ms: now_ms(), blob_hash: Some(blob_hash), symbols };
        self.install(uri.clone(), record, false, elapsed_ms).await;
        self.inner.events.emit(IndexEvent::FileIndexed { uri, symbol_count: count, from_cache: false });
        Ok(())
    }

    /// `spec.md` §4.4.2: bounded-parallelism fanout in batches of
    /// `options.batch_size`, with up to `options.concurrency` per-file
    /// tasks in flight at once. When `skip_failures` is unset, the
    /// first per-file error is surfaced once the in-flight batch
    /// drains; the error is still recorded in the returned report.
    pub async fn index_files(
        &self,
        paths: &[String],
        options: IndexFilesOptions,
    ) -> Result<IndexFilesReport, LsmcpError> {
        let start = Instant::now();
        self.inner.events.emit(IndexEvent::IndexingStarted { file_count: paths.len() });

        let mut report = IndexFilesReport::default();
        let mut abort_error: Option<LsmcpError> = None;
        let total = paths.len();
        let batch_size = options.batch_size.max(1);
        let concurrency = options.concurrency.max(1);

        for (batch_idx, chunk) in paths.chunks(batch_size).enumerate() {
            let results: Vec<(String, Result<(), LsmcpError>)> = stream::iter(chunk.iter().cloned())
                .map(|path| {
                    let this = self.clone();
                    async move {
                        let result = this.index_file(&path).await;
                        (path, result)
                    }
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

            for (path, result) in results {
                match result {
                    Ok(()) => report.indexed.push(path),
                    Err(e) => {
                        report.errors.push(format!("{path}: {e}"));
                        if !options.skip_failures && abort_error.is_none() {
                            abort_error = Some(e);
                        }
                    }
                }
            }

            let current = ((batch_idx + 1) * batch_size).min(total);
            if let Some(cb) = &options.on_progress {
                cb(current, total);
            }
            self.inner.events.emit(IndexEvent::Progress { current, total });

            let cancelled = options.cancellation.as_ref().is_some_and(CancellationToken::is_cancelled);
            if abort_error.is_some() || cancelled {
                break;
            }
        }

        if let Ok(hash) = self.inner.vcs.current_commit_hash().await {
            self.inner.state.lock().await.stats.last_commit_hash = Some(hash);
        }

        self.inner.events.emit(IndexEvent::IndexingCompleted { duration_ms: start.elapsed().as_millis() as u64 });

        match abort_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// `spec.md` §4.4.4: removes the file-symbols record and prunes it
    /// from every derived set.
    pub async fn remove_file(&self, path: &str) -> Result<(), LsmcpError> {
        let uri = self.path_to_uri(path)?;
        {
            let mut state = self.inner.state.lock().await;
            state.remove_uri(&uri);
        }
        self.inner.events.emit(IndexEvent::FileRemoved { uri });
        Ok(())
    }

    /// `spec.md` §4.4.5: resets all in-memory state and stats.
    pub async fn clear(&self) {
        {
            let mut state = self.inner.state.lock().await;
            *state = SymbolIndexState::default();
        }
        self.inner.events.emit(IndexEvent::Cleared);
    }

    /// `clear` plus emptying the persistent cache.
    pub async fn force_clear(&self) -> Result<(), LsmcpError> {
        self.clear().await;
        self.inner.cache.clear()
    }

    /// `spec.md` §4.4.3: intersects per-predicate candidate URI sets
    /// drawn from the derived indices, then walks each candidate
    /// file's tree applying every supplied predicate per node.
    pub async fn query_symbols(&self, query: &SymbolQuery) -> Vec<IndexedSymbol> {
        let state = self.inner.state.lock().await;

        let mut candidate: Option<HashSet<Url>> = None;

        if let Some(name) = &query.name {
            let mut set = HashSet::new();
            for (key, uris) in state.name_index.iter() {
                if key.contains(name.as_str()) {
                    set.extend(uris.iter().cloned());
                }
            }
            candidate = Some(intersect(candidate, set));
        }
        if let Some(kinds) = &query.kind {
            let mut set = HashSet::new();
            for kind in kinds {
                if let Some(uris) = state.kind_index.get(kind) {
                    set.extend(uris.iter().cloned());
                }
            }
            candidate = Some(intersect(candidate, set));
        }
        if let Some(container) = &query.container_name {
            let set = state.container_index.get(container).cloned().unwrap_or_default();
            candidate = Some(intersect(candidate, set));
        }
        if let Some(file) = &query.file {
            let set = match self.path_to_uri(file) {
                Ok(uri) if state.file_index.contains_key(&uri) => HashSet::from([uri]),
                _ => HashSet::new(),
            };
            candidate = Some(intersect(candidate, set));
        }

        let mut uris: Vec<&Url> = match &candidate {
            Some(set) => set.iter().collect(),
            None => state.file_index.keys().collect(),
        };
        uris.sort_by_key(|u| u.as_str());

        let mut results = Vec::new();
        for uri in uris {
            let Some(record) = state.file_index.get(uri) else { continue };
            for root in &record.symbols {
                collect_matches(root, query, query.include_children, &mut results);
            }
        }
        results
    }

    /// `spec.md` §4.4.7: absent from the index, a newer on-disk mtime,
    /// or a differing VCS blob hash all force a reindex; I/O errors are
    /// conservative and also force one.
    pub async fn needs_reindex(&self, path: &str) -> bool {
        self.needs_reindex_inner(path).await.unwrap_or(true)
    }

    async fn needs_reindex_inner(&self, path: &str) -> Result<bool, LsmcpError> {
        let uri = self.path_to_uri(path)?;
        let record = {
            let state = self.inner.state.lock().await;
            match state.file_index.get(&uri) {
                Some(record) => record.clone(),
                None => return Ok(true),
            }
        };

        let abs_path = self.resolve_path(path);
        let stat = self.inner.fs.stat(&abs_path).await?;
        if system_time_to_ms(stat.modified) > record.last_indexed_ms {
            return Ok(true);
        }

        match self.inner.vcs.blob_hash(path).await {
            Ok(Some(current)) => Ok(record.blob_hash.as_deref() != Some(current.as_str())),
            // Blob hash unavailable: fall back to the mtime check alone.
            Ok(None) | Err(_) => Ok(false),
        }
    }

    /// `spec.md` §4.4.6: the incremental-refresh protocol. Probes the
    /// current commit hash and the previously captured baseline,
    /// unions modified + recognized untracked files, then applies each
    /// candidate (remove if deleted on disk, else re-index), capturing
    /// per-file errors without aborting.
    pub async fn update_incremental(&self, options: UpdateIncrementalOptions) -> IncrementalUpdateResult {
        let mut result = IncrementalUpdateResult::default();

        if !self.inner.vcs.is_repository().await {
            result.errors.push("Not a git repository".to_string());
            return result;
        }

        let current_hash = match self.inner.vcs.current_commit_hash().await {
            Ok(hash) => hash,
            Err(e) => {
                result.errors.push(e.to_string());
                return result;
            }
        };

        let last_hash = self.inner.state.lock().await.stats.last_commit_hash.clone();
        let Some(last_hash) = last_hash else {
            result.errors.push("No previous git hash found".to_string());
            return result;
        };

        let modified = match self.inner.vcs.changed_since(&last_hash).await {
            Ok(v) => v,
            Err(e) => {
                result.errors.push(e.to_string());
                return result;
            }
        };
        let untracked = match self.inner.vcs.untracked_files().await {
            Ok(v) => v,
            Err(e) => {
                result.errors.push(e.to_string());
                return result;
            }
        };
        let extensions: Vec<&str> = self.inner.recognized_extensions.iter().map(String::as_str).collect();
        let filtered_untracked = filter_recognized_extensions(&untracked, &extensions);

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for path in modified.into_iter().chain(filtered_untracked) {
            if seen.insert(path.clone()) {
                candidates.push(path);
            }
        }

        let total = candidates.len();
        let batch_size = options.batch_size.max(1);

        for (batch_idx, chunk) in candidates.chunks(batch_size).enumerate() {
            for path in chunk {
                let abs = self.resolve_path(path);
                if !self.inner.fs.exists(&abs).await {
                    match self.remove_file(path).await {
                        Ok(()) => result.removed.push(path.clone()),
                        Err(e) => result.errors.push(format!("{path}: {e}")),
                    }
                } else {
                    match self.index_file(path).await {
                        Ok(()) => result.updated.push(path.clone()),
                        Err(e) => result.errors.push(format!("{path}: {e}")),
                    }
                }
            }

            let current = ((batch_idx + 1) * batch_size).min(total);
            self.inner.events.emit(IndexEvent::Progress { current, total });

            if options.cancellation.as_ref().is_some_and(CancellationToken::is_cancelled) {
                break;
            }
        }

        let mut state = self.inner.state.lock().await;
        state.stats.last_commit_hash = Some(current_hash);
        state.stats.last_update_ms = now_ms();

        result
    }
}

fn intersect(acc: Option<HashSet<Url>>, set: HashSet<Url>) -> HashSet<Url> {
    match acc {
        None => set,
        Some(prev) => prev.intersection(&set).cloned().collect(),
    }
}

/// Depth-first match collection for `query_symbols`. When
/// `include_children` is true, every node is visited regardless of
/// whether its parent matched; when false, a matching node's subtree is
/// not descended into (`spec.md` §4.4.3).
fn collect_matches(node: &IndexedSymbol, query: &SymbolQuery, include_children: bool, out: &mut Vec<IndexedSymbol>) {
    let matched = query.matches(node);
    if matched {
        out.push(node.clone());
    }
    if include_children || !matched {
        for child in &node.children {
            collect_matches(child, query, include_children, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFileSystem;
    use crate::model::position::{Location, Position, Range};
    use crate::provider::static_provider::StaticSymbolProvider;
    use crate::provider::{RawSymbolDescriptor, RawTreeSymbol};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap as StdHashMap;

    struct FakeVcs {
        is_repo: bool,
        current_hash: Mutex<String>,
        changed: Mutex<Vec<String>>,
        untracked: Mutex<Vec<String>>,
        blob_hashes: Mutex<StdHashMap<String, String>>,
    }

    impl Default for FakeVcs {
        fn default() -> Self {
            Self {
                is_repo: true,
                current_hash: Mutex::new(String::new()),
                changed: Mutex::new(Vec::new()),
                untracked: Mutex::new(Vec::new()),
                blob_hashes: Mutex::new(StdHashMap::new()),
            }
        }
    }

    #[async_trait]
    impl VcsProbe for FakeVcs {
        async fn current_commit_hash(&self) -> Result<String, LsmcpError> {
            Ok(self.current_hash.lock().clone())
        }
        async fn changed_since(&self, _hash: &str) -> Result<Vec<String>, LsmcpError> {
            Ok(self.changed.lock().clone())
        }
        async fn untracked_files(&self) -> Result<Vec<String>, LsmcpError> {
            Ok(self.untracked.lock().clone())
        }
        async fn blob_hash(&self, path: &str) -> Result<Option<String>, LsmcpError> {
            Ok(self.blob_hashes.lock().get(path).cloned())
        }
        async fn is_repository(&self) -> bool {
            self.is_repo
        }
    }

    fn tree_symbol(name: &str, kind: SymbolKind, children: Vec<RawTreeSymbol>) -> RawTreeSymbol {
        RawTreeSymbol {
            name: name.to_string(),
            kind: kind as u8,
            range: Range::new(Position::new(0, 0), Position::new(1, 0)),
            selection_range: Range::new(Position::new(0, 0), Position::new(0, 1)),
            detail: None,
            deprecated: false,
            children,
        }
    }

    fn make_index(
        dir: &std::path::Path,
    ) -> (SymbolIndex, Arc<StaticSymbolProvider>, Arc<FakeVcs>, Arc<InMemoryFileSystem>) {
        let provider = Arc::new(StaticSymbolProvider::new());
        let cache = Arc::new(PersistentCache::open(dir).unwrap());
        let vcs = Arc::new(FakeVcs::default());
        let fs = Arc::new(InMemoryFileSystem::new());
        let index = SymbolIndex::new(
            dir.to_path_buf(),
            provider.clone(),
            cache,
            vcs.clone(),
            fs.clone(),
            vec!["ts".to_string()],
        );
        (index, provider, vcs, fs)
    }

    /// Scenario 1: single-file tree with a Class containing a
    /// Constructor and two Methods.
    #[tokio::test]
    async fn single_file_tree_indexes_all_four_symbols() {
        let dir = tempfile::tempdir().unwrap();
        let (index, provider, _vcs, _fs) = make_index(dir.path());
        let uri = Url::from_file_path(dir.path().join("c.ts")).unwrap();

        let calc = tree_symbol(
            "Calc",
            SymbolKind::Class,
            vec![
                tree_symbol("Calc", SymbolKind::Constructor, vec![]),
                tree_symbol("add", SymbolKind::Method, vec![]),
                tree_symbol("sub", SymbolKind::Method, vec![]),
            ],
        );
        provider.set(uri, vec![RawSymbolDescriptor::Tree(calc)]);

        index.index_file("c.ts").await.unwrap();
        let stats = index.stats().await;
        assert_eq!(stats.total_files, 1);
        assert_eq!(stats.total_symbols, 4);

        let results = index.query_symbols(&SymbolQuery::new().with_name("add")).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "add");
        assert_eq!(results[0].container_name.as_deref(), Some("Calc"));
    }

    /// Scenario 2: a second `index_file` against an unchanged file is
    /// served from cache; the provider is not invoked again.
    #[tokio::test]
    async fn reindexing_unchanged_file_is_a_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let (index, provider, _vcs, _fs) = make_index(dir.path());
        let uri = Url::from_file_path(dir.path().join("c.ts")).unwrap();
        provider.set(uri.clone(), vec![RawSymbolDescriptor::Tree(tree_symbol("X", SymbolKind::Variable, vec![]))]);

        index.index_file("c.ts").await.unwrap();
        assert_eq!(provider.calls_for(&uri), 1);

        index.index_file("c.ts").await.unwrap();
        assert_eq!(provider.calls_for(&uri), 1, "cache hit must not re-invoke the provider");

        let stats = index.stats().await;
        assert_eq!(stats.total_symbols, 1, "re-indexing unchanged content must not duplicate symbols");
        assert_eq!(stats.cache_hits, 1);
    }

    /// Scenario 4: kind-filter intersection over Class/Interface/Function.
    #[tokio::test]
    async fn kind_filter_returns_exact_intersection() {
        let dir = tempfile::tempdir().unwrap();
        let (index, provider, _vcs, _fs) = make_index(dir.path());
        let uri = Url::from_file_path(dir.path().join("a.ts")).unwrap();
        provider.set(
            uri,
            vec![
                RawSymbolDescriptor::Tree(tree_symbol("X", SymbolKind::Class, vec![])),
                RawSymbolDescriptor::Tree(tree_symbol("Y", SymbolKind::Interface, vec![])),
                RawSymbolDescriptor::Tree(tree_symbol("f", SymbolKind::Function, vec![])),
            ],
        );
        index.index_file("a.ts").await.unwrap();

        let results =
            index.query_symbols(&SymbolQuery::new().with_kind(vec![SymbolKind::Class, SymbolKind::Interface])).await;
        let names: Vec<&str> = results.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["X", "Y"]);
    }

    #[tokio::test]
    async fn query_symbols_empty_returns_every_symbol_once() {
        let dir = tempfile::tempdir().unwrap();
        let (index, provider, _vcs, _fs) = make_index(dir.path());
        let uri = Url::from_file_path(dir.path().join("a.ts")).unwrap();
        provider.set(
            uri,
            vec![RawSymbolDescriptor::Tree(tree_symbol(
                "Calc",
                SymbolKind::Class,
                vec![tree_symbol("add", SymbolKind::Method, vec![])],
            ))],
        );
        index.index_file("a.ts").await.unwrap();

        let all_with_children = index.query_symbols(&SymbolQuery::new()).await;
        assert_eq!(all_with_children.len(), 2);

        let top_level_only = index.query_symbols(&SymbolQuery::new().with_include_children(false)).await;
        assert_eq!(top_level_only.len(), 1);
        assert_eq!(top_level_only[0].name, "Calc");
    }

    #[tokio::test]
    async fn remove_file_prunes_every_derived_set() {
        let dir = tempfile::tempdir().unwrap();
        let (index, provider, _vcs, _fs) = make_index(dir.path());
        let uri = Url::from_file_path(dir.path().join("a.ts")).unwrap();
        provider.set(uri, vec![RawSymbolDescriptor::Tree(tree_symbol("X", SymbolKind::Class, vec![]))]);
        index.index_file("a.ts").await.unwrap();

        index.remove_file("a.ts").await.unwrap();
        let stats = index.stats().await;
        assert_eq!(stats.total_files, 0);
        assert_eq!(stats.total_symbols, 0);
        assert!(index.query_symbols(&SymbolQuery::new().with_name("X")).await.is_empty());
    }

    /// Scenario 3: incremental diff picks up a modified file and a new
    /// untracked file, and drops a deleted one.
    #[tokio::test]
    async fn incremental_update_applies_modified_untracked_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let (index, provider, vcs, fs) = make_index(dir.path());

        let a_uri = Url::from_file_path(dir.path().join("a.ts")).unwrap();
        let b_uri = Url::from_file_path(dir.path().join("b.ts")).unwrap();
        let c_uri = Url::from_file_path(dir.path().join("c.ts")).unwrap();
        provider.set(a_uri.clone(), vec![RawSymbolDescriptor::Tree(tree_symbol("A", SymbolKind::Class, vec![]))]);
        provider.set(b_uri.clone(), vec![RawSymbolDescriptor::Tree(tree_symbol("B", SymbolKind::Class, vec![]))]);
        provider.set(c_uri.clone(), vec![RawSymbolDescriptor::Tree(tree_symbol("C", SymbolKind::Class, vec![]))]);

        // a.ts and b.ts still exist on disk; c.ts is absent, simulating a deletion.
        fs.insert(dir.path().join("a.ts"), "class A {}", std::time::SystemTime::now());
        fs.insert(dir.path().join("b.ts"), "class B {}", std::time::SystemTime::now());

        // Establish a baseline with a.ts and c.ts indexed, and capture a commit hash.
        *vcs.current_hash.lock() = "h1".to_string();
        index.index_files(&["a.ts".to_string(), "c.ts".to_string()], IndexFilesOptions::new(false)).await.unwrap();
        assert_eq!(index.stats().await.last_commit_hash.as_deref(), Some("h1"));

        // a.ts modified, b.ts new/untracked, c.ts deleted from disk.
        *vcs.current_hash.lock() = "h2abcdef".to_string();
        *vcs.changed.lock() = vec!["a.ts".to_string(), "c.ts".to_string()];
        *vcs.untracked.lock() = vec!["b.ts".to_string(), "readme.md".to_string()];
        // c.ts no longer exists on disk (the in-memory FS just never had it).

        let result = index.update_incremental(UpdateIncrementalOptions::default()).await;
        assert_eq!(result.errors, Vec::<String>::new());
        assert_eq!(result.updated, vec!["a.ts".to_string(), "b.ts".to_string()]);
        assert_eq!(result.removed, vec!["c.ts".to_string()]);
        assert_eq!(index.stats().await.last_commit_hash.as_deref(), Some("h2abcdef"));
    }

    #[tokio::test]
    async fn incremental_update_without_prior_hash_asks_for_full_reindex() {
        let dir = tempfile::tempdir().unwrap();
        let (index, _provider, vcs) = make_index(dir.path());
        *vcs.current_hash.lock() = "h1".to_string();

        let result = index.update_incremental(UpdateIncrementalOptions::default()).await;
        assert_eq!(result.errors, vec!["No previous git hash found".to_string()]);
    }

    #[tokio::test]
    async fn incremental_update_twice_with_no_changes_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (index, _provider, vcs) = make_index(dir.path());
        *vcs.current_hash.lock() = "h1".to_string();
        index.index_files(&[], IndexFilesOptions::new(false)).await.unwrap();

        let first = index.update_incremental(UpdateIncrementalOptions::default()).await;
        assert_eq!(first, IncrementalUpdateResult::default());
        let second = index.update_incremental(UpdateIncrementalOptions::default()).await;
        assert_eq!(second, IncrementalUpdateResult::default());
    }

    #[tokio::test]
    async fn needs_reindex_is_true_for_unindexed_file() {
        let dir = tempfile::tempdir().unwrap();
        let (index, _provider, _vcs) = make_index(dir.path());
        assert!(index.needs_reindex("missing.ts").await);
    }
}
