//! Offline asset cache: precaches the application shell, cleans up caches
//! from older versions, and answers fetches from cache or network.

use crossbeam_channel::{Receiver, Sender};
use strum::{AsRefStr, Display};
use thiserror::Error;

use crate::config::OfflineOptions;

pub mod cache;
pub mod fetch;
mod patterns;

pub use cache::{CacheError, CacheStorage, MemoryCacheStorage, SqliteCacheStorage};
pub use fetch::{
    split_url, AssetDirFetcher, Destination, FetchError, Fetcher, OfflineFetcher, Request,
    RequestMode, Response, ResponseKind,
};
pub use patterns::UrlPatterns;

const SHELL_FALLBACK: &str = "/index.html";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("cannot {action} while the worker is {state}")]
    InvalidTransition {
        action: &'static str,
        state: WorkerState,
    },
    #[error("precaching {url} failed: {reason}")]
    InstallFailed { url: String, reason: String },
    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The worker declines; the host performs the request itself.
    Passthrough,
    Respond(Response),
    Failed { reason: String },
}

#[derive(Debug)]
struct BackgroundPut {
    key: String,
    response: Response,
}

pub struct OfflineWorker<C: CacheStorage, F: Fetcher> {
    options: OfflineOptions,
    storage: C,
    fetcher: F,
    state: WorkerState,
    passthrough: UrlPatterns,
    font_hosts: UrlPatterns,
    background_tx: Sender<BackgroundPut>,
    background_rx: Receiver<BackgroundPut>,
}

impl<C: CacheStorage, F: Fetcher> OfflineWorker<C, F> {
    pub fn new(options: OfflineOptions, storage: C, fetcher: F) -> Self {
        let (background_tx, background_rx) = crossbeam_channel::unbounded();
        Self {
            passthrough: UrlPatterns::new(&options.passthrough_patterns),
            font_hosts: UrlPatterns::new(&options.font_hosts),
            options,
            storage,
            fetcher,
            state: WorkerState::Parsed,
            background_tx,
            background_rx,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn storage(&self) -> &C {
        &self.storage
    }

    /// The network seam, for callers that handle a `Passthrough` themselves.
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Cache prefix and version this worker owns.
    pub fn cache_identity(&self) -> (&str, &str) {
        (&self.options.cache_prefix, &self.options.version)
    }

    pub fn static_cache(&self) -> String {
        self.options.static_cache_name()
    }

    pub fn dynamic_cache(&self) -> String {
        self.options.dynamic_cache_name()
    }

    /// Precaches every static asset into the versioned static cache. Any
    /// failure leaves nothing behind and retires the worker.
    pub fn install(&mut self) -> Result<usize, WorkerError> {
        self.expect_state(WorkerState::Parsed, "install")?;
        self.state = WorkerState::Installing;
        tracing::info!(cache = %self.static_cache(), assets = self.options.static_assets.len(), "installing offline cache");

        match self.precache() {
            Ok(count) => {
                self.state = WorkerState::Installed;
                tracing::info!(cache = %self.static_cache(), count, "offline cache installed");
                Ok(count)
            }
            Err(err) => {
                self.state = WorkerState::Redundant;
                tracing::error!(%err, "offline cache install failed");
                Err(err)
            }
        }
    }

    fn precache(&self) -> Result<usize, WorkerError> {
        let mut fetched = Vec::with_capacity(self.options.static_assets.len());
        for asset in &self.options.static_assets {
            let request = Request::new(asset.clone()).with_destination(Destination::guess(asset));
            let response = self
                .fetcher
                .fetch(&request)
                .map_err(|err| WorkerError::InstallFailed {
                    url: asset.clone(),
                    reason: err.to_string(),
                })?;
            if !response.is_success() {
                return Err(WorkerError::InstallFailed {
                    url: asset.clone(),
                    reason: format!("status {}", response.status),
                });
            }
            fetched.push((self.cache_key(asset), response));
        }
        self.storage.put_all(&self.static_cache(), &fetched)?;
        Ok(fetched.len())
    }

    /// Deletes caches left by other versions and takes control. Returns the
    /// names of the deleted caches.
    pub fn activate(&mut self) -> Result<Vec<String>, WorkerError> {
        self.expect_state(WorkerState::Installed, "activate")?;
        self.state = WorkerState::Activating;
        match self.purge_stale_caches() {
            Ok(deleted) => {
                self.state = WorkerState::Activated;
                tracing::info!(deleted = deleted.len(), "offline cache activated");
                Ok(deleted)
            }
            Err(err) => {
                self.state = WorkerState::Installed;
                Err(err)
            }
        }
    }

    fn purge_stale_caches(&self) -> Result<Vec<String>, WorkerError> {
        let mut deleted = Vec::new();
        for name in self.storage.keys()? {
            if is_stale(&name, &self.options.cache_prefix, &self.options.version) {
                self.storage.delete(&name)?;
                tracing::debug!(cache = %name, "deleted stale cache");
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    /// Picks up where a previous session left off: a populated static cache
    /// for this version means the worker is already active.
    pub fn resume(&mut self) -> Result<bool, WorkerError> {
        self.expect_state(WorkerState::Parsed, "resume")?;
        let name = self.static_cache();
        let installed = self.storage.keys()?.contains(&name)
            && !self.storage.entries(&name)?.is_empty();
        if installed {
            self.state = WorkerState::Activated;
            tracing::debug!(cache = %name, "resumed active offline cache");
        }
        Ok(installed)
    }

    pub fn handle_fetch(&self, request: &Request) -> FetchOutcome {
        if self.state != WorkerState::Activated {
            return FetchOutcome::Passthrough;
        }
        if let Some(fragment) = self.passthrough.find(&request.url) {
            tracing::trace!(url = %request.url, fragment, "bypassing cache for dev server request");
            return FetchOutcome::Passthrough;
        }
        let key = self.cache_key(&request.url);
        if request.destination.is_static_subresource() || self.font_hosts.is_match(&request.url) {
            self.serve_asset(request, key)
        } else {
            self.serve_other(request, key)
        }
    }

    /// Cache first; fresh 200s are kept; fonts degrade to an empty body.
    fn serve_asset(&self, request: &Request, key: String) -> FetchOutcome {
        if let Some(hit) = self.lookup(&key) {
            return FetchOutcome::Respond(hit);
        }
        match self.fetcher.fetch(request) {
            Ok(response) => {
                if response.status == 200 {
                    self.queue_put(key, &response);
                }
                FetchOutcome::Respond(response)
            }
            Err(err) if request.destination == Destination::Font => {
                tracing::debug!(url = %request.url, %err, "font unavailable, serving empty body");
                FetchOutcome::Respond(Response::empty_ok())
            }
            Err(err) => FetchOutcome::Failed {
                reason: err.to_string(),
            },
        }
    }

    /// Cache, then network; only same-origin 200s are kept; navigations fall
    /// back to the cached shell.
    fn serve_other(&self, request: &Request, key: String) -> FetchOutcome {
        if let Some(hit) = self.lookup(&key) {
            return FetchOutcome::Respond(hit);
        }
        match self.fetcher.fetch(request) {
            Ok(response) => {
                if response.status == 200 && response.kind == ResponseKind::Basic {
                    self.queue_put(key, &response);
                }
                FetchOutcome::Respond(response)
            }
            Err(err) => {
                if request.is_navigation() {
                    if let Some(shell) = self.lookup(SHELL_FALLBACK) {
                        tracing::debug!(url = %request.url, "offline navigation, serving cached shell");
                        return FetchOutcome::Respond(shell);
                    }
                }
                FetchOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    fn lookup(&self, key: &str) -> Option<Response> {
        match self.storage.match_url(key) {
            Ok(hit) => hit,
            Err(err) => {
                tracing::warn!(key, %err, "cache lookup failed, treating as miss");
                None
            }
        }
    }

    fn queue_put(&self, key: String, response: &Response) {
        let put = BackgroundPut {
            key,
            response: response.clone(),
        };
        if self.background_tx.send(put).is_err() {
            tracing::warn!("background cache queue closed");
        }
    }

    /// Applies queued cache writes. Returns how many were stored.
    pub fn drain_background(&self) -> usize {
        let cache = self.dynamic_cache();
        let mut stored = 0;
        for put in self.background_rx.try_iter() {
            match self.storage.put(&cache, &put.key, &put.response) {
                Ok(()) => stored += 1,
                Err(err) => tracing::warn!(key = %put.key, %err, "background cache write failed"),
            }
        }
        stored
    }

    /// Same-origin URLs are keyed by path so `/x` and `<origin>/x` share an
    /// entry.
    pub fn cache_key(&self, url: &str) -> String {
        match split_url(url) {
            (Some(origin), path) if origin == self.options.origin => path.to_string(),
            (None, path) if !path.starts_with('/') => format!("/{path}"),
            _ => url.to_string(),
        }
    }

    fn expect_state(&self, expected: WorkerState, action: &'static str) -> Result<(), WorkerError> {
        if self.state != expected {
            return Err(WorkerError::InvalidTransition {
                action,
                state: self.state,
            });
        }
        Ok(())
    }
}

/// Caches outside the prefix, and prefixed caches of another version, are
/// stale. Matching is by substring.
pub fn is_stale(name: &str, prefix: &str, version: &str) -> bool {
    !name.contains(prefix) || (!name.contains(version) && name.contains(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    const ORIGIN: &str = "http://localhost:5173";

    /// Network double: scripted responses, everything else unreachable.
    #[derive(Clone, Default)]
    struct ScriptedFetcher {
        responses: Arc<Mutex<HashMap<String, Response>>>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedFetcher {
        fn serve(&self, url: &str, response: Response) {
            self.responses.lock().insert(url.to_string(), response);
        }

        fn go_offline(&self) {
            self.responses.lock().clear();
        }

        fn calls(&self) -> usize {
            self.calls.lock().len()
        }
    }

    impl Fetcher for ScriptedFetcher {
        fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
            self.calls.lock().push(request.url.clone());
            self.responses
                .lock()
                .get(&request.url)
                .cloned()
                .ok_or_else(|| FetchError::Unreachable {
                    url: request.url.clone(),
                })
        }
    }

    fn options() -> OfflineOptions {
        OfflineOptions {
            static_assets: vec!["/".into(), "/index.html".into(), "/favicon.ico".into()],
            ..OfflineOptions::default()
        }
    }

    fn shell_fetcher() -> ScriptedFetcher {
        let fetcher = ScriptedFetcher::default();
        fetcher.serve("/", Response::ok("root", None));
        fetcher.serve("/index.html", Response::ok("<shell>", None));
        fetcher.serve("/favicon.ico", Response::ok(vec![1u8], None));
        fetcher
    }

    fn active_worker() -> (OfflineWorker<MemoryCacheStorage, ScriptedFetcher>, ScriptedFetcher) {
        let fetcher = shell_fetcher();
        let mut worker = OfflineWorker::new(options(), MemoryCacheStorage::new(), fetcher.clone());
        worker.install().expect("install");
        worker.activate().expect("activate");
        (worker, fetcher)
    }

    fn body(outcome: FetchOutcome) -> Vec<u8> {
        match outcome {
            FetchOutcome::Respond(response) => response.body,
            other => panic!("expected a response, got {other:?}"),
        }
    }

    #[test]
    fn install_precaches_every_static_asset() -> anyhow::Result<()> {
        let storage = MemoryCacheStorage::new();
        let mut worker = OfflineWorker::new(options(), storage.clone(), shell_fetcher());
        assert_eq!(worker.install()?, 3);
        assert_eq!(worker.state(), WorkerState::Installed);
        assert_eq!(
            storage.entries("grocery-static-v1")?,
            vec!["/", "/favicon.ico", "/index.html"]
        );
        Ok(())
    }

    #[test]
    fn install_is_all_or_nothing() -> anyhow::Result<()> {
        let fetcher = shell_fetcher();
        fetcher.serve("/favicon.ico", Response::status(404));
        let storage = MemoryCacheStorage::new();
        let mut worker = OfflineWorker::new(options(), storage.clone(), fetcher);
        assert_matches!(
            worker.install(),
            Err(WorkerError::InstallFailed { url, .. }) if url == "/favicon.ico"
        );
        assert_eq!(worker.state(), WorkerState::Redundant);
        assert!(storage.keys()?.is_empty());
        assert_matches!(worker.activate(), Err(WorkerError::InvalidTransition { .. }));
        Ok(())
    }

    #[test]
    fn activate_purges_foreign_and_old_caches() -> anyhow::Result<()> {
        let storage = MemoryCacheStorage::new();
        storage.open("grocery-static-v0")?;
        storage.open("grocery-dynamic-v0")?;
        storage.open("someone-elses-cache")?;
        storage.open("grocery-dynamic-v1")?;
        let mut worker = OfflineWorker::new(options(), storage.clone(), shell_fetcher());
        worker.install()?;
        let deleted = worker.activate()?;
        assert_eq!(
            deleted,
            vec!["grocery-static-v0", "grocery-dynamic-v0", "someone-elses-cache"]
        );
        assert_eq!(storage.keys()?, vec!["grocery-dynamic-v1", "grocery-static-v1"]);
        assert_eq!(worker.state(), WorkerState::Activated);
        Ok(())
    }

    #[test]
    fn stale_predicate_matches_by_substring() {
        assert!(is_stale("other-static-v1", "grocery-", "v1"));
        assert!(is_stale("grocery-static-v2", "grocery-", "v1"));
        assert!(!is_stale("grocery-static-v1", "grocery-", "v1"));
        // "v1" is a substring of "v10", so a newer cache survives.
        assert!(!is_stale("grocery-static-v10", "grocery-", "v1"));
    }

    #[test]
    fn resume_requires_a_populated_static_cache() -> anyhow::Result<()> {
        let storage = MemoryCacheStorage::new();
        let mut fresh = OfflineWorker::new(options(), storage.clone(), shell_fetcher());
        assert!(!fresh.resume()?);
        assert_eq!(fresh.state(), WorkerState::Parsed);
        fresh.install()?;

        let mut restarted = OfflineWorker::new(options(), storage, OfflineFetcher);
        assert!(restarted.resume()?);
        assert_eq!(restarted.state(), WorkerState::Activated);
        Ok(())
    }

    #[test]
    fn inactive_worker_and_dev_urls_pass_through() {
        let worker = OfflineWorker::new(options(), MemoryCacheStorage::new(), shell_fetcher());
        assert_eq!(worker.handle_fetch(&Request::new("/")), FetchOutcome::Passthrough);

        let (worker, fetcher) = active_worker();
        let before = fetcher.calls();
        for url in [
            "http://localhost:5173/@vite/client",
            "http://localhost:5173/src/App.tsx",
            "/node_modules/.vite/react.js",
            "/@react-refresh",
        ] {
            assert_eq!(worker.handle_fetch(&Request::new(url)), FetchOutcome::Passthrough);
        }
        assert_eq!(fetcher.calls(), before);
    }

    #[test]
    fn static_subresources_are_cache_first() {
        let (worker, fetcher) = active_worker();
        fetcher.serve("/assets/app.css", Response::ok("body{}", None));
        let request = Request::new("/assets/app.css").with_destination(Destination::Style);

        assert_eq!(body(worker.handle_fetch(&request)), b"body{}");
        assert_eq!(worker.drain_background(), 1);

        fetcher.go_offline();
        let calls = fetcher.calls();
        assert_eq!(body(worker.handle_fetch(&request)), b"body{}");
        assert_eq!(fetcher.calls(), calls);
    }

    #[test]
    fn non_200_subresources_are_not_cached() {
        let (worker, fetcher) = active_worker();
        fetcher.serve("/app.js", Response::status(500));
        let request = Request::new("/app.js").with_destination(Destination::Script);
        assert_matches!(
            worker.handle_fetch(&request),
            FetchOutcome::Respond(Response { status: 500, .. })
        );
        assert_eq!(worker.drain_background(), 0);
    }

    #[test]
    fn unreachable_fonts_get_an_empty_200() {
        let (worker, _) = active_worker();
        let font = Request::new("https://fonts.gstatic.com/s/inter.woff2")
            .with_destination(Destination::Font);
        assert_eq!(worker.handle_fetch(&font), FetchOutcome::Respond(Response::empty_ok()));

        let stylesheet = Request::new("https://fonts.googleapis.com/css2?family=Inter");
        assert_matches!(worker.handle_fetch(&stylesheet), FetchOutcome::Failed { .. });
    }

    #[test]
    fn only_basic_200_responses_are_cached() {
        let (worker, fetcher) = active_worker();
        fetcher.serve("/api/list", Response::ok("[]", None));
        let mut opaque = Response::ok("x", None);
        opaque.kind = ResponseKind::Opaque;
        fetcher.serve("https://cdn.test/pixel", opaque);

        worker.handle_fetch(&Request::new("/api/list"));
        worker.handle_fetch(&Request::new("https://cdn.test/pixel"));
        assert_eq!(worker.drain_background(), 1);
        assert_eq!(
            worker.storage().entries("grocery-dynamic-v1").ok(),
            Some(vec!["/api/list".to_string()])
        );
    }

    #[test]
    fn offline_navigation_falls_back_to_cached_shell() {
        let (worker, fetcher) = active_worker();
        fetcher.go_offline();
        let outcome = worker.handle_fetch(&Request::navigate(format!("{ORIGIN}/some/route")));
        assert_eq!(body(outcome), b"<shell>");

        assert_matches!(
            worker.handle_fetch(&Request::new("/some/data.json")),
            FetchOutcome::Failed { .. }
        );
    }

    #[test]
    fn same_origin_urls_share_a_cache_key() {
        let (worker, _) = active_worker();
        assert_eq!(worker.cache_key(&format!("{ORIGIN}/index.html")), "/index.html");
        assert_eq!(worker.cache_key("index.html"), "/index.html");
        assert_eq!(
            worker.cache_key("https://fonts.gstatic.com/a.woff2"),
            "https://fonts.gstatic.com/a.woff2"
        );
        assert_eq!(body(worker.handle_fetch(&Request::new(format!("{ORIGIN}/")))), b"root");
    }
}
