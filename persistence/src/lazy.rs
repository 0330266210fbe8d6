//! Paged lazy loading of session listings.
//!
//! Pages are cached FIFO up to `max_cached_pages`. Concurrent requests for
//! the same page share one loader call; with `background_preload` enabled,
//! fetching a full page also warms the next one.

use crate::error::Result;
use crate::types::SessionMetadata;
use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use tokio::sync::Mutex;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LazyLoaderConfig {
    pub page_size: usize,
    pub max_cached_pages: usize,
    pub background_preload: bool,
}

impl Default for LazyLoaderConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            max_cached_pages: 10,
            background_preload: true,
        }
    }
}

#[derive(Default)]
struct LoaderState {
    pages: HashMap<usize, Vec<SessionMetadata>>,
    order: VecDeque<usize>,
    in_flight: HashSet<usize>,
}

pub struct LazySessionLoader {
    config: LazyLoaderConfig,
    state: Mutex<LoaderState>,
    loaded: Notify,
}

impl LazySessionLoader {
    pub fn new(config: LazyLoaderConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LoaderState::default()),
            loaded: Notify::new(),
        }
    }

    pub const fn page_size(&self) -> usize {
        self.config.page_size
    }

    /// Return page `page`, loading `[page*size, page*size+size)` through
    /// `loader(offset, limit)` on a cache miss.
    pub async fn get_page<F, Fut>(&self, page: usize, loader: F) -> Result<Vec<SessionMetadata>>
    where
        F: Fn(usize, usize) -> Fut,
        Fut: Future<Output = Result<Vec<SessionMetadata>>>,
    {
        let items = self.load_page(page, &loader).await?;
        // A full page suggests there is more; warm the next page so the
        // caller's next step is a cache hit.
        if self.config.background_preload && items.len() == self.config.page_size {
            if let Err(err) = self.load_page(page + 1, &loader).await {
                debug!(page = page + 1, %err, "speculative preload failed");
            }
        }
        Ok(items)
    }

    async fn load_page<F, Fut>(&self, page: usize, loader: &F) -> Result<Vec<SessionMetadata>>
    where
        F: Fn(usize, usize) -> Fut,
        Fut: Future<Output = Result<Vec<SessionMetadata>>>,
    {
        loop {
            let notified = self.loaded.notified();
            tokio::pin!(notified);
            {
                let mut state = self.state.lock().await;
                if let Some(items) = state.pages.get(&page) {
                    return Ok(items.clone());
                }
                if !state.in_flight.contains(&page) {
                    state.in_flight.insert(page);
                    break;
                }
                // Register for the wakeup before releasing the lock so a
                // finishing loader cannot slip past unnoticed.
                notified.as_mut().enable();
            }
            notified.await;
        }

        let offset = page * self.config.page_size;
        let result = loader(offset, self.config.page_size).await;

        let mut state = self.state.lock().await;
        state.in_flight.remove(&page);
        self.loaded.notify_waiters();
        let items = result?;
        state.pages.insert(page, items.clone());
        state.order.push_back(page);
        while state.order.len() > self.config.max_cached_pages {
            if let Some(evicted) = state.order.pop_front() {
                state.pages.remove(&evicted);
            }
        }
        Ok(items)
    }

    /// Drop all cached pages (call after any write).
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        state.pages.clear();
        state.order.clear();
    }

    pub async fn cached_pages(&self) -> usize {
        self.state.lock().await.pages.len()
    }
}
