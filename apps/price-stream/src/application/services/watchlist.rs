//! Watchlist
//!
//! A fixed set of stock codes kept subscribed for the lifetime of the
//! watchlist. A dropped socket clears every subscription in the manager;
//! the watchlist registers its codes again as soon as the manager reports
//! `Disconnected`, so delivery resumes once the transport reconnects.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::subscription_manager::{ListenerHandle, Subscription, SubscriptionManager};
use crate::domain::connection::ConnectionState;
use crate::domain::price::{StockCode, StockPriceUpdate};
use crate::domain::subscription::PriceCallback;

struct WatchlistInner {
    manager: SubscriptionManager,
    stock_codes: Vec<StockCode>,
    on_update: PriceCallback,
    subscriptions: Mutex<Vec<Subscription>>,
    stopped: AtomicBool,
    restores: AtomicU64,
}

impl WatchlistInner {
    fn subscribe_all(&self) -> Vec<Subscription> {
        self.stock_codes
            .iter()
            .map(|code| {
                let on_update = Arc::clone(&self.on_update);
                self.manager
                    .subscribe(code.clone(), move |update| on_update(update))
            })
            .collect()
    }

    fn restore(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }

        let mut subscriptions = self.subscriptions.lock();
        // The session took the old records with it; unsubscribing the stale
        // handles would tear down the reconnecting transport
        *subscriptions = self.subscribe_all();

        let restores = self.restores.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(
            stocks = ?self.stock_codes,
            restores,
            "Price stream dropped, subscriptions restored"
        );
    }
}

/// Keeps a set of stock codes subscribed across reconnects.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use price_stream::application::ports::Transport;
/// use price_stream::application::services::{StompSessionSettings, SubscriptionManager, Watchlist};
///
/// struct NullTransport;
///
/// impl Transport for NullTransport {
///     fn open(&self) {}
///     fn send(&self, _frame: String) {}
///     fn close(&self) {}
/// }
///
/// let manager = SubscriptionManager::create(Arc::new(NullTransport), StompSessionSettings::default());
/// let watchlist = Watchlist::start(&manager, vec!["005930".to_string()], |_| {});
/// assert_eq!(manager.stats().pending_topic_count, 1);
///
/// watchlist.stop();
/// assert_eq!(manager.stats().pending_topic_count, 0);
/// ```
#[must_use = "the codes stay subscribed until `stop` is called"]
pub struct Watchlist {
    inner: Arc<WatchlistInner>,
    listener: ListenerHandle,
}

impl std::fmt::Debug for Watchlist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchlist")
            .field("stock_codes", &self.inner.stock_codes)
            .field("restores", &self.restore_count())
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

impl Watchlist {
    /// Subscribe to every code in `stock_codes` and keep them subscribed.
    pub fn start<F>(manager: &SubscriptionManager, stock_codes: Vec<StockCode>, on_update: F) -> Self
    where
        F: Fn(&StockPriceUpdate) + Send + Sync + 'static,
    {
        let inner = Arc::new(WatchlistInner {
            manager: manager.clone(),
            stock_codes,
            on_update: Arc::new(on_update),
            subscriptions: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            restores: AtomicU64::new(0),
        });

        *inner.subscriptions.lock() = inner.subscribe_all();

        let watcher: Weak<WatchlistInner> = Arc::downgrade(&inner);
        let listener = manager.on_connection_state_change(move |state| {
            if state != ConnectionState::Disconnected {
                return;
            }
            if let Some(inner) = watcher.upgrade() {
                inner.restore();
            }
        });

        tracing::debug!(stocks = ?inner.stock_codes, "Watchlist started");
        Self { inner, listener }
    }

    /// Stock codes being watched.
    #[must_use]
    pub fn stock_codes(&self) -> &[StockCode] {
        &self.inner.stock_codes
    }

    /// Number of times the subscriptions were restored after a drop.
    #[must_use]
    pub fn restore_count(&self) -> u64 {
        self.inner.restores.load(Ordering::SeqCst)
    }

    /// Check if `stop` has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Unsubscribe every code and stop restoring. Safe to call more than once.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        self.listener.remove();
        let subscriptions = std::mem::take(&mut *self.inner.subscriptions.lock());
        for subscription in &subscriptions {
            subscription.unsubscribe();
        }
        tracing::debug!(stocks = ?self.inner.stock_codes, "Watchlist stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================
