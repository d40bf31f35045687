//! Application Services
//!
//! - `SubscriptionManager`: owns the STOMP session and fans price updates
//!   out to per-stock subscribers
//! - `Watchlist`: keeps a fixed set of stock codes subscribed across
//!   reconnects

mod subscription_manager;
mod watchlist;

pub use subscription_manager::{
    ListenerHandle, StateListener, StompSessionSettings, Subscription, SubscriptionManager,
};
pub use watchlist::Watchlist;
