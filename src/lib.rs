#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Tack Market
//!
//! Core of a gig marketplace: tackers post paid tasks ("tacks"), runners make offers, the
//! tacker accepts one, the runner performs the work and the two settle and review each other.
//!
//! ## Architecture
//!
//! Every command follows the same shape:
//!
//! 1. load the current tack and offers
//! 2. run the events through the tack and offer state machines
//! 3. stage state changes, ledger entries, transitions and stats in one [`store::ChangeSet`]
//! 4. commit atomically with optimistic version checks
//! 5. fan notifications out and schedule follow-up jobs
//!
//! Conflicting commits are retried from step 1, so racing commands serialize on the tack's
//! version. Exactly one of two concurrent acceptances wins.
//!
//! ## Module Organization
//!
//! - [`models`] - Tacks, offers, reviews, transitions and user stats
//! - [`state_machine`] - Tack and offer lifecycles with guards
//! - [`ledger`] - Balances, escrow and the balance journal
//! - [`store`] - Atomic persistence: in-memory and PostgreSQL
//! - [`services`] - Offer engine, tack lifecycle, reviews and the [`Marketplace`] facade
//! - [`notifications`] - Topic fan-out and push templates
//! - [`scheduler`] - Delayed jobs, the worker pool and periodic sweeps
//! - [`membership`] - Group membership for visibility
//! - [`config`] - Layered configuration
//! - [`bootstrap`] - Wiring a running [`MarketplaceRuntime`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tack_market::config::{ConfigManager, MarketplaceConfig};
//! use tack_market::models::{NewTack, TackType, UserId};
//! use tack_market::MarketplaceRuntime;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = Arc::new(ConfigManager::from_config(MarketplaceConfig::default(), "development")?);
//! let runtime = MarketplaceRuntime::in_memory(manager)?;
//!
//! let tacker = UserId::new();
//! let tack = runtime
//!     .marketplace()
//!     .create_tack(tacker, NewTack::new("Pick up groceries", 0, TackType::Public))
//!     .await?;
//! println!("posted tack {}", tack.id);
//!
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod membership;
pub mod models;
pub mod notifications;
pub mod scheduler;
pub mod services;
pub mod state_machine;
pub mod store;

pub use bootstrap::{MarketplaceRuntime, RuntimeStatus};
pub use config::{ConfigManager, MarketplaceConfig};
pub use error::{MarketplaceError, MarketplaceResult};
pub use ledger::{Ledger, LedgerEntry, LedgerReason};
pub use models::{
    GroupId, NewReview, NewTack, Offer, OfferId, OfferStatus, Review, Tack, TackId, TackStatus,
    TackType, UserId, UserStats,
};
pub use services::{Acceptance, Marketplace, NewOffer};
pub use store::{InMemoryStore, MarketplaceStore, PgStore};
