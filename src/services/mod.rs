//! Command services: the offer engine, tack lifecycle, reviews and the [`Marketplace`] facade
//! that ties them together.

pub mod context;
pub mod marketplace;
pub mod offer_engine;
pub mod review_service;
pub mod tack_lifecycle;

pub use context::{SystemContext, TransitionPlan};
pub use marketplace::Marketplace;
pub use offer_engine::{Acceptance, NewOffer, OfferEngine};
pub use review_service::ReviewService;
pub use tack_lifecycle::TackLifecycle;
