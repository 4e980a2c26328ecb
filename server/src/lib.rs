pub mod api;
pub mod models;
pub mod price_updater;
pub mod services;

pub use api::router;
pub use models::*;
pub use price_updater::RateUpdater;
pub use services::{RateService, RateServiceBuilder};
