pub mod cryptocompare;
pub mod price_provider;

pub use cryptocompare::CryptoCompareClient;
pub use price_provider::RateProvider;
