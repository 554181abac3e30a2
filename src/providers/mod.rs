//! Yield provider implementations

pub mod chain;
pub mod eigenlayer;
pub mod http;
pub mod karak;
pub mod symbiotic;

pub use chain::ChainProvider;
pub use eigenlayer::EigenLayerProvider;
pub use http::RetryPolicy;
pub use karak::KarakProvider;
pub use symbiotic::SymbioticProvider;
