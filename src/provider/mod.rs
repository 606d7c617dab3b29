pub mod api;
pub mod http;
pub mod normalize;

pub use api::MarketDataProvider;
pub use http::HttpMarketDataProvider;
