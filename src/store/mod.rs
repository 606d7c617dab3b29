pub mod adapter;
pub mod jsonl;

pub use adapter::MarketStore;
pub use jsonl::JsonlMarketStore;
