pub mod api;
#[cfg(feature = "browser")]
pub mod browser;
pub mod extract;
pub mod http;
pub mod runner;
pub mod ssrf;
pub mod static_page;

pub use api::ApiStrategy;
#[cfg(feature = "browser")]
pub use browser::DynamicStrategy;
pub use extract::extract_html;
pub use http::HttpFetcher;
pub use runner::StrategyRunner;
pub use static_page::StaticStrategy;
