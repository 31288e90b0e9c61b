pub mod browser;
pub mod config;
pub mod scraper;
pub mod server;
pub mod storage;
