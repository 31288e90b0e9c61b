//! Browser backends implementing [`crate::scraper::BrowserSession`].

pub mod chrome;
pub mod http;

pub use chrome::{ChromeElement, ChromeSession, ChromeSessionFactory};
pub use http::{HttpElement, HttpSession, HttpSessionFactory};
