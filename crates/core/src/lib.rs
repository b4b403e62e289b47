pub mod config;
pub mod error;
pub mod types;
pub mod urlpolicy;

pub use config::CrawlConfig;
pub use error::CrawlError;
pub use types::*;
pub use urlpolicy::{
    domain_of, in_scope, is_valid_crawl_url, normalize_url, origin_of, CrawlScope, GlobFilter,
};
