pub mod config;
pub mod crawl;
pub mod db;
pub mod enrich;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod sink;
