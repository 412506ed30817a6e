//! Blog Aggregator - an RSS feed aggregator with a JSON API.
//!
//! Users register feeds and follow them over HTTP. A background poller
//! periodically fetches the least recently fetched feeds and stores their
//! items as posts, which followers can then list.

pub mod auth;
pub mod config;
pub mod db;
pub mod fetcher;
pub mod ingest;
pub mod poller;
pub mod routes;
pub mod rss;
pub mod store;
