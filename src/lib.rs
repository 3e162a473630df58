pub mod app;
pub mod config;
pub mod delta;
pub mod derived;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod govgr_api;
pub mod normalize;
pub mod output;
pub mod persist;
pub mod record;
pub mod resolver;
pub mod sink;
pub mod sources;
pub mod table;
pub mod text;
