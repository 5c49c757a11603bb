pub mod annex;
pub mod app;
pub mod config;
pub mod dataproxy;
pub mod domain;
pub mod engine;
pub mod error;
pub mod kg;
pub mod materialize;
pub mod model;
pub mod output;
pub mod repository;
pub mod resolver;
