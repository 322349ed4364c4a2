pub mod app;
pub mod builder;
pub mod config;
pub mod domain;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod output;
pub mod repository;
pub mod store;
pub mod transfer;
pub mod update;
