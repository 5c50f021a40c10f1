pub mod app;
pub mod catalog;
pub mod cleanup;
pub mod config;
pub mod differ;
pub mod domain;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod grid;
pub mod output;
pub mod tracker;
pub mod validate;
