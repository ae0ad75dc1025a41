//! Integration tests for codebox
//!
//! These tests need a running docker daemon and the executor images named in
//! the default configuration (`python-executor`, `nodejs-executor`,
//! `ruby-executor`).
//! Run with: cargo test -p codebox --features integration-tests
//!
//! Tests that launch containers are marked `#[ignore]`. To include them:
//!    cargo test -p codebox --features integration-tests -- --include-ignored

#![cfg(feature = "integration-tests")]

use std::fs;
use std::sync::Arc;

use codebox::{Config, Dispatcher, DockerCli};

mod resource_limits;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Helper to get fixture file content
pub(crate) fn fixture_source(name: &str) -> String {
    let path = format!("{FIXTURES_PATH}/sources/{name}");
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read fixture {path}: {e}"))
}

/// Default config with a short sandbox timeout so runaway tests finish quickly
pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    config.default_limits.wall_time_limit = Some(5.0);
    config.dispatcher.wait_timeout = 10.0;
    config
}

pub(crate) fn docker(config: &Config) -> Arc<DockerCli> {
    Arc::new(DockerCli::new(config.docker_binary()))
}

pub(crate) fn dispatcher(config: &Config) -> Dispatcher {
    Dispatcher::from_config(docker(config), config)
}
