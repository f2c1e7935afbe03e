//! Integration tests for Crawl-Relay

mod dispatch_tests;
mod relay_tests;
