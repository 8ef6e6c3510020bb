//! Common test utilities for debrid-dav
//!
//! This module provides shared testing infrastructure including:
//! - A scriptable in-memory debrid provider
//! - Test fixtures for torrent and configuration data

pub mod fake_client;
pub mod fixtures;
