//! Background job processing for track uploads.
//!
//! A [`workers::Worker`] consumes one queue, runs the registered
//! [`workers::JobHandler`] inside a track-store transaction and settles the
//! job against the broker. The `transcoding_infos` handler records
//! transcoding reports on tracks and notifies their owners.

pub mod app;
pub mod common;
pub mod config;
pub mod infrastructure;
pub mod modules;
pub mod routes;
pub mod state;
pub mod workers;
