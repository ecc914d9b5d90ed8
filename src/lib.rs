//! Client for the OpenStreetMap editing API: tile-based map fetching, an
//! OAuth-signed session and changeset upload.

pub mod auth;
pub mod codec;
pub mod config;
pub mod connection;
pub mod data;
pub mod errors;
pub mod events;
pub mod fetch;
pub mod tiles;
pub mod transport;
pub mod upload;
