//! Wire format of the map API: `<osm>` documents in, osmChange and changeset
//! documents out.

pub mod decode;
pub mod encode;

pub const API_VERSION: &str = "0.6";

/// Reported as `generator` on uploaded documents and as the `created_by` prefix.
pub const GENERATOR: &str = "osm-sync";
