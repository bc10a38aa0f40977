//! `canopy-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! the canonical error model of the platform wire protocol, strongly-typed
//! identifiers, and the wire value model with its parameter normalizer and
//! encoder.

pub mod error;
pub mod id;
pub mod value;

pub use error::CanonicalError;
pub use id::{ApplicationId, InstallationId, ObjectId, UserRef};
pub use value::{decode_params, encode_params, Value};
