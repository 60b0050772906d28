//! Common utilities for Kiln.
//!
//! This crate provides foundational types and utilities used across all Kiln crates:
//!
//! - [`BinaryReader`] - Zero-copy little-endian reading from byte slices
//! - [`align`] - Alignment arithmetic for container layouts
//! - [`crc`] - CRC32C content hashing for level data

mod error;
mod reader;

pub mod align;
pub mod crc;

pub use error::{Error, Result};
pub use reader::BinaryReader;

/// Re-export zerocopy traits for convenience
pub use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};
