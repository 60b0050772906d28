//! KTX2 container support for Kiln.
//!
//! This crate reads the layout of KTX2 files produced by the block encoder
//! and rewrites their key/value data without disturbing encoded levels.
//!
//! # Example
//!
//! ```no_run
//! use kiln_ktx::{inject_metadata, Ktx2File};
//!
//! let report = inject_metadata("albedo.ktx2", "kiln.range", &[1, 0, 0, 0])?;
//! println!("later sections moved by {} bytes", report.shift);
//!
//! let file = Ktx2File::open("albedo.ktx2")?;
//! for kv in file.key_values()? {
//!     println!("{} ({} bytes)", kv.key, kv.value.len());
//! }
//! # Ok::<(), kiln_ktx::Error>(())
//! ```

mod builder;
mod error;
mod header;
mod inject;
mod kvd;
mod layout;

pub use builder::Ktx2Builder;
pub use error::{Error, Result};
pub use header::{
    Ktx2Header, LevelIndexEntry, SectionIndex, SupercompressionScheme, VkFormat,
    DFD_BYTES_PLANE0_OFFSET, KTX2_IDENTIFIER, LEVEL_INDEX_OFFSET,
};
pub use inject::{inject_key_value, inject_metadata, InjectionReport, InsertionPlan};
pub use kvd::{parse_key_values, serialize_key_values, KeyValue};
pub use layout::{Ktx2File, Ktx2Layout};
