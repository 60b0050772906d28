//! Key/value metadata injection.
//!
//! Injection works on the parsed [`Ktx2Layout`] rather than by splicing bytes:
//! the key/value section is re-serialized with the new entry, every offset at
//! or after the old section end is moved by a shift that keeps all later
//! sections on their required alignment, and the file is rebuilt from the
//! relocated layout plus the untouched byte ranges. Level data is copied
//! verbatim and checked by CRC before the result is accepted.

use std::fs;
use std::io::Write;
use std::path::Path;

use kiln_common::align;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::kvd::{serialize_key_values, upsert, KeyValue};
use crate::layout::{Ktx2File, Ktx2Layout};
use crate::{Error, Result};

/// Where the new key/value section goes and how far later data moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertionPlan {
    /// Offset of the rewritten key/value section.
    pub kvd_offset: u64,
    /// Length of the section being replaced (0 if there was none).
    pub old_kvd_length: u64,
    /// Serialized replacement section.
    pub new_kvd: Vec<u8>,
    /// Zero bytes written after the new section.
    pub padding: u64,
    /// Distance every offset at or after the old section end moves.
    pub shift: u64,
    /// Alignment the shift is a multiple of.
    pub alignment: u64,
    /// Whether an entry with the same key was replaced.
    pub replaced: bool,
}

/// Summary of a completed injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectionReport {
    pub alignment: u64,
    pub shift: u64,
    pub padding: u64,
    pub kvd_length: u64,
    pub file_length: u64,
    pub replaced: bool,
}

impl InsertionPlan {
    /// Plan inserting `entry` into `file`.
    pub fn new(file: &Ktx2File, entry: KeyValue) -> Result<Self> {
        let layout = file.layout();
        let level_alignment = layout.level_alignment(file.dfd())?;

        for (i, level) in layout.levels.iter().enumerate() {
            if !align::is_aligned(level.byte_offset, level_alignment) {
                debug!(level = i, offset = level.byte_offset, "misaligned level");
                return Err(Error::AlignmentError {
                    what: "existing level offset",
                    alignment: level_alignment,
                    value: level.byte_offset,
                });
            }
        }

        let mut alignment = align::lcm(4, level_alignment);
        if let Some(sgd) = layout.sgd_range() {
            if !align::is_aligned(sgd.start, 8) {
                return Err(Error::AlignmentError {
                    what: "existing global data offset",
                    alignment: 8,
                    value: sgd.start,
                });
            }
            alignment = align::lcm(alignment, 8);
        }

        let old_kvd_length = layout.index.kvd_byte_length as u64;
        let kvd_offset = if old_kvd_length > 0 {
            layout.index.kvd_byte_offset as u64
        } else {
            let dfd_end = layout.dfd_range().end;
            align::align_up(dfd_end, 4).ok_or(Error::AlignmentError {
                what: "key/value offset overflow",
                alignment: 4,
                value: dfd_end,
            })?
        };
        if !align::is_aligned(kvd_offset, 4) {
            return Err(Error::AlignmentError {
                what: "existing key/value offset",
                alignment: 4,
                value: kvd_offset,
            });
        }

        let mut entries = file.key_values()?;
        let replaced = entries.iter().any(|e| e.key == entry.key);
        upsert(&mut entries, entry);
        let new_kvd = serialize_key_values(&entries);
        let new_len = new_kvd.len() as u64;

        if kvd_offset > u32::MAX as u64 || kvd_offset + new_len > u32::MAX as u64 {
            return Err(Error::AlignmentError {
                what: "key/value section beyond 32-bit offset range",
                alignment,
                value: kvd_offset + new_len,
            });
        }

        let (shift, padding) = if new_len > old_kvd_length {
            let growth = new_len - old_kvd_length;
            let shift = align::align_up(growth, alignment).ok_or(Error::AlignmentError {
                what: "shift overflow",
                alignment,
                value: growth,
            })?;
            (shift, shift - growth)
        } else {
            (0, old_kvd_length - new_len)
        };

        debug!(
            kvd_offset,
            old_kvd_length,
            new_kvd_length = new_len,
            shift,
            alignment,
            "planned key/value insertion"
        );

        Ok(Self {
            kvd_offset,
            old_kvd_length,
            new_kvd,
            padding,
            shift,
            alignment,
            replaced,
        })
    }

    /// End of the replaced section; everything at or after it moves.
    pub fn old_kvd_end(&self) -> u64 {
        self.kvd_offset + self.old_kvd_length
    }

    /// New position of an offset from the original file.
    pub fn relocate(&self, offset: u64) -> Result<u64> {
        if offset < self.old_kvd_end() {
            return Ok(offset);
        }
        offset.checked_add(self.shift).ok_or(Error::AlignmentError {
            what: "relocated offset overflow",
            alignment: self.alignment,
            value: offset,
        })
    }

    /// The layout after insertion.
    pub fn relocated_layout(&self, layout: &Ktx2Layout) -> Result<Ktx2Layout> {
        let mut out = layout.clone();

        let dfd = self.relocate(layout.index.dfd_byte_offset as u64)?;
        out.index.dfd_byte_offset = u32::try_from(dfd).map_err(|_| Error::AlignmentError {
            what: "descriptor beyond 32-bit offset range",
            alignment: self.alignment,
            value: dfd,
        })?;
        out.index.kvd_byte_offset = self.kvd_offset as u32;
        out.index.kvd_byte_length = self.new_kvd.len() as u32;
        if layout.index.sgd_byte_length > 0 {
            out.index.sgd_byte_offset = self.relocate(layout.index.sgd_byte_offset)?;
        }
        for level in &mut out.levels {
            level.byte_offset = self.relocate(level.byte_offset)?;
        }
        out.file_len = self.relocate(layout.file_len)?;
        Ok(out)
    }

    /// Rebuild the file bytes according to this plan.
    pub fn apply(&self, file: &Ktx2File) -> Result<Vec<u8>> {
        let layout = file.layout();
        let relocated = self.relocated_layout(layout)?;
        let data = file.data();

        let prefix_start = layout.level_index_end() as usize;
        let insert_at = self.kvd_offset as usize;
        let tail_start = self.old_kvd_end() as usize;

        let mut out = Vec::with_capacity(relocated.file_len as usize);
        out.extend_from_slice(&relocated.header_bytes());
        out.extend_from_slice(&data[prefix_start..insert_at]);
        out.extend_from_slice(&self.new_kvd);
        out.resize(out.len() + self.padding as usize, 0);
        out.extend_from_slice(&data[tail_start..]);

        debug_assert_eq!(out.len() as u64, relocated.file_len);
        Ok(out)
    }
}

/// Insert or replace `key` in an in-memory file, returning the new bytes.
///
/// The result is re-parsed and every level's CRC compared with the input
/// before it is returned.
pub fn inject_key_value(
    file: &Ktx2File,
    key: &str,
    value: &[u8],
) -> Result<(Vec<u8>, InjectionReport)> {
    let plan = InsertionPlan::new(file, KeyValue::new(key, value)?)?;
    let bytes = plan.apply(file)?;

    let before = file.level_checksums();
    let rewritten = Ktx2File::parse(bytes)?;
    let after = rewritten.level_checksums();
    if let Some(level) = (0..before.len()).find(|&i| before[i] != after[i]) {
        return Err(Error::LevelDataChanged {
            level,
            before: before[level],
            after: after[level],
        });
    }

    let report = InjectionReport {
        alignment: plan.alignment,
        shift: plan.shift,
        padding: plan.padding,
        kvd_length: plan.new_kvd.len() as u64,
        file_length: rewritten.data().len() as u64,
        replaced: plan.replaced,
    };
    Ok((rewritten.into_data(), report))
}

/// Insert or replace `key` in the KTX2 file at `path`.
///
/// The file is only replaced once the rewritten bytes have validated; the
/// new content is written to a temporary file next to the target and renamed
/// over it.
pub fn inject_metadata<P: AsRef<Path>>(path: P, key: &str, value: &[u8]) -> Result<InjectionReport> {
    let path = path.as_ref();
    let file = Ktx2File::open(path)?;
    let (bytes, report) = inject_key_value(&file, key, value)?;
    write_atomically(path, &bytes)?;

    info!(
        path = %path.display(),
        key,
        value_len = value.len(),
        shift = report.shift,
        "injected metadata"
    );
    Ok(report)
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), meta.permissions())?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
