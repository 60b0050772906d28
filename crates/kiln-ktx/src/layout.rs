//! Parsed layout of a KTX2 file.
//!
//! [`Ktx2Layout`] is the explicit intermediate form the injector works on:
//! header, section index and level index, plus the file length they were
//! validated against. [`Ktx2File`] pairs a layout with the bytes it describes.

use std::fs;
use std::ops::Range;
use std::path::Path;

use kiln_common::{align, crc, BinaryReader, IntoBytes};

use crate::header::{
    Ktx2Header, LevelIndexEntry, SectionIndex, DFD_BYTES_PLANE0_OFFSET, KTX2_IDENTIFIER,
    LEVEL_INDEX_OFFSET,
};
use crate::kvd::{parse_key_values, KeyValue};
use crate::{Error, Result};

/// Header, section index and level index of a KTX2 file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ktx2Layout {
    pub header: Ktx2Header,
    pub index: SectionIndex,
    /// One entry per level, level 0 (largest) first.
    pub levels: Vec<LevelIndexEntry>,
    pub file_len: u64,
}

impl Ktx2Layout {
    /// Parse and validate the layout of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let file_len = data.len() as u64;
        if file_len < LEVEL_INDEX_OFFSET {
            return Err(Error::malformed(
                "file length",
                format!(">= {} bytes", LEVEL_INDEX_OFFSET),
                file_len,
            ));
        }

        let mut reader = BinaryReader::new(data);
        let identifier = reader.read_bytes(KTX2_IDENTIFIER.len())?;
        if identifier != KTX2_IDENTIFIER {
            return Err(Error::malformed(
                "file identifier",
                format!("{:02X?}", KTX2_IDENTIFIER),
                format!("{:02X?}", identifier),
            ));
        }

        let header: Ktx2Header = reader.read_struct()?;
        let index: SectionIndex = reader.read_struct()?;

        let count = header.level_entries();
        let table_end = LEVEL_INDEX_OFFSET + count as u64 * LevelIndexEntry::SIZE;
        if table_end > file_len {
            return Err(Error::malformed(
                "level index",
                format!("{} entries within {} bytes", count, file_len),
                format!("table ending at {}", table_end),
            ));
        }
        let levels = (0..count)
            .map(|_| reader.read_struct::<LevelIndexEntry>())
            .collect::<kiln_common::Result<Vec<_>>>()?;

        let layout = Self {
            header,
            index,
            levels,
            file_len,
        };
        layout.validate()?;
        Ok(layout)
    }

    /// End of the level index table, where section data may begin.
    pub fn level_index_end(&self) -> u64 {
        LEVEL_INDEX_OFFSET + self.levels.len() as u64 * LevelIndexEntry::SIZE
    }

    pub fn dfd_range(&self) -> Range<u64> {
        let start = self.index.dfd_byte_offset as u64;
        start..start + self.index.dfd_byte_length as u64
    }

    /// Key/value section range. Empty when the file has no key/value data.
    pub fn kvd_range(&self) -> Range<u64> {
        let start = self.index.kvd_byte_offset as u64;
        start..start + self.index.kvd_byte_length as u64
    }

    /// Supercompression global data range, if present.
    pub fn sgd_range(&self) -> Option<Range<u64>> {
        (self.index.sgd_byte_length > 0).then(|| {
            let start = self.index.sgd_byte_offset;
            start..start.saturating_add(self.index.sgd_byte_length)
        })
    }

    /// Check every section and level against the file bounds and each other.
    pub fn validate(&self) -> Result<()> {
        if self.levels.len() != self.header.level_entries() {
            return Err(Error::malformed(
                "level index length",
                self.header.level_entries(),
                self.levels.len(),
            ));
        }

        let data_start = self.level_index_end();
        let mut regions: Vec<(&'static str, Range<u64>)> = Vec::new();

        if self.index.dfd_byte_length < 4 {
            return Err(Error::malformed(
                "data format descriptor length",
                ">= 4",
                self.index.dfd_byte_length,
            ));
        }
        regions.push(("data format descriptor", self.dfd_range()));
        if self.index.kvd_byte_length > 0 {
            regions.push(("key/value data", self.kvd_range()));
        }
        if let Some(sgd) = self.sgd_range() {
            regions.push(("supercompression global data", sgd));
        }

        let mut previous_offset: Option<u64> = None;
        for (i, level) in self.levels.iter().enumerate() {
            let end = level.end().ok_or_else(|| {
                Error::malformed("level extent", "no overflow", format!("level {}", i))
            })?;
            // Levels are stored smallest first, so offsets fall as the index rises.
            if let Some(prev) = previous_offset {
                if level.byte_offset >= prev {
                    return Err(Error::malformed(
                        "level order",
                        format!("level {} offset below {}", i, prev),
                        level.byte_offset,
                    ));
                }
            }
            previous_offset = Some(level.byte_offset);
            regions.push(("level data", level.byte_offset..end));
        }

        for (what, range) in &regions {
            if range.start < data_start || range.end > self.file_len {
                return Err(Error::malformed(
                    *what,
                    format!("within {}..{}", data_start, self.file_len),
                    format!("{}..{}", range.start, range.end),
                ));
            }
        }

        regions.retain(|(_, r)| !r.is_empty());
        regions.sort_by_key(|(_, r)| r.start);
        for pair in regions.windows(2) {
            let ((_, a), (what, b)) = (&pair[0], &pair[1]);
            if b.start < a.end {
                return Err(Error::malformed(
                    *what,
                    format!("no overlap, start >= {}", a.end),
                    b.start,
                ));
            }
        }

        Ok(())
    }

    /// Texel block size in bytes from the descriptor, or 0 if unknown.
    pub fn bytes_plane0(&self, dfd: &[u8]) -> u8 {
        dfd.get(DFD_BYTES_PLANE0_OFFSET).copied().unwrap_or(0)
    }

    /// Alignment every level offset must satisfy.
    ///
    /// Supercompressed levels need none; otherwise the offset must be a
    /// multiple of both 4 and the texel block size.
    pub fn level_alignment(&self, dfd: &[u8]) -> Result<u64> {
        if self.header.is_supercompressed() {
            return Ok(1);
        }
        match self.bytes_plane0(dfd) {
            0 => Err(Error::AlignmentError {
                what: "texel block size missing from data format descriptor",
                alignment: 0,
                value: 0,
            }),
            block => Ok(align::lcm(4, block as u64)),
        }
    }

    /// Serialize identifier, header, section index and level index.
    pub fn header_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.level_index_end() as usize);
        out.extend_from_slice(&KTX2_IDENTIFIER);
        out.extend_from_slice(self.header.as_bytes());
        out.extend_from_slice(self.index.as_bytes());
        for level in &self.levels {
            out.extend_from_slice(level.as_bytes());
        }
        out
    }
}

/// A KTX2 file held in memory.
#[derive(Debug, Clone)]
pub struct Ktx2File {
    data: Vec<u8>,
    layout: Ktx2Layout,
}

impl Ktx2File {
    /// Read and parse a file from disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::parse(fs::read(path)?)
    }

    /// Parse a file from bytes.
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        let layout = Ktx2Layout::parse(&data)?;
        Ok(Self { data, layout })
    }

    #[inline]
    pub fn layout(&self) -> &Ktx2Layout {
        &self.layout
    }

    #[inline]
    pub fn header(&self) -> &Ktx2Header {
        &self.layout.header
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn level_count(&self) -> usize {
        self.layout.levels.len()
    }

    /// Data format descriptor bytes, including `dfdTotalSize`.
    pub fn dfd(&self) -> &[u8] {
        self.slice(self.layout.dfd_range())
    }

    /// Raw key/value section bytes.
    pub fn kvd(&self) -> &[u8] {
        self.slice(self.layout.kvd_range())
    }

    pub fn sgd(&self) -> Option<&[u8]> {
        self.layout.sgd_range().map(|r| self.slice(r))
    }

    /// Stored bytes of one level.
    pub fn level_data(&self, level: usize) -> Option<&[u8]> {
        let entry = self.layout.levels.get(level)?;
        Some(self.slice(entry.byte_offset..entry.byte_offset + entry.byte_length))
    }

    /// All key/value entries in file order.
    pub fn key_values(&self) -> Result<Vec<KeyValue>> {
        parse_key_values(self.kvd())
    }

    /// Value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .key_values()?
            .into_iter()
            .find(|kv| kv.key == key)
            .map(|kv| kv.value))
    }

    /// CRC32C of every level's stored bytes, level 0 first.
    pub fn level_checksums(&self) -> Vec<u32> {
        (0..self.level_count())
            .map(|i| crc::hash_bytes(self.level_data(i).unwrap_or_default()))
            .collect()
    }

    // Ranges were bounds-checked by Ktx2Layout::validate.
    fn slice(&self, range: Range<u64>) -> &[u8] {
        &self.data[range.start as usize..range.end as usize]
    }
}
