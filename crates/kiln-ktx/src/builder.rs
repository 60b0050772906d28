//! Minimal KTX2 writer for pre-encoded level data.
//!
//! Lays sections out the way `ktx create` does: descriptor, key/value data,
//! global data on an 8-byte boundary, then levels smallest first, each on
//! the level alignment.

use byteorder::{ByteOrder, LittleEndian};
use kiln_common::align;

use crate::header::{Ktx2Header, LevelIndexEntry, SectionIndex, DFD_BYTES_PLANE0_OFFSET};
use crate::kvd::{serialize_key_values, KeyValue};
use crate::layout::Ktx2Layout;
use crate::{Error, Result};

const DFD_TOTAL_SIZE: usize = 44;
const DFD_BLOCK_SIZE: u16 = 40;
const DFD_VERSION: u16 = 2;

/// Builder for a KTX2 file from already-encoded levels.
#[derive(Debug, Clone)]
pub struct Ktx2Builder {
    vk_format: u32,
    width: u32,
    height: u32,
    block_bytes: u8,
    block_dimensions: (u8, u8),
    supercompression: u32,
    sgd: Vec<u8>,
    key_values: Vec<(String, Vec<u8>)>,
    levels: Vec<Vec<u8>>,
}

impl Ktx2Builder {
    /// Start a file with the given format and texel block size in bytes.
    pub fn new(vk_format: u32, width: u32, height: u32, block_bytes: u8) -> Self {
        Self {
            vk_format,
            width,
            height,
            block_bytes,
            block_dimensions: (1, 1),
            supercompression: 0,
            sgd: Vec::new(),
            key_values: Vec::new(),
            levels: Vec::new(),
        }
    }

    /// Texel block footprint in pixels (4x4 for BCn).
    pub fn block_dimensions(mut self, width: u8, height: u8) -> Self {
        self.block_dimensions = (width.max(1), height.max(1));
        self
    }

    pub fn key_value(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.key_values.push((key.into(), value.into()));
        self
    }

    /// Append the next level; level 0 comes first.
    pub fn level(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.levels.push(data.into());
        self
    }

    /// Mark levels as supercompressed and attach global data.
    pub fn supercompression(mut self, scheme: u32, sgd: impl Into<Vec<u8>>) -> Self {
        self.supercompression = scheme;
        self.sgd = sgd.into();
        self
    }

    pub fn build(&self) -> Result<Vec<u8>> {
        if self.levels.is_empty() {
            return Err(Error::malformed("level count", ">= 1", 0));
        }
        let entries = self
            .key_values
            .iter()
            .map(|(k, v)| KeyValue::new(k.clone(), v.clone()))
            .collect::<Result<Vec<_>>>()?;
        let kvd = serialize_key_values(&entries);
        let dfd = self.descriptor();

        let mut layout = Ktx2Layout {
            header: Ktx2Header {
                vk_format: self.vk_format,
                type_size: 1,
                pixel_width: self.width,
                pixel_height: self.height,
                pixel_depth: 0,
                layer_count: 0,
                face_count: 1,
                level_count: self.levels.len() as u32,
                supercompression_scheme: self.supercompression,
            },
            index: SectionIndex {
                dfd_byte_offset: 0,
                dfd_byte_length: dfd.len() as u32,
                kvd_byte_offset: 0,
                kvd_byte_length: kvd.len() as u32,
                sgd_byte_offset: 0,
                sgd_byte_length: self.sgd.len() as u64,
            },
            levels: vec![
                LevelIndexEntry {
                    byte_offset: 0,
                    byte_length: 0,
                    uncompressed_byte_length: 0,
                };
                self.levels.len()
            ],
            file_len: 0,
        };

        let mut pos = layout.level_index_end();
        layout.index.dfd_byte_offset = pos as u32;
        pos += dfd.len() as u64;
        if !kvd.is_empty() {
            layout.index.kvd_byte_offset = pos as u32;
            pos += kvd.len() as u64;
        }
        if !self.sgd.is_empty() {
            pos = align_or_err(pos, 8)?;
            layout.index.sgd_byte_offset = pos;
            pos += self.sgd.len() as u64;
        }
        let level_alignment = if self.supercompression != 0 {
            1
        } else {
            align::lcm(4, self.block_bytes.max(1) as u64)
        };
        for (i, data) in self.levels.iter().enumerate().rev() {
            pos = align_or_err(pos, level_alignment)?;
            layout.levels[i] = LevelIndexEntry {
                byte_offset: pos,
                byte_length: data.len() as u64,
                uncompressed_byte_length: data.len() as u64,
            };
            pos += data.len() as u64;
        }
        layout.file_len = pos;

        let mut out = vec![0u8; pos as usize];
        let header = layout.header_bytes();
        out[..header.len()].copy_from_slice(&header);
        place(&mut out, layout.index.dfd_byte_offset as u64, &dfd);
        place(&mut out, layout.index.kvd_byte_offset as u64, &kvd);
        place(&mut out, layout.index.sgd_byte_offset, &self.sgd);
        for (entry, data) in layout.levels.iter().zip(&self.levels) {
            place(&mut out, entry.byte_offset, data);
        }
        Ok(out)
    }

    /// Basic descriptor block with a single sample.
    fn descriptor(&self) -> Vec<u8> {
        let mut dfd = vec![0u8; DFD_TOTAL_SIZE];
        LittleEndian::write_u32(&mut dfd[0..4], DFD_TOTAL_SIZE as u32);
        // vendorId 0 (Khronos), descriptorType 0 (basic).
        LittleEndian::write_u32(&mut dfd[4..8], 0);
        LittleEndian::write_u16(&mut dfd[8..10], DFD_VERSION);
        LittleEndian::write_u16(&mut dfd[10..12], DFD_BLOCK_SIZE);
        dfd[13] = 1; // BT.709 primaries
        dfd[14] = 1; // linear transfer
        dfd[16] = self.block_dimensions.0 - 1;
        dfd[17] = self.block_dimensions.1 - 1;
        dfd[DFD_BYTES_PLANE0_OFFSET] = if self.supercompression != 0 {
            0
        } else {
            self.block_bytes
        };
        dfd
    }
}

fn align_or_err(pos: u64, alignment: u64) -> Result<u64> {
    align::align_up(pos, alignment).ok_or(Error::AlignmentError {
        what: "section offset overflow",
        alignment,
        value: pos,
    })
}

fn place(out: &mut [u8], offset: u64, bytes: &[u8]) {
    if !bytes.is_empty() {
        let start = offset as usize;
        out[start..start + bytes.len()].copy_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{SupercompressionScheme, VkFormat};
    use crate::layout::Ktx2File;

    #[test]
    fn test_no_levels_rejected() {
        assert!(Ktx2Builder::new(VkFormat::R8G8B8A8_UNORM, 1, 1, 4).build().is_err());
    }

    #[test]
    fn test_without_key_values() {
        let data = Ktx2Builder::new(VkFormat::R8G8B8A8_UNORM, 1, 1, 4)
            .level(vec![1, 2, 3, 4])
            .build()
            .unwrap();
        let file = Ktx2File::parse(data).unwrap();
        assert_eq!(file.layout().index.kvd_byte_length, 0);
        assert_eq!(file.layout().index.kvd_byte_offset, 0);
        assert!(file.key_values().unwrap().is_empty());
    }

    #[test]
    fn test_global_data_is_8_aligned() {
        let data = Ktx2Builder::new(VkFormat::UNDEFINED, 4, 4, 0)
            .supercompression(SupercompressionScheme::BASIS_LZ, vec![7u8; 20])
            .key_value("KTXwriter", b"kiln\0".to_vec())
            .level(vec![1u8; 10])
            .level(vec![2u8; 5])
            .build()
            .unwrap();
        let file = Ktx2File::parse(data).unwrap();
        assert_eq!(file.layout().index.sgd_byte_offset % 8, 0);
        assert_eq!(file.sgd().unwrap(), &[7u8; 20][..]);
        assert_eq!(file.layout().bytes_plane0(file.dfd()), 0);
    }
}
