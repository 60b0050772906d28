//! KTX2 header structures.
//!
//! All multi-byte fields are little-endian on disk; the structs are read and
//! written with zerocopy on little-endian hosts.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// The 12-byte file identifier, `«KTX 20»\r\n\x1A\n`.
pub const KTX2_IDENTIFIER: [u8; 12] = [
    0xAB, 0x4B, 0x54, 0x58, 0x20, 0x32, 0x30, 0xBB, 0x0D, 0x0A, 0x1A, 0x0A,
];

/// Byte offset of the level index table.
pub const LEVEL_INDEX_OFFSET: u64 = (KTX2_IDENTIFIER.len()
    + std::mem::size_of::<Ktx2Header>()
    + std::mem::size_of::<SectionIndex>()) as u64;

/// Fixed header following the identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct Ktx2Header {
    /// Vulkan format enum (0 for Basis Universal payloads).
    pub vk_format: u32,
    /// Size of the data type in bytes (1 for block-compressed formats).
    pub type_size: u32,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub pixel_depth: u32,
    pub layer_count: u32,
    pub face_count: u32,
    /// Number of mip levels; 0 asks the loader to generate them.
    pub level_count: u32,
    /// 0 none, 1 BasisLZ, 2 Zstandard, 3 ZLIB.
    pub supercompression_scheme: u32,
}

impl Ktx2Header {
    /// Number of entries in the level index table.
    pub fn level_entries(&self) -> usize {
        self.level_count.max(1) as usize
    }

    /// Whether level data is supercompressed.
    pub fn is_supercompressed(&self) -> bool {
        self.supercompression_scheme != SupercompressionScheme::NONE
    }
}

/// Known supercompression scheme values.
pub struct SupercompressionScheme;

impl SupercompressionScheme {
    pub const NONE: u32 = 0;
    pub const BASIS_LZ: u32 = 1;
    pub const ZSTANDARD: u32 = 2;
    pub const ZLIB: u32 = 3;
}

/// Offsets and lengths of the descriptor, key/value and global data sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct SectionIndex {
    pub dfd_byte_offset: u32,
    pub dfd_byte_length: u32,
    pub kvd_byte_offset: u32,
    pub kvd_byte_length: u32,
    pub sgd_byte_offset: u64,
    pub sgd_byte_length: u64,
}

/// One row of the level index table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct LevelIndexEntry {
    pub byte_offset: u64,
    pub byte_length: u64,
    pub uncompressed_byte_length: u64,
}

impl LevelIndexEntry {
    /// Size of one table row in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// End offset (exclusive) of the level data.
    pub fn end(&self) -> Option<u64> {
        self.byte_offset.checked_add(self.byte_length)
    }
}

/// Offset of `bytesPlane0` inside the DFD (after `dfdTotalSize` and the
/// basic descriptor block header).
pub const DFD_BYTES_PLANE0_OFFSET: usize = 20;

/// Common Vulkan format values.
pub struct VkFormat;

impl VkFormat {
    pub const UNDEFINED: u32 = 0;
    pub const R8_UNORM: u32 = 9;
    pub const R8G8_UNORM: u32 = 16;
    pub const R8G8B8A8_UNORM: u32 = 37;
    pub const R8G8B8A8_SRGB: u32 = 43;
    pub const R16G16B16A16_SFLOAT: u32 = 97;
    pub const BC1_RGBA_UNORM_BLOCK: u32 = 133;
    pub const BC4_UNORM_BLOCK: u32 = 139;
    pub const BC5_UNORM_BLOCK: u32 = 141;
    pub const BC7_UNORM_BLOCK: u32 = 145;
    pub const BC7_SRGB_BLOCK: u32 = 146;
}
