//! TIFF header and structure parsing.
//!
//! This module handles parsing of TIFF and BigTIFF file headers,
//! which is the foundation for all subsequent parsing operations.
//!
//! # TIFF Header Structure
//!
//! ## Classic TIFF (8 bytes)
//! ```text
//! Bytes 0-1: Byte order (0x4949 = little-endian "II", 0x4D4D = big-endian "MM")
//! Bytes 2-3: Version (42 = 0x002A)
//! Bytes 4-7: Offset to first IFD (4 bytes)
//! ```
//!
//! ## BigTIFF (16 bytes)
//! ```text
//! Bytes 0-1: Byte order (0x4949 = little-endian "II", 0x4D4D = big-endian "MM")
//! Bytes 2-3: Version (43 = 0x002B)
//! Bytes 4-5: Offset byte size (must be 8)
//! Bytes 6-7: Reserved (must be 0)
//! Bytes 8-15: Offset to first IFD (8 bytes)
//! ```

use crate::error::TiffError;
use crate::io::{read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le};

use super::tags::{FieldType, TiffTag};

// =============================================================================
// Constants
// =============================================================================

/// Magic bytes indicating little-endian byte order ("II" for Intel)
const BYTE_ORDER_LITTLE_ENDIAN: u16 = 0x4949;

/// Magic bytes indicating big-endian byte order ("MM" for Motorola)
const BYTE_ORDER_BIG_ENDIAN: u16 = 0x4D4D;

/// Version number for classic TIFF
const VERSION_TIFF: u16 = 42;

/// Version number for BigTIFF
const VERSION_BIGTIFF: u16 = 43;

/// Size of classic TIFF header in bytes
pub const TIFF_HEADER_SIZE: usize = 8;

/// Size of BigTIFF header in bytes
pub const BIGTIFF_HEADER_SIZE: usize = 16;

// =============================================================================
// ByteOrder
// =============================================================================

/// Byte order (endianness) of a TIFF file.
///
/// TIFF files declare their byte order in the first two bytes of the header.
/// All multi-byte values in the file must be read respecting this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian ("II" = Intel)
    LittleEndian,
    /// Big-endian ("MM" = Motorola)
    BigEndian,
}

impl ByteOrder {
    /// Read a u16 from a byte slice using this byte order.
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        match self {
            ByteOrder::LittleEndian => read_u16_le(bytes),
            ByteOrder::BigEndian => read_u16_be(bytes),
        }
    }

    /// Read a u32 from a byte slice using this byte order.
    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        match self {
            ByteOrder::LittleEndian => read_u32_le(bytes),
            ByteOrder::BigEndian => read_u32_be(bytes),
        }
    }

    /// Read a u64 from a byte slice using this byte order.
    #[inline]
    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        match self {
            ByteOrder::LittleEndian => read_u64_le(bytes),
            ByteOrder::BigEndian => read_u64_be(bytes),
        }
    }
}

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed TIFF file header.
///
/// Contains the essential information needed to begin parsing IFDs:
/// - Byte order for reading all subsequent values
/// - Whether this is classic TIFF or BigTIFF (affects entry sizes and offset widths)
/// - Location of the first IFD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    /// Byte order for all multi-byte values in the file
    pub byte_order: ByteOrder,

    /// Whether this is a BigTIFF file (64-bit offsets)
    pub is_bigtiff: bool,

    /// Offset to the first IFD in the file
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse a TIFF header from raw bytes.
    ///
    /// The input must contain at least 8 bytes for classic TIFF or 16 bytes for BigTIFF.
    /// The function first reads enough to determine the format, then validates the rest.
    ///
    /// # Arguments
    /// * `bytes` - Raw header bytes (at least 8 bytes, preferably 16 for BigTIFF support)
    /// * `file_size` - Total file size (used to validate IFD offset)
    ///
    /// # Errors
    /// - `InvalidMagic` if byte order bytes are not II or MM
    /// - `InvalidVersion` if version is not 42 or 43
    /// - `InvalidBigTiffOffsetSize` if BigTIFF offset size is not 8
    /// - `FileTooSmall` if there aren't enough bytes for the header
    /// - `InvalidIfdOffset` if the first IFD offset is outside the file
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        // Need at least 8 bytes to read the basic header
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        // Read byte order (bytes 0-1)
        // We read this as little-endian because we're checking for specific byte patterns
        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        let byte_order = match magic {
            BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(magic)),
        };

        // Read version (bytes 2-3) using the detected byte order
        let version = byte_order.read_u16(&bytes[2..4]);

        match version {
            VERSION_TIFF => {
                // Classic TIFF: 4-byte offset at bytes 4-7
                let first_ifd_offset = byte_order.read_u32(&bytes[4..8]) as u64;

                // Validate offset
                if first_ifd_offset >= file_size {
                    return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
                }

                Ok(TiffHeader {
                    byte_order,
                    is_bigtiff: false,
                    first_ifd_offset,
                })
            }
            VERSION_BIGTIFF => {
                // BigTIFF: need 16 bytes total
                if bytes.len() < BIGTIFF_HEADER_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: BIGTIFF_HEADER_SIZE as u64,
                        actual: bytes.len() as u64,
                    });
                }

                // Bytes 4-5: offset byte size (must be 8)
                let offset_size = byte_order.read_u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }

                // Bytes 6-7: reserved (should be 0, but we don't strictly require it)

                // Bytes 8-15: first IFD offset (8 bytes)
                let first_ifd_offset = byte_order.read_u64(&bytes[8..16]);

                // Validate offset
                if first_ifd_offset >= file_size {
                    return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
                }

                Ok(TiffHeader {
                    byte_order,
                    is_bigtiff: true,
                    first_ifd_offset,
                })
            }
            _ => Err(TiffError::InvalidVersion(version)),
        }
    }

    /// Size of an IFD entry in bytes.
    ///
    /// Classic TIFF: 12 bytes (2 tag + 2 type + 4 count + 4 value/offset)
    /// BigTIFF: 20 bytes (2 tag + 2 type + 8 count + 8 value/offset)
    #[inline]
    pub const fn ifd_entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    /// Size of the entry count field at the start of an IFD.
    ///
    /// Classic TIFF: 2 bytes (u16)
    /// BigTIFF: 8 bytes (u64)
    #[inline]
    pub const fn ifd_count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    /// Size of the next IFD offset field at the end of an IFD.
    ///
    /// Classic TIFF: 4 bytes (u32)
    /// BigTIFF: 8 bytes (u64)
    #[inline]
    pub const fn ifd_next_offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }

    /// Size of the value/offset field in an IFD entry.
    ///
    /// This determines the inline value threshold:
    /// Classic TIFF: 4 bytes
    /// BigTIFF: 8 bytes
    #[inline]
    pub const fn value_offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }
}

// =============================================================================
// IfdEntry
// =============================================================================

/// A single parsed entry from an Image File Directory.
///
/// Entries are fixed-size records (12 bytes classic TIFF, 20 bytes BigTIFF)
/// holding a tag, a field type, a value count, and either the value itself
/// (if it fits) or an offset to where the value is stored in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdEntry {
    /// The tag ID identifying what this entry describes.
    pub tag_id: u16,

    /// The decoded field type, or `None` if the raw type value is unrecognized.
    pub field_type: Option<FieldType>,

    /// The raw field type value as read from the file, kept for error reporting
    /// when `field_type` fails to decode.
    pub field_type_raw: u16,

    /// Number of values of `field_type` stored for this entry.
    pub count: u64,

    /// The raw bytes of the value/offset field (4 bytes classic, 8 bytes BigTIFF).
    pub value_offset_bytes: Vec<u8>,

    /// Whether the value is stored inline in `value_offset_bytes` rather than
    /// at a file offset.
    pub is_inline: bool,
}

impl IfdEntry {
    /// Total size in bytes of this entry's value, or `None` if the field type
    /// is unrecognized.
    pub fn value_byte_size(&self) -> Option<u64> {
        let field_type = self.field_type?;
        Some(field_type.size_in_bytes() as u64 * self.count)
    }

    /// Decode an inline value as a `u32`, honoring the actual field width.
    ///
    /// Returns `None` if the value isn't inline or the field type is unknown.
    pub fn inline_u32(&self, byte_order: ByteOrder) -> Option<u32> {
        if !self.is_inline {
            return None;
        }
        let field_type = self.field_type?;
        let size = field_type.size_in_bytes();
        let bytes = self.value_offset_bytes.get(..size)?;
        Some(match size {
            1 => bytes[0] as u32,
            2 => byte_order.read_u16(bytes) as u32,
            4 => byte_order.read_u32(bytes),
            _ => return None,
        })
    }

    /// Decode an inline value as a `u64`, honoring the actual field width.
    pub fn inline_u64(&self, byte_order: ByteOrder) -> Option<u64> {
        if !self.is_inline {
            return None;
        }
        let field_type = self.field_type?;
        let size = field_type.size_in_bytes();
        let bytes = self.value_offset_bytes.get(..size)?;
        Some(match size {
            1 => bytes[0] as u64,
            2 => byte_order.read_u16(bytes) as u64,
            4 => byte_order.read_u32(bytes) as u64,
            8 => byte_order.read_u64(bytes),
            _ => return None,
        })
    }

    /// Interpret `value_offset_bytes` as a file offset (non-inline entries).
    pub fn value_offset(&self, byte_order: ByteOrder) -> u64 {
        match self.value_offset_bytes.len() {
            8 => byte_order.read_u64(&self.value_offset_bytes),
            4 => byte_order.read_u32(&self.value_offset_bytes) as u64,
            _ => 0,
        }
    }
}

// =============================================================================
// Ifd
// =============================================================================

/// A parsed Image File Directory: a flat list of entries plus the offset to
/// the next IFD in the file (0 if this is the last one).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ifd {
    /// Entries in file order.
    pub entries: Vec<IfdEntry>,

    /// Offset to the next IFD, or 0 if none.
    pub next_ifd_offset: u64,
}

impl Ifd {
    /// An IFD with no entries and no successor. Used in tests as a base to
    /// build synthetic IFDs from.
    pub fn empty() -> Self {
        Ifd {
            entries: Vec::new(),
            next_ifd_offset: 0,
        }
    }

    /// Total byte size of an IFD with `entry_count` entries, including the
    /// leading count field and the trailing next-IFD offset.
    pub fn calculate_size(entry_count: u64, header: &TiffHeader) -> usize {
        header.ifd_count_size()
            + entry_count as usize * header.ifd_entry_size()
            + header.ifd_next_offset_size()
    }

    /// Parse an IFD from a byte slice starting at its entry count field.
    ///
    /// `bytes` must contain at least `calculate_size(entry_count, header)`
    /// bytes, where `entry_count` is read from the first `ifd_count_size()`
    /// bytes of the slice.
    pub fn parse(bytes: &[u8], header: &TiffHeader) -> Result<Self, TiffError> {
        let count_size = header.ifd_count_size();
        if bytes.len() < count_size {
            return Err(TiffError::FileTooSmall {
                required: count_size as u64,
                actual: bytes.len() as u64,
            });
        }

        let entry_count = if header.is_bigtiff {
            header.byte_order.read_u64(&bytes[..count_size])
        } else {
            header.byte_order.read_u16(&bytes[..count_size]) as u64
        };

        let entry_size = header.ifd_entry_size();
        let value_offset_size = header.value_offset_size();
        let required = count_size
            + entry_count as usize * entry_size
            + header.ifd_next_offset_size();
        if bytes.len() < required {
            return Err(TiffError::FileTooSmall {
                required: required as u64,
                actual: bytes.len() as u64,
            });
        }

        let mut entries = Vec::with_capacity(entry_count as usize);
        let mut offset = count_size;

        for _ in 0..entry_count {
            let entry_bytes = &bytes[offset..offset + entry_size];

            let tag_id = header.byte_order.read_u16(&entry_bytes[0..2]);
            let field_type_raw = header.byte_order.read_u16(&entry_bytes[2..4]);
            let field_type = FieldType::from_u16(field_type_raw);

            let (count, value_offset_bytes) = if header.is_bigtiff {
                let count = header.byte_order.read_u64(&entry_bytes[4..12]);
                (count, entry_bytes[12..12 + value_offset_size].to_vec())
            } else {
                let count = header.byte_order.read_u32(&entry_bytes[4..8]) as u64;
                (count, entry_bytes[8..8 + value_offset_size].to_vec())
            };

            let is_inline = field_type
                .map(|ft| ft.fits_inline(count, header.is_bigtiff))
                .unwrap_or(false);

            entries.push(IfdEntry {
                tag_id,
                field_type,
                field_type_raw,
                count,
                value_offset_bytes,
                is_inline,
            });

            offset += entry_size;
        }

        let next_ifd_offset = if header.is_bigtiff {
            header.byte_order.read_u64(&bytes[offset..offset + 8])
        } else {
            header.byte_order.read_u32(&bytes[offset..offset + 4]) as u64
        };

        Ok(Ifd {
            entries,
            next_ifd_offset,
        })
    }

    /// Find the first entry with the given tag, if present.
    pub fn get_entry_by_tag(&self, tag: TiffTag) -> Option<&IfdEntry> {
        self.entries.iter().find(|e| e.tag_id == tag as u16)
    }

    /// Whether this IFD declares tile organization (TileWidth and TileLength present).
    pub fn is_tiled(&self) -> bool {
        self.get_entry_by_tag(TiffTag::TileWidth).is_some()
            && self.get_entry_by_tag(TiffTag::TileLength).is_some()
    }

    /// Whether this IFD declares strip organization (StripOffsets or RowsPerStrip present).
    pub fn is_stripped(&self) -> bool {
        self.get_entry_by_tag(TiffTag::StripOffsets).is_some()
            || self.get_entry_by_tag(TiffTag::RowsPerStrip).is_some()
    }

    /// The Compression tag value, if present.
    pub fn compression(&self, byte_order: ByteOrder) -> Option<u16> {
        self.get_entry_by_tag(TiffTag::Compression)?
            .inline_u32(byte_order)
            .map(|v| v as u16)
    }

    /// ImageWidth, if present.
    pub fn image_width(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_entry_by_tag(TiffTag::ImageWidth)?
            .inline_u32(byte_order)
    }

    /// ImageLength, if present.
    pub fn image_height(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_entry_by_tag(TiffTag::ImageLength)?
            .inline_u32(byte_order)
    }

    /// TileWidth, if present.
    pub fn tile_width(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_entry_by_tag(TiffTag::TileWidth)?
            .inline_u32(byte_order)
    }

    /// TileLength, if present.
    pub fn tile_height(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_entry_by_tag(TiffTag::TileLength)?
            .inline_u32(byte_order)
    }
}

// =============================================================================
// Tests
// =============================================================================
