//! JPEG header rewriting.
//!
//! Byte-level patches over an already-encoded JPEG stream: rewrite the SOF0
//! frame size, insert/update a restart interval, splice in quantization and
//! Huffman tables, or add the Adobe APP14 colorspace marker. None of these
//! operations decode pixels; they only move and rewrite marker segments.

use bytes::{Bytes, BytesMut};

use crate::error::TiffError;
use crate::format::jpeg::{DRI, SOF0, SOS};

use super::tags::find_tag;

/// Replace the height/width fields of the first SOF0 segment with `size`.
///
/// SOF0 payload layout (after the 2-byte length): precision (1 byte),
/// height (2 bytes, big-endian), width (2 bytes, big-endian), then
/// components. Precision, components and sampling are left untouched.
pub fn patch_sof0_size(frame: &[u8], size: (u32, u32)) -> Result<Bytes, TiffError> {
    let (marker_idx, payload_len) = find_tag(frame, SOF0)
        .ok_or_else(|| TiffError::JpegStructureError("missing SOF0".to_string()))?;

    // Offsets relative to the marker's first byte: +2,+3 are length, +4 is
    // precision, +5..+7 height, +7..+9 width.
    if marker_idx + 9 > frame.len() || payload_len < 6 {
        return Err(TiffError::JpegStructureError(
            "SOF0 segment truncated".to_string(),
        ));
    }

    let (width, height) = size;
    let mut out = BytesMut::from(frame);
    out[marker_idx + 5..marker_idx + 7].copy_from_slice(&(height as u16).to_be_bytes());
    out[marker_idx + 7..marker_idx + 9].copy_from_slice(&(width as u16).to_be_bytes());
    Ok(out.freeze())
}

/// Insert or overwrite the restart interval (DRI) of a frame.
///
/// If a DRI marker already exists, its 2-byte payload is overwritten in
/// place. Otherwise a new `FF DD 00 04 <hi> <lo>` segment is inserted
/// immediately before the first SOS.
pub fn upsert_dri(frame: &[u8], interval: u16) -> Result<Bytes, TiffError> {
    if let Some((idx, payload_len)) = find_tag(frame, DRI) {
        if payload_len != 4 || idx + 4 + 2 > frame.len() {
            return Err(TiffError::JpegStructureError(
                "malformed DRI segment".to_string(),
            ));
        }
        let mut out = BytesMut::from(frame);
        out[idx + 4..idx + 6].copy_from_slice(&interval.to_be_bytes());
        return Ok(out.freeze());
    }

    let (sos_idx, _) = find_tag(frame, SOS)
        .ok_or_else(|| TiffError::JpegStructureError("missing SOS".to_string()))?;

    let mut out = BytesMut::with_capacity(frame.len() + 6);
    out.extend_from_slice(&frame[..sos_idx]);
    out.extend_from_slice(&DRI);
    out.extend_from_slice(&[0x00, 0x04]);
    out.extend_from_slice(&interval.to_be_bytes());
    out.extend_from_slice(&frame[sos_idx..]);
    Ok(out.freeze())
}

/// Splice a tables block (DQT/DHT segments) into `frame` immediately before the first SOS.
///
/// `tables_block` is expected to be a complete JPEG fragment bounded by
/// SOI/EOI (as stored in a TIFF `JPEGTables` tag); the SOI and EOI markers
/// are stripped before splicing, leaving only the table segments.
pub fn splice_tables(frame: &[u8], tables_block: &[u8]) -> Result<Bytes, TiffError> {
    if tables_block.len() < 4 {
        return Err(TiffError::JpegStructureError(
            "tables block too short".to_string(),
        ));
    }

    let (sos_idx, _) = find_tag(frame, SOS)
        .ok_or_else(|| TiffError::JpegStructureError("missing SOS".to_string()))?;

    let inner = &tables_block[2..tables_block.len() - 2];

    let mut out = BytesMut::with_capacity(frame.len() + inner.len());
    out.extend_from_slice(&frame[..sos_idx]);
    out.extend_from_slice(inner);
    out.extend_from_slice(&frame[sos_idx..]);
    Ok(out.freeze())
}

/// The 16-byte Adobe APP14 marker signaling `transform = 0` (no YCbCr inversion, i.e. RGB).
const ADOBE_APP14: [u8; 16] = [
    0xFF, 0xEE, 0x00, 0x0E, b'A', b'd', b'o', b'b', b'e', 0x00, 0x64, 0x80, 0x00, 0x00, 0x00, 0x00,
];

/// Insert the Adobe APP14 RGB colorspace fix immediately before the first SOS.
///
/// Without this marker, generic JPEG decoders assume photometric YCbCr and
/// will invert already-RGB pixel data.
pub fn add_rgb_colorspace_fix(frame: &[u8]) -> Result<Bytes, TiffError> {
    let (sos_idx, _) = find_tag(frame, SOS)
        .ok_or_else(|| TiffError::JpegStructureError("missing SOS".to_string()))?;

    let mut out = BytesMut::with_capacity(frame.len() + ADOBE_APP14.len());
    out.extend_from_slice(&frame[..sos_idx]);
    out.extend_from_slice(&ADOBE_APP14);
    out.extend_from_slice(&frame[sos_idx..]);
    Ok(out.freeze())
}
