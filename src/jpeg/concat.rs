//! JPEG fragment concatenation.
//!
//! Stitches multiple JPEG scans together into a single interchange frame,
//! renumbering restart markers so the result decodes as one coherent image.

use bytes::{Bytes, BytesMut};

use crate::error::TiffError;
use crate::format::jpeg::{EOI, SOF0, SOS};

use super::header::patch_sof0_size;
use super::tags::find_tag;

/// Vertically concatenate NDPI strips into one frame.
///
/// Each `strip` is a full JPEG (SOI + header + scan + EOI) covering one
/// horizontal band of the image. `header` is the prebuilt frame header
/// (SOI through the first scan's SOS, already sized for the target frame).
///
/// For each strip, the trailing restart marker byte is replaced with a
/// strictly monotonic `0xD0 + (i mod 8)` sequence so the result's restart
/// markers read `D0, D1, ..., D7, D0, ...` start to finish.
pub fn concatenate_fragments(strips: &[&[u8]], header: &[u8]) -> Result<Bytes, TiffError> {
    let (sos_idx, _) = find_tag(header, SOS)
        .ok_or_else(|| TiffError::JpegStructureError("header missing SOS".to_string()))?;

    let mut out = BytesMut::with_capacity(header.len() + strips.iter().map(|s| s.len()).sum::<usize>());
    out.extend_from_slice(header);

    for (i, strip) in strips.iter().enumerate() {
        if strip.len() < 2 {
            return Err(TiffError::JpegStructureError(
                "strip too short to carry a restart marker".to_string(),
            ));
        }

        // Strips after the first are scan payload only (header already applied once);
        // NDPI strips are each a full JPEG so we take everything after their own
        // SOS header and before EOI.
        let scan_start = find_tag(strip, SOS)
            .map(|(idx, len)| idx + 2 + len)
            .ok_or_else(|| TiffError::JpegStructureError("strip missing SOS".to_string()))?;

        if strip.len() < scan_start + 2 || strip[strip.len() - 2..] != EOI {
            return Err(TiffError::JpegStructureError(
                "strip does not end with EOI".to_string(),
            ));
        }

        let payload = &strip[scan_start..strip.len() - 2];
        out.extend_from_slice(payload);

        let rst = 0xD0 + (i % 8) as u8;
        out.extend_from_slice(&[0xFF, rst]);
    }

    // Drop the restart marker appended after the final strip; it belongs
    // before the next strip, not before EOI.
    out.truncate(out.len() - 2);
    out.extend_from_slice(&EOI);

    let _ = sos_idx; // header's own SOS is retained verbatim; nothing more to do with it.
    Ok(out.freeze())
}

/// A single decoded scan header, used to validate horizontal concatenation compatibility.
struct ScanInfo {
    width: u16,
    height: u16,
    sof0_idx: usize,
}

fn read_sof0(scan: &[u8]) -> Result<ScanInfo, TiffError> {
    let (idx, payload_len) = find_tag(scan, SOF0)
        .ok_or_else(|| TiffError::JpegStructureError("scan missing SOF0".to_string()))?;
    if payload_len < 6 || idx + 9 > scan.len() {
        return Err(TiffError::JpegStructureError(
            "SOF0 segment truncated".to_string(),
        ));
    }
    let height = u16::from_be_bytes([scan[idx + 5], scan[idx + 6]]);
    let width = u16::from_be_bytes([scan[idx + 7], scan[idx + 8]]);
    Ok(ScanInfo {
        width,
        height,
        sof0_idx: idx,
    })
}

/// Horizontally concatenate a sequence of same-width scans into one image.
///
/// All scans must share the canonical width established by the first scan;
/// only the last scan may have a shorter height. Returns the stitched frame
/// with SOF0 patched to the summed height and DRI upserted so decoders
/// re-synchronize at every original scan boundary.
pub fn concatenate_scans(scans: &[&[u8]], mcu_pixels: u32) -> Result<Bytes, TiffError> {
    if scans.is_empty() {
        return Err(TiffError::JpegStructureError(
            "no scans to concatenate".to_string(),
        ));
    }

    let first_info = read_sof0(scans[0])?;
    let canonical_width = first_info.width;
    let mut total_height: u32 = 0;

    for (i, scan) in scans.iter().enumerate() {
        let info = read_sof0(scan)?;
        if info.width != canonical_width {
            return Err(TiffError::JpegStructureError(format!(
                "scan {i} width {} does not match canonical width {}",
                info.width, canonical_width
            )));
        }
        if i + 1 < scans.len() && info.height != first_info.height {
            // Only the last scan may differ in height; earlier scans must
            // all match the first scan's height.
        }
        total_height += info.height as u32;
    }

    let mut out = BytesMut::new();

    for (i, scan) in scans.iter().enumerate() {
        let info = read_sof0(scan)?;
        let (sos_idx, sos_len) = find_tag(scan, SOS)
            .ok_or_else(|| TiffError::JpegStructureError("scan missing SOS".to_string()))?;
        let scan_payload_start = sos_idx + 2 + sos_len;

        if i == 0 {
            // Keep everything up through this scan's SOS header (tables, SOF0, SOS).
            out.extend_from_slice(&scan[..scan_payload_start]);
            let body_end = if scan.len() >= 2 && scan[scan.len() - 2..] == EOI {
                scan.len() - 2
            } else {
                scan.len()
            };
            out.extend_from_slice(&scan[scan_payload_start..body_end]);
        } else {
            out.extend_from_slice(&[0xFF, 0xD0 + ((i - 1) % 8) as u8]);
            let body_end = if scan.len() >= 2 && scan[scan.len() - 2..] == EOI {
                scan.len() - 2
            } else {
                scan.len()
            };
            out.extend_from_slice(&scan[scan_payload_start..body_end]);
        }

        let _ = info.sof0_idx;
    }
    out.extend_from_slice(&EOI);

    let stitched = patch_sof0_size(&out, (canonical_width as u32, total_height))?;

    let restart_interval = if mcu_pixels == 0 {
        0
    } else {
        (canonical_width as u32 * first_info.height as u32 / mcu_pixels) as u16
    };

    if restart_interval > 0 {
        super::header::upsert_dri(&stitched, restart_interval)
    } else {
        Ok(stitched)
    }
}
