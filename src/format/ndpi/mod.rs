//! Hamamatsu NDPI format reader.
//!
//! NDPI files are TIFF files where each pyramid level's pixel data lives in
//! one or more JPEG "frames" that are much larger than a single display
//! tile. Reading a tile means synthesizing it from a frame's JPEG
//! coefficients rather than reading a tile-sized fragment directly, the way
//! [`super::svs::SvsReader`] does for abbreviated per-tile streams.
//!
//! Two on-disk layouts occur:
//! - **One-frame**: the whole level is a single embedded JPEG. Every tile
//!   crops out of that one frame.
//! - **Striped**: the level's pixels are split across several on-disk
//!   strips, each itself a complete small JPEG. Frames are built by
//!   vertically stitching the strips that overlap a requested row range.
//!
//! In both cases, the synthesized frame is cached (bounded LRU, keyed by
//! frame position) so repeated tile requests inside the same frame reuse one
//! coefficient-domain crop instead of rebuilding it per tile.

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::error::TiffError;
use crate::io::RangeReader;
use crate::jpeg::{crop_multiple, fill_whole_image, mcu_size, patch_sof0_size, BackgroundCtx, CropRect};
use crate::slide::SlideReader;

use super::tiff::{Ifd, TiffHeader, TiffPyramid, TiffTag, ValueReader};

/// Capacity of the per-level synthesized-frame cache.
///
/// Mirrors [`crate::io::BlockCache`]'s default capacity: NDPI frames are
/// large, so 128 resident frames across a level's viewport is already a
/// generous working set.
pub const DEFAULT_NDPI_FRAME_CACHE_CAPACITY: usize = 128;

/// White background luminance used to pad a frame past the source image's
/// real extent. Matches how blank slide backgrounds scan on Hamamatsu
/// scanners.
const PAD_LUMINANCE: f64 = 1.0;

// =============================================================================
// NdpiTile
// =============================================================================

/// Identifies one display tile's position within the frame it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdpiTile {
    /// Tile coordinate in the level's tile grid (x, y).
    pub position: (u32, u32),

    /// Tile size in pixels (width, height).
    pub tile_size: (u32, u32),

    /// Size in pixels of the frame this tile is cropped from.
    pub frame_size: (u32, u32),
}

impl NdpiTile {
    /// Number of tiles packed along each axis of one frame.
    pub fn tiles_per_frame(&self) -> (u32, u32) {
        (
            (self.frame_size.0 / self.tile_size.0).max(1),
            (self.frame_size.1 / self.tile_size.1).max(1),
        )
    }

    /// Which frame (in frame-grid coordinates) this tile falls in.
    pub fn frame_position(&self) -> (u32, u32) {
        let (tx, ty) = self.tiles_per_frame();
        (self.position.0 / tx, self.position.1 / ty)
    }

    /// Pixel offset of this tile's top-left corner within its frame.
    pub fn offset_in_frame(&self) -> (u32, u32) {
        let (tx, ty) = self.tiles_per_frame();
        (
            (self.position.0 % tx) * self.tile_size.0,
            (self.position.1 % ty) * self.tile_size.1,
        )
    }
}

/// A batch of tiles that all crop from the same synthesized frame.
#[derive(Debug, Clone)]
pub struct NdpiFrameJob {
    pub frame_position: (u32, u32),
    pub frame_size: (u32, u32),
    /// `(caller_order_index, tile)` pairs, in the order they were requested.
    pub tiles: Vec<(usize, NdpiTile)>,
}

/// Group tiles into per-frame jobs, preserving each tile's original request
/// index so callers can reassemble results in input order.
fn bucket_into_jobs(requests: &[NdpiTile]) -> Vec<NdpiFrameJob> {
    let mut jobs: Vec<NdpiFrameJob> = Vec::new();
    for (idx, tile) in requests.iter().enumerate() {
        let frame_position = tile.frame_position();
        if let Some(job) = jobs
            .iter_mut()
            .find(|j| j.frame_position == frame_position && j.frame_size == tile.frame_size)
        {
            job.tiles.push((idx, *tile));
        } else {
            jobs.push(NdpiFrameJob {
                frame_position,
                frame_size: tile.frame_size,
                tiles: vec![(idx, *tile)],
            });
        }
    }
    jobs
}

// =============================================================================
// Level layout
// =============================================================================

/// How a level's pixel data is laid out on disk.
#[derive(Debug, Clone)]
enum NdpiTiledImage {
    /// The whole level is one embedded JPEG.
    OneFrame,
    /// The level is split into row strips, each a standalone JPEG.
    Striped {
        /// Frame size as declared by the first strip's own SOF0 (before any
        /// frame-level padding).
        file_frame_size: (u32, u32),
        strip_offsets: Vec<u64>,
        strip_byte_counts: Vec<u64>,
        rows_per_strip: u32,
    },
}

/// Parsed, ready-to-serve NDPI pyramid level.
struct NdpiLevelData {
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
    downsample: f64,
    subsampling: (u8, u8),
    variant: NdpiTiledImage,

    frame_cache: RwLock<LruCache<(u32, u32), Arc<Bytes>>>,
}

impl NdpiLevelData {
    fn tile_count(&self) -> (u32, u32) {
        (
            self.width.div_ceil(self.tile_width),
            self.height.div_ceil(self.tile_height),
        )
    }

    /// The frame a given tile position belongs to, and that frame's size.
    fn frame_for_tile(&self, tile_x: u32, tile_y: u32) -> NdpiTile {
        let frame_size = match &self.variant {
            NdpiTiledImage::OneFrame => (
                (self.width / self.tile_width + 1) * self.tile_width,
                (self.height / self.tile_height + 1) * self.tile_height,
            ),
            NdpiTiledImage::Striped {
                file_frame_size, ..
            } => {
                let frame_w = self.tile_width.max(file_frame_size.0);
                let frame_h = self.tile_height.max(file_frame_size.1);
                let tiles_per_frame_x = (frame_w / self.tile_width).max(1);
                let tiles_per_frame_y = (frame_h / self.tile_height).max(1);
                let frame_pos_x = tile_x / tiles_per_frame_x;
                let frame_pos_y = tile_y / tiles_per_frame_y;
                let left = frame_pos_x * frame_w;
                let top = frame_pos_y * frame_h;
                let w = frame_w.min(self.width.saturating_sub(left)).max(self.tile_width);
                let h = frame_h.min(self.height.saturating_sub(top)).max(self.tile_height);
                (w, h)
            }
        };

        NdpiTile {
            position: (tile_x, tile_y),
            tile_size: (self.tile_width, self.tile_height),
            frame_size,
        }
    }

    /// Read and synthesize the frame at `frame_position`, sized `frame_size`.
    async fn read_extended_frame<R: RangeReader>(
        &self,
        reader: &R,
        frame_position: (u32, u32),
        frame_size: (u32, u32),
    ) -> Result<Bytes, TiffError> {
        match &self.variant {
            NdpiTiledImage::OneFrame => {
                // Single frame: whole file JPEG. Its own SOF0 declares the
                // unpadded image size, which libjpeg's block arrays already
                // round up past internally; rewrite SOF0 to that MCU-aligned
                // "even" size first so the crop/fill pass below sees a
                // source whose declared dimensions match the coefficient
                // grid libjpeg actually allocated, then pad/crop to fsz.
                let raw = reader.read_exact_at(0, reader.size() as usize).await?;
                let mcu = mcu_size(self.subsampling);
                let even = (
                    self.width.div_ceil(mcu.0) * mcu.0,
                    self.height.div_ceil(mcu.1) * mcu.1,
                );
                let legalized = patch_sof0_size(&raw, even)?;
                self.legalize_to_size(&legalized, frame_size)
            }
            NdpiTiledImage::Striped {
                strip_offsets,
                strip_byte_counts,
                rows_per_strip,
                ..
            } => {
                let top = frame_position.1 * frame_size.1;
                let bottom = (top + frame_size.1).min(self.height);

                let first_strip = (top / *rows_per_strip) as usize;
                let last_strip = ((bottom.saturating_sub(1)) / *rows_per_strip) as usize;

                let mut strips = Vec::with_capacity(last_strip - first_strip + 1);
                for idx in first_strip..=last_strip.min(strip_offsets.len().saturating_sub(1)) {
                    let offset = strip_offsets[idx];
                    let len = strip_byte_counts[idx] as usize;
                    strips.push(reader.read_exact_at(offset, len).await?);
                }
                let strip_refs: Vec<&[u8]> = strips.iter().map(|s| s.as_ref()).collect();

                let header = patch_sof0_size(&strips[0], frame_size)?;
                let stitched = crate::jpeg::concatenate_fragments(&strip_refs, &header)?;
                self.legalize_to_size(&stitched, frame_size)
            }
        }
    }

    /// Pad/crop a decoded-header-sized source frame to exactly `frame_size`,
    /// filling any extension past the real image with white background.
    fn legalize_to_size(&self, source: &[u8], frame_size: (u32, u32)) -> Result<Bytes, TiffError> {
        let rects = [CropRect {
            x: 0,
            y: 0,
            w: frame_size.0,
            h: frame_size.1,
        }];
        let background = BackgroundCtx {
            image_w: self.width,
            image_h: self.height,
            subsampling: self.subsampling,
            luminance: PAD_LUMINANCE,
        };
        let mut out = crop_multiple(source, &rects, self.subsampling, Some(background))?;
        Ok(out.remove(0))
    }

    /// Crop each tile in `job` out of a synthesized frame, building or
    /// reusing it via the frame cache.
    async fn build_job<R: RangeReader>(
        &self,
        reader: &R,
        job: &NdpiFrameJob,
    ) -> Result<Vec<(usize, Bytes)>, TiffError> {
        let frame = {
            let mut cache = self.frame_cache.write().await;
            if let Some(hit) = cache.get(&job.frame_position) {
                trace!(frame_position = ?job.frame_position, "ndpi frame cache hit");
                hit.clone()
            } else {
                drop(cache);
                debug!(
                    frame_position = ?job.frame_position,
                    frame_size = ?job.frame_size,
                    "ndpi frame cache miss, building frame"
                );
                let built = Arc::new(
                    self.read_extended_frame(reader, job.frame_position, job.frame_size)
                        .await?,
                );
                let mut cache = self.frame_cache.write().await;
                cache.put(job.frame_position, built.clone());
                built
            }
        };

        let rects: Vec<CropRect> = job
            .tiles
            .iter()
            .map(|(_, tile)| {
                let (x, y) = tile.offset_in_frame();
                CropRect {
                    x,
                    y,
                    w: tile.tile_size.0,
                    h: tile.tile_size.1,
                }
            })
            .collect();

        debug!(tile_count = rects.len(), frame_position = ?job.frame_position, "cropping tile batch from ndpi frame");
        let crops = crop_multiple(&frame, &rects, self.subsampling, None)?;
        Ok(job
            .tiles
            .iter()
            .map(|(idx, _)| *idx)
            .zip(crops.into_iter())
            .collect())
    }
}

// =============================================================================
// NdpiReader
// =============================================================================

/// Reader for Hamamatsu NDPI files.
pub struct NdpiReader {
    header: TiffHeader,
    levels: Vec<NdpiLevelData>,
}

impl NdpiReader {
    /// Open an NDPI file and parse its pyramid levels.
    ///
    /// NDPI levels are strip-organized, so they never satisfy
    /// [`super::tiff::PyramidLevel::from_ifd`]'s tile-tag requirement and end
    /// up in [`TiffPyramid::other_ifds`] instead of `levels`. This reuses
    /// that IFD walk rather than re-parsing the file.
    pub async fn open<R: RangeReader>(reader: &R) -> Result<Self, TiffError> {
        let pyramid = TiffPyramid::parse(reader).await?;

        let mut candidates: Vec<(u32, u32, NdpiLevelData)> = Vec::new();

        for (_ifd_index, ifd) in &pyramid.other_ifds {
            if let Some(level) = Self::level_from_ifd(reader, ifd, &pyramid.header).await? {
                candidates.push((level.width, level.height, level));
            }
        }

        candidates.sort_by(|a, b| (b.0 as u64 * b.1 as u64).cmp(&(a.0 as u64 * a.1 as u64)));

        if candidates.is_empty() {
            return Err(TiffError::MissingTag("ImageWidth"));
        }

        let base_area = candidates[0].0 as f64 * candidates[0].1 as f64;
        let mut levels = Vec::with_capacity(candidates.len());
        for (w, h, mut level) in candidates {
            let area = w as f64 * h as f64;
            level.downsample = (base_area / area).sqrt();
            levels.push(level);
        }

        Ok(NdpiReader {
            header: pyramid.header,
            levels,
        })
    }

    async fn level_from_ifd<R: RangeReader>(
        reader: &R,
        ifd: &Ifd,
        header: &TiffHeader,
    ) -> Result<Option<NdpiLevelData>, TiffError> {
        let byte_order = header.byte_order;
        let width = match ifd.image_width(byte_order) {
            Some(w) => w,
            None => return Ok(None),
        };
        let height = match ifd.image_height(byte_order) {
            Some(h) => h,
            None => return Ok(None),
        };

        let value_reader = ValueReader::new(reader, header);

        let strip_offsets_entry = ifd.get_entry_by_tag(TiffTag::StripOffsets);
        let strip_byte_counts_entry = ifd.get_entry_by_tag(TiffTag::StripByteCounts);
        let rows_per_strip = ifd
            .get_entry_by_tag(TiffTag::RowsPerStrip)
            .and_then(|e| e.inline_u32(byte_order))
            .unwrap_or(height);

        // YCbCrSubSampling is SHORT[2]: both components fit in the 4-byte
        // inline value field, so read them directly rather than through
        // `inline_u32` (which only decodes a single scalar value).
        let subsampling = ifd
            .get_entry_by_tag(TiffTag::YCbCrSubSampling)
            .filter(|e| e.is_inline && e.value_offset_bytes.len() >= 4)
            .map(|e| {
                let h = byte_order.read_u16(&e.value_offset_bytes[0..2]);
                let v = byte_order.read_u16(&e.value_offset_bytes[2..4]);
                (h as u8, v as u8)
            })
            .filter(|&(h, v)| h > 0 && v > 0)
            .unwrap_or((2, 2));

        let (variant, tile_width, tile_height) = match (strip_offsets_entry, strip_byte_counts_entry)
        {
            (Some(offsets_entry), Some(counts_entry)) => {
                let strip_offsets = value_reader.read_u64_array(offsets_entry).await?;
                let strip_byte_counts = value_reader.read_u64_array(counts_entry).await?;

                if strip_offsets.is_empty() {
                    return Ok(None);
                }

                // First strip's own JPEG declares the on-disk frame size;
                // used as the minimum frame extent before any tile-aligned padding.
                let first_len = strip_byte_counts[0] as usize;
                let first_bytes = reader.read_exact_at(strip_offsets[0], first_len).await?;
                let (frame_w, frame_h) = decode_sof0_size(&first_bytes)?;

                let tile_width = width.min(frame_w).max(1);
                let tile_height = rows_per_strip.min(frame_h).max(1);

                (
                    NdpiTiledImage::Striped {
                        file_frame_size: (frame_w, frame_h),
                        strip_offsets,
                        strip_byte_counts,
                        rows_per_strip,
                    },
                    tile_width,
                    tile_height,
                )
            }
            _ => {
                // One-frame image: the whole level is a single JPEG, tiled
                // virtually at a fixed display tile size.
                const ONE_FRAME_TILE: u32 = 512;
                (NdpiTiledImage::OneFrame, ONE_FRAME_TILE, ONE_FRAME_TILE)
            }
        };

        Ok(Some(NdpiLevelData {
            width,
            height,
            tile_width,
            tile_height,
            downsample: 1.0,
            subsampling,
            variant,
            frame_cache: RwLock::new(LruCache::new(
                NonZeroUsize::new(DEFAULT_NDPI_FRAME_CACHE_CAPACITY).unwrap(),
            )),
        }))
    }

    /// Get the TIFF header.
    pub fn header(&self) -> &TiffHeader {
        &self.header
    }

    /// Number of pyramid levels.
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Read a single tile, synthesizing it from its frame.
    pub async fn read_tile<R: RangeReader>(
        &self,
        reader: &R,
        level: usize,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<Bytes, TiffError> {
        let level_data = self.levels.get(level).ok_or(TiffError::InvalidTagValue {
            tag: "level",
            message: format!("level {} out of range", level),
        })?;

        let (tiles_x, tiles_y) = level_data.tile_count();
        if tile_x >= tiles_x || tile_y >= tiles_y {
            return Err(TiffError::TileOutOfBounds {
                position: (tile_x, tile_y),
                tiled_size: (tiles_x, tiles_y),
            });
        }

        let tile = level_data.frame_for_tile(tile_x, tile_y);
        let job = NdpiFrameJob {
            frame_position: tile.frame_position(),
            frame_size: tile.frame_size,
            tiles: vec![(0, tile)],
        };

        let mut results = level_data.build_job(reader, &job).await?;
        Ok(results.remove(0).1)
    }

    /// Read several tiles at once, batching tiles that share a frame so the
    /// frame is only synthesized once. Results are returned in request order.
    pub async fn read_tiles<R: RangeReader>(
        &self,
        reader: &R,
        level: usize,
        positions: &[(u32, u32)],
    ) -> Result<Vec<Bytes>, TiffError> {
        let level_data = self.levels.get(level).ok_or(TiffError::InvalidTagValue {
            tag: "level",
            message: format!("level {} out of range", level),
        })?;

        let (tiles_x, tiles_y) = level_data.tile_count();
        let mut requests = Vec::with_capacity(positions.len());
        for &(tx, ty) in positions {
            if tx >= tiles_x || ty >= tiles_y {
                return Err(TiffError::TileOutOfBounds {
                    position: (tx, ty),
                    tiled_size: (tiles_x, tiles_y),
                });
            }
            requests.push(level_data.frame_for_tile(tx, ty));
        }

        let jobs = bucket_into_jobs(&requests);
        let mut ordered: Vec<Option<Bytes>> = vec![None; positions.len()];
        for job in &jobs {
            for (idx, data) in level_data.build_job(reader, job).await? {
                ordered[idx] = Some(data);
            }
        }

        Ok(ordered.into_iter().map(|b| b.expect("every request index covered by exactly one job")).collect())
    }
}

/// Read width/height out of a JPEG's first SOF0 segment.
fn decode_sof0_size(data: &[u8]) -> Result<(u32, u32), TiffError> {
    let (idx, payload_len) = crate::jpeg::find_tag(data, [0xFF, 0xC0])
        .ok_or_else(|| TiffError::JpegStructureError("strip missing SOF0".to_string()))?;
    if payload_len < 6 || idx + 9 > data.len() {
        return Err(TiffError::JpegStructureError(
            "SOF0 segment truncated".to_string(),
        ));
    }
    let height = u16::from_be_bytes([data[idx + 5], data[idx + 6]]) as u32;
    let width = u16::from_be_bytes([data[idx + 7], data[idx + 8]]) as u32;
    Ok((width, height))
}

// =============================================================================
// Tile-size negotiation
// =============================================================================

/// Negotiate a display tile size against the smallest on-disk strip width.
///
/// If there is no strip width to reconcile against, or it already matches
/// the request, the requested size is adopted unchanged. Otherwise the
/// ratio between the two is rounded to the nearest power of two and the
/// tile size is set to that multiple of the smaller of the two. The result
/// must be a multiple of 8 (one MCU row) or negotiation fails.
pub fn negotiate_tile_size(requested: u32, smallest_strip_width: Option<u32>) -> Result<u32, TiffError> {
    let adopted = match smallest_strip_width {
        None => requested,
        Some(s) if s == requested => requested,
        Some(s) => {
            let (hi, lo) = if requested > s {
                (requested, s)
            } else {
                (s, requested)
            };
            let ratio = hi as f64 / lo as f64;
            let f2 = nearest_power_of_two(ratio);
            f2 * lo
        }
    };

    if adopted % 8 != 0 {
        return Err(TiffError::InvalidTagValue {
            tag: "tile_size",
            message: format!("negotiated tile size {} is not a multiple of 8", adopted),
        });
    }

    Ok(adopted)
}

fn nearest_power_of_two(x: f64) -> u32 {
    if x <= 1.0 {
        return 1;
    }
    2u32.pow(x.log2().round() as u32)
}

// =============================================================================
// SlideReader implementation
// =============================================================================

#[async_trait]
impl SlideReader for NdpiReader {
    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.levels.first().map(|l| (l.width, l.height))
    }

    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
        self.levels.get(level).map(|l| (l.width, l.height))
    }

    fn level_downsample(&self, level: usize) -> Option<f64> {
        self.levels.get(level).map(|l| l.downsample)
    }

    fn tile_size(&self, level: usize) -> Option<(u32, u32)> {
        self.levels.get(level).map(|l| (l.tile_width, l.tile_height))
    }

    fn tile_count(&self, level: usize) -> Option<(u32, u32)> {
        self.levels.get(level).map(|l| l.tile_count())
    }

    fn best_level_for_downsample(&self, downsample: f64) -> Option<usize> {
        self.levels
            .iter()
            .enumerate()
            .filter(|(_, l)| l.downsample >= downsample - 1e-6)
            .min_by(|(_, a), (_, b)| a.downsample.partial_cmp(&b.downsample).unwrap())
            .map(|(i, _)| i)
            .or_else(|| (!self.levels.is_empty()).then_some(self.levels.len() - 1))
    }

    async fn read_tile<R: RangeReader>(
        &self,
        reader: &R,
        level: usize,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<Bytes, TiffError> {
        NdpiReader::read_tile(self, reader, level, tile_x, tile_y).await
    }
}

// =============================================================================
// Tests
// =============================================================================
