//! Tile Service for orchestrating tile generation.
//!
//! The TileService is the main entry point for tile requests. It orchestrates:
//! - Request validation
//! - Cache lookups
//! - Slide access via registry
//! - JPEG decoding and re-encoding
//! - Result caching
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         TileService                              │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │                    get_tile()                           │    │
//! │  │  1. Validate params   4. Read tile from slide           │    │
//! │  │  2. Check cache       5. Encode at quality              │    │
//! │  │  3. Get slide         6. Cache & return                 │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │           │                    │                    │            │
//! │           ▼                    ▼                    ▼            │
//! │    ┌───────────┐      ┌──────────────┐    ┌──────────────────┐  │
//! │    │ TileCache │      │ SlideRegistry│    │ JpegTileEncoder  │  │
//! │    └───────────┘      └──────────────┘    └──────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use bytes::Bytes;

use crate::error::TileError;
use crate::slide::{SlideRegistry, SlideSource};

use super::cache::{TileCache, TileCacheKey};
use super::encoder::{is_valid_quality, JpegTileEncoder, DEFAULT_JPEG_QUALITY};

// =============================================================================
// Tile Request
// =============================================================================

/// A request for a tile.
///
/// This struct contains all parameters needed to identify and render a tile.
#[derive(Debug, Clone)]
pub struct TileRequest {
    /// Slide identifier (e.g., S3 path)
    pub slide_id: String,

    /// Pyramid level (0 = highest resolution)
    pub level: usize,

    /// Tile X coordinate (0-indexed from left)
    pub tile_x: u32,

    /// Tile Y coordinate (0-indexed from top)
    pub tile_y: u32,

    /// JPEG quality (1-100, defaults to 80)
    pub quality: u8,
}

impl TileRequest {
    /// Create a new tile request with default quality.
    pub fn new(slide_id: impl Into<String>, level: usize, tile_x: u32, tile_y: u32) -> Self {
        Self {
            slide_id: slide_id.into(),
            level,
            tile_x,
            tile_y,
            quality: DEFAULT_JPEG_QUALITY,
        }
    }

    /// Create a new tile request with specified quality.
    pub fn with_quality(
        slide_id: impl Into<String>,
        level: usize,
        tile_x: u32,
        tile_y: u32,
        quality: u8,
    ) -> Self {
        Self {
            slide_id: slide_id.into(),
            level,
            tile_x,
            tile_y,
            quality,
        }
    }
}

// =============================================================================
// Tile Response
// =============================================================================

/// Response from the tile service.
#[derive(Debug, Clone)]
pub struct TileResponse {
    /// The encoded JPEG tile data
    pub data: Bytes,

    /// Whether this tile was served from cache
    pub cache_hit: bool,

    /// The JPEG quality used for encoding
    pub quality: u8,
}

// =============================================================================
// Tile Service
// =============================================================================

/// Service for generating and caching tiles.
///
/// The TileService orchestrates the full tile pipeline:
/// 1. Validates request parameters
/// 2. Checks the tile cache for existing results
/// 3. Fetches the slide from the registry
/// 4. Reads raw tile data from the slide
/// 5. Decodes and re-encodes at the requested quality
/// 6. Caches and returns the result
///
/// # Type Parameters
///
/// * `S` - The slide source type (e.g., S3-based source)
///
/// # Example
///
/// ```ignore
/// use wsi_tiler::tile::{TileService, TileRequest};
/// use wsi_tiler::slide::SlideRegistry;
///
/// // Create registry and service
/// let registry = SlideRegistry::new(source);
/// let service = TileService::new(registry);
///
/// // Request a tile
/// let request = TileRequest::new("slides/sample.svs", 0, 1, 2);
/// let response = service.get_tile(request).await?;
///
/// println!("Tile size: {} bytes, cache hit: {}", response.data.len(), response.cache_hit);
/// ```
pub struct TileService<S: SlideSource> {
    /// The slide registry for accessing slides
    registry: Arc<SlideRegistry<S>>,

    /// Cache for encoded tiles
    cache: TileCache,

    /// JPEG encoder
    encoder: JpegTileEncoder,
}

impl<S: SlideSource> TileService<S> {
    /// Create a new tile service with default cache settings.
    ///
    /// Uses default tile cache capacity (100MB).
    pub fn new(registry: SlideRegistry<S>) -> Self {
        Self {
            registry: Arc::new(registry),
            cache: TileCache::new(),
            encoder: JpegTileEncoder::new(),
        }
    }

    /// Create a new tile service with a shared registry.
    ///
    /// This allows multiple services or components to share the same registry.
    pub fn with_shared_registry(registry: Arc<SlideRegistry<S>>) -> Self {
        Self {
            registry,
            cache: TileCache::new(),
            encoder: JpegTileEncoder::new(),
        }
    }

    /// Create a new tile service with custom cache capacity.
    ///
    /// # Arguments
    ///
    /// * `registry` - The slide registry
    /// * `cache_capacity` - Maximum tile cache size in bytes
    pub fn with_cache_capacity(registry: SlideRegistry<S>, cache_capacity: usize) -> Self {
        Self {
            registry: Arc::new(registry),
            cache: TileCache::with_capacity(cache_capacity),
            encoder: JpegTileEncoder::new(),
        }
    }

    /// Get a tile, using cache when available.
    ///
    /// This is the main entry point for tile requests. It:
    /// 1. Validates the request parameters
    /// 2. Checks the cache for an existing tile
    /// 3. If not cached, fetches from the slide and encodes
    /// 4. Caches and returns the result
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The slide cannot be found or opened
    /// - The level is out of range
    /// - The tile coordinates are out of bounds
    /// - The tile data cannot be decoded or encoded
    pub async fn get_tile(&self, request: TileRequest) -> Result<TileResponse, TileError> {
        // Validate quality
        if !is_valid_quality(request.quality) {
            return Err(TileError::InvalidQuality {
                quality: request.quality,
            });
        }
        let quality = request.quality;

        // Create cache key
        let cache_key = TileCacheKey::new(
            request.slide_id.as_str(),
            request.level as u32,
            request.tile_x,
            request.tile_y,
            quality,
        );

        // Check cache first
        if let Some(cached_data) = self.cache.get(&cache_key).await {
            return Ok(TileResponse {
                data: cached_data,
                cache_hit: true,
                quality,
            });
        }

        // Cache miss - need to generate tile
        let tile_data = self.generate_tile(&request, quality).await?;

        // Cache the result
        self.cache.put(cache_key, tile_data.clone()).await;

        Ok(TileResponse {
            data: tile_data,
            cache_hit: false,
            quality,
        })
    }

    /// Generate a tile without caching.
    ///
    /// This is useful for one-off requests or when you want to bypass the cache.
    pub async fn generate_tile(
        &self,
        request: &TileRequest,
        quality: u8,
    ) -> Result<Bytes, TileError> {
        // Get the slide from registry
        let slide = self
            .registry
            .get_slide(&request.slide_id)
            .await
            .map_err(|e| match e {
                crate::error::FormatError::Io(io_err) => {
                    if matches!(io_err, crate::error::IoError::NotFound(_)) {
                        TileError::SlideNotFound {
                            slide_id: request.slide_id.clone(),
                        }
                    } else {
                        TileError::Io(io_err)
                    }
                }
                crate::error::FormatError::Tiff(tiff_err) => TileError::Slide(tiff_err),
                crate::error::FormatError::UnsupportedFormat { reason } => {
                    TileError::Slide(crate::error::TiffError::InvalidTagValue {
                        tag: "Format",
                        message: reason,
                    })
                }
            })?;

        // Validate level
        let level_count = slide.level_count();
        if request.level >= level_count {
            return Err(TileError::InvalidLevel {
                level: request.level,
                max_levels: level_count,
            });
        }

        // Validate tile coordinates
        let (max_x, max_y) = slide
            .tile_count(request.level)
            .ok_or(TileError::InvalidLevel {
                level: request.level,
                max_levels: level_count,
            })?;

        if request.tile_x >= max_x || request.tile_y >= max_y {
            return Err(TileError::TileOutOfBounds {
                level: request.level,
                x: request.tile_x,
                y: request.tile_y,
                max_x,
                max_y,
            });
        }

        // Read the raw tile data from the slide
        let raw_tile = slide
            .read_tile(request.level, request.tile_x, request.tile_y)
            .await?;

        // Decode and re-encode at the requested quality
        let encoded_tile = self.encoder.encode(&raw_tile, quality)?;

        Ok(encoded_tile)
    }

    /// Get tile cache statistics.
    ///
    /// Returns `(current_size, capacity, entry_count)`.
    pub async fn cache_stats(&self) -> (usize, usize, usize) {
        let size = self.cache.size().await;
        let capacity = self.cache.capacity();
        let count = self.cache.len().await;
        (size, capacity, count)
    }

    /// Clear the tile cache.
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    /// Invalidate cached tiles for a specific slide.
    ///
    /// This removes all cached tiles for the given slide from the tile cache.
    /// Note: This is O(n) where n is the number of cached tiles.
    pub async fn invalidate_slide(&self, _slide_id: &str) {
        // TODO: Implement efficient per-slide invalidation
        // For now, this would require iterating the cache which isn't supported
        // by the LRU cache. A production implementation might use a different
        // data structure or maintain a secondary index.
    }

    /// Get a reference to the underlying registry.
    pub fn registry(&self) -> &Arc<SlideRegistry<S>> {
        &self.registry
    }

    /// Generate a thumbnail for a slide.
    ///
    /// This finds the lowest resolution level that fits within the requested
    /// max dimension and returns a tile or composited image.
    ///
    /// # Arguments
    ///
    /// * `slide_id` - The slide identifier
    /// * `max_dimension` - Maximum width or height for the thumbnail
    /// * `quality` - JPEG quality (1-100)
    ///
    /// # Returns
    ///
    /// A JPEG-encoded thumbnail image.
    pub async fn generate_thumbnail(
        &self,
        slide_id: &str,
        max_dimension: u32,
        quality: u8,
    ) -> Result<TileResponse, TileError> {
        // Validate quality
        if !is_valid_quality(quality) {
            return Err(TileError::InvalidQuality { quality });
        }

        // Get the slide from registry
        let slide = self
            .registry
            .get_slide(slide_id)
            .await
            .map_err(|e| match e {
                crate::error::FormatError::Io(io_err) => {
                    if matches!(io_err, crate::error::IoError::NotFound(_)) {
                        TileError::SlideNotFound {
                            slide_id: slide_id.to_string(),
                        }
                    } else {
                        TileError::Io(io_err)
                    }
                }
                crate::error::FormatError::Tiff(tiff_err) => TileError::Slide(tiff_err),
                crate::error::FormatError::UnsupportedFormat { reason } => {
                    TileError::Slide(crate::error::TiffError::InvalidTagValue {
                        tag: "Format",
                        message: reason,
                    })
                }
            })?;

        let (full_width, full_height) = slide.dimensions().ok_or(TileError::InvalidLevel {
            level: 0,
            max_levels: 0,
        })?;

        // Calculate target downsample
        let max_dim = full_width.max(full_height);
        let downsample = max_dim as f64 / max_dimension as f64;

        // Find best level for this downsample (or use lowest resolution level)
        let level = slide
            .best_level_for_downsample(downsample)
            .unwrap_or(slide.level_count().saturating_sub(1));

        let info = slide.level_info(level).ok_or(TileError::InvalidLevel {
            level,
            max_levels: slide.level_count(),
        })?;

        // If single tile covers the entire level, just return that tile
        if info.tiles_x == 1 && info.tiles_y == 1 {
            let request = TileRequest::with_quality(slide_id, level, 0, 0, quality);
            return self.get_tile(request).await;
        }

        // For multiple tiles, we need to composite them
        // For now, return the first tile from the lowest resolution level
        // as a simple implementation
        let lowest_level = slide.level_count().saturating_sub(1);
        let request = TileRequest::with_quality(slide_id, lowest_level, 0, 0, quality);
        self.get_tile(request).await
    }
}

// =============================================================================
// Tests
// =============================================================================
