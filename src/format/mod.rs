//! Format parsers for Whole Slide Image files.
//!
//! This module provides parsers for WSI formats, starting with TIFF-based formats
//! which are the foundation for SVS and generic pyramidal TIFF files.

pub mod detect;
pub mod generic_tiff;
pub mod jpeg;
pub mod ndpi;
pub mod svs;
pub mod tiff;

pub use detect::{detect_format, is_tiff_header, SlideFormat};
pub use generic_tiff::{GenericTiffLevelData, GenericTiffReader};
pub use jpeg::{is_abbreviated_stream, is_complete_stream, merge_jpeg_tables, prepare_tile_jpeg};
pub use ndpi::{NdpiReader, NdpiTile};
pub use svs::{SvsLevelData, SvsMetadata, SvsReader};
