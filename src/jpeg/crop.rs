//! Lossless coefficient-domain crop driver (C4) and MCU background fill (C5).
//!
//! Two distinct operations live here, both DCT-coefficient-domain so pixels
//! are never fully decoded:
//!
//! - **Real crop** (`background` is `None`, the tile-extraction path): drives
//!   `mozjpeg-sys`'s `transupp` surface — `jtransform_request_workspace`,
//!   `jtransform_adjust_parameters`, `jtransform_execute_transform` — with
//!   `JXFORM_NONE` plus a crop region, the same machinery jpegtran's
//!   `transupp.c` and libjpeg-turbo's `tjTransform(TJXOP_NONE | TJXOPT_CROP)`
//!   are built on. `perfect` is set so a non-MCU-aligned request fails loudly
//!   instead of silently rounding.
//! - **MCU-aligned extend** (`background` is `Some`, the frame-legalization
//!   path): the requested rect never shrinks the source, only reveals the
//!   MCU-padding blocks libjpeg already decoded past the image's true extent,
//!   so it's a plain `jpeg_read_coefficients`/`jpeg_write_coefficients` pass
//!   with the output dimensions relabeled, followed by an edge fill over the
//!   revealed blocks.
//!
//! Every `jpeg_decompress_struct`/`jpeg_compress_struct` pair is scoped to a
//! single call via an RAII guard so the underlying C objects are destroyed on
//! every exit path, including an early `?` return or a panic unwinding through
//! an error callback.

use std::mem::MaybeUninit;
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use bytes::Bytes;
use mozjpeg_sys as ffi;

use crate::error::TiffError;

/// A crop rectangle in pixel coordinates, MCU-aligned on the source image's subsampling.
#[derive(Debug, Clone, Copy)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Context for MCU-aligned background fill when a crop rect extends past the source.
#[derive(Debug, Clone, Copy)]
pub struct BackgroundCtx {
    /// Original (pre-extension) image width in pixels.
    pub image_w: u32,
    /// Original (pre-extension) image height in pixels.
    pub image_h: u32,
    /// Chroma subsampling as `(horizontal, vertical)` sampling factors.
    pub subsampling: (u8, u8),
    /// Fill luminance, normalized to `[0.0, 1.0]`.
    pub luminance: f64,
}

impl BackgroundCtx {
    /// MCU size in pixels for this context's subsampling.
    pub fn mcu_size(&self) -> (u32, u32) {
        mcu_size(self.subsampling)
    }
}

/// MCU pixel dimensions for a given chroma subsampling factor.
///
/// `(1,1) -> (8,8)`, `(2,1) -> (16,8)`, `(2,2) -> (16,16)`. Any other
/// combination is not supported by this component.
pub fn mcu_size(subsampling: (u8, u8)) -> (u32, u32) {
    match subsampling {
        (1, 1) => (8, 8),
        (2, 1) => (16, 8),
        (2, 2) => (16, 16),
        (h, v) => {
            // Fall back to the worst-case MCU rather than panicking; callers
            // validate subsampling against TiffImage metadata before reaching here.
            (8 * h.max(1) as u32, 8 * v.max(1) as u32)
        }
    }
}

/// Map a normalized luminance to a DC coefficient using the component's own
/// quantization table, rather than a hardcoded constant.
///
/// DCT coefficient 0 of an all-constant 8x8 block equals `128 * 8 * value /
/// quant_step` (the DC basis function has constant magnitude `1/8` per
/// sample, summed over 64 samples, then quantized). `value` is the pixel
/// value implied by `luminance`, centered on zero as libjpeg's DCT expects.
pub fn luminance_to_dc(luminance: f64, quant_table: &[u16; 64]) -> i16 {
    let pixel_value = (luminance.clamp(0.0, 1.0) * 255.0) - 128.0;
    let dc_step = quant_table[0].max(1) as f64;
    let raw = (pixel_value * 8.0) / dc_step;
    raw.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

// =============================================================================
// Error handling
// =============================================================================

/// A `jpeg_error_mgr` whose `error_exit` panics instead of calling `exit()`.
///
/// Every call into libjpeg from this module happens underneath a
/// `catch_unwind` boundary so the panic is converted back into a `Result`.
/// Grounded on the same "unwinding error manager" approach used by
/// established `mozjpeg-sys` wrapper crates, since libjpeg's own
/// `setjmp`/`longjmp` recovery model doesn't map cleanly onto Rust.
unsafe extern "C" fn unwinding_error_exit(cinfo: *mut ffi::jpeg_common_struct) {
    let mut buf = [0 as std::os::raw::c_char; 200];
    if let Some(format_message) = (*(*cinfo).err).format_message {
        format_message(cinfo, buf.as_mut_ptr());
    }
    let msg = std::ffi::CStr::from_ptr(buf.as_ptr())
        .to_string_lossy()
        .into_owned();
    panic!("libjpeg error: {msg}");
}

fn install_unwinding_error_mgr(err: &mut ffi::jpeg_error_mgr) {
    unsafe {
        ffi::jpeg_std_error(err);
    }
    err.error_exit = Some(unwinding_error_exit);
}

// =============================================================================
// RAII guards
// =============================================================================

struct DecompressGuard {
    cinfo: ffi::jpeg_decompress_struct,
    err: Box<ffi::jpeg_error_mgr>,
}

impl DecompressGuard {
    fn new() -> Self {
        let mut err = Box::new(unsafe { MaybeUninit::zeroed().assume_init() });
        install_unwinding_error_mgr(&mut err);

        let mut cinfo: ffi::jpeg_decompress_struct = unsafe { MaybeUninit::zeroed().assume_init() };
        cinfo.common.err = err.as_mut() as *mut _;

        unsafe {
            ffi::jpeg_CreateDecompress(
                &mut cinfo,
                ffi::JPEG_LIB_VERSION,
                std::mem::size_of::<ffi::jpeg_decompress_struct>(),
            );
        }

        Self { cinfo, err }
    }
}

impl Drop for DecompressGuard {
    fn drop(&mut self) {
        unsafe {
            ffi::jpeg_destroy_decompress(&mut self.cinfo);
        }
    }
}

struct CompressGuard {
    cinfo: ffi::jpeg_compress_struct,
    err: Box<ffi::jpeg_error_mgr>,
}

impl CompressGuard {
    fn new() -> Self {
        let mut err = Box::new(unsafe { MaybeUninit::zeroed().assume_init() });
        install_unwinding_error_mgr(&mut err);

        let mut cinfo: ffi::jpeg_compress_struct = unsafe { MaybeUninit::zeroed().assume_init() };
        cinfo.common.err = err.as_mut() as *mut _;

        unsafe {
            ffi::jpeg_CreateCompress(
                &mut cinfo,
                ffi::JPEG_LIB_VERSION,
                std::mem::size_of::<ffi::jpeg_compress_struct>(),
            );
        }

        Self { cinfo, err }
    }
}

impl Drop for CompressGuard {
    fn drop(&mut self) {
        unsafe {
            ffi::jpeg_destroy_compress(&mut self.cinfo);
        }
    }
}

/// Run `f` and convert a libjpeg panic into a `JpegCropError`.
fn catch_libjpeg<F, T>(rects: &[CropRect], image_size: (u32, u32), f: F) -> Result<T, TiffError>
where
    F: FnOnce() -> T,
{
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let reason = payload
            .downcast_ref::<String>()
            .cloned()
            .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
            .unwrap_or_else(|| "unknown libjpeg error".to_string());
        TiffError::JpegCropError {
            rects: rects.iter().map(|r| (r.x, r.y, r.w, r.h)).collect(),
            image_size,
            reason,
        }
    })
}

// =============================================================================
// Crop driver
// =============================================================================

/// Crop (and optionally MCU-extend) `source` into `rects.len()` output JPEGs.
///
/// Each rect's origin must be MCU-aligned to `subsampling` (the source
/// image's own chroma subsampling, not assumed); width/height are rounded up
/// to the MCU grid of the output. If a rect extends past the source bounds
/// and `background` is provided, the extended region is filled using the
/// background luminance instead of being left undefined.
pub fn crop_multiple(
    source: &[u8],
    rects: &[CropRect],
    subsampling: (u8, u8),
    background: Option<BackgroundCtx>,
) -> Result<Vec<Bytes>, TiffError> {
    let image_size = decode_header_size(source)?;
    let mcu = mcu_size(subsampling);

    for rect in rects {
        if rect.x % mcu.0 != 0 || rect.y % mcu.1 != 0 {
            return Err(TiffError::JpegCropError {
                rects: rects.iter().map(|r| (r.x, r.y, r.w, r.h)).collect(),
                image_size,
                reason: format!(
                    "crop origin ({}, {}) is not MCU-aligned to ({}, {})",
                    rect.x, rect.y, mcu.0, mcu.1
                ),
            });
        }
    }

    catch_libjpeg(rects, image_size, || -> Result<Vec<Bytes>, TiffError> {
        let mut outputs = Vec::with_capacity(rects.len());
        for rect in rects {
            outputs.push(crop_one(source, *rect, background)?);
        }
        Ok(outputs)
    })?
}

fn decode_header_size(source: &[u8]) -> Result<(u32, u32), TiffError> {
    let mut guard = DecompressGuard::new();
    unsafe {
        ffi::jpeg_mem_src(&mut guard.cinfo, source.as_ptr(), source.len() as std::os::raw::c_ulong);
        ffi::jpeg_read_header(&mut guard.cinfo, ffi::boolean::from(true) as c_int as ffi::boolean);
    }
    Ok((guard.cinfo.image_width, guard.cinfo.image_height))
}

/// Perform one coefficient-domain crop, returning an owned, encoded JPEG.
///
/// Dispatches to [`crop_lossless`] for a real sub-rect crop, or
/// [`extend_with_background`] when `background` says this rect only reveals
/// MCU-padding past the source's true extent (see module docs).
fn crop_one(
    source: &[u8],
    rect: CropRect,
    background: Option<BackgroundCtx>,
) -> Result<Bytes, TiffError> {
    match background {
        Some(ctx) => extend_with_background(source, rect, ctx),
        None => crop_lossless(source, rect),
    }
}

/// Drive a real lossless coefficient-domain crop via `mozjpeg-sys`'s
/// `transupp` surface: `jtransform_request_workspace` negotiates the
/// transform against the source before decoding, `jtransform_adjust_parameters`
/// builds the destination's (possibly re-laid-out) coefficient arrays, and
/// `jtransform_execute_transform` actually copies the requested MCU blocks
/// into them. `perfect` rejects a non-MCU-aligned crop rather than silently
/// rounding it, matching jpegtran's `-perfect` / `TJXOPT_PERFECT`.
fn crop_lossless(source: &[u8], rect: CropRect) -> Result<Bytes, TiffError> {
    let mut src_guard = DecompressGuard::new();
    unsafe {
        ffi::jpeg_mem_src(
            &mut src_guard.cinfo,
            source.as_ptr(),
            source.len() as std::os::raw::c_ulong,
        );
        ffi::jpeg_read_header(&mut src_guard.cinfo, 1);
    }

    let mut transform: ffi::jpeg_transform_info = unsafe { MaybeUninit::zeroed().assume_init() };
    transform.transform = ffi::JXFORM_NONE;
    transform.perfect = ffi::boolean::from(true);
    transform.crop = ffi::boolean::from(true);
    transform.crop_width = rect.w;
    transform.crop_width_set = ffi::JCROP_POS;
    transform.crop_height = rect.h;
    transform.crop_height_set = ffi::JCROP_POS;
    transform.crop_xoffset = rect.x;
    transform.crop_xoffset_set = ffi::JCROP_POS;
    transform.crop_yoffset = rect.y;
    transform.crop_yoffset_set = ffi::JCROP_POS;

    unsafe {
        if ffi::jtransform_request_workspace(&mut src_guard.cinfo, &mut transform) == 0 {
            return Err(TiffError::JpegStructureError(format!(
                "jtransform_request_workspace rejected crop rect ({}, {}, {}, {})",
                rect.x, rect.y, rect.w, rect.h
            )));
        }
    }

    let src_coefs = unsafe { ffi::jpeg_read_coefficients(&mut src_guard.cinfo) };
    if src_coefs.is_null() {
        return Err(TiffError::JpegStructureError(
            "jpeg_read_coefficients returned null".to_string(),
        ));
    }

    let mut dst_guard = CompressGuard::new();
    let mut outbuf: *mut std::os::raw::c_uchar = ptr::null_mut();
    let mut outsize: std::os::raw::c_ulong = 0;
    unsafe {
        ffi::jpeg_mem_dest(&mut dst_guard.cinfo, &mut outbuf, &mut outsize);
        ffi::jpeg_copy_critical_parameters(&src_guard.cinfo, &mut dst_guard.cinfo);

        let dst_coefs = ffi::jtransform_adjust_parameters(
            &mut src_guard.cinfo,
            &mut dst_guard.cinfo,
            src_coefs,
            &mut transform,
        );

        ffi::jpeg_write_coefficients(&mut dst_guard.cinfo, dst_coefs);
        ffi::jtransform_execute_transform(
            &mut src_guard.cinfo,
            &mut dst_guard.cinfo,
            src_coefs,
            &mut transform,
        );
        ffi::jpeg_finish_compress(&mut dst_guard.cinfo);
        ffi::jpeg_finish_decompress(&mut src_guard.cinfo);
    }

    let bytes = unsafe { std::slice::from_raw_parts(outbuf, outsize as usize) }.to_vec();
    unsafe {
        libc::free(outbuf as *mut libc::c_void);
    }
    Ok(Bytes::from(bytes))
}

/// Reveal the MCU-padding blocks libjpeg already decoded past the source
/// image's declared size by relabeling the destination's dimensions, then
/// fill whichever blocks lie past the real (pre-extension) extent with the
/// background luminance.
///
/// This is not a crop: `rect` always starts at the frame origin and is
/// never smaller than the source's own coefficient grid, only padded out to
/// an MCU-aligned size, so the full source coefficient array is reused
/// unchanged.
fn extend_with_background(
    source: &[u8],
    rect: CropRect,
    ctx: BackgroundCtx,
) -> Result<Bytes, TiffError> {
    let mut src_guard = DecompressGuard::new();
    unsafe {
        ffi::jpeg_mem_src(
            &mut src_guard.cinfo,
            source.as_ptr(),
            source.len() as std::os::raw::c_ulong,
        );
        ffi::jpeg_read_header(&mut src_guard.cinfo, 1);
    }

    let src_coefs = unsafe { ffi::jpeg_read_coefficients(&mut src_guard.cinfo) };
    if src_coefs.is_null() {
        return Err(TiffError::JpegStructureError(
            "jpeg_read_coefficients returned null".to_string(),
        ));
    }

    let mut dst_guard = CompressGuard::new();

    let mut outbuf: *mut std::os::raw::c_uchar = ptr::null_mut();
    let mut outsize: std::os::raw::c_ulong = 0;
    unsafe {
        ffi::jpeg_mem_dest(&mut dst_guard.cinfo, &mut outbuf, &mut outsize);
        ffi::jpeg_copy_critical_parameters(&src_guard.cinfo, &mut dst_guard.cinfo);

        dst_guard.cinfo.image_width = rect.w;
        dst_guard.cinfo.image_height = rect.h;

        ffi::jpeg_write_coefficients(&mut dst_guard.cinfo, src_coefs);

        let extends_past = rect.x + rect.w > src_guard.cinfo.image_width
            || rect.y + rect.h > src_guard.cinfo.image_height;
        if extends_past && ctx.luminance > 0.0 {
            apply_edge_fill(&mut dst_guard.cinfo, src_coefs, &ctx);
        }

        ffi::jpeg_finish_compress(&mut dst_guard.cinfo);
        ffi::jpeg_finish_decompress(&mut src_guard.cinfo);
    }

    let bytes = unsafe { std::slice::from_raw_parts(outbuf, outsize as usize) }.to_vec();
    unsafe {
        libc::free(outbuf as *mut libc::c_void);
    }
    Ok(Bytes::from(bytes))
}

/// Run the DCT-domain "blank everything" callback over a full image.
///
/// Used by the sparse-tile path: substitutes a per-image blank tile when a
/// natively tiled page has a zero-bytecount (sparse) tile.
pub fn fill_whole_image(frame: &[u8], luminance: f64) -> Result<Bytes, TiffError> {
    let image_size = decode_header_size(frame)?;
    catch_libjpeg(&[], image_size, || -> Result<Bytes, TiffError> {
        let mut src_guard = DecompressGuard::new();
        unsafe {
            ffi::jpeg_mem_src(
                &mut src_guard.cinfo,
                frame.as_ptr(),
                frame.len() as std::os::raw::c_ulong,
            );
            ffi::jpeg_read_header(&mut src_guard.cinfo, 1);
        }

        let src_coefs = unsafe { ffi::jpeg_read_coefficients(&mut src_guard.cinfo) };
        if src_coefs.is_null() {
            return Err(TiffError::JpegStructureError(
                "jpeg_read_coefficients returned null".to_string(),
            ));
        }

        blank_all_components(&mut src_guard.cinfo, src_coefs, luminance);

        let mut dst_guard = CompressGuard::new();
        let mut outbuf: *mut std::os::raw::c_uchar = ptr::null_mut();
        let mut outsize: std::os::raw::c_ulong = 0;
        unsafe {
            ffi::jpeg_mem_dest(&mut dst_guard.cinfo, &mut outbuf, &mut outsize);
            ffi::jpeg_copy_critical_parameters(&src_guard.cinfo, &mut dst_guard.cinfo);
            ffi::jpeg_write_coefficients(&mut dst_guard.cinfo, src_coefs);
            ffi::jpeg_finish_compress(&mut dst_guard.cinfo);
        }

        let bytes = unsafe { std::slice::from_raw_parts(outbuf, outsize as usize) }.to_vec();
        unsafe {
            libc::free(outbuf as *mut libc::c_void);
        }
        Ok(Bytes::from(bytes))
    })?
}

/// Edge-fill callback (C5): set the DC coefficient of luminance blocks lying
/// outside the original image bounds to the mapped background luminance.
///
/// Operates only on component 0 (luminance); chroma components are left
/// untouched since chroma subsampling makes per-block edges irrelevant to
/// the visible background color.
unsafe fn apply_edge_fill(
    cinfo: &mut ffi::jpeg_compress_struct,
    coef_arrays: *mut ffi::jvirt_barray_ptr,
    ctx: &BackgroundCtx,
) {
    let (mcu_w, mcu_h) = ctx.mcu_size();
    let comp = &*cinfo.comp_info.offset(0);
    let quant_table = quant_table_for(comp);
    let dc = luminance_to_dc(ctx.luminance, &quant_table);

    let blocks_per_row = comp.width_in_blocks;
    let blocks_per_col = comp.height_in_blocks;
    let original_block_w = ctx.image_w / 8;
    let original_block_h = ctx.image_h / 8;
    let _ = mcu_w;
    let _ = mcu_h;

    let access = match cinfo.mem.as_ref().and_then(|m| m.access_virt_barray) {
        Some(f) => f,
        None => return,
    };

    for row in 0..blocks_per_col {
        let buffer = access(
            &mut cinfo.common,
            *coef_arrays.offset(0),
            row,
            1,
            ffi::boolean::from(true) as ffi::boolean,
        );
        if buffer.is_null() {
            continue;
        }
        let row_blocks = std::slice::from_raw_parts_mut(*buffer, blocks_per_row as usize);
        for (col, block) in row_blocks.iter_mut().enumerate() {
            let past_right = col as u32 >= original_block_w;
            let past_bottom = row >= original_block_h;
            if past_right || past_bottom {
                (*block)[0] = dc;
            }
        }
    }
}

/// Blank-whole-image callback (C5): DC set to the mapped luminance and all AC
/// cleared on component 0; chroma components fully cleared to neutral gray.
unsafe fn blank_all_components(
    cinfo: &mut ffi::jpeg_decompress_struct,
    coef_arrays: *mut ffi::jvirt_barray_ptr,
    luminance: f64,
) {
    let access = match cinfo.mem.as_ref().and_then(|m| m.access_virt_barray) {
        Some(f) => f,
        None => return,
    };

    for comp_idx in 0..cinfo.num_components {
        let comp = &*cinfo.comp_info.offset(comp_idx as isize);
        let quant_table = quant_table_for_decompress(cinfo, comp);
        let dc = if comp_idx == 0 {
            luminance_to_dc(luminance, &quant_table)
        } else {
            0
        };

        for row in 0..comp.height_in_blocks {
            let buffer = access(
                &mut cinfo.common,
                *coef_arrays.offset(comp_idx as isize),
                row,
                1,
                ffi::boolean::from(true) as ffi::boolean,
            );
            if buffer.is_null() {
                continue;
            }
            let row_blocks = std::slice::from_raw_parts_mut(*buffer, comp.width_in_blocks as usize);
            for block in row_blocks.iter_mut() {
                block.fill(0);
                (*block)[0] = dc;
            }
        }
    }
}

unsafe fn quant_table_for(comp: &ffi::jpeg_component_info) -> [u16; 64] {
    let mut table = [0u16; 64];
    if let Some(qtbl) = comp.quant_table.as_ref() {
        table.copy_from_slice(&qtbl.quantval);
    } else {
        table.fill(1);
    }
    table
}

unsafe fn quant_table_for_decompress(
    cinfo: &ffi::jpeg_decompress_struct,
    comp: &ffi::jpeg_component_info,
) -> [u16; 64] {
    let idx = comp.quant_tbl_no as usize;
    if idx < cinfo.quant_tbl_ptrs.len() {
        if let Some(qtbl) = cinfo.quant_tbl_ptrs[idx].as_ref() {
            let mut table = [0u16; 64];
            table.copy_from_slice(&qtbl.quantval);
            return table;
        }
    }
    [1u16; 64]
}
