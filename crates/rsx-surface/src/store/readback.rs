//! Readback of bound surfaces into guest-visible byte layouts.
//!
//! Host downloads come back with a 256-aligned row stride; the guest sees
//! tightly packed rows in big-endian element order. The routines here repack
//! one into the other, per color format family. Depth and stencil planes are
//! downloaded through separate backend entry points and packed without a
//! byte swap.

use tracing::warn;

use crate::backend::SurfaceBackend;
use crate::format::{align_up, ColorFormat, DepthFormat};

use super::SurfaceStore;

/// Drop row padding: copy `row_bytes` out of every `src_pitch`-strided row.
fn copy_pitched_to_packed(src: &[u8], src_pitch: usize, row_bytes: usize, height: usize) -> Vec<u8> {
    let mut dst = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * src_pitch;
        dst.extend_from_slice(&src[start..start + row_bytes]);
    }
    dst
}

/// Repack 16-bit elements into guest big-endian order, dropping row padding.
fn copy_pitched_to_packed_be16(src: &[u8], src_pitch: usize, width: usize, height: usize) -> Vec<u8> {
    let mut dst = Vec::with_capacity(width * height * 2);
    for row in 0..height {
        let start = row * src_pitch;
        for element in src[start..start + width * 2].chunks_exact(2) {
            let value = u16::from_ne_bytes(element.try_into().expect("chunk is 2 bytes"));
            dst.extend_from_slice(&value.to_be_bytes());
        }
    }
    dst
}

/// Repack 32-bit elements into guest big-endian order, dropping row padding.
fn copy_pitched_to_packed_be32(src: &[u8], src_pitch: usize, width: usize, height: usize) -> Vec<u8> {
    let mut dst = Vec::with_capacity(width * height * 4);
    for row in 0..height {
        let start = row * src_pitch;
        for element in src[start..start + width * 4].chunks_exact(4) {
            let value = u32::from_ne_bytes(element.try_into().expect("chunk is 4 bytes"));
            dst.extend_from_slice(&value.to_be_bytes());
        }
    }
    dst
}

fn pack_color_rows(
    format: ColorFormat,
    src: &[u8],
    src_pitch: usize,
    width: usize,
    height: usize,
) -> Vec<u8> {
    match format {
        ColorFormat::A8B8G8R8
        | ColorFormat::X8B8G8R8OB8G8R8
        | ColorFormat::X8B8G8R8ZB8G8R8
        | ColorFormat::A8R8G8B8
        | ColorFormat::X8R8G8B8OR8G8B8
        | ColorFormat::X8R8G8B8ZR8G8B8
        | ColorFormat::X32 => copy_pitched_to_packed_be32(src, src_pitch, width, height),
        ColorFormat::B8 => copy_pitched_to_packed(src, src_pitch, width, height),
        ColorFormat::G8B8
        | ColorFormat::R5G6B5
        | ColorFormat::X1R5G5B5OR5G5B5
        | ColorFormat::X1R5G5B5ZR5G5B5 => copy_pitched_to_packed_be16(src, src_pitch, width, height),
        // Note: the wide formats may require a big-endian swap as well.
        ColorFormat::W16Z16Y16X16 => copy_pitched_to_packed(src, src_pitch, width * 8, height),
        ColorFormat::W32Z32Y32X32 => copy_pitched_to_packed(src, src_pitch, width * 16, height),
    }
}

impl<B: SurfaceBackend> SurfaceStore<B> {
    /// Download every bound color target and repack it into the packed,
    /// guest-visible layout. Unbound slots and failed maps yield empty
    /// vectors.
    pub fn get_render_targets_data(
        &self,
        ctx: &mut B::CommandContext,
        color_format: ColorFormat,
        width: u32,
        height: u32,
    ) -> [Vec<u8>; 4] {
        let mut downloads: [Option<B::DownloadObject>; 4] = std::array::from_fn(|_| None);

        for ((address, surface), download) in
            self.bound_render_targets.iter().zip(downloads.iter_mut())
        {
            if *address == 0 {
                continue;
            }
            let Some(surface) = surface else {
                continue;
            };
            *download = Some(B::issue_download_command(
                ctx,
                surface,
                color_format,
                width,
                height,
            ));
        }

        let src_pitch = color_format.aligned_pitch(width) as usize;
        let mut result: [Vec<u8>; 4] = std::array::from_fn(|_| Vec::new());

        for (download, out) in downloads.into_iter().zip(result.iter_mut()) {
            let Some(mut download) = download else {
                continue;
            };
            match B::map_downloaded_buffer(&mut download) {
                Some(raw) => {
                    *out = pack_color_rows(
                        color_format,
                        raw,
                        src_pitch,
                        width as usize,
                        height as usize,
                    );
                }
                None => warn!("mapping a color target download failed; returning empty data"),
            }
            B::unmap_downloaded_buffer(download);
        }

        result
    }

    /// Download the bound depth/stencil target as `[depth_plane,
    /// stencil_plane]`. The stencil plane is only produced for `Z24S8`.
    pub fn get_depth_stencil_data(
        &self,
        ctx: &mut B::CommandContext,
        depth_format: DepthFormat,
        width: u32,
        height: u32,
    ) -> [Vec<u8>; 2] {
        let mut result: [Vec<u8>; 2] = [Vec::new(), Vec::new()];
        let (address, Some(surface)) = (&self.bound_depth_stencil.0, &self.bound_depth_stencil.1)
        else {
            return result;
        };
        if *address == 0 {
            return result;
        }

        let mut depth_download =
            B::issue_depth_download_command(ctx, surface, depth_format, width, height);
        let stencil_download = (depth_format == DepthFormat::Z24S8)
            .then(|| B::issue_stencil_download_command(ctx, surface, width, height));

        let depth_src_pitch = align_up(width * 4, 256) as usize;
        let height_px = height as usize;

        match B::map_downloaded_buffer(&mut depth_download) {
            Some(raw) => {
                let row_bytes = width as usize * depth_format.bytes_per_pixel() as usize;
                result[0] = copy_pitched_to_packed(raw, depth_src_pitch, row_bytes, height_px);
            }
            None => warn!("mapping a depth download failed; returning empty data"),
        }
        B::unmap_downloaded_buffer(depth_download);

        let Some(mut stencil_download) = stencil_download else {
            return result;
        };
        let stencil_src_pitch = align_up(width, 256) as usize;
        match B::map_downloaded_buffer(&mut stencil_download) {
            Some(raw) => {
                result[1] =
                    copy_pitched_to_packed(raw, stencil_src_pitch, width as usize, height_px);
            }
            None => warn!("mapping a stencil download failed; returning empty data"),
        }
        B::unmap_downloaded_buffer(stencil_download);

        result
    }
}
