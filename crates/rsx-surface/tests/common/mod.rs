//! Shared helpers for the surface store integration tests.

#![allow(dead_code)]

use rsx_surface::null_backend::{NullBackend, NullCommandContext};
use rsx_surface::{ColorFormat, DepthFormat, SurfaceAntialiasing, SurfaceStore, SurfaceTarget};

pub fn store() -> SurfaceStore<NullBackend> {
    SurfaceStore::new()
}

/// Bind a single color target into slot 0, depth unbound.
pub fn bind_color_slot0(
    store: &mut SurfaceStore<NullBackend>,
    ctx: &mut NullCommandContext,
    address: u32,
    format: ColorFormat,
    width: u32,
    height: u32,
    pitch: u32,
) {
    store.prepare_render_target(
        ctx,
        format,
        DepthFormat::Z24S8,
        width,
        height,
        SurfaceTarget::SurfaceA,
        SurfaceAntialiasing::Center1Sample,
        [address, 0, 0, 0],
        0,
        [pitch, 0, 0, 0],
        0,
    );
}

/// Bind only a depth target, all color slots unbound.
pub fn bind_depth_only(
    store: &mut SurfaceStore<NullBackend>,
    ctx: &mut NullCommandContext,
    address: u32,
    format: DepthFormat,
    width: u32,
    height: u32,
    pitch: u32,
) {
    store.prepare_render_target(
        ctx,
        ColorFormat::A8R8G8B8,
        format,
        width,
        height,
        SurfaceTarget::None,
        SurfaceAntialiasing::Center1Sample,
        [0, 0, 0, 0],
        address,
        [0, 0, 0, 0],
        pitch,
    );
}

/// Clear every bound slot without registering new surfaces.
pub fn unbind_all(store: &mut SurfaceStore<NullBackend>, ctx: &mut NullCommandContext) {
    store.prepare_render_target(
        ctx,
        ColorFormat::A8R8G8B8,
        DepthFormat::Z24S8,
        640,
        480,
        SurfaceTarget::None,
        SurfaceAntialiasing::Center1Sample,
        [0, 0, 0, 0],
        0,
        [0, 0, 0, 0],
        0,
    );
}
