//! Backend capability the surface store is polymorphic over.
//!
//! The store never talks to a host graphics API directly. Everything
//! device-specific — allocating image resources, layout transitions between
//! drawable and sampleable states, downloads — goes through an implementation
//! of [`SurfaceBackend`]. Operations are associated functions taking the
//! backend's command context, so a backend with no state of its own compiles
//! down to plain calls.

use crate::descriptor::RenderSurface;
use crate::format::{ColorFormat, DepthFormat};

pub trait SurfaceBackend {
    /// Recording context handed through every operation; carries whatever
    /// per-frame state the backend needs (command buffers, allocators, ...).
    type CommandContext;
    /// Owned host surface plus its bookkeeping.
    type SurfaceStorage;
    /// Cheap, copyable reference to a surface inside a storage.
    type SurfaceHandle: RenderSurface;
    /// In-flight download of surface contents to host-visible memory.
    type DownloadObject;

    /// Borrow the handle out of a storage.
    fn get(storage: &Self::SurfaceStorage) -> Self::SurfaceHandle;

    fn create_render_target(
        ctx: &mut Self::CommandContext,
        address: u32,
        format: ColorFormat,
        width: u32,
        height: u32,
        pitch: u32,
        prior_contents: Option<&Self::SurfaceHandle>,
    ) -> Self::SurfaceStorage;

    fn create_depth_stencil(
        ctx: &mut Self::CommandContext,
        address: u32,
        format: DepthFormat,
        width: u32,
        height: u32,
        pitch: u32,
        prior_contents: Option<&Self::SurfaceHandle>,
    ) -> Self::SurfaceStorage;

    /// Whether `storage` holds a color surface of the given shape. `lenient`
    /// permits a looser match (the backend may accept a larger surface) when
    /// probing the invalidated pool for reuse.
    fn rtt_has_format_width_height(
        storage: &Self::SurfaceStorage,
        format: ColorFormat,
        width: u32,
        height: u32,
        lenient: bool,
    ) -> bool;

    fn ds_has_format_width_height(
        storage: &Self::SurfaceStorage,
        format: DepthFormat,
        width: u32,
        height: u32,
        lenient: bool,
    ) -> bool;

    fn surface_is_pitch_compatible(storage: &Self::SurfaceStorage, pitch: u32) -> bool;

    fn prepare_rtt_for_drawing(ctx: &mut Self::CommandContext, surface: &Self::SurfaceHandle);
    fn prepare_rtt_for_sampling(ctx: &mut Self::CommandContext, surface: &Self::SurfaceHandle);
    fn prepare_ds_for_drawing(ctx: &mut Self::CommandContext, surface: &Self::SurfaceHandle);
    fn prepare_ds_for_sampling(ctx: &mut Self::CommandContext, surface: &Self::SurfaceHandle);

    /// The storage is being displaced into the invalidated pool.
    fn notify_surface_invalidated(storage: &Self::SurfaceStorage);
    /// The storage survived a rebind unchanged.
    fn notify_surface_persist(storage: &Self::SurfaceStorage);

    /// Declare the surface's current bits garbage, optionally seeding them
    /// from `source`, and rebase the surface at `address` with `pitch`.
    fn invalidate_surface_contents(
        ctx: &mut Self::CommandContext,
        surface: &Self::SurfaceHandle,
        source: Option<&Self::SurfaceHandle>,
        address: u32,
        pitch: u32,
    );

    /// Make pending host GPU writes to the surface visible before its
    /// fingerprint is read.
    fn read_barrier(ctx: &mut Self::CommandContext, surface: &Self::SurfaceHandle);

    fn issue_download_command(
        ctx: &mut Self::CommandContext,
        surface: &Self::SurfaceHandle,
        format: ColorFormat,
        width: u32,
        height: u32,
    ) -> Self::DownloadObject;

    fn issue_depth_download_command(
        ctx: &mut Self::CommandContext,
        surface: &Self::SurfaceHandle,
        format: DepthFormat,
        width: u32,
        height: u32,
    ) -> Self::DownloadObject;

    fn issue_stencil_download_command(
        ctx: &mut Self::CommandContext,
        surface: &Self::SurfaceHandle,
        width: u32,
        height: u32,
    ) -> Self::DownloadObject;

    /// Map a finished download. `None` signals a backend-side failure; the
    /// store then yields an empty output vector for the affected plane.
    fn map_downloaded_buffer(download: &mut Self::DownloadObject) -> Option<&[u8]>;

    fn unmap_downloaded_buffer(download: Self::DownloadObject);
}
