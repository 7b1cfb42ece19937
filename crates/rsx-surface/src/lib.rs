//! Render-surface store for an RSX-class GPU emulator.
//!
//! The guest addresses its color and depth render targets by physical memory
//! address; the host backend deals in opaque image resources. This crate owns
//! the mapping between the two:
//!
//! - A registry of live surfaces keyed by guest base address, with up to four
//!   bound color targets and one bound depth target ([`SurfaceStore`]).
//! - The bind/rebind protocol that recycles displaced host resources through
//!   an invalidated pool instead of re-allocating (`prepare_render_target`).
//! - Sparse 8-byte memory fingerprints that detect guest CPU writes landing
//!   in surface memory ([`RenderSurface::test`]).
//! - An overlap oracle that projects a guest memory region onto the stored
//!   surfaces in pixel coordinates (`get_merged_texture_memory_region`).
//! - Readback helpers that repack pitched host downloads into the packed,
//!   guest-visible byte layout.
//!
//! The store is polymorphic over a [`SurfaceBackend`]; [`null_backend`]
//! provides an inert implementation with an event log for tests.

#![forbid(unsafe_code)]

mod backend;
mod descriptor;
mod format;
mod range;
mod store;

pub mod null_backend;

pub use backend::SurfaceBackend;
pub use descriptor::{
    RenderSurface, SurfaceDescriptor, SurfaceFormatInfo, TileInfo, MEMORY_TAG_SAMPLE_COUNT,
};
pub use format::{
    rtt_indexes, ColorFormat, DepthFormat, SurfaceAntialiasing, SurfaceTarget,
};
pub use range::AddressRange;
pub use store::{
    MemoryOverlap, SurfaceHierarchy, SurfaceOverlap, SurfaceStore, SurfaceStoreConfig,
    SurfaceStoreError, SurfaceStoreStats,
};
