//! Surface registry: address-indexed storage, bound slots, and the
//! invalidated pool.
//!
//! Color and depth surfaces live in separate maps keyed by guest base
//! address; a guest address never names both at once (cross-type collisions
//! evict the loser into the invalidated pool, see the bind engine). Bound
//! slots hold `(address, handle)` pairs that are only valid until the next
//! `prepare_render_target` call. Displaced storages queue up in the
//! invalidated pool, where the bind engine shops for re-allocation-free
//! reuse before ever creating a new host surface.

mod bind;
mod overlap;
mod readback;

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use rsx_mem::GuestMemory;
use tracing::error;

use crate::backend::SurfaceBackend;
use crate::descriptor::RenderSurface;
use crate::range::AddressRange;

pub use overlap::{MemoryOverlap, SurfaceHierarchy, SurfaceOverlap};

/// Tag source shared by every cache layer in the process; each bump
/// invalidates derived structures like the memory tree.
static SHARED_TAG: AtomicU64 = AtomicU64::new(0);

pub(crate) fn next_shared_tag() -> u64 {
    SHARED_TAG.fetch_add(1, Ordering::Relaxed) + 1
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceStoreError {
    #[error("no surface stored at address 0x{address:08x}")]
    NoSurfaceAtAddress { address: u32 },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SurfaceStoreConfig {
    /// Upper bound on retained displaced storages. Trimming drops the oldest
    /// entries, and never before the bind engine's reuse scan has run.
    /// `None` keeps every displaced storage until the store is dropped.
    pub invalidated_pool_limit: Option<NonZeroUsize>,
}

/// Point-in-time occupancy snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SurfaceStoreStats {
    pub color_surfaces: usize,
    pub depth_surfaces: usize,
    pub invalidated_resources: usize,
    pub bound_color_targets: usize,
    pub has_bound_depth_stencil: bool,
}

pub struct SurfaceStore<B: SurfaceBackend> {
    render_targets: HashMap<u32, B::SurfaceStorage>,
    depth_stencils: HashMap<u32, B::SurfaceStorage>,

    render_targets_range: AddressRange,
    depth_stencil_range: AddressRange,

    /// `(address, handle)` per color slot; a zero address means unbound.
    pub bound_render_targets: [(u32, Option<B::SurfaceHandle>); 4],
    pub bound_depth_stencil: (u32, Option<B::SurfaceHandle>),

    /// Displaced storages available for re-allocation-free reuse, oldest
    /// first.
    pub invalidated_resources: VecDeque<B::SurfaceStorage>,

    memory_tree: Vec<SurfaceHierarchy<B::SurfaceHandle>>,
    pub cache_tag: u64,
    pub write_tag: u64,
    pub memory_tag: u64,

    config: SurfaceStoreConfig,
}

impl<B: SurfaceBackend> Default for SurfaceStore<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: SurfaceBackend> SurfaceStore<B> {
    pub fn new() -> Self {
        Self::with_config(SurfaceStoreConfig::default())
    }

    pub fn with_config(config: SurfaceStoreConfig) -> Self {
        Self {
            render_targets: HashMap::new(),
            depth_stencils: HashMap::new(),
            render_targets_range: AddressRange::default(),
            depth_stencil_range: AddressRange::default(),
            bound_render_targets: std::array::from_fn(|_| (0, None)),
            bound_depth_stencil: (0, None),
            invalidated_resources: VecDeque::new(),
            memory_tree: Vec::new(),
            cache_tag: 0,
            write_tag: 0,
            memory_tag: 0,
            config,
        }
    }

    pub fn stats(&self) -> SurfaceStoreStats {
        SurfaceStoreStats {
            color_surfaces: self.render_targets.len(),
            depth_surfaces: self.depth_stencils.len(),
            invalidated_resources: self.invalidated_resources.len(),
            bound_color_targets: self
                .bound_render_targets
                .iter()
                .filter(|(address, _)| *address != 0)
                .count(),
            has_bound_depth_stencil: self.bound_depth_stencil.0 != 0,
        }
    }

    /// Per-bound-surface containment records from the most recent
    /// `on_write`-triggered rebuild.
    pub fn memory_tree(&self) -> &[SurfaceHierarchy<B::SurfaceHandle>] {
        &self.memory_tree
    }

    /// Search the stored color surfaces for an exact base-address match.
    pub fn get_texture_from_render_target_if_applicable(
        &self,
        address: u32,
    ) -> Option<B::SurfaceHandle> {
        self.render_targets.get(&address).map(B::get)
    }

    /// Search the stored depth surfaces for an exact base-address match.
    pub fn get_texture_from_depth_stencil_if_applicable(
        &self,
        address: u32,
    ) -> Option<B::SurfaceHandle> {
        self.depth_stencils.get(&address).map(B::get)
    }

    /// Look up the surface of either type stored at `address`. A miss is a
    /// caller bug; the error exists to carry context, not to be recovered
    /// from.
    pub fn get_surface_at(&self, address: u32) -> Result<B::SurfaceHandle, SurfaceStoreError> {
        self.render_targets
            .get(&address)
            .or_else(|| self.depth_stencils.get(&address))
            .map(B::get)
            .ok_or(SurfaceStoreError::NoSurfaceAtAddress { address })
    }

    pub fn address_is_bound(&self, address: u32) -> bool {
        self.bound_render_targets
            .iter()
            .any(|(bound_address, _)| *bound_address == address)
            || self.bound_depth_stencil.0 == address
    }

    /// Move the storage holding `surface` into the invalidated pool.
    ///
    /// Used by blit-style callers that discover mid-operation that a stored
    /// surface no longer matches its memory.
    pub fn invalidate_single_surface(&mut self, surface: &B::SurfaceHandle, is_depth: bool) {
        let displaced = {
            let map = if is_depth {
                &mut self.depth_stencils
            } else {
                &mut self.render_targets
            };
            let address = map
                .iter()
                .find_map(|(&address, storage)| (B::get(storage) == *surface).then_some(address));
            address.map(|address| map.remove(&address).expect("located above"))
        };

        if let Some(storage) = displaced {
            B::notify_surface_invalidated(&storage);
            self.invalidated_resources.push_back(storage);
            self.cache_tag = next_shared_tag();
            self.trim_invalidated_pool();
        }
    }

    /// Move the surface stored at `address` into the invalidated pool.
    ///
    /// Refused for currently bound addresses: the bound slots would be left
    /// dangling.
    pub fn invalidate_surface_address(&mut self, address: u32, is_depth: bool) {
        if self.address_is_bound(address) {
            error!("cannot invalidate a currently bound render target: address=0x{address:08x}");
            return;
        }

        let displaced = if is_depth {
            self.depth_stencils.remove(&address)
        } else {
            self.render_targets.remove(&address)
        };

        if let Some(storage) = displaced {
            B::notify_surface_invalidated(&storage);
            self.invalidated_resources.push_back(storage);
            self.cache_tag = next_shared_tag();
            self.trim_invalidated_pool();
        }
    }

    /// Force a memory-tree rebuild at the next `on_write`.
    pub fn notify_memory_structure_changed(&mut self) {
        self.cache_tag = next_shared_tag();
    }

    /// Record a draw into the bound surfaces.
    ///
    /// `address` limits the effect to one bound surface; `None` covers the
    /// whole bind set. Surfaces contained inside a written target's memory
    /// footprint are marked dirty, then the written targets refresh their
    /// fingerprints and recency tags.
    pub fn on_write(&mut self, mem: &impl GuestMemory, address: Option<u32>) {
        if address.is_none() {
            if self.write_tag == self.cache_tag {
                return;
            }
            self.write_tag = self.cache_tag;
        }

        if self.memory_tag != self.cache_tag {
            self.generate_render_target_memory_tree();
            self.memory_tag = self.cache_tag;
        }

        for block in &self.memory_tree {
            if address.is_some_and(|a| a != block.memory_address) {
                continue;
            }
            for overlap in &block.overlapping_set {
                // GPU-side contents changed under the contained surface.
                overlap.surface.descriptor_mut().dirty = true;
            }
        }

        let write_tag = self.write_tag;
        for (bound_address, surface) in &self.bound_render_targets {
            if address.is_some_and(|a| a != *bound_address) {
                continue;
            }
            if let Some(surface) = surface {
                surface.on_write(mem, write_tag);
            }
        }

        if let Some(surface) = &self.bound_depth_stencil.1 {
            if address.is_none() || address == Some(self.bound_depth_stencil.0) {
                surface.on_write(mem, write_tag);
            }
        }
    }

    fn trim_invalidated_pool(&mut self) {
        let Some(limit) = self.config.invalidated_pool_limit else {
            return;
        };
        while self.invalidated_resources.len() > limit.get() {
            self.invalidated_resources.pop_front();
        }
    }
}
