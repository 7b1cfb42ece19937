//! Overlap oracle and the bound-surface memory tree.
//!
//! `get_merged_texture_memory_region` answers "which stored surfaces hold
//! pixels of this guest memory region", projecting each hit into the region's
//! pixel space with antialias scaling applied. Surfaces whose fingerprints no
//! longer match guest memory are pruned into the invalidated pool instead of
//! being reported.
//!
//! The memory tree is the reverse index: for every bound surface, which other
//! stored surfaces sit wholly inside its memory footprint. `on_write` walks
//! it to mark contained surfaces dirty when their memory is drawn over.

use std::collections::HashMap;

use rsx_mem::GuestMemory;

use crate::backend::SurfaceBackend;
use crate::descriptor::RenderSurface;
use crate::range::AddressRange;

use super::SurfaceStore;

/// Projection of a stored surface into the coordinate space of a requested
/// texture region. Coordinates are in pixels after antialias descaling.
#[derive(Clone, Debug)]
pub struct SurfaceOverlap<H> {
    pub surface: H,
    pub base_address: u32,
    pub is_depth: bool,
    /// The overlap does not cover the full requested region.
    pub is_clipped: bool,
    pub src_x: u32,
    pub src_y: u32,
    pub dst_x: u32,
    pub dst_y: u32,
    pub width: u32,
    pub height: u32,
}

/// A stored surface sitting wholly inside a bound surface's memory footprint.
#[derive(Clone, Debug)]
pub struct MemoryOverlap<H> {
    pub surface: H,
    pub memory_address: u32,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Containment records for one bound surface.
#[derive(Clone, Debug)]
pub struct SurfaceHierarchy<H> {
    pub memory_address: u32,
    pub memory_range: u32,
    pub overlapping_set: Vec<MemoryOverlap<H>>,
}

/// Whether a candidate surface's row layout can serve a region of
/// `required_pitch`. Equal pitches always match; single-row regions only need
/// the candidate pitch to cover the request.
fn pitch_compatible<S: RenderSurface>(surface: &S, required_pitch: u32, required_height: u32) -> bool {
    let pitch = surface.rsx_pitch();
    if pitch == required_pitch {
        true
    } else if pitch < required_pitch {
        false
    } else {
        required_height == 1 || surface.surface_height() == 1
    }
}

impl<B: SurfaceBackend> SurfaceStore<B> {
    /// Find every stored surface overlapping the guest memory region of a
    /// requested texture, with source/destination rectangles projected into
    /// the texture's pixel space.
    ///
    /// Results are ordered oldest write first (ties broken by ascending
    /// area), so callers compositing the region apply the freshest data
    /// last. Stale candidates are invalidated as a side effect, unless they
    /// are currently bound.
    pub fn get_merged_texture_memory_region(
        &mut self,
        ctx: &mut B::CommandContext,
        mem: &impl GuestMemory,
        texaddr: u32,
        required_width: u32,
        required_height: u32,
        required_pitch: u32,
    ) -> Vec<SurfaceOverlap<B::SurfaceHandle>> {
        let mut result = Vec::new();
        let mut dirty = Vec::new();

        let region_length = u64::from(required_pitch) * u64::from(required_height);
        let limit = u64::from(texaddr) + region_length;
        let query_range = AddressRange::start_length(texaddr, region_length);

        if query_range.overlaps(self.render_targets_range) {
            Self::scan_overlap_candidates(
                ctx,
                mem,
                &self.render_targets,
                false,
                texaddr,
                required_width,
                required_height,
                required_pitch,
                limit,
                &mut result,
                &mut dirty,
            );
        }

        if query_range.overlaps(self.depth_stencil_range) {
            Self::scan_overlap_candidates(
                ctx,
                mem,
                &self.depth_stencils,
                true,
                texaddr,
                required_width,
                required_height,
                required_pitch,
                limit,
                &mut result,
                &mut dirty,
            );
        }

        for (address, is_depth) in dirty {
            self.invalidate_surface_address(address, is_depth);
        }

        if result.len() > 1 {
            result.sort_by_key(|overlap| {
                (
                    overlap.surface.descriptor().last_use_tag,
                    u64::from(overlap.width) * u64::from(overlap.height),
                )
            });
        }

        result
    }

    #[allow(clippy::too_many_arguments)]
    fn scan_overlap_candidates(
        ctx: &mut B::CommandContext,
        mem: &impl GuestMemory,
        surfaces: &HashMap<u32, B::SurfaceStorage>,
        is_depth: bool,
        texaddr: u32,
        required_width: u32,
        required_height: u32,
        required_pitch: u32,
        limit: u64,
        result: &mut Vec<SurfaceOverlap<B::SurfaceHandle>>,
        dirty: &mut Vec<(u32, bool)>,
    ) {
        for (&address, storage) in surfaces {
            if u64::from(address) >= limit {
                continue;
            }

            let surface = B::get(storage);
            if !pitch_compatible(&surface, required_pitch, required_height) {
                continue;
            }

            let read_aa_mode = surface.descriptor().read_aa_mode;
            let scale_x = read_aa_mode.scale_x();
            let scale_y = read_aa_mode.scale_y();

            let surface_size = u64::from(surface.rsx_pitch())
                * u64::from(surface.surface_height())
                * u64::from(scale_y);
            if u64::from(address) + surface_size <= u64::from(texaddr) {
                continue;
            }

            B::read_barrier(ctx, &surface);
            if !surface.test(mem) {
                dirty.push((address, is_depth));
                continue;
            }

            let info = surface.format_info();
            let mut overlap = SurfaceOverlap {
                surface,
                base_address: address,
                is_depth,
                is_clipped: false,
                src_x: 0,
                src_y: 0,
                dst_x: 0,
                dst_y: 0,
                width: 0,
                height: 0,
            };

            if address < texaddr {
                // The texture's top-left corner lies inside the candidate.
                let int_required_width = required_width / scale_x;
                let int_required_height = required_height / scale_y;

                let offset = texaddr - address;
                overlap.src_y = (offset / required_pitch) / scale_y;
                overlap.src_x = (offset % required_pitch) / info.bpp / scale_x;
                overlap.width =
                    int_required_width.min(info.surface_width.saturating_sub(overlap.src_x));
                overlap.height =
                    int_required_height.min(info.surface_height.saturating_sub(overlap.src_y));
                overlap.is_clipped =
                    overlap.width < int_required_width || overlap.height < int_required_height;
            } else {
                // The candidate starts inside the texture region.
                let int_surface_width = info.surface_width * scale_x;
                let int_surface_height = info.surface_height * scale_y;

                let offset = address - texaddr;
                overlap.dst_y = offset / required_pitch;
                overlap.dst_x = (offset % required_pitch) / info.bpp;
                overlap.width = int_surface_width.min(required_width.saturating_sub(overlap.dst_x));
                overlap.height =
                    int_surface_height.min(required_height.saturating_sub(overlap.dst_y));
                overlap.is_clipped =
                    overlap.width < required_width || overlap.height < required_height;
                overlap.width /= scale_x;
                overlap.height /= scale_y;
            }

            result.push(overlap);
        }
    }

    /// Rebuild the per-bound-surface containment records.
    pub(crate) fn generate_render_target_memory_tree(&mut self) {
        let mut tree = Vec::new();

        for (address, surface) in &self.bound_render_targets {
            if let (address @ 1.., Some(surface)) = (*address, surface) {
                if let Some(block) = self.build_hierarchy_block(address, surface) {
                    tree.push(block);
                }
            }
        }

        if let (address @ 1.., Some(surface)) =
            (self.bound_depth_stencil.0, &self.bound_depth_stencil.1)
        {
            if let Some(block) = self.build_hierarchy_block(address, surface) {
                tree.push(block);
            }
        }

        self.memory_tree = tree;
    }

    fn build_hierarchy_block(
        &self,
        memory_address: u32,
        bound: &B::SurfaceHandle,
    ) -> Option<SurfaceHierarchy<B::SurfaceHandle>> {
        let info = bound.format_info();
        let memory_range = info.rsx_pitch * info.surface_height;
        let memory_end = u64::from(memory_address) + u64::from(memory_range);

        let mut block = SurfaceHierarchy {
            memory_address,
            memory_range,
            overlapping_set: Vec::new(),
        };

        for (&address, storage) in &self.render_targets {
            Self::process_hierarchy_entry(&mut block, &info, memory_end, address, B::get(storage));
        }
        for (&address, storage) in &self.depth_stencils {
            Self::process_hierarchy_entry(&mut block, &info, memory_end, address, B::get(storage));
        }

        (!block.overlapping_set.is_empty()).then_some(block)
    }

    fn process_hierarchy_entry(
        block: &mut SurfaceHierarchy<B::SurfaceHandle>,
        info: &crate::descriptor::SurfaceFormatInfo,
        memory_end: u64,
        address: u32,
        surface: B::SurfaceHandle,
    ) {
        // `<=` also skips the bound surface's own registry entry.
        if address <= block.memory_address || u64::from(address) >= memory_end {
            return;
        }

        let contained = surface.format_info();
        let offset = address - block.memory_address;
        let offset_y = offset / info.rsx_pitch;
        let offset_x = (offset % info.rsx_pitch) / info.bpp;
        let contained_pitch = contained.bpp * contained.surface_width;

        let fits_w = (offset % info.rsx_pitch) + contained_pitch <= info.rsx_pitch;
        let fits_h = u64::from(offset_y + contained.surface_height) * u64::from(info.rsx_pitch)
            <= u64::from(block.memory_range);

        if fits_w && fits_h {
            block.overlapping_set.push(MemoryOverlap {
                surface,
                memory_address: address,
                x: offset_x,
                y: offset_y,
                w: contained.surface_width,
                h: contained.surface_height,
            });
        }
    }
}
