//! The bind/rebind protocol.
//!
//! `prepare_render_target` is called whenever surface format, clip, or
//! addresses change. Per requested address it either revalidates the surface
//! already stored there, displaces a mismatched or opposite-type occupant
//! into the invalidated pool, shops that pool for a reusable storage of the
//! right shape, or as a last resort asks the backend for a fresh surface.
//! Displaced bits are threaded through as a `prior_contents` source so the
//! backend can blit them into the successor.
//!
//! The color and depth paths are deliberately not quite symmetric: on the
//! pool-reuse branch, color invalidates contents before the draw transition
//! while depth transitions first. Backends depend on that order; keep it.

use crate::backend::SurfaceBackend;
use crate::descriptor::RenderSurface;
use crate::format::{rtt_indexes, ColorFormat, DepthFormat, SurfaceAntialiasing, SurfaceTarget};
use crate::range::AddressRange;

use super::{next_shared_tag, SurfaceStore};

impl<B: SurfaceBackend> SurfaceStore<B> {
    /// Update the bound color and depth surfaces.
    ///
    /// Color slots are bound in the order given by the MRT layout; depth is
    /// bound last. Previously bound surfaces transition to sampleable before
    /// any slot is rebound.
    #[allow(clippy::too_many_arguments)]
    pub fn prepare_render_target(
        &mut self,
        ctx: &mut B::CommandContext,
        color_format: ColorFormat,
        depth_format: DepthFormat,
        clip_width: u32,
        clip_height: u32,
        target: SurfaceTarget,
        antialias: SurfaceAntialiasing,
        surface_addresses: [u32; 4],
        depth_address: u32,
        surface_pitches: [u32; 4],
        depth_pitch: u32,
    ) {
        self.cache_tag = next_shared_tag();
        self.memory_tree.clear();

        // Make previously bound color targets sampleable.
        for slot in &mut self.bound_render_targets {
            if let Some(surface) = slot.1.take() {
                B::prepare_rtt_for_sampling(ctx, &surface);
            }
            slot.0 = 0;
        }

        for &index in rtt_indexes(target) {
            let address = surface_addresses[index];
            if address == 0 {
                continue;
            }

            let surface = self.bind_address_as_render_target(
                ctx,
                address,
                color_format,
                antialias,
                clip_width,
                clip_height,
                surface_pitches[index],
            );
            self.bound_render_targets[index] = (address, Some(surface));
        }

        // Same for the depth buffer.
        if let Some(surface) = self.bound_depth_stencil.1.take() {
            B::prepare_ds_for_sampling(ctx, &surface);
        }
        self.bound_depth_stencil = (0, None);

        if depth_address == 0 {
            return;
        }

        let surface = self.bind_address_as_depth_stencil(
            ctx,
            depth_address,
            depth_format,
            antialias,
            clip_width,
            clip_height,
            depth_pitch,
        );
        self.bound_depth_stencil = (depth_address, Some(surface));
    }

    /// Bind `address` as a color render target, reusing whatever compatible
    /// resource the registry or the invalidated pool can supply.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn bind_address_as_render_target(
        &mut self,
        ctx: &mut B::CommandContext,
        address: u32,
        format: ColorFormat,
        antialias: SurfaceAntialiasing,
        width: u32,
        height: u32,
        pitch: u32,
    ) -> B::SurfaceHandle {
        let mut convert_surface = None;

        // Displace any depth surface occupying this address; its bits stay
        // available as a conversion source for the new target.
        if let Some(storage) = self.depth_stencils.remove(&address) {
            B::notify_surface_invalidated(&storage);
            convert_surface = Some(B::get(&storage));
            self.invalidated_resources.push_back(storage);
        }

        if let Some(storage) = self.render_targets.get(&address) {
            if B::rtt_has_format_width_height(storage, format, width, height, false) {
                let surface = B::get(storage);
                if B::surface_is_pitch_compatible(storage, pitch) {
                    B::notify_surface_persist(storage);
                } else {
                    B::invalidate_surface_contents(ctx, &surface, None, address, pitch);
                }
                B::prepare_rtt_for_drawing(ctx, &surface);
                surface.descriptor_mut().write_aa_mode = antialias;
                return surface;
            }
        }

        // Mismatched shape: pull the occupant out, keeping it as a bit
        // source and as exchange material for the pool scan.
        let mut old_surface = None;
        let mut old_surface_storage = None;
        if let Some(storage) = self.render_targets.remove(&address) {
            old_surface = Some(B::get(&storage));
            old_surface_storage = Some(storage);
        }

        let length = u64::from(pitch) * u64::from(height) * u64::from(antialias.scale_y());
        self.render_targets_range
            .extend_to_cover(AddressRange::start_length(address, length));

        let contents_to_copy = old_surface.or(convert_surface);

        // Shop the invalidated pool before allocating.
        let mut new_surface_storage = None;
        for index in 0..self.invalidated_resources.len() {
            if !B::rtt_has_format_width_height(
                &self.invalidated_resources[index],
                format,
                width,
                height,
                true,
            ) {
                continue;
            }

            let storage = match old_surface_storage.take() {
                // Exchange: the displaced occupant takes the vacated slot.
                Some(displaced) => {
                    B::notify_surface_invalidated(&displaced);
                    std::mem::replace(&mut self.invalidated_resources[index], displaced)
                }
                None => self
                    .invalidated_resources
                    .remove(index)
                    .expect("index is in bounds"),
            };

            let surface = B::get(&storage);
            B::invalidate_surface_contents(ctx, &surface, contents_to_copy.as_ref(), address, pitch);
            B::prepare_rtt_for_drawing(ctx, &surface);
            new_surface_storage = Some(storage);
            break;
        }

        if new_surface_storage.is_none() {
            // Already shape-mismatched, so it was excluded from the scan.
            if let Some(displaced) = old_surface_storage.take() {
                B::notify_surface_invalidated(&displaced);
                self.invalidated_resources.push_back(displaced);
            }
        }

        let storage = new_surface_storage.unwrap_or_else(|| {
            B::create_render_target(
                ctx,
                address,
                format,
                width,
                height,
                pitch,
                contents_to_copy.as_ref(),
            )
        });
        let surface = B::get(&storage);
        self.render_targets.insert(address, storage);

        surface.descriptor_mut().write_aa_mode = antialias;
        self.trim_invalidated_pool();
        surface
    }

    /// Bind `address` as the depth/stencil target. Mirrors the color path,
    /// including the reversed prepare/invalidate order on the reuse branch.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn bind_address_as_depth_stencil(
        &mut self,
        ctx: &mut B::CommandContext,
        address: u32,
        format: DepthFormat,
        antialias: SurfaceAntialiasing,
        width: u32,
        height: u32,
        pitch: u32,
    ) -> B::SurfaceHandle {
        let mut convert_surface = None;

        if let Some(storage) = self.render_targets.remove(&address) {
            B::notify_surface_invalidated(&storage);
            convert_surface = Some(B::get(&storage));
            self.invalidated_resources.push_back(storage);
        }

        if let Some(storage) = self.depth_stencils.get(&address) {
            if B::ds_has_format_width_height(storage, format, width, height, false) {
                let surface = B::get(storage);
                if B::surface_is_pitch_compatible(storage, pitch) {
                    B::notify_surface_persist(storage);
                } else {
                    B::invalidate_surface_contents(ctx, &surface, None, address, pitch);
                }
                B::prepare_ds_for_drawing(ctx, &surface);
                surface.descriptor_mut().write_aa_mode = antialias;
                return surface;
            }
        }

        let mut old_surface = None;
        let mut old_surface_storage = None;
        if let Some(storage) = self.depth_stencils.remove(&address) {
            old_surface = Some(B::get(&storage));
            old_surface_storage = Some(storage);
        }

        let length = u64::from(pitch) * u64::from(height) * u64::from(antialias.scale_y());
        self.depth_stencil_range
            .extend_to_cover(AddressRange::start_length(address, length));

        let contents_to_copy = old_surface.or(convert_surface);

        let mut new_surface_storage = None;
        for index in 0..self.invalidated_resources.len() {
            if !B::ds_has_format_width_height(
                &self.invalidated_resources[index],
                format,
                width,
                height,
                true,
            ) {
                continue;
            }

            let storage = match old_surface_storage.take() {
                Some(displaced) => {
                    B::notify_surface_invalidated(&displaced);
                    std::mem::replace(&mut self.invalidated_resources[index], displaced)
                }
                None => self
                    .invalidated_resources
                    .remove(index)
                    .expect("index is in bounds"),
            };

            let surface = B::get(&storage);
            B::prepare_ds_for_drawing(ctx, &surface);
            B::invalidate_surface_contents(ctx, &surface, contents_to_copy.as_ref(), address, pitch);
            new_surface_storage = Some(storage);
            break;
        }

        if new_surface_storage.is_none() {
            if let Some(displaced) = old_surface_storage.take() {
                B::notify_surface_invalidated(&displaced);
                self.invalidated_resources.push_back(displaced);
            }
        }

        let storage = new_surface_storage.unwrap_or_else(|| {
            B::create_depth_stencil(
                ctx,
                address,
                format,
                width,
                height,
                pitch,
                contents_to_copy.as_ref(),
            )
        });
        let surface = B::get(&storage);
        self.depth_stencils.insert(address, storage);

        surface.descriptor_mut().write_aa_mode = antialias;
        self.trim_invalidated_pool();
        surface
    }
}
