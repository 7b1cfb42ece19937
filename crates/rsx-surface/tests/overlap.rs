//! Overlap oracle scenarios: staleness pruning, coordinate projection, and
//! result ordering.

mod common;

use pretty_assertions::assert_eq;
use rsx_surface::null_backend::NullCommandContext;
use rsx_mem::VecGuestMemory;
use rsx_surface::{ColorFormat, RenderSurface};

use common::{bind_color_slot0, store, unbind_all};

#[test]
fn stale_surface_is_pruned_instead_of_reported() {
    let mut store = store();
    let mut ctx = NullCommandContext::new();
    let mem = VecGuestMemory::new(0x0120_0000);

    const BASE: u32 = 0x0100_0000;
    bind_color_slot0(&mut store, &mut ctx, BASE, ColorFormat::A8R8G8B8, 640, 480, 2560);
    unbind_all(&mut store, &mut ctx);

    // A guest write lands on the surface's base sample.
    mem.write_qword(BASE, 0xDEAD_BEEF_DEAD_BEEF).unwrap();

    let overlaps = store.get_merged_texture_memory_region(&mut ctx, &mem, BASE, 640, 480, 2560);

    assert!(overlaps.is_empty());
    assert_eq!(store.stats().color_surfaces, 0, "stale surface must be pruned");
    assert_eq!(store.stats().invalidated_resources, 1);
}

#[test]
fn stale_but_bound_surface_is_skipped_without_pruning() {
    let mut store = store();
    let mut ctx = NullCommandContext::new();
    let mem = VecGuestMemory::new(0x0120_0000);

    const BASE: u32 = 0x0100_0000;
    bind_color_slot0(&mut store, &mut ctx, BASE, ColorFormat::A8R8G8B8, 640, 480, 2560);
    mem.write_qword(BASE, 0xDEAD_BEEF_DEAD_BEEF).unwrap();

    let overlaps = store.get_merged_texture_memory_region(&mut ctx, &mem, BASE, 640, 480, 2560);

    assert!(overlaps.is_empty());
    assert_eq!(store.stats().color_surfaces, 1, "bound surfaces stay put");
    assert_eq!(store.stats().invalidated_resources, 0);
}

#[test]
fn texture_starting_before_the_surface_projects_into_destination_space() {
    let mut store = store();
    let mut ctx = NullCommandContext::new();
    let mem = VecGuestMemory::new(0x0110_0000);

    bind_color_slot0(&mut store, &mut ctx, 0x0100_0400, ColorFormat::A8R8G8B8, 64, 64, 256);

    let overlaps =
        store.get_merged_texture_memory_region(&mut ctx, &mem, 0x0100_0000, 128, 64, 256);

    assert_eq!(overlaps.len(), 1);
    let overlap = &overlaps[0];
    assert_eq!(overlap.base_address, 0x0100_0400);
    assert!(!overlap.is_depth);
    assert_eq!((overlap.src_x, overlap.src_y), (0, 0));
    assert_eq!((overlap.dst_x, overlap.dst_y), (0, 4));
    assert_eq!((overlap.width, overlap.height), (64, 60));
    assert!(overlap.is_clipped);
}

#[test]
fn texture_at_the_surface_base_is_a_full_unclipped_hit() {
    let mut store = store();
    let mut ctx = NullCommandContext::new();
    let mem = VecGuestMemory::new(0x0110_0000);

    const BASE: u32 = 0x0100_0000;
    bind_color_slot0(&mut store, &mut ctx, BASE, ColorFormat::A8R8G8B8, 64, 64, 256);

    let overlaps = store.get_merged_texture_memory_region(&mut ctx, &mem, BASE, 64, 64, 256);

    assert_eq!(overlaps.len(), 1);
    let overlap = &overlaps[0];
    assert_eq!((overlap.src_x, overlap.src_y), (0, 0));
    assert_eq!((overlap.dst_x, overlap.dst_y), (0, 0));
    assert_eq!((overlap.width, overlap.height), (64, 64));
    assert!(!overlap.is_clipped);
}

#[test]
fn texture_inside_the_surface_projects_into_source_space() {
    let mut store = store();
    let mut ctx = NullCommandContext::new();
    let mem = VecGuestMemory::new(0x0110_0000);

    const BASE: u32 = 0x0100_0000;
    bind_color_slot0(&mut store, &mut ctx, BASE, ColorFormat::A8R8G8B8, 64, 64, 256);

    // Four rows and eight pixels into the surface.
    let texaddr = BASE + 4 * 256 + 8 * 4;
    let overlaps = store.get_merged_texture_memory_region(&mut ctx, &mem, texaddr, 32, 16, 256);

    assert_eq!(overlaps.len(), 1);
    let overlap = &overlaps[0];
    assert_eq!((overlap.src_x, overlap.src_y), (8, 4));
    assert_eq!((overlap.dst_x, overlap.dst_y), (0, 0));
    assert_eq!((overlap.width, overlap.height), (32, 16));
    assert!(!overlap.is_clipped);
}

#[test]
fn query_past_every_surface_is_empty() {
    let mut store = store();
    let mut ctx = NullCommandContext::new();
    let mem = VecGuestMemory::new(0x0110_0000);

    bind_color_slot0(&mut store, &mut ctx, 0x0100_0000, ColorFormat::A8R8G8B8, 64, 64, 256);

    let overlaps =
        store.get_merged_texture_memory_region(&mut ctx, &mem, 0x0108_0000, 64, 64, 256);
    assert!(overlaps.is_empty());
}

#[test]
fn incompatible_pitch_is_filtered_out() {
    let mut store = store();
    let mut ctx = NullCommandContext::new();
    let mem = VecGuestMemory::new(0x0110_0000);

    const BASE: u32 = 0x0100_0000;
    bind_color_slot0(&mut store, &mut ctx, BASE, ColorFormat::A8R8G8B8, 64, 64, 256);

    let overlaps = store.get_merged_texture_memory_region(&mut ctx, &mem, BASE, 128, 64, 512);
    assert!(overlaps.is_empty());
}

#[test]
fn results_are_ordered_by_recency_then_area() {
    let mut store = store();
    let mut ctx = NullCommandContext::new();
    let mem = VecGuestMemory::new(0x0110_0000);

    const BASE: u32 = 0x0100_0000;
    const NEWER: u32 = BASE + 0x4000;
    bind_color_slot0(&mut store, &mut ctx, BASE, ColorFormat::A8R8G8B8, 64, 64, 256);
    let older = store.bound_render_targets[0].1.clone().expect("slot 0 bound");
    bind_color_slot0(&mut store, &mut ctx, NEWER, ColorFormat::A8R8G8B8, 64, 64, 256);
    let newer = store.bound_render_targets[0].1.clone().expect("slot 0 bound");

    older.descriptor_mut().last_use_tag = 10;
    newer.descriptor_mut().last_use_tag = 20;

    let overlaps = store.get_merged_texture_memory_region(&mut ctx, &mem, BASE, 64, 128, 256);

    let order: Vec<u32> = overlaps.iter().map(|overlap| overlap.base_address).collect();
    assert_eq!(order, vec![BASE, NEWER]);

    // Flip the stamps; the order follows.
    older.descriptor_mut().last_use_tag = 30;
    let overlaps = store.get_merged_texture_memory_region(&mut ctx, &mem, BASE, 64, 128, 256);
    let order: Vec<u32> = overlaps.iter().map(|overlap| overlap.base_address).collect();
    assert_eq!(order, vec![NEWER, BASE]);
}
