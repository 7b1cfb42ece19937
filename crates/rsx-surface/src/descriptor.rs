//! Per-surface descriptor state and the surface capability trait.
//!
//! Every host surface participating in the store carries a
//! [`SurfaceDescriptor`]: the recency tag, the guest-memory fingerprint, the
//! dirty flag, and the predecessor-contents link. [`RenderSurface`] is what a
//! backend's surface handle must expose — geometry accessors plus shared
//! access to the descriptor — and in return provides the whole fingerprint and
//! write protocol as default methods.
//!
//! Fingerprints are five 8-byte guest words sampled in an X pattern across the
//! surface footprint (corners plus centroid). They are a probabilistic
//! staleness detector, not a coherence primitive: reads race guest CPU writes,
//! and a mismatch only ever widens into "treat the surface as changed".

use std::cell::{Ref, RefMut};

use rsx_mem::GuestMemory;
use tracing::warn;

use crate::format::SurfaceAntialiasing;

pub const MEMORY_TAG_SAMPLE_COUNT: usize = 5;

/// Guest tile metadata attached to a surface. The store carries it through
/// untouched; tiled address translation happens elsewhere.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileInfo {
    pub offset: u32,
    pub size: u32,
    pub pitch: u32,
    pub bank: u32,
}

/// Geometry snapshot of a surface, in surface pixels and bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SurfaceFormatInfo {
    pub surface_width: u32,
    pub surface_height: u32,
    pub native_pitch: u32,
    pub rsx_pitch: u32,
    pub bpp: u32,
}

/// Mutable state block of one stored surface.
///
/// `H` is the backend's surface handle type; `old_contents` points at the
/// predecessor surface whose bits should be blitted in before first use.
pub struct SurfaceDescriptor<H> {
    /// Tag of the most recent confirmed write to this surface.
    pub last_use_tag: u64,
    /// `(guest_address, value)` fingerprint samples; a zero address past the
    /// first entry terminates the armed set.
    pub memory_tag_samples: [(u32, u64); MEMORY_TAG_SAMPLE_COUNT],
    /// Set when a dependent memory region may have been modified since the
    /// last write.
    pub dirty: bool,
    /// Predecessor surface to inherit contents from; cleared on any write.
    pub old_contents: Option<H>,
    pub read_aa_mode: SurfaceAntialiasing,
    pub write_aa_mode: SurfaceAntialiasing,
    pub tile: Option<TileInfo>,
}

impl<H> Default for SurfaceDescriptor<H> {
    fn default() -> Self {
        Self {
            last_use_tag: 0,
            memory_tag_samples: [(0, 0); MEMORY_TAG_SAMPLE_COUNT],
            dirty: false,
            old_contents: None,
            read_aa_mode: SurfaceAntialiasing::Center1Sample,
            write_aa_mode: SurfaceAntialiasing::Center1Sample,
            tile: None,
        }
    }
}

/// Capability a backend surface handle exposes to the store.
///
/// Implementations supply the geometry accessors and shared descriptor
/// access; the fingerprint and write protocol comes for free. The store is
/// single-threaded, so descriptor access uses `RefCell`-style borrows; the
/// geometry accessors must not alias the descriptor cell (the provided
/// methods read geometry while holding descriptor borrows).
pub trait RenderSurface: Clone + PartialEq + Sized {
    fn descriptor(&self) -> Ref<'_, SurfaceDescriptor<Self>>;
    fn descriptor_mut(&self) -> RefMut<'_, SurfaceDescriptor<Self>>;

    /// Width in surface pixels (prior to antialias scaling).
    fn surface_width(&self) -> u32;
    /// Height in surface pixels (prior to antialias scaling).
    fn surface_height(&self) -> u32;
    /// Host-side row stride in bytes.
    fn native_pitch(&self) -> u32;
    /// Row stride as the guest sees it; may exceed the native pitch.
    fn rsx_pitch(&self) -> u32;
    fn bytes_per_pixel(&self) -> u32;
    fn is_depth_surface(&self) -> bool;

    fn format_info(&self) -> SurfaceFormatInfo {
        SurfaceFormatInfo {
            surface_width: self.surface_width(),
            surface_height: self.surface_height(),
            native_pitch: self.native_pitch(),
            rsx_pitch: self.rsx_pitch(),
            bpp: self.bytes_per_pixel(),
        }
    }

    /// Arm the fingerprint sample addresses for a surface based at `address`.
    ///
    /// Samples are placed in an X pattern: top-left, top-right, bottom-left,
    /// bottom-right, centroid. Does not read guest memory; values are
    /// captured later by [`sync_tag`](Self::sync_tag). Surfaces narrower than
    /// 16 bytes arm only the base sample, single-row surfaces only the top
    /// two.
    fn queue_tag(&self, address: u32) {
        let native_pitch = self.native_pitch();
        let rsx_pitch = self.rsx_pitch();
        let height = self.surface_height();

        let mut desc = self.descriptor_mut();
        desc.memory_tag_samples = [(0, 0); MEMORY_TAG_SAMPLE_COUNT];
        desc.memory_tag_samples[0].0 = address;

        if native_pitch < 16 {
            // Not enough area to gather samples if the pitch is too small.
            return;
        }

        desc.memory_tag_samples[1].0 = address + native_pitch - 8;

        if height > 1 {
            let last_row_offset = rsx_pitch * (height - 1);
            desc.memory_tag_samples[2].0 = address + last_row_offset;
            desc.memory_tag_samples[3].0 = address + last_row_offset + native_pitch - 8;

            let center_row_offset = rsx_pitch * (height / 2);
            desc.memory_tag_samples[4].0 = address + center_row_offset + native_pitch / 2;
        }
    }

    /// Snapshot the current guest memory word for every armed sample.
    fn sync_tag(&self, mem: &impl GuestMemory) {
        let mut desc = self.descriptor_mut();
        for sample in &mut desc.memory_tag_samples {
            if sample.0 == 0 {
                break;
            }
            sample.1 = mem.read_qword(sample.0);
        }
    }

    /// Check the fingerprint against current guest memory.
    ///
    /// Returns false iff some armed sample no longer matches, i.e. guest
    /// code wrote into the surface's memory since the last sync.
    fn test(&self, mem: &impl GuestMemory) -> bool {
        let desc = self.descriptor();
        if desc.dirty {
            // TODO: decide whether a dirty surface should be re-initialized
            // from guest memory before it is read.
            warn!("surface used before memory initialization");
        }

        for &(address, value) in &desc.memory_tag_samples {
            if address == 0 {
                break;
            }
            if mem.read_qword(address) != value {
                return false;
            }
        }
        true
    }

    /// Record a confirmed write: refresh the fingerprint, adopt the write AA
    /// mode for reads, and drop the dirty flag and any predecessor contents.
    fn on_write(&self, mem: &impl GuestMemory, write_tag: u64) {
        if write_tag != 0 {
            self.descriptor_mut().last_use_tag = write_tag;
        }

        // Re-tag unconditionally without introducing new data.
        self.sync_tag(mem);

        let mut desc = self.descriptor_mut();
        desc.read_aa_mode = desc.write_aa_mode;
        desc.dirty = false;
        desc.old_contents = None;
    }

    /// Transition from draw target to sampleable: reads now see the mode the
    /// surface was last drawn with.
    fn save_aa_mode(&self) {
        let mut desc = self.descriptor_mut();
        desc.read_aa_mode = desc.write_aa_mode;
        desc.write_aa_mode = SurfaceAntialiasing::Center1Sample;
    }

    fn reset_aa_mode(&self) {
        let mut desc = self.descriptor_mut();
        desc.read_aa_mode = SurfaceAntialiasing::Center1Sample;
        desc.write_aa_mode = SurfaceAntialiasing::Center1Sample;
    }

    /// Link `other` as the predecessor whose bits seed this surface.
    ///
    /// A predecessor with a different guest pitch carries incompatible
    /// content and clears the link instead.
    fn set_old_contents(&self, other: Option<&Self>) {
        let compatible = other.is_some_and(|o| o.rsx_pitch() == self.rsx_pitch());
        if compatible {
            let other = other.expect("compatible implies present");
            debug_assert!(
                other.descriptor().old_contents.as_ref() != Some(self),
                "predecessor link would form a cycle"
            );
            self.descriptor_mut().old_contents = Some(other.clone());
        } else {
            self.descriptor_mut().old_contents = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use pretty_assertions::assert_eq;
    use rsx_mem::VecGuestMemory;

    use super::*;

    struct Plain {
        width: u32,
        height: u32,
        native_pitch: u32,
        rsx_pitch: u32,
        descriptor: RefCell<SurfaceDescriptor<PlainHandle>>,
    }

    #[derive(Clone)]
    struct PlainHandle(Rc<Plain>);

    impl PartialEq for PlainHandle {
        fn eq(&self, other: &Self) -> bool {
            Rc::ptr_eq(&self.0, &other.0)
        }
    }

    impl RenderSurface for PlainHandle {
        fn descriptor(&self) -> Ref<'_, SurfaceDescriptor<Self>> {
            self.0.descriptor.borrow()
        }
        fn descriptor_mut(&self) -> RefMut<'_, SurfaceDescriptor<Self>> {
            self.0.descriptor.borrow_mut()
        }
        fn surface_width(&self) -> u32 {
            self.0.width
        }
        fn surface_height(&self) -> u32 {
            self.0.height
        }
        fn native_pitch(&self) -> u32 {
            self.0.native_pitch
        }
        fn rsx_pitch(&self) -> u32 {
            self.0.rsx_pitch
        }
        fn bytes_per_pixel(&self) -> u32 {
            4
        }
        fn is_depth_surface(&self) -> bool {
            false
        }
    }

    fn surface(width: u32, height: u32, native_pitch: u32, rsx_pitch: u32) -> PlainHandle {
        PlainHandle(Rc::new(Plain {
            width,
            height,
            native_pitch,
            rsx_pitch,
            descriptor: RefCell::new(SurfaceDescriptor::default()),
        }))
    }

    fn armed_addresses(handle: &PlainHandle) -> Vec<u32> {
        handle
            .descriptor()
            .memory_tag_samples
            .iter()
            .take_while(|(address, _)| *address != 0)
            .map(|(address, _)| *address)
            .collect()
    }

    #[test]
    fn queue_tag_arms_the_x_pattern() {
        let handle = surface(64, 64, 256, 256);
        handle.queue_tag(0x1000);
        assert_eq!(
            armed_addresses(&handle),
            vec![
                0x1000,
                0x1000 + 256 - 8,
                0x1000 + 63 * 256,
                0x1000 + 63 * 256 + 256 - 8,
                0x1000 + 32 * 256 + 128,
            ]
        );
    }

    #[test]
    fn narrow_surface_arms_one_sample() {
        let handle = surface(2, 64, 8, 8);
        handle.queue_tag(0x1000);
        assert_eq!(armed_addresses(&handle), vec![0x1000]);
    }

    #[test]
    fn single_row_surface_arms_two_samples() {
        let handle = surface(64, 1, 256, 256);
        handle.queue_tag(0x1000);
        assert_eq!(armed_addresses(&handle), vec![0x1000, 0x1000 + 256 - 8]);
    }

    #[test]
    fn test_detects_guest_writes() {
        let mem = VecGuestMemory::new(0x20000);
        let handle = surface(64, 64, 256, 256);
        handle.queue_tag(0x1000);
        handle.sync_tag(&mem);
        assert!(handle.test(&mem));

        mem.write_qword(0x1000 + 63 * 256, 0xDEAD_BEEF_DEAD_BEEF)
            .unwrap();
        assert!(!handle.test(&mem), "bottom-left corner write must trip the tag");

        handle.sync_tag(&mem);
        assert!(handle.test(&mem));
    }

    #[test]
    fn on_write_clears_dirty_state_and_adopts_write_aa() {
        let mem = VecGuestMemory::new(0x20000);
        let handle = surface(64, 64, 256, 256);
        handle.queue_tag(0x1000);
        {
            let mut desc = handle.descriptor_mut();
            desc.dirty = true;
            desc.old_contents = Some(handle.clone());
            desc.write_aa_mode = SurfaceAntialiasing::SquareCentered4Samples;
        }

        handle.on_write(&mem, 42);

        let desc = handle.descriptor();
        assert_eq!(desc.last_use_tag, 42);
        assert!(!desc.dirty);
        assert!(desc.old_contents.is_none());
        assert_eq!(desc.read_aa_mode, SurfaceAntialiasing::SquareCentered4Samples);
    }

    #[test]
    fn zero_write_tag_preserves_the_recency_stamp() {
        let mem = VecGuestMemory::new(0x20000);
        let handle = surface(64, 64, 256, 256);
        handle.on_write(&mem, 7);
        handle.on_write(&mem, 0);
        assert_eq!(handle.descriptor().last_use_tag, 7);
    }

    #[test]
    fn save_aa_mode_resets_the_write_mode() {
        let handle = surface(64, 64, 256, 256);
        handle.descriptor_mut().write_aa_mode = SurfaceAntialiasing::DiagonalCentered2Samples;
        handle.save_aa_mode();
        let desc = handle.descriptor();
        assert_eq!(desc.read_aa_mode, SurfaceAntialiasing::DiagonalCentered2Samples);
        assert_eq!(desc.write_aa_mode, SurfaceAntialiasing::Center1Sample);
    }

    #[test]
    fn mismatched_pitch_clears_the_predecessor_link() {
        let this = surface(64, 64, 256, 256);
        let narrow = surface(32, 64, 128, 128);
        this.set_old_contents(Some(&narrow));
        assert!(this.descriptor().old_contents.is_none());

        let same = surface(64, 64, 256, 256);
        this.set_old_contents(Some(&same));
        assert!(this.descriptor().old_contents.as_ref() == Some(&same));

        this.set_old_contents(None);
        assert!(this.descriptor().old_contents.is_none());
    }
}
