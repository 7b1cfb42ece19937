//! Inert [`SurfaceBackend`] implementation for tests.
//!
//! Surfaces are plain reference-counted records with no host resources
//! behind them. The command context keeps an ordered event log of every
//! backend call, so tests can pin down not just what the store did but in
//! which order it did it. Download payloads are settable per surface; unset
//! payloads download as zeroes of the expected pitched size.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use crate::backend::SurfaceBackend;
use crate::descriptor::{RenderSurface, SurfaceDescriptor};
use crate::format::{ColorFormat, DepthFormat};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NullSurfaceFormat {
    Color(ColorFormat),
    Depth(DepthFormat),
}

/// Backend call log entry. Addresses are the surface's guest base address at
/// the time of the call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NullBackendEvent {
    CreateRenderTarget { address: u32, with_source: bool },
    CreateDepthStencil { address: u32, with_source: bool },
    PrepareRttForDrawing { address: u32 },
    PrepareRttForSampling { address: u32 },
    PrepareDsForDrawing { address: u32 },
    PrepareDsForSampling { address: u32 },
    InvalidateContents { address: u32, with_source: bool },
    ReadBarrier { address: u32 },
    IssueDownload { address: u32 },
    IssueDepthDownload { address: u32 },
    IssueStencilDownload { address: u32 },
}

#[derive(Default)]
pub struct NullCommandContext {
    pub events: Vec<NullBackendEvent>,
    pub created_surfaces: u32,
    /// When set, every download maps as failed.
    pub fail_maps: bool,
}

impl NullCommandContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_events(&mut self) -> Vec<NullBackendEvent> {
        std::mem::take(&mut self.events)
    }
}

pub struct NullSurface {
    format: NullSurfaceFormat,
    width: u32,
    height: u32,
    native_pitch: u32,
    rsx_pitch: Cell<u32>,
    base_address: Cell<u32>,
    descriptor: RefCell<SurfaceDescriptor<NullSurfaceHandle>>,
    color_payload: RefCell<Vec<u8>>,
    depth_payload: RefCell<Vec<u8>>,
    stencil_payload: RefCell<Vec<u8>>,
}

#[derive(Clone)]
pub struct NullSurfaceHandle(Rc<NullSurface>);

impl NullSurfaceHandle {
    fn new(
        format: NullSurfaceFormat,
        address: u32,
        width: u32,
        height: u32,
        pitch: u32,
    ) -> Self {
        let bpp = match format {
            NullSurfaceFormat::Color(color) => color.bytes_per_pixel(),
            NullSurfaceFormat::Depth(depth) => depth.bytes_per_pixel(),
        };
        Self(Rc::new(NullSurface {
            format,
            width,
            height,
            native_pitch: bpp * width,
            rsx_pitch: Cell::new(pitch),
            base_address: Cell::new(address),
            descriptor: RefCell::new(SurfaceDescriptor::default()),
            color_payload: RefCell::new(Vec::new()),
            depth_payload: RefCell::new(Vec::new()),
            stencil_payload: RefCell::new(Vec::new()),
        }))
    }

    pub fn format(&self) -> NullSurfaceFormat {
        self.0.format
    }

    pub fn base_address(&self) -> u32 {
        self.0.base_address.get()
    }

    pub fn set_color_payload(&self, data: Vec<u8>) {
        *self.0.color_payload.borrow_mut() = data;
    }

    pub fn set_depth_payload(&self, data: Vec<u8>) {
        *self.0.depth_payload.borrow_mut() = data;
    }

    pub fn set_stencil_payload(&self, data: Vec<u8>) {
        *self.0.stencil_payload.borrow_mut() = data;
    }
}

impl PartialEq for NullSurfaceHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for NullSurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NullSurface")
            .field("format", &self.0.format)
            .field("address", &format_args!("0x{:08x}", self.base_address()))
            .field("width", &self.0.width)
            .field("height", &self.0.height)
            .finish()
    }
}

impl RenderSurface for NullSurfaceHandle {
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
        self.0.rsx_pitch.get()
    }

    fn bytes_per_pixel(&self) -> u32 {
        match self.0.format {
            NullSurfaceFormat::Color(color) => color.bytes_per_pixel(),
            NullSurfaceFormat::Depth(depth) => depth.bytes_per_pixel(),
        }
    }

    fn is_depth_surface(&self) -> bool {
        matches!(self.0.format, NullSurfaceFormat::Depth(_))
    }
}

pub struct NullSurfaceStorage(NullSurfaceHandle);

impl NullSurfaceStorage {
    fn matches(&self, format: NullSurfaceFormat, width: u32, height: u32, lenient: bool) -> bool {
        let surface = &self.0;
        if surface.format() != format {
            return false;
        }
        if lenient {
            surface.surface_width() >= width && surface.surface_height() >= height
        } else {
            surface.surface_width() == width && surface.surface_height() == height
        }
    }
}

pub struct NullDownload {
    data: Option<Vec<u8>>,
}

fn download(ctx: &NullCommandContext, payload: &RefCell<Vec<u8>>, default_len: usize) -> NullDownload {
    if ctx.fail_maps {
        return NullDownload { data: None };
    }
    let payload = payload.borrow();
    let data = if payload.is_empty() {
        vec![0; default_len]
    } else {
        payload.clone()
    };
    NullDownload { data: Some(data) }
}

pub struct NullBackend;

impl SurfaceBackend for NullBackend {
    type CommandContext = NullCommandContext;
    type SurfaceStorage = NullSurfaceStorage;
    type SurfaceHandle = NullSurfaceHandle;
    type DownloadObject = NullDownload;

    fn get(storage: &NullSurfaceStorage) -> NullSurfaceHandle {
        storage.0.clone()
    }

    fn create_render_target(
        ctx: &mut NullCommandContext,
        address: u32,
        format: ColorFormat,
        width: u32,
        height: u32,
        pitch: u32,
        prior_contents: Option<&NullSurfaceHandle>,
    ) -> NullSurfaceStorage {
        ctx.created_surfaces += 1;
        ctx.events.push(NullBackendEvent::CreateRenderTarget {
            address,
            with_source: prior_contents.is_some(),
        });
        let surface =
            NullSurfaceHandle::new(NullSurfaceFormat::Color(format), address, width, height, pitch);
        surface.queue_tag(address);
        surface.set_old_contents(prior_contents);
        NullSurfaceStorage(surface)
    }

    fn create_depth_stencil(
        ctx: &mut NullCommandContext,
        address: u32,
        format: DepthFormat,
        width: u32,
        height: u32,
        pitch: u32,
        prior_contents: Option<&NullSurfaceHandle>,
    ) -> NullSurfaceStorage {
        ctx.created_surfaces += 1;
        ctx.events.push(NullBackendEvent::CreateDepthStencil {
            address,
            with_source: prior_contents.is_some(),
        });
        let surface =
            NullSurfaceHandle::new(NullSurfaceFormat::Depth(format), address, width, height, pitch);
        surface.queue_tag(address);
        surface.set_old_contents(prior_contents);
        NullSurfaceStorage(surface)
    }

    fn rtt_has_format_width_height(
        storage: &NullSurfaceStorage,
        format: ColorFormat,
        width: u32,
        height: u32,
        lenient: bool,
    ) -> bool {
        storage.matches(NullSurfaceFormat::Color(format), width, height, lenient)
    }

    fn ds_has_format_width_height(
        storage: &NullSurfaceStorage,
        format: DepthFormat,
        width: u32,
        height: u32,
        lenient: bool,
    ) -> bool {
        storage.matches(NullSurfaceFormat::Depth(format), width, height, lenient)
    }

    fn surface_is_pitch_compatible(storage: &NullSurfaceStorage, pitch: u32) -> bool {
        storage.0.rsx_pitch() == pitch
    }

    fn prepare_rtt_for_drawing(ctx: &mut NullCommandContext, surface: &NullSurfaceHandle) {
        ctx.events.push(NullBackendEvent::PrepareRttForDrawing {
            address: surface.base_address(),
        });
    }

    fn prepare_rtt_for_sampling(ctx: &mut NullCommandContext, surface: &NullSurfaceHandle) {
        ctx.events.push(NullBackendEvent::PrepareRttForSampling {
            address: surface.base_address(),
        });
    }

    fn prepare_ds_for_drawing(ctx: &mut NullCommandContext, surface: &NullSurfaceHandle) {
        ctx.events.push(NullBackendEvent::PrepareDsForDrawing {
            address: surface.base_address(),
        });
    }

    fn prepare_ds_for_sampling(ctx: &mut NullCommandContext, surface: &NullSurfaceHandle) {
        ctx.events.push(NullBackendEvent::PrepareDsForSampling {
            address: surface.base_address(),
        });
    }

    // The notify hooks carry no command context, so there is no event log to
    // append to; a real backend uses them for its own bookkeeping.
    fn notify_surface_invalidated(_storage: &NullSurfaceStorage) {}

    fn notify_surface_persist(_storage: &NullSurfaceStorage) {}

    fn invalidate_surface_contents(
        ctx: &mut NullCommandContext,
        surface: &NullSurfaceHandle,
        source: Option<&NullSurfaceHandle>,
        address: u32,
        pitch: u32,
    ) {
        ctx.events.push(NullBackendEvent::InvalidateContents {
            address,
            with_source: source.is_some(),
        });
        surface.0.base_address.set(address);
        surface.0.rsx_pitch.set(pitch);
        surface.set_old_contents(source);
        surface.reset_aa_mode();
        surface.queue_tag(address);
        surface.descriptor_mut().dirty = true;
    }

    fn read_barrier(ctx: &mut NullCommandContext, surface: &NullSurfaceHandle) {
        ctx.events.push(NullBackendEvent::ReadBarrier {
            address: surface.base_address(),
        });
    }

    fn issue_download_command(
        ctx: &mut NullCommandContext,
        surface: &NullSurfaceHandle,
        format: ColorFormat,
        width: u32,
        height: u32,
    ) -> NullDownload {
        ctx.events.push(NullBackendEvent::IssueDownload {
            address: surface.base_address(),
        });
        let default_len = (format.aligned_pitch(width) * height) as usize;
        download(ctx, &surface.0.color_payload, default_len)
    }

    fn issue_depth_download_command(
        ctx: &mut NullCommandContext,
        surface: &NullSurfaceHandle,
        format: DepthFormat,
        width: u32,
        height: u32,
    ) -> NullDownload {
        let _ = format;
        ctx.events.push(NullBackendEvent::IssueDepthDownload {
            address: surface.base_address(),
        });
        let default_len = (crate::format::align_up(width * 4, 256) * height) as usize;
        download(ctx, &surface.0.depth_payload, default_len)
    }

    fn issue_stencil_download_command(
        ctx: &mut NullCommandContext,
        surface: &NullSurfaceHandle,
        width: u32,
        height: u32,
    ) -> NullDownload {
        ctx.events.push(NullBackendEvent::IssueStencilDownload {
            address: surface.base_address(),
        });
        let default_len = (crate::format::align_up(width, 256) * height) as usize;
        download(ctx, &surface.0.stencil_payload, default_len)
    }

    fn map_downloaded_buffer(download: &mut NullDownload) -> Option<&[u8]> {
        download.data.as_deref()
    }

    fn unmap_downloaded_buffer(download: NullDownload) {
        drop(download);
    }
}
