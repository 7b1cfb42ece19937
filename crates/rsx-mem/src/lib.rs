//! Guest memory window for the RSX emulation crates.
//!
//! The GPU core addresses guest memory with 32-bit physical addresses and only
//! ever needs one primitive from it: the 8-byte word at a given address, read
//! without synchronization against the guest CPU ([`GuestMemory`]). The real
//! emulator backs this with its memory subsystem; [`VecGuestMemory`] is a
//! contiguous in-memory implementation for tests.

#![forbid(unsafe_code)]

mod window;

pub use window::{GuestMemory, GuestMemoryError, VecGuestMemory};
