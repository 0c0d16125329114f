// SPDX-License-Identifier: MIT
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(all(not(feature = "std"), feature = "alloc"))]
extern crate alloc;

// === Core modules ===
pub mod error;
mod macros;

// === Backend modules ===
#[cfg(feature = "alloc")]
mod mem;

#[cfg(feature = "std")]
mod std;

// === Prelude re-exports (central entrypoint) ===
pub mod prelude {
    pub use super::OpalIO;
    pub use super::OpalIOExt;
    pub use super::OpalIOSetLen;
    pub use super::OpalIOStructExt;
    pub use super::error::*;

    #[cfg(feature = "alloc")]
    pub use super::mem::MemOpalIO;

    #[cfg(feature = "std")]
    pub use super::std::StdOpalIO;
}

#[cfg(feature = "alloc")]
pub use mem::MemOpalIO;
#[cfg(feature = "std")]
pub use self::std::StdOpalIO;

// === Internal use ===
use error::*;
#[allow(clippy::single_component_path_imports)]
use paste;

// === Constants ===
/// Maximum size of internal scratch buffer (used for chunked ops)
const BLOCK_BUF_SIZE: usize = 8192;

// === Traits ===

/// Offset-addressed I/O abstraction.
///
/// Allows read/write/flush at arbitrary absolute offsets.
/// Implementations may target RAM buffers, files, or block devices.
pub trait OpalIO {
    /// Reads `buf.len()` bytes into `buf` from `offset` (absolute).
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> OpalIOResult;

    /// Writes `data` at `offset` (absolute).
    fn write_at(&mut self, offset: u64, data: &[u8]) -> OpalIOResult;

    /// Flushes any buffered data (may be a no-op).
    fn flush(&mut self) -> OpalIOResult;

    /// Total length of the underlying storage, in bytes.
    fn len(&mut self) -> OpalIOResult<u64>;

    /// Copies `len` bytes from `src` at `src_offset` to `dest_offset`.
    ///
    /// The default implementation bounces through a fixed scratch
    /// buffer; backends may override with a single-copy path.
    fn copy_from(
        &mut self,
        src: &mut dyn OpalIO,
        src_offset: u64,
        dest_offset: u64,
        len: u64,
    ) -> OpalIOResult {
        let mut buf = [0u8; BLOCK_BUF_SIZE];
        let mut remaining = len;
        let mut src_off = src_offset;
        let mut dst_off = dest_offset;

        while remaining > 0 {
            let chunk = remaining.min(BLOCK_BUF_SIZE as u64) as usize;
            src.read_at(src_off, &mut buf[..chunk])?;
            self.write_at(dst_off, &buf[..chunk])?;
            src_off += chunk as u64;
            dst_off += chunk as u64;
            remaining -= chunk as u64;
        }

        Ok(())
    }
}

/// Extension helpers for OpalIO.
///
/// Provides chunked reads/writes, zero fill, and low-level primitive
/// accessors (read_u16_at/write_u32_at/...).
pub trait OpalIOExt: OpalIO {
    /// Reads `buf.len()` bytes from `offset` in chunks of `chunk_size` or less.
    #[inline(always)]
    fn read_in_chunks(&mut self, offset: u64, buf: &mut [u8], chunk_size: usize) -> OpalIOResult {
        let mut remaining = buf.len();
        let mut off = offset;
        let mut pos = 0;

        while remaining > 0 {
            let to_read = remaining.min(chunk_size);
            self.read_at(off, &mut buf[pos..pos + to_read])?;
            off += to_read as u64;
            pos += to_read;
            remaining -= to_read;
        }

        Ok(())
    }

    /// Writes `buf.len()` bytes at `offset` in chunks of `chunk_size` or less.
    #[inline(always)]
    fn write_in_chunks(&mut self, offset: u64, buf: &[u8], chunk_size: usize) -> OpalIOResult {
        let mut remaining = buf.len();
        let mut off = offset;
        let mut pos = 0;

        while remaining > 0 {
            let to_write = remaining.min(chunk_size);
            self.write_at(off, &buf[pos..pos + to_write])?;
            off += to_write as u64;
            pos += to_write;
            remaining -= to_write;
        }

        Ok(())
    }

    /// Fills a region with zeroes.
    #[inline(always)]
    fn zero_fill(&mut self, offset: u64, len: usize) -> OpalIOResult {
        const ZERO_BUF: [u8; BLOCK_BUF_SIZE] = [0u8; BLOCK_BUF_SIZE];
        let mut remaining = len;
        let mut off = offset;
        while remaining > 0 {
            let chunk = remaining.min(ZERO_BUF.len());
            self.write_at(off, &ZERO_BUF[..chunk])?;
            off += chunk as u64;
            remaining -= chunk;
        }
        Ok(())
    }

    // Implements read/write helpers for primitive types (u16, u32, u64)
    opalio_impl_primitive_rw!(u16, u32, u64);
}

impl<T: OpalIO + ?Sized> OpalIOExt for T {}

/// Trait for setting the length of an OpalIO object.
///
/// Allows resizing the underlying storage (if supported by the backend).
pub trait OpalIOSetLen {
    /// Sets the length of the storage.
    fn set_len(&mut self, len: u64) -> OpalIOResult;
}

/// Extension trait for reading and writing structs using zerocopy.
///
/// Requires the struct to implement zerocopy traits for safe conversion.
pub trait OpalIOStructExt: OpalIO {
    /// Reads a struct of type `T` from the given offset.
    fn read_struct<T: zerocopy::FromBytes + zerocopy::KnownLayout + zerocopy::Immutable>(
        &mut self,
        offset: u64,
    ) -> OpalIOResult<T> {
        let size = core::mem::size_of::<T>();
        assert!(size <= BLOCK_BUF_SIZE, "read_struct: type too large");
        let mut buf = [0u8; BLOCK_BUF_SIZE];
        self.read_at(offset, &mut buf[..size])?;
        T::read_from_bytes(&buf[..size]).map_err(|_| OpalIOError::Error("read_struct failed"))
    }

    /// Writes a struct of type `T` at the given offset.
    fn write_struct<T: zerocopy::IntoBytes + zerocopy::KnownLayout + zerocopy::Immutable>(
        &mut self,
        offset: u64,
        val: &T,
    ) -> OpalIOResult {
        let bytes = val.as_bytes();
        self.write_at(offset, bytes)
    }
}

impl<T: OpalIO + ?Sized> OpalIOStructExt for T {}
