//! Page-locked buffers for plaintext key material.
//!
//! Every allocation that holds unwrapped key bytes goes through
//! [`SecureBuffer`]: pages are locked against swap on creation, the memory
//! is zeroized before it is freed, and copies are explicit. Constant-time
//! equality is provided for tag/MAC comparisons.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::{CryptoResult, Error, ErrorCode};

#[cfg(unix)]
unsafe fn lock_pages(ptr: *const u8, len: usize) -> bool {
    libc::mlock(ptr as *const libc::c_void, len) == 0
}

#[cfg(not(unix))]
unsafe fn lock_pages(_ptr: *const u8, _len: usize) -> bool {
    false
}

#[cfg(unix)]
unsafe fn unlock_pages(ptr: *const u8, len: usize) {
    let _ = libc::munlock(ptr as *const libc::c_void, len);
}

#[cfg(not(unix))]
unsafe fn unlock_pages(_ptr: *const u8, _len: usize) {}

/// Owning container for secret bytes.
///
/// Not `Clone`: duplicating secret material is always an explicit
/// [`SecureBuffer::try_clone`] call so copies cannot leak into logs or
/// accumulators by accident.
pub struct SecureBuffer {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
    locked: bool,
}

impl SecureBuffer {
    /// Allocate a zero-initialized buffer of `len` bytes and lock its
    /// pages against swap. Locking failure is tolerated (resource limits
    /// may forbid it); zeroization on drop is not.
    pub fn new(len: usize) -> CryptoResult<Self> {
        if len == 0 {
            return Err(Error::new(ErrorCode::InvalidInput, "Secure buffer length must be non-zero"));
        }

        let layout = Layout::from_size_align(len, 8)
            .map_err(|_| Error::new(ErrorCode::CryptoError, "Secure buffer allocation failed"))?;

        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw)
            .ok_or_else(|| Error::new(ErrorCode::CryptoError, "Secure buffer allocation failed"))?;

        let locked = unsafe { lock_pages(ptr.as_ptr(), len) };
        if !locked {
            tracing::debug!("page locking unavailable, secure buffer falls back to zeroize-only");
        }

        Ok(Self { ptr, len, layout, locked })
    }

    /// Move the given bytes into a fresh secure buffer. The source vector
    /// is zeroized before it is dropped.
    pub fn from_vec(mut bytes: Vec<u8>) -> CryptoResult<Self> {
        let mut buf = Self::new(bytes.len())?;
        buf.as_mut_slice().copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(buf)
    }

    /// Copy the given slice into a fresh secure buffer. Prefer
    /// [`SecureBuffer::from_vec`] when the caller owns the bytes.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let mut buf = Self::new(bytes.len())?;
        buf.as_mut_slice().copy_from_slice(bytes);
        Ok(buf)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the pages backing this buffer are locked against swap.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Explicit duplication into a new locked allocation.
    pub fn try_clone(&self) -> CryptoResult<Self> {
        Self::from_slice(self.as_slice())
    }

    /// Constant-time equality against arbitrary bytes.
    pub fn ct_eq(&self, other: &[u8]) -> bool {
        if self.len != other.len() {
            return false;
        }
        self.as_slice().ct_eq(other).into()
    }
}

impl Drop for SecureBuffer {
    fn drop(&mut self) {
        unsafe {
            // Zeroize goes through a volatile write so the wipe cannot be
            // elided as a dead store.
            let slice = std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len);
            slice.zeroize();

            if self.locked {
                unlock_pages(self.ptr.as_ptr(), self.len);
            }
            dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

// The buffer exclusively owns its allocation.
unsafe impl Send for SecureBuffer {}
unsafe impl Sync for SecureBuffer {}

impl std::fmt::Debug for SecureBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureBuffer")
            .field("len", &self.len)
            .field("locked", &self.locked)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}
