//! Executable code pages.
//!
//! A page is mapped read/write, filled with emitted code, then flipped to
//! read/execute. Pages are never written again after the flip; dropping the
//! page unmaps it.

use std::ptr;

use super::RawVal;

#[derive(Debug)]
pub struct CodePage {
    ptr: *mut u8,
    len: usize,
}

impl CodePage {
    /// Maps a fresh page, copies `code` into it, and makes it executable.
    pub fn new(code: &[u8]) -> Option<Self> {
        if code.is_empty() {
            return None;
        }
        let page_size = 4096usize;
        let len = code.len().div_ceil(page_size) * page_size;
        // SAFETY: anonymous private mapping with no requested address; the
        // kernel picks placement, and failure is reported as MAP_FAILED.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return None;
        }
        let ptr = ptr.cast::<u8>();
        // SAFETY: the mapping above is at least `code.len()` bytes and
        // writable; source and destination cannot overlap.
        unsafe {
            ptr::copy_nonoverlapping(code.as_ptr(), ptr, code.len());
        }
        // SAFETY: transitioning our own fresh mapping from RW to RX; the
        // page is never written after this point.
        let protected = unsafe { libc::mprotect(ptr.cast(), len, libc::PROT_READ | libc::PROT_EXEC) };
        if protected != 0 {
            // SAFETY: unmapping the mapping created above.
            unsafe {
                libc::munmap(ptr.cast(), len);
            }
            return None;
        }
        Some(Self { ptr, len })
    }

    /// Calls the entry point with the argument-record pointer and count.
    pub fn invoke(&self, args: *const RawVal, len: usize) -> RawVal {
        type Entry = unsafe extern "C" fn(*const RawVal, usize) -> RawVal;
        // SAFETY: the page holds a complete function emitted by the
        // compiler for exactly this signature, and stays mapped RX for the
        // lifetime of `self`.
        unsafe {
            let entry: Entry = std::mem::transmute::<*mut u8, Entry>(self.ptr);
            entry(args, len)
        }
    }
}

impl Drop for CodePage {
    fn drop(&mut self) {
        // SAFETY: unmapping the mapping created in `new`; the pointer and
        // length are exactly what mmap returned.
        unsafe {
            libc::munmap(self.ptr.cast(), self.len);
        }
    }
}
