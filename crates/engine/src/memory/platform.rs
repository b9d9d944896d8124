//! Platform capability C3 consumes: anonymous private mappings that can be
//! allocated read+write and later flipped to read+execute (§4.3).

use std::ptr::NonNull;

#[cfg(unix)]
pub fn allocate(size: usize) -> Option<NonNull<u8>> {
    let mem = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_ANON | libc::MAP_PRIVATE,
            -1,
            0,
        )
    };
    if mem == libc::MAP_FAILED {
        None
    } else {
        NonNull::new(mem as *mut u8)
    }
}

#[cfg(unix)]
pub fn deallocate(start: *mut u8, size: usize) {
    unsafe {
        libc::munmap(start as *mut libc::c_void, size);
    }
}

#[cfg(unix)]
pub fn make_executable(start: *mut u8, size: usize) -> Result<(), super::MemoryError> {
    let result = unsafe { libc::mprotect(start as *mut libc::c_void, size, libc::PROT_READ | libc::PROT_EXEC) };
    if result == 0 {
        Ok(())
    } else {
        Err(super::MemoryError::MakeExecutable)
    }
}

#[cfg(unix)]
pub fn with_temporary_write_access(start: *mut u8, size: usize, patch: impl FnOnce()) {
    unsafe {
        libc::mprotect(start as *mut libc::c_void, size, libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC);
    }
    patch();
    unsafe {
        libc::mprotect(start as *mut libc::c_void, size, libc::PROT_READ | libc::PROT_EXEC);
    }
}

#[cfg(not(unix))]
compile_error!("the executable-memory manager currently only implements the POSIX mmap/mprotect path");
