use std::ptr;

use oryx_core::runtime::HeapReclaimer;
use oryx_error::{generic_error, ErrorContext as _, GenericError};
use tikv_jemalloc_ctl::{epoch, stats};
use tracing::debug;

/// Purges the dirty pages of every jemalloc arena back to the OS.
pub struct JemallocReclaimer;

impl JemallocReclaimer {
    fn usage() -> Result<(usize, usize), GenericError> {
        epoch::advance().error_context("Failed to refresh allocator statistics.")?;
        let allocated = stats::allocated::read().error_context("Failed to read allocated bytes.")?;
        let resident = stats::resident::read().error_context("Failed to read resident bytes.")?;
        Ok((allocated, resident))
    }
}

impl HeapReclaimer for JemallocReclaimer {
    fn name(&self) -> &str {
        "jemalloc"
    }

    fn reclaim(&self) -> Result<(), GenericError> {
        let (allocated_before, resident_before) = Self::usage()?;

        // `MALLCTL_ARENAS_ALL` (4096) addresses every arena at once.
        // SAFETY: `arena.<i>.purge` takes no input and produces no output, so every pointer is null.
        let rc = unsafe {
            tikv_jemalloc_sys::mallctl(
                c"arena.4096.purge".as_ptr(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
                0,
            )
        };
        if rc != 0 {
            return Err(generic_error!("Failed to purge allocator arenas (error code {}).", rc));
        }

        let (allocated_after, resident_after) = Self::usage()?;
        debug!(allocated_before, resident_before, allocated_after, resident_after, "Purged allocator arenas.");
        Ok(())
    }
}
