//! Platform-specific durable sync
//!
//! Segment data and the directory block are only considered written once the
//! strongest flush the platform offers has returned.

use std::fs::File;
use std::io;
use std::path::Path;

/// Flush `file` to persistent media before returning.
///
/// - Linux: `fdatasync()`
/// - macOS/iOS: `fcntl(F_FULLFSYNC)`; plain fsync stops at the drive cache there
/// - Windows: `FlushFileBuffers()`
/// - Other: `File::sync_data()`
///
/// May block for a long time under heavy I/O. Do not call while holding a
/// lock that mutator threads need.
pub fn durable_sync(file: &File) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor comes from a live File and stays open for the call.
        let result = unsafe { libc::fdatasync(file.as_raw_fd()) };
        if result == 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor comes from a live File and stays open for the call.
        let result = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_FULLFSYNC) };
        if result == 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
    }

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::io::AsRawHandle;
        use winapi::um::fileapi::FlushFileBuffers;
        // SAFETY: the handle comes from a live File and stays open for the call.
        let result = unsafe { FlushFileBuffers(file.as_raw_handle() as *mut _) };
        if result != 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios", target_os = "windows")))]
    {
        file.sync_data()
    }
}

/// Persist directory metadata (new names, renames, unlinks) for `dir`.
///
/// Windows cannot open a directory as a file; NTFS journals renames itself,
/// so this is a no-op there.
pub fn sync_directory(dir: &Path) -> io::Result<()> {
    #[cfg(not(target_os = "windows"))]
    {
        let handle = File::open(dir)?;
        handle.sync_all()
    }

    #[cfg(target_os = "windows")]
    {
        let _ = dir;
        Ok(())
    }
}
