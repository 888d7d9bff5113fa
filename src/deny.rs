/// Fatal denial path shared by every override in the preload library
///
/// Nothing here allocates, locks or unwinds: a denial can be reached from any
/// host thread, from a signal handler, or from a child between fork and exec.
use crate::registry::BlockedOperation;
use std::os::raw::c_int;

/// Write the operation's diagnostic to standard output and terminate the process.
///
/// Termination goes through `_exit`, so atexit handlers, stdio buffers of the
/// host and destructors never run. The call never returns to its caller.
pub fn deny(op: BlockedOperation) -> ! {
    let _ = write_diagnostic(libc::STDOUT_FILENO, op.diagnostic().as_bytes());
    terminate(op.exit_code())
}

/// Write all of `bytes` to `fd` with raw `write(2)` calls.
///
/// Retries on `EINTR` and short writes. Any other failure stops the loop and
/// is returned as the raw errno; the caller decides whether it matters.
pub fn write_diagnostic(fd: c_int, bytes: &[u8]) -> std::result::Result<(), c_int> {
    let mut remaining = bytes;
    while !remaining.is_empty() {
        let written = unsafe {
            libc::write(
                fd,
                remaining.as_ptr() as *const libc::c_void,
                remaining.len(),
            )
        };
        if written < 0 {
            let errno = last_errno();
            if errno == libc::EINTR {
                continue;
            }
            return Err(errno);
        }
        if written == 0 {
            return Err(libc::EIO);
        }
        remaining = &remaining[written as usize..];
    }
    Ok(())
}

/// End the whole process (every thread) with `code`.
fn terminate(code: c_int) -> ! {
    unsafe { libc::_exit(code) }
}

fn last_errno() -> c_int {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
}
