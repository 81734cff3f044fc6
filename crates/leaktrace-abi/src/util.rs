//! Shared internal utilities for ABI adapters.

use std::ffi::{c_char, c_uint};

use leaktrace_core::SiteLabel;

/// Longest label text taken from a caller's C string.
pub const MAX_LABEL_LEN: usize = 4096;

/// Scan a C string with an optional hard bound.
///
/// Returns `(len, terminated)` where:
/// - `len` is the byte length before the first NUL or before the bound.
/// - `terminated` indicates whether a NUL byte was observed.
///
/// # Safety
///
/// `ptr` must be valid to read up to the discovered length (and bound when given).
pub unsafe fn scan_c_string(ptr: *const c_char, bound: Option<usize>) -> (usize, bool) {
    match bound {
        Some(limit) => {
            for i in 0..limit {
                if unsafe { *ptr.add(i) } == 0 {
                    return (i, true);
                }
            }
            (limit, false)
        }
        None => {
            let mut i = 0usize;
            while unsafe { *ptr.add(i) } != 0 {
                i += 1;
            }
            (i, true)
        }
    }
}

/// Owned text of a label argument. Null becomes `(null)`; text past
/// [`MAX_LABEL_LEN`] is cut off.
///
/// # Safety
///
/// `ptr` must be null or point to a readable C string.
pub unsafe fn label_text(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::from("(null)");
    }
    // SAFETY: caller guarantees a readable C string.
    let (len, _) = unsafe { scan_c_string(ptr, Some(MAX_LABEL_LEN)) };
    // SAFETY: `len` bytes were just read successfully.
    let bytes = unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len) };
    String::from_utf8_lossy(bytes).into_owned()
}

/// Build a [`SiteLabel`] from C caller arguments.
///
/// # Safety
///
/// `file` and `function` must each be null or a readable C string.
pub unsafe fn site_label(file: *const c_char, function: *const c_char, line: c_uint) -> SiteLabel {
    // SAFETY: forwarded caller contract.
    let (file, function) = unsafe { (label_text(file), label_text(function)) };
    SiteLabel::new(file, function, line)
}

/// Write `bytes` to stderr with raw `write(2)` calls. Never allocates.
pub fn write_stderr(bytes: &[u8]) {
    let mut rest = bytes;
    while !rest.is_empty() {
        // SAFETY: `rest` is a live slice for the duration of the call.
        let n = unsafe { libc::write(libc::STDERR_FILENO, rest.as_ptr().cast(), rest.len()) };
        if n > 0 {
            rest = &rest[n as usize..];
        } else if n < 0 && std::io::Error::last_os_error().kind() == std::io::ErrorKind::Interrupted
        {
            continue;
        } else {
            break;
        }
    }
}

/// Print `leaktrace: <parts>` on stderr and terminate with status 1.
///
/// Used where no allocator can be trusted, so nothing here allocates and no
/// exit handlers run.
pub fn fatal(parts: &[&[u8]]) -> ! {
    write_stderr(b"leaktrace: ");
    for part in parts {
        write_stderr(part);
    }
    write_stderr(b"\n");
    // SAFETY: `_exit` never returns and skips atexit handlers.
    unsafe { libc::_exit(1) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_scan_stops_at_bound() {
        let s = b"abcdef";
        let (len, terminated) = unsafe { scan_c_string(s.as_ptr().cast(), Some(4)) };
        assert_eq!((len, terminated), (4, false));
        let s = c"abc";
        let (len, terminated) = unsafe { scan_c_string(s.as_ptr(), None) };
        assert_eq!((len, terminated), (3, true));
    }

    #[test]
    fn null_label_prints_null() {
        assert_eq!(unsafe { label_text(std::ptr::null()) }, "(null)");
    }

    #[test]
    fn long_labels_are_truncated() {
        let mut text = vec![b'x'; MAX_LABEL_LEN + 10];
        text.push(0);
        let label = unsafe { label_text(text.as_ptr().cast()) };
        assert_eq!(label.len(), MAX_LABEL_LEN);
    }

    #[test]
    fn site_label_from_c_arguments() {
        let label = unsafe { site_label(c"main.c".as_ptr(), c"main".as_ptr(), 42) };
        assert_eq!(label.to_string(), "[main.c main 42]");
        let label = unsafe { site_label(std::ptr::null(), c"run".as_ptr(), 0) };
        assert_eq!(label.file, "(null)");
    }
}
