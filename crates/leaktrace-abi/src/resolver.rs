//! Lazy lookup of the next definitions of the allocator primitives.
//!
//! The first thread to need the table claims it with a compare-and-swap and
//! looks every symbol up with `dlsym(RTLD_NEXT, ..)`. `dlsym` may itself call
//! `malloc`/`calloc`; while the claiming thread is inside the lookup those
//! requests report "no table" and the shim serves them from the bootstrap
//! arena. Any other thread arriving meanwhile blocks on a semaphore that is
//! posted once the table is published. Each waiter re-posts after waking so
//! every later waiter also gets through.

use std::cell::{Cell, UnsafeCell};
use std::ffi::{CStr, c_int, c_void};
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use leaktrace_runtime::log::{self, LogEntry, LogLevel};
use leaktrace_runtime::reentry;

use crate::util::fatal;

pub type MallocFn = unsafe extern "C" fn(usize) -> *mut c_void;
pub type CallocFn = unsafe extern "C" fn(usize, usize) -> *mut c_void;
pub type ReallocFn = unsafe extern "C" fn(*mut c_void, usize) -> *mut c_void;
pub type FreeFn = unsafe extern "C" fn(*mut c_void);
pub type MemalignFn = unsafe extern "C" fn(usize, usize) -> *mut c_void;
pub type PosixMemalignFn = unsafe extern "C" fn(*mut *mut c_void, usize, usize) -> c_int;

/// Addresses of the real allocator primitives.
#[derive(Clone, Copy)]
pub struct RealFns {
    pub malloc: MallocFn,
    pub calloc: CallocFn,
    pub realloc: ReallocFn,
    pub free: FreeFn,
    pub memalign: MemalignFn,
    pub aligned_alloc: MemalignFn,
    pub posix_memalign: PosixMemalignFn,
    /// Emulated with `memalign` when absent.
    pub valloc: Option<MallocFn>,
    /// Emulated with `memalign` when absent.
    pub pvalloc: Option<MallocFn>,
    /// Modern glibc no longer exports `cfree`; `free` is used instead.
    pub cfree: Option<FreeFn>,
    pub page_size: usize,
}

const UNRESOLVED: u8 = 0;
const RESOLVING: u8 = 1;
const RESOLVED: u8 = 2;

static STATE: AtomicU8 = AtomicU8::new(UNRESOLVED);
// Set once the semaphore is initialized; waiters spin until then.
static SEM_READY: AtomicBool = AtomicBool::new(false);

struct Published {
    table: UnsafeCell<MaybeUninit<RealFns>>,
    sem: UnsafeCell<MaybeUninit<libc::sem_t>>,
}

// SAFETY: `table` is written once by the claiming thread before the Release
// store of RESOLVED and only read after an Acquire load observes it. `sem`
// is initialized once before SEM_READY and then only used through sem_*.
unsafe impl Sync for Published {}

static PUBLISHED: Published = Published {
    table: UnsafeCell::new(MaybeUninit::uninit()),
    sem: UnsafeCell::new(MaybeUninit::uninit()),
};

thread_local! {
    static RESOLVING_HERE: Cell<bool> = const { Cell::new(false) };
}

/// The real primitives, resolving them on first use.
///
/// Returns `None` only on the thread currently inside `dlsym`; that caller
/// must serve the request from the bootstrap arena.
#[inline]
pub fn real() -> Option<&'static RealFns> {
    if STATE.load(Ordering::Acquire) == RESOLVED {
        // SAFETY: RESOLVED is stored only after the table is written.
        return Some(unsafe { published_table() });
    }
    real_slow()
}

/// Whether the table has been published.
#[inline]
pub fn is_resolved() -> bool {
    STATE.load(Ordering::Acquire) == RESOLVED
}

#[cold]
fn real_slow() -> Option<&'static RealFns> {
    if RESOLVING_HERE.try_with(Cell::get).unwrap_or(false) {
        return None;
    }
    match STATE.compare_exchange(UNRESOLVED, RESOLVING, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => resolve_and_publish(),
        Err(RESOLVED) => {}
        Err(_) => wait_for_table(),
    }
    // SAFETY: every branch above returns only once RESOLVED is visible.
    Some(unsafe { published_table() })
}

unsafe fn published_table() -> &'static RealFns {
    // SAFETY: caller observed RESOLVED with Acquire ordering.
    unsafe { (*PUBLISHED.table.get()).assume_init_ref() }
}

fn sem_ptr() -> *mut libc::sem_t {
    PUBLISHED.sem.get().cast()
}

fn resolve_and_publish() {
    // SAFETY: only the thread that won the CAS gets here, exactly once.
    if unsafe { libc::sem_init(sem_ptr(), 0, 0) } != 0 {
        fatal(&[b"cannot initialize resolver semaphore"]);
    }
    SEM_READY.store(true, Ordering::Release);

    let _ = RESOLVING_HERE.try_with(|flag| flag.set(true));
    let table = lookup_all();
    let _ = RESOLVING_HERE.try_with(|flag| flag.set(false));

    // SAFETY: no reader touches the table before RESOLVED is stored below.
    unsafe { (*PUBLISHED.table.get()).write(table) };
    STATE.store(RESOLVED, Ordering::Release);
    // SAFETY: initialized above.
    unsafe { libc::sem_post(sem_ptr()) };

    let _guard = reentry::enter();
    if log::enabled(LogLevel::Debug) {
        log::log(LogEntry::new(LogLevel::Debug, "resolver_ready"));
    }
}

fn wait_for_table() {
    while !SEM_READY.load(Ordering::Acquire) {
        if STATE.load(Ordering::Acquire) == RESOLVED {
            return;
        }
        std::hint::spin_loop();
    }
    while STATE.load(Ordering::Acquire) != RESOLVED {
        // SAFETY: SEM_READY guarantees the semaphore is initialized.
        if unsafe { libc::sem_wait(sem_ptr()) } == 0 {
            // SAFETY: as above.
            unsafe { libc::sem_post(sem_ptr()) };
        }
    }
}

fn lookup_all() -> RealFns {
    // SAFETY: each name is looked up with the prototype of the C function of
    // that name.
    unsafe {
        RealFns {
            malloc: required(c"malloc"),
            calloc: required(c"calloc"),
            realloc: required(c"realloc"),
            free: required(c"free"),
            memalign: required(c"memalign"),
            aligned_alloc: required(c"aligned_alloc"),
            posix_memalign: required(c"posix_memalign"),
            valloc: optional(c"valloc"),
            pvalloc: optional(c"pvalloc"),
            cfree: optional(c"cfree"),
            page_size: page_size(),
        }
    }
}

fn next_symbol(name: &CStr) -> *mut c_void {
    // SAFETY: `name` is NUL-terminated; RTLD_NEXT is a valid pseudo-handle.
    unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr()) }
}

/// # Safety
///
/// `F` must be a function pointer type matching the symbol's prototype.
unsafe fn required<F: Copy>(name: &CStr) -> F {
    match unsafe { optional(name) } {
        Some(f) => f,
        None => fatal(&[b"cannot resolve required symbol ", name.to_bytes()]),
    }
}

/// # Safety
///
/// `F` must be a function pointer type matching the symbol's prototype.
unsafe fn optional<F: Copy>(name: &CStr) -> Option<F> {
    debug_assert_eq!(size_of::<F>(), size_of::<*mut c_void>());
    let ptr = next_symbol(name);
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null symbol address reinterpreted as the caller's fn type.
    Some(unsafe { std::mem::transmute_copy::<*mut c_void, F>(&ptr) })
}

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    match usize::try_from(raw) {
        Ok(size) if size.is_power_of_two() => size,
        _ => 4096,
    }
}
