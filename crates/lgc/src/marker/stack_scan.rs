//! Stack Scanning - Conservative Roots from the Machine Stack
//!
//! Host code keeps `Value`s in locals and registers the collector cannot
//! enumerate. Every word between the current stack pointer and the stack
//! base is therefore treated as a candidate pointer and checked against the
//! heap registry by the caller.
//!
//! Scan Process:
//! ```text
//! high addr  ┌──────────────────┐ ◄── stack base (pthread / OS query)
//!            │  host frames     │
//!            │  ...             │     every word: read_volatile,
//!            │  scan() frame    │     handed to `visit`
//!            │  register spill  │ ◄── scan start
//! low addr   └──────────────────┘
//! ```
//!
//! Callee-saved registers are spilled into the scanning frame first, so a
//! value that only lives in a register is still seen.

/// Refuse to walk anything larger than this
const MAX_STACK_SCAN: usize = 256 * 1024 * 1024;

#[cfg(target_arch = "x86_64")]
const SPILLED_REGISTERS: usize = 6;

#[cfg(target_arch = "aarch64")]
const SPILLED_REGISTERS: usize = 11;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
const SPILLED_REGISTERS: usize = 0;

/// Copy of the callee-saved registers at the point of the scan
#[repr(C)]
struct RegisterSnapshot {
    regs: [usize; SPILLED_REGISTERS],
}

impl RegisterSnapshot {
    /// Spill rbx, rbp, r12-r15
    #[cfg(target_arch = "x86_64")]
    #[inline(always)]
    fn capture() -> Self {
        let mut regs = [0usize; SPILLED_REGISTERS];
        unsafe {
            std::arch::asm!(
                "mov [{0}], rbx",
                "mov [{0} + 8], rbp",
                "mov [{0} + 16], r12",
                "mov [{0} + 24], r13",
                "mov [{0} + 32], r14",
                "mov [{0} + 40], r15",
                in(reg) regs.as_mut_ptr(),
                options(nostack, preserves_flags)
            );
        }
        Self { regs }
    }

    /// Spill x19-x29
    #[cfg(target_arch = "aarch64")]
    #[inline(always)]
    fn capture() -> Self {
        let mut regs = [0usize; SPILLED_REGISTERS];
        unsafe {
            std::arch::asm!(
                "stp x19, x20, [{0}]",
                "stp x21, x22, [{0}, #16]",
                "stp x23, x24, [{0}, #32]",
                "stp x25, x26, [{0}, #48]",
                "stp x27, x28, [{0}, #64]",
                "str x29, [{0}, #80]",
                in(reg) regs.as_mut_ptr(),
                options(nostack, preserves_flags)
            );
        }
        Self { regs }
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    #[inline(always)]
    fn capture() -> Self {
        Self { regs: [] }
    }
}

/// Base (highest address) of the calling thread's stack
#[cfg(target_os = "linux")]
pub fn current_stack_base() -> Option<usize> {
    unsafe {
        let mut attr: libc::pthread_attr_t = std::mem::zeroed();
        if libc::pthread_getattr_np(libc::pthread_self(), &mut attr) != 0 {
            return None;
        }
        let mut addr: *mut libc::c_void = std::ptr::null_mut();
        let mut size: libc::size_t = 0;
        let rc = libc::pthread_attr_getstack(&attr, &mut addr, &mut size);
        libc::pthread_attr_destroy(&mut attr);
        if rc != 0 || addr.is_null() {
            return None;
        }
        Some(addr as usize + size)
    }
}

/// Base (highest address) of the calling thread's stack
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub fn current_stack_base() -> Option<usize> {
    let top = unsafe { libc::pthread_get_stackaddr_np(libc::pthread_self()) };
    (!top.is_null()).then_some(top as usize)
}

/// Base (highest address) of the calling thread's stack
#[cfg(windows)]
pub fn current_stack_base() -> Option<usize> {
    let mut low = 0usize;
    let mut high = 0usize;
    unsafe {
        windows_sys::Win32::System::Threading::GetCurrentThreadStackLimits(&mut low, &mut high)
    };
    (high != 0).then_some(high)
}

/// Base (highest address) of the calling thread's stack
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios", windows)))]
pub fn current_stack_base() -> Option<usize> {
    None
}

/// Conservative scanner for one thread's stack
#[derive(Debug, Clone, Copy)]
pub struct StackScanner {
    base: Option<usize>,
}

impl StackScanner {
    /// Scanner for the calling thread
    pub fn for_current_thread() -> Self {
        let base = current_stack_base();
        if base.is_none() {
            log::warn!("stack base unknown; conservative stack scan disabled until one is set");
        }
        Self { base }
    }

    /// Scanner with an explicitly supplied base
    pub fn with_base(base: usize) -> Self {
        Self { base: Some(base) }
    }

    pub fn base(&self) -> Option<usize> {
        self.base
    }

    /// Visit every word from this frame up to the stack base
    ///
    /// Returns the number of words visited. Must run on the thread the
    /// scanner was made for.
    #[inline(never)]
    pub fn scan(&self, visit: &mut dyn FnMut(usize)) -> usize {
        let snapshot = RegisterSnapshot::capture();
        let snapshot = std::hint::black_box(&snapshot);

        for &reg in &snapshot.regs {
            visit(reg);
        }

        let Some(high) = self.base else {
            return snapshot.regs.len();
        };
        let low = snapshot as *const RegisterSnapshot as usize;
        if low >= high || high - low > MAX_STACK_SCAN {
            log::warn!(
                "stack range {:#x}..{:#x} is not scannable from this frame",
                low,
                high
            );
            return snapshot.regs.len();
        }

        scan_range(low, high, visit) + snapshot.regs.len()
    }
}

/// Visit every aligned word in `[start, end)`
///
/// Returns the number of words visited.
pub fn scan_range(start: usize, end: usize, visit: &mut dyn FnMut(usize)) -> usize {
    let word = std::mem::size_of::<usize>();
    let mut addr = (start + word - 1) & !(word - 1);
    let mut count = 0;
    while addr + word <= end {
        let value = unsafe { (addr as *const usize).read_volatile() };
        visit(value);
        count += 1;
        addr += word;
    }
    count
}
