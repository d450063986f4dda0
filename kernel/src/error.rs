//! Kernel-wide error kinds. Internal functions return `Result<T, KernelError>`;
//! the syscall boundary flattens errors to a negative `i32` in EAX, so a user
//! program can classify any return value by its sign bit.

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KernelError {
    // Disk read or write failed
    Io,

    // Bad path, bad descriptor, bad mode, malformed ELF
    InvalidArg,

    // Write attempted against a read-only filesystem
    ReadOnly,

    // Path did not resolve
    NotFound,

    // Kernel heap exhausted or a fixed table is full
    NoMem,

    // Descriptor table full, no free task or process slot
    Busy,

    // Syscall or filesystem feature not implemented
    Unsupported,

    // Disk does not carry the filesystem that probed it
    NotOurs,
}

impl KernelError {
    pub fn code(self) -> i32 {
        match self {
            KernelError::Io => -1,
            KernelError::InvalidArg => -2,
            KernelError::ReadOnly => -3,
            KernelError::NotFound => -4,
            KernelError::NoMem => -5,
            KernelError::Busy => -6,
            KernelError::Unsupported => -7,
            KernelError::NotOurs => -8,
        }
    }
}

/// A raw status value with the sign bit set is an error.
pub fn is_err(code: i32) -> bool {
    code < 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_negative_and_distinct() {
        let all = [
            KernelError::Io,
            KernelError::InvalidArg,
            KernelError::ReadOnly,
            KernelError::NotFound,
            KernelError::NoMem,
            KernelError::Busy,
            KernelError::Unsupported,
            KernelError::NotOurs,
        ];
        for (i, a) in all.iter().enumerate() {
            assert!(is_err(a.code()));
            for b in &all[i + 1..] {
                assert_ne!(a.code(), b.code());
            }
        }
        assert!(!is_err(0));
        assert!(!is_err(42));
    }
}
