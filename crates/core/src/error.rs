//! Stack Allocation Errors
//!
//! The only recoverable failure at this layer is failing to obtain stack
//! memory from the operating system. Striking a guard page is a hardware
//! fault and never surfaces here.

/// Failure to obtain or protect the pages backing a stack arena
#[derive(Debug)]
pub enum AllocError {
    /// Requested size overflows once rounded to pages and padded with a guard
    Overflow { requested: usize },
    /// The OS refused to map the region (out of memory or address space)
    Map { len: usize, source: std::io::Error },
    /// The region was mapped but the guard page could not be protected
    Protect { source: std::io::Error },
}

impl std::fmt::Display for AllocError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocError::Overflow { requested } => {
                write!(f, "stack size {} overflows the address space", requested)
            }
            AllocError::Map { len, source } => {
                write!(f, "failed to map {} bytes of stack: {}", len, source)
            }
            AllocError::Protect { source } => {
                write!(f, "failed to protect stack guard page: {}", source)
            }
        }
    }
}

impl std::error::Error for AllocError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AllocError::Overflow { .. } => None,
            AllocError::Map { source, .. } | AllocError::Protect { source } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_display_messages() {
        let err = AllocError::Overflow { requested: 12 };
        assert_eq!(err.to_string(), "stack size 12 overflows the address space");

        let err = AllocError::Map {
            len: 8192,
            source: std::io::Error::from_raw_os_error(libc::ENOMEM),
        };
        assert!(err.to_string().starts_with("failed to map 8192 bytes of stack"));
        assert!(err.source().is_some());
    }
}
