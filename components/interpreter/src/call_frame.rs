//! Call frame for `CALL` / `RET`

/// Return record pushed by `CALL`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrame {
    /// Offset of the instruction after the `CALL`
    pub return_address: usize,
}

impl CallFrame {
    /// Create a new call frame
    pub fn new(return_address: usize) -> Self {
        Self { return_address }
    }
}
