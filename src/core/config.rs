//! Tunables for folding and lowering decisions.
//!
//! None of these values change the result of an operation, only how much compile
//! time is spent to get it and which code path the backend receives.

/// Default byte budget for evaluating array intrinsics at compile time.
pub const DEFAULT_MAX_CONSTANT_FOLD_BYTES: usize = 4096;

/// Default region size (in bytes) under which array equality is emitted inline.
pub const DEFAULT_MAX_INLINE_BYTES: usize = 64;

/// Per-compilation configuration of the intrinsic layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntrinsicsConfig {
    /// Upper bound on the bytes a single constant evaluation may touch.
    pub max_constant_fold_bytes: usize,
    /// Upper bound on the bytes an inline array comparison may cover.
    pub max_inline_bytes: usize,
    /// Whether full constant evaluation is attempted at all. Algebraic
    /// simplifications and identity shortcuts run regardless.
    pub enable_folding: bool,
}

impl IntrinsicsConfig {
    pub fn new() -> Self {
        Self {
            max_constant_fold_bytes: DEFAULT_MAX_CONSTANT_FOLD_BYTES,
            max_inline_bytes: DEFAULT_MAX_INLINE_BYTES,
            enable_folding: true,
        }
    }

    pub fn with_max_constant_fold_bytes(mut self, bytes: usize) -> Self {
        self.max_constant_fold_bytes = bytes;
        self
    }

    pub fn with_max_inline_bytes(mut self, bytes: usize) -> Self {
        self.max_inline_bytes = bytes;
        self
    }

    pub fn with_folding(mut self, enable: bool) -> Self {
        self.enable_folding = enable;
        self
    }

    /// Whether evaluating `bytes` bytes of constant data is within budget.
    pub fn allows_fold_of(&self, bytes: usize) -> bool {
        self.enable_folding && bytes <= self.max_constant_fold_bytes
    }
}

impl Default for IntrinsicsConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_inclusive() {
        let config = IntrinsicsConfig::new().with_max_constant_fold_bytes(16);
        assert!(config.allows_fold_of(16));
        assert!(!config.allows_fold_of(17));
    }

    #[test]
    fn disabled_folding_rejects_everything() {
        let config = IntrinsicsConfig::new().with_folding(false);
        assert!(!config.allows_fold_of(0));
    }
}
