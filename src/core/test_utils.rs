//! Test utilities for arena-based testing.
//!
//! Every test gets its own arena, mirroring how an embedding runtime hands one
//! bounded arena to each compilation.

#[cfg(test)]
pub mod test {
    use super::super::config::IntrinsicsConfig;
    use super::super::session::CompilationSession;
    use bumpalo::Bump;

    /// Owns the arena for the duration of one test.
    pub struct TestContext {
        arena: Bump,
    }

    impl TestContext {
        pub fn new() -> Self {
            Self { arena: Bump::new() }
        }

        /// The returned session borrows from the context, so the context must
        /// outlive it.
        pub fn create_session(&self) -> CompilationSession<'_> {
            CompilationSession::new(&self.arena)
        }

        pub fn create_session_with(&self, config: IntrinsicsConfig) -> CompilationSession<'_> {
            CompilationSession::with_config(&self.arena, config)
        }

        /// Bytes handed out by the arena so far.
        pub fn memory_used(&self) -> usize {
            self.arena.allocated_bytes()
        }
    }

    impl Default for TestContext {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Run a test with a temporary arena context.
    pub fn with_test_context<F, R>(f: F) -> R
    where
        F: FnOnce(&TestContext) -> R,
    {
        let ctx = TestContext::new();
        f(&ctx)
    }

    #[test]
    fn arrays_are_allocated_in_the_arena() {
        with_test_context(|ctx| {
            let before = ctx.memory_used();
            let session = ctx.create_session();
            session
                .alloc_array(crate::core::element::ElementKind::Int, &[0; 4096], true)
                .unwrap();
            assert!(ctx.memory_used() >= before + 4096);
        });
    }
}
