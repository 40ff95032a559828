//! Configuration options for a [`Database`](crate::Database).

use std::sync::Arc;

use alderdb_core::view::ViewCompiler;

/// Configuration a database is constructed with.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    /// Compiles map/reduce functions from design-document source code. The
    /// engine keeps no global compiler; registering views from source
    /// without one configured fails with `BadRequest`.
    pub view_compiler: Option<Arc<dyn ViewCompiler>>,
}

impl Configuration {
    /// Sets the view compiler.
    #[must_use]
    pub fn with_view_compiler(mut self, compiler: Arc<dyn ViewCompiler>) -> Self {
        self.view_compiler = Some(compiler);
        self
    }
}
