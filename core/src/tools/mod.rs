pub mod context;
pub mod handlers;
pub mod parallel;
pub mod registry;
pub mod router;
pub mod spec;
pub mod validation;

use std::sync::Arc;

use crate::tools::handlers::ToolHandler;

pub use parallel::ToolCallRuntime;
pub use registry::{RegistryError, RegistrySnapshot, ToolRegistry};
pub use router::{Executable, ToolRouter};
pub use spec::{ToolDescriptor, ToolSource};

/// Register the builtin handlers' descriptors.
pub fn register_builtins(
  registry: &ToolRegistry,
  handlers: &[Arc<dyn ToolHandler>],
) -> Result<(), RegistryError> {
  for handler in handlers {
    registry.register(handler.descriptor())?;
  }
  Ok(())
}
