//! Typed step API.
//!
//! - `Task`: typed task state bound to a stable type name
//! - `Handler<T>`: the step function of a task type
//! - `DynHandler` / `HandlerRegistry`: type-erased lookup by name
//! - `CheckpointCodec`: versioned checkpoint encoding

pub mod codec;
pub mod handler;
pub mod registry;
pub mod task;

pub use self::codec::{CHECKPOINT_VERSION, CheckpointCodec};
pub use self::handler::{DynHandler, Handler, Step, TypedHandler};
pub use self::registry::{HandlerRegistry, RegistryError};
pub use self::task::Task;
