//! Local objects: interface tables, exported instances and the path tree
//! method calls are dispatched through.

mod context;
pub(crate) mod exported;
mod interface;
pub(crate) mod tree;

pub use context::CallContext;
pub use exported::Object;
pub use interface::{Interface, MethodResult, Outputs, ReturnValue};
