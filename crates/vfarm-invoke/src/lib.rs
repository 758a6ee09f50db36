//! Streaming invocation client for the worker substrate.
//!
//! Calls a named remote function once with a JSON payload, demultiplexes the
//! live chunked response into streaming protocol frames versus the final
//! JSON return value, and resolves to a typed success or a typed error.

mod client;
mod error;
mod invoker;

pub use client::{call_function, InvokeOptions};
pub use error::{InvokeError, InvokeResult};
pub use invoker::{FragmentStream, FunctionInvoker, HttpInvoker};
