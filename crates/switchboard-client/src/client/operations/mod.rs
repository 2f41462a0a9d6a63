//! Client-initiated operations.
//!
//! - `tools`: list and call tools, with argument coercion and deadlines
//! - `resources`: list resources and templates, read by URI
//! - `prompts`: list and render prompts
//!
//! Every operation resolves its target through the aggregator, so callers
//! use exposed names and URIs; the `*_raw` listings show one server's
//! unmodified view.

pub mod prompts;
pub mod resources;
pub mod tools;
