//! # domoxide
//!
//! A standalone XML 1.0/1.1 DOM engine: a recursive-descent parser with
//! DTD and entity handling, an arena-backed document tree, a configurable
//! normalizer, and a mirror-image serializer. Processing behavior is
//! driven by named configuration parameters, and every recoverable
//! condition funnels through one error handler hook.
//!
//! ## Quick Start
//!
//! ```
//! use domoxide::Document;
//!
//! let doc = Document::parse_str("<root><child>Hello</child></root>").unwrap();
//! let root = doc.root_element().unwrap();
//! assert_eq!(doc.node_name(root), Some("root"));
//! ```

pub mod config;
pub mod encoding;
pub mod error;
pub mod normalize;
pub mod parser;
pub mod serial;
pub mod tree;

// Re-export primary types at the crate root for convenience.
pub use config::DomConfig;
pub use tree::{Document, NodeId, NodeKind};
