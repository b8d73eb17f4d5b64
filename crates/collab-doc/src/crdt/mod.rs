//! Replicated document model: element types and the document root.
//!
//! This module provides:
//! - The element types ([`nodes`]), including the split-node RGA behind text
//! - The [`DocumentRoot`] that owns every element ([`root`])

pub mod nodes;
pub mod root;

pub use nodes::{CrdtElement, ElementValue};
pub use root::DocumentRoot;
