//! Page views and the node tree they render into.

pub mod layout;
pub mod node;
mod page;

pub use layout::{AverageAdvance, TextMeasurer};
pub use node::{Node, Style, Tag};
pub use page::*;
