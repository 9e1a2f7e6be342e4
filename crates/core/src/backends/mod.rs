pub mod content;
pub mod layout_tables;
pub mod lopdf_text;

pub use layout_tables::{detect_tables, LayoutTableBackend};
pub use lopdf_text::LopdfTextBackend;
