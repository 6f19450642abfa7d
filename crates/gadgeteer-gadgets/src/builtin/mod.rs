//! Builtin gadgets shipped with the runtime

pub mod output_viewer;

pub use output_viewer::{OutputViewerGadget, OUTPUT_VIEWER_NAME};
