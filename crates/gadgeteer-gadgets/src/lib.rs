//! Gadget protocol surface for gadgeteer: the Gadget trait and registry,
//! typed parameter schemas, marker framing, catalog rendering, and the
//! incremental parser that lifts gadget calls out of the model's stream.

pub mod block;
pub mod builtin;
pub mod catalog;
pub mod gadget;
pub mod markers;
pub mod parser;
pub mod registry;
pub mod schema;

pub use builtin::{OutputViewerGadget, OUTPUT_VIEWER_NAME};
pub use catalog::{render_catalog, render_gadgets};
pub use gadget::{Gadget, GadgetContext, GadgetExample, GadgetOutcome, SubagentSink};
pub use markers::{Markers, DEFAULT_END_MARKER, DEFAULT_START_MARKER};
pub use parser::{ParserEvent, StreamParser};
pub use registry::GadgetRegistry;
pub use schema::{ParamField, ParamSchema, ParamType, ValidationError};
