//! Viewer for spilled gadget output, registered implicitly by the agent

use crate::gadget::{Gadget, GadgetContext, GadgetExample, GadgetOutcome};
use crate::schema::{ParamField, ParamSchema, ParamType};
use gadgeteer_core::OutputStore;
use serde_json::{json, Value};
use std::sync::Arc;

pub const OUTPUT_VIEWER_NAME: &str = "GadgetOutputViewer";

/// Retrieves the full content of a gadget output that exceeded the character
/// budget and was parked in the spillover store.
pub struct OutputViewerGadget {
    store: Arc<OutputStore>,
}

impl OutputViewerGadget {
    pub fn new(store: Arc<OutputStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Gadget for OutputViewerGadget {
    fn name(&self) -> &str {
        OUTPUT_VIEWER_NAME
    }

    fn description(&self) -> &str {
        "Retrieve the full output of a gadget call that returned too much \
         data and was stored under a short id."
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new().field(
            ParamField::required("id", ParamType::String)
                .describe("the stored-output id from the truncation notice"),
        )
    }

    fn examples(&self) -> Vec<GadgetExample> {
        vec![GadgetExample::new(json!({"id": "a1b2c3d4"}))]
    }

    async fn execute(&self, params: Value, _ctx: &GadgetContext) -> GadgetOutcome {
        let Some(id) = params["id"].as_str() else {
            return GadgetOutcome::error("'id' must be a string");
        };
        match self.store.get(id) {
            Some(entry) => GadgetOutcome::Text(entry.content),
            None => GadgetOutcome::error(format!("no stored output with id '{}'", id)),
        }
    }
}
