//! Gadget catalog rendering: the system-prompt block that teaches the model
//! the marker protocol and each gadget's schema.

use crate::gadget::Gadget;
use crate::markers::Markers;
use crate::registry::GadgetRegistry;
use std::sync::Arc;

/// Render the catalog block appended to the system prompt.
pub fn render_catalog(registry: &GadgetRegistry, markers: &Markers) -> String {
    render_gadgets(&registry.all(), markers)
}

pub fn render_gadgets(gadgets: &[Arc<dyn Gadget>], markers: &Markers) -> String {
    let mut out = String::new();
    out.push_str("# Available gadgets\n\n");
    out.push_str(&protocol_section(markers));

    for gadget in gadgets {
        out.push_str(&format!("\n## {}\n\n{}\n", gadget.name(), gadget.description()));

        let schema = gadget.schema();
        if schema.fields.is_empty() {
            out.push_str("\nParameters: none\n");
        } else {
            out.push_str(&format!("\nParameters:\n{}\n", schema.render()));
        }

        for (i, example) in gadget.examples().iter().enumerate() {
            let id = format!("example-{}", i + 1);
            if let Some(desc) = &example.description {
                out.push_str(&format!("\n{}:\n", desc));
            } else {
                out.push_str("\nExample:\n");
            }
            let body = serde_json::to_string(&example.parameters)
                .unwrap_or_else(|_| "{}".to_string());
            out.push_str(&format!(
                "{}\n{}\n{}\n",
                markers.start_header(gadget.name(), &id),
                body,
                markers.end_header(gadget.name(), &id),
            ));
        }
    }
    out
}

fn protocol_section(markers: &Markers) -> String {
    format!(
        "To invoke a gadget, emit a block framed by markers, anywhere in your \
response:\n\n\
{start}GadgetName:invocation-id\n\
{{\"parameter\": \"value\"}}\n\
{end}GadgetName:invocation-id\n\n\
Rules:\n\
- Choose a fresh invocation-id for every call; results echo it back to you.\n\
- The body is a JSON object, or key=value lines with key:<<<TAG heredocs \
terminated by a line holding only TAG.\n\
- The end marker must repeat the same GadgetName:invocation-id.\n\
- You may emit several blocks in one response; results arrive in call order.\n",
        start = markers.start,
        end = markers.end,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gadget::{GadgetContext, GadgetExample, GadgetOutcome};
    use crate::schema::{ParamField, ParamSchema, ParamType};
    use serde_json::{json, Value};

    struct EchoGadget;

    #[async_trait::async_trait]
    impl Gadget for EchoGadget {
        fn name(&self) -> &str {
            "Echo"
        }
        fn description(&self) -> &str {
            "Echoes the message back."
        }
        fn schema(&self) -> ParamSchema {
            ParamSchema::new()
                .field(ParamField::required("msg", ParamType::String).describe("text to echo"))
        }
        fn examples(&self) -> Vec<GadgetExample> {
            vec![GadgetExample::new(json!({"msg": "hi"}))]
        }
        async fn execute(&self, params: Value, _ctx: &GadgetContext) -> GadgetOutcome {
            GadgetOutcome::text(params["msg"].as_str().unwrap_or_default())
        }
    }

    #[test]
    fn catalog_names_markers_and_schema() {
        let registry = GadgetRegistry::new();
        registry.register(EchoGadget);
        let catalog = render_catalog(&registry, &Markers::default());

        assert!(catalog.contains("<<<GADGET_START>>>GadgetName:invocation-id"));
        assert!(catalog.contains("## Echo"));
        assert!(catalog.contains("Echoes the message back."));
        assert!(catalog.contains("\"type\": \"string\""));
        assert!(catalog.contains("<<<GADGET_START>>>Echo:example-1"));
        assert!(catalog.contains("<<<GADGET_END>>>Echo:example-1"));
    }

    #[test]
    fn empty_schema_renders_none() {
        struct Bare;
        #[async_trait::async_trait]
        impl Gadget for Bare {
            fn name(&self) -> &str {
                "Bare"
            }
            fn description(&self) -> &str {
                "No parameters."
            }
            fn schema(&self) -> ParamSchema {
                ParamSchema::new()
            }
            async fn execute(&self, _params: Value, _ctx: &GadgetContext) -> GadgetOutcome {
                GadgetOutcome::text("ok")
            }
        }

        let registry = GadgetRegistry::new();
        registry.register(Bare);
        let catalog = render_catalog(&registry, &Markers::default());
        assert!(catalog.contains("Parameters: none"));
    }
}
