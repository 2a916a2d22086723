use super::schema::{integer_prop, object_schema, string_enum, string_prop};
use super::{required_str, ToolFailure, ToolRegistry, ToolServices};
use crate::context::RunContext;
use crate::provider::ToolDefinition;
use serde_json::{Map, Value};

pub const TOOL_NAME: &str = "computer";

/// Seam to an external GUI automation adapter. The core only defines the
/// interface; screenshots, input synthesis and window management live in
/// whatever the embedding layer plugs in here.
pub trait GuiDelegate: Send + Sync {
    fn perform(&self, ctx: &RunContext, action: &str, args: &Map<String, Value>)
        -> Result<Value, String>;
}

pub fn register(registry: &mut ToolRegistry) {
    registry.register(definition(), handle);
}

fn definition() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_NAME.to_string(),
        description: "Drive the desktop through the attached GUI adapter: screenshots, \
            mouse, keyboard and window operations."
            .to_string(),
        schema: object_schema(
            &[
                (
                    "action",
                    string_enum(
                        "GUI action",
                        &[
                            "screenshot",
                            "mouse_move",
                            "mouse_click",
                            "keyboard_type",
                            "keyboard_press",
                            "window_focus",
                            "window_list",
                        ],
                    ),
                ),
                ("x", integer_prop("screen x coordinate")),
                ("y", integer_prop("screen y coordinate")),
                ("text", string_prop("text to type")),
                ("key", string_prop("key to press")),
                ("window", string_prop("window title to focus")),
            ],
            &["action"],
        ),
    }
}

fn handle(
    services: &ToolServices,
    ctx: &RunContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolFailure> {
    let action = required_str(args, "action")?;
    let delegate = services
        .gui
        .as_ref()
        .ok_or_else(|| ToolFailure::exec("no GUI adapter attached"))?;
    let output = delegate
        .perform(ctx, action, args)
        .map_err(ToolFailure::exec)?;
    services
        .journal
        .record_browser_action(&ctx.run_id, &format!("computer {action}"))
        .map_err(|err| ToolFailure::exec(err.to_string()))?;
    Ok(output)
}
