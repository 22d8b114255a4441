//! Tool schema advertised to the realtime model during the session handshake.

use crate::actions::{ActionKind, OpenAppArgs, OpenUrlArgs, SearchGoogleArgs};
use schemars::{JsonSchema, schema_for};
use serde::Serialize;
use serde_json::Value;

/// System instructions sent with the session configuration.
pub const INSTRUCTIONS: &str = "You are a helpful voice assistant that can control the user's computer.

When the user asks you to open an application (like VS Code, Chrome, Terminal, Notepad, etc.), you should:
1. Acknowledge the request
2. Call the openApp function with the application name

When the user asks you to open a website or URL (like \"open google.com\" or \"go to youtube\"), you should:
1. Acknowledge the request
2. Call the openUrl function with the URL

When the user asks you to search for something on Google (like \"search for cats\" or \"google python tutorials\"), you should:
1. Acknowledge the request
2. Call the searchGoogle function with the search query

Available actions:
- openApp: Opens an application on the user's computer
- openUrl: Opens a URL in the default browser
- searchGoogle: Searches Google for a query and opens results in Chrome

Always try to help the user open applications, websites, and search when they ask. You have the ability to do this.";

/// A single `function` tool entry of the session configuration.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn for_action(kind: ActionKind) -> Self {
        let (description, parameters) = match kind {
            ActionKind::OpenApp => (
                "Opens an application on the user's computer",
                parameters_schema::<OpenAppArgs>(),
            ),
            ActionKind::OpenUrl => (
                "Opens a URL in the default web browser",
                parameters_schema::<OpenUrlArgs>(),
            ),
            ActionKind::SearchGoogle => (
                "Searches Google for a query and opens the results in Chrome",
                parameters_schema::<SearchGoogleArgs>(),
            ),
        };
        Self {
            kind: "function",
            name: kind.name(),
            description,
            parameters,
        }
    }
}

/// The full tool set, one entry per [`ActionKind`].
pub fn tool_schema() -> Vec<ToolDefinition> {
    ActionKind::ALL
        .into_iter()
        .map(ToolDefinition::for_action)
        .collect()
}

/// Derives a bare `{type, properties, required}` object schema from an argument struct.
fn parameters_schema<T: JsonSchema>() -> Value {
    let mut schema = schema_for!(T);
    if let Some(object) = schema.as_object_mut() {
        object.remove("$schema");
        object.remove("title");
        object.remove("description");
    }
    schema.to_value()
}
