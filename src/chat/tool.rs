//! The single declared tool: `execute_sql_query`.
//!
//! The database schema description is embedded verbatim in the tool's
//! description so the model knows what tables and columns exist. Tool
//! execution never raises to the caller; every outcome (including unknown
//! tool names and malformed arguments) becomes a serialized payload the
//! model can read and react to.

use serde::Deserialize;

use crate::gate::SafeQueryGate;
use crate::inference::types::{FunctionDefinition, ToolCallRequest, ToolDefinition};

/// Name of the one declared function.
pub const TOOL_NAME: &str = "execute_sql_query";

/// Schema summary provided to the model so it knows what tables/columns exist.
/// entities.external_id (e.g. badge_12, forklift_3) is the primary handle for
/// questions.
const DB_SCHEMA_DESCRIPTION: &str = "\
The SQLite database tracks in-store locations. Tables:

1. zones (id, name, zone_type, floor, department, polygon_coords, metadata, created_at)
   zone_type: lobby, loading_dock, aisle, floor_landing, department, other. Join to zones for floor (floor-jump checks).
2. entities (id, external_id, name, type['customer','employee','asset','device'], tags, first_seen, last_seen)
   external_id is the primary handle for questions (e.g. badge_12, forklift_3).
3. location_pings (id, entity_id FK->entities, zone_id FK->zones, timestamp, rssi, accuracy, source_device, raw_data)
   rssi: signal strength -100 to -30; low rssi (e.g. < -80) indicates weak signal / data quality.
4. zone_events (id, entity_id FK->entities, zone_id FK->zones, event_type['enter','exit','dwell'], start_time, end_time, duration_seconds, confidence)
";

/// Build the tool definition sent with every model request.
pub fn sql_tool_definition() -> ToolDefinition {
    ToolDefinition {
        r#type: "function".to_string(),
        function: FunctionDefinition {
            name: TOOL_NAME.to_string(),
            description: format!(
                "Execute a read-only SQL SELECT query against the database and return \
                 the results. Only SELECT statements are allowed. \
                 Here is the database schema:\n{DB_SCHEMA_DESCRIPTION}"
            ),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "A SQL SELECT statement to execute.",
                    },
                },
                "required": ["query"],
            }),
        },
    }
}

/// Outcome of a single tool call: the query the model asked for (empty if the
/// arguments were unreadable) and the payload it is shown.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub query: String,
    pub payload: String,
    pub success: bool,
}

#[derive(Deserialize)]
struct SqlArguments {
    query: String,
}

/// Execute one tool-call request against the gate.
///
/// Every failure mode is folded into an `{"error": ...}` payload rather than
/// an error return, so the model can self-correct on the retry round.
pub fn run_tool_call(gate: &SafeQueryGate, call: &ToolCallRequest) -> ToolOutcome {
    if call.name != TOOL_NAME {
        return ToolOutcome {
            query: String::new(),
            payload: error_payload(&format!("Unknown tool: {}", call.name)),
            success: false,
        };
    }

    let args: SqlArguments = match serde_json::from_str(&call.arguments) {
        Ok(args) => args,
        Err(e) => {
            return ToolOutcome {
                query: String::new(),
                payload: error_payload(&format!("Invalid tool arguments: {e}")),
                success: false,
            };
        }
    };

    match gate.execute(&args.query) {
        Ok(rows) => ToolOutcome {
            query: args.query,
            payload: serde_json::json!({ "results": rows }).to_string(),
            success: true,
        },
        Err(e) => ToolOutcome {
            query: args.query,
            payload: error_payload(&e.to_string()),
            success: false,
        },
    }
}

fn error_payload(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
