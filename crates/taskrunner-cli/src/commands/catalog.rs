//! `taskrunner flows|tools|validate`

use serde_json::json;
use taskrunner_core::AppState;

use super::{parse_input, print_json};

pub fn flows(state: &AppState) -> Result<(), String> {
    print_json(&json!({ "flows": state.flows.descriptors() }));
    Ok(())
}

pub fn tools(state: &AppState) -> Result<(), String> {
    print_json(&json!({
        "tools": state.tools.descriptors(),
        "allowlist": state.engine.policy().allowlist(),
    }));
    Ok(())
}

pub async fn validate(state: &AppState, flow: &str, input: &str) -> Result<(), String> {
    let input = parse_input(input)?;
    state
        .engine
        .validate_input(flow, &input)
        .await
        .map_err(|e| e.to_string())?;
    print_json(&json!({ "valid": true, "flow": flow }));
    Ok(())
}
