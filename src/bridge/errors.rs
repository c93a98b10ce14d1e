//! User-facing messages for CLI error codes

/// Map a machine error code from a failed `result` event to the text
/// published in a failed response. The raw code stays in the logs.
pub fn user_facing_error(code: Option<&str>) -> String {
    let code = code.map(str::trim).filter(|c| !c.is_empty());
    match code {
        Some("billing_error") | Some("insufficient_credits") | Some("credit_balance_too_low") => {
            "insufficient credits; add credits or update your API key".to_string()
        }
        Some("authentication_error")
        | Some("invalid_api_key")
        | Some("expired_api_key")
        | Some("oauth_token_expired") => {
            "the agent's API credential is invalid or expired; update the API key".to_string()
        }
        Some("rate_limit_error") | Some("overloaded_error") => {
            "the AI service is busy; try the task again shortly".to_string()
        }
        Some(other) => format!("agent returned an unknown error: {}", other),
        None => "agent returned an unknown error".to_string(),
    }
}
