//! Exchange request schema.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExchangeError;
use crate::oidc::RunId;

/// The repository and run a caller asks a credential for.
///
/// Every field is trimmed and non-empty once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeRequest {
    /// Repository owner login.
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// The requesting workflow run.
    pub run_id: RunId,
}

#[derive(Debug, Deserialize)]
struct RawExchangeRequest {
    owner: Option<Value>,
    repo: Option<Value>,
    run_id: Option<Value>,
}

impl ExchangeRequest {
    /// Builds a request from already-separated values.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::MalformedRequest`] if any value is blank.
    pub fn new(owner: &str, repo: &str, run_id: &str) -> Result<Self, ExchangeError> {
        Ok(Self {
            owner: required_text("owner", owner)?,
            repo: required_text("repo", repo)?,
            run_id: RunId::parse(run_id).map_err(malformed)?,
        })
    }

    /// Parses and validates a JSON request body.
    ///
    /// `run_id` may be a string or a non-negative integer. Unknown fields are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::MalformedRequest`] if the body is not a JSON
    /// object or a field is missing, blank, or of the wrong type.
    pub fn from_json(body: &[u8]) -> Result<Self, ExchangeError> {
        let raw: RawExchangeRequest = serde_json::from_slice(body)
            .map_err(|error| malformed(format!("body is not a valid JSON object: {error}")))?;

        let owner = text_field("owner", raw.owner)?;
        let repo = text_field("repo", raw.repo)?;
        let run_id = raw
            .run_id
            .ok_or_else(|| malformed(String::from("run_id is required")))
            .and_then(|value| {
                serde_json::from_value::<RunId>(value).map_err(|error| malformed(error.to_string()))
            })?;

        Ok(Self {
            owner,
            repo,
            run_id,
        })
    }

    /// `owner/repo`, as it appears in the `repository` claim.
    #[must_use]
    pub fn repository(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

fn text_field(name: &str, value: Option<Value>) -> Result<String, ExchangeError> {
    match value {
        Some(Value::String(text)) => required_text(name, &text),
        Some(_) => Err(malformed(format!("{name} must be a string"))),
        None => Err(malformed(format!("{name} is required"))),
    }
}

fn required_text(name: &str, value: &str) -> Result<String, ExchangeError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(malformed(format!("{name} must not be empty")));
    }
    Ok(trimmed.to_owned())
}

const fn malformed(reason: String) -> ExchangeError {
    ExchangeError::MalformedRequest { reason }
}
