//! Bus subject scheme
//!
//! ```text
//! team.<team>.leader        user <-> leader
//! team.<team>.<agent>       direct per-agent channel
//! team.<team>.broadcast     team-wide
//! team.<team>.status        status updates
//! team.<team>.activity      intermediate activity stream
//! ```
//!
//! Team and agent names are single subject tokens. Anything carrying a
//! NATS-special character is rejected before a subject is built.

use crate::error::{Error, Result};

const ROOT: &str = "team";

/// Check that `value` can be used as one subject token.
pub fn validate_token(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::Subject(format!("{} name must not be empty", kind)));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| matches!(c, '.' | '*' | '>') || c.is_whitespace())
    {
        return Err(Error::Subject(format!(
            "{} name '{}' contains invalid character {:?}",
            kind, value, bad
        )));
    }
    Ok(())
}

/// Subjects for one team. Construction validates the team name once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamSubjects {
    team: String,
    prefix: String,
}

impl TeamSubjects {
    pub fn new(team: &str) -> Result<Self> {
        validate_token("team", team)?;
        Ok(Self {
            team: team.to_string(),
            prefix: format!("{}.{}.", ROOT, team),
        })
    }

    pub fn team(&self) -> &str {
        &self.team
    }

    pub fn leader(&self) -> String {
        format!("{}leader", self.prefix)
    }

    pub fn broadcast(&self) -> String {
        format!("{}broadcast", self.prefix)
    }

    pub fn status(&self) -> String {
        format!("{}status", self.prefix)
    }

    pub fn activity(&self) -> String {
        format!("{}activity", self.prefix)
    }

    /// Direct channel of `agent`.
    pub fn agent(&self, agent: &str) -> Result<String> {
        validate_token("agent", agent)?;
        Ok(format!("{}{}", self.prefix, agent))
    }

    /// Whether a fully-qualified subject lives in this team's namespace.
    pub fn contains(&self, subject: &str) -> bool {
        subject
            .strip_prefix(&self.prefix)
            .map(|rest| !rest.is_empty())
            .unwrap_or(false)
    }

    /// Resolve a reply destination.
    ///
    /// A bare agent name becomes its direct channel. Anything that already
    /// looks like a subject must sit inside this team's namespace and name
    /// a concrete subject, so wildcard tokens such as `team.<team>.>` are
    /// refused.
    pub fn resolve_destination(&self, destination: &str) -> Result<String> {
        if !destination.contains('.') {
            return self.agent(destination);
        }
        let Some(rest) = destination.strip_prefix(&self.prefix) else {
            return Err(Error::Subject(format!(
                "destination '{}' is outside team '{}'",
                destination, self.team
            )));
        };
        for token in rest.split('.') {
            validate_token("destination", token).map_err(|_| {
                Error::Subject(format!(
                    "destination '{}' is not a concrete subject",
                    destination
                ))
            })?;
        }
        Ok(destination.to_string())
    }
}
