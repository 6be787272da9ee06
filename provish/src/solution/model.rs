//! Installation plan data model.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Which execution path a solution is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolutionKind {
    /// Compound command over an interactive SSH shell.
    Shell,
    /// One-shot commands over the administrative share.
    Batch,
}

impl SolutionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::Batch => "batch",
        }
    }
}

impl fmt::Display for SolutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a step's contents mean.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepKind {
    /// Each content names an artifact (`name`) and where to get it (`text`).
    Dependencies,
    /// Each content is a literal command line.
    Commands,
    /// Anything else; skipped with a warning.
    Unknown(String),
}

impl From<String> for StepKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "dependencies" => Self::Dependencies,
            "commands" => Self::Commands,
            _ => Self::Unknown(s),
        }
    }
}

impl From<StepKind> for String {
    fn from(kind: StepKind) -> Self {
        match kind {
            StepKind::Dependencies => "dependencies".to_string(),
            StepKind::Commands => "commands".to_string(),
            StepKind::Unknown(s) => s,
        }
    }
}

/// One item of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub name: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Content {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            description: None,
        }
    }
}

/// An ordered group of contents of one kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "type")]
    pub kind: StepKind,
    #[serde(default)]
    pub contents: Vec<Content>,
}

impl Step {
    pub fn commands<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: StepKind::Commands,
            contents: texts
                .into_iter()
                .map(|t| Content::new("cmd", t))
                .collect(),
        }
    }

    pub fn dependencies(contents: Vec<Content>) -> Self {
        Self {
            kind: StepKind::Dependencies,
            contents,
        }
    }
}

/// Ordered steps for one execution path. Order is execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSolution {
    #[serde(rename = "type")]
    pub kind: SolutionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// A host's solutions keyed by kind, in plan order.
#[derive(Debug, Clone, Default)]
pub struct HostSolutions {
    solutions: IndexMap<SolutionKind, ExecutionSolution>,
}

impl HostSolutions {
    /// Parse a JSON array of solutions. A later solution of the same kind
    /// replaces an earlier one.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let list: Vec<ExecutionSolution> =
            serde_json::from_str(json).map_err(|e| ConfigurationError::InvalidPlan {
                message: e.to_string(),
            })?;
        Ok(list.into_iter().collect())
    }

    /// Parse base64-encoded JSON.
    pub fn from_json_b64(encoded: &str) -> Result<Self, ConfigurationError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| ConfigurationError::InvalidPlan {
                message: format!("base64: {}", e),
            })?;
        let json = String::from_utf8(bytes).map_err(|e| ConfigurationError::InvalidPlan {
            message: format!("utf-8: {}", e),
        })?;
        Self::from_json(&json)
    }

    pub fn get(&self, kind: SolutionKind) -> Option<&ExecutionSolution> {
        self.solutions.get(&kind)
    }

    /// The solution of `kind`, or a configuration error if the plan lacks it.
    pub fn select(&self, kind: SolutionKind) -> Result<&ExecutionSolution, ConfigurationError> {
        self.get(kind).ok_or_else(|| ConfigurationError::MissingSolution {
            kind: kind.to_string(),
        })
    }

    pub fn kinds(&self) -> impl Iterator<Item = SolutionKind> + '_ {
        self.solutions.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.solutions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.solutions.is_empty()
    }
}

impl FromIterator<ExecutionSolution> for HostSolutions {
    fn from_iter<T: IntoIterator<Item = ExecutionSolution>>(iter: T) -> Self {
        let mut solutions = IndexMap::new();
        for solution in iter {
            solutions.insert(solution.kind, solution);
        }
        Self { solutions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"[
        {
            "type": "shell",
            "description": "install agent",
            "steps": [
                {"type": "dependencies", "contents": [
                    {"name": "agent.tgz", "text": "http://dl/agent.tgz", "description": "package"}
                ]},
                {"type": "commands", "contents": [{"name": "run_cmd", "text": "./setup.sh"}]},
                {"type": "webhook", "contents": []}
            ]
        },
        {"type": "batch", "steps": []}
    ]"#;

    #[test]
    fn test_parse_plan() {
        let plan = HostSolutions::from_json(PLAN).unwrap();
        assert_eq!(
            plan.kinds().collect::<Vec<_>>(),
            vec![SolutionKind::Shell, SolutionKind::Batch]
        );

        let shell = plan.select(SolutionKind::Shell).unwrap();
        assert_eq!(shell.steps.len(), 3);
        assert_eq!(shell.steps[0].kind, StepKind::Dependencies);
        assert_eq!(shell.steps[0].contents[0].name, "agent.tgz");
        assert_eq!(shell.steps[1].kind, StepKind::Commands);
        assert_eq!(shell.steps[2].kind, StepKind::Unknown("webhook".to_string()));
    }

    #[test]
    fn test_parse_b64() {
        let encoded = STANDARD.encode(PLAN);
        let plan = HostSolutions::from_json_b64(&encoded).unwrap();
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_missing_solution() {
        let plan = HostSolutions::from_json(r#"[{"type": "shell", "steps": []}]"#).unwrap();
        assert!(matches!(
            plan.select(SolutionKind::Batch),
            Err(ConfigurationError::MissingSolution { kind }) if kind == "batch"
        ));
    }

    #[test]
    fn test_invalid_plan() {
        assert!(matches!(
            HostSolutions::from_json_b64("not base64!"),
            Err(ConfigurationError::InvalidPlan { .. })
        ));
        assert!(matches!(
            HostSolutions::from_json("{}"),
            Err(ConfigurationError::InvalidPlan { .. })
        ));
    }
}
