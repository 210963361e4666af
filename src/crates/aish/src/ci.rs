//! CI entries

use registry::component::Endpoint;
use serde::{Deserialize, Serialize};

/// What kind of CI an entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CiKind {
    /// Internal specialist in the greek chorus
    GreekChorus,
    /// Interactive terminal session
    Terminal,
    /// Per-project CI
    Project,
}

impl std::fmt::Display for CiKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GreekChorus => write!(f, "greek-chorus"),
            Self::Terminal => write!(f, "terminal"),
            Self::Project => write!(f, "project"),
        }
    }
}

/// A registered CI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiEntry {
    /// Logical CI name
    pub ci_name: String,
    /// CI kind
    pub kind: CiKind,
    /// Directly declared endpoint, when the CI is not component-hosted
    pub endpoint: Option<Endpoint>,
    /// Owning component id, resolved through the service registry
    pub component: Option<String>,
    /// Prompt/purpose string describing the CI
    pub persona: Option<String>,
    /// Preferred model
    pub model_preference: Option<String>,
    /// Injected at the start of the CI's next turn, then cleared
    pub next_prompt: Option<String>,
}

impl CiEntry {
    /// Create an entry
    pub fn new(ci_name: impl Into<String>, kind: CiKind) -> Self {
        Self {
            ci_name: ci_name.into(),
            kind,
            endpoint: None,
            component: None,
            persona: None,
            model_preference: None,
            next_prompt: None,
        }
    }

    /// Bind a direct endpoint
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Bind to an owning component
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Set the persona
    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }

    /// Set the model preference
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_preference = Some(model.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let entry = CiEntry::new("metis", CiKind::GreekChorus)
            .with_component("metis-svc")
            .with_persona("workflow design specialist")
            .with_model("metis-large");
        assert_eq!(entry.ci_name, "metis");
        assert_eq!(entry.component.as_deref(), Some("metis-svc"));
        assert!(entry.endpoint.is_none());
    }

    #[test]
    fn test_kind_serialization() {
        let value = serde_json::to_value(CiKind::GreekChorus).unwrap();
        assert_eq!(value, "greek-chorus");
    }
}
