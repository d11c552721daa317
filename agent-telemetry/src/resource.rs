//! Service identity attached to exported span batches.

use agent_config::ObservabilityConfig;

use crate::span::AttributeValue;

/// Describes the process emitting spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    service_name: String,
    service_version: String,
    deployment_environment: String,
}

impl Resource {
    /// Creates a resource description.
    #[must_use]
    pub fn new(
        service_name: impl Into<String>,
        service_version: impl Into<String>,
        deployment_environment: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: service_version.into(),
            deployment_environment: deployment_environment.into(),
        }
    }

    /// Builds the resource from observability settings.
    #[must_use]
    pub fn from_config(config: &ObservabilityConfig) -> Self {
        Self::new(
            config.service_name.clone(),
            config.service_version.clone(),
            config.deployment_environment.clone(),
        )
    }

    /// Returns the service name.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Returns the service version.
    #[must_use]
    pub fn service_version(&self) -> &str {
        &self.service_version
    }

    /// Returns the deployment environment.
    #[must_use]
    pub fn deployment_environment(&self) -> &str {
        &self.deployment_environment
    }

    /// Returns the resource as semantic-convention attribute pairs.
    #[must_use]
    pub fn attributes(&self) -> Vec<(&'static str, AttributeValue)> {
        vec![
            ("service.name", self.service_name.as_str().into()),
            ("service.version", self.service_version.as_str().into()),
            (
                "deployment.environment",
                self.deployment_environment.as_str().into(),
            ),
        ]
    }
}

impl Default for Resource {
    fn default() -> Self {
        Self::from_config(&ObservabilityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_copies_identity() {
        let config = ObservabilityConfig {
            service_name: "market-research".into(),
            deployment_environment: "staging".into(),
            ..ObservabilityConfig::default()
        };
        let resource = Resource::from_config(&config);

        assert_eq!(resource.service_name(), "market-research");
        assert_eq!(resource.deployment_environment(), "staging");
        assert_eq!(resource.attributes().len(), 3);
    }
}
