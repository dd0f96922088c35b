use crate::controller::conditions::{Condition, ConditionSet};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label carrying the name of the Configuration that stamped out a Revision
pub const CONFIGURATION_LABEL: &str = "serving.pylon.dev/configuration";

/// Container name used when the revision does not name one
pub const DEFAULT_CONTAINER_NAME: &str = "user-container";

/// Revision is an immutable snapshot of code and configuration
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "serving.pylon.dev",
    version = "v1beta1",
    kind = "Revision",
    namespaced,
    status = "RevisionStatus",
    printcolumn = r#"{"name":"Image", "type":"string", "jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Digest", "type":"string", "jsonPath":".status.imageDigest"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct RevisionSpec {
    /// Container image, by tag or digest
    pub image: String,

    /// Name of the user container in the revision's pods
    #[serde(rename = "containerName", skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,

    /// Service account whose pull secrets authenticate registry lookups
    #[serde(rename = "serviceAccountName", skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// Extra pull secrets (by name, in the revision's namespace)
    #[serde(rename = "imagePullSecrets", default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,

    /// Maximum request duration; also bounds the route timeout
    #[serde(rename = "timeoutSeconds", skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i64>,
}

/// Condition types tracked on a Revision
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum RevisionConditionType {
    Ready,
    /// Compute resources were provisioned
    ResourcesAvailable,
    /// The image resolved and the container is not crashing
    ContainerHealthy,
}

pub const REVISION_CONDITIONS: ConditionSet<RevisionConditionType> = ConditionSet::new(
    RevisionConditionType::Ready,
    &[
        RevisionConditionType::ResourcesAvailable,
        RevisionConditionType::ContainerHealthy,
    ],
);

/// Status of the Revision
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct RevisionStatus {
    /// Image pinned to a digest, once resolved
    #[serde(rename = "imageDigest", skip_serializing_if = "Option::is_none")]
    pub image_digest: Option<String>,

    #[serde(rename = "observedGeneration", skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition<RevisionConditionType>>,
}

impl Revision {
    pub fn container_name(&self) -> &str {
        self.spec
            .container_name
            .as_deref()
            .unwrap_or(DEFAULT_CONTAINER_NAME)
    }

    /// Configuration that owns this revision, empty when unlabeled
    pub fn configuration_name(&self) -> String {
        self.labels()
            .get(CONFIGURATION_LABEL)
            .cloned()
            .unwrap_or_default()
    }

    /// Name of the Deployment backing this revision
    pub fn deployment_name(&self) -> String {
        format!("{}-deployment", self.name_any())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "revision_test.rs"]
mod tests;
