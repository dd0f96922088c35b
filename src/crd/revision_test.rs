use super::*;

#[test]
fn test_revision_deserialize_from_yaml() {
    let yaml = r#"
apiVersion: serving.pylon.dev/v1beta1
kind: Revision
metadata:
  name: hello-00001
  namespace: default
  labels:
    serving.pylon.dev/configuration: hello
spec:
  image: gcr.io/example/hello:v1
  serviceAccountName: builder
  imagePullSecrets:
  - regcred
  timeoutSeconds: 60
"#;

    let revision: Revision = serde_yaml::from_str(yaml).expect("Failed to deserialize Revision");

    assert_eq!(revision.spec.image, "gcr.io/example/hello:v1");
    assert_eq!(revision.spec.service_account_name.as_deref(), Some("builder"));
    assert_eq!(revision.spec.image_pull_secrets, vec!["regcred".to_string()]);
    assert_eq!(revision.spec.timeout_seconds, Some(60));
    assert_eq!(revision.configuration_name(), "hello");
    assert_eq!(revision.container_name(), DEFAULT_CONTAINER_NAME);
    assert_eq!(revision.deployment_name(), "hello-00001-deployment");
}

#[test]
fn test_unlabeled_revision_has_empty_configuration() {
    let revision = Revision::new(
        "orphan",
        RevisionSpec {
            image: "busybox".to_string(),
            container_name: Some("app".to_string()),
            ..Default::default()
        },
    );

    assert_eq!(revision.configuration_name(), "");
    assert_eq!(revision.container_name(), "app");
}

#[test]
fn test_revision_status_serializes_digest() {
    let status = RevisionStatus {
        image_digest: Some("gcr.io/example/hello@sha256:abc".to_string()),
        ..Default::default()
    };

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["imageDigest"], "gcr.io/example/hello@sha256:abc");
    assert!(json.get("conditions").is_none());
}
