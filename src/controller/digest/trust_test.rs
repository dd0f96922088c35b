use super::*;
use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};
use std::path::Path;
use tempfile::TempDir;

/// Write a bundle holding `count` freshly generated CA certificates
fn write_ca_bundle(dir: &Path, name: &str, count: usize) -> String {
    let mut pem = String::new();
    for i in 0..count {
        let mut params = CertificateParams::new(vec![format!("{}-{}.test", name, i)]).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let key = KeyPair::generate().unwrap();
        pem.push_str(&params.self_signed(&key).unwrap().pem());
    }

    let path = dir.join(name);
    std::fs::write(&path, pem).unwrap();
    path.to_string_lossy().into_owned()
}

fn system_root_count() -> usize {
    system_roots().len()
}

#[test]
fn test_system_roots_never_empty() {
    assert!(!system_roots().is_empty());
}

fn store_len(cache: &TrustCache) -> usize {
    cache.root_store().unwrap().len()
}

#[test]
fn test_first_update_builds_from_system_roots() {
    let mut cache = TrustCache::new();
    assert!(cache.root_store().is_none());

    let update = cache.update(&[]).unwrap();

    assert_eq!(update, TrustUpdate::Rebuilt);
    assert_eq!(cache.rebuilds(), 1);
    assert_eq!(store_len(&cache), system_root_count());
}

#[test]
fn test_identical_set_does_not_rebuild() {
    let dir = TempDir::new().unwrap();
    let a = write_ca_bundle(dir.path(), "a.pem", 1);
    let mut cache = TrustCache::new();

    cache.update(&[a.clone()]).unwrap();
    let update = cache.update(&[a.clone()]).unwrap();

    assert_eq!(update, TrustUpdate::Unchanged);
    assert_eq!(cache.rebuilds(), 1, "only the initial build");
    assert_eq!(cache.appends(), 0);
    assert_eq!(store_len(&cache), system_root_count() + 1);
}

#[test]
fn test_superset_appends_only_new_paths() {
    let dir = TempDir::new().unwrap();
    let a = write_ca_bundle(dir.path(), "a.pem", 1);
    let b = write_ca_bundle(dir.path(), "b.pem", 2);
    let mut cache = TrustCache::new();

    cache.update(&[a.clone()]).unwrap();
    let update = cache.update(&[a.clone(), b.clone()]).unwrap();

    assert_eq!(update, TrustUpdate::Appended(1));
    assert_eq!(cache.rebuilds(), 1);
    assert_eq!(cache.appends(), 1);
    assert_eq!(store_len(&cache), system_root_count() + 3);
    assert_eq!(cache.cached_paths().count(), 2);
}

#[test]
fn test_removal_forces_rebuild() {
    let dir = TempDir::new().unwrap();
    let a = write_ca_bundle(dir.path(), "a.pem", 1);
    let b = write_ca_bundle(dir.path(), "b.pem", 1);
    let mut cache = TrustCache::new();

    cache.update(&[a.clone(), b.clone()]).unwrap();
    let update = cache.update(&[b.clone()]).unwrap();

    assert_eq!(update, TrustUpdate::Rebuilt);
    assert_eq!(cache.rebuilds(), 2);
    assert_eq!(store_len(&cache), system_root_count() + 1);
    assert_eq!(cache.cached_paths().collect::<Vec<_>>(), vec![b.as_str()]);
}

/// Repeated and duplicated paths are never appended twice
#[test]
fn test_append_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let a = write_ca_bundle(dir.path(), "a.pem", 1);
    let b = write_ca_bundle(dir.path(), "b.pem", 1);
    let mut cache = TrustCache::new();

    cache.update(&[a.clone()]).unwrap();
    assert_eq!(
        cache.update(&[a.clone(), b.clone(), a.clone(), b.clone()]).unwrap(),
        TrustUpdate::Appended(1)
    );
    assert_eq!(
        cache.update(&[b.clone(), a.clone()]).unwrap(),
        TrustUpdate::Unchanged
    );

    assert_eq!(cache.appends(), 1);
    assert_eq!(cache.rebuilds(), 1);
    assert_eq!(store_len(&cache), system_root_count() + 2);
}

#[test]
fn test_failed_append_leaves_state_intact() {
    let dir = TempDir::new().unwrap();
    let a = write_ca_bundle(dir.path(), "a.pem", 1);
    let missing = dir.path().join("missing.pem").to_string_lossy().into_owned();
    let mut cache = TrustCache::new();
    cache.update(&[a.clone()]).unwrap();

    let err = cache.update(&[a.clone(), missing.clone()]).unwrap_err();

    assert!(matches!(err, TrustError::Read { ref path, .. } if *path == missing));
    assert_eq!(cache.cached_paths().collect::<Vec<_>>(), vec![a.as_str()]);
    assert_eq!(store_len(&cache), system_root_count() + 1);
    assert_eq!(cache.appends(), 0);

    // The next identical request is still a no-op
    assert_eq!(cache.update(&[a]).unwrap(), TrustUpdate::Unchanged);
}

#[test]
fn test_failed_rebuild_leaves_state_intact() {
    let dir = TempDir::new().unwrap();
    let a = write_ca_bundle(dir.path(), "a.pem", 1);
    let empty = dir.path().join("empty.pem");
    std::fs::write(&empty, "not a certificate\n").unwrap();
    let empty = empty.to_string_lossy().into_owned();
    let mut cache = TrustCache::new();
    cache.update(&[a.clone()]).unwrap();

    // Dropping `a` would rebuild, but the replacement bundle is unusable
    let err = cache.update(&[empty.clone()]).unwrap_err();

    assert!(matches!(err, TrustError::Empty(ref path) if *path == empty));
    assert_eq!(cache.rebuilds(), 1);
    assert_eq!(cache.cached_paths().collect::<Vec<_>>(), vec![a.as_str()]);
    assert_eq!(store_len(&cache), system_root_count() + 1);
}

#[test]
fn test_well_known_bundle_paths() {
    assert!(KUBERNETES_CERT_BUNDLE.ends_with("serviceaccount/ca.crt"));
    assert!(OPENSHIFT_CERT_BUNDLE.ends_with("serviceaccount/service-ca.crt"));
}
