use std::fs;
use std::path::Path;

use drift_core::{ManifestError, Resource, ResourceId};
use drift_manifests::load;

fn write(dir: &Path, rel: &str, body: &str) {
    let p = dir.join(rel);
    fs::create_dir_all(p.parent().unwrap()).unwrap();
    fs::write(p, body).unwrap();
}

const HELLOWORLD: &str = "---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: helloworld
spec:
  template:
    spec:
      containers:
      - name: greeter
        image: quay.io/weaveworks/helloworld:master-a000001
      - name: sidecar
        image: quay.io/weaveworks/sidecar:master-a000001
";

const LOCKED_SERVICE: &str = "---
apiVersion: v1
kind: Service
metadata:
  name: locked-service
  annotations:
    flux.weave.works/locked: \"true\"
";

const NAMESPACE: &str = "apiVersion: v1
kind: Namespace
metadata:
  name: demo
";

#[test]
fn loads_one_resource_per_file_recursively() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "helloworld-deploy.yaml", HELLOWORLD);
    write(dir.path(), "services/locked-service.yaml", LOCKED_SERVICE);
    write(dir.path(), "namespaces/demo.yml", NAMESPACE);

    let objs = load(&[dir.path()]).unwrap();
    assert_eq!(objs.len(), 3);

    let deploy = &objs[&ResourceId::new("", "Deployment", "helloworld")];
    assert!(deploy.source().ends_with("helloworld-deploy.yaml"));
    let images: Vec<String> = deploy.containers().iter().map(|c| c.image.to_string()).collect();
    assert_eq!(images, vec!["quay.io/weaveworks/helloworld:master-a000001", "quay.io/weaveworks/sidecar:master-a000001"]);

    let svc = &objs[&ResourceId::new("default", "Service", "locked-service")];
    assert!(svc.policies().contains(&drift_core::Policy::LOCKED));

    assert!(matches!(objs[&ResourceId::new("", "Namespace", "demo")], Resource::Namespace(_)));
}

#[test]
fn merges_multiple_roots_and_single_files() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    write(a.path(), "deploy.yaml", HELLOWORLD);
    write(b.path(), "svc.manifest", LOCKED_SERVICE);

    let objs = load(&[a.path().to_path_buf(), b.path().join("svc.manifest")]).unwrap();
    assert_eq!(objs.len(), 2);
}

#[test]
fn same_identity_in_two_files_is_a_collision() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.yaml", HELLOWORLD);
    write(dir.path(), "b.yaml", HELLOWORLD);

    match load(&[dir.path()]) {
        Err(ManifestError::Collision { id, first, second }) => {
            assert_eq!(id, ResourceId::new("default", "Deployment", "helloworld"));
            assert!(first.ends_with("a.yaml"), "first={}", first);
            assert!(second.ends_with("b.yaml"), "second={}", second);
        }
        other => panic!("expected collision, got {:?}", other),
    }
}

#[test]
fn malformed_file_fails_the_load() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "good.yaml", HELLOWORLD);
    write(dir.path(), "bad.yaml", "kind: Service\nmetadata: [\n");

    let err = load(&[dir.path()]).unwrap_err();
    assert!(matches!(err, ManifestError::Malformed { ref origin, .. } if origin.ends_with("bad.yaml")));
}

#[test]
fn empty_directory_loads_nothing() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load(&[dir.path()]).unwrap().is_empty());
}
