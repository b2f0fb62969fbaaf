//! Decoding descriptions written by other producers

use model_description::{deserialize, serialize, ArtifactKind, DescriptionError, Role};

const PAYLOAD: &str = r#"
version: 1
owner: admin
config:
  name: default
  uuid: deadbeef-0bad-400d-8000-4b1d0d06f00d
  logging-config: "<root>=INFO"
annotations:
  owner-team: infra
machines:
  - id: "0"
    series: trusty
    tools:
      version: 2.0.1-trusty-amd64
      sha256: abc123
      size: 1024
    containers:
      - id: 0/lxc/0
        tools:
          version: 2.0.5-trusty-amd64
  - id: "1"
    tools:
      version: 2.0.1-trusty-amd64
applications:
  - name: magic
    charm-url: local:trusty/magic
    units:
      - name: magic/0
        machine: "0"
        tools:
          version: 2.0.3-trusty-amd64
      - name: magic/1
        machine: 0/lxc/0
  - name: postgresql
    charm-url: cs:trusty/postgresql-42
    settings:
      max-connections: 100
relations:
  - id: 0
    key: magic:db postgresql:db
    endpoints:
      - application: magic
        name: db
        role: requirer
      - application: postgresql
        name: db
        role: provider
"#;

#[test]
fn test_decode_hand_written_payload() {
    let model = deserialize(PAYLOAD.as_bytes()).unwrap();

    assert_eq!(model.owner(), "admin");
    assert_eq!(model.name(), Some("default"));
    assert_eq!(model.annotations()["owner-team"], "infra");

    let machines: Vec<_> = model
        .all_machines()
        .into_iter()
        .map(|(parent, m)| (parent.map(str::to_string), m.id().to_string()))
        .collect();
    assert_eq!(
        machines,
        vec![
            (None, "0".to_string()),
            (Some("0".to_string()), "0/lxc/0".to_string()),
            (None, "1".to_string()),
        ]
    );

    let tools = model.machines()[0].tools().unwrap();
    assert_eq!(tools.sha256.as_deref(), Some("abc123"));
    assert_eq!(tools.size, Some(1024));

    let magic = &model.applications()[0];
    assert_eq!(magic.units().len(), 2);
    assert_eq!(magic.units()[1].machine(), Some("0/lxc/0"));
    assert_eq!(model.relations()[0].endpoints[1].role, Role::Provider);
}

#[test]
fn test_artifacts_are_deduplicated() {
    let model = deserialize(PAYLOAD.as_bytes()).unwrap();

    let artifacts = model.artifacts();
    let tools = artifacts
        .iter()
        .filter(|a| a.kind() == ArtifactKind::AgentTools)
        .count();
    let charms = artifacts
        .iter()
        .filter(|a| a.kind() == ArtifactKind::Charm)
        .count();
    assert_eq!(tools, 3);
    assert_eq!(charms, 2);

    let versions: Vec<String> = model
        .tools_versions()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(
        versions,
        vec![
            "2.0.1-trusty-amd64",
            "2.0.3-trusty-amd64",
            "2.0.5-trusty-amd64"
        ]
    );
}

#[test]
fn test_reencoding_preserves_content() {
    let model = deserialize(PAYLOAD.as_bytes()).unwrap();
    let again = deserialize(&serialize(&model).unwrap()).unwrap();
    assert_eq!(model, again);
}

#[test]
fn test_legacy_field_names() {
    let payload = r#"
version: 1
owner: admin
machines:
  - id: "0"
    tools:
      tools-version: 1.25.6-trusty-amd64
services:
  - name: wordpress
    charm: cs:trusty/wordpress-5
    units:
      - name: wordpress/0
        machine: "0"
relations:
  - id: 3
    key: wordpress:peer
    endpoints:
      - service: wordpress
        name: peer
        role: peer
"#;

    let model = deserialize(payload.as_bytes()).unwrap();
    assert_eq!(model.applications()[0].name(), "wordpress");
    assert_eq!(
        model.applications()[0].charm_url().unwrap().to_string(),
        "cs:trusty/wordpress-5"
    );
    assert_eq!(model.relations()[0].endpoints[0].application, "wordpress");
}

#[test]
fn test_newer_version_is_rejected() {
    let payload = PAYLOAD.replacen("version: 1", "version: 2", 1);
    let err = deserialize(payload.as_bytes()).unwrap_err();
    assert!(matches!(
        err,
        DescriptionError::UnsupportedVersion { found: 2, .. }
    ));
}

#[test]
fn test_unknown_field_is_rejected() {
    let payload = PAYLOAD.replacen("owner: admin", "owner: admin\ncloud: aws", 1);
    let err = deserialize(payload.as_bytes()).unwrap_err();
    assert!(err.is_parse_error(), "{}", err);
}

#[test]
fn test_dangling_unit_machine_is_invalid() {
    let payload = PAYLOAD.replacen("machine: 0/lxc/0", "machine: \"7\"", 1);
    let err = deserialize(payload.as_bytes()).unwrap_err();
    assert!(matches!(err, DescriptionError::Invalid(_)));
    assert!(err.to_string().contains("unknown machine"));
}
