//! Wire format for descriptions
//!
//! Descriptions travel between controllers as YAML: structured, human
//! diffable, and carrying an explicit `version` field. Unknown fields are
//! rejected so that a payload written by a newer producer fails loudly rather
//! than importing with silently dropped state. Since YAML is a superset of
//! JSON, a JSON-encoded description is accepted as well.

use crate::error::{DescriptionError, Result};
use crate::model::{Model, CURRENT_VERSION};

/// Encode a description
pub fn serialize(model: &Model) -> Result<Vec<u8>> {
    let text = serde_yaml::to_string(model).map_err(DescriptionError::Encode)?;
    Ok(text.into_bytes())
}

/// Decode and validate a description
///
/// Parse failures come back as [`DescriptionError::Parse`]; payloads that
/// parse but carry an unknown format version or dangling references come back
/// as [`DescriptionError::UnsupportedVersion`] or [`DescriptionError::Invalid`].
pub fn deserialize(bytes: &[u8]) -> Result<Model> {
    let model: Model = serde_yaml::from_slice(bytes)?;

    if model.version == 0 || model.version > CURRENT_VERSION {
        return Err(DescriptionError::UnsupportedVersion {
            found: model.version,
            supported: CURRENT_VERSION,
        });
    }

    model.validate()?;
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgentTools, ApplicationArgs, MachineArgs, ModelArgs, UnitArgs};
    use serde_json::json;

    fn sample() -> Model {
        let mut model = Model::new(
            ModelArgs::new("admin")
                .with_config("name", json!("default"))
                .with_config("uuid", json!("deadbeef-0bad-400d-8000-4b1d0d06f00d")),
        );
        model
            .add_machine(MachineArgs::new("0").with_series("trusty"))
            .set_tools(AgentTools::new("2.0.1-trusty-amd64".parse().unwrap()));
        model
            .add_application(
                ApplicationArgs::new("magic").with_charm("local:trusty/magic".parse().unwrap()),
            )
            .add_unit(UnitArgs::new("magic/0").on_machine("0"));
        model
    }

    #[test]
    fn test_output_is_text() {
        let bytes = serialize(&sample()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("version: 1"));
        assert!(text.contains("charm-url"));
        assert!(text.contains("local:trusty/magic"));
        assert!(text.contains("2.0.1-trusty-amd64"));
    }

    #[test]
    fn test_round_trip() {
        let model = sample();
        let restored = deserialize(&serialize(&model).unwrap()).unwrap();
        assert_eq!(model, restored);
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        let err = deserialize(b"not a model").unwrap_err();
        assert!(err.is_parse_error());
    }

    #[test]
    fn test_unknown_field_is_a_parse_error() {
        let payload = "version: 1\nowner: admin\nmystery: true\n";
        let err = deserialize(payload.as_bytes()).unwrap_err();
        assert!(err.is_parse_error());
        assert!(err.to_string().contains("mystery"));
    }

    #[test]
    fn test_missing_version_is_a_parse_error() {
        let err = deserialize(b"owner: admin\n").unwrap_err();
        assert!(err.is_parse_error());
    }

    #[test]
    fn test_future_version_is_rejected_distinctly() {
        let err = deserialize(b"version: 99\nowner: admin\n").unwrap_err();
        assert!(matches!(
            err,
            DescriptionError::UnsupportedVersion { found: 99, .. }
        ));
    }

    #[test]
    fn test_dangling_reference_is_rejected_distinctly() {
        let payload = r#"
version: 1
owner: admin
applications:
  - name: magic
    units:
      - name: magic/0
        machine: "7"
"#;
        let err = deserialize(payload.as_bytes()).unwrap_err();
        assert!(matches!(err, DescriptionError::Invalid(_)));
    }

    #[test]
    fn test_renamed_attributes_are_accepted() {
        let payload = r#"
version: 1
owner: admin
services:
  - name: magic
    charm: local:trusty/magic
"#;
        let model = deserialize(payload.as_bytes()).unwrap();
        assert_eq!(
            model.applications()[0].charm_url().map(|u| u.to_string()),
            Some("local:trusty/magic".to_string())
        );
    }

    #[test]
    fn test_json_payload_is_accepted() {
        let payload = r#"{"version": 1, "owner": "admin", "config": {"name": "m"}}"#;
        let model = deserialize(payload.as_bytes()).unwrap();
        assert_eq!(model.name(), Some("m"));
    }
}
