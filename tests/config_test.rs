//! Loading form configs from disk and checking them

use dynaform::{validate_form_config, Dependencies, FieldConfig, Form, FormConfig};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

const PROFILE: &str = r#"
defaultValidationMessages:
  required: "{{fieldLabel}} is required"
fields:
  - key: name
    type: input
    label: Full name
    required: true
  - key: address
    type: group
    fields:
      - key: city
        type: input
        value: Lisbon
"#;

#[test]
fn test_from_file_yaml_and_json() {
    let dir = TempDir::new().unwrap();
    let yaml_path = dir.path().join("profile.yaml");
    std::fs::write(&yaml_path, PROFILE).unwrap();
    let from_yaml = FormConfig::from_file(&yaml_path).unwrap();
    assert_eq!(from_yaml.fields.len(), 2);

    let json_path = dir.path().join("profile.json");
    std::fs::write(&json_path, from_yaml.to_json().unwrap()).unwrap();
    let from_json = FormConfig::from_file(&json_path).unwrap();
    assert_eq!(from_json, from_yaml);
    assert_eq!(from_json.hash(), from_yaml.hash());
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    assert!(FormConfig::from_file(&dir.path().join("nope.yaml")).is_err());
}

#[test]
fn test_hash_tracks_content() {
    let config = FormConfig::from_yaml(PROFILE).unwrap();
    let mut changed = config.clone();
    changed.fields.push(FieldConfig::new("phone", "input"));
    assert_ne!(config.hash(), changed.hash());
}

#[test]
fn test_json_schema_describes_fields() {
    let schema = FormConfig::json_schema().unwrap();
    let text = schema.to_string();
    assert!(text.contains("fields"));
    assert!(text.contains("defaultValidationMessages"));
}

#[test]
fn test_loaded_config_drives_a_form() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("profile.yaml");
    std::fs::write(&path, PROFILE).unwrap();
    let config = FormConfig::from_file(&path).unwrap();
    assert!(validate_form_config(&config, &Dependencies::new()).issues.is_empty());

    let form = Form::new(config, Dependencies::new(), json!({}));
    assert_eq!(form.get("address.city"), Some(&json!("Lisbon")));
    assert_eq!(
        form.field_state("name").unwrap().messages,
        vec!["Full name is required"]
    );
}
