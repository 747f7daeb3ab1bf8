use std::fs;

use tempfile::TempDir;

use super::*;

#[test]
fn file_hash_is_stable_across_calls() {
    let dir = TempDir::new().expect("must create temp dir");
    let file = dir.path().join("standalone.sh");
    fs::write(&file, b"#!/bin/sh\nexec java\n").expect("must write file");

    let first = hash_file(&file).expect("must hash");
    let second = hash_file(&file).expect("must hash");
    assert_eq!(first, second);
    assert_eq!(first.len(), 64);
}

#[test]
fn directory_hash_ignores_creation_order() {
    let left = TempDir::new().expect("must create temp dir");
    fs::create_dir_all(left.path().join("main")).expect("must create dir");
    fs::write(left.path().join("main/module.xml"), b"<module/>").expect("must write");
    fs::write(left.path().join("main/resource.jar"), b"jar-bytes").expect("must write");

    let right = TempDir::new().expect("must create temp dir");
    fs::create_dir_all(right.path().join("main")).expect("must create dir");
    fs::write(right.path().join("main/resource.jar"), b"jar-bytes").expect("must write");
    fs::write(right.path().join("main/module.xml"), b"<module/>").expect("must write");

    assert_eq!(
        hash_directory(left.path()).expect("must hash"),
        hash_directory(right.path()).expect("must hash")
    );
}

#[test]
fn directory_hash_sees_content_changes() {
    let dir = TempDir::new().expect("must create temp dir");
    fs::create_dir_all(dir.path().join("main")).expect("must create dir");
    fs::write(dir.path().join("main/module.xml"), b"<module/>").expect("must write");

    let before = hash_directory(dir.path()).expect("must hash");
    fs::write(dir.path().join("main/module.xml"), b"<module name='x'/>").expect("must write");
    let after = hash_directory(dir.path()).expect("must hash");
    assert_ne!(before, after);
}

#[test]
fn hashing_missing_path_fails() {
    let dir = TempDir::new().expect("must create temp dir");
    let err = hash_path(&dir.path().join("nope")).expect_err("must fail");
    assert!(format!("{err:#}").contains("does not exist"));
}

#[test]
fn module_relative_path_splits_dotted_name() {
    let item = ContentItem::module("org.acme.test", "main");
    assert_eq!(
        item.module_relative_path().expect("must be a module"),
        std::path::Path::new("org/acme/test/main")
    );
    assert!(ContentItem::misc_file("bin/run.sh").module_relative_path().is_none());
}

#[test]
fn misc_path_validation_rejects_escapes() {
    assert!(ContentItem::misc_file("bin/run.sh").validate().is_ok());
    assert!(ContentItem::misc_file("../etc/passwd").validate().is_err());
    assert!(ContentItem::misc_file("/etc/passwd").validate().is_err());
    assert!(ContentItem::misc_file("").validate().is_err());
    assert!(ContentItem::misc_file("bin//run.sh").validate().is_err());
}

#[test]
fn modification_hash_shape_is_enforced() {
    let item = ContentItem::misc_file("bin/run.sh");
    assert!(ContentModification::add(item.clone(), "aa").validate().is_ok());
    assert!(ContentModification::update(item.clone(), "aa", "bb").validate().is_ok());
    assert!(ContentModification::remove(item.clone(), "aa").validate().is_ok());

    let malformed = ContentModification {
        kind: ModificationKind::Add,
        item,
        existing_hash: Some("aa".to_string()),
        new_hash: None,
    };
    assert!(malformed.validate().is_err());
}

#[test]
fn inverse_swaps_direction() {
    let item = ContentItem::misc_file("bin/run.sh");
    let add = ContentModification::add(item.clone(), "aa");
    let inverse = add.inverse();
    assert_eq!(inverse.kind, ModificationKind::Remove);
    assert_eq!(inverse.existing_hash.as_deref(), Some("aa"));
    assert!(inverse.new_hash.is_none());
    assert_eq!(inverse.inverse(), add);

    let update = ContentModification::update(item, "aa", "bb");
    let inverse = update.inverse();
    assert_eq!(inverse.existing_hash.as_deref(), Some("bb"));
    assert_eq!(inverse.new_hash.as_deref(), Some("aa"));
}

fn sample_patch_toml() -> String {
    r#"
patch_id = "cp1"
patch_type = "cumulative"
identity_name = "product"
applies_to_version = "1.0.0"
resulting_version = "1.0.1"

[[modifications]]
kind = "add"
new_hash = "aa"

[modifications.item]
type = "misc-file"
path = "bin/standalone.sh"

[[elements]]
id = "base-cp1"
layer = "base"

[[elements.modifications]]
kind = "add"
new_hash = "bb"

[elements.modifications.item]
type = "module"
name = "org.acme.test"
slot = "main"
"#
    .to_string()
}

#[test]
fn patch_toml_round_trip() {
    let patch = Patch::from_toml_str(&sample_patch_toml()).expect("must parse");
    assert_eq!(patch.patch_id, "cp1");
    assert_eq!(patch.patch_type, PatchType::Cumulative);
    assert_eq!(patch.effective_version().to_string(), "1.0.1");
    assert_eq!(patch.elements.len(), 1);
    assert_eq!(patch.elements[0].layer_kind, LayerKind::Layer);

    let rendered = patch.to_toml_string().expect("must serialize");
    let reparsed = Patch::from_toml_str(&rendered).expect("must reparse");
    assert_eq!(reparsed, patch);
}

#[test]
fn cumulative_patch_requires_resulting_version() {
    let raw = sample_patch_toml().replace("resulting_version = \"1.0.1\"\n", "");
    let err = Patch::from_toml_str(&raw).expect_err("must reject");
    assert!(format!("{err:#}").contains("resulting version"));
}

#[test]
fn one_off_patch_rejects_resulting_version() {
    let raw = sample_patch_toml().replace("\"cumulative\"", "\"one-off\"");
    let err = Patch::from_toml_str(&raw).expect_err("must reject");
    assert!(format!("{err:#}").contains("must not declare"));
}

#[test]
fn duplicate_element_layer_is_rejected() {
    let extra = r#"
[[elements]]
id = "base-cp1-again"
layer = "base"
"#;
    let raw = format!("{}{}", sample_patch_toml(), extra);
    let err = Patch::from_toml_str(&raw).expect_err("must reject");
    assert!(format!("{err:#}").contains("duplicate patch element"));
}

#[test]
fn identity_modifications_must_be_misc() {
    let raw = sample_patch_toml().replace(
        "type = \"misc-file\"\npath = \"bin/standalone.sh\"",
        "type = \"module\"\nname = \"org.acme.test\"\nslot = \"main\"",
    );
    let err = Patch::from_toml_str(&raw).expect_err("must reject");
    assert!(format!("{err:#}").contains("misc file"));
}

#[test]
fn element_modifications_must_be_modules() {
    let raw = sample_patch_toml().replace(
        "type = \"module\"\nname = \"org.acme.test\"\nslot = \"main\"",
        "type = \"misc-file\"\npath = \"bin/other.sh\"",
    );
    let err = Patch::from_toml_str(&raw).expect_err("must reject");
    assert!(format!("{err:#}").contains("module"));
}

#[test]
fn target_state_last_applied_prefers_one_offs() {
    let mut state = TargetState::default();
    assert!(state.last_applied().is_none());

    state.cumulative = Some("cp1".to_string());
    assert_eq!(state.last_applied(), Some("cp1"));
    assert!(state.is_applied("cp1"));

    state.one_offs.push("oneOff1".to_string());
    state.one_offs.push("oneOff2".to_string());
    assert_eq!(state.last_applied(), Some("oneOff2"));
    assert!(state.is_applied("oneOff1"));
    assert!(!state.is_applied("oneOff3"));
}

#[test]
fn rollback_record_round_trip() {
    let record = RollbackRecord {
        patch_id: "cp1".to_string(),
        patch_type: PatchType::Cumulative,
        identity_name: "product".to_string(),
        previous_patch_id: Some("oneOff1".to_string()),
        restored_version: "1.0.0".parse().expect("must parse version"),
        modifications: vec![ContentModification::remove(
            ContentItem::misc_file("bin/standalone.sh"),
            "aa",
        )],
        elements: vec![RollbackElement {
            element_id: "base-cp1".to_string(),
            layer: "base".to_string(),
            layer_kind: LayerKind::Layer,
            modifications: vec![ContentModification::remove(
                ContentItem::module("org.acme.test", "main"),
                "bb",
            )],
            prior_state: TargetState {
                cumulative: None,
                one_offs: vec!["base-oneOff1".to_string()],
            },
        }],
        prior_identity_state: TargetState {
            cumulative: None,
            one_offs: vec!["oneOff1".to_string()],
        },
    };

    let rendered = record.to_toml_string().expect("must serialize");
    let reparsed = RollbackRecord::from_toml_str(&rendered).expect("must reparse");
    assert_eq!(reparsed, record);
}
