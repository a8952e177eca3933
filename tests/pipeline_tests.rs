//! End-to-end tests of the processing pipeline against real directory trees.

use serde_json::{Value, json};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use strata::config::{Enclosure, OutputOptions, ProcessOptions};
use strata::error::{ErrorCategory, ErrorCode};
use strata::format::OutputFormat;
use strata::merge::{ListStrategy, MergeStrategies};
use strata::processor::ConfigProcessor;
use tempfile::TempDir;

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn processor() -> ConfigProcessor {
    ConfigProcessor::new().with_env(HashMap::from([("HOME".to_string(), "/home/u".to_string())]))
}

fn process(root: &Path, target: &str) -> Value {
    processor()
        .process(&ProcessOptions::new(target).with_cwd(root))
        .unwrap()
}

#[test]
fn test_later_files_win() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "default.yaml", "x: root\nkeep: 1\n");
    write(dir.path(), "env=prod/a.yaml", "x: a\n");
    write(dir.path(), "env=prod/b.yaml", "x: b\n");

    let document = process(dir.path(), "env=prod");
    assert_eq!(document, json!({"x": "b", "keep": 1}));
}

#[test]
fn test_deeper_levels_override_shallower() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "default.yaml", "replicas: 1\nserver:\n  host: localhost\n  port: 80\n");
    write(dir.path(), "env=dev/env.yaml", "replicas: 2\n");
    write(dir.path(), "env=dev/region=eu/region.yaml", "server:\n  port: 8080\n");

    let document = process(dir.path(), "env=dev/region=eu");
    assert_eq!(
        document,
        json!({"replicas": 2, "server": {"host": "localhost", "port": 8080}})
    );
}

#[test]
fn test_file_target_uses_its_directory() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "default.yaml", "a: root\n");
    write(dir.path(), "env=dev/one.yaml", "a: one\n");
    write(dir.path(), "env=dev/two.yaml", "b: two\n");

    let document = process(dir.path(), "env=dev/one.yaml");
    assert_eq!(document, json!({"a": "one", "b": "two"}));
}

#[test]
fn test_missing_target_and_empty_hierarchy() {
    let dir = TempDir::new().unwrap();
    let err = processor()
        .process(&ProcessOptions::new("nope").with_cwd(dir.path()))
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::PathNotFound);

    fs::create_dir_all(dir.path().join("env=dev")).unwrap();
    write(dir.path(), "env=dev/notes.txt", "not yaml");
    let err = processor()
        .process(&ProcessOptions::new("env=dev").with_cwd(dir.path()))
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NoYamlFilesFound);
    assert_eq!(err.category(), ErrorCategory::Structural);
}

#[test]
fn test_type_conflict_names_key() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "default.yaml", "x:\n  a: 1\n");
    write(dir.path(), "env=dev/env.yaml", "x: [1, 2]\n");

    let err = processor()
        .process(&ProcessOptions::new("env=dev").with_cwd(dir.path()))
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::TypeConflict);
    assert_eq!(err.key.as_deref(), Some("x"));
    assert!(err.message.contains("map"));
    assert!(err.message.contains("list"));
}

#[test]
fn test_list_strategies() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "default.yaml", "zones: [a, b]\n");
    write(dir.path(), "env=dev/env.yaml", "zones: [b, c]\n");

    let run = |strategy: ListStrategy| {
        let options = ProcessOptions::new("env=dev")
            .with_cwd(dir.path())
            .with_strategies(MergeStrategies::default().with_list_strategies(vec![strategy]));
        processor().process(&options).unwrap()["zones"].clone()
    };

    assert_eq!(run(ListStrategy::Append), json!(["a", "b", "b", "c"]));
    assert_eq!(run(ListStrategy::Override), json!(["b", "c"]));
    assert_eq!(run(ListStrategy::Prepend), json!(["b", "c", "a", "b"]));
    assert_eq!(run(ListStrategy::AppendUnique), json!(["a", "b", "c"]));
}

#[test]
fn test_full_vs_embedded_interpolation() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "default.yaml", "a:\n  b: 5\nc: \"{{a.b}}\"\nd: \"val-{{a.b}}\"\n");

    let document = process(dir.path(), ".");
    assert_eq!(document["c"], json!(5));
    assert_eq!(document["d"], json!("val-5"));
}

#[test]
fn test_escaped_reference_becomes_literal() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "default.yaml",
        "x: real\nlit: \"{{`x`}}\"\ntemplate: \"Hello {{`{{user}}`}}\"\n",
    );

    let document = process(dir.path(), ".");
    assert_eq!(document["lit"], json!("x"));
    assert_eq!(document["template"], json!("Hello {{user}}"));
}

#[test]
fn test_unresolved_reference() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "default.yaml", "a: \"{{missing.key}}\"\n");

    let options = ProcessOptions::new(".").with_cwd(dir.path());
    let err = processor().process(&options).unwrap_err();
    assert_eq!(err.code, ErrorCode::UnresolvedInterpolation);
    assert!(err.message.contains("{{missing.key}}"));

    let document = processor()
        .process(&options.skip_interpolation_validation(true))
        .unwrap();
    assert_eq!(document["a"], json!("{{missing.key}}"));
}

#[test]
fn test_skip_interpolations_keeps_everything_literal() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "default.yaml", "a: 1\nb: \"{{a}}\"\nc: \"{{env(HOME)}}\"\n");

    let options = ProcessOptions::new(".").with_cwd(dir.path()).skip_interpolations(true);
    let document = processor().process(&options).unwrap();
    assert_eq!(document, json!({"a": 1, "b": "{{a}}", "c": "{{env(HOME)}}"}));
}

#[test]
fn test_env_embedding_and_unset_variables() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "default.yaml",
        "cfg: \"{{env(HOME)}}/cfg\"\nhome: \"{{ env(HOME) }}\"\nunset: \"{{env(STRATA_UNSET)}}\"\nempty: \"x{{env(STRATA_UNSET)}}y\"\n",
    );

    let document = process(dir.path(), ".");
    assert_eq!(document["cfg"], json!("/home/u/cfg"));
    assert_eq!(document["home"], json!("/home/u"));
    assert_eq!(document["unset"], Value::Null);
    assert_eq!(document["empty"], json!("xy"));
}

#[test]
fn test_env_value_feeds_self_references() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "default.yaml",
        "home: \"{{env(HOME)}}\"\nconfig_dir: \"{{home}}/.config\"\n",
    );

    let document = process(dir.path(), ".");
    assert_eq!(document["config_dir"], json!("/home/u/.config"));
}

#[test]
fn test_chain_deeper_than_pass_count_fails_validation() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "default.yaml",
        "a: v\nb: \"{{a}}-b\"\nc: \"{{b}}-c\"\nd: \"{{c}}-d\"\ne: \"{{d}}-e\"\nf: \"{{e}}-f\"\ng: \"{{f}}-g\"\n",
    );

    let options = ProcessOptions::new(".").with_cwd(dir.path());
    let err = processor().process(&options).unwrap_err();
    assert_eq!(err.code, ErrorCode::UnresolvedInterpolation);
    assert_eq!(err.key.as_deref(), Some("g"));

    let with_provider = processor().with_dynamic_source(strata::dynamic::TerraformStateProvider::new());
    let err = with_provider.process(&options).unwrap_err();
    assert_eq!(err.key.as_deref(), Some("g"));
}

#[test]
fn test_embedded_chain_within_pass_count_resolves() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "default.yaml",
        "a: v\nb: \"{{a}}-b\"\nc: \"{{b}}-c\"\nd: \"{{c}}-d\"\ne: \"{{d}}-e\"\nf: \"{{e}}-f\"\n",
    );

    let document = process(dir.path(), ".");
    assert_eq!(document["f"], json!("v-b-c-d-e-f"));
}

#[test]
fn test_full_value_chain_resolves_regardless_of_length() {
    let dir = TempDir::new().unwrap();
    let mut content = String::from("k0: v\n");
    for i in 1..=8 {
        content.push_str(&format!("k{}: \"{{{{k{}}}}}\"\n", i, i - 1));
    }
    write(dir.path(), "default.yaml", &content);

    let document = process(dir.path(), ".");
    assert_eq!(document["k8"], json!("v"));
}

#[test]
fn test_filter_and_exclude() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "default.yaml", "a: 1\nb: 2\n");

    let filtered = processor()
        .process(&ProcessOptions::new(".").with_cwd(dir.path()).with_filters(["a"]))
        .unwrap();
    assert_eq!(filtered, json!({"a": 1}));

    let excluded = processor()
        .process(&ProcessOptions::new(".").with_cwd(dir.path()).with_exclude_keys(["b"]))
        .unwrap();
    assert_eq!(excluded, json!({"a": 1}));
}

#[test]
fn test_enclosing_keys() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "default.yaml", "outer:\n  a: 1\n");

    let added = processor()
        .process(
            &ProcessOptions::new(".")
                .with_cwd(dir.path())
                .with_enclosure(Enclosure::Add("wrap".to_string())),
        )
        .unwrap();
    assert_eq!(added, json!({"wrap": {"outer": {"a": 1}}}));

    let removed = processor()
        .process(
            &ProcessOptions::new(".")
                .with_cwd(dir.path())
                .with_enclosure(Enclosure::Remove("outer".to_string())),
        )
        .unwrap();
    assert_eq!(removed, json!({"a": 1}));

    let err = processor()
        .process(
            &ProcessOptions::new(".")
                .with_cwd(dir.path())
                .with_enclosure(Enclosure::Remove("missing".to_string())),
        )
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::EnclosingKeyNotFound);
}

#[test]
fn test_render_json_and_yaml() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "default.yaml", "name: app\nports: [80, 443]\n");

    let json = processor()
        .render(
            &ProcessOptions::new(".").with_cwd(dir.path()).with_output(OutputOptions {
                format: OutputFormat::Json,
                ..OutputOptions::default()
            }),
        )
        .unwrap();
    assert_eq!(
        json,
        "{\n    \"name\": \"app\",\n    \"ports\": [\n        80,\n        443\n    ]\n}\n"
    );

    let yaml = processor()
        .render(&ProcessOptions::new(".").with_cwd(dir.path()))
        .unwrap();
    assert_eq!(yaml, "name: app\nports:\n- 80\n- 443\n");
}

#[test]
fn test_cwd_token_is_fragment_directory() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "env=dev/env.yaml", "script: \"{{cwd}}/run.sh\"\n");

    let document = process(dir.path(), "env=dev");
    let expected = format!("{}/run.sh", dir.path().join("env=dev").display());
    assert_eq!(document["script"], json!(expected));
}

#[test]
fn test_remote_state_outputs_are_merged() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "state/network.tfstate",
        r#"{"version": 4, "outputs": {"vpc_id": {"value": "vpc-123"}}}"#,
    );
    write(
        dir.path(),
        "default.yaml",
        "remote_states:\n  - name: network\n    backend_type: local\n    path: state/network.tfstate\nvpc: \"{{outputs.network.vpc_id.value}}\"\n",
    );

    let processor = processor().with_dynamic_source(strata::dynamic::TerraformStateProvider::new());
    let document = processor
        .process(&ProcessOptions::new(".").with_cwd(dir.path()))
        .unwrap();
    assert_eq!(document["vpc"], json!("vpc-123"));
}
