#![forbid(unsafe_code)]

use super::*;
use cf_core::NodeStore;
use cf_storage::SqliteNodeStore;
use clap::CommandFactory;
use serde_json::json;
use std::path::Path;

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let dir = base.join(format!("cf_cli_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn config(dir: &Path) -> SessionConfig {
    SessionConfig {
        storage_dir: dir.to_path_buf(),
        tree: TreeId::try_new("cli").expect("tree id"),
        engine: EngineConfig::default(),
    }
}

fn id(value: &str) -> NodeId {
    NodeId::try_new(value).expect("node id")
}

const SCRIPT: &str = r#"
- op: template
  id: task
  name: Task
  fields:
    - { id: f1, name: Title, kind: text }
  nameRule: "Task {Title}"
- op: add
  nodes:
    - { id: a, template: task, name: A }
    - { id: b, template: task, name: B }
- op: add
  parent: a
  nodes:
    - { id: c, template: task, name: C }
- op: clone
  node: c
  to: b
- op: set-data
  nodes: [a, c]
  fields: { f1: hello }
- op: rename-all
  template: task
- op: star
  nodes: [c]
- op: undo
- op: redo
- op: undo
"#;

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn add_flags_parse_fields_as_json_or_text() {
    let cli = Cli::try_parse_from([
        "cloneforest",
        "--tree",
        "t1",
        "--apply-mode",
        "write-through",
        "add",
        "Hello",
        "--parent",
        "p",
        "--field",
        "n=3",
        "--field",
        "s=plain text",
    ])
    .expect("parse");
    assert_eq!(cli.tree, "t1");
    assert_eq!(cli.apply_mode, ApplyMode::WriteThrough);
    let Commands::Add(args) = cli.command else {
        panic!("expected add");
    };
    assert_eq!(args.parent, "p");
    assert_eq!(
        args.fields,
        vec![
            ("n".to_string(), json!(3)),
            ("s".to_string(), json!("plain text")),
        ]
    );
}

#[test]
fn malformed_flags_are_rejected() {
    assert!(parse_field("novalue").is_err());
    assert!(parse_field("=1").is_err());
    assert!(parse_apply_mode("eventually").is_err());
    assert_eq!(parse_apply_mode("write_through"), Ok(ApplyMode::WriteThrough));
}

#[test]
fn script_parses_yaml_and_json() {
    let steps = script::parse(Path::new("edits.yaml"), SCRIPT).expect("yaml");
    assert_eq!(steps.len(), 10);
    assert_eq!(steps[3].op(), "clone");
    assert!(matches!(steps[9], script::Step::Undo));

    let steps = script::parse(
        Path::new("edits.json"),
        r#"[{"op":"move","node":"a","to":"b","position":0},{"op":"redo"}]"#,
    )
    .expect("json");
    assert_eq!(
        steps[0],
        script::Step::Move {
            node: id("a"),
            from: ParentRef::Root,
            to: ParentRef::Node(id("b")),
            position: Some(0),
        }
    );

    let err = script::parse(Path::new("bad.yaml"), "- op: explode").expect_err("unknown op");
    assert!(matches!(err, CliError::Script { .. }), "{err:?}");
}

#[test]
fn script_session_persists_and_reloads() {
    let dir = temp_dir("script_session_persists_and_reloads");
    let mut session = Session::open(&config(&dir)).expect("open session");
    let steps = script::parse(Path::new("edits.yaml"), SCRIPT).expect("parse");
    let reports = script::run(&mut session, steps).expect("run");
    assert!(reports.iter().all(|report| report.applied), "{reports:?}");

    let forest = session.forest();
    let c = forest.node(&id("c")).expect("c");
    assert_eq!(c.name, "Task hello");
    assert!(c.is_clone());
    assert!(!c.starred);
    assert_eq!(forest.node(&id("b")).map(|b| b.name.as_str()), Some("Task"));

    let text = render::tree_text(&forest);
    assert_eq!(text.matches("(clone x2)").count(), 2, "{text}");

    let expected = (*forest).clone();
    drop(forest);
    let outcomes = session.finish();
    assert!(outcomes.iter().all(|outcome| outcome.is_ok()), "{outcomes:?}");

    let reopened = Session::open(&config(&dir)).expect("reopen");
    assert_eq!(*reopened.forest(), expected);
    assert!(reopened.report().is_clean());
    assert!(
        reopened
            .templates()
            .get(&TemplateId::try_new("task").expect("template id"))
            .is_some()
    );
}

#[test]
fn failing_step_reports_its_index() {
    let dir = temp_dir("failing_step_reports_its_index");
    let mut session = Session::open(&config(&dir)).expect("open session");
    let steps = script::parse(
        Path::new("edits.yaml"),
        "- op: add\n  nodes: [{ id: a, template: task, name: A }]\n- op: delete\n  targets: [{ node: ghost }]\n",
    )
    .expect("parse");
    let err = script::run(&mut session, steps).expect_err("missing node");
    assert!(matches!(err, CliError::Step { index: 1, op: "delete", .. }), "{err:?}");
}

#[test]
fn repair_persists_load_time_fixes() {
    let dir = temp_dir("repair_persists_load_time_fixes");
    let cfg = config(&dir);
    {
        let mut store = SqliteNodeStore::open(&dir).expect("open store");
        let template = TemplateId::try_new("task").expect("template id");
        let nodes = vec![
            cf_core::Node::new(id("x"), template.clone(), "x").with_parent(ParentRef::Root, 0),
            cf_core::Node::new(id("y"), template.clone(), "y").with_parent(ParentRef::Root, 5),
            cf_core::Node::new(id("orphan"), template, "orphan")
                .with_parent(ParentRef::Node(id("ghost")), 0),
        ];
        store
            .batch_create_nodes(&cfg.tree, &nodes, None)
            .expect("seed");
    }

    let mut session = Session::open(&cfg).expect("open session");
    assert!(!session.report().is_clean());
    let summary = session.repair().expect("repair");
    assert_eq!(summary.deleted, 1);
    assert_eq!(summary.resequenced, 1);
    let outcomes = session.finish();
    assert!(outcomes.iter().all(|outcome| outcome.is_ok()), "{outcomes:?}");

    let mut store = SqliteNodeStore::open(&dir).expect("reopen store");
    let stored = store.fetch_nodes(&cfg.tree).expect("fetch");
    assert_eq!(stored.len(), 2);
    let y = stored.iter().find(|node| node.id == id("y")).expect("y");
    assert_eq!(y.order, vec![1]);
}

#[test]
fn timestamps_render_as_rfc3339() {
    assert_eq!(render::format_ms(0), "1970-01-01T00:00:00Z");
}
