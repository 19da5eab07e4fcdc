#![forbid(unsafe_code)]

use super::*;
use serde_json::json;

fn tid(value: &str) -> TemplateId {
    TemplateId::try_new(value).unwrap()
}

fn task_template() -> Template {
    Template::new(tid("task"), "Task")
        .with_field("f1", "Title", FieldKind::Text)
        .with_field("f2", "Due", FieldKind::Date)
        .with_field("f3", "Done", FieldKind::Checkbox)
        .with_name_rule("{Title} ({Due})")
}

#[test]
fn render_name_substitutes_fields_by_name() {
    let template = task_template();
    let mut data = NodeData::new();
    data.insert("f1".to_string(), json!("Ship it"));
    data.insert("f2".to_string(), json!("2026-10-18"));
    assert_eq!(
        template.render_name(&data).as_deref(),
        Some("Ship it (2026-10-18)")
    );
}

#[test]
fn render_name_keeps_unknown_placeholders_and_blanks_missing_values() {
    let template = Template::new(tid("t"), "T")
        .with_field("a", "A", FieldKind::Number)
        .with_name_rule("{A}-{Nope}-{");
    let data = NodeData::new();
    assert_eq!(template.render_name(&data).as_deref(), Some("-{Nope}-{"));
    assert_eq!(Template::new(tid("plain"), "P").render_name(&data), None);
}

#[test]
fn remap_matches_by_name_and_drops_the_rest() {
    let old = task_template();
    let new = Template::new(tid("bug"), "Bug")
        .with_field("b1", "Title", FieldKind::Text)
        .with_field("b2", "Severity", FieldKind::Number)
        .with_field("b3", "Tags", FieldKind::List);

    let mut data = NodeData::new();
    data.insert("f1".to_string(), json!("Crash"));
    data.insert("f3".to_string(), json!(true));
    data.insert("stray".to_string(), json!(1));

    let out = remap_data(&old, &new, &data);
    assert_eq!(out.len(), 3);
    assert_eq!(out["b1"], json!("Crash"));
    assert_eq!(out["b2"], Value::Null);
    assert_eq!(out["b3"], json!([]));
}
