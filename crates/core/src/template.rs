#![forbid(unsafe_code)]

use crate::ids::TemplateId;
use crate::node::NodeData;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Number,
    Checkbox,
    Date,
    List,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Checkbox => "checkbox",
            Self::Date => "date",
            Self::List => "list",
        }
    }

    pub fn empty_value(self) -> Value {
        match self {
            Self::Text | Self::Date => Value::String(String::new()),
            Self::Number => Value::Null,
            Self::Checkbox => Value::Bool(false),
            Self::List => Value::Array(Vec::new()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemplateField {
    pub id: String,
    pub name: String,
    pub kind: FieldKind,
}

/// Node payload keys are field ids of the node's template.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    #[serde(default)]
    pub fields: Vec<TemplateField>,
    /// Name generation rule with `{Field Name}` placeholders.
    #[serde(default)]
    pub name_rule: Option<String>,
}

impl Template {
    pub fn new(id: TemplateId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            fields: Vec::new(),
            name_rule: None,
        }
    }

    pub fn with_field(mut self, id: &str, name: &str, kind: FieldKind) -> Self {
        self.fields.push(TemplateField {
            id: id.to_string(),
            name: name.to_string(),
            kind,
        });
        self
    }

    pub fn with_name_rule(mut self, rule: impl Into<String>) -> Self {
        self.name_rule = Some(rule.into());
        self
    }

    pub fn field_by_name(&self, name: &str) -> Option<&TemplateField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_by_id(&self, id: &str) -> Option<&TemplateField> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Renders `name_rule` against `data`. `None` when the template has no rule.
    pub fn render_name(&self, data: &NodeData) -> Option<String> {
        let rule = self.name_rule.as_deref()?;
        let mut out = String::with_capacity(rule.len());
        let mut rest = rule;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            };
            let placeholder = &after[..end];
            match self.field_by_name(placeholder) {
                Some(field) => out.push_str(&display_value(data.get(&field.id))),
                None => {
                    out.push('{');
                    out.push_str(placeholder);
                    out.push('}');
                }
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Some(out.trim().to_string())
    }
}

fn display_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| display_value(Some(item)))
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
    }
}

/// Moves a payload from `old` to `new` by matching field names. Old fields with
/// no same-named counterpart are dropped; unmatched new fields start empty.
pub fn remap_data(old: &Template, new: &Template, data: &NodeData) -> NodeData {
    let mut out = NodeData::new();
    for field in &new.fields {
        let carried = old
            .field_by_name(&field.name)
            .and_then(|old_field| data.get(&old_field.id))
            .cloned();
        out.insert(
            field.id.clone(),
            carried.unwrap_or_else(|| field.kind.empty_value()),
        );
    }
    out
}

#[derive(Clone, Debug, Default)]
pub struct TemplateSet {
    templates: BTreeMap<TemplateId, Template>,
}

impl TemplateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, template: Template) -> Option<Template> {
        self.templates.insert(template.id.clone(), template)
    }

    pub fn get(&self, id: &TemplateId) -> Option<&Template> {
        self.templates.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.values()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl FromIterator<Template> for TemplateSet {
    fn from_iter<I: IntoIterator<Item = Template>>(iter: I) -> Self {
        let mut set = Self::new();
        for template in iter {
            set.insert(template);
        }
        set
    }
}

#[cfg(test)]
mod tests;
