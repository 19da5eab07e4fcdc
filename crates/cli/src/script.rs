#![forbid(unsafe_code)]

//! Edit scripts: a YAML or JSON list of steps run in one session.
//!
//! ```yaml
//! - op: template
//!   id: task
//!   name: Task
//!   nameRule: "{Title}"
//! - op: add
//!   nodes:
//!     - { id: a, template: task, name: A }
//! - op: clone
//!   node: a
//!   to: b
//! - op: undo
//! ```

use crate::error::CliError;
use crate::session::Session;
use cf_core::actions::{
    NewNode, NodeChanges, add_nodes, batch_retemplate, batch_update_data, delete_instances,
    move_instance, paste_as_clone, propagate_template_names, toggle_starred, update_node,
};
use cf_core::{InstanceRef, NodeData, NodeId, ParentRef, Template, TemplateId};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn root() -> ParentRef {
    ParentRef::Root
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct NodeEntry {
    #[serde(default)]
    pub id: Option<NodeId>,
    pub template: TemplateId,
    pub name: String,
    #[serde(default)]
    pub fields: NodeData,
    #[serde(default)]
    pub starred: bool,
}

impl NodeEntry {
    fn into_new_node(self) -> NewNode {
        let mut node = match self.id {
            Some(id) => NewNode::with_id(id, self.template, self.name),
            None => NewNode::new(self.template, self.name),
        };
        node.data = self.fields;
        node.starred = self.starred;
        node
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct TargetEntry {
    pub node: NodeId,
    #[serde(default = "root")]
    pub parent: ParentRef,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Step {
    Template(Template),
    Add {
        #[serde(default = "root")]
        parent: ParentRef,
        nodes: Vec<NodeEntry>,
        #[serde(default)]
        position: Option<u32>,
    },
    Update {
        node: NodeId,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        template: Option<TemplateId>,
        #[serde(default)]
        fields: NodeData,
        #[serde(default)]
        remove_fields: Vec<String>,
        #[serde(default)]
        starred: Option<bool>,
    },
    Delete {
        targets: Vec<TargetEntry>,
    },
    Move {
        node: NodeId,
        #[serde(default = "root")]
        from: ParentRef,
        to: ParentRef,
        #[serde(default)]
        position: Option<u32>,
    },
    Clone {
        node: NodeId,
        to: ParentRef,
        #[serde(default)]
        position: Option<u32>,
    },
    Star {
        nodes: Vec<NodeId>,
    },
    SetData {
        nodes: Vec<NodeId>,
        fields: NodeData,
    },
    Retemplate {
        nodes: Vec<NodeId>,
        template: TemplateId,
    },
    RenameAll {
        template: TemplateId,
    },
    Undo,
    Redo,
}

impl Step {
    pub fn op(&self) -> &'static str {
        match self {
            Self::Template(_) => "template",
            Self::Add { .. } => "add",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::Move { .. } => "move",
            Self::Clone { .. } => "clone",
            Self::Star { .. } => "star",
            Self::SetData { .. } => "set-data",
            Self::Retemplate { .. } => "retemplate",
            Self::RenameAll { .. } => "rename-all",
            Self::Undo => "undo",
            Self::Redo => "redo",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub op: &'static str,
    /// `false` when the step changed nothing (no-op edit, empty history).
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

/// Parses `text`; `.json` files are read as JSON, anything else as YAML.
pub fn parse(path: &Path, text: &str) -> Result<Vec<Step>, CliError> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let parsed = if is_json {
        serde_json::from_str(text).map_err(|err| err.to_string())
    } else {
        serde_yaml::from_str(text).map_err(|err| err.to_string())
    };
    parsed.map_err(|message| CliError::Script {
        path: path.to_path_buf(),
        message,
    })
}

pub fn load(path: &Path) -> Result<Vec<Step>, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(path, &text)
}

/// Runs `steps` in order and stops at the first failing one.
pub fn run(session: &mut Session, steps: Vec<Step>) -> Result<Vec<StepReport>, CliError> {
    let mut reports = Vec::with_capacity(steps.len());
    for (index, step) in steps.into_iter().enumerate() {
        let op = step.op();
        let report = run_step(session, step)
            .map(|(applied, seq)| StepReport {
                index,
                op,
                applied,
                seq,
            })
            .map_err(|err| CliError::Step {
                index,
                op,
                source: Box::new(err),
            })?;
        reports.push(report);
    }
    Ok(reports)
}

fn edited(seq: Option<u64>) -> (bool, Option<u64>) {
    (seq.is_some(), seq)
}

fn run_step(session: &mut Session, step: Step) -> Result<(bool, Option<u64>), CliError> {
    let forest = session.forest();
    match step {
        Step::Template(template) => {
            session.put_template(template)?;
            Ok((true, None))
        }
        Step::Add {
            parent,
            nodes,
            position,
        } => {
            let nodes = nodes.into_iter().map(NodeEntry::into_new_node).collect();
            session.apply(add_nodes(&forest, &parent, nodes, position)).map(edited)
        }
        Step::Update {
            node,
            name,
            template,
            fields,
            remove_fields,
            starred,
        } => {
            let changes = NodeChanges {
                name,
                template_id: template,
                fields,
                remove_fields,
                starred,
            };
            session.apply(update_node(&forest, &node, changes)).map(edited)
        }
        Step::Delete { targets } => {
            let targets: Vec<InstanceRef> = targets
                .into_iter()
                .map(|target| InstanceRef::new(target.node, target.parent))
                .collect();
            session.apply(delete_instances(&forest, &targets)).map(edited)
        }
        Step::Move {
            node,
            from,
            to,
            position,
        } => session
            .apply(move_instance(&forest, &node, &from, &to, position))
            .map(edited),
        Step::Clone { node, to, position } => session
            .apply(paste_as_clone(&forest, &node, &to, position))
            .map(edited),
        Step::Star { nodes } => session.apply(toggle_starred(&forest, &nodes)).map(edited),
        Step::SetData { nodes, fields } => session
            .apply(batch_update_data(&forest, &nodes, &fields))
            .map(edited),
        Step::Retemplate { nodes, template } => {
            let built = batch_retemplate(&forest, &nodes, session.templates(), &template);
            session.apply(built).map(edited)
        }
        Step::RenameAll { template } => {
            let template = session
                .templates()
                .get(&template)
                .cloned()
                .ok_or_else(|| CliError::UnknownTemplate(template.to_string()))?;
            session
                .apply(propagate_template_names(&forest, &template))
                .map(edited)
        }
        Step::Undo => session.undo().map(|done| (done, None)),
        Step::Redo => session.redo().map(|done| (done, None)),
    }
}
