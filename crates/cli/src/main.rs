#![forbid(unsafe_code)]

mod error;
mod render;
mod script;
mod session;
mod telemetry;

use cf_core::actions::{
    NewNode, NodeChanges, add_nodes, delete_instances, move_instance, paste_as_clone,
    toggle_starred, update_node,
};
use cf_core::config::DEFAULT_HISTORY_LIMIT;
use cf_core::{ApplyMode, EngineConfig, InstanceRef, NodeData, NodeId, ParentRef, TemplateId, TreeId};
use clap::{ArgAction, Args, Parser, Subcommand};
use error::CliError;
use render::OutcomeLine;
use serde_json::Value;
use session::{Session, SessionConfig};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "cloneforest",
    version,
    about = "Edit a tree whose nodes can sit under several parents",
    arg_required_else_help = true
)]
struct Cli {
    /// Directory holding the SQLite database.
    #[arg(
        long,
        global = true,
        env = "CF_STORAGE_DIR",
        value_name = "DIR",
        default_value = ".cloneforest"
    )]
    storage_dir: PathBuf,

    /// Tree to open.
    #[arg(long, global = true, env = "CF_TREE", default_value = "default")]
    tree: String,

    /// Undo depth kept for this session.
    #[arg(long, global = true, env = "CF_HISTORY_LIMIT", default_value_t = DEFAULT_HISTORY_LIMIT)]
    history_limit: usize,

    /// `optimistic` (persist in the background) or `write-through`.
    #[arg(
        long,
        global = true,
        env = "CF_APPLY_MODE",
        default_value = "optimistic",
        value_parser = parse_apply_mode
    )]
    apply_mode: ApplyMode,

    /// More log output (repeat for more). `CF_LOG` takes precedence.
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the instance tree.
    Show(ShowArgs),
    /// Create a node under a parent.
    Add(AddArgs),
    /// Delete one instance of a node.
    #[command(alias = "rm")]
    Delete(InstanceArgs),
    /// Move an instance to another parent or position.
    #[command(alias = "mv")]
    Move(MoveArgs),
    /// Link an existing node under one more parent.
    Clone(CloneArgs),
    /// Toggle the starred flag of nodes.
    Star(StarArgs),
    /// Rename a node.
    Rename(RenameArgs),
    /// Write load-time repairs back and resequence every sibling set.
    Repair,
    /// Run a YAML or JSON edit script.
    Script(ScriptArgs),
}

#[derive(Args, Debug)]
struct ShowArgs {
    /// Flat node records as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct AddArgs {
    name: String,
    #[arg(long, default_value = "root")]
    parent: String,
    #[arg(long)]
    position: Option<u32>,
    #[arg(long, default_value = "default")]
    template: String,
    /// Explicit id; a random one is generated otherwise.
    #[arg(long)]
    id: Option<String>,
    /// `KEY=VALUE`; the value is read as JSON when it parses, else as text.
    #[arg(long = "field", value_name = "KEY=VALUE", value_parser = parse_field)]
    fields: Vec<(String, Value)>,
}

#[derive(Args, Debug)]
struct InstanceArgs {
    node: String,
    #[arg(long, default_value = "root")]
    parent: String,
}

#[derive(Args, Debug)]
struct MoveArgs {
    node: String,
    #[arg(long, default_value = "root")]
    from: String,
    #[arg(long)]
    to: String,
    #[arg(long)]
    position: Option<u32>,
}

#[derive(Args, Debug)]
struct CloneArgs {
    node: String,
    #[arg(long)]
    to: String,
    #[arg(long)]
    position: Option<u32>,
}

#[derive(Args, Debug)]
struct StarArgs {
    #[arg(required = true)]
    nodes: Vec<String>,
}

#[derive(Args, Debug)]
struct RenameArgs {
    node: String,
    name: String,
}

#[derive(Args, Debug)]
struct ScriptArgs {
    file: PathBuf,
    /// Report steps and outcomes as JSON.
    #[arg(long)]
    json: bool,
}

fn parse_apply_mode(raw: &str) -> Result<ApplyMode, String> {
    ApplyMode::parse(raw).ok_or_else(|| format!("unknown apply mode {raw:?}"))
}

fn parse_field(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("field key must not be empty".to_string());
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn node_id(raw: &str) -> Result<NodeId, CliError> {
    Ok(NodeId::try_new(raw)?)
}

fn parent_ref(raw: &str) -> Result<ParentRef, CliError> {
    Ok(ParentRef::parse(raw)?)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init(cli.verbose);
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let config = SessionConfig {
        storage_dir: cli.storage_dir,
        tree: TreeId::try_new(cli.tree)?,
        engine: EngineConfig {
            history_limit: cli.history_limit,
            apply_mode: cli.apply_mode,
        },
    };
    let mut session = Session::open(&config)?;
    if !session.report().is_clean() {
        eprintln!(
            "warning: stored records needed repair on load; run `cloneforest repair` to persist it"
        );
    }

    let script_json = match cli.command {
        Commands::Show(args) => {
            let forest = session.forest();
            if args.json {
                println!("{}", render::tree_json(&forest)?);
            } else {
                print!("{}", render::tree_text(&forest));
            }
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Script(args) => {
            let steps = script::load(&args.file)?;
            let reports = script::run(&mut session, steps)?;
            if args.json {
                Some(reports)
            } else {
                for report in &reports {
                    let state = if report.applied { "ok" } else { "skipped" };
                    println!("step {} {}: {state}", report.index, report.op);
                }
                None
            }
        }
        Commands::Repair => {
            let summary = session.repair()?;
            println!(
                "rewritten {} deleted {} resequenced {}",
                summary.rewritten, summary.deleted, summary.resequenced
            );
            None
        }
        command => {
            run_edit(&mut session, command)?;
            None
        }
    };

    let outcomes: Vec<OutcomeLine> = session.finish().iter().map(OutcomeLine::from).collect();
    let failed = outcomes.iter().filter(|line| !line.is_ok()).count();
    match script_json {
        Some(steps) => {
            let report = serde_json::json!({ "steps": steps, "outcomes": outcomes });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        None => {
            for line in &outcomes {
                println!("{line}");
            }
        }
    }
    if failed > 0 {
        return Err(CliError::PersistFailed(failed));
    }
    Ok(ExitCode::SUCCESS)
}

fn run_edit(session: &mut Session, command: Commands) -> Result<(), CliError> {
    let forest = session.forest();
    let mut created = None;
    let built = match command {
        Commands::Add(args) => {
            let template = TemplateId::try_new(args.template)?;
            let mut node = match args.id {
                Some(id) => NewNode::with_id(node_id(&id)?, template, args.name),
                None => NewNode::new(template, args.name),
            };
            node.data = args.fields.into_iter().collect::<NodeData>();
            created = Some(node.id.clone());
            add_nodes(&forest, &parent_ref(&args.parent)?, vec![node], args.position)
        }
        Commands::Delete(args) => delete_instances(
            &forest,
            &[InstanceRef::new(node_id(&args.node)?, parent_ref(&args.parent)?)],
        ),
        Commands::Move(args) => move_instance(
            &forest,
            &node_id(&args.node)?,
            &parent_ref(&args.from)?,
            &parent_ref(&args.to)?,
            args.position,
        ),
        Commands::Clone(args) => paste_as_clone(
            &forest,
            &node_id(&args.node)?,
            &parent_ref(&args.to)?,
            args.position,
        ),
        Commands::Star(args) => {
            let ids = args
                .nodes
                .iter()
                .map(|raw| node_id(raw))
                .collect::<Result<Vec<_>, _>>()?;
            toggle_starred(&forest, &ids)
        }
        Commands::Rename(args) => {
            update_node(&forest, &node_id(&args.node)?, NodeChanges::rename(args.name))
        }
        Commands::Show(_) | Commands::Repair | Commands::Script(_) => return Ok(()),
    };
    session.apply(built)?;
    if let Some(id) = created {
        println!("{id}");
    }
    Ok(())
}

#[cfg(test)]
mod tests;
