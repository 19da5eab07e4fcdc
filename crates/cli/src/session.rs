#![forbid(unsafe_code)]

use crate::error::CliError;
use cf_core::actions::resequence_parent;
use cf_core::persist::DeleteTarget;
use cf_core::{
    BuildError, Command, EngineConfig, Executor, Forest, NodeStore, NodeUpdate, PersistOutcome,
    ReconstructReport, Template, TemplateSet, TreeId,
};
use cf_storage::SqliteNodeStore;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub storage_dir: PathBuf,
    pub tree: TreeId,
    pub engine: EngineConfig,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RepairSummary {
    pub rewritten: usize,
    pub deleted: usize,
    pub resequenced: usize,
}

/// One open tree: the executor owns the write connection, `catalog` is a
/// second connection for templates and out-of-band repairs.
pub struct Session {
    tree: TreeId,
    executor: Executor,
    catalog: SqliteNodeStore,
    templates: TemplateSet,
    report: ReconstructReport,
}

impl Session {
    pub fn open(config: &SessionConfig) -> Result<Self, CliError> {
        let mut store = SqliteNodeStore::open(&config.storage_dir)?;
        let nodes = store.fetch_nodes(&config.tree)?;
        let (forest, report) = Forest::reconstruct_with_report(config.tree.clone(), nodes)?;

        let catalog = SqliteNodeStore::open(&config.storage_dir)?;
        let templates = catalog.fetch_templates(&config.tree)?.into_iter().collect();

        tracing::debug!(
            tree = %config.tree,
            nodes = forest.len(),
            instances = forest.instance_count(),
            mode = config.engine.apply_mode.as_str(),
            "session opened"
        );
        let executor = Executor::new(forest, Box::new(store), config.engine.clone())?;
        Ok(Self {
            tree: config.tree.clone(),
            executor,
            catalog,
            templates,
            report,
        })
    }

    pub fn forest(&self) -> Arc<Forest> {
        self.executor.forest()
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    /// Repairs applied in memory when the stored records were loaded.
    pub fn report(&self) -> &ReconstructReport {
        &self.report
    }

    /// Runs a built command. A builder that found nothing to change is not an
    /// error; the edit is skipped and `None` returned.
    pub fn apply(&mut self, built: Result<Command, BuildError>) -> Result<Option<u64>, CliError> {
        match built {
            Ok(command) => {
                let kind = command.kind();
                let seq = self.executor.execute_command(command)?;
                tracing::debug!(kind = kind.as_str(), seq, "command applied");
                Ok(Some(seq))
            }
            Err(BuildError::NoChanges) => {
                tracing::info!("edit changes nothing; skipped");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn undo(&mut self) -> Result<bool, CliError> {
        Ok(self.executor.undo()?)
    }

    pub fn redo(&mut self) -> Result<bool, CliError> {
        Ok(self.executor.redo()?)
    }

    pub fn put_template(&mut self, template: Template) -> Result<(), CliError> {
        self.catalog.put_template(&self.tree, &template)?;
        self.templates.insert(template);
        Ok(())
    }

    /// Writes the load-time repairs back to storage, then resequences every
    /// parent context through the executor.
    pub fn repair(&mut self) -> Result<RepairSummary, CliError> {
        let mut summary = RepairSummary::default();
        self.executor.flush();
        let forest = self.executor.forest();

        if !self.report.excised.is_empty() {
            let targets: Vec<DeleteTarget> = self
                .report
                .excised
                .iter()
                .map(|id| DeleteTarget {
                    node_id: id.clone(),
                    parent_to_unlink: None,
                })
                .collect();
            let deleted = self.catalog.batch_delete_nodes(&self.tree, &targets, None)?;
            summary.deleted = deleted.deleted_ids.len();
        }

        let touched: BTreeSet<_> = self
            .report
            .normalized
            .iter()
            .chain(self.report.duplicate_refs.iter().map(|(id, _)| id))
            .chain(self.report.dropped_refs.iter().map(|(id, _)| id))
            .collect();
        let updates: Vec<NodeUpdate> = touched
            .into_iter()
            .filter_map(|id| forest.node(id))
            .map(NodeUpdate::structure)
            .collect();
        if !updates.is_empty() {
            self.catalog
                .batch_update_nodes(&self.tree, &updates, None)?;
            summary.rewritten = updates.len();
        }
        self.report = ReconstructReport::default();

        let parents: Vec<_> = forest.parent_contexts().cloned().collect();
        for parent in parents {
            let current = self.executor.forest();
            if self.apply(resequence_parent(&current, &parent))?.is_some() {
                summary.resequenced += 1;
            }
        }
        Ok(summary)
    }

    /// Waits for queued persistence and returns every outcome.
    pub fn finish(mut self) -> Vec<PersistOutcome> {
        self.executor.flush()
    }
}
