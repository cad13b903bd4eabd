//! Table lifecycle state machine.
//!
//! A reconciliation runs in two phases:
//!
//! 1. **check** ([`Reconciler::decide`]): make sure the dataset exists, ask the
//!    warehouse whether the table exists, and turn that fact into a
//!    [`Decision`]. An absent table always yields `CREATE_NEW`; a present one
//!    is handed to the [`DecisionPolicy`].
//! 2. **act** ([`Reconciler::apply`]): request the mutation the decision calls
//!    for, if any.
//!
//! The two phases are not atomic with respect to other actors. When the table
//! appears or vanishes in between, the mutation fails and the failure is
//! reported as its own error kind; nothing is retried.

use std::{
    fmt,
    io::{self, BufRead, Stdin, Stdout, Write},
};

use clap::ValueEnum;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    error::{IngestError, Stage},
    schema::SchemaDescriptor,
    warehouse::{QualifiedTableName, Warehouse},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    CreateNew,
    Append,
    Recreate,
    Cancel,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::CreateNew => "CREATE_NEW",
            Decision::Append => "APPEND",
            Decision::Recreate => "RECREATE",
            Decision::Cancel => "CANCEL",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do when the destination table already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExistingTableAction {
    Append,
    Recreate,
    Cancel,
}

impl From<ExistingTableAction> for Decision {
    fn from(action: ExistingTableAction) -> Self {
        match action {
            ExistingTableAction::Append => Decision::Append,
            ExistingTableAction::Recreate => Decision::Recreate,
            ExistingTableAction::Cancel => Decision::Cancel,
        }
    }
}

/// Resolves "the table is already there" into an action.
pub trait DecisionPolicy {
    fn decide(&mut self, table: &QualifiedTableName) -> ExistingTableAction;
}

impl<F> DecisionPolicy for F
where
    F: FnMut(&QualifiedTableName) -> ExistingTableAction,
{
    fn decide(&mut self, table: &QualifiedTableName) -> ExistingTableAction {
        self(table)
    }
}

/// Always answers with the same action.
#[derive(Debug, Clone, Copy)]
pub struct FixedPolicy(pub ExistingTableAction);

impl DecisionPolicy for FixedPolicy {
    fn decide(&mut self, table: &QualifiedTableName) -> ExistingTableAction {
        info!("Table {table} exists; configured action is {:?}", self.0);
        self.0
    }
}

/// Asks a human to pick one of three numbered choices.
pub struct PromptPolicy<R, W> {
    input: R,
    output: W,
}

impl PromptPolicy<io::StdinLock<'static>, Stdout> {
    pub fn stdio() -> Self {
        let stdin: Stdin = io::stdin();
        Self::new(stdin.lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> PromptPolicy<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn ask(&mut self, table: &QualifiedTableName) -> io::Result<Option<ExistingTableAction>> {
        writeln!(self.output, "Table {table} already exists. What would you like to do?")?;
        writeln!(self.output, "  1) Append to the existing table")?;
        writeln!(self.output, "  2) Recreate the table (existing rows are deleted)")?;
        writeln!(self.output, "  3) Cancel")?;
        loop {
            write!(self.output, "Enter choice [1-3]: ")?;
            self.output.flush()?;
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            match line.trim() {
                "1" => return Ok(Some(ExistingTableAction::Append)),
                "2" => return Ok(Some(ExistingTableAction::Recreate)),
                "3" => return Ok(Some(ExistingTableAction::Cancel)),
                other => writeln!(self.output, "'{other}' is not a valid choice.")?,
            }
        }
    }
}

impl<R: BufRead, W: Write> DecisionPolicy for PromptPolicy<R, W> {
    fn decide(&mut self, table: &QualifiedTableName) -> ExistingTableAction {
        match self.ask(table) {
            Ok(Some(action)) => action,
            Ok(None) => {
                warn!("No answer received for table {table}; cancelling");
                ExistingTableAction::Cancel
            }
            Err(err) => {
                warn!("Prompt for table {table} failed ({err}); cancelling");
                ExistingTableAction::Cancel
            }
        }
    }
}

pub struct Reconciler<'a, W: Warehouse + ?Sized> {
    warehouse: &'a W,
    dataset_location: String,
}

impl<'a, W: Warehouse + ?Sized> Reconciler<'a, W> {
    pub fn new(warehouse: &'a W, dataset_location: impl Into<String>) -> Self {
        Self {
            warehouse,
            dataset_location: dataset_location.into(),
        }
    }

    /// Check phase. Only dataset creation may mutate the warehouse here.
    pub fn decide(
        &self,
        table: &QualifiedTableName,
        policy: &mut dyn DecisionPolicy,
    ) -> Result<Decision, IngestError> {
        self.ensure_dataset(table)?;
        let exists = self
            .warehouse
            .table_exists(table)
            .map_err(|source| IngestError::Warehouse {
                stage: Stage::Reconcile,
                source,
            })?;
        let decision = if exists {
            Decision::from(policy.decide(table))
        } else {
            Decision::CreateNew
        };
        info!("Decision for {table}: {decision}");
        Ok(decision)
    }

    /// Act phase.
    pub fn apply(
        &self,
        decision: Decision,
        desired: &SchemaDescriptor,
        table: &QualifiedTableName,
    ) -> Result<(), IngestError> {
        match decision {
            Decision::CreateNew => {
                ensure_columns(desired, table)?;
                self.warehouse
                    .create_table(table, desired)
                    .map_err(|source| IngestError::TableCreate {
                        table: table.clone(),
                        source,
                    })?;
                info!("Created table {table} with {} column(s)", desired.len());
            }
            Decision::Recreate => {
                ensure_columns(desired, table)?;
                self.warehouse
                    .delete_table(table)
                    .map_err(|source| IngestError::TableDelete {
                        table: table.clone(),
                        source,
                    })?;
                info!("Deleted table {table} for recreation");
                self.warehouse
                    .create_table(table, desired)
                    .map_err(|source| IngestError::TableLost {
                        table: table.clone(),
                        source,
                    })?;
                info!("Recreated table {table} with {} column(s)", desired.len());
            }
            Decision::Append | Decision::Cancel => {}
        }
        Ok(())
    }

    pub fn reconcile(
        &self,
        desired: &SchemaDescriptor,
        table: &QualifiedTableName,
        policy: &mut dyn DecisionPolicy,
    ) -> Result<Decision, IngestError> {
        let decision = self.decide(table, policy)?;
        self.apply(decision, desired, table)?;
        Ok(decision)
    }

    fn ensure_dataset(&self, table: &QualifiedTableName) -> Result<(), IngestError> {
        let dataset = table.dataset_ref();
        let exists = self
            .warehouse
            .dataset_exists(&dataset)
            .map_err(|source| IngestError::Warehouse {
                stage: Stage::Reconcile,
                source,
            })?;
        if exists {
            return Ok(());
        }
        match self
            .warehouse
            .create_dataset(&dataset, &self.dataset_location)
        {
            Ok(()) => {
                info!("Created dataset {dataset} in {}", self.dataset_location);
                Ok(())
            }
            Err(err) if err.is_already_exists() => {
                info!("Dataset {dataset} was created concurrently; continuing");
                Ok(())
            }
            Err(source) => Err(IngestError::DatasetUnavailable { dataset, source }),
        }
    }
}

fn ensure_columns(desired: &SchemaDescriptor, table: &QualifiedTableName) -> Result<(), IngestError> {
    if desired.is_empty() {
        return Err(IngestError::EmptySchema {
            table: table.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn table() -> QualifiedTableName {
        QualifiedTableName::new("p", "d", "t")
    }

    #[test]
    fn prompt_accepts_numbered_choices() {
        let mut policy = PromptPolicy::new(Cursor::new("2\n"), Vec::new());
        assert_eq!(policy.decide(&table()), ExistingTableAction::Recreate);
        let shown = String::from_utf8(policy.into_output()).unwrap();
        assert!(shown.contains("Table p.d.t already exists"));
        assert!(shown.contains("1) Append"));
        assert!(shown.contains("3) Cancel"));
    }

    #[test]
    fn prompt_repeats_until_a_valid_choice() {
        let mut policy = PromptPolicy::new(Cursor::new("append\n9\n 1 \n"), Vec::new());
        assert_eq!(policy.decide(&table()), ExistingTableAction::Append);
        let shown = String::from_utf8(policy.into_output()).unwrap();
        assert_eq!(shown.matches("is not a valid choice").count(), 2);
    }

    #[test]
    fn prompt_cancels_at_end_of_input() {
        let mut policy = PromptPolicy::new(Cursor::new(""), Vec::new());
        assert_eq!(policy.decide(&table()), ExistingTableAction::Cancel);
    }

    #[test]
    fn closures_act_as_policies() {
        let mut asked = 0;
        let mut policy = |_: &QualifiedTableName| {
            asked += 1;
            ExistingTableAction::Append
        };
        assert_eq!(policy.decide(&table()), ExistingTableAction::Append);
        assert_eq!(asked, 1);
    }

    #[test]
    fn decisions_serialize_in_upper_snake_case() {
        assert_eq!(
            serde_json::to_string(&Decision::CreateNew).unwrap(),
            "\"CREATE_NEW\""
        );
        assert_eq!(Decision::from(ExistingTableAction::Cancel), Decision::Cancel);
    }
}
