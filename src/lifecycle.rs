//! Table hot-reload.
//!
//! The copy table and the dump-only runtime table are owned by a table service. Once
//! per cycle the engine polls both statuses and acts on whatever is pending: validate a
//! freshly loaded copy table, swap in a validated one, or dump the runtime table.

use crate::bus::SoftwareBus;
use crate::engine::Engine;
use crate::events::{EventId, EventType};
use crate::table::{validate_copy_table, CopyTable, RuntimeDump, TableError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Status reported by the table service for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableStatus {
    Nominal,
    ValidationPending,
    UpdatePending,
    DumpPending,
    /// Any status code the engine does not know how to handle.
    Unexpected(i32),
}

/// Storage and load/validate/dump cycle for the engine's two tables.
pub trait TableService {
    fn copy_table_status(&self) -> TableStatus;
    fn runtime_table_status(&self) -> TableStatus;
    /// Run the validator on the pending copy table.
    fn validate_copy_table(&mut self) -> Result<(), TableError>;
    /// Give up the engine's reference to the active copy table.
    fn release_copy_table(&mut self);
    /// Make the validated pending table active. Requires the table to be released.
    fn update_copy_table(&mut self) -> Result<(), TableError>;
    /// Take a reference to the active copy table.
    fn acquire_copy_table(&mut self) -> Result<CopyTable, TableError>;
    fn dump_runtime_table(&mut self, dump: RuntimeDump);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableAction {
    None,
    Validated,
    Rejected,
    Updated,
    UpdateFailed,
    Dumped,
    UnexpectedStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleReport {
    pub copy_table: TableAction,
    pub runtime_table: TableAction,
}

impl<B: SoftwareBus> Engine<B> {
    /// Poll the table service and service any pending copy or runtime table request.
    pub fn check_status_of_tables<T: TableService>(&mut self, tables: &mut T) -> LifecycleReport {
        let copy_table = match tables.copy_table_status() {
            TableStatus::Nominal => TableAction::None,
            TableStatus::ValidationPending => match tables.validate_copy_table() {
                Ok(()) => {
                    debug!("pending copy table validated");
                    TableAction::Validated
                }
                Err(e) => {
                    self.events.report(
                        EventId::TableRejected,
                        EventType::Error,
                        format_args!("Copy table rejected: {}", e),
                    );
                    TableAction::Rejected
                }
            },
            TableStatus::UpdatePending => self.swap_copy_table(tables),
            status @ (TableStatus::DumpPending | TableStatus::Unexpected(_)) => {
                self.events.report(
                    EventId::UnexpectedCopyTableStatus,
                    EventType::Error,
                    format_args!("Unexpected CopyTable status {:?}", status),
                );
                TableAction::UnexpectedStatus
            }
        };

        let runtime_table = match tables.runtime_table_status() {
            TableStatus::Nominal => TableAction::None,
            TableStatus::DumpPending => {
                tables.dump_runtime_table(self.runtime.dump());
                TableAction::Dumped
            }
            status => {
                self.events.report(
                    EventId::UnexpectedRuntimeTableStatus,
                    EventType::Error,
                    format_args!("Unexpected RuntimeTable status {:?}", status),
                );
                TableAction::UnexpectedStatus
            }
        };

        LifecycleReport {
            copy_table,
            runtime_table,
        }
    }

    fn swap_copy_table<T: TableService>(&mut self, tables: &mut T) -> TableAction {
        let previous = self.copy_table.clone();
        self.deactivate_table();
        tables.release_copy_table();

        let next = tables.update_copy_table().and_then(|()| tables.acquire_copy_table());
        match next {
            Ok(table) => {
                info!("loading new copy table");
                self.activate_table(table);
                TableAction::Updated
            }
            Err(e) => {
                warn!(error = %e, "copy table update failed, restoring previous table");
                self.events.report(
                    EventId::TableRejected,
                    EventType::Error,
                    format_args!("Copy table update failed: {}", e),
                );
                let restored = tables.acquire_copy_table().unwrap_or(previous);
                self.activate_table(restored);
                TableAction::UpdateFailed
            }
        }
    }
}

/// In-process table service holding the active and pending copy tables.
#[derive(Debug, Default)]
pub struct LocalTableService {
    active: CopyTable,
    pending: Option<CopyTable>,
    copy_status: Option<TableStatus>,
    validated: bool,
    dump_requested: bool,
    last_dump: Option<RuntimeDump>,
    address_held: bool,
    forced_runtime_status: Option<TableStatus>,
}

impl LocalTableService {
    pub fn new(initial: CopyTable) -> Self {
        Self {
            active: initial,
            ..Self::default()
        }
    }

    /// Stage `table` as the pending copy table. It is validated on the next poll.
    pub fn load(&mut self, table: CopyTable) {
        self.pending = Some(table);
        self.validated = false;
    }

    pub fn request_dump(&mut self) {
        self.dump_requested = true;
    }

    /// Force the reported copy table status, overriding the derived one.
    pub fn inject_copy_status(&mut self, status: TableStatus) {
        self.copy_status = Some(status);
    }

    pub fn inject_runtime_status(&mut self, status: TableStatus) {
        self.forced_runtime_status = Some(status);
    }

    pub fn clear_injected_status(&mut self) {
        self.copy_status = None;
        self.forced_runtime_status = None;
    }

    pub fn active(&self) -> &CopyTable {
        &self.active
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn last_dump(&self) -> Option<&RuntimeDump> {
        self.last_dump.as_ref()
    }

    pub fn is_address_held(&self) -> bool {
        self.address_held
    }
}

impl TableService for LocalTableService {
    fn copy_table_status(&self) -> TableStatus {
        if let Some(status) = self.copy_status {
            return status;
        }
        match (&self.pending, self.validated) {
            (Some(_), false) => TableStatus::ValidationPending,
            (Some(_), true) => TableStatus::UpdatePending,
            (None, _) => TableStatus::Nominal,
        }
    }

    fn runtime_table_status(&self) -> TableStatus {
        if let Some(status) = self.forced_runtime_status {
            return status;
        }
        if self.dump_requested {
            TableStatus::DumpPending
        } else {
            TableStatus::Nominal
        }
    }

    fn validate_copy_table(&mut self) -> Result<(), TableError> {
        let Some(pending) = &self.pending else {
            return Ok(());
        };
        match validate_copy_table(pending) {
            Ok(()) => {
                self.validated = true;
                Ok(())
            }
            Err(e) => {
                self.pending = None;
                Err(e)
            }
        }
    }

    fn release_copy_table(&mut self) {
        self.address_held = false;
    }

    fn update_copy_table(&mut self) -> Result<(), TableError> {
        if self.address_held {
            return Err(TableError::AddressHeld);
        }
        if let Some(table) = self.pending.take() {
            self.active = table;
        }
        self.validated = false;
        Ok(())
    }

    fn acquire_copy_table(&mut self) -> Result<CopyTable, TableError> {
        self.address_held = true;
        Ok(self.active.clone())
    }

    fn dump_runtime_table(&mut self, dump: RuntimeDump) {
        self.last_dump = Some(dump);
        self.dump_requested = false;
    }
}
