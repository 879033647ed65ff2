use crate::bus::{BusError, InboundMessage, SoftwareBus};
use crate::config::{ConfigError, HkConfig};
use crate::engine::Engine;
use crate::events::{EventId, EventType};
use crate::lifecycle::{LifecycleReport, TableService};
use crate::pool::BufferPool;
use crate::protocol::{
    self, AppMessage, HkPacket, ProtocolError, HK_CMD_MID, HK_HK_TLM_MID, HK_SEND_COMBINED_PKT_MID,
    HK_SEND_HK_MID,
};
use crate::table::TableError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub const HK_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    #[error("table error: {0}")]
    Table(#[from] TableError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppState {
    pub messages_processed: u32,
    pub cycles: u32,
    pub last_lifecycle: Option<LifecycleReport>,
}

/// The housekeeping application: command handling and counters around an [`Engine`].
pub struct HousekeepingApp<B: SoftwareBus, T: TableService> {
    engine: Engine<B>,
    tables: T,
    cmd_counter: u8,
    err_counter: u8,
    state: AppState,
}

impl<B: SoftwareBus, T: TableService> HousekeepingApp<B, T> {
    /// Subscribe to the application's commands and activate the current copy table.
    pub fn init(config: &HkConfig, mut bus: B, mut tables: T) -> Result<Self, AppError> {
        config.validate()?;

        for id in [HK_CMD_MID, HK_SEND_HK_MID, HK_SEND_COMBINED_PKT_MID] {
            bus.subscribe(id)?;
        }

        let table = tables.acquire_copy_table()?;
        let pool = BufferPool::new(config.pool_id, config.pool_size_bytes);
        let mut engine = Engine::new(config.engine_config(), pool, bus);
        engine.activate_table(table);

        engine.events_mut().report(
            EventId::Init,
            EventType::Information,
            format_args!("HK Initialized.  Version {}", HK_VERSION),
        );

        Ok(Self {
            engine,
            tables,
            cmd_counter: 0,
            err_counter: 0,
            state: AppState::default(),
        })
    }

    /// Drain the application pipe. Returns the number of messages handled.
    pub fn run_cycle(&mut self) -> usize {
        let mut handled = 0;
        while let Some(message) = self.engine.bus_mut().receive() {
            let _ = self.process_message(&message.as_inbound());
            handled += 1;
        }
        self.state.cycles = self.state.cycles.wrapping_add(1);
        handled
    }

    /// Dispatch one message from the application pipe.
    pub fn process_message(&mut self, message: &InboundMessage<'_>) -> Result<AppMessage, ProtocolError> {
        self.state.messages_processed = self.state.messages_processed.wrapping_add(1);

        let classified = protocol::classify(message);
        match classified {
            Ok(AppMessage::SendCombined { output_id }) => {
                self.engine.send_combined(output_id);
            }
            Ok(AppMessage::HousekeepingRequest) => {
                self.send_housekeeping_packet();
                self.poll_tables();
            }
            Ok(AppMessage::Noop) => {
                self.cmd_counter = self.cmd_counter.wrapping_add(1);
                self.engine.events_mut().report(
                    EventId::Noop,
                    EventType::Information,
                    format_args!("HK No-op command, Version {}", HK_VERSION),
                );
            }
            Ok(AppMessage::ResetCounters) => {
                self.reset_counters();
                self.engine.events_mut().report(
                    EventId::ResetCounters,
                    EventType::Debug,
                    format_args!("HK Reset Counters command received"),
                );
            }
            Ok(AppMessage::InputData) => {
                self.engine.on_inbound_message(message);
            }
            Err(e) => self.report_rejected(message, e),
        }
        classified
    }

    fn report_rejected(&mut self, message: &InboundMessage<'_>, error: ProtocolError) {
        let event_id = match error {
            ProtocolError::BadCommandLength { .. } => EventId::CommandLengthError,
            ProtocolError::InvalidCommandCode { .. } => EventId::CommandCodeError,
            ProtocolError::BadMessageLength { .. } | ProtocolError::Truncated { .. } => {
                EventId::MessageLengthError
            }
        };
        if error.is_ground_command_error() {
            self.err_counter = self.err_counter.wrapping_add(1);
        }
        self.engine
            .events_mut()
            .report(event_id, EventType::Error, format_args!("{}", error));

        // The table poll rides on the housekeeping request even when it is malformed
        if message.id == HK_SEND_HK_MID {
            self.poll_tables();
        }
    }

    fn poll_tables(&mut self) {
        let report = self.engine.check_status_of_tables(&mut self.tables);
        self.state.last_lifecycle = Some(report);
    }

    pub fn reset_counters(&mut self) {
        self.cmd_counter = 0;
        self.err_counter = 0;
        self.engine.reset_counters();
    }

    pub fn housekeeping_packet(&self) -> HkPacket {
        let counters = self.engine.counters();
        HkPacket {
            cmd_counter: self.cmd_counter,
            err_counter: self.err_counter,
            combined_packets_sent: counters.combined_packets_sent,
            missing_data_ctr: counters.missing_data,
            mem_pool_handle: self.engine.pool().id(),
        }
    }

    fn send_housekeeping_packet(&mut self) {
        let hk = self.housekeeping_packet();
        let bytes = hk.encode(self.engine.bus().current_time_ms());
        match self.engine.bus_mut().publish(HK_HK_TLM_MID, &bytes) {
            Ok(()) => debug!(cmd = hk.cmd_counter, err = hk.err_counter, "housekeeping packet sent"),
            Err(e) => self.engine.events_mut().report(
                EventId::PublishFailed,
                EventType::Error,
                format_args!("Publishing housekeeping packet failed: {}", e),
            ),
        }
    }

    /// Tear down the active table generation before the run loop exits.
    pub fn shutdown(&mut self) {
        let report = self.engine.deactivate_table();
        info!(
            freed = report.buffers_freed,
            unsubscribed = report.unsubscribed,
            "housekeeping stopped"
        );
    }

    pub fn engine(&self) -> &Engine<B> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine<B> {
        &mut self.engine
    }

    pub fn tables(&self) -> &T {
        &self.tables
    }

    pub fn tables_mut(&mut self) -> &mut T {
        &mut self.tables
    }

    pub fn get_state(&self) -> &AppState {
        &self.state
    }

    pub fn cmd_counter(&self) -> u8 {
        self.cmd_counter
    }

    pub fn err_counter(&self) -> u8 {
        self.err_counter
    }
}
