//! # Satellite Bus Housekeeping
//!
//! Copy-table-driven telemetry aggregation for a satellite software bus. Fragments of
//! many independently published housekeeping packets are copied into a few combined
//! output packets, which are republished on request. The copy table can be reloaded at
//! runtime without restarting the application.
//!
//! ## Features
//!
//! - **Copy table**: fixed-capacity rule table with JSON and binary formats and validation
//! - **Pool-backed packets**: one buffer per output packet from a fixed byte arena
//! - **Deduplicated subscriptions**: each input id is subscribed at most once
//! - **Missing-data detection**: optional suppression of incomplete combined packets
//! - **Hot reload**: validate / update / dump cycle driven by a table service
//!
//! ## Quick Start
//!
//! ```rust
//! use satbus_hk::{HkConfig, HousekeepingApp, LocalBus, LocalTableService, default_copy_table};
//! use satbus_hk::protocol::send_combined_command;
//! use satbus_hk::table::sample_ids::COMBINED_PKT1_MID;
//! use satbus_hk::protocol::HK_SEND_COMBINED_PKT_MID;
//! use satbus_hk::bus::InboundMessage;
//!
//! let config = HkConfig::default();
//! let tables = LocalTableService::new(default_copy_table());
//! let mut app = HousekeepingApp::init(&config, LocalBus::default(), tables).unwrap();
//!
//! let command = send_combined_command(COMBINED_PKT1_MID);
//! app.process_message(&InboundMessage::new(HK_SEND_COMBINED_PKT_MID, &command)).unwrap();
//! assert_eq!(app.engine().bus().published().len(), 1);
//! ```
//!
//! ## Architecture
//!
//! - [`engine`] - Engine context owning tables, pool, subscriptions and bus
//! - [`builder`] - Table activation and teardown
//! - [`copier`] - Inbound message copying
//! - [`sender`] - Combined packet publication and missing-data detection
//! - [`lifecycle`] - Table status polling and hot reload
//! - [`app`] - Command dispatch and housekeeping telemetry

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

extern crate alloc;

pub mod app;
pub mod builder;
pub mod bus;
pub mod config;
pub mod copier;
pub mod engine;
pub mod events;
pub mod lifecycle;
pub mod pool;
pub mod protocol;
pub mod sender;
pub mod subscription;
pub mod table;

// Re-export main public types for convenience
pub use app::{AppError, HousekeepingApp};
pub use bus::{LocalBus, MessageId, SoftwareBus};
pub use config::HkConfig;
pub use engine::{Engine, EngineConfig, EngineCounters};
pub use lifecycle::{LocalTableService, TableService, TableStatus};
pub use pool::{BufferPool, PoolStats};
pub use sender::SendOutcome;
pub use table::{default_copy_table, CopyRule, CopyTable};
