use satbus_hk::bus::{BusError, BusMessage, LocalBus, MessageId, SoftwareBus};
use satbus_hk::protocol::{
    housekeeping_request, send_combined_command, stamp_telemetry_time, write_primary_header, HkPacket,
    HK_HK_TLM_MID, HK_SEND_COMBINED_PKT_MID, HK_SEND_HK_MID, TLM_HEADER_LEN,
};
use satbus_hk::table::sample_ids::*;
use satbus_hk::{default_copy_table, CopyRule, CopyTable, HkConfig, HousekeepingApp, LocalTableService};
use std::time::{Duration, Instant};
use tokio::time;
use tracing::{debug, info, warn};

const CYCLE_PERIOD_MS: u64 = 100;
const SEND_COMBINED_EVERY: u64 = 10;
const HOUSEKEEPING_EVERY: u64 = 40;
const RELOAD_AT_TICK: u64 = 50;

const SUBSYSTEM_INPUTS: [MessageId; 5] = [
    ES_HK_TLM_MID,
    EVS_HK_TLM_MID,
    SB_HK_TLM_MID,
    TBL_HK_TLM_MID,
    TIME_HK_TLM_MID,
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => HkConfig::from_file(path)?,
        None => HkConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_max_level(config.tracing_level())
        .init();

    println!("🛰️  Housekeeping Aggregation Simulator");
    println!("======================================");

    let initial = match &config.copy_table_path {
        Some(path) => CopyTable::from_json_file(path)?,
        None => default_copy_table(),
    };
    let tables = LocalTableService::new(initial);
    let bus = LocalBus::new(config.pipe_depth);
    let mut app = HousekeepingApp::init(&config, bus, tables)?;

    info!(
        groups = app.engine().bound_group_count(),
        subscriptions = app.engine().subscriptions().active_count(),
        pool_bytes = app.engine().pool().stats().bytes_in_use,
        "housekeeping running"
    );

    let start = Instant::now();
    let mut interval = time::interval(Duration::from_millis(CYCLE_PERIOD_MS));
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
        tick += 1;

        let bus = app.engine_mut().bus_mut();
        bus.set_time_ms(start.elapsed().as_millis() as u64);

        for (index, id) in SUBSYSTEM_INPUTS.iter().enumerate() {
            // The table service only reports every other second
            if *id == TBL_HK_TLM_MID && (tick / SEND_COMBINED_EVERY) % 2 == 1 {
                continue;
            }
            let packet = subsystem_packet(*id, tick, index as u8, bus.current_time_ms());
            offer(bus, BusMessage::new(*id, packet));
        }

        if tick % SEND_COMBINED_EVERY == 0 {
            for output in [COMBINED_PKT1_MID, COMBINED_PKT2_MID] {
                offer(bus, BusMessage::new(HK_SEND_COMBINED_PKT_MID, send_combined_command(output)));
            }
        }
        if tick % HOUSEKEEPING_EVERY == 0 {
            offer(bus, BusMessage::new(HK_SEND_HK_MID, housekeeping_request()));
        }

        if tick == RELOAD_AT_TICK {
            info!("staging extended copy table");
            app.tables_mut().load(extended_copy_table());
        }

        let handled = app.run_cycle();
        debug!(tick, handled, "cycle complete");

        for packet in app.engine_mut().bus_mut().take_published() {
            if packet.id == HK_HK_TLM_MID {
                if let Ok(hk) = HkPacket::decode(&packet.data) {
                    info!(
                        cmd = hk.cmd_counter,
                        err = hk.err_counter,
                        sent = hk.combined_packets_sent,
                        missing = hk.missing_data_ctr,
                        "📊 HK telemetry"
                    );
                }
            } else {
                info!(
                    id = %packet.id,
                    len = packet.data.len(),
                    payload = ?&packet.data[TLM_HEADER_LEN.min(packet.data.len())..],
                    "📡 combined packet"
                );
            }
        }
    }

    app.shutdown();
    println!("🚀 Housekeeping simulator stopped");
    Ok(())
}

fn offer(bus: &mut LocalBus, message: BusMessage) {
    match bus.deliver(message) {
        Ok(_) => {}
        Err(BusError::PipeOverflow { id }) => warn!(id = %id, "pipe overflow, message dropped"),
        Err(e) => warn!(error = %e, "delivery failed"),
    }
}

/// A subsystem housekeeping packet whose first payload word counts up each tick.
fn subsystem_packet(id: MessageId, tick: u64, subsystem: u8, now_ms: u64) -> Vec<u8> {
    let mut packet = vec![0u8; TLM_HEADER_LEN + 8];
    write_primary_header(&mut packet, id);
    stamp_telemetry_time(&mut packet, now_ms);
    packet[TLM_HEADER_LEN] = subsystem;
    packet[TLM_HEADER_LEN + 1..TLM_HEADER_LEN + 4].copy_from_slice(&(tick as u32).to_be_bytes()[1..]);
    packet[TLM_HEADER_LEN + 4..].copy_from_slice(&[0xA5; 4]);
    packet
}

/// Sample table plus a second combined packet built from the status words.
fn extended_copy_table() -> CopyTable {
    let mut rules: Vec<CopyRule> = default_copy_table().defined_rules().map(|(_, r)| *r).collect();
    rules.extend([
        CopyRule::new(ES_HK_TLM_MID, 16, COMBINED_PKT2_MID, 12, 4),
        CopyRule::new(SB_HK_TLM_MID, 16, COMBINED_PKT2_MID, 16, 4),
        CopyRule::new(TIME_HK_TLM_MID, 16, COMBINED_PKT2_MID, 20, 4),
    ]);
    CopyTable::from_rules(&rules).unwrap_or_else(|_| default_copy_table())
}
