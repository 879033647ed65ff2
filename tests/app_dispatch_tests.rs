use satbus_hk::bus::{BusMessage, InboundMessage, LocalBus, MessageId};
use satbus_hk::events::EventId;
use satbus_hk::protocol::{
    build_command, housekeeping_request, noop_command, reset_counters_command, send_combined_command,
    AppMessage, HkPacket, ProtocolError, HK_CMD_MID, HK_HK_TLM_MID, HK_SEND_COMBINED_PKT_MID,
    HK_SEND_HK_MID, NOOP_CC,
};
use satbus_hk::table::sample_ids::*;
use satbus_hk::table::{CopyRule, CopyTable};
use satbus_hk::{default_copy_table, HkConfig, HousekeepingApp, LocalTableService};

type TestApp = HousekeepingApp<LocalBus, LocalTableService>;

fn app() -> TestApp {
    let tables = LocalTableService::new(default_copy_table());
    HousekeepingApp::init(&HkConfig::default(), LocalBus::new(16), tables).unwrap()
}

fn send(app: &mut TestApp, id: MessageId, data: &[u8]) -> Result<AppMessage, ProtocolError> {
    app.process_message(&InboundMessage::new(id, data))
}

fn housekeeping_packets(app: &TestApp) -> Vec<HkPacket> {
    app.engine()
        .bus()
        .published()
        .iter()
        .filter(|p| p.id == HK_HK_TLM_MID)
        .map(|p| HkPacket::decode(&p.data).unwrap())
        .collect()
}

#[test]
fn test_init_subscribes_commands_and_activates_table() {
    let app = app();
    let bus = app.engine().bus();

    for id in [HK_CMD_MID, HK_SEND_HK_MID, HK_SEND_COMBINED_PKT_MID] {
        assert!(bus.is_subscribed(id));
    }
    assert!(bus.is_subscribed(EVS_HK_TLM_MID));
    assert!(app.engine().output_buffer(COMBINED_PKT1_MID).is_some());
    assert_eq!(app.engine().events().last().unwrap().id, EventId::Init);
    assert!(app.tables().is_address_held());
}

#[test]
fn test_init_rejects_invalid_config() {
    let config = HkConfig {
        pipe_depth: 0,
        ..HkConfig::default()
    };
    let tables = LocalTableService::new(default_copy_table());
    assert!(HousekeepingApp::init(&config, LocalBus::new(4), tables).is_err());
}

#[test]
fn test_noop_and_reset() {
    let mut app = app();
    assert_eq!(send(&mut app, HK_CMD_MID, &noop_command()), Ok(AppMessage::Noop));
    assert_eq!(send(&mut app, HK_CMD_MID, &noop_command()), Ok(AppMessage::Noop));
    assert_eq!(app.cmd_counter(), 2);
    assert_eq!(app.engine().events().count(EventId::Noop), 2);

    let bogus = build_command(HK_CMD_MID, 42, &[]);
    assert!(send(&mut app, HK_CMD_MID, &bogus).is_err());
    assert_eq!(app.err_counter(), 1);

    send(&mut app, HK_SEND_COMBINED_PKT_MID, &send_combined_command(COMBINED_PKT1_MID)).unwrap();
    assert_eq!(app.engine().counters().combined_packets_sent, 1);
    assert_eq!(app.engine().counters().missing_data, 1);

    assert_eq!(
        send(&mut app, HK_CMD_MID, &reset_counters_command()),
        Ok(AppMessage::ResetCounters)
    );
    let hk = app.housekeeping_packet();
    assert_eq!(hk.cmd_counter, 0);
    assert_eq!(hk.err_counter, 0);
    assert_eq!(hk.combined_packets_sent, 0);
    assert_eq!(hk.missing_data_ctr, 0);
    assert_eq!(app.engine().events().count(EventId::ResetCounters), 1);
}

#[test]
fn test_ground_command_errors_count() {
    let mut app = app();

    let long_noop = build_command(HK_CMD_MID, NOOP_CC, &[1, 2]);
    send(&mut app, HK_CMD_MID, &long_noop).unwrap_err();
    assert_eq!(app.engine().events().last().unwrap().id, EventId::CommandLengthError);

    let bogus = build_command(HK_CMD_MID, 99, &[]);
    send(&mut app, HK_CMD_MID, &bogus).unwrap_err();
    assert_eq!(app.engine().events().last().unwrap().id, EventId::CommandCodeError);

    assert_eq!(app.err_counter(), 2);
    assert_eq!(app.cmd_counter(), 0);
}

#[test]
fn test_internal_request_length_errors_do_not_count() {
    let mut app = app();

    send(&mut app, HK_SEND_COMBINED_PKT_MID, &[0u8; 9]).unwrap_err();
    assert_eq!(app.engine().events().last().unwrap().id, EventId::MessageLengthError);
    assert_eq!(app.err_counter(), 0);
    assert!(app.engine().bus().published().is_empty());

    send(&mut app, HK_SEND_HK_MID, &[0u8; 12]).unwrap_err();
    assert_eq!(app.err_counter(), 0);
    assert!(housekeeping_packets(&app).is_empty());
    // Table poll still ran
    assert!(app.get_state().last_lifecycle.is_some());
}

#[test]
fn test_housekeeping_packet_contents() {
    let mut app = app();
    send(&mut app, HK_CMD_MID, &noop_command()).unwrap();
    send(&mut app, HK_SEND_COMBINED_PKT_MID, &send_combined_command(COMBINED_PKT1_MID)).unwrap();
    send(&mut app, HK_SEND_COMBINED_PKT_MID, &send_combined_command(MessageId(0x999))).unwrap();

    send(&mut app, HK_SEND_HK_MID, &housekeeping_request()).unwrap();
    let packets = housekeeping_packets(&app);
    assert_eq!(packets.len(), 1);
    let hk = packets[0];
    assert_eq!(hk.cmd_counter, 1);
    assert_eq!(hk.err_counter, 0);
    assert_eq!(hk.combined_packets_sent, 1);
    assert_eq!(hk.missing_data_ctr, 1);
    assert_eq!(hk.mem_pool_handle, HkConfig::default().pool_id);
}

#[test]
fn test_run_cycle_copies_then_sends_in_order() {
    let mut app = app();
    let mut evs = vec![0u8; 16];
    evs[12..16].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);

    let bus = app.engine_mut().bus_mut();
    assert!(bus.deliver(BusMessage::new(EVS_HK_TLM_MID, evs)).unwrap());
    assert!(bus
        .deliver(BusMessage::new(
            HK_SEND_COMBINED_PKT_MID,
            send_combined_command(COMBINED_PKT1_MID)
        ))
        .unwrap());

    assert_eq!(app.run_cycle(), 2);
    let published = app.engine().bus().published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].id, COMBINED_PKT1_MID);
    assert_eq!(&published[0].data[12..16], &[0xDE, 0xAD, 0xBE, 0xEF]);
    assert_eq!(app.get_state().messages_processed, 2);
}

#[test]
fn test_table_reload_rides_housekeeping_requests() {
    let mut app = app();
    let table = CopyTable::from_rules(&[CopyRule::new(SB_HK_TLM_MID, 12, COMBINED_PKT2_MID, 12, 4)]).unwrap();
    app.tables_mut().load(table);

    send(&mut app, HK_SEND_HK_MID, &housekeeping_request()).unwrap();
    assert!(app.engine().output_buffer(COMBINED_PKT2_MID).is_none());

    send(&mut app, HK_SEND_HK_MID, &housekeeping_request()).unwrap();
    assert!(app.engine().output_buffer(COMBINED_PKT2_MID).is_some());
    assert!(app.engine().output_buffer(COMBINED_PKT1_MID).is_none());
    assert!(!app.engine().bus().is_subscribed(EVS_HK_TLM_MID));
    // Command subscriptions are not part of the table generation
    assert!(app.engine().bus().is_subscribed(HK_CMD_MID));
}

#[test]
fn test_shutdown_releases_table() {
    let mut app = app();
    app.shutdown();
    assert_eq!(app.engine().pool().blocks_in_use(), 0);
    assert_eq!(app.engine().subscriptions().active_count(), 0);
}
