//! Handle reads and writes, notifications, sum commands, symbol upload and
//! teardown against the simulated device.

mod common;

use beckhoff_ads::types::{string, DINT, INT, REAL};
use beckhoff_ads::{index_group, AdsError, CommandId, Handle, SessionEvent, Value};
use bytes::Buf;
use common::*;
use futures::{SinkExt, StreamExt};

#[tokio::test]
async fn test_read_resolves_symbol_handle_once() {
    let plc = Plc::new().with_symbol("MAIN.speed", 1.5f32.to_le_bytes().to_vec());
    let (client, plc, _inject) = connect_plc(plc);

    let mut speed = Handle::symbol("MAIN.speed").with_type(REAL);
    client.read(&mut speed).await.unwrap();
    client.read(&mut speed).await.unwrap();
    assert_eq!(speed.get("value"), Some(&Value::Real(1.5)));
    assert_eq!(speed.symbol_handle(), Some(0x100));

    client.end().await.unwrap();
    let plc = plc.await.unwrap();
    assert_eq!(plc.lookups, ["MAIN.speed"]);
}

#[tokio::test]
async fn test_write_and_read_struct_fields() {
    let plc = Plc::new().with_symbol("MAIN.motor", vec![0; 4 + 2 + 11]);
    let (client, plc, _inject) = connect_plc(plc);

    let mut motor = Handle::symbol("MAIN.motor")
        .with_field(DINT, "position")
        .unwrap()
        .with_field(INT, "speed")
        .unwrap()
        .with_field(string(10), "name")
        .unwrap()
        .with_value("position", -100_000)
        .unwrap()
        .with_value("speed", 1500)
        .unwrap()
        .with_value("name", "axis1")
        .unwrap();
    client.write(&mut motor).await.unwrap();

    let mut readback = Handle::symbol("MAIN.motor")
        .with_field(DINT, "position")
        .unwrap()
        .with_field(INT, "speed")
        .unwrap()
        .with_field(string(10), "name")
        .unwrap();
    client.read(&mut readback).await.unwrap();
    assert_eq!(readback.get("position"), Some(&Value::Int(-100_000)));
    assert_eq!(readback.get("speed"), Some(&Value::Int(1500)));
    assert_eq!(readback.get("name"), Some(&Value::String("axis1".into())));

    client.end().await.unwrap();
    let plc = plc.await.unwrap();
    let memory = plc.memory("MAIN.motor").unwrap();
    assert_eq!(&memory[..4], &(-100_000i32).to_le_bytes());
    assert_eq!(&memory[6..12], b"axis1\0");
}

#[tokio::test]
async fn test_write_without_value_sends_nothing() {
    let (client, mut device) = pair(config());

    let mut counter = Handle::symbol("MAIN.counter").with_type(INT);
    let err = client.write(&mut counter).await.unwrap_err();
    assert!(matches!(err, AdsError::MissingValue { .. }));

    client.end().await.unwrap();
    assert!(device.next().await.is_none());
}

#[tokio::test]
async fn test_unknown_symbol_is_device_error() {
    let (client, plc, _inject) = connect_plc(Plc::new());

    let mut missing = Handle::symbol("MAIN.missing").with_type(INT);
    let err = client.read(&mut missing).await.unwrap_err();
    assert_eq!(err.code(), Some(SYMBOL_NOT_FOUND));
    assert_eq!(missing.symbol_handle(), None);
    assert!(client.is_active());

    client.end().await.unwrap();
    let plc = plc.await.unwrap();
    assert!(plc.released.is_empty());
}

#[tokio::test]
async fn test_address_handle_skips_lookup() {
    let plc = Plc::new().with_symbol("MAIN.flag", vec![1]);
    let (client, plc, _inject) = connect_plc(plc);

    let mut flag = Handle::address(index_group::RW_SYMVAL_BYHANDLE, 0x100);
    client.read(&mut flag).await.unwrap();
    assert_eq!(flag.get("value"), Some(&Value::Bool(true)));

    client.end().await.unwrap();
    let plc = plc.await.unwrap();
    assert!(plc.lookups.is_empty());
    assert!(plc.released.is_empty());
}

#[tokio::test]
async fn test_notification_samples_update_handle() {
    let plc = Plc::new().with_symbol("MAIN.counter", vec![0, 0]);
    let (client, plc, inject) = connect_plc(plc);
    let mut events = client.subscribe();

    let mut counter = Handle::symbol("MAIN.counter").with_type(INT);
    client.notify(&mut counter).await.unwrap();
    assert_eq!(counter.notification_handle(), Some(1));

    inject
        .send(notification_frame(notification_payload(vec![(
            132_000_000_000_000_000,
            vec![(42, vec![9, 9]), (1, vec![7, 0])],
        )])))
        .unwrap();
    inject
        .send(notification_frame(notification_payload(vec![
            (132_000_000_000_000_001, vec![(42, vec![1, 1])]),
            (132_000_000_000_000_002, vec![(1, vec![0xF8, 0xFF])]),
        ])))
        .unwrap();

    let mut seen = Vec::new();
    while seen.len() < 2 {
        if let SessionEvent::Notification { handle, timestamp } = events.recv().await.unwrap() {
            assert_eq!(handle.symbol_name(), Some("MAIN.counter"));
            seen.push((handle.get("value").cloned(), timestamp));
        }
    }
    assert_eq!(
        seen,
        [
            (Some(Value::Int(7)), 132_000_000_000_000_000),
            (Some(Value::Int(-8)), 132_000_000_000_000_002),
        ]
    );

    client.end().await.unwrap();
    let plc = plc.await.unwrap();
    assert_eq!(plc.added, [(1, index_group::RW_SYMVAL_BYHANDLE, 0x100, 2)]);
    assert_eq!(plc.deleted, [1]);
}

#[tokio::test]
async fn test_release_notification_handle_deletes_once() {
    let plc = Plc::new()
        .with_symbol("MAIN.a", vec![0])
        .with_symbol("MAIN.b", vec![0]);
    let (client, plc, _inject) = connect_plc(plc);

    let mut a = Handle::symbol("MAIN.a");
    let mut b = Handle::symbol("MAIN.b");
    client.notify(&mut a).await.unwrap();
    client.notify(&mut b).await.unwrap();
    client.release_notification_handle(&mut a).await.unwrap();
    assert_eq!(a.notification_handle(), None);

    let err = client.release_notification_handle(&mut a).await.unwrap_err();
    assert!(matches!(err, AdsError::InvalidParameter { .. }));

    client.end().await.unwrap();
    let plc = plc.await.unwrap();
    assert_eq!(plc.deleted, [1, 2]);
}

#[tokio::test]
async fn test_release_notification_handles_clears_all() {
    let plc = Plc::new().with_symbol("MAIN.a", vec![0]);
    let (client, plc, _inject) = connect_plc(plc);

    let mut a = Handle::symbol("MAIN.a");
    let mut again = Handle::symbol("MAIN.a");
    client.notify(&mut a).await.unwrap();
    client.notify(&mut again).await.unwrap();
    client.release_notification_handles().await.unwrap();

    client.end().await.unwrap();
    let plc = plc.await.unwrap();
    assert_eq!(plc.deleted, [1, 2]);
    // Each handle resolved its own symbol handle.
    assert_eq!(plc.released, [0x100, 0x100]);
}

#[tokio::test]
async fn test_end_releases_each_resource_once() {
    let plc = Plc::new()
        .with_symbol("MAIN.a", vec![1, 0])
        .with_symbol("MAIN.b", vec![2, 0])
        .with_symbol("MAIN.c", vec![3, 0]);
    let (client, plc, _inject) = connect_plc(plc);

    let mut a = Handle::symbol("MAIN.a").with_type(INT);
    let mut b = Handle::symbol("MAIN.b").with_type(INT);
    let mut c = Handle::symbol("MAIN.c").with_type(INT);
    client.read(&mut a).await.unwrap();
    client.read(&mut b).await.unwrap();
    client.read(&mut a).await.unwrap();
    client.notify(&mut c).await.unwrap();

    client.end().await.unwrap();
    client.end().await.unwrap();
    assert!(matches!(client.read(&mut a).await, Err(AdsError::NotConnected)));

    let plc = plc.await.unwrap();
    assert_eq!(plc.lookups, ["MAIN.a", "MAIN.b", "MAIN.c"]);
    assert_eq!(plc.released, [0x100, 0x101, 0x102]);
    assert_eq!(plc.deleted, [1]);
}

fn batch() -> Vec<Handle> {
    vec![
        Handle::symbol("MAIN.a").with_type(INT),
        Handle::symbol("MAIN.missing").with_type(INT),
        Handle::symbol("MAIN.b").with_type(DINT),
    ]
}

#[tokio::test]
async fn test_multi_write_then_multi_read() {
    let plc = Plc::new()
        .with_symbol("MAIN.a", vec![0, 0])
        .with_symbol("MAIN.b", vec![0, 0, 0, 0]);
    let (client, plc, _inject) = connect_plc(plc);

    let mut writes = batch();
    writes[0].set("value", -3).unwrap();
    writes[1].set("value", 5).unwrap();
    writes[2].set("value", 70_000).unwrap();
    client.multi_write(&mut writes).await.unwrap();
    assert_eq!(writes[0].error(), None);
    assert_eq!(writes[1].error(), Some(SYMBOL_NOT_FOUND));
    assert_eq!(writes[2].error(), None);

    let mut reads = batch();
    client.multi_read(&mut reads).await.unwrap();
    assert_eq!(reads[0].get("value"), Some(&Value::Int(-3)));
    assert_eq!(reads[1].error(), Some(SYMBOL_NOT_FOUND));
    assert_eq!(reads[2].get("value"), Some(&Value::Int(70_000)));

    // Resolved handles are reused; the failed one is tried again.
    client.multi_read(&mut reads).await.unwrap();
    assert_eq!(reads[1].error(), Some(SYMBOL_NOT_FOUND));

    client.end().await.unwrap();
    let plc = plc.await.unwrap();
    assert_eq!(
        plc.lookups,
        ["MAIN.a", "MAIN.missing", "MAIN.b", "MAIN.a", "MAIN.missing", "MAIN.b", "MAIN.missing"]
    );
    assert_eq!(plc.released, [0x100, 0x101, 0x100, 0x101]);
}

#[tokio::test]
async fn test_multi_read_reports_entry_errors() {
    let plc = Plc::new().with_symbol("MAIN.a", vec![4, 0]);
    let (client, plc, _inject) = connect_plc(plc);

    let mut handles = vec![
        Handle::symbol("MAIN.a").with_type(INT),
        Handle::address(index_group::RW_SYMVAL_BYHANDLE, 0x999).with_type(INT),
    ];
    client.multi_read(&mut handles).await.unwrap();
    assert_eq!(handles[0].get("value"), Some(&Value::Int(4)));
    assert_eq!(handles[1].error(), Some(INVALID_HANDLE));
    assert!(handles[1].error_as_ads().is_some());

    client.end().await.unwrap();
    plc.await.unwrap();
}

#[tokio::test]
async fn test_empty_batches_send_nothing() {
    let (client, mut device) = pair(config());

    client.multi_read(&mut []).await.unwrap();
    client.multi_write(&mut []).await.unwrap();
    client.get_handles(&mut []).await.unwrap();

    client.end().await.unwrap();
    assert!(device.next().await.is_none());
}

fn upload_plc() -> Plc {
    let mut symbols = symbol_entry(0x4020, 0, 2, "MAIN.counter", "INT", "cycle count");
    symbols.extend(symbol_entry(0x4020, 2, 6, "MAIN.levels", "ARRAY [0..2] OF INT", ""));
    symbols.extend(symbol_entry(0x4020, 8, 8, "MAIN.grid", "ARRAY [1..2,1..2] OF WORD", ""));

    let datatypes = datatype_entry(
        "ST_Motor",
        "",
        6,
        None,
        vec![
            datatype_entry("position", "DINT", 4, Some(0), Vec::new()),
            datatype_entry("speed", "INT", 2, Some(4), Vec::new()),
        ],
    );
    Plc::new().with_upload(symbols, datatypes)
}

#[tokio::test]
async fn test_get_handles_bad_entry_still_releases_resolved() {
    let (client, mut device) = pair(config());

    let device_task = tokio::spawn(async move {
        let lookup = next_request(&mut device).await;
        let mut body = Vec::new();
        for (code, len) in [(0u32, 4u32), (0, 2)] {
            body.extend_from_slice(&code.to_le_bytes());
            body.extend_from_slice(&len.to_le_bytes());
        }
        body.extend_from_slice(&0x100u32.to_le_bytes());
        body.extend_from_slice(&[0xAA, 0xBB]);
        device.send(reply(&lookup, read_ok(&body))).await.unwrap();

        let release = next_request(&mut device).await;
        device.send(reply(&release, result(0))).await.unwrap();
        (device, release)
    });

    let mut handles = vec![
        Handle::symbol("MAIN.a").with_type(INT),
        Handle::symbol("MAIN.b").with_type(INT),
    ];
    let err = client.get_handles(&mut handles).await.unwrap_err();
    assert!(matches!(err, AdsError::Decode { .. }), "{err:?}");
    assert_eq!(handles[0].symbol_handle(), Some(0x100));
    assert_eq!(handles[1].symbol_handle(), None);

    client.end().await.unwrap();
    let (mut device, release) = device_task.await.unwrap();
    assert_eq!(release.command_id(), CommandId::Write as u16);
    let mut p = release.payload.clone();
    assert_eq!(p.get_u32_le(), index_group::RELEASE_SYMHANDLE);
    let _offset = p.get_u32_le();
    assert_eq!(p.get_u32_le(), 4);
    assert_eq!(p.get_u32_le(), 0x100);
    assert!(device.next().await.is_none());
}

#[tokio::test]
async fn test_get_symbols() {
    let (client, plc, _inject) = connect_plc(upload_plc());

    let info = client.upload_info().await.unwrap();
    assert!(info.symbol_length > 0);

    let symbols = client.get_symbols(false).await.unwrap();
    let names: Vec<_> = symbols.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        ["MAIN.counter", "MAIN.levels[0]", "MAIN.levels[1]", "MAIN.levels[2]", "MAIN.grid"]
    );
    assert_eq!(symbols[0].comment, "cycle count");
    assert_eq!(symbols[2].type_name, "INT");
    assert_eq!(symbols[2].array_index, Some(1));
    assert_eq!(symbols[4].type_name, "ARRAY [1..2,1..2] OF WORD");

    let raw = client.get_symbols(true).await.unwrap();
    assert_eq!(raw.len(), 3);
    assert_eq!(raw[1].type_name, "ARRAY [0..2] OF INT");

    client.end().await.unwrap();
    plc.await.unwrap();
}

#[tokio::test]
async fn test_get_datatypes() {
    let (client, plc, _inject) = connect_plc(upload_plc());

    let datatypes = client.get_datatypes().await.unwrap();
    assert_eq!(datatypes.len(), 1);
    let motor = &datatypes[0];
    assert_eq!(motor.name, "ST_Motor");
    assert_eq!(motor.offset, None);
    assert_eq!(motor.index, None);
    let members: Vec<_> = motor
        .children
        .iter()
        .map(|c| (c.name.as_str(), c.type_name.as_str(), c.offset, c.index))
        .collect();
    assert_eq!(
        members,
        [
            ("position", "DINT", Some(0), Some(1)),
            ("speed", "INT", Some(4), Some(2)),
        ]
    );

    client.end().await.unwrap();
    plc.await.unwrap();
}
