use anyhow::{anyhow, Result};
use futures::FutureExt;
use p4ptf::runtime::{
    Entity,
    MulticastGroupEntry,
    PipelineResponseType,
    StreamMessageResponse,
    TableEntry,
    Update,
    UpdateType,
};
use p4ptf::sim::{Arbitration, SimDevice};
use p4ptf::status::Code;
use p4ptf::{
    EntityKind,
    LoopbackDataPlane,
    MatchValue,
    P4Error,
    P4RuntimeTest,
    Schema,
    TestConfig,
    Value,
    DEFAULT_PRIORITY,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

const HOST1_MAC: &str = "00:00:00:00:00:1a";
const HOST2_MAC: &str = "00:00:00:00:00:1b";
const BROADCAST_MAC: &str = "ff:ff:ff:ff:ff:ff";
const MCAST_GROUP_ID: u32 = 10;
const CPU_CLONE_SESSION_ID: u32 = 99;

fn p4info_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data/l2.p4info.txt")
}

fn config() -> TestConfig {
    TestConfig {
        p4info: Some(p4info_path()),
        pipeline_action: Some("verify-and-commit".into()),
        ports: vec![1, 2, 3, 4],
        packet_timeout_ms: 500,
        ..Default::default()
    }
}

async fn set_up(device: &Arc<SimDevice>) -> Result<P4RuntimeTest> {
    P4RuntimeTest::set_up(config(), device.clone(), Arc::new(LoopbackDataPlane::new())).await
}

/// Waits until the device has received `count` packet-outs.
async fn wait_for_packets_out(device: &SimDevice, count: usize) -> Result<()> {
    for _ in 0..50 {
        if device.packets_out().len() >= count {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Err(anyhow!("device received {} packet-out(s), expected {}", device.packets_out().len(), count))
}

fn l2_exact_entry(schema: &Schema, mac: &str, port: u32) -> Result<TableEntry> {
    let action = schema.build_action("set_egress_port", &[("port_num", port.into())])?;
    Ok(schema.build_table_entry(
        "IngressPipeImpl.l2_exact_table",
        &[("hdr.ethernet.dst_addr", MatchValue::exact(mac))],
        Some(action),
        None,
        None,
        false,
    )?)
}

#[tokio::test]
#[traced_test]
async fn bridging() -> Result<()> {
    let device = Arc::new(SimDevice::new(1));
    let mut test = set_up(&device).await?;

    // The pipeline was pushed during set-up.
    let pipeline = test
        .stream()
        .get_forwarding_pipeline_config(PipelineResponseType::P4InfoAndCookie)
        .await?;
    let pushed = Schema::from_text(&pipeline.p4info)?;
    assert_eq!(pushed.tables.len(), 4);

    let dev = device.clone();
    test.autocleanup(|t| {
        async move {
            let schema = t.schema()?.clone();
            let port1 = t.swport(0)?;
            let port2 = t.swport(1)?;

            t.insert(l2_exact_entry(&schema, HOST1_MAC, port1)?).await?;
            t.insert(l2_exact_entry(&schema, HOST2_MAC, port2)?).await?;

            let ports: Vec<u32> = t.config().ports.clone();
            t.insert_multicast_group(MCAST_GROUP_ID, &ports).await?;
            let flood =
                schema.build_action("set_multicast_group", &[("gid", MCAST_GROUP_ID.into())])?;
            let broadcast = schema.build_table_entry(
                "l2_ternary_table",
                &[("hdr.ethernet.dst_addr", MatchValue::ternary(BROADCAST_MAC, BROADCAST_MAC))],
                Some(flood),
                None,
                Some(DEFAULT_PRIORITY),
                false,
            )?;
            t.insert(broadcast).await?;

            let cpu_port = t.cpu_port();
            t.insert_clone_session(CPU_CLONE_SESSION_ID, &[cpu_port], 0, 0).await?;

            // Both exact entries, read back with a table wildcard.
            let table_id = schema.resolve(EntityKind::Table, "l2_exact_table")?;
            let wildcard = TableEntry {
                table_id,
                matches: vec![],
                action: None,
                priority: 0,
                is_default_action: false,
            };
            assert_eq!(t.read(vec![wildcard.into()]).await?.len(), 2);
            assert_eq!(dev.entities().len(), 5);

            // Data plane: the loopback returns what was sent.
            let frame = [0xffu8; 64];
            t.send_packet(port1, &frame).await?;
            t.verify_packet(&frame, port1).await?;
            t.verify_no_other_packets().await?;
            Ok::<(), anyhow::Error>(())
        }
        .boxed()
    })
    .await?;

    assert!(device.entities().is_empty());
    test.tear_down().await;
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn ecmp_group() -> Result<()> {
    let device = Arc::new(SimDevice::new(1));
    let mut test = set_up(&device).await?;
    let schema = test.schema()?.clone();

    let hops = ["00:00:00:00:00:aa", "00:00:00:00:00:bb"]
        .iter()
        .map(|mac| -> Result<_> {
            Ok((schema.build_action("set_next_hop", &[("dmac", (*mac).into())])?, 1))
        })
        .collect::<Result<Vec<_>>>()?;
    let group = schema.build_action_profile_group("ecmp_selector", None, hops)?;
    let group_id = group.group.group_id;
    let route = schema.build_table_entry(
        "routing_v6_table",
        &[("hdr.ipv6.dst_addr", MatchValue::lpm("2001:db8::", 64))],
        None,
        Some(group_id),
        None,
        false,
    )?;

    let entities: Vec<Entity> = group.into_entities();
    assert_eq!(entities.len(), 3);
    test.insert_all(entities).await?;
    test.insert(route).await?;
    assert_eq!(device.entities().len(), 4);
    assert_eq!(test.log().len(), 4);

    test.undo_write_requests().await?;
    assert!(device.entities().is_empty());
    // The undo batch deletes the route first and the members last.
    let writes = device.writes();
    let undo = &writes[writes.len() - 1];
    assert!(matches!(undo.updates[0].entity, Entity::TableEntry(_)));
    assert!(matches!(undo.updates[3].entity, Entity::ActionProfileMember(_)));

    test.tear_down().await;
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn packet_io() -> Result<()> {
    let device = Arc::new(SimDevice::new(1));
    let mut test = set_up(&device).await?;
    let schema = test.schema()?.clone();
    let payload = b"\x00\x00\x00\x00\x00\x1b\x00\x00\x00\x00\x00\x1a\x08\x06".to_vec();

    for port in [test.swport(0)?, test.swport(1)?] {
        let packet_out = schema.build_packet_out(
            payload.clone(),
            &[("egress_port", port.into()), ("_pad", Value::Int(0))],
        )?;
        test.send_packet_out(packet_out)?;
    }
    wait_for_packets_out(&device, 2).await?;
    let egress: Vec<Vec<u8>> = device
        .packets_out()
        .iter()
        .map(|p| p.metadata[0].value.clone())
        .collect();
    assert_eq!(egress, vec![vec![0, 1], vec![0, 2]]);

    let ingress_port = test.swport(2)?;
    let packet_in =
        schema.build_packet_in(payload.clone(), &[("ingress_port", ingress_port.into())])?;
    device.inject(StreamMessageResponse::Digest(Default::default()));
    device.inject_packet_in(packet_in.clone());
    test.verify_packet_in(&packet_in, None).await?;

    // A packet-in from another port does not match.
    device.inject_packet_in(schema.build_packet_in(payload, &[("ingress_port", 4u32.into())])?);
    assert!(test.verify_packet_in(&packet_in, None).await.is_err());

    test.tear_down().await;
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn write_errors() -> Result<()> {
    let device = Arc::new(SimDevice::new(1));
    let mut test = set_up(&device).await?;
    let schema = test.schema()?.clone();

    test.insert_multicast_group(1, &[1, 2]).await?;
    let mut request = test.new_write_request();
    request.updates = vec![
        Update::insert(l2_exact_entry(&schema, HOST1_MAC, 1)?),
        Update::insert(MulticastGroupEntry::with_ports(1, vec![3])),
        Update::delete(MulticastGroupEntry::with_ports(2, vec![])),
    ];
    let e = test.write_request(request, true).await.unwrap_err();
    match &e {
        P4Error::Write(errors) => {
            let codes: Vec<(usize, Code)> = errors.iter().map(|e| (e.index, e.code)).collect();
            assert_eq!(codes, vec![(1, Code::AlreadyExists), (2, Code::NotFound)]);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(e.to_string().starts_with("Error(s) during Write:\n\t* At index 1: ALREADY_EXISTS"));
    // The failed batch is not recorded, so only the first group is undone.
    assert_eq!(test.log().len(), 1);
    test.undo_write_requests().await?;
    assert_eq!(device.entities().len(), 1);

    test.tear_down().await;
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn undo_deletes_the_inserted_entry() -> Result<()> {
    let device = Arc::new(SimDevice::new(1));
    let mut test = set_up(&device).await?;
    let schema = test.schema()?.clone();

    let entry = l2_exact_entry(&schema, HOST2_MAC, 2)?;
    test.insert(entry.clone()).await?;
    let batches = test.log().batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].updates, vec![Update::insert(entry.clone())]);
    assert_eq!(device.entities(), vec![Entity::TableEntry(entry.clone())]);

    test.undo_write_requests().await?;
    let undo = device
        .writes()
        .pop()
        .ok_or_else(|| anyhow!("no write reached the device"))?;
    assert_eq!(undo.updates.len(), 1);
    assert_eq!(undo.updates[0].update_type, UpdateType::Delete);
    assert_eq!(undo.updates[0].entity, Entity::TableEntry(entry));
    assert!(device.entities().is_empty());
    assert!(test.log().is_empty());

    test.tear_down().await;
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn rejected_arbitration() -> Result<()> {
    let device = Arc::new(SimDevice::new(1));
    device.set_arbitration(Arbitration::Reject(Code::PermissionDenied));
    let e = match set_up(&device).await {
        Ok(_) => panic!("set-up succeeded without arbitration"),
        Err(e) => e,
    };
    assert!(matches!(
        e.downcast_ref::<P4Error>(),
        Some(P4Error::ArbitrationFailed { device_id: 1, .. })
    ));

    // A device that never answers times out.
    device.set_arbitration(Arbitration::Silent);
    let config = TestConfig {
        arbitration_timeout_ms: 100,
        ..Default::default()
    };
    let result =
        P4RuntimeTest::with_schema(config, None, device.clone(), Arc::new(LoopbackDataPlane::new()))
            .await;
    assert!(result.is_err());
    Ok(())
}
