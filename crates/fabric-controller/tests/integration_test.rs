//! End-to-end tests: configuration file to installed entries and counter
//! output, using in-process switches.

use fabric_controller::tables::{INGRESS_TUNNEL_COUNTER, SWTRACE_TABLE, TUNNEL_EXACT_TABLE};
use fabric_controller::{
    installation_order, simulated_sessions, CompositionError, ControllerConfig,
    DeviceSynchronizer, FabricController, ForwardingIntent, InstallationPlanner, IntentKind,
    ObservationLoop, ObservationOutcome, PlanStatus, RuleComposer, SessionMap, SyncMode,
    TextSink, TunnelIntent,
};
use fabric_p4rt::{
    ChannelError, CounterData, DeviceSession, EntryRequest, MemorySession, P4InfoResolver,
    SchemaResolver, StatusCode,
};
use fabric_types::{DeviceId, Ipv4Address};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config")
}

fn load() -> (ControllerConfig, P4InfoResolver) {
    let config = ControllerConfig::load(config_dir().join("topology.yaml")).unwrap();
    let schema = P4InfoResolver::load(&config.p4info).unwrap();
    (config, schema)
}

fn s(name: &str) -> DeviceId {
    DeviceId::new(name).unwrap()
}

fn memory_sessions(names: &[&str]) -> (SessionMap, Vec<Arc<MemorySession>>) {
    let mut map = SessionMap::new();
    let mut fakes = Vec::new();
    for name in names {
        let session = Arc::new(MemorySession::new(s(name)));
        map.insert(s(name), session.clone() as Arc<dyn DeviceSession>);
        fakes.push(session);
    }
    (map, fakes)
}

fn tunnel_s1_s2() -> ForwardingIntent {
    ForwardingIntent::Tunnel(TunnelIntent {
        ingress: s("s1"),
        egress: s("s2"),
        tunnel_id: 100,
        dst_ip: Ipv4Address::new(10, 0, 2, 2),
        dst_mac: "08:00:00:00:02:22".parse().unwrap(),
        transit_port: None,
    })
}

async fn dump(schema: &P4InfoResolver, session: &dyn DeviceSession) -> Vec<String> {
    session
        .read_table_entries()
        .await
        .unwrap()
        .iter()
        .map(|e| schema.decode_entry(e).unwrap().to_string())
        .collect()
}

#[test]
fn test_sample_configuration_plans_cleanly() {
    let (config, schema) = load();
    let controller = FabricController::new(config, schema).unwrap();

    let plans: Vec<_> = controller
        .plan()
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(plans.len(), 18);
    assert_eq!(installation_order(&plans).count(), 30);
}

#[tokio::test]
async fn test_tunnel_installs_expected_entries() {
    let (config, schema) = load();
    let topology = config.topology().unwrap();
    let planner = InstallationPlanner::new(RuleComposer::new(&schema, &topology));
    let plans: Vec<_> = planner
        .plan(&[tunnel_s1_s2()])
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();

    let (sessions, fakes) = memory_sessions(&["s1", "s2", "s3"]);
    let report = DeviceSynchronizer::default()
        .synchronize(&plans, &sessions)
        .await;
    assert!(report.all_installed());

    assert_eq!(
        dump(&schema, fakes[0].as_ref()).await,
        vec![
            "MyIngress.ipv4_lpm: hdr.ipv4.dstAddr 10.0.2.2/32 -> MyIngress.myTunnel_ingress dst_id 100",
            "MyIngress.myTunnel_exact: hdr.myTunnel.dst_id 100 -> MyIngress.myTunnel_forward port 2",
        ]
    );
    assert_eq!(
        dump(&schema, fakes[1].as_ref()).await,
        vec![
            "MyIngress.myTunnel_exact: hdr.myTunnel.dst_id 100 -> MyIngress.myTunnel_egress dstAddr 08:00:00:00:02:22 port 1",
        ]
    );
    assert!(fakes[2].entries().is_empty());
}

#[tokio::test]
async fn test_ecmp_group_with_two_next_hops() {
    let (config, schema) = load();
    let controller = FabricController::new(config, schema).unwrap();
    let plans: Vec<_> = controller
        .plan()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|p| p.kind.as_str().starts_with("ecmp"))
        .collect();
    assert_eq!(plans.len(), 3);

    let (sessions, fakes) = memory_sessions(&["s1"]);
    let report = DeviceSynchronizer::default()
        .synchronize(&plans, &sessions)
        .await;
    assert!(report.all_installed());

    let entries = fakes[0].entries();
    let group = controller.schema().decode_entry(&entries[0]).unwrap();
    assert_eq!(group.table, "MyIngress.ecmp_group");
    assert_eq!(group.param("ecmp_count").unwrap().value, vec![0, 0, 0, 2]);
    let lines = dump(controller.schema(), fakes[0].as_ref()).await;
    assert_eq!(
        lines[1..],
        [
            "MyIngress.ecmp_nhop: meta.ecmp_select 0 -> MyIngress.set_nhop nhop_dmac 00:00:00:00:01:02 nhop_ipv4 10.0.2.2 port 2",
            "MyIngress.ecmp_nhop: meta.ecmp_select 1 -> MyIngress.set_nhop nhop_dmac 00:00:00:00:01:03 nhop_ipv4 10.0.3.3 port 3",
        ]
    );
}

#[tokio::test]
async fn test_switch_trace_sets_each_table_default() {
    let (config, schema) = load();
    let controller = FabricController::new(config, schema).unwrap();
    let plans: Vec<_> = controller
        .plan()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|p| p.kind == IntentKind::SwitchTrace)
        .collect();
    assert_eq!(plans.len(), 3);

    let (sessions, fakes) = memory_sessions(&["s1", "s2", "s3"]);
    let report = DeviceSynchronizer::default()
        .synchronize(&plans, &sessions)
        .await;
    assert!(report.all_installed());

    let table_id = controller.schema().table(SWTRACE_TABLE).unwrap().preamble.id;
    for (swid, fake) in (1u8..).zip(&fakes) {
        let default = fake.default_entry(table_id).unwrap();
        let decoded = controller.schema().decode_entry(&default).unwrap();
        assert_eq!(decoded.param("swid").unwrap().value, vec![0, 0, 0, swid]);
        // Table defaults stay out of the entry dump.
        assert!(fake.entries().is_empty());
    }
}

#[tokio::test]
async fn test_failed_step_skips_rest_of_plan_only() {
    let (config, schema) = load();
    let topology = config.topology().unwrap();
    let planner = InstallationPlanner::new(RuleComposer::new(&schema, &topology));

    let reverse = ForwardingIntent::Tunnel(TunnelIntent {
        ingress: s("s2"),
        egress: s("s1"),
        tunnel_id: 101,
        dst_ip: Ipv4Address::new(10, 0, 1, 1),
        dst_mac: "08:00:00:00:01:11".parse().unwrap(),
        transit_port: None,
    });
    let plans: Vec<_> = planner
        .plan(&[tunnel_s1_s2(), reverse])
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();

    let (sessions, fakes) = memory_sessions(&["s1", "s2"]);
    fakes[0].fail_write(
        2,
        ChannelError::rejected(&s("s1"), StatusCode::ResourceExhausted, "table full"),
    );

    let report = DeviceSynchronizer::new(SyncMode::Sequential)
        .synchronize(&plans, &sessions)
        .await;

    assert_eq!(report.results[0].failed_step(), Some(2));
    assert_eq!(report.results[0].installed, 1);
    assert!(report.results[1].is_installed());
    // s2 only holds the second tunnel: the first plan never reached its step 3.
    let s2_tables: Vec<_> = fakes[1].entries().iter().map(|e| e.table.clone()).collect();
    assert_eq!(s2_tables, vec!["MyIngress.ipv4_lpm", TUNNEL_EXACT_TABLE]);
}

#[test]
fn test_build_then_decode_keeps_symbolic_form() {
    let (_, schema) = load();
    let request = EntryRequest::new("MyIngress.ipv4_lpm")
        .lpm("hdr.ipv4.dstAddr", Ipv4Address::new(10, 0, 1, 77), 24)
        .action("MyIngress.ipv4_forward")
        .param("dstAddr", "08:00:00:00:01:11".parse::<fabric_types::MacAddress>().unwrap())
        .param("port", 1u32);

    let entry = schema.build_entry(&request).unwrap();
    let decoded = schema.decode_entry(&entry).unwrap();
    assert_eq!(
        decoded.to_string(),
        "MyIngress.ipv4_lpm: hdr.ipv4.dstAddr 10.0.1.0/24 -> MyIngress.ipv4_forward dstAddr 08:00:00:00:01:11 port 1"
    );
}

#[test]
fn test_unknown_device_rejected_before_io() {
    let (config, schema) = load();
    let topology = config.topology().unwrap();
    let planner = InstallationPlanner::new(RuleComposer::new(&schema, &topology));

    let mut intent = tunnel_s1_s2();
    if let ForwardingIntent::Tunnel(t) = &mut intent {
        t.egress = s("s9");
    }
    let results = planner.plan(&[intent]);
    assert_eq!(
        results[0].as_ref().unwrap_err(),
        &CompositionError::UnknownDevice(s("s9"))
    );
}

#[tokio::test]
async fn test_observation_stops_on_cancel_and_closes_sessions() {
    let (_, schema) = load();
    let (sessions, fakes) = memory_sessions(&["s1", "s2"]);
    fakes[0].set_counter(309010261, 100, CounterData { packets: 7, bytes: 686 });

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let mut sink = TextSink::new(Vec::new());
    let summary = ObservationLoop::new(&schema, &sessions)
        .with_interval(Duration::from_millis(5))
        .with_table_dump(false)
        .with_probes(fabric_controller::tunnel_counters(&[tunnel_s1_s2()]))
        .run(&mut sink, &cancel)
        .await
        .unwrap();

    assert!(summary.cycles >= 1);
    assert!(fakes.iter().all(|f| f.is_closed()));
    let text = String::from_utf8(sink.into_inner()).unwrap();
    assert!(text.contains(&format!("s1 {INGRESS_TUNNEL_COUNTER} 100: 7 packets (686 bytes)")));
}

#[tokio::test]
async fn test_full_run_records_requests() {
    let dir = tempfile::tempdir().unwrap();
    let (mut config, schema) = load();
    for device in &mut config.devices {
        device.proto_dump = Some(dir.path().join(format!("{}-p4runtime-requests.txt", device.name)));
    }
    config.observe.interval_ms = 1;

    let controller = FabricController::new(config, schema)
        .unwrap()
        .with_max_cycles(2);
    let sessions = simulated_sessions(controller.topology());
    let mut sink = TextSink::new(Vec::new());
    let report = controller
        .run(&sessions, &mut sink, &CancellationToken::new())
        .await;

    assert!(report.is_success());
    assert_eq!(report.sync.installed_steps(), 30);
    assert_eq!(report.observation, ObservationOutcome::Completed { cycles: 2 });
    assert!(report
        .sync
        .results
        .iter()
        .all(|r| r.status == PlanStatus::Installed));

    let s1_dump = std::fs::read_to_string(dir.path().join("s1-p4runtime-requests.txt")).unwrap();
    let writes = s1_dump
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap())
        .filter(|v| v["request"] == "write")
        .count();
    // s1: four tunnels, three ecmp entries, two rewrites, four classifiers
    // and its trace default.
    assert_eq!(writes, 6 + 3 + 2 + 4 + 1);

    let text = String::from_utf8(sink.into_inner()).unwrap();
    assert!(text.contains("----- s3 -> s2 -----"));
}
