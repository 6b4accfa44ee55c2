//! CHECK semantics and CNI request handling
//!
//! Drives ADD, DEL, CHECK and VERSION through the CNI dispatcher the way
//! the binary does, with the in-memory NIC underneath.

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use sriov_cni::cni::{self, CniCommand};
use sriov_cni::VfInfo;
use sriov_cni_common::{Mismatch, VfError};
use sriov_cni_test::{
    cni_args, fake_nic::CONTAINER_NETNS, requests, FakeNic, NicVerifier, RequestBuilder,
    VfSnapshot, CONTAINER_IFNAME, DEVICE,
};

async fn add(nic: &FakeNic, request: &RequestBuilder) -> Value {
    let args = cni_args("ADD", Some(CONTAINER_NETNS), CONTAINER_IFNAME);
    cni::handle(&nic.manager(), CniCommand::Add, &args, &request.build())
        .await
        .unwrap()
        .expect("ADD returns a result")
}

#[tokio::test]
async fn test_check_reports_vlan_mismatch() {
    let nic = FakeNic::new();
    let mgr = nic.manager();
    let ctr = FakeNic::container_netns();
    let bare = requests::bare().build().resolve().unwrap();
    mgr.attach(bare, &ctr, CONTAINER_IFNAME).await.unwrap();

    let mut live = VfInfo::new(1);
    live.vlan = 200;
    nic.set_vf_entry(1, live);

    let desired = RequestBuilder::new(DEVICE)
        .with("vlan", json!(100))
        .build()
        .resolve()
        .unwrap();
    let err = mgr.check(&desired, &ctr, CONTAINER_IFNAME).await.unwrap_err();
    match err {
        VfError::CheckMismatch { mismatches } => {
            assert_eq!(mismatches, vec![Mismatch::new("vlan", 100, 200)]);
        }
        other => panic!("unexpected error {}", other),
    }

    // Nothing requested, nothing compared.
    let unset = requests::bare().build().resolve().unwrap();
    mgr.check(&unset, &ctr, CONTAINER_IFNAME).await.unwrap();
}

#[tokio::test]
async fn test_check_does_not_mutate() {
    let nic = FakeNic::new();
    let mgr = nic.manager();
    let ctr = FakeNic::container_netns();
    let config = requests::fully_configured().build().resolve().unwrap();
    mgr.attach(config.clone(), &ctr, CONTAINER_IFNAME)
        .await
        .unwrap();

    let writes = nic.mutations();
    mgr.check(&config, &ctr, CONTAINER_IFNAME).await.unwrap();
    assert_eq!(nic.mutations(), writes);
}

#[tokio::test]
async fn test_check_requires_interface_in_container() {
    let nic = FakeNic::new();
    let config = requests::bare().build().resolve().unwrap();
    let err = nic
        .manager()
        .check(&config, &FakeNic::container_netns(), CONTAINER_IFNAME)
        .await
        .unwrap_err();
    assert_eq!(err.cni_code(), 105);
}

#[tokio::test]
async fn test_add_result_and_del_from_record() {
    let nic = FakeNic::new();
    let before = VfSnapshot::capture(&nic, 1);

    let result = add(&nic, &requests::vlan10_spoofchk_off()).await;
    assert_eq!(result["cniVersion"], "1.0.0");
    assert_eq!(result["interfaces"][0]["name"], CONTAINER_IFNAME);
    assert_eq!(result["interfaces"][0]["mac"], "52:54:00:00:03:01");
    assert_eq!(result["interfaces"][0]["sandbox"], CONTAINER_NETNS);
    assert_eq!(result["attachRecord"]["config"]["vfIndex"], 1);
    assert_eq!(result["attachRecord"]["origVfState"]["HostIFName"], "enp3s0f0v1");
    assert_eq!(result["attachRecord"]["origVfState"]["SpoofChk"], true);
    assert_eq!(result["attachRecord"]["origVfState"]["VlanProto"], 33024);

    let check = requests::vlan10_spoofchk_off()
        .with_prev_result(result["attachRecord"].clone())
        .build();
    let args = cni_args("CHECK", Some(CONTAINER_NETNS), CONTAINER_IFNAME);
    let out = cni::handle(&nic.manager(), CniCommand::Check, &args, &check)
        .await
        .unwrap();
    assert!(out.is_none());

    let del = requests::vlan10_spoofchk_off()
        .with_attach_record(result["attachRecord"].clone())
        .build();
    let args = cni_args("DEL", Some(CONTAINER_NETNS), CONTAINER_IFNAME);
    let out = cni::handle(&nic.manager(), CniCommand::Del, &args, &del)
        .await
        .unwrap();
    assert!(out.is_none());

    NicVerifier::new(&nic).assert_unchanged(1, &before).unwrap();
}

#[tokio::test]
async fn test_del_reads_record_from_prev_result() {
    let nic = FakeNic::new();
    let result = add(&nic, &requests::fully_configured()).await;

    let del = requests::bare()
        .with_prev_result(result["attachRecord"].clone())
        .build();
    let args = cni_args("DEL", Some(CONTAINER_NETNS), CONTAINER_IFNAME);
    cni::handle(&nic.manager(), CniCommand::Del, &args, &del)
        .await
        .unwrap();

    assert_eq!(nic.vf(1), VfInfo::new(1));
}

#[tokio::test]
async fn test_del_without_record_is_restore_error() {
    let nic = FakeNic::new();
    let args = cni_args("DEL", Some(CONTAINER_NETNS), CONTAINER_IFNAME);
    let err = cni::handle(&nic.manager(), CniCommand::Del, &args, &requests::bare().build())
        .await
        .unwrap_err();

    assert_eq!(err.code, 104);
    assert_eq!(nic.mutations(), 0);
}

#[tokio::test]
async fn test_vlan_proto_mapping() {
    let nic = FakeNic::new();
    add(
        &nic,
        &RequestBuilder::new(DEVICE)
            .with("vlan", json!(30))
            .with("vlanProto", json!("802.1ad")),
    )
    .await;
    assert_eq!(nic.vf(1).vlan_proto, 34984);

    let nic = FakeNic::new();
    add(
        &nic,
        &RequestBuilder::new(DEVICE)
            .with("vlan", json!(30))
            .with("vlanProto", json!("802.1q")),
    )
    .await;
    assert_eq!(nic.vf(1).vlan_proto, 33024);
}

#[tokio::test]
async fn test_invalid_requests_touch_nothing() {
    let bad = [
        RequestBuilder::new(DEVICE)
            .with("vlan", json!(30))
            .with("vlanProto", json!("802.1x")),
        RequestBuilder::new(DEVICE)
            .with("min_tx_rate", json!(50))
            .with("max_tx_rate", json!(10)),
        RequestBuilder::new(DEVICE).with("vlan", json!(4095)),
        RequestBuilder::new(DEVICE).with("link_state", json!("up")),
        RequestBuilder::new(DEVICE).with("spoofchk", json!("yes")),
        RequestBuilder::new(DEVICE).without("deviceID"),
    ];

    for request in bad {
        let nic = FakeNic::new();
        let args = cni_args("ADD", Some(CONTAINER_NETNS), CONTAINER_IFNAME);
        let err = cni::handle(&nic.manager(), CniCommand::Add, &args, &request.build())
            .await
            .unwrap_err();
        assert_eq!(err.code, 7, "request {}", request.to_json());
        assert_eq!(nic.mutations(), 0, "request {}", request.to_json());
    }
}

#[tokio::test]
async fn test_min_rate_with_unlimited_max_is_accepted() {
    let nic = FakeNic::new();
    add(
        &nic,
        &RequestBuilder::new(DEVICE)
            .with("min_tx_rate", json!(50))
            .with("max_tx_rate", json!(0)),
    )
    .await;
    assert_eq!((nic.vf(1).min_tx_rate, nic.vf(1).max_tx_rate), (50, 0));
}

#[tokio::test]
async fn test_failed_add_reports_code_and_phase() {
    let nic = FakeNic::new();
    nic.fail_attr_once(sriov_cni::VfAttrKind::Vlan);

    let args = cni_args("ADD", Some(CONTAINER_NETNS), CONTAINER_IFNAME);
    let err = cni::handle(
        &nic.manager(),
        CniCommand::Add,
        &args,
        &requests::vlan10_spoofchk_off().build(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.code, 102);
    assert!(err.msg.contains("'vlan'"));
    assert!(err.details.contains("rolled-back"));
    assert_eq!(nic.vf(1), VfInfo::new(1));
}

#[tokio::test]
async fn test_add_requires_netns() {
    let nic = FakeNic::new();
    let args = cni_args("ADD", None, CONTAINER_IFNAME);
    let err = cni::handle(&nic.manager(), CniCommand::Add, &args, &requests::bare().build())
        .await
        .unwrap_err();
    assert_eq!(err.code, 4);
}

#[tokio::test]
async fn test_version_command() {
    let nic = FakeNic::new();
    let args = cni_args("VERSION", None, CONTAINER_IFNAME);
    let out = cni::handle(&nic.manager(), CniCommand::Version, &args, &requests::bare().build())
        .await
        .unwrap()
        .unwrap();
    assert!(out["supportedVersions"]
        .as_array()
        .unwrap()
        .contains(&json!("0.4.0")));
}
