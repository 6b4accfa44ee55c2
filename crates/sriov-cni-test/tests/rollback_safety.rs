//! Rollback safety tests
//!
//! Injects a failure at every point of an attach and checks that the VF
//! ends up exactly as it was before.

use pretty_assertions::assert_eq;

use sriov_cni::{AttachPhase, VfAttrKind};
use sriov_cni_common::VfError;
use sriov_cni_test::{
    requests, FakeNic, LinkStep, NicVerifier, RequestBuilder, VfSnapshot, CONTAINER_IFNAME,
};

#[tokio::test]
async fn test_every_attribute_failure_rolls_back() {
    for kind in VfAttrKind::ORDER {
        let nic = FakeNic::new();
        let before = VfSnapshot::capture(&nic, 1);
        nic.fail_attr_once(kind);

        let config = requests::fully_configured().build().resolve().unwrap();
        let err = nic
            .manager()
            .attach(config, &FakeNic::container_netns(), CONTAINER_IFNAME)
            .await
            .unwrap_err();

        assert_eq!(err.phase, AttachPhase::RolledBack, "failing {}", kind);
        match &err.cause {
            VfError::LinkConfig { attribute, .. } => assert_eq!(attribute, kind.as_str()),
            other => panic!("failing {}: unexpected cause {}", kind, other),
        }
        assert!(err.secondary.is_none(), "failing {}", kind);
        NicVerifier::new(&nic)
            .assert_unchanged(1, &before)
            .unwrap_or_else(|e| panic!("failing {}: {}", kind, e));
    }
}

#[tokio::test]
async fn test_every_move_step_failure_rolls_back() {
    let steps = [
        LinkStep::Down,
        LinkStep::Move,
        LinkStep::Rename,
        LinkStep::SetMac,
        LinkStep::Up,
    ];
    for step in steps {
        let nic = FakeNic::new();
        let before = VfSnapshot::capture(&nic, 1);
        nic.fail_step_once(step);

        let config = requests::fully_configured().build().resolve().unwrap();
        let err = nic
            .manager()
            .attach(config, &FakeNic::container_netns(), CONTAINER_IFNAME)
            .await
            .unwrap_err();

        assert_eq!(err.phase, AttachPhase::RolledBack, "failing {:?}", step);
        assert!(
            matches!(err.cause, VfError::NamespaceMove { .. }),
            "failing {:?}: {}",
            step,
            err.cause
        );
        assert!(err.secondary.is_none(), "failing {:?}", step);
        NicVerifier::new(&nic)
            .assert_unchanged(1, &before)
            .unwrap_or_else(|e| panic!("failing {:?}: {}", step, e));
    }
}

#[tokio::test]
async fn test_snapshot_failure_aborts_without_mutation() {
    let nic = FakeNic::new();
    nic.fail_reads();

    let config = requests::fully_configured().build().resolve().unwrap();
    let err = nic
        .manager()
        .attach(config, &FakeNic::container_netns(), CONTAINER_IFNAME)
        .await
        .unwrap_err();

    assert_eq!(err.phase, AttachPhase::Aborted);
    assert!(matches!(err.cause, VfError::Snapshot { .. }));
    assert_eq!(err.cause.cni_code(), 101);
    assert_eq!(nic.mutations(), 0);
}

#[tokio::test]
async fn test_unknown_device_aborts_without_mutation() {
    let nic = FakeNic::new();

    let config = RequestBuilder::new("0000:03:02.7")
        .with("vlan", serde_json::json!(10))
        .build()
        .resolve()
        .unwrap();
    let err = nic
        .manager()
        .attach(config, &FakeNic::container_netns(), CONTAINER_IFNAME)
        .await
        .unwrap_err();

    assert_eq!(err.phase, AttachPhase::Aborted);
    assert_eq!(err.cause.cni_code(), 100);
    assert_eq!(nic.mutations(), 0);
}

#[tokio::test]
async fn test_failed_rollback_is_reported_as_secondary() {
    let nic = FakeNic::new();
    // Everything is configured, the move fails and so does the trust replay.
    nic.fail_step_once(LinkStep::Up);
    nic.fail_attr(VfAttrKind::Trust, 1);

    let config = requests::fully_configured().build().resolve().unwrap();
    let err = nic
        .manager()
        .attach(config, &FakeNic::container_netns(), CONTAINER_IFNAME)
        .await
        .unwrap_err();

    assert_eq!(err.phase, AttachPhase::RolledBack);
    assert!(matches!(err.cause, VfError::NamespaceMove { .. }));
    let secondary = err.secondary.expect("rollback should have failed");
    assert!(matches!(secondary, VfError::Restore { .. }));
    assert!(secondary.to_string().contains("trust"));

    // Everything except trust was still replayed.
    let entry = nic.vf(1);
    assert_eq!(entry.vlan, 0);
    assert_eq!(entry.max_tx_rate, 0);
    assert!(entry.spoofchk);
    assert!(entry.trust);
}

#[tokio::test]
async fn test_rollback_order_matches_configuration_order() {
    let nic = FakeNic::new();
    nic.fail_step_once(LinkStep::Up);

    let config = requests::fully_configured().build().resolve().unwrap();
    nic.manager()
        .attach(config, &FakeNic::container_netns(), CONTAINER_IFNAME)
        .await
        .unwrap_err();

    let log = nic.log();
    let replay: Vec<&str> = log
        .iter()
        .skip_while(|l| !l.starts_with("move_link enp3s0f0v1 /proc/1/ns/net"))
        .filter(|l| l.starts_with("ip link set"))
        .map(String::as_str)
        .collect();
    assert_eq!(
        replay,
        vec![
            "ip link set dev enp3s0f0 vf 1 mac \"00:00:00:00:00:00\"",
            "ip link set dev enp3s0f0 vf 1 vlan 0 qos 0 proto 802.1q",
            "ip link set dev enp3s0f0 vf 1 min_tx_rate 0 max_tx_rate 0",
            "ip link set dev enp3s0f0 vf 1 spoofchk on",
            "ip link set dev enp3s0f0 vf 1 trust off",
            "ip link set dev enp3s0f0 vf 1 state auto",
        ]
    );
}
