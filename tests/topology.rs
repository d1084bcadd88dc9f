mod common;

use common::{ip, lan};
use lansim::{logging::Verbosity, DeviceKind, DeviceRole, RequestError, SendError};
use ntest::timeout;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
#[timeout(10000)]
async fn display_lists_interfaces_and_peers() -> anyhow::Result<()> {
    let mut lan = lan();
    let switch = lan.switch(&[])?;
    let host = lan.host(&["10.0.0.5/24"], &[&*switch])?;

    let shown = host.device().to_string();
    assert!(shown.starts_with("H2"));
    assert!(shown.contains("eth0"));
    assert!(shown.contains("10.0.0.5/24"));
    assert!(shown.contains("S1"));
    assert!(switch.device().to_string().contains("unassigned"));
    assert!(lan.to_string().contains("H2"));
    assert_eq!(host.kind(), DeviceKind::Host);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[timeout(10000)]
async fn waits_observe_stop() -> anyhow::Result<()> {
    let mut lan = lan();
    let switch = lan.switch(&[])?;
    let a = lan.host(&["10.0.0.1/24"], &[&*switch])?;

    let waiter = {
        let a = a.clone();
        tokio::spawn(async move {
            a.send_arp_on(ip(10, 0, 0, 50), 0, Duration::from_secs(30))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    a.stop();
    assert!(a.is_stopped());
    assert_eq!(waiter.await?, Err(RequestError::Stopped));
    assert!(a.arp_cache(0)?.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[timeout(10000)]
async fn sending_to_a_stopped_peer_fails() -> anyhow::Result<()> {
    let mut lan = lan();
    let a = lan.host(&["10.0.0.1/24"], &[])?;
    let b = lan.host(&["10.0.0.2/24"], &[&*a])?;

    b.stop();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let result = a.send_arp(ip(10, 0, 0, 2)).await;
    assert_eq!(
        result,
        Err(RequestError::Send(SendError::PeerStopped(b.id())))
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[timeout(10000)]
async fn device_answers_while_waiting() -> anyhow::Result<()> {
    let mut lan = lan();
    let switch = lan.switch(&[])?;
    let a = lan.host(&["10.0.0.1/24"], &[&*switch])?;
    let b = lan.host(&["10.0.0.2/24"], &[&*switch])?;
    let c = lan.host(&["10.0.0.3/24"], &[&*switch])?;

    // a is stuck waiting on an address nobody has while b and c ping it
    let (stuck, pings) = tokio::join!(
        a.send_arp_on(ip(10, 0, 0, 99), 0, Duration::from_millis(1500)),
        futures::future::join_all([b.send_icmp(ip(10, 0, 0, 1)), c.send_icmp(ip(10, 0, 0, 1))]),
    );
    assert!(stuck.is_err());
    for ping in pings {
        ping?;
    }
    lan.shut_down().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[timeout(10000)]
async fn verbosity_is_adjustable() -> anyhow::Result<()> {
    let mut lan = lan();
    let a = lan.host(&["10.0.0.1/24"], &[])?;
    let b = lan.host(&["10.0.0.2/24"], &[&*a])?;
    assert_eq!(a.verbosity(), Verbosity::Traffic);

    lan.set_verbosity(Verbosity::Silent);
    assert_eq!(b.verbosity(), Verbosity::Silent);
    b.set_verbosity(Verbosity::Packets);
    assert_eq!(b.verbosity(), Verbosity::Packets);
    assert_eq!(a.verbosity(), Verbosity::Silent);

    // Quiet devices still work
    a.send_icmp(ip(10, 0, 0, 2)).await?;
    lan.shut_down().await;
    Ok(())
}
