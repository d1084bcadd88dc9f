mod common;

use common::{config, ip, lan};
use lansim::{
    devices::router::RouteKind, DeviceConfig, Host, Lan, RequestError, Router, TopologyError,
};
use ntest::timeout;
use std::{sync::Arc, time::Duration};
use tracing_test::traced_test;

fn gateway(a: u8, b: u8, c: u8, d: u8) -> DeviceConfig {
    config().with_gateway(ip(a, b, c, d))
}

/// h1 - r - h2 with one subnet on each side of the router.
fn one_router(lan: &mut Lan) -> anyhow::Result<(Arc<Host>, Arc<Router>, Arc<Host>)> {
    let router = lan.router(&["10.0.0.1/24", "10.0.1.1/24"], &[])?;
    let h1 = lan.host_with(&["10.0.0.2/24"], &[&*router], gateway(10, 0, 0, 1))?;
    let h2 = lan.host_with(&["10.0.1.2/24"], &[&*router], gateway(10, 0, 1, 1))?;
    Ok((h1, router, h2))
}

#[tokio::test(flavor = "multi_thread")]
#[timeout(10000)]
async fn forwards_between_connected_subnets() -> anyhow::Result<()> {
    let mut lan = lan();
    let (h1, router, h2) = one_router(&mut lan)?;

    h1.send_icmp(ip(10, 0, 1, 2)).await?;
    h2.send_icmp(ip(10, 0, 0, 2)).await?;

    // Frames were rewritten hop by hop: h1 only ever resolved its gateway
    let cache = h1.arp_cache(0)?;
    assert!(cache.contains_key(&ip(10, 0, 0, 1)));
    assert!(!cache.contains_key(&ip(10, 0, 1, 2)));
    assert!(router.arp_cache(1)?.contains_key(&ip(10, 0, 1, 2)));
    lan.shut_down().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[timeout(10000)]
async fn router_answers_on_every_address() -> anyhow::Result<()> {
    let mut lan = lan();
    let (h1, router, _h2) = one_router(&mut lan)?;

    h1.send_icmp(ip(10, 0, 0, 1)).await?;
    h1.send_icmp(ip(10, 0, 1, 1)).await?;
    router.send_icmp(ip(10, 0, 0, 2)).await?;
    lan.shut_down().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[timeout(10000)]
async fn static_routes_use_longest_prefix() -> anyhow::Result<()> {
    let mut lan = lan();
    // h1 - r1 - r2 - h2
    let r1 = lan.router(&["10.0.0.1/24", "192.168.0.1/30"], &[])?;
    let h1 = lan.host_with(&["10.0.0.2/24"], &[&*r1], gateway(10, 0, 0, 1))?;
    let r2 = lan.router(&["192.168.0.2/30", "10.0.1.1/24"], &[&*r1])?;
    let h2 = lan.host_with(&["10.0.1.2/24"], &[&*r2], gateway(10, 0, 1, 1))?;

    // The /8 points at a next hop that does not exist; only the /24 works
    r1.add_route("10.0.0.0/8", ip(10, 0, 0, 200), 0)?;
    r1.add_route("10.0.1.0/24", ip(192, 168, 0, 2), 1)?;
    r2.add_route("0.0.0.0/0", ip(192, 168, 0, 1), 0)?;

    let route = r1.lookup(ip(10, 0, 1, 2)).expect("route");
    assert_eq!(route.net.to_string(), "10.0.1.0/24");
    assert_eq!(route.kind, RouteKind::Static { next_hop: ip(192, 168, 0, 2) });
    assert_eq!(r1.lookup(ip(10, 0, 0, 2)).expect("route").kind, RouteKind::Connected);

    h1.send_icmp(ip(10, 0, 1, 2)).await?;
    h2.send_icmp(ip(10, 0, 0, 2)).await?;
    lan.shut_down().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
#[timeout(10000)]
async fn unroutable_traffic_is_dropped() -> anyhow::Result<()> {
    let mut lan = lan();
    let (h1, _router, _h2) = one_router(&mut lan)?;

    let result = h1
        .send_icmp_with(ip(172, 16, 0, 1), Duration::from_millis(300))
        .await;
    assert_eq!(result, Err(RequestError::Timeout(Duration::from_millis(300))));
    assert!(logs_contain("no route to 172.16.0.1"));

    // On a connected subnet, but nobody answers ARP there
    let result = h1
        .send_icmp_with(ip(10, 0, 1, 99), Duration::from_millis(1500))
        .await;
    assert!(result.is_err());
    assert!(logs_contain("could not resolve next hop 10.0.1.99"));
    lan.shut_down().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[timeout(10000)]
async fn routes_need_real_interfaces() -> anyhow::Result<()> {
    let mut lan = lan();
    let (_h1, router, _h2) = one_router(&mut lan)?;
    assert!(matches!(
        router.add_route("10.5.0.0/16", ip(10, 0, 0, 9), 7),
        Err(TopologyError::NoSuchInterface { index: 7, .. })
    ));
    assert!(matches!(
        router.add_route("10.5.0.0", ip(10, 0, 0, 9), 0),
        Err(TopologyError::Cidr(_))
    ));
    assert_eq!(router.routes().len(), 4);
    Ok(())
}
