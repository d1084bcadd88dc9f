mod common;

use common::{config, ip, lan, TIMEOUT};
use lansim::{
    protocols::dhcp::{ClientPhase, IpRange, LeaseState},
    DhcpContext, DhcpServerConfig, RequestError,
};
use ntest::timeout;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
#[timeout(10000)]
async fn lease_acquisition() -> anyhow::Result<()> {
    let mut lan = lan();
    let switch = lan.switch(&[])?;
    let server_config = DhcpServerConfig {
        gateway: Some(ip(10, 0, 0, 254)),
        ..Default::default()
    };
    let server = lan.dhcp_server_with(&["10.0.0.1/24"], &[&*switch], config(), server_config)?;
    let client = lan.host(&[], &[&*switch])?;
    assert_eq!(client.ip(), None);

    let lease = client.send_dhcp(DhcpContext::Init).await?;
    assert_eq!(client.ip(), Some(lease.ip));
    assert!(server.server().pool().contains(lease.ip));
    assert_ne!(lease.ip, ip(10, 0, 0, 254));
    assert_eq!(lease.mask.prefix_len(), 24);
    assert_eq!(lease.gateway, Some(ip(10, 0, 0, 254)));
    assert_eq!(lease.server_id, ip(10, 0, 0, 1));
    assert_eq!(lease.duration, Duration::from_secs(20));

    let iface = client.interface(0)?;
    assert_eq!(iface.gateway(), Some(ip(10, 0, 0, 254)));
    assert_eq!(iface.dhcp().state().phase, ClientPhase::Leased);

    let leases = server.leases();
    assert_eq!(leases.len(), 1);
    let record = leases[&lease.ip];
    assert_eq!(record.state, LeaseState::Active);
    assert_eq!(record.client.mac(), iface.mac());
    lan.shut_down().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[timeout(10000)]
async fn leased_address_is_reachable() -> anyhow::Result<()> {
    let mut lan = lan();
    let switch = lan.switch(&[])?;
    let server = lan.dhcp_server(&["10.0.0.1/24"], &[&*switch])?;
    let client = lan.host(&[], &[&*switch])?;

    let lease = client.send_dhcp(DhcpContext::Init).await?;
    server.send_icmp(lease.ip).await?;
    client.send_icmp(ip(10, 0, 0, 1)).await?;
    lan.shut_down().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[timeout(10000)]
async fn clients_get_distinct_addresses() -> anyhow::Result<()> {
    let mut lan = lan();
    let switch = lan.switch(&[])?;
    let server_config = DhcpServerConfig {
        pool: Some(IpRange::new(ip(10, 0, 0, 100), ip(10, 0, 0, 102))),
        ..Default::default()
    };
    let server = lan.dhcp_server_with(&["10.0.0.1/24"], &[&*switch], config(), server_config)?;
    let a = lan.host(&[], &[&*switch])?;
    let b = lan.host(&[], &[&*switch])?;
    let c = lan.host(&[], &[&*switch])?;

    let (la, lb, lc) = tokio::try_join!(
        a.send_dhcp(DhcpContext::Init),
        b.send_dhcp(DhcpContext::Init),
        c.send_dhcp(DhcpContext::Init),
    )?;
    let mut ips = vec![la.ip, lb.ip, lc.ip];
    ips.sort();
    assert_eq!(ips, [ip(10, 0, 0, 100), ip(10, 0, 0, 101), ip(10, 0, 0, 102)]);
    assert_eq!(server.leases().len(), 3);

    // The pool is spent, so a fourth client hears nothing
    let d = lan.host(&[], &[&*switch])?;
    assert_eq!(
        d.send_dhcp(DhcpContext::Init).await,
        Err(RequestError::Timeout(TIMEOUT))
    );
    assert_eq!(d.interface(0)?.dhcp().state().phase, ClientPhase::NoLease);
    lan.shut_down().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[timeout(10000)]
async fn renewal_keeps_the_address() -> anyhow::Result<()> {
    let mut lan = lan();
    let switch = lan.switch(&[])?;
    let server = lan.dhcp_server(&["10.0.0.1/24"], &[&*switch])?;
    let client = lan.host(&[], &[&*switch])?;

    let first = client.send_dhcp(DhcpContext::Init).await?;
    let second = client.send_dhcp(DhcpContext::Renew).await?;
    let third = client.send_dhcp(DhcpContext::Renew).await?;
    assert_eq!(first.ip, second.ip);
    assert_eq!(second.ip, third.ip);
    assert!(third.start > first.start);

    let leases = server.leases();
    assert_eq!(leases.len(), 1);
    assert_eq!(leases[&first.ip].state, LeaseState::Active);
    lan.shut_down().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[timeout(10000)]
async fn renew_needs_a_lease() -> anyhow::Result<()> {
    let mut lan = lan();
    let switch = lan.switch(&[])?;
    let client = lan.host(&[], &[&*switch])?;
    assert_eq!(
        client.send_dhcp(DhcpContext::Renew).await,
        Err(RequestError::NoLease)
    );
    lan.shut_down().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[timeout(10000)]
async fn init_times_out_without_server() -> anyhow::Result<()> {
    let mut lan = lan();
    let switch = lan.switch(&[])?;
    let client = lan.host(&[], &[&*switch])?;

    let result = client.send_dhcp(DhcpContext::Init).await;
    assert_eq!(result, Err(RequestError::Timeout(TIMEOUT)));
    let state = client.interface(0)?.dhcp().state();
    assert_eq!(state.phase, ClientPhase::NoLease);
    assert_eq!(state.xid, None);
    assert_eq!(client.ip(), None);
    lan.shut_down().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[timeout(10000)]
async fn periodic_renewal_extends_lease() -> anyhow::Result<()> {
    let mut lan = lan();
    let switch = lan.switch(&[])?;
    let server_config = DhcpServerConfig {
        lease_time: Duration::from_millis(600),
        ..Default::default()
    };
    let server = lan.dhcp_server_with(&["10.0.0.1/24"], &[&*switch], config(), server_config)?;
    let client = lan.host(&[], &[&*switch])?;

    let lease = client.send_dhcp(DhcpContext::Init).await?;
    // Two whole lease times: only renewals at half-life keep the address
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(client.ip(), Some(lease.ip));
    let renewed = client.lease(0)?.expect("lease held");
    assert!(renewed.start > lease.start);
    assert_eq!(server.leases()[&lease.ip].state, LeaseState::Active);
    lan.shut_down().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[timeout(10000)]
async fn leases_expire() -> anyhow::Result<()> {
    let mut lan = lan();
    let switch = lan.switch(&[])?;
    let server_config = DhcpServerConfig {
        lease_time: Duration::from_millis(300),
        ..Default::default()
    };
    let server = lan.dhcp_server_with(&["10.0.0.1/24"], &[&*switch], config(), server_config)?;
    let client = lan.host(&[], &[&*switch])?;

    let lease = client.send_dhcp(DhcpContext::Init).await?;
    // Silence the client before it can renew
    client.stop();
    assert!(server.leases().contains_key(&lease.ip));
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(server.leases().is_empty());
    lan.shut_down().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[timeout(10000)]
async fn client_releases_expired_lease() -> anyhow::Result<()> {
    let mut lan = lan();
    let switch = lan.switch(&[])?;
    let server_config = DhcpServerConfig {
        lease_time: Duration::from_millis(400),
        ..Default::default()
    };
    let server = lan.dhcp_server_with(&["10.0.0.1/24"], &[&*switch], config(), server_config)?;
    let client = lan.host(&[], &[&*switch])?;

    client.send_dhcp(DhcpContext::Init).await?;
    // With the server gone, renewals go unanswered until the lease runs out
    server.stop();
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(client.ip(), None);
    assert_eq!(client.lease(0)?, None);
    assert_eq!(client.interface(0)?.dhcp().state().phase, ClientPhase::NoLease);
    lan.shut_down().await;
    Ok(())
}
