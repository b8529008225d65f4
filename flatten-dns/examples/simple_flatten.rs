use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::Result;
use flatten_dns::Chain;
use flatten_dns::DNSServer;
use flatten_dns::DNSUpstream;
use flatten_dns::Flatten;
use flatten_dns::FlattenConfig;
use flatten_dns::Forward;
use flatten_dns::DEFAULT_UPSTREAM_TIMEOUT;

// dig @127.0.0.1 -p 5353 example.com
#[tokio::main]
async fn main() -> Result<()> {
    let config = FlattenConfig::new("example.com", "www.example.org", "1.1.1.1:53")?;
    let upstream = DNSUpstream::new(config.upstream, DEFAULT_UPSTREAM_TIMEOUT);

    let chain = Chain::new()
        .push(Flatten::new(config, upstream.clone()))
        .push(Forward::new(upstream));

    let listen_at = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 5353);
    let server = DNSServer::new(listen_at, chain);

    tokio::select! {
        res = server.serve() => {
            if let Err(err) = res {
                println!("error {:?}", err);
            }

        }
        _ = tokio::signal::ctrl_c() => {

        }
    }

    Ok(())
}
