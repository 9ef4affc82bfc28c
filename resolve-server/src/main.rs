//! `resolved`: the client-facing front end. Loads configuration, builds a
//! [`resolve_engine::Engine`], and serves UDP and TCP DNS queries against it
//! (spec §6 external interfaces, §7 user-visible behaviour).

mod anchors;
mod cli;
mod respond;
mod root_hints;
mod transport;

use std::io::Write;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use hickory_proto::op::{Edns, Message, Query, ResponseCode};
use hickory_proto::rr::rdata::opt::{EdnsCode, EdnsOption};
use resolve_config::Config;
use resolve_engine::Engine;
use resolve_proto::QueryKey;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

use cli::Cli;
use transport::SocketUpstream;

type Resolved = Engine<SocketUpstream>;

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            log::error!("failed to start async runtime: {err}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => resolve_config::load_from_path(path).with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    let do_udp = config.toggles.do_udp;
    let do_tcp = config.toggles.do_tcp;

    let trust_anchors = anchors::load(&config.trust_anchors).context("loading trust anchors")?;
    let root_hints = root_hints::default_root_hints();
    let upstream = SocketUpstream::new(Duration::from_millis(cli.upstream_timeout_ms));
    let engine = Arc::new(Engine::new(config, upstream, trust_anchors, root_hints));

    let udp = if do_udp {
        Some(Arc::new(
            UdpSocket::bind(cli.listen).await.with_context(|| format!("binding UDP {}", cli.listen))?,
        ))
    } else {
        None
    };
    let tcp = if do_tcp {
        Some(TcpListener::bind(cli.listen).await.with_context(|| format!("binding TCP {}", cli.listen))?)
    } else {
        None
    };

    if udp.is_none() && tcp.is_none() {
        anyhow::bail!("both do-udp and do-tcp are disabled; nothing to listen on");
    }

    // Readiness handshake: announce the successful bind on stdout so a
    // parent supervisor can synchronize on it (spec §6).
    println!("READY {}", cli.listen);
    std::io::stdout().flush().ok();
    log::info!("resolved listening on {}", cli.listen);

    let udp_task = udp.map(|socket| tokio::spawn(serve_udp(Arc::clone(&engine), socket)));
    let tcp_task = tcp.map(|listener| tokio::spawn(serve_tcp(Arc::clone(&engine), listener)));

    match (udp_task, tcp_task) {
        (Some(u), Some(t)) => {
            tokio::select! {
                res = u => res.context("udp listener task panicked")?.context("udp listener failed")?,
                res = t => res.context("tcp listener task panicked")?.context("tcp listener failed")?,
            }
        }
        (Some(u), None) => u.await.context("udp listener task panicked")?.context("udp listener failed")?,
        (None, Some(t)) => t.await.context("tcp listener task panicked")?.context("tcp listener failed")?,
        (None, None) => unreachable!("checked above"),
    }
    Ok(())
}

/// Pull the first question out of a decoded request, the only one this
/// resolver answers per spec §3's single-`(name, type, class)` query model.
fn first_query(request: &Message) -> Option<&Query> {
    request.queries().first()
}

/// Pull an EDNS client-subnet option (spec §4.7) off the request, if the
/// client sent one, as the `(address, source prefix)` pair the engine keys
/// its ECS cache on.
fn client_subnet(request: &Message) -> Option<(std::net::IpAddr, u8)> {
    let edns: &Edns = request.extensions().as_ref()?;
    match edns.option(EdnsCode::Subnet)? {
        EdnsOption::Subnet(subnet) => Some((subnet.addr(), subnet.source_prefix())),
        _ => None,
    }
}

async fn resolve_one(engine: &Resolved, request: &Message) -> (Message, u16) {
    let id = request.id();
    let Some(query) = first_query(request) else {
        return (respond::build_error_response(None, ResponseCode::FormErr, id), id);
    };
    let qkey = QueryKey::new(query.name().clone(), query.query_type(), query.query_class());
    let checking_disabled = request.checking_disabled();
    let subnet = client_subnet(request);

    match engine.resolve(qkey, checking_disabled, subnet).await {
        Ok(reply) => (respond::build_response(query, &reply, &engine.rrset_cache, Instant::now(), id), id),
        Err(err) => {
            log::debug!("resolution failed: {err}");
            (respond::build_error_response(Some(query), err.to_response_code(), id), id)
        }
    }
}

async fn serve_udp(engine: Arc<Resolved>, socket: Arc<UdpSocket>) -> anyhow::Result<()> {
    let max_udp_size = engine.config.max_udp_size as usize;
    let mut buf = vec![0u8; 65535];
    loop {
        let (n, from): (usize, SocketAddr) = socket.recv_from(&mut buf).await.context("udp recv failed")?;
        let request = match Message::from_vec(&buf[..n]) {
            Ok(m) => m,
            Err(err) => {
                log::debug!("dropping malformed UDP datagram from {from}: {err}");
                continue;
            }
        };

        let engine = Arc::clone(&engine);
        let socket = Arc::clone(&socket);
        tokio::spawn(async move {
            let (response, _) = resolve_one(&engine, &request).await;
            let wire = match response.to_vec() {
                Ok(wire) if wire.len() <= max_udp_size => wire,
                Ok(_) => match response.truncate().to_vec() {
                    Ok(wire) => wire,
                    Err(err) => {
                        log::warn!("failed to encode truncated response for {from}: {err}");
                        return;
                    }
                },
                Err(err) => {
                    log::warn!("failed to encode response for {from}: {err}");
                    return;
                }
            };
            if let Err(err) = socket.send_to(&wire, from).await {
                log::warn!("failed to send UDP reply to {from}: {err}");
            }
        });
    }
}

async fn serve_tcp(engine: Arc<Resolved>, listener: TcpListener) -> anyhow::Result<()> {
    loop {
        let (stream, from) = listener.accept().await.context("tcp accept failed")?;
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if let Err(err) = handle_tcp_connection(engine, stream).await {
                log::debug!("tcp connection from {from} ended: {err}");
            }
        });
    }
}

async fn handle_tcp_connection(engine: Arc<Resolved>, mut stream: TcpStream) -> anyhow::Result<()> {
    loop {
        let mut len_buf = [0u8; 2];
        if stream.read_exact(&mut len_buf).await.is_err() {
            return Ok(());
        }
        let len = u16::from_be_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await.context("reading TCP query body")?;

        let request = Message::from_vec(&buf).context("decoding TCP query")?;
        let (response, _) = resolve_one(&engine, &request).await;
        let wire = response.to_vec().context("encoding TCP response")?;
        let wire_len = u16::try_from(wire.len()).context("response too large for TCP framing")?;

        stream.write_all(&wire_len.to_be_bytes()).await?;
        stream.write_all(&wire).await?;
    }
}
