use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use coremux_channel::{ChannelConfig, LoopbackChannel};
use coremux_frame::EndpointId;
use coremux_mux::{MuxConfig, StatsSnapshot};
use coremux_peer::{Endpoint, HandshakeConfig, Role, Session};
use tracing::{debug, info};

use crate::cmd::{parse_duration, SelftestArgs};
use crate::exit::{io_error, peer_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{print_selftest, EndpointReport, OutputFormat, SelftestReport};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// What one side of the self-test observed.
struct SideOutcome {
    ids: Vec<EndpointId>,
    received: Vec<u64>,
    stats: StatsSnapshot,
}

pub fn run(args: SelftestArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let handshake = HandshakeConfig {
        timeout: Some(timeout),
        ..HandshakeConfig::default()
    };
    let mux_config = MuxConfig {
        slots: usize::from(args.endpoints),
        ..MuxConfig::default()
    };
    let names: Vec<String> = (0..args.endpoints).map(|i| format!("ep-{i}")).collect();
    let messages = args.messages;

    let (left, right) = LoopbackChannel::pair(ChannelConfig::default());

    let follower = {
        let names = names.clone();
        let handshake = handshake.clone();
        thread::Builder::new()
            .name("selftest-follower".to_string())
            .spawn(move || -> CliResult<SideOutcome> {
                let session = Session::connect(right, mux_config, Role::Follower, handshake)
                    .map_err(|err| peer_error("follower open failed", err))?;
                exercise(&session, &names, messages, timeout)
            })
            .map_err(|err| io_error("spawn follower failed", err))?
    };

    let initiator = Session::connect(left, mux_config, Role::Initiator, handshake)
        .map_err(|err| peer_error("initiator open failed", err))?;
    let local = exercise(&initiator, &names, messages, timeout);

    let remote = follower
        .join()
        .map_err(|_| CliError::new(INTERNAL, "follower thread panicked"))?;
    let local = local?;
    let remote = remote?;

    let endpoints: Vec<EndpointReport> = names
        .into_iter()
        .enumerate()
        .map(|(index, name)| EndpointReport {
            name,
            id: local.ids[index],
            sent: messages,
            initiator_received: local.received[index],
            follower_received: remote.received[index],
        })
        .collect();

    let passed = local.ids == remote.ids
        && endpoints
            .iter()
            .all(|ep| ep.initiator_received == messages && ep.follower_received == messages)
        && local.stats.dropped_total() == 0;

    let report = SelftestReport {
        passed,
        messages_per_endpoint: messages,
        endpoints,
        initiator: local.stats.into(),
        follower: remote.stats.into(),
    };
    print_selftest(&report, format);

    info!(passed, "selftest finished");
    Ok(if passed { SUCCESS } else { FAILURE })
}

/// Register every endpoint, send `messages` on each and wait for the
/// remote side's traffic.
fn exercise(
    session: &Session<LoopbackChannel>,
    names: &[String],
    messages: u64,
    timeout: Duration,
) -> CliResult<SideOutcome> {
    let role = session.role().as_str();

    let mut endpoints: Vec<Endpoint<LoopbackChannel>> = Vec::with_capacity(names.len());
    let mut counters: Vec<Arc<AtomicU64>> = Vec::with_capacity(names.len());
    for name in names {
        let counter = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&counter);
        let endpoint = session
            .register(name, move |_payload: &[u8]| {
                seen.fetch_add(1, Ordering::Relaxed);
            })
            .map_err(|err| peer_error(&format!("{role} register {name} failed"), err))?;
        debug!(role, endpoint = name.as_str(), id = endpoint.id(), "selftest endpoint ready");
        endpoints.push(endpoint);
        counters.push(counter);
    }

    for seq in 0..messages {
        for endpoint in &endpoints {
            let payload = format!("{role}:{}:{seq}", endpoint.name());
            endpoint
                .send(payload.as_bytes())
                .map_err(|err| peer_error(&format!("{role} send failed"), err))?;
        }
    }

    let deadline = Instant::now() + timeout;
    while counters
        .iter()
        .any(|counter| counter.load(Ordering::Relaxed) < messages)
        && Instant::now() < deadline
    {
        thread::sleep(POLL_INTERVAL);
    }

    Ok(SideOutcome {
        ids: endpoints.iter().map(Endpoint::id).collect(),
        received: counters
            .iter()
            .map(|counter| counter.load(Ordering::Relaxed))
            .collect(),
        stats: session.multiplexer().stats(),
    })
}
