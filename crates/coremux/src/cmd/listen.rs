use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use coremux_channel::{ChannelConfig, SocketChannel, SocketListener};
use coremux_mux::MuxConfig;
use coremux_peer::{Endpoint, HandshakeConfig, Role, Session};
use tracing::{info, warn};

use crate::cmd::{install_ctrlc_handler, ListenArgs};
use crate::exit::{channel_error, io_error, peer_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_frame, OutputFormat, ReceivedFrame};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Upper bound between a follower's slot being set and `register` returning.
const REGISTRATION_GRACE: Duration = Duration::from_secs(1);

type Endpoints = Arc<Mutex<HashMap<String, Endpoint<SocketChannel>>>>;

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let mux_config = MuxConfig::default();
    if args.endpoints.len() > mux_config.slots {
        return Err(CliError::new(
            USAGE,
            format!("at most {} endpoints per link", mux_config.slots),
        ));
    }

    let listener = SocketListener::bind(&args.path, ChannelConfig::default())
        .map_err(|err| channel_error("bind failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let channel = listener
        .accept()
        .map_err(|err| channel_error("accept failed", err))?;
    let session = Session::connect(
        channel,
        mux_config,
        Role::Follower,
        HandshakeConfig {
            timeout: None,
            ..HandshakeConfig::default()
        },
    )
    .map_err(|err| peer_error("session open failed", err))?;
    info!(path = ?args.path, "link bound");

    let (frames_tx, frames_rx) = mpsc::channel::<(String, Vec<u8>)>();
    let endpoints: Endpoints = Arc::new(Mutex::new(HashMap::new()));

    // Offers may arrive in any order; each name waits for its own.
    for name in &args.endpoints {
        spawn_registration(&session, name.clone(), frames_tx.clone(), Arc::clone(&endpoints))?;
    }
    drop(frames_tx);

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let (name, payload) = match frames_rx.recv_timeout(POLL_INTERVAL) {
            Ok(received) => received,
            Err(RecvTimeoutError::Timeout) => {
                if session.multiplexer().channel().is_closed() {
                    info!("link closed by peer");
                    break;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let Some(id) = wait_registered(&endpoints, &name) else {
            warn!(endpoint = %name, "frame for endpoint that never finished registering");
            continue;
        };
        let frame = ReceivedFrame {
            endpoint: name,
            id,
            payload,
        };
        print_frame(&frame, format);
        printed = printed.saturating_add(1);

        if args.echo {
            echo(&endpoints, &frame);
        }

        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
    }

    Ok(SUCCESS)
}

fn spawn_registration(
    session: &Session<SocketChannel>,
    name: String,
    frames: mpsc::Sender<(String, Vec<u8>)>,
    endpoints: Endpoints,
) -> CliResult<()> {
    let session = session.clone();
    thread::Builder::new()
        .name(format!("register-{name}"))
        .spawn(move || {
            let frames = Mutex::new(frames);
            let label = name.clone();
            let result = session.register(&name, move |payload: &[u8]| {
                if let Ok(frames) = frames.lock() {
                    let _ = frames.send((label.clone(), payload.to_vec()));
                }
            });
            match result {
                Ok(endpoint) => {
                    if let Ok(mut endpoints) = endpoints.lock() {
                        endpoints.insert(name, endpoint);
                    }
                }
                Err(err) => warn!(endpoint = %name, error = %err, "endpoint registration failed"),
            }
        })
        .map(|_| ())
        .map_err(|err| io_error("spawn registration failed", err))
}

/// Id of `name`, waiting briefly for a registration that is still returning.
fn wait_registered(endpoints: &Endpoints, name: &str) -> Option<coremux_frame::EndpointId> {
    let deadline = Instant::now() + REGISTRATION_GRACE;
    loop {
        let id = endpoints
            .lock()
            .ok()
            .and_then(|endpoints| endpoints.get(name).map(Endpoint::id));
        if id.is_some() || Instant::now() >= deadline {
            return id;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

fn echo(endpoints: &Endpoints, frame: &ReceivedFrame) {
    let Ok(endpoints) = endpoints.lock() else {
        return;
    };
    if let Some(endpoint) = endpoints.get(&frame.endpoint) {
        if let Err(err) = endpoint.send(&frame.payload) {
            warn!(endpoint = %frame.endpoint, error = %err, "echo failed");
        }
    }
}
