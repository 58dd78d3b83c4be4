//! Two endpoints over an in-process link.
//!
//! Run with:
//!   cargo run --example loopback

use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use coremux::channel::{ChannelConfig, LoopbackChannel};
use coremux::mux::MuxConfig;
use coremux::peer::{HandshakeConfig, Role, Session};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (left, right) = LoopbackChannel::pair(ChannelConfig::default());

    // The follower side echoes everything it gets on "commands".
    let remote = thread::spawn(
        move || -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            let session = Session::connect(
                right,
                MuxConfig::default(),
                Role::Follower,
                HandshakeConfig::default(),
            )?;

            let (tx, rx) = mpsc::channel::<Vec<u8>>();
            let tx = Mutex::new(tx);
            let commands = session.register("commands", move |payload: &[u8]| {
                if let Ok(tx) = tx.lock() {
                    let _ = tx.send(payload.to_vec());
                }
            })?;
            let _telemetry = session.register("telemetry", |payload: &[u8]| {
                eprintln!("[follower] telemetry: {}", String::from_utf8_lossy(payload));
            })?;

            // Callbacks never send; replies go out from this thread.
            let request = rx.recv_timeout(Duration::from_secs(5))?;
            eprintln!("[follower] command: {}", String::from_utf8_lossy(&request));
            commands.send(&request)?;
            Ok(())
        },
    );

    let session = Session::connect(
        left,
        MuxConfig::default(),
        Role::Initiator,
        HandshakeConfig::default(),
    )?;

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let tx = Mutex::new(tx);
    let commands = session.register("commands", move |payload: &[u8]| {
        if let Ok(tx) = tx.lock() {
            let _ = tx.send(payload.to_vec());
        }
    })?;
    let telemetry = session.register("telemetry", |_payload: &[u8]| {})?;
    eprintln!(
        "[initiator] commands=ep{} telemetry=ep{}",
        commands.id(),
        telemetry.id()
    );

    telemetry.send(b"temp=41C")?;
    commands.send(br#"{"action":"ping"}"#)?;
    let reply = rx.recv_timeout(Duration::from_secs(5))?;
    eprintln!("[initiator] reply: {}", String::from_utf8_lossy(&reply));

    remote
        .join()
        .map_err(|_| "follower thread panicked")?
        .map_err(|err| err as Box<dyn std::error::Error>)?;

    let stats = session.multiplexer().stats();
    eprintln!(
        "[initiator] sent={} delivered={} dropped={}",
        stats.frames_sent,
        stats.frames_delivered,
        stats.dropped_total()
    );
    Ok(())
}
