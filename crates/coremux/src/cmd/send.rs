use std::fs;
use std::sync::mpsc;
use std::sync::Mutex;
use std::time::Duration;

use coremux_channel::{ChannelConfig, SocketChannel};
use coremux_mux::MuxConfig;
use coremux_peer::{HandshakeConfig, Role, Session};
use tracing::debug;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{
    channel_error, io_error, peer_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT,
};
use crate::output::{print_frame, OutputFormat, ReceivedFrame};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let payload = resolve_payload(&args)?;

    let channel = SocketChannel::connect(&args.path, ChannelConfig::default())
        .map_err(|err| channel_error("connect failed", err))?;
    let session = Session::connect(
        channel,
        MuxConfig::default(),
        Role::Initiator,
        HandshakeConfig {
            timeout: Some(timeout),
            ..HandshakeConfig::default()
        },
    )
    .map_err(|err| peer_error("session open failed", err))?;

    let (replies_tx, replies_rx) = mpsc::channel::<Vec<u8>>();
    let replies_tx = Mutex::new(replies_tx);
    let endpoint = session
        .register(&args.endpoint, move |payload: &[u8]| {
            if let Ok(replies) = replies_tx.lock() {
                let _ = replies.send(payload.to_vec());
            }
        })
        .map_err(|err| peer_error("register failed", err))?;

    endpoint
        .send(&payload)
        .map_err(|err| peer_error("send failed", err))?;
    debug!(endpoint = endpoint.name(), id = endpoint.id(), size = payload.len(), "payload sent");

    if args.wait {
        let reply = wait_for_reply(&replies_rx, timeout)?;
        print_frame(
            &ReceivedFrame {
                endpoint: endpoint.name().to_string(),
                id: endpoint.id(),
                payload: reply,
            },
            format,
        );
    }

    // The listener may already be gone once the reply is in.
    if let Err(err) = endpoint.close() {
        debug!(error = %err, "unbind not delivered");
    }
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}

fn wait_for_reply(replies: &mpsc::Receiver<Vec<u8>>, timeout: Duration) -> CliResult<Vec<u8>> {
    replies.recv_timeout(timeout).map_err(|err| match err {
        mpsc::RecvTimeoutError::Timeout => {
            CliError::new(TIMEOUT, format!("no reply within {timeout:?}"))
        }
        mpsc::RecvTimeoutError::Disconnected => {
            CliError::new(FAILURE, "endpoint closed before a reply arrived")
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_for_reply_times_out_with_124() {
        let (_tx, rx) = mpsc::channel::<Vec<u8>>();
        let err = wait_for_reply(&rx, Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn wait_for_reply_returns_payload() {
        let (tx, rx) = mpsc::channel();
        tx.send(b"pong".to_vec()).unwrap();
        assert_eq!(wait_for_reply(&rx, Duration::from_secs(1)).unwrap(), b"pong");
    }
}
