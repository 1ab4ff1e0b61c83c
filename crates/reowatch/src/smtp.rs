//! SMTP ingress for camera email alerts.
//!
//! Some models and firmwares ship broken ONVIF push; their fallback is
//! the alert mail the camera can send on detection. This listener speaks
//! just enough RFC 5321 to accept that mail, pulls the device and the
//! detected object class out of the body, and republishes both on the
//! event bus. Session failures close the connection and nothing else.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use reowatch_api::model::AiKind;
use reowatch_core::{DeviceRegistry, EventBus, EventPayload, MacAddress};

static MAC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // pattern is a compile-time constant
    Regex::new(r"(?i)\b[0-9a-f]{2}(?:[:-][0-9a-f]{2}){5}\b").unwrap()
});

/// Accept loop. Every connection gets its own session task; a session
/// that errors is logged and forgotten.
pub async fn smtp_task(
    listener: TcpListener,
    registry: Arc<DeviceRegistry>,
    bus: EventBus,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let registry = Arc::clone(&registry);
                    let bus = bus.clone();
                    tokio::spawn(async move {
                        if let Err(err) = serve_session(stream, &registry, &bus).await {
                            debug!(peer = %peer, error = %err, "smtp session closed with error");
                        }
                    });
                }
                Err(err) => warn!(error = %err, "smtp accept failed"),
            },
        }
    }
}

async fn serve_session(
    stream: TcpStream,
    registry: &DeviceRegistry,
    bus: &EventBus,
) -> std::io::Result<()> {
    let (read_half, mut reply) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    reply.write_all(b"220 reowatch service ready\r\n").await?;
    while let Some(line) = lines.next_line().await? {
        let verb = line
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();
        match verb.as_str() {
            "HELO" | "EHLO" => reply.write_all(b"250 reowatch\r\n").await?,
            "MAIL" | "RCPT" | "RSET" | "NOOP" => reply.write_all(b"250 OK\r\n").await?,
            "DATA" => {
                reply
                    .write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n")
                    .await?;
                let mut body = String::new();
                while let Some(data_line) = lines.next_line().await? {
                    if data_line == "." {
                        break;
                    }
                    // RFC 5321 4.5.2 dot-unstuffing.
                    body.push_str(data_line.strip_prefix('.').unwrap_or(&data_line));
                    body.push('\n');
                }
                deliver_alert(&body, registry, bus);
                reply.write_all(b"250 OK\r\n").await?;
            }
            "QUIT" => {
                reply.write_all(b"221 Bye\r\n").await?;
                break;
            }
            _ => reply.write_all(b"502 Command not implemented\r\n").await?,
        }
    }
    Ok(())
}

/// Map an accepted alert body to a bus event: an AI classification when
/// the mail names one, otherwise plain motion. Mail that matches no
/// registered device is dropped.
fn deliver_alert(body: &str, registry: &DeviceRegistry, bus: &EventBus) {
    let Some(device_id) = identify_device(body, registry) else {
        debug!("smtp alert matched no registered device, dropped");
        return;
    };
    match detect_class(body) {
        Some(kind) => {
            info!(device = %device_id, class = %kind, "ai alert received by mail");
            bus.publish(&device_id, EventPayload::Smtp { smtp: kind });
        }
        None => {
            info!(device = %device_id, "motion alert received by mail");
            bus.publish(&device_id, EventPayload::Motion { motion: true });
        }
    }
}

/// Find the registered device the alert refers to: by MAC address when
/// the mail carries one, by device name otherwise.
fn identify_device(body: &str, registry: &DeviceRegistry) -> Option<MacAddress> {
    if let Some(found) = MAC_PATTERN.find(body) {
        let mac = MacAddress::new(found.as_str());
        if registry.get(&mac).is_some() {
            return Some(mac);
        }
    }
    let lowered = body.to_lowercase();
    registry
        .devices()
        .into_iter()
        .find(|entry| {
            let name = entry.info.name.to_lowercase();
            !name.is_empty() && lowered.contains(&name)
        })
        .map(|entry| entry.device_id.clone())
}

/// Keyword scan over the alert text. Order matters: a mail naming both a
/// person and a vehicle reports the person.
fn detect_class(body: &str) -> Option<AiKind> {
    const CLASSES: [(AiKind, &[&str]); 3] = [
        (AiKind::Person, &["person", "people"]),
        (AiKind::Vehicle, &["vehicle", "car"]),
        (AiKind::Pet, &["pet", "dog", "cat", "animal"]),
    ];
    let lowered = body.to_lowercase();
    let has_word = |needle: &str| {
        lowered
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|word| word == needle)
    };
    CLASSES
        .into_iter()
        .find(|(_, words)| words.iter().any(|word| has_word(word)))
        .map(|(kind, _)| kind)
}
