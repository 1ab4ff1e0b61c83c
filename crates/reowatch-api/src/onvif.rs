// ONVIF push-event subscription (WS-BaseNotification subset).
//
// Reolink firmware speaks just enough of the spec for push motion
// events: Subscribe with a consumer callback, Renew against the
// returned subscription manager, Unsubscribe on teardown. Requests are
// authenticated with a WS-Security UsernameToken digest. Responses are
// mined with targeted string scans; firmware namespace prefixes vary
// too much for a strict XML schema to be worth it.

use std::fmt;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sha1::{Digest, Sha1};
use url::Url;

use crate::client::{Credentials, snippet};
use crate::error::Error;
use crate::transport::TransportConfig;

type Result<T> = std::result::Result<T, Error>;

const SOAP_ENV: &str = "http://www.w3.org/2003/05/soap-envelope";
const WSNT: &str = "http://docs.oasis-open.org/wsn/b-2";
const WSA: &str = "http://www.w3.org/2005/08/addressing";
const WSSE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
const WSU: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
const PASSWORD_DIGEST: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest";
const NONCE_BASE64: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary";

/// Lease length requested on subscribe and renew.
const DEFAULT_TERMINATION: Duration = Duration::from_secs(900);

// ── Subscription trait ──────────────────────────────────────────────

/// Push-subscription lifecycle against one camera's event service.
#[async_trait]
pub trait SubscriptionManager: Send + Sync {
    /// Establish a fresh subscription delivering to `callback`.
    /// Replaces any existing lease.
    async fn subscribe(&self, callback: &Url) -> Result<()>;

    /// Extend the current lease. Fails with [`Error::NoActiveLease`]
    /// when there is nothing to renew.
    async fn renew(&self) -> Result<()>;

    /// Best-effort teardown. Local lease state is dropped even when
    /// the camera cannot be reached.
    async fn unsubscribe(&self) -> Result<()>;

    /// Time remaining on the lease, `None` if no subscription is
    /// active. An expired lease reports `Duration::ZERO`.
    fn renew_timer(&self) -> Option<Duration>;
}

// ── ONVIF implementation ────────────────────────────────────────────

#[derive(Debug, Clone)]
struct ActiveLease {
    manager_url: Url,
    expires_at: Instant,
}

pub struct OnvifSubscription {
    http: reqwest::Client,
    endpoint: Url,
    credentials: Credentials,
    termination: Duration,
    lease: RwLock<Option<ActiveLease>>,
}

impl fmt::Debug for OnvifSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnvifSubscription")
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

impl OnvifSubscription {
    /// `endpoint` is the camera's event service URL, usually
    /// `http://{host}:{onvif_port}/onvif/event_service`.
    pub fn new(endpoint: Url, credentials: Credentials, transport: &TransportConfig) -> Result<Self> {
        Ok(Self {
            http: transport.build_client()?,
            endpoint,
            credentials,
            termination: DEFAULT_TERMINATION,
            lease: RwLock::new(None),
        })
    }

    /// Standard event service URL for a camera host and ONVIF port.
    pub fn event_service_url(host: &str, port: u16) -> Result<Url> {
        Ok(Url::parse(&format!("http://{host}:{port}/onvif/event_service"))?)
    }

    pub fn with_termination(mut self, termination: Duration) -> Self {
        self.termination = termination;
        self
    }

    fn envelope(&self, body: &str) -> String {
        let nonce: [u8; 16] = rand::random();
        let created = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let security = security_header(
            &self.credentials.username,
            self.credentials.password.expose_secret(),
            &nonce,
            &created,
        );
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <s:Envelope xmlns:s=\"{SOAP_ENV}\">\
             <s:Header>{security}</s:Header>\
             <s:Body>{body}</s:Body>\
             </s:Envelope>"
        )
    }

    async fn soap_post(&self, url: &Url, envelope: String) -> Result<String> {
        let response = self
            .http
            .post(url.clone())
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/soap+xml; charset=utf-8",
            )
            .body(envelope)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Soap(format!(
                "{url} returned {status}: {}",
                snippet(&body)
            )));
        }
        Ok(body)
    }

    fn lease_snapshot(&self) -> Option<ActiveLease> {
        self.lease.read().ok().and_then(|guard| guard.clone())
    }

    fn store_lease(&self, lease: ActiveLease) {
        if let Ok(mut guard) = self.lease.write() {
            *guard = Some(lease);
        }
    }

    fn take_lease(&self) -> Option<ActiveLease> {
        self.lease.write().ok().and_then(|mut guard| guard.take())
    }
}

#[async_trait]
impl SubscriptionManager for OnvifSubscription {
    async fn subscribe(&self, callback: &Url) -> Result<()> {
        let body = format!(
            "<wsnt:Subscribe xmlns:wsnt=\"{WSNT}\">\
             <wsnt:ConsumerReference>\
             <wsa:Address xmlns:wsa=\"{WSA}\">{callback}</wsa:Address>\
             </wsnt:ConsumerReference>\
             <wsnt:InitialTerminationTime>PT{}S</wsnt:InitialTerminationTime>\
             </wsnt:Subscribe>",
            self.termination.as_secs()
        );
        let response = self.soap_post(&self.endpoint, self.envelope(&body)).await?;

        let manager = response
            .find("SubscriptionReference")
            .and_then(|idx| extract_xml_value(&response[idx..], "Address"))
            .ok_or_else(|| Error::Soap("subscribe response missing manager address".to_owned()))?;
        let manager_url = Url::parse(manager)?;
        let duration = parse_lease_duration(&response)?;

        tracing::debug!(
            endpoint = %self.endpoint,
            manager = %manager_url,
            lease_secs = duration.as_secs(),
            "subscription established"
        );
        self.store_lease(ActiveLease {
            manager_url,
            expires_at: Instant::now() + duration,
        });
        Ok(())
    }

    async fn renew(&self) -> Result<()> {
        let Some(lease) = self.lease_snapshot() else {
            return Err(Error::NoActiveLease);
        };
        let body = format!(
            "<wsnt:Renew xmlns:wsnt=\"{WSNT}\">\
             <wsnt:TerminationTime>PT{}S</wsnt:TerminationTime>\
             </wsnt:Renew>",
            self.termination.as_secs()
        );
        let response = self
            .soap_post(&lease.manager_url, self.envelope(&body))
            .await?;
        let duration = parse_lease_duration(&response)?;

        tracing::trace!(endpoint = %self.endpoint, lease_secs = duration.as_secs(), "lease renewed");
        self.store_lease(ActiveLease {
            manager_url: lease.manager_url,
            expires_at: Instant::now() + duration,
        });
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<()> {
        // Drop the lease first; the camera-side teardown is best effort.
        let Some(lease) = self.take_lease() else {
            return Ok(());
        };
        let body = format!("<wsnt:Unsubscribe xmlns:wsnt=\"{WSNT}\"/>");
        self.soap_post(&lease.manager_url, self.envelope(&body))
            .await?;
        tracing::debug!(endpoint = %self.endpoint, "unsubscribed");
        Ok(())
    }

    fn renew_timer(&self) -> Option<Duration> {
        self.lease_snapshot()
            .map(|lease| lease.expires_at.saturating_duration_since(Instant::now()))
    }
}

// ── WS-Security ─────────────────────────────────────────────────────

/// UsernameToken header with a password digest:
/// `Base64(SHA1(nonce || created || password))`.
fn security_header(username: &str, password: &str, nonce: &[u8], created: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    let digest = BASE64.encode(hasher.finalize());
    let nonce_b64 = BASE64.encode(nonce);
    format!(
        "<wsse:Security s:mustUnderstand=\"1\" xmlns:wsse=\"{WSSE}\">\
         <wsse:UsernameToken>\
         <wsse:Username>{username}</wsse:Username>\
         <wsse:Password Type=\"{PASSWORD_DIGEST}\">{digest}</wsse:Password>\
         <wsse:Nonce EncodingType=\"{NONCE_BASE64}\">{nonce_b64}</wsse:Nonce>\
         <wsu:Created xmlns:wsu=\"{WSU}\">{created}</wsu:Created>\
         </wsse:UsernameToken>\
         </wsse:Security>"
    )
}

// ── Response scanning ───────────────────────────────────────────────

/// Pull the text content of the first `tag` element, tolerating any
/// (or no) namespace prefix on it.
fn extract_xml_value<'a>(body: &'a str, tag: &str) -> Option<&'a str> {
    let plain = format!("<{tag}>");
    let prefixed = format!(":{tag}>");
    let start = body
        .find(&plain)
        .map(|idx| idx + plain.len())
        .or_else(|| body.find(&prefixed).map(|idx| idx + prefixed.len()))?;
    let rest = &body[start..];
    let end = rest.find("</")?;
    Some(rest[..end].trim())
}

fn parse_onvif_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    // Some firmware omits the timezone suffix; treat those as UTC.
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Lease length = TerminationTime - CurrentTime, both as reported by
/// the camera so its clock skew cancels out.
fn parse_lease_duration(body: &str) -> Result<Duration> {
    let current = extract_xml_value(body, "CurrentTime")
        .and_then(parse_onvif_time)
        .ok_or_else(|| Error::Soap("response missing CurrentTime".to_owned()))?;
    let termination = extract_xml_value(body, "TerminationTime")
        .and_then(parse_onvif_time)
        .ok_or_else(|| Error::Soap("response missing TerminationTime".to_owned()))?;
    termination
        .signed_duration_since(current)
        .to_std()
        .map_err(|_| Error::Soap("termination time precedes current time".to_owned()))
}
