#![allow(clippy::unwrap_used)]
// Integration tests for `OnvifSubscription` using wiremock.

use std::time::Duration;

use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use reowatch_api::{
    Credentials, Error, OnvifSubscription, SubscriptionManager, TransportConfig,
};

// ── Helpers ─────────────────────────────────────────────────────────

const EVENT_SERVICE: &str = "/onvif/event_service";
const MANAGER_PATH: &str = "/onvif/sub/0";

async fn setup() -> (MockServer, OnvifSubscription) {
    let server = MockServer::start().await;
    let endpoint = Url::parse(&format!("{}{EVENT_SERVICE}", server.uri())).unwrap();
    let subscription = OnvifSubscription::new(
        endpoint,
        Credentials::new("admin", "secret"),
        &TransportConfig::default(),
    )
    .unwrap();
    (server, subscription)
}

fn subscribe_response(server: &MockServer) -> String {
    format!(
        "<s:Envelope xmlns:s=\"http://www.w3.org/2003/05/soap-envelope\">\
         <s:Body><wsnt:SubscribeResponse xmlns:wsnt=\"http://docs.oasis-open.org/wsn/b-2\">\
         <wsnt:SubscriptionReference>\
         <wsa5:Address>{}{MANAGER_PATH}</wsa5:Address>\
         </wsnt:SubscriptionReference>\
         <wsnt:CurrentTime>2023-01-05T14:30:00Z</wsnt:CurrentTime>\
         <wsnt:TerminationTime>2023-01-05T14:45:00Z</wsnt:TerminationTime>\
         </wsnt:SubscribeResponse></s:Body></s:Envelope>",
        server.uri()
    )
}

const RENEW_RESPONSE: &str = "<s:Envelope xmlns:s=\"http://www.w3.org/2003/05/soap-envelope\">\
     <s:Body><wsnt:RenewResponse xmlns:wsnt=\"http://docs.oasis-open.org/wsn/b-2\">\
     <wsnt:TerminationTime>2023-01-05T15:00:00Z</wsnt:TerminationTime>\
     <wsnt:CurrentTime>2023-01-05T14:45:00Z</wsnt:CurrentTime>\
     </wsnt:RenewResponse></s:Body></s:Envelope>";

fn callback() -> Url {
    Url::parse("http://192.168.1.2:8123/webhook/abc123").unwrap()
}

// ── Subscribe ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_subscribe_establishes_lease() {
    let (server, subscription) = setup().await;

    Mock::given(method("POST"))
        .and(path(EVENT_SERVICE))
        .and(body_string_contains("<wsnt:Subscribe"))
        .and(body_string_contains("PasswordDigest"))
        .and(body_string_contains("http://192.168.1.2:8123/webhook/abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_string(subscribe_response(&server)))
        .expect(1)
        .mount(&server)
        .await;

    assert!(subscription.renew_timer().is_none());
    subscription.subscribe(&callback()).await.unwrap();

    let timer = subscription.renew_timer().unwrap();
    assert!(timer <= Duration::from_secs(900), "timer: {timer:?}");
    assert!(timer > Duration::from_secs(890), "timer: {timer:?}");
}

#[tokio::test]
async fn test_subscribe_soap_fault_is_an_error() {
    let (server, subscription) = setup().await;

    Mock::given(method("POST"))
        .and(path(EVENT_SERVICE))
        .respond_with(
            ResponseTemplate::new(400).set_body_string("<s:Fault>ActionNotSupported</s:Fault>"),
        )
        .mount(&server)
        .await;

    let result = subscription.subscribe(&callback()).await;
    assert!(
        matches!(result, Err(Error::Soap(_))),
        "expected Soap error, got: {result:?}"
    );
    assert!(subscription.renew_timer().is_none());
}

// ── Renew ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_renew_posts_to_manager_url() {
    let (server, subscription) = setup().await;

    Mock::given(method("POST"))
        .and(path(EVENT_SERVICE))
        .respond_with(ResponseTemplate::new(200).set_body_string(subscribe_response(&server)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(MANAGER_PATH))
        .and(body_string_contains("<wsnt:Renew"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RENEW_RESPONSE))
        .expect(1)
        .mount(&server)
        .await;

    subscription.subscribe(&callback()).await.unwrap();
    subscription.renew().await.unwrap();

    let timer = subscription.renew_timer().unwrap();
    assert!(timer > Duration::from_secs(890), "timer: {timer:?}");
}

#[tokio::test]
async fn test_renew_without_lease_fails() {
    let (_server, subscription) = setup().await;

    let result = subscription.renew().await;
    assert!(
        matches!(result, Err(Error::NoActiveLease)),
        "expected NoActiveLease, got: {result:?}"
    );
}

// ── Unsubscribe ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_unsubscribe_clears_lease() {
    let (server, subscription) = setup().await;

    Mock::given(method("POST"))
        .and(path(EVENT_SERVICE))
        .respond_with(ResponseTemplate::new(200).set_body_string(subscribe_response(&server)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(MANAGER_PATH))
        .and(body_string_contains("<wsnt:Unsubscribe"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<wsnt:UnsubscribeResponse/>"))
        .expect(1)
        .mount(&server)
        .await;

    subscription.subscribe(&callback()).await.unwrap();
    subscription.unsubscribe().await.unwrap();
    assert!(subscription.renew_timer().is_none());
}

#[tokio::test]
async fn test_unsubscribe_without_lease_is_a_noop() {
    let (_server, subscription) = setup().await;
    subscription.unsubscribe().await.unwrap();
}

#[tokio::test]
async fn test_unsubscribe_drops_lease_even_when_camera_errors() {
    let (server, subscription) = setup().await;

    Mock::given(method("POST"))
        .and(path(EVENT_SERVICE))
        .respond_with(ResponseTemplate::new(200).set_body_string(subscribe_response(&server)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(MANAGER_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    subscription.subscribe(&callback()).await.unwrap();
    let result = subscription.unsubscribe().await;
    assert!(result.is_err());
    assert!(subscription.renew_timer().is_none());
}
