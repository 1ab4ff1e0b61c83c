// ONVIF notification payload parsing.
//
// Cameras POST a SOAP `Notify` document to the webhook for every event
// edge. The only field we care about is the `IsMotion` simple item;
// everything else in the envelope varies wildly across firmware
// versions, so this parses with a targeted pattern instead of a full
// XML decode.

use std::sync::LazyLock;

use regex::Regex;

static IS_MOTION: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // pattern is a compile-time constant
    Regex::new(r#"Name="IsMotion"\s+Value="([^"]*)""#).unwrap()
});

/// Extract the motion flag from a notification body.
///
/// Returns `None` when the document carries no `IsMotion` item, which
/// happens for unrelated event topics (tamper, storage). Callers drop
/// those without changing state.
pub fn parse_motion(body: &str) -> Option<bool> {
    IS_MOTION
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|value| value.as_str().eq_ignore_ascii_case("true"))
}
