//! SIRI SubscriptionRequest construction for the Anshar push mode.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::{SiriError, SIRI_VERSION};
use crate::anshar::FeedKind;

#[derive(Debug, Serialize)]
#[serde(rename = "Siri")]
struct SubscriptionDocument {
    #[serde(rename = "@version")]
    version: &'static str,
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    #[serde(rename = "SubscriptionRequest")]
    subscription_request: SubscriptionRequest,
}

#[derive(Debug, Serialize)]
struct SubscriptionRequest {
    #[serde(rename = "RequestTimestamp")]
    request_timestamp: DateTime<Utc>,
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "RequestorRef")]
    requestor_ref: String,
    #[serde(rename = "MessageIdentifier")]
    message_identifier: String,
    #[serde(rename = "SubscriptionContext")]
    subscription_context: SubscriptionContext,
    #[serde(
        rename = "EstimatedTimetableSubscriptionRequest",
        skip_serializing_if = "Option::is_none"
    )]
    estimated_timetable: Option<EstimatedTimetableSubscriptionRequest>,
    #[serde(
        rename = "SituationExchangeSubscriptionRequest",
        skip_serializing_if = "Option::is_none"
    )]
    situation_exchange: Option<SituationExchangeSubscriptionRequest>,
}

#[derive(Debug, Serialize)]
struct SubscriptionContext {
    /// ISO-8601 duration, e.g. PT60S
    #[serde(rename = "HeartbeatInterval")]
    heartbeat_interval: String,
}

#[derive(Debug, Serialize)]
struct EstimatedTimetableSubscriptionRequest {
    #[serde(rename = "SubscriberRef")]
    subscriber_ref: String,
    #[serde(rename = "SubscriptionIdentifier")]
    subscription_identifier: String,
    #[serde(rename = "InitialTerminationTime")]
    initial_termination_time: DateTime<Utc>,
    #[serde(rename = "EstimatedTimetableRequest")]
    request: ServiceRequest,
}

#[derive(Debug, Serialize)]
struct SituationExchangeSubscriptionRequest {
    #[serde(rename = "SubscriberRef")]
    subscriber_ref: String,
    #[serde(rename = "SubscriptionIdentifier")]
    subscription_identifier: String,
    #[serde(rename = "InitialTerminationTime")]
    initial_termination_time: DateTime<Utc>,
    #[serde(rename = "SituationExchangeRequest")]
    request: ServiceRequest,
}

#[derive(Debug, Serialize)]
struct ServiceRequest {
    #[serde(rename = "@version")]
    version: &'static str,
    #[serde(rename = "RequestTimestamp")]
    request_timestamp: DateTime<Utc>,
    #[serde(rename = "MessageIdentifier")]
    message_identifier: String,
}

pub struct SubscriptionParams<'a> {
    pub requestor_id: &'a str,
    pub requestor_ref: &'a str,
    pub own_base_url: &'a str,
    pub heartbeat_interval_ms: u64,
    pub duration_minutes: i64,
}

/// Build the subscription request for one feed kind as a SIRI document.
///
/// The subscription identifier is stable (`<requestorId>-<KIND>`) so
/// repeated requests re-establish the same subscription; the message
/// identifier is unique per call.
pub fn subscription_request_xml(
    kind: FeedKind,
    params: &SubscriptionParams<'_>,
    now: DateTime<Utc>,
) -> Result<String, SiriError> {
    let message_identifier = format!("required-by-siri-spec-{}", now.timestamp_millis());
    let address = format!(
        "{}/siriMessages/{}/{}",
        params.own_base_url.trim_end_matches('/'),
        params.requestor_id,
        kind.as_str()
    );
    let subscription_identifier =
        format!("{}-{}", params.requestor_id, kind.as_str().to_uppercase());
    let initial_termination_time = now + Duration::minutes(params.duration_minutes);
    let service_request = ServiceRequest {
        version: SIRI_VERSION,
        request_timestamp: now,
        message_identifier: message_identifier.clone(),
    };

    let mut request = SubscriptionRequest {
        request_timestamp: now,
        address,
        requestor_ref: params.requestor_ref.to_string(),
        message_identifier,
        subscription_context: SubscriptionContext {
            heartbeat_interval: format!("PT{}S", params.heartbeat_interval_ms / 1000),
        },
        estimated_timetable: None,
        situation_exchange: None,
    };
    match kind {
        FeedKind::Et => {
            request.estimated_timetable = Some(EstimatedTimetableSubscriptionRequest {
                subscriber_ref: params.requestor_ref.to_string(),
                subscription_identifier,
                initial_termination_time,
                request: service_request,
            });
        }
        FeedKind::Sx => {
            request.situation_exchange = Some(SituationExchangeSubscriptionRequest {
                subscriber_ref: params.requestor_ref.to_string(),
                subscription_identifier,
                initial_termination_time,
                request: service_request,
            });
        }
    }

    let document = SubscriptionDocument {
        version: SIRI_VERSION,
        xmlns: "http://www.siri.org.uk/siri",
        subscription_request: request,
    };
    Ok(quick_xml::se::to_string(&document)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SubscriptionParams<'static> {
        SubscriptionParams {
            requestor_id: "avvik-42",
            requestor_ref: "Avvik",
            own_base_url: "https://avvik.example.org/",
            heartbeat_interval_ms: 60_000,
            duration_minutes: 720,
        }
    }

    #[test]
    fn et_request_carries_identifier_address_and_heartbeat() {
        let xml = subscription_request_xml(FeedKind::Et, &params(), Utc::now()).unwrap();
        assert!(xml.starts_with("<Siri"));
        assert!(xml.contains(r#"version="2.0""#));
        assert!(xml.contains(r#"xmlns="http://www.siri.org.uk/siri""#));
        assert!(xml.contains("<SubscriptionIdentifier>avvik-42-ET</SubscriptionIdentifier>"));
        assert!(xml.contains(
            "<Address>https://avvik.example.org/siriMessages/avvik-42/et</Address>"
        ));
        assert!(xml.contains("<HeartbeatInterval>PT60S</HeartbeatInterval>"));
        assert!(xml.contains("<RequestorRef>Avvik</RequestorRef>"));
        assert!(xml.contains("<SubscriberRef>Avvik</SubscriberRef>"));
        assert!(xml.contains("<EstimatedTimetableRequest"));
        assert!(!xml.contains("SituationExchangeSubscriptionRequest"));
    }

    #[test]
    fn sx_request_uses_sx_identifier_and_structure() {
        let xml = subscription_request_xml(FeedKind::Sx, &params(), Utc::now()).unwrap();
        assert!(xml.contains("<SubscriptionIdentifier>avvik-42-SX</SubscriptionIdentifier>"));
        assert!(xml.contains(
            "<Address>https://avvik.example.org/siriMessages/avvik-42/sx</Address>"
        ));
        assert!(xml.contains("<SituationExchangeRequest"));
        assert!(!xml.contains("EstimatedTimetableSubscriptionRequest"));
    }

    #[test]
    fn termination_time_is_duration_minutes_ahead() {
        let now = Utc::now();
        let xml = subscription_request_xml(FeedKind::Et, &params(), now).unwrap();
        let expected = now + Duration::minutes(720);
        assert!(xml.contains(&format!(
            "<InitialTerminationTime>{}",
            expected.to_rfc3339().split('.').next().unwrap()
        )));
    }

    #[test]
    fn repeated_calls_keep_the_same_subscription_identifier() {
        let a = subscription_request_xml(FeedKind::Et, &params(), Utc::now()).unwrap();
        let b = subscription_request_xml(FeedKind::Et, &params(), Utc::now()).unwrap();
        for xml in [&a, &b] {
            assert!(xml.contains("<SubscriptionIdentifier>avvik-42-ET</SubscriptionIdentifier>"));
        }
    }
}
