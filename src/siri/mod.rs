//! Typed SIRI model for the elements the pipelines touch.
//!
//! Field names mirror the SIRI 2.0 element names; everything else in a
//! delivery is skipped during deserialization. Timestamps keep their
//! original offsets.

pub mod subscribe;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

pub const SIRI_VERSION: &str = "2.0";

#[derive(Debug, thiserror::Error)]
pub enum SiriError {
    #[error("XML parse error: {0}")]
    Parse(#[from] quick_xml::DeError),
    #[error("XML write error: {0}")]
    Write(#[from] quick_xml::SeError),
}

pub fn parse(xml: &str) -> Result<Siri, SiriError> {
    Ok(quick_xml::de::from_str(xml)?)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Siri {
    #[serde(rename = "ServiceDelivery")]
    pub service_delivery: Option<ServiceDelivery>,
}

impl Siri {
    /// The `/Siri/ServiceDelivery/MoreData` flag; absent means false.
    pub fn more_data(&self) -> bool {
        self.service_delivery
            .as_ref()
            .and_then(|d| d.more_data)
            .unwrap_or(false)
    }

    pub fn estimated_vehicle_journeys(&self) -> impl Iterator<Item = &EstimatedVehicleJourney> {
        self.service_delivery
            .iter()
            .flat_map(|d| &d.estimated_timetable_deliveries)
            .flat_map(|d| &d.estimated_journey_version_frames)
            .flat_map(|f| &f.estimated_vehicle_journeys)
    }

    pub fn pt_situation_elements(&self) -> impl Iterator<Item = &PtSituationElement> {
        self.service_delivery
            .iter()
            .flat_map(|d| &d.situation_exchange_deliveries)
            .flat_map(|d| &d.situations)
            .flat_map(|s| &s.pt_situation_elements)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceDelivery {
    #[serde(rename = "MoreData")]
    pub more_data: Option<bool>,
    #[serde(rename = "EstimatedTimetableDelivery", default)]
    pub estimated_timetable_deliveries: Vec<EstimatedTimetableDelivery>,
    #[serde(rename = "SituationExchangeDelivery", default)]
    pub situation_exchange_deliveries: Vec<SituationExchangeDelivery>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EstimatedTimetableDelivery {
    #[serde(rename = "EstimatedJourneyVersionFrame", default)]
    pub estimated_journey_version_frames: Vec<EstimatedJourneyVersionFrame>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EstimatedJourneyVersionFrame {
    #[serde(rename = "EstimatedVehicleJourney", default)]
    pub estimated_vehicle_journeys: Vec<EstimatedVehicleJourney>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EstimatedVehicleJourney {
    #[serde(rename = "LineRef")]
    pub line_ref: Option<String>,
    #[serde(rename = "DirectionRef")]
    pub direction_ref: Option<String>,
    #[serde(rename = "DatedVehicleJourneyRef")]
    pub dated_vehicle_journey_ref: Option<String>,
    #[serde(rename = "Cancellation")]
    pub cancellation: Option<bool>,
    #[serde(rename = "OperatorRef")]
    pub operator_ref: Option<String>,
    #[serde(rename = "ServiceFeatureRef", default)]
    pub service_feature_refs: Vec<String>,
    #[serde(rename = "VehicleRef")]
    pub vehicle_ref: Option<String>,
    #[serde(rename = "RecordedCalls")]
    pub recorded_calls: Option<RecordedCalls>,
    #[serde(rename = "EstimatedCalls")]
    pub estimated_calls: Option<EstimatedCalls>,
}

impl EstimatedVehicleJourney {
    pub fn is_cancellation(&self) -> bool {
        self.cancellation == Some(true)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RecordedCalls {
    #[serde(rename = "RecordedCall", default)]
    pub recorded_calls: Vec<RecordedCall>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RecordedCall {
    #[serde(rename = "StopPointRef")]
    pub stop_point_ref: Option<String>,
    #[serde(rename = "AimedArrivalTime")]
    pub aimed_arrival_time: Option<DateTime<FixedOffset>>,
    #[serde(rename = "AimedDepartureTime")]
    pub aimed_departure_time: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EstimatedCalls {
    #[serde(rename = "EstimatedCall", default)]
    pub estimated_calls: Vec<EstimatedCall>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EstimatedCall {
    #[serde(rename = "StopPointRef")]
    pub stop_point_ref: Option<String>,
    #[serde(rename = "Cancellation")]
    pub cancellation: Option<bool>,
    #[serde(rename = "AimedArrivalTime")]
    pub aimed_arrival_time: Option<DateTime<FixedOffset>>,
    #[serde(rename = "ExpectedArrivalTime")]
    pub expected_arrival_time: Option<DateTime<FixedOffset>>,
    #[serde(rename = "ArrivalStatus")]
    pub arrival_status: Option<CallStatus>,
    #[serde(rename = "ArrivalBoardingActivity")]
    pub arrival_boarding_activity: Option<ArrivalBoardingActivity>,
    #[serde(rename = "AimedDepartureTime")]
    pub aimed_departure_time: Option<DateTime<FixedOffset>>,
    #[serde(rename = "ExpectedDepartureTime")]
    pub expected_departure_time: Option<DateTime<FixedOffset>>,
    #[serde(rename = "DepartureStatus")]
    pub departure_status: Option<CallStatus>,
    #[serde(rename = "DepartureBoardingActivity")]
    pub departure_boarding_activity: Option<DepartureBoardingActivity>,
}

impl EstimatedCall {
    pub fn is_cancellation(&self) -> bool {
        self.cancellation == Some(true)
    }
}

/// SIRI CallStatusEnumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum CallStatus {
    #[serde(rename = "onTime")]
    OnTime,
    #[serde(rename = "early")]
    Early,
    #[serde(rename = "delayed")]
    Delayed,
    #[serde(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "arrived")]
    Arrived,
    #[serde(rename = "departed")]
    Departed,
    #[serde(rename = "missed")]
    Missed,
    #[serde(rename = "noReport")]
    NoReport,
    #[serde(rename = "notExpected")]
    NotExpected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ArrivalBoardingActivity {
    #[serde(rename = "alighting")]
    Alighting,
    #[serde(rename = "noAlighting")]
    NoAlighting,
    #[serde(rename = "passThru")]
    PassThru,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum DepartureBoardingActivity {
    #[serde(rename = "boarding")]
    Boarding,
    #[serde(rename = "noBoarding")]
    NoBoarding,
    #[serde(rename = "passThru")]
    PassThru,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SituationExchangeDelivery {
    #[serde(rename = "Situations")]
    pub situations: Option<Situations>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Situations {
    #[serde(rename = "PtSituationElement", default)]
    pub pt_situation_elements: Vec<PtSituationElement>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PtSituationElement {
    #[serde(rename = "CreationTime")]
    pub creation_time: Option<DateTime<FixedOffset>>,
    #[serde(rename = "ParticipantRef")]
    pub participant_ref: Option<String>,
    #[serde(rename = "SituationNumber")]
    pub situation_number: Option<String>,
    #[serde(rename = "Summary")]
    pub summary: Option<String>,
    #[serde(rename = "Description")]
    pub description: Option<String>,
}
