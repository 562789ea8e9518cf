use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Ordered lifecycle stage a donation walks through after acceptance.
///
/// `Preparing` doubles as the display form of "pending" and of any value the
/// backend sends that we do not recognize; the stepper always has a valid
/// position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Preparing,
    ReadyForPickup,
    InTransit,
    Received,
    Complete,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Preparing => "preparing",
            Stage::ReadyForPickup => "ready_for_pickup",
            Stage::InTransit => "in_transit",
            Stage::Received => "received",
            Stage::Complete => "complete",
        }
    }

    /// Case-insensitive parse; "pending", null and unknown values all clamp
    /// to `Preparing`.
    pub fn parse(raw: Option<&str>) -> Stage {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("ready_for_pickup") => Stage::ReadyForPickup,
            Some("in_transit") => Stage::InTransit,
            Some("received") => Stage::Received,
            Some("complete") => Stage::Complete,
            _ => Stage::Preparing,
        }
    }

    /// Zero-based position in the five step vocabulary.
    pub fn ordinal(&self) -> usize {
        match self {
            Stage::Preparing => 0,
            Stage::ReadyForPickup => 1,
            Stage::InTransit => 2,
            Stage::Received => 3,
            Stage::Complete => 4,
        }
    }
}

/// Which flow produced a donation. Selects the endpoint family and which
/// tracking field carries the stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DonationKind {
    Request,
    Direct,
}

impl DonationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DonationKind::Request => "request",
            DonationKind::Direct => "direct",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Bakery,
    Charity,
}

/// A donation as the backend reports it. Request-fulfillment and direct
/// donations share this shape; they differ only in which tracking field is
/// populated and whether `request_id` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Donation {
    pub id: i64,
    #[serde(default)]
    pub request_id: Option<i64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub expiration_date: Option<NaiveDate>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub bakery_name: String,
    #[serde(default)]
    pub bakery_avatar: Option<String>,
    /// Request lifecycle ("pending" / "accepted"), orthogonal to tracking.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub tracking_status: Option<String>,
    #[serde(default)]
    pub btracking_status: Option<String>,
    #[serde(default)]
    pub feedback_submitted: bool,
}

impl Donation {
    /// Current stage, read from whichever tracking field is present. The two
    /// donation variants use different field names for the same vocabulary;
    /// neither is required.
    pub fn stage(&self) -> Stage {
        let raw = self
            .tracking_status
            .as_deref()
            .or(self.btracking_status.as_deref());
        Stage::parse(raw)
    }

    /// Write `stage` back into the field this donation already uses, falling
    /// back to `tracking_status` when neither is set.
    pub fn set_stage(&mut self, stage: Stage) {
        let value = stage.as_str().to_string();
        if self.tracking_status.is_none() && self.btracking_status.is_some() {
            self.btracking_status = Some(value);
        } else {
            self.tracking_status = Some(value);
        }
    }

    /// Stable identifier used by cross-view highlighting. For
    /// request-fulfillment donations this is the original request id, which
    /// stays constant even when the donation row gets its own id.
    pub fn highlight_ref(&self) -> i64 {
        self.request_id.unwrap_or(self.id)
    }

    pub fn is_pending(&self) -> bool {
        self.status.eq_ignore_ascii_case("pending")
    }

    pub fn is_complete(&self) -> bool {
        self.stage() == Stage::Complete
    }
}

/// Category of a feed entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotificationKind {
    NewDonation,
    PriorityExpiring,
    ReceivedUpdate,
    Message,
}

/// A feed entry. This is a derived projection rebuilt on every poll, not a
/// stored entity; `read` comes from the local read-state store, never from
/// the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Category-prefixed synthetic id, e.g. `donation-12`, `msg-3`.
    pub id: String,
    pub kind: NotificationKind,
    pub actor: String,
    pub avatar: Option<String>,
    pub message: String,
    pub read: bool,
    /// The item's own id on the backend, used for the read acknowledgment.
    pub backend_id: i64,
    /// Underlying donation/request id a highlight should land on. For
    /// priority alerts this can differ from `backend_id`.
    pub entity_ref: i64,
    /// Whether the underlying request is still pending (priority entries
    /// only; drives the optimistic dismissal on select).
    pub request_pending: bool,
    pub distance_km: Option<f64>,
    pub expires_on: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_parse_clamps_unknown_to_preparing() {
        assert_eq!(Stage::parse(None), Stage::Preparing);
        assert_eq!(Stage::parse(Some("pending")), Stage::Preparing);
        assert_eq!(Stage::parse(Some("garbage")), Stage::Preparing);
        assert_eq!(Stage::parse(Some("")), Stage::Preparing);
    }

    #[test]
    fn stage_parse_is_case_insensitive() {
        assert_eq!(Stage::parse(Some("Received")), Stage::Received);
        assert_eq!(Stage::parse(Some("IN_TRANSIT")), Stage::InTransit);
        assert_eq!(Stage::parse(Some(" complete ")), Stage::Complete);
    }

    #[test]
    fn stage_ordinals_are_monotonic() {
        let walk = [
            Stage::Preparing,
            Stage::ReadyForPickup,
            Stage::InTransit,
            Stage::Received,
            Stage::Complete,
        ];
        for pair in walk.windows(2) {
            assert!(pair[0].ordinal() < pair[1].ordinal());
        }
    }

    #[test]
    fn donation_reads_either_tracking_field() {
        let mut d: Donation = serde_json::from_value(serde_json::json!({ "id": 1 })).unwrap();
        assert_eq!(d.stage(), Stage::Preparing);

        d.tracking_status = Some("in_transit".into());
        assert_eq!(d.stage(), Stage::InTransit);

        d.tracking_status = None;
        d.btracking_status = Some("received".into());
        assert_eq!(d.stage(), Stage::Received);
    }

    #[test]
    fn set_stage_writes_the_field_in_use() {
        let mut d: Donation = serde_json::from_value(serde_json::json!({ "id": 1 })).unwrap();
        d.btracking_status = Some("in_transit".into());
        d.set_stage(Stage::Received);
        assert_eq!(d.btracking_status.as_deref(), Some("received"));
        assert!(d.tracking_status.is_none());
    }

    #[test]
    fn highlight_ref_prefers_request_id() {
        let mut d: Donation = serde_json::from_value(serde_json::json!({ "id": 10 })).unwrap();
        assert_eq!(d.highlight_ref(), 10);
        d.request_id = Some(42);
        assert_eq!(d.highlight_ref(), 42);
    }
}
