//! Status, upload and option types

use crate::cid::ContentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ==================== Pins and deals ====================

/// Status of one replica pin, as reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinStatus {
    PinQueued,
    Pinning,
    Pinned,
    PinError,
    ClusterError,
    Unpinned,
    Remote,
    #[serde(other)]
    Unknown,
}

/// Overall pin state of a piece of content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinState {
    Queued,
    Pinning,
    Pinned,
    Failed,
}

impl PinState {
    /// Derive the overall state from individual pins
    ///
    /// Any pinned replica wins, then any pinning one. Queued pins, or no pins
    /// at all, read as queued; anything else is a failure.
    pub fn from_pins(pins: &[PinRecord]) -> Self {
        let any = |status: PinStatus| pins.iter().any(|p| p.status == status);
        if any(PinStatus::Pinned) {
            PinState::Pinned
        } else if any(PinStatus::Pinning) {
            PinState::Pinning
        } else if pins.is_empty() || any(PinStatus::PinQueued) || any(PinStatus::Remote) {
            PinState::Queued
        } else {
            PinState::Failed
        }
    }
}

/// A replica of the content on one storage peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinRecord {
    #[serde(default)]
    pub peer_id: String,
    #[serde(default)]
    pub peer_name: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    pub status: PinStatus,
    #[serde(default, deserialize_with = "lenient_time")]
    pub updated: Option<DateTime<Utc>>,
}

/// State of a storage deal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DealStatus {
    Queued,
    Published,
    Active,
    Terminated,
    #[serde(other)]
    Unknown,
}

/// A storage deal covering the content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealRecord {
    /// Absent while the deal is still queued
    #[serde(default)]
    pub deal_id: Option<u64>,
    #[serde(default)]
    pub storage_provider: Option<String>,
    pub status: DealStatus,
    #[serde(default)]
    pub piece_cid: Option<String>,
    /// Aggregate the content was packed into
    #[serde(default)]
    pub data_cid: Option<String>,
    #[serde(default)]
    pub data_model_selector: Option<String>,
    #[serde(default, deserialize_with = "lenient_time")]
    pub activation: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_time")]
    pub expiration: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_time")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_time")]
    pub updated: Option<DateTime<Utc>>,
}

/// Timestamps the service cannot format read as absent
fn lenient_time<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc)))
}

// ==================== Status ====================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    cid: ContentId,
    #[serde(default)]
    dag_size: Option<u64>,
    #[serde(default, deserialize_with = "lenient_time")]
    created: Option<DateTime<Utc>>,
    #[serde(default)]
    pins: Vec<PinRecord>,
    #[serde(default)]
    deals: Vec<DealRecord>,
}

/// Snapshot of the storage state of a piece of content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StatusResponse", rename_all = "camelCase")]
pub struct StatusRecord {
    pub cid: ContentId,
    pub state: PinState,
    pub dag_size: Option<u64>,
    pub created: Option<DateTime<Utc>>,
    pub pins: Vec<PinRecord>,
    pub deals: Vec<DealRecord>,
}

impl From<StatusResponse> for StatusRecord {
    fn from(r: StatusResponse) -> Self {
        Self {
            cid: r.cid,
            state: PinState::from_pins(&r.pins),
            dag_size: r.dag_size,
            created: r.created,
            pins: r.pins,
            deals: r.deals,
        }
    }
}

// ==================== Uploads ====================

/// One entry of the account's upload listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upload {
    #[serde(default)]
    pub name: Option<String>,
    pub cid: ContentId,
    #[serde(default, deserialize_with = "lenient_time")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dag_size: Option<u64>,
    #[serde(default)]
    pub pins: Vec<PinRecord>,
    #[serde(default)]
    pub deals: Vec<DealRecord>,
}

impl Upload {
    pub fn state(&self) -> PinState {
        PinState::from_pins(&self.pins)
    }
}

// ==================== Options ====================

/// Options for uploads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOptions {
    /// Label stored with the upload
    pub name: Option<String>,
    /// Wrap top-level entries in an unnamed directory
    pub wrap_with_directory: bool,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            name: None,
            wrap_with_directory: true,
        }
    }
}

impl PutOptions {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn without_wrapping(mut self) -> Self {
        self.wrap_with_directory = false;
        self
    }
}

/// Default number of uploads requested per page
pub const DEFAULT_PAGE_SIZE: usize = 25;

/// Options for listing uploads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOptions {
    /// Only uploads created before this instant
    pub before: Option<DateTime<Utc>>,
    pub page_size: usize,
    /// Stop after this many uploads
    pub max_results: Option<usize>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            before: None,
            page_size: DEFAULT_PAGE_SIZE,
            max_results: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pin(status: PinStatus) -> PinRecord {
        PinRecord {
            peer_id: "12D3KooWR1Js".to_string(),
            peer_name: None,
            region: None,
            status,
            updated: None,
        }
    }

    #[test]
    fn test_overall_state() {
        use PinStatus::*;
        let state = |statuses: &[PinStatus]| {
            let pins: Vec<_> = statuses.iter().copied().map(pin).collect();
            PinState::from_pins(&pins)
        };
        assert_eq!(state(&[PinError, Pinning, Pinned]), PinState::Pinned);
        assert_eq!(state(&[PinQueued, Pinning]), PinState::Pinning);
        assert_eq!(state(&[PinError, PinQueued]), PinState::Queued);
        assert_eq!(state(&[]), PinState::Queued);
        assert_eq!(state(&[PinError, Unpinned]), PinState::Failed);
        assert_eq!(state(&[Unknown]), PinState::Failed);
    }

    #[test]
    fn test_parse_status_response() {
        let json = r#"{
            "cid": "bafkreifzjut3te2nhyekklss27nh3k72ysco7y32koao5eei66wof36n5e",
            "created": "2021-07-14T19:27:14.934572Z",
            "dagSize": 101,
            "pins": [{
                "peerId": "12D3KooWR1Js",
                "peerName": "who?",
                "region": "where?",
                "status": "Pinned",
                "updated": "2021-07-14T19:27:14.934572Z"
            }],
            "deals": [{
                "dealId": 12345,
                "storageProvider": "f99",
                "status": "Active",
                "pieceCid": "baga",
                "dataCid": "bafybeifnfkzjeohjf2dch2iqqpef3bfjylwxlcjws2msvdfyze5bvdprfm",
                "dataModelSelector": "Links/0/Links",
                "activation": "<iso timestamp>",
                "created": "2021-07-14T19:27:14.934572+00:00",
                "updated": "2021-07-14T19:27:14.934572Z"
            }, {
                "status": "Queued",
                "pieceCid": "baga"
            }]
        }"#;
        let record: StatusRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.state, PinState::Pinned);
        assert_eq!(record.dag_size, Some(101));
        assert!(record.created.is_some());
        assert_eq!(record.pins.len(), 1);
        assert_eq!(record.pins[0].region.as_deref(), Some("where?"));

        let active = &record.deals[0];
        assert_eq!(active.deal_id, Some(12345));
        assert_eq!(active.status, DealStatus::Active);
        assert_eq!(active.activation, None);
        assert!(active.created.is_some());

        let queued = &record.deals[1];
        assert_eq!(queued.status, DealStatus::Queued);
        assert_eq!(queued.deal_id, None);
        assert_eq!(queued.storage_provider, None);
    }

    #[test]
    fn test_unknown_statuses_and_missing_fields() {
        let json = r#"{
            "cid": "bafkreifzjut3te2nhyekklss27nh3k72ysco7y32koao5eei66wof36n5e",
            "dagSize": null,
            "pins": [{"peerId": "p", "status": "Sharded"}],
            "deals": [{"status": "Slashed"}]
        }"#;
        let record: StatusRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.pins[0].status, PinStatus::Unknown);
        assert_eq!(record.deals[0].status, DealStatus::Unknown);
        assert_eq!(record.state, PinState::Failed);
        assert_eq!(record.dag_size, None);
        assert_eq!(record.created, None);
    }

    #[test]
    fn test_status_record_serializes_state() {
        let record = StatusRecord {
            cid: ContentId::raw(b"hello world"),
            state: PinState::Queued,
            dag_size: Some(11),
            created: None,
            pins: Vec::new(),
            deals: Vec::new(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["state"], "Queued");
        assert_eq!(value["dagSize"], 11);
    }

    #[test]
    fn test_parse_upload() {
        let json = r#"{
            "_id": "7",
            "type": "Car",
            "name": "image.webp",
            "cid": "bafybeica6klnrhlrbx6z24icefykpbwyypouglnypvnwb5esdm6yzcie3q",
            "created": "2021-07-14T19:27:14.934572+00:00",
            "dagSize": 2000,
            "pins": [{"peerId": "p", "status": "PinQueued"}],
            "deals": [],
            "parts": []
        }"#;
        let upload: Upload = serde_json::from_str(json).unwrap();
        assert_eq!(upload.name.as_deref(), Some("image.webp"));
        assert_eq!(upload.dag_size, Some(2000));
        assert_eq!(upload.state(), PinState::Queued);
    }

    #[test]
    fn test_option_defaults() {
        let put = PutOptions::default();
        assert!(put.wrap_with_directory);
        let named = PutOptions::default().with_name("backup").without_wrapping();
        assert_eq!(named.name.as_deref(), Some("backup"));
        assert!(!named.wrap_with_directory);

        assert_eq!(ListOptions::default().page_size, DEFAULT_PAGE_SIZE);
    }
}
