use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

use crate::model::{Donation, DonationKind};

/// Charity-side notification payload as returned by
/// `GET /notifications/charity`. Every collection defaults to empty so a
/// partial payload never fails the poll.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CharityFeed {
    #[serde(default)]
    pub messages: Vec<MessageNotice>,
    #[serde(default)]
    pub donations: Vec<DonationNotice>,
    #[serde(default)]
    pub received_donations: Vec<ReceivedNotice>,
    #[serde(default)]
    pub geofence_notifications: Vec<GeofenceNotice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageNotice {
    pub id: i64,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub sender_avatar: Option<String>,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DonationNotice {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bakery_name: String,
    #[serde(default)]
    pub bakery_avatar: Option<String>,
}

/// Status-update event. `type` discriminates which template renders it;
/// unknown values get a generic fallback rather than failing.
#[derive(Debug, Clone, Deserialize)]
pub struct ReceivedNotice {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub update_type: String,
    #[serde(default)]
    pub bakery_name: String,
    #[serde(default)]
    pub bakery_avatar: Option<String>,
}

/// Priority/expiring donation alert with proximity annotations.
#[derive(Debug, Clone, Deserialize)]
pub struct GeofenceNotice {
    pub id: i64,
    #[serde(default)]
    pub request_id: Option<i64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bakery_name: String,
    #[serde(default)]
    pub bakery_avatar: Option<String>,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub expiration_date: Option<NaiveDate>,
    /// Request lifecycle of the underlying request ("pending" / "accepted").
    #[serde(default)]
    pub status: String,
}

/// Feedback form content for `POST /{family}/feedback/{id}`.
#[derive(Debug, Clone)]
pub struct FeedbackDraft {
    pub message: String,
    pub rating: u8,
    pub files: Vec<PathBuf>,
}

/// The slice of the backend this subsystem consumes. Everything behind a
/// bearer credential; implementations must not retry internally, retry
/// policy belongs to the callers.
#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn charity_notifications(&self) -> Result<CharityFeed>;

    /// Best-effort server-side read acknowledgment. Callers never block on
    /// or roll back because of this call's outcome.
    async fn mark_notification_read(&self, id: &str) -> Result<()>;

    async fn received_donations(&self) -> Result<Vec<Donation>>;

    async fn direct_donations(&self) -> Result<Vec<Donation>>;

    /// Advance `in_transit -> received` server-side. Local state must only
    /// change after this returns Ok.
    async fn mark_received(&self, kind: DonationKind, id: i64) -> Result<()>;

    async fn submit_feedback(
        &self,
        kind: DonationKind,
        id: i64,
        draft: &FeedbackDraft,
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl BackendClient {
    pub fn new(base_url: &str, token: String) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid backend base URL")?;
        Ok(Self::with_base_url(base_url, token))
    }

    pub fn with_base_url(base_url: Url, token: String) -> Self {
        let http = Client::builder()
            .user_agent("bakeshare/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            token,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid endpoint path {path}"))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        let res = self
            .http
            .get(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await
            .with_context(|| format!("failed to reach backend for {path}"))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("backend error {status} on {path}: {body}"));
        }
        res.json::<T>()
            .await
            .with_context(|| format!("invalid JSON from {path}"))
    }

    async fn expect_ok(&self, res: reqwest::Response, what: &str) -> Result<()> {
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("{what} failed {status}: {body}"));
        }
        Ok(())
    }
}

#[async_trait]
impl BackendApi for BackendClient {
    async fn charity_notifications(&self) -> Result<CharityFeed> {
        self.get_json("notifications/charity").await
    }

    async fn mark_notification_read(&self, id: &str) -> Result<()> {
        let url = self.endpoint(&format!("notifications/{id}/read"))?;
        let res = self
            .http
            .patch(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await
            .context("failed to reach backend for read acknowledgment")?;
        self.expect_ok(res, "read acknowledgment").await
    }

    async fn received_donations(&self) -> Result<Vec<Donation>> {
        self.get_json("donation/received").await
    }

    async fn direct_donations(&self) -> Result<Vec<Donation>> {
        self.get_json("direct/mine").await
    }

    async fn mark_received(&self, kind: DonationKind, id: i64) -> Result<()> {
        let path = match kind {
            DonationKind::Request => format!("donation/received/{id}"),
            DonationKind::Direct => format!("direct/received/{id}"),
        };
        let url = self.endpoint(&path)?;
        let res = self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await
            .context("failed to reach backend for mark-received")?;
        self.expect_ok(res, "mark-received").await
    }

    async fn submit_feedback(
        &self,
        kind: DonationKind,
        id: i64,
        draft: &FeedbackDraft,
    ) -> Result<()> {
        let path = match kind {
            DonationKind::Request => format!("donation/feedback/{id}"),
            DonationKind::Direct => format!("direct/feedback/{id}"),
        };
        let url = self.endpoint(&path)?;

        let mut form = reqwest::multipart::Form::new()
            .text("message", draft.message.clone())
            .text("rating", draft.rating.to_string());
        for file in &draft.files {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow!("invalid feedback file name"))?
                .to_string();
            let bytes = tokio::fs::read(file)
                .await
                .with_context(|| format!("failed to read feedback file {}", file.display()))?;
            form = form.part(
                "files[]",
                reqwest::multipart::Part::bytes(bytes).file_name(name),
            );
        }

        let res = self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .multipart(form)
            .send()
            .await
            .context("failed to reach backend for feedback submission")?;
        self.expect_ok(res, "feedback submission").await
    }
}
