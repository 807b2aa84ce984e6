//! Tracker clients.
//!
//! The engine talks to the tracker through [`TrackerClient`]; the shipped
//! implementation drives the GitHub issues API. Reads are conditional: the
//! caller passes the validator from the previous read and gets
//! [`TicketRead::NotModified`] back when nothing changed.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use termbridge_core::TermEntity;

use crate::ticket::{self, render_body, ticket_title, TicketCreated, TicketRead};

pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

/// Label applied to every ticket this system opens.
pub const TICKET_LABEL: &str = "term-request";

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker network failure: {0}")]
    Network(String),

    #[error("tracker api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("tracker rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("tracker response missing {0}")]
    InvalidResponse(String),

    #[error("entity is not submittable")]
    NotSubmittable,

    #[error("entity has no ticket")]
    NoTicket,

    #[error("ticket {0} already exists for this term")]
    TicketExists(u64),

    #[error("ticket {0} body is not in the term format")]
    Malformed(u64),
}

/// Where the tickets live and how to reach them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub owner: String,
    pub repo: String,
    /// Personal access token; anonymous works for reads only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub api_base_url: String,
    pub timeout_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            token: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

impl TrackerConfig {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            ..Self::default()
        }
    }
}

/// The tracker seam the engine consumes.
///
/// `open_ticket` refuses entities that are not submittable and terms that
/// already have a ticket. `patch_ticket` pushes the current labels out and
/// returns the new validator, if the tracker supplied one.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    async fn open_ticket(&self, entity: &TermEntity) -> Result<TicketCreated, TrackerError>;

    async fn patch_ticket(&self, entity: &TermEntity) -> Result<Option<String>, TrackerError>;

    async fn read_ticket(
        &self,
        ticket: u64,
        validator: Option<&str>,
    ) -> Result<TicketRead, TrackerError>;

    /// Ticket number of an existing ticket titled for this term, any state.
    async fn find_ticket(&self, entity: &TermEntity) -> Result<Option<u64>, TrackerError>;
}

#[derive(Debug, Deserialize)]
struct IssueWire {
    number: u64,
    state: String,
    title: String,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchWire {
    #[serde(default)]
    items: Vec<IssueWire>,
}

#[derive(Debug, Serialize)]
struct IssuePayload<'a> {
    title: String,
    body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    labels: Option<&'a [&'a str]>,
}

/// [`TrackerClient`] over the GitHub issues API.
pub struct GithubTracker {
    config: TrackerConfig,
    client: Client,
}

impl GithubTracker {
    pub fn new(config: TrackerConfig) -> Result<Self, TrackerError> {
        let client = Client::builder()
            .user_agent(concat!("termbridge/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TrackerError::Network(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn issues_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/issues",
            self.config.api_base_url, self.config.owner, self.config.repo
        )
    }

    fn issue_url(&self, ticket: u64) -> String {
        format!("{}/{}", self.issues_url(), ticket)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(header::ACCEPT, "application/vnd.github+json");
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: Response) -> Result<Response, TrackerError> {
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return Err(TrackerError::RateLimited { retry_after_secs });
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(TrackerError::Api { status, message });
        }
        Ok(response)
    }

    fn etag_of(response: &Response) -> Option<String> {
        response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

#[async_trait]
impl TrackerClient for GithubTracker {
    async fn open_ticket(&self, entity: &TermEntity) -> Result<TicketCreated, TrackerError> {
        if !entity.submittable() {
            return Err(TrackerError::NotSubmittable);
        }
        if let Some(number) = self.find_ticket(entity).await? {
            return Err(TrackerError::TicketExists(number));
        }
        let payload = IssuePayload {
            title: ticket_title(entity),
            body: render_body(entity),
            labels: Some(&[TICKET_LABEL]),
        };
        let response = self
            .authorize(self.client.post(self.issues_url()))
            .json(&payload)
            .send()
            .await
            .map_err(|e| TrackerError::Network(e.to_string()))?;
        let response = Self::check(response).await?;
        let validator = Self::etag_of(&response);
        let issue: IssueWire = response
            .json()
            .await
            .map_err(|e| TrackerError::InvalidResponse(e.to_string()))?;
        debug!(ticket = issue.number, title = %issue.title, "ticket opened");
        Ok(TicketCreated {
            number: issue.number,
            validator,
        })
    }

    async fn patch_ticket(&self, entity: &TermEntity) -> Result<Option<String>, TrackerError> {
        let Some(ticket) = entity.ticket_id() else {
            return Err(TrackerError::NoTicket);
        };
        let payload = IssuePayload {
            title: ticket_title(entity),
            body: render_body(entity),
            labels: None,
        };
        let response = self
            .authorize(self.client.patch(self.issue_url(ticket)))
            .json(&payload)
            .send()
            .await
            .map_err(|e| TrackerError::Network(e.to_string()))?;
        let response = Self::check(response).await?;
        let validator = Self::etag_of(&response);
        let issue: IssueWire = response
            .json()
            .await
            .map_err(|e| TrackerError::InvalidResponse(e.to_string()))?;
        debug!(ticket = issue.number, "ticket patched");
        Ok(validator)
    }

    async fn read_ticket(
        &self,
        ticket: u64,
        validator: Option<&str>,
    ) -> Result<TicketRead, TrackerError> {
        let mut request = self.authorize(self.client.get(self.issue_url(ticket)));
        if let Some(validator) = validator {
            request = request.header(header::IF_NONE_MATCH, validator);
        }
        let response = request
            .send()
            .await
            .map_err(|e| TrackerError::Network(e.to_string()))?;
        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(TicketRead::NotModified);
        }
        let response = Self::check(response).await?;
        let validator = Self::etag_of(&response);
        let issue: IssueWire = response
            .json()
            .await
            .map_err(|e| TrackerError::InvalidResponse(e.to_string()))?;
        let body = issue.body.unwrap_or_default();
        if ticket::parse_body(&body).is_none() {
            return Err(TrackerError::Malformed(ticket));
        }
        let open = issue.state.eq_ignore_ascii_case("open");
        Ok(TicketRead::Modified(ticket::snapshot(
            open, &body, validator,
        )))
    }

    async fn find_ticket(&self, entity: &TermEntity) -> Result<Option<u64>, TrackerError> {
        let query = format!(
            "{} repo:{}/{} in:title",
            entity.name(),
            self.config.owner,
            self.config.repo
        );
        let url = format!("{}/search/issues", self.config.api_base_url);
        let response = self
            .authorize(self.client.get(url))
            .query(&[("q", query.as_str())])
            .send()
            .await
            .map_err(|e| TrackerError::Network(e.to_string()))?;
        let response = Self::check(response).await?;
        let results: SearchWire = response
            .json()
            .await
            .map_err(|e| TrackerError::InvalidResponse(e.to_string()))?;
        // Search matches loosely; the same term means an exact title over a
        // body in the term format, so discussion threads are never adopted.
        let wanted = ticket_title(entity);
        Ok(results
            .items
            .into_iter()
            .find(|issue| {
                issue.title == wanted
                    && ticket::parse_body(issue.body.as_deref().unwrap_or("")).is_some()
            })
            .map(|issue| issue.number))
    }
}
