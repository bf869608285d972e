//! HTTP implementations of the engine's network collaborators.
//!
//! Actor documents are fetched with `Accept: application/activity+json`;
//! `user@host` handles are first resolved through WebFinger.  Request
//! signing and signature checks are left to a fronting proxy.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use heraut_federation::{
    ActorFetcher, ActorProfile, DeliveryTransport, FederationError, FetchError,
};
use heraut_shared::constants::{ACTIVITY_JSON, USER_AGENT};
use heraut_shared::{Attributes, ProtocolObject};

const JRD_JSON: &str = "application/jrd+json";

fn build_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
}

// ---------------------------------------------------------------------------
// Actor fetching
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WebFinger {
    #[serde(default)]
    links: Vec<WebFingerLink>,
}

#[derive(Debug, Deserialize)]
struct WebFingerLink {
    rel: String,
    #[serde(rename = "type")]
    media_type: Option<String>,
    href: Option<String>,
}

pub struct HttpActorFetcher {
    client: reqwest::Client,
}

impl HttpActorFetcher {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        accept: &str,
    ) -> Result<T, FetchError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, accept)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => return Err(FetchError::NotFound),
            status if !status.is_success() => return Err(FetchError::Status(status.as_u16())),
            _ => {}
        }

        response
            .json()
            .await
            .map_err(|e| FetchError::InvalidDocument(e.to_string()))
    }

    /// Actor URL advertised by WebFinger for `user@host`.
    async fn webfinger(&self, handle: &str) -> Result<String, FetchError> {
        let (user, host) = split_handle(handle)
            .ok_or_else(|| FetchError::InvalidDocument(format!("not a handle: {handle}")))?;
        let url = format!("https://{host}/.well-known/webfinger?resource=acct:{user}@{host}");
        debug!(handle, url = %url, "WebFinger lookup");

        let finger: WebFinger = self.get_json(&url, JRD_JSON).await?;
        finger
            .links
            .into_iter()
            .find(|link| {
                link.rel == "self"
                    && link
                        .media_type
                        .as_deref()
                        .is_some_and(|t| t == ACTIVITY_JSON || t.starts_with("application/ld+json"))
            })
            .and_then(|link| link.href)
            .ok_or_else(|| FetchError::InvalidDocument(format!("no actor link for {handle}")))
    }
}

#[async_trait]
impl ActorFetcher for HttpActorFetcher {
    async fn fetch_actor(&self, identifier: &str) -> Result<ActorProfile, FetchError> {
        let url = if identifier.starts_with("https://") || identifier.starts_with("http://") {
            identifier.to_string()
        } else {
            self.webfinger(identifier).await?
        };
        let document: Attributes = self.get_json(&url, ACTIVITY_JSON).await?;
        profile_from_document(document)
    }
}

/// `("bob", "remote.example")` for `bob@remote.example`.
fn split_handle(handle: &str) -> Option<(&str, &str)> {
    let (user, host) = handle.split_once('@')?;
    let user_ok = !user.is_empty() && user.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    let host_ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    (user_ok && host_ok).then_some((user, host))
}

fn profile_from_document(document: Attributes) -> Result<ActorProfile, FetchError> {
    let url = document
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| FetchError::InvalidDocument("actor has no id".to_string()))?
        .to_string();
    let username = document
        .get("preferredUsername")
        .and_then(|v| v.as_str())
        .ok_or_else(|| FetchError::InvalidDocument("actor has no preferredUsername".to_string()))?;
    let host = url
        .split_once("://")
        .and_then(|(_, rest)| rest.split('/').next())
        .filter(|host| !host.is_empty())
        .ok_or_else(|| FetchError::InvalidDocument(format!("actor id is not a URL: {url}")))?;

    Ok(ActorProfile {
        account: format!("{username}@{host}"),
        url,
        attributes: document,
    })
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

pub struct HttpDeliveryTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpDeliveryTransport {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            timeout,
        })
    }
}

#[async_trait]
impl DeliveryTransport for HttpDeliveryTransport {
    async fn post_activity(
        &self,
        inbox: &str,
        activity: &ProtocolObject,
    ) -> heraut_federation::Result<()> {
        let response = self
            .client
            .post(inbox)
            .header(reqwest::header::CONTENT_TYPE, ACTIVITY_JSON)
            .json(&activity.to_map())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FederationError::Timeout(self.timeout)
                } else {
                    FederationError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FederationError::Transport(format!("HTTP {status} from {inbox}")));
        }
        debug!(inbox, activity = %activity.id(), status = status.as_u16(), "Activity accepted");
        Ok(())
    }
}
