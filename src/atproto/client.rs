// SPDX-License-Identifier: MPL-2.0

use crate::atproto::remote::{ClientError, Remote};
use crate::atproto::views::{
    ConvosResponse, FeedGeneratorsResponse, FeedResponse, LabelerServicesResponse,
    MessagesResponse, NotificationsResponse, SearchPostsResponse, ThreadResponse,
};
use crate::config::DEFAULT_PDS;
use crate::ids::{AtUri, ConvoId, Did};
use crate::timeline::FeedSource;
use async_trait::async_trait;
use atrium_api::agent::atp_agent::AtpAgent;
use atrium_api::agent::bluesky::{AtprotoServiceType, BSKY_CHAT_DID};
use atrium_api::agent::atp_agent::store::MemorySessionStore;
use atrium_xrpc_client::reqwest::ReqwestClient;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::{Arc, PoisonError, RwLock};

type Agent = AtpAgent<MemorySessionStore, ReqwestClient>;

/// Login result. Decoupled from atrium's representation so we own the API boundary.
#[derive(Debug, Clone)]
pub struct Session {
    pub did: String,
    pub handle: String,
    pub access_jwt: String,
    pub refresh_jwt: String,
}

/// Wraps atrium and re-decodes every response into our own view types.
///
/// Responses go through `serde_json::Value`: atrium serializes the lexicon
/// shape (with `$type` tags on unions) and our views decode it item by item.
///
/// Atrium has already decoded the whole XRPC body into its typed output by
/// then. An item atrium itself rejects fails the entire call with
/// [`ClientError::Network`], which the engine reports as a stale page. Item-level
/// skipping only covers items that are valid lexicon but do not fit our views,
/// such as unknown embed types or records missing fields we need.
pub struct HangarClient {
    agent: RwLock<Option<Arc<Agent>>>,
    service_url: String,
}

impl HangarClient {
    pub fn new() -> Self {
        Self::with_service(DEFAULT_PDS)
    }

    pub fn with_service(service_url: &str) -> Self {
        Self {
            agent: RwLock::new(None),
            service_url: service_url.to_string(),
        }
    }

    pub async fn login(&self, handle: &str, password: &str) -> Result<Session, ClientError> {
        let client = ReqwestClient::new(&self.service_url);
        let agent = AtpAgent::new(client, MemorySessionStore::default());

        let result = agent
            .login(handle, password)
            .await
            .map_err(|e| ClientError::Auth(e.to_string()))?;

        let session = Session {
            did: result.data.did.to_string(),
            handle: result.data.handle.to_string(),
            access_jwt: result.data.access_jwt.clone(),
            refresh_jwt: result.data.refresh_jwt.clone(),
        };

        self.set_agent(Some(agent));
        Ok(session)
    }

    pub async fn resume_session(&self, session: &Session) -> Result<(), ClientError> {
        let client = ReqwestClient::new(&self.service_url);
        let agent = AtpAgent::new(client, MemorySessionStore::default());

        let atrium_session = atrium_api::agent::atp_agent::AtpSession::from(
            atrium_api::com::atproto::server::create_session::OutputData {
                access_jwt: session.access_jwt.clone(),
                active: None,
                did: session
                    .did
                    .parse()
                    .map_err(|e| ClientError::Auth(format!("invalid DID: {e}")))?,
                did_doc: None,
                email: None,
                email_auth_factor: None,
                email_confirmed: None,
                handle: session
                    .handle
                    .parse()
                    .map_err(|e| ClientError::Auth(format!("invalid handle: {e}")))?,
                refresh_jwt: session.refresh_jwt.clone(),
                status: None,
            },
        );

        agent
            .resume_session(atrium_session)
            .await
            .map_err(|e| ClientError::Auth(e.to_string()))?;

        self.set_agent(Some(agent));
        Ok(())
    }

    pub fn clear_session(&self) {
        self.set_agent(None);
    }

    fn set_agent(&self, agent: Option<Agent>) {
        let mut guard = self.agent.write().unwrap_or_else(PoisonError::into_inner);
        *guard = agent.map(Arc::new);
    }

    /// Clone the agent out so no lock is held across an await.
    fn agent(&self) -> Result<Arc<Agent>, ClientError> {
        self.agent
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ClientError::NotAuthenticated)
    }
}

impl Default for HangarClient {
    fn default() -> Self {
        Self::new()
    }
}

fn decode<S: Serialize, T: DeserializeOwned>(data: &S) -> Result<T, ClientError> {
    serde_json::to_value(data)
        .and_then(serde_json::from_value)
        .map_err(|e| ClientError::InvalidResponse(e.to_string()))
}

fn network(e: impl std::fmt::Display) -> ClientError {
    ClientError::Network(e.to_string())
}

fn invalid(what: &str, e: impl std::fmt::Display) -> ClientError {
    ClientError::InvalidResponse(format!("invalid {what}: {e}"))
}

#[async_trait]
impl Remote for HangarClient {
    async fn feed(
        &self,
        source: &FeedSource,
        cursor: Option<&str>,
        limit: u8,
    ) -> Result<FeedResponse, ClientError> {
        let agent = self.agent()?;
        let feed = &agent.api.app.bsky.feed;
        let cursor = cursor.map(String::from);

        match source {
            FeedSource::Following => {
                let params = atrium_api::app::bsky::feed::get_timeline::ParametersData {
                    algorithm: None,
                    cursor,
                    limit: limit.try_into().ok(),
                };
                let output = feed.get_timeline(params.into()).await.map_err(network)?;
                decode(&output.data)
            }
            FeedSource::Feed(uri) => {
                let params = atrium_api::app::bsky::feed::get_feed::ParametersData {
                    feed: uri.as_str().parse().map_err(|e| invalid("feed URI", e))?,
                    cursor,
                    limit: limit.try_into().ok(),
                };
                let output = feed.get_feed(params.into()).await.map_err(network)?;
                decode(&output.data)
            }
            FeedSource::List(uri) => {
                let params = atrium_api::app::bsky::feed::get_list_feed::ParametersData {
                    list: uri.as_str().parse().map_err(|e| invalid("list URI", e))?,
                    cursor,
                    limit: limit.try_into().ok(),
                };
                let output = feed.get_list_feed(params.into()).await.map_err(network)?;
                decode(&output.data)
            }
            FeedSource::Author(actor) => {
                let params = atrium_api::app::bsky::feed::get_author_feed::ParametersData {
                    actor: actor.as_str().parse().map_err(|e| invalid("actor", e))?,
                    cursor,
                    filter: None,
                    include_pins: Some(true),
                    limit: limit.try_into().ok(),
                };
                let output = feed.get_author_feed(params.into()).await.map_err(network)?;
                decode(&output.data)
            }
            FeedSource::Likes(actor) => {
                let params = atrium_api::app::bsky::feed::get_actor_likes::ParametersData {
                    actor: actor.as_str().parse().map_err(|e| invalid("actor", e))?,
                    cursor,
                    limit: limit.try_into().ok(),
                };
                let output = feed.get_actor_likes(params.into()).await.map_err(network)?;
                decode(&output.data)
            }
            FeedSource::Search(query) => {
                let params = atrium_api::app::bsky::feed::search_posts::ParametersData {
                    q: query.clone(),
                    author: None,
                    cursor,
                    domain: None,
                    lang: None,
                    limit: limit.try_into().ok(),
                    mentions: None,
                    since: None,
                    sort: None,
                    tag: None,
                    until: None,
                    url: None,
                };
                let output = feed.search_posts(params.into()).await.map_err(network)?;
                decode::<_, SearchPostsResponse>(&output.data).map(FeedResponse::from)
            }
        }
    }

    async fn post_thread(
        &self,
        uri: &AtUri,
        depth: u16,
        parent_height: u16,
    ) -> Result<ThreadResponse, ClientError> {
        let agent = self.agent()?;

        let params = atrium_api::app::bsky::feed::get_post_thread::ParametersData {
            uri: uri.as_str().parse().map_err(|e| invalid("URI", e))?,
            depth: depth.try_into().ok(),
            parent_height: parent_height.try_into().ok(),
        };

        let output = agent
            .api
            .app
            .bsky
            .feed
            .get_post_thread(params.into())
            .await
            .map_err(network)?;

        decode(&output.data)
    }

    async fn notifications(
        &self,
        cursor: Option<&str>,
        limit: u8,
    ) -> Result<NotificationsResponse, ClientError> {
        let agent = self.agent()?;

        let params = atrium_api::app::bsky::notification::list_notifications::ParametersData {
            cursor: cursor.map(String::from),
            limit: limit.try_into().ok(),
            priority: None,
            reasons: None,
            seen_at: None,
        };

        let output = agent
            .api
            .app
            .bsky
            .notification
            .list_notifications(params.into())
            .await
            .map_err(network)?;

        decode(&output.data)
    }

    async fn conversations(
        &self,
        cursor: Option<&str>,
        limit: u8,
    ) -> Result<ConvosResponse, ClientError> {
        let agent = self.agent()?;

        // Chat API requires proxying through the chat service
        let chat_did = BSKY_CHAT_DID
            .parse()
            .map_err(|e| ClientError::Network(format!("invalid chat DID: {e}")))?;
        let chat_api = agent.api_with_proxy(chat_did, AtprotoServiceType::BskyChat);

        let params = atrium_api::chat::bsky::convo::list_convos::ParametersData {
            cursor: cursor.map(String::from),
            limit: limit.try_into().ok(),
            read_state: None,
            status: None,
        };

        let output = chat_api
            .chat
            .bsky
            .convo
            .list_convos(params.into())
            .await
            .map_err(network)?;

        decode(&output.data)
    }

    async fn messages(
        &self,
        convo: &ConvoId,
        cursor: Option<&str>,
        limit: u8,
    ) -> Result<MessagesResponse, ClientError> {
        let agent = self.agent()?;

        let chat_did = BSKY_CHAT_DID
            .parse()
            .map_err(|e| ClientError::Network(format!("invalid chat DID: {e}")))?;
        let chat_api = agent.api_with_proxy(chat_did, AtprotoServiceType::BskyChat);

        let params = atrium_api::chat::bsky::convo::get_messages::ParametersData {
            convo_id: convo.to_string(),
            cursor: cursor.map(String::from),
            limit: limit.try_into().ok(),
        };

        let output = chat_api
            .chat
            .bsky
            .convo
            .get_messages(params.into())
            .await
            .map_err(network)?;

        decode(&output.data)
    }

    async fn feed_generators(&self, uris: &[AtUri]) -> Result<FeedGeneratorsResponse, ClientError> {
        let agent = self.agent()?;

        let feeds = uris
            .iter()
            .map(|uri| uri.as_str().parse())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| invalid("feed URI", e))?;
        let params = atrium_api::app::bsky::feed::get_feed_generators::ParametersData { feeds };

        let output = agent
            .api
            .app
            .bsky
            .feed
            .get_feed_generators(params.into())
            .await
            .map_err(network)?;

        decode(&output.data)
    }

    async fn labeler_services(&self, dids: &[Did]) -> Result<LabelerServicesResponse, ClientError> {
        let agent = self.agent()?;

        let dids = dids
            .iter()
            .map(|did| did.as_str().parse())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| invalid("DID", e))?;
        let params = atrium_api::app::bsky::labeler::get_services::ParametersData {
            detailed: Some(true),
            dids,
        };

        let output = agent
            .api
            .app
            .bsky
            .labeler
            .get_services(params.into())
            .await
            .map_err(network)?;

        decode(&output.data)
    }
}
