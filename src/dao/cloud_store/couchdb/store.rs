use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, warn};

use crate::{
    dao::cloud_store::{
        ChangeListener, CloudDocument, CloudError, CloudResult, CloudStore, DeliveryGate, PushAck,
        Subscription,
    },
    state::game::GameCode,
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{CouchGameDocument, game_doc_id},
};

/// Cloud store persisting one CouchDB document per game code.
#[derive(Clone)]
pub struct CouchCloudStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
    poll_interval: Duration,
}

impl CouchCloudStore {
    /// Build the HTTP client. No request is sent until first use.
    pub fn new(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        Ok(Self {
            client,
            base_url,
            database,
            auth,
            poll_interval: config.poll_interval,
        })
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        self.authorize(self.client.request(method, url))
    }

    /// Create the database when it does not exist yet.
    pub async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = format!("{}/{}", self.base_url, self.database);

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: url.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorize(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::RequestSend {
                        path: url.clone(),
                        source,
                    })?;
                // 412: created concurrently by another client.
                if create.status().is_success()
                    || create.status() == StatusCode::PRECONDITION_FAILED
                {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<()>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: response.status(),
            })
        }
    }

    async fn upsert(&self, document: CloudDocument) -> CloudResult<PushAck> {
        let doc_id = game_doc_id(&document.code);
        let existing = self.get_document::<CouchGameDocument>(&doc_id).await?;

        let rev = match existing {
            Some(current) if current.game.last_update > document.last_update => {
                return Err(CloudError::Stale {
                    remote_last_update: current.game.last_update,
                });
            }
            Some(current) if current.game == document => {
                return Ok(PushAck {
                    last_update: document.last_update,
                });
            }
            Some(current) => current.rev,
            None => None,
        };

        let last_update = document.last_update;
        let couch_doc = CouchGameDocument::from((document, rev));
        self.put_document(&doc_id, &couch_doc).await?;
        Ok(PushAck { last_update })
    }

    async fn poll_changes(
        self,
        code: GameCode,
        gate: DeliveryGate,
        listener: ChangeListener,
    ) {
        let doc_id = game_doc_id(&code);
        let mut ticker = time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // `None` means nothing delivered yet; `Some(None)` means delivered "absent".
        let mut last_seen: Option<Option<String>> = None;

        while gate.is_open() {
            ticker.tick().await;
            match self.get_document::<CouchGameDocument>(&doc_id).await {
                Ok(current) => {
                    let rev = current.as_ref().and_then(|doc| doc.rev.clone());
                    if last_seen.as_ref() != Some(&rev) {
                        last_seen = Some(rev);
                        gate.deliver(&listener, current.map(|doc| doc.game));
                    }
                }
                Err(err) => {
                    debug!(code = %code, error = %err, "CouchDB subscription poll failed");
                }
            }
        }
    }
}

impl CloudStore for CouchCloudStore {
    fn push(&self, document: CloudDocument) -> BoxFuture<'static, CloudResult<PushAck>> {
        let store = self.clone();
        Box::pin(async move { store.upsert(document).await })
    }

    fn pull(&self, code: GameCode) -> BoxFuture<'static, CloudResult<Option<CloudDocument>>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = game_doc_id(&code);
            let maybe_doc = store.get_document::<CouchGameDocument>(&doc_id).await?;
            Ok(maybe_doc.map(|doc| doc.game))
        })
    }

    fn subscribe(&self, code: GameCode, listener: ChangeListener) -> Subscription {
        let gate = DeliveryGate::new();
        let task = tokio::spawn(self.clone().poll_changes(code, gate.clone(), listener));
        Subscription::new(gate, move || task.abort())
    }

    fn health_check(&self) -> BoxFuture<'static, CloudResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_database().await.map_err(|err| {
                warn!(error = %err, "CouchDB health check failed");
                CloudError::from(err)
            })
        })
    }
}
