//! REST Pull Feed - Fallback Depth Source
//!
//! Fetches a full depth snapshot on a fixed interval. Each session reports
//! `Opened` once, then `Data` per successful fetch and `Failed(Fetch)` per
//! failed one; the loop never stops on its own. `fetch_once` serves forced
//! refreshes with a single request.

use std::sync::Arc;

use reqwest::Url;
use tokio::time::MissedTickBehavior;
use tracing::{debug, instrument};

use super::venue::VenueProfile;
use crate::adapters::api::client::RestClient;
use crate::domain::connection::Transport;
use crate::domain::normalizer::{PayloadShape, RawDepth};
use crate::ports::feed::{FeedAdapter, FeedError, FeedHandle, FeedRequest, FeedSink};

/// Pull adapter for one venue profile.
#[derive(Debug, Clone)]
pub struct PullFeed {
    profile: Arc<VenueProfile>,
    client: Arc<RestClient>,
}

impl PullFeed {
    /// `client` should not retry: the next tick is the retry.
    pub fn new(profile: Arc<VenueProfile>, client: Arc<RestClient>) -> Self {
        Self { profile, client }
    }

    fn url(&self, request: &FeedRequest) -> Result<Url, FeedError> {
        let raw = self.profile.pull_url(request);
        Url::parse(&raw).map_err(|e| FeedError::Construction(format!("invalid pull url {raw}: {e}")))
    }
}

impl FeedAdapter for PullFeed {
    fn transport(&self) -> Transport {
        Transport::Pull
    }

    fn open(&self, request: &FeedRequest, sink: FeedSink) -> Result<FeedHandle, FeedError> {
        let url = self.url(request)?;
        let client = Arc::clone(&self.client);
        let shape = self.profile.shape.clone();
        let every = self.profile.pull_interval;
        let id = sink.session();

        let task = tokio::spawn(async move {
            if !sink.opened() {
                return;
            }
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let delivered = match fetch(&client, &url, &shape).await {
                    Ok(depth) => sink.data(depth),
                    Err(e) => sink.failed(e),
                };
                if !delivered {
                    debug!(session = id.0, "Pull session receiver gone");
                    return;
                }
            }
        });

        Ok(FeedHandle::new(id, task))
    }

    fn fetch_once(&self, request: &FeedRequest, sink: FeedSink) -> Result<FeedHandle, FeedError> {
        let url = self.url(request)?;
        let client = Arc::clone(&self.client);
        let shape = self.profile.shape.clone();
        let id = sink.session();

        let task = tokio::spawn(async move {
            match fetch(&client, &url, &shape).await {
                Ok(depth) => sink.data(depth),
                Err(e) => sink.failed(e),
            };
        });

        Ok(FeedHandle::new(id, task))
    }
}

#[instrument(skip(client, shape), fields(url = %url))]
async fn fetch(client: &RestClient, url: &Url, shape: &PayloadShape) -> Result<RawDepth, FeedError> {
    let body = client
        .get_url(url.as_str())
        .await
        .map_err(|e| FeedError::Fetch(format!("{e:#}")))?;
    RawDepth::from_message(&body, shape)
        .ok_or_else(|| FeedError::Fetch("response carries no depth arrays".to_string()))
}
