//! Long-polling Bayeux (CometD) client for the streaming API.
//!
//! One session per subscribed topic. Replay is requested through the
//! `replay` extension: `-1` means "new events only".

use reqwest::Client;
use serde_json::{json, Value};
use sfdc_core::{replay_id_of, Advice, Error, FrameReceiver, MetaFrame, Result, StreamingFrame};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Instrument};

use crate::client::read_json;

const FRAME_BUFFER: usize = 256;
const NEW_EVENTS_ONLY: i64 = -1;

enum Handshake {
    Established(String),
    Rejected(MetaFrame),
}

enum Next {
    Connect,
    Rehandshake,
    Stop,
}

#[derive(Clone)]
pub(crate) struct Cometd {
    http: Client,
    endpoint: String,
    access_token: String,
    retry_delay: Duration,
}

impl Cometd {
    pub(crate) fn new(http: Client, instance_url: &str, api_version: &str, access_token: &str) -> Self {
        Self {
            http,
            endpoint: format!("{}/cometd/{}", instance_url.trim_end_matches('/'), api_version),
            access_token: access_token.to_string(),
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Handshake and subscribe, then keep the connect loop running in the
    /// background until the receiver is dropped or the server says stop.
    pub(crate) async fn subscribe(&self, topic: &str, replay_id: Option<i64>) -> Result<FrameReceiver> {
        let client_id = match self.handshake().await? {
            Handshake::Established(client_id) => client_id,
            Handshake::Rejected(meta) => return Err(rejection(meta)),
        };
        self.subscribe_topic(&client_id, topic, replay_id).await?;

        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let session = Session {
            cometd: self.clone(),
            topic: topic.to_string(),
            client_id,
            last_replay: replay_id,
            tx,
        };
        let span = tracing::debug_span!("cometd", topic = %topic);
        tokio::spawn(session.run().instrument(span));
        Ok(rx)
    }

    async fn exchange(&self, messages: Value, what: &str) -> Result<Vec<Value>> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.access_token)
            .json(&messages)
            .send()
            .await
            .map_err(|e| Error::Connection(format!("{} request failed: {}", what, e)))?;
        read_json(response, what).await
    }

    async fn handshake(&self) -> Result<Handshake> {
        let replies = self
            .exchange(
                json!([{
                    "channel": "/meta/handshake",
                    "version": "1.0",
                    "minimumVersion": "1.0",
                    "supportedConnectionTypes": ["long-polling"],
                    "ext": { "replay": true }
                }]),
                "Handshake",
            )
            .await?;

        let reply = find_reply(&replies, "/meta/handshake")?;
        let meta: MetaFrame = serde_json::from_value(reply.clone())?;
        if meta.successful == Some(true) {
            let client_id = reply
                .get("clientId")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::RemoteRequest("Handshake reply without clientId".to_string()))?;
            debug!("Handshake established");
            Ok(Handshake::Established(client_id.to_string()))
        } else {
            Ok(Handshake::Rejected(meta))
        }
    }

    async fn subscribe_topic(&self, client_id: &str, topic: &str, replay_id: Option<i64>) -> Result<()> {
        let replies = self
            .exchange(
                json!([{
                    "channel": "/meta/subscribe",
                    "clientId": client_id,
                    "subscription": topic,
                    "ext": { "replay": { topic: replay_id.unwrap_or(NEW_EVENTS_ONLY) } }
                }]),
                "Subscribe",
            )
            .await?;

        let meta: MetaFrame = serde_json::from_value(find_reply(&replies, "/meta/subscribe")?.clone())?;
        if meta.successful == Some(true) {
            Ok(())
        } else {
            Err(Error::RemoteRequest(format!(
                "Subscription to {} refused: {}",
                topic,
                meta.error.unwrap_or_else(|| "no reason given".to_string())
            )))
        }
    }

    async fn connect(&self, client_id: &str) -> Result<Vec<Value>> {
        self.exchange(
            json!([{
                "channel": "/meta/connect",
                "clientId": client_id,
                "connectionType": "long-polling"
            }]),
            "Connect",
        )
        .await
    }
}

fn find_reply<'a>(replies: &'a [Value], channel: &str) -> Result<&'a Value> {
    replies
        .iter()
        .find(|r| r.get("channel").and_then(Value::as_str) == Some(channel))
        .ok_or_else(|| Error::RemoteRequest(format!("No {} reply", channel)))
}

fn rejection(meta: MetaFrame) -> Error {
    let reason = meta.error.clone().unwrap_or_else(|| "no reason given".to_string());
    if meta.is_auth_failure() {
        Error::Authentication(format!("Handshake rejected: {}", reason))
    } else {
        Error::RemoteRequest(format!("Handshake rejected: {}", reason))
    }
}

/// Advisory standing in for a session the server refused at HTTP level.
fn lost_session(reason: String) -> MetaFrame {
    MetaFrame {
        channel: "/meta/connect".to_string(),
        successful: Some(false),
        error: Some(reason),
        advice: Some(Advice {
            reconnect: Some("none".to_string()),
        }),
        ext: None,
    }
}

struct Session {
    cometd: Cometd,
    topic: String,
    client_id: String,
    /// Last replay id forwarded; a re-handshake resumes after it.
    last_replay: Option<i64>,
    tx: mpsc::Sender<StreamingFrame>,
}

impl Session {
    async fn run(mut self) {
        loop {
            let replies = tokio::select! {
                _ = self.tx.closed() => break,
                replies = self.cometd.connect(&self.client_id) => replies,
            };

            let next = match replies {
                Ok(replies) => self.dispatch(replies).await,
                Err(Error::Authentication(reason)) => {
                    let _ = self.tx.send(StreamingFrame::Meta(lost_session(reason))).await;
                    Next::Stop
                }
                Err(e) => {
                    warn!("Connect failed, retrying: {}", e);
                    tokio::time::sleep(self.cometd.retry_delay).await;
                    Next::Connect
                }
            };

            match next {
                Next::Connect => {}
                Next::Rehandshake => {
                    if !self.rehandshake().await {
                        break;
                    }
                }
                Next::Stop => break,
            }
        }
        debug!("Streaming session ended");
    }

    async fn dispatch(&mut self, replies: Vec<Value>) -> Next {
        let mut next = Next::Connect;
        for reply in replies {
            let channel = reply
                .get("channel")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            if channel.starts_with("/meta/") {
                let meta: MetaFrame = match serde_json::from_value(reply) {
                    Ok(meta) => meta,
                    Err(e) => {
                        warn!("Malformed {} reply: {}", channel, e);
                        continue;
                    }
                };
                let reconnect = meta.advice.as_ref().and_then(|a| a.reconnect.clone());
                if self.tx.send(StreamingFrame::Meta(meta)).await.is_err() {
                    return Next::Stop;
                }
                if channel == "/meta/connect" {
                    match reconnect.as_deref() {
                        Some("none") => return Next::Stop,
                        Some("handshake") => next = Next::Rehandshake,
                        _ => {}
                    }
                }
            } else {
                let data = match reply {
                    Value::Object(mut message) => message.remove("data").unwrap_or(Value::Null),
                    _ => Value::Null,
                };
                if let Some(replay_id) = replay_id_of(&data) {
                    self.last_replay = Some(replay_id);
                }
                if self.tx.send(StreamingFrame::Message { channel, data }).await.is_err() {
                    return Next::Stop;
                }
            }
        }
        next
    }

    /// Returns false when the session must end.
    async fn rehandshake(&mut self) -> bool {
        loop {
            if self.tx.is_closed() {
                return false;
            }
            match self.cometd.handshake().await {
                Ok(Handshake::Established(client_id)) => {
                    match self
                        .cometd
                        .subscribe_topic(&client_id, &self.topic, self.last_replay)
                        .await
                    {
                        Ok(()) => {
                            info!("Re-subscribed after {:?}", self.last_replay);
                            self.client_id = client_id;
                            return true;
                        }
                        Err(e) => warn!("Re-subscribe failed: {}", e),
                    }
                }
                Ok(Handshake::Rejected(meta)) => {
                    let fatal = meta.is_auth_failure();
                    if self.tx.send(StreamingFrame::Meta(meta)).await.is_err() || fatal {
                        return false;
                    }
                }
                Err(Error::Authentication(reason)) => {
                    let _ = self.tx.send(StreamingFrame::Meta(lost_session(reason))).await;
                    return false;
                }
                Err(e) => warn!("Handshake failed: {}", e),
            }
            tokio::time::sleep(self.cometd.retry_delay).await;
        }
    }
}
