//! REST + WebSocket binding of [`LedgerGateway`].

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Address, Candidate, CandidateId, Receipt, VoterStatus},
    error::{LedgerErrorBody, LedgerErrorCode},
    protocol::{DelegateRequest, LedgerEvent, RegisterRequest, TallyResponse, VoteRequest},
};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::gateway::{GatewayError, GatewayResult, LedgerGateway, VoteCastSubscription};

const VOTE_CAST_BUFFER: usize = 64;

pub struct HttpLedgerGateway {
    http: Client,
    ledger_url: String,
    events_url: String,
}

/// `http(s)://host/base` becomes `ws(s)://host/base/events`.
pub fn derive_events_url(ledger_url: &Url) -> GatewayResult<Url> {
    let scheme = match ledger_url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(GatewayError::Unavailable(format!(
                "ledger url must use http or https, got {other}"
            )))
        }
    };
    let base = ledger_url.as_str().trim_end_matches('/');
    let rest = base
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(base);
    Url::parse(&format!("{scheme}://{rest}/events"))
        .map_err(|err| GatewayError::Unavailable(format!("invalid ledger events url: {err}")))
}

impl HttpLedgerGateway {
    pub fn new(ledger_url: &Url, events_url: &Url, timeout: Duration) -> GatewayResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| GatewayError::Unavailable(format!("failed to build http client: {err}")))?;
        Ok(Self {
            http,
            ledger_url: ledger_url.as_str().trim_end_matches('/').to_string(),
            events_url: events_url.as_str().to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> GatewayResult<T> {
        let response = self
            .http
            .get(format!("{}{path}", self.ledger_url))
            .send()
            .await
            .map_err(map_request_error)?;
        read_json(response).await
    }

    async fn post_json<B: serde::Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> GatewayResult<Receipt> {
        let response = self
            .http
            .post(format!("{}{path}", self.ledger_url))
            .json(body)
            .send()
            .await
            .map_err(map_request_error)?;
        let receipt: Receipt = read_json(response).await?;
        debug!(path, tx_hash = %receipt.tx_hash, "gateway: transaction accepted");
        Ok(receipt)
    }
}

fn map_request_error(err: reqwest::Error) -> GatewayError {
    if err.is_connect() {
        GatewayError::Unavailable(err.to_string())
    } else {
        GatewayError::Transport(err.to_string())
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> GatewayResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(error_from_body(status, &body));
    }
    response
        .json::<T>()
        .await
        .map_err(|err| GatewayError::Transport(format!("invalid ledger response: {err}")))
}

fn error_from_body(status: StatusCode, body: &str) -> GatewayError {
    if let Ok(LedgerErrorBody { code, message }) = serde_json::from_str::<LedgerErrorBody>(body) {
        return match code {
            LedgerErrorCode::NotFound => GatewayError::NotFound(message),
            LedgerErrorCode::Reverted => GatewayError::Revert { reason: message },
            LedgerErrorCode::UserRejected => GatewayError::UserRejected,
            LedgerErrorCode::Unavailable => GatewayError::Unavailable(message),
            LedgerErrorCode::Internal => GatewayError::Transport(message),
        };
    }

    match status {
        StatusCode::NOT_FOUND => GatewayError::NotFound(format!("ledger returned {status}")),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => {
            GatewayError::Unavailable(format!("ledger returned {status}"))
        }
        _ => GatewayError::Transport(format!("ledger returned {status}: {body}")),
    }
}

#[async_trait]
impl LedgerGateway for HttpLedgerGateway {
    async fn accounts(&self) -> GatewayResult<Vec<Address>> {
        self.get_json("/accounts").await
    }

    async fn get_candidates(&self) -> GatewayResult<Vec<Candidate>> {
        self.get_json("/candidates").await
    }

    async fn get_voter_status(&self, address: &Address) -> GatewayResult<VoterStatus> {
        self.get_json(&format!("/voters/{address}")).await
    }

    async fn get_tally(&self, candidate_id: CandidateId) -> GatewayResult<u64> {
        let tally: TallyResponse = self
            .get_json(&format!("/candidates/{}/tally", candidate_id.0))
            .await?;
        if tally.candidate_id != candidate_id {
            return Err(GatewayError::Transport(format!(
                "ledger returned tally for candidate {} when {} was requested",
                tally.candidate_id, candidate_id
            )));
        }
        Ok(tally.votes)
    }

    async fn submit_registration(&self, uid: &[u8], from: &Address) -> GatewayResult<Receipt> {
        self.post_json(
            "/register",
            &RegisterRequest {
                from: from.clone(),
                uid_b64: STANDARD.encode(uid),
            },
        )
        .await
    }

    async fn submit_vote(
        &self,
        candidate_id: CandidateId,
        from: &Address,
    ) -> GatewayResult<Receipt> {
        self.post_json(
            "/vote",
            &VoteRequest {
                from: from.clone(),
                candidate_id,
            },
        )
        .await
    }

    async fn submit_delegation(&self, target: &Address, from: &Address) -> GatewayResult<Receipt> {
        self.post_json(
            "/delegate",
            &DelegateRequest {
                from: from.clone(),
                to: target.clone(),
            },
        )
        .await
    }

    async fn subscribe_vote_cast(&self) -> GatewayResult<VoteCastSubscription> {
        let (ws_stream, _) = connect_async(self.events_url.as_str())
            .await
            .map_err(|err| {
                GatewayError::Unavailable(format!(
                    "failed to connect ledger event stream {}: {err}",
                    self.events_url
                ))
            })?;
        let (_, mut ws_reader) = ws_stream.split();
        let (tx, rx) = mpsc::channel(VOTE_CAST_BUFFER);
        let events_url = self.events_url.clone();
        info!(url = %events_url, "gateway: subscribed to vote-cast events");

        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<LedgerEvent>(&text) {
                        Ok(LedgerEvent::VoteCast { candidate_id }) => {
                            if tx.send(candidate_id).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!("gateway: ignoring malformed ledger event: {err}"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(url = %events_url, "gateway: ledger event stream failed: {err}");
                        break;
                    }
                }
            }
            debug!(url = %events_url, "gateway: vote-cast reader finished");
        });

        Ok(VoteCastSubscription::new(rx, Some(reader)))
    }
}

#[cfg(test)]
#[path = "tests/http_gateway_tests.rs"]
mod tests;
