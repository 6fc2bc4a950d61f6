//! JSON-over-HTTP transport for the claim service.
//!
//! Each RPC is a `POST {address}/proto.ClaimService/<Method>` with a JSON body.
//! A non-2xx answer may carry `{"code": "NOT_FOUND", "message": "..."}`; when it
//! doesn't, the HTTP status is mapped onto the nearest [`StatusCode`].

use std::io::ErrorKind;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cellsync_core::{LeasePage, LeaseUuid};

use crate::client::{method, ClaimClient};
use crate::error::{ClientError, StatusCode};

pub const CELL_ID_HEADER: &str = "x-cell-id";

#[derive(Debug, Serialize)]
struct ListLeasesRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<&'a str>,
    limit: usize,
}

#[derive(Debug, Serialize)]
struct UpdateRequest<'a> {
    uuid: &'a LeaseUuid,
}

#[derive(Debug, Default, Deserialize)]
struct StatusBody {
    code: Option<String>,
    message: Option<String>,
}

/// Blocking claim client backed by `ureq`.
pub struct HttpClaimClient {
    agent: ureq::Agent,
    address: String,
    cell_id: String,
}

impl HttpClaimClient {
    pub fn new(address: impl Into<String>, cell_id: impl Into<String>) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
            address: address.into().trim_end_matches('/').to_string(),
            cell_id: cell_id.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn cell_id(&self) -> &str {
        &self.cell_id
    }

    fn call(
        &self,
        rpc: &'static str,
        body: &impl Serialize,
        deadline: Duration,
    ) -> Result<ureq::Response, ClientError> {
        let url = format!("{}{rpc}", self.address);
        tracing::debug!(rpc, url = %url, deadline_ms = deadline.as_millis() as u64, "claim rpc");
        self.agent
            .post(&url)
            .timeout(deadline)
            .set(CELL_ID_HEADER, &self.cell_id)
            .send_json(body)
            .map_err(|err| map_ureq_error(rpc, deadline, err))
    }
}

impl ClaimClient for HttpClaimClient {
    fn list_leases(
        &self,
        cursor: Option<&str>,
        limit: usize,
        deadline: Duration,
    ) -> Result<LeasePage, ClientError> {
        let response = self.call(
            method::LIST_LEASES,
            &ListLeasesRequest { cursor, limit },
            deadline,
        )?;
        response
            .into_json::<LeasePage>()
            .map_err(|err| read_error(method::LIST_LEASES, deadline, err))
    }

    fn commit_update(&self, uuid: &LeaseUuid, deadline: Duration) -> Result<(), ClientError> {
        self.call(method::COMMIT_UPDATE, &UpdateRequest { uuid }, deadline)
            .map(|_| ())
    }

    fn rollback_update(&self, uuid: &LeaseUuid, deadline: Duration) -> Result<(), ClientError> {
        self.call(method::ROLLBACK_UPDATE, &UpdateRequest { uuid }, deadline)
            .map(|_| ())
    }
}

fn map_ureq_error(rpc: &'static str, deadline: Duration, err: ureq::Error) -> ClientError {
    match err {
        ureq::Error::Status(status, response) => {
            let body: StatusBody = response.into_json().unwrap_or_default();
            let code = body
                .code
                .as_deref()
                .and_then(StatusCode::from_name)
                .unwrap_or_else(|| StatusCode::from_http(status));
            ClientError::Status {
                method: rpc,
                code,
                message: body.message.unwrap_or_else(|| format!("HTTP {status}")),
            }
        }
        ureq::Error::Transport(transport) => {
            if is_timeout(&transport) {
                ClientError::DeadlineExceeded {
                    method: rpc,
                    deadline,
                }
            } else {
                ClientError::Transport {
                    method: rpc,
                    message: transport.to_string(),
                }
            }
        }
    }
}

fn read_error(rpc: &'static str, deadline: Duration, err: std::io::Error) -> ClientError {
    if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) {
        return ClientError::DeadlineExceeded {
            method: rpc,
            deadline,
        };
    }
    ClientError::Decode {
        method: rpc,
        message: err.to_string(),
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    let io_timeout = std::error::Error::source(transport)
        .and_then(|source| source.downcast_ref::<std::io::Error>())
        .is_some_and(|io| matches!(io.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock));
    io_timeout || transport.to_string().contains("timed out")
}
