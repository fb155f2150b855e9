use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::trace::{Trace, format_duration};

/// The record produced for every executed request.
///
/// All values are kept in their textual form. A failed request only carries
/// `is_err = true` (plus the stage name): the other fields stay empty and no
/// failure detail is retained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadResult {
    pub is_err: bool,
    pub status_code: String,
    pub dns_lookup: String,
    pub connection_time: String,
    pub tcp_connection_time: String,
    pub tls_handshake: String,
    pub server_time: String,
    pub response_time: String,
    pub total_time: String,
    pub is_connection_reused: String,
    pub stage_name: String,
}

impl LoadResult {
    pub fn failed() -> Self {
        Self {
            is_err: true,
            ..Default::default()
        }
    }

    pub fn from_trace(status: StatusCode, trace: &Trace) -> Self {
        Self {
            is_err: false,
            status_code: status.as_u16().to_string(),
            dns_lookup: format_duration(trace.dns_lookup),
            connection_time: format_duration(trace.conn_time),
            tcp_connection_time: format_duration(trace.tcp_conn_time),
            tls_handshake: format_duration(trace.tls_handshake),
            server_time: format_duration(trace.server_time),
            response_time: format_duration(trace.response_time),
            total_time: format_duration(trace.total_time),
            is_connection_reused: trace.is_conn_reused.to_string(),
            stage_name: String::new(),
        }
    }

    pub(crate) fn with_stage(mut self, stage: &str) -> Self {
        self.stage_name = stage.to_string();
        self
    }

    /// True when every timing field is empty, as for a transport failure.
    pub fn has_no_timings(&self) -> bool {
        [
            &self.dns_lookup,
            &self.connection_time,
            &self.tcp_connection_time,
            &self.tls_handshake,
            &self.server_time,
            &self.response_time,
            &self.total_time,
        ]
        .iter()
        .all(|t| t.is_empty())
    }
}
