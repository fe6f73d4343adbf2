// crates/flag-harness-core/src/sdk_kind.rs
// ============================================================================
// Module: SDK Kinds
// Description: Closed set of SDK kinds and their endpoint capability table.
// Purpose: Build the request path, method, and body each SDK kind uses.
// Dependencies: base64, serde, serde_json, url
// ============================================================================

//! ## Overview
//! Each [`SdkKind`] maps to one static [`SdkKindProfile`] naming its stream,
//! poll, and event endpoints. Client-side kinds carry the evaluation context
//! either base64url-encoded in the path (`GET`) or as a JSON body (`REPORT`);
//! the server kind sends no context at all.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::protocol::StreamProtocol;

// ============================================================================
// SECTION: Kinds
// ============================================================================

/// SDK family under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SdkKind {
    /// Server-side SDK evaluating full flag models.
    Server,
    /// Mobile SDK receiving evaluated flags for one context.
    Mobile,
    /// Browser/JS client SDK receiving evaluated flags, unauthenticated.
    JsClient,
}

/// HTTP method used for flag retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlagRequestMethod {
    /// Context in the path.
    Get,
    /// Context as a JSON body.
    Report,
}

impl FlagRequestMethod {
    /// Returns the HTTP method token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Report => "REPORT",
        }
    }
}

/// Endpoint templates for one SDK kind.
///
/// Templates may contain `{env}` (client-side id) and `{context}` (base64url
/// context JSON) placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdkKindProfile {
    /// Kind described by this profile.
    pub kind: SdkKind,
    /// Whether requests carry an `Authorization` header.
    pub requires_auth: bool,
    /// Versioned stream path for `GET`.
    pub stream_get: &'static str,
    /// Versioned stream path for `REPORT`, if supported.
    pub stream_report: Option<&'static str>,
    /// Legacy stream path for `GET`.
    pub legacy_stream_get: &'static str,
    /// Versioned poll path for `GET`.
    pub poll_get: &'static str,
    /// Poll path for `REPORT`, if supported.
    pub poll_report: Option<&'static str>,
    /// Legacy poll path for `GET`.
    pub legacy_poll_get: &'static str,
    /// Analytics event path.
    pub events_bulk: &'static str,
    /// Diagnostic event path.
    pub events_diagnostic: &'static str,
}

/// Server kind profile.
const SERVER_PROFILE: SdkKindProfile = SdkKindProfile {
    kind: SdkKind::Server,
    requires_auth: true,
    stream_get: "/sdk/stream",
    stream_report: None,
    legacy_stream_get: "/all",
    poll_get: "/sdk/poll",
    poll_report: None,
    legacy_poll_get: "/sdk/latest-all",
    events_bulk: "/bulk",
    events_diagnostic: "/diagnostic",
};

/// Mobile kind profile.
const MOBILE_PROFILE: SdkKindProfile = SdkKindProfile {
    kind: SdkKind::Mobile,
    requires_auth: true,
    stream_get: "/meval/{context}",
    stream_report: Some("/meval"),
    legacy_stream_get: "/meval/{context}",
    poll_get: "/msdk/evalx/contexts/{context}",
    poll_report: Some("/msdk/evalx/context"),
    legacy_poll_get: "/msdk/evalx/contexts/{context}",
    events_bulk: "/mobile/events/bulk",
    events_diagnostic: "/mobile/events/diagnostic",
};

/// JS client kind profile.
const JS_CLIENT_PROFILE: SdkKindProfile = SdkKindProfile {
    kind: SdkKind::JsClient,
    requires_auth: false,
    stream_get: "/eval/{env}/{context}",
    stream_report: Some("/eval/{env}"),
    legacy_stream_get: "/eval/{env}/{context}",
    poll_get: "/sdk/evalx/{env}/contexts/{context}",
    poll_report: Some("/sdk/evalx/{env}/context"),
    legacy_poll_get: "/sdk/evalx/{env}/contexts/{context}",
    events_bulk: "/events/bulk/{env}",
    events_diagnostic: "/events/diagnostic/{env}",
};

impl SdkKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 3] = [Self::Server, Self::Mobile, Self::JsClient];

    /// Returns the kind label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Mobile => "mobile",
            Self::JsClient => "js-client",
        }
    }

    /// Returns the capability profile.
    #[must_use]
    pub const fn profile(self) -> &'static SdkKindProfile {
        match self {
            Self::Server => &SERVER_PROFILE,
            Self::Mobile => &MOBILE_PROFILE,
            Self::JsClient => &JS_CLIENT_PROFILE,
        }
    }

    /// Returns true for kinds that receive evaluated flags.
    #[must_use]
    pub const fn is_client_side(self) -> bool {
        !matches!(self, Self::Server)
    }

    /// Returns true when requests carry an `Authorization` header.
    #[must_use]
    pub const fn requires_auth(self) -> bool {
        self.profile().requires_auth
    }

    /// Builds the stream request for a context.
    #[must_use]
    pub fn stream_request(self, protocol: StreamProtocol, query: &FlagQuery<'_>) -> RequestTarget {
        let profile = self.profile();
        let get = match protocol {
            StreamProtocol::Versioned => profile.stream_get,
            StreamProtocol::Legacy => profile.legacy_stream_get,
        };
        self.flag_request(get, profile.stream_report, query)
    }

    /// Builds the poll request for a context.
    #[must_use]
    pub fn poll_request(self, protocol: StreamProtocol, query: &FlagQuery<'_>) -> RequestTarget {
        let profile = self.profile();
        let get = match protocol {
            StreamProtocol::Versioned => profile.poll_get,
            StreamProtocol::Legacy => profile.legacy_poll_get,
        };
        self.flag_request(get, profile.poll_report, query)
    }

    /// Returns the analytics event path.
    #[must_use]
    pub fn events_path(self, env: &str) -> String {
        render(self.profile().events_bulk, env, "")
    }

    /// Returns the diagnostic event path.
    #[must_use]
    pub fn diagnostic_path(self, env: &str) -> String {
        render(self.profile().events_diagnostic, env, "")
    }

    /// Shared request assembly for stream and poll.
    fn flag_request(
        self,
        get: &'static str,
        report: Option<&'static str>,
        query: &FlagQuery<'_>,
    ) -> RequestTarget {
        let use_report = query.method == FlagRequestMethod::Report && self.is_client_side();
        let mut target = match (use_report, report) {
            (true, Some(template)) => RequestTarget {
                method: FlagRequestMethod::Report,
                path: render(template, query.env, ""),
                body: Some(query.context.clone()),
            },
            _ => RequestTarget {
                method: FlagRequestMethod::Get,
                path: render(get, query.env, &encode_context(query.context)),
                body: None,
            },
        };
        if self.is_client_side() && query.with_reasons {
            target = target.with_query("withReasons", "true");
        }
        if let Some(basis) = query.basis.filter(|basis| !basis.is_empty()) {
            target = target.with_query("basis", basis);
        }
        target
    }
}

impl fmt::Display for SdkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Inputs for building a flag retrieval request.
#[derive(Debug, Clone, Copy)]
pub struct FlagQuery<'a> {
    /// Requested method (`REPORT` falls back to `GET` when unsupported).
    pub method: FlagRequestMethod,
    /// Client-side environment id (credential for the JS client kind).
    pub env: &'a str,
    /// Evaluation context.
    pub context: &'a Value,
    /// Whether evaluation reasons are requested.
    pub with_reasons: bool,
    /// Last committed state id, if any.
    pub basis: Option<&'a str>,
}

/// Concrete request an SDK issues for flag data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    /// HTTP method.
    pub method: FlagRequestMethod,
    /// Path plus query string.
    pub path: String,
    /// JSON body for `REPORT` requests.
    pub body: Option<Value>,
}

impl RequestTarget {
    /// Appends a query parameter.
    #[must_use]
    pub fn with_query(mut self, name: &str, value: &str) -> Self {
        let separator = if self.path.contains('?') { '&' } else { '?' };
        self.path = format!("{}{separator}{name}={}", self.path, encode_query_value(value));
        self
    }
}

/// Encodes a context for use in a path segment.
#[must_use]
pub fn encode_context(context: &Value) -> String {
    URL_SAFE.encode(context.to_string())
}

/// Decodes a path-encoded context back into JSON.
#[must_use]
pub fn decode_context(segment: &str) -> Option<Value> {
    let bytes = URL_SAFE.decode(segment).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Substitutes template placeholders.
fn render(template: &str, env: &str, context: &str) -> String {
    template.replace("{env}", env).replace("{context}", context)
}

/// Percent-encodes a query value.
fn encode_query_value(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
