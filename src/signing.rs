//! Canonical request signing
//!
//! Server-to-server callers sign each request with a long-lived secret
//! shared per application. No handshake is involved: the caller sends its
//! application ID and a signature header, and the server re-derives the
//! signature from the request it received.
//!
//! # Signable string
//!
//! ```text
//! CanonicalPath    \n
//! CanonicalQuery   \n
//! CanonicalHeaders \n
//! SignedHeaders    \n
//! hex(sha1(body))  \n
//! AppKey
//! ```
//!
//! The signature is `hex(sha1(signable string))`.
//!
//! - **Path**: percent-encoded except unreserved characters and `/`.
//! - **Query**: keys sorted; each value of a multi-valued key emitted as its
//!   own `key=value` pair in sorted order; `/` encoded as `%2F`; pairs joined
//!   with `&`.
//! - **Headers**: the allow-list (default `host`, `date`) plus every header
//!   carrying the custom prefix, minus the signature header itself. Names are
//!   lower-cased and sorted; multiple values are sorted, joined with `,` and
//!   trimmed; lines are `name:value` joined with `\n`.
//!
//! A component that already contains a `%XX` escape is passed through
//! unchanged, so callers may send pre-encoded values.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::crypto::{constant_time_str_eq, sha1_hex};

/// Ordered multimap used for query parameters and headers.
pub type MultiMap = BTreeMap<String, Vec<String>>;

/// Signature mismatch. Carries the server-side signable string for logs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("signature mismatch")]
pub struct SignError {
    pub string_to_sign: String,
}

// ============================================================================
// Percent encoding
// ============================================================================

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'~' | b'.')
}

/// True if `s` contains a `%XX` escape.
fn is_encoded(s: &str) -> bool {
    s.as_bytes()
        .windows(3)
        .any(|w| w[0] == b'%' && w[1].is_ascii_hexdigit() && w[2].is_ascii_hexdigit())
}

fn uri_encode(s: &str, encode_slash: bool) -> String {
    if s.is_empty() || is_encoded(s) {
        return s.to_string();
    }

    let mut out = String::with_capacity(s.len() * 3);
    for &b in s.as_bytes() {
        if is_unreserved(b) || (b == b'/' && !encode_slash) {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

/// Canonical form of a request path; `/` is kept.
pub fn canonical_path(path: &str) -> String {
    uri_encode(path, false)
}

/// Canonical form of a query key or value; `/` becomes `%2F`.
pub fn encode_component(s: &str) -> String {
    uri_encode(s, true)
}

/// Canonical query string.
pub fn canonical_query(params: &MultiMap) -> String {
    let mut pairs = Vec::new();
    for (key, values) in params {
        let key = encode_component(key);
        let mut values: Vec<&String> = values.iter().collect();
        values.sort();
        for value in values {
            pairs.push(format!("{}={}", key, encode_component(value)));
        }
    }
    pairs.join("&")
}

// ============================================================================
// Request
// ============================================================================

/// Everything a signature covers, gathered from one request.
#[derive(Debug, Clone, Default)]
pub struct SignedRequest {
    /// Not part of the signable string; kept for diagnostics.
    pub method: String,
    /// Path without query string
    pub path: String,
    pub query: MultiMap,
    /// Header names may use any case
    pub headers: MultiMap,
    pub body: Vec<u8>,
}

impl SignedRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.entry(key.into()).or_default().push(value.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.entry(name.into()).or_default().push(value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// A computed signature and the string it was computed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub signature: String,
    pub string_to_sign: String,
}

// ============================================================================
// Signer
// ============================================================================

/// Canonicalizes and signs requests.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    allow_list: BTreeSet<String>,
    prefix: String,
    sign_header: String,
}

impl RequestSigner {
    /// `allow_list` holds standard header names to sign; `header_prefix` marks
    /// custom headers (all signed); `sign_header` is excluded from signing.
    pub fn new<I, S>(allow_list: I, header_prefix: &str, sign_header: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allow_list: allow_list
                .into_iter()
                .map(|h| h.as_ref().to_lowercase())
                .collect(),
            prefix: header_prefix.to_lowercase(),
            sign_header: sign_header.to_lowercase(),
        }
    }

    fn is_signed_header(&self, lower_name: &str) -> bool {
        lower_name != self.sign_header
            && (self.allow_list.contains(lower_name) || lower_name.starts_with(&self.prefix))
    }

    /// Canonical header block and the `;`-joined list of signed header names.
    pub fn canonical_headers(&self, headers: &MultiMap) -> (String, String) {
        let mut selected: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for (name, values) in headers {
            let name = name.to_lowercase();
            if self.is_signed_header(&name) {
                selected
                    .entry(name)
                    .or_default()
                    .extend(values.iter().map(String::as_str));
            }
        }

        let mut lines = Vec::with_capacity(selected.len());
        for (name, values) in &mut selected {
            values.sort_unstable();
            lines.push(format!("{}:{}", name, values.join(",").trim()));
        }
        let signed: Vec<&str> = selected.keys().map(String::as_str).collect();

        (lines.join("\n"), signed.join(";"))
    }

    /// The signable string for `request` under `app_key`.
    pub fn string_to_sign(&self, request: &SignedRequest, app_key: &str) -> String {
        let (headers, signed_headers) = self.canonical_headers(&request.headers);
        [
            canonical_path(&request.path),
            canonical_query(&request.query),
            headers,
            signed_headers,
            sha1_hex(&request.body),
            app_key.to_string(),
        ]
        .join("\n")
    }

    pub fn sign(&self, request: &SignedRequest, app_key: &str) -> Signature {
        let string_to_sign = self.string_to_sign(request, app_key);
        Signature {
            signature: sha1_hex(string_to_sign.as_bytes()),
            string_to_sign,
        }
    }

    /// Recompute the signature and compare it with the caller's.
    pub fn verify(&self, request: &SignedRequest, app_key: &str, provided: &str) -> Result<(), SignError> {
        let computed = self.sign(request, app_key);
        if constant_time_str_eq(&computed.signature, provided) {
            Ok(())
        } else {
            Err(SignError {
                string_to_sign: computed.string_to_sign,
            })
        }
    }

    /// Sign single-valued query parameters and headers.
    pub fn sign_simple(
        &self,
        path: &str,
        query: &HashMap<String, String>,
        headers: &HashMap<String, String>,
        body: &[u8],
        app_key: &str,
    ) -> Signature {
        let to_multi = |m: &HashMap<String, String>| -> MultiMap {
            m.iter().map(|(k, v)| (k.clone(), vec![v.clone()])).collect()
        };
        let request = SignedRequest {
            method: String::new(),
            path: path.to_string(),
            query: to_multi(query),
            headers: to_multi(headers),
            body: body.to_vec(),
        };
        self.sign(&request, app_key)
    }
}

// ============================================================================
// Application keys
// ============================================================================

/// Application ID to shared secret, fixed at startup.
#[derive(Clone, Default)]
pub struct AppKeyRegistry {
    keys: HashMap<String, String>,
}

impl std::fmt::Debug for AppKeyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppKeyRegistry")
            .field("app_ids", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AppKeyRegistry {
    pub fn new(keys: HashMap<String, String>) -> Self {
        Self { keys }
    }

    /// Secret for an application. Empty secrets count as unregistered.
    pub fn get(&self, app_id: &str) -> Option<&str> {
        self.keys
            .get(app_id)
            .map(String::as_str)
            .filter(|k| !k.is_empty())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
