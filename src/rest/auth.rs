//! Shared Key request signing for the Batch service
//!
//! The signature is an HMAC-SHA256, keyed with the base64-decoded account
//! key, over the method, a fixed list of standard headers, every `ocp-*`
//! header and the canonicalized resource (account, path, sorted query).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Request;
use sha2::Sha256;

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const OCP_DATE: &str = "ocp-date";

/// Standard headers that take part in the signature, in signing order
const SIGNED_HEADERS: [&str; 11] = [
    "content-encoding",
    "content-language",
    "content-length",
    "content-md5",
    "content-type",
    "date",
    "if-modified-since",
    "if-match",
    "if-none-match",
    "if-unmodified-since",
    "range",
];

#[derive(Clone)]
pub struct SharedKeyCredentials {
    account_name: String,
    key: Vec<u8>,
}

impl SharedKeyCredentials {
    pub fn new(account_name: impl Into<String>, base64_key: &str) -> Result<Self> {
        let key = STANDARD
            .decode(base64_key.trim())
            .map_err(|e| Error::Config(format!("batch_account_key is not valid base64: {}", e)))?;
        Ok(Self {
            account_name: account_name.into(),
            key,
        })
    }

    /// Stamp `request` with `ocp-date` and a Shared Key `Authorization` header
    pub fn authorize(&self, request: &mut Request, now: DateTime<Utc>) -> Result<()> {
        let date = now.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        request.headers_mut().insert(OCP_DATE, header_value(&date)?);

        let signature = self.sign(&self.string_to_sign(request))?;
        let authorization = format!("SharedKey {}:{}", self.account_name, signature);
        request.headers_mut().insert(AUTHORIZATION, header_value(&authorization)?);
        Ok(())
    }

    fn sign(&self, string_to_sign: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| Error::Config(format!("unusable batch_account_key: {}", e)))?;
        mac.update(string_to_sign.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    fn string_to_sign(&self, request: &Request) -> String {
        let headers = request.headers();
        let mut out = String::new();
        out.push_str(request.method().as_str());
        out.push('\n');

        let content_length = request
            .body()
            .and_then(|body| body.as_bytes())
            .map(|bytes| bytes.len())
            .unwrap_or(0);

        for name in SIGNED_HEADERS {
            if name == "content-length" {
                if content_length > 0 {
                    out.push_str(&content_length.to_string());
                }
            } else {
                out.push_str(header_str(headers, name));
            }
            out.push('\n');
        }

        out.push_str(&canonicalized_headers(headers));
        out.push_str(&self.canonicalized_resource(request));
        out
    }

    fn canonicalized_resource(&self, request: &Request) -> String {
        let url = request.url();
        let mut resource = format!("/{}{}", self.account_name, url.path());

        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.into_owned()))
            .collect();
        params.sort();

        let mut merged: Vec<(String, Vec<String>)> = Vec::new();
        for (name, value) in params {
            match merged.last_mut() {
                Some((last, values)) if *last == name => values.push(value),
                _ => merged.push((name, vec![value])),
            }
        }
        for (name, values) in merged {
            resource.push('\n');
            resource.push_str(&name);
            resource.push(':');
            resource.push_str(&values.join(","));
        }
        resource
    }
}

impl std::fmt::Debug for SharedKeyCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKeyCredentials")
            .field("account_name", &self.account_name)
            .finish_non_exhaustive()
    }
}

fn canonicalized_headers(headers: &HeaderMap) -> String {
    let mut ocp: Vec<(&str, &str)> = headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with("ocp-"))
        .map(|(name, value)| (name.as_str(), value.to_str().unwrap_or("").trim()))
        .collect();
    ocp.sort();

    ocp.into_iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| Error::Config(format!("invalid header value: {}", e)))
}
