/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::config::FetchConfig;
use crate::error::{ReaderError, Result};
use crate::http_retry::send_with_retry;
use apreader_protocol::{ObjectRef, ACCEPT_HEADER, MEDIA_ACTIVITY_JSON, MEDIA_LD_JSON};
use regex::Regex;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LINK};
use reqwest::{Response, Url};
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::debug;

const MAX_ERROR_BODY: usize = 512;

/// Resolves references to JSON documents. Holds no state besides the HTTP client.
#[derive(Clone)]
pub struct Fetcher {
    http: reqwest::Client,
    cfg: Arc<FetchConfig>,
}

impl Fetcher {
    pub fn new(cfg: FetchConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .user_agent(format!("apreader/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ReaderError::Config(format!("build http client: {e}")))?;
        Ok(Self::with_client(http, cfg))
    }

    pub fn with_client(http: reqwest::Client, cfg: FetchConfig) -> Self {
        Self {
            http,
            cfg: Arc::new(cfg),
        }
    }

    pub fn is_p2p(&self, url: &str) -> bool {
        self.cfg.gateways.iter().any(|g| url.starts_with(&g.prefix))
    }

    /// Gateway form of a peer-to-peer address, `None` for ordinary addresses.
    pub fn gateway_url(&self, url: &str) -> Option<String> {
        self.cfg
            .gateways
            .iter()
            .find(|g| url.starts_with(&g.prefix))
            .map(|g| format!("{}{}", g.gateway, &url[g.prefix.len()..]))
    }

    /// URL usable by plain HTTP consumers (media elements): gateway form for p2p addresses.
    pub fn resolve_p2p_url(&self, url: &str) -> String {
        self.gateway_url(url).unwrap_or_else(|| url.to_string())
    }

    fn proxied_url(&self, url: &str) -> Option<String> {
        self.cfg
            .cors_proxy
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(|p| format!("{p}{}", urlencoding::encode(url)))
    }

    /// Returns inline documents unchanged and fetches references.
    pub async fn resolve(&self, reference: &ObjectRef) -> Result<Value> {
        match reference {
            ObjectRef::Inline(v) => Ok(v.clone()),
            ObjectRef::Id(url) => self.fetch(url).await,
        }
    }

    /// Fetches `url` as JSON, following HTML `rel="alternate"` discovery links.
    pub async fn fetch(&self, url: &str) -> Result<Value> {
        let mut url = url.trim().to_string();
        let mut hops = 0u32;
        loop {
            let resp = self.send(&url).await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(ReaderError::Fetch {
                    url,
                    status: status.as_u16(),
                    body: truncate(body, MAX_ERROR_BODY),
                });
            }

            if !is_html(&resp) {
                let bytes = resp.bytes().await.map_err(|e| ReaderError::Transport {
                    url: url.clone(),
                    source: e,
                })?;
                return serde_json::from_slice(&bytes)
                    .map_err(|e| ReaderError::invalid(&url, format!("not JSON: {e}")));
            }

            let link = discovery_link(&url, resp).await;
            let Some(next) = link else {
                return Err(ReaderError::NoDiscoveryLink { url });
            };
            hops += 1;
            if hops > self.cfg.max_discovery_hops {
                return Err(ReaderError::invalid(&url, "too many discovery hops"));
            }
            debug!("following JSON-LD alternate link {next} from {url}");
            url = next;
        }
    }

    /// Direct fetch, then gateway (p2p addresses) or CORS proxy (others) on transport failure.
    async fn send(&self, url: &str) -> Result<Response> {
        let attempts = self.cfg.retry_attempts;
        let direct = send_with_retry(|| self.http.get(url).header(ACCEPT, ACCEPT_HEADER), attempts).await;
        let err = match direct {
            Ok(resp) => return Ok(resp),
            Err(e) => e,
        };

        let fallback = if self.is_p2p(url) {
            self.gateway_url(url)
        } else {
            self.proxied_url(url)
        };
        let Some(fallback) = fallback else {
            return Err(ReaderError::Transport {
                url: url.to_string(),
                source: err,
            });
        };
        debug!("direct fetch of {url} failed ({err}); retrying via {fallback}");
        send_with_retry(|| self.http.get(&fallback).header(ACCEPT, ACCEPT_HEADER), attempts)
            .await
            .map_err(|e| ReaderError::Transport {
                url: url.to_string(),
                source: e,
            })
    }
}

fn is_html(resp: &Response) -> bool {
    resp.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("text/html"))
        .unwrap_or(false)
}

/// Relative links resolve against `requested`, not against a gateway or proxy that served them.
async fn discovery_link(requested: &str, resp: Response) -> Option<String> {
    let base = Url::parse(requested).unwrap_or_else(|_| resp.url().clone());
    let from_header = resp
        .headers()
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(alternate_from_link_header);
    if let Some(href) = from_header {
        return absolutize(&base, &href);
    }
    let body = resp.text().await.ok()?;
    alternate_from_html(&body).and_then(|href| absolutize(&base, &href))
}

fn absolutize(base: &Url, href: &str) -> Option<String> {
    base.join(href.trim()).ok().map(|u| u.to_string())
}

fn is_json_ld_type(ty: &str) -> bool {
    ty.contains(MEDIA_LD_JSON) || ty.contains(MEDIA_ACTIVITY_JSON)
}

/// `<https://a.example/x.jsonld>; rel="alternate"; type="application/ld+json"` entries.
pub(crate) fn alternate_from_link_header(header: &str) -> Option<String> {
    static ENTRY: OnceLock<Regex> = OnceLock::new();
    let entry = ENTRY.get_or_init(|| Regex::new(r"<([^>]+)>([^,<]*)").expect("static regex"));
    for caps in entry.captures_iter(header) {
        let params = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        let attrs = parse_attrs(params);
        let rel_ok = attr(&attrs, "rel")
            .map(|r| r.split_whitespace().any(|t| t.eq_ignore_ascii_case("alternate")))
            .unwrap_or(false);
        let type_ok = attr(&attrs, "type").map(is_json_ld_type).unwrap_or(false);
        if rel_ok && type_ok {
            return caps.get(1).map(|m| m.as_str().to_string());
        }
    }
    None
}

/// First `<link rel="alternate">` whose type is JSON-LD or ActivityStreams.
pub(crate) fn alternate_from_html(html: &str) -> Option<String> {
    static LINK_TAG: OnceLock<Regex> = OnceLock::new();
    let link_tag = LINK_TAG.get_or_init(|| Regex::new(r"(?is)<link\b([^>]*)>").expect("static regex"));
    for caps in link_tag.captures_iter(html) {
        let attrs = parse_attrs(caps.get(1).map(|m| m.as_str()).unwrap_or_default());
        let is_alternate = attr(&attrs, "rel")
            .map(|r| r.split_whitespace().any(|t| t.eq_ignore_ascii_case("alternate")))
            .unwrap_or(false);
        if !is_alternate {
            continue;
        }
        let Some(ty) = attr(&attrs, "type") else {
            continue;
        };
        if !is_json_ld_type(ty) {
            continue;
        }
        if let Some(href) = attr(&attrs, "href").filter(|h| !h.trim().is_empty()) {
            return Some(href.to_string());
        }
    }
    None
}

fn parse_attrs(s: &str) -> Vec<(String, String)> {
    static ATTR: OnceLock<Regex> = OnceLock::new();
    let re = ATTR.get_or_init(|| {
        Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>;]+))"#)
            .expect("static regex")
    });
    re.captures_iter(s)
        .map(|c| {
            let name = c[1].to_ascii_lowercase();
            let value = c
                .get(2)
                .or_else(|| c.get(3))
                .or_else(|| c.get(4))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            (name, value)
        })
        .collect()
}

fn attr<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}
