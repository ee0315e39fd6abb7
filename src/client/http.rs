//! Library-backed HTTP client.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::{CONNECTION, CONTENT_TYPE, COOKIE, HeaderName, HeaderValue};
use url::Url;

use super::{Exchange, inspect};
use crate::config::Config;
use crate::context::RunContext;
use crate::error::{Error, RequestError, Result};
use crate::http::USER_AGENT;
use crate::stats::RequestId;

/// Build the reqwest client shared by every virtual user of a run.
///
/// # Errors
///
/// Returns a configuration error for an invalid proxy or CA bundle.
pub(crate) fn build_client(config: &Config) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::none());

    if let Some(proxy) = &config.proxy {
        let proxy = reqwest::Proxy::all(proxy.as_str())
            .map_err(|e| Error::InvalidOption(format!("proxy: {}", e)))?;
        builder = builder.proxy(proxy);
    }
    if config.tls.insecure {
        builder = builder.danger_accept_invalid_certs(true);
    }
    if let Some(path) = &config.tls.ca_file {
        let pem = std::fs::read(path).map_err(|e| Error::Tls(format!("{}: {}", path.display(), e)))?;
        let cert = reqwest::Certificate::from_pem(&pem)
            .map_err(|e| Error::Tls(format!("{}: {}", path.display(), e)))?;
        builder = builder.add_root_certificate(cert);
    }
    if !config.keep_alive {
        builder = builder.pool_max_idle_per_host(0);
    }

    builder
        .build()
        .map_err(|e| Error::InvalidOption(format!("http client: {}", e)))
}

/// Replace every occurrence of `token` in `data` with `value`.
pub(crate) fn substitute(data: &[u8], token: &str, value: &str) -> Bytes {
    let token = token.as_bytes();
    if token.is_empty() || data.len() < token.len() {
        return Bytes::copy_from_slice(data);
    }
    let mut out = Vec::with_capacity(data.len());
    let mut rest = data;
    while let Some(pos) = rest.windows(token.len()).position(|w| w == token) {
        out.extend_from_slice(&rest[..pos]);
        out.extend_from_slice(value.as_bytes());
        rest = &rest[pos + token.len()..];
    }
    out.extend_from_slice(rest);
    Bytes::from(out)
}

#[derive(Debug)]
pub(crate) struct HttpClient {
    pub(crate) ctx: Arc<RunContext>,
    client: reqwest::Client,
}

impl HttpClient {
    pub(crate) fn new(client: reqwest::Client, ctx: Arc<RunContext>) -> Self {
        Self { ctx, client }
    }

    fn build(&self, id: RequestId) -> std::result::Result<reqwest::RequestBuilder, RequestError> {
        let config = &self.ctx.config;
        if let Some(generator) = &config.request_generator {
            return Ok(generator.generate(&self.client, &self.ctx.plan.url, id));
        }

        let index = config
            .index_param
            .as_deref()
            .map(|token| (token, self.ctx.index_value()));

        let url = match &index {
            Some((token, value)) => {
                let url = substitute(config.url.as_bytes(), token, value);
                let url = String::from_utf8_lossy(&url);
                Url::parse(&url).map_err(|e| RequestError::Parse(format!("{}: {}", url, e)))?
            }
            None => self.ctx.plan.url.clone(),
        };

        let mut request = self.client.request(config.method.clone(), url);
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| RequestError::Parse(e.to_string()))?;
            let value =
                HeaderValue::from_str(value).map_err(|e| RequestError::Parse(e.to_string()))?;
            request = request.header(name, value);
        }
        if let Some(cookie) = config.cookie_header() {
            request = request.header(COOKIE, cookie);
        }
        if !config.keep_alive {
            request = request.header(CONNECTION, "close");
        }

        if let Some(body) = &config.body {
            let bytes = body.to_bytes(id).map_err(RequestError::from)?;
            let bytes = match &index {
                Some((token, value)) => substitute(&bytes, token, value),
                None => bytes,
            };
            if let Some(content_type) = config.effective_content_type() {
                request = request.header(CONTENT_TYPE, content_type);
            }
            request = request.body(bytes);
        }

        Ok(request)
    }

    pub(crate) async fn exchange(&mut self, id: RequestId) -> Exchange {
        let request = match self.build(id) {
            Ok(request) => request,
            Err(error) => return Exchange::failed(error),
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Exchange::failed(Error::from(e)),
        };
        let status = response.status().as_u16();

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return Exchange::failed(Error::from(e)),
        };

        let mut exchange = Exchange::response(status);
        inspect(&self.ctx, &mut exchange, &body);
        exchange
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute() {
        assert_eq!(substitute(b"/item/IDX?x=IDX", "IDX", "42"), Bytes::from_static(b"/item/42?x=42"));
        assert_eq!(substitute(b"no token", "IDX", "1"), Bytes::from_static(b"no token"));
        assert_eq!(substitute(b"ID", "IDX", "1"), Bytes::from_static(b"ID"));
    }

    #[test]
    fn test_build_client_rejects_bad_proxy() {
        let config = Config::new("http://localhost/").with_proxy("::not a proxy::");
        assert!(matches!(build_client(&config), Err(Error::InvalidOption(_))));
    }

    #[test]
    fn test_build_client_missing_ca_file() {
        let config = Config::new("https://localhost/").with_tls(crate::config::TlsOptions {
            insecure: false,
            ca_file: Some("/nonexistent/ca.pem".into()),
        });
        assert!(matches!(build_client(&config), Err(Error::Tls(_))));
    }
}
