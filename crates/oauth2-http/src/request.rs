//! Per-request configuration

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;

use crate::error::{Error, Result};

/// Everything about a request except its method.
///
/// Headers given here replace the pipeline defaults for the same name.
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    pub url: String,
    /// Body model; `None` and JSON null both mean no body
    pub body: Option<serde_json::Value>,
    pub headers: HeaderMap,
    /// Do not validate or attach an access token
    pub skip_access_token: bool,
    /// Send the body as `application/x-www-form-urlencoded`
    pub form_urlencoded: bool,
    /// Decode non-2xx bodies into `ServerStatusError::error_body`
    pub decode_error_body: bool,
}

impl RequestConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Set the body from any serializable model.
    pub fn body<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        let value = serde_json::to_value(body)
            .map_err(|e| Error::serialization(format!("request body: {e}")))?;
        self.body = Some(value);
        Ok(self)
    }

    /// Add a header override; repeated names keep every value.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::Config(format!("invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::Config(format!("invalid value for header {name}: {e}")))?;
        self.headers.append(name, value);
        Ok(self)
    }

    pub fn skip_access_token(mut self) -> Self {
        self.skip_access_token = true;
        self
    }

    pub fn form_urlencoded(mut self) -> Self {
        self.form_urlencoded = true;
        self
    }

    pub fn decode_error_body(mut self) -> Self {
        self.decode_error_body = true;
        self
    }

    pub(crate) fn has_body(&self) -> bool {
        !matches!(self.body, None | Some(serde_json::Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_from_model() {
        #[derive(Serialize)]
        struct Item {
            name: &'static str,
            qty: u32,
        }

        let config = RequestConfig::new("https://api.example.com/items")
            .body(&Item { name: "x", qty: 2 })
            .unwrap();
        assert_eq!(config.body, Some(serde_json::json!({"name": "x", "qty": 2})));
        assert!(config.has_body());
    }

    #[test]
    fn null_body_counts_as_absent() {
        let config = RequestConfig::new("https://api.example.com")
            .body(&Option::<u32>::None)
            .unwrap();
        assert!(!config.has_body());
        assert!(!RequestConfig::new("https://api.example.com").has_body());
    }

    #[test]
    fn header_keeps_repeated_values() {
        let config = RequestConfig::new("https://api.example.com")
            .header("X-Tag", "a")
            .unwrap()
            .header("x-tag", "b")
            .unwrap();
        let values: Vec<_> = config.headers.get_all("x-tag").iter().collect();
        assert_eq!(values, vec!["a", "b"]);
    }

    #[test]
    fn invalid_header_is_config_error() {
        let err = RequestConfig::new("https://api.example.com")
            .header("bad header", "v")
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got: {err:?}");

        let err = RequestConfig::new("https://api.example.com")
            .header("x-ok", "line\nbreak")
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got: {err:?}");
    }

    #[test]
    fn flags() {
        let config = RequestConfig::new("https://api.example.com")
            .skip_access_token()
            .form_urlencoded()
            .decode_error_body();
        assert!(config.skip_access_token);
        assert!(config.form_urlencoded);
        assert!(config.decode_error_body);
    }
}
