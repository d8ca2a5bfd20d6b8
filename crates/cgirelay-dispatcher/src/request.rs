//! The incoming CGI request.

use cgirelay_common::form::decode_form;
use cgirelay_common::{Env, Result};
use std::io::Read;

/// CGI variables forwarded to workers, in this order. Unset ones are omitted.
pub const SERVER_ENV_VARS: [&str; 8] = [
    "REQUEST_METHOD",
    "REMOTE_HOST",
    "REMOTE_ADDR",
    "QUERY_STRING",
    "HTTP_COOKIE",
    "SCRIPT_NAME",
    "SERVER_NAME",
    "SERVER_PORT",
];

/// Server environment and raw form input of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CgiRequest {
    /// Allow-listed CGI variables
    pub server_env: Env,
    /// Urlencoded form payload (POST body or query string)
    pub form_input: String,
}

impl CgiRequest {
    /// Reads the request from the process environment and standard input.
    pub fn from_process() -> Result<Self> {
        Self::from_parts(|name| std::env::var(name).ok(), std::io::stdin().lock())
    }

    /// Builds a request from an environment lookup and a body reader.
    ///
    /// For `POST`, `CONTENT_LENGTH` bytes are read from `body`; otherwise the
    /// form comes from `QUERY_STRING`.
    pub fn from_parts<F, R>(lookup: F, body: R) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
        R: Read,
    {
        let server_env: Env = SERVER_ENV_VARS
            .iter()
            .filter_map(|name| lookup(name).map(|value| (name.to_string(), value)))
            .collect();

        let method = lookup("REQUEST_METHOD").unwrap_or_default();
        let form_input = if method.eq_ignore_ascii_case("POST") {
            let length: u64 = lookup("CONTENT_LENGTH")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0);
            let mut bytes = Vec::new();
            body.take(length).read_to_end(&mut bytes)?;
            if (bytes.len() as u64) < length {
                tracing::warn!("POST body shorter than CONTENT_LENGTH ({} < {})", bytes.len(), length);
            }
            String::from_utf8_lossy(&bytes).into_owned()
        } else {
            lookup("QUERY_STRING").unwrap_or_default()
        };

        Ok(Self {
            server_env,
            form_input,
        })
    }

    /// Value of a forwarded variable.
    pub fn var(&self, name: &str) -> Option<&str> {
        self.server_env
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn query_string(&self) -> &str {
        self.var("QUERY_STRING").unwrap_or("")
    }

    /// Decoded form fields.
    pub fn form_env(&self) -> Result<Env> {
        decode_form(&self.form_input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_server_env_allow_list() {
        let request = CgiRequest::from_parts(
            lookup(&[
                ("SERVER_PORT", "80"),
                ("REQUEST_METHOD", "GET"),
                ("PATH", "/usr/bin"),
                ("HTTP_COOKIE", "a=b"),
            ]),
            std::io::empty(),
        )
        .unwrap();

        assert_eq!(
            request.server_env,
            vec![
                ("REQUEST_METHOD".to_string(), "GET".to_string()),
                ("HTTP_COOKIE".to_string(), "a=b".to_string()),
                ("SERVER_PORT".to_string(), "80".to_string()),
            ]
        );
    }

    #[test]
    fn test_get_reads_query_string() {
        let request = CgiRequest::from_parts(
            lookup(&[("REQUEST_METHOD", "GET"), ("QUERY_STRING", "a=1&b=2")]),
            &b"ignored=1"[..],
        )
        .unwrap();
        assert_eq!(request.form_input, "a=1&b=2");
        assert_eq!(request.query_string(), "a=1&b=2");
    }

    #[test]
    fn test_post_reads_content_length_bytes() {
        let request = CgiRequest::from_parts(
            lookup(&[
                ("REQUEST_METHOD", "POST"),
                ("CONTENT_LENGTH", "7"),
                ("QUERY_STRING", "q=1"),
            ]),
            &b"name=Jo&trailing"[..],
        )
        .unwrap();
        assert_eq!(request.form_input, "name=Jo");
        assert_eq!(request.query_string(), "q=1");
    }

    #[test]
    fn test_post_without_length_is_empty() {
        let request =
            CgiRequest::from_parts(lookup(&[("REQUEST_METHOD", "POST")]), &b"a=1"[..]).unwrap();
        assert_eq!(request.form_input, "");
    }

    #[test]
    fn test_no_method_uses_query_string() {
        let request = CgiRequest::from_parts(lookup(&[("QUERY_STRING", "x=1")]), std::io::empty()).unwrap();
        assert_eq!(request.form_input, "x=1");
        assert_eq!(request.form_env().unwrap(), vec![("x".to_string(), "1".to_string())]);
    }
}
