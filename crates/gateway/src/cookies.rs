//! Session cookie helpers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::{HeaderMap, header};

pub const SESSION_COOKIE: &str = "session";

/// Mint a fresh browser token of the form `sess_{nanos}`.
///
/// The nanosecond value is forced strictly monotonic within this process
/// so two tokens minted in the same instant stay distinct.
pub fn mint_session_token() -> String {
    static LAST: AtomicU64 = AtomicU64::new(0);

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let mut minted = now;
    let _ = LAST.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        minted = now.max(last + 1);
        Some(minted)
    });
    format!("sess_{minted}")
}

/// Pull the session token out of the `Cookie` header, if present.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE && !value.is_empty()).then(|| value.to_string())
    })
}

/// `Set-Cookie` value for a freshly minted token.
pub fn session_cookie_value(token: &str) -> String {
    format!("{SESSION_COOKIE}={token}; HttpOnly; Path=/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn minted_tokens_are_distinct_and_well_formed() {
        let a = mint_session_token();
        let b = mint_session_token();
        assert!(a.starts_with("sess_"));
        assert!(b.starts_with("sess_"));
        assert_ne!(a, b);
    }

    #[test]
    fn token_parses_out_of_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session=sess_123; other=1"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("sess_123"));
    }

    #[test]
    fn missing_or_empty_cookie_yields_none() {
        let headers = HeaderMap::new();
        assert_eq!(session_token(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("session="));
        assert_eq!(session_token(&headers), None);
    }

    #[test]
    fn set_cookie_value_is_httponly_and_root_scoped() {
        assert_eq!(
            session_cookie_value("sess_9"),
            "session=sess_9; HttpOnly; Path=/"
        );
    }
}
