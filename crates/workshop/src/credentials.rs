use std::fmt;

pub const SESSION_ID_COOKIE: &str = "sessionid";
pub const LOGIN_SECURE_COOKIE: &str = "steamLoginSecure";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing Steam cookie '{0}'; log in to steamcommunity.com and export it")]
    MissingCookie(&'static str),
    #[error("Steam rejected the session ({0}); the login cookies are missing or expired")]
    Rejected(String),
}

/// Browser session cookies for steamcommunity.com. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    session_id: String,
    login_secure: String,
}

impl SessionCredentials {
    pub fn new(
        session_id: impl Into<String>,
        login_secure: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let session_id = session_id.into().trim().to_string();
        let login_secure = login_secure.into().trim().to_string();
        if session_id.is_empty() {
            return Err(AuthError::MissingCookie(SESSION_ID_COOKIE));
        }
        if login_secure.is_empty() {
            return Err(AuthError::MissingCookie(LOGIN_SECURE_COOKIE));
        }
        Ok(Self {
            session_id,
            login_secure,
        })
    }

    /// Accepts a `Cookie:` header value as copied from browser dev tools.
    /// Unrelated cookies are ignored.
    pub fn from_cookie_header(header: &str) -> Result<Self, AuthError> {
        let mut session_id = None;
        let mut login_secure = None;
        for pair in header.split(';') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            match name.trim() {
                SESSION_ID_COOKIE => session_id = Some(value.trim()),
                LOGIN_SECURE_COOKIE => login_secure = Some(value.trim()),
                _ => {}
            }
        }
        Self::new(
            session_id.ok_or(AuthError::MissingCookie(SESSION_ID_COOKIE))?,
            login_secure.ok_or(AuthError::MissingCookie(LOGIN_SECURE_COOKIE))?,
        )
    }

    pub fn cookie_header(&self) -> String {
        format!(
            "{SESSION_ID_COOKIE}={}; {LOGIN_SECURE_COOKIE}={}",
            self.session_id, self.login_secure
        )
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("session_id", &"<redacted>")
            .field("login_secure", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_cookies() {
        assert!(matches!(
            SessionCredentials::new("  ", "secure"),
            Err(AuthError::MissingCookie(SESSION_ID_COOKIE))
        ));
        assert!(matches!(
            SessionCredentials::new("abc", ""),
            Err(AuthError::MissingCookie(LOGIN_SECURE_COOKIE))
        ));
    }

    #[test]
    fn parses_browser_cookie_header() {
        let creds = SessionCredentials::from_cookie_header(
            "timezoneOffset=3600,0; sessionid=abc123; steamLoginSecure=7656%7C%7Ctoken",
        )
        .unwrap();
        assert_eq!(
            creds.cookie_header(),
            "sessionid=abc123; steamLoginSecure=7656%7C%7Ctoken"
        );
    }

    #[test]
    fn header_without_login_cookie_is_rejected() {
        let err = SessionCredentials::from_cookie_header("sessionid=abc").unwrap_err();
        assert!(matches!(err, AuthError::MissingCookie(LOGIN_SECURE_COOKIE)));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let creds = SessionCredentials::new("abc123", "token").unwrap();
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("abc123"));
        assert!(!rendered.contains("token"));
    }
}
