use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum SameSite {
    Lax,
    Strict,
    None,
    /// Attribute left out, the browser decides.
    Default,
}

impl SameSite {
    pub fn parse(value: &str) -> Self {
        match value {
            "Lax" => SameSite::Lax,
            "Strict" => SameSite::Strict,
            "None" => SameSite::None,
            _ => SameSite::Default,
        }
    }

    fn attribute(self) -> Option<&'static str> {
        match self {
            SameSite::Lax => Some("Lax"),
            SameSite::Strict => Some("Strict"),
            SameSite::None => Some("None"),
            SameSite::Default => None,
        }
    }
}

impl From<String> for SameSite {
    fn from(value: String) -> Self {
        SameSite::parse(&value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CookieConfig {
    pub name: String,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    /// Seconds; 0 issues a browser-session cookie.
    pub max_age: u64,
}

impl Default for CookieConfig {
    fn default() -> Self {
        CookieConfig {
            name: "auth_session".to_string(),
            http_only: true,
            secure: true,
            same_site: SameSite::Strict,
            max_age: 0,
        }
    }
}

/// `Set-Cookie` value carrying the session digest.
pub fn session_cookie(config: &CookieConfig, value: &str) -> String {
    let max_age = (config.max_age > 0).then_some(config.max_age);
    render(config, value, max_age)
}

/// `Set-Cookie` value that removes the session cookie.
pub fn clear_cookie(config: &CookieConfig) -> String {
    render(config, "", Some(0))
}

/// Value of the cookie called `name` in the request's `Cookie` headers.
pub fn find_cookie<'a>(
    headers: &'a axum::http::HeaderMap,
    name: &str,
) -> Option<&'a str> {
    headers
        .get_all(axum::http::header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then_some(value)
        })
}

fn render(config: &CookieConfig, value: &str, max_age: Option<u64>) -> String {
    let mut cookie = format!("{}={}; Path=/", config.name, value);
    if let Some(max_age) = max_age {
        cookie.push_str(&format!("; Max-Age={}", max_age));
    }
    if config.http_only {
        cookie.push_str("; HttpOnly");
    }
    if config.secure {
        cookie.push_str("; Secure");
    }
    if let Some(same_site) = config.same_site.attribute() {
        cookie.push_str("; SameSite=");
        cookie.push_str(same_site);
    }
    cookie
}
