use url::Url;

use super::error::ScrapeError;

/// Search scope for one run: `site:<tld> -site:<excluded>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    tld: String,
    excluded_suffix: String,
}

impl SearchQuery {
    pub fn new(tld: &str, excluded_suffix: &str) -> Result<Self, ScrapeError> {
        Ok(Self {
            tld: normalize_tld(tld)?,
            excluded_suffix: excluded_suffix.trim().to_lowercase(),
        })
    }

    pub fn tld(&self) -> &str {
        &self.tld
    }

    pub fn text(&self) -> String {
        if self.excluded_suffix.is_empty() {
            format!("site:{}", self.tld)
        } else {
            format!("site:{} -site:{}", self.tld, self.excluded_suffix)
        }
    }

    /// Builds the results URL by appending the encoded query to `base`.
    pub fn search_url(&self, base: &str) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(base)?;
        url.query_pairs_mut().append_pair("q", &self.text());
        Ok(url)
    }
}

/// Lowercases `tld` and makes sure it starts with a dot.
pub fn normalize_tld(tld: &str) -> Result<String, ScrapeError> {
    let trimmed = tld.trim().trim_start_matches('.');
    if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
        return Err(ScrapeError::InvalidTld(tld.to_string()));
    }
    Ok(format!(".{}", trimmed.to_lowercase()))
}

/// Decides which result links are kept.
#[derive(Debug, Clone)]
pub struct LinkFilter {
    tld: String,
    excluded_suffix: String,
    blocked_host: String,
}

impl LinkFilter {
    pub fn new(query: &SearchQuery, blocked_host: &str) -> Self {
        Self {
            tld: query.tld.clone(),
            excluded_suffix: query.excluded_suffix.clone(),
            blocked_host: blocked_host.trim().to_lowercase(),
        }
    }

    /// Returns the base domain of `href` when the link passes every rule.
    pub fn accept(&self, href: &str) -> Option<String> {
        let lowered = href.to_lowercase();
        if !lowered.contains(&self.tld) {
            return None;
        }
        if !self.excluded_suffix.is_empty() && lowered.contains(&self.excluded_suffix) {
            return None;
        }

        let url = Url::parse(href).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        let host = url.host_str()?.to_lowercase();
        if !self.blocked_host.is_empty()
            && (host == self.blocked_host || host.ends_with(&format!(".{}", self.blocked_host)))
        {
            return None;
        }

        base_domain(href)
    }
}

/// Scheme and host (plus a non-default port) of `href`, lowercased.
pub fn base_domain(href: &str) -> Option<String> {
    let url = Url::parse(href).ok()?;
    let host = url.host_str()?;
    let mut base = format!("{}://{}", url.scheme(), host.to_lowercase());
    if let Some(port) = url.port() {
        base.push_str(&format!(":{}", port));
    }
    Some(base)
}
