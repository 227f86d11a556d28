use crate::config::CdnConfig;
use regex::Regex;
use url::Url;

/// Known CDN path prefixes and the image type each one indicates
const IMAGE_TYPE_PREFIXES: &[(&str, &str)] = &[
    ("/sitesv/", "site-upload"),
    ("/drive-viewer/", "drive"),
    ("/pw/", "photos"),
    ("/a/", "avatar"),
];

/// Decides which resource URLs are capturable images and rewrites them to
/// their full-resolution form
#[derive(Debug)]
pub struct CdnFilter {
    host: String,
    full_size_marker: String,
    path_regexes: Vec<Regex>,
}

impl CdnFilter {
    /// Create a new CDN filter from configuration
    pub fn new(config: &CdnConfig) -> Result<Self, regex::Error> {
        let mut path_regexes = Vec::with_capacity(config.path_patterns.len());
        for pattern in &config.path_patterns {
            path_regexes.push(Regex::new(pattern)?);
        }

        Ok(Self {
            host: config.host.to_ascii_lowercase(),
            full_size_marker: config.full_size_marker.clone(),
            path_regexes,
        })
    }

    /// Whether the URL is served by the target CDN under a recognized path
    pub fn matches(&self, url: &Url) -> bool {
        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }

        match url.host_str() {
            Some(host) if host.eq_ignore_ascii_case(&self.host) => {}
            _ => return false,
        }

        let path = url.path();
        self.path_regexes.iter().any(|regex| regex.is_match(path))
    }

    /// Parse and filter a raw URL string; `None` for anything not capturable
    pub fn accept(&self, raw: &str) -> Option<Url> {
        let url = Url::parse(raw.trim()).ok()?;
        if !self.matches(&url) {
            return None;
        }
        Some(self.normalize(&url))
    }

    /// Drop the size directive, query and fragment, and request the original size.
    ///
    /// `https://host/sitesv/ABC=w1280-h720?x=1` becomes `https://host/sitesv/ABC=s0`.
    pub fn normalize(&self, url: &Url) -> Url {
        let mut normalized = url.clone();
        normalized.set_query(None);
        normalized.set_fragment(None);

        let base = url.path().split('=').next().unwrap_or("");
        normalized.set_path(&format!("{}={}", base, self.full_size_marker));
        normalized
    }
}

/// Identifier of an image: the last path segment with any size directive removed
pub fn image_id(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(|last| last.split('=').next().unwrap_or(""))
        .unwrap_or("")
        .to_string()
}

/// Classify an image by its CDN path prefix, `unknown` when unrecognized
pub fn image_type(url: &Url) -> &'static str {
    let path = url.path();
    IMAGE_TYPE_PREFIXES
        .iter()
        .find(|(prefix, _)| path.starts_with(prefix))
        .map(|(_, kind)| *kind)
        .unwrap_or("unknown")
}

/// Selects the internal pages a crawl may navigate to
#[derive(Debug, Clone)]
pub struct LinkFilter {
    origin: url::Origin,
}

impl LinkFilter {
    /// Restrict links to the origin of `root_url`
    pub fn new(root_url: &Url) -> Self {
        Self {
            origin: root_url.origin(),
        }
    }

    /// Resolve an href against the page URL and keep it only if it is a
    /// same-origin page link without fragment or query
    pub fn accept(&self, page_url: &Url, href: &str) -> Option<Url> {
        let href = href.trim();
        if href.is_empty() || href.contains('#') || href.contains('?') {
            return None;
        }

        let resolved = page_url.join(href).ok()?;
        if !matches!(resolved.scheme(), "http" | "https") {
            return None;
        }
        if resolved.origin() != self.origin {
            return None;
        }
        if resolved.query().is_some() || resolved.fragment().is_some() {
            return None;
        }

        Some(resolved)
    }

    /// Filter hrefs in document order, dropping repeats
    pub fn page_links<'a, I>(&self, page_url: &Url, hrefs: I) -> Vec<Url>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut links: Vec<Url> = Vec::new();
        for href in hrefs {
            if let Some(link) = self.accept(page_url, href) {
                if !links.contains(&link) {
                    links.push(link);
                }
            }
        }
        links
    }
}
