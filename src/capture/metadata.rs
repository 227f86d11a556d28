use crate::filter::{image_id, image_type};
use crate::records::{ImageElement, ImageMetadata, PageInfo, cap_len};
use url::Url;

/// Page path used when a page has nothing after the site name
pub const DEFAULT_PAGE_PATH: &str = "home";

/// Builds provenance metadata for a captured image
#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    site_root_marker: String,
    max_field_len: usize,
}

impl MetadataExtractor {
    pub fn new(site_root_marker: &str, max_field_len: usize) -> Self {
        Self {
            site_root_marker: site_root_marker.to_string(),
            max_field_len,
        }
    }

    /// Split a page URL into site name and page path.
    ///
    /// `/view/<site>/<a>/<b>` gives `(<site>, "<a>/<b>")`. Without the marker
    /// the host is the site name and the whole path is the page path.
    pub fn site_and_page(&self, page_url: &Url) -> (String, String) {
        let segments: Vec<&str> = page_url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        let host = page_url.host_str().unwrap_or("site").to_string();

        let (site, rest) = match segments.iter().position(|s| *s == self.site_root_marker) {
            Some(i) => match segments.get(i + 1) {
                Some(site) => (site.to_string(), &segments[i + 2..]),
                None => (host, &segments[segments.len()..]),
            },
            None => (host, &segments[..]),
        };

        let page = if rest.is_empty() {
            DEFAULT_PAGE_PATH.to_string()
        } else {
            rest.join("/")
        };

        (site, page)
    }

    /// Metadata for `image_url` captured on `page`, with element context when
    /// the image came from a DOM sweep
    pub fn extract(
        &self,
        page: &PageInfo,
        image_url: &Url,
        element: Option<&ImageElement>,
    ) -> ImageMetadata {
        let max = self.max_field_len;
        let (site_name, page_path) = match Url::parse(&page.url) {
            Ok(url) => self.site_and_page(&url),
            Err(_) => ("site".to_string(), DEFAULT_PAGE_PATH.to_string()),
        };
        let capped = |value: Option<&str>| -> Option<String> {
            value
                .map(|v| cap_len(v, max))
                .filter(|v| !v.is_empty())
        };

        ImageMetadata {
            site_name: cap_len(&site_name, max),
            page_path: cap_len(&page_path, max),
            page_url: cap_len(&page.url, max),
            page_title: cap_len(&page.title, max),
            image_id: cap_len(&image_id(image_url), max),
            image_type: image_type(image_url).to_string(),
            alt_text: capped(element.and_then(ImageElement::label)),
            caption: capped(element.and_then(|e| e.caption.as_deref())),
            section: capped(element.and_then(|e| e.section.as_deref())),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> MetadataExtractor {
        MetadataExtractor::new("view", 100)
    }

    fn split(url: &str) -> (String, String) {
        extractor().site_and_page(&Url::parse(url).unwrap())
    }

    #[test]
    fn test_site_and_page_from_marker() {
        assert_eq!(
            split("https://sites.google.com/view/garden/projects/beds"),
            ("garden".to_string(), "projects/beds".to_string())
        );
        assert_eq!(
            split("https://sites.google.com/view/garden/"),
            ("garden".to_string(), "home".to_string())
        );
    }

    #[test]
    fn test_site_and_page_without_marker() {
        assert_eq!(
            split("https://example.com/about/team"),
            ("example.com".to_string(), "about/team".to_string())
        );
        assert_eq!(
            split("https://example.com/"),
            ("example.com".to_string(), "home".to_string())
        );
        assert_eq!(
            split("https://example.com/view"),
            ("example.com".to_string(), "home".to_string())
        );
    }

    #[test]
    fn test_extract_caps_untrusted_fields() {
        let page = PageInfo::new("https://sites.google.com/view/garden/beds", "x".repeat(300));
        let image = Url::parse("https://lh3.googleusercontent.com/sitesv/ID42=s0").unwrap();
        let element = ImageElement {
            src: image.to_string(),
            alt: Some("a".repeat(250)),
            caption: Some("   ".into()),
            section: Some("Raised beds".into()),
            ..ImageElement::default()
        };

        let metadata = extractor().extract(&page, &image, Some(&element));
        assert_eq!(metadata.site_name, "garden");
        assert_eq!(metadata.page_path, "beds");
        assert_eq!(metadata.page_title.chars().count(), 100);
        assert_eq!(metadata.alt_text.as_ref().map(|a| a.len()), Some(100));
        assert_eq!(metadata.caption, None);
        assert_eq!(metadata.section.as_deref(), Some("Raised beds"));
        assert_eq!(metadata.image_id, "ID42");
        assert_eq!(metadata.image_type, "site-upload");
        assert!(!metadata.timestamp.is_empty());
    }

    #[test]
    fn test_extract_without_element() {
        let page = PageInfo::new("https://sites.google.com/view/garden", "Garden");
        let image = Url::parse("https://lh3.googleusercontent.com/other/ID7=s0").unwrap();

        let metadata = extractor().extract(&page, &image, None);
        assert_eq!(metadata.page_path, "home");
        assert_eq!(metadata.image_type, "unknown");
        assert_eq!(metadata.alt_text, None);
    }
}
