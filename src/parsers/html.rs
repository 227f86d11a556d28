use crate::records::ImageElement;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use url::Url;

static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid link selector"));
static IMAGE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img").expect("valid image selector"));
static CAPTION_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"figcaption, [class*="caption"]"#).expect("valid caption selector")
});
static HEADING_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3, h4, h5, h6").expect("valid heading selector"));

/// How many ancestors are checked for a caption child
const CAPTION_DEPTH: usize = 4;

/// Extracts anchor hrefs in document order
pub fn parse_links(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);

    let links = doc
        .select(&LINK_SELECTOR)
        .filter_map(|e| e.value().attr("href"))
        .map(|s| s.to_string())
        .collect::<Vec<String>>();

    ::log::debug!("HTML parser found {} links", links.len());
    links
}

/// Extracts every image element with its descriptive context.
///
/// `src` is resolved against `base_url`; `data-src` is used when `src` is
/// missing (lazy placeholders).
pub fn parse_images(html: &str, base_url: &Url) -> Vec<ImageElement> {
    let doc = Html::parse_document(html);

    let images = doc
        .select(&IMAGE_SELECTOR)
        .filter_map(|img| {
            let raw = img
                .value()
                .attr("src")
                .filter(|s| !s.trim().is_empty())
                .or_else(|| img.value().attr("data-src"))?;
            let src = base_url.join(raw.trim()).ok()?;

            Some(ImageElement {
                src: src.to_string(),
                alt: non_empty_attr(img, "alt"),
                title: non_empty_attr(img, "title"),
                aria_label: non_empty_attr(img, "aria-label"),
                caption: nearest_caption(img),
                section: nearest_section(img),
            })
        })
        .collect::<Vec<_>>();

    ::log::debug!("HTML parser found {} images", images.len());
    images
}

fn non_empty_attr(element: ElementRef<'_>, name: &str) -> Option<String> {
    element
        .value()
        .attr(name)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn element_text(element: ElementRef<'_>) -> Option<String> {
    let text = element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    (!text.is_empty()).then_some(text)
}

fn nearest_caption(img: ElementRef<'_>) -> Option<String> {
    img.ancestors()
        .filter_map(ElementRef::wrap)
        .take(CAPTION_DEPTH)
        .find_map(|ancestor| {
            ancestor
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|child| CAPTION_SELECTOR.matches(child))
                .find_map(element_text)
        })
}

fn nearest_section(img: ElementRef<'_>) -> Option<String> {
    img.ancestors()
        .filter_map(ElementRef::wrap)
        .find_map(|ancestor| {
            ancestor
                .select(&HEADING_SELECTOR)
                .find_map(element_text)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <nav><a href="/view/demo/about">About</a><a href="/view/demo/team">Team</a></nav>
          <section>
            <h2>  Our   garden </h2>
            <div>
              <figure>
                <img src="https://lh3.googleusercontent.com/sitesv/AAA=w400" alt="Tomatoes">
                <figcaption>First harvest</figcaption>
              </figure>
            </div>
            <img data-src="/local/lazy.png" title="Lazy one">
            <img src="">
          </section>
        </body></html>
    "#;

    #[test]
    fn test_parse_links_in_document_order() {
        let links = parse_links(PAGE);
        assert_eq!(links, vec!["/view/demo/about", "/view/demo/team"]);
    }

    #[test]
    fn test_parse_images_with_context() {
        let base = Url::parse("https://sites.google.com/view/demo").unwrap();
        let images = parse_images(PAGE, &base);
        assert_eq!(images.len(), 2);

        let first = &images[0];
        assert_eq!(first.src, "https://lh3.googleusercontent.com/sitesv/AAA=w400");
        assert_eq!(first.alt.as_deref(), Some("Tomatoes"));
        assert_eq!(first.caption.as_deref(), Some("First harvest"));
        assert_eq!(first.section.as_deref(), Some("Our garden"));

        let second = &images[1];
        assert_eq!(second.src, "https://sites.google.com/local/lazy.png");
        assert_eq!(second.title.as_deref(), Some("Lazy one"));
        assert_eq!(second.alt, None);
        assert_eq!(second.caption, None);
        assert_eq!(second.section.as_deref(), Some("Our garden"));
    }

    #[test]
    fn test_page_without_images() {
        let base = Url::parse("https://example.com/").unwrap();
        assert!(parse_images("<html><body><p>hi</p></body></html>", &base).is_empty());
    }
}
