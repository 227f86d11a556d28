use crate::records::ImageMetadata;
use std::collections::HashSet;

/// Longest site or page folder name
pub const FOLDER_MAX_LEN: usize = 50;

/// Longest descriptive part of a file name
pub const LABEL_MAX_LEN: usize = 40;

/// How many trailing characters of the image id are kept
const ID_SUFFIX_LEN: usize = 10;

/// Convert arbitrary text into a filesystem-safe token: lowercase ASCII
/// alphanumerics, any other run collapsed into one `-`, no leading or
/// trailing separator, at most `max_len` bytes.
pub fn sanitize_token(raw: &str, max_len: usize) -> String {
    let mut token = String::with_capacity(raw.len().min(max_len));
    let mut separator = false;

    for c in raw.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if separator && !token.is_empty() {
                token.push('-');
            }
            separator = false;
            token.push(c);
        } else {
            separator = true;
        }

        if token.len() >= max_len {
            break;
        }
    }

    token.truncate(max_len);
    token.trim_end_matches('-').to_string()
}

/// Folder name for a site or page, `fallback` when nothing usable remains
pub fn folder_name(raw: &str, fallback: &str) -> String {
    let token = sanitize_token(raw, FOLDER_MAX_LEN);
    if token.is_empty() {
        fallback.to_string()
    } else {
        token
    }
}

/// Trailing alphanumerics of the image id; ids are case-sensitive so case is kept
fn short_id(image_id: &str) -> String {
    let chars: Vec<char> = image_id.chars().filter(char::is_ascii_alphanumeric).collect();
    let start = chars.len().saturating_sub(ID_SUFFIX_LEN);
    chars[start..].iter().collect()
}

/// File stem for a record: the first usable of alt text, caption, section,
/// else `image-NNN` from its position in the folder, followed by the short
/// image id and the image type when it is known.
pub fn file_stem(metadata: &ImageMetadata, position: usize) -> String {
    let label = [&metadata.alt_text, &metadata.caption, &metadata.section]
        .into_iter()
        .flatten()
        .map(|text| sanitize_token(text, LABEL_MAX_LEN))
        .find(|token| !token.is_empty())
        .unwrap_or_else(|| format!("image-{:03}", position));

    let mut parts = vec![label];

    let id = short_id(&metadata.image_id);
    if !id.is_empty() {
        parts.push(id);
    }

    let kind = sanitize_token(&metadata.image_type, 20);
    if !kind.is_empty() && kind != "unknown" {
        parts.push(kind);
    }

    parts.join("-")
}

/// Hands out file names within one folder, numbering repeats
#[derive(Debug, Default)]
pub struct FolderNames {
    used: HashSet<String>,
}

impl FolderNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// `stem.ext`, or `stem(N).ext` with the lowest free `N`
    pub fn claim(&mut self, stem: &str, ext: &str) -> String {
        let mut name = format!("{}.{}", stem, ext);
        let mut counter = 1u32;
        while self.used.contains(&name) {
            name = format!("{}({}).{}", stem, counter, ext);
            counter += 1;
        }
        self.used.insert(name.clone());
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> ImageMetadata {
        ImageMetadata {
            image_id: "AF1QipNx-Zq_9dK3LmPq".to_string(),
            image_type: "site-upload".to_string(),
            ..ImageMetadata::default()
        }
    }

    #[test]
    fn test_sanitize_token() {
        assert_eq!(sanitize_token("  Our Garden: 2024!  ", 50), "our-garden-2024");
        assert_eq!(sanitize_token("Café & Bar", 50), "caf-bar");
        assert_eq!(sanitize_token("---", 50), "");
        assert_eq!(sanitize_token("abc def ghi", 5), "abc-d");
        assert_eq!(sanitize_token("abcd efgh", 5), "abcd");
    }

    #[test]
    fn test_folder_name_fallback() {
        assert_eq!(folder_name("Summer Camp", "site"), "summer-camp");
        assert_eq!(folder_name("???", "home"), "home");
    }

    #[test]
    fn test_file_stem_prefers_alt_then_caption_then_section() {
        let mut meta = metadata();
        meta.section = Some("Vegetable Beds".to_string());
        assert_eq!(file_stem(&meta, 1), "vegetable-beds-Zq9dK3LmPq-site-upload");

        meta.caption = Some("Spring planting".to_string());
        assert!(file_stem(&meta, 1).starts_with("spring-planting-"));

        meta.alt_text = Some("Tomato seedlings".to_string());
        assert!(file_stem(&meta, 1).starts_with("tomato-seedlings-"));
    }

    #[test]
    fn test_file_stem_positional_fallback() {
        let meta = ImageMetadata {
            image_id: "XYZ".to_string(),
            image_type: "unknown".to_string(),
            ..ImageMetadata::default()
        };
        assert_eq!(file_stem(&meta, 7), "image-007-XYZ");
    }

    #[test]
    fn test_folder_names_number_repeats() {
        let mut names = FolderNames::new();
        assert_eq!(names.claim("photo", "jpg"), "photo.jpg");
        assert_eq!(names.claim("photo", "jpg"), "photo(1).jpg");
        assert_eq!(names.claim("photo", "jpg"), "photo(2).jpg");
        assert_eq!(names.claim("photo", "png"), "photo.png");
    }
}
