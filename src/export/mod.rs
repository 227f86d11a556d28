//! Rebuilds the cache into one zip package laid out as `site/page/file.ext`.

pub mod naming;

use crate::error::ExportError;
use crate::records::ImageRecord;
use chrono::NaiveDate;
use naming::{FolderNames, file_stem, folder_name, sanitize_token};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

/// Outcome counts of one export
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    /// Site folders holding at least one file
    pub sites: usize,
    /// Page folders holding at least one file
    pub pages: usize,
    pub written: usize,
    pub skipped: usize,
}

impl ExportReport {
    pub fn status_line(&self) -> String {
        let mut line = format!(
            "Exported {} from {} across {}",
            counted(self.written, "image"),
            counted(self.pages, "page"),
            counted(self.sites, "site")
        );
        if self.skipped > 0 {
            line.push_str(&format!(" ({} skipped)", self.skipped));
        }
        line
    }
}

/// `1 page`, `2 pages`
fn counted(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("{} {}", n, noun)
    } else {
        format!("{} {}s", n, noun)
    }
}

/// A finished zip package held in memory
#[derive(Debug)]
pub struct ExportPackage {
    pub bytes: Vec<u8>,
    pub report: ExportReport,
}

/// Builds export packages from store snapshots
#[derive(Debug, Clone)]
pub struct ExportBuilder {
    options: SimpleFileOptions,
}

impl Default for ExportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportBuilder {
    pub fn new() -> Self {
        Self {
            options: SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
        }
    }

    /// Build the package for `records`.
    ///
    /// Records sharing a content hash are exported once (first one wins).
    /// Records without payload bytes are skipped and counted, so
    /// `written + skipped` always equals the number of distinct hashes.
    /// Any archive failure discards the whole package.
    pub fn build(&self, records: &[ImageRecord]) -> Result<ExportPackage, ExportError> {
        let mut report = ExportReport::default();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut tree: BTreeMap<String, BTreeMap<String, Vec<&ImageRecord>>> = BTreeMap::new();

        for record in records {
            if !seen.insert(record.content_hash.as_str()) {
                continue;
            }
            if record.payload.is_empty() {
                ::log::warn!("Skipping {:.12}: empty payload", record.content_hash);
                report.skipped += 1;
                continue;
            }

            let site = folder_name(&record.metadata.site_name, "site");
            let page = folder_name(&record.metadata.page_path, "home");
            tree.entry(site).or_default().entry(page).or_default().push(record);
        }

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

        for (site, pages) in &tree {
            report.sites += 1;
            for (page, page_records) in pages {
                report.pages += 1;
                let mut names = FolderNames::new();

                for (index, record) in page_records.iter().enumerate() {
                    let stem = file_stem(&record.metadata, index + 1);
                    let ext = match sanitize_token(&record.extension, 8) {
                        ext if ext.is_empty() => "jpg".to_string(),
                        ext => ext,
                    };
                    let name = names.claim(&stem, &ext);

                    zip.start_file(format!("{}/{}/{}", site, page, name), self.options)?;
                    zip.write_all(&record.payload)?;
                    report.written += 1;
                }
            }
        }

        let bytes = zip.finish()?.into_inner();
        ::log::info!("{}", report.status_line());

        Ok(ExportPackage { bytes, report })
    }
}

/// Package file name for an export made on `date`
pub fn package_file_name(date: NaiveDate) -> String {
    format!("site-images-{}.zip", date.format("%Y-%m-%d"))
}

/// Write `bytes` to `dir/file_name`, going through a temporary file so an
/// interrupted write never leaves a partial package behind
pub fn write_package(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf, ExportError> {
    fs::create_dir_all(dir)?;

    let target = dir.join(file_name);
    let partial = dir.join(format!(".{}.partial", file_name));

    if let Err(e) = fs::write(&partial, bytes) {
        let _ = fs::remove_file(&partial);
        return Err(e.into());
    }
    fs::rename(&partial, &target)?;

    ::log::info!("Wrote {} ({} bytes)", target.display(), bytes.len());
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::ImageMetadata;
    use std::io::Read;
    use zip::ZipArchive;

    fn record(payload: &[u8], page: &str, alt: Option<&str>, id: &str) -> ImageRecord {
        ImageRecord::new(
            payload.to_vec(),
            "image/png",
            ImageMetadata {
                site_name: "Garden Club".to_string(),
                page_path: page.to_string(),
                image_id: id.to_string(),
                image_type: "site-upload".to_string(),
                alt_text: alt.map(str::to_string),
                ..ImageMetadata::default()
            },
        )
    }

    fn entry_names(bytes: &[u8]) -> Vec<String> {
        let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        names
    }

    #[test]
    fn test_groups_by_site_and_page() {
        let records = vec![
            record(b"one", "home", Some("Front gate"), "IMG1"),
            record(b"two", "home", None, "IMG2"),
            record(b"three", "Beds/North", Some("Tomatoes"), "IMG3"),
            record(b"four", "Beds/North", Some("Tomatoes"), "IMG4"),
            record(b"five", "home", Some("Shed"), "IMG5"),
        ];

        let package = ExportBuilder::new().build(&records).unwrap();

        assert_eq!(
            package.report,
            ExportReport {
                sites: 1,
                pages: 2,
                written: 5,
                skipped: 0,
            }
        );

        let names = entry_names(&package.bytes);
        assert_eq!(names.len(), 5);
        assert!(names.iter().all(|n| n.starts_with("garden-club/")));

        let folders: HashSet<&str> = names
            .iter()
            .filter_map(|n| n.rsplit_once('/').map(|(dir, _)| dir))
            .collect();
        assert_eq!(
            folders,
            HashSet::from(["garden-club/home", "garden-club/beds-north"])
        );
        assert!(names.contains(&"garden-club/home/front-gate-IMG1-site-upload.png".to_string()));
        assert!(names.contains(&"garden-club/home/image-002-IMG2-site-upload.png".to_string()));
    }

    #[test]
    fn test_empty_payload_is_skipped() {
        let mut empty = record(b"", "home", Some("Broken"), "IMG0");
        empty.content_hash = "deadbeef".to_string();
        let records = vec![
            record(b"one", "home", None, "IMG1"),
            empty,
            record(b"two", "home", None, "IMG2"),
        ];

        let package = ExportBuilder::new().build(&records).unwrap();

        assert_eq!(package.report.skipped, 1);
        assert_eq!(package.report.written, records.len() - 1);
        assert_eq!(entry_names(&package.bytes).len(), 2);
    }

    #[test]
    fn test_duplicate_hashes_exported_once_first_wins() {
        let first = record(b"same", "home", Some("First"), "IMG1");
        let second = record(b"same", "about", Some("Second"), "IMG1");
        let other = record(b"other", "home", None, "IMG2");
        let records = vec![first, second, other];

        let package = ExportBuilder::new().build(&records).unwrap();
        let unique: HashSet<&str> = records.iter().map(|r| r.content_hash.as_str()).collect();

        assert_eq!(
            package.report.written + package.report.skipped,
            unique.len()
        );
        let names = entry_names(&package.bytes);
        assert!(names.iter().any(|n| n.contains("/home/first-")));
        assert!(!names.iter().any(|n| n.contains("/about/")));
    }

    #[test]
    fn test_payload_round_trips_through_archive() {
        let records = vec![record(b"\x89PNG bytes", "home", Some("Logo"), "IMG9")];
        let package = ExportBuilder::new().build(&records).unwrap();

        let mut archive = ZipArchive::new(Cursor::new(package.bytes)).unwrap();
        let mut file = archive
            .by_name("garden-club/home/logo-IMG9-site-upload.png")
            .unwrap();
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"\x89PNG bytes");
    }

    #[test]
    fn test_status_line_counts_agree_with_nouns() {
        let report = ExportReport {
            sites: 1,
            pages: 2,
            written: 1,
            skipped: 0,
        };
        assert_eq!(report.status_line(), "Exported 1 image from 2 pages across 1 site");

        let report = ExportReport {
            sites: 2,
            pages: 1,
            written: 3,
            skipped: 1,
        };
        assert_eq!(
            report.status_line(),
            "Exported 3 images from 1 page across 2 sites (1 skipped)"
        );
    }

    #[test]
    fn test_package_file_name_embeds_date() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(package_file_name(date), "site-images-2024-03-09.zip");
    }

    #[test]
    fn test_write_package_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_package(dir.path(), "site-images-2024-03-09.zip", b"zip").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"zip");
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
