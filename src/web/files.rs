//! SD card file browser: listing and download name resolution.
//!
//! Reads the mounted directory directly through the VFS, without taking the
//! Image Store lock.  A file being written may therefore show up truncated.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::web::form::percent_encode;
use crate::web::pages::html_escape;

/// Bytes per chunk when streaming a download.
pub const DOWNLOAD_CHUNK: usize = 1024;

/// Names of the regular files in `dir`, sorted.
pub fn list_images(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// HTML list of `names`, each linking to its download URL.
pub fn render_listing(names: &[String]) -> String {
    let mut html = String::from("<html><body><h1>File Browser</h1><ul>");
    for name in names {
        html.push_str(&format!(
            "<li><a href=\"/files/download?file={}\">{}</a></li>",
            percent_encode(name),
            html_escape(name)
        ));
    }
    html.push_str("</ul></body></html>");
    html
}

/// Map a requested file name to a path inside `dir`.
///
/// Only bare names are accepted; anything that could leave `dir` is `None`.
pub fn resolve_download(dir: &Path, name: &str) -> Option<PathBuf> {
    if name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains(['/', '\\', '\0'])
    {
        return None;
    }
    let path = dir.join(name);
    path.is_file().then_some(path)
}

/// `Content-Disposition` value for downloading `name`.
pub fn content_disposition(name: &str) -> String {
    let safe: String = name.chars().filter(|c| *c != '"' && !c.is_control()).collect();
    format!("attachment; filename=\"{}\"", safe)
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;

    #[test]
    fn lists_only_regular_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("2.JPG"), b"b").unwrap();
        fs::write(dir.path().join("10.JPG"), b"a").unwrap();
        fs::create_dir(dir.path().join("DCIM")).unwrap();
        assert_eq!(list_images(dir.path()).unwrap(), vec!["10.JPG", "2.JPG"]);
    }

    #[test]
    fn listing_links_and_escapes() {
        let html = render_listing(&["1.JPG".into(), "a b<.txt".into()]);
        assert!(html.contains("<a href=\"/files/download?file=1.JPG\">1.JPG</a>"));
        assert!(html.contains("file=a%20b%3C.txt\">a b&lt;.txt</a>"));
    }

    #[test]
    fn download_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("1.JPG"), b"x").unwrap();
        assert_eq!(resolve_download(dir.path(), "1.JPG"), Some(dir.path().join("1.JPG")));
        for bad in ["", ".", "..", "../etc/passwd", "a/b", "a\\b", "nul\0"] {
            assert_eq!(resolve_download(dir.path(), bad), None, "{bad:?}");
        }
        assert_eq!(resolve_download(dir.path(), "2.JPG"), None);
    }

    #[test]
    fn disposition_quotes_name() {
        assert_eq!(content_disposition("7.JPG"), "attachment; filename=\"7.JPG\"");
        assert_eq!(content_disposition("a\"b"), "attachment; filename=\"ab\"");
    }
}
