//! Turning an [`ImageReference`] into a URL the host's renderer will load.
//!
//! The host sandboxes its renderer, so plain local paths are served through
//! its `vscode-file://vscode-app` scheme. Some hosts refuse that scheme for
//! files outside the install tree; [`inline_local`] embeds the image as a
//! `data:` URI instead.

use crate::patch::ImageReference;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::fs;
use std::io;
use std::path::Path;
use url::Url;

const HOST_FILE_ORIGIN: &str = "vscode-file://vscode-app";

/// URL to put in `background-image: url(...)`.
pub fn css_url(image: &ImageReference) -> String {
    match image {
        ImageReference::LocalPath(path) => host_file_url(path),
        ImageReference::DataUri(uri) => uri.clone(),
        ImageReference::RemoteUrl(url) => url.clone(),
    }
}

fn host_file_url(path: &Path) -> String {
    match Url::from_file_path(path).or_else(|()| foreign_file_url(path)) {
        Ok(url) => format!("{HOST_FILE_ORIGIN}{}", url.path()),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

/// File URL for a path that is not absolute on this OS, such as a drive
/// path read from a config written on Windows.
fn foreign_file_url(path: &Path) -> Result<Url, url::ParseError> {
    let mut url = Url::parse("file:///")?;
    url.set_path(&path.to_string_lossy().replace('\\', "/"));
    Ok(url)
}

/// Read a local image and return it as a base64 `data:` URI. Other
/// references are returned unchanged.
pub fn inline_local(image: &ImageReference) -> io::Result<ImageReference> {
    let ImageReference::LocalPath(path) = image else {
        return Ok(image.clone());
    };
    let bytes = fs::read(path)?;
    Ok(ImageReference::DataUri(format!(
        "data:{};base64,{}",
        mime_for(path),
        STANDARD.encode(bytes)
    )))
}

fn mime_for(path: &Path) -> String {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg".to_string(),
        "svg" => "image/svg+xml".to_string(),
        "" => "application/octet-stream".to_string(),
        other => format!("image/{other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_remote_and_data_pass_through() {
        let remote = ImageReference::parse("https://example.com/a.png");
        assert_eq!(css_url(&remote), "https://example.com/a.png");
        let data = ImageReference::parse("data:image/png;base64,AA==");
        assert_eq!(css_url(&data), "data:image/png;base64,AA==");
    }

    #[test]
    fn test_local_posix_path() {
        let image = ImageReference::LocalPath(PathBuf::from("/home/me/my bg.png"));
        assert_eq!(
            css_url(&image),
            "vscode-file://vscode-app/home/me/my%20bg.png"
        );
    }

    #[test]
    fn test_local_drive_path() {
        let image = ImageReference::LocalPath(PathBuf::from(r"C:\Users\me\bg.png"));
        assert_eq!(
            css_url(&image),
            "vscode-file://vscode-app/C:/Users/me/bg.png"
        );
    }

    #[test]
    fn test_local_path_reserved_characters() {
        let image = ImageReference::LocalPath(PathBuf::from("/srv/bg#1 (dark).png"));
        assert_eq!(
            css_url(&image),
            "vscode-file://vscode-app/srv/bg%231%20(dark).png"
        );
    }

    #[test]
    fn test_inline_local_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bg.JPG");
        fs::write(&path, [0xFF, 0xD8, 0xFF]).unwrap();

        let inlined = inline_local(&ImageReference::LocalPath(path)).unwrap();
        assert_eq!(
            inlined,
            ImageReference::DataUri("data:image/jpeg;base64,/9j/".to_string())
        );
    }

    #[test]
    fn test_inline_leaves_remote_alone() {
        let remote = ImageReference::parse("https://example.com/a.png");
        assert_eq!(inline_local(&remote).unwrap(), remote);
    }

    #[test]
    fn test_inline_missing_file_errors() {
        let image = ImageReference::LocalPath(PathBuf::from("/definitely/not/here.png"));
        assert!(inline_local(&image).is_err());
    }
}
