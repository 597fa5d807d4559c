use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

pub const MIME_URL: &str = "url";
pub const MIME_TYPE_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_TYPE_PPTX: &str = "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_TYPE_DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_TYPE_MARKDOWN: &str = "text/markdown";

pub const GOOGLE_MIME_FOLDER: &str = "application/vnd.google-apps.folder";
pub const GOOGLE_MIME_SHORTCUT: &str = "application/vnd.google-apps.shortcut";
pub const GOOGLE_MIME_DOCUMENT: &str = "application/vnd.google-apps.document";
pub const GOOGLE_MIME_PRESENTATION: &str = "application/vnd.google-apps.presentation";
pub const GOOGLE_MIME_SPREADSHEET: &str = "application/vnd.google-apps.spreadsheet";

/// Canonical file type used by the chunking stage for routing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileType {
    Unknown,
    Url,
    Pdf,
    Txt,
    Docx,
    Doc,
    Xlsx,
    Xls,
    Pptx,
    Ppt,
    Xps,
    Epub,
    Hwpx,
    Md,
    Mobi,
    Fb2,
    Mp3,
    Mpeg,
    Mp4,
    Mpga,
    Wav,
    Webm,
    Mov,
    M4a,
    Yt,
}

/// MIME type → file type for every format the chunker understands
const SUPPORTED_MIME_TYPES: &[(&str, FileType)] = &[
    (MIME_URL, FileType::Url),
    (MIME_TYPE_XLSX, FileType::Xlsx),
    ("application/vnd.ms-excel", FileType::Xls),
    (MIME_TYPE_DOCX, FileType::Docx),
    ("application/msword", FileType::Doc),
    ("application/pdf", FileType::Pdf),
    ("text/plain", FileType::Txt),
    (MIME_TYPE_PPTX, FileType::Pptx),
    ("application/vnd.ms-powerpoint", FileType::Ppt),
    ("application/vnd.ms-xpsdocument", FileType::Xps),
    ("application/oxps", FileType::Xps),
    ("application/epub+zip", FileType::Epub),
    ("application/hwp+zip", FileType::Hwpx),
    (MIME_TYPE_MARKDOWN, FileType::Md),
    ("application/x-mobipocket-ebook", FileType::Mobi),
    ("application/fb2", FileType::Fb2),
    ("audio/mpeg", FileType::Mp3),
    ("video/mpeg", FileType::Mpeg),
    ("video/mp4", FileType::Mp4),
    ("video/mpga", FileType::Mpga),
    ("audio/wav", FileType::Wav),
    ("video/webm", FileType::Webm),
    ("video/mov", FileType::Mov),
    ("video/m4a", FileType::M4a),
];

/// Upper-case file extension → MIME type
const SUPPORTED_EXTENSIONS: &[(&str, &str)] = &[
    ("PDF", "application/pdf"),
    ("XLSX", MIME_TYPE_XLSX),
    ("XLS", "application/vnd.ms-excel"),
    ("DOCX", MIME_TYPE_DOCX),
    ("DOC", "application/msword"),
    ("PPT", "application/vnd.ms-powerpoint"),
    ("PPTX", MIME_TYPE_PPTX),
    ("MD", MIME_TYPE_MARKDOWN),
    ("HWPX", "application/hwp+zip"),
    ("MOBI", "application/x-mobipocket-ebook"),
    ("FB2", "application/fb2"),
    ("MP3", "audio/mpeg"),
    ("MPEG", "video/mpeg"),
    ("MP4", "video/mp4"),
    ("MPGA", "video/mpga"),
    ("WAV", "audio/wav"),
    ("WEBM", "video/webm"),
    ("MOV", "video/mov"),
    ("M4A", "video/m4a"),
    ("TXT", "text/plain"),
    ("XPS", "application/vnd.ms-xpsdocument"),
    ("EPUB", "application/epub+zip"),
];

/// Google application formats and the office format they are exported as
const GOOGLE_EXPORT_TYPES: &[(&str, &str)] = &[
    (GOOGLE_MIME_DOCUMENT, MIME_TYPE_DOCX),
    (GOOGLE_MIME_PRESENTATION, MIME_TYPE_PPTX),
    (GOOGLE_MIME_SPREADSHEET, MIME_TYPE_XLSX),
];

impl FileType {
    /// Looks up a MIME type, ignoring parameters such as `; charset=utf-8`
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let essence = mime_type.split(';').next().unwrap_or_default().trim();
        SUPPORTED_MIME_TYPES
            .iter()
            .find(|(mime, _)| *mime == essence)
            .map(|(_, file_type)| *file_type)
    }

    pub fn is_media(&self) -> bool {
        matches!(
            self,
            FileType::Mp3
                | FileType::Mp4
                | FileType::Mpeg
                | FileType::Mpga
                | FileType::M4a
                | FileType::Wav
                | FileType::Webm
                | FileType::Mov
        )
    }
}

/// MIME type registered for a file extension, case-insensitive
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    let upper = extension.to_uppercase();
    SUPPORTED_EXTENSIONS
        .iter()
        .find(|(ext, _)| *ext == upper)
        .map(|(_, mime)| *mime)
}

/// Export format for a Google application file, if it has one
pub fn google_export_mime(google_mime: &str) -> Option<&'static str> {
    GOOGLE_EXPORT_TYPES
        .iter()
        .find(|(mime, _)| *mime == google_mime)
        .map(|(_, export)| *export)
}

/// Extension of a file name, without the dot
pub fn extension_of(name: &str) -> Option<&str> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext)
}

/// Recognizes file types for the items of a single run.
///
/// Extensions that turned out to be unsupported are remembered so the
/// warning is only logged once per run.
#[derive(Debug, Default)]
pub struct FileTypeRecognizer {
    unsupported: HashSet<String>,
}

impl FileTypeRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `(mime_type, file_type)` from the reported MIME type first,
    /// then from the file name extension.
    pub fn recognize(&mut self, name: &str, mime_type: Option<&str>) -> (String, FileType) {
        if let Some(mime) = mime_type {
            if let Some(file_type) = FileType::from_mime(mime) {
                let essence = mime.split(';').next().unwrap_or_default().trim();
                return (essence.to_string(), file_type);
            }
        }

        let Some(ext) = extension_of(name) else {
            return (String::new(), FileType::Unknown);
        };
        let key = ext.to_uppercase();
        if self.unsupported.contains(&key) {
            return (String::new(), FileType::Unknown);
        }
        if let Some(mime) = mime_for_extension(&key) {
            if let Some(file_type) = FileType::from_mime(mime) {
                return (mime.to_string(), file_type);
            }
        }

        warn!("⚠️ Unsupported file type: {} ({})", name, mime_type.unwrap_or("unknown mime"));
        self.unsupported.insert(key);
        (String::new(), FileType::Unknown)
    }

    pub fn is_cached_unsupported(&self, extension: &str) -> bool {
        self.unsupported.contains(&extension.to_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_lookup_strips_parameters() {
        assert_eq!(FileType::from_mime("text/plain; charset=utf-8"), Some(FileType::Txt));
        assert_eq!(FileType::from_mime("application/pdf"), Some(FileType::Pdf));
        assert_eq!(FileType::from_mime("image/png"), None);
    }

    #[test]
    fn test_extension_fallback() {
        let mut recognizer = FileTypeRecognizer::new();
        let (mime, file_type) = recognizer.recognize("report.Docx", Some("application/octet-stream"));
        assert_eq!(mime, MIME_TYPE_DOCX);
        assert_eq!(file_type, FileType::Docx);
    }

    #[test]
    fn test_unsupported_extension_is_cached() {
        let mut recognizer = FileTypeRecognizer::new();
        assert_eq!(recognizer.recognize("photo.png", None).1, FileType::Unknown);
        assert!(recognizer.is_cached_unsupported("PNG"));
        assert_eq!(recognizer.recognize("other.PNG", None).1, FileType::Unknown);
    }

    #[test]
    fn test_google_export() {
        assert_eq!(google_export_mime(GOOGLE_MIME_DOCUMENT), Some(MIME_TYPE_DOCX));
        assert_eq!(google_export_mime("application/vnd.google-apps.form"), None);
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_string(&FileType::Pdf).unwrap();
        assert_eq!(json, "\"PDF\"");
        let parsed: FileType = serde_json::from_str("\"M4A\"").unwrap();
        assert_eq!(parsed, FileType::M4a);
    }
}
