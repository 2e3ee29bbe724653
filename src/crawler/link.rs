use crate::url::{filename_from_url, infer_file_type};
use serde::Serialize;
use url::Url;

/// A discovered candidate file reference
///
/// The URL is the identity of a link within a cycle: two links are
/// duplicates iff their URLs are byte-equal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Link {
    /// Absolute URL
    pub url: String,
    /// Display title (title attribute or element text)
    pub title: String,
    /// Raw element text
    pub text: String,
    /// Normalized ".ext" file type, possibly empty
    pub file_type: String,
    pub date: Option<String>,
    pub size: Option<String>,
    /// Natural filename from the URL path, possibly empty
    pub filename: String,
}

impl Link {
    /// Builds a link from a resolved URL, inferring its type and filename
    pub fn new(url: &Url, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            title: title.into(),
            text: text.into(),
            file_type: infer_file_type(url),
            date: None,
            size: None,
            filename: filename_from_url(url),
        }
    }

    /// Builds a link from a raw URL string
    ///
    /// Unparseable URLs keep their text but get no type or filename; they
    /// are rejected later by the rule filter.
    pub fn from_raw(url: &str, title: impl Into<String>) -> Self {
        let title = title.into();
        match Url::parse(url) {
            Ok(parsed) => Self::new(&parsed, title, String::new()),
            Err(_) => Self {
                url: url.to_string(),
                title,
                text: String::new(),
                file_type: String::new(),
                date: None,
                size: None,
                filename: String::new(),
            },
        }
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Lower-cased "title text filename" used for keyword scoring
    pub fn keyword_text(&self) -> String {
        format!("{} {} {}", self.title, self.text, self.filename).to_lowercase()
    }
}
