// Object keys: construction from client-supplied filenames and derivation of
// artifact keys for the worker.

use std::fmt;
use thiserror::Error;

/// Directory (relative to the storage root) holding worker-produced artifacts.
/// Sanitized upload names can never start with a dot, so this name is reserved.
pub const DERIVED_DIR: &str = ".derived";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("file name is empty after sanitization")]
    Empty,
}

/// Identifier of a stored object, relative to the storage root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Builds a key from an untrusted filename.
    ///
    /// Only the final path component is kept, characters outside
    /// `[A-Za-z0-9._-]` become `_`, runs of `_` and `.` are collapsed, leading
    /// dots are stripped and the result is capped at `max_len` bytes while
    /// keeping the extension.
    pub fn from_filename(filename: &str, max_len: usize) -> Result<Self, KeyError> {
        sanitize_filename(filename, max_len).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last path component of the key.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Extension of the file name, without the dot.
    pub fn extension(&self) -> Option<&str> {
        split_extension(self.file_name()).1
    }

    /// Same key with `-{suffix}` inserted before the extension. The stem is
    /// shortened so the result stays within `max_len` bytes; if even a
    /// one-byte stem does not fit, the extension is given up instead.
    pub fn with_suffix(&self, suffix: &str, max_len: usize) -> Self {
        let (stem, ext) = split_extension(&self.0);
        let tail = match ext {
            Some(ext) => format!("-{suffix}.{ext}"),
            None => format!("-{suffix}"),
        };
        if tail.len() < max_len {
            let keep = (max_len - tail.len()).min(stem.len());
            return Self(format!("{}{tail}", &stem[..keep]));
        }

        let keep = max_len.saturating_sub(suffix.len() + 1).clamp(1, self.0.len());
        Self(format!("{}-{suffix}", &self.0[..keep]))
    }

    /// Deterministic key of an artifact derived from this object. The whole
    /// key is kept so that `a.png` and `a.bmp` never share an artifact:
    /// `photo.jpg` with variant `256` and extension `jpg` becomes
    /// `.derived/photo.jpg_256.jpg`.
    pub fn derived(&self, variant: &str, extension: &str) -> Self {
        Self(format!("{DERIVED_DIR}/{}_{variant}.{extension}", self.0))
    }
}

#[cfg(test)]
impl ObjectKey {
    /// Key for a name that is already in sanitized form.
    pub(crate) fn parse(key: &str) -> Result<Self, KeyError> {
        Self::from_filename(key, usize::MAX)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}

fn sanitize_filename(filename: &str, max_len: usize) -> Result<String, KeyError> {
    // Both separators are stripped regardless of the host platform.
    let last = filename.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if last == "." || last == ".." {
        return Err(KeyError::Empty);
    }

    let mut sanitized = String::with_capacity(last.len());
    let mut prev: Option<char> = None;
    for c in last.chars() {
        let mapped = if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
            c
        } else {
            '_'
        };
        if matches!(mapped, '_' | '.') && prev == Some(mapped) {
            continue;
        }
        sanitized.push(mapped);
        prev = Some(mapped);
    }

    let sanitized = sanitized.trim_start_matches('.').trim_end_matches('.');
    if sanitized.is_empty() || sanitized.chars().all(|c| c == '_') {
        return Err(KeyError::Empty);
    }

    // Output is ASCII, so byte offsets are char boundaries.
    if sanitized.len() <= max_len {
        return Ok(sanitized.to_string());
    }
    match split_extension(sanitized) {
        (stem, Some(ext)) if ext.len() + 2 <= max_len => {
            let keep = max_len - ext.len() - 1;
            Ok(format!("{}.{ext}", &stem[..keep.min(stem.len())]))
        }
        _ => Ok(sanitized[..max_len].to_string()),
    }
}
