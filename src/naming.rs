//! Filename convention for revisioned assets.
//!
//! A revisioned file embeds a fixed-width lowercase hex fingerprint between
//! its base name and its extension:
//!
//! - `app.css` + `1a2b3c4d` → `app-1a2b3c4d.css`
//! - `jquery.min.js` + `1a2b3c4d` → `jquery.min-1a2b3c4d.js`
//! - `LICENSE` + `1a2b3c4d` → `LICENSE-1a2b3c4d`
//!
//! Only the last extension is kept after the fingerprint, so multi-dot names
//! keep their inner dots in the base.

/// Result of splitting a filename into base, fingerprint and extension.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedName {
    /// Name without fingerprint and extension.
    pub base: String,
    /// Fingerprint if the name carries one of the expected width.
    pub fingerprint: Option<String>,
    /// Extension without the dot, if any.
    pub extension: Option<String>,
}

/// Split a filename following the `<base>-<fingerprint>.<ext>` convention.
///
/// `width` is the fingerprint length in hex chars. A trailing `-<hex>` segment
/// of any other width is treated as part of the base.
pub fn parse_revved_name(name: &str, width: usize) -> ParsedName {
    let (stem, extension) = split_extension(name);
    if let Some(dash) = stem.rfind('-') {
        let candidate = &stem[dash + 1..];
        if dash > 0 && candidate.len() == width && is_lower_hex(candidate) {
            return ParsedName {
                base: stem[..dash].to_string(),
                fingerprint: Some(candidate.to_string()),
                extension: extension.map(str::to_string),
            };
        }
    }
    ParsedName {
        base: stem.to_string(),
        fingerprint: None,
        extension: extension.map(str::to_string),
    }
}

/// Build the revisioned name for `name` with the given fingerprint.
pub fn revved_name(name: &str, fingerprint: &str) -> String {
    match split_extension(name) {
        (stem, Some(ext)) => format!("{}-{}.{}", stem, fingerprint, ext),
        (stem, None) => format!("{}-{}", stem, fingerprint),
    }
}

/// Whether `name` already carries a fingerprint of the given width.
pub fn is_revved(name: &str, width: usize) -> bool {
    parse_revved_name(name, width).fingerprint.is_some()
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        // Dotfiles like `.htaccess` have no extension
        Some(0) | None => (name, None),
        Some(dot) => (&name[..dot], Some(&name[dot + 1..])),
    }
}

fn is_lower_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
