//! Storage names and keys.
//!
//! ## Stored file names
//!
//! `My Photo (1).JPG` becomes `my-photo-1-1760745600123-k3x9q2ab.jpg`:
//!
//! - stem lowercased, each unsafe character replaced by the separator
//! - separator runs collapsed, separators trimmed from both ends
//! - an empty stem becomes `file`
//! - `-{unix millis}-{8 random lowercase alphanumerics}` appended
//! - original extension kept, lowercased
//!
//! ## Upload directories
//!
//! A template such as `{year}/{month}/{user_id}` is filled from a
//! [`PathContext`]. Unknown tokens are dropped rather than left literally
//! in the key, and so are the empty segments they leave behind.
//!
//! ## Derived keys
//!
//! Thumbnails and conversions live next to their source:
//! `2026/10/cat-123-abc.jpg` → `2026/10/cat-123-abc-thumbnail.jpg` and
//! `2026/10/cat-123-abc.webp`.

use crate::config::SanitizeConfig;
use chrono::{DateTime, Datelike, Utc};
use rand::Rng;
use std::collections::HashSet;

const FALLBACK_STEM: &str = "file";
const SUFFIX_LEN: usize = 8;
const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Produces sanitized, collision-resistant file names.
#[derive(Debug, Clone)]
pub struct NameGenerator {
    separator: char,
    unsafe_characters: HashSet<char>,
}

impl NameGenerator {
    pub fn new(config: &SanitizeConfig) -> Self {
        Self {
            separator: config.separator,
            unsafe_characters: config.unsafe_characters.iter().copied().collect(),
        }
    }

    /// A unique storage file name for `original`.
    pub fn generate_file_name(&self, original: &str) -> String {
        self.file_name_at(original, Utc::now())
    }

    fn file_name_at(&self, original: &str, now: DateTime<Utc>) -> String {
        let (stem, extension) = split_name(base_name(original));
        let stem = self.sanitize(stem);
        let name = format!(
            "{stem}{sep}{millis}{sep}{suffix}",
            sep = self.separator,
            millis = now.timestamp_millis(),
            suffix = random_suffix(),
        );
        match extension.map(|e| self.sanitize(e)) {
            Some(ext) if !ext.is_empty() => format!("{name}.{ext}"),
            _ => name,
        }
    }

    /// Lowercase `raw` and reduce it to safe characters joined by single
    /// separators. Returns `file` when nothing survives.
    pub fn sanitize(&self, raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        let mut pending_separator = false;
        for c in raw.chars().flat_map(char::to_lowercase) {
            let unsafe_char = c == '/'
                || c == '\\'
                || c == '.'
                || c.is_control()
                || c.is_whitespace()
                || c == self.separator
                || self.unsafe_characters.contains(&c);
            if unsafe_char {
                pending_separator = !out.is_empty();
                continue;
            }
            if pending_separator {
                out.push(self.separator);
                pending_separator = false;
            }
            out.push(c);
        }
        if out.is_empty() {
            FALLBACK_STEM.to_string()
        } else {
            out
        }
    }
}

/// Last path component of a client-supplied name (which may carry a
/// Windows or Unix directory).
fn base_name(original: &str) -> &str {
    original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original)
}

/// Split `name.ext` at the last dot. A leading dot is part of the stem.
fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(i) if i > 0 && i + 1 < name.len() => (&name[..i], Some(&name[i + 1..])),
        _ => (name.trim_end_matches('.'), None),
    }
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
        .collect()
}

/// Values available to upload path templates.
#[derive(Debug, Clone)]
pub struct PathContext {
    pub now: DateTime<Utc>,
    pub user_id: Option<String>,
}

impl PathContext {
    pub fn new(user_id: Option<String>) -> Self {
        Self {
            now: Utc::now(),
            user_id,
        }
    }
}

/// Fill an upload directory template.
///
/// Recognized tokens: `{year}`, `{month}` (two digits), `{day}` (two
/// digits) and `{user_id}` (`guest` when there is no user). The result has
/// no leading, trailing, or doubled `/`, and may be empty.
pub fn upload_path(template: &str, ctx: &PathContext) -> String {
    let mut filled = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        filled.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            // Unterminated token: drop it and everything after.
            rest = "";
            break;
        };
        if let Some(value) = token_value(&after[..close], ctx) {
            filled.push_str(&value);
        }
        rest = &after[close + 1..];
    }
    filled.push_str(rest);

    filled
        .split(['/', '\\'])
        .map(str::trim)
        .filter(|seg| !seg.is_empty() && *seg != "." && *seg != "..")
        .collect::<Vec<_>>()
        .join("/")
}

fn token_value(token: &str, ctx: &PathContext) -> Option<String> {
    match token.trim() {
        "year" => Some(format!("{:04}", ctx.now.year())),
        "month" => Some(format!("{:02}", ctx.now.month())),
        "day" => Some(format!("{:02}", ctx.now.day())),
        "user_id" => Some(match ctx.user_id.as_deref() {
            Some(id) if !id.trim().is_empty() => path_safe(id),
            _ => "guest".to_string(),
        }),
        _ => None,
    }
}

/// Keep a token value inside its own path segment.
fn path_safe(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect()
}

/// Join a directory and a file name into a storage key.
pub fn storage_key(dir: &str, file_name: &str) -> String {
    if dir.is_empty() {
        file_name.to_string()
    } else {
        format!("{dir}/{file_name}")
    }
}

/// Key of a derivative stored next to `source_key`.
///
/// `suffix` names the variant (`photo-thumbnail.jpg`); without one only the
/// extension changes (`photo.webp`).
pub fn derived_key(source_key: &str, suffix: Option<&str>, extension: &str) -> String {
    let (dir, name) = match source_key.rsplit_once('/') {
        Some((dir, name)) => (dir, name),
        None => ("", source_key),
    };
    let (stem, _) = split_name(name);
    let file_name = match suffix {
        Some(suffix) => format!("{stem}-{suffix}.{extension}"),
        None => format!("{stem}.{extension}"),
    };
    storage_key(dir, &file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn generator() -> NameGenerator {
        NameGenerator::new(&SanitizeConfig::default())
    }

    fn ctx(user: Option<&str>) -> PathContext {
        PathContext {
            now: Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap(),
            user_id: user.map(str::to_string),
        }
    }

    /// Strip `-{millis}-{suffix}` to get back the sanitized stem.
    fn stem_of(name: &str) -> &str {
        let without_ext = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name);
        let mut parts = without_ext.rsplitn(3, '-');
        parts.next();
        parts.next();
        parts.next().unwrap()
    }

    // =========================================================================
    // sanitize
    // =========================================================================

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        let g = generator();
        assert_eq!(g.sanitize("My Photo (1)"), "my-photo-1");
        assert_eq!(g.sanitize("Tom & Jerry @ Home #2"), "tom-jerry-home-2");
        assert_eq!(g.sanitize("100% [final]^"), "100-final");
    }

    #[test]
    fn sanitize_collapses_and_trims_separators() {
        let g = generator();
        assert_eq!(g.sanitize("  --a -- b--  "), "a-b");
        assert_eq!(g.sanitize("a\tb\nc"), "a-b-c");
    }

    #[test]
    fn sanitize_empty_falls_back() {
        let g = generator();
        assert_eq!(g.sanitize(""), "file");
        assert_eq!(g.sanitize("()[]"), "file");
    }

    #[test]
    fn sanitize_keeps_unicode_letters() {
        assert_eq!(generator().sanitize("Café Ölmühle"), "café-ölmühle");
    }

    #[test]
    fn sanitize_honours_underscore_separator() {
        let g = NameGenerator::new(&SanitizeConfig {
            separator: '_',
            ..SanitizeConfig::default()
        });
        assert_eq!(g.sanitize("Summer Trip - Day 1"), "summer_trip_-_day_1");
    }

    // =========================================================================
    // generate_file_name
    // =========================================================================

    #[test]
    fn generated_names_are_unique_for_same_input() {
        let g = generator();
        let a = g.generate_file_name("test.jpg");
        let b = g.generate_file_name("test.jpg");
        assert_ne!(a, b);
        for name in [&a, &b] {
            assert!(name.ends_with(".jpg"), "{name}");
            assert_eq!(stem_of(name), "test");
        }
    }

    #[test]
    fn generated_name_shape() {
        let now = Utc.timestamp_millis_opt(1_760_745_600_123).unwrap();
        let name = generator().file_name_at("My Photo (1).JPG", now);
        let (stem, ext) = name.rsplit_once('.').unwrap();
        assert_eq!(ext, "jpg");
        assert!(stem.starts_with("my-photo-1-1760745600123-"), "{name}");
        let suffix = stem.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn generated_name_strips_client_directories() {
        let name = generator().generate_file_name("C:\\Users\\me\\..\\Desktop\\cat.png");
        assert_eq!(stem_of(&name), "cat");
        assert!(!name.contains(['/', '\\']));
    }

    #[test]
    fn generated_name_without_extension() {
        let name = generator().generate_file_name("README");
        assert!(!name.contains('.'));
        assert_eq!(stem_of(&name), "readme");
    }

    #[test]
    fn dotfiles_keep_their_name_as_stem() {
        let name = generator().generate_file_name(".hidden");
        assert_eq!(stem_of(&name), "hidden");
        assert!(!name.contains('.'));
    }

    #[test]
    fn multi_dot_names_keep_last_extension() {
        let name = generator().generate_file_name("archive.tar.GZ");
        assert!(name.ends_with(".gz"));
        assert_eq!(stem_of(&name), "archive-tar");
    }

    // =========================================================================
    // upload_path
    // =========================================================================

    #[test]
    fn upload_path_substitutes_tokens() {
        assert_eq!(upload_path("{year}/{month}/{day}", &ctx(None)), "2026/03/07");
        assert_eq!(
            upload_path("uploads/{user_id}/{year}", &ctx(Some("42"))),
            "uploads/42/2026"
        );
    }

    #[test]
    fn upload_path_guest_without_user() {
        assert_eq!(upload_path("{user_id}", &ctx(None)), "guest");
        assert_eq!(upload_path("{user_id}", &ctx(Some("  "))), "guest");
    }

    #[test]
    fn upload_path_never_leaves_tokens_or_empty_segments() {
        let path = upload_path("/media/{unknown}/{year}//{month}/", &ctx(None));
        assert_eq!(path, "media/2026/03");
        assert!(!path.contains('{'));
    }

    #[test]
    fn upload_path_contains_user_ids() {
        assert_eq!(
            upload_path("{user_id}/{year}", &ctx(Some("../../etc"))),
            "..-..-etc/2026"
        );
    }

    #[test]
    fn upload_path_unterminated_token_is_dropped() {
        assert_eq!(upload_path("a/{year", &ctx(None)), "a");
        assert_eq!(upload_path("", &ctx(None)), "");
    }

    // =========================================================================
    // keys
    // =========================================================================

    #[test]
    fn storage_key_joins() {
        assert_eq!(storage_key("", "a.jpg"), "a.jpg");
        assert_eq!(storage_key("2026/03", "a.jpg"), "2026/03/a.jpg");
    }

    #[test]
    fn derived_keys_live_next_to_source() {
        assert_eq!(
            derived_key("2026/03/cat-1-abc.jpg", Some("thumbnail"), "jpg"),
            "2026/03/cat-1-abc-thumbnail.jpg"
        );
        assert_eq!(
            derived_key("2026/03/cat-1-abc.jpg", None, "webp"),
            "2026/03/cat-1-abc.webp"
        );
        assert_eq!(derived_key("cat.png", Some("medium"), "png"), "cat-medium.png");
    }
}
