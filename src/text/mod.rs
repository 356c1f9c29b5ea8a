//! Text normalization shared by the index and detail parsers
//!
//! Scraped cells are frequently laid out over several visual lines. Every
//! field is flattened into a single CSV-safe cell with `/` standing in for
//! the line breaks.

use unicode_normalization::UnicodeNormalization;

/// Separator used in place of embedded line breaks
pub const LINE_SEPARATOR: char = '/';

/// Normalizes scraped text into a single flat field
///
/// 1. Unicode NFKC normalization (full-width digits and punctuation become ASCII)
/// 2. `\r\n` and `\r` become `\n`, and every run of `\n` collapses into one
/// 3. Leading and trailing whitespace of the whole text is stripped
/// 4. The remaining breaks are replaced by [`LINE_SEPARATOR`]
///
/// Whitespace inside the text is kept as is. The function is idempotent and
/// its output never contains `\n` or `\r`.
///
/// # Example
///
/// ```
/// use chintai_harvest::text::pretty_text;
///
/// assert_eq!(pretty_text("\n８.５万円\n\n\n５０００円\n"), "8.5万円/5000円");
/// assert_eq!(pretty_text("a \n b"), "a / b");
/// ```
pub fn pretty_text(raw: &str) -> String {
    let normalized: String = raw.nfkc().collect();
    let unified = normalized.replace("\r\n", "\n").replace('\r', "\n");

    let mut collapsed = String::with_capacity(unified.len());
    for c in unified.chars() {
        if c == '\n' && collapsed.ends_with('\n') {
            continue;
        }
        collapsed.push(c);
    }

    collapsed.trim().replace('\n', &LINE_SEPARATOR.to_string())
}

/// Splits an amenity list into trimmed, non-empty tokens
///
/// ASCII commas, full-width commas and ideographic commas are all treated as
/// the same delimiter.
pub fn split_options(raw: &str) -> Vec<String> {
    pretty_text(raw)
        .replace(|c: char| c == ',' || c == '，', "、")
        .split('、')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}
