//! Text helpers for an ASCII-only LED matrix font.
//!
//! The matrix font is proportional, but an average glyph cell of
//! [`CHAR_WIDTH_PX`] pixels is close enough for scheduling and wrapping.

use std::collections::BTreeMap;
use unicode_width::UnicodeWidthStr;

/// Average glyph width in pixels, including spacing.
pub const CHAR_WIDTH_PX: u32 = 6;

/// Estimated rendered width of `text` in pixels.
pub fn text_width_px(text: &str) -> u32 {
    UnicodeWidthStr::width(text) as u32 * CHAR_WIDTH_PX
}

/// Reduce `text` to printable ASCII.
///
/// Configured conversions run first (so a language can spell `ü` as `ue`),
/// then common Latin diacritics and typographic punctuation are folded and
/// anything left outside ASCII is dropped.
pub fn to_ascii(text: &str, conversions: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        let mut buf = [0u8; 4];
        let key: &str = ch.encode_utf8(&mut buf);
        if let Some(replacement) = conversions.get(key) {
            out.push_str(replacement);
            continue;
        }
        if ch.is_ascii() {
            if !ch.is_ascii_control() {
                out.push(ch);
            } else if ch == '\t' {
                out.push(' ');
            }
            continue;
        }
        if let Some(folded) = fold(ch) {
            out.push_str(folded);
        }
    }
    out
}

fn fold(ch: char) -> Option<&'static str> {
    let folded = match ch {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => "a",
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' | 'Ā' | 'Ă' | 'Ą' => "A",
        'æ' => "ae",
        'Æ' => "AE",
        'ç' | 'ć' | 'č' => "c",
        'Ç' | 'Ć' | 'Č' => "C",
        'ď' | 'đ' => "d",
        'Ď' | 'Đ' => "D",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ę' | 'ě' => "e",
        'È' | 'É' | 'Ê' | 'Ë' | 'Ē' | 'Ę' | 'Ě' => "E",
        'ì' | 'í' | 'î' | 'ï' | 'ī' => "i",
        'Ì' | 'Í' | 'Î' | 'Ï' | 'Ī' => "I",
        'ł' => "l",
        'Ł' => "L",
        'ñ' | 'ń' | 'ň' => "n",
        'Ñ' | 'Ń' | 'Ň' => "N",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ő' => "o",
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' | 'Ō' | 'Ő' => "O",
        'œ' => "oe",
        'Œ' => "OE",
        'ř' => "r",
        'Ř' => "R",
        'ś' | 'š' | 'ş' => "s",
        'Ś' | 'Š' | 'Ş' => "S",
        'ß' => "ss",
        'ť' | 'ţ' => "t",
        'Ť' | 'Ţ' => "T",
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' => "u",
        'Ù' | 'Ú' | 'Û' | 'Ü' | 'Ū' | 'Ů' | 'Ű' => "U",
        'ý' | 'ÿ' => "y",
        'Ý' | 'Ÿ' => "Y",
        'ź' | 'ż' | 'ž' => "z",
        'Ź' | 'Ż' | 'Ž' => "Z",
        '‘' | '’' | '‚' | '′' | '´' => "'",
        '“' | '”' | '„' | '″' | '«' | '»' => "\"",
        '–' | '—' | '‐' | '‑' | '−' => "-",
        '…' => "...",
        '°' => "o",
        '\u{a0}' | '\u{2009}' | '\u{202f}' => " ",
        '€' => "EUR",
        _ => return None,
    };
    Some(folded)
}

/// Greedy word wrap of `text` to `max_width_px`, appended to `lines`.
///
/// Words wider than the device are split at character boundaries.  Empty
/// input appends nothing.
pub fn wrap_into(text: &str, max_width_px: u32, lines: &mut Vec<String>) {
    let mut line = String::new();
    for word in text.split(' ').filter(|w| !w.is_empty()) {
        let candidate_width = if line.is_empty() {
            text_width_px(word)
        } else {
            text_width_px(&line) + CHAR_WIDTH_PX + text_width_px(word)
        };
        if candidate_width <= max_width_px {
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(word);
            continue;
        }
        if !line.is_empty() {
            lines.push(std::mem::take(&mut line));
        }
        if text_width_px(word) <= max_width_px {
            line.push_str(word);
        } else {
            let mut pieces = split_word(word, max_width_px);
            // The tail of a split word may still share a line with what follows.
            if let Some(last) = pieces.pop() {
                lines.extend(pieces);
                line = last;
            }
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
}

/// Convenience wrapper returning the wrapped lines.
pub fn wrap(text: &str, max_width_px: u32) -> Vec<String> {
    let mut lines = Vec::new();
    wrap_into(text, max_width_px, &mut lines);
    lines
}

fn split_word(word: &str, max_width_px: u32) -> Vec<String> {
    let per_line = (max_width_px / CHAR_WIDTH_PX).max(1) as usize;
    let chars: Vec<char> = word.chars().collect();
    chars
        .chunks(per_line)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Apply substring replacements, e.g. to shorten zone names.
pub fn map_names(text: &str, map: &BTreeMap<String, String>) -> String {
    map.iter()
        .fold(text.to_string(), |acc, (from, to)| acc.replace(from.as_str(), to))
}
