use std::cmp::Ordering;

use chrono::NaiveDate;

/// Storage and display format of attendance dates.
const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

/// Base letter of a lowercase Latin-1 or Latin Extended-A character, so
/// accented names sort next to their unaccented spelling.
fn strip_diacritic(ch: char) -> char {
    match ch {
        '\u{00E0}'..='\u{00E6}' | '\u{0101}' | '\u{0103}' | '\u{0105}' => 'a',
        '\u{00E7}' | '\u{0107}' | '\u{0109}' | '\u{010B}' | '\u{010D}' => 'c',
        '\u{010F}' | '\u{0111}' => 'd',
        '\u{00E8}'..='\u{00EB}' | '\u{0113}' | '\u{0115}' | '\u{0117}' | '\u{0119}' | '\u{011B}' => 'e',
        '\u{011D}' | '\u{011F}' | '\u{0121}' | '\u{0123}' => 'g',
        '\u{00EC}'..='\u{00EF}' | '\u{0129}' | '\u{012B}' | '\u{012D}' | '\u{012F}' | '\u{0131}' => 'i',
        '\u{013A}' | '\u{013C}' | '\u{013E}' | '\u{0142}' => 'l',
        '\u{00F1}' | '\u{0144}' | '\u{0146}' | '\u{0148}' => 'n',
        '\u{00F2}'..='\u{00F6}' | '\u{00F8}' | '\u{014D}' | '\u{014F}' | '\u{0151}' | '\u{0153}' => 'o',
        '\u{0155}' | '\u{0157}' | '\u{0159}' => 'r',
        '\u{00DF}' | '\u{015B}' | '\u{015D}' | '\u{015F}' | '\u{0161}' => 's',
        '\u{0163}' | '\u{0165}' => 't',
        '\u{00F9}'..='\u{00FC}' | '\u{0169}' | '\u{016B}' | '\u{016D}' | '\u{016F}' | '\u{0171}' | '\u{0173}' => 'u',
        '\u{00FD}' | '\u{00FF}' => 'y',
        '\u{017A}' | '\u{017C}' | '\u{017E}' => 'z',
        _ => ch,
    }
}

fn lowercase(s: &str) -> impl Iterator<Item = char> + '_ {
    s.chars().flat_map(char::to_lowercase)
}

/// Compare names the way a reader expects: case and accents are ignored
/// first, then accents break ties, then the raw strings so names that
/// differ only in case still have a stable order.
pub fn cmp_ignore_case(a: &str, b: &str) -> Ordering {
    let primary_a = lowercase(a).map(strip_diacritic);
    let primary_b = lowercase(b).map(strip_diacritic);
    primary_a
        .cmp(primary_b)
        .then_with(|| lowercase(a).cmp(lowercase(b)))
        .then_with(|| a.cmp(b))
}

/// Format a date as `YYYY-MM-DD`
pub fn format_date_key(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

/// Parse a `YYYY-MM-DD` date key, ignoring surrounding whitespace.
pub fn parse_date_key(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_KEY_FORMAT).ok()
}
