//! Display width hints for automatic column sizing.

/// Widest column the output formats accept, in character units.
pub const MAX_COLUMN_WIDTH: usize = 255;

/// Whether a character renders full-width: CJK ideographs, kana, hangul,
/// full-width forms and upper-case latin letters.
fn is_full_width(character: char) -> bool {
    matches!(character,
        'A'..='Z'
        | '\u{1100}'..='\u{11FF}'
        | '\u{2E80}'..='\u{303F}'
        | '\u{3040}'..='\u{30FF}'
        | '\u{3100}'..='\u{31FF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{AC00}'..='\u{D7AF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{FF00}'..='\u{FFEF}'
    )
}

/// Width of `content` in character units: full-width characters count 1,
/// others 0.5, rounded up. Multi-line content is as wide as its widest line.
pub fn display_width(content: &str) -> usize {
    content
        .lines()
        .map(|line| {
            let halves: usize = line
                .chars()
                .map(|character| if is_full_width(character) { 2 } else { 1 })
                .sum();
            halves.div_ceil(2)
        })
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_width_characters_round_up() {
        assert_eq!(display_width(""), 0);
        assert_eq!(display_width("a"), 1);
        assert_eq!(display_width("abc"), 2);
        assert_eq!(display_width("abcd"), 2);
    }

    #[test]
    fn upper_case_and_cjk_are_full_width() {
        assert_eq!(display_width("AB"), 2);
        assert_eq!(display_width("中文"), 2);
        assert_eq!(display_width("한국어"), 3);
        assert_eq!(display_width("Ab中"), 3);
    }

    #[test]
    fn widest_line_wins() {
        assert_eq!(display_width("ab\nABCD\nc"), 4);
    }
}
