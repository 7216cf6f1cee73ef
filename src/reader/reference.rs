//! A1-style cell reference conversions.

/// Converts a 0-based column index to letters (0 → `A`, 26 → `AA`).
pub fn index_to_col(col: usize) -> String {
    let mut letters = Vec::new();
    let mut value = col + 1;
    while value > 0 {
        let remainder = (value - 1) % 26;
        letters.push(b'A' + remainder as u8);
        value = (value - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Converts 0-based row and column indexes to an `A1` reference.
pub fn index_to_reference(row: usize, col: usize) -> String {
    format!("{}{}", index_to_col(col), row + 1)
}

/// Converts column letters to a 0-based index, `None` for empty or non-letter input.
pub fn col_to_index(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    letters.chars().try_fold(0usize, |index, character| {
        let character = character.to_ascii_uppercase();
        character
            .is_ascii_uppercase()
            .then(|| index * 26 + (character as usize - 'A' as usize + 1))
    })
    .map(|index| index - 1)
}

/// Converts a 1-based row number to a 0-based index.
pub fn row_to_index(digits: &str) -> Option<usize> {
    digits.parse::<usize>().ok().filter(|row| *row > 0).map(|row| row - 1)
}

/// Splits an `A1` reference into 0-based `(row, col)`.
pub fn reference_to_index(reference: &str) -> Option<(usize, usize)> {
    let reference = reference.trim().replace('$', "");
    let split = reference.find(|character: char| character.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    Some((row_to_index(digits)?, col_to_index(letters)?))
}
