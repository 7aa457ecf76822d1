//! Input field handling for the terminal user interface.

/// A text input field with cursor position and active state management.
///
/// The cursor counts characters, not bytes, so accented names edit correctly.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InputField {
    pub value: String,
    pub cursor: usize,
    pub active: bool,
}

impl InputField {
    /// Create a new empty input field.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an input field with initial text value.
    pub fn with_value(value: &str) -> Self {
        Self {
            value: value.to_string(),
            cursor: value.chars().count(),
            active: false,
        }
    }

    /// Replace the value and move the cursor to the end.
    pub fn set(&mut self, value: &str) {
        self.value = value.to_string();
        self.cursor = self.value.chars().count();
    }

    fn byte_index(&self, char_idx: usize) -> usize {
        self.value
            .char_indices()
            .nth(char_idx)
            .map(|(i, _)| i)
            .unwrap_or(self.value.len())
    }

    /// Insert a character at the current cursor position.
    pub fn handle_char(&mut self, c: char) {
        let idx = self.byte_index(self.cursor);
        self.value.insert(idx, c);
        self.cursor += 1;
    }

    /// Delete the character before the cursor.
    pub fn handle_backspace(&mut self) {
        if self.cursor > 0 {
            let idx = self.byte_index(self.cursor - 1);
            self.value.remove(idx);
            self.cursor -= 1;
        }
    }

    /// Delete the character at the cursor position.
    pub fn handle_delete(&mut self) {
        if self.cursor < self.value.chars().count() {
            let idx = self.byte_index(self.cursor);
            self.value.remove(idx);
        }
    }

    /// Move cursor one position to the left.
    pub fn move_cursor_left(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
        }
    }

    /// Move cursor one position to the right.
    pub fn move_cursor_right(&mut self) {
        if self.cursor < self.value.chars().count() {
            self.cursor += 1;
        }
    }

    pub fn trimmed(&self) -> &str {
        self.value.trim()
    }

    /// Reformat the value with a digit mask (phone, CPF, CNPJ, CEP).
    ///
    /// The cursor stays behind the same number of digits, so typing in the
    /// middle of "(11) 9999" does not jump to the end.
    pub fn apply_mask(&mut self, mask: fn(&str) -> String) {
        let digits_before = self.value.chars().take(self.cursor).filter(|c| c.is_ascii_digit()).count();
        self.value = mask(&self.value);
        let mut seen = 0;
        let mut cursor = 0;
        for c in self.value.chars() {
            if seen == digits_before {
                break;
            }
            if c.is_ascii_digit() {
                seen += 1;
            }
            cursor += 1;
        }
        self.cursor = cursor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edits_multibyte_text() {
        let mut field = InputField::with_value("Joã");
        field.handle_char('o');
        assert_eq!(field.value, "João");
        field.move_cursor_left();
        field.handle_backspace();
        assert_eq!(field.value, "Joo");
        field.handle_delete();
        assert_eq!(field.value, "Jo");
    }

    #[test]
    fn test_mask_keeps_cursor_behind_same_digit() {
        let mut field = InputField::new();
        for c in "1199998888".chars() {
            field.handle_char(c);
            field.apply_mask(crate::forms::validate::mask_phone);
        }
        assert_eq!(field.value, "(11) 9999-8888");
        assert_eq!(field.cursor, field.value.chars().count());

        field.cursor = 5;
        field.handle_char('7');
        field.apply_mask(crate::forms::validate::mask_phone);
        assert_eq!(field.value, "(11) 79999-8888");
        assert_eq!(field.cursor, 6);
    }
}
