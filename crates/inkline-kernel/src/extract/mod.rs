//! Deterministic extractors. Every function returns `None` for "no match";
//! none of them panic on arbitrary input.

mod amount;
mod dimensions;
mod place;
mod slot;

pub use amount::extract_amount;
pub use dimensions::{extract_dimensions, find_dimensions, Dimensions, MAX_DIMENSION_CM};
pub use place::{extract_place, Place};
pub use slot::{extract_slot_choice, extract_time_windows};

/// Free-text answer: anything carrying at least one letter or digit,
/// whitespace-collapsed.
pub fn extract_text_answer(text: &str) -> Option<String> {
    if !text.chars().any(char::is_alphanumeric) {
        return None;
    }
    Some(text.split_whitespace().collect::<Vec<_>>().join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_answer_needs_a_letter_or_digit() {
        assert_eq!(
            extract_text_answer("  a  koi\tfish "),
            Some("a koi fish".to_string())
        );
        assert_eq!(extract_text_answer("🐟🐟"), None);
        assert_eq!(extract_text_answer("?!"), None);
        assert_eq!(extract_text_answer(""), None);
    }
}
