//! Argument splitting for slash commands.
//!
//! Arguments are whitespace-separated. Single or double quotes group words
//! (for passwords with spaces) and support `\"`, `\'` and `\\` escapes.
//! `=` and leading dashes have no special meaning, so URLs with query
//! strings and passwords such as `-secret` pass through unchanged.

use std::iter::Peekable;
use std::str::Chars;

/// Splits a command's argument string into words.
pub fn split_args(input: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }
        words.push(collect_word(&mut chars));
    }

    words
}

/// Collects one word; quoted sections may contain whitespace.
fn collect_word(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut word = String::new();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            break;
        }
        chars.next();
        if c == '"' || c == '\'' {
            word.push_str(&collect_quoted(chars, c));
        } else {
            word.push(c);
        }
    }

    word
}

/// Collects up to the closing quote. An unterminated quote runs to the end.
fn collect_quoted(chars: &mut Peekable<Chars<'_>>, quote: char) -> String {
    let mut result = String::new();
    let mut escaped = false;

    for c in chars.by_ref() {
        if escaped {
            match c {
                '\\' | '"' | '\'' => result.push(c),
                _ => {
                    result.push('\\');
                    result.push(c);
                }
            }
            escaped = false;
            continue;
        }

        match c {
            '\\' => escaped = true,
            c if c == quote => break,
            c => result.push(c),
        }
    }

    result
}
