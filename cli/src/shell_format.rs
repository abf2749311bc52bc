//! Splitting scripted command text into argv, and rendering argv back.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("command is empty")]
    Empty,

    #[error("unterminated quote in `{0}`")]
    UnterminatedQuote(String),
}

/// Split a command line on whitespace, grouping double-quoted text.
///
/// Only `"` groups and `\"`/`\\` escapes inside quotes are understood;
/// there is no variable expansion or globbing.
pub fn split_command(command: &str) -> Result<Vec<String>, CommandError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut in_quotes = false;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                in_word = true;
            }
            '\\' if in_quotes => match chars.next() {
                Some(next @ ('"' | '\\')) => current.push(next),
                Some(other) => {
                    current.push('\\');
                    current.push(other);
                }
                None => current.push('\\'),
            },
            c if c.is_whitespace() && !in_quotes => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if in_quotes {
        return Err(CommandError::UnterminatedQuote(command.to_string()));
    }
    if in_word {
        args.push(current);
    }
    if args.is_empty() {
        return Err(CommandError::Empty);
    }
    Ok(args)
}

/// Characters that require quoting in shell arguments.
const SHELL_SPECIAL_CHARS: &[char] = &[
    ' ', '\t', '\n', '"', '\'', '\\', '$', '`', '!', '*', '?', '[', ']', '#', '~', '=', '%', '|',
    '&', ';', '<', '>', '(', ')', '{', '}', '^',
];

/// Format an argv array as a shell command line for display.
pub fn format_shell_command(args: &[String]) -> String {
    args.iter()
        .map(|arg| quote_shell_arg(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_shell_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    if !arg.chars().any(|c| SHELL_SPECIAL_CHARS.contains(&c)) {
        return arg.to_string();
    }
    if !arg.contains('\'') {
        return format!("'{}'", arg);
    }

    let escaped: String = arg
        .chars()
        .map(|c| match c {
            '"' | '\\' | '$' | '`' => format!("\\{}", c),
            _ => c.to_string(),
        })
        .collect();
    format!("\"{}\"", escaped)
}
