//! Shell line parsing: tokens, quotes, and redirection.
//!
//! Tokens are whitespace-separated; double quotes preserve whitespace.
//! `>` / `>>` consume the following token as the output target, `<` as the
//! input source; all are stripped from argv before dispatch. `|` is
//! reserved and rejected.

use alloc::{string::String, vec::Vec};

/// A parsed command line with redirections separated out.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedLine {
    pub argv: Vec<String>,
    /// Output target and whether to append (`>>`).
    pub redirect_out: Option<(String, bool)>,
    /// Input source (`<`).
    pub redirect_in: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    UnterminatedQuote,
    /// `>`/`>>`/`<` with nothing after it.
    MissingRedirectTarget,
    PipesUnsupported,
}

impl ParseError {
    pub fn message(self) -> &'static str {
        match self {
            Self::UnterminatedQuote => "unterminated quote",
            Self::MissingRedirectTarget => "redirection needs a target",
            Self::PipesUnsupported => "pipes not supported",
        }
    }
}

/// One raw token; quoting is resolved, operators are classified.
#[derive(Debug, PartialEq, Eq)]
enum Token {
    Word(String),
    RedirectOut,
    RedirectAppend,
    RedirectIn,
    Pipe,
}

fn tokenize(line: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut in_quotes = false;

    let mut flush = |current: &mut String, quoted: &mut bool, tokens: &mut Vec<Token>| {
        if current.is_empty() && !*quoted {
            return;
        }
        let word = core::mem::take(current);
        // Operator classification only applies to unquoted tokens;
        // a quoted ">" is a literal argument.
        let token = if *quoted {
            Token::Word(word)
        } else {
            match word.as_str() {
                ">" => Token::RedirectOut,
                ">>" => Token::RedirectAppend,
                "<" => Token::RedirectIn,
                "|" => Token::Pipe,
                _ => Token::Word(word),
            }
        };
        tokens.push(token);
        *quoted = false;
    };

    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                quoted = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                flush(&mut current, &mut quoted, &mut tokens);
            }
            c => current.push(c),
        }
    }
    if in_quotes {
        return Err(ParseError::UnterminatedQuote);
    }
    flush(&mut current, &mut quoted, &mut tokens);
    Ok(tokens)
}

/// Parse one input line.
pub fn parse_line(line: &str) -> Result<ParsedLine, ParseError> {
    let tokens = tokenize(line)?;
    let mut parsed = ParsedLine::default();

    let mut iter = tokens.into_iter();
    while let Some(token) = iter.next() {
        match token {
            Token::Word(word) => parsed.argv.push(word),
            Token::Pipe => return Err(ParseError::PipesUnsupported),
            redirect => {
                let target = match iter.next() {
                    Some(Token::Word(word)) => word,
                    _ => return Err(ParseError::MissingRedirectTarget),
                };
                match redirect {
                    Token::RedirectOut => parsed.redirect_out = Some((target, false)),
                    Token::RedirectAppend => parsed.redirect_out = Some((target, true)),
                    Token::RedirectIn => parsed.redirect_in = Some(target),
                    _ => unreachable!(),
                }
            }
        }
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;

    fn words(parsed: &ParsedLine) -> Vec<&str> {
        parsed.argv.iter().map(String::as_str).collect()
    }

    #[test]
    fn plain_words_split_on_whitespace() {
        let parsed = parse_line("echo Hello World").unwrap();
        assert_eq!(words(&parsed), vec!["echo", "Hello", "World"]);
        assert!(parsed.redirect_out.is_none());
        assert!(parsed.redirect_in.is_none());
    }

    #[test]
    fn empty_line_is_empty_argv() {
        assert!(parse_line("").unwrap().argv.is_empty());
        assert!(parse_line("   \t ").unwrap().argv.is_empty());
    }

    #[test]
    fn redirect_out_stripped_from_argv() {
        let parsed = parse_line("echo Hello World > /tmp/x").unwrap();
        assert_eq!(words(&parsed), vec!["echo", "Hello", "World"]);
        assert_eq!(
            parsed.redirect_out,
            Some((String::from("/tmp/x"), false))
        );
    }

    #[test]
    fn redirect_append_detected() {
        let parsed = parse_line("echo more >> /tmp/x").unwrap();
        assert_eq!(parsed.redirect_out, Some((String::from("/tmp/x"), true)));
    }

    #[test]
    fn redirect_parse_commutes_with_whitespace() {
        let tight = parse_line("echo a > f").unwrap();
        let loose = parse_line("  echo   a   >    f  ").unwrap();
        assert_eq!(tight, loose);
    }

    #[test]
    fn redirect_in_captured() {
        let parsed = parse_line("cat < /etc/welcome.txt").unwrap();
        assert_eq!(words(&parsed), vec!["cat"]);
        assert_eq!(parsed.redirect_in, Some(String::from("/etc/welcome.txt")));
    }

    #[test]
    fn quotes_preserve_whitespace() {
        let parsed = parse_line("echo \"hello   world\" tail").unwrap();
        assert_eq!(words(&parsed), vec!["echo", "hello   world", "tail"]);
    }

    #[test]
    fn quoted_operator_is_a_literal() {
        let parsed = parse_line("echo \">\" done").unwrap();
        assert_eq!(words(&parsed), vec!["echo", ">", "done"]);
        assert!(parsed.redirect_out.is_none());
    }

    #[test]
    fn empty_quotes_make_an_empty_argument() {
        let parsed = parse_line("echo \"\" x").unwrap();
        assert_eq!(words(&parsed), vec!["echo", "", "x"]);
    }

    #[test]
    fn unterminated_quote_rejected() {
        assert_eq!(
            parse_line("echo \"oops").unwrap_err(),
            ParseError::UnterminatedQuote
        );
    }

    #[test]
    fn missing_target_rejected() {
        assert_eq!(
            parse_line("echo x >").unwrap_err(),
            ParseError::MissingRedirectTarget
        );
        assert_eq!(
            parse_line("cat <").unwrap_err(),
            ParseError::MissingRedirectTarget
        );
    }

    #[test]
    fn pipes_are_reserved() {
        assert_eq!(
            parse_line("ls | wc").unwrap_err(),
            ParseError::PipesUnsupported
        );
    }

    #[test]
    fn redirect_target_then_more_argv() {
        // Tokens after the target still land in argv.
        let parsed = parse_line("cmd > out tail").unwrap();
        assert_eq!(words(&parsed), vec!["cmd", "tail"]);
        assert_eq!(parsed.redirect_out, Some((String::from("out"), false)));
    }
}
