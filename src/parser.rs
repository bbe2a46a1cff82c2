use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    RedirOut,
    RedirIn,
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Jobs,
    Quit,
    Fg,
    Bg,
}

impl Builtin {
    fn classify(name: &str) -> Option<Self> {
        match name {
            "jobs" => Some(Builtin::Jobs),
            "quit" => Some(Builtin::Quit),
            "fg" => Some(Builtin::Fg),
            "bg" => Some(Builtin::Bg),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub argv: Vec<String>,
    pub infile: Option<PathBuf>,
    pub outfile: Option<PathBuf>,
    pub builtin: Option<Builtin>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    Empty,
    Foreground(Command),
    Background(Command),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Error: unmatched {0}")]
    UnmatchedQuote(char),
    #[error("Error: Ambiguous I/O redirection")]
    AmbiguousRedirection,
    #[error("Error: must provide file name for redirection")]
    MissingRedirectionTarget,
    #[error("Error: & must come at the end of the command")]
    MisplacedBackground,
    #[error("Error: redirection without a command")]
    MissingCommand,
}

/// Splits a line into words and operators. Quotes group text into one word
/// and make `<`, `>` and `&` literal.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some(q) if q == c => break,
                        Some(other) => word.push(other),
                        None => return Err(ParseError::UnmatchedQuote(c)),
                    }
                }
            }
            '<' | '>' | '&' => {
                if in_word {
                    tokens.push(Token::Word(std::mem::take(&mut word)));
                    in_word = false;
                }
                tokens.push(match c {
                    '<' => Token::RedirIn,
                    '>' => Token::RedirOut,
                    _ => Token::Background,
                });
            }
            c if c.is_whitespace() => {
                if in_word {
                    tokens.push(Token::Word(std::mem::take(&mut word)));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }
    if in_word {
        tokens.push(Token::Word(word));
    }
    Ok(tokens)
}

/// Parses one command line.
pub fn parseline(line: &str) -> Result<Parsed, ParseError> {
    let mut tokens = tokenize(line)?;

    let background = tokens.last() == Some(&Token::Background);
    if background {
        tokens.pop();
    }

    let mut argv = Vec::new();
    let mut infile = None;
    let mut outfile = None;
    let mut iter = tokens.into_iter();
    while let Some(token) = iter.next() {
        match token {
            Token::Word(w) => argv.push(w),
            Token::RedirIn | Token::RedirOut => {
                let target = match iter.next() {
                    Some(Token::Word(path)) => PathBuf::from(path),
                    _ => return Err(ParseError::MissingRedirectionTarget),
                };
                let slot = if token == Token::RedirIn { &mut infile } else { &mut outfile };
                if slot.replace(target).is_some() {
                    return Err(ParseError::AmbiguousRedirection);
                }
            }
            Token::Background => return Err(ParseError::MisplacedBackground),
        }
    }

    if argv.is_empty() {
        if infile.is_some() || outfile.is_some() {
            return Err(ParseError::MissingCommand);
        }
        return Ok(Parsed::Empty);
    }

    let builtin = Builtin::classify(&argv[0]);
    let command = Command {
        argv,
        infile,
        outfile,
        builtin,
    };
    Ok(if background {
        Parsed::Background(command)
    } else {
        Parsed::Foreground(command)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(parsed: Parsed) -> Command {
        match parsed {
            Parsed::Foreground(c) | Parsed::Background(c) => c,
            Parsed::Empty => panic!("expected a command"),
        }
    }

    #[test]
    fn blank_lines_are_empty() {
        assert_eq!(parseline(""), Ok(Parsed::Empty));
        assert_eq!(parseline("   \t "), Ok(Parsed::Empty));
        assert_eq!(parseline("&"), Ok(Parsed::Empty));
    }

    #[test]
    fn foreground_command() {
        let parsed = parseline("/bin/echo hello world").unwrap();
        assert!(matches!(parsed, Parsed::Foreground(_)));
        let cmd = command(parsed);
        assert_eq!(cmd.argv, ["/bin/echo", "hello", "world"]);
        assert_eq!(cmd.builtin, None);
    }

    #[test]
    fn trailing_ampersand_backgrounds() {
        assert!(matches!(parseline("sleep 5 &").unwrap(), Parsed::Background(_)));
        let cmd = command(parseline("sleep 5&").unwrap());
        assert_eq!(cmd.argv, ["sleep", "5"]);
    }

    #[test]
    fn ampersand_elsewhere_is_an_error() {
        assert_eq!(parseline("sleep & 5"), Err(ParseError::MisplacedBackground));
    }

    #[test]
    fn redirections() {
        let cmd = command(parseline("cat < in.txt > out.txt").unwrap());
        assert_eq!(cmd.argv, ["cat"]);
        assert_eq!(cmd.infile, Some(PathBuf::from("in.txt")));
        assert_eq!(cmd.outfile, Some(PathBuf::from("out.txt")));

        let cmd = command(parseline("jobs>listing").unwrap());
        assert_eq!(cmd.builtin, Some(Builtin::Jobs));
        assert_eq!(cmd.outfile, Some(PathBuf::from("listing")));
    }

    #[test]
    fn redirection_errors() {
        assert_eq!(parseline("cat <"), Err(ParseError::MissingRedirectionTarget));
        assert_eq!(parseline("cat > &"), Err(ParseError::MissingRedirectionTarget));
        assert_eq!(parseline("cat > a > b"), Err(ParseError::AmbiguousRedirection));
        assert_eq!(parseline("> out"), Err(ParseError::MissingCommand));
    }

    #[test]
    fn quotes_group_and_escape_operators() {
        let cmd = command(parseline("/bin/sh -c 'echo a > b & wait' \"x y\" ''").unwrap());
        assert_eq!(cmd.argv, ["/bin/sh", "-c", "echo a > b & wait", "x y", ""]);
        assert_eq!(cmd.outfile, None);
        assert_eq!(parseline("echo 'oops"), Err(ParseError::UnmatchedQuote('\'')));
    }

    #[test]
    fn builtins_are_classified() {
        for (line, builtin) in [
            ("jobs", Builtin::Jobs),
            ("quit", Builtin::Quit),
            ("fg %1", Builtin::Fg),
            ("bg 42", Builtin::Bg),
        ] {
            assert_eq!(command(parseline(line).unwrap()).builtin, Some(builtin));
        }
        assert_eq!(command(parseline("/bin/jobs").unwrap()).builtin, None);
    }
}
