//! Static pre-scan of script source.
//!
//! Walks the token stream (skipping string literals and comments) and rejects
//! blocked identifiers and imports of modules outside the allow-list.

use super::ScriptError;

/// Identifiers scripts may never reference.
pub const BLOCKED_NAMES: &[&str] = &[
    "eval",
    "Fn",
    "call",
    "curry",
    "exec",
    "compile",
    "__import__",
    "open",
    "file",
    "input",
    "globals",
    "locals",
    "vars",
    "getattr",
    "setattr",
    "delattr",
    "exit",
    "quit",
    "is_def_var",
    "is_def_fn",
    "system",
    "spawn",
    "socket",
];

/// Modules scripts may import.
pub const ALLOWED_IMPORTS: &[&str] = &["hash", "pack", "base64", "json", "time", "path", "crypto"];

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    /// Code embedded in a backtick string through `${...}`.
    Interpolated(Vec<String>),
    Other,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
        }
    }

    fn skip_line_comment(&mut self) {
        for c in self.chars.by_ref() {
            if c == '\n' {
                break;
            }
        }
    }

    // Block comments nest.
    fn skip_block_comment(&mut self) {
        let mut depth = 1;
        while let Some(c) = self.chars.next() {
            match c {
                '/' if self.chars.peek() == Some(&'*') => {
                    self.chars.next();
                    depth += 1;
                }
                '*' if self.chars.peek() == Some(&'/') => {
                    self.chars.next();
                    depth -= 1;
                    if depth == 0 {
                        return;
                    }
                }
                _ => {}
            }
        }
    }

    fn read_quoted(&mut self, quote: char) -> String {
        let mut out = String::new();
        while let Some(c) = self.chars.next() {
            match c {
                '\\' => {
                    if let Some(escaped) = self.chars.next() {
                        out.push(escaped);
                    }
                }
                c if c == quote => break,
                c => out.push(c),
            }
        }
        out
    }

    // Backtick strings are raw: no escapes, but `${...}` holds code.
    fn read_backtick(&mut self) -> Vec<String> {
        let mut embedded = Vec::new();
        while let Some(c) = self.chars.next() {
            match c {
                '`' => break,
                '$' if self.chars.peek() == Some(&'{') => {
                    self.chars.next();
                    let mut depth = 1;
                    let mut code = String::new();
                    for c in self.chars.by_ref() {
                        match c {
                            '{' => depth += 1,
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                        code.push(c);
                    }
                    embedded.push(code);
                }
                _ => {}
            }
        }
        embedded
    }

    fn read_ident(&mut self, first: char) -> String {
        let mut out = String::from(first);
        while let Some(&c) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                out.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        out
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        loop {
            let c = self.chars.next()?;
            match c {
                c if c.is_whitespace() => continue,
                '/' if self.chars.peek() == Some(&'/') => self.skip_line_comment(),
                '/' if self.chars.peek() == Some(&'*') => {
                    self.chars.next();
                    self.skip_block_comment();
                }
                '"' => return Some(Token::Str(self.read_quoted('"'))),
                '`' => return Some(Token::Interpolated(self.read_backtick())),
                '\'' => {
                    self.read_quoted('\'');
                    return Some(Token::Other);
                }
                c if c.is_alphabetic() || c == '_' => return Some(Token::Ident(self.read_ident(c))),
                _ => return Some(Token::Other),
            }
        }
    }
}

/// Reject blocked identifiers and disallowed imports.
pub fn scan(source: &str) -> Result<(), ScriptError> {
    let mut tokens = Lexer::new(source);
    while let Some(token) = tokens.next() {
        let ident = match token {
            Token::Ident(ident) => ident,
            Token::Interpolated(embedded) => {
                for code in embedded {
                    scan(&code)?;
                }
                continue;
            }
            _ => continue,
        };
        if BLOCKED_NAMES.contains(&ident.as_str()) {
            return Err(ScriptError::Blocked(ident));
        }
        if ident == "import" {
            match tokens.next() {
                Some(Token::Str(module)) if ALLOWED_IMPORTS.contains(&module.as_str()) => {}
                Some(Token::Str(module)) => return Err(ScriptError::ImportNotAllowed(module)),
                _ => {
                    return Err(ScriptError::ImportNotAllowed(
                        "<dynamic import>".to_string(),
                    ))
                }
            }
        }
    }
    Ok(())
}
