//! Tokenizer for the snippet language
//!
//! The lexer never fails: characters it does not understand become
//! [`Token::Unknown`] and an unclosed string becomes [`Token::Unterminated`],
//! both of which the parser rejects. This lets the policy scan tokens for
//! module references before the grammar check runs.

/// Lexical token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Integer literal
    Int(i64),
    /// Float literal
    Float(f64),
    /// String literal, escapes resolved
    Str(String),
    /// Identifier
    Ident(String),

    // keywords
    /// `import`
    Import,
    /// `let`
    Let,
    /// `true`
    True,
    /// `false`
    False,
    /// `null`
    Null,
    /// `and`
    And,
    /// `or`
    Or,
    /// `not`
    Not,

    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `==`
    EqEq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `=`
    Assign,
    /// `.`
    Dot,
    /// `,`
    Comma,
    /// `:`
    Colon,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `{`
    LBrace,
    /// `}`
    RBrace,

    /// Statement separator: a newline outside brackets or `;`
    Separator,

    /// Character outside the language
    Unknown(char),
    /// String literal with no closing quote
    Unterminated,
}

/// A token and the 1-based line it starts on
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    /// The token
    pub token: Token,
    /// Line it starts on
    pub line: usize,
}

/// Split source text into tokens
#[must_use]
pub fn tokenize(source: &str) -> Vec<Spanned> {
    let chars: Vec<char> = source.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    let mut line = 1;
    // newlines inside (), [] and {} do not end a statement
    let mut depth: usize = 0;

    let push = |out: &mut Vec<Spanned>, token: Token, line: usize| out.push(Spanned { token, line });

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                if depth == 0 {
                    push(&mut out, Token::Separator, line);
                }
                line += 1;
                i += 1;
            }
            ';' => {
                push(&mut out, Token::Separator, line);
                i += 1;
            }
            c if c.is_whitespace() => i += 1,
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '"' | '\'' => {
                let quote = c;
                let start_line = line;
                let mut text = String::new();
                i += 1;
                let mut closed = false;
                while i < chars.len() {
                    match chars[i] {
                        ch if ch == quote => {
                            closed = true;
                            i += 1;
                            break;
                        }
                        '\\' if i + 1 < chars.len() => {
                            let escaped = chars[i + 1];
                            text.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => other,
                            });
                            i += 2;
                        }
                        '\n' => break,
                        ch => {
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                if closed {
                    push(&mut out, Token::Str(text), start_line);
                } else {
                    push(&mut out, Token::Unterminated, start_line);
                }
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut is_float = false;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '_') {
                    i += 1;
                }
                if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                    is_float = true;
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        is_float = true;
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().filter(|&&ch| ch != '_').collect();
                let token = if is_float {
                    text.parse().map(Token::Float).unwrap_or(Token::Unknown(c))
                } else {
                    text.parse().map(Token::Int).unwrap_or(Token::Unknown(c))
                };
                push(&mut out, token, line);
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let token = match word.as_str() {
                    "import" => Token::Import,
                    "let" => Token::Let,
                    "true" | "True" => Token::True,
                    "false" | "False" => Token::False,
                    "null" | "None" => Token::Null,
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word),
                };
                push(&mut out, token, line);
            }
            _ => {
                let next = chars.get(i + 1).copied();
                let (token, width) = match (c, next) {
                    ('=', Some('=')) => (Token::EqEq, 2),
                    ('!', Some('=')) => (Token::NotEq, 2),
                    ('<', Some('=')) => (Token::Le, 2),
                    ('>', Some('=')) => (Token::Ge, 2),
                    ('&', Some('&')) => (Token::And, 2),
                    ('|', Some('|')) => (Token::Or, 2),
                    ('=', _) => (Token::Assign, 1),
                    ('<', _) => (Token::Lt, 1),
                    ('>', _) => (Token::Gt, 1),
                    ('+', _) => (Token::Plus, 1),
                    ('-', _) => (Token::Minus, 1),
                    ('*', _) => (Token::Star, 1),
                    ('/', _) => (Token::Slash, 1),
                    ('%', _) => (Token::Percent, 1),
                    ('.', _) => (Token::Dot, 1),
                    (',', _) => (Token::Comma, 1),
                    (':', _) => (Token::Colon, 1),
                    ('(', _) | ('[', _) | ('{', _) => {
                        depth += 1;
                        let t = match c {
                            '(' => Token::LParen,
                            '[' => Token::LBracket,
                            _ => Token::LBrace,
                        };
                        (t, 1)
                    }
                    (')', _) | (']', _) | ('}', _) => {
                        depth = depth.saturating_sub(1);
                        let t = match c {
                            ')' => Token::RParen,
                            ']' => Token::RBracket,
                            _ => Token::RBrace,
                        };
                        (t, 1)
                    }
                    (other, _) => (Token::Unknown(other), 1),
                };
                push(&mut out, token, line);
                i += width;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokens(src: &str) -> Vec<Token> {
        tokenize(src).into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn numbers_strings_and_keywords() {
        assert_eq!(
            tokens("let x = 1_000 + 2.5e1 # note\n'a\\'b'"),
            vec![
                Token::Let,
                Token::Ident("x".into()),
                Token::Assign,
                Token::Int(1000),
                Token::Plus,
                Token::Float(25.0),
                Token::Separator,
                Token::Str("a'b".into()),
            ]
        );
    }

    #[test]
    fn newlines_inside_brackets_are_not_separators() {
        let t = tokens("stats.mean(\n  xs,\n)\n");
        assert_eq!(t.iter().filter(|t| **t == Token::Separator).count(), 1);
    }

    #[test]
    fn unknown_and_unterminated_are_tokens() {
        assert_eq!(tokens("a @ b"), vec![
            Token::Ident("a".into()),
            Token::Unknown('@'),
            Token::Ident("b".into()),
        ]);
        assert_eq!(tokens("\"open"), vec![Token::Unterminated]);
    }

    #[test]
    fn line_numbers_track_newlines() {
        let spans = tokenize("1\n\n3");
        assert_eq!(spans.last().unwrap().line, 3);
    }
}
