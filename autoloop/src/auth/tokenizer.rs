//! Shell-like lexer for command authorization.
//!
//! This is not a shell parser. It recognizes just enough grammar (quotes,
//! escapes, chain/pipe operators, redirects) to find the programs a command
//! string would run. It never fails: malformed input such as an unterminated
//! quote degrades to a literal word.

/// Kind of lexical token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    /// `|`, `||`, `&&`, `;`, or a lone `&`.
    Operator,
    /// `>`, `>>`, `<`, `<<`, `<&`, `>&`, `&>`, optionally prefixed by a file descriptor.
    Redirect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    fn word(text: String) -> Self {
        Self {
            kind: TokenKind::Word,
            text,
        }
    }

    fn operator(text: &str) -> Self {
        Self {
            kind: TokenKind::Operator,
            text: text.to_string(),
        }
    }

    fn redirect(text: String) -> Self {
        Self {
            kind: TokenKind::Redirect,
            text,
        }
    }

    pub fn is_word(&self) -> bool {
        self.kind == TokenKind::Word
    }
}

/// Accumulates the current word. `started` tracks quoted empty strings (`''`).
#[derive(Default)]
struct WordBuf {
    text: String,
    started: bool,
}

impl WordBuf {
    fn push(&mut self, ch: char) {
        self.text.push(ch);
        self.started = true;
    }

    fn start(&mut self) {
        self.started = true;
    }

    fn flush(&mut self, tokens: &mut Vec<Token>) {
        if self.started {
            tokens.push(Token::word(std::mem::take(&mut self.text)));
            self.started = false;
        }
    }

    /// True when the pending word is a bare file descriptor number like `2`.
    fn is_fd_prefix(&self) -> bool {
        !self.text.is_empty() && self.text.chars().all(|c| c.is_ascii_digit())
    }
}

/// Split `input` into words, operators and redirects.
pub fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word = WordBuf::default();
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\n' => end_line(&mut word, &mut tokens),
            '\r' if chars.peek() == Some(&'\n') => {
                chars.next();
                end_line(&mut word, &mut tokens);
            }
            c if c.is_whitespace() => word.flush(&mut tokens),
            '\'' => {
                word.start();
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == '\'' {
                        closed = true;
                        break;
                    }
                    word.push(next);
                }
                if !closed {
                    // Unterminated quote: keep what we have as a literal word.
                    word.flush(&mut tokens);
                }
            }
            '"' => {
                word.start();
                let mut closed = false;
                while let Some(next) = chars.next() {
                    match next {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.peek() {
                            Some(&escaped) if matches!(escaped, '"' | '\\' | '$' | '`') => {
                                chars.next();
                                word.push(escaped);
                            }
                            _ => word.push('\\'),
                        },
                        other => word.push(other),
                    }
                }
                if !closed {
                    word.flush(&mut tokens);
                }
            }
            '\\' => match chars.next() {
                Some(escaped) => word.push(escaped),
                None => word.push('\\'),
            },
            '|' => {
                word.flush(&mut tokens);
                if chars.peek() == Some(&'|') {
                    chars.next();
                    tokens.push(Token::operator("||"));
                } else {
                    tokens.push(Token::operator("|"));
                }
            }
            '&' => {
                word.flush(&mut tokens);
                match chars.peek() {
                    Some(&'&') => {
                        chars.next();
                        tokens.push(Token::operator("&&"));
                    }
                    Some(&'>') => {
                        chars.next();
                        let mut text = "&>".to_string();
                        if chars.peek() == Some(&'>') {
                            chars.next();
                            text.push('>');
                        }
                        tokens.push(Token::redirect(text));
                    }
                    _ => tokens.push(Token::operator("&")),
                }
            }
            ';' => {
                word.flush(&mut tokens);
                tokens.push(Token::operator(";"));
            }
            '>' | '<' => {
                let mut text = String::new();
                if word.is_fd_prefix() {
                    text = std::mem::take(&mut word.text);
                    word.started = false;
                } else {
                    word.flush(&mut tokens);
                }
                text.push(ch);
                if let Some(&next) = chars.peek()
                    && (next == ch || next == '&')
                {
                    chars.next();
                    text.push(next);
                }
                tokens.push(Token::redirect(text));
            }
            other => word.push(other),
        }
    }
    word.flush(&mut tokens);
    tokens
}

/// An unquoted newline ends a command just like `;`.
fn end_line(word: &mut WordBuf, tokens: &mut Vec<Token>) {
    word.flush(tokens);
    if tokens.last().is_some_and(|t| t.kind != TokenKind::Operator) {
        tokens.push(Token::operator(";"));
    }
}

/// Convenience: the text of every word token.
pub fn words(tokens: &[Token]) -> Vec<&str> {
    tokens
        .iter()
        .filter(|t| t.is_word())
        .map(|t| t.text.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(input: &str) -> Vec<(TokenKind, String)> {
        tokenize(input)
            .into_iter()
            .map(|t| (t.kind, t.text))
            .collect()
    }

    #[test]
    fn empty_and_whitespace_yield_no_tokens() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   \t\n ").is_empty());
    }

    #[test]
    fn plain_words_round_trip() {
        let vocabulary = [
            "ls", "git", "commit", "-m", "message", "42", "v1.2.3", "./bin/run", "--flag",
            "src/lib.rs", "a-b_c", "0",
        ];
        let mut inputs = vocabulary.iter().map(|w| (*w).to_string()).collect::<Vec<_>>();
        for len in 2..=vocabulary.len() {
            for start in 0..vocabulary.len() {
                let picked: Vec<&str> = (0..len)
                    .map(|i| vocabulary[(start + i * 5) % vocabulary.len()])
                    .collect();
                inputs.push(picked.join(" "));
            }
        }
        for input in &inputs {
            let tokens = tokenize(input);
            assert!(tokens.iter().all(Token::is_word), "{input}");
            assert_eq!(words(&tokens).join(" "), *input);
        }
    }

    #[test]
    fn unquoted_newline_separates_commands() {
        for input in ["echo ok\ndocker ps", "echo ok\r\ndocker ps"] {
            assert_eq!(
                texts(input),
                vec![
                    (TokenKind::Word, "echo".to_string()),
                    (TokenKind::Word, "ok".to_string()),
                    (TokenKind::Operator, ";".to_string()),
                    (TokenKind::Word, "docker".to_string()),
                    (TokenKind::Word, "ps".to_string()),
                ],
                "{input:?}"
            );
        }
        // Leading, trailing and repeated newlines add nothing to split on.
        assert_eq!(texts("\n\nls\n\n"), texts("ls;"));
    }

    #[test]
    fn quoted_newline_stays_in_word() {
        let tokens = tokenize("echo \"a\nb\" 'c\nd'");
        assert_eq!(words(&tokens), vec!["echo", "a\nb", "c\nd"]);
    }

    #[test]
    fn double_and_single_quotes_make_one_word() {
        for input in ["echo \"hello world\"", "echo 'hello world'"] {
            let tokens = tokenize(input);
            assert_eq!(tokens.len(), 2, "{input}");
            assert!(tokens.iter().all(Token::is_word));
            assert_eq!(tokens[1].text, "hello world");
        }
    }

    #[test]
    fn single_quotes_do_not_process_escapes() {
        let tokens = tokenize(r"echo 'a\nb'");
        assert_eq!(tokens[1].text, r"a\nb");
    }

    #[test]
    fn double_quotes_honor_escaped_quote() {
        let tokens = tokenize(r#"echo "say \"hi\"""#);
        assert_eq!(tokens[1].text, r#"say "hi""#);
    }

    #[test]
    fn backslash_escapes_next_char_outside_quotes() {
        let tokens = tokenize(r"touch my\ file");
        assert_eq!(words(&tokens), vec!["touch", "my file"]);
    }

    #[test]
    fn operators_are_recognized() {
        let got = texts("a && b || c | d ; e & f");
        let ops: Vec<&str> = got
            .iter()
            .filter(|(kind, _)| *kind == TokenKind::Operator)
            .map(|(_, text)| text.as_str())
            .collect();
        assert_eq!(ops, vec!["&&", "||", "|", ";", "&"]);
    }

    #[test]
    fn operators_split_without_whitespace() {
        assert_eq!(
            words(&tokenize("ls&&rm -rf x")),
            vec!["ls", "rm", "-rf", "x"]
        );
    }

    #[test]
    fn redirects_are_recognized() {
        let got = texts("cat < in > out >> log 2>&1 << EOF");
        let redirects: Vec<&str> = got
            .iter()
            .filter(|(kind, _)| *kind == TokenKind::Redirect)
            .map(|(_, text)| text.as_str())
            .collect();
        assert_eq!(redirects, vec!["<", ">", ">>", "2>&", "<<"]);
    }

    #[test]
    fn unterminated_quote_degrades_to_literal() {
        let tokens = tokenize("echo 'oops");
        assert_eq!(words(&tokens), vec!["echo", "oops"]);
    }

    #[test]
    fn empty_quotes_produce_empty_word() {
        let tokens = tokenize("echo ''");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].text, "");
    }
}
