//! A direct `Peekable<Chars>` scanner over the surface syntax: `#` line
//! comments, the four standalone punctuation tokens `( ) @ =`, double-quoted
//! strings with `\`-escape, and everything else (identifiers, numbers,
//! `{`/`}`, mnemonics) as whitespace-delimited words.

use crate::error::LoadError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub line: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, LoadError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut current = String::new();
    let mut line = 1usize;
    let mut token_line = 1usize;
    let mut in_comment = false;
    let mut in_string = false;
    let mut escape = false;

    macro_rules! flush {
        () => {
            if !current.is_empty() {
                tokens.push(Token { text: std::mem::take(&mut current), line: token_line });
            }
        };
    }

    while let Some(c) = chars.next() {
        if c == '\n' {
            line += 1;
            if in_comment {
                in_comment = false;
                continue;
            }
        }

        if in_comment {
            continue;
        }

        if !in_string && c == '#' {
            flush!();
            in_comment = true;
            continue;
        }

        if in_string {
            if escape {
                current.push(c);
                escape = false;
                continue;
            }
            if c == '\\' {
                escape = true;
                continue;
            }
            if c == '"' {
                tokens.push(Token { text: std::mem::take(&mut current), line: token_line });
                in_string = false;
                continue;
            }
            current.push(c);
            continue;
        }

        if c == '"' {
            flush!();
            in_string = true;
            token_line = line;
            continue;
        }

        if c.is_whitespace() {
            flush!();
            continue;
        }

        if matches!(c, '(' | ')' | '@' | '=') {
            flush!();
            tokens.push(Token { text: c.to_string(), line });
            continue;
        }

        if current.is_empty() {
            token_line = line;
        }
        current.push(c);
    }

    if in_string {
        return Err(LoadError::Syntax { line: token_line, message: "unterminated string literal".into() });
    }
    flush!();
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn splits_punctuation_without_whitespace() {
        let tokens = tokenize("func main()Int{ret}").unwrap();
        assert_eq!(words(&tokens), vec!["func", "main", "(", ")", "Int", "{", "ret", "}"]);
    }

    #[test]
    fn strips_line_comments() {
        let tokens = tokenize("ldint 1 # the answer\nret").unwrap();
        assert_eq!(words(&tokens), vec!["ldint", "1", "ret"]);
    }

    #[test]
    fn keeps_string_literal_as_one_token() {
        let tokens = tokenize(r#"ldstr "hello world""#).unwrap();
        assert_eq!(words(&tokens), vec!["ldstr", "hello world"]);
    }

    #[test]
    fn string_escape_keeps_quote_literal() {
        let tokens = tokenize(r#"ldstr "say \"hi\"""#).unwrap();
        assert_eq!(words(&tokens), vec!["ldstr", "say \"hi\""]);
    }
}
