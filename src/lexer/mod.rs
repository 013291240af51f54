mod lexmap;
mod token;
mod tokens;

pub use lexmap::*;
pub use token::*;
pub use tokens::*;

use lazy_static::lazy_static;
use log::trace;
use std::{
    collections::HashSet,
    error::Error,
    fmt::Display,
    fs,
    path::{Path, PathBuf},
};

/// The file extension appended to import names.
pub const EXTENSION_SRC: &str = "li";

#[macro_export]
macro_rules! terminal {
    ($map:ident, $name:ident, $value:expr) => {
        $map.insert($value, Token::$name);
    };
}

lazy_static! {
    static ref LEX_MAP: LexMap = {
        let mut m = LexMap::default();

        terminal!(m, Import, "import");
        terminal!(m, Plus, "+");
        terminal!(m, Minus, "-");
        terminal!(m, Times, "*");
        terminal!(m, Divide, "/");
        terminal!(m, And, "and");
        terminal!(m, Or, "or");
        terminal!(m, Not, "not");
        terminal!(m, Greater, ">");
        terminal!(m, Lesser, "<");
        terminal!(m, Same, "==");
        terminal!(m, Assign, "=");
        terminal!(m, Different, "!=");
        terminal!(m, Comma, ",");
        terminal!(m, Period, ".");
        terminal!(m, Colon, ":");
        terminal!(m, LeftParen, "(");
        terminal!(m, RightParen, ")");
        terminal!(m, LeftSquare, "[");
        terminal!(m, RightSquare, "]");
        terminal!(m, True, "true");
        terminal!(m, False, "false");
        terminal!(m, If, "if");
        terminal!(m, Then, "then");
        terminal!(m, Else, "else");
        terminal!(m, End, "end");
        terminal!(m, While, "while");
        terminal!(m, Function, "function");
        terminal!(m, Return, "return");

        m
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError(pub String);

pub type LexResult<T> = Result<T, LexError>;

impl Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl Error for LexError {}

/// Lex a source buffer. `folder` is the directory import names resolve
/// against; each compilation keeps its own set of already-imported paths.
pub fn lex(input: &[u8], folder: &Path) -> LexResult<Vec<Token>> {
    let mut imports = HashSet::new();
    Lexer::new(input, folder.to_path_buf(), &mut imports).lex()
}

fn is_identifier_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

fn is_identifier_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

#[derive(Debug)]
pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
    tokens: Vec<Token>,
    folder: PathBuf,
    imports: &'a mut HashSet<PathBuf>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a [u8], folder: PathBuf, imports: &'a mut HashSet<PathBuf>) -> Self {
        Self {
            input,
            pos: 0,
            tokens: vec![],
            folder,
            imports,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<u8> {
        self.input.get(self.pos + n).copied()
    }

    fn next(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn next_if(&mut self, func: impl FnOnce(u8) -> bool) -> Option<u8> {
        match self.peek() {
            Some(byte) if func(byte) => self.next(),
            _ => None,
        }
    }

    fn eat_whitespace(&mut self) {
        while self.next_if(|byte| byte.is_ascii_whitespace()).is_some() {}
    }

    pub fn lex(mut self) -> LexResult<Vec<Token>> {
        loop {
            self.eat_whitespace();

            let Some(next) = self.peek() else {
                break;
            };

            match next {
                // statement separators carry no meaning of their own
                b';' => {
                    self.pos += 1;
                }
                b'#' => self.lex_line_comment(),
                b'/' if self.peek_at(1) == Some(b'*') => self.lex_block_comment()?,
                b'\'' => self.lex_string()?,
                byte if is_identifier_start(byte) => self.lex_alphanumeric()?,
                byte if byte.is_ascii_digit() => self.lex_numeric(),
                _ => self.lex_special()?,
            };
        }

        Ok(self.tokens)
    }

    fn lex_line_comment(&mut self) {
        while self.next_if(|byte| byte != b'\n').is_some() {}
    }

    fn lex_block_comment(&mut self) -> LexResult<()> {
        self.pos += 2;
        loop {
            match self.peek() {
                Some(b'*') if self.peek_at(1) == Some(b'/') => {
                    self.pos += 2;
                    return Ok(());
                }
                Some(_) => self.pos += 1,
                None => return Err(LexError("unterminated block comment".into())),
            }
        }
    }

    fn lex_special(&mut self) -> LexResult<()> {
        let mut stack = vec![];

        while let Some(next) = self.next() {
            stack.push(next);

            let can_read_next = self
                .peek()
                .map(|byte| {
                    let mut probe = stack.clone();
                    probe.push(byte);
                    LEX_MAP.can_match(&probe)
                })
                .unwrap_or(false);

            if can_read_next {
                continue;
            }

            let Some(current_match) = LEX_MAP.get(&stack) else {
                return Err(LexError(format!(
                    "unknown character '{}'",
                    String::from_utf8_lossy(&stack)
                )));
            };

            self.tokens.push(current_match);
            break;
        }

        Ok(())
    }

    fn lex_alphanumeric(&mut self) -> LexResult<()> {
        let mut stack = vec![];

        while let Some(next) = self.next_if(is_identifier_byte) {
            stack.push(next);
        }

        match LEX_MAP.get(&stack) {
            Some(Token::Import) => self.import()?,
            Some(token) => self.tokens.push(token),
            None => self.tokens.push(Token::Identifier(stack)),
        }

        Ok(())
    }

    fn lex_numeric(&mut self) {
        let mut value: i32 = 0;

        while let Some(next) = self.next_if(|byte| byte.is_ascii_digit()) {
            value = value.wrapping_mul(10).wrapping_add((next - b'0') as i32);
        }

        self.tokens.push(Token::Number(value));
    }

    fn lex_string(&mut self) -> LexResult<()> {
        self.pos += 1;
        let mut string = vec![];

        loop {
            match self.next() {
                Some(b'\'') => break,
                Some(b'\\') => {
                    let escaped = match self.next() {
                        Some(b'n') => b'\n',
                        Some(b't') => b'\t',
                        Some(b'\'') => b'\'',
                        Some(other) => {
                            return Err(LexError(format!(
                                "unknown escape '\\{}'",
                                other as char
                            )))
                        }
                        None => return Err(LexError("unterminated string".into())),
                    };
                    string.push(escaped);
                }
                Some(byte) => string.push(byte),
                None => return Err(LexError("unterminated string".into())),
            }
        }

        self.tokens.push(Token::Str(string));
        Ok(())
    }

    /// `import <name>`: resolve the name against the importing file's
    /// directory, append the source extension, and splice the imported
    /// file's tokens into the stream. A path is only ever imported once.
    fn import(&mut self) -> LexResult<()> {
        self.eat_whitespace();

        let mut name = vec![];
        while let Some(byte) = self.next_if(|byte| !byte.is_ascii_whitespace() && byte != b'\'') {
            name.push(byte);
        }
        if name.is_empty() {
            return Err(LexError("import without a module name".into()));
        }

        let mut path = self.folder.join(String::from_utf8_lossy(&name).as_ref());
        path.set_extension(EXTENSION_SRC);
        let path = fs::canonicalize(&path)
            .map_err(|_| LexError(format!("could not import '{}'", path.to_string_lossy())))?;

        if !self.imports.insert(path.clone()) {
            trace!("skipping already imported '{}'", path.to_string_lossy());
            return Ok(());
        }

        let content = fs::read(&path)
            .map_err(|_| LexError(format!("could not import '{}'", path.to_string_lossy())))?;
        let folder = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.folder.clone());

        trace!("importing '{}'", path.to_string_lossy());
        let imported = Lexer::new(&content, folder, self.imports).lex()?;
        self.tokens.extend(imported);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn lex_str(input: &str) -> LexResult<Vec<Token>> {
        lex(input.as_bytes(), &PathBuf::from("."))
    }

    #[test]
    fn test_lex_alphabetic_id() {
        assert_eq!(
            Ok(vec![Token::Identifier(b"letter".to_vec())]),
            lex_str("letter")
        )
    }

    #[test]
    fn test_lex_numeric() {
        assert_eq!(Ok(vec![Token::Number(1337)]), lex_str("1337"))
    }

    #[test]
    fn test_lex_keyword_prefix_is_identifier() {
        assert_eq!(
            Ok(vec![Token::Identifier(b"iffy".to_vec())]),
            lex_str("iffy")
        );
        assert_eq!(Ok(vec![Token::If]), lex_str("if"));
    }

    #[test]
    fn test_lex_function() {
        assert_eq!(
            Ok(vec![
                Token::Function,
                Token::LeftParen,
                Token::RightParen,
                Token::End,
            ]),
            lex_str("function () end")
        );
    }

    #[test]
    fn test_lex_operators_longest_match() {
        assert_eq!(
            Ok(vec![
                Token::Identifier(b"a".to_vec()),
                Token::Same,
                Token::Identifier(b"b".to_vec()),
                Token::Assign,
                Token::Number(1),
                Token::Different,
                Token::Number(2),
            ]),
            lex_str("a == b = 1 != 2")
        );
    }

    #[test]
    fn test_lex_string_with_escapes() {
        assert_eq!(
            Ok(vec![Token::Str(b"a\n\t'b".to_vec())]),
            lex_str("'a\\n\\t\\'b'")
        );
    }

    #[test]
    fn test_lex_unknown_escape_is_fatal() {
        assert_eq!(
            Err(LexError("unknown escape '\\x'".into())),
            lex_str("'a\\xb'")
        );
    }

    #[test]
    fn test_lex_unknown_character_is_fatal() {
        assert!(lex_str("a ? b").is_err());
        assert!(lex_str("a @ b").is_err());
    }

    #[test]
    fn test_lex_semicolons_are_separators() {
        assert_eq!(
            Ok(vec![Token::Number(1), Token::Number(2)]),
            lex_str("1; 2")
        );
    }

    #[test]
    fn test_lex_comments_are_elided() {
        assert_eq!(
            Ok(vec![Token::Number(1), Token::Number(2)]),
            lex_str("1 # line comment\n/* block\ncomment */ 2")
        );
    }

    #[test]
    fn test_lex_division_is_not_a_comment() {
        assert_eq!(
            Ok(vec![Token::Number(1), Token::Divide, Token::Number(2)]),
            lex_str("1 / 2")
        );
    }

    #[test]
    fn test_lex_round_trip() {
        let source = "x = [1, 2.5, 'a\\nb'] if x > 1 then sys.print(x) else f(x, 2) end";
        let tokens = lex_str(source).unwrap();
        let printed = tokens
            .iter()
            .map(Token::to_source)
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(Ok(tokens), lex_str(&printed));
    }
}
