pub mod ast;

pub use self::ast::*;

use std::{error::Error, fmt::Display};

use crate::lexer::{Token, Tokens};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    /// Index of the offending token in the stream, when known.
    pub position: Option<usize>,
}

impl ParseError {
    pub fn eof(item: &str) -> ParseError {
        ParseError {
            message: format!("hit end of input while parsing {item}"),
            position: None,
        }
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.position {
            Some(position) => {
                write!(f, "{message} (at token {position})", message = self.message)
            }
            None => f.write_str(&self.message),
        }
    }
}

impl Error for ParseError {}

/// Outcome of a single production: `Ok(None)` is a soft miss (the caller
/// backtracks and tries the next alternative), `Err` is a fatal parse error.
type Production = Result<Option<Ast>, ParseError>;

/// Parse a token stream into a statement list.
pub fn parse(tokens: Vec<Token>) -> Result<Ast, ParseError> {
    let mut parser = Parser::new(tokens);
    let statements = parser.statements()?;

    if parser.tokens.peek().is_some() {
        return Err(parser.error_here("unexpected token"));
    }

    Ok(statements)
}

pub struct Parser {
    tokens: Tokens<Token>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens: tokens.into(),
        }
    }

    fn error_here(&self, message: &str) -> ParseError {
        let position = self.tokens.get_index();
        match self.tokens.peek() {
            Some(token) => ParseError {
                message: format!("{message}, found '{token}'"),
                position: Some(position),
            },
            None => ParseError::eof(message),
        }
    }

    /// Consume the next token if it equals `token`.
    fn fetch(&mut self, token: &Token) -> bool {
        if self.tokens.peek().as_ref() == Some(token) {
            self.tokens.next();
            return true;
        }
        false
    }

    fn expect(&mut self, token: Token, context: &str) -> Result<(), ParseError> {
        if self.fetch(&token) {
            return Ok(());
        }
        Err(self.error_here(&format!("expected '{token}' {context}")))
    }

    /// Try alternatives in order, resetting the cursor after each miss.
    fn one_of(&mut self, parsers: &[fn(&mut Self) -> Production]) -> Production {
        let start = self.tokens.get_index();
        for parser in parsers {
            match parser(self)? {
                Some(node) => return Ok(Some(node)),
                None => self.tokens.set_index(start),
            }
        }
        Ok(None)
    }

    // <statements> --> ( <assignment> | <fcall> | <ifthenelse> | <loop> | <return> )*
    pub fn statements(&mut self) -> Result<Ast, ParseError> {
        let mut statements = vec![];
        while let Some(statement) = self.one_of(&[
            Self::assignment,
            Self::fcall,
            Self::ifthenelse,
            Self::loop_,
            Self::rejoinder,
        ])? {
            statements.push(statement);
        }
        Ok(Ast::Statements(statements))
    }

    // <assignment> --> <variable> <member>* '=' <expression>
    fn assignment(&mut self) -> Production {
        let Some(mut target) = self.variable()? else {
            return Ok(None);
        };

        while let Some(index) = self.member()? {
            target = Ast::Member {
                object: Box::new(target),
                index: Box::new(index),
                is_lhs: false,
            };
        }

        if !self.fetch(&Token::Assign) {
            return Ok(None);
        }

        let Some(value) = self.expression()? else {
            return Err(self.error_here("expected expression after '='"));
        };

        target.mark_lhs();
        Ok(Some(Ast::Assignment {
            target: Box::new(target),
            value: Box::new(value),
        }))
    }

    // <fcall> --> <expression>, kept only when the expression is a call
    fn fcall(&mut self) -> Production {
        match self.expression()? {
            Some(node @ Ast::Fcall { .. }) => Ok(Some(node)),
            _ => Ok(None),
        }
    }

    // <ifthenelse> --> 'if' <expr> 'then' <statements>
    //     ( 'else' 'if' <expr> 'then' <statements> )*
    //     ( 'else' <statements> )? 'end'
    fn ifthenelse(&mut self) -> Production {
        if !self.fetch(&Token::If) {
            return Ok(None);
        }

        let mut arms = vec![self.condition_arm()?];

        while self.tokens.peek() == Some(Token::Else) && self.tokens.lookahead(1) == Some(Token::If)
        {
            self.tokens.next();
            self.tokens.next();
            arms.push(self.condition_arm()?);
        }

        let otherwise = if self.fetch(&Token::Else) {
            Some(Box::new(self.statements()?))
        } else {
            None
        };

        self.expect(Token::End, "to close 'if'")?;
        Ok(Some(Ast::IfThenElse { arms, otherwise }))
    }

    fn condition_arm(&mut self) -> Result<(Ast, Ast), ParseError> {
        let Some(condition) = self.expression()? else {
            return Err(self.error_here("expected condition after 'if'"));
        };
        self.expect(Token::Then, "after condition")?;
        let block = self.statements()?;
        Ok((condition, block))
    }

    // <loop> --> 'while' <expr> <statements> 'end'
    fn loop_(&mut self) -> Production {
        if !self.fetch(&Token::While) {
            return Ok(None);
        }

        let Some(condition) = self.expression()? else {
            return Err(self.error_here("expected condition after 'while'"));
        };
        let body = self.statements()?;
        self.expect(Token::End, "to close 'while'")?;

        Ok(Some(Ast::Loop {
            condition: Box::new(condition),
            body: Box::new(body),
        }))
    }

    // <return> --> 'return' <expr>
    fn rejoinder(&mut self) -> Production {
        if !self.fetch(&Token::Return) {
            return Ok(None);
        }

        let Some(value) = self.expression()? else {
            return Err(self.error_here("expected expression after 'return'"));
        };

        Ok(Some(Ast::Return(Box::new(value))))
    }

    // <expression> --> <exp2> ( ( '==' | '!=' | '>' | '<' ) <exp2> )*
    fn expression(&mut self) -> Production {
        let Some(mut node) = self.exp2()? else {
            return Ok(None);
        };

        loop {
            let verb = match self.tokens.peek() {
                Some(Token::Same) => BinaryVerb::Same,
                Some(Token::Different) => BinaryVerb::Different,
                Some(Token::Greater) => BinaryVerb::GreaterThan,
                Some(Token::Lesser) => BinaryVerb::LessThan,
                _ => break,
            };
            self.tokens.next();

            let Some(rhs) = self.exp2()? else {
                return Err(self.error_here("expected right operand"));
            };
            node = Ast::Binary {
                verb,
                lhs: Box::new(node),
                rhs: Box::new(rhs),
            };
        }

        Ok(Some(node))
    }

    // <exp2> --> <exp2b> ( ( '+' | '-' ) <exp2b> )*
    fn exp2(&mut self) -> Production {
        let Some(mut node) = self.exp2b()? else {
            return Ok(None);
        };

        loop {
            let verb = match self.tokens.peek() {
                Some(Token::Plus) => BinaryVerb::Plus,
                Some(Token::Minus) => BinaryVerb::Minus,
                _ => break,
            };
            self.tokens.next();

            let Some(rhs) = self.exp2b()? else {
                return Err(self.error_here("expected right operand"));
            };
            node = Ast::Binary {
                verb,
                lhs: Box::new(node),
                rhs: Box::new(rhs),
            };
        }

        Ok(Some(node))
    }

    // <exp2b> --> <exp3> ( ( '*' | '/' ) <exp3> )*
    fn exp2b(&mut self) -> Production {
        let Some(mut node) = self.exp3()? else {
            return Ok(None);
        };

        loop {
            let verb = match self.tokens.peek() {
                Some(Token::Times) => BinaryVerb::Times,
                Some(Token::Divide) => BinaryVerb::Divide,
                _ => break,
            };
            self.tokens.next();

            let Some(rhs) = self.exp3()? else {
                return Err(self.error_here("expected right operand"));
            };
            node = Ast::Binary {
                verb,
                lhs: Box::new(node),
                rhs: Box::new(rhs),
            };
        }

        Ok(Some(node))
    }

    // <exp3> --> ( '-' | 'not' )? <exp4>
    fn exp3(&mut self) -> Production {
        let verb = match self.tokens.peek() {
            Some(Token::Minus) => Some(UnaryVerb::Negate),
            Some(Token::Not) => Some(UnaryVerb::Not),
            _ => None,
        };

        let Some(verb) = verb else {
            return self.exp4();
        };
        self.tokens.next();

        let Some(operand) = self.exp3()? else {
            return Err(self.error_here("expected operand after unary operator"));
        };
        Ok(Some(Ast::Unary {
            verb,
            operand: Box::new(operand),
        }))
    }

    // <exp4> --> <exp5> ( <call> | <member> )*
    fn exp4(&mut self) -> Production {
        let Some(mut node) = self.exp5()? else {
            return Ok(None);
        };

        loop {
            if let Some(args) = self.call()? {
                node = Ast::Fcall {
                    callee: Box::new(node),
                    args,
                };
                continue;
            }
            if let Some(index) = self.member()? {
                node = Ast::Member {
                    object: Box::new(node),
                    index: Box::new(index),
                    is_lhs: false,
                };
                continue;
            }
            break;
        }

        Ok(Some(node))
    }

    // <exp5> --> '(' <expression> ')' | <atom>
    fn exp5(&mut self) -> Production {
        if self.fetch(&Token::LeftParen) {
            let Some(node) = self.expression()? else {
                return Err(self.error_here("expected expression after '('"));
            };
            self.expect(Token::RightParen, "to close '('")?;
            return Ok(Some(node));
        }
        self.atom()
    }

    // <atom> --> <variable> | <string> | <float> | <integer> | <table> | <fdecl>
    fn atom(&mut self) -> Production {
        self.one_of(&[
            Self::variable,
            Self::string,
            Self::floater,
            Self::integer,
            Self::table,
            Self::fdecl,
        ])
    }

    // <member> --> '.' <identifier> | '[' <expression> ']'
    // Returns the index expression; a dotted identifier becomes a string.
    fn member(&mut self) -> Production {
        if self.fetch(&Token::Period) {
            let Some(Token::Identifier(name)) = self.tokens.peek() else {
                return Err(self.error_here("expected identifier after '.'"));
            };
            self.tokens.next();
            return Ok(Some(Ast::Str(name)));
        }

        if !self.fetch(&Token::LeftSquare) {
            return Ok(None);
        }
        let Some(index) = self.expression()? else {
            return Err(self.error_here("expected index expression after '['"));
        };
        self.expect(Token::RightSquare, "to close index")?;
        Ok(Some(index))
    }

    // <call> --> '(' ( <expression> ( ',' <expression> )* )? ')'
    fn call(&mut self) -> Result<Option<Vec<Ast>>, ParseError> {
        if !self.fetch(&Token::LeftParen) {
            return Ok(None);
        }

        let mut args = vec![];
        if let Some(first) = self.expression()? {
            args.push(first);
            while self.fetch(&Token::Comma) {
                let Some(arg) = self.expression()? else {
                    return Err(self.error_here("bad list"));
                };
                args.push(arg);
            }
        }

        self.expect(Token::RightParen, "to close call")?;
        Ok(Some(args))
    }

    fn variable(&mut self) -> Production {
        let Some(Token::Identifier(name)) = self.tokens.peek() else {
            return Ok(None);
        };
        self.tokens.next();
        Ok(Some(Ast::Variable {
            name,
            is_lhs: false,
        }))
    }

    fn string(&mut self) -> Production {
        let Some(Token::Str(bytes)) = self.tokens.peek() else {
            return Ok(None);
        };
        self.tokens.next();
        Ok(Some(Ast::Str(bytes)))
    }

    // <float> --> NUMBER '.' NUMBER
    // The fractional digits contribute their integer value scaled below 1.
    fn floater(&mut self) -> Production {
        let (Some(Token::Number(whole)), Some(Token::Period), Some(Token::Number(frac))) = (
            self.tokens.peek(),
            self.tokens.lookahead(1),
            self.tokens.lookahead(2),
        ) else {
            return Ok(None);
        };
        self.tokens.next();
        self.tokens.next();
        self.tokens.next();

        let mut decimal = frac as f32;
        while decimal >= 1.0 {
            decimal /= 10.0;
        }
        Ok(Some(Ast::Float(whole as f32 + decimal)))
    }

    // <integer> --> NUMBER | 'true' | 'false'
    fn integer(&mut self) -> Production {
        match self.tokens.peek() {
            Some(Token::Number(value)) => {
                self.tokens.next();
                Ok(Some(Ast::Integer(value)))
            }
            Some(Token::True) => {
                self.tokens.next();
                Ok(Some(Ast::Boolean(true)))
            }
            Some(Token::False) => {
                self.tokens.next();
                Ok(Some(Ast::Boolean(false)))
            }
            _ => Ok(None),
        }
    }

    // <table> --> '[' ( <element> ( ',' <element> )* )? ']'
    fn table(&mut self) -> Production {
        if !self.fetch(&Token::LeftSquare) {
            return Ok(None);
        }

        let mut elements = vec![];
        if self.tokens.peek() != Some(Token::RightSquare) {
            elements.push(self.element()?);
            while self.fetch(&Token::Comma) {
                elements.push(self.element()?);
            }
        }

        if self.tokens.peek() != Some(Token::RightSquare) {
            return Err(self.error_here("bad list"));
        }
        self.tokens.next();
        Ok(Some(Ast::Table(elements)))
    }

    // <element> --> <expression> ( ':' <expression> )?
    fn element(&mut self) -> Result<Ast, ParseError> {
        let Some(key) = self.expression()? else {
            return Err(self.error_here("expected table element"));
        };

        if !self.fetch(&Token::Colon) {
            return Ok(key);
        }

        let Some(value) = self.expression()? else {
            return Err(self.error_here("expected value after ':'"));
        };
        Ok(Ast::Pair {
            key: Box::new(key),
            value: Box::new(value),
        })
    }

    // <fdecl> --> 'function' '(' ( ident ( ',' ident )* )? ')' <statements> 'end'
    fn fdecl(&mut self) -> Production {
        if !self.fetch(&Token::Function) {
            return Ok(None);
        }

        self.expect(Token::LeftParen, "after 'function'")?;

        let mut params = vec![];
        if let Some(Token::Identifier(name)) = self.tokens.peek() {
            self.tokens.next();
            params.push(name);
            while self.fetch(&Token::Comma) {
                let Some(Token::Identifier(name)) = self.tokens.peek() else {
                    return Err(self.error_here("expected parameter name"));
                };
                self.tokens.next();
                params.push(name);
            }
        }

        self.expect(Token::RightParen, "to close parameter list")?;
        let body = self.statements()?;
        self.expect(Token::End, "to close 'function'")?;

        Ok(Some(Ast::Fdecl {
            params,
            body: Box::new(body),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer;
    use std::path::PathBuf;

    fn parse_str(input: &str) -> Result<Ast, ParseError> {
        let tokens = lexer::lex(input.as_bytes(), &PathBuf::from(".")).unwrap();
        parse(tokens)
    }

    fn single_statement(input: &str) -> Ast {
        let Ast::Statements(mut statements) = parse_str(input).unwrap() else {
            unreachable!()
        };
        assert_eq!(1, statements.len());
        statements.remove(0)
    }

    #[test]
    fn test_parse_assignment_marks_lhs() {
        let Ast::Assignment { target, .. } = single_statement("x = 1") else {
            panic!("expected assignment");
        };
        assert!(target.is_lhs());
    }

    #[test]
    fn test_parse_member_assignment_marks_only_outermost() {
        let Ast::Assignment { target, .. } = single_statement("x.y.z = 1") else {
            panic!("expected assignment");
        };
        assert!(target.is_lhs());
        let Ast::Member { object, .. } = *target else {
            panic!("expected member target");
        };
        assert!(!object.is_lhs());
    }

    #[test]
    fn test_parse_multiplication_binds_tighter() {
        let Ast::Fcall { args, .. } = single_statement("f(1 + 2 * 3)") else {
            panic!("expected call");
        };
        assert_eq!(
            args[0],
            Ast::Binary {
                verb: BinaryVerb::Plus,
                lhs: Box::new(Ast::Integer(1)),
                rhs: Box::new(Ast::Binary {
                    verb: BinaryVerb::Times,
                    lhs: Box::new(Ast::Integer(2)),
                    rhs: Box::new(Ast::Integer(3)),
                }),
            }
        );
    }

    #[test]
    fn test_parse_float_value() {
        let Ast::Assignment { value, .. } = single_statement("x = 2.25") else {
            panic!("expected assignment");
        };
        assert_eq!(Ast::Float(2.25), *value);
    }

    #[test]
    fn test_parse_float_leading_fraction_scale() {
        let Ast::Assignment { value, .. } = single_statement("x = 0.5") else {
            panic!("expected assignment");
        };
        assert_eq!(Ast::Float(0.5), *value);
    }

    #[test]
    fn test_parse_table_with_pairs() {
        let Ast::Assignment { value, .. } = single_statement("x = [1, 'a':2, 3]") else {
            panic!("expected assignment");
        };
        let Ast::Table(elements) = *value else {
            panic!("expected table");
        };
        assert_eq!(3, elements.len());
        assert!(matches!(elements[1], Ast::Pair { .. }));
    }

    #[test]
    fn test_parse_if_else_if_arms() {
        let node = single_statement("if a then x = 1 else if b then x = 2 else x = 3 end");
        let Ast::IfThenElse { arms, otherwise } = node else {
            panic!("expected if");
        };
        assert_eq!(2, arms.len());
        assert!(otherwise.is_some());
    }

    #[test]
    fn test_parse_while() {
        let node = single_statement("while i < 3 i = i + 1 end");
        assert!(matches!(node, Ast::Loop { .. }));
    }

    #[test]
    fn test_parse_function_declaration() {
        let Ast::Assignment { value, .. } = single_statement("f = function(a, b) return a end")
        else {
            panic!("expected assignment");
        };
        let Ast::Fdecl { params, .. } = *value else {
            panic!("expected function");
        };
        assert_eq!(vec![b"a".to_vec(), b"b".to_vec()], params);
    }

    #[test]
    fn test_parse_method_call() {
        let node = single_statement("sys.print(1, 2)");
        let Ast::Fcall { callee, args } = node else {
            panic!("expected call");
        };
        assert_eq!(2, args.len());
        assert!(matches!(*callee, Ast::Member { .. }));
    }

    #[test]
    fn test_parse_chained_calls() {
        let node = single_statement("f(1)(2)");
        let Ast::Fcall { callee, .. } = node else {
            panic!("expected call");
        };
        assert!(matches!(*callee, Ast::Fcall { .. }));
    }

    #[test]
    fn test_parse_missing_end_is_fatal() {
        assert!(parse_str("while 1 x = 2").is_err());
    }

    #[test]
    fn test_parse_unmatched_bracket_is_fatal() {
        assert!(parse_str("x = [1, 2").is_err());
    }

    #[test]
    fn test_parse_trailing_garbage_is_fatal() {
        assert!(parse_str("x = 1 )").is_err());
    }

    #[test]
    fn test_parse_unary() {
        let Ast::Assignment { value, .. } = single_statement("x = -y") else {
            panic!("expected assignment");
        };
        assert!(matches!(
            *value,
            Ast::Unary {
                verb: UnaryVerb::Negate,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_index_expression() {
        let Ast::Assignment { target, .. } = single_statement("x[i + 1] = 2") else {
            panic!("expected assignment");
        };
        let Ast::Member { index, .. } = *target else {
            panic!("expected member");
        };
        assert!(matches!(*index, Ast::Binary { .. }));
    }
}
