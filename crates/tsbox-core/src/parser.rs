//! Recursive-descent parser (component C2): tokens from `lexer.rs` in,
//! `ast.rs` nodes out.
//!
//! Precedence is handled by one function per binding-power tier rather than
//! a single table-driven loop: a conventional precedence-climbing expression
//! parser organized as a cascade of one function per precedence tier reads
//! more clearly than a single loop driven by a table, even though it is more
//! verbose.
//!
//! Type annotations are never represented in the AST: wherever the grammar
//! allows one, the parser reads and discards it with a bracket/paren/angle
//! depth counter, so an annotated and unannotated program produce identical
//! trees.

use std::rc::Rc;

use crate::ast::*;
use crate::error::TsError;
use crate::lexer::{Lexer, LexerSnapshot, Token, TokenKind};

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    is_module: bool,
}

type PResult<T> = Result<T, TsError>;

impl<'a> Parser<'a> {
    pub fn new(src: &'a str) -> PResult<Self> {
        let mut lexer = Lexer::new(src);
        let current = lexer.next_token()?;
        Ok(Self {
                lexer,
                current,
                is_module: false,
        })
    }

    /// Parses a standalone script: no top-level `import`/`export`, no
    /// top-level `await`.
    pub fn parse_script(src: &'a str) -> PResult<Program> {
        let mut parser = Self::new(src)?;
        parser.parse_program(false)
    }

    /// Parses source linked as an ES module.
    pub fn parse_module(src: &'a str) -> PResult<Program> {
        let mut parser = Self::new(src)?;
        parser.is_module = true;
        parser.parse_program(true)
    }

    fn parse_program(&mut self, is_module: bool) -> PResult<Program> {
        let mut body = Vec::new();
        while !self.at_eof() {
            body.push(self.parse_statement()?);
        }
        Ok(Program { body, is_module })
    }

    // ---- token helpers -------------------------------------------------

    fn at_eof(&self) -> bool {
        self.current.kind == TokenKind::Eof
    }

    fn bump(&mut self) -> PResult<Token> {
        let tok = self.current.clone();
        self.current = self.lexer.next_token()?;
        Ok(tok)
    }

    fn is_text(&self, text: &str) -> bool {
        self.current.text == text
        && matches!(self.current.kind, TokenKind::Punctuator | TokenKind::Keyword | TokenKind::Identifier)
    }

    fn eat(&mut self, text: &str) -> PResult<bool> {
        if self.is_text(text) {
            self.bump()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, text: &str) -> PResult<()> {
        if self.eat(text)? {
            Ok(())
        } else {
            Err(TsError::parse(
                    format!("expected '{text}', found '{}'", self.current.text),
                    self.current.span,
            ))
        }
    }

    fn expect_identifier(&mut self) -> PResult<String> {
        if matches!(self.current.kind, TokenKind::Identifier | TokenKind::Keyword) {
            Ok(self.bump()?.text)
        } else {
            Err(TsError::parse(
                    format!("expected identifier, found '{}'", self.current.text),
                    self.current.span,
            ))
        }
    }

    fn snapshot(&self) -> (LexerSnapshot, Token) {
        (self.lexer.snapshot(), self.current.clone())
    }

    fn restore(&mut self, (snap, tok): (LexerSnapshot, Token)) {
        self.lexer.restore(snap);
        self.current = tok;
    }

    /// ASI: a statement terminator is satisfied by an explicit `;`, the
    /// next token being `}` or EOF, or a newline having appeared before the
    /// next token.
    fn consume_semicolon(&mut self) -> PResult<()> {
        if self.eat(";")? {
            return Ok(());
        }
        if self.is_text("}") || self.at_eof() || self.current.line_break_before {
            return Ok(());
        }
        Err(TsError::parse(
                format!("expected ';', found '{}'", self.current.text),
                self.current.span,
        ))
    }

    // ---- type-annotation skipping --------------------------------------

    /// Skips a `: Type` annotation if present. Handles nested `<...>`,
    /// `(...)`, `[...]`, `{...}` so the annotation's own punctuation doesn't
    /// get mistaken for the enclosing construct's delimiter.
    fn skip_type_annotation(&mut self) -> PResult<()> {
        if self.eat(":")? {
            self.skip_type()?;
        }
        Ok(())
    }

    /// Skips one type expression: any run of tokens until a depth-0
    /// delimiter the caller owns (`,`, `)`, `;`, `=`, `{` of a function
    /// body, `=>`). Depth tracks `<>`, `()`, `[]`, `{}` nesting so those
    /// characters inside the type itself don't terminate early.
    fn skip_type(&mut self) -> PResult<()> {
        let mut depth: i32 = 0;
        loop {
            if depth == 0
            && (self.is_text(",")
                || self.is_text(";")
                || self.is_text("=")
                || self.is_text("=>")
                || self.at_eof()
                || self.current.line_break_before && self.is_text("}"))
            {
                return Ok(());
            }
            if depth == 0 && (self.is_text(")") || self.is_text("]") || self.is_text("{")) {
                return Ok(());
            }
            match self.current.text.as_str() {
                "<" | "(" | "[" => depth += 1,
                ">" | ")" | "]" => {
                    if depth == 0 {
                        return Ok(());
                    }
                    depth -= 1;
                }
                ">>" => depth -= 2,
                ">>>" => depth -= 3,
                _ => {}
            }
            if self.at_eof() {
                return Ok(());
            }
            self.bump()?;
        }
    }

    /// Skips a `<T, U>` generic parameter/argument list if the current
    /// token is `<`. Used at function declarations, call sites, and class
    /// headers. Best-effort: bails out (restoring position) if what follows
    /// `<` doesn't look like a type argument list, since `<` is also the
    /// less-than operator.
    fn try_skip_type_params(&mut self) {
        if !self.is_text("<") {
            return;
        }
        let mark = self.snapshot();
        let mut depth = 0i32;
        loop {
            match self.current.text.as_str() {
                "<" => depth += 1,
                ">" => {
                    depth -= 1;
                    if depth == 0 {
                        let _ = self.bump();
                        return;
                    }
                }
                ">>" => {
                    depth -= 2;
                    if depth <= 0 {
                        let _ = self.bump();
                        return;
                    }
                }
                ";" | "{" => {
                    self.restore(mark);
                    return;
                }
                _ => {}
            }
            if self.at_eof() {
                self.restore(mark);
                return;
            }
            if self.bump().is_err() {
                self.restore(mark);
                return;
            }
        }
    }

    // ---- statements -----------------------------------------------------

    fn parse_statement(&mut self) -> PResult<Stmt> {
        if self.is_text("{") {
            return Ok(Stmt::Block(self.parse_block()?));
        }
        if self.is_text(";") {
            self.bump()?;
            return Ok(Stmt::Empty);
        }
        if self.is_text("var") || self.is_text("let") || self.is_text("const") {
            let stmt = self.parse_variable_declaration()?;
            self.consume_semicolon()?;
            return Ok(stmt);
        }
        if self.is_text("if") {
            return self.parse_if();
        }
        if self.is_text("while") {
            return self.parse_while();
        }
        if self.is_text("do") {
            return self.parse_do_while();
        }
        if self.is_text("for") {
            return self.parse_for();
        }
        if self.is_text("switch") {
            return self.parse_switch();
        }
        if self.is_text("function") {
            return Ok(Stmt::FunctionDeclaration(self.parse_function(false)?));
        }
        if self.is_text("async") && self.peek_is_function() {
            self.bump()?;
            return Ok(Stmt::FunctionDeclaration(self.parse_function(true)?));
        }
        if self.is_text("return") {
            self.bump()?;
            if self.is_text(";") || self.is_text("}") || self.at_eof() || self.current.line_break_before {
                self.consume_semicolon()?;
                return Ok(Stmt::Return(None));
            }
            let expr = self.parse_expression()?;
            self.consume_semicolon()?;
            return Ok(Stmt::Return(Some(expr)));
        }
        if self.is_text("break") {
            self.bump()?;
            let label = self.optional_label()?;
            self.consume_semicolon()?;
            return Ok(Stmt::Break(label));
        }
        if self.is_text("continue") {
            self.bump()?;
            let label = self.optional_label()?;
            self.consume_semicolon()?;
            return Ok(Stmt::Continue(label));
        }
        if self.is_text("throw") {
            self.bump()?;
            if self.current.line_break_before {
                return Err(TsError::parse(
                        "illegal newline after 'throw'",
                        self.current.span,
                ));
            }
            let expr = self.parse_expression()?;
            self.consume_semicolon()?;
            return Ok(Stmt::Throw(expr));
        }
        if self.is_text("try") {
            return self.parse_try();
        }
        if self.is_text("class") {
            return Ok(Stmt::ClassDeclaration(self.parse_class()?));
        }
        if self.is_text("import") {
            return self.parse_import();
        }
        if self.is_text("export") {
            return self.parse_export();
        }
        if self.is_text("type") {
            if let Some(stmt) = self.try_parse_type_alias()? {
                return Ok(stmt);
            }
        }
        if self.is_text("interface") {
            return self.parse_interface_skip();
        }
        // Labeled statement: `identifier ':'`.
        if matches!(self.current.kind, TokenKind::Identifier) {
            let mark = self.snapshot();
            let name = self.bump()?.text;
            if self.is_text(":") {
                self.bump()?;
                let body = Box::new(self.parse_statement()?);
                return Ok(Stmt::Labeled { label: name, body });
            }
            self.restore(mark);
        }
        let expr = self.parse_expression()?;
        self.consume_semicolon()?;
        Ok(Stmt::Expression(expr))
    }

    fn optional_label(&mut self) -> PResult<Option<String>> {
        if matches!(self.current.kind, TokenKind::Identifier) && !self.current.line_break_before {
            Ok(Some(self.bump()?.text))
        } else {
            Ok(None)
        }
    }

    fn peek_is_function(&self) -> bool {
        // `async function` disambiguation: only a same-line `function`
        // keyword makes this an async function declaration/expression.
        !self.current.line_break_before
    }

    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect("{")?;
        let mut body = Vec::new();
        while !self.is_text("}") && !self.at_eof() {
            body.push(self.parse_statement()?);
        }
        self.expect("}")?;
        Ok(body)
    }

    fn parse_variable_declaration(&mut self) -> PResult<Stmt> {
        let kind = match self.bump()?.text.as_str() {
            "var" => VarKind::Var,
            "let" => VarKind::Let,
            "const" => VarKind::Const,
            _ => unreachable!(),
        };
        let mut declarations = Vec::new();
        loop {
            let id = self.parse_binding_target()?;
            self.skip_type_annotation()?;
            let init = if self.eat("=")? { Some(self.parse_assignment_expr()?) } else { None };
            declarations.push(VarDeclarator { id, init });
            if !self.eat(",")? {
                break;
            }
        }
        Ok(Stmt::VariableDeclaration { kind, declarations })
    }

    /// A binding target in a declaration position: identifier or
    /// destructuring pattern (never a member expression).
    fn parse_binding_target(&mut self) -> PResult<Pattern> {
        if self.is_text("{") {
            return self.parse_object_pattern();
        }
        if self.is_text("[") {
            return self.parse_array_pattern();
        }
        Ok(Pattern::Identifier(self.expect_identifier()?))
    }

    fn parse_object_pattern(&mut self) -> PResult<Pattern> {
        self.expect("{")?;
        let mut properties = Vec::new();
        let mut rest = None;
        while !self.is_text("}") {
            if self.eat("...")? {
                rest = Some(Box::new(self.parse_binding_target()?));
                break;
            }
            let computed = self.is_text("[");
            let key = self.parse_property_key()?;
            let (value, shorthand) = if self.eat(":")? {
                (self.parse_binding_target()?, false)
            } else {
                let name = match &key {
                    PropertyKey::Identifier(s) => s.clone(),
                    _ => {
                        return Err(TsError::parse(
                                "invalid shorthand destructuring property",
                                self.current.span,
                        ));
                    }
                };
                (Pattern::Identifier(name), true)
            };
            let value = if self.eat("=")? {
                Pattern::Assignment {
                    left: Box::new(value),
                    right: Box::new(self.parse_assignment_expr()?),
                }
            } else {
                value
            };
            properties.push(ObjectPatternProp {
                    key,
                    value,
                    computed,
                    shorthand,
            });
            if !self.eat(",")? {
                break;
            }
        }
        self.expect("}")?;
        Ok(Pattern::Object { properties, rest })
    }

    fn parse_array_pattern(&mut self) -> PResult<Pattern> {
        self.expect("[")?;
        let mut elements = Vec::new();
        let mut rest = None;
        while !self.is_text("]") {
            if self.eat(",")? {
                elements.push(None);
                continue;
            }
            if self.eat("...")? {
                rest = Some(Box::new(self.parse_binding_target()?));
                break;
            }
            let mut target = self.parse_binding_target()?;
            self.skip_type_annotation()?;
            if self.eat("=")? {
                target = Pattern::Assignment {
                    left: Box::new(target),
                    right: Box::new(self.parse_assignment_expr()?),
                };
            }
            elements.push(Some(target));
            if !self.eat(",")? {
                break;
            }
        }
        self.expect("]")?;
        Ok(Pattern::Array { elements, rest })
    }

    fn parse_property_key(&mut self) -> PResult<PropertyKey> {
        if self.eat("[")? {
            let expr = self.parse_assignment_expr()?;
            self.expect("]")?;
            return Ok(PropertyKey::Computed(Box::new(expr)));
        }
        if self.current.kind == TokenKind::PrivateIdentifier {
            return Ok(PropertyKey::Private(self.bump()?.text));
        }
        if self.current.kind == TokenKind::String {
            return Ok(PropertyKey::String(self.bump()?.text));
        }
        if self.current.kind == TokenKind::Number {
            let text = self.bump()?.text;
            return Ok(PropertyKey::Number(parse_numeric_literal(&text)));
        }
        Ok(PropertyKey::Identifier(self.expect_identifier()?))
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        self.expect("if")?;
        self.expect("(")?;
        let test = self.parse_expression()?;
        self.expect(")")?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.eat("else")? { Some(Box::new(self.parse_statement()?)) } else { None };
        Ok(Stmt::If { test, consequent, alternate })
    }

    fn parse_while(&mut self) -> PResult<Stmt> {
        self.expect("while")?;
        self.expect("(")?;
        let test = self.parse_expression()?;
        self.expect(")")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::While { test, body })
    }

    fn parse_do_while(&mut self) -> PResult<Stmt> {
        self.expect("do")?;
        let body = Box::new(self.parse_statement()?);
        self.expect("while")?;
        self.expect("(")?;
        let test = self.parse_expression()?;
        self.expect(")")?;
        self.eat(";")?;
        Ok(Stmt::DoWhile { body, test })
    }

    fn parse_for(&mut self) -> PResult<Stmt> {
        self.expect("for")?;
        let is_await = self.is_text("await");
        if is_await {
            self.bump()?;
        }
        self.expect("(")?;

        if self.is_text(";") {
            self.bump()?;
            return self.parse_for_rest(None, is_await);
        }

        let init = if self.is_text("var") || self.is_text("let") || self.is_text("const") {
            let kind = match self.bump()?.text.as_str() {
                "var" => VarKind::Var,
                "let" => VarKind::Let,
                "const" => VarKind::Const,
                _ => unreachable!(),
            };
            let target = self.parse_binding_target()?;
            self.skip_type_annotation()?;
            if self.is_text("of") {
                self.bump()?;
                let right = self.parse_assignment_expr()?;
                self.expect(")")?;
                let body = Box::new(self.parse_statement()?);
                return Ok(Stmt::ForOf {
                        left: Box::new(ForInit::VarDecl {
                                kind,
                                declarations: vec![VarDeclarator { id: target, init: None }],
                        }),
                        right,
                        body,
                        is_await,
                });
            }
            if self.is_text("in") {
                self.bump()?;
                let right = self.parse_expression()?;
                self.expect(")")?;
                let body = Box::new(self.parse_statement()?);
                return Ok(Stmt::ForIn {
                        left: Box::new(ForInit::VarDecl {
                                kind,
                                declarations: vec![VarDeclarator { id: target, init: None }],
                        }),
                        right,
                        body,
                });
            }
            let init = if self.eat("=")? { Some(self.parse_assignment_expr_no_in()?) } else { None };
            let mut declarations = vec![VarDeclarator { id: target, init }];
            while self.eat(",")? {
                let id = self.parse_binding_target()?;
                self.skip_type_annotation()?;
                let init = if self.eat("=")? { Some(self.parse_assignment_expr_no_in()?) } else { None };
                declarations.push(VarDeclarator { id, init });
            }
            Box::new(ForInit::VarDecl { kind, declarations })
        } else {
            let expr = self.parse_expression_no_in()?;
            if self.is_text("of") {
                self.bump()?;
                let right = self.parse_assignment_expr()?;
                self.expect(")")?;
                let body = Box::new(self.parse_statement()?);
                return Ok(Stmt::ForOf {
                        left: Box::new(ForInit::Pattern(expr_to_pattern(expr)?)),
                        right,
                        body,
                        is_await,
                });
            }
            if self.is_text("in") {
                self.bump()?;
                let right = self.parse_expression()?;
                self.expect(")")?;
                let body = Box::new(self.parse_statement()?);
                return Ok(Stmt::ForIn {
                        left: Box::new(ForInit::Pattern(expr_to_pattern(expr)?)),
                        right,
                        body,
                });
            }
            Box::new(ForInit::Expr(expr))
        };
        self.expect(";")?;
        self.parse_for_rest(Some(init), is_await)
    }

    fn parse_for_rest(&mut self, init: Option<Box<ForInit>>, _is_await: bool) -> PResult<Stmt> {
        let test = if self.is_text(";") { None } else { Some(self.parse_expression()?) };
        self.expect(";")?;
        let update = if self.is_text(")") { None } else { Some(self.parse_expression()?) };
        self.expect(")")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::For { init, test, update, body })
    }

    fn parse_switch(&mut self) -> PResult<Stmt> {
        self.expect("switch")?;
        self.expect("(")?;
        let discriminant = self.parse_expression()?;
        self.expect(")")?;
        self.expect("{")?;
        let mut cases = Vec::new();
        while !self.is_text("}") {
            let test = if self.eat("case")? {
                let e = self.parse_expression()?;
                self.expect(":")?;
                Some(e)
            } else {
                self.expect("default")?;
                self.expect(":")?;
                None
            };
            let mut consequent = Vec::new();
            while !self.is_text("case") && !self.is_text("default") && !self.is_text("}") {
                consequent.push(self.parse_statement()?);
            }
            cases.push(SwitchCase { test, consequent });
        }
        self.expect("}")?;
        Ok(Stmt::Switch { discriminant, cases })
    }

    fn parse_try(&mut self) -> PResult<Stmt> {
        self.expect("try")?;
        let block = self.parse_block()?;
        let handler = if self.eat("catch")? {
            let param = if self.eat("(")? {
                let p = self.parse_binding_target()?;
                self.skip_type_annotation()?;
                self.expect(")")?;
                Some(p)
            } else {
                None
            };
            let body = self.parse_block()?;
            Some(CatchClause { param, body })
        } else {
            None
        };
        let finalizer = if self.eat("finally")? { Some(self.parse_block()?) } else { None };
        Ok(Stmt::Try { block, handler, finalizer })
    }

    fn parse_function(&mut self, is_async: bool) -> PResult<Rc<FunctionDef>> {
        self.expect("function")?;
        let is_generator = self.eat("*")?;
        let name = if matches!(self.current.kind, TokenKind::Identifier) {
            Some(self.bump()?.text)
        } else {
            None
        };
        self.try_skip_type_params();
        let params = self.parse_params()?;
        self.skip_type_annotation()?;
        let body = FunctionBody::Block(self.parse_block()?);
        Ok(Rc::new(FunctionDef { name, params, body, is_async, is_generator, is_arrow: false }))
    }

    fn parse_params(&mut self) -> PResult<Vec<Param>> {
        self.expect("(")?;
        let mut params = Vec::new();
        while !self.is_text(")") {
            let rest = self.eat("...")?;
            let pattern = self.parse_binding_target()?;
            self.eat("?")?; // optional-parameter marker, no runtime effect
            self.skip_type_annotation()?;
            let default = if self.eat("=")? { Some(self.parse_assignment_expr()?) } else { None };
            params.push(Param { pattern, default, rest });
            if !self.eat(",")? {
                break;
            }
        }
        self.expect(")")?;
        Ok(params)
    }

    fn try_parse_type_alias(&mut self) -> PResult<Option<Stmt>> {
        let mark = self.snapshot();
        self.bump()?; // 'type'
        if !matches!(self.current.kind, TokenKind::Identifier) {
            self.restore(mark);
            return Ok(None);
        }
        self.bump()?;
        self.try_skip_type_params();
        if !self.eat("=")? {
            self.restore(mark);
            return Ok(None);
        }
        self.skip_type()?;
        self.eat(";")?;
        Ok(Some(Stmt::Empty))
    }

    fn parse_interface_skip(&mut self) -> PResult<Stmt> {
        self.expect("interface")?;
        self.expect_identifier()?;
        self.try_skip_type_params();
        if self.eat("extends")? {
            loop {
                self.skip_type()?;
                if !self.eat(",")? {
                    break;
                }
            }
        }
        self.expect("{")?;
        let mut depth = 1;
        while depth > 0 && !self.at_eof() {
            if self.is_text("{") {
                depth += 1;
            } else if self.is_text("}") {
                depth -= 1;
                if depth == 0 {
                    self.bump()?;
                    break;
                }
            }
            self.bump()?;
        }
        Ok(Stmt::Empty)
    }

    fn parse_class(&mut self) -> PResult<Rc<ClassDef>> {
        self.expect("class")?;
        let name = if matches!(self.current.kind, TokenKind::Identifier) {
            Some(self.bump()?.text)
        } else {
            None
        };
        self.try_skip_type_params();
        let super_class = if self.eat("extends")? {
            let expr = self.parse_lhs_expr()?;
            // `extends Base<T>` — skip a trailing type argument list.
            self.try_skip_type_params();
            Some(Box::new(expr))
        } else {
            None
        };
        if self.eat("implements")? {
            loop {
                self.skip_type()?;
                if !self.eat(",")? {
                    break;
                }
            }
        }
        self.expect("{")?;
        let mut body = Vec::new();
        while !self.is_text("}") {
            if self.eat(";")? {
                continue;
            }
            body.push(self.parse_class_member()?);
        }
        self.expect("}")?;
        Ok(Rc::new(ClassDef { name, super_class, body }))
    }

    fn parse_class_member(&mut self) -> PResult<ClassMember> {
        if self.is_text("static") {
            let mark = self.snapshot();
            self.bump()?;
            if self.is_text("{") {
                let body = self.parse_block()?;
                return Ok(ClassMember::StaticBlock(body));
            }
            // `static` as a modifier, not a static-block keyword: fall
            // through with `is_static = true`.
            self.restore(mark);
            self.bump()?;
            return self.parse_class_member_body(true);
        }
        self.parse_class_member_body(false)
    }

    fn parse_class_member_body(&mut self, is_static: bool) -> PResult<ClassMember> {
        // Visibility/readonly modifiers: absorbed, no runtime effect.
        while matches!(self.current.text.as_str(), "public" | "private" | "protected" | "readonly" | "abstract") {
            self.bump()?;
        }
        let is_async = if self.is_text("async") && !self.peek_is_field_after_async() {
            self.bump()?;
            true
        } else {
            false
        };
        let is_generator = self.eat("*")?;
        let accessor = if (self.is_text("get") || self.is_text("set")) && !self.peek_is_field_after_accessor() {
            Some(self.bump()?.text)
        } else {
            None
        };
        let computed = self.is_text("[");
        let key = self.parse_property_key()?;
        self.eat("?")?;

        if self.is_text("(") {
            self.try_skip_type_params();
            let params = self.parse_params()?;
            self.skip_type_annotation()?;
            let body = FunctionBody::Block(self.parse_block()?);
            let function = Rc::new(FunctionDef {
                    name: static_key_text(&key),
                    params,
                    body,
                    is_async,
                    is_generator,
                    is_arrow: false,
            });
            let kind = match accessor.as_deref() {
                Some("get") => MethodKind::Get,
                Some("set") => MethodKind::Set,
                _ if matches!(&key, PropertyKey::Identifier(s) if s == "constructor") && !is_static => {
                    MethodKind::Constructor
                }
                _ => MethodKind::Method,
            };
            return Ok(ClassMember::Method { key, kind, function, is_static, computed });
        }

        // Field declaration, with an optional `!`/`:` type annotation.
        self.eat("!")?;
        self.skip_type_annotation()?;
        let value = if self.eat("=")? { Some(self.parse_assignment_expr()?) } else { None };
        self.consume_semicolon()?;
        Ok(ClassMember::Field { key, value, is_static, computed })
    }

    fn peek_is_field_after_async(&self) -> bool {
        false
    }

    fn peek_is_field_after_accessor(&self) -> bool {
        false
    }

    fn parse_import(&mut self) -> PResult<Stmt> {
        self.expect("import")?;
        let mut specifiers = Vec::new();
        if self.current.kind == TokenKind::String {
            let source = self.bump()?.text;
            self.consume_semicolon()?;
            return Ok(Stmt::ImportDeclaration(ImportDecl { specifiers, source }));
        }
        if self.eat("type")? {
            // `import type { X } from "m"` — type-only import, fully erased.
            self.skip_to_end_of_import()?;
            return Ok(Stmt::Empty);
        }
        if matches!(self.current.kind, TokenKind::Identifier) {
            let local = self.bump()?.text;
            specifiers.push(ImportSpecifier::Default { local });
            self.eat(",")?;
        }
        if self.eat("*")? {
            self.expect("as")?;
            let local = self.expect_identifier()?;
            specifiers.push(ImportSpecifier::Namespace { local });
        } else if self.eat("{")? {
            while !self.is_text("}") {
                let imported = self.expect_identifier()?;
                let local = if self.eat("as")? { self.expect_identifier()? } else { imported.clone() };
                specifiers.push(ImportSpecifier::Named { imported, local });
                if !self.eat(",")? {
                    break;
                }
            }
            self.expect("}")?;
        }
        self.expect("from")?;
        let source = self.bump()?.text;
        self.consume_semicolon()?;
        Ok(Stmt::ImportDeclaration(ImportDecl { specifiers, source }))
    }

    fn skip_to_end_of_import(&mut self) -> PResult<()> {
        while !self.is_text(";") && !self.at_eof() && !self.current.line_break_before {
            self.bump()?;
        }
        self.eat(";")?;
        Ok(())
    }

    fn parse_export(&mut self) -> PResult<Stmt> {
        self.expect("export")?;
        if self.eat("default")? {
            let expr = if self.is_text("function") || (self.is_text("async") && self.peek_is_function()) {
                let is_async = self.eat("async")?;
                let def = self.parse_function(is_async)?;
                Expr::Function(def)
            } else if self.is_text("class") {
                let def = self.parse_class()?;
                Expr::Class(def)
            } else {
                self.parse_assignment_expr()?
            };
            self.consume_semicolon()?;
            return Ok(Stmt::ExportDefaultDeclaration(expr));
        }
        if self.eat("*")? {
            let exported = if self.eat("as")? { Some(self.expect_identifier()?) } else { None };
            self.expect("from")?;
            let source = self.bump()?.text;
            self.consume_semicolon()?;
            return Ok(Stmt::ExportAllDeclaration { source, exported });
        }
        if self.is_text("type") {
            // `export type { X }` — fully erased.
            self.bump()?;
            self.skip_to_end_of_import()?;
            return Ok(Stmt::Empty);
        }
        if self.is_text("{") {
            self.bump()?;
            let mut specifiers = Vec::new();
            while !self.is_text("}") {
                let local = self.expect_identifier()?;
                let exported = if self.eat("as")? { self.expect_identifier()? } else { local.clone() };
                specifiers.push(ExportSpecifier { local, exported });
                if !self.eat(",")? {
                    break;
                }
            }
            self.expect("}")?;
            let source = if self.eat("from")? { Some(self.bump()?.text) } else { None };
            self.consume_semicolon()?;
            return Ok(Stmt::ExportNamedDeclaration { declaration: None, specifiers, source });
        }
        let declaration = self.parse_statement()?;
        Ok(Stmt::ExportNamedDeclaration {
                declaration: Some(Box::new(declaration)),
                specifiers: Vec::new(),
                source: None,
        })
    }

    // ---- expressions ------------------------------------------------------

    fn parse_expression(&mut self) -> PResult<Expr> {
        let first = self.parse_assignment_expr()?;
        if self.is_text(",") {
            let mut exprs = vec![first];
            while self.eat(",")? {
                exprs.push(self.parse_assignment_expr()?);
            }
            return Ok(Expr::Sequence(exprs));
        }
        Ok(first)
    }

    fn parse_expression_no_in(&mut self) -> PResult<Expr> {
        // `in` suppression only matters inside a `for (...)` header; the
        // grammar carve-out is narrow enough that we implement it by simply
        // not treating a bare `in` as the relational operator while parsing
        // the for-header's initializer expression.
        self.parse_assignment_expr_no_in()
    }

    fn parse_assignment_expr(&mut self) -> PResult<Expr> {
        self.parse_assignment_expr_impl(true)
    }

    fn parse_assignment_expr_no_in(&mut self) -> PResult<Expr> {
        self.parse_assignment_expr_impl(false)
    }

    fn parse_assignment_expr_impl(&mut self, allow_in: bool) -> PResult<Expr> {
        if let Some(arrow) = self.try_parse_arrow()? {
            return Ok(arrow);
        }
        if self.is_text("yield") {
            return self.parse_yield();
        }
        let left = self.parse_conditional(allow_in)?;
        if let Some(op) = assignment_op(&self.current.text) {
            if matches!(self.current.kind, TokenKind::Punctuator) {
                self.bump()?;
                let right = Box::new(self.parse_assignment_expr_impl(allow_in)?);
                let pattern = expr_to_pattern(left)?;
                return Ok(Expr::Assignment { op, left: Box::new(pattern), right });
            }
        }
        Ok(left)
    }

    fn parse_yield(&mut self) -> PResult<Expr> {
        self.bump()?;
        let delegate = self.eat("*")?;
        let at_arg_start = !self.is_text(";")
        && !self.is_text(")")
        && !self.is_text("]")
        && !self.is_text("}")
        && !self.is_text(",")
        && !self.at_eof()
        && !self.current.line_break_before;
        let argument = if at_arg_start {
            Some(Box::new(self.parse_assignment_expr()?))
        } else {
            None
        };
        Ok(Expr::Yield { argument, delegate })
    }

    /// Attempts to parse an arrow function head (`(params) =>` or
    /// `ident =>`), restoring the lexer on failure so the caller can retry
    /// as an ordinary expression.
    fn try_parse_arrow(&mut self) -> PResult<Option<Expr>> {
        let is_async = self.is_text("async") && !self.current.line_break_before;
        let mark = self.snapshot();
        if is_async {
            self.bump()?;
            if self.current.line_break_before {
                self.restore(mark);
                return Ok(None);
            }
        }
        if matches!(self.current.kind, TokenKind::Identifier) && !self.is_text("(") {
            let mark2 = self.snapshot();
            let name = self.bump()?.text;
            if self.is_text("=>") {
                self.bump()?;
                let def = self.parse_arrow_body(vec![Param { pattern: Pattern::Identifier(name), default: None, rest: false }], is_async)?;
                return Ok(Some(Expr::Arrow(def)));
            }
            self.restore(mark2);
            if is_async {
                self.restore(mark);
                return Ok(None);
            }
            return Ok(None);
        }
        if !self.is_text("(") {
            if is_async {
                self.restore(mark);
            }
            return Ok(None);
        }
        // Try to parse a parenthesized param list, then check for `=>`.
        let attempt = self.try_parse_paren_params();
        match attempt {
            Ok(Some(params)) if self.is_text("=>") => {
                self.bump()?;
                let def = self.parse_arrow_body(params, is_async)?;
                Ok(Some(Expr::Arrow(def)))
            }
            _ => {
                self.restore(mark);
                Ok(None)
            }
        }
    }

    fn try_parse_paren_params(&mut self) -> PResult<Option<Vec<Param>>> {
        match self.parse_params() {
            Ok(params) => {
                self.skip_type_annotation()?;
                Ok(Some(params))
            }
            Err(_) => Ok(None),
        }
    }

    fn parse_arrow_body(&mut self, params: Vec<Param>, is_async: bool) -> PResult<Rc<FunctionDef>> {
        let body = if self.is_text("{") {
            FunctionBody::Block(self.parse_block()?)
        } else {
            FunctionBody::Expression(Box::new(self.parse_assignment_expr()?))
        };
        Ok(Rc::new(FunctionDef {
                    name: None,
                    params,
                    body,
                    is_async,
                    is_generator: false,
                    is_arrow: true,
        }))
    }

    fn parse_conditional(&mut self, allow_in: bool) -> PResult<Expr> {
        let test = self.parse_nullish(allow_in)?;
        if self.eat("?")? {
            let consequent = Box::new(self.parse_assignment_expr()?);
            self.expect(":")?;
            let alternate = Box::new(self.parse_assignment_expr_impl(allow_in)?);
            return Ok(Expr::Conditional { test: Box::new(test), consequent, alternate });
        }
        Ok(test)
    }

    fn parse_nullish(&mut self, allow_in: bool) -> PResult<Expr> {
        let mut left = self.parse_logical_or(allow_in)?;
        while self.is_text("??") {
            self.bump()?;
            let right = self.parse_logical_or(allow_in)?;
            left = Expr::Logical { op: LogicalOp::NullishCoalescing, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_logical_or(&mut self, allow_in: bool) -> PResult<Expr> {
        let mut left = self.parse_logical_and(allow_in)?;
        while self.is_text("||") {
            self.bump()?;
            let right = self.parse_logical_and(allow_in)?;
            left = Expr::Logical { op: LogicalOp::Or, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_logical_and(&mut self, allow_in: bool) -> PResult<Expr> {
        let mut left = self.parse_bitwise_or(allow_in)?;
        while self.is_text("&&") {
            self.bump()?;
            let right = self.parse_bitwise_or(allow_in)?;
            left = Expr::Logical { op: LogicalOp::And, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_bitwise_or(&mut self, allow_in: bool) -> PResult<Expr> {
        let mut left = self.parse_bitwise_xor(allow_in)?;
        while self.is_text("|") {
            self.bump()?;
            let right = self.parse_bitwise_xor(allow_in)?;
            left = Expr::Binary { op: BinaryOp::BitOr, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_bitwise_xor(&mut self, allow_in: bool) -> PResult<Expr> {
        let mut left = self.parse_bitwise_and(allow_in)?;
        while self.is_text("^") {
            self.bump()?;
            let right = self.parse_bitwise_and(allow_in)?;
            left = Expr::Binary { op: BinaryOp::BitXor, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_bitwise_and(&mut self, allow_in: bool) -> PResult<Expr> {
        let mut left = self.parse_equality(allow_in)?;
        while self.is_text("&") {
            self.bump()?;
            let right = self.parse_equality(allow_in)?;
            left = Expr::Binary { op: BinaryOp::BitAnd, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_equality(&mut self, allow_in: bool) -> PResult<Expr> {
        let mut left = self.parse_relational(allow_in)?;
        loop {
            let op = match self.current.text.as_str() {
                "==" => BinaryOp::Equal,
                "!=" => BinaryOp::NotEqual,
                "===" => BinaryOp::StrictEqual,
                "!==" => BinaryOp::StrictNotEqual,
                _ => break,
            };
            self.bump()?;
            let right = self.parse_relational(allow_in)?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_relational(&mut self, allow_in: bool) -> PResult<Expr> {
        let mut left = self.parse_shift()?;
        loop {
            let op = match self.current.text.as_str() {
                "<" => BinaryOp::Less,
                "<=" => BinaryOp::LessEqual,
                ">" => BinaryOp::Greater,
                ">=" => BinaryOp::GreaterEqual,
                "instanceof" => BinaryOp::Instanceof,
                "in" if allow_in => BinaryOp::In,
                "as" => {
                    // `expr as Type` — discard the assertion, keep the value.
                    self.bump()?;
                    self.skip_type()?;
                    continue;
                }
                _ => break,
            };
            self.bump()?;
            let right = self.parse_shift()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> PResult<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.current.text.as_str() {
                "<<" => BinaryOp::ShiftLeft,
                ">>" => BinaryOp::ShiftRight,
                ">>>" => BinaryOp::UnsignedShiftRight,
                _ => break,
            };
            self.bump()?;
            let right = self.parse_additive()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current.text.as_str() {
                "+" => BinaryOp::Add,
                "-" => BinaryOp::Sub,
                _ => break,
            };
            self.bump()?;
            let right = self.parse_multiplicative()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut left = self.parse_exponent()?;
        loop {
            let op = match self.current.text.as_str() {
                "*" => BinaryOp::Mul,
                "/" => BinaryOp::Div,
                "%" => BinaryOp::Mod,
                _ => break,
            };
            self.bump()?;
            let right = self.parse_exponent()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    /// Right-associative: `2 ** 3 ** 2` is `2 ** (3 ** 2)`.
    fn parse_exponent(&mut self) -> PResult<Expr> {
        let left = self.parse_unary()?;
        if self.is_text("**") {
            self.bump()?;
            let right = self.parse_exponent()?;
            return Ok(Expr::Binary { op: BinaryOp::Exponent, left: Box::new(left), right: Box::new(right) });
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let op = match self.current.text.as_str() {
            "-" => Some(UnaryOp::Minus),
            "+" => Some(UnaryOp::Plus),
            "!" => Some(UnaryOp::Not),
            "~" => Some(UnaryOp::BitNot),
            "typeof" => Some(UnaryOp::Typeof),
            "void" => Some(UnaryOp::Void),
            "delete" => Some(UnaryOp::Delete),
            _ => None,
        };
        if let Some(op) = op {
            if matches!(self.current.kind, TokenKind::Punctuator | TokenKind::Keyword) {
                self.bump()?;
                let argument = Box::new(self.parse_unary()?);
                return Ok(Expr::Unary { op, argument });
            }
        }
        if self.is_text("++") || self.is_text("--") {
            let op = if self.bump()?.text == "++" { UpdateOp::Increment } else { UpdateOp::Decrement };
            let argument = Box::new(self.parse_unary()?);
            return Ok(Expr::Update { op, argument, prefix: true });
        }
        if self.is_text("await") {
            self.bump()?;
            let argument = Box::new(self.parse_unary()?);
            return Ok(Expr::Await(argument));
        }
        if self.is_text("<") {
            // Leading angle bracket with no preceding operand is a
            // TypeScript type-assertion cast (`<Type>expr`); a genuine
            // relational `<` never appears at the start of a unary operand.
            let mark = self.snapshot();
            self.bump()?;
            if self.skip_type().is_ok() && self.eat(">").unwrap_or(false) {
                return self.parse_unary();
            }
            self.restore(mark);
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let expr = self.parse_lhs_expr()?;
        if !self.current.line_break_before && (self.is_text("++") || self.is_text("--")) {
            let op = if self.bump()?.text == "++" { UpdateOp::Increment } else { UpdateOp::Decrement };
            return Ok(Expr::Update { op, argument: Box::new(expr), prefix: false });
        }
        if self.eat("!")? {
            // Non-null assertion `expr!` — erased, not represented.
            return Ok(expr);
        }
        Ok(expr)
    }

    /// Parses a call/new/member chain. Optional-chain links (`?.`) wrap the
    /// whole chain in a single `ChainExpression`-equivalent node once the
    /// chain is fully built.
    fn parse_lhs_expr(&mut self) -> PResult<Expr> {
        let mut has_optional = false;
        let mut expr = if self.is_text("new") {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        loop {
            if self.eat(".")? {
                if self.current.kind == TokenKind::PrivateIdentifier {
                    let name = self.bump()?.text;
                    expr = Expr::Member { object: Box::new(expr), property: MemberProperty::Private(name), optional: false };
                } else {
                    let name = self.expect_identifier()?;
                    expr = Expr::Member { object: Box::new(expr), property: MemberProperty::Identifier(name), optional: false };
                }
            } else if self.is_text("?.") {
                self.bump()?;
                has_optional = true;
                if self.is_text("(") {
                    let arguments = self.parse_arguments()?;
                    expr = Expr::Call { callee: Box::new(expr), arguments, optional: true };
                } else if self.eat("[")? {
                    let prop = self.parse_expression()?;
                    self.expect("]")?;
                    expr = Expr::Member { object: Box::new(expr), property: MemberProperty::Computed(Box::new(prop)), optional: true };
                } else if self.current.kind == TokenKind::PrivateIdentifier {
                    let name = self.bump()?.text;
                    expr = Expr::Member { object: Box::new(expr), property: MemberProperty::Private(name), optional: true };
                } else {
                    let name = self.expect_identifier()?;
                    expr = Expr::Member { object: Box::new(expr), property: MemberProperty::Identifier(name), optional: true };
                }
            } else if self.eat("[")? {
                let prop = self.parse_expression()?;
                self.expect("]")?;
                expr = Expr::Member { object: Box::new(expr), property: MemberProperty::Computed(Box::new(prop)), optional: false };
            } else if self.is_text("(") {
                let arguments = self.parse_arguments()?;
                expr = Expr::Call { callee: Box::new(expr), arguments, optional: false };
            } else {
                break;
            }
        }
        if has_optional {
            expr = Expr::Chain(Box::new(expr));
        }
        Ok(expr)
    }

    fn parse_new(&mut self) -> PResult<Expr> {
        self.expect("new")?;
        let callee = if self.is_text("new") { self.parse_new()? } else { self.parse_primary_member_only()? };
        let arguments = if self.is_text("(") { self.parse_arguments()? } else { Vec::new() };
        Ok(Expr::New { callee: Box::new(callee), arguments })
    }

    /// Member-access chain without call parsing, used for `new`'s callee so
    /// `new a.b.c(...)` attaches the call to the whole `new` expression.
    fn parse_primary_member_only(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(".")? {
                let name = self.expect_identifier()?;
                expr = Expr::Member { object: Box::new(expr), property: MemberProperty::Identifier(name), optional: false };
            } else if self.eat("[")? {
                let prop = self.parse_expression()?;
                self.expect("]")?;
                expr = Expr::Member { object: Box::new(expr), property: MemberProperty::Computed(Box::new(prop)), optional: false };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_arguments(&mut self) -> PResult<Vec<Argument>> {
        self.expect("(")?;
        let mut args = Vec::new();
        while !self.is_text(")") {
            if self.eat("...")? {
                args.push(Argument::Spread(self.parse_assignment_expr()?));
            } else {
                args.push(Argument::Normal(self.parse_assignment_expr()?));
            }
            if !self.eat(",")? {
                break;
            }
        }
        self.expect(")")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        match self.current.kind {
            TokenKind::Number => {
                let text = self.bump()?.text;
                if let Some(digits) = text.strip_suffix('n') {
                    return Ok(Expr::Literal(Literal::BigInt(digits.to_owned())));
                }
                Ok(Expr::Literal(Literal::Number(parse_numeric_literal(&text))))
            }
            TokenKind::String => Ok(Expr::Literal(Literal::String(self.bump()?.text))),
            TokenKind::PrivateIdentifier => {
                // A bare private name only appears as the left of `#x in obj`.
                let name = self.bump()?.text;
                Ok(Expr::Member {
                        object: Box::new(Expr::This),
                        property: MemberProperty::Private(name),
                        optional: false,
                })
            }
            _ => self.parse_primary_keyword_or_ident(),
        }
    }

    fn parse_primary_keyword_or_ident(&mut self) -> PResult<Expr> {
        if self.is_text("this") {
            self.bump()?;
            return Ok(Expr::This);
        }
        if self.is_text("super") {
            self.bump()?;
            return Ok(Expr::Super);
        }
        if self.is_text("true") {
            self.bump()?;
            return Ok(Expr::Literal(Literal::Bool(true)));
        }
        if self.is_text("false") {
            self.bump()?;
            return Ok(Expr::Literal(Literal::Bool(false)));
        }
        if self.is_text("null") {
            self.bump()?;
            return Ok(Expr::Literal(Literal::Null));
        }
        if self.is_text("undefined") {
            self.bump()?;
            return Ok(Expr::Identifier("undefined".to_owned()));
        }
        if self.is_text("function") {
            return Ok(Expr::Function(self.parse_function(false)?));
        }
        if self.is_text("async") && self.peek_is_function() {
            let mark = self.snapshot();
            self.bump()?;
            if self.is_text("function") {
                return Ok(Expr::Function(self.parse_function(true)?));
            }
            self.restore(mark);
        }
        if self.is_text("class") {
            return Ok(Expr::Class(self.parse_class()?));
        }
        if self.is_text("(") {
            self.bump()?;
            let expr = self.parse_expression()?;
            self.expect(")")?;
            return Ok(expr);
        }
        if self.is_text("[") {
            return self.parse_array_literal();
        }
        if self.is_text("{") {
            return self.parse_object_literal();
        }
        if self.is_text("`") || self.current.text.starts_with('`') {
            return self.parse_template_literal();
        }
        if matches!(self.current.kind, TokenKind::Identifier | TokenKind::Keyword) {
            let name = self.bump()?.text;
            return Ok(Expr::Identifier(name));
        }
        Err(TsError::parse(
                format!("unexpected token '{}'", self.current.text),
                self.current.span,
        ))
    }

    fn parse_array_literal(&mut self) -> PResult<Expr> {
        self.expect("[")?;
        let mut elements = Vec::new();
        while !self.is_text("]") {
            if self.is_text(",") {
                self.bump()?;
                elements.push(None);
                continue;
            }
            if self.eat("...")? {
                elements.push(Some(ArrayElement::Spread(self.parse_assignment_expr()?)));
            } else {
                elements.push(Some(ArrayElement::Item(self.parse_assignment_expr()?)));
            }
            if !self.eat(",")? {
                break;
            }
        }
        self.expect("]")?;
        Ok(Expr::Array(elements))
    }

    fn parse_object_literal(&mut self) -> PResult<Expr> {
        self.expect("{")?;
        let mut properties = Vec::new();
        while !self.is_text("}") {
            if self.eat("...")? {
                properties.push(ObjectProperty {
                        key: PropertyKey::Identifier(String::new()),
                        kind: PropertyKind::Spread(self.parse_assignment_expr()?),
                        computed: false,
                        shorthand: false,
                });
                if !self.eat(",")? {
                    break;
                }
                continue;
            }
            let is_async = self.is_text("async") && !self.peek_is_object_method_modifier_end();
            let is_async = if is_async { self.bump()?; true } else { false };
            let is_generator = self.eat("*")?;
            let accessor = if self.is_text("get") || self.is_text("set") {
                let mark = self.snapshot();
                let kw = self.bump()?.text;
                if self.is_text(":") || self.is_text(",") || self.is_text("}") || self.is_text("(") {
                    self.restore(mark);
                    None
                } else {
                    Some(kw)
                }
            } else {
                None
            };
            let computed = self.is_text("[");
            let key = self.parse_property_key()?;
            if self.is_text("(") {
                self.try_skip_type_params();
                let params = self.parse_params()?;
                self.skip_type_annotation()?;
                let body = FunctionBody::Block(self.parse_block()?);
                let function = Rc::new(FunctionDef {
                        name: static_key_text(&key),
                        params,
                        body,
                        is_async,
                        is_generator,
                        is_arrow: false,
                });
                let kind = match accessor.as_deref() {
                    Some("get") => PropertyKind::Get(function),
                    Some("set") => PropertyKind::Set(function),
                    _ => PropertyKind::Init(Expr::Function(function)),
                };
                properties.push(ObjectProperty { key, kind, computed, shorthand: false });
            } else if self.eat(":")? {
                let value = self.parse_assignment_expr()?;
                properties.push(ObjectProperty { key, kind: PropertyKind::Init(value), computed, shorthand: false });
            } else {
                let name = match &key {
                    PropertyKey::Identifier(s) => s.clone(),
                    _ => {
                        return Err(TsError::parse("invalid shorthand property", self.current.span));
                    }
                };
                let value = if self.eat("=")? {
                    Expr::Assignment {
                        op: AssignOp::Assign,
                        left: Box::new(Pattern::Identifier(name.clone())),
                        right: Box::new(self.parse_assignment_expr()?),
                    }
                } else {
                    Expr::Identifier(name)
                };
                properties.push(ObjectProperty { key, kind: PropertyKind::Init(value), computed, shorthand: true });
            }
            if !self.eat(",")? {
                break;
            }
        }
        self.expect("}")?;
        Ok(Expr::Object(properties))
    }

    fn peek_is_object_method_modifier_end(&self) -> bool {
        false
    }

    fn parse_template_literal(&mut self) -> PResult<Expr> {
        // The lexer already produced the backtick as an ordinary one-char
        // punctuator token, which leaves its internal position exactly at
        // the start of the template's content — exactly where
        // `read_template_chunk` expects to begin. Don't call `bump`/`next_token`
        // here: that would re-tokenize the template body with the normal
        // rules instead of the dedicated template scanner.
        debug_assert!(self.current.text.starts_with('`'));
        let mut quasis = Vec::new();
        let mut expressions = Vec::new();
        loop {
            let chunk = self.lexer.read_template_chunk()?;
            quasis.push(TemplateElement { cooked: chunk.cooked, raw: chunk.raw, tail: chunk.tail });
            if chunk.tail {
                self.current = self.lexer.next_token()?;
                break;
            }
            self.current = self.lexer.next_token()?;
            expressions.push(self.parse_expression()?);
            if !self.is_text("}") {
                return Err(TsError::parse(
                        "expected '}' to close template interpolation",
                        self.current.span,
                ));
            }
            // As with the opening backtick, don't call `next_token` here:
            // the lexer's position is already exactly past the `}` and
            // ready for `read_template_chunk` to resume scanning template
            // content, which is not governed by the ordinary token rules.
        }
        Ok(Expr::TemplateLiteral { quasis, expressions })
    }
}

fn static_key_text(key: &PropertyKey) -> Option<String> {
    match key {
        PropertyKey::Identifier(s) | PropertyKey::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn assignment_op(text: &str) -> Option<AssignOp> {
    Some(match text {
            "=" => AssignOp::Assign,
            "+=" => AssignOp::AddAssign,
            "-=" => AssignOp::SubAssign,
            "*=" => AssignOp::MulAssign,
            "/=" => AssignOp::DivAssign,
            "%=" => AssignOp::ModAssign,
            "**=" => AssignOp::ExponentAssign,
            "<<=" => AssignOp::ShiftLeftAssign,
            ">>=" => AssignOp::ShiftRightAssign,
            ">>>=" => AssignOp::UnsignedShiftRightAssign,
            "&=" => AssignOp::BitAndAssign,
            "|=" => AssignOp::BitOrAssign,
            "^=" => AssignOp::BitXorAssign,
            "&&=" => AssignOp::LogicalAndAssign,
            "||=" => AssignOp::LogicalOrAssign,
            "??=" => AssignOp::NullishAssign,
            _ => return None,
    })
}

fn parse_numeric_literal(text: &str) -> f64 {
    let text = text.strip_suffix('n').unwrap_or(text);
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).unwrap_or(0) as f64;
    }
    if let Some(bin) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
        return i64::from_str_radix(bin, 2).unwrap_or(0) as f64;
    }
    if let Some(oct) = text.strip_prefix("0o").or_else(|| text.strip_prefix("0O")) {
        return i64::from_str_radix(oct, 8).unwrap_or(0) as f64;
    }
    text.parse::<f64>().unwrap_or(f64::NAN)
}

/// Converts an already-parsed expression into an assignment/binding
/// pattern, for destructuring assignment targets (`[a, b] = x`) that were
/// first parsed as ordinary array/object expressions.
fn expr_to_pattern(expr: Expr) -> PResult<Pattern> {
    match expr {
        Expr::Identifier(name) => Ok(Pattern::Identifier(name)),
        Expr::Member { .. } => Ok(Pattern::Member(Box::new(expr))),
        Expr::Array(elements) => {
            let mut out = Vec::new();
            let mut rest = None;
            for (i, elem) in elements.into_iter().enumerate() {
                match elem {
                    None => out.push(None),
                    Some(ArrayElement::Item(e)) => out.push(Some(expr_to_pattern(e)?)),
                    Some(ArrayElement::Spread(e)) => {
                        rest = Some(Box::new(expr_to_pattern(e)?));
                        debug_assert_eq!(i, i); // spread must be last; grammar already enforces it
                    }
                }
            }
            Ok(Pattern::Array { elements: out, rest })
        }
        Expr::Object(props) => {
            let mut out = Vec::new();
            let mut rest = None;
            for prop in props {
                match prop.kind {
                    PropertyKind::Init(value) => {
                        out.push(ObjectPatternProp {
                                key: prop.key,
                                value: expr_to_pattern(value)?,
                                computed: prop.computed,
                                shorthand: prop.shorthand,
                        });
                    }
                    PropertyKind::Spread(e) => rest = Some(Box::new(expr_to_pattern(e)?)),
                    PropertyKind::Get(_) | PropertyKind::Set(_) => {
                        return Err(TsError::parse(
                                "invalid destructuring target",
                                Span::default(),
                        ));
                    }
                }
            }
            Ok(Pattern::Object { properties: out, rest })
        }
        Expr::Assignment { op: AssignOp::Assign, left, right } => {
            Ok(Pattern::Assignment { left, right })
        }
        other => Ok(Pattern::Member(Box::new(other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Program {
        Parser::parse_script(src).unwrap()
    }

    #[test]
    fn parses_variable_declaration() {
        let prog = parse("let x = 1 + 2;");
        assert_eq!(prog.body.len(), 1);
        assert!(matches!(prog.body[0], Stmt::VariableDeclaration { .. }));
    }

    #[test]
    fn parses_function_declaration_with_types() {
        let prog = parse("function add(a: number, b: number): number { return a + b; }");
        assert_eq!(prog.body.len(), 1);
        let Stmt::FunctionDeclaration(def) = &prog.body[0] else { panic!() };
        assert_eq!(def.params.len(), 2);
    }

    #[test]
    fn parses_arrow_function() {
        let prog = parse("const f = (x) => x + 1;");
        let Stmt::VariableDeclaration { declarations, .. } = &prog.body[0] else { panic!() };
        assert!(matches!(declarations[0].init, Some(Expr::Arrow(_))));
    }

    #[test]
    fn parses_arrow_with_single_bare_identifier() {
        let prog = parse("const f = x => x;");
        let Stmt::VariableDeclaration { declarations, .. } = &prog.body[0] else { panic!() };
        assert!(matches!(declarations[0].init, Some(Expr::Arrow(_))));
    }

    #[test]
    fn parses_class_with_private_field() {
        let prog = parse("class C { #x = 1; getX() { return this.#x; } }");
        let Stmt::ClassDeclaration(def) = &prog.body[0] else { panic!() };
        assert_eq!(def.body.len(), 2);
    }

    #[test]
    fn parses_optional_chaining_into_single_chain_node() {
        let prog = parse("a?.b.c;");
        let Stmt::Expression(expr) = &prog.body[0] else { panic!() };
        assert!(matches!(expr, Expr::Chain(_)));
    }

    #[test]
    fn asi_inserts_semicolon_across_newline() {
        let prog = parse("let a = 1\nlet b = 2");
        assert_eq!(prog.body.len(), 2);
    }

    #[test]
    fn type_alias_and_interface_are_erased() {
        let prog = parse("type X = { a: number }; interface Y { b: string } let z = 1;");
        assert_eq!(prog.body.len(), 3);
        assert_eq!(prog.body[0], Stmt::Empty);
        assert_eq!(prog.body[1], Stmt::Empty);
    }

    #[test]
    fn destructuring_assignment_target() {
        let prog = parse("[a, b] = [1, 2];");
        let Stmt::Expression(Expr::Assignment { left, .. }) = &prog.body[0] else { panic!() };
        assert!(matches!(**left, Pattern::Array { .. }));
    }

    #[test]
    fn template_literal_with_interpolation() {
        let prog = parse("`a${1}b`;");
        let Stmt::Expression(Expr::TemplateLiteral { quasis, expressions }) = &prog.body[0] else { panic!() };
        assert_eq!(quasis.len(), 2);
        assert_eq!(expressions.len(), 1);
    }

    #[test]
    fn break_with_no_semicolon_before_brace() {
        let prog = parse("while (true) { break }");
        let Stmt::While { body, .. } = &prog.body[0] else { panic!() };
        let Stmt::Block(stmts) = &**body else { panic!() };
        assert!(matches!(stmts[0], Stmt::Break(None)));
    }
}
