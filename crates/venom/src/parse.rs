//! The parser.
//!
//! Recursive descent over the token stream, producing the raw AST the
//! semantic analyzer consumes. Statements are separated by newlines or
//! semicolons; blocks close with `end`.

use crate::{
    ast::{
        AssignStmt, ClassAttrDeclStmt, ClassDeclStmt, Expr, ExprStmt, ForStmt, FuncDeclStmt,
        IdentExpr, IfStmt, ImportStmt, ListLitExpr, MapLitExpr, NodeInfo, ParamDecl, ReturnStmt,
        Stmt, StmtList, TypeSpec, UnOpExpr, UnOpKind, BinOpExpr, BinOpKind, ArrayAccessExpr,
        AttrAccessExpr, CallExpr,
    },
    error::{CompileError, CompileResult, SourceLoc},
    lex::{Tok, Token, lex},
};

/// Parses a whole module.
pub fn parse_module(src: &str) -> CompileResult<StmtList> {
    let tokens = lex(src)?;
    let mut p = Parser { tokens, pos: 0 };
    let stmts = p.parse_stmts_until(&[Tok::Eof])?;
    p.expect(&Tok::Eof)?;
    Ok(StmtList::new(stmts))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos].tok
    }

    fn loc(&self) -> SourceLoc {
        self.tokens[self.pos].loc
    }

    fn bump(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == tok {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok) -> CompileResult<Token> {
        if self.peek() == tok {
            Ok(self.bump())
        } else {
            Err(CompileError::parse(
                format!("Expected `{tok}`, found `{}`", self.peek()),
                self.loc(),
            ))
        }
    }

    fn expect_ident(&mut self) -> CompileResult<(String, SourceLoc)> {
        let loc = self.loc();
        match self.peek().clone() {
            Tok::Ident(name) => {
                self.bump();
                Ok((name, loc))
            }
            other => Err(CompileError::parse(
                format!("Expected identifier, found `{other}`"),
                loc,
            )),
        }
    }

    fn skip_seps(&mut self) {
        while matches!(self.peek(), Tok::Newline | Tok::Semi) {
            self.bump();
        }
    }

    fn parse_stmts_until(&mut self, stops: &[Tok]) -> CompileResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            self.skip_seps();
            if stops.contains(self.peek()) {
                return Ok(stmts);
            }
            stmts.push(self.parse_stmt()?);
            // a statement must be followed by a separator or a stop token
            if !stops.contains(self.peek())
                && !matches!(self.peek(), Tok::Newline | Tok::Semi)
            {
                return Err(CompileError::parse(
                    format!("Expected end of statement, found `{}`", self.peek()),
                    self.loc(),
                ));
            }
        }
    }

    fn parse_stmt(&mut self) -> CompileResult<Stmt> {
        match self.peek() {
            Tok::KwImport => self.parse_import(),
            Tok::KwClass => self.parse_class(),
            Tok::KwDef => self.parse_func(),
            Tok::KwAttr => self.parse_attr(),
            Tok::KwIf => self.parse_if(),
            Tok::KwFor => self.parse_for(),
            Tok::KwReturn => self.parse_return(),
            _ => self.parse_assign_or_expr(),
        }
    }

    fn parse_import(&mut self) -> CompileResult<Stmt> {
        let loc = self.loc();
        self.expect(&Tok::KwImport)?;
        let mut path = vec![self.expect_ident()?.0];
        while self.eat(&Tok::Dot) {
            path.push(self.expect_ident()?.0);
        }
        Ok(Stmt::Import(ImportStmt {
            path,
            loc,
            module: None,
        }))
    }

    fn parse_type_params(&mut self) -> CompileResult<Vec<String>> {
        let mut out = Vec::new();
        if self.eat(&Tok::LBrace) {
            loop {
                out.push(self.expect_ident()?.0);
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
            self.expect(&Tok::RBrace)?;
        }
        Ok(out)
    }

    fn parse_type(&mut self) -> CompileResult<TypeSpec> {
        let loc = self.loc();
        let mut path = vec![self.expect_ident()?.0];
        while self.eat(&Tok::Dot) {
            path.push(self.expect_ident()?.0);
        }
        let mut args = Vec::new();
        if self.eat(&Tok::LBrace) {
            loop {
                args.push(self.parse_type()?);
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
            self.expect(&Tok::RBrace)?;
        }
        Ok(TypeSpec {
            path,
            args,
            loc,
            resolved: None,
        })
    }

    fn parse_class(&mut self) -> CompileResult<Stmt> {
        let loc = self.loc();
        self.expect(&Tok::KwClass)?;
        let (name, _) = self.expect_ident()?;
        let type_params = self.parse_type_params()?;
        let mut parents = Vec::new();
        if self.eat(&Tok::Subtype) {
            parents.push(self.parse_type()?);
        }
        let stmts = self.parse_stmts_until(&[Tok::KwEnd])?;
        self.expect(&Tok::KwEnd)?;
        Ok(Stmt::ClassDecl(ClassDeclStmt {
            name,
            type_params,
            parents,
            body: StmtList::new(stmts),
            loc,
            sym: None,
            type_param_itypes: Vec::new(),
            instantiation_of: None,
        }))
    }

    fn parse_func(&mut self) -> CompileResult<Stmt> {
        let loc = self.loc();
        self.expect(&Tok::KwDef)?;
        let (name, _) = self.expect_ident()?;
        let type_params = self.parse_type_params()?;
        self.expect(&Tok::LParen)?;
        let mut params = Vec::new();
        if !self.eat(&Tok::RParen) {
            loop {
                let (pname, ploc) = self.expect_ident()?;
                self.expect(&Tok::DoubleColon)?;
                let ty = self.parse_type()?;
                params.push(ParamDecl {
                    name: pname,
                    ty,
                    loc: ploc,
                });
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
            self.expect(&Tok::RParen)?;
        }
        let ret = if self.eat(&Tok::DoubleColon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(&Tok::Assign)?;
        let stmts = self.parse_stmts_until(&[Tok::KwEnd])?;
        self.expect(&Tok::KwEnd)?;
        let is_ctor = name == "ctor";
        Ok(Stmt::FuncDecl(FuncDeclStmt {
            name,
            type_params,
            params,
            ret,
            body: StmtList::new(stmts),
            is_ctor,
            loc,
            sym: None,
            type_param_itypes: Vec::new(),
            instantiation_args: Vec::new(),
        }))
    }

    fn parse_attr(&mut self) -> CompileResult<Stmt> {
        let loc = self.loc();
        self.expect(&Tok::KwAttr)?;
        let (name, _) = self.expect_ident()?;
        self.expect(&Tok::DoubleColon)?;
        let ty = self.parse_type()?;
        let init = if self.eat(&Tok::Assign) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(Stmt::ClassAttrDecl(ClassAttrDeclStmt {
            name,
            ty,
            private: false,
            init,
            loc,
            sym: None,
        }))
    }

    fn parse_if(&mut self) -> CompileResult<Stmt> {
        let loc = self.loc();
        self.expect(&Tok::KwIf)?;
        let cond = self.parse_expr()?;
        self.expect(&Tok::KwThen)?;
        let then_stmts = self.parse_stmts_until(&[Tok::KwElse, Tok::KwEnd])?;
        let else_stmts = if self.eat(&Tok::KwElse) {
            self.parse_stmts_until(&[Tok::KwEnd])?
        } else {
            Vec::new()
        };
        self.expect(&Tok::KwEnd)?;
        Ok(Stmt::If(IfStmt {
            cond,
            then_body: StmtList::new(then_stmts),
            else_body: StmtList::new(else_stmts),
            loc,
        }))
    }

    fn parse_for(&mut self) -> CompileResult<Stmt> {
        let loc = self.loc();
        self.expect(&Tok::KwFor)?;
        let (var_name, var_loc) = self.expect_ident()?;
        self.expect(&Tok::KwIn)?;
        let iter = self.parse_expr()?;
        let stmts = self.parse_stmts_until(&[Tok::KwEnd])?;
        self.expect(&Tok::KwEnd)?;
        Ok(Stmt::For(ForStmt {
            var: Expr::ident(var_name, var_loc),
            iter,
            body: StmtList::new(stmts),
            loc,
        }))
    }

    fn parse_return(&mut self) -> CompileResult<Stmt> {
        let loc = self.loc();
        self.expect(&Tok::KwReturn)?;
        let value = if matches!(
            self.peek(),
            Tok::Newline | Tok::Semi | Tok::KwEnd | Tok::KwElse | Tok::Eof
        ) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        Ok(Stmt::Return(ReturnStmt { value, loc }))
    }

    fn parse_assign_or_expr(&mut self) -> CompileResult<Stmt> {
        let loc = self.loc();
        let lhs = self.parse_expr()?;
        if self.eat(&Tok::Assign) {
            match lhs {
                Expr::Ident(_) | Expr::AttrAccess(_) | Expr::ArrayAccess(_) => {}
                _ => {
                    return Err(CompileError::parse(
                        "Invalid assignment target",
                        loc,
                    ));
                }
            }
            let rhs = self.parse_expr()?;
            Ok(Stmt::Assign(AssignStmt { lhs, rhs, loc, decl: false }))
        } else {
            Ok(Stmt::Expr(ExprStmt { expr: lhs, loc }))
        }
    }

    fn parse_expr(&mut self) -> CompileResult<Expr> {
        self.parse_binary(0)
    }

    /// Binary operators by precedence level, loosest first.
    fn parse_binary(&mut self, level: usize) -> CompileResult<Expr> {
        const LEVELS: &[&[(Tok, BinOpKind)]] = &[
            &[(Tok::OrOr, BinOpKind::CmpOr)],
            &[(Tok::AndAnd, BinOpKind::CmpAnd)],
            &[(Tok::Pipe, BinOpKind::BitOr)],
            &[(Tok::Caret, BinOpKind::BitXor)],
            &[(Tok::Amp, BinOpKind::BitAnd)],
            &[(Tok::Eq, BinOpKind::CmpEq), (Tok::Neq, BinOpKind::CmpNeq)],
            &[
                (Tok::Lt, BinOpKind::CmpLt),
                (Tok::Le, BinOpKind::CmpLe),
                (Tok::Gt, BinOpKind::CmpGt),
                (Tok::Ge, BinOpKind::CmpGe),
            ],
            &[(Tok::Shl, BinOpKind::BitLshift), (Tok::Shr, BinOpKind::BitRshift)],
            &[(Tok::Plus, BinOpKind::Add), (Tok::Minus, BinOpKind::Sub)],
            &[
                (Tok::Star, BinOpKind::Mult),
                (Tok::Slash, BinOpKind::Div),
                (Tok::Percent, BinOpKind::Mod),
            ],
        ];
        if level == LEVELS.len() {
            return self.parse_unary();
        }
        let mut lhs = self.parse_binary(level + 1)?;
        loop {
            let found = LEVELS[level]
                .iter()
                .find(|(t, _)| t == self.peek())
                .map(|(_, op)| *op);
            let Some(op) = found else {
                return Ok(lhs);
            };
            let loc = self.loc();
            self.bump();
            let rhs = self.parse_binary(level + 1)?;
            lhs = Expr::BinOp(BinOpExpr {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                info: NodeInfo::at(loc),
            });
        }
    }

    fn parse_unary(&mut self) -> CompileResult<Expr> {
        let loc = self.loc();
        let op = match self.peek() {
            Tok::Minus => Some(UnOpKind::Minus),
            Tok::Plus => Some(UnOpKind::Plus),
            Tok::Not => Some(UnOpKind::CmpNot),
            Tok::BitNot => Some(UnOpKind::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let operand = self.parse_unary()?;
            return Ok(Expr::UnOp(UnOpExpr {
                op,
                operand: Box::new(operand),
                info: NodeInfo::at(loc),
            }));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> CompileResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Tok::Dot => {
                    let loc = self.loc();
                    self.bump();
                    let (attr, _) = self.expect_ident()?;
                    expr = Expr::AttrAccess(AttrAccessExpr {
                        primary: Box::new(expr),
                        attr,
                        info: NodeInfo::at(loc),
                    });
                }
                Tok::LBracket => {
                    let loc = self.loc();
                    self.bump();
                    let index = self.parse_expr()?;
                    self.expect(&Tok::RBracket)?;
                    expr = Expr::ArrayAccess(ArrayAccessExpr {
                        primary: Box::new(expr),
                        index: Box::new(index),
                        info: NodeInfo::at(loc),
                    });
                }
                Tok::LParen => {
                    let loc = self.loc();
                    self.bump();
                    let args = self.parse_call_args()?;
                    expr = Expr::Call(CallExpr {
                        callee: Box::new(expr),
                        type_args: Vec::new(),
                        args,
                        info: NodeInfo::at(loc),
                    });
                }
                Tok::LBrace => {
                    // explicit type arguments: `f{T,...}(...)`; backtrack if
                    // this brace does not turn out to start a call
                    let save = self.pos;
                    let loc = self.loc();
                    match self.try_parse_type_args() {
                        Ok(type_args) if *self.peek() == Tok::LParen => {
                            self.bump();
                            let args = self.parse_call_args()?;
                            expr = Expr::Call(CallExpr {
                                callee: Box::new(expr),
                                type_args,
                                args,
                                info: NodeInfo::at(loc),
                            });
                        }
                        _ => {
                            self.pos = save;
                            return Ok(expr);
                        }
                    }
                }
                _ => return Ok(expr),
            }
        }
    }

    fn try_parse_type_args(&mut self) -> CompileResult<Vec<TypeSpec>> {
        self.expect(&Tok::LBrace)?;
        let mut out = Vec::new();
        loop {
            out.push(self.parse_type()?);
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(&Tok::RBrace)?;
        Ok(out)
    }

    fn parse_call_args(&mut self) -> CompileResult<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&Tok::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(&Tok::RParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> CompileResult<Expr> {
        let loc = self.loc();
        match self.peek().clone() {
            Tok::Int(v) => {
                self.bump();
                Ok(Expr::IntLit(v, NodeInfo::at(loc)))
            }
            Tok::Float(v) => {
                self.bump();
                Ok(Expr::FloatLit(v, NodeInfo::at(loc)))
            }
            Tok::Str(s) => {
                self.bump();
                Ok(Expr::StrLit(s, NodeInfo::at(loc)))
            }
            Tok::KwTrue => {
                self.bump();
                Ok(Expr::BoolLit(true, NodeInfo::at(loc)))
            }
            Tok::KwFalse => {
                self.bump();
                Ok(Expr::BoolLit(false, NodeInfo::at(loc)))
            }
            Tok::KwSelf => {
                self.bump();
                Ok(Expr::SelfExpr(NodeInfo::at(loc)))
            }
            Tok::KwSuper => {
                self.bump();
                Ok(Expr::SuperExpr(NodeInfo::at(loc)))
            }
            Tok::Ident(name) => {
                self.bump();
                Ok(Expr::Ident(IdentExpr {
                    name,
                    info: NodeInfo::at(loc),
                }))
            }
            Tok::LParen => {
                self.bump();
                let e = self.parse_expr()?;
                self.expect(&Tok::RParen)?;
                Ok(e)
            }
            Tok::LBracket => {
                self.bump();
                let mut elems = Vec::new();
                if !self.eat(&Tok::RBracket) {
                    loop {
                        elems.push(self.parse_expr()?);
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                    }
                    self.expect(&Tok::RBracket)?;
                }
                Ok(Expr::ListLit(ListLitExpr {
                    elems,
                    info: NodeInfo::at(loc),
                }))
            }
            Tok::LBrace => {
                self.bump();
                let mut pairs = Vec::new();
                if !self.eat(&Tok::RBrace) {
                    loop {
                        let k = self.parse_expr()?;
                        self.expect(&Tok::Colon)?;
                        let v = self.parse_expr()?;
                        pairs.push((k, v));
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                    }
                    self.expect(&Tok::RBrace)?;
                }
                Ok(Expr::MapLit(MapLitExpr {
                    pairs,
                    info: NodeInfo::at(loc),
                }))
            }
            other => Err(CompileError::parse(
                format!("Unexpected token `{other}` in expression"),
                loc,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arithmetic_precedence() {
        let m = parse_module("x = 1 + 2 * 3").unwrap();
        let Stmt::Assign(a) = &m.stmts[0] else {
            panic!("expected assignment");
        };
        let Expr::BinOp(add) = &a.rhs else {
            panic!("expected binop");
        };
        assert_eq!(add.op, BinOpKind::Add);
        let Expr::BinOp(mul) = add.rhs.as_ref() else {
            panic!("expected nested mult");
        };
        assert_eq!(mul.op, BinOpKind::Mult);
    }

    #[test]
    fn test_parse_class_and_method() {
        let src = "class B <: A\n  def m() :: int = return 2; end\nend";
        let m = parse_module(src).unwrap();
        let Stmt::ClassDecl(c) = &m.stmts[0] else {
            panic!("expected class decl");
        };
        assert_eq!(c.name, "B");
        assert_eq!(c.parents.len(), 1);
        assert!(matches!(c.body.stmts[0], Stmt::FuncDecl(_)));
    }

    #[test]
    fn test_parse_explicit_type_args() {
        let m = parse_module("print(id{int}(41) + 1)").unwrap();
        let Stmt::Expr(es) = &m.stmts[0] else {
            panic!("expected expr stmt");
        };
        let Expr::Call(print_call) = &es.expr else {
            panic!("expected call");
        };
        let Expr::BinOp(add) = &print_call.args[0] else {
            panic!("expected binop arg");
        };
        let Expr::Call(inner) = add.lhs.as_ref() else {
            panic!("expected inner call");
        };
        assert_eq!(inner.type_args.len(), 1);
        assert_eq!(inner.type_args[0].path, ["int"]);
    }

    #[test]
    fn test_parse_map_literal_vs_type_args() {
        let m = parse_module("m = {1 : 2, 3 : 4}").unwrap();
        let Stmt::Assign(a) = &m.stmts[0] else {
            panic!("expected assignment");
        };
        assert!(matches!(&a.rhs, Expr::MapLit(p) if p.pairs.len() == 2));
    }

    #[test]
    fn test_parse_if_for_and_literals() {
        let src = "if x < 10 then print(\"lo\") else print(\"hi\") end\nfor x in [1, 2]\n  y = x\nend";
        let m = parse_module(src).unwrap();
        assert!(matches!(m.stmts[0], Stmt::If(_)));
        assert!(matches!(m.stmts[1], Stmt::For(_)));
    }
}
