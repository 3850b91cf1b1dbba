//! Script compiler
//!
//! Parses with SWC and lowers the supported statement and expression subset
//! into the owned IR in [`crate::ir`]. Anything outside that subset is
//! reported as a syntax error at the position of the offending node.

use std::sync::Arc;

use swc_common::{FileName, SourceMap, Span, Spanned, sync::Lrc};
use swc_ecma_ast as ast;
use swc_ecma_parser::{EsSyntax, Parser, StringInput, Syntax, lexer::Lexer};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::ir::{
    BinaryOp, CompiledScript, DeclKind, Expr, Literal, LogicalOp, MemberKey, Pos, Stmt, StmtKind,
    Target, UnaryOp,
};

/// Compile `source` into a runnable script
pub fn compile(source: &str, source_name: &str) -> EngineResult<CompiledScript> {
    let cm: Lrc<SourceMap> = Default::default();
    let fm = cm.new_source_file(
        Lrc::new(FileName::Custom(source_name.to_string())),
        source.to_string(),
    );
    let lines = LineIndex::new(source, fm.start_pos.0);

    let lexer = Lexer::new(
        Syntax::Es(EsSyntax::default()),
        ast::EsVersion::Es2022,
        StringInput::from(&*fm),
        None,
    );
    let mut parser = Parser::new_from(lexer);

    let parsed = parser.parse_script();
    let recovered = parser.take_errors();
    let script = match parsed {
        Ok(script) => script,
        Err(e) => return Err(lines.error(e.span(), &e.kind().msg())),
    };
    if let Some(e) = recovered.first() {
        return Err(lines.error(e.span(), &e.kind().msg()));
    }

    let lowering = Lowering { lines: &lines };
    let body = script
        .body
        .iter()
        .map(|stmt| lowering.stmt(stmt))
        .collect::<EngineResult<Vec<_>>>()?;

    debug!(source_name, statements = body.len(), "script compiled");
    Ok(CompiledScript {
        source_name: Arc::from(source_name),
        body,
    })
}

/// Byte offset to line/column translation for one source file
struct LineIndex<'a> {
    source: &'a str,
    start: u32,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(source: &'a str, start: u32) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            source
                .char_indices()
                .filter(|(_, c)| *c == '\n')
                .map(|(i, _)| i + 1),
        );
        Self {
            source,
            start,
            line_starts,
        }
    }

    fn pos(&self, span: Span) -> Pos {
        let offset = (span.lo.0.saturating_sub(self.start) as usize).min(self.source.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let line_start = self.line_starts[line];
        let column = self
            .source
            .get(line_start..offset)
            .map(|text| text.chars().count())
            .unwrap_or(0);
        Pos {
            line: line as u32 + 1,
            column: column as u32 + 1,
        }
    }

    fn error(&self, span: Span, message: &str) -> EngineError {
        let pos = self.pos(span);
        EngineError::Syntax {
            message: format!("SyntaxError: {message}"),
            line: pos.line,
            column: pos.column,
        }
    }
}

struct Lowering<'a> {
    lines: &'a LineIndex<'a>,
}

fn name(sym: &str) -> Arc<str> {
    Arc::from(sym)
}

fn str_value(value: &ast::Str) -> Arc<str> {
    Arc::from(value.value.as_str().unwrap_or_default())
}

impl Lowering<'_> {
    fn unsupported<T>(&self, span: Span, what: &str) -> EngineResult<T> {
        Err(self.lines.error(span, &format!("Unsupported syntax: {what}")))
    }

    fn stmt(&self, stmt: &ast::Stmt) -> EngineResult<Stmt> {
        let pos = self.lines.pos(stmt.span());
        let kind = match stmt {
            ast::Stmt::Empty(_) => StmtKind::Empty,
            ast::Stmt::Expr(expr) => StmtKind::Expr(self.expr(&expr.expr)?),
            ast::Stmt::Block(block) => StmtKind::Block(self.block(block)?),
            ast::Stmt::Decl(ast::Decl::Var(decl)) => {
                let mut decls = self.var_decl(decl)?;
                if decls.len() == 1 {
                    return Ok(decls.remove(0));
                }
                StmtKind::Block(decls)
            }
            ast::Stmt::If(stmt) => StmtKind::If {
                test: self.expr(&stmt.test)?,
                cons: Box::new(self.stmt(&stmt.cons)?),
                alt: stmt
                    .alt
                    .as_ref()
                    .map(|alt| self.stmt(alt).map(Box::new))
                    .transpose()?,
            },
            ast::Stmt::While(stmt) => StmtKind::While {
                test: self.expr(&stmt.test)?,
                body: Box::new(self.stmt(&stmt.body)?),
            },
            ast::Stmt::DoWhile(stmt) => StmtKind::DoWhile {
                body: Box::new(self.stmt(&stmt.body)?),
                test: self.expr(&stmt.test)?,
            },
            ast::Stmt::For(stmt) => {
                let init = match &stmt.init {
                    Some(ast::VarDeclOrExpr::VarDecl(decl)) => self.var_decl(decl)?,
                    Some(ast::VarDeclOrExpr::Expr(expr)) => vec![Stmt {
                        pos: self.lines.pos(expr.span()),
                        kind: StmtKind::Expr(self.expr(expr)?),
                    }],
                    None => Vec::new(),
                };
                StmtKind::For {
                    init,
                    test: stmt.test.as_ref().map(|e| self.expr(e)).transpose()?,
                    update: stmt.update.as_ref().map(|e| self.expr(e)).transpose()?,
                    body: Box::new(self.stmt(&stmt.body)?),
                }
            }
            ast::Stmt::Throw(stmt) => StmtKind::Throw(self.expr(&stmt.arg)?),
            ast::Stmt::Break(stmt) if stmt.label.is_none() => StmtKind::Break,
            ast::Stmt::Continue(stmt) if stmt.label.is_none() => StmtKind::Continue,
            ast::Stmt::Decl(ast::Decl::Fn(_)) => {
                return self.unsupported(stmt.span(), "function declarations");
            }
            other => return self.unsupported(other.span(), "statement"),
        };
        Ok(Stmt { pos, kind })
    }

    fn block(&self, block: &ast::BlockStmt) -> EngineResult<Vec<Stmt>> {
        block.stmts.iter().map(|s| self.stmt(s)).collect()
    }

    fn var_decl(&self, decl: &ast::VarDecl) -> EngineResult<Vec<Stmt>> {
        let kind = match decl.kind {
            ast::VarDeclKind::Var => DeclKind::Var,
            ast::VarDeclKind::Let => DeclKind::Let,
            ast::VarDeclKind::Const => DeclKind::Const,
        };
        decl.decls
            .iter()
            .map(|declarator| {
                let ast::Pat::Ident(binding) = &declarator.name else {
                    return self.unsupported(declarator.name.span(), "destructuring");
                };
                Ok(Stmt {
                    pos: self.lines.pos(declarator.span),
                    kind: StmtKind::Declare {
                        kind,
                        name: name(binding.id.sym.as_str()),
                        init: declarator
                            .init
                            .as_ref()
                            .map(|e| self.expr(e))
                            .transpose()?,
                    },
                })
            })
            .collect()
    }

    fn exprs(&self, args: &[ast::ExprOrSpread]) -> EngineResult<Vec<Expr>> {
        args.iter()
            .map(|arg| match arg.spread {
                Some(span) => self.unsupported(span, "spread arguments"),
                None => self.expr(&arg.expr),
            })
            .collect()
    }

    fn member_key(&self, prop: &ast::MemberProp) -> EngineResult<MemberKey> {
        match prop {
            ast::MemberProp::Ident(ident) => Ok(MemberKey::Named(name(ident.sym.as_str()))),
            ast::MemberProp::Computed(computed) => {
                Ok(MemberKey::Computed(Box::new(self.expr(&computed.expr)?)))
            }
            other => self.unsupported(other.span(), "private names"),
        }
    }

    fn target(&self, expr: &ast::Expr) -> EngineResult<Target> {
        match expr {
            ast::Expr::Ident(ident) => Ok(Target::Ident(name(ident.sym.as_str()))),
            ast::Expr::Member(member) => Ok(Target::Member {
                object: Box::new(self.expr(&member.obj)?),
                key: self.member_key(&member.prop)?,
            }),
            ast::Expr::Paren(paren) => self.target(&paren.expr),
            other => self.unsupported(other.span(), "assignment target"),
        }
    }

    fn assign_target(&self, target: &ast::AssignTarget) -> EngineResult<Target> {
        match target {
            ast::AssignTarget::Simple(ast::SimpleAssignTarget::Ident(binding)) => {
                Ok(Target::Ident(name(binding.id.sym.as_str())))
            }
            ast::AssignTarget::Simple(ast::SimpleAssignTarget::Member(member)) => {
                Ok(Target::Member {
                    object: Box::new(self.expr(&member.obj)?),
                    key: self.member_key(&member.prop)?,
                })
            }
            ast::AssignTarget::Simple(ast::SimpleAssignTarget::Paren(paren)) => {
                self.target(&paren.expr)
            }
            other => self.unsupported(other.span(), "assignment target"),
        }
    }

    fn prop_name(&self, key: &ast::PropName) -> EngineResult<Arc<str>> {
        match key {
            ast::PropName::Ident(ident) => Ok(name(ident.sym.as_str())),
            ast::PropName::Str(s) => Ok(str_value(s)),
            ast::PropName::Num(n) => Ok(Arc::from(crate::value::number_to_string(n.value))),
            other => self.unsupported(other.span(), "computed property keys"),
        }
    }

    fn expr(&self, expr: &ast::Expr) -> EngineResult<Expr> {
        Ok(match expr {
            ast::Expr::Lit(lit) => self.literal(lit)?,
            ast::Expr::Ident(ident) => match ident.sym.as_str() {
                "undefined" => Expr::Literal(Literal::Undefined),
                "NaN" => Expr::Literal(Literal::Number(f64::NAN)),
                "Infinity" => Expr::Literal(Literal::Number(f64::INFINITY)),
                sym => Expr::Ident(Arc::from(sym)),
            },
            ast::Expr::This(_) => Expr::This,
            ast::Expr::Paren(paren) => self.expr(&paren.expr)?,
            ast::Expr::Array(array) => {
                let mut elements = Vec::with_capacity(array.elems.len());
                for element in &array.elems {
                    match element {
                        Some(e) if e.spread.is_some() => {
                            return self.unsupported(array.span, "spread elements");
                        }
                        Some(e) => elements.push(self.expr(&e.expr)?),
                        None => elements.push(Expr::Literal(Literal::Undefined)),
                    }
                }
                Expr::Array(elements)
            }
            ast::Expr::Object(object) => {
                let mut props = Vec::with_capacity(object.props.len());
                for prop in &object.props {
                    let ast::PropOrSpread::Prop(prop) = prop else {
                        return self.unsupported(object.span, "object spread");
                    };
                    match &**prop {
                        ast::Prop::KeyValue(kv) => {
                            props.push((self.prop_name(&kv.key)?, self.expr(&kv.value)?));
                        }
                        ast::Prop::Shorthand(ident) => {
                            let key = name(ident.sym.as_str());
                            props.push((key.clone(), Expr::Ident(key)));
                        }
                        other => return self.unsupported(other.span(), "object member"),
                    }
                }
                Expr::Object(props)
            }
            ast::Expr::Tpl(tpl) => Expr::Template {
                quasis: tpl.quasis.iter().map(|q| name(q.raw.as_str())).collect(),
                exprs: tpl
                    .exprs
                    .iter()
                    .map(|e| self.expr(e))
                    .collect::<EngineResult<_>>()?,
            },
            ast::Expr::Member(member) => Expr::Member {
                object: Box::new(self.expr(&member.obj)?),
                key: self.member_key(&member.prop)?,
            },
            ast::Expr::Unary(unary) => {
                let op = match unary.op {
                    ast::UnaryOp::Minus => UnaryOp::Minus,
                    ast::UnaryOp::Plus => UnaryOp::Plus,
                    ast::UnaryOp::Bang => UnaryOp::Not,
                    ast::UnaryOp::Tilde => UnaryOp::BitNot,
                    ast::UnaryOp::TypeOf => UnaryOp::TypeOf,
                    ast::UnaryOp::Void => UnaryOp::Void,
                    ast::UnaryOp::Delete => return Ok(Expr::Delete(self.target(&unary.arg)?)),
                };
                Expr::Unary {
                    op,
                    arg: Box::new(self.expr(&unary.arg)?),
                }
            }
            ast::Expr::Update(update) => Expr::Update {
                increment: update.op == ast::UpdateOp::PlusPlus,
                prefix: update.prefix,
                target: self.target(&update.arg)?,
            },
            ast::Expr::Bin(bin) => {
                let left = Box::new(self.expr(&bin.left)?);
                let right = Box::new(self.expr(&bin.right)?);
                match logical_op(bin.op) {
                    Some(op) => Expr::Logical { op, left, right },
                    None => Expr::Binary {
                        op: self.binary_op(bin.op, bin.span)?,
                        left,
                        right,
                    },
                }
            }
            ast::Expr::Assign(assign) => {
                let op = match assign.op {
                    ast::AssignOp::Assign => None,
                    ast::AssignOp::AddAssign => Some(BinaryOp::Add),
                    ast::AssignOp::SubAssign => Some(BinaryOp::Sub),
                    ast::AssignOp::MulAssign => Some(BinaryOp::Mul),
                    ast::AssignOp::DivAssign => Some(BinaryOp::Div),
                    ast::AssignOp::ModAssign => Some(BinaryOp::Mod),
                    ast::AssignOp::ExpAssign => Some(BinaryOp::Exp),
                    ast::AssignOp::LShiftAssign => Some(BinaryOp::Shl),
                    ast::AssignOp::RShiftAssign => Some(BinaryOp::Shr),
                    ast::AssignOp::ZeroFillRShiftAssign => Some(BinaryOp::UShr),
                    ast::AssignOp::BitOrAssign => Some(BinaryOp::BitOr),
                    ast::AssignOp::BitXorAssign => Some(BinaryOp::BitXor),
                    ast::AssignOp::BitAndAssign => Some(BinaryOp::BitAnd),
                    _ => return self.unsupported(assign.span, "logical assignment"),
                };
                Expr::Assign {
                    op,
                    target: self.assign_target(&assign.left)?,
                    value: Box::new(self.expr(&assign.right)?),
                }
            }
            ast::Expr::Cond(cond) => Expr::Cond {
                test: Box::new(self.expr(&cond.test)?),
                cons: Box::new(self.expr(&cond.cons)?),
                alt: Box::new(self.expr(&cond.alt)?),
            },
            ast::Expr::Call(call) => {
                let ast::Callee::Expr(callee) = &call.callee else {
                    return self.unsupported(call.span, "callee");
                };
                Expr::Call {
                    callee: Box::new(self.expr(callee)?),
                    args: self.exprs(&call.args)?,
                }
            }
            ast::Expr::New(new) => Expr::New {
                callee: Box::new(self.expr(&new.callee)?),
                args: match &new.args {
                    Some(args) => self.exprs(args)?,
                    None => Vec::new(),
                },
            },
            ast::Expr::Seq(seq) => Expr::Seq(
                seq.exprs
                    .iter()
                    .map(|e| self.expr(e))
                    .collect::<EngineResult<_>>()?,
            ),
            ast::Expr::Fn(f) => return self.unsupported(f.function.span, "function expressions"),
            ast::Expr::Arrow(arrow) => return self.unsupported(arrow.span, "arrow functions"),
            other => return self.unsupported(other.span(), "expression"),
        })
    }

    fn literal(&self, lit: &ast::Lit) -> EngineResult<Expr> {
        Ok(match lit {
            ast::Lit::Str(s) => Expr::Literal(Literal::String(str_value(s))),
            ast::Lit::Bool(b) => Expr::Literal(Literal::Bool(b.value)),
            ast::Lit::Null(_) => Expr::Literal(Literal::Null),
            ast::Lit::Num(n) => Expr::Literal(Literal::Number(n.value)),
            ast::Lit::Regex(re) => Expr::RegExp {
                source: name(re.exp.as_str()),
                flags: name(re.flags.as_str()),
            },
            other => return self.unsupported(other.span(), "literal"),
        })
    }

    fn binary_op(&self, op: ast::BinaryOp, span: Span) -> EngineResult<BinaryOp> {
        Ok(match op {
            ast::BinaryOp::Add => BinaryOp::Add,
            ast::BinaryOp::Sub => BinaryOp::Sub,
            ast::BinaryOp::Mul => BinaryOp::Mul,
            ast::BinaryOp::Div => BinaryOp::Div,
            ast::BinaryOp::Mod => BinaryOp::Mod,
            ast::BinaryOp::Exp => BinaryOp::Exp,
            ast::BinaryOp::EqEq => BinaryOp::Eq,
            ast::BinaryOp::NotEq => BinaryOp::NotEq,
            ast::BinaryOp::EqEqEq => BinaryOp::StrictEq,
            ast::BinaryOp::NotEqEq => BinaryOp::StrictNotEq,
            ast::BinaryOp::Lt => BinaryOp::Lt,
            ast::BinaryOp::LtEq => BinaryOp::LtEq,
            ast::BinaryOp::Gt => BinaryOp::Gt,
            ast::BinaryOp::GtEq => BinaryOp::GtEq,
            ast::BinaryOp::BitAnd => BinaryOp::BitAnd,
            ast::BinaryOp::BitOr => BinaryOp::BitOr,
            ast::BinaryOp::BitXor => BinaryOp::BitXor,
            ast::BinaryOp::LShift => BinaryOp::Shl,
            ast::BinaryOp::RShift => BinaryOp::Shr,
            ast::BinaryOp::ZeroFillRShift => BinaryOp::UShr,
            ast::BinaryOp::In => BinaryOp::In,
            ast::BinaryOp::InstanceOf => BinaryOp::InstanceOf,
            _ => return self.unsupported(span, "operator"),
        })
    }
}

fn logical_op(op: ast::BinaryOp) -> Option<LogicalOp> {
    match op {
        ast::BinaryOp::LogicalAnd => Some(LogicalOp::And),
        ast::BinaryOp::LogicalOr => Some(LogicalOp::Or),
        ast::BinaryOp::NullishCoalescing => Some(LogicalOp::Nullish),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_statements() {
        let script = compile("var a = 1, b = 2;\nif (a < b) { a += b; }\n", "test.js").unwrap();
        assert_eq!(script.source_name(), "test.js");
        assert_eq!(script.len(), 2);
        assert_eq!(script.body[1].pos, Pos { line: 2, column: 1 });
    }

    #[test]
    fn test_syntax_error_position() {
        let err = compile("var x = 1;\nvar = ;", "bad.js").unwrap_err();
        match err {
            EngineError::Syntax { message, line, .. } => {
                assert!(message.starts_with("SyntaxError: "));
                assert_eq!(line, 2);
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_syntax_is_reported() {
        let err = compile("x = 1;\n  function f() {}", "fn.js").unwrap_err();
        match err {
            EngineError::Syntax {
                message,
                line,
                column,
            } => {
                assert!(message.contains("function declarations"));
                assert_eq!((line, column), (2, 3));
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_line_index_counts_characters() {
        let source = "ab\n\u{e9}x";
        let index = LineIndex::new(source, 1);
        let span = Span::new(swc_common::BytePos(1 + 5), swc_common::BytePos(1 + 6));
        assert_eq!(index.pos(span), Pos { line: 2, column: 2 });
    }
}
