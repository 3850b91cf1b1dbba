//! Tree-walking interpreter over the compiled IR
//!
//! Variables live on the global object: declarations define own properties
//! directly, assignments go through `[[Set]]` so global interceptors see
//! them. Termination is checked before every statement, on every loop
//! iteration and around every native call.

use std::sync::Arc;

use crate::heap::ErrorName;
use crate::ir::{
    BinaryOp, DeclKind, Expr, Literal, LogicalOp, MemberKey, Stmt, StmtKind, Target, UnaryOp,
};
use crate::isolate::{Abrupt, Completion, Isolate, PropertyKey};
use crate::value::{PropertyAttributes, Value, ValueKind};

enum Flow {
    Normal,
    Break,
    Continue,
}

enum Reference {
    Global(Arc<str>),
    Property { base: Value, key: PropertyKey },
}

pub(crate) struct Interpreter<'a> {
    isolate: &'a Isolate,
    completion: Value,
}

impl<'a> Interpreter<'a> {
    pub fn new(isolate: &'a Isolate) -> Self {
        Self {
            isolate,
            completion: Value::Undefined,
        }
    }

    pub fn run(mut self, body: &[Stmt]) -> Completion<Value> {
        for stmt in body {
            match self.exec(stmt)? {
                Flow::Normal => {}
                Flow::Break | Flow::Continue => {
                    return Err(self.isolate.throw_error(
                        ErrorName::SyntaxError,
                        "Illegal break or continue statement",
                    ));
                }
            }
        }
        Ok(self.completion)
    }

    fn exec_all(&mut self, stmts: &[Stmt]) -> Completion<Flow> {
        for stmt in stmts {
            match self.exec(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> Completion<Flow> {
        self.isolate.set_position(stmt.pos);
        self.isolate.check_terminate()?;
        match &stmt.kind {
            StmtKind::Empty => {}
            StmtKind::Expr(expr) => self.completion = self.eval(expr)?,
            StmtKind::Declare { kind, name, init } => self.declare(*kind, name, init.as_ref())?,
            StmtKind::Block(stmts) => return self.exec_all(stmts),
            StmtKind::If { test, cons, alt } => {
                if self.eval(test)?.truthy() {
                    return self.exec(cons);
                } else if let Some(alt) = alt {
                    return self.exec(alt);
                }
            }
            StmtKind::While { test, body } => {
                while self.eval(test)?.truthy() {
                    if let Flow::Break = self.exec(body)? {
                        break;
                    }
                    self.isolate.check_terminate()?;
                }
            }
            StmtKind::DoWhile { body, test } => loop {
                if let Flow::Break = self.exec(body)? {
                    break;
                }
                self.isolate.check_terminate()?;
                if !self.eval(test)?.truthy() {
                    break;
                }
            },
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => {
                self.exec_all(init)?;
                loop {
                    if let Some(test) = test {
                        if !self.eval(test)?.truthy() {
                            break;
                        }
                    }
                    if let Flow::Break = self.exec(body)? {
                        break;
                    }
                    self.isolate.check_terminate()?;
                    if let Some(update) = update {
                        self.eval(update)?;
                    }
                }
            }
            StmtKind::Throw(expr) => {
                let value = self.eval(expr)?;
                self.isolate.set_position(stmt.pos);
                return Err(self.isolate.throw(value));
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    fn declare(&mut self, kind: DeclKind, name: &Arc<str>, init: Option<&Expr>) -> Completion<()> {
        let global = self.isolate.global();
        let key = PropertyKey::Name(name.clone());
        let value = match init {
            Some(expr) => self.eval(expr)?,
            None if kind == DeclKind::Var => {
                if self.isolate.query(global, &key)?.is_some() {
                    return Ok(());
                }
                Value::Undefined
            }
            None => Value::Undefined,
        };
        let attributes = match kind {
            DeclKind::Const => PropertyAttributes::READ_ONLY | PropertyAttributes::DONT_DELETE,
            DeclKind::Var | DeclKind::Let => PropertyAttributes::DONT_DELETE,
        };
        self.isolate
            .define_property(global, name, value, attributes)
            .map_err(Abrupt::Fault)
    }

    fn eval(&mut self, expr: &Expr) -> Completion<Value> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::Undefined => Value::Undefined,
                Literal::Null => Value::Null,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Number(n) => Value::number(*n),
                Literal::String(s) => Value::String(s.clone()),
            }),
            Expr::Ident(name) => self.read_global(name),
            Expr::This => Ok(Value::Object(self.isolate.global())),
            Expr::Array(elements) => {
                let values = elements
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<Completion<Vec<_>>>()?;
                Ok(Value::Object(self.isolate.new_array(values)))
            }
            Expr::Object(props) => {
                let obj = self.isolate.new_object();
                for (key, value) in props {
                    let value = self.eval(value)?;
                    self.isolate.set(obj, &PropertyKey::parse(key), value)?;
                }
                Ok(Value::Object(obj))
            }
            Expr::RegExp { source, flags } => {
                Ok(Value::Object(self.isolate.new_regexp(source, flags)))
            }
            Expr::Template { quasis, exprs } => {
                let mut text = String::new();
                for (index, quasi) in quasis.iter().enumerate() {
                    text.push_str(quasi);
                    if let Some(expr) = exprs.get(index) {
                        let value = self.eval(expr)?;
                        text.push_str(&self.isolate.to_string_internal(&value)?);
                    }
                }
                Ok(Value::string(text))
            }
            Expr::Member { object, key } => {
                let base = self.eval(object)?;
                let key = self.member_key(key)?;
                self.get_value(&base, &key)
            }
            Expr::Unary { op, arg } => self.unary(*op, arg),
            Expr::Delete(target) => match self.reference(target)? {
                Reference::Global(name) => self
                    .isolate
                    .delete(self.isolate.global(), &PropertyKey::Name(name))
                    .map(Value::Bool),
                Reference::Property {
                    base: Value::Object(obj),
                    key,
                } => self.isolate.delete(obj, &key).map(Value::Bool),
                Reference::Property { .. } => Ok(Value::Bool(true)),
            },
            Expr::Update {
                increment,
                prefix,
                target,
            } => {
                let reference = self.reference(target)?;
                let old = self.read(&reference)?;
                let old = self.isolate.to_number_internal(&old)?;
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.write(&reference, Value::number(new))?;
                Ok(Value::number(if *prefix { new } else { old }))
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary(*op, left, right)
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.truthy(),
                    LogicalOp::Or => left.truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Assign { op, target, value } => {
                let reference = self.reference(target)?;
                let value = match op {
                    None => self.eval(value)?,
                    Some(op) => {
                        let current = self.read(&reference)?;
                        let rhs = self.eval(value)?;
                        self.binary(*op, current, rhs)?
                    }
                };
                self.write(&reference, value.clone())?;
                Ok(value)
            }
            Expr::Cond { test, cons, alt } => {
                if self.eval(test)?.truthy() {
                    self.eval(cons)
                } else {
                    self.eval(alt)
                }
            }
            Expr::Call { callee, args } => {
                let (function, this, description) = match &**callee {
                    Expr::Member { object, key } => {
                        let base = self.eval(object)?;
                        let key = self.member_key(key)?;
                        let function = self.get_value(&base, &key)?;
                        (function, base, key.name().to_string())
                    }
                    Expr::Ident(name) => (self.read_global(name)?, Value::Undefined, name.to_string()),
                    other => (self.eval(other)?, Value::Undefined, "expression".to_string()),
                };
                let args = self.args(args)?;
                match function {
                    Value::Object(obj) if self.isolate.is_callable(obj) => {
                        self.isolate.call_object(obj, this, &args, false)
                    }
                    _ => Err(self.isolate.throw_error(
                        ErrorName::TypeError,
                        &format!("{description} is not a function"),
                    )),
                }
            }
            Expr::New { callee, args } => {
                let function = self.eval(callee)?;
                let args = self.args(args)?;
                match function {
                    Value::Object(obj) if self.isolate.is_callable(obj) => {
                        self.isolate.call_object(obj, Value::Undefined, &args, true)
                    }
                    _ => Err(self
                        .isolate
                        .throw_error(ErrorName::TypeError, "value is not a constructor")),
                }
            }
            Expr::Seq(exprs) => {
                let mut last = Value::Undefined;
                for expr in exprs {
                    last = self.eval(expr)?;
                }
                Ok(last)
            }
        }
    }

    fn args(&mut self, args: &[Expr]) -> Completion<Vec<Value>> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }

    fn read_global(&mut self, name: &Arc<str>) -> Completion<Value> {
        let global = self.isolate.global();
        match self.isolate.lookup(global, &PropertyKey::Name(name.clone()))? {
            Some(value) => Ok(value),
            None => Err(self
                .isolate
                .throw_error(ErrorName::ReferenceError, &format!("{name} is not defined"))),
        }
    }

    fn member_key(&mut self, key: &MemberKey) -> Completion<PropertyKey> {
        match key {
            MemberKey::Named(name) => Ok(PropertyKey::Name(name.clone())),
            MemberKey::Computed(expr) => {
                let value = self.eval(expr)?;
                self.to_key(&value)
            }
        }
    }

    fn to_key(&self, value: &Value) -> Completion<PropertyKey> {
        match value {
            Value::Int32(i) if *i >= 0 => Ok(PropertyKey::Index(*i as u32)),
            Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 && *n < u32::MAX as f64 => {
                Ok(PropertyKey::Index(*n as u32))
            }
            other => Ok(PropertyKey::parse(&self.isolate.to_string_internal(other)?)),
        }
    }

    fn get_value(&self, base: &Value, key: &PropertyKey) -> Completion<Value> {
        match base {
            Value::Object(obj) => self.isolate.get(*obj, key),
            Value::Undefined | Value::Null => Err(self.isolate.throw_error(
                ErrorName::TypeError,
                &format!("Cannot read properties of {base} (reading '{}')", key.name()),
            )),
            Value::String(s) => Ok(match key {
                PropertyKey::Index(index) => s
                    .encode_utf16()
                    .nth(*index as usize)
                    .map(|unit| Value::string(String::from_utf16_lossy(&[unit])))
                    .unwrap_or_default(),
                PropertyKey::Name(name) if &**name == "length" => {
                    Value::number(s.encode_utf16().count() as f64)
                }
                PropertyKey::Name(_) => Value::Undefined,
            }),
            _ => Ok(Value::Undefined),
        }
    }

    fn reference(&mut self, target: &Target) -> Completion<Reference> {
        match target {
            Target::Ident(name) => Ok(Reference::Global(name.clone())),
            Target::Member { object, key } => {
                let base = self.eval(object)?;
                let key = self.member_key(key)?;
                Ok(Reference::Property { base, key })
            }
        }
    }

    fn read(&mut self, reference: &Reference) -> Completion<Value> {
        match reference {
            Reference::Global(name) => self.read_global(name),
            Reference::Property { base, key } => self.get_value(base, key),
        }
    }

    fn write(&mut self, reference: &Reference, value: Value) -> Completion<()> {
        match reference {
            Reference::Global(name) => {
                self.isolate
                    .set(self.isolate.global(), &PropertyKey::Name(name.clone()), value)
            }
            Reference::Property {
                base: Value::Object(obj),
                key,
            } => self.isolate.set(*obj, key, value),
            Reference::Property { base, key } if base.is_nullish() => {
                Err(self.isolate.throw_error(
                    ErrorName::TypeError,
                    &format!("Cannot set properties of {base} (setting '{}')", key.name()),
                ))
            }
            Reference::Property { .. } => Ok(()),
        }
    }

    fn unary(&mut self, op: UnaryOp, arg: &Expr) -> Completion<Value> {
        let value = match (op, arg) {
            // `typeof undeclared` is not a ReferenceError
            (UnaryOp::TypeOf, Expr::Ident(name)) => {
                let global = self.isolate.global();
                self.isolate
                    .lookup(global, &PropertyKey::Name(name.clone()))?
                    .unwrap_or_default()
            }
            _ => self.eval(arg)?,
        };
        Ok(match op {
            UnaryOp::TypeOf => Value::string(self.type_of(&value)),
            UnaryOp::Minus => Value::number(-self.isolate.to_number_internal(&value)?),
            UnaryOp::Plus => Value::number(self.isolate.to_number_internal(&value)?),
            UnaryOp::Not => Value::Bool(!value.truthy()),
            UnaryOp::BitNot => Value::Int32(!to_int32(self.isolate.to_number_internal(&value)?)),
            UnaryOp::Void => Value::Undefined,
        })
    }

    fn type_of(&self, value: &Value) -> &'static str {
        match value {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Int32(_) | Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(obj) if self.isolate.is_callable(*obj) => "function",
            Value::Object(_) => "object",
        }
    }

    fn to_primitive(&self, value: Value) -> Completion<Value> {
        match value {
            Value::Object(_) => match self.isolate.kind_of(&value) {
                ValueKind::Date | ValueKind::NumberObject | ValueKind::BoolObject => {
                    Ok(Value::number(self.isolate.to_number_internal(&value)?))
                }
                _ => Ok(Value::String(self.isolate.to_string_internal(&value)?)),
            },
            primitive => Ok(primitive),
        }
    }

    fn binary(&self, op: BinaryOp, left: Value, right: Value) -> Completion<Value> {
        let number = |v: &Value| self.isolate.to_number_internal(v);
        Ok(match op {
            BinaryOp::Add => {
                let left = self.to_primitive(left)?;
                let right = self.to_primitive(right)?;
                if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
                    let l = self.isolate.to_string_internal(&left)?;
                    let r = self.isolate.to_string_internal(&right)?;
                    Value::string(format!("{l}{r}"))
                } else {
                    Value::number(left.to_number() + right.to_number())
                }
            }
            BinaryOp::Sub => Value::number(number(&left)? - number(&right)?),
            BinaryOp::Mul => Value::number(number(&left)? * number(&right)?),
            BinaryOp::Div => Value::number(number(&left)? / number(&right)?),
            BinaryOp::Mod => Value::number(number(&left)? % number(&right)?),
            BinaryOp::Exp => Value::number(number(&left)?.powf(number(&right)?)),
            BinaryOp::Eq => Value::Bool(self.loose_equals(left, right)?),
            BinaryOp::NotEq => Value::Bool(!self.loose_equals(left, right)?),
            BinaryOp::StrictEq => Value::Bool(strict_equals(&left, &right)),
            BinaryOp::StrictNotEq => Value::Bool(!strict_equals(&left, &right)),
            BinaryOp::Lt => Value::Bool(self.compare(left, right, |o| o.is_lt())?),
            BinaryOp::LtEq => Value::Bool(self.compare(left, right, |o| o.is_le())?),
            BinaryOp::Gt => Value::Bool(self.compare(left, right, |o| o.is_gt())?),
            BinaryOp::GtEq => Value::Bool(self.compare(left, right, |o| o.is_ge())?),
            BinaryOp::BitAnd => Value::Int32(to_int32(number(&left)?) & to_int32(number(&right)?)),
            BinaryOp::BitOr => Value::Int32(to_int32(number(&left)?) | to_int32(number(&right)?)),
            BinaryOp::BitXor => Value::Int32(to_int32(number(&left)?) ^ to_int32(number(&right)?)),
            BinaryOp::Shl => {
                let shift = to_int32(number(&right)?) as u32 & 31;
                Value::Int32(to_int32(number(&left)?).wrapping_shl(shift))
            }
            BinaryOp::Shr => {
                let shift = to_int32(number(&right)?) as u32 & 31;
                Value::Int32(to_int32(number(&left)?) >> shift)
            }
            BinaryOp::UShr => {
                let shift = to_int32(number(&right)?) as u32 & 31;
                Value::number(((to_int32(number(&left)?) as u32) >> shift) as f64)
            }
            BinaryOp::In => {
                let Value::Object(obj) = right else {
                    return Err(self.isolate.throw_error(
                        ErrorName::TypeError,
                        "Cannot use 'in' operator to search for a key in a primitive",
                    ));
                };
                let key = self.to_key(&left)?;
                Value::Bool(self.isolate.query(obj, &key)?.is_some())
            }
            BinaryOp::InstanceOf => {
                let callable = right
                    .as_object()
                    .filter(|obj| self.isolate.is_callable(*obj));
                let Some(constructor) = callable else {
                    return Err(self.isolate.throw_error(
                        ErrorName::TypeError,
                        "Right-hand side of 'instanceof' is not callable",
                    ));
                };
                let prototype = self
                    .isolate
                    .get(constructor, &PropertyKey::parse("prototype"))?;
                match (left, prototype) {
                    (Value::Object(obj), Value::Object(prototype)) => {
                        Value::Bool(self.isolate.prototype_chain_contains(obj, prototype))
                    }
                    _ => Value::Bool(false),
                }
            }
        })
    }

    fn compare(
        &self,
        left: Value,
        right: Value,
        accept: impl Fn(std::cmp::Ordering) -> bool,
    ) -> Completion<bool> {
        let left = self.to_primitive(left)?;
        let right = self.to_primitive(right)?;
        if let (Value::String(l), Value::String(r)) = (&left, &right) {
            return Ok(accept(l.cmp(r)));
        }
        Ok(left
            .to_number()
            .partial_cmp(&right.to_number())
            .is_some_and(accept))
    }

    fn loose_equals(&self, left: Value, right: Value) -> Completion<bool> {
        Ok(match (&left, &right) {
            (l, r) if l.is_nullish() || r.is_nullish() => l.is_nullish() && r.is_nullish(),
            (Value::Object(_), Value::Object(_)) => strict_equals(&left, &right),
            (Value::Object(_), _) => {
                let left = self.to_primitive(left)?;
                return self.loose_equals(left, right);
            }
            (_, Value::Object(_)) => {
                let right = self.to_primitive(right)?;
                return self.loose_equals(left, right);
            }
            (Value::String(l), Value::String(r)) => l == r,
            (Value::Bool(l), Value::Bool(r)) => l == r,
            _ => left.to_number() == right.to_number(),
        })
    }
}

fn strict_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int32(_) | Value::Number(_), Value::Int32(_) | Value::Number(_)) => {
            left.to_number() == right.to_number()
        }
        _ => left == right,
    }
}

fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    n.trunc().rem_euclid(4_294_967_296.0) as u32 as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str) -> Value {
        let isolate = Isolate::new();
        isolate.execute(source, "test.js").unwrap()
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        assert_eq!(eval("1 + 2 * 3"), Value::Int32(7));
        assert_eq!(eval("7 % 3"), Value::Int32(1));
        assert_eq!(eval("2 ** 10"), Value::Int32(1024));
        assert_eq!(eval("1 / 4").to_string(), "0.25");
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(eval("'a' + 1 + 2"), Value::string("a12"));
        assert_eq!(eval("1 + 2 + 'a'"), Value::string("3a"));
        assert_eq!(eval("var n = 3; `n=${n}!`"), Value::string("n=3!"));
    }

    #[test]
    fn test_variables_and_loops() {
        let result = eval("var total = 0; for (var i = 0; i < 5; i++) { total += i; } total");
        assert_eq!(result, Value::Int32(10));
        let result = eval("var n = 0; while (true) { n++; if (n > 3) break; } n");
        assert_eq!(result, Value::Int32(4));
        let result = eval("var s = 0; for (var i = 0; i < 4; i++) { if (i % 2) continue; s += i; } s");
        assert_eq!(result, Value::Int32(2));
    }

    #[test]
    fn test_objects_and_arrays() {
        assert_eq!(eval("var o = { a: 1, b: { c: 2 } }; o.b.c"), Value::Int32(2));
        assert_eq!(eval("var a = [1, 2, 3]; a[1] + a.length"), Value::Int32(5));
        assert_eq!(eval("var o = {}; o['x'] = 4; delete o.x; typeof o.x"), Value::string("undefined"));
        assert_eq!(eval("'x' in { x: 1 }"), Value::Bool(true));
    }

    #[test]
    fn test_equality() {
        assert_eq!(eval("1 == '1'"), Value::Bool(true));
        assert_eq!(eval("1 === '1'"), Value::Bool(false));
        assert_eq!(eval("null == undefined"), Value::Bool(true));
        assert_eq!(eval("null === undefined"), Value::Bool(false));
        assert_eq!(eval("1.0 === 1"), Value::Bool(true));
    }

    #[test]
    fn test_const_is_read_only() {
        assert_eq!(eval("const k = 1; k = 2; k"), Value::Int32(1));
    }

    #[test]
    fn test_reference_error_has_position() {
        let isolate = Isolate::new();
        let err = isolate.execute("var a = 1;\n  missing + 1;", "ref.js").unwrap_err();
        match err {
            crate::EngineError::Exception {
                message,
                line,
                column,
                stack,
                ..
            } => {
                assert_eq!(message, "ReferenceError: missing is not defined");
                assert_eq!(line, Some(2));
                assert_eq!(column, Some(3));
                assert!(stack.unwrap().contains("ref.js:2:3"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_throw_error_object() {
        let isolate = Isolate::new();
        let err = isolate.execute("throw new TypeError('nope');", "t.js").unwrap_err();
        assert_eq!(err.to_string(), "TypeError: nope");
        let err = isolate.execute("throw 'plain';", "t.js").unwrap_err();
        assert_eq!(err.to_string(), "plain");
    }

    #[test]
    fn test_instanceof_error() {
        assert_eq!(eval("new Error('x') instanceof Error"), Value::Bool(true));
        assert_eq!(eval("new Error('x') instanceof TypeError"), Value::Bool(false));
    }

    #[test]
    fn test_bitwise_operators() {
        assert_eq!(eval("5 & 3"), Value::Int32(1));
        assert_eq!(eval("-1 >>> 28"), Value::Int32(15));
        assert_eq!(eval("1 << 31"), Value::Int32(i32::MIN));
        assert_eq!(eval("~0"), Value::Int32(-1));
    }

    #[test]
    fn test_calling_non_function() {
        let isolate = Isolate::new();
        let err = isolate.execute("var x = 1; x();", "c.js").unwrap_err();
        assert_eq!(err.to_string(), "TypeError: x is not a function");
    }
}
