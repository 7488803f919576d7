//! Straight-line interpreter for validated naga IR.
//!
//! Covers the subset tutorial shaders use: arithmetic on scalars, vectors and
//! matrices, composites, locals, uniforms, a handful of math builtins, `if`,
//! `return` and `discard`. Every value is stored as `f32`; integer division,
//! remainder and conversions truncate using the validator's type info.

use std::collections::HashMap;

use naga::{
    BinaryOperator, Expression, Function, GlobalVariable, Handle, Literal, LocalVariable,
    MathFunction, Module, ScalarKind, Statement, SwizzleComponent, TypeInner, UnaryOperator,
};
use naga::valid::FunctionInfo;
use thiserror::Error;

use crate::driver::front::vector_len;
use crate::shader::UniformValue;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("not supported by the software rasterizer: {0}")]
    Unsupported(String),

    #[error("type error: {0}")]
    Type(String),
}

type Result<T> = std::result::Result<T, EvalError>;

fn unsupported<T>(what: impl Into<String>) -> Result<T> {
    Err(EvalError::Unsupported(what.into()))
}

fn type_error<T>(what: impl Into<String>) -> Result<T> {
    Err(EvalError::Type(what.into()))
}

/// Runtime value. Matrices are column-major.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f32),
    Vector(Vec<f32>),
    Matrix { columns: usize, rows: usize, data: Vec<f32> },
    /// Struct members or array elements.
    Composite(Vec<Value>),
}

impl Value {
    pub fn zero(module: &Module, ty: Handle<naga::Type>) -> Result<Value> {
        match module.types[ty].inner {
            TypeInner::Scalar(_) => Ok(Value::Scalar(0.0)),
            TypeInner::Vector { size, .. } => Ok(Value::Vector(vec![0.0; vector_len(size)])),
            TypeInner::Matrix { columns, rows, .. } => {
                let (columns, rows) = (vector_len(columns), vector_len(rows));
                Ok(Value::Matrix { columns, rows, data: vec![0.0; columns * rows] })
            }
            TypeInner::Struct { ref members, .. } => members
                .iter()
                .map(|m| Value::zero(module, m.ty))
                .collect::<Result<Vec<_>>>()
                .map(Value::Composite),
            TypeInner::Array { base, size: naga::ArraySize::Constant(n), .. } => {
                let element = Value::zero(module, base)?;
                Ok(Value::Composite(vec![element; n.get() as usize]))
            }
            ref other => unsupported(format!("values of type {other:?}")),
        }
    }

    /// Builds a value of type `ty` from a flat list of floats.
    ///
    /// Missing vector components are filled from `(0, 0, 0, 1)`, the way vertex
    /// attributes with fewer components than the shader input are expanded.
    pub fn from_floats(module: &Module, ty: Handle<naga::Type>, floats: &[f32]) -> Result<Value> {
        const FILL: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
        match module.types[ty].inner {
            TypeInner::Scalar(_) => Ok(Value::Scalar(floats.first().copied().unwrap_or(0.0))),
            TypeInner::Vector { size, .. } => {
                let n = vector_len(size);
                Ok(Value::Vector(
                    (0..n).map(|i| floats.get(i).copied().unwrap_or(FILL[i])).collect(),
                ))
            }
            ref other => unsupported(format!("inputs of type {other:?}")),
        }
    }

    pub fn from_uniform(value: &UniformValue) -> Value {
        let data = value.components().to_vec();
        match value.shape() {
            (1, 1) => Value::Scalar(data[0]),
            (1, _) => Value::Vector(data),
            (columns, rows) => Value::Matrix { columns, rows, data },
        }
    }

    pub fn scalar(&self) -> Result<f32> {
        match self {
            Value::Scalar(s) => Ok(*s),
            other => type_error(format!("expected a scalar, got {other:?}")),
        }
    }

    /// Flattened components of a scalar, vector, or matrix.
    pub fn floats(&self) -> Result<Vec<f32>> {
        match self {
            Value::Scalar(s) => Ok(vec![*s]),
            Value::Vector(v) => Ok(v.clone()),
            Value::Matrix { data, .. } => Ok(data.clone()),
            Value::Composite(_) => type_error("expected a scalar, vector or matrix, got a composite"),
        }
    }

    fn component(&self, index: usize) -> Result<Value> {
        let out_of_range = || EvalError::Type(format!("index {index} out of range"));
        match self {
            Value::Vector(v) => v.get(index).map(|s| Value::Scalar(*s)).ok_or_else(out_of_range),
            Value::Matrix { columns, rows, data } => {
                if index >= *columns {
                    return Err(out_of_range());
                }
                Ok(Value::Vector(data[index * rows..(index + 1) * rows].to_vec()))
            }
            Value::Composite(items) => items.get(index).cloned().ok_or_else(out_of_range),
            Value::Scalar(_) => type_error("cannot index a scalar"),
        }
    }

    fn map(self, f: impl Fn(f32) -> f32) -> Value {
        self.map_dyn(&f)
    }

    fn map_dyn(self, f: &dyn Fn(f32) -> f32) -> Value {
        match self {
            Value::Scalar(s) => Value::Scalar(f(s)),
            Value::Vector(v) => Value::Vector(v.into_iter().map(f).collect()),
            Value::Matrix { columns, rows, data } => Value::Matrix {
                columns,
                rows,
                data: data.into_iter().map(f).collect(),
            },
            Value::Composite(items) => {
                Value::Composite(items.into_iter().map(|v| v.map_dyn(f)).collect())
            }
        }
    }
}

fn store_into(target: &mut Value, path: &[usize], value: Value) -> Result<()> {
    let Some((&index, rest)) = path.split_first() else {
        *target = value;
        return Ok(());
    };
    let out_of_range = || EvalError::Type(format!("store index {index} out of range"));

    match target {
        Value::Composite(items) => {
            let item = items.get_mut(index).ok_or_else(out_of_range)?;
            store_into(item, rest, value)
        }
        Value::Vector(v) if rest.is_empty() => {
            *v.get_mut(index).ok_or_else(out_of_range)? = value.scalar()?;
            Ok(())
        }
        Value::Matrix { columns, rows, data } if index < *columns => match rest {
            [] => {
                let column = value.floats()?;
                if column.len() != *rows {
                    return type_error("matrix column length mismatch");
                }
                data[index * *rows..(index + 1) * *rows].copy_from_slice(&column);
                Ok(())
            }
            [row] if *row < *rows => {
                data[index * *rows + row] = value.scalar()?;
                Ok(())
            }
            _ => Err(out_of_range()),
        },
        _ => Err(out_of_range()),
    }
}

fn literal(lit: Literal) -> Result<f32> {
    Ok(match lit {
        Literal::F64(v) => v as f32,
        Literal::F32(v) => v,
        Literal::U32(v) => v as f32,
        Literal::I32(v) => v as f32,
        Literal::U64(v) => v as f32,
        Literal::I64(v) => v as f32,
        Literal::Bool(b) => bool_value(b),
        Literal::AbstractInt(v) => v as f32,
        Literal::AbstractFloat(v) => v as f32,
        #[allow(unreachable_patterns)]
        other => return unsupported(format!("literal {other:?}")),
    })
}

fn bool_value(b: bool) -> f32 {
    if b { 1.0 } else { 0.0 }
}

fn swizzle_index(c: SwizzleComponent) -> usize {
    match c {
        SwizzleComponent::X => 0,
        SwizzleComponent::Y => 1,
        SwizzleComponent::Z => 2,
        SwizzleComponent::W => 3,
    }
}

fn compose(module: &Module, ty: Handle<naga::Type>, parts: Vec<Value>) -> Result<Value> {
    let flatten = |parts: &[Value]| -> Result<Vec<f32>> {
        let mut out = Vec::new();
        for p in parts {
            out.extend(p.floats()?);
        }
        Ok(out)
    };

    match module.types[ty].inner {
        TypeInner::Scalar(_) => parts
            .into_iter()
            .next()
            .ok_or_else(|| EvalError::Type("empty scalar constructor".into())),
        TypeInner::Vector { size, .. } => {
            let data = flatten(&parts)?;
            if data.len() != vector_len(size) {
                return type_error(format!("vector constructor got {} components", data.len()));
            }
            Ok(Value::Vector(data))
        }
        TypeInner::Matrix { columns, rows, .. } => {
            let (columns, rows) = (vector_len(columns), vector_len(rows));
            let data = flatten(&parts)?;
            if data.len() != columns * rows {
                return type_error(format!("matrix constructor got {} components", data.len()));
            }
            Ok(Value::Matrix { columns, rows, data })
        }
        TypeInner::Struct { .. } | TypeInner::Array { .. } => Ok(Value::Composite(parts)),
        ref other => unsupported(format!("constructing {other:?}")),
    }
}

fn componentwise(l: Value, r: Value, f: impl Fn(f32, f32) -> f32) -> Result<Value> {
    match (l, r) {
        (Value::Scalar(a), Value::Scalar(b)) => Ok(Value::Scalar(f(a, b))),
        (Value::Vector(a), Value::Vector(b)) if a.len() == b.len() => {
            Ok(Value::Vector(a.into_iter().zip(b).map(|(a, b)| f(a, b)).collect()))
        }
        (Value::Vector(a), Value::Scalar(b)) => {
            Ok(Value::Vector(a.into_iter().map(|a| f(a, b)).collect()))
        }
        (Value::Scalar(a), Value::Vector(b)) => {
            Ok(Value::Vector(b.into_iter().map(|b| f(a, b)).collect()))
        }
        (
            Value::Matrix { columns, rows, data: a },
            Value::Matrix { columns: c2, rows: r2, data: b },
        ) if columns == c2 && rows == r2 => Ok(Value::Matrix {
            columns,
            rows,
            data: a.into_iter().zip(b).map(|(a, b)| f(a, b)).collect(),
        }),
        (l, r) => type_error(format!("incompatible operands {l:?} and {r:?}")),
    }
}

fn multiply(l: Value, r: Value) -> Result<Value> {
    match (l, r) {
        (Value::Matrix { columns, rows, data }, Value::Vector(v)) if v.len() == columns => {
            let out = (0..rows)
                .map(|row| (0..columns).map(|c| data[c * rows + row] * v[c]).sum())
                .collect();
            Ok(Value::Vector(out))
        }
        (Value::Vector(v), Value::Matrix { columns, rows, data }) if v.len() == rows => {
            let out = (0..columns)
                .map(|c| (0..rows).map(|row| v[row] * data[c * rows + row]).sum())
                .collect();
            Ok(Value::Vector(out))
        }
        (
            Value::Matrix { columns: k, rows, data: a },
            Value::Matrix { columns, rows: k2, data: b },
        ) if k == k2 => {
            let mut out = vec![0.0; columns * rows];
            for c in 0..columns {
                for row in 0..rows {
                    out[c * rows + row] = (0..k).map(|i| a[i * rows + row] * b[c * k + i]).sum();
                }
            }
            Ok(Value::Matrix { columns, rows, data: out })
        }
        (m @ Value::Matrix { .. }, Value::Scalar(s)) | (Value::Scalar(s), m @ Value::Matrix { .. }) => {
            Ok(m.map(|x| x * s))
        }
        (l, r) => componentwise(l, r, |a, b| a * b),
    }
}

fn binary(op: BinaryOperator, l: Value, r: Value) -> Result<Value> {
    match op {
        BinaryOperator::Add => componentwise(l, r, |a, b| a + b),
        BinaryOperator::Subtract => componentwise(l, r, |a, b| a - b),
        BinaryOperator::Multiply => multiply(l, r),
        BinaryOperator::Divide => componentwise(l, r, |a, b| a / b),
        BinaryOperator::Modulo => componentwise(l, r, |a, b| a % b),
        BinaryOperator::Equal => componentwise(l, r, |a, b| bool_value(a == b)),
        BinaryOperator::NotEqual => componentwise(l, r, |a, b| bool_value(a != b)),
        BinaryOperator::Less => componentwise(l, r, |a, b| bool_value(a < b)),
        BinaryOperator::LessEqual => componentwise(l, r, |a, b| bool_value(a <= b)),
        BinaryOperator::Greater => componentwise(l, r, |a, b| bool_value(a > b)),
        BinaryOperator::GreaterEqual => componentwise(l, r, |a, b| bool_value(a >= b)),
        BinaryOperator::LogicalAnd => {
            componentwise(l, r, |a, b| bool_value(a != 0.0 && b != 0.0))
        }
        BinaryOperator::LogicalOr => componentwise(l, r, |a, b| bool_value(a != 0.0 || b != 0.0)),
        other => unsupported(format!("binary operator {other:?}")),
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(a, b)| a * b).sum()
}

fn math(fun: MathFunction, args: Vec<Value>) -> Result<Value> {
    let mut args = args.into_iter();
    let mut next = || {
        args.next()
            .ok_or_else(|| EvalError::Type(format!("{fun:?}: missing argument")))
    };

    Ok(match fun {
        MathFunction::Abs => next()?.map(f32::abs),
        MathFunction::Floor => next()?.map(f32::floor),
        MathFunction::Ceil => next()?.map(f32::ceil),
        MathFunction::Fract => next()?.map(|x| x - x.floor()),
        MathFunction::Sqrt => next()?.map(f32::sqrt),
        MathFunction::Sin => next()?.map(f32::sin),
        MathFunction::Cos => next()?.map(f32::cos),
        MathFunction::Exp => next()?.map(f32::exp),
        MathFunction::Saturate => next()?.map(|x| x.clamp(0.0, 1.0)),
        MathFunction::Min => componentwise(next()?, next()?, f32::min)?,
        MathFunction::Max => componentwise(next()?, next()?, f32::max)?,
        MathFunction::Pow => componentwise(next()?, next()?, f32::powf)?,
        MathFunction::Step => componentwise(next()?, next()?, |edge, x| bool_value(x >= edge))?,
        MathFunction::Clamp => {
            let (x, lo, hi) = (next()?, next()?, next()?);
            componentwise(componentwise(x, lo, f32::max)?, hi, f32::min)?
        }
        MathFunction::Mix => {
            let (a, b, t) = (next()?, next()?, next()?);
            let delta = componentwise(b, a.clone(), |b, a| b - a)?;
            componentwise(a, componentwise(delta, t, |d, t| d * t)?, |a, d| a + d)?
        }
        MathFunction::Dot => {
            let (a, b) = (next()?.floats()?, next()?.floats()?);
            Value::Scalar(dot(&a, &b))
        }
        MathFunction::Cross => {
            let (a, b) = (next()?.floats()?, next()?.floats()?);
            if a.len() != 3 || b.len() != 3 {
                return type_error("cross() needs two vec3 operands");
            }
            Value::Vector(vec![
                a[1] * b[2] - a[2] * b[1],
                a[2] * b[0] - a[0] * b[2],
                a[0] * b[1] - a[1] * b[0],
            ])
        }
        MathFunction::Length => {
            let a = next()?.floats()?;
            Value::Scalar(dot(&a, &a).sqrt())
        }
        MathFunction::Distance => {
            let d = componentwise(next()?, next()?, |a, b| a - b)?.floats()?;
            Value::Scalar(dot(&d, &d).sqrt())
        }
        MathFunction::Normalize => {
            let v = next()?;
            let a = v.floats()?;
            let len = dot(&a, &a).sqrt();
            if len == 0.0 { v } else { v.map(|x| x / len) }
        }
        other => return unsupported(format!("builtin {other:?}")),
    })
}

fn const_eval(module: &Module, h: Handle<Expression>) -> Result<Value> {
    match module.global_expressions[h] {
        Expression::Literal(lit) => literal(lit).map(Value::Scalar),
        Expression::Constant(c) => const_eval(module, module.constants[c].init),
        Expression::ZeroValue(ty) => Value::zero(module, ty),
        Expression::Compose { ty, ref components } => {
            let parts = components
                .iter()
                .map(|&c| const_eval(module, c))
                .collect::<Result<Vec<_>>>()?;
            compose(module, ty, parts)
        }
        Expression::Splat { size, value } => {
            let s = const_eval(module, value)?.scalar()?;
            Ok(Value::Vector(vec![s; vector_len(size)]))
        }
        ref other => unsupported(format!("constant expression {other:?}")),
    }
}

#[derive(Debug, Clone, Copy)]
enum Root {
    Global(Handle<GlobalVariable>),
    Local(Handle<LocalVariable>),
}

#[derive(Debug, Clone)]
struct Place {
    root: Root,
    path: Vec<usize>,
}

enum Flow {
    Continue,
    Return(Option<Value>),
    Discard,
}

/// Result of running an entry point once.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Returned(Option<Value>),
    Discarded,
}

/// One execution of a function with fixed arguments and uniform values.
pub struct Invocation<'a> {
    module: &'a Module,
    info: &'a FunctionInfo,
    function: &'a Function,
    args: Vec<Value>,
    globals: &'a HashMap<Handle<GlobalVariable>, Value>,
    locals: HashMap<Handle<LocalVariable>, Value>,
    values: HashMap<Handle<Expression>, Value>,
}

impl<'a> Invocation<'a> {
    pub fn new(
        module: &'a Module,
        info: &'a FunctionInfo,
        function: &'a Function,
        args: Vec<Value>,
        globals: &'a HashMap<Handle<GlobalVariable>, Value>,
    ) -> Self {
        Self {
            module,
            info,
            function,
            args,
            globals,
            locals: HashMap::new(),
            values: HashMap::new(),
        }
    }

    pub fn run(mut self) -> Result<Outcome> {
        let function = self.function;
        for (handle, local) in function.local_variables.iter() {
            let value = match local.init {
                Some(init) => self.eval(init)?,
                None => Value::zero(self.module, local.ty)?,
            };
            self.locals.insert(handle, value);
        }

        Ok(match self.exec_block(&function.body)? {
            Flow::Continue => Outcome::Returned(None),
            Flow::Return(value) => Outcome::Returned(value),
            Flow::Discard => Outcome::Discarded,
        })
    }

    fn exec_block(&mut self, block: &naga::Block) -> Result<Flow> {
        for statement in block.iter() {
            match self.exec(statement)? {
                Flow::Continue => {}
                done => return Ok(done),
            }
        }
        Ok(Flow::Continue)
    }

    fn exec(&mut self, statement: &Statement) -> Result<Flow> {
        match *statement {
            Statement::Emit(ref range) => {
                // Evaluate in emission order so loads observe earlier stores.
                for handle in range.clone() {
                    if !self.is_pointer(handle) {
                        self.eval(handle)?;
                    }
                }
                Ok(Flow::Continue)
            }
            Statement::Block(ref block) => self.exec_block(block),
            Statement::If { condition, ref accept, ref reject } => {
                if self.eval(condition)?.scalar()? != 0.0 {
                    self.exec_block(accept)
                } else {
                    self.exec_block(reject)
                }
            }
            Statement::Store { pointer, value } => {
                let place = self.place(pointer)?;
                let value = self.eval(value)?;
                self.write(&place, value)?;
                Ok(Flow::Continue)
            }
            Statement::Return { value } => {
                let value = value.map(|h| self.eval(h)).transpose()?;
                Ok(Flow::Return(value))
            }
            Statement::Kill => Ok(Flow::Discard),
            ref other => unsupported(format!("statement {other:?}")),
        }
    }

    fn is_pointer(&self, handle: Handle<Expression>) -> bool {
        match self.function.expressions[handle] {
            Expression::GlobalVariable(_) | Expression::LocalVariable(_) => true,
            Expression::AccessIndex { base, .. } | Expression::Access { base, .. } => {
                self.is_pointer(base)
            }
            _ => false,
        }
    }

    fn place(&mut self, handle: Handle<Expression>) -> Result<Place> {
        let function = self.function;
        match function.expressions[handle] {
            Expression::GlobalVariable(g) => Ok(Place { root: Root::Global(g), path: Vec::new() }),
            Expression::LocalVariable(l) => Ok(Place { root: Root::Local(l), path: Vec::new() }),
            Expression::AccessIndex { base, index } => {
                let mut place = self.place(base)?;
                place.path.push(index as usize);
                Ok(place)
            }
            Expression::Access { base, index } => {
                let index = self.eval(index)?.scalar()? as usize;
                let mut place = self.place(base)?;
                place.path.push(index);
                Ok(place)
            }
            ref other => type_error(format!("{other:?} is not a pointer")),
        }
    }

    fn read(&self, place: &Place) -> Result<Value> {
        let root = match place.root {
            Root::Global(g) => self.globals.get(&g).ok_or_else(|| {
                let name = self.module.global_variables[g].name.as_deref().unwrap_or("?");
                EvalError::Unsupported(format!("global '{name}' has no value"))
            })?,
            Root::Local(l) => self
                .locals
                .get(&l)
                .ok_or_else(|| EvalError::Type("unknown local variable".into()))?,
        };

        let mut value = root.clone();
        for &index in &place.path {
            value = value.component(index)?;
        }
        Ok(value)
    }

    fn write(&mut self, place: &Place, value: Value) -> Result<()> {
        match place.root {
            Root::Global(_) => unsupported("stores to module-scope variables"),
            Root::Local(l) => {
                let target = self
                    .locals
                    .get_mut(&l)
                    .ok_or_else(|| EvalError::Type("unknown local variable".into()))?;
                store_into(target, &place.path, value)
            }
        }
    }

    fn eval(&mut self, handle: Handle<Expression>) -> Result<Value> {
        if let Some(value) = self.values.get(&handle) {
            return Ok(value.clone());
        }

        let module = self.module;
        let function = self.function;

        let value = match function.expressions[handle] {
            Expression::Literal(lit) => Value::Scalar(literal(lit)?),
            Expression::Constant(c) => const_eval(module, module.constants[c].init)?,
            Expression::ZeroValue(ty) => Value::zero(module, ty)?,
            Expression::Compose { ty, ref components } => {
                let parts = components
                    .iter()
                    .map(|&c| self.eval(c))
                    .collect::<Result<Vec<_>>>()?;
                compose(module, ty, parts)?
            }
            Expression::Splat { size, value } => {
                let s = self.eval(value)?.scalar()?;
                Value::Vector(vec![s; vector_len(size)])
            }
            Expression::Swizzle { size, vector, pattern } => {
                let v = self.eval(vector)?.floats()?;
                let picked = pattern[..vector_len(size)]
                    .iter()
                    .map(|&c| {
                        v.get(swizzle_index(c))
                            .copied()
                            .ok_or_else(|| EvalError::Type("swizzle out of range".into()))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Value::Vector(picked)
            }
            Expression::AccessIndex { base, index } => {
                self.eval(base)?.component(index as usize)?
            }
            Expression::Access { base, index } => {
                let index = self.eval(index)?.scalar()? as usize;
                self.eval(base)?.component(index)?
            }
            Expression::Load { pointer } => {
                let place = self.place(pointer)?;
                self.read(&place)?
            }
            Expression::FunctionArgument(i) => self
                .args
                .get(i as usize)
                .cloned()
                .ok_or_else(|| EvalError::Type(format!("missing argument {i}")))?,
            Expression::Binary { op, left, right } => {
                let (l, r) = (self.eval(left)?, self.eval(right)?);
                match (op, self.integer_kind(left)) {
                    (BinaryOperator::Divide, Some(_)) => {
                        componentwise(l, r, |a, b| if b == 0.0 { a } else { (a / b).trunc() })?
                    }
                    (BinaryOperator::Modulo, Some(_)) => {
                        componentwise(l, r, |a, b| if b == 0.0 { 0.0 } else { a % b })?
                    }
                    _ => binary(op, l, r)?,
                }
            }
            Expression::Unary { op, expr } => {
                let v = self.eval(expr)?;
                match op {
                    UnaryOperator::Negate => v.map(|x| -x),
                    UnaryOperator::LogicalNot => v.map(|x| bool_value(x == 0.0)),
                    other => return unsupported(format!("unary operator {other:?}")),
                }
            }
            Expression::Select { condition, accept, reject } => {
                if self.eval(condition)?.scalar()? != 0.0 {
                    self.eval(accept)?
                } else {
                    self.eval(reject)?
                }
            }
            Expression::Math { fun, arg, arg1, arg2, .. } => {
                let mut args = vec![self.eval(arg)?];
                for extra in [arg1, arg2].into_iter().flatten() {
                    args.push(self.eval(extra)?);
                }
                math(fun, args)?
            }
            Expression::As { expr, kind, convert } => {
                let v = self.eval(expr)?;
                if convert.is_none() {
                    return unsupported("bitcast");
                }
                match kind {
                    ScalarKind::Sint => v.map(f32::trunc),
                    ScalarKind::Uint => v.map(|x| x.trunc().max(0.0)),
                    ScalarKind::Bool => v.map(|x| bool_value(x != 0.0)),
                    _ => v,
                }
            }
            ref other => return unsupported(format!("expression {other:?}")),
        };

        self.values.insert(handle, value.clone());
        Ok(value)
    }

    /// `Sint` or `Uint` when `handle` evaluates to an integer scalar or vector.
    fn integer_kind(&self, handle: Handle<Expression>) -> Option<ScalarKind> {
        let inner = self.info[handle].ty.inner_with(&self.module.types);
        match inner.scalar_kind() {
            Some(kind @ (ScalarKind::Sint | ScalarKind::Uint)) => Some(kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> (Module, naga::valid::ModuleInfo) {
        let module = naga::front::wgsl::parse_str(src).unwrap();
        let info = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module)
        .unwrap();
        (module, info)
    }

    fn run(src: &str, entry: &str, args: Vec<Value>) -> Outcome {
        let (module, info) = parse(src);
        let index = module.entry_points.iter().position(|e| e.name == entry).unwrap();
        let globals = HashMap::new();
        Invocation::new(
            &module,
            info.get_entry_point(index),
            &module.entry_points[index].function,
            args,
            &globals,
        )
        .run()
        .unwrap()
    }

    fn returned(outcome: Outcome) -> Value {
        match outcome {
            Outcome::Returned(Some(v)) => v,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn matrix_vector_product_is_column_major() {
        let src = r#"
@fragment
fn main() -> @location(0) vec4<f32> {
    let m = mat4x4<f32>(
        vec4<f32>(1.0, 0.0, 0.0, 0.0),
        vec4<f32>(0.0, 1.0, 0.0, 0.0),
        vec4<f32>(0.0, 0.0, 1.0, 0.0),
        vec4<f32>(2.0, 3.0, 4.0, 1.0),
    );
    return m * vec4<f32>(1.0, 1.0, 1.0, 1.0);
}
"#;
        assert_eq!(returned(run(src, "main", vec![])), Value::Vector(vec![3.0, 4.0, 5.0, 1.0]));
    }

    #[test]
    fn locals_swizzles_and_builtins() {
        let src = r#"
@fragment
fn main(@location(0) p: vec3<f32>) -> @location(0) vec4<f32> {
    var c = vec3<f32>(0.0);
    c.x = max(p.x, 0.25);
    c = vec3<f32>(c.x, p.zy);
    return vec4<f32>(clamp(c, vec3<f32>(0.0), vec3<f32>(1.0)), dot(p, p));
}
"#;
        let out = returned(run(src, "main", vec![Value::Vector(vec![0.1, 2.0, 0.5])]));
        let Value::Vector(v) = out else { panic!("expected vector") };
        assert_eq!(&v[..3], &[0.25, 0.5, 1.0]);
        assert!((v[3] - (0.01 + 4.0 + 0.25)).abs() < 1e-5);
    }

    #[test]
    fn discard_is_reported() {
        let src = r#"
@fragment
fn main(@location(0) a: f32) -> @location(0) vec4<f32> {
    if a < 0.5 {
        discard;
    }
    return vec4<f32>(a);
}
"#;
        assert_eq!(run(src, "main", vec![Value::Scalar(0.1)]), Outcome::Discarded);
        assert_eq!(
            returned(run(src, "main", vec![Value::Scalar(0.75)])),
            Value::Vector(vec![0.75; 4])
        );
    }

    #[test]
    fn uniform_reads_come_from_globals() {
        let src = r#"
@group(0) @binding(0) var<uniform> scale: f32;

@fragment
fn main() -> @location(0) vec4<f32> {
    return vec4<f32>(scale, scale * 2.0, 0.0, 1.0);
}
"#;
        let (module, info) = parse(src);
        let (handle, _) = module.global_variables.iter().next().unwrap();
        let mut globals = HashMap::new();
        globals.insert(handle, Value::Scalar(0.25));
        let ep = &module.entry_points[0];
        let out = Invocation::new(&module, info.get_entry_point(0), &ep.function, vec![], &globals)
            .run()
            .unwrap();
        assert_eq!(returned(out), Value::Vector(vec![0.25, 0.5, 0.0, 1.0]));
    }

    #[test]
    fn missing_uniform_value_is_an_error() {
        let src = r#"
@group(0) @binding(0) var<uniform> scale: f32;

@fragment
fn main() -> @location(0) vec4<f32> {
    return vec4<f32>(scale);
}
"#;
        let (module, info) = parse(src);
        let globals = HashMap::new();
        let ep = &module.entry_points[0];
        let err = Invocation::new(&module, info.get_entry_point(0), &ep.function, vec![], &globals)
            .run()
            .unwrap_err();
        assert!(matches!(err, EvalError::Unsupported(_)));
    }

    #[test]
    fn integer_division_truncates() {
        let src = r#"
@fragment
fn main(@location(0) x: f32) -> @location(0) vec4<f32> {
    let b = i32(x * 2.0 + 1.5);
    let c = f32(b / 2);
    let r = f32(-b % 2);
    return vec4<f32>(c / 4.0, f32(i32(x)), r, f32(u32(x)));
}
"#;
        assert_eq!(
            returned(run(src, "main", vec![Value::Scalar(2.75)])),
            Value::Vector(vec![0.75, 2.0, -1.0, 2.0])
        );
    }

    #[test]
    fn float_division_is_exact() {
        let src = r#"
@fragment
fn main(@location(0) x: f32) -> @location(0) vec4<f32> {
    return vec4<f32>(x / 2.0);
}
"#;
        assert_eq!(
            returned(run(src, "main", vec![Value::Scalar(7.0)])),
            Value::Vector(vec![3.5; 4])
        );
    }

    #[test]
    fn from_floats_fills_missing_components() {
        let src = r#"
@vertex
fn main(@location(0) p: vec4<f32>) -> @builtin(position) vec4<f32> {
    return p;
}
"#;
        let module = naga::front::wgsl::parse_str(src).unwrap();
        let ty = module.entry_points[0].function.arguments[0].ty;
        assert_eq!(
            Value::from_floats(&module, ty, &[1.0, 2.0, 3.0]).unwrap(),
            Value::Vector(vec![1.0, 2.0, 3.0, 1.0])
        );
    }

    #[test]
    fn uniform_values_convert_by_shape() {
        assert_eq!(Value::from_uniform(&UniformValue::Float(2.0)), Value::Scalar(2.0));
        assert_eq!(
            Value::from_uniform(&UniformValue::Vec2([1.0, 2.0])),
            Value::Vector(vec![1.0, 2.0])
        );
        let Value::Matrix { columns, rows, .. } = Value::from_uniform(&UniformValue::Mat4([0.0; 16]))
        else {
            panic!("expected matrix");
        };
        assert_eq!((columns, rows), (4, 4));
    }
}
