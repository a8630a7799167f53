//! Arithmetic and comparison builtins.
//!
//! Numeric semantics follow SQL expressions rather than a numeric tower:
//! `+` has an exact-integer fast path and falls back to floats on the first
//! non-integer; `*` treats whole-valued floats as integers for the fast
//! path; any nil operand of `- * /` yields nil; strings coerce numerically
//! (unparseable text counts as zero).

use std::cmp::Ordering;

use crate::{
    decl::{Decl, JitOp, Kind, Registry, VARIADIC},
    error::EvalResult,
    value::Value,
};

pub(crate) fn install(registry: &mut Registry) {
    registry.add(
        Decl::func("+", add)
            .args(1, VARIADIC)
            .result(Kind::Number)
            .pure()
            .jit(JitOp::Add)
            .doc("sum; exact while all operands are exact integers"),
    );
    registry.add(
        Decl::func("-", sub)
            .args(1, VARIADIC)
            .result(Kind::Number)
            .pure()
            .jit(JitOp::Sub)
            .doc("difference, or negation with one operand; nil operands yield nil"),
    );
    registry.add(
        Decl::func("*", mul)
            .args(1, VARIADIC)
            .result(Kind::Number)
            .pure()
            .jit(JitOp::Mul)
            .doc("product; whole-valued floats count as integers for the fast path"),
    );
    registry.add(
        Decl::func("/", div)
            .args(2, VARIADIC)
            .result(Kind::Number)
            .pure()
            .jit(JitOp::Div)
            .doc("quotient; exact when it divides evenly, float otherwise; nil operands yield nil"),
    );
    registry.add(Decl::func("<", lt).args(2, 2).result(Kind::Bool).pure().jit(JitOp::Lt));
    registry.add(Decl::func("<=", le).args(2, 2).result(Kind::Bool).pure().jit(JitOp::Le));
    registry.add(Decl::func(">", gt).args(2, 2).result(Kind::Bool).pure().jit(JitOp::Gt));
    registry.add(Decl::func(">=", ge).args(2, 2).result(Kind::Bool).pure().jit(JitOp::Ge));
    registry.add(
        Decl::func("equal?", equal)
            .args(2, 2)
            .result(Kind::Bool)
            .pure()
            .doc("rich equality: numeric cross-type, unordered association pairs"),
    );
    registry.add(
        Decl::func("equal??", equal_strict)
            .args(2, 2)
            .result(Kind::Bool)
            .pure()
            .doc("strict equality: kinds must match exactly"),
    );
    registry.add(
        Decl::func("equal_collate", equal_collate)
            .args(2, 2)
            .result(Kind::Bool)
            .pure()
            .doc("collation-aware equality: strings compare case-insensitively"),
    );
    registry.add(
        Decl::func("notequal_collate", notequal_collate)
            .args(2, 2)
            .result(Kind::Bool)
            .pure(),
    );
    registry.add(Decl::func("!", not).args(1, 1).result(Kind::Bool).pure());
    registry.add(Decl::func("not", not).args(1, 1).result(Kind::Bool).pure());
    registry.add(
        Decl::func("nil?", is_nil)
            .args(1, 1)
            .result(Kind::Bool)
            .pure()
            .jit(JitOp::IsNil),
    );
    registry.add(
        Decl::func("int?", is_int)
            .args(1, 1)
            .result(Kind::Bool)
            .pure()
            .jit(JitOp::IsInt),
    );
    registry.add(
        Decl::func("number?", is_number)
            .args(1, 1)
            .result(Kind::Bool)
            .pure()
            .jit(JitOp::IsNumber),
    );
    registry.add(Decl::func("min", min).args(1, VARIADIC).pure().doc("smallest operand"));
    registry.add(Decl::func("max", max).args(1, VARIADIC).pure().doc("largest operand"));
    registry.add(Decl::func("floor", floor).args(1, 1).result(Kind::Int).pure());
    registry.add(Decl::func("ceil", ceil).args(1, 1).result(Kind::Int).pure());
    registry.add(Decl::func("round", round).args(1, 1).result(Kind::Int).pure());
    registry.add(Decl::func("sqrt", sqrt).args(1, 1).result(Kind::Number).pure());
    registry.add(
        Decl::func("sql_abs", sql_abs)
            .args(1, 1)
            .result(Kind::Number)
            .pure()
            .doc("absolute value, exact for exact inputs"),
    );
    registry.add(
        Decl::func("sql_rand", sql_rand)
            .args(0, 0)
            .result(Kind::Number)
            .doc("uniform float in [0, 1)"),
    );
}

fn is_int_value(v: &Value) -> bool {
    matches!(v.peel_source(), Value::Int(_))
}

fn add(args: &[Value]) -> EvalResult<Value> {
    if args.iter().all(is_int_value) {
        let mut sum = 0i64;
        for arg in args {
            sum = sum.wrapping_add(arg.to_i64());
        }
        return Ok(Value::Int(sum));
    }
    let sum: f64 = args.iter().map(Value::to_f64).sum();
    if args.iter().any(|a| matches!(a.peel_source(), Value::Float(_))) {
        Ok(Value::Float(sum))
    } else {
        // only coerced operands (strings, bools): recover exactness
        Ok(Value::number(sum))
    }
}

fn sub(args: &[Value]) -> EvalResult<Value> {
    if args.iter().any(Value::is_nil) {
        return Ok(Value::Nil);
    }
    if args.len() == 1 {
        return Ok(match args[0].peel_source() {
            Value::Int(i) => Value::Int(i.wrapping_neg()),
            other => Value::Float(-other.to_f64()),
        });
    }
    if args.iter().all(is_int_value) {
        let mut acc = args[0].to_i64();
        for arg in &args[1..] {
            acc = acc.wrapping_sub(arg.to_i64());
        }
        return Ok(Value::Int(acc));
    }
    let mut acc = args[0].to_f64();
    for arg in &args[1..] {
        acc -= arg.to_f64();
    }
    if args.iter().any(|a| matches!(a.peel_source(), Value::Float(_))) {
        Ok(Value::Float(acc))
    } else {
        Ok(Value::number(acc))
    }
}

fn mul(args: &[Value]) -> EvalResult<Value> {
    if args.iter().any(Value::is_nil) {
        return Ok(Value::Nil);
    }
    // whole-valued floats take the exact path
    let exact = args.iter().all(|a| match a.peel_source() {
        Value::Int(_) => true,
        Value::Float(f) => f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0,
        _ => false,
    });
    if exact {
        let mut acc = 1i64;
        for arg in args {
            acc = acc.wrapping_mul(arg.to_i64());
        }
        return Ok(Value::Int(acc));
    }
    let mut acc = 1.0f64;
    for arg in args {
        acc *= arg.to_f64();
    }
    Ok(Value::Float(acc))
}

fn div(args: &[Value]) -> EvalResult<Value> {
    if args.iter().any(Value::is_nil) {
        return Ok(Value::Nil);
    }
    let mut acc = args[0].clone();
    for arg in &args[1..] {
        acc = match (acc.peel_source(), arg.peel_source()) {
            (Value::Int(a), Value::Int(b)) if *b != 0 && a % b == 0 && !(*a == i64::MIN && *b == -1) => {
                Value::Int(a / b)
            }
            (a, b) => Value::Float(a.to_f64() / b.to_f64()),
        };
    }
    Ok(acc)
}

fn lt(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(args[0].compare(&args[1]) == Ordering::Less))
}

fn le(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(args[0].compare(&args[1]) != Ordering::Greater))
}

fn gt(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(args[0].compare(&args[1]) == Ordering::Greater))
}

fn ge(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(args[0].compare(&args[1]) != Ordering::Less))
}

fn equal(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(args[0].equal(&args[1])))
}

fn equal_strict(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(args[0].equal_strict(&args[1])))
}

fn equal_collate(args: &[Value]) -> EvalResult<Value> {
    let result = match (args[0].peel_source(), args[1].peel_source()) {
        (Value::String(a), Value::String(b)) => a.to_lowercase() == b.to_lowercase(),
        (a, b) => a.equal(b),
    };
    Ok(Value::Bool(result))
}

fn notequal_collate(args: &[Value]) -> EvalResult<Value> {
    let Value::Bool(eq) = equal_collate(args)? else {
        return Ok(Value::Bool(false));
    };
    Ok(Value::Bool(!eq))
}

fn not(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(!args[0].is_truthy()))
}

fn is_nil(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(args[0].is_nil()))
}

fn is_int(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(matches!(args[0].peel_source(), Value::Int(_))))
}

fn is_number(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(matches!(
        args[0].peel_source(),
        Value::Int(_) | Value::Float(_)
    )))
}

fn min(args: &[Value]) -> EvalResult<Value> {
    let mut best = args[0].clone();
    for arg in &args[1..] {
        if arg.compare(&best) == Ordering::Less {
            best = arg.clone();
        }
    }
    Ok(best)
}

fn max(args: &[Value]) -> EvalResult<Value> {
    let mut best = args[0].clone();
    for arg in &args[1..] {
        if arg.compare(&best) == Ordering::Greater {
            best = arg.clone();
        }
    }
    Ok(best)
}

fn floor(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::number(args[0].to_f64().floor()))
}

fn ceil(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::number(args[0].to_f64().ceil()))
}

fn round(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::number(args[0].to_f64().round()))
}

fn sqrt(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Float(args[0].to_f64().sqrt()))
}

fn sql_abs(args: &[Value]) -> EvalResult<Value> {
    Ok(match args[0].peel_source() {
        Value::Int(i) => Value::Int(i.wrapping_abs()),
        other => Value::Float(other.to_f64().abs()),
    })
}

fn sql_rand(_args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Float(rand::random::<f64>()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_integer_fast_path() {
        assert_eq!(add(&[Value::Int(1), Value::Int(2), Value::Int(3)]).unwrap(), Value::Int(6));
        assert_eq!(add(&[Value::Int(1), Value::Float(2.5)]).unwrap(), Value::Float(3.5));
        // coerced strings recover exactness
        assert_eq!(add(&[Value::string("1"), Value::Int(2)]).unwrap(), Value::Int(3));
    }

    #[test]
    fn nil_propagates_through_mul() {
        assert_eq!(mul(&[Value::Int(2), Value::Nil, Value::Int(3)]).unwrap(), Value::Nil);
        assert_eq!(sub(&[Value::Nil, Value::Int(1)]).unwrap(), Value::Nil);
        assert_eq!(div(&[Value::Int(1), Value::Nil]).unwrap(), Value::Nil);
    }

    #[test]
    fn mul_whole_floats_stay_exact() {
        assert_eq!(mul(&[Value::Float(2.0), Value::Int(3)]).unwrap(), Value::Int(6));
        assert_eq!(mul(&[Value::Float(2.5), Value::Int(2)]).unwrap(), Value::Float(5.0));
    }

    #[test]
    fn div_exactness() {
        assert_eq!(div(&[Value::Int(6), Value::Int(3)]).unwrap(), Value::Int(2));
        assert_eq!(div(&[Value::Int(7), Value::Int(2)]).unwrap(), Value::Float(3.5));
    }
}
