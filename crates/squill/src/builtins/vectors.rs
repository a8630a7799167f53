//! Dense numeric vector builtins.

use std::rc::Rc;

use crate::{
    decl::{Decl, Kind, Registry, VARIADIC},
    error::{EvalError, EvalResult},
    value::Value,
};

pub(crate) fn install(registry: &mut Registry) {
    registry.add(
        Decl::func("vector", vector)
            .args(0, VARIADIC)
            .result(Kind::Vector)
            .pure()
            .doc("builds a dense numeric vector from its arguments or a single list"),
    );
    registry.add(
        Decl::func("dot", dot)
            .args(2, 3)
            .param("a", Kind::Vector, "left operand")
            .param("b", Kind::Vector, "right operand")
            .param("mode", Kind::String, "DOT (default), COSINE, or EUCLIDEAN")
            .result(Kind::Number)
            .pure()
            .doc("inner product, cosine similarity, or euclidean distance"),
    );
}

fn as_vector(v: &Value) -> EvalResult<Rc<[f64]>> {
    match v.peel_source() {
        Value::Vector(items) => Ok(items.clone()),
        Value::List(items) => Ok(items.iter().map(Value::to_f64).collect()),
        other => Err(EvalError::type_mismatch(format!(
            "expected a vector, got {}",
            other.tag()
        ))),
    }
}

fn vector(args: &[Value]) -> EvalResult<Value> {
    if args.len() == 1
        && let Value::List(_) | Value::Vector(_) = args[0].peel_source()
    {
        return Ok(Value::Vector(as_vector(&args[0])?));
    }
    Ok(Value::Vector(args.iter().map(Value::to_f64).collect()))
}

fn dot(args: &[Value]) -> EvalResult<Value> {
    let a = as_vector(&args[0])?;
    let b = as_vector(&args[1])?;
    if a.len() != b.len() {
        return Err(EvalError::type_mismatch(format!(
            "`dot` needs equal dimensions, got {} and {}",
            a.len(),
            b.len()
        )));
    }
    let mode = args
        .get(2)
        .map(|m| m.coerce_string().to_uppercase())
        .unwrap_or_else(|| "DOT".to_owned());
    let inner: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let result = match mode.as_str() {
        "DOT" => inner,
        "COSINE" => {
            let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
            let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
            if norm_a == 0.0 || norm_b == 0.0 {
                0.0
            } else {
                inner / (norm_a * norm_b)
            }
        }
        "EUCLIDEAN" => a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f64>()
            .sqrt(),
        other => {
            return Err(EvalError::type_mismatch(format!(
                "`dot` mode must be DOT, COSINE, or EUCLIDEAN, got {other}"
            )));
        }
    };
    Ok(Value::Float(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec3(x: f64, y: f64, z: f64) -> Value {
        Value::Vector(Rc::from(vec![x, y, z]))
    }

    #[test]
    fn dot_modes() {
        let a = vec3(1.0, 2.0, 3.0);
        let b = vec3(4.0, 5.0, 6.0);
        assert_eq!(dot(&[a.clone(), b.clone()]).unwrap(), Value::Float(32.0));
        let Value::Float(cos) = dot(&[a.clone(), a.clone(), Value::string("COSINE")]).unwrap() else {
            panic!("expected float");
        };
        assert!((cos - 1.0).abs() < 1e-12);
        assert_eq!(
            dot(&[a.clone(), a, Value::string("EUCLIDEAN")]).unwrap(),
            Value::Float(0.0)
        );
    }

    #[test]
    fn lists_coerce_to_vectors() {
        let xs = Value::list(vec![Value::Int(1), Value::Int(0)]);
        let ys = Value::list(vec![Value::Int(0), Value::Int(1)]);
        assert_eq!(dot(&[xs, ys]).unwrap(), Value::Float(0.0));
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let a = vec3(1.0, 2.0, 3.0);
        let b = Value::Vector(Rc::from(vec![1.0]));
        assert!(dot(&[a, b]).is_err());
    }
}
