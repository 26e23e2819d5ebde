//! Built-in spreadsheet functions (Rust) and their metadata.
//!
//! Conventions:
//! - Spreadsheet-facing names are ALL CAPS (e.g. `SUM`, `AVERAGE`).
//! - Every function takes decoded [`Value`]s: ranges arrive as
//!   [`Value::Matrix`], single cells as [`Value::Scalar`].
//! - Aggregates read numbers from ranges and skip text/empty cells there, but
//!   coerce direct scalar arguments (`SUM("3", TRUE)` is 4).
//! - If you add a new built-in, add it to `BUILTINS`.

use chrono::Local;
use rand::Rng;

use crate::engine::{ErrorKind, ErrorValue, FunctionRegistry, RichValue, Scalar, Value};

type BuiltinFn = fn(&[Value]) -> Result<Value, ErrorValue>;

pub struct Builtin {
    pub name: &'static str,
    #[allow(dead_code)]
    pub description: &'static str,
    func: BuiltinFn,
}

pub const BUILTINS: &[Builtin] = &[
    Builtin {
        name: "SUM",
        description: "Sum of numeric values",
        func: sum,
    },
    Builtin {
        name: "AVERAGE",
        description: "Average of numeric values",
        func: average,
    },
    Builtin {
        name: "AVG",
        description: "Alias of AVERAGE",
        func: average,
    },
    Builtin {
        name: "COUNT",
        description: "Count of numeric values",
        func: count,
    },
    Builtin {
        name: "COUNTA",
        description: "Count of non-empty values",
        func: counta,
    },
    Builtin {
        name: "MIN",
        description: "Minimum numeric value (0 when there are none)",
        func: min,
    },
    Builtin {
        name: "MAX",
        description: "Maximum numeric value (0 when there are none)",
        func: max,
    },
    Builtin {
        name: "PRODUCT",
        description: "Product of numeric values",
        func: product,
    },
    Builtin {
        name: "ABS",
        description: "Absolute value",
        func: abs,
    },
    Builtin {
        name: "ROUND",
        description: "Round to a number of decimal places",
        func: round,
    },
    Builtin {
        name: "SQRT",
        description: "Square root",
        func: sqrt,
    },
    Builtin {
        name: "POWER",
        description: "Raise a number to a power",
        func: power,
    },
    Builtin {
        name: "MOD",
        description: "Remainder with the sign of the divisor",
        func: modulo,
    },
    Builtin {
        name: "IF",
        description: "Choose between two values",
        func: if_fn,
    },
    Builtin {
        name: "AND",
        description: "True when every argument is true",
        func: and,
    },
    Builtin {
        name: "OR",
        description: "True when any argument is true",
        func: or,
    },
    Builtin {
        name: "NOT",
        description: "Logical negation",
        func: not,
    },
    Builtin {
        name: "ISBLANK",
        description: "True for an empty cell",
        func: isblank,
    },
    Builtin {
        name: "ISNUMBER",
        description: "True for a number",
        func: isnumber,
    },
    Builtin {
        name: "ISTEXT",
        description: "True for text",
        func: istext,
    },
    Builtin {
        name: "CONCATENATE",
        description: "Join values as text",
        func: concatenate,
    },
    Builtin {
        name: "CONCAT",
        description: "Alias of CONCATENATE",
        func: concatenate,
    },
    Builtin {
        name: "LEN",
        description: "Length of text",
        func: len,
    },
    Builtin {
        name: "UPPER",
        description: "Upper-case text",
        func: upper,
    },
    Builtin {
        name: "LOWER",
        description: "Lower-case text",
        func: lower,
    },
    Builtin {
        name: "TRIM",
        description: "Remove leading, trailing and repeated spaces",
        func: trim,
    },
    Builtin {
        name: "HYPERLINK",
        description: "A link with an optional title",
        func: hyperlink,
    },
    Builtin {
        name: "TODAY",
        description: "Current date (YYYY-MM-DD)",
        func: today,
    },
    Builtin {
        name: "NOW",
        description: "Current date and time (YYYY-MM-DD HH:MM:SS)",
        func: now,
    },
    Builtin {
        name: "RAND",
        description: "Random number in [0, 1)",
        func: rand_fn,
    },
    Builtin {
        name: "RANDBETWEEN",
        description: "Random integer in [low, high]",
        func: randbetween,
    },
    Builtin {
        name: "NA",
        description: "The #N/A error",
        func: na,
    },
];

/// Register every built-in into `registry`.
pub fn register_builtins(registry: &mut FunctionRegistry) {
    for builtin in BUILTINS {
        registry.register(builtin.name, builtin.func);
    }
}

fn invalid_arg(message: impl Into<String>) -> ErrorValue {
    ErrorValue::new(ErrorKind::Value, message)
}

fn expect_args(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), ErrorValue> {
    if let Some(Value::Error(err)) = args.iter().find(|a| matches!(a, Value::Error(_))) {
        return Err(err.clone());
    }
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{}", min)
        } else if max == usize::MAX {
            format!("at least {}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(invalid_arg(format!(
            "{} expects {} argument(s), got {}",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn scalar_arg(args: &[Value], index: usize) -> Scalar {
    args.get(index).map(Value::first_scalar).unwrap_or_default()
}

fn number_arg(args: &[Value], index: usize) -> Result<f64, ErrorValue> {
    scalar_arg(args, index).coerce_number()
}

fn text_arg(args: &[Value], index: usize) -> String {
    scalar_arg(args, index).to_text()
}

/// Numbers for aggregates: ranges contribute only numeric cells, direct
/// arguments are coerced.
fn numbers(args: &[Value]) -> Result<Vec<f64>, ErrorValue> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            Value::Matrix(rows) => out.extend(rows.iter().flatten().filter_map(Scalar::as_number)),
            Value::Scalar(Scalar::Empty) => {}
            Value::Scalar(s) => out.push(s.coerce_number()?),
            Value::Error(err) => return Err(err.clone()),
            Value::Rich(_) => return Err(invalid_arg("Expected a number, got a hyperlink")),
        }
    }
    Ok(out)
}

fn finite(n: f64) -> Result<Value, ErrorValue> {
    if n.is_nan() || n.is_infinite() {
        return Err(ErrorValue::new(ErrorKind::Num, "Result is not a finite number"));
    }
    Ok(Value::number(n))
}

fn sum(args: &[Value]) -> Result<Value, ErrorValue> {
    finite(numbers(args)?.iter().sum())
}

fn average(args: &[Value]) -> Result<Value, ErrorValue> {
    let values = numbers(args)?;
    if values.is_empty() {
        return Err(ErrorValue::new(ErrorKind::DivZero, "AVERAGE of no numbers"));
    }
    finite(values.iter().sum::<f64>() / values.len() as f64)
}

fn count(args: &[Value]) -> Result<Value, ErrorValue> {
    let n = args
        .iter()
        .flat_map(Value::scalars)
        .filter(|s| matches!(s, Scalar::Number(_)))
        .count();
    Ok(Value::number(n as f64))
}

fn counta(args: &[Value]) -> Result<Value, ErrorValue> {
    let n = args
        .iter()
        .flat_map(Value::scalars)
        .filter(|s| !matches!(s, Scalar::Empty))
        .count();
    Ok(Value::number(n as f64))
}

fn min(args: &[Value]) -> Result<Value, ErrorValue> {
    let values = numbers(args)?;
    Ok(Value::number(values.into_iter().reduce(f64::min).unwrap_or(0.0)))
}

fn max(args: &[Value]) -> Result<Value, ErrorValue> {
    let values = numbers(args)?;
    Ok(Value::number(values.into_iter().reduce(f64::max).unwrap_or(0.0)))
}

fn product(args: &[Value]) -> Result<Value, ErrorValue> {
    let values = numbers(args)?;
    if values.is_empty() {
        return Ok(Value::number(0.0));
    }
    finite(values.iter().product())
}

fn abs(args: &[Value]) -> Result<Value, ErrorValue> {
    expect_args("ABS", args, 1, 1)?;
    Ok(Value::number(number_arg(args, 0)?.abs()))
}

fn round(args: &[Value]) -> Result<Value, ErrorValue> {
    const MAX_DECIMALS: f64 = 15.0;
    expect_args("ROUND", args, 1, 2)?;
    let n = number_arg(args, 0)?;
    let digits = if args.len() > 1 { number_arg(args, 1)?.trunc() } else { 0.0 };
    if digits.abs() > MAX_DECIMALS {
        return Err(invalid_arg(format!("decimals must be between -{0} and {0}", MAX_DECIMALS)));
    }
    let factor = 10f64.powf(digits);
    finite((n * factor).round() / factor)
}

fn sqrt(args: &[Value]) -> Result<Value, ErrorValue> {
    expect_args("SQRT", args, 1, 1)?;
    let n = number_arg(args, 0)?;
    if n < 0.0 {
        return Err(ErrorValue::new(ErrorKind::Num, "SQRT of a negative number"));
    }
    Ok(Value::number(n.sqrt()))
}

fn power(args: &[Value]) -> Result<Value, ErrorValue> {
    expect_args("POWER", args, 2, 2)?;
    finite(number_arg(args, 0)?.powf(number_arg(args, 1)?))
}

fn modulo(args: &[Value]) -> Result<Value, ErrorValue> {
    expect_args("MOD", args, 2, 2)?;
    let n = number_arg(args, 0)?;
    let d = number_arg(args, 1)?;
    if d == 0.0 {
        return Err(ErrorValue::new(ErrorKind::DivZero, "MOD by zero"));
    }
    Ok(Value::number(n - d * (n / d).floor()))
}

fn if_fn(args: &[Value]) -> Result<Value, ErrorValue> {
    expect_args("IF", args, 2, 3)?;
    if scalar_arg(args, 0).coerce_bool()? {
        Ok(args[1].clone())
    } else {
        Ok(args.get(2).cloned().unwrap_or(Value::boolean(false)))
    }
}

fn booleans(name: &str, args: &[Value]) -> Result<Vec<bool>, ErrorValue> {
    expect_args(name, args, 1, usize::MAX)?;
    let values = args
        .iter()
        .flat_map(Value::scalars)
        .filter(|s| !matches!(s, Scalar::Empty))
        .map(|s| s.coerce_bool())
        .collect::<Result<Vec<_>, _>>()?;
    if values.is_empty() {
        return Err(invalid_arg(format!("{} has no logical values", name)));
    }
    Ok(values)
}

fn and(args: &[Value]) -> Result<Value, ErrorValue> {
    Ok(Value::boolean(booleans("AND", args)?.into_iter().all(|b| b)))
}

fn or(args: &[Value]) -> Result<Value, ErrorValue> {
    Ok(Value::boolean(booleans("OR", args)?.into_iter().any(|b| b)))
}

fn not(args: &[Value]) -> Result<Value, ErrorValue> {
    expect_args("NOT", args, 1, 1)?;
    Ok(Value::boolean(!scalar_arg(args, 0).coerce_bool()?))
}

fn isblank(args: &[Value]) -> Result<Value, ErrorValue> {
    expect_args("ISBLANK", args, 1, 1)?;
    Ok(Value::boolean(scalar_arg(args, 0) == Scalar::Empty))
}

fn isnumber(args: &[Value]) -> Result<Value, ErrorValue> {
    expect_args("ISNUMBER", args, 1, 1)?;
    Ok(Value::boolean(matches!(scalar_arg(args, 0), Scalar::Number(_))))
}

fn istext(args: &[Value]) -> Result<Value, ErrorValue> {
    expect_args("ISTEXT", args, 1, 1)?;
    Ok(Value::boolean(matches!(scalar_arg(args, 0), Scalar::Text(_))))
}

fn concatenate(args: &[Value]) -> Result<Value, ErrorValue> {
    expect_args("CONCATENATE", args, 0, usize::MAX)?;
    let joined: String = args
        .iter()
        .flat_map(Value::scalars)
        .map(|s| s.to_text())
        .collect();
    Ok(Value::text(joined))
}

fn len(args: &[Value]) -> Result<Value, ErrorValue> {
    expect_args("LEN", args, 1, 1)?;
    Ok(Value::number(text_arg(args, 0).chars().count() as f64))
}

fn upper(args: &[Value]) -> Result<Value, ErrorValue> {
    expect_args("UPPER", args, 1, 1)?;
    Ok(Value::text(text_arg(args, 0).to_uppercase()))
}

fn lower(args: &[Value]) -> Result<Value, ErrorValue> {
    expect_args("LOWER", args, 1, 1)?;
    Ok(Value::text(text_arg(args, 0).to_lowercase()))
}

fn trim(args: &[Value]) -> Result<Value, ErrorValue> {
    expect_args("TRIM", args, 1, 1)?;
    let text = text_arg(args, 0);
    Ok(Value::text(text.split(' ').filter(|w| !w.is_empty()).collect::<Vec<_>>().join(" ")))
}

fn hyperlink(args: &[Value]) -> Result<Value, ErrorValue> {
    expect_args("HYPERLINK", args, 1, 2)?;
    let url = text_arg(args, 0);
    if url.trim().is_empty() {
        return Err(invalid_arg("HYPERLINK needs a URL"));
    }
    let title = args.get(1).map(|_| text_arg(args, 1)).filter(|t| !t.is_empty());
    Ok(Value::Rich(RichValue {
        hyperlink: url,
        title,
    }))
}

fn today(args: &[Value]) -> Result<Value, ErrorValue> {
    expect_args("TODAY", args, 0, 0)?;
    Ok(Value::text(Local::now().format("%Y-%m-%d").to_string()))
}

fn now(args: &[Value]) -> Result<Value, ErrorValue> {
    expect_args("NOW", args, 0, 0)?;
    Ok(Value::text(Local::now().format("%Y-%m-%d %H:%M:%S").to_string()))
}

fn rand_fn(args: &[Value]) -> Result<Value, ErrorValue> {
    expect_args("RAND", args, 0, 0)?;
    Ok(Value::number(rand::thread_rng().r#gen()))
}

fn randbetween(args: &[Value]) -> Result<Value, ErrorValue> {
    expect_args("RANDBETWEEN", args, 2, 2)?;
    let low = number_arg(args, 0)?.ceil() as i64;
    let high = number_arg(args, 1)?.floor() as i64;
    if low > high {
        return Err(ErrorValue::new(ErrorKind::Num, "RANDBETWEEN low is greater than high"));
    }
    Ok(Value::number(rand::thread_rng().gen_range(low..=high) as f64))
}

fn na(args: &[Value]) -> Result<Value, ErrorValue> {
    expect_args("NA", args, 0, 0)?;
    Err(ErrorValue::new(ErrorKind::NotAvailable, "Value not available"))
}
