//! Built-in native collections
//!
//! `text`, `math` and `time` are small enough to be useful from templates
//! and the CLI without any model behind them.

use anyhow::{anyhow, bail};
use chrono::{Local, SecondsFormat};
use serde_json::{json, Value};

use crate::error::KernelError;
use crate::functions::{
    FunctionCollection, FunctionDescriptor, KernelArguments, NativeFunction, ParameterDescriptor,
};
use crate::kernel::Kernel;
use crate::renderer::DEFAULT_INPUT_PARAMETER;

/// Register every built-in collection on `kernel`
pub fn register_builtins(kernel: &mut Kernel) -> Result<(), KernelError> {
    kernel.add_collection(text_collection()?)?;
    kernel.add_collection(math_collection()?)?;
    kernel.add_collection(time_collection()?)?;
    Ok(())
}

fn input_parameter() -> ParameterDescriptor {
    ParameterDescriptor::new(DEFAULT_INPUT_PARAMETER)
        .with_description("Text to transform")
        .with_type("string")
        .required()
}

fn input_text(args: &KernelArguments) -> String {
    args.get_text(DEFAULT_INPUT_PARAMETER).unwrap_or_default()
}

fn string_function(
    name: &str,
    description: &str,
    transform: fn(&str) -> String,
) -> NativeFunction {
    NativeFunction::from_fn(
        FunctionDescriptor::native(name)
            .with_description(description)
            .with_parameter(input_parameter()),
        move |args| Ok(Value::String(transform(&input_text(args)))),
    )
}

/// `uppercase`, `lowercase`, `trim`, `concat` and `length`
pub fn text_collection() -> Result<FunctionCollection, KernelError> {
    FunctionCollection::new("text")?
        .with_description("String helpers")
        .with_function(string_function(
            "uppercase",
            "Convert text to upper case",
            str::to_uppercase,
        ))?
        .with_function(string_function(
            "lowercase",
            "Convert text to lower case",
            str::to_lowercase,
        ))?
        .with_function(string_function(
            "trim",
            "Remove leading and trailing whitespace",
            |s| s.trim().to_string(),
        ))?
        .with_function(NativeFunction::from_fn(
            FunctionDescriptor::native("concat")
                .with_description("Join two strings")
                .with_parameter(input_parameter())
                .with_parameter(
                    ParameterDescriptor::new("other")
                        .with_type("string")
                        .with_default(""),
                ),
            |args| {
                let other = args.get_text("other").unwrap_or_default();
                Ok(Value::String(input_text(args) + &other))
            },
        ))?
        .with_function(NativeFunction::from_fn(
            FunctionDescriptor::native("length")
                .with_description("Number of characters in the text")
                .with_parameter(input_parameter())
                .with_return_description("character count"),
            |args| Ok(json!(input_text(args).chars().count())),
        ))
}

/// Read a numeric argument given either as a JSON number or as text
fn number(args: &KernelArguments, name: &str) -> anyhow::Result<f64> {
    match args.get(name) {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| anyhow!("argument '{}' is out of range", name)),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| anyhow!("argument '{}' is not a number: '{}'", name, s)),
        Some(other) => bail!("argument '{}' is not a number: {}", name, other),
        None => bail!("argument '{}' is missing", name),
    }
}

/// Integral results come back as integers so `2 + 3` renders as `5`
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

fn binary_function(name: &str, description: &str, op: fn(f64, f64) -> f64) -> NativeFunction {
    NativeFunction::from_fn(
        FunctionDescriptor::native(name)
            .with_description(description)
            .with_parameter(ParameterDescriptor::new("x").with_type("number").required())
            .with_parameter(ParameterDescriptor::new("y").with_type("number").required()),
        move |args| Ok(number_value(op(number(args, "x")?, number(args, "y")?))),
    )
}

/// `add`, `subtract` and `multiply`
pub fn math_collection() -> Result<FunctionCollection, KernelError> {
    FunctionCollection::new("math")?
        .with_description("Arithmetic on two numbers")
        .with_function(binary_function("add", "Add y to x", |x, y| x + y))?
        .with_function(binary_function("subtract", "Subtract y from x", |x, y| x - y))?
        .with_function(binary_function("multiply", "Multiply x by y", |x, y| x * y))
}

/// `now` (RFC 3339 timestamp) and `today` (ISO date), both in local time
pub fn time_collection() -> Result<FunctionCollection, KernelError> {
    FunctionCollection::new("time")?
        .with_description("Current date and time")
        .with_function(NativeFunction::from_fn(
            FunctionDescriptor::native("now").with_description("Current local date and time"),
            |_| {
                Ok(Value::String(
                    Local::now().to_rfc3339_opts(SecondsFormat::Secs, false),
                ))
            },
        ))?
        .with_function(NativeFunction::from_fn(
            FunctionDescriptor::native("today").with_description("Current local date"),
            |_| Ok(Value::String(Local::now().date_naive().to_string())),
        ))
}
