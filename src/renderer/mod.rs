//! Template renderer
//!
//! Walks the blocks of a parsed [`Template`] left to right and concatenates
//! their text. Function calls go through the kernel's invocation pipeline,
//! one at a time.

pub mod config;

pub use config::RenderOptions;

use serde_json::Value;
use tracing::debug;

use crate::error::KernelError;
use crate::functions::{FunctionDescriptor, KernelArguments};
use crate::kernel::Kernel;
use crate::parser::{Argument, Block, InvocationBlock, Template, VariableBlock};

/// Parameter that receives the first positional argument of a function
/// that declares no parameters
pub const DEFAULT_INPUT_PARAMETER: &str = "input";

/// Render a parsed template.
///
/// Missing variables render as empty text. Variable values and function
/// output are escaped unless `options` trusts them. Arguments handed to
/// functions are never escaped.
pub async fn render(
    kernel: &Kernel,
    template: &Template,
    arguments: &KernelArguments,
    options: &RenderOptions,
) -> Result<String, KernelError> {
    let mut output = String::with_capacity(template.source().len());

    for block in template.blocks() {
        match &block.node {
            Block::Text(text) => output.push_str(text),
            Block::Value(value) => output.push_str(&value.value),
            Block::Variable(var) => output.push_str(&render_variable(var, arguments, options)),
            Block::NamedArgument(named) => {
                output.push_str(&render_argument(&named.value.node, arguments, options))
            }
            Block::Invocation(invocation) => {
                let text = render_invocation(kernel, invocation, arguments, options)
                    .await
                    .map_err(|e| KernelError::Render {
                        block: template.raw(block).to_string(),
                        source: Box::new(e),
                    })?;
                output.push_str(&text);
            }
        }
    }

    debug!(blocks = template.blocks().len(), "rendered template");
    Ok(output)
}

fn render_variable(
    var: &VariableBlock,
    arguments: &KernelArguments,
    options: &RenderOptions,
) -> String {
    let name = var.name.as_str();
    let Some(value) = arguments.get_text(name) else {
        debug!(variable = name, "variable not found, rendering empty");
        return String::new();
    };
    if options.is_trusted_variable(name) {
        value
    } else {
        escape_xml(&value)
    }
}

fn render_argument(
    arg: &Argument,
    arguments: &KernelArguments,
    options: &RenderOptions,
) -> String {
    match arg {
        Argument::Value(value) => value.value.clone(),
        Argument::Variable(var) => render_variable(var, arguments, options),
    }
}

async fn render_invocation(
    kernel: &Kernel,
    invocation: &InvocationBlock,
    arguments: &KernelArguments,
    options: &RenderOptions,
) -> Result<String, KernelError> {
    let function = kernel.functions().resolve(&invocation.function.node)?;
    let call_arguments = bind_arguments(function.metadata(), invocation, arguments)?;

    let outcome = kernel.invoke_function(&function, call_arguments).await?;
    let text = outcome.text();

    if options.is_trusted_output() {
        Ok(text)
    } else {
        Ok(escape_xml(&text))
    }
}

/// Build the argument table for one call: a copy of the caller's table
/// with positional and named arguments applied on top.
///
/// The i-th positional argument binds to the i-th declared parameter. A
/// function without declared parameters takes one positional argument as
/// `input`. Variables missing from the table are not bound, so parameter
/// defaults still apply.
pub fn bind_arguments(
    function: &FunctionDescriptor,
    invocation: &InvocationBlock,
    arguments: &KernelArguments,
) -> Result<KernelArguments, KernelError> {
    let mut bound = arguments.clone();

    let parameter_names: Vec<&str> = if function.parameters.is_empty() {
        vec![DEFAULT_INPUT_PARAMETER]
    } else {
        function.parameters.iter().map(|p| p.name.as_str()).collect()
    };

    if invocation.positional.len() > parameter_names.len() {
        return Err(KernelError::TooManyPositionalArguments {
            function: function.qualified_name(),
            accepted: parameter_names.len(),
        });
    }

    for (name, arg) in parameter_names.iter().zip(&invocation.positional) {
        if let Some(value) = argument_value(&arg.node, arguments) {
            bound.insert(*name, value);
        }
    }

    for (name, named) in &invocation.named {
        if let Some(value) = argument_value(&named.node.value.node, arguments) {
            bound.insert(name.clone(), value);
        }
    }

    Ok(bound)
}

fn argument_value(arg: &Argument, arguments: &KernelArguments) -> Option<Value> {
    match arg {
        Argument::Value(value) => Some(Value::String(value.value.clone())),
        Argument::Variable(var) => arguments.get(var.name.as_str()).cloned(),
    }
}

/// Escape text for embedding in markup-like prompts
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
