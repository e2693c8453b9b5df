//! Calculator tool backed by `evalexpr`.
//!
//! Evaluates arithmetic expressions (`+`, `-`, `*`, `/`, `%`, `^` via
//! `math::pow`, parentheses, comparison operators) and returns the numeric
//! result as a string.  Malformed or non-numeric expressions surface as tool
//! errors, which the engine feeds back to the model for self-correction.

use crate::agentllm::error::AgentError;
use crate::agentllm::tool_registry::Tool;
use serde_json::json;

/// Build the calculator [`Tool`].
///
/// # Example
///
/// ```rust
/// # #[tokio::main]
/// # async fn main() {
/// use agentllm::tools::calculator_tool;
/// use serde_json::json;
///
/// let calc = calculator_tool();
/// let result = calc.call(json!({"expression": "2 + 2 * 3"})).await.unwrap();
/// assert_eq!(result, json!("8"));
/// # }
/// ```
pub fn calculator_tool() -> Tool {
    Tool::new(
        "calculator",
        "Evaluates a mathematical expression and returns the numeric result.",
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The expression to evaluate, e.g. \"(3 + 4) * 2\""
                }
            },
            "required": ["expression"]
        }),
        |params| async move {
            let expression = params
                .get("expression")
                .and_then(|e| e.as_str())
                .ok_or_else(|| AgentError::ToolExecution {
                    message: "missing \"expression\" parameter".to_string(),
                    tool_name: Some("calculator".to_string()),
                })?;

            match evalexpr::eval(expression.trim()) {
                Ok(value) => {
                    let number = value.as_number().map_err(|_| AgentError::ToolExecution {
                        message: format!("expression \"{}\" is not numeric", expression),
                        tool_name: Some("calculator".to_string()),
                    })?;
                    // Render integers without a trailing ".0".
                    let rendered = if number.fract() == 0.0 && number.abs() < 1e15 {
                        format!("{}", number as i64)
                    } else {
                        format!("{}", number)
                    };
                    Ok(json!(rendered))
                }
                Err(error) => Err(AgentError::ToolExecution {
                    message: format!("evaluation error: {}", error),
                    tool_name: Some("calculator".to_string()),
                }),
            }
        },
    )
}
