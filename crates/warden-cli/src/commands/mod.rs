pub mod analyze;
pub mod config;
pub mod reflect;
pub mod replay;

use warden_core::ToolCall;

/// Parse a `--tool` argument: `NAME` or `NAME:{json arguments}`.
pub fn parse_tool_spec(spec: &str) -> anyhow::Result<ToolCall> {
    let spec = spec.trim();
    match spec.split_once(':') {
        Some((name, args)) => {
            let name = name.trim();
            if name.is_empty() {
                anyhow::bail!("tool spec '{spec}' has an empty name");
            }
            let arguments: serde_json::Value = serde_json::from_str(args)
                .map_err(|e| anyhow::anyhow!("tool '{name}' has invalid JSON arguments: {e}"))?;
            Ok(ToolCall::new(name, arguments))
        }
        None if spec.is_empty() => anyhow::bail!("empty tool spec"),
        None => Ok(ToolCall::named(spec)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_name() {
        let call = parse_tool_spec("todo_write").unwrap();
        assert_eq!(call.name, "todo_write");
    }

    #[test]
    fn test_parse_name_with_arguments() {
        let call = parse_tool_spec(r#"bash:{"command":"cargo test"}"#).unwrap();
        assert_eq!(call.name, "bash");
        assert_eq!(call.arguments["command"], "cargo test");
    }

    #[test]
    fn test_parse_rejects_bad_json_and_empty_names() {
        assert!(parse_tool_spec("bash:{not json").is_err());
        assert!(parse_tool_spec(":{}").is_err());
        assert!(parse_tool_spec("  ").is_err());
    }
}
