//! WGSL validation using the naga library.

use anyhow::{Context, Result, anyhow};

/// Parse and validate WGSL source, returning the naga module on success.
///
/// Validation runs before any wgpu object is created so shader mistakes
/// surface as readable job errors with the offending source attached.
pub fn validate_wgsl(source: &str) -> Result<naga::Module> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| {
        anyhow!(
            "WGSL parse failed:\n{}",
            format_naga_error(source, &e.emit_to_string(source))
        )
    })?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    )
    .validate(&module)
    .map_err(|e| {
        anyhow!(
            "WGSL validation failed:\n{}",
            format_naga_error(source, &e.emit_to_string(source))
        )
    })?;

    Ok(module)
}

/// Validate WGSL and name what generated it in the error.
pub fn validate_wgsl_with_context(source: &str, context: &str) -> Result<naga::Module> {
    validate_wgsl(source).with_context(|| format!("{} generated invalid WGSL", context))
}

fn format_naga_error(source: &str, message: &str) -> String {
    let mut output = String::new();
    output.push_str(&format!("  {}\n", message.trim_end()));

    output.push_str("\nGenerated WGSL:\n");
    output.push_str("---\n");
    for (line_num, line) in source.lines().enumerate() {
        output.push_str(&format!("{:4} | {}\n", line_num + 1, line));
    }
    output.push_str("---\n");

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_wgsl() {
        let source = r#"
@vertex
fn vs_main(@location(0) position: vec3f) -> @builtin(position) vec4f {
    return vec4f(position, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4f {
    return vec4f(1.0, 0.0, 0.0, 1.0);
}
"#;
        assert!(validate_wgsl(source).is_ok());
    }

    #[test]
    fn test_invalid_wgsl_syntax() {
        let source = r#"
@fragment
fn fs_main() -> @location(0) vec4f {
    return vec4f(1.0, 0.0, 0.0
}
"#;
        let err = validate_wgsl(source).unwrap_err();
        assert!(format!("{err:#}").contains("Generated WGSL"));
    }

    #[test]
    fn test_invalid_wgsl_type_error() {
        let source = r#"
@fragment
fn fs_main() -> @location(0) vec4f {
    let x: vec4f = 1.0;
    return x;
}
"#;
        let err = validate_wgsl_with_context(source, "node 7").unwrap_err();
        assert!(format!("{err:#}").contains("node 7 generated invalid WGSL"));
    }
}
